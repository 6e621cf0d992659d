//! HTTP front-end of the blob gateway
//!
//! One hyper service per bound socket. The method selects the transaction:
//! `PUT` drives an upload (with MD5 and byte accounting), `GET` streams a
//! download as a chunked reply, `DELETE` runs a removal. Errors are JSON
//! bodies carrying an internal status code independent of the HTTP one.
#[macro_use]
extern crate tracing;

pub mod error;
pub mod server;

pub use error::SoftError;
pub use server::GatewayServer;
