//! Kinetic drive client and the blob layer striping chunks over drives
//!
//! The transport is a single persistent TCP connection per drive carrying
//! length-prefixed, HMAC-authenticated protobuf frames. RPCs are sequenced,
//! replies are correlated by `ack_sequence` and may arrive out of order; a
//! connection actor per drive owns the reconnect cycle. On top of it, the
//! blob layer stripes every chunk into fixed-size blocks spread over the
//! target drives, with a manifest key sealing the chunk at commit time.
#[macro_use]
extern crate tracing;

pub mod blob;
pub mod client;
pub mod discovery;
pub mod error;
pub mod proto;
pub mod registry;
pub mod rpc;
pub mod wire;

pub use client::{ClientOptions, DriveClient, DriveRegistry, KineticClient, RpcHandle};
pub use error::Error;
