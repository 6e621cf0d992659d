//! Incremental HTTP/1.1 client codec
//!
//! [`RequestWriter`] streams a request out (inline or chunked body, optional
//! trailers), [`ReplyReader`] consumes the reply incrementally, pausing after
//! the headers so the application can inspect them before the body, and
//! pausing again after each complete reply so a keep-alive connection can be
//! reused.
#[macro_use]
extern crate tracing;

pub mod error;
pub mod reply;
pub mod request;

pub use error::Error;
pub use reply::{ReplyReader, Step};
pub use request::RequestWriter;
