//! Non-blocking TCP channels with explicit deadlines
#[macro_use]
extern crate tracing;

pub mod channel;
pub mod error;

pub use channel::{NetChannel, NetListener, Poll, ReadChannel, ReadOutcome, WriteChannel};
pub use error::Error;
