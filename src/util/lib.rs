//! Crate containing the pieces shared by every skiff service
#[macro_use]
extern crate tracing;

pub mod config;
pub mod error;
pub mod shutdown;
pub mod time;
