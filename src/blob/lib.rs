//! The blob transaction API shared by every skiff back-end
//!
//! A chunk is manipulated through one of three transactions (upload,
//! download, removal), all following the same three-step lifecycle:
//! `Init -> prepare() -> Prepared -> commit()/abort() -> Done`. Any other
//! transition is refused with an internal error and leaves the step
//! untouched.
#[macro_use]
extern crate tracing;

pub mod api;
pub mod error;
pub mod mem;
pub mod rawx;

pub use api::{Download, Removal, Repository, Target, TransactionStep, Upload};
pub use error::{Cause, Error};
