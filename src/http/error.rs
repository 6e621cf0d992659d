//! Module containing error types used in this crate
use err_derive::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "network error: {}", _0)]
	Net(#[error(source)] #[error(from)] skiff_net::Error),

	#[error(display = "client misuse: {}", _0)]
	Client(String),

	#[error(display = "protocol error: {}", _0)]
	Protocol(String),
}

impl Error {
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Net(e) if e.is_timeout())
	}
}
