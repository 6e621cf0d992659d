//! Module containing error types used in this crate
use err_derive::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] #[error(from)] std::io::Error),

	#[error(display = "operation timed out")]
	Timeout,

	#[error(display = "peer closed the connection")]
	UnexpectedEof,

	#[error(display = "could not resolve {}", _0)]
	Resolve(String),
}

impl Error {
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout)
	}
}
