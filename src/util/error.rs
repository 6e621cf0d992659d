//! Module containing error types used in this crate
use err_derive::Error;

/// Errors of this crate
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] #[error(from)] std::io::Error),

	#[error(display = "JSON error: {}", _0)]
	Json(#[error(source)] #[error(from)] serde_json::Error),

	#[error(display = "Invalid configuration: {}", _0)]
	Config(String),

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	pub fn message(msg: impl Into<String>) -> Self {
		Error::Message(msg.into())
	}
}
