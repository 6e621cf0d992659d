//! Module containing error types used in this crate
use err_derive::Error;

/// High-level failure cause, shared by every back-end and by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
	/// Content already exists in a committed state
	Already,
	/// Content absent when required
	NotFound,
	/// Policy, permissions, range mismatch
	Forbidden,
	/// Transport failure to a back-end
	NetworkError,
	/// Malformed back-end reply
	ProtocolError,
	/// Operation not supported by the back-end
	Unsupported,
	/// Precondition or state violation, or anything unknown
	InternalError,
}

/// Errors of the blob transactions
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "blobs found")]
	Already,

	#[error(display = "blobs not found")]
	NotFound,

	#[error(display = "forbidden: {}", _0)]
	Forbidden(String),

	#[error(display = "network error: {}", _0)]
	Network(String),

	#[error(display = "protocol error: {}", _0)]
	Protocol(String),

	#[error(display = "unsupported: {}", _0)]
	Unsupported(String),

	#[error(display = "internal error: {}", _0)]
	Internal(String),
}

impl Error {
	pub fn cause(&self) -> Cause {
		match self {
			Error::Already => Cause::Already,
			Error::NotFound => Cause::NotFound,
			Error::Forbidden(_) => Cause::Forbidden,
			Error::Network(_) => Cause::NetworkError,
			Error::Protocol(_) => Cause::ProtocolError,
			Error::Unsupported(_) => Cause::Unsupported,
			Error::Internal(_) => Cause::InternalError,
		}
	}

	/// The uniform reply to a method called in the wrong transaction step
	pub fn bad_step() -> Self {
		Error::Internal("call not allowed in this transaction step".into())
	}

	pub fn internal(msg: impl Into<String>) -> Self {
		Error::Internal(msg.into())
	}

	pub fn network(msg: impl Into<String>) -> Self {
		Error::Network(msg.into())
	}
}

impl From<skiff_net::Error> for Error {
	fn from(e: skiff_net::Error) -> Error {
		Error::Network(e.to_string())
	}
}

impl From<skiff_http::Error> for Error {
	fn from(e: skiff_http::Error) -> Error {
		match e {
			skiff_http::Error::Net(inner) => Error::Network(inner.to_string()),
			skiff_http::Error::Protocol(msg) => Error::Protocol(msg),
			skiff_http::Error::Client(msg) => Error::Internal(msg),
		}
	}
}
