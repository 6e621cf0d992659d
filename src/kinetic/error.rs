//! Module containing error types used in this crate
use err_derive::Error;

use crate::proto;

#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "network error: {}", _0)]
	Net(#[error(source)] #[error(from)] skiff_net::Error),

	#[error(display = "bad frame magic")]
	BadMessage,

	#[error(display = "frame exceeds the configured maximum")]
	TooBig,

	#[error(display = "protobuf decode error: {}", _0)]
	Decode(#[error(source)] #[error(from)] prost::DecodeError),

	#[error(display = "drive error {:?}: {}", _0, _1)]
	Drive(proto::StatusCode, String),

	#[error(display = "connection reset")]
	ConnectionReset,

	#[error(display = "deadline exceeded")]
	Timeout,

	#[error(display = "client stopped")]
	Stopped,

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	pub fn message(msg: impl Into<String>) -> Self {
		Error::Message(msg.into())
	}
}
