//! Error replies of the gateway
//!
//! Every failure carries two codes: the HTTP status of the reply, and a
//! stable internal status rendered in the JSON body (operational dashboards
//! key on the latter). The two are independent.
use hyper::{Body, Response, StatusCode};

use skiff_blob::{Cause, Error as BlobError};

#[derive(Debug)]
pub struct SoftError {
	pub http: StatusCode,
	pub soft: u16,
	pub message: String,
}

impl SoftError {
	pub fn new(http: u16, soft: u16, message: impl Into<String>) -> Self {
		SoftError {
			http: StatusCode::from_u16(http).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
			soft,
			message: message.into(),
		}
	}

	pub fn bad_request(message: impl Into<String>) -> Self {
		SoftError::new(400, 400, message)
	}

	pub fn method_not_managed() -> Self {
		SoftError::new(406, 406, "Method not managed")
	}

	/// Failures of the upload path
	pub fn from_upload(e: BlobError) -> Self {
		match e.cause() {
			Cause::Already => SoftError::new(406, 421, "blobs found"),
			_ => Self::from_common(e),
		}
	}

	/// Failures of the download path
	pub fn from_download(e: BlobError) -> Self {
		match e.cause() {
			Cause::NotFound => SoftError::new(404, 420, "blobs not found"),
			_ => Self::from_common(e),
		}
	}

	/// Failures of the removal path
	pub fn from_removal(e: BlobError) -> Self {
		match e.cause() {
			Cause::NotFound => SoftError::new(404, 402, "no blob found"),
			_ => Self::from_common(e),
		}
	}

	fn from_common(e: BlobError) -> Self {
		match e.cause() {
			Cause::Already => SoftError::new(406, 421, "blobs found"),
			Cause::NotFound => SoftError::new(404, 420, "blobs not found"),
			Cause::Forbidden => SoftError::new(403, 403, e.to_string()),
			Cause::NetworkError => SoftError::new(503, 500, "devices unreachable"),
			Cause::ProtocolError => SoftError::new(502, 500, "invalid reply from device"),
			Cause::Unsupported => SoftError::new(501, 501, e.to_string()),
			Cause::InternalError => SoftError::new(500, 500, e.to_string()),
		}
	}

	/// `{"status": <soft>, "message": "<message>"}`
	pub fn into_response(self) -> Response<Body> {
		let payload = serde_json::json!({
			"status": self.soft,
			"message": self.message,
		})
		.to_string();
		Response::builder()
			.status(self.http)
			.header("Content-Type", "application/json")
			.header("Content-Length", payload.len())
			.body(Body::from(payload))
			.expect("static response headers are valid")
	}
}
