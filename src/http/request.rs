//! Streaming writer for an upstream HTTP request
use std::collections::{BTreeMap, BTreeSet};

use skiff_net::NetChannel;
use tokio::time::Instant;

use crate::error::Error;

#[derive(Debug, PartialEq, Eq)]
enum WriterStep {
	Fresh,
	Body,
	Finished,
}

/// Writes one request on an established channel.
///
/// A negative `content_length` selects chunked transfer encoding; the body is
/// then emitted one chunk per [`write`](RequestWriter::write) call and
/// [`finish`](RequestWriter::finish) sends the terminal chunk plus the
/// declared trailers. With a non-negative `content_length` the body bytes are
/// sent raw and `finish` verifies the announced byte count was honored.
pub struct RequestWriter {
	method: String,
	selector: String,
	query: BTreeMap<String, String>,
	fields: BTreeMap<String, String>,
	trailers: BTreeSet<String>,
	content_length: i64,
	sent: u64,
	step: WriterStep,
}

impl RequestWriter {
	pub fn new(method: impl Into<String>, selector: impl Into<String>) -> Self {
		RequestWriter {
			method: method.into(),
			selector: selector.into(),
			query: BTreeMap::new(),
			fields: BTreeMap::new(),
			trailers: BTreeSet::new(),
			content_length: -1,
			sent: 0,
			step: WriterStep::Fresh,
		}
	}

	pub fn query(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
		self.query.insert(key.into(), value.into());
		self
	}

	/// Record a header field. For a declared trailer the value may be set (or
	/// overwritten) at any point before `finish`.
	pub fn field(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
		self.fields.insert(key.into(), value.into());
		self
	}

	/// Declare a trailer key; its value is whatever the field carries when
	/// `finish` runs
	pub fn trailer(&mut self, key: impl Into<String>) -> &mut Self {
		self.trailers.insert(key.into());
		self
	}

	/// `-1` selects chunked encoding
	pub fn content_length(&mut self, len: i64) -> &mut Self {
		self.content_length = len;
		self
	}

	fn chunked(&self) -> bool {
		self.content_length < 0
	}

	/// Emit the request line, the framing headers and the fields
	pub async fn write_headers(&mut self, chan: &mut NetChannel, dl: Instant) -> Result<(), Error> {
		if self.step != WriterStep::Fresh {
			return Err(Error::Client("headers already sent".into()));
		}

		let mut head = format!("{} {}", self.method, self.selector);
		let mut sep = '?';
		for (k, v) in &self.query {
			head.push(sep);
			head.push_str(k);
			head.push('=');
			head.push_str(v);
			sep = '&';
		}
		head.push_str(" HTTP/1.1\r\n");

		if self.chunked() {
			head.push_str("Transfer-Encoding: chunked\r\n");
			if !self.trailers.is_empty() {
				head.push_str("Trailers: ");
				let keys = self.trailers.iter().cloned().collect::<Vec<_>>();
				head.push_str(&keys.join(", "));
				head.push_str("\r\n");
			}
		} else {
			head.push_str(&format!("Content-Length: {}\r\n", self.content_length));
		}

		for (k, v) in &self.fields {
			if self.trailers.contains(k) {
				continue;
			}
			head.push_str(k);
			head.push_str(": ");
			head.push_str(v);
			head.push_str("\r\n");
		}
		head.push_str("\r\n");

		chan.send(head.as_bytes(), dl).await?;
		self.step = WriterStep::Body;
		Ok(())
	}

	/// Stream one body fragment
	pub async fn write(
		&mut self,
		chan: &mut NetChannel,
		buf: &[u8],
		dl: Instant,
	) -> Result<(), Error> {
		if self.step != WriterStep::Body {
			return Err(Error::Client("body bytes outside of the body phase".into()));
		}
		if buf.is_empty() {
			return Ok(());
		}

		if self.chunked() {
			let header = format!("{:x}\r\n", buf.len());
			chan.send_vectored(&[header.as_bytes(), buf, b"\r\n"], dl)
				.await?;
		} else {
			if self.sent + buf.len() as u64 > self.content_length as u64 {
				return Err(Error::Client(format!(
					"body overflows the announced Content-Length ({} > {})",
					self.sent + buf.len() as u64,
					self.content_length
				)));
			}
			chan.send(buf, dl).await?;
		}
		self.sent += buf.len() as u64;
		Ok(())
	}

	/// Seal the request: terminal chunk and trailers when chunked, byte-count
	/// verification when inline
	pub async fn finish(&mut self, chan: &mut NetChannel, dl: Instant) -> Result<(), Error> {
		if self.step != WriterStep::Body {
			return Err(Error::Client("request already finished".into()));
		}

		if self.chunked() {
			let mut tail = String::from("0\r\n");
			for k in &self.trailers {
				if let Some(v) = self.fields.get(k) {
					tail.push_str(k);
					tail.push_str(": ");
					tail.push_str(v);
					tail.push_str("\r\n");
				}
			}
			tail.push_str("\r\n");
			chan.send(tail.as_bytes(), dl).await?;
		} else if self.sent != self.content_length as u64 {
			return Err(Error::Client(format!(
				"request body too short ({} of {} bytes)",
				self.sent, self.content_length
			)));
		}

		self.step = WriterStep::Finished;
		Ok(())
	}
}
