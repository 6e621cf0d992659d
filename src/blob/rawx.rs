//! Chunk store proxied to a remote blob server over HTTP
//!
//! Each transaction owns one connection to the remote server and drives the
//! incremental client codec: chunked PUT with the xattrs as header fields,
//! streamed GET, DELETE guarded by an `Expect: 100-continue` exchange.
use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use skiff_http::{ReplyReader, RequestWriter, Step};
use skiff_net::NetChannel;
use skiff_util::time::deadline_ms;
use tokio::time::Instant;

use crate::api::*;
use crate::error::Error;

const CONNECT_TIMEOUT_MS: u64 = 5000;
const IO_TIMEOUT_MS: u64 = 1000;

fn io_deadline() -> Instant {
	deadline_ms(IO_TIMEOUT_MS)
}

/// A [`Repository`] forwarding every chunk to one remote blob server
#[derive(Clone)]
pub struct RawxRepository {
	host: String,
	xattr_prefix: String,
}

impl RawxRepository {
	pub fn new(host: impl Into<String>, xattr_prefix: impl Into<String>) -> Self {
		RawxRepository {
			host: host.into(),
			xattr_prefix: xattr_prefix.into(),
		}
	}

	fn selector(chunk_id: &str) -> String {
		format!("/{}", chunk_id)
	}
}

impl Repository for RawxRepository {
	fn backend(&self) -> &'static str {
		"rawx"
	}

	fn upload(&self, chunk_id: &str, _targets: &[Target]) -> Result<Box<dyn Upload>, Error> {
		Ok(Box::new(RawxUpload {
			host: self.host.clone(),
			selector: Self::selector(chunk_id),
			xattr_prefix: self.xattr_prefix.clone(),
			xattr: BTreeMap::new(),
			chan: None,
			request: None,
			step: TransactionStep::Init,
		}))
	}

	fn download(&self, chunk_id: &str, _targets: &[Target]) -> Result<Box<dyn Download>, Error> {
		Ok(Box::new(RawxDownload {
			host: self.host.clone(),
			selector: Self::selector(chunk_id),
			range: None,
			chan: None,
			reply: ReplyReader::new(),
			reading: false,
			step: TransactionStep::Init,
		}))
	}

	fn removal(&self, chunk_id: &str, _targets: &[Target]) -> Result<Box<dyn Removal>, Error> {
		Ok(Box::new(RawxRemoval {
			host: self.host.clone(),
			selector: Self::selector(chunk_id),
			chan: None,
			request: None,
			step: TransactionStep::Init,
		}))
	}
}

struct RawxUpload {
	host: String,
	selector: String,
	xattr_prefix: String,
	xattr: BTreeMap<String, String>,
	chan: Option<NetChannel>,
	request: Option<RequestWriter>,
	step: TransactionStep,
}

impl RawxUpload {
	/// Headers go out lazily, on the first body byte or at commit, so that
	/// xattrs recorded while Prepared still make it into the request.
	async fn ensure_headers(&mut self) -> Result<(), Error> {
		if self.request.is_some() {
			return Ok(());
		}
		let mut request = RequestWriter::new("PUT", &self.selector);
		request.field("Host", &self.host).content_length(-1);
		for (k, v) in &self.xattr {
			request.field(format!("{}{}", self.xattr_prefix, k), v);
		}
		let chan = self
			.chan
			.as_mut()
			.ok_or_else(|| Error::internal("upload channel not open"))?;
		request.write_headers(chan, io_deadline()).await?;
		self.request = Some(request);
		Ok(())
	}
}

#[async_trait]
impl Upload for RawxUpload {
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}
		match NetChannel::connect(&self.host, deadline_ms(CONNECT_TIMEOUT_MS)).await {
			Ok(chan) => {
				let _ = chan.set_nodelay(true);
				self.chan = Some(chan);
				self.step = TransactionStep::Prepared;
				Ok(())
			}
			Err(e) => {
				self.step = TransactionStep::Done;
				Err(e.into())
			}
		}
	}

	fn set_xattr(&mut self, key: &str, value: &str) -> Result<(), Error> {
		if self.step == TransactionStep::Done || self.request.is_some() {
			return Err(Error::bad_step());
		}
		self.xattr.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.ensure_headers().await?;
		let (request, chan) = match (self.request.as_mut(), self.chan.as_mut()) {
			(Some(request), Some(chan)) => (request, chan),
			_ => return Err(Error::internal("upload stream not open")),
		};
		request.write(chan, buf, io_deadline()).await?;
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;

		self.ensure_headers().await?;
		let (request, chan) = match (self.request.as_mut(), self.chan.as_mut()) {
			(Some(request), Some(chan)) => (request, chan),
			_ => return Err(Error::internal("upload stream not open")),
		};
		request.finish(chan, io_deadline()).await?;

		let mut reply = ReplyReader::new();
		reply.read_headers(chan, io_deadline()).await?;
		while reply.step() != Step::Done {
			if reply.read_body(chan, io_deadline()).await?.is_empty() {
				break;
			}
		}
		debug!("remote upload to {} replied {}", self.host, reply.status());
		match reply.status() {
			200..=299 => Ok(()),
			403 => Err(Error::Forbidden("remote refused the upload".into())),
			status => Err(Error::internal(format!(
				"remote upload failed with status {}",
				status
			))),
		}
	}

	async fn abort(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;
		if let Some(chan) = &self.chan {
			chan.shutdown();
		}
		Ok(())
	}
}

struct RawxDownload {
	host: String,
	selector: String,
	range: Option<(u64, u64)>,
	chan: Option<NetChannel>,
	reply: ReplyReader,
	reading: bool,
	step: TransactionStep,
}

#[async_trait]
impl Download for RawxDownload {
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}

		let outcome = async {
			let mut chan = NetChannel::connect(&self.host, deadline_ms(CONNECT_TIMEOUT_MS)).await?;
			let mut request = RequestWriter::new("GET", &self.selector);
			request.field("Host", &self.host).content_length(0);
			if let Some((offset, size)) = self.range {
				request.field(
					"Range",
					format!("bytes={}-{}", offset, offset + size.saturating_sub(1)),
				);
			}
			request.write_headers(&mut chan, io_deadline()).await?;
			request.finish(&mut chan, io_deadline()).await?;
			self.reply.read_headers(&mut chan, io_deadline()).await?;
			self.chan = Some(chan);
			Ok::<_, Error>(())
		}
		.await;

		if let Err(e) = outcome {
			self.step = TransactionStep::Done;
			return Err(e);
		}

		match self.reply.status() {
			200 | 206 => {
				self.step = TransactionStep::Prepared;
				Ok(())
			}
			status => {
				self.step = TransactionStep::Done;
				match status {
					404 => Err(Error::NotFound),
					403 => Err(Error::Forbidden("remote refused the download".into())),
					416 => Err(Error::NotFound),
					_ => Err(Error::Protocol(format!(
						"remote download failed with status {}",
						status
					))),
				}
			}
		}
	}

	fn is_eof(&self) -> bool {
		self.step == TransactionStep::Done
			|| (self.step == TransactionStep::Prepared && self.reply.step() == Step::Done)
	}

	async fn read(&mut self) -> Result<Bytes, Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.reading = true;
		let chan = self
			.chan
			.as_mut()
			.ok_or_else(|| Error::internal("download channel not open"))?;
		let slice = self.reply.read_body(chan, io_deadline()).await?;
		Ok(Bytes::copy_from_slice(slice))
	}

	fn set_range(&mut self, offset: u64, size: u64) -> Result<(), Error> {
		// The range travels in the request headers, so it must be recorded
		// before prepare() opens the exchange.
		if self.step != TransactionStep::Init || self.reading {
			return Err(Error::bad_step());
		}
		self.range = Some((offset, size));
		Ok(())
	}
}

struct RawxRemoval {
	host: String,
	selector: String,
	chan: Option<NetChannel>,
	request: Option<RequestWriter>,
	step: TransactionStep,
}

#[async_trait]
impl Removal for RawxRemoval {
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}

		let outcome = async {
			let mut chan = NetChannel::connect(&self.host, deadline_ms(CONNECT_TIMEOUT_MS)).await?;
			let mut request = RequestWriter::new("DELETE", &self.selector);
			request
				.field("Host", &self.host)
				.field("Expect", "100-continue")
				.content_length(-1);
			request.write_headers(&mut chan, io_deadline()).await?;

			let mut reply = ReplyReader::new();
			let status = reply.read_interim(&mut chan, io_deadline()).await?;
			self.chan = Some(chan);
			self.request = Some(request);
			Ok::<u16, Error>(status)
		}
		.await;

		match outcome {
			Ok(100) => {
				debug!("remote removal on {} acknowledged", self.host);
				self.step = TransactionStep::Prepared;
				Ok(())
			}
			Ok(status) => {
				self.step = TransactionStep::Done;
				match status {
					404 => Err(Error::NotFound),
					403 => Err(Error::Forbidden("remote refused the removal".into())),
					400 => Err(Error::Protocol("remote rejected the removal".into())),
					_ => Err(Error::internal(format!(
						"remote removal failed with status {}",
						status
					))),
				}
			}
			Err(e) => {
				self.step = TransactionStep::Done;
				Err(e)
			}
		}
	}

	async fn commit(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;

		let (request, chan) = match (self.request.as_mut(), self.chan.as_mut()) {
			(Some(request), Some(chan)) => (request, chan),
			_ => return Err(Error::internal("removal channel not open")),
		};
		request.finish(chan, io_deadline()).await?;

		let mut reply = ReplyReader::new();
		reply.read_headers(chan, io_deadline()).await?;
		while reply.step() != Step::Done {
			if reply.read_body(chan, io_deadline()).await?.is_empty() {
				break;
			}
		}
		match reply.status() {
			200 | 201 | 204 => Ok(()),
			404 => Err(Error::NotFound),
			403 => Err(Error::Forbidden("remote refused the removal".into())),
			status => Err(Error::internal(format!(
				"remote removal failed with status {}",
				status
			))),
		}
	}

	async fn abort(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;
		if let Some(chan) = &self.chan {
			chan.shutdown();
		}
		Ok(())
	}
}
