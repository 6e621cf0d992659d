//! The transaction traits and the back-end seam
use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;

/// The three steps every transaction walks through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStep {
	Init,
	Prepared,
	Done,
}

/// One back-end endpoint a transaction addresses.
///
/// The `rank` orders the target inside its set (e.g. an erasure-coding
/// fragment index); unranked targets keep their declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
	pub url: String,
	pub rank: Option<u32>,
}

impl Target {
	pub fn new(url: impl Into<String>) -> Self {
		Target {
			url: url.into(),
			rank: None,
		}
	}

	pub fn ranked(url: impl Into<String>, rank: u32) -> Self {
		Target {
			url: url.into(),
			rank: Some(rank),
		}
	}
}

/// Upload of one chunk.
///
/// `prepare` may pre-check the remote state, `write` streams body fragments,
/// `commit` seals the chunk (flushing buffered bytes and attaching the
/// xattrs), `abort` releases whatever `prepare` and `write` reserved.
#[async_trait]
pub trait Upload: Send {
	async fn prepare(&mut self) -> Result<(), Error>;

	/// Record an attribute; allowed while the transaction is Init or Prepared
	fn set_xattr(&mut self, key: &str, value: &str) -> Result<(), Error>;

	/// Stream one body fragment; allowed only while Prepared
	async fn write(&mut self, buf: &[u8]) -> Result<(), Error>;

	async fn commit(&mut self) -> Result<(), Error>;

	async fn abort(&mut self) -> Result<(), Error>;
}

/// Download of one chunk
#[async_trait]
pub trait Download: Send {
	async fn prepare(&mut self) -> Result<(), Error>;

	/// True once every byte has been handed out
	fn is_eof(&self) -> bool;

	/// Next run of bytes; empty together with `is_eof()` signals the end.
	/// Allowed only while Prepared.
	async fn read(&mut self) -> Result<Bytes, Error>;

	/// Restrict the download to `size` bytes starting at `offset`. Allowed
	/// while Init, or while Prepared before the first `read`.
	fn set_range(&mut self, offset: u64, size: u64) -> Result<(), Error>;
}

/// Removal of one chunk
#[async_trait]
pub trait Removal: Send {
	async fn prepare(&mut self) -> Result<(), Error>;

	async fn commit(&mut self) -> Result<(), Error>;

	async fn abort(&mut self) -> Result<(), Error>;
}

/// A chunk store. The gateway only ever talks to this trait; the back-end
/// behind it is selected by the configuration.
pub trait Repository: Send + Sync {
	fn backend(&self) -> &'static str;

	fn upload(&self, chunk_id: &str, targets: &[Target]) -> Result<Box<dyn Upload>, Error>;

	fn download(&self, chunk_id: &str, targets: &[Target]) -> Result<Box<dyn Download>, Error>;

	fn removal(&self, chunk_id: &str, targets: &[Target]) -> Result<Box<dyn Removal>, Error>;
}
