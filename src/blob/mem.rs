//! In-process chunk store, for development and tests
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::api::*;
use crate::error::Error;

// Bytes handed out per read() call, small enough to exercise the callers'
// streaming loops.
const READ_RUN: usize = 8 * 1024;

#[derive(Default)]
struct MemStore {
	committed: HashMap<String, MemChunk>,
	pending: HashSet<String>,
}

#[derive(Clone, Default)]
struct MemChunk {
	data: Bytes,
	xattr: BTreeMap<String, String>,
}

/// A [`Repository`] keeping every committed chunk in memory
#[derive(Clone, Default)]
pub struct MemRepository {
	store: Arc<Mutex<MemStore>>,
}

impl MemRepository {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attributes of a committed chunk, mostly useful to tests
	pub fn xattrs(&self, chunk_id: &str) -> Option<BTreeMap<String, String>> {
		self.store
			.lock()
			.unwrap()
			.committed
			.get(chunk_id)
			.map(|c| c.xattr.clone())
	}
}

impl Repository for MemRepository {
	fn backend(&self) -> &'static str {
		"mem"
	}

	fn upload(&self, chunk_id: &str, _targets: &[Target]) -> Result<Box<dyn Upload>, Error> {
		Ok(Box::new(MemUpload {
			store: self.store.clone(),
			chunk_id: chunk_id.to_string(),
			buffer: Vec::new(),
			xattr: BTreeMap::new(),
			step: TransactionStep::Init,
		}))
	}

	fn download(&self, chunk_id: &str, _targets: &[Target]) -> Result<Box<dyn Download>, Error> {
		Ok(Box::new(MemDownload {
			store: self.store.clone(),
			chunk_id: chunk_id.to_string(),
			data: Bytes::new(),
			offset: 0,
			range: None,
			reading: false,
			step: TransactionStep::Init,
		}))
	}

	fn removal(&self, chunk_id: &str, _targets: &[Target]) -> Result<Box<dyn Removal>, Error> {
		Ok(Box::new(MemRemoval {
			store: self.store.clone(),
			chunk_id: chunk_id.to_string(),
			step: TransactionStep::Init,
		}))
	}
}

struct MemUpload {
	store: Arc<Mutex<MemStore>>,
	chunk_id: String,
	buffer: Vec<u8>,
	xattr: BTreeMap<String, String>,
	step: TransactionStep,
}

#[async_trait]
impl Upload for MemUpload {
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}
		let mut store = self.store.lock().unwrap();
		if store.committed.contains_key(&self.chunk_id) || store.pending.contains(&self.chunk_id) {
			self.step = TransactionStep::Done;
			return Err(Error::Already);
		}
		store.pending.insert(self.chunk_id.clone());
		self.step = TransactionStep::Prepared;
		Ok(())
	}

	fn set_xattr(&mut self, key: &str, value: &str) -> Result<(), Error> {
		if self.step == TransactionStep::Done {
			return Err(Error::bad_step());
		}
		self.xattr.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.buffer.extend_from_slice(buf);
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;
		let mut store = self.store.lock().unwrap();
		store.pending.remove(&self.chunk_id);
		store.committed.insert(
			self.chunk_id.clone(),
			MemChunk {
				data: std::mem::take(&mut self.buffer).into(),
				xattr: std::mem::take(&mut self.xattr),
			},
		);
		Ok(())
	}

	async fn abort(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;
		self.store.lock().unwrap().pending.remove(&self.chunk_id);
		Ok(())
	}
}

struct MemDownload {
	store: Arc<Mutex<MemStore>>,
	chunk_id: String,
	data: Bytes,
	offset: usize,
	range: Option<(u64, u64)>,
	reading: bool,
	step: TransactionStep,
}

impl MemDownload {
	fn apply_range(&mut self) -> Result<(), Error> {
		if let Some((offset, size)) = self.range {
			let end = offset
				.checked_add(size)
				.ok_or_else(|| Error::NotFound)?;
			if end > self.data.len() as u64 {
				return Err(Error::NotFound);
			}
			self.data = self.data.slice(offset as usize..end as usize);
		}
		Ok(())
	}
}

#[async_trait]
impl Download for MemDownload {
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}
		let chunk = {
			let store = self.store.lock().unwrap();
			store.committed.get(&self.chunk_id).cloned()
		};
		match chunk {
			None => {
				self.step = TransactionStep::Done;
				Err(Error::NotFound)
			}
			Some(c) => {
				self.data = c.data;
				match self.apply_range() {
					Ok(()) => {
						self.step = TransactionStep::Prepared;
						Ok(())
					}
					Err(e) => {
						self.step = TransactionStep::Done;
						Err(e)
					}
				}
			}
		}
	}

	fn is_eof(&self) -> bool {
		self.step != TransactionStep::Init && self.offset >= self.data.len()
	}

	async fn read(&mut self) -> Result<Bytes, Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.reading = true;
		let remaining = self.data.len() - self.offset;
		let take = std::cmp::min(remaining, READ_RUN);
		let out = self.data.slice(self.offset..self.offset + take);
		self.offset += take;
		Ok(out)
	}

	fn set_range(&mut self, offset: u64, size: u64) -> Result<(), Error> {
		match self.step {
			TransactionStep::Init => {
				self.range = Some((offset, size));
				Ok(())
			}
			TransactionStep::Prepared if !self.reading => {
				self.range = Some((offset, size));
				self.apply_range()
			}
			_ => Err(Error::bad_step()),
		}
	}
}

struct MemRemoval {
	store: Arc<Mutex<MemStore>>,
	chunk_id: String,
	step: TransactionStep,
}

#[async_trait]
impl Removal for MemRemoval {
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}
		if !self
			.store
			.lock()
			.unwrap()
			.committed
			.contains_key(&self.chunk_id)
		{
			self.step = TransactionStep::Done;
			return Err(Error::NotFound);
		}
		self.step = TransactionStep::Prepared;
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;
		self.store.lock().unwrap().committed.remove(&self.chunk_id);
		Ok(())
	}

	async fn abort(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;
		Ok(())
	}
}
