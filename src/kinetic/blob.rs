//! Chunks striped over a set of Kinetic drives
//!
//! A chunk `C` striped over N drives with block size B is stored as one key
//! `C-<index>-<size>` per block, blocks assigned to drives round-robin, plus
//! the manifest key `C-#` whose value is the JSON xattr map. The manifest is
//! written at commit time: its presence on any drive of the target set is
//! what makes the chunk visible.
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use skiff_blob::{Download, Removal, Repository, Target, TransactionStep, Upload};

use crate::client::{DriveClient, DriveRegistry, RpcHandle};
use crate::discovery::DriveDirectory;
use crate::error::Error as RpcError;
use crate::proto;
use crate::rpc::{Delete, Get, GetKeyRange, Put};

type Error = skiff_blob::Error;

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
pub const DOWNLOAD_PARALLEL_FACTOR: usize = 4;
pub const DELETE_PARALLEL_FACTOR: usize = 8;

const LISTING_PAGE: i32 = 200;
const MANIFEST_SUFFIX: &str = "#";

fn block_key(chunk_id: &str, index: u32, size: usize) -> String {
	format!("{}-{}-{}", chunk_id, index, size)
}

fn manifest_key(chunk_id: &str) -> String {
	format!("{}-{}", chunk_id, MANIFEST_SUFFIX)
}

/// Parse `<chunk_id>-<index>-<size>`; `None` for the manifest and for
/// anything malformed
fn parse_block_key(chunk_id: &str, key: &str) -> Option<(u32, u32)> {
	let rest = key.strip_prefix(chunk_id)?.strip_prefix('-')?;
	if rest == MANIFEST_SUFFIX {
		return None;
	}
	let (index, size) = rest.split_once('-')?;
	Some((index.parse().ok()?, size.parse().ok()?))
}

/// Map a transport-level failure onto the blob taxonomy
fn rpc_error(e: RpcError) -> Error {
	match e {
		RpcError::Net(_) | RpcError::ConnectionReset | RpcError::Timeout | RpcError::Stopped => {
			Error::Network(e.to_string())
		}
		RpcError::Drive(proto::StatusCode::NotFound, _) => Error::NotFound,
		RpcError::Drive(_, _)
		| RpcError::BadMessage
		| RpcError::TooBig
		| RpcError::Decode(_) => Error::Protocol(e.to_string()),
		RpcError::Message(m) => Error::Internal(m),
	}
}

/// A [`Repository`] striping chunks over Kinetic drives
pub struct KineticRepository {
	registry: Arc<dyn DriveRegistry>,
	default_targets: Vec<String>,
	directory: Option<DriveDirectory>,
	block_size: usize,
	parallel_factor: usize,
}

impl KineticRepository {
	pub fn new(
		registry: Arc<dyn DriveRegistry>,
		default_targets: Vec<String>,
		block_size: usize,
		parallel_factor: usize,
	) -> Self {
		KineticRepository {
			registry,
			default_targets,
			directory: None,
			block_size,
			parallel_factor,
		}
	}

	/// Fall back on the discovered drives when neither the request nor the
	/// configuration name a target set
	pub fn with_directory(mut self, directory: DriveDirectory) -> Self {
		self.directory = Some(directory);
		self
	}

	/// The drives a request addresses: its own target set when it names one
	/// (ordered by rank), the configured drive set otherwise, the discovered
	/// drives as a last resort
	fn resolve_clients(&self, targets: &[Target]) -> Result<Vec<Arc<dyn DriveClient>>, Error> {
		let mut urls = if targets.is_empty() {
			self.default_targets.clone()
		} else {
			let mut sorted = targets.to_vec();
			sorted.sort_by_key(|t| t.rank);
			sorted.into_iter().map(|t| t.url).collect()
		};
		if urls.is_empty() {
			if let Some(directory) = &self.directory {
				urls = directory.urls();
				urls.sort();
			}
		}
		if urls.is_empty() {
			return Err(Error::internal("no target specified"));
		}
		Ok(urls.iter().map(|u| self.registry.get(u)).collect())
	}
}

impl Repository for KineticRepository {
	fn backend(&self) -> &'static str {
		"kinetic"
	}

	fn upload(&self, chunk_id: &str, targets: &[Target]) -> Result<Box<dyn Upload>, Error> {
		Ok(Box::new(KineticUpload {
			chunk_id: chunk_id.to_string(),
			clients: self.resolve_clients(targets)?,
			block_size: self.block_size,
			buffer: Vec::new(),
			next_index: 0,
			ops: Vec::new(),
			xattr: BTreeMap::new(),
			step: TransactionStep::Init,
		}))
	}

	fn download(&self, chunk_id: &str, targets: &[Target]) -> Result<Box<dyn Download>, Error> {
		Ok(Box::new(KineticDownload {
			chunk_id: chunk_id.to_string(),
			clients: self.resolve_clients(targets)?,
			parallel_factor: self.parallel_factor,
			waiting: VecDeque::new(),
			running: VecDeque::new(),
			total_size: 0,
			range: None,
			skip: 0,
			remaining: None,
			reading: false,
			step: TransactionStep::Init,
		}))
	}

	fn removal(&self, chunk_id: &str, targets: &[Target]) -> Result<Box<dyn Removal>, Error> {
		Ok(Box::new(KineticRemoval {
			chunk_id: chunk_id.to_string(),
			clients: self.resolve_clients(targets)?,
			ops: Vec::new(),
			step: TransactionStep::Init,
		}))
	}
}

/// List every key of the chunk on every drive, paginating per drive until
/// all of them are exhausted. Returns `(drive index, key)` pairs.
async fn list_chunk(
	clients: &[Arc<dyn DriveClient>],
	chunk_id: &str,
) -> Result<Vec<(usize, String)>, Error> {
	let prefix = format!("{}-", chunk_id);
	let end = format!("{}-X", chunk_id);

	let mut items = Vec::new();
	let mut markers = vec![prefix; clients.len()];
	let mut ready = vec![true; clients.len()];

	while ready.iter().any(|r| *r) {
		let mut handles: Vec<(usize, RpcHandle)> = Vec::new();
		for (i, client) in clients.iter().enumerate() {
			if !ready[i] {
				continue;
			}
			let op = GetKeyRange::new(markers[i].clone(), end.clone())
				.include_start(false)
				.include_end(false)
				.max_returned(LISTING_PAGE);
			handles.push((i, client.call(op.into_exchange()).await));
		}

		for (i, handle) in handles {
			let reply = handle.wait().await.map_err(rpc_error)?;
			let keys = GetKeyRange::decode(&reply).map_err(rpc_error)?;
			match keys.last() {
				None => ready[i] = false,
				Some(last) => {
					markers[i] = last.clone();
					for key in keys {
						items.push((i, key));
					}
				}
			}
		}
	}
	Ok(items)
}

/// Issue the deletes with a rolling window: pre-start `window` of them, then
/// one more each time one completes. Returns the first failure, after having
/// attempted every delete.
async fn rolling_delete(
	window: usize,
	ops: &[(Arc<dyn DriveClient>, String)],
) -> Result<(), Error> {
	debug!("rolling delete of {} keys", ops.len());
	let mut inflight: VecDeque<(String, RpcHandle)> = VecDeque::new();
	let mut started = 0;
	let mut first_error = None;

	while started < ops.len() || !inflight.is_empty() {
		while inflight.len() < window && started < ops.len() {
			let (client, key) = &ops[started];
			let handle = client.call(Delete::new(key.clone()).into_exchange()).await;
			inflight.push_back((key.clone(), handle));
			started += 1;
		}

		if let Some((key, handle)) = inflight.pop_front() {
			let outcome = match handle.wait().await {
				Ok(reply) => Delete::decode(&reply),
				Err(e) => Err(e),
			};
			if let Err(e) = outcome {
				debug!("delete of {} failed: {}", key, e);
				if first_error.is_none() {
					first_error = Some(rpc_error(e));
				}
			}
		}
	}
	match first_error {
		None => Ok(()),
		Some(e) => Err(e),
	}
}

struct PendingPut {
	key: String,
	client: Arc<dyn DriveClient>,
	handle: RpcHandle,
}

struct KineticUpload {
	chunk_id: String,
	clients: Vec<Arc<dyn DriveClient>>,
	block_size: usize,
	buffer: Vec<u8>,
	next_index: u32,
	ops: Vec<PendingPut>,
	xattr: BTreeMap<String, String>,
	step: TransactionStep,
}

impl KineticUpload {
	/// Send the buffered block under its positional key and rotate drives
	async fn flush_block(&mut self) {
		let key = block_key(&self.chunk_id, self.next_index, self.buffer.len());
		self.trigger_upload(key).await;
	}

	async fn trigger_upload(&mut self, key: String) {
		let client = self.clients[self.next_index as usize % self.clients.len()].clone();
		self.next_index += 1;

		let value: Bytes = std::mem::take(&mut self.buffer).into();
		let handle = client.call(Put::new(key.clone(), value).into_exchange()).await;
		self.ops.push(PendingPut {
			key,
			client,
			handle,
		});
	}
}

#[async_trait]
impl Upload for KineticUpload {
	/// Pre-check: the chunk must not already carry a manifest on any drive
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}
		let key = manifest_key(&self.chunk_id);

		let mut handles = Vec::with_capacity(self.clients.len());
		for client in &self.clients {
			let op = GetKeyRange::new(key.clone(), key.clone())
				.include_start(true)
				.include_end(true)
				.max_returned(1);
			handles.push(client.call(op.into_exchange()).await);
		}

		let mut found = false;
		for handle in handles {
			let reply = match handle.wait().await {
				Ok(r) => r,
				Err(e) => {
					self.step = TransactionStep::Done;
					return Err(Error::network(e.to_string()));
				}
			};
			let keys = match GetKeyRange::decode(&reply) {
				Ok(k) => k,
				Err(e) => {
					self.step = TransactionStep::Done;
					return Err(Error::network(e.to_string()));
				}
			};
			found = found || !keys.is_empty();
		}
		if found {
			self.step = TransactionStep::Done;
			return Err(Error::Already);
		}
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
		let mut buf = buf;
		while !buf.is_empty() {
			let available = self.block_size - self.buffer.len();
			let take = std::cmp::min(available, buf.len());
			self.buffer.extend_from_slice(&buf[..take]);
			buf = &buf[take..];
			if self.buffer.len() >= self.block_size {
				self.flush_block().await;
			}
		}
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;

		// Flush the residual block so payload and manifest never mix
		if !self.buffer.is_empty() {
			self.flush_block().await;
		}

		// Pack then send the xattr manifest
		self.buffer = serde_json::to_vec(&self.xattr)
			.map_err(|e| Error::internal(format!("xattr encoding: {}", e)))?;
		let key = manifest_key(&self.chunk_id);
		self.trigger_upload(key).await;

		// Wait for every single PUT to finish
		let mut first_error = None;
		for op in self.ops.drain(..) {
			let outcome = match op.handle.wait().await {
				Ok(reply) => Put::decode(&reply),
				Err(e) => Err(e),
			};
			if let Err(e) = outcome {
				warn!("PUT of {} failed: {}", op.key, e);
				if first_error.is_none() {
					first_error = Some(rpc_error(e));
				}
			}
		}
		match first_error {
			None => Ok(()),
			Some(e) => Err(e),
		}
	}

	/// Best effort: the chunk was never sealed, whatever was stored is
	/// orphaned data worth reclaiming but not worth failing over
	async fn abort(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;

		debug!("{} PUT to abort", self.ops.len());
		let deletes = self
			.ops
			.drain(..)
			.map(|op| (op.client, op.key))
			.collect::<Vec<_>>();
		if let Err(e) = rolling_delete(DELETE_PARALLEL_FACTOR, &deletes).await {
			debug!("abort cleanup incomplete: {}", e);
		}
		Ok(())
	}
}

struct BlockRef {
	index: u32,
	client: Arc<dyn DriveClient>,
	key: String,
}

struct KineticDownload {
	chunk_id: String,
	clients: Vec<Arc<dyn DriveClient>>,
	parallel_factor: usize,
	waiting: VecDeque<BlockRef>,
	running: VecDeque<RpcHandle>,
	total_size: u64,
	range: Option<(u64, u64)>,
	skip: u64,
	remaining: Option<u64>,
	reading: bool,
	step: TransactionStep,
}

impl KineticDownload {
	fn apply_range(&mut self) -> Result<(), Error> {
		if let Some((offset, size)) = self.range {
			let end = offset.checked_add(size).ok_or(Error::NotFound)?;
			if end > self.total_size {
				return Err(Error::NotFound);
			}
			self.skip = offset;
			self.remaining = Some(size);
		}
		Ok(())
	}
}

#[async_trait]
impl Download for KineticDownload {
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}

		let items = match list_chunk(&self.clients, &self.chunk_id).await {
			Ok(items) => items,
			Err(e) => {
				self.step = TransactionStep::Done;
				return Err(e);
			}
		};
		if items.is_empty() {
			self.step = TransactionStep::Done;
			return Err(Error::NotFound);
		}

		let mut blocks = Vec::new();
		for (drive, key) in items {
			match parse_block_key(&self.chunk_id, &key) {
				Some((index, size)) => {
					blocks.push((
						index,
						size,
						BlockRef {
							index,
							client: self.clients[drive].clone(),
							key,
						},
					));
				}
				None => debug!("skipping key [{}]", key),
			}
		}
		blocks.sort_by_key(|(index, _, _)| *index);

		self.total_size = blocks.iter().map(|(_, size, _)| *size as u64).sum();
		self.waiting = blocks.into_iter().map(|(_, _, b)| b).collect();

		if let Err(e) = self.apply_range() {
			self.step = TransactionStep::Done;
			return Err(e);
		}
		self.step = TransactionStep::Prepared;
		Ok(())
	}

	fn is_eof(&self) -> bool {
		self.waiting.is_empty() && self.running.is_empty()
	}

	async fn read(&mut self) -> Result<Bytes, Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.reading = true;

		if self.remaining == Some(0) {
			self.waiting.clear();
			self.running.clear();
			return Ok(Bytes::new());
		}

		// Keep the window full before blocking on the oldest GET
		while self.running.len() < self.parallel_factor {
			match self.waiting.pop_front() {
				None => break,
				Some(block) => {
					trace!("starting GET of block {} ({})", block.index, block.key);
					let handle = block
						.client
						.call(Get::new(block.key).into_exchange())
						.await;
					self.running.push_back(handle);
				}
			}
		}

		let handle = match self.running.pop_front() {
			None => return Ok(Bytes::new()),
			Some(h) => h,
		};
		let reply = handle.wait().await.map_err(rpc_error)?;
		let mut data = Get::decode(reply).map_err(rpc_error)?;

		// Range bookkeeping: drop the prefix still to skip, then cap to what
		// is left of the window.
		if self.skip > 0 {
			let drop = std::cmp::min(self.skip, data.len() as u64) as usize;
			data = data.slice(drop..);
			self.skip -= drop as u64;
		}
		if let Some(remaining) = &mut self.remaining {
			if (data.len() as u64) > *remaining {
				data = data.slice(..*remaining as usize);
			}
			*remaining -= data.len() as u64;
		}
		Ok(data)
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

struct KineticRemoval {
	chunk_id: String,
	clients: Vec<Arc<dyn DriveClient>>,
	ops: Vec<(Arc<dyn DriveClient>, String)>,
	step: TransactionStep,
}

#[async_trait]
impl Removal for KineticRemoval {
	async fn prepare(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Init {
			return Err(Error::bad_step());
		}
		let items = match list_chunk(&self.clients, &self.chunk_id).await {
			Ok(items) => items,
			Err(e) => {
				self.step = TransactionStep::Done;
				return Err(e);
			}
		};
		if items.is_empty() {
			self.step = TransactionStep::Done;
			return Err(Error::NotFound);
		}
		for (drive, key) in items {
			debug!("rem({},{})", self.clients[drive].id(), key);
			self.ops.push((self.clients[drive].clone(), key));
		}
		self.step = TransactionStep::Prepared;
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;
		rolling_delete(DELETE_PARALLEL_FACTOR, &self.ops).await
	}

	/// Nothing has been touched at the prepare step
	async fn abort(&mut self) -> Result<(), Error> {
		if self.step != TransactionStep::Prepared {
			return Err(Error::bad_step());
		}
		self.step = TransactionStep::Done;
		Ok(())
	}
}
