//! Incremental reader for a downstream HTTP reply
use std::collections::BTreeMap;

use skiff_net::{NetChannel, ReadOutcome};
use tokio::time::Instant;

use crate::error::Error;

const INITIAL_BUFFER: usize = 2 * 1024;
const MAX_HEADER_BUFFER: usize = 8 * 1024;
const SMALL_BODY_BUFFER: usize = 8 * 1024;
const LARGE_BODY_BUFFER: usize = 128 * 1024;
const SMALL_BODY_LIMIT: u64 = 32 * 1024;
const MAX_PARSED_HEADERS: usize = 64;

/// Parsing phase of the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
	/// No byte of the current reply parsed yet
	Beginning,
	/// Status line seen, headers not complete
	Headers,
	/// Headers consumed, body bytes flowing
	Body,
	/// The whole reply has been consumed
	Done,
}

#[derive(Debug)]
enum Framing {
	/// Headers not parsed yet
	Unknown,
	/// Raw body; `None` means "until the peer closes"
	Inline(Option<u64>),
	/// Chunked transfer encoding
	Chunked(ChunkPhase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
	Size,
	Data { remaining: u64 },
	DataCrlf,
	Trailers,
}

enum Parsed {
	NeedMore,
	Interim,
	Final,
}

/// Reads one reply after the other on a kept-alive channel.
///
/// The internal buffer starts small and is regrown once the headers are
/// known. Body bytes are handed out as slices of that buffer: a slice
/// returned by [`read_body`](ReplyReader::read_body) is valid only until the
/// next call that may refill the buffer, which the borrow checker enforces.
pub struct ReplyReader {
	step: Step,
	buffer: Vec<u8>,
	start: usize,
	end: usize,
	status: u16,
	fields: BTreeMap<String, String>,
	content_length: Option<u64>,
	received: u64,
	framing: Framing,
}

impl Default for ReplyReader {
	fn default() -> Self {
		Self::new()
	}
}

impl ReplyReader {
	pub fn new() -> Self {
		ReplyReader {
			step: Step::Beginning,
			buffer: vec![0u8; INITIAL_BUFFER],
			start: 0,
			end: 0,
			status: 0,
			fields: BTreeMap::new(),
			content_length: None,
			received: 0,
			framing: Framing::Unknown,
		}
	}

	pub fn step(&self) -> Step {
		self.step
	}

	/// Status code of the last parsed header block
	pub fn status(&self) -> u16 {
		self.status
	}

	pub fn field(&self, name: &str) -> Option<&str> {
		self.fields.get(&name.to_ascii_lowercase()).map(|v| &**v)
	}

	pub fn fields(&self) -> &BTreeMap<String, String> {
		&self.fields
	}

	pub fn content_length(&self) -> Option<u64> {
		self.content_length
	}

	/// Total body bytes handed out for the current reply
	pub fn received(&self) -> u64 {
		self.received
	}

	/// Consume input until a final header block is parsed, silently skipping
	/// any number of `100 Continue` interim replies
	pub async fn read_headers(&mut self, chan: &mut NetChannel, dl: Instant) -> Result<(), Error> {
		loop {
			match self.read_one_header_block(chan, dl).await? {
				Parsed::Interim => {
					debug!("skipping interim reply");
					continue;
				}
				Parsed::Final => return Ok(()),
				Parsed::NeedMore => unreachable!(),
			}
		}
	}

	/// Consume input until the next header block, interim or final. Returns
	/// the status code; after a `100` the reader is positioned on the next
	/// reply.
	pub async fn read_interim(&mut self, chan: &mut NetChannel, dl: Instant) -> Result<u16, Error> {
		self.read_one_header_block(chan, dl).await?;
		Ok(self.status)
	}

	async fn read_one_header_block(
		&mut self,
		chan: &mut NetChannel,
		dl: Instant,
	) -> Result<Parsed, Error> {
		if self.step >= Step::Body {
			return Ok(Parsed::Final);
		}
		loop {
			match self.try_parse_headers()? {
				Parsed::NeedMore => {
					if self.fill(chan, dl).await? == 0 {
						return Err(Error::Protocol("reply truncated in the headers".into()));
					}
				}
				parsed => return Ok(parsed),
			}
		}
	}

	fn try_parse_headers(&mut self) -> Result<Parsed, Error> {
		let mut headers = [httparse::EMPTY_HEADER; MAX_PARSED_HEADERS];
		let mut response = httparse::Response::new(&mut headers);

		let consumed = match response.parse(&self.buffer[self.start..self.end]) {
			Ok(httparse::Status::Complete(n)) => n,
			Ok(httparse::Status::Partial) => {
				self.step = if response.code.is_some() {
					Step::Headers
				} else {
					self.step
				};
				return Ok(Parsed::NeedMore);
			}
			Err(e) => return Err(Error::Protocol(format!("bad reply headers: {}", e))),
		};

		let code = response
			.code
			.ok_or_else(|| Error::Protocol("reply without a status code".into()))?;
		self.status = code;

		if code == 100 {
			// Interim reply: drop its header block and go wait for the next
			// status line.
			self.start += consumed;
			self.step = Step::Beginning;
			return Ok(Parsed::Interim);
		}

		self.fields.clear();
		let mut chunked = false;
		let mut content_length = None;
		for h in response.headers.iter() {
			let name = h.name.to_ascii_lowercase();
			let value = String::from_utf8_lossy(h.value).trim().to_string();
			match name.as_str() {
				"content-length" => {
					content_length = Some(value.parse::<u64>().map_err(|_| {
						Error::Protocol(format!("unparsable Content-Length: {}", value))
					})?)
				}
				"transfer-encoding" => {
					chunked = value.to_ascii_lowercase().contains("chunked");
				}
				_ => {}
			}
			self.fields.insert(name, value);
		}

		self.start += consumed;
		self.content_length = content_length;
		self.received = 0;
		self.framing = if chunked {
			Framing::Chunked(ChunkPhase::Size)
		} else {
			Framing::Inline(content_length)
		};
		self.step = Step::Body;
		self.regrow_for_body();

		if let Framing::Inline(Some(0)) = self.framing {
			self.step = Step::Done;
		}
		Ok(Parsed::Final)
	}

	/// Pick the body-phase buffer size from the announced length
	fn regrow_for_body(&mut self) {
		let wanted = match self.content_length {
			Some(l) if l <= SMALL_BODY_LIMIT => SMALL_BODY_BUFFER,
			_ => LARGE_BODY_BUFFER,
		};
		if self.buffer.len() < wanted {
			self.buffer.resize(wanted, 0);
		}
	}

	/// Return the next slice of body bytes, empty once the reply is fully
	/// consumed. The slice borrows the internal buffer and is invalidated by
	/// the next call on this reader.
	pub async fn read_body(&mut self, chan: &mut NetChannel, dl: Instant) -> Result<&[u8], Error> {
		if self.step == Step::Done {
			return Ok(&[]);
		}
		if self.step != Step::Body {
			return Err(Error::Client("headers not read yet".into()));
		}

		loop {
			if let Some((from, to)) = self.decode_some()? {
				self.received += (to - from) as u64;
				return Ok(&self.buffer[from..to]);
			}
			if self.step == Step::Done {
				return Ok(&[]);
			}
			if self.fill(chan, dl).await? == 0 {
				// EOF: legal termination only for a reply without explicit
				// framing.
				match self.framing {
					Framing::Inline(None) => {
						self.step = Step::Done;
						return Ok(&[]);
					}
					_ => return Err(Error::Protocol("reply truncated in the body".into())),
				}
			}
		}
	}

	/// Convenience wrapper copying the next slice into `out`
	pub async fn append_body(
		&mut self,
		chan: &mut NetChannel,
		out: &mut Vec<u8>,
		dl: Instant,
	) -> Result<usize, Error> {
		let slice = self.read_body(chan, dl).await?;
		out.extend_from_slice(slice);
		Ok(slice.len())
	}

	/// Consume and discard the rest of the reply, then rearm the reader for
	/// the next reply of a kept-alive connection
	pub async fn skip(&mut self, chan: &mut NetChannel, dl: Instant) -> Result<(), Error> {
		if self.step < Step::Body {
			self.read_headers(chan, dl).await?;
		}
		while self.step != Step::Done {
			let _ = self.read_body(chan, dl).await?;
		}
		self.reset();
		Ok(())
	}

	/// Keep any pipelined bytes, drop everything else
	fn reset(&mut self) {
		self.buffer.copy_within(self.start..self.end, 0);
		self.end -= self.start;
		self.start = 0;
		let wanted = std::cmp::max(INITIAL_BUFFER, self.end);
		self.buffer.resize(wanted, 0);
		self.buffer.shrink_to_fit();
		self.step = Step::Beginning;
		self.framing = Framing::Unknown;
		self.fields.clear();
		self.content_length = None;
		self.received = 0;
	}

	/// Decode body bytes already buffered. Returns the range of the next
	/// data run, or `None` when more input is needed (or the reply ended).
	fn decode_some(&mut self) -> Result<Option<(usize, usize)>, Error> {
		loop {
			match &mut self.framing {
				Framing::Unknown => {
					return Err(Error::Client("body before headers".into()));
				}
				Framing::Inline(remaining) => {
					let available = self.end - self.start;
					if available == 0 {
						return Ok(None);
					}
					let take = match remaining {
						None => available,
						Some(r) => std::cmp::min(available as u64, *r) as usize,
					};
					if let Some(r) = remaining {
						*r -= take as u64;
						if *r == 0 {
							self.step = Step::Done;
						}
					}
					let from = self.start;
					self.start += take;
					return Ok(Some((from, from + take)));
				}
				Framing::Chunked(phase) => match *phase {
					ChunkPhase::Size => {
						match httparse::parse_chunk_size(&self.buffer[self.start..self.end]) {
							Ok(httparse::Status::Complete((consumed, size))) => {
								self.start += consumed;
								if size == 0 {
									*phase = ChunkPhase::Trailers;
								} else {
									*phase = ChunkPhase::Data { remaining: size };
								}
							}
							Ok(httparse::Status::Partial) => return Ok(None),
							Err(_) => {
								return Err(Error::Protocol("bad chunk size line".into()));
							}
						}
					}
					ChunkPhase::Data { remaining } => {
						let available = (self.end - self.start) as u64;
						if available == 0 {
							return Ok(None);
						}
						let take = std::cmp::min(available, remaining) as usize;
						let left = remaining - take as u64;
						*phase = if left == 0 {
							ChunkPhase::DataCrlf
						} else {
							ChunkPhase::Data { remaining: left }
						};
						let from = self.start;
						self.start += take;
						return Ok(Some((from, from + take)));
					}
					ChunkPhase::DataCrlf => {
						if self.end - self.start < 2 {
							return Ok(None);
						}
						if &self.buffer[self.start..self.start + 2] != b"\r\n" {
							return Err(Error::Protocol("missing CRLF after chunk data".into()));
						}
						self.start += 2;
						*phase = ChunkPhase::Size;
					}
					ChunkPhase::Trailers => {
						let window = &self.buffer[self.start..self.end];
						let eol = match window.windows(2).position(|w| w == b"\r\n") {
							Some(p) => p,
							None => return Ok(None),
						};
						if eol == 0 {
							// Empty line: end of the trailers and of the reply.
							self.start += 2;
							self.step = Step::Done;
							return Ok(None);
						}
						let line = String::from_utf8_lossy(&window[..eol]).to_string();
						self.start += eol + 2;
						match line.split_once(':') {
							Some((k, v)) => {
								self.fields.insert(
									k.trim().to_ascii_lowercase(),
									v.trim().to_string(),
								);
							}
							None => {
								return Err(Error::Protocol(format!(
									"bad trailer line: {}",
									line
								)))
							}
						}
					}
				},
			}
		}
	}

	/// Pull more bytes from the channel. Compaction and growth happen here,
	/// which is what invalidates previously returned body slices.
	async fn fill(&mut self, chan: &mut NetChannel, dl: Instant) -> Result<usize, Error> {
		if self.start > 0 {
			self.buffer.copy_within(self.start..self.end, 0);
			self.end -= self.start;
			self.start = 0;
		}
		if self.end == self.buffer.len() {
			// A header block larger than the current buffer: grow within
			// reason, a reply refusing to fit is malformed.
			let ceiling = match self.step {
				Step::Beginning | Step::Headers => MAX_HEADER_BUFFER,
				_ => LARGE_BODY_BUFFER,
			};
			if self.buffer.len() >= ceiling {
				return Err(Error::Protocol("reply does not fit the buffer".into()));
			}
			let grown = std::cmp::min(self.buffer.len() * 2, ceiling);
			self.buffer.resize(grown, 0);
		}

		match chan.read(&mut self.buffer[self.end..], dl).await? {
			ReadOutcome::Data(n) => {
				self.end += n;
				Ok(n)
			}
			ReadOutcome::Eof => Ok(0),
			ReadOutcome::Timeout => Err(Error::Net(skiff_net::Error::Timeout)),
		}
	}
}
