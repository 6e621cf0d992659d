//! TCP channels whose every operation carries a deadline
//!
//! A [`NetChannel`] wraps one connected socket. All operations take a
//! `tokio::time::Instant` deadline and resolve to [`Error::Timeout`] when it
//! passes; while they wait, the task yields to the runtime. The peer and
//! local addresses are captured at construction and stay readable for the
//! whole life of the value, including after `shutdown`.
use std::io::IoSlice;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Interest};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout_at, Instant};

use crate::error::Error;

/// Outcome of a single non-blocking read
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
	/// At least one byte was read
	Data(usize),
	/// The peer closed its writing half
	Eof,
	/// The deadline passed before any byte arrived
	Timeout,
}

/// Outcome of a readiness poll
#[derive(Debug, PartialEq, Eq)]
pub enum Poll {
	Ready,
	Timeout,
}

/// A connected TCP channel
pub struct NetChannel {
	stream: TcpStream,
	local_addr: SocketAddr,
	peer_addr: SocketAddr,
}

impl NetChannel {
	/// Resolve `addr` (`host:port`) and establish a connection before `dl`
	pub async fn connect(addr: &str, dl: Instant) -> Result<NetChannel, Error> {
		let addrs = timeout_at(dl, tokio::net::lookup_host(addr))
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(|_| Error::Resolve(addr.to_string()))?
			.collect::<Vec<_>>();
		if addrs.is_empty() {
			return Err(Error::Resolve(addr.to_string()));
		}

		let mut last_err = None;
		for sockaddr in addrs {
			match timeout_at(dl, TcpStream::connect(sockaddr)).await {
				Err(_) => return Err(Error::Timeout),
				Ok(Ok(stream)) => return NetChannel::from_stream(stream),
				Ok(Err(e)) => last_err = Some(e),
			}
		}
		Err(last_err.map(Error::Io).unwrap_or(Error::Timeout))
	}

	pub(crate) fn from_stream(stream: TcpStream) -> Result<NetChannel, Error> {
		let local_addr = stream.local_addr()?;
		let peer_addr = stream.peer_addr()?;
		Ok(NetChannel {
			stream,
			local_addr,
			peer_addr,
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn peer_addr(&self) -> SocketAddr {
		self.peer_addr
	}

	/// Read at least one byte into `buf`
	pub async fn read(&mut self, buf: &mut [u8], dl: Instant) -> Result<ReadOutcome, Error> {
		read_once(&mut self.stream, buf, dl).await
	}

	/// Read until `buf` is full. A timeout in the middle of the transfer is
	/// reported as `Error::Timeout`, a close as `Error::UnexpectedEof`.
	pub async fn read_exactly(&mut self, buf: &mut [u8], dl: Instant) -> Result<(), Error> {
		read_exactly(&mut self.stream, buf, dl).await
	}

	/// Write all the slices, in order, looping over partial writes without
	/// ever re-sending an already-written prefix
	pub async fn send_vectored(&mut self, bufs: &[&[u8]], dl: Instant) -> Result<(), Error> {
		send_vectored(&mut self.stream, bufs, dl).await
	}

	pub async fn send(&mut self, buf: &[u8], dl: Instant) -> Result<(), Error> {
		send_vectored(&mut self.stream, &[buf], dl).await
	}

	/// Wait until the socket is readable
	pub async fn poll_in(&self, dl: Instant) -> Result<Poll, Error> {
		match timeout_at(dl, self.stream.ready(Interest::READABLE)).await {
			Err(_) => Ok(Poll::Timeout),
			Ok(Ok(_)) => Ok(Poll::Ready),
			Ok(Err(e)) => Err(Error::Io(e)),
		}
	}

	/// Wait until the socket is writable
	pub async fn poll_out(&self, dl: Instant) -> Result<Poll, Error> {
		match timeout_at(dl, self.stream.ready(Interest::WRITABLE)).await {
			Err(_) => Ok(Poll::Timeout),
			Ok(Ok(_)) => Ok(Poll::Ready),
			Ok(Err(e)) => Err(Error::Io(e)),
		}
	}

	pub fn set_nodelay(&self, on: bool) -> Result<(), Error> {
		self.stream.set_nodelay(on).map_err(Error::Io)
	}

	pub fn set_send_buffer(&self, bytes: usize) -> Result<(), Error> {
		SockRef::from(&self.stream)
			.set_send_buffer_size(bytes)
			.map_err(Error::Io)
	}

	pub fn set_recv_buffer(&self, bytes: usize) -> Result<(), Error> {
		SockRef::from(&self.stream)
			.set_recv_buffer_size(bytes)
			.map_err(Error::Io)
	}

	#[cfg(target_os = "linux")]
	pub fn set_cork(&self, on: bool) -> Result<(), Error> {
		SockRef::from(&self.stream).set_cork(on).map_err(Error::Io)
	}

	#[cfg(target_os = "linux")]
	pub fn set_quickack(&self, on: bool) -> Result<(), Error> {
		SockRef::from(&self.stream)
			.set_quickack(on)
			.map_err(Error::Io)
	}

	/// Shut both halves down. The channel value stays usable for address
	/// queries; the file descriptor itself is released on drop, exactly once.
	pub fn shutdown(&self) {
		let _ = SockRef::from(&self.stream).shutdown(std::net::Shutdown::Both);
	}

	/// Split into independently-owned read and write halves, so that a
	/// consumer task can block on frames while a producer task sends
	pub fn into_split(self) -> (ReadChannel, WriteChannel) {
		let peer_addr = self.peer_addr;
		let (read, write) = self.stream.into_split();
		(
			ReadChannel {
				half: read,
				peer_addr,
			},
			WriteChannel {
				half: write,
				peer_addr,
			},
		)
	}
}

/// The reading half of a split [`NetChannel`]
pub struct ReadChannel {
	half: OwnedReadHalf,
	peer_addr: SocketAddr,
}

impl ReadChannel {
	pub fn peer_addr(&self) -> SocketAddr {
		self.peer_addr
	}

	pub async fn read(&mut self, buf: &mut [u8], dl: Instant) -> Result<ReadOutcome, Error> {
		read_once(&mut self.half, buf, dl).await
	}

	pub async fn read_exactly(&mut self, buf: &mut [u8], dl: Instant) -> Result<(), Error> {
		read_exactly(&mut self.half, buf, dl).await
	}

	pub async fn poll_in(&self, dl: Instant) -> Result<Poll, Error> {
		match timeout_at(dl, self.half.ready(Interest::READABLE)).await {
			Err(_) => Ok(Poll::Timeout),
			Ok(Ok(_)) => Ok(Poll::Ready),
			Ok(Err(e)) => Err(Error::Io(e)),
		}
	}
}

/// The writing half of a split [`NetChannel`]
pub struct WriteChannel {
	half: OwnedWriteHalf,
	peer_addr: SocketAddr,
}

impl WriteChannel {
	pub fn peer_addr(&self) -> SocketAddr {
		self.peer_addr
	}

	pub async fn send_vectored(&mut self, bufs: &[&[u8]], dl: Instant) -> Result<(), Error> {
		send_vectored(&mut self.half, bufs, dl).await
	}

	pub async fn send(&mut self, buf: &[u8], dl: Instant) -> Result<(), Error> {
		send_vectored(&mut self.half, &[buf], dl).await
	}
}

/// A listening TCP socket
pub struct NetListener {
	inner: TcpListener,
	local_addr: SocketAddr,
}

impl NetListener {
	/// Bind `addr` with `SO_REUSEADDR` (+ `SO_REUSEPORT` on unix) and the
	/// given backlog
	pub fn bind(addr: SocketAddr, backlog: i32) -> Result<NetListener, Error> {
		let domain = Domain::for_address(addr);
		let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
		socket.set_reuse_address(true)?;
		#[cfg(unix)]
		socket.set_reuse_port(true)?;
		socket.set_nonblocking(true)?;
		socket.bind(&addr.into())?;
		socket.listen(backlog)?;

		let std_listener: std::net::TcpListener = socket.into();
		let inner = TcpListener::from_std(std_listener)?;
		let local_addr = inner.local_addr()?;
		Ok(NetListener { inner, local_addr })
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// Accept one connection before `dl`
	pub async fn accept(&self, dl: Instant) -> Result<NetChannel, Error> {
		match timeout_at(dl, self.inner.accept()).await {
			Err(_) => Err(Error::Timeout),
			Ok(Ok((stream, peer))) => {
				trace!("accepted connection from {}", peer);
				NetChannel::from_stream(stream)
			}
			Ok(Err(e)) => Err(Error::Io(e)),
		}
	}
}

async fn read_once<S: AsyncRead + Unpin>(
	stream: &mut S,
	buf: &mut [u8],
	dl: Instant,
) -> Result<ReadOutcome, Error> {
	match timeout_at(dl, stream.read(buf)).await {
		Err(_) => Ok(ReadOutcome::Timeout),
		Ok(Ok(0)) => Ok(ReadOutcome::Eof),
		Ok(Ok(n)) => Ok(ReadOutcome::Data(n)),
		Ok(Err(e)) => Err(Error::Io(e)),
	}
}

async fn read_exactly<S: AsyncRead + Unpin>(
	stream: &mut S,
	buf: &mut [u8],
	dl: Instant,
) -> Result<(), Error> {
	let mut filled = 0;
	while filled < buf.len() {
		match read_once(stream, &mut buf[filled..], dl).await? {
			ReadOutcome::Data(n) => filled += n,
			ReadOutcome::Eof => return Err(Error::UnexpectedEof),
			ReadOutcome::Timeout => return Err(Error::Timeout),
		}
	}
	Ok(())
}

async fn send_vectored<S: AsyncWrite + Unpin>(
	stream: &mut S,
	bufs: &[&[u8]],
	dl: Instant,
) -> Result<(), Error> {
	// Index of the first slice not yet fully written, and the offset of the
	// first byte of it still to send.
	let mut index = 0;
	let mut offset = 0;

	while index < bufs.len() {
		if bufs[index].len() == offset {
			index += 1;
			offset = 0;
			continue;
		}

		let mut iov = Vec::with_capacity(bufs.len() - index);
		iov.push(IoSlice::new(&bufs[index][offset..]));
		for buf in &bufs[index + 1..] {
			iov.push(IoSlice::new(buf));
		}

		let written = match timeout_at(dl, stream.write_vectored(&iov)).await {
			Err(_) => return Err(Error::Timeout),
			Ok(Ok(0)) => return Err(Error::UnexpectedEof),
			Ok(Ok(n)) => n,
			Ok(Err(e)) => return Err(Error::Io(e)),
		};

		let mut remaining = written;
		while remaining > 0 {
			let left_in_current = bufs[index].len() - offset;
			if remaining >= left_in_current {
				remaining -= left_in_current;
				index += 1;
				offset = 0;
			} else {
				offset += remaining;
				remaining = 0;
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use skiff_util::time::deadline_ms;

	#[tokio::test]
	async fn test_roundtrip_and_split() {
		let listener = NetListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
		let addr = listener.local_addr();

		let server = tokio::spawn(async move {
			let mut chan = listener.accept(deadline_ms(1000)).await.unwrap();
			let mut buf = [0u8; 10];
			chan.read_exactly(&mut buf, deadline_ms(1000)).await.unwrap();
			chan.send(&buf, deadline_ms(1000)).await.unwrap();
		});

		let mut chan = NetChannel::connect(&addr.to_string(), deadline_ms(1000))
			.await
			.unwrap();
		chan.send_vectored(&[b"hello", b" ", b"tcp!"], deadline_ms(1000))
			.await
			.unwrap();

		let mut echo = [0u8; 10];
		chan.read_exactly(&mut echo, deadline_ms(1000)).await.unwrap();
		assert_eq!(&echo, b"hello tcp!");
		server.await.unwrap();
	}

	#[tokio::test]
	async fn test_read_timeout() {
		let listener = NetListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
		let addr = listener.local_addr();

		let mut chan = NetChannel::connect(&addr.to_string(), deadline_ms(1000))
			.await
			.unwrap();
		// The server never accepts nor writes: both forms of read must time
		// out instead of blocking.
		let mut buf = [0u8; 4];
		match chan.read(&mut buf, deadline_ms(30)).await.unwrap() {
			ReadOutcome::Timeout => (),
			other => panic!("unexpected outcome: {:?}", other),
		}
		match chan.read_exactly(&mut buf, deadline_ms(30)).await {
			Err(Error::Timeout) => (),
			other => panic!("unexpected outcome: {:?}", other),
		}
		drop(listener);
	}

	#[tokio::test]
	async fn test_eof() {
		let listener = NetListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
		let addr = listener.local_addr();

		let server = tokio::spawn(async move {
			let chan = listener.accept(deadline_ms(1000)).await.unwrap();
			drop(chan);
		});

		let mut chan = NetChannel::connect(&addr.to_string(), deadline_ms(1000))
			.await
			.unwrap();
		server.await.unwrap();

		let mut buf = [0u8; 4];
		match chan.read(&mut buf, deadline_ms(1000)).await.unwrap() {
			ReadOutcome::Eof => (),
			other => panic!("unexpected outcome: {:?}", other),
		}
	}
}
