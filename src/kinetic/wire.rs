//! Framing, authentication and sequencing of the drive connection
//!
//! On the wire every unit is `['F', msg_len(be32), val_len(be32), msg, val]`
//! where `msg` is a serialized [`proto::Message`] whose `command_bytes`
//! carry the serialized [`proto::Command`], authenticated by an HMAC-SHA1
//! over `be32(len(command_bytes)) || command_bytes`.
use bytes::Bytes;
use hmac::{Hmac, Mac};
use prost::Message as _;
use sha1::Sha1;
use tokio::time::Instant;

use skiff_net::{ReadChannel, WriteChannel};

use crate::error::Error;
use crate::proto;

pub const FRAME_MAGIC: u8 = b'F';
pub const FRAME_HEADER_LEN: usize = 9;

/// Maximum accepted length of either part of a frame
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// State shared by every exchange of one drive connection.
///
/// Reset on each reconnection: the sequence restarts and the connection id
/// is re-learned from the banner the drive sends on accept.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
	pub connection_id: i64,
	pub sequence: u64,
	pub cluster_version: i64,
	pub identity: i64,
	pub salt: String,
}

impl ConnectionContext {
	pub fn new(salt: impl Into<String>) -> Self {
		ConnectionContext {
			connection_id: 0,
			sequence: 1,
			cluster_version: 0,
			identity: 1,
			salt: salt.into(),
		}
	}

	pub fn reset(&mut self) {
		self.connection_id = 0;
		self.sequence = 1;
	}

	pub fn next_sequence(&mut self) -> u64 {
		let seq = self.sequence;
		self.sequence += 1;
		seq
	}
}

/// Raw bytes of one received frame
#[derive(Debug)]
pub struct Frame {
	pub msg: Vec<u8>,
	pub val: Bytes,
}

/// A parsed incoming frame
#[derive(Debug)]
pub struct Reply {
	pub message: proto::Message,
	pub command: proto::Command,
	pub value: Bytes,
}

impl Reply {
	pub fn status_code(&self) -> proto::StatusCode {
		self.command
			.status
			.as_ref()
			.and_then(|s| s.code)
			.and_then(proto::StatusCode::from_i32)
			.unwrap_or(proto::StatusCode::InvalidStatusCode)
	}

	pub fn status_message(&self) -> String {
		self.command
			.status
			.as_ref()
			.and_then(|s| s.status_message.clone())
			.unwrap_or_default()
	}

	pub fn success(&self) -> bool {
		self.status_code() == proto::StatusCode::Success
	}

	pub fn ack_sequence(&self) -> Option<u64> {
		self.command.header.as_ref().and_then(|h| h.ack_sequence)
	}

	pub fn connection_id(&self) -> Option<i64> {
		self.command.header.as_ref().and_then(|h| h.connection_id)
	}

	/// The error a non-success status maps to
	pub fn drive_error(&self) -> Error {
		Error::Drive(self.status_code(), self.status_message())
	}
}

/// `HMAC-SHA1(salt, be32(len(command_bytes)) || command_bytes)`
pub fn compute_hmac(salt: &str, command_bytes: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha1>::new_from_slice(salt.as_bytes())
		.expect("HMAC accepts keys of any length");
	mac.update(&(command_bytes.len() as u32).to_be_bytes());
	mac.update(command_bytes);
	mac.finalize().into_bytes().to_vec()
}

/// Serialize `command` into an authenticated [`proto::Message`]
pub fn seal_command(command: &proto::Command, ctx: &ConnectionContext) -> Vec<u8> {
	let command_bytes = command.encode_to_vec();
	let hmac = compute_hmac(&ctx.salt, &command_bytes);
	let message = proto::Message {
		auth_type: Some(proto::AuthType::HmacAuth as i32),
		hmac_auth: Some(proto::HmacAuth {
			identity: Some(ctx.identity),
			hmac: Some(hmac),
		}),
		command_bytes: Some(command_bytes),
	};
	message.encode_to_vec()
}

/// Check the HMAC of a received message against `salt`
pub fn verify_hmac(message: &proto::Message, salt: &str) -> bool {
	let command_bytes = match &message.command_bytes {
		Some(b) => b,
		None => return false,
	};
	let received = message
		.hmac_auth
		.as_ref()
		.and_then(|a| a.hmac.as_ref());
	match received {
		Some(hmac) => hmac == &compute_hmac(salt, command_bytes),
		None => false,
	}
}

pub fn frame_header(msg_len: usize, val_len: usize) -> [u8; FRAME_HEADER_LEN] {
	let mut header = [0u8; FRAME_HEADER_LEN];
	header[0] = FRAME_MAGIC;
	header[1..5].copy_from_slice(&(msg_len as u32).to_be_bytes());
	header[5..9].copy_from_slice(&(val_len as u32).to_be_bytes());
	header
}

pub async fn write_frame(
	chan: &mut WriteChannel,
	msg: &[u8],
	val: &[u8],
	dl: Instant,
) -> Result<(), Error> {
	let header = frame_header(msg.len(), val.len());
	if val.is_empty() {
		chan.send_vectored(&[&header, msg], dl).await?;
	} else {
		chan.send_vectored(&[&header, msg, val], dl).await?;
	}
	Ok(())
}

pub async fn read_frame(
	chan: &mut ReadChannel,
	max_frame: usize,
	dl: Instant,
) -> Result<Frame, Error> {
	let mut header = [0u8; FRAME_HEADER_LEN];
	chan.read_exactly(&mut header, dl).await?;
	if header[0] != FRAME_MAGIC {
		return Err(Error::BadMessage);
	}

	let msg_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
	let val_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
	if msg_len > max_frame || val_len > max_frame {
		return Err(Error::TooBig);
	}

	let mut msg = vec![0u8; msg_len];
	if msg_len > 0 {
		chan.read_exactly(&mut msg, dl).await?;
	}
	let mut val = vec![0u8; val_len];
	if val_len > 0 {
		chan.read_exactly(&mut val, dl).await?;
	}
	Ok(Frame {
		msg,
		val: val.into(),
	})
}

/// Decode the protobuf layers of a received frame
pub fn parse_frame(frame: Frame) -> Result<Reply, Error> {
	let message = proto::Message::decode(&frame.msg[..])?;
	let command = match &message.command_bytes {
		Some(bytes) => proto::Command::decode(&bytes[..])?,
		None => proto::Command::default(),
	};
	Ok(Reply {
		message,
		command,
		value: frame.val,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use prost::Message as _;

	#[test]
	fn test_frame_header_layout() {
		let header = frame_header(0x0102, 0x030405);
		assert_eq!(header[0], b'F');
		assert_eq!(&header[1..5], &[0, 0, 1, 2]);
		assert_eq!(&header[5..9], &[0, 3, 4, 5]);
	}

	#[test]
	fn test_hmac_covers_length_prefix() {
		// Same content, two different salts: tags must differ; and the tag
		// must change when the length prefix does.
		let a = compute_hmac("asdfasdf", b"hello");
		let b = compute_hmac("other", b"hello");
		assert_eq!(a.len(), 20);
		assert_ne!(a, b);
		assert_eq!(a, compute_hmac("asdfasdf", b"hello"));
	}

	#[test]
	fn test_seal_and_verify() {
		let ctx = ConnectionContext::new("asdfasdf");
		let command = proto::Command {
			header: Some(proto::Header {
				sequence: Some(42),
				message_type: Some(proto::MessageType::Put as i32),
				..Default::default()
			}),
			..Default::default()
		};
		let sealed = seal_command(&command, &ctx);

		let message = proto::Message::decode(&sealed[..]).unwrap();
		assert!(verify_hmac(&message, "asdfasdf"));
		assert!(!verify_hmac(&message, "wrong-salt"));

		let decoded =
			proto::Command::decode(&message.command_bytes.unwrap()[..]).unwrap();
		assert_eq!(decoded.header.unwrap().sequence, Some(42));
	}

	#[test]
	fn test_context_sequencing() {
		let mut ctx = ConnectionContext::new("salt");
		assert_eq!(ctx.next_sequence(), 1);
		assert_eq!(ctx.next_sequence(), 2);
		ctx.connection_id = 99;
		ctx.reset();
		assert_eq!(ctx.connection_id, 0);
		assert_eq!(ctx.next_sequence(), 1);
	}
}
