//! Typed RPCs to a Kinetic drive
//!
//! Each operation builds an [`Exchange`] (a command plus an optional value
//! payload) and knows how to interpret the matching reply. Sequencing,
//! authentication and connection ids are filled in by the connection actor
//! when the exchange is actually sent.
use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::error::Error;
use crate::proto;
use crate::wire::Reply;

/// One command ready to be sent, with its value payload
#[derive(Debug, Clone)]
pub struct Exchange {
	pub command: proto::Command,
	pub value: Bytes,
}

fn base_command(message_type: proto::MessageType) -> proto::Command {
	proto::Command {
		header: Some(proto::Header {
			message_type: Some(message_type as i32),
			..Default::default()
		}),
		..Default::default()
	}
}

fn check_status(reply: &Reply) -> Result<(), Error> {
	if reply.success() {
		Ok(())
	} else {
		Err(reply.drive_error())
	}
}

/// Store one value under one key
pub struct Put {
	key: String,
	value: Bytes,
	write_through: bool,
}

impl Put {
	pub fn new(key: impl Into<String>, value: Bytes) -> Self {
		Put {
			key: key.into(),
			value,
			write_through: false,
		}
	}

	/// `true` for WriteThrough, `false` for WriteBack
	pub fn sync(mut self, on: bool) -> Self {
		self.write_through = on;
		self
	}

	pub fn into_exchange(self) -> Exchange {
		let tag = Sha1::digest(&self.value).to_vec();
		let synchronization = if self.write_through {
			proto::Synchronization::WriteThrough
		} else {
			proto::Synchronization::WriteBack
		};
		let mut command = base_command(proto::MessageType::Put);
		command.body = Some(proto::Body {
			key_value: Some(proto::KeyValue {
				key: Some(self.key.into_bytes()),
				tag: Some(tag),
				algorithm: Some(proto::Algorithm::Sha1 as i32),
				force: Some(true),
				synchronization: Some(synchronization as i32),
				..Default::default()
			}),
			..Default::default()
		});
		Exchange {
			command,
			value: self.value,
		}
	}

	pub fn decode(reply: &Reply) -> Result<(), Error> {
		check_status(reply)
	}
}

/// Fetch the value stored under one key
pub struct Get {
	key: String,
}

impl Get {
	pub fn new(key: impl Into<String>) -> Self {
		Get { key: key.into() }
	}

	pub fn into_exchange(self) -> Exchange {
		let mut command = base_command(proto::MessageType::Get);
		command.body = Some(proto::Body {
			key_value: Some(proto::KeyValue {
				key: Some(self.key.into_bytes()),
				..Default::default()
			}),
			..Default::default()
		});
		Exchange {
			command,
			value: Bytes::new(),
		}
	}

	pub fn decode(reply: Reply) -> Result<Bytes, Error> {
		check_status(&reply)?;
		Ok(reply.value)
	}
}

/// Drop one key
pub struct Delete {
	key: String,
}

impl Delete {
	pub fn new(key: impl Into<String>) -> Self {
		Delete { key: key.into() }
	}

	pub fn into_exchange(self) -> Exchange {
		let mut command = base_command(proto::MessageType::Delete);
		command.body = Some(proto::Body {
			key_value: Some(proto::KeyValue {
				key: Some(self.key.into_bytes()),
				force: Some(true),
				synchronization: Some(proto::Synchronization::WriteBack as i32),
				..Default::default()
			}),
			..Default::default()
		});
		Exchange {
			command,
			value: Bytes::new(),
		}
	}

	pub fn decode(reply: &Reply) -> Result<(), Error> {
		check_status(reply)
	}
}

/// List keys of `[start, end]` with the configured inclusivity
pub struct GetKeyRange {
	start: String,
	end: String,
	include_start: bool,
	include_end: bool,
	max_returned: i32,
}

impl GetKeyRange {
	pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
		GetKeyRange {
			start: start.into(),
			end: end.into(),
			include_start: false,
			include_end: false,
			max_returned: 200,
		}
	}

	pub fn include_start(mut self, on: bool) -> Self {
		self.include_start = on;
		self
	}

	pub fn include_end(mut self, on: bool) -> Self {
		self.include_end = on;
		self
	}

	pub fn max_returned(mut self, max: i32) -> Self {
		self.max_returned = max;
		self
	}

	pub fn into_exchange(self) -> Exchange {
		let mut command = base_command(proto::MessageType::GetKeyRange);
		command.body = Some(proto::Body {
			range: Some(proto::Range {
				start_key: Some(self.start.into_bytes()),
				end_key: Some(self.end.into_bytes()),
				start_key_inclusive: Some(self.include_start),
				end_key_inclusive: Some(self.include_end),
				max_returned: Some(self.max_returned),
				..Default::default()
			}),
			..Default::default()
		});
		Exchange {
			command,
			value: Bytes::new(),
		}
	}

	pub fn decode(reply: &Reply) -> Result<Vec<String>, Error> {
		check_status(reply)?;
		let keys = reply
			.command
			.body
			.as_ref()
			.and_then(|b| b.range.as_ref())
			.map(|r| r.keys.as_slice())
			.unwrap_or_default();
		Ok(keys
			.iter()
			.map(|k| String::from_utf8_lossy(k).into_owned())
			.collect())
	}
}

/// Utilization/temperature/capacity statistics of one drive
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveStats {
	pub cpu: f32,
	pub io: f32,
	pub temp: f32,
	/// Fraction of the nominal capacity already used
	pub space: f32,
}

/// Query the statistics log
pub struct GetLog;

impl GetLog {
	pub fn into_exchange(self) -> Exchange {
		let mut command = base_command(proto::MessageType::GetLog);
		command.body = Some(proto::Body {
			get_log: Some(proto::GetLog {
				types: vec![
					proto::GetLogType::Utilizations as i32,
					proto::GetLogType::Temperatures as i32,
					proto::GetLogType::Capacities as i32,
				],
				..Default::default()
			}),
			..Default::default()
		});
		Exchange {
			command,
			value: Bytes::new(),
		}
	}

	pub fn decode(reply: &Reply) -> Result<DriveStats, Error> {
		check_status(reply)?;
		let mut stats = DriveStats::default();
		let log = reply
			.command
			.body
			.as_ref()
			.and_then(|b| b.get_log.as_ref())
			.ok_or_else(|| Error::message("getlog reply without a log body"))?;

		for u in &log.utilizations {
			match u.name.as_deref() {
				Some("CPU") => stats.cpu = u.value.unwrap_or_default(),
				Some("HDA") => stats.io = u.value.unwrap_or_default(),
				_ => {}
			}
		}
		if let Some(t) = log.temperatures.first() {
			stats.temp = t.current.unwrap_or_default();
		}
		if let Some(c) = &log.capacity {
			stats.space = c.portion_full.unwrap_or_default();
		}
		Ok(stats)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use prost::Message as _;

	fn reply_with(command: proto::Command, value: Bytes) -> Reply {
		Reply {
			message: proto::Message::default(),
			command,
			value,
		}
	}

	fn success_status() -> Option<proto::Status> {
		Some(proto::Status {
			code: Some(proto::StatusCode::Success as i32),
			..Default::default()
		})
	}

	#[test]
	fn test_put_exchange_shape() {
		let exchange = Put::new("chunk-0-5", Bytes::from_static(b"hello")).into_exchange();
		let kv = exchange
			.command
			.body
			.as_ref()
			.unwrap()
			.key_value
			.as_ref()
			.unwrap();
		assert_eq!(kv.key.as_deref(), Some(&b"chunk-0-5"[..]));
		assert_eq!(kv.algorithm, Some(proto::Algorithm::Sha1 as i32));
		assert_eq!(kv.tag.as_ref().unwrap().len(), 20);
		assert_eq!(exchange.value, Bytes::from_static(b"hello"));

		// The command must survive an encode/decode cycle untouched.
		let bytes = exchange.command.encode_to_vec();
		let decoded = proto::Command::decode(&bytes[..]).unwrap();
		assert_eq!(decoded, exchange.command);
	}

	#[test]
	fn test_get_decode_returns_value() {
		let command = proto::Command {
			status: success_status(),
			..Default::default()
		};
		let out = Get::decode(reply_with(command, Bytes::from_static(b"payload"))).unwrap();
		assert_eq!(out, Bytes::from_static(b"payload"));
	}

	#[test]
	fn test_status_failure_is_surfaced() {
		let command = proto::Command {
			status: Some(proto::Status {
				code: Some(proto::StatusCode::NotFound as i32),
				status_message: Some("no such key".into()),
				..Default::default()
			}),
			..Default::default()
		};
		let reply = reply_with(command, Bytes::new());
		match Delete::decode(&reply) {
			Err(Error::Drive(proto::StatusCode::NotFound, msg)) => {
				assert_eq!(msg, "no such key")
			}
			other => panic!("unexpected outcome: {:?}", other),
		}
	}

	#[test]
	fn test_get_key_range_decode() {
		let command = proto::Command {
			status: success_status(),
			body: Some(proto::Body {
				range: Some(proto::Range {
					keys: vec![b"a-0-1".to_vec(), b"a-1-1".to_vec()],
					..Default::default()
				}),
				..Default::default()
			}),
			..Default::default()
		};
		let keys = GetKeyRange::decode(&reply_with(command, Bytes::new())).unwrap();
		assert_eq!(keys, vec!["a-0-1".to_string(), "a-1-1".to_string()]);
	}

	#[test]
	fn test_get_log_decode() {
		let command = proto::Command {
			status: success_status(),
			body: Some(proto::Body {
				get_log: Some(proto::GetLog {
					utilizations: vec![
						proto::Utilization {
							name: Some("CPU".into()),
							value: Some(0.25),
						},
						proto::Utilization {
							name: Some("HDA".into()),
							value: Some(0.5),
						},
					],
					temperatures: vec![proto::Temperature {
						name: Some("HDA".into()),
						current: Some(41.0),
						..Default::default()
					}],
					capacity: Some(proto::Capacity {
						nominal_capacity_in_bytes: Some(4 << 40),
						portion_full: Some(0.75),
					}),
					..Default::default()
				}),
				..Default::default()
			}),
			..Default::default()
		};
		let stats = GetLog::decode(&reply_with(command, Bytes::new())).unwrap();
		assert_eq!(stats.cpu, 0.25);
		assert_eq!(stats.io, 0.5);
		assert_eq!(stats.temp, 41.0);
		assert_eq!(stats.space, 0.75);
	}
}
