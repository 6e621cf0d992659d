//! An in-process Kinetic drive for the integration tests
//!
//! Speaks the real wire protocol: banner on accept, HMAC verification,
//! sequenced replies. Keys live in a shared map so tests can inspect the
//! stored layout and so a "restarted" drive keeps its content.
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::watch;

use skiff_kinetic::proto;
use skiff_kinetic::wire;
use skiff_net::{NetChannel, NetListener};
use skiff_util::time::deadline_ms;

pub const TEST_SALT: &str = "asdfasdf";
const TEST_CONNECTION_ID: i64 = 424242;

pub type DriveStore = Arc<Mutex<BTreeMap<String, Bytes>>>;

pub struct MockDrive {
	pub addr: SocketAddr,
	store: DriveStore,
	kill: watch::Sender<bool>,
}

impl MockDrive {
	pub async fn start() -> MockDrive {
		MockDrive::start_on(
			"127.0.0.1:0".parse().unwrap(),
			Arc::new(Mutex::new(BTreeMap::new())),
		)
		.await
	}

	/// Restart form: same port, same content
	pub async fn start_on(addr: SocketAddr, store: DriveStore) -> MockDrive {
		let listener = NetListener::bind(addr, 16).expect("mock drive bind");
		let addr = listener.local_addr();
		let (kill, killed) = watch::channel(false);
		tokio::spawn(run_drive(listener, store.clone(), killed));
		MockDrive { addr, store, kill }
	}

	/// Stop accepting and drop every open connection
	pub fn kill(&self) {
		let _ = self.kill.send(true);
	}

	pub fn store(&self) -> DriveStore {
		self.store.clone()
	}

	pub fn keys(&self) -> Vec<String> {
		self.store.lock().unwrap().keys().cloned().collect()
	}
}

async fn run_drive(listener: NetListener, store: DriveStore, killed: watch::Receiver<bool>) {
	loop {
		if *killed.borrow() {
			return;
		}
		match listener.accept(deadline_ms(100)).await {
			Ok(chan) => {
				tokio::spawn(serve_connection(chan, store.clone(), killed.clone()));
			}
			Err(e) if e.is_timeout() => continue,
			Err(_) => return,
		}
	}
}

async fn serve_connection(chan: NetChannel, store: DriveStore, killed: watch::Receiver<bool>) {
	let (mut read, mut write) = chan.into_split();
	let ctx = wire::ConnectionContext::new(TEST_SALT);

	let banner = proto::Command {
		header: Some(proto::Header {
			connection_id: Some(TEST_CONNECTION_ID),
			..Default::default()
		}),
		status: Some(proto::Status {
			code: Some(proto::StatusCode::Success as i32),
			..Default::default()
		}),
		..Default::default()
	};
	let msg = wire::seal_command(&banner, &ctx);
	if wire::write_frame(&mut write, &msg, &[], deadline_ms(1000))
		.await
		.is_err()
	{
		return;
	}

	loop {
		if *killed.borrow() {
			return;
		}
		let frame =
			match wire::read_frame(&mut read, wire::DEFAULT_MAX_FRAME, deadline_ms(100)).await {
				Ok(frame) => frame,
				Err(skiff_kinetic::Error::Net(skiff_net::Error::Timeout)) => continue,
				Err(_) => return,
			};
		let request = match wire::parse_frame(frame) {
			Ok(request) => request,
			Err(_) => return,
		};
		let (command, value) = serve_request(&store, &request);
		let msg = wire::seal_command(&command, &ctx);
		if wire::write_frame(&mut write, &msg, &value, deadline_ms(1000))
			.await
			.is_err()
		{
			return;
		}
	}
}

fn status_command(code: proto::StatusCode, ack: Option<u64>) -> proto::Command {
	proto::Command {
		header: Some(proto::Header {
			ack_sequence: ack,
			connection_id: Some(TEST_CONNECTION_ID),
			..Default::default()
		}),
		status: Some(proto::Status {
			code: Some(code as i32),
			..Default::default()
		}),
		..Default::default()
	}
}

fn serve_request(store: &DriveStore, request: &wire::Reply) -> (proto::Command, Bytes) {
	let ack = request.command.header.as_ref().and_then(|h| h.sequence);

	if !wire::verify_hmac(&request.message, TEST_SALT) {
		return (
			status_command(proto::StatusCode::HmacFailure, ack),
			Bytes::new(),
		);
	}

	let message_type = request
		.command
		.header
		.as_ref()
		.and_then(|h| h.message_type)
		.and_then(proto::MessageType::from_i32);
	let body = request.command.body.clone().unwrap_or_default();
	let mut store = store.lock().unwrap();

	match message_type {
		Some(proto::MessageType::Put) => {
			let key = key_of(&body);
			store.insert(key, request.value.clone());
			(status_command(proto::StatusCode::Success, ack), Bytes::new())
		}
		Some(proto::MessageType::Get) => {
			let key = key_of(&body);
			match store.get(&key) {
				Some(value) => (
					status_command(proto::StatusCode::Success, ack),
					value.clone(),
				),
				None => (
					status_command(proto::StatusCode::NotFound, ack),
					Bytes::new(),
				),
			}
		}
		Some(proto::MessageType::Delete) => {
			let key = key_of(&body);
			match store.remove(&key) {
				Some(_) => (status_command(proto::StatusCode::Success, ack), Bytes::new()),
				None => (
					status_command(proto::StatusCode::NotFound, ack),
					Bytes::new(),
				),
			}
		}
		Some(proto::MessageType::GetKeyRange) => {
			let range = body.range.unwrap_or_default();
			let start = String::from_utf8(range.start_key.unwrap_or_default()).unwrap();
			let end = String::from_utf8(range.end_key.unwrap_or_default()).unwrap();
			let lo = if range.start_key_inclusive.unwrap_or(false) {
				Bound::Included(start)
			} else {
				Bound::Excluded(start)
			};
			let hi = if range.end_key_inclusive.unwrap_or(false) {
				Bound::Included(end)
			} else {
				Bound::Excluded(end)
			};
			let max = range.max_returned.unwrap_or(i32::MAX) as usize;
			let keys = store
				.range((lo, hi))
				.take(max)
				.map(|(k, _)| k.clone().into_bytes())
				.collect::<Vec<_>>();
			let mut command = status_command(proto::StatusCode::Success, ack);
			command.body = Some(proto::Body {
				range: Some(proto::Range {
					keys,
					..Default::default()
				}),
				..Default::default()
			});
			(command, Bytes::new())
		}
		Some(proto::MessageType::GetLog) => {
			let mut command = status_command(proto::StatusCode::Success, ack);
			command.body = Some(proto::Body {
				get_log: Some(proto::GetLog {
					utilizations: vec![proto::Utilization {
						name: Some("CPU".into()),
						value: Some(0.1),
					}],
					capacity: Some(proto::Capacity {
						nominal_capacity_in_bytes: Some(4 << 40),
						portion_full: Some(0.2),
					}),
					..Default::default()
				}),
				..Default::default()
			});
			(command, Bytes::new())
		}
		_ => (
			status_command(proto::StatusCode::InvalidRequest, ack),
			Bytes::new(),
		),
	}
}

fn key_of(body: &proto::Body) -> String {
	String::from_utf8(
		body.key_value
			.as_ref()
			.and_then(|kv| kv.key.clone())
			.unwrap_or_default(),
	)
	.unwrap()
}
