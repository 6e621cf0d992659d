//! Per-drive connection actor
//!
//! One actor owns the persistent connection to one drive. The supervisor
//! loop runs the reconnect cycle: handshake (banner with a 5 s deadline),
//! then a multiplexing core playing the producer role (drain submissions,
//! assign sequence ids, send frames) while a spawned consumer task reads
//! frames and ships decoded replies back for correlation. Every second a
//! sweep aborts pending RPCs past their deadline. When the connection dies,
//! every queued or pending RPC is failed with a connection reset and the
//! cycle restarts after a 500 ms back-off, for as long as the shutdown
//! signal stays low.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use skiff_net::{NetChannel, Poll, ReadChannel};
use skiff_util::time::deadline_ms;

use crate::error::Error;
use crate::rpc::Exchange;
use crate::wire::{
	parse_frame, read_frame, seal_command, write_frame, ConnectionContext, Reply,
	DEFAULT_MAX_FRAME,
};
use crate::proto;

/// Time an RPC may wait for its reply before being swept
pub const DEFAULT_RPC_TTL: Duration = Duration::from_secs(10);

const HANDSHAKE_TIMEOUT_MS: u64 = 5000;
const IO_TIMEOUT_MS: u64 = 1000;
const RECONNECT_DELAY: Duration = Duration::from_millis(500);
const SWEEP_PERIOD: Duration = Duration::from_secs(1);
const SUBMIT_QUEUE: usize = 64;
const REPLY_QUEUE: usize = 16;
const SOCKET_BUFFER: usize = 1024 * 1024;

/// Tunables of one drive connection
#[derive(Debug, Clone)]
pub struct ClientOptions {
	pub salt: String,
	pub rpc_ttl: Duration,
	pub max_frame: usize,
}

impl Default for ClientOptions {
	fn default() -> Self {
		ClientOptions {
			salt: "asdfasdf".to_string(),
			rpc_ttl: DEFAULT_RPC_TTL,
			max_frame: DEFAULT_MAX_FRAME,
		}
	}
}

struct Submit {
	exchange: Exchange,
	deadline: Instant,
	reply: oneshot::Sender<Result<Reply, Error>>,
}

struct PendingRpc {
	deadline: Instant,
	reply: oneshot::Sender<Result<Reply, Error>>,
}

/// The result of one in-flight RPC; exactly one of a matching reply, a
/// connection reset or a deadline expiry terminates the wait
pub struct RpcHandle {
	rx: oneshot::Receiver<Result<Reply, Error>>,
}

impl RpcHandle {
	pub(crate) fn from_receiver(rx: oneshot::Receiver<Result<Reply, Error>>) -> Self {
		RpcHandle { rx }
	}

	pub async fn wait(self) -> Result<Reply, Error> {
		match self.rx.await {
			Ok(result) => result,
			Err(_) => Err(Error::Stopped),
		}
	}
}

/// Anything able to play RPCs against one drive. The production
/// implementation is [`KineticClient`]; tests substitute an in-memory drive.
#[async_trait]
pub trait DriveClient: Send + Sync {
	fn id(&self) -> &str;

	async fn call(&self, exchange: Exchange) -> RpcHandle;
}

/// Hands out the shared per-drive client for a target URL
pub trait DriveRegistry: Send + Sync {
	fn get(&self, url: &str) -> Arc<dyn DriveClient>;
}

/// Cloneable handle on one drive's connection actor
#[derive(Clone)]
pub struct KineticClient {
	url: Arc<String>,
	rpc_ttl: Duration,
	to_agent: mpsc::Sender<Submit>,
}

impl KineticClient {
	/// Spawn the connection actor and return a handle on it
	pub fn spawn(url: &str, options: ClientOptions, must_exit: watch::Receiver<bool>) -> Self {
		let (to_agent, from_callers) = mpsc::channel(SUBMIT_QUEUE);
		let rpc_ttl = options.rpc_ttl;
		let agent_url = url.to_string();
		tokio::spawn(run_agents(agent_url, options, from_callers, must_exit));
		KineticClient {
			url: Arc::new(url.to_string()),
			rpc_ttl,
			to_agent,
		}
	}
}

#[async_trait]
impl DriveClient for KineticClient {
	fn id(&self) -> &str {
		&self.url
	}

	async fn call(&self, exchange: Exchange) -> RpcHandle {
		let (tx, rx) = oneshot::channel();
		let submit = Submit {
			exchange,
			deadline: Instant::now() + self.rpc_ttl,
			reply: tx,
		};
		// A failed send drops the submit, and with it the reply sender: the
		// handle then resolves to Stopped.
		let _ = self.to_agent.send(submit).await;
		RpcHandle { rx }
	}
}

/// Supervisor: reconnect forever while the process runs
async fn run_agents(
	url: String,
	options: ClientOptions,
	mut from_callers: mpsc::Receiver<Submit>,
	mut must_exit: watch::Receiver<bool>,
) {
	let mut ctx = ConnectionContext::new(&options.salt);
	while !*must_exit.borrow() {
		debug!("starting agents for {}", url);
		ctx.reset();

		match run_connection(&url, &options, &mut ctx, &mut from_callers, &mut must_exit).await {
			Ok(()) => debug!("agents for {} stopping", url),
			Err(e) => debug!("connection cycle for {} ended: {}", url, e),
		}

		// Both directions are down now; whatever was submitted and not
		// answered is failed so the callers wake up.
		abort_queued(&mut from_callers);

		if *must_exit.borrow() {
			break;
		}
		tokio::select! {
			_ = tokio::time::sleep(RECONNECT_DELAY) => (),
			_ = must_exit.changed() => (),
		}
	}
	debug!("exited agents for {}", url);
}

fn abort_queued(from_callers: &mut mpsc::Receiver<Submit>) {
	while let Ok(submit) = from_callers.try_recv() {
		let _ = submit.reply.send(Err(Error::ConnectionReset));
	}
}

/// One connection cycle: handshake, then multiplex until the connection or
/// the process goes down. `Ok(())` means a requested shutdown.
async fn run_connection(
	url: &str,
	options: &ClientOptions,
	ctx: &mut ConnectionContext,
	from_callers: &mut mpsc::Receiver<Submit>,
	must_exit: &mut watch::Receiver<bool>,
) -> Result<(), Error> {
	let handshake_dl = deadline_ms(HANDSHAKE_TIMEOUT_MS);
	let chan = NetChannel::connect(url, handshake_dl).await?;
	let _ = chan.set_recv_buffer(SOCKET_BUFFER);
	let _ = chan.set_send_buffer(SOCKET_BUFFER);
	let (mut read, mut write) = chan.into_split();

	// The drive speaks first: its banner carries the connection id every
	// subsequent request must echo.
	let banner = parse_frame(read_frame(&mut read, options.max_frame, handshake_dl).await?)?;
	if banner.status_code() != proto::StatusCode::Success {
		return Err(banner.drive_error());
	}
	match banner.connection_id() {
		Some(id) if id > 0 => ctx.connection_id = id,
		_ => return Err(Error::message("banner without a connection id")),
	}
	debug!("connected to {} (connection id {})", url, ctx.connection_id);

	let (reply_tx, mut replies) = mpsc::channel(REPLY_QUEUE);
	let (conn_cancel, conn_cancelled) = watch::channel(false);
	let consumer = tokio::spawn(run_agent_consumer(
		read,
		reply_tx,
		options.max_frame,
		must_exit.clone(),
		conn_cancelled,
	));

	let mut pending: HashMap<u64, PendingRpc> = HashMap::new();
	let mut sweep = tokio::time::interval(SWEEP_PERIOD);
	sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	let outcome = loop {
		tokio::select! {
			changed = must_exit.changed() => {
				if changed.is_err() || *must_exit.borrow() {
					break Ok(());
				}
			}
			maybe_submit = from_callers.recv() => {
				let submit = match maybe_submit {
					Some(s) => s,
					// Every handle dropped: nothing can be submitted anymore.
					None => break Ok(()),
				};
				if let Err(e) = start_rpc(submit, ctx, &mut write, &mut pending).await {
					break Err(e);
				}
			}
			maybe_reply = replies.recv() => {
				match maybe_reply {
					None => break Err(Error::ConnectionReset),
					Some(reply) => manage(reply, ctx, &mut pending),
				}
			}
			_ = sweep.tick() => {
				abort_stalled_rpc(&mut pending);
			}
		}
	};

	// Teardown: stop the consumer, close our half, wait for it, then fail
	// everything still pending. The socket is fully released once both
	// halves are dropped.
	let _ = conn_cancel.send(true);
	drop(write);
	while replies.recv().await.is_some() {}
	let _ = consumer.await;

	for (_, rpc) in pending.drain() {
		let _ = rpc.reply.send(Err(Error::ConnectionReset));
	}
	outcome
}

/// Assign the next sequence id, register the RPC and send its frame
async fn start_rpc(
	submit: Submit,
	ctx: &mut ConnectionContext,
	write: &mut skiff_net::WriteChannel,
	pending: &mut HashMap<u64, PendingRpc>,
) -> Result<(), Error> {
	let Submit {
		mut exchange,
		deadline,
		reply,
	} = submit;

	let sequence = ctx.next_sequence();
	{
		let header = exchange.command.header.get_or_insert_with(Default::default);
		header.sequence = Some(sequence);
		header.connection_id = Some(ctx.connection_id);
		header.cluster_version = Some(ctx.cluster_version);
		header.priority = Some(proto::Priority::Normal as i32);
		header.timeout = Some(IO_TIMEOUT_MS);
	}

	let msg = seal_command(&exchange.command, ctx);
	pending.insert(sequence, PendingRpc { deadline, reply });

	if let Err(e) = write_frame(write, &msg, &exchange.value, deadline_ms(IO_TIMEOUT_MS)).await {
		if let Some(rpc) = pending.remove(&sequence) {
			let _ = rpc.reply.send(Err(Error::ConnectionReset));
		}
		return Err(e);
	}
	Ok(())
}

/// Correlate one decoded reply with its pending RPC
fn manage(reply: Reply, ctx: &mut ConnectionContext, pending: &mut HashMap<u64, PendingRpc>) {
	if let Some(id) = reply.connection_id() {
		if id > 0 {
			ctx.connection_id = id;
		}
	}
	match reply.ack_sequence() {
		Some(ack) => match pending.remove(&ack) {
			Some(rpc) => {
				let _ = rpc.reply.send(Ok(reply));
			}
			// Late reply to an RPC the sweep already aborted: drop it, the
			// connection itself is fine.
			None => debug!("reply out of sequence [{}]", ack),
		},
		None => debug!("unsolicited frame from the drive"),
	}
}

fn abort_stalled_rpc(pending: &mut HashMap<u64, PendingRpc>) {
	let now = Instant::now();
	let stalled = pending
		.iter()
		.filter(|(_, rpc)| now > rpc.deadline)
		.map(|(seq, _)| *seq)
		.collect::<Vec<_>>();
	for sequence in stalled {
		if let Some(rpc) = pending.remove(&sequence) {
			debug!("aborting stalled RPC [{}]", sequence);
			let _ = rpc.reply.send(Err(Error::Timeout));
		}
	}
}

/// Consumer: read frames until the connection or the process goes down.
/// Idle timeouts between frames are routine, a timeout in the middle of a
/// frame is a connection failure.
async fn run_agent_consumer(
	mut read: ReadChannel,
	replies: mpsc::Sender<Reply>,
	max_frame: usize,
	must_exit: watch::Receiver<bool>,
	mut cancel: watch::Receiver<bool>,
) {
	loop {
		if *must_exit.borrow() || *cancel.borrow() {
			break;
		}
		let ready = tokio::select! {
			changed = cancel.changed() => {
				if changed.is_err() {
					break;
				}
				continue;
			}
			ready = read.poll_in(deadline_ms(IO_TIMEOUT_MS)) => ready,
		};
		match ready {
			Ok(Poll::Timeout) => continue,
			Ok(Poll::Ready) => (),
			Err(e) => {
				debug!("consumer poll error: {}", e);
				break;
			}
		}
		match read_frame(&mut read, max_frame, deadline_ms(IO_TIMEOUT_MS)).await {
			Ok(frame) => match parse_frame(frame) {
				Ok(reply) => {
					if replies.send(reply).await.is_err() {
						break;
					}
				}
				Err(e) => {
					debug!("frame management error: {}", e);
					break;
				}
			},
			Err(Error::Net(skiff_net::Error::UnexpectedEof)) => {
				debug!("drive closed the connection");
				break;
			}
			Err(e) => {
				debug!("frame reading error: {}", e);
				break;
			}
		}
	}
}
