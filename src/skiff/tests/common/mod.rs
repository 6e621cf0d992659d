//! Shared harness of the integration tests: mock drives behind a live
//! gateway, plus small HTTP helpers
pub mod drive;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::{Body, Method, Request, StatusCode};
use tokio::sync::watch;

use skiff_gateway::GatewayServer;
use skiff_kinetic::blob::KineticRepository;
use skiff_kinetic::registry::ClientRegistry;
use skiff_kinetic::ClientOptions;
use skiff_util::shutdown::wait_from;

pub const XATTR_PREFIX: &str = "x-oio-chunk-meta-";

pub struct TestContext {
	pub addr: SocketAddr,
	pub drives: Vec<drive::MockDrive>,
	pub block_size: usize,
	shutdown: watch::Sender<bool>,
}

impl TestContext {
	/// A gateway over `n` fresh drives
	pub async fn with_drives(n: usize, block_size: usize) -> TestContext {
		let mut drives = Vec::with_capacity(n);
		for _ in 0..n {
			drives.push(drive::MockDrive::start().await);
		}
		TestContext::assemble(drives, block_size).await
	}

	async fn assemble(drives: Vec<drive::MockDrive>, block_size: usize) -> TestContext {
		let (shutdown, must_exit) = watch::channel(false);

		let options = ClientOptions {
			salt: drive::TEST_SALT.to_string(),
			// Short enough that the reconnection scenarios stay fast
			rpc_ttl: Duration::from_secs(2),
			..Default::default()
		};
		let registry = ClientRegistry::new(options, must_exit.clone());
		let targets = drives.iter().map(|d| d.addr.to_string()).collect();
		let repository = Arc::new(KineticRepository::new(registry, targets, block_size, 4));

		let server = GatewayServer::new(repository, XATTR_PREFIX);
		let addr = free_port_addr();
		tokio::spawn(server.run(addr, wait_from(must_exit)));
		wait_listening(addr).await;

		TestContext {
			addr,
			drives,
			block_size,
			shutdown,
		}
	}

	pub fn url(&self, path: &str) -> String {
		format!("http://{}{}", self.addr, path)
	}

	/// Union of the keys stored across every drive, sorted
	pub fn all_keys(&self) -> Vec<String> {
		let mut keys = Vec::new();
		for drive in &self.drives {
			keys.extend(drive.keys());
		}
		keys.sort();
		keys
	}
}

impl Drop for TestContext {
	fn drop(&mut self) {
		let _ = self.shutdown.send(true);
		for drive in &self.drives {
			drive.kill();
		}
	}
}

fn free_port_addr() -> SocketAddr {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("ephemeral port");
	listener.local_addr().expect("ephemeral port address")
}

async fn wait_listening(addr: SocketAddr) {
	for _ in 0..100 {
		if tokio::net::TcpStream::connect(addr).await.is_ok() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	panic!("gateway did not start on {}", addr);
}

/// PUT `body`, returning the status and the parsed JSON reply
pub async fn put(
	ctx: &TestContext,
	path: &str,
	body: impl Into<Body>,
) -> (StatusCode, serde_json::Value) {
	put_with_headers(ctx, path, body, &[]).await
}

pub async fn put_with_headers(
	ctx: &TestContext,
	path: &str,
	body: impl Into<Body>,
	headers: &[(&str, &str)],
) -> (StatusCode, serde_json::Value) {
	let mut builder = Request::builder().method(Method::PUT).uri(ctx.url(path));
	for (name, value) in headers {
		builder = builder.header(*name, *value);
	}
	let req = builder.body(body.into()).unwrap();
	let resp = hyper::Client::new().request(req).await.unwrap();
	let status = resp.status();
	let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
	let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
	(status, json)
}

/// GET, returning the status, the raw body and whether the reply was chunked
pub async fn get(ctx: &TestContext, path: &str) -> (StatusCode, Vec<u8>, bool) {
	let req = Request::builder()
		.method(Method::GET)
		.uri(ctx.url(path))
		.body(Body::empty())
		.unwrap();
	let resp = hyper::Client::new().request(req).await.unwrap();
	let status = resp.status();
	let chunked = resp.headers().get("content-length").is_none();
	let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
	(status, body.to_vec(), chunked)
}

pub async fn delete(ctx: &TestContext, path: &str) -> (StatusCode, serde_json::Value) {
	let req = Request::builder()
		.method(Method::DELETE)
		.uri(ctx.url(path))
		.body(Body::empty())
		.unwrap();
	let resp = hyper::Client::new().request(req).await.unwrap();
	let status = resp.status();
	let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
	let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
	(status, json)
}
