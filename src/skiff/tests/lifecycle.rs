use crate::common;
use crate::common::drive::MockDrive;
use crate::common::TestContext;

use std::time::Duration;

use bytes::Bytes;
use hyper::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

use skiff_kinetic::rpc::{Get, Put};
use skiff_kinetic::{ClientOptions, DriveClient, KineticClient};

#[tokio::test]
async fn test_upload_then_remove() {
	let ctx = TestContext::with_drives(2, 1024).await;

	let (status, _) = common::put(&ctx, "/fleeting", "here today").await;
	assert_eq!(status, StatusCode::CREATED);
	assert!(!ctx.all_keys().is_empty());

	let (status, _) = common::delete(&ctx, "/fleeting").await;
	assert_eq!(status, StatusCode::OK);
	assert!(ctx.all_keys().is_empty());

	let (status, _, _) = common::get(&ctx, "/fleeting").await;
	assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Send one raw HTTP/1.1 request and return everything the gateway wrote
async fn raw_exchange(ctx: &TestContext, head: &str, body_after_continue: &[u8]) -> Vec<u8> {
	let mut stream = tokio::net::TcpStream::connect(ctx.addr).await.unwrap();
	stream.write_all(head.as_bytes()).await.unwrap();

	let mut collected = Vec::new();
	if !body_after_continue.is_empty() {
		// Wait for the interim reply before sending the body.
		let mut buf = [0u8; 1024];
		loop {
			let n = stream.read(&mut buf).await.unwrap();
			assert!(n > 0, "gateway closed before the interim reply");
			collected.extend_from_slice(&buf[..n]);
			if collected.windows(4).any(|w| w == b"\r\n\r\n") {
				break;
			}
		}
		stream.write_all(body_after_continue).await.unwrap();
	}

	let mut rest = Vec::new();
	stream.read_to_end(&mut rest).await.unwrap();
	collected.extend_from_slice(&rest);
	collected
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
	haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

#[tokio::test]
async fn test_expect_continue() {
	let ctx = TestContext::with_drives(2, 1024).await;

	let head = format!(
		"PUT /xyz HTTP/1.1\r\nHost: {}\r\nExpect: 100-continue\r\nContent-Length: 3\r\nConnection: close\r\n\r\n",
		ctx.addr
	);
	let raw = raw_exchange(&ctx, &head, b"abc").await;

	// The interim reply appears exactly once, then the final status.
	assert_eq!(count_occurrences(&raw, b"100 Continue"), 1);
	assert_eq!(count_occurrences(&raw, b"201 Created"), 1);

	let (status, body, _) = common::get(&ctx, "/xyz").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, b"abc");
}

#[tokio::test]
async fn test_no_continue_without_expect() {
	let ctx = TestContext::with_drives(2, 1024).await;

	let head = format!(
		"PUT /plain HTTP/1.1\r\nHost: {}\r\nContent-Length: 3\r\nConnection: close\r\n\r\nabc",
		ctx.addr
	);
	let raw = raw_exchange(&ctx, &head, b"").await;
	assert_eq!(count_occurrences(&raw, b"100 Continue"), 0);
	assert_eq!(count_occurrences(&raw, b"201 Created"), 1);
}

#[tokio::test]
async fn test_chunked_upload() {
	let ctx = TestContext::with_drives(2, 1024).await;

	let head = format!(
		"PUT /def456 HTTP/1.1\r\nHost: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n2\r\nAA\r\n2\r\nBB\r\n0\r\n\r\n",
		ctx.addr
	);
	let raw = raw_exchange(&ctx, &head, b"").await;
	assert_eq!(count_occurrences(&raw, b"201 Created"), 1);

	let text = String::from_utf8_lossy(&raw);
	assert!(text.contains(r#""bytes":4"#));
	assert!(text.contains("b86fc6b051f63d73de262d4c34e3a0a9"));

	let (status, body, _) = common::get(&ctx, "/def456").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, b"AABB");
}

#[tokio::test]
async fn test_gateway_recovers_after_drive_restart() {
	let ctx = TestContext::with_drives(1, 1024).await;

	let (status, _) = common::put(&ctx, "/sturdy", "precious").await;
	assert_eq!(status, StatusCode::CREATED);

	let addr = ctx.drives[0].addr;
	let store = ctx.drives[0].store();
	ctx.drives[0].kill();
	tokio::time::sleep(Duration::from_millis(300)).await;

	// With the drive down the upload fails cleanly.
	let (status, _) = common::put(&ctx, "/while-down", "data").await;
	assert!(status.is_server_error(), "unexpected status {}", status);

	// Same port, same content: the client reconnects on its own.
	let revived = MockDrive::start_on(addr, store).await;

	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	loop {
		let (status, _) = common::put(&ctx, "/while-down", "data").await;
		if status == StatusCode::CREATED {
			break;
		}
		assert!(
			tokio::time::Instant::now() < deadline,
			"gateway did not recover in time"
		);
		tokio::time::sleep(Duration::from_millis(250)).await;
	}

	// The chunk from before the outage is still there.
	let (status, body, _) = common::get(&ctx, "/sturdy").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, b"precious");

	revived.kill();
}

#[tokio::test]
async fn test_rpc_wait_terminates_on_drive_loss() {
	let drive = MockDrive::start().await;
	let (stop, must_exit) = watch::channel(false);

	let options = ClientOptions {
		rpc_ttl: Duration::from_secs(2),
		..Default::default()
	};
	let client = KineticClient::spawn(&drive.addr.to_string(), options, must_exit);

	// A first RPC goes through.
	let handle = client
		.call(Put::new("k", Bytes::from_static(b"v")).into_exchange())
		.await;
	let reply = handle.wait().await.unwrap();
	Put::decode(&reply).unwrap();

	// Drive gone: the wait resolves with an error instead of hanging.
	drive.kill();
	tokio::time::sleep(Duration::from_millis(300)).await;
	let handle = client.call(Get::new("k").into_exchange()).await;
	assert!(handle.wait().await.is_err());

	// Drive back: the same client serves RPCs again.
	let revived = MockDrive::start_on(drive.addr, drive.store()).await;
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	loop {
		let handle = client.call(Get::new("k").into_exchange()).await;
		match handle.wait().await {
			Ok(reply) => {
				assert_eq!(Get::decode(reply).unwrap(), Bytes::from_static(b"v"));
				break;
			}
			Err(_) => {
				assert!(
					tokio::time::Instant::now() < deadline,
					"client did not reconnect in time"
				);
				tokio::time::sleep(Duration::from_millis(250)).await;
			}
		}
	}

	revived.kill();
	let _ = stop.send(true);
}
