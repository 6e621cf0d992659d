use crate::common;
use crate::common::TestContext;

use hyper::{Body, Method, Request, StatusCode};

#[tokio::test]
async fn test_double_upload() {
	let ctx = TestContext::with_drives(2, 1024).await;

	let (status, _) = common::put(&ctx, "/same", "v1").await;
	assert_eq!(status, StatusCode::CREATED);

	let (status, json) = common::put(&ctx, "/same", "v2").await;
	assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
	assert_eq!(json["status"], 421);
	assert_eq!(json["message"], "blobs found");
}

#[tokio::test]
async fn test_download_not_found() {
	let ctx = TestContext::with_drives(2, 1024).await;

	let (status, body, _) = common::get(&ctx, "/nope").await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(json["status"], 420);
	assert_eq!(json["message"], "blobs not found");
}

#[tokio::test]
async fn test_removal_not_found() {
	let ctx = TestContext::with_drives(2, 1024).await;

	let (status, json) = common::delete(&ctx, "/nope").await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(json["status"], 402);
	assert_eq!(json["message"], "no blob found");
}

#[tokio::test]
async fn test_method_not_managed() {
	let ctx = TestContext::with_drives(1, 1024).await;

	let req = Request::builder()
		.method(Method::POST)
		.uri(ctx.url("/thing"))
		.body(Body::from("x"))
		.unwrap();
	let resp = hyper::Client::new().request(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
	let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
	let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(json["status"], 406);
	assert_eq!(json["message"], "Method not managed");
}

#[tokio::test]
async fn test_empty_basename() {
	let ctx = TestContext::with_drives(1, 1024).await;

	let (status, body, _) = common::get(&ctx, "/chunks/").await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn test_gateway_survives_dead_drives() {
	let ctx = TestContext::with_drives(2, 1024).await;
	for drive in &ctx.drives {
		drive.kill();
	}
	// Give the drives a moment to drop their listeners.
	tokio::time::sleep(std::time::Duration::from_millis(200)).await;

	let (status, json) = common::put(&ctx, "/stranded", "data").await;
	assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
	assert_eq!(json["status"], 500);
	assert_eq!(json["message"], "devices unreachable");
}
