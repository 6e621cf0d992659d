use crate::common;
use crate::common::TestContext;

use hyper::StatusCode;

#[tokio::test]
async fn test_roundtrip_small_blob() {
	let ctx = TestContext::with_drives(3, 1024 * 1024).await;

	let (status, json) = common::put(&ctx, "/abc123", "Hello").await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(json["stream"]["bytes"], 5);
	assert_eq!(json["stream"]["md5"], "8b1a9953c4611296a827abf8c47804d7");

	let (status, body, chunked) = common::get(&ctx, "/abc123").await;
	assert_eq!(status, StatusCode::OK);
	assert!(chunked);
	assert_eq!(body, b"Hello");
}

#[tokio::test]
async fn test_block_layout_across_drives() {
	// 10 bytes over 4-byte blocks on 3 drives: 4+4+2 plus the manifest.
	let ctx = TestContext::with_drives(3, 4).await;

	let (status, _) = common::put(&ctx, "/c", "0123456789").await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(ctx.all_keys(), vec!["c-#", "c-0-4", "c-1-4", "c-2-2"]);

	// No block may exceed the configured block size.
	for key in ctx.all_keys() {
		if let Some(size) = key.rsplit('-').next().and_then(|s| s.parse::<usize>().ok()) {
			assert!(size <= ctx.block_size, "block {} over the limit", key);
		}
	}

	let (status, body, _) = common::get(&ctx, "/c").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, b"0123456789");
}

#[tokio::test]
async fn test_exact_block_multiples() {
	let ctx = TestContext::with_drives(2, 4).await;

	// n * block_size bytes: n block keys and one manifest key.
	let (status, _) = common::put(&ctx, "/even", "01234567").await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(ctx.all_keys(), vec!["even-#", "even-0-4", "even-1-4"]);

	// n * block_size + 1 bytes: n + 1 block keys.
	let (status, _) = common::put(&ctx, "/odd", "012345678").await;
	assert_eq!(status, StatusCode::CREATED);
	let odd_blocks = ctx
		.all_keys()
		.iter()
		.filter(|k| k.starts_with("odd-") && !k.ends_with('#'))
		.count();
	assert_eq!(odd_blocks, 3);
}

#[tokio::test]
async fn test_empty_upload() {
	let ctx = TestContext::with_drives(2, 4).await;

	let (status, json) = common::put(&ctx, "/hollow", "").await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(json["stream"]["bytes"], 0);
	// Only the manifest is stored.
	assert_eq!(ctx.all_keys(), vec!["hollow-#"]);

	let (status, body, _) = common::get(&ctx, "/hollow").await;
	assert_eq!(status, StatusCode::OK);
	assert!(body.is_empty());
}

#[tokio::test]
async fn test_xattrs_land_in_the_manifest() {
	let ctx = TestContext::with_drives(2, 1024).await;

	let (status, _) = common::put_with_headers(
		&ctx,
		"/tagged",
		"payload",
		&[
			("x-oio-chunk-meta-content-path", "a/b/c"),
			("x-oio-chunk-meta-mime-type", "text/plain"),
		],
	)
	.await;
	assert_eq!(status, StatusCode::CREATED);

	let manifest = ctx
		.drives
		.iter()
		.find_map(|d| d.store().lock().unwrap().get("tagged-#").cloned())
		.expect("manifest stored on some drive");
	let xattr: serde_json::Value = serde_json::from_slice(&manifest).unwrap();
	assert_eq!(xattr["content-path"], "a/b/c");
	assert_eq!(xattr["mime-type"], "text/plain");
}

#[tokio::test]
async fn test_large_blob_roundtrip() {
	let ctx = TestContext::with_drives(3, 1024).await;

	let payload = (0..10_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
	let (status, json) = common::put(&ctx, "/big", payload.clone()).await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(json["stream"]["bytes"], 10_000);

	let (status, body, _) = common::get(&ctx, "/big").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, payload);
}
