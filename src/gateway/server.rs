//! The hyper service driving blob transactions
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::prelude::*;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use md5::{Digest, Md5};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use skiff_blob::{Download, Removal, Repository, Target, Upload};

use crate::error::SoftError;

const TARGET_HEADER_PREFIX: &str = "x-oio-chunk-dest";
const STREAM_QUEUE: usize = 4;

pub struct GatewayServer {
	repository: Arc<dyn Repository>,
	xattr_prefix: String,
}

impl GatewayServer {
	pub fn new(repository: Arc<dyn Repository>, xattr_prefix: impl Into<String>) -> Arc<Self> {
		Arc::new(GatewayServer {
			repository,
			xattr_prefix: xattr_prefix.into().to_ascii_lowercase(),
		})
	}

	/// Serve until `shutdown_signal` completes
	pub async fn run(
		self: Arc<Self>,
		bind_addr: SocketAddr,
		shutdown_signal: impl Future<Output = ()>,
	) -> Result<(), hyper::Error> {
		info!(
			"gateway listening on {} ({})",
			bind_addr,
			self.repository.backend()
		);

		let this = self;
		let make_svc = make_service_fn(move |conn: &AddrStream| {
			let this = this.clone();
			let peer = conn.remote_addr();
			async move {
				Ok::<_, Infallible>(service_fn(move |req| {
					let this = this.clone();
					this.handler(req, peer)
				}))
			}
		});

		Server::bind(&bind_addr)
			.serve(make_svc)
			.with_graceful_shutdown(shutdown_signal)
			.await
	}

	async fn handler(
		self: Arc<Self>,
		req: Request<Body>,
		peer: SocketAddr,
	) -> Result<Response<Body>, Infallible> {
		let method = req.method().clone();
		let uri = req.uri().clone();
		debug!("{} {} {}", peer, method, uri);

		let resp = match self.handle_request(req).await {
			Ok(resp) => resp,
			Err(e) => {
				info!("{} {} {}: {} ({})", peer, method, uri, e.message, e.soft);
				e.into_response()
			}
		};
		Ok(resp)
	}

	async fn handle_request(&self, req: Request<Body>) -> Result<Response<Body>, SoftError> {
		let chunk_id = chunk_id_from_path(req.uri().path())?;
		let method = req.method().clone();
		match method.as_str() {
			"PUT" => self.handle_upload(req, &chunk_id).await,
			"GET" => self.handle_download(req, &chunk_id).await,
			"DELETE" => self.handle_removal(req, &chunk_id).await,
			_ => Err(SoftError::method_not_managed()),
		}
	}

	async fn handle_upload(
		&self,
		req: Request<Body>,
		chunk_id: &str,
	) -> Result<Response<Body>, SoftError> {
		let targets = targets_from_headers(req.headers());
		let xattrs = self.xattrs_from_headers(req.headers());

		let mut upload = self
			.repository
			.upload(chunk_id, &targets)
			.map_err(SoftError::from_upload)?;
		for (key, value) in &xattrs {
			upload
				.set_xattr(key, value)
				.map_err(SoftError::from_upload)?;
		}

		// A failing prepare replies before the body is polled, so the
		// interim 100 Continue (emitted by hyper on the first body poll when
		// the client asked for it) never precedes an error.
		upload.prepare().await.map_err(SoftError::from_upload)?;

		let mut body = req.into_body();
		let mut md5 = Md5::new();
		let mut bytes: u64 = 0;
		while let Some(fragment) = body.next().await {
			let fragment = match fragment {
				Ok(f) => f,
				Err(e) => {
					let _ = upload.abort().await;
					return Err(SoftError::bad_request(format!("body read error: {}", e)));
				}
			};
			if fragment.len() as u64 >= u32::MAX as u64 {
				let _ = upload.abort().await;
				return Err(SoftError::bad_request("body fragment too large"));
			}
			md5.update(&fragment);
			bytes += fragment.len() as u64;
			if let Err(e) = upload.write(&fragment).await {
				warn!("upload write failed: {}", e);
				let _ = upload.abort().await;
				return Err(SoftError::from_upload(e));
			}
		}

		if let Err(e) = upload.commit().await {
			warn!("upload commit failed: {}", e);
			return Err(SoftError::new(500, 400, "Upload commit failed"));
		}

		let payload = serde_json::json!({
			"stream": {
				"bytes": bytes,
				"md5": hex::encode(md5.finalize()),
			}
		})
		.to_string();
		Ok(Response::builder()
			.status(StatusCode::CREATED)
			.header("Content-Type", "application/json")
			.header("Content-Length", payload.len())
			.body(Body::from(payload))
			.expect("static response headers are valid"))
	}

	async fn handle_download(
		&self,
		req: Request<Body>,
		chunk_id: &str,
	) -> Result<Response<Body>, SoftError> {
		let targets = targets_from_headers(req.headers());
		let mut download = self
			.repository
			.download(chunk_id, &targets)
			.map_err(SoftError::from_download)?;
		download.prepare().await.map_err(SoftError::from_download)?;

		// The transaction keeps running in its own task, feeding the chunked
		// reply body through a small queue.
		let (tx, rx) = mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(STREAM_QUEUE);
		tokio::spawn(pump_download(download, tx));

		Ok(Response::builder()
			.status(StatusCode::OK)
			.body(Body::wrap_stream(ReceiverStream::new(rx)))
			.expect("static response headers are valid"))
	}

	async fn handle_removal(
		&self,
		req: Request<Body>,
		chunk_id: &str,
	) -> Result<Response<Body>, SoftError> {
		let targets = targets_from_headers(req.headers());
		let mut removal = self
			.repository
			.removal(chunk_id, &targets)
			.map_err(SoftError::from_removal)?;
		removal.prepare().await.map_err(SoftError::from_removal)?;

		if let Err(e) = removal.commit().await {
			warn!("removal commit failed: {}", e);
			return Err(SoftError::new(500, 500, "Removal impossible"));
		}
		Ok(Response::builder()
			.status(StatusCode::OK)
			.header("Content-Length", 0)
			.body(Body::empty())
			.expect("static response headers are valid"))
	}

	/// The fields selected by the configured prefix, prefix stripped
	fn xattrs_from_headers(&self, headers: &hyper::HeaderMap) -> Vec<(String, String)> {
		let mut xattrs = Vec::new();
		for (name, value) in headers.iter() {
			let name = name.as_str();
			if let Some(key) = name.strip_prefix(self.xattr_prefix.as_str()) {
				if key.is_empty() {
					continue;
				}
				if let Ok(value) = value.to_str() {
					xattrs.push((key.to_string(), value.to_string()));
				}
			}
		}
		xattrs
	}
}

async fn pump_download(
	mut download: Box<dyn Download>,
	tx: mpsc::Sender<Result<bytes::Bytes, std::io::Error>>,
) {
	while !download.is_eof() {
		match download.read().await {
			Ok(data) => {
				if data.is_empty() {
					continue;
				}
				if tx.send(Ok(data)).await.is_err() {
					debug!("client went away during a download");
					return;
				}
			}
			Err(e) => {
				warn!("download read failed: {}", e);
				let _ = tx
					.send(Err(std::io::Error::new(
						std::io::ErrorKind::Other,
						e.to_string(),
					)))
					.await;
				return;
			}
		}
	}
}

/// The chunk id is the last path segment; an empty or missing basename is a
/// client error
fn chunk_id_from_path(path: &str) -> Result<String, SoftError> {
	let last_sep = path
		.rfind('/')
		.ok_or_else(|| SoftError::bad_request("URL has no path"))?;
	let basename = &path[last_sep + 1..];
	if basename.is_empty() {
		return Err(SoftError::bad_request("URL has no/empty basename"));
	}
	Ok(basename.to_string())
}

/// The `x-oio-chunk-dest[-<n>]` family names the target set; `<n>` orders it
fn targets_from_headers(headers: &hyper::HeaderMap) -> Vec<Target> {
	let mut targets = Vec::new();
	for (name, value) in headers.iter() {
		let name = name.as_str();
		if let Some(suffix) = name.strip_prefix(TARGET_HEADER_PREFIX) {
			let rank = suffix.strip_prefix('-').and_then(|s| s.parse::<u32>().ok());
			if !suffix.is_empty() && rank.is_none() {
				continue;
			}
			if let Ok(url) = value.to_str() {
				targets.push(Target {
					url: url.to_string(),
					rank,
				});
			}
		}
	}
	targets.sort_by_key(|t| t.rank);
	targets
}
