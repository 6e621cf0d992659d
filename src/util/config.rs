//! Contains type and functions related to the skiff configuration files
//!
//! Each service reads one JSON document of the form
//! `{"repository": {"<backend>": { ... }}, "service": {"bind": "host:port"}}`.
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

/// Represent the whole configuration of one service
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	/// The back-end this service stores chunks into
	pub repository: RepositoryConfig,

	/// Front-end parameters
	pub service: ServiceConfig,
}

/// Back-end selection; the JSON object must contain exactly one key
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryConfig {
	/// Chunks striped over a set of Kinetic drives
	Kinetic(KineticConfig),
	/// Chunks proxied to a single remote blob server over HTTP
	Rawx(RawxConfig),
	/// Chunks kept in process memory (development and tests)
	Mem(MemConfig),
}

/// Front-end parameters
#[derive(Deserialize, Debug, Clone)]
pub struct ServiceConfig {
	/// Address and port the gateway listens on
	pub bind: SocketAddr,

	/// Header prefix selecting the fields forwarded as chunk xattrs
	#[serde(default = "default_xattr_prefix")]
	pub xattr_prefix: String,
}

/// Configuration of the Kinetic back-end
#[derive(Deserialize, Debug, Clone)]
pub struct KineticConfig {
	/// Drives used when a request does not name its own target set
	#[serde(default)]
	pub targets: Vec<String>,

	/// Size of the blocks a chunk is striped into
	#[serde(default = "default_block_size")]
	pub block_size: usize,

	/// Number of GET RPCs kept in flight while downloading
	#[serde(default = "default_parallel_factor")]
	pub parallel_factor: usize,

	/// HMAC salt shared with the drives
	#[serde(default = "default_hmac_salt")]
	pub hmac_salt: String,

	/// Time-to-live of a single RPC, in milliseconds
	#[serde(default = "default_rpc_ttl_ms")]
	pub rpc_ttl_ms: u64,

	/// Listen for drive adverts on the multicast discovery group
	#[serde(default)]
	pub discovery: bool,
}

/// Configuration of the RAWX (HTTP) back-end
#[derive(Deserialize, Debug, Clone)]
pub struct RawxConfig {
	/// `host:port` of the remote blob server
	pub host: String,
}

/// Configuration of the in-memory back-end
#[derive(Deserialize, Debug, Clone, Default)]
pub struct MemConfig {}

fn default_block_size() -> usize {
	1048576
}
fn default_parallel_factor() -> usize {
	4
}
fn default_hmac_salt() -> String {
	// Development profile; production deployments supply their own.
	"asdfasdf".to_string()
}
fn default_rpc_ttl_ms() -> u64 {
	10_000
}
fn default_xattr_prefix() -> String {
	"x-oio-chunk-meta-".to_string()
}

/// Read and parse configuration
pub fn read_config(config_file: &Path) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new().read(true).open(config_file)?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	let parsed: Config = serde_json::from_str(&config)?;
	if let RepositoryConfig::Kinetic(kinetic) = &parsed.repository {
		if kinetic.block_size == 0 {
			return Err(Error::Config("block_size must be non-zero".into()));
		}
		if kinetic.parallel_factor == 0 {
			return Err(Error::Config("parallel_factor must be non-zero".into()));
		}
	}
	Ok(parsed)
}
