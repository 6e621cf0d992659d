//! Multicast discovery of Kinetic drives
//!
//! Drives advertise themselves with JSON datagrams on the multicast group
//! `239.1.2.3:8123`. The listener records each drive (keyed by its world
//! wide name) in a [`DriveDirectory`] and probes its statistics log once on
//! first sight.
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::client::DriveRegistry;
use crate::error::Error;
use crate::rpc::GetLog;

pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 2, 3);
pub const DISCOVERY_PORT: u16 = 8123;

/// One advert as the drives emit it
#[derive(Debug, Deserialize)]
pub struct DriveAd {
	pub port: u16,
	pub world_wide_name: String,
	#[serde(default)]
	pub network_interfaces: Vec<InterfaceAd>,
}

#[derive(Debug, Deserialize)]
pub struct InterfaceAd {
	pub ipv4_addr: String,
}

impl DriveAd {
	/// `host:port` of the drive, from its first advertised interface
	pub fn url(&self) -> Option<String> {
		self.network_interfaces
			.first()
			.map(|itf| format!("{}:{}", itf.ipv4_addr, self.port))
	}
}

/// The set of drives seen so far, world wide name to URL
#[derive(Clone, Default)]
pub struct DriveDirectory {
	drives: Arc<Mutex<HashMap<String, String>>>,
}

impl DriveDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns true when the drive was not known yet
	pub fn insert(&self, wwn: &str, url: &str) -> bool {
		self.drives
			.lock()
			.unwrap()
			.insert(wwn.to_string(), url.to_string())
			.is_none()
	}

	pub fn url_of(&self, wwn: &str) -> Option<String> {
		self.drives.lock().unwrap().get(wwn).cloned()
	}

	pub fn urls(&self) -> Vec<String> {
		self.drives.lock().unwrap().values().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.drives.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.drives.lock().unwrap().is_empty()
	}
}

/// Listen for adverts until shutdown
pub async fn run_discovery(
	directory: DriveDirectory,
	registry: Arc<dyn DriveRegistry>,
	mut must_exit: watch::Receiver<bool>,
) -> Result<(), Error> {
	let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT))
		.await
		.map_err(skiff_net::Error::Io)?;
	socket
		.join_multicast_v4(DISCOVERY_GROUP, Ipv4Addr::UNSPECIFIED)
		.map_err(skiff_net::Error::Io)?;
	info!(
		"listening for drive adverts on {}:{}",
		DISCOVERY_GROUP, DISCOVERY_PORT
	);

	let mut buf = [0u8; 2048];
	loop {
		tokio::select! {
			changed = must_exit.changed() => {
				if changed.is_err() || *must_exit.borrow() {
					return Ok(());
				}
			}
			incoming = socket.recv_from(&mut buf) => {
				let (len, peer) = incoming.map_err(skiff_net::Error::Io)?;
				let ad: DriveAd = match serde_json::from_slice(&buf[..len]) {
					Ok(ad) => ad,
					Err(e) => {
						debug!("unparsable advert from {}: {}", peer, e);
						continue;
					}
				};
				let url = match ad.url() {
					Some(url) => url,
					None => {
						debug!("advert from {} without an interface", peer);
						continue;
					}
				};
				if directory.insert(&ad.world_wide_name, &url) {
					info!("discovered drive {} at {}", ad.world_wide_name, url);
					probe_drive(registry.clone(), ad.world_wide_name, url);
				}
			}
		}
	}
}

/// One-shot statistics probe of a freshly discovered drive
fn probe_drive(registry: Arc<dyn DriveRegistry>, wwn: String, url: String) {
	tokio::spawn(async move {
		let client = registry.get(&url);
		let handle = client.call(GetLog.into_exchange()).await;
		match handle.wait().await.and_then(|reply| GetLog::decode(&reply)) {
			Ok(stats) => info!(
				"drive {} at {}: cpu={:.2} io={:.2} temp={:.1} space={:.2}",
				wwn, url, stats.cpu, stats.io, stats.temp, stats.space
			),
			Err(e) => warn!("statistics probe of {} failed: {}", url, e),
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_advert() {
		let raw = r#"{
			"port": 8123,
			"world_wide_name": "naa.5000c5038405e4f7",
			"network_interfaces": [
				{"ipv4_addr": "192.168.1.42"},
				{"ipv4_addr": "10.0.0.42"}
			]
		}"#;
		let ad: DriveAd = serde_json::from_slice(raw.as_bytes()).unwrap();
		assert_eq!(ad.world_wide_name, "naa.5000c5038405e4f7");
		assert_eq!(ad.url().as_deref(), Some("192.168.1.42:8123"));
	}

	#[test]
	fn test_advert_without_interface() {
		let raw = r#"{"port": 8123, "world_wide_name": "naa.0"}"#;
		let ad: DriveAd = serde_json::from_slice(raw.as_bytes()).unwrap();
		assert_eq!(ad.url(), None);
	}

	#[test]
	fn test_directory() {
		let directory = DriveDirectory::new();
		assert!(directory.insert("naa.0", "10.0.0.1:8123"));
		assert!(!directory.insert("naa.0", "10.0.0.1:8123"));
		assert!(directory.insert("naa.1", "10.0.0.2:8123"));
		assert_eq!(directory.len(), 2);
		assert_eq!(directory.url_of("naa.1").as_deref(), Some("10.0.0.2:8123"));
	}
}
