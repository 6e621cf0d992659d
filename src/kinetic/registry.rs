//! Shared per-drive clients
//!
//! Transactions never own a connection: they borrow the drive's client from
//! this registry, which spawns one connection actor per URL on first use and
//! then keeps handing out handles on it.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::client::{ClientOptions, DriveClient, DriveRegistry, KineticClient};

pub struct ClientRegistry {
	clients: Mutex<HashMap<String, KineticClient>>,
	options: ClientOptions,
	must_exit: watch::Receiver<bool>,
}

impl ClientRegistry {
	pub fn new(options: ClientOptions, must_exit: watch::Receiver<bool>) -> Arc<Self> {
		Arc::new(ClientRegistry {
			clients: Mutex::new(HashMap::new()),
			options,
			must_exit,
		})
	}
}

impl DriveRegistry for ClientRegistry {
	fn get(&self, url: &str) -> Arc<dyn DriveClient> {
		let mut clients = self.clients.lock().unwrap();
		let client = clients.entry(url.to_string()).or_insert_with(|| {
			info!("opening drive connection to {}", url);
			KineticClient::spawn(url, self.options.clone(), self.must_exit.clone())
		});
		Arc::new(client.clone())
	}
}
