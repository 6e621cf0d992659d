//! Service bootstrap: configuration to repository to gateway
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use skiff_blob::mem::MemRepository;
use skiff_blob::rawx::RawxRepository;
use skiff_blob::Repository;
use skiff_gateway::GatewayServer;
use skiff_kinetic::blob::KineticRepository;
use skiff_kinetic::discovery::{run_discovery, DriveDirectory};
use skiff_kinetic::registry::ClientRegistry;
use skiff_kinetic::wire::DEFAULT_MAX_FRAME;
use skiff_kinetic::{ClientOptions, DriveRegistry};
use skiff_util::config::{read_config, Config, RepositoryConfig};
use skiff_util::error::Error;
use skiff_util::shutdown::{wait_from, watch_shutdown_signal};

pub async fn run_services(config_files: Vec<PathBuf>) -> Result<(), Error> {
	info!("Loading configuration...");
	let mut configs = Vec::new();
	for path in &config_files {
		let config = read_config(path)
			.map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
		configs.push(config);
	}

	let watch_cancel = watch_shutdown_signal();

	let mut servers = Vec::new();
	for config in configs {
		let bind = config.service.bind;
		let repository = build_repository(&config, &watch_cancel)?;
		info!("Starting {} gateway on {}...", repository.backend(), bind);
		let server = GatewayServer::new(repository, config.service.xattr_prefix.clone());
		servers.push((
			bind,
			tokio::spawn(server.run(bind, wait_from(watch_cancel.clone()))),
		));
	}

	for (bind, handle) in servers {
		match handle.await {
			Ok(Ok(())) => info!("Server on {} exited without error.", bind),
			Ok(Err(e)) => error!("Server on {} exited with error: {}", bind, e),
			Err(e) => error!("Server task on {} failed: {}", bind, e),
		}
	}
	info!("Cleaning up...");
	Ok(())
}

fn build_repository(
	config: &Config,
	watch_cancel: &watch::Receiver<bool>,
) -> Result<Arc<dyn Repository>, Error> {
	match &config.repository {
		RepositoryConfig::Kinetic(kinetic) => {
			let options = ClientOptions {
				salt: kinetic.hmac_salt.clone(),
				rpc_ttl: Duration::from_millis(kinetic.rpc_ttl_ms),
				max_frame: DEFAULT_MAX_FRAME,
			};
			let registry = ClientRegistry::new(options, watch_cancel.clone());
			let mut repository = KineticRepository::new(
				registry.clone(),
				kinetic.targets.clone(),
				kinetic.block_size,
				kinetic.parallel_factor,
			);
			if kinetic.discovery {
				let directory = DriveDirectory::new();
				repository = repository.with_directory(directory.clone());
				let registry = registry as Arc<dyn DriveRegistry>;
				let must_exit = watch_cancel.clone();
				tokio::spawn(async move {
					if let Err(e) = run_discovery(directory, registry, must_exit).await {
						warn!("drive discovery stopped: {}", e);
					}
				});
			}
			Ok(Arc::new(repository))
		}
		RepositoryConfig::Rawx(rawx) => Ok(Arc::new(RawxRepository::new(
			&rawx.host,
			&config.service.xattr_prefix,
		))),
		RepositoryConfig::Mem(_) => Ok(Arc::new(MemRepository::new())),
	}
}
