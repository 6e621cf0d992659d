//! skiff daemon: one blob gateway service per configuration file
#[macro_use]
extern crate tracing;

mod server;

use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "skiff", about = "Content-addressable blob storage gateway")]
struct Opt {
	/// JSON configuration files, one per service
	#[structopt(parse(from_os_str), required = true)]
	config_file: Vec<PathBuf>,
}

fn main() {
	if std::env::var("RUST_LOG").is_err() {
		std::env::set_var("RUST_LOG", "skiff=info")
	}
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
		.init();

	let opt = Opt::from_args();

	// One OS thread per process: every conversation, RPC and back-end
	// connection is a cooperative task on this runtime.
	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.expect("failed to build the runtime");

	if let Err(e) = runtime.block_on(server::run_services(opt.config_file)) {
		error!("{}", e);
		std::process::exit(1);
	}
}
