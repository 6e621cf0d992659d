//! Process-wide cooperative shutdown signal
//!
//! Every long-lived task loop observes the watch channel returned by
//! [`watch_shutdown_signal`] at its loop head; nothing is ever killed
//! unilaterally.
use tokio::sync::watch;

/// Completes once the shutdown flag has been raised
pub async fn wait_from(mut chan: watch::Receiver<bool>) {
	while !*chan.borrow() {
		if chan.changed().await.is_err() {
			return;
		}
	}
}

#[cfg(unix)]
pub fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::unix::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
		let mut sigterm =
			signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

		// SIGHUP and SIGUSR1/2 are consumed and ignored, SIGPIPE is already
		// ignored by the Rust runtime.
		let mut sighup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");
		let mut sigusr1 =
			signal(SignalKind::user_defined1()).expect("Failed to install SIGUSR1 handler");
		let mut sigusr2 =
			signal(SignalKind::user_defined2()).expect("Failed to install SIGUSR2 handler");

		loop {
			tokio::select! {
				_ = sigint.recv() => {
					info!("Received SIGINT, shutting down.");
					break;
				}
				_ = sigterm.recv() => {
					info!("Received SIGTERM, shutting down.");
					break;
				}
				_ = sighup.recv() => debug!("Ignoring SIGHUP"),
				_ = sigusr1.recv() => debug!("Ignoring SIGUSR1"),
				_ = sigusr2.recv() => debug!("Ignoring SIGUSR2"),
			}
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}

#[cfg(not(unix))]
pub fn watch_shutdown_signal() -> watch::Receiver<bool> {
	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		tokio::signal::ctrl_c()
			.await
			.expect("Failed to install Ctrl-C handler");
		info!("Received Ctrl-C, shutting down.");
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}
