//! esk controller: wires the watch source to the reconciler and owns the
//! process lifecycle (shutdown, exit reason).

#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;

use esk_apply::{ObjectApi, Reconciler};
use esk_kubehub::{Connector, WatchOptions, WatchSource};
use tokio::sync::oneshot;
use tracing::info;

pub mod config;
pub mod dispatch;
pub mod signal;

pub use config::Config;
pub use dispatch::{Dispatcher, ExitReason};
pub use signal::shutdown_signal;

/// Start watching through `connector` and dispatch until `shutdown` resolves
/// or the watch ends.
pub async fn run_controller<C, F>(connector: C, api: Arc<dyn ObjectApi>, cfg: &Config, shutdown: F) -> ExitReason
where
    C: Connector,
    F: Future<Output = ()>,
{
    let opts = WatchOptions { backoff: cfg.watch_backoff, ..WatchOptions::default() };
    let source = WatchSource::new(connector, opts);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let outputs = source.start(cancel_rx);

    let dispatcher = Dispatcher::new(Reconciler::new(api, cfg.builder.clone())).with_shutdown_grace(cfg.shutdown_grace);
    info!(image = %cfg.builder.image, "controller running");
    let reason = dispatcher.run(outputs, cancel_tx, shutdown).await;
    info!(?reason, code = reason.exit_code(), "controller stopped");
    reason
}
