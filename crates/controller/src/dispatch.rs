//! Event dispatcher: the control loop between the watch source and the reconciler.

use std::future::Future;
use std::time::Duration;

use esk_apply::Reconciler;
use esk_core::{ChangeEvent, EventKind, ReconcileResult};
use esk_kubehub::WatchError;
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Why the control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was requested and the watch source was cancelled.
    Shutdown,
    /// The watch source closed its events channel on its own.
    WatchEnded,
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Shutdown => 0,
            ExitReason::WatchEnded => 1,
        }
    }
}

pub struct Dispatcher {
    reconciler: Reconciler,
    shutdown_grace: Duration,
}

impl Dispatcher {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler, shutdown_grace: Duration::from_secs(5) }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Route one event. `Added` and `Modified` both ensure the dependent
    /// objects; `Deleted` is acknowledged and left alone.
    pub async fn dispatch(&self, ev: ChangeEvent) -> Vec<ReconcileResult> {
        counter!("dispatch_events").increment(1);
        let key = ev.resource.key();
        match ev.kind {
            EventKind::Added | EventKind::Modified => {
                debug!(kind = ?ev.kind, resource = %key, "dispatching");
                self.reconciler.ensure(&ev.resource).await.unwrap_or_default()
            }
            EventKind::Deleted => {
                info!(resource = %key, "resource deleted; dependent objects are left in place");
                Vec::new()
            }
        }
    }

    /// Consume the watch outputs until shutdown resolves or the watch ends.
    ///
    /// Events are handled one at a time. A shutdown request also interrupts a
    /// reconcile pass in flight. On shutdown the source is cancelled and the
    /// events channel is drained until it closes or the grace period runs out.
    pub async fn run<F>(
        &self,
        (mut events, mut errors): (mpsc::Receiver<ChangeEvent>, mpsc::Receiver<WatchError>),
        cancel: oneshot::Sender<()>,
        shutdown: F,
    ) -> ExitReason
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut errors_open = true;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                ev = events.recv() => match ev {
                    // Create-if-absent is idempotent, so an abandoned pass is redone on
                    // the next event for the resource.
                    Some(ev) => tokio::select! {
                        biased;
                        _ = &mut shutdown => {
                            warn!("shutdown requested mid-reconcile; abandoning the pass");
                            break;
                        }
                        _ = self.dispatch(ev) => {}
                    },
                    None => {
                        error!("watch source stopped without a shutdown request");
                        return ExitReason::WatchEnded;
                    }
                },
                err = errors.recv(), if errors_open => match err {
                    Some(e) if e.is_transient() => warn!(error = %e, "watch unavailable"),
                    Some(WatchError::Decode(e)) if !e.is_fatal() => warn!(error = %e, "watched resource skipped"),
                    Some(e) => warn!(error = %e, "watch stream fault"),
                    None => {
                        debug!("watch error channel closed");
                        errors_open = false;
                    }
                },
            }
        }

        info!(grace_secs = self.shutdown_grace.as_secs(), "shutdown requested; cancelling watch");
        let _ = cancel.send(());
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(ev) = events.recv().await {
                debug!(resource = %ev.resource.key(), "dropping event received during shutdown");
            }
        })
        .await;
        if drained.is_err() {
            warn!("watch source did not close within the grace period");
        }
        ExitReason::Shutdown
    }
}
