//! Watch source: owns the connect / decode / reconnect loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use esk_core::ChangeEvent;
use futures::stream::BoxStream;
use futures::StreamExt;
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::decode::{decode, DecodeError};

/// Raw body of one watch connection.
pub type ByteStream = BoxStream<'static, Result<Bytes, WatchError>>;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch connect failed: {0}")]
    Connect(String),
    #[error("watch endpoint returned status {0}")]
    Status(u16),
    #[error("watch body read failed: {0}")]
    Read(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl WatchError {
    /// Transient faults are retried after the backoff; the rest reconnect at once.
    pub fn is_transient(&self) -> bool {
        matches!(self, WatchError::Connect(_) | WatchError::Status(_))
    }
}

/// Opens one streaming connection to the watch endpoint.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<ByteStream, WatchError>;

    /// Human readable endpoint for logs.
    fn endpoint(&self) -> String {
        String::from("<watch>")
    }
}

#[async_trait::async_trait]
impl<C: Connector> Connector for Arc<C> {
    async fn connect(&self) -> Result<ByteStream, WatchError> {
        self.as_ref().connect().await
    }

    fn endpoint(&self) -> String {
        self.as_ref().endpoint()
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Delay before retrying a failed connect or a non-success status.
    pub backoff: Duration,
    pub channel_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { backoff: Duration::from_secs(5), channel_capacity: 1 }
    }
}

pub struct WatchSource<C> {
    connector: C,
    opts: WatchOptions,
}

impl<C: Connector> WatchSource<C> {
    pub fn new(connector: C, opts: WatchOptions) -> Self {
        Self { connector, opts }
    }

    /// Spawn the watch loop. Both receivers close once `cancel` fires (or its
    /// sender is dropped); nothing is sent after that.
    pub fn start(self, cancel: oneshot::Receiver<()>) -> (mpsc::Receiver<ChangeEvent>, mpsc::Receiver<WatchError>) {
        let cap = self.opts.channel_capacity.max(1);
        let (events_tx, events_rx) = mpsc::channel::<ChangeEvent>(cap);
        let (errors_tx, errors_rx) = mpsc::channel::<WatchError>(cap);
        tokio::spawn(self.run(events_tx, errors_tx, cancel));
        (events_rx, errors_rx)
    }

    async fn run(self, events: mpsc::Sender<ChangeEvent>, errors: mpsc::Sender<WatchError>, mut cancel: oneshot::Receiver<()>) {
        let endpoint = self.connector.endpoint();
        info!(endpoint = %endpoint, backoff_secs = self.opts.backoff.as_secs(), "watch source started");
        // Dropping the pump abandons any in-flight connect, read or backoff.
        tokio::select! {
            _ = &mut cancel => info!(endpoint = %endpoint, "watch source cancelled"),
            _ = self.pump(&events, &errors) => warn!(endpoint = %endpoint, "event receiver gone; watch source exiting"),
        }
        drop(events);
        drop(errors);
        debug!("watch channels closed");
    }

    /// Runs until the events receiver goes away.
    async fn pump(&self, events: &mpsc::Sender<ChangeEvent>, errors: &mpsc::Sender<WatchError>) {
        loop {
            counter!("watch_connect_attempts").increment(1);
            debug!("watch connecting");
            let body = match self.connector.connect().await {
                Ok(body) => body,
                Err(e) => {
                    counter!("watch_connect_err").increment(1);
                    warn!(error = %e, backoff_secs = self.opts.backoff.as_secs(), "watch connect failed; retrying after backoff");
                    let _ = errors.send(e).await;
                    tokio::time::sleep(self.opts.backoff).await;
                    continue;
                }
            };
            info!("watch stream opened");
            let stream = decode(body);
            futures::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(ev) => {
                        counter!("watch_events").increment(1);
                        debug!(kind = ?ev.kind, resource = %ev.resource.key(), "watch event decoded");
                        if events.send(ev).await.is_err() {
                            return;
                        }
                    }
                    Err(e) if !e.is_fatal() => {
                        counter!("watch_skipped_events").increment(1);
                        warn!(error = %e, "skipping undecodable resource; stream kept open");
                        let _ = errors.send(WatchError::Decode(e)).await;
                    }
                    Err(e) => {
                        counter!("watch_decode_err").increment(1);
                        warn!(error = %e, "watch stream fault; reconnecting");
                        let _ = errors.send(WatchError::Decode(e)).await;
                        break;
                    }
                }
            }
            debug!("watch stream closed; reconnecting");
            // A peer that closes every body at once must not starve the runtime.
            tokio::task::yield_now().await;
        }
    }
}
