//! Connector that replays canned connection outcomes.
//!
//! Each `connect()` pops the next step. Once the script is exhausted the
//! connector blocks forever, like a platform that accepted the connection and
//! has nothing to say.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures::StreamExt;
use tokio::time::Instant;

use crate::watch::{ByteStream, Connector, WatchError};

pub enum Step {
    /// Connect fails with the given error.
    Fail(WatchError),
    /// Connect succeeds and the body yields these chunks, then EOF.
    Body(Vec<Bytes>),
    /// Connect succeeds, yields the chunks and then stays open.
    Open(Vec<Bytes>),
    /// Connect never completes.
    Hang,
}

impl Step {
    pub fn body<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Step::Body(chunks.into_iter().map(Into::into).collect())
    }
}

#[derive(Default)]
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    attempts: AtomicUsize,
    connect_times: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self { steps: Mutex::new(steps.into_iter().collect()), ..Default::default() }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Instant of every connect attempt, in order.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<ByteStream, WatchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.connect_times.lock().unwrap_or_else(PoisonError::into_inner).push(Instant::now());
        let step = self.steps.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match step {
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Body(chunks)) => Ok(futures::stream::iter(chunks.into_iter().map(Ok::<Bytes, WatchError>)).boxed()),
            Some(Step::Open(chunks)) => {
                Ok(futures::stream::iter(chunks.into_iter().map(Ok::<Bytes, WatchError>)).chain(futures::stream::pending()).boxed())
            }
            Some(Step::Hang) | None => futures::future::pending().await,
        }
    }

    fn endpoint(&self) -> String {
        String::from("scripted")
    }
}
