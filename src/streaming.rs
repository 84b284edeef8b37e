//! Progress events pushed by the research agent to an async consumer.
//!
//! The producer never blocks: when the bounded queue is full the event is
//! dropped. The consumer pulls with a per-pull timeout so a stalled producer
//! cannot hang it.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Research started.
    Started { query: String },
    /// Strategy chosen from the complexity level.
    Strategy { strategy: String, level: String },
    /// A thinking step finished.
    Thinking { step: usize, status: String },
    /// Queries dispatched to the searcher.
    Searching { queries: Vec<String> },
    /// Evidence count after recording a round.
    Evidence { count: usize },
    /// A piece of the final answer.
    AnswerChunk { text: String },
    /// Research finished.
    Finished { iterations: usize },
}

/// Non-blocking sending half.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSender {
    /// Queue an event; returns `false` if it was dropped.
    pub fn send(&self, event: ProgressEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!(event = ?event, "Progress queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Result of [`ProgressReceiver::next_timeout`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecvOutcome {
    /// An event arrived.
    Event(ProgressEvent),
    /// Nothing arrived in time; the producer may still be alive.
    TimedOut,
    /// Every sender is gone and the queue is drained.
    Closed,
}

/// Receiving half.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressReceiver {
    /// Wait at most `timeout` for the next event.
    pub async fn next_timeout(&mut self, timeout: Duration) -> RecvOutcome {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => RecvOutcome::Event(event),
            Ok(None) => RecvOutcome::Closed,
            Err(_) => RecvOutcome::TimedOut,
        }
    }
}

/// Bounded progress channel.
pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx }, ProgressReceiver { rx })
}
