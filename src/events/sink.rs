// src/events/sink.rs
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::PublishedEvent;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("subscriber buffer is full")]
    Full,

    #[error("subscriber has gone away")]
    Closed,

    #[error("delivery failed: {0}")]
    Failed(String),

    #[error("subscriber panicked during delivery")]
    Panicked,
}

/// A consumer of published events, e.g. a dashboard push channel.
///
/// `deliver` runs on the fan-out task and must not block.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver(&self, event: &Arc<PublishedEvent>) -> Result<(), SinkError>;
}

/// Forwards events into a bounded channel, typically drained by a
/// streaming HTTP response.
#[derive(Debug)]
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<Arc<PublishedEvent>>,
}

impl ChannelSink {
    pub fn new(
        name: impl Into<String>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Arc<PublishedEvent>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &Arc<PublishedEvent>) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Writes every event to the log at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, event: &Arc<PublishedEvent>) -> Result<(), SinkError> {
        tracing::debug!(
            kind = ?event.kind,
            backends = ?event.backend_ids,
            timestamp = %event.timestamp,
            "Routing event"
        );
        Ok(())
    }
}
