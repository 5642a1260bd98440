//! Status telemetry
//!
//! Every poll's full model document is republished to a fixed topic.
//! Publishing is best effort: a failed publish is logged and nothing else
//! in the watchdog reacts to it.

#[cfg(feature = "mqtt")]
pub mod mqtt;

use crate::device::status::ConnectivitySnapshot;
use crate::error::{Result, RouterError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Anything that can take a payload for a topic
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Sink used when no broker is configured: just logs what would be sent
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        info!("Telemetry for {} ({} bytes, not forwarded)", topic, payload.len());
        Ok(())
    }
}

/// Serializes snapshots and hands them to a sink
pub struct TelemetryPublisher {
    sink: Arc<dyn TelemetrySink>,
    topic: String,
    redact: Vec<String>,
}

impl TelemetryPublisher {
    pub fn new(sink: Arc<dyn TelemetrySink>, topic: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
            redact: Vec::new(),
        }
    }

    /// Remove these dotted paths (e.g. "session", "sim.pin") before publishing
    pub fn with_redactions(mut self, paths: Vec<String>) -> Self {
        self.redact = paths;
        self
    }

    /// The bytes that go on the wire for this snapshot
    pub fn encode(&self, snapshot: &ConnectivitySnapshot) -> Result<Vec<u8>> {
        let result = if self.redact.is_empty() {
            serde_json::to_vec(snapshot.document())
        } else {
            let mut document = snapshot.document().clone();
            for path in &self.redact {
                remove_path(&mut document, path);
            }
            serde_json::to_vec(&document)
        };
        result.map_err(|e| RouterError::PublishFailed(format!("cannot serialize status: {}", e)))
    }

    pub async fn publish(&self, snapshot: &ConnectivitySnapshot) -> Result<()> {
        let payload = self.encode(snapshot)?;
        debug!("Publishing {} bytes to {}", payload.len(), self.topic);
        self.sink.publish(&self.topic, payload).await?;
        info!("Published status to {}", self.topic);
        Ok(())
    }
}

/// Remove a dotted path from a JSON object; missing paths are ignored
fn remove_path(document: &mut serde_json::Value, path: &str) {
    let mut parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut node = document;
    for part in parts {
        match node.get_mut(part) {
            Some(child) => node = child,
            None => return,
        }
    }
    if let Some(object) = node.as_object_mut() {
        object.remove(last);
    }
}
