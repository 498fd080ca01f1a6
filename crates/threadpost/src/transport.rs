//! Transport seams between the router and isolated workers
//!
//! The router never touches threads directly. It asks a [`WorkerSpawner`]
//! for a [`SpawnedWorker`], posts frames through its [`WorkerPort`], and
//! reads [`WorkerEvent`]s from its event channel.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use threadpost_protocol::Frame;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Anything a structured frame can be posted to
pub trait MessageSink: Send + Sync {
    fn post_message(&self, frame: Frame) -> Result<(), TransportError>;
}

/// Controller-side handle to a running worker
pub trait WorkerPort: MessageSink {
    /// Worker name
    fn name(&self) -> &str;

    /// Stop the worker; pending work is abandoned
    fn terminate(&self);

    fn is_terminated(&self) -> bool;
}

/// Failure reported by a worker outside the message protocol
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerFault {
    /// Name of the worker that failed
    pub worker: String,
    /// Human readable description
    pub message: String,
    /// When the fault was observed
    pub occurred_at: DateTime<Utc>,
}

impl WorkerFault {
    pub fn new(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker '{}' failed: {}", self.worker, self.message)
    }
}

/// Event emitted by a worker towards the controller
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Frame posted by the worker
    Message(Frame),
    /// Uncaught failure inside the worker
    Error(WorkerFault),
}

/// Freshly spawned worker: its port plus the receiving end of its events
pub struct SpawnedWorker {
    pub port: Arc<dyn WorkerPort>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl SpawnedWorker {
    pub fn new(port: Arc<dyn WorkerPort>, events: mpsc::UnboundedReceiver<WorkerEvent>) -> Self {
        Self { port, events }
    }

    pub fn name(&self) -> &str {
        self.port.name()
    }
}

impl fmt::Debug for SpawnedWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedWorker")
            .field("name", &self.port.name())
            .field("terminated", &self.port.is_terminated())
            .finish()
    }
}

/// Settings handed to a spawner for each worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpawnOptions {
    /// Worker name
    pub name: String,
    /// Stack size for the worker thread in bytes
    pub stack_size: Option<usize>,
    /// Scripts imported before the worker's own bodies run
    pub scripts: Vec<String>,
    /// Values exposed in the worker scope
    pub primitive_parameters: Vec<Value>,
    /// Controller origin
    pub origin: Option<String>,
}

/// Creates isolated workers from a source url
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, url: &str, options: &SpawnOptions) -> Result<SpawnedWorker, TransportError>;
}

/// Sink that forwards frames into a worker event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    worker: String,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
    pub fn new(worker: impl Into<String>, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            worker: worker.into(),
            events,
        }
    }

    /// Report a fault on the same channel
    pub fn fault(&self, message: impl Into<String>) {
        let fault = WorkerFault::new(self.worker.clone(), message);
        if self.events.send(WorkerEvent::Error(fault)).is_err() {
            tracing::debug!(worker = %self.worker, "Fault dropped, controller is gone");
        }
    }
}

impl MessageSink for EventSink {
    fn post_message(&self, frame: Frame) -> Result<(), TransportError> {
        self.events
            .send(WorkerEvent::Message(frame))
            .map_err(|_| TransportError::closed(self.worker.clone()))
    }
}
