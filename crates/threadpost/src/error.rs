// Error types for routing, calls, transports and the worker runtime

use serde_json::Value;
use thiserror::Error;
use threadpost_protocol::{MessageId, MessageStatus, ProtocolError};

use crate::runtime::Transition;

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;

/// Outcome of an individual call, as seen by the caller
///
/// Cloneable because a call's outcome is shared between the caller's handle
/// and router operations that wait on it (cancel-all).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// Worker rejected the call; the reason is passed through unmodified
    #[error("call rejected: {0}")]
    Rejected(Value),

    /// Call was canceled by the caller, the worker, or a reboot
    #[error("call canceled: {0}")]
    Canceled(Value),

    /// Worker result did not match the expected type
    #[error("failed to decode call result: {0}")]
    Decode(String),

    /// Call was discarded without an outcome (router dropped or disposed mid-flight)
    #[error("call dropped before it settled")]
    Dropped,
}

impl CallError {
    /// Rejection or cancellation reason, if any
    pub fn reason(&self) -> Option<&Value> {
        match self {
            CallError::Rejected(reason) | CallError::Canceled(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, CallError::Canceled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, CallError::Rejected(_))
    }

    /// Reason as a JSON value, falling back to the error text
    pub fn into_reason(self) -> Value {
        match self {
            CallError::Rejected(reason) | CallError::Canceled(reason) => reason,
            other => Value::String(other.to_string()),
        }
    }
}

/// Errors from the controller-side router
#[derive(Debug, Error)]
pub enum RouterError {
    /// Router was disposed; no further calls are accepted
    #[error("router has been disposed")]
    Disposed,

    /// No tokio runtime to build on, or no live worker to route to
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker could not be spawned or reached
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl RouterError {
    /// Create a runtime error
    pub fn runtime(msg: impl Into<String>) -> Self {
        RouterError::Runtime(msg.into())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A pool needs at least one worker
    #[error("max_workers must be at least 1")]
    ZeroWorkers,

    /// Instance pool sources must not be empty
    #[error("instance pool is empty")]
    EmptyInstancePool,

    /// Inline sources need at least one body
    #[error("inline source has no worker bodies")]
    EmptyInlineSource,
}

/// Errors raised by worker transports
#[derive(Debug, Error)]
pub enum TransportError {
    /// Worker was terminated or its channel closed
    #[error("worker '{0}' is closed")]
    Closed(String),

    /// Worker could not be started
    #[error("failed to spawn worker '{name}': {reason}")]
    Spawn { name: String, reason: String },

    /// Worker source could not be resolved
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
}

impl TransportError {
    /// Create a closed-channel error
    pub fn closed(worker: impl Into<String>) -> Self {
        TransportError::Closed(worker.into())
    }

    /// Create a spawn error
    pub fn spawn(name: impl Into<String>, reason: impl Into<String>) -> Self {
        TransportError::Spawn {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Script registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// No bodies are registered under the url
    #[error("no script registered at '{0}'")]
    NotFound(String),
}

/// Errors raised inside a worker context
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Execution request targeted a handler that was never registered
    #[error("you didn't define a message-callback{}", method_suffix(.method))]
    UnregisteredHandler { method: Option<String> },

    /// Message was already settled
    #[error("cannot {attempted} message {message_id}: already {current}")]
    InvalidTransition {
        message_id: MessageId,
        current: MessageStatus,
        attempted: Transition,
        method: Option<String>,
        /// Payload the message was received with
        payload: Value,
        /// Value passed to the refused operation
        attempted_payload: Value,
    },

    /// Response could not be delivered
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Imported script could not be resolved
    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    /// Worker body or imported script failed
    #[error("worker body failed: {0}")]
    Body(String),
}

fn method_suffix(method: &Option<String>) -> String {
    method
        .as_ref()
        .map(|m| format!(" for method '{m}'"))
        .unwrap_or_default()
}

impl RuntimeError {
    /// Create an unregistered handler error
    pub fn unregistered(method: Option<String>) -> Self {
        RuntimeError::UnregisteredHandler { method }
    }

    /// Create a body failure error
    pub fn body(msg: impl Into<String>) -> Self {
        RuntimeError::Body(msg.into())
    }
}
