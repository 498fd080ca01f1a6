//! Request and response messages
//!
//! ```text
//! controller ──► worker   { "__threadpost_message__": true, "messageId", "method"?,
//!                           "execution": { "payload" } | "cancelation": { "reason" } }
//!
//! worker ──► controller   { "__threadpost_message__": true, "messageId",
//!                           "resolved": { "payload": [result?] }
//!                         | "rejected": { "reason" }
//!                         | "worker_cancelation": { "reason" }
//!                         | "progress": { "percentage", "payload"? } }
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::id::MessageId;
use crate::MESSAGE_MARKER;

/// Whether a JSON value carries the protocol marker
pub fn is_tagged(value: &Value) -> bool {
    value
        .get(MESSAGE_MARKER)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Protocol marker, always serialized as `true`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marker;

impl Serialize for Marker {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for Marker {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if bool::deserialize(deserializer)? {
            Ok(Marker)
        } else {
            Err(D::Error::custom("protocol marker must be true"))
        }
    }
}

// ============================================================================
// Controller -> worker
// ============================================================================

/// Message sent from the controller to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "__threadpost_message__")]
    pub marker: Marker,

    #[serde(rename = "messageId")]
    pub message_id: MessageId,

    /// Named handler; `None` targets the default handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBody {
    /// Start executing a call
    Execution {
        #[serde(default)]
        payload: Value,
    },
    /// Ask the worker to cancel a running call
    Cancelation {
        #[serde(default)]
        reason: Value,
    },
}

impl Request {
    pub fn execution(message_id: MessageId, method: Option<String>, payload: Value) -> Self {
        Self {
            marker: Marker,
            message_id,
            method,
            body: RequestBody::Execution { payload },
        }
    }

    pub fn cancelation(message_id: MessageId, method: Option<String>, reason: Value) -> Self {
        Self {
            marker: Marker,
            message_id,
            method,
            body: RequestBody::Cancelation { reason },
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(ProtocolError::Encode)
    }

    /// Decode a request, returning `None` for values without the marker
    pub fn decode(value: &Value) -> Result<Option<Self>> {
        if !is_tagged(value) {
            return Ok(None);
        }
        Self::deserialize(value).map(Some).map_err(ProtocolError::Decode)
    }
}

// ============================================================================
// Worker -> controller
// ============================================================================

/// Message sent from a worker back to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "__threadpost_message__")]
    pub marker: Marker,

    #[serde(rename = "messageId")]
    pub message_id: MessageId,

    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    /// Call finished; `payload` holds zero or one result values
    Resolved {
        #[serde(default)]
        payload: Vec<Value>,
    },
    /// Call failed inside the worker
    Rejected {
        #[serde(default)]
        reason: Value,
    },
    /// Call was canceled, either on request or by the worker itself
    WorkerCancelation {
        #[serde(default)]
        reason: Value,
    },
    /// Intermediate progress; the call stays pending
    Progress {
        percentage: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl ResponseBody {
    /// Everything except progress ends the call
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseBody::Progress { .. })
    }

    /// Wire name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseBody::Resolved { .. } => "resolved",
            ResponseBody::Rejected { .. } => "rejected",
            ResponseBody::WorkerCancelation { .. } => "worker_cancelation",
            ResponseBody::Progress { .. } => "progress",
        }
    }
}

impl Response {
    pub fn new(message_id: MessageId, body: ResponseBody) -> Self {
        Self {
            marker: Marker,
            message_id,
            body,
        }
    }

    pub fn resolved(message_id: MessageId, result: Option<Value>) -> Self {
        Self::new(
            message_id,
            ResponseBody::Resolved {
                payload: result.into_iter().collect(),
            },
        )
    }

    pub fn rejected(message_id: MessageId, reason: Value) -> Self {
        Self::new(message_id, ResponseBody::Rejected { reason })
    }

    pub fn worker_cancelation(message_id: MessageId, reason: Value) -> Self {
        Self::new(message_id, ResponseBody::WorkerCancelation { reason })
    }

    pub fn progress(message_id: MessageId, percentage: f64, payload: Option<Value>) -> Self {
        Self::new(
            message_id,
            ResponseBody::Progress {
                percentage,
                payload,
            },
        )
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(ProtocolError::Encode)
    }

    /// Decode a response, returning `None` for values without the marker
    pub fn decode(value: &Value) -> Result<Option<Self>> {
        if !is_tagged(value) {
            return Ok(None);
        }
        Self::deserialize(value).map(Some).map_err(ProtocolError::Decode)
    }
}
