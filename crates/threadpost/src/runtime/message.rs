//! Live worker-side message
//!
//! A [`WorkerMessage`] is created for every execution request a worker
//! receives. Handlers settle it exactly once with `resolve`, `reject` or
//! `cancel`, optionally reporting progress before that. Every transition is
//! posted back to the controller; anything after the first terminal
//! transition is refused and logged.

use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use threadpost_protocol::{Frame, MessageId, MessageStatus, Response, ResponseBody, TransferList};
use tracing::{debug, error};

use super::{RuntimeShared, WorkerRuntime};
use crate::error::{RuntimeError, TransportError};

type ResolveListener = Arc<dyn Fn(Option<&Value>) + Send + Sync>;
type ReasonListener = Arc<dyn Fn(&Value) + Send + Sync>;
type ProgressListener = Arc<dyn Fn(f64, Option<&Value>) + Send + Sync>;
type FinalizeListener = Arc<dyn Fn() + Send + Sync>;

/// Operation attempted on a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Resolve,
    Reject,
    Cancel,
    Progress,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::Resolve => "resolve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
            Transition::Progress => "report progress on",
        })
    }
}

/// Which lifecycle event a subscription listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Resolve,
    Reject,
    Cancel,
    Progress,
    Finalize,
}

#[derive(Clone)]
enum Listener {
    Resolve(ResolveListener),
    Reject(ReasonListener),
    Cancel(ReasonListener),
    Progress(ProgressListener),
    Finalize(FinalizeListener),
}

impl Listener {
    fn kind(&self) -> SubscriptionKind {
        match self {
            Listener::Resolve(_) => SubscriptionKind::Resolve,
            Listener::Reject(_) => SubscriptionKind::Reject,
            Listener::Cancel(_) => SubscriptionKind::Cancel,
            Listener::Progress(_) => SubscriptionKind::Progress,
            Listener::Finalize(_) => SubscriptionKind::Finalize,
        }
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

struct MessageInner {
    message_id: MessageId,
    method: Option<String>,
    payload: Value,
    target_origin: Option<String>,
    status: Mutex<MessageStatus>,
    listeners: Mutex<Listeners>,
    runtime: Weak<RuntimeShared>,
}

/// Handle returned by the `on_*` subscription methods
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: SubscriptionKind,
    message: Weak<MessageInner>,
}

impl Subscription {
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Stop listening; calling it again is a no-op
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.message.upgrade() {
            inner
                .listeners
                .lock()
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for MessageInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageInner")
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

/// Message being processed inside a worker
#[derive(Clone)]
pub struct WorkerMessage {
    inner: Arc<MessageInner>,
}

impl WorkerMessage {
    pub(crate) fn new(
        message_id: MessageId,
        method: Option<String>,
        payload: Value,
        target_origin: Option<String>,
        runtime: Weak<RuntimeShared>,
    ) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                message_id,
                method,
                payload,
                target_origin,
                status: Mutex::new(MessageStatus::Pending),
                listeners: Mutex::new(Listeners::default()),
                runtime,
            }),
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.inner.message_id
    }

    pub fn method(&self) -> Option<&str> {
        self.inner.method.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.inner.payload
    }

    /// Decode the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.inner.payload.clone())
    }

    /// Origin responses are addressed to
    pub fn target_origin(&self) -> Option<&str> {
        self.inner.target_origin.as_deref()
    }

    pub fn status(&self) -> MessageStatus {
        *self.inner.status.lock()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == MessageStatus::Pending
    }

    /// Runtime that received the message, while the worker is alive
    pub fn runtime(&self) -> Option<WorkerRuntime> {
        self.inner.runtime.upgrade().map(WorkerRuntime::from_shared)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Resolve with a single result value
    pub fn resolve(&self, result: impl Into<Value>) -> Result<(), RuntimeError> {
        self.resolve_with_transfer(Some(result.into()), Vec::new())
    }

    /// Resolve without a result
    pub fn resolve_empty(&self) -> Result<(), RuntimeError> {
        self.resolve_with_transfer(None, Vec::new())
    }

    pub fn resolve_with_transfer(
        &self,
        result: Option<Value>,
        transfer: TransferList,
    ) -> Result<(), RuntimeError> {
        let body = ResponseBody::Resolved {
            payload: result.into_iter().collect(),
        };
        self.settle(Transition::Resolve, MessageStatus::Resolved, body, transfer)
    }

    pub fn reject(&self, reason: impl Into<Value>) -> Result<(), RuntimeError> {
        self.reject_with_transfer(reason.into(), Vec::new())
    }

    pub fn reject_with_transfer(
        &self,
        reason: Value,
        transfer: TransferList,
    ) -> Result<(), RuntimeError> {
        let body = ResponseBody::Rejected { reason };
        self.settle(Transition::Reject, MessageStatus::Rejected, body, transfer)
    }

    pub fn cancel(&self, reason: impl Into<Value>) -> Result<(), RuntimeError> {
        self.cancel_with_transfer(reason.into(), Vec::new())
    }

    pub fn cancel_with_transfer(
        &self,
        reason: Value,
        transfer: TransferList,
    ) -> Result<(), RuntimeError> {
        let body = ResponseBody::WorkerCancelation { reason };
        self.settle(Transition::Cancel, MessageStatus::Canceled, body, transfer)
    }

    /// Stream progress to the caller; the message stays pending
    pub fn report_progress(
        &self,
        percentage: f64,
        payload: Option<Value>,
    ) -> Result<(), RuntimeError> {
        self.report_progress_with_transfer(percentage, payload, Vec::new())
    }

    pub fn report_progress_with_transfer(
        &self,
        percentage: f64,
        payload: Option<Value>,
        transfer: TransferList,
    ) -> Result<(), RuntimeError> {
        let body = ResponseBody::Progress {
            percentage,
            payload,
        };
        self.ensure_pending(Transition::Progress, &body)?;

        let posted = self.post(body.clone(), transfer);
        self.guarded(|| self.notify(&body));
        posted
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn on_resolve<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.subscribe(Listener::Resolve(Arc::new(callback)))
    }

    pub fn on_reject<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(Listener::Reject(Arc::new(callback)))
    }

    pub fn on_cancel<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(Listener::Cancel(Arc::new(callback)))
    }

    pub fn on_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(f64, Option<&Value>) + Send + Sync + 'static,
    {
        self.subscribe(Listener::Progress(Arc::new(callback)))
    }

    /// Runs after any terminal transition, after the kind-specific listeners
    pub fn on_finalize<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Listener::Finalize(Arc::new(callback)))
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let kind = listener.kind();
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, listener));

        Subscription {
            id,
            kind,
            message: Arc::downgrade(&self.inner),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_pending(
        &self,
        attempted: Transition,
        body: &ResponseBody,
    ) -> Result<(), RuntimeError> {
        let current = self.status();
        if current == MessageStatus::Pending {
            return Ok(());
        }
        Err(self.invalid_transition(current, attempted, body))
    }

    fn invalid_transition(
        &self,
        current: MessageStatus,
        attempted: Transition,
        body: &ResponseBody,
    ) -> RuntimeError {
        let attempted_payload = attempted_value(body);
        error!(
            message_id = %self.inner.message_id,
            method = ?self.inner.method,
            current = %current,
            attempted = %attempted,
            attempted_payload = %attempted_payload,
            payload = %self.inner.payload,
            "Message already settled"
        );

        RuntimeError::InvalidTransition {
            message_id: self.inner.message_id.clone(),
            current,
            attempted,
            method: self.inner.method.clone(),
            payload: self.inner.payload.clone(),
            attempted_payload,
        }
    }

    fn settle(
        &self,
        attempted: Transition,
        target: MessageStatus,
        body: ResponseBody,
        transfer: TransferList,
    ) -> Result<(), RuntimeError> {
        {
            let mut status = self.inner.status.lock();
            if *status != MessageStatus::Pending {
                let current = *status;
                drop(status);
                return Err(self.invalid_transition(current, attempted, &body));
            }
            *status = target;
        }

        debug!(
            message_id = %self.inner.message_id,
            status = %target,
            "Settling message"
        );

        let posted = self.post(body.clone(), transfer);
        self.guarded(|| {
            self.notify(&body);
            self.notify_finalize();
        });
        self.detach();
        posted
    }

    fn post(&self, body: ResponseBody, transfer: TransferList) -> Result<(), RuntimeError> {
        let runtime = self
            .inner
            .runtime
            .upgrade()
            .ok_or_else(|| TransportError::closed("runtime"))?;

        let data = Response::new(self.inner.message_id.clone(), body).to_value()?;
        let frame = Frame::new(data)
            .with_transfer(transfer)
            .with_origin(self.inner.target_origin.clone());

        runtime.sink.post_message(frame)?;
        Ok(())
    }

    /// Run listeners; a panicking listener still removes the message first
    fn guarded(&self, f: impl FnOnce()) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
            self.detach();
            resume_unwind(panic);
        }
    }

    fn snapshot(&self) -> Vec<Listener> {
        self.inner
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn notify(&self, body: &ResponseBody) {
        for listener in self.snapshot() {
            match (&listener, body) {
                (Listener::Resolve(f), ResponseBody::Resolved { payload }) => f(payload.first()),
                (Listener::Reject(f), ResponseBody::Rejected { reason }) => f(reason),
                (Listener::Cancel(f), ResponseBody::WorkerCancelation { reason }) => f(reason),
                (
                    Listener::Progress(f),
                    ResponseBody::Progress {
                        percentage,
                        payload,
                    },
                ) => f(*percentage, payload.as_ref()),
                _ => {}
            }
        }
    }

    fn notify_finalize(&self) {
        for listener in self.snapshot() {
            if let Listener::Finalize(f) = listener {
                f();
            }
        }
    }

    fn detach(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.messages.lock().remove(&self.inner.message_id);
        }
    }
}

/// Value handed to a refused transition
fn attempted_value(body: &ResponseBody) -> Value {
    match body {
        ResponseBody::Resolved { payload } => payload.first().cloned().unwrap_or(Value::Null),
        ResponseBody::Rejected { reason } | ResponseBody::WorkerCancelation { reason } => {
            reason.clone()
        }
        ResponseBody::Progress {
            percentage,
            payload,
        } => json!({ "percentage": percentage, "payload": payload }),
    }
}

impl fmt::Debug for WorkerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerMessage")
            .field("message_id", &self.inner.message_id)
            .field("method", &self.inner.method)
            .field("status", &self.status())
            .finish()
    }
}
