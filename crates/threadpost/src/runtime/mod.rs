//! Worker-side message runtime
//!
//! One [`WorkerRuntime`] lives inside every worker. It owns the table of
//! live messages and the method dispatch table, and turns each inbound
//! frame into handler invocations.
//!
//! ```text
//!  inbound frame ──► dispatch ──┬── execution  ──► WorkerMessage ──► handler
//!                               │                        │
//!                               │                        └─► resolve / reject / cancel / progress
//!                               │                                   │
//!                               └── cancelation ──► message.cancel  ▼
//!                                                              MessageSink ──► controller
//! ```

mod message;

pub use message::{Subscription, SubscriptionKind, Transition, WorkerMessage};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use threadpost_protocol::{Frame, MessageId, Request, RequestBody, TransferList};
use tracing::{debug, trace, warn};

use crate::error::RuntimeError;
use crate::transport::MessageSink;

/// Handler invoked for an execution request
///
/// Returning an error rejects the message if the handler left it pending.
pub type MessageHandler =
    Arc<dyn Fn(WorkerMessage, &InboundEvent) -> anyhow::Result<()> + Send + Sync>;

/// Raw event that produced a message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundEvent {
    /// Full frame body
    pub data: Value,
    /// Buffers moved with the frame
    pub transfer: TransferList,
    /// Sender origin
    pub origin: Option<String>,
}

/// Services the hosting worker provides to its runtime
pub trait WorkerHost: Send + Sync {
    /// Run the scripts published under `urls` inside this worker
    fn import_scripts(&self, runtime: &WorkerRuntime, urls: &[String]) -> Result<(), RuntimeError>;

    /// Stop the worker
    fn close(&self);
}

#[derive(Default)]
struct Handlers {
    default: Option<MessageHandler>,
    methods: HashMap<String, MessageHandler>,
}

pub(crate) struct RuntimeShared {
    sink: Arc<dyn MessageSink>,
    host: Arc<dyn WorkerHost>,
    messages: Mutex<HashMap<MessageId, WorkerMessage>>,
    handlers: RwLock<Handlers>,
}

/// Message runtime injected into a worker
#[derive(Clone)]
pub struct WorkerRuntime {
    shared: Arc<RuntimeShared>,
}

impl WorkerRuntime {
    pub fn new(sink: Arc<dyn MessageSink>, host: Arc<dyn WorkerHost>) -> Self {
        Self {
            shared: Arc::new(RuntimeShared {
                sink,
                host,
                messages: Mutex::new(HashMap::new()),
                handlers: RwLock::new(Handlers::default()),
            }),
        }
    }

    fn from_shared(shared: Arc<RuntimeShared>) -> Self {
        Self { shared }
    }

    /// Register the handler for requests without a method
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(WorkerMessage, &InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.handlers.write().default = Some(Arc::new(handler));
    }

    /// Register the handler for a named method, replacing any previous one
    pub fn on_method<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(WorkerMessage, &InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .methods
            .insert(method.into(), Arc::new(handler));
    }

    /// Load additional scripts into this worker
    pub fn import_scripts<I, S>(&self, urls: I) -> Result<(), RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        self.shared.host.import_scripts(self, &urls)
    }

    /// Reject every live message with "worker closed" and stop the worker
    pub fn close(&self) {
        let pending: Vec<WorkerMessage> = self.shared.messages.lock().values().cloned().collect();

        for message in pending {
            if let Err(e) = message.reject("worker closed") {
                debug!(message_id = %message.message_id(), error = %e, "Could not reject on close");
            }
        }

        self.shared.host.close();
    }

    /// Live message by id
    pub fn message(&self, message_id: &MessageId) -> Option<WorkerMessage> {
        self.shared.messages.lock().get(message_id).cloned()
    }

    /// Number of live messages
    pub fn pending_len(&self) -> usize {
        self.shared.messages.lock().len()
    }

    /// Handle one inbound frame
    ///
    /// Frames without the protocol marker are ignored. An execution request
    /// for a method with no handler yields [`RuntimeError::UnregisteredHandler`].
    pub fn dispatch(&self, frame: Frame) -> Result<(), RuntimeError> {
        let Some(request) = Request::decode(&frame.data)? else {
            trace!("Ignoring untagged frame");
            return Ok(());
        };

        let Request {
            message_id,
            method,
            body,
            ..
        } = request;

        match body {
            RequestBody::Cancelation { reason } => {
                match self.message(&message_id) {
                    Some(message) => message.cancel(reason)?,
                    None => debug!(%message_id, "Cancelation for unknown message"),
                }
                Ok(())
            }
            RequestBody::Execution { payload } => {
                let message = WorkerMessage::new(
                    message_id.clone(),
                    method.clone(),
                    payload,
                    frame.origin.clone(),
                    Arc::downgrade(&self.shared),
                );
                self.shared
                    .messages
                    .lock()
                    .insert(message_id.clone(), message.clone());

                let handler = {
                    let handlers = self.shared.handlers.read();
                    match &method {
                        Some(name) => handlers.methods.get(name).cloned(),
                        None => handlers.default.clone(),
                    }
                };

                let Some(handler) = handler else {
                    self.shared.messages.lock().remove(&message_id);
                    return Err(RuntimeError::unregistered(method));
                };

                debug!(%message_id, method = ?method, "Executing message");

                let event = InboundEvent {
                    data: frame.data,
                    transfer: frame.transfer,
                    origin: frame.origin,
                };

                if let Err(err) = handler(message.clone(), &event) {
                    if message.is_pending() {
                        message.reject(format!("{err:#}"))?;
                    } else {
                        warn!(%message_id, error = %err, "Handler failed after settling");
                    }
                }

                Ok(())
            }
        }
    }
}

impl fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.shared.handlers.read();
        f.debug_struct("WorkerRuntime")
            .field("default_handler", &handlers.default.is_some())
            .field("methods", &handlers.methods.keys().collect::<Vec<_>>())
            .field("pending", &self.shared.messages.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;
    use threadpost_protocol::{MessageStatus, Response, ResponseBody};

    use crate::error::TransportError;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Frame>>,
    }

    impl RecordingSink {
        fn responses(&self) -> Vec<Response> {
            self.frames
                .lock()
                .iter()
                .map(|f| Response::decode(&f.data).unwrap().unwrap())
                .collect()
        }
    }

    impl MessageSink for RecordingSink {
        fn post_message(&self, frame: Frame) -> Result<(), TransportError> {
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestHost {
        closed: AtomicUsize,
        imported: Mutex<Vec<String>>,
    }

    impl WorkerHost for TestHost {
        fn import_scripts(&self, _: &WorkerRuntime, urls: &[String]) -> Result<(), RuntimeError> {
            self.imported.lock().extend(urls.iter().cloned());
            Ok(())
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (WorkerRuntime, Arc<RecordingSink>, Arc<TestHost>) {
        let sink = Arc::new(RecordingSink::default());
        let host = Arc::new(TestHost::default());
        let runtime = WorkerRuntime::new(sink.clone(), host.clone());
        (runtime, sink, host)
    }

    fn execution(id: &str, method: Option<&str>, payload: Value) -> Frame {
        let request = Request::execution(id.into(), method.map(String::from), payload);
        Frame::new(request.to_value().unwrap())
    }

    fn cancelation(id: &str, reason: Value) -> Frame {
        let request = Request::cancelation(id.into(), None, reason);
        Frame::new(request.to_value().unwrap())
    }

    #[test]
    fn test_default_handler_resolves() {
        let (runtime, sink, _) = setup();
        runtime.on_message(|message, _| {
            let n: i64 = message.payload_as()?;
            message.resolve(n + 2)?;
            Ok(())
        });

        runtime.dispatch(execution("a", None, json!(2))).unwrap();

        let responses = sink.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(
            responses[0].body,
            ResponseBody::Resolved {
                payload: vec![json!(4)]
            }
        );
        assert_eq!(runtime.pending_len(), 0);
    }

    #[test]
    fn test_method_routing() {
        let (runtime, sink, _) = setup();
        runtime.on_message(|message, _| {
            message.resolve("default")?;
            Ok(())
        });
        runtime.on_method("greet", |message, _| {
            message.resolve(format!("Hello {}!", message.payload().as_str().unwrap_or("")))?;
            Ok(())
        });

        runtime.dispatch(execution("a", Some("greet"), json!("Ana"))).unwrap();
        runtime.dispatch(execution("b", None, Value::Null)).unwrap();

        let responses = sink.responses();
        assert_eq!(responses[0].message_id.as_str(), "a");
        assert_eq!(
            responses[0].body,
            ResponseBody::Resolved {
                payload: vec![json!("Hello Ana!")]
            }
        );
        assert_eq!(
            responses[1].body,
            ResponseBody::Resolved {
                payload: vec![json!("default")]
            }
        );
    }

    #[test]
    fn test_reregistering_replaces_handler() {
        let (runtime, sink, _) = setup();
        runtime.on_method("m", |message, _| {
            message.resolve(1)?;
            Ok(())
        });
        runtime.on_method("m", |message, _| {
            message.resolve(2)?;
            Ok(())
        });

        runtime.dispatch(execution("a", Some("m"), Value::Null)).unwrap();
        assert_eq!(
            sink.responses()[0].body,
            ResponseBody::Resolved {
                payload: vec![json!(2)]
            }
        );
    }

    #[test]
    fn test_unregistered_method() {
        let (runtime, sink, _) = setup();

        let err = runtime
            .dispatch(execution("a", Some("missing"), Value::Null))
            .unwrap_err();

        assert!(matches!(
            err,
            RuntimeError::UnregisteredHandler { method: Some(ref m) } if m == "missing"
        ));
        assert!(sink.responses().is_empty());
        assert_eq!(runtime.pending_len(), 0);
    }

    #[test]
    fn test_untagged_frames_are_ignored() {
        let (runtime, sink, _) = setup();
        runtime.dispatch(Frame::new(json!({"type": "ping"}))).unwrap();
        assert!(sink.responses().is_empty());
    }

    #[test]
    fn test_cancelation_runs_on_cancel() {
        let (runtime, sink, _) = setup();
        let canceled = Arc::new(Mutex::new(None));
        let seen = canceled.clone();

        runtime.on_message(move |message, _| {
            let seen = seen.clone();
            message.on_cancel(move |reason| *seen.lock() = Some(reason.clone()));
            Ok(())
        });

        runtime.dispatch(execution("a", None, Value::Null)).unwrap();
        assert_eq!(runtime.pending_len(), 1);

        runtime.dispatch(cancelation("a", json!("stop"))).unwrap();

        assert_eq!(*canceled.lock(), Some(json!("stop")));
        assert_eq!(
            sink.responses()[0].body,
            ResponseBody::WorkerCancelation {
                reason: json!("stop")
            }
        );
        assert_eq!(runtime.pending_len(), 0);
    }

    #[test]
    fn test_cancelation_for_unknown_message_is_ignored() {
        let (runtime, sink, _) = setup();
        runtime.dispatch(cancelation("nope", json!("x"))).unwrap();
        assert!(sink.responses().is_empty());
    }

    #[test]
    fn test_handler_error_rejects_pending_message() {
        let (runtime, sink, _) = setup();
        runtime.on_message(|_, _| anyhow::bail!("bad input"));

        runtime.dispatch(execution("a", None, Value::Null)).unwrap();

        assert_eq!(
            sink.responses()[0].body,
            ResponseBody::Rejected {
                reason: json!("bad input")
            }
        );
    }

    #[test]
    fn test_close_rejects_pending_and_stops_host() {
        let (runtime, sink, host) = setup();
        runtime.on_message(|_, _| Ok(()));

        runtime.dispatch(execution("a", None, Value::Null)).unwrap();
        runtime.dispatch(execution("b", None, Value::Null)).unwrap();
        runtime.close();

        let responses = sink.responses();
        assert_eq!(responses.len(), 2);
        for response in responses {
            assert_eq!(
                response.body,
                ResponseBody::Rejected {
                    reason: json!("worker closed")
                }
            );
        }
        assert_eq!(host.closed.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.pending_len(), 0);
    }

    #[test]
    fn test_import_scripts_delegates_to_host() {
        let (runtime, _, host) = setup();
        runtime.import_scripts(["a.js", "b.js"]).unwrap();
        assert_eq!(*host.imported.lock(), vec!["a.js", "b.js"]);
    }

    #[test]
    fn test_responses_echo_request_origin() {
        let (runtime, sink, _) = setup();
        runtime.on_message(|message, event| {
            assert_eq!(event.origin.as_deref(), Some("app://main"));
            message.resolve_empty()?;
            Ok(())
        });

        let frame = execution("a", None, Value::Null).with_origin(Some("app://main".into()));
        runtime.dispatch(frame).unwrap();

        assert_eq!(
            sink.frames.lock()[0].origin.as_deref(),
            Some("app://main")
        );
    }

    // ========================================================================
    // Message state machine
    // ========================================================================

    fn live_message(runtime: &WorkerRuntime, id: &str) -> WorkerMessage {
        runtime.on_message(|_, _| Ok(()));
        runtime.dispatch(execution(id, None, json!({"n": 1}))).unwrap();
        runtime.message(&id.into()).unwrap()
    }

    #[test]
    fn test_second_settlement_is_refused() {
        let (runtime, sink, _) = setup();
        let message = live_message(&runtime, "a");

        message.resolve(1).unwrap();
        let err = message.reject("late").unwrap_err();

        match err {
            RuntimeError::InvalidTransition {
                current,
                attempted,
                payload,
                attempted_payload,
                ..
            } => {
                assert_eq!(current, MessageStatus::Resolved);
                assert_eq!(attempted, Transition::Reject);
                assert_eq!(payload, json!({"n": 1}));
                assert_eq!(attempted_payload, json!("late"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        match message.report_progress(10.0, Some(json!("tick"))).unwrap_err() {
            RuntimeError::InvalidTransition {
                attempted_payload, ..
            } => {
                assert_eq!(
                    attempted_payload,
                    json!({"percentage": 10.0, "payload": "tick"})
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(message.cancel("late").is_err());
        assert_eq!(sink.responses().len(), 1);
        assert_eq!(message.status(), MessageStatus::Resolved);
    }

    #[test]
    fn test_progress_keeps_message_pending() {
        let (runtime, sink, _) = setup();
        let message = live_message(&runtime, "a");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        message.on_progress(move |pct, _| record.lock().push(pct));

        for i in 0..5 {
            message.report_progress(i as f64, Some(json!(i))).unwrap();
        }

        assert!(message.is_pending());
        assert_eq!(runtime.pending_len(), 1);
        assert_eq!(*seen.lock(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sink.responses().len(), 5);
    }

    #[test]
    fn test_listener_order() {
        let (runtime, _, _) = setup();
        let message = live_message(&runtime, "a");
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        message.on_finalize(move || o.lock().push("finalize"));
        let o = order.clone();
        message.on_reject(move |_| o.lock().push("reject"));
        let o = order.clone();
        message.on_resolve(move |_| o.lock().push("resolve"));

        message.reject("nope").unwrap();

        assert_eq!(*order.lock(), vec!["reject", "finalize"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (runtime, _, _) = setup();
        let message = live_message(&runtime, "a");
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let subscription = message.on_resolve(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(subscription.kind(), SubscriptionKind::Resolve);

        subscription.unsubscribe();
        subscription.unsubscribe();
        message.resolve_empty().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_listener_sees_result() {
        let (runtime, _, _) = setup();
        let message = live_message(&runtime, "a");
        let seen = Arc::new(Mutex::new(None));

        let s = seen.clone();
        message.on_resolve(move |value| *s.lock() = value.cloned());
        message.resolve(json!({"ok": true})).unwrap();

        assert_eq!(*seen.lock(), Some(json!({"ok": true})));
    }

    #[test]
    fn test_panicking_listener_still_removes_message() {
        let (runtime, sink, _) = setup();
        let message = live_message(&runtime, "a");
        message.on_resolve(|_| panic!("listener exploded"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = message.resolve(1);
        }));

        assert!(result.is_err());
        assert_eq!(runtime.pending_len(), 0);
        assert_eq!(sink.responses().len(), 1);
    }

    #[test]
    fn test_transfer_travels_with_response() {
        let (runtime, sink, _) = setup();
        let message = live_message(&runtime, "a");

        message
            .resolve_with_transfer(Some(json!(3)), vec![vec![1, 2, 3]])
            .unwrap();

        assert_eq!(sink.frames.lock()[0].transfer, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_runtime_handle_from_message() {
        let (runtime, _, host) = setup();
        let message = live_message(&runtime, "a");

        message.runtime().unwrap().close();

        assert_eq!(message.status(), MessageStatus::Rejected);
        assert_eq!(host.closed.load(Ordering::SeqCst), 1);
    }
}
