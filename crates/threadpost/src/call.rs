//! Client-side call handle
//!
//! A [`Call`] is returned for every message the router sends. It resolves to
//! the worker's result, exposes progress updates as callbacks or a stream,
//! and can ask the worker to cancel.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{ready, Context, Poll};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use threadpost_protocol::{MessageId, TransferList};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::CallError;
use crate::router::RouterInner;

/// Successful outcome as delivered by the worker
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Settled {
    /// Zero or one result values
    pub payload: Vec<Value>,
    pub transfer: TransferList,
}

impl Settled {
    pub fn single(value: Value) -> Self {
        Self {
            payload: vec![value],
            transfer: Vec::new(),
        }
    }

    /// Result value, `null` when the worker resolved without one
    pub fn into_value(self) -> Value {
        self.payload.into_iter().next().unwrap_or(Value::Null)
    }
}

pub(crate) type Settlement = Result<Settled, CallError>;
pub(crate) type Outcome = Shared<BoxFuture<'static, Settlement>>;

/// Progress update for a pending call
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub percentage: f64,
    pub payload: Option<Value>,
    pub transfer: TransferList,
}

impl Progress {
    pub fn new(percentage: f64, payload: Option<Value>) -> Self {
        Self {
            percentage,
            payload,
            transfer: Vec::new(),
        }
    }
}

type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Progress listeners plus every update received so far
///
/// Listeners attached late are replayed the history first, so no update is
/// lost to the dispatcher running ahead of the caller.
#[derive(Default)]
struct ProgressListeners {
    history: Vec<Progress>,
    callbacks: Vec<ProgressCallback>,
    streams: Vec<mpsc::UnboundedSender<Progress>>,
    closed: bool,
}

/// State shared by a call handle and the router's pending table
pub(crate) struct CallShared {
    message_id: MessageId,
    method: Option<String>,
    settle: Mutex<Option<oneshot::Sender<Settlement>>>,
    outcome: Outcome,
    progress: Mutex<ProgressListeners>,
    cancel_requested: AtomicBool,
    router: Option<Weak<RouterInner>>,
}

impl CallShared {
    /// Create call state; calls without a router settle cancellation locally
    pub fn new(
        message_id: MessageId,
        method: Option<String>,
        router: Option<Weak<RouterInner>>,
    ) -> Arc<Self> {
        let (tx, rx) = oneshot::channel::<Settlement>();
        let outcome = rx
            .map(|received| received.unwrap_or(Err(CallError::Dropped)))
            .boxed()
            .shared();

        Arc::new(Self {
            message_id,
            method,
            settle: Mutex::new(Some(tx)),
            outcome,
            progress: Mutex::new(ProgressListeners::default()),
            cancel_requested: AtomicBool::new(false),
            router,
        })
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.settle.lock().is_none()
    }

    /// Deliver the outcome; only the first settlement counts
    pub fn settle(&self, settlement: Settlement) -> bool {
        let Some(tx) = self.settle.lock().take() else {
            return false;
        };
        {
            let mut listeners = self.progress.lock();
            listeners.closed = true;
            listeners.streams.clear();
        }
        // Receiver may already be gone if every handle was dropped
        let _ = tx.send(settlement);
        true
    }

    pub fn emit_progress(&self, progress: Progress) {
        let callbacks = {
            let mut listeners = self.progress.lock();
            if listeners.closed {
                return;
            }
            listeners
                .streams
                .retain(|tx| tx.send(progress.clone()).is_ok());
            listeners.history.push(progress.clone());
            listeners.callbacks.clone()
        };

        for callback in callbacks {
            callback(&progress);
        }
    }

    fn add_progress_callback(&self, callback: ProgressCallback) {
        let replay = {
            let mut listeners = self.progress.lock();
            listeners.callbacks.push(callback.clone());
            listeners.history.clone()
        };

        for progress in &replay {
            callback(progress);
        }
    }

    fn progress_stream(&self) -> UnboundedReceiverStream<Progress> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.progress.lock();
        for progress in &listeners.history {
            let _ = tx.send(progress.clone());
        }
        if !listeners.closed {
            listeners.streams.push(tx);
        }
        UnboundedReceiverStream::new(rx)
    }

    /// Ask for cancellation; repeated requests are ignored
    pub fn request_cancel(self: &Arc<Self>, reason: Value) {
        if self.is_settled() || self.cancel_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.router.as_ref().and_then(Weak::upgrade) {
            Some(router) => router.cancel_call(self, reason),
            None => {
                self.settle(Err(CallError::Canceled(reason)));
            }
        }
    }
}

/// Handle to a message sent through a router
///
/// Awaiting the call yields the worker's result decoded as `T`. A worker
/// that resolves without a value decodes as JSON `null`, so `Call<()>`
/// and `Call<Option<_>>` work for result-less calls.
pub struct Call<T> {
    shared: Arc<CallShared>,
    outcome: Outcome,
    _result: PhantomData<fn() -> T>,
}

impl<T> Call<T> {
    pub(crate) fn new(shared: Arc<CallShared>) -> Self {
        let outcome = shared.outcome();
        Self {
            shared,
            outcome,
            _result: PhantomData,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        self.shared.message_id()
    }

    pub fn method(&self) -> Option<&str> {
        self.shared.method()
    }

    pub fn is_settled(&self) -> bool {
        self.shared.is_settled()
    }

    /// Run `callback` for every progress update; can be chained
    ///
    /// Updates that arrived before the callback was attached are replayed
    /// to it right away, in order.
    pub fn on_progress<F>(self, callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.shared.add_progress_callback(Arc::new(callback));
        self
    }

    /// Progress updates as a stream, ending when the call settles
    ///
    /// The stream starts with every update already received.
    pub fn progress(&self) -> UnboundedReceiverStream<Progress> {
        self.shared.progress_stream()
    }

    /// Ask the worker to cancel this call
    ///
    /// The call settles with [`CallError::Canceled`] once the worker
    /// acknowledges. If the router's workers are gone it settles at once.
    pub fn cancel(&self, reason: impl Into<Value>) {
        self.shared.request_cancel(reason.into());
    }
}

impl<T: DeserializeOwned> Call<T> {
    /// Await the result together with any buffers the worker transferred
    pub async fn with_transfer(self) -> Result<(T, TransferList), CallError> {
        let settled = self.outcome.await?;
        let transfer = settled.transfer.clone();
        Ok((decode(settled)?, transfer))
    }
}

fn decode<T: DeserializeOwned>(settled: Settled) -> Result<T, CallError> {
    serde_json::from_value(settled.into_value()).map_err(|e| CallError::Decode(e.to_string()))
}

impl<T: DeserializeOwned> Future for Call<T> {
    type Output = Result<T, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let settlement = ready!(this.outcome.poll_unpin(cx));
        Poll::Ready(settlement.and_then(decode::<T>))
    }
}

impl<T> fmt::Debug for Call<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("message_id", &self.shared.message_id)
            .field("method", &self.shared.method)
            .field("settled", &self.shared.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio_stream::StreamExt;

    fn detached<T>() -> (Arc<CallShared>, Call<T>) {
        let shared = CallShared::new(MessageId::new(), None, None);
        let call = Call::new(shared.clone());
        (shared, call)
    }

    #[tokio::test]
    async fn test_resolves_with_decoded_value() {
        let (shared, call) = detached::<i64>();
        assert!(shared.settle(Ok(Settled::single(json!(4)))));
        assert_eq!(call.await, Ok(4));
    }

    #[tokio::test]
    async fn test_empty_result_decodes_as_unit() {
        let (shared, call) = detached::<()>();
        shared.settle(Ok(Settled::default()));
        assert_eq!(call.await, Ok(()));
    }

    #[tokio::test]
    async fn test_first_settlement_wins() {
        let (shared, call) = detached::<i64>();
        assert!(shared.settle(Err(CallError::Rejected(json!("no")))));
        assert!(!shared.settle(Ok(Settled::single(json!(1)))));
        assert_eq!(call.await, Err(CallError::Rejected(json!("no"))));
    }

    #[tokio::test]
    async fn test_decode_mismatch() {
        let (shared, call) = detached::<i64>();
        shared.settle(Ok(Settled::single(json!("four"))));
        assert!(matches!(call.await, Err(CallError::Decode(_))));
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_dropped() {
        let (shared, call) = detached::<i64>();
        shared.settle.lock().take();
        assert_eq!(call.await, Err(CallError::Dropped));
    }

    #[tokio::test]
    async fn test_local_cancel_without_router() {
        let (_shared, call) = detached::<i64>();
        call.cancel("stop");
        call.cancel("ignored");
        assert_eq!(call.await, Err(CallError::Canceled(json!("stop"))));
    }

    #[tokio::test]
    async fn test_chained_progress_callbacks() {
        let count = Arc::new(AtomicUsize::new(0));
        let (shared, call) = detached::<i64>();

        let (a, b, c) = (count.clone(), count.clone(), count.clone());
        let call = call
            .on_progress(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .on_progress(move |_| {
                b.fetch_add(1, Ordering::SeqCst);
            })
            .on_progress(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });

        for i in 0..10 {
            shared.emit_progress(Progress::new(i as f64, None));
        }
        shared.settle(Ok(Settled::single(json!(0))));

        assert_eq!(call.await, Ok(0));
        assert_eq!(count.load(Ordering::SeqCst), 30);
    }

    #[tokio::test]
    async fn test_progress_stream_ends_on_settle() {
        let (shared, call) = detached::<i64>();
        let stream = call.progress();

        shared.emit_progress(Progress::new(10.0, Some(json!("a"))));
        shared.emit_progress(Progress::new(20.0, None));
        shared.settle(Ok(Settled::single(json!(1))));

        let updates: Vec<Progress> = stream.collect().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].payload, Some(json!("a")));
        assert_eq!(updates[1].percentage, 20.0);
    }

    #[tokio::test]
    async fn test_late_listeners_replay_history() {
        let (shared, call) = detached::<i64>();

        for i in 0..5 {
            shared.emit_progress(Progress::new(i as f64, None));
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let call = call.on_progress(move |p| record.lock().push(p.percentage));
        let stream = call.progress();

        shared.emit_progress(Progress::new(5.0, None));
        shared.settle(Ok(Settled::single(json!(1))));
        shared.emit_progress(Progress::new(6.0, None));

        assert_eq!(call.await, Ok(1));
        assert_eq!(*seen.lock(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        let updates: Vec<f64> = stream.map(|p| p.percentage).collect().await;
        assert_eq!(updates, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_stream_after_settle_replays_and_ends() {
        let (shared, call) = detached::<i64>();
        shared.emit_progress(Progress::new(50.0, None));
        shared.settle(Ok(Settled::single(json!(2))));

        let updates: Vec<Progress> = call.progress().collect().await;
        assert_eq!(updates, vec![Progress::new(50.0, None)]);
        assert_eq!(call.await, Ok(2));
    }

    #[tokio::test]
    async fn test_with_transfer() {
        let (shared, call) = detached::<i64>();
        shared.settle(Ok(Settled {
            payload: vec![json!(8)],
            transfer: vec![vec![0; 8]],
        }));

        let (value, transfer) = call.with_transfer().await.unwrap();
        assert_eq!(value, 8);
        assert_eq!(transfer, vec![vec![0; 8]]);
    }
}
