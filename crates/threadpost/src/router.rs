//! Message router
//!
//! The controller side of the protocol. Owns the worker pool and the table
//! of pending calls, assigns each outgoing call to a worker, and routes
//! every response back to the [`Call`] that is waiting for it.
//!
//! ```text
//!  send ──► MessageId + Call ──► pool.acquire ──► worker.post(execution)
//!                                                        │
//!  Call ◄── settle / progress ◄── pending[id] ◄── dispatcher task ◄── WorkerEvent
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use threadpost_protocol::{
    Frame, MessageId, ProtocolError, Request, Response, ResponseBody, TransferList,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::call::{Call, CallShared, Progress, Settled};
use crate::config::RouterConfig;
use crate::error::{CallError, ConfigError, Result, RouterError};
use crate::pool::{PooledWorker, WorkerPool};
use crate::script::ScriptRegistry;
use crate::source::SourceSpec;
use crate::thread_worker::ThreadSpawner;
use crate::transport::{SpawnOptions, SpawnedWorker, WorkerEvent, WorkerFault, WorkerSpawner};

/// Callback for faults reported by workers
pub type WorkerErrorHandler = Arc<dyn Fn(&WorkerFault) + Send + Sync>;

/// Options for [`MessageRouter::cancel_all`] and the override operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelAllOptions {
    /// Reboot the pool instead of waiting for workers to acknowledge
    pub force: bool,
}

impl CancelAllOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Outgoing call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outgoing {
    /// Named handler; `None` targets the default handler
    pub method: Option<String>,
    pub payload: Value,
    /// Buffers moved with the request
    pub transfer: TransferList,
}

impl Outgoing {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn to_method(method: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Some(method.into()),
            payload,
            transfer: Vec::new(),
        }
    }

    pub fn with_transfer(mut self, transfer: TransferList) -> Self {
        self.transfer = transfer;
        self
    }
}

enum WorkerSource {
    Url { url: String, object_url: bool },
    Pinned,
}

struct PendingCall {
    call: Arc<CallShared>,
    worker: Arc<PooledWorker>,
}

struct RouterState {
    pending: IndexMap<MessageId, PendingCall>,
    pool: WorkerPool,
    disposed: bool,
}

pub(crate) struct RouterInner {
    config: RouterConfig,
    source: WorkerSource,
    spawner: Arc<dyn WorkerSpawner>,
    registry: ScriptRegistry,
    on_worker_error: Option<WorkerErrorHandler>,
    handle: Handle,
    state: Mutex<RouterState>,
}

enum CancelRoute {
    Post(Arc<PooledWorker>),
    Local(PendingCall),
    Settled,
}

impl RouterInner {
    fn spawn_options(&self, index: usize) -> SpawnOptions {
        SpawnOptions {
            name: self.config.worker_name(index),
            stack_size: self.config.worker_options.stack_size,
            scripts: self.config.scripts.clone(),
            primitive_parameters: self.config.primitive_parameters.clone(),
            origin: self.config.origin.clone(),
        }
    }

    /// Add a running worker to the pool and start reading its events
    fn adopt(self: &Arc<Self>, state: &mut RouterState, spawned: SpawnedWorker) -> Arc<PooledWorker> {
        let SpawnedWorker { port, events } = spawned;
        let worker = Arc::new(PooledWorker::new(state.pool.len(), port));

        let dispatcher = self.handle.spawn(dispatch_events(
            Arc::downgrade(self),
            worker.name().to_string(),
            events,
        ));
        worker.set_dispatcher(dispatcher);

        trace!(worker = %worker.name(), index = worker.index(), "Worker joined pool");
        state.pool.push(Arc::clone(&worker));
        worker
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut RouterState) -> Result<Arc<PooledWorker>> {
        let WorkerSource::Url { url, .. } = &self.source else {
            return Err(RouterError::Disposed);
        };

        let options = self.spawn_options(state.pool.len());
        let spawned = self.spawner.spawn(url, &options)?;
        debug!(router = %self.config.name, worker = %options.name, "Spawned worker");
        Ok(self.adopt(state, spawned))
    }

    fn warm_up(self: &Arc<Self>, state: &mut RouterState) -> Result<()> {
        while !state.pool.is_full() {
            self.spawn_worker(state)?;
        }
        Ok(())
    }

    /// Pick the worker for a new call
    fn acquire(self: &Arc<Self>, state: &mut RouterState) -> Result<Arc<PooledWorker>> {
        let closed = state.pool.prune();
        if closed > 0 {
            debug!(router = %self.config.name, closed, "Removed workers that closed themselves");
        }

        let has_pending = !state.pending.is_empty();
        if state.pool.should_grow(self.config.warms_up(), has_pending) {
            return self.spawn_worker(state);
        }
        state
            .pool
            .rotate()
            .ok_or_else(|| RouterError::runtime("no live workers"))
    }

    fn report_fault(&self, fault: &WorkerFault) {
        match &self.on_worker_error {
            Some(handler) => handler(fault),
            None => error!(
                router = %self.config.name,
                worker = %fault.worker,
                error = %fault.message,
                "Unhandled worker error"
            ),
        }
    }

    /// Route one response frame to its pending call
    fn execute_message_callback(self: &Arc<Self>, frame: Frame) {
        if let (Some(expected), Some(origin)) = (&self.config.origin, &frame.origin) {
            if expected != origin {
                warn!(router = %self.config.name, %origin, "Ignoring frame from foreign origin");
                return;
            }
        }

        let response = match Response::decode(&frame.data) {
            Ok(Some(response)) => response,
            Ok(None) => {
                trace!("Ignoring untagged frame");
                return;
            }
            Err(e) => {
                warn!(router = %self.config.name, error = %e, "Malformed response");
                return;
            }
        };

        let Response {
            message_id, body, ..
        } = response;

        let mut state = self.state.lock();
        let Some(call) = state.pending.get(&message_id).map(|e| Arc::clone(&e.call)) else {
            trace!(%message_id, "Response for unknown message");
            return;
        };

        if state.pool.is_empty() {
            // Workers were torn down before this response arrived
            state.pending.shift_remove(&message_id);
            drop(state);
            debug!(%message_id, "Dropped response after pool teardown");
            call.settle(Err(CallError::Dropped));
            return;
        }

        let settlement = match body {
            ResponseBody::Progress {
                percentage,
                payload,
            } => {
                drop(state);
                call.emit_progress(Progress {
                    percentage,
                    payload,
                    transfer: frame.transfer,
                });
                return;
            }
            ResponseBody::WorkerCancelation { reason } => Err(CallError::Canceled(reason)),
            ResponseBody::Rejected { reason } => Err(CallError::Rejected(reason)),
            ResponseBody::Resolved { payload } => Ok(Settled {
                payload,
                transfer: frame.transfer,
            }),
        };

        state.pending.shift_remove(&message_id);
        drop(state);

        debug!(%message_id, ok = settlement.is_ok(), "Call settled");
        call.settle(settlement);
        self.schedule_idle_teardown();
    }

    /// Forward a cancellation request for a pending call
    pub(crate) fn cancel_call(self: &Arc<Self>, call: &Arc<CallShared>, reason: Value) {
        let route = {
            let mut state = self.state.lock();
            let live = !state.disposed && !state.pool.is_empty();
            match state.pending.get(call.message_id()) {
                Some(entry) if live => CancelRoute::Post(Arc::clone(&entry.worker)),
                Some(_) => match state.pending.shift_remove(call.message_id()) {
                    Some(entry) => CancelRoute::Local(entry),
                    None => CancelRoute::Settled,
                },
                None => CancelRoute::Settled,
            }
        };

        match route {
            CancelRoute::Post(worker) => {
                let request = Request::cancelation(
                    call.message_id().clone(),
                    call.method().map(String::from),
                    reason.clone(),
                );
                let posted = request
                    .to_value()
                    .map_err(RouterError::from)
                    .and_then(|data| {
                        let frame = Frame::new(data).with_origin(self.config.origin.clone());
                        worker.post(frame).map_err(RouterError::from)
                    });

                match posted {
                    Ok(()) => {
                        debug!(message_id = %call.message_id(), worker = %worker.name(), "Cancelation sent")
                    }
                    Err(e) => {
                        warn!(message_id = %call.message_id(), error = %e, "Cancelation not delivered, canceling locally");
                        self.state.lock().pending.shift_remove(call.message_id());
                        call.settle(Err(CallError::Canceled(reason)));
                        self.schedule_idle_teardown();
                    }
                }
            }
            CancelRoute::Local(entry) => {
                debug!(message_id = %call.message_id(), "Workers gone, canceling locally");
                entry.call.settle(Err(CallError::Canceled(reason)));
            }
            CancelRoute::Settled => {}
        }
    }

    fn schedule_idle_teardown(self: &Arc<Self>) {
        if self.config.keeps_alive() {
            return;
        }

        let router = Arc::downgrade(self);
        let delay = self.config.termination_delay;
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(router) = router.upgrade() {
                router.teardown_if_idle();
            }
        });
    }

    fn teardown_if_idle(&self) {
        let workers = {
            let mut state = self.state.lock();
            if !state.pending.is_empty() || state.pool.is_empty() || state.pool.is_pinned() {
                return;
            }
            state.pool.drain()
        };

        for worker in &workers {
            worker.terminate();
        }
        debug!(router = %self.config.name, terminated = workers.len(), "Idle workers terminated");
    }

    /// Terminate workers and reject every pending call; returns how many were rejected
    ///
    /// A failed warm-up leaves the pool short; the next call spawns lazily.
    fn reboot(self: &Arc<Self>, reason: Value) -> usize {
        let (entries, workers, pinned) = {
            let mut state = self.state.lock();
            let entries: Vec<PendingCall> = state.pending.drain(..).map(|(_, e)| e).collect();
            let pinned = state.pool.is_pinned();
            let workers = if pinned { Vec::new() } else { state.pool.drain() };
            (entries, workers, pinned)
        };

        for worker in &workers {
            worker.terminate();
        }

        if pinned {
            // Pre-spawned workers survive a reboot; tell them to stop the work
            for entry in &entries {
                let request = Request::cancelation(
                    entry.call.message_id().clone(),
                    entry.call.method().map(String::from),
                    reason.clone(),
                );
                if let Ok(data) = request.to_value() {
                    let frame = Frame::new(data).with_origin(self.config.origin.clone());
                    if let Err(e) = entry.worker.post(frame) {
                        debug!(worker = %entry.worker.name(), error = %e, "Cancelation not delivered");
                    }
                }
            }
        }

        for entry in &entries {
            entry.call.settle(Err(CallError::Canceled(reason.clone())));
        }

        info!(
            router = %self.config.name,
            rejected = entries.len(),
            terminated = workers.len(),
            "Router rebooted"
        );

        if !pinned && self.config.warms_up() {
            let mut state = self.state.lock();
            if !state.disposed {
                if let Err(e) = self.warm_up(&mut state) {
                    error!(
                        router = %self.config.name,
                        workers = state.pool.len(),
                        error = %e,
                        "Reboot could not restart workers"
                    );
                }
            }
        }

        entries.len()
    }

    fn revoke_object_url(&self) {
        if let WorkerSource::Url {
            url,
            object_url: true,
        } = &self.source
        {
            self.registry.revoke_object_url(url);
        }
    }
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        for worker in self.state.get_mut().pool.drain() {
            worker.terminate();
        }
        self.revoke_object_url();
    }
}

/// Read one worker's events until it goes away
async fn dispatch_events(
    router: std::sync::Weak<RouterInner>,
    worker: String,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(router) = router.upgrade() else {
            break;
        };
        match event {
            WorkerEvent::Message(frame) => router.execute_message_callback(frame),
            WorkerEvent::Error(fault) => router.report_fault(&fault),
        }
    }
    debug!(%worker, "Worker event loop exited");
}

/// Builder for [`MessageRouter`]
pub struct RouterBuilder {
    source: SourceSpec,
    config: RouterConfig,
    registry: Option<ScriptRegistry>,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    on_worker_error: Option<WorkerErrorHandler>,
}

impl RouterBuilder {
    /// Set the configuration
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry used for inline sources, external urls and imported scripts
    pub fn registry(mut self, registry: ScriptRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Spawner used to create workers; defaults to [`ThreadSpawner`] over the registry
    pub fn spawner(mut self, spawner: impl WorkerSpawner + 'static) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Handle faults reported by workers; without one they are logged
    pub fn on_worker_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&WorkerFault) + Send + Sync + 'static,
    {
        self.on_worker_error = Some(Arc::new(handler));
        self
    }

    /// Build the router; must be called inside a tokio runtime
    pub fn build(self) -> Result<MessageRouter> {
        let handle = Handle::try_current().map_err(|e| RouterError::runtime(e.to_string()))?;

        let mut config = self.config;
        config.validate()?;

        let registry = self.registry.unwrap_or_default();
        let spawner = self
            .spawner
            .unwrap_or_else(|| Arc::new(ThreadSpawner::new(registry.clone())));

        let (source, instances) = match self.source {
            SourceSpec::Inline(body) => {
                let url = registry.create_object_url(vec![body]);
                (WorkerSource::Url { url, object_url: true }, Vec::new())
            }
            SourceSpec::InlineMany(bodies) => {
                if bodies.is_empty() {
                    return Err(ConfigError::EmptyInlineSource.into());
                }
                let url = registry.create_object_url(bodies);
                (WorkerSource::Url { url, object_url: true }, Vec::new())
            }
            SourceSpec::External(url) => (WorkerSource::Url { url, object_url: false }, Vec::new()),
            SourceSpec::Instance(worker) => (WorkerSource::Pinned, vec![worker]),
            SourceSpec::InstancePool(workers) => {
                if workers.is_empty() {
                    return Err(ConfigError::EmptyInstancePool.into());
                }
                (WorkerSource::Pinned, workers)
            }
        };

        let pool = match source {
            WorkerSource::Pinned => {
                config.max_workers = instances.len();
                config.keep_alive = Some(true);
                WorkerPool::pinned(instances.len())
            }
            WorkerSource::Url { .. } => WorkerPool::new(config.max_workers),
        };

        let inner = Arc::new(RouterInner {
            config,
            source,
            spawner,
            registry,
            on_worker_error: self.on_worker_error,
            handle,
            state: Mutex::new(RouterState {
                pending: IndexMap::new(),
                pool,
                disposed: false,
            }),
        });

        {
            let mut state = inner.state.lock();
            for worker in instances {
                inner.adopt(&mut state, worker);
            }
            if !state.pool.is_pinned() && inner.config.warms_up() {
                inner.warm_up(&mut state)?;
            }
        }

        info!(
            router = %inner.config.name,
            max_workers = inner.config.max_workers,
            warm_up = inner.config.warms_up(),
            keep_alive = inner.config.keeps_alive(),
            "Message router created"
        );

        Ok(MessageRouter { inner })
    }
}

/// Controller for a pool of workers
///
/// # Example
///
/// ```ignore
/// use threadpost::prelude::*;
///
/// let router = MessageRouter::builder(SourceSpec::inline(|runtime, _scope| {
///     runtime.on_message(|message, _event| {
///         let n: i64 = message.payload_as()?;
///         message.resolve(n + 2)?;
///         Ok(())
///     });
///     Ok(())
/// }))
/// .build()?;
///
/// let sum: i64 = router.send(2)?.await?;
/// assert_eq!(sum, 4);
///
/// router.dispose().await;
/// ```
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

impl MessageRouter {
    pub fn builder(source: SourceSpec) -> RouterBuilder {
        RouterBuilder {
            source,
            config: RouterConfig::default(),
            registry: None,
            spawner: None,
            on_worker_error: None,
        }
    }

    /// Build a router with the default thread spawner
    pub fn new(source: SourceSpec, config: RouterConfig) -> Result<Self> {
        Self::builder(source).config(config).build()
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.inner.registry
    }

    /// Number of live pooled workers
    pub fn workers_len(&self) -> usize {
        self.inner.state.lock().pool.len()
    }

    /// Number of calls waiting for a terminal response
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Pending call ids, oldest first
    pub fn pending_ids(&self) -> Vec<MessageId> {
        self.inner.state.lock().pending.keys().cloned().collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send a payload to the default handler
    pub fn send<T>(&self, payload: impl Serialize) -> Result<Call<T>> {
        let payload = serde_json::to_value(payload).map_err(ProtocolError::Encode)?;
        self.post(Outgoing::new(payload))
    }

    /// Send a payload to a named handler
    pub fn send_to_method<T>(&self, method: impl Into<String>, payload: impl Serialize) -> Result<Call<T>> {
        let payload = serde_json::to_value(payload).map_err(ProtocolError::Encode)?;
        self.post(Outgoing::to_method(method, payload))
    }

    /// Send a fully specified call
    pub fn post<T>(&self, outgoing: Outgoing) -> Result<Call<T>> {
        let Outgoing {
            method,
            payload,
            transfer,
        } = outgoing;

        let message_id = MessageId::new();
        let data = Request::execution(message_id.clone(), method.clone(), payload).to_value()?;
        let call = CallShared::new(
            message_id.clone(),
            method.clone(),
            Some(Arc::downgrade(&self.inner)),
        );

        let worker = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(RouterError::Disposed);
            }
            let worker = self.inner.acquire(&mut state)?;
            state.pending.insert(
                message_id.clone(),
                PendingCall {
                    call: Arc::clone(&call),
                    worker: Arc::clone(&worker),
                },
            );
            worker
        };

        debug!(%message_id, method = ?method, worker = %worker.name(), "Posting message");

        let frame = Frame::new(data)
            .with_transfer(transfer)
            .with_origin(self.inner.config.origin.clone());
        if let Err(e) = worker.post(frame) {
            self.inner.state.lock().pending.shift_remove(&message_id);
            return Err(e.into());
        }

        Ok(Call::new(call))
    }

    // ========================================================================
    // Cancellation and replacement
    // ========================================================================

    /// Cancel every pending call
    ///
    /// Resolves once every worker has acknowledged, with one reason per
    /// canceled call, reporting `100 / total` progress per acknowledgement.
    /// With `force` the pool is rebooted instead and every call is rejected
    /// immediately.
    pub fn cancel_all(&self, reason: impl Into<Value>, options: CancelAllOptions) -> Call<Vec<Value>> {
        self.cancel_pending(reason.into(), options, None)
    }

    fn cancel_pending(
        &self,
        reason: Value,
        options: CancelAllOptions,
        keep: Option<MessageId>,
    ) -> Call<Vec<Value>> {
        let aggregate = CallShared::new(MessageId::new(), None, None);
        let result = Call::new(Arc::clone(&aggregate));

        if options.force {
            let rejected = self.inner.reboot(reason.clone());
            aggregate.settle(Ok(Settled::single(Value::Array(vec![reason; rejected]))));
            return result;
        }

        let targets: Vec<Arc<CallShared>> = {
            let state = self.inner.state.lock();
            state
                .pending
                .iter()
                .filter(|(id, _)| Some(*id) != keep.as_ref())
                .map(|(_, entry)| Arc::clone(&entry.call))
                .collect()
        };

        if targets.is_empty() {
            aggregate.settle(Ok(Settled::single(Value::Array(Vec::new()))));
            return result;
        }

        debug!(router = %self.name(), count = targets.len(), "Canceling pending calls");

        let percentage = 100.0 / targets.len() as f64;
        let outcomes: Vec<_> = targets.iter().map(|call| call.outcome()).collect();
        for call in &targets {
            call.request_cancel(reason.clone());
        }

        let collector = Arc::clone(&aggregate);
        self.inner.handle.spawn(async move {
            let acknowledgements = outcomes.into_iter().map(|outcome| {
                let collector = Arc::clone(&collector);
                async move {
                    let value = match outcome.await {
                        Ok(settled) => settled.into_value(),
                        Err(e) => e.into_reason(),
                    };
                    collector.emit_progress(Progress::new(percentage, Some(value.clone())));
                    value
                }
            });
            let reasons = futures::future::join_all(acknowledgements).await;
            collector.settle(Ok(Settled::single(Value::Array(reasons))));
        });

        result
    }

    /// Cancel every pending call, then send `payload`
    #[instrument(skip(self, payload, reason), fields(router = %self.inner.config.name))]
    pub async fn override_all<T>(
        &self,
        payload: impl Serialize,
        reason: impl Into<Value>,
        options: CancelAllOptions,
    ) -> Result<Call<T>> {
        let payload = serde_json::to_value(payload).map_err(ProtocolError::Encode)?;
        let canceled = self.cancel_all(reason, options).await;
        trace!(?canceled, "Override canceled pending calls");
        self.post(Outgoing::new(payload))
    }

    /// Let the oldest pending call finish, cancel the rest, then send `payload`
    ///
    /// A forced override reboots the pool, so the oldest call is rejected too.
    #[instrument(skip(self, payload, reason), fields(router = %self.inner.config.name))]
    pub async fn override_after_current<T>(
        &self,
        payload: impl Serialize,
        reason: impl Into<Value>,
        options: CancelAllOptions,
    ) -> Result<Call<T>> {
        let payload = serde_json::to_value(payload).map_err(ProtocolError::Encode)?;
        let current = self.inner.state.lock().pending.keys().next().cloned();
        let canceled = self.cancel_pending(reason.into(), options, current).await;
        trace!(?canceled, "Override canceled calls after the current one");
        self.post(Outgoing::new(payload))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Terminate every worker and reject every pending call with `reason`
    ///
    /// Returns how many calls were rejected. Workers are re-created right
    /// away when the router warms up, lazily otherwise or when that fails.
    /// Pre-spawned instance pools keep their workers and are only told to
    /// cancel.
    #[instrument(skip(self, reason), fields(router = %self.inner.config.name))]
    pub fn reboot(&self, reason: impl Into<Value>) -> usize {
        self.inner.reboot(reason.into())
    }

    /// Cancel pending calls, release the source and terminate every worker
    ///
    /// Workers get `termination_delay` to acknowledge the cancellations;
    /// calls still pending after that fail with [`CallError::Dropped`].
    /// Further sends fail with [`RouterError::Disposed`].
    #[instrument(skip(self), fields(router = %self.inner.config.name))]
    pub async fn dispose(&self) {
        if self.is_disposed() {
            return;
        }

        let canceling = self.cancel_all(Value::Null, CancelAllOptions::default());
        match tokio::time::timeout(self.inner.config.termination_delay, canceling).await {
            Ok(canceled) => trace!(?canceled, "Dispose canceled pending calls"),
            Err(_) => warn!("Workers did not acknowledge every cancelation"),
        }

        self.inner.revoke_object_url();

        let (workers, abandoned) = {
            let mut state = self.inner.state.lock();
            state.disposed = true;
            let abandoned: Vec<PendingCall> = state.pending.drain(..).map(|(_, e)| e).collect();
            (state.pool.drain(), abandoned)
        };

        for worker in &workers {
            worker.terminate();
        }
        for entry in &abandoned {
            entry.call.settle(Err(CallError::Dropped));
        }

        info!(
            terminated = workers.len(),
            dropped = abandoned.len(),
            "Router disposed"
        );
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MessageRouter")
            .field("name", &self.inner.config.name)
            .field("workers", &state.pool.len())
            .field("pending", &state.pending.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
