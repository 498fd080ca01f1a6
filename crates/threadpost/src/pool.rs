//! Worker pool
//!
//! Decides whether a call gets a new worker or reuses one. Reuse is
//! round-robin: the front worker is taken and moved to the back.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use threadpost_protocol::Frame;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::transport::WorkerPort;

/// Worker owned by a pool, together with the task reading its events
pub(crate) struct PooledWorker {
    index: usize,
    port: Arc<dyn WorkerPort>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PooledWorker {
    pub fn new(index: usize, port: Arc<dyn WorkerPort>) -> Self {
        Self {
            index,
            port,
            dispatcher: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        self.port.name()
    }

    pub fn set_dispatcher(&self, handle: JoinHandle<()>) {
        *self.dispatcher.lock() = Some(handle);
    }

    pub fn post(&self, frame: Frame) -> Result<(), TransportError> {
        self.port.post_message(frame)
    }

    /// Stop the worker and its event task
    pub fn terminate(&self) {
        self.port.terminate();
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.port.is_terminated()
    }
}

impl fmt::Debug for PooledWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledWorker")
            .field("index", &self.index)
            .field("name", &self.port.name())
            .finish()
    }
}

/// Ordered set of live workers
#[derive(Debug)]
pub(crate) struct WorkerPool {
    workers: VecDeque<Arc<PooledWorker>>,
    max_workers: usize,
    pinned: bool,
}

impl WorkerPool {
    /// Pool that grows on demand up to `max_workers`
    pub fn new(max_workers: usize) -> Self {
        Self {
            workers: VecDeque::new(),
            max_workers,
            pinned: false,
        }
    }

    /// Pool made of pre-spawned workers; its size never changes
    pub fn pinned(max_workers: usize) -> Self {
        Self {
            pinned: true,
            ..Self::new(max_workers)
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn is_full(&self) -> bool {
        self.workers.len() >= self.max_workers
    }

    /// Whether the next call should get a fresh worker
    ///
    /// A pool grows while below its limit if it is empty, if it warms up
    /// eagerly, or if other calls are still in flight.
    pub fn should_grow(&self, warm_up: bool, has_pending: bool) -> bool {
        !self.pinned && !self.is_full() && (self.workers.is_empty() || warm_up || has_pending)
    }

    pub fn push(&mut self, worker: Arc<PooledWorker>) {
        self.workers.push_back(worker);
    }

    /// Drop workers that stopped on their own; returns how many
    pub fn prune(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain(|w| !w.is_terminated());
        before - self.workers.len()
    }

    /// Take the front worker and move it to the back
    pub fn rotate(&mut self) -> Option<Arc<PooledWorker>> {
        let worker = self.workers.pop_front()?;
        self.workers.push_back(Arc::clone(&worker));
        Some(worker)
    }

    /// Remove every worker from the pool
    pub fn drain(&mut self) -> Vec<Arc<PooledWorker>> {
        self.workers.drain(..).collect()
    }
}
