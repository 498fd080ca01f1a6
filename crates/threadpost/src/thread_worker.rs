//! Thread-backed workers
//!
//! [`ThreadSpawner`] runs each worker on a dedicated OS thread with its own
//! current-thread tokio runtime. Handlers on one worker run one at a time;
//! async work they spawn interleaves on that worker's runtime.
//!
//! ```text
//!  router ──► ThreadPort ──(mpsc)──► worker thread ──► WorkerRuntime::dispatch
//!     ▲                                    │
//!     └────────(mpsc WorkerEvent)──────────┘  EventSink: responses + faults
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use threadpost_protocol::Frame;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::error::{RuntimeError, TransportError};
use crate::runtime::{WorkerHost, WorkerRuntime};
use crate::script::{ScriptRegistry, WorkerBody, WorkerScope};
use crate::transport::{
    EventSink, MessageSink, SpawnOptions, SpawnedWorker, WorkerPort, WorkerSpawner,
};

/// Spawns workers as threads running bodies from a [`ScriptRegistry`]
#[derive(Debug, Clone, Default)]
pub struct ThreadSpawner {
    registry: ScriptRegistry,
}

impl ThreadSpawner {
    pub fn new(registry: ScriptRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }
}

impl WorkerSpawner for ThreadSpawner {
    #[instrument(skip(self, options), fields(worker = %options.name))]
    fn spawn(&self, url: &str, options: &SpawnOptions) -> Result<SpawnedWorker, TransportError> {
        let bodies = self.registry.resolve(url)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let port = Arc::new(ThreadPort {
            name: options.name.clone(),
            commands: command_tx,
            shutdown: Arc::clone(&shutdown),
        });

        let worker = WorkerThread {
            scope: WorkerScope {
                name: options.name.clone(),
                primitive_parameters: options.primitive_parameters.clone(),
                origin: options.origin.clone(),
            },
            scripts: options.scripts.clone(),
            bodies,
            registry: self.registry.clone(),
            events: EventSink::new(options.name.clone(), event_tx),
            commands: command_rx,
            shutdown,
            shutdown_rx,
        };

        let mut builder = std::thread::Builder::new().name(options.name.clone());
        if let Some(stack_size) = options.stack_size {
            builder = builder.stack_size(stack_size);
        }
        builder
            .spawn(move || worker.run())
            .map_err(|e| TransportError::spawn(options.name.clone(), e.to_string()))?;

        debug!(url, "Worker thread started");

        Ok(SpawnedWorker::new(port, event_rx))
    }
}

/// Controller-side handle to a worker thread
struct ThreadPort {
    name: String,
    commands: mpsc::UnboundedSender<Frame>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl MessageSink for ThreadPort {
    fn post_message(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_terminated() {
            return Err(TransportError::closed(self.name.clone()));
        }
        self.commands
            .send(frame)
            .map_err(|_| TransportError::closed(self.name.clone()))
    }
}

impl WorkerPort for ThreadPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminate(&self) {
        self.shutdown.send_replace(true);
    }

    fn is_terminated(&self) -> bool {
        *self.shutdown.borrow() || self.commands.is_closed()
    }
}

/// Host services for the runtime inside a worker thread
struct ThreadHost {
    scope: WorkerScope,
    registry: ScriptRegistry,
    shutdown: Arc<watch::Sender<bool>>,
}

impl WorkerHost for ThreadHost {
    fn import_scripts(&self, runtime: &WorkerRuntime, urls: &[String]) -> Result<(), RuntimeError> {
        for url in urls {
            for body in self.registry.resolve(url)? {
                body(runtime, &self.scope).map_err(|e| RuntimeError::body(format!("{e:#}")))?;
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Everything moved onto the worker thread
struct WorkerThread {
    scope: WorkerScope,
    scripts: Vec<String>,
    bodies: Vec<WorkerBody>,
    registry: ScriptRegistry,
    events: EventSink,
    commands: mpsc::UnboundedReceiver<Frame>,
    shutdown: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerThread {
    fn run(self) {
        let name = self.scope.name.clone();
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.events.fault(format!("failed to start worker runtime: {e}"));
                return;
            }
        };

        runtime.block_on(self.serve());
        info!(worker = %name, "Worker thread stopped");
    }

    async fn serve(self) {
        let WorkerThread {
            scope,
            scripts,
            bodies,
            registry,
            events,
            mut commands,
            shutdown,
            mut shutdown_rx,
        } = self;

        let host = Arc::new(ThreadHost {
            scope: scope.clone(),
            registry,
            shutdown,
        });
        let runtime = WorkerRuntime::new(Arc::new(events.clone()), host);

        if let Err(e) = runtime.import_scripts(scripts) {
            events.fault(e.to_string());
        }
        for body in &bodies {
            match catch_unwind(AssertUnwindSafe(|| body(&runtime, &scope))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => events.fault(format!("worker body failed: {e:#}")),
                Err(panic) => events.fault(panic_message(&*panic)),
            }
        }

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                command = commands.recv() => {
                    let Some(frame) = command else {
                        debug!(worker = %scope.name, "Controller dropped the port");
                        break;
                    };
                    match catch_unwind(AssertUnwindSafe(|| runtime.dispatch(frame))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(worker = %scope.name, error = %e, "Dispatch failed");
                            events.fault(e.to_string());
                        }
                        Err(panic) => events.fault(panic_message(&*panic)),
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}
