// Message routing between a controller and a pool of workers
//
// A MessageRouter sends calls to workers and returns a Call handle that
// resolves with the worker's result. Workers register handlers on a
// WorkerRuntime and answer each WorkerMessage exactly once.
//
// Key design decisions:
// - Wire format lives in threadpost-protocol; this crate only moves Frames
// - Workers are reached through the WorkerSpawner/WorkerPort traits; the
//   default ThreadSpawner runs each worker on its own OS thread
// - Worker code is a plain closure (WorkerBody) looked up by url in a
//   ScriptRegistry, so inline sources and imported scripts share one path
// - Pending calls are kept in insertion order so "the current call" is the
//   oldest one still in flight
// - Router state sits behind one parking_lot mutex that is never held
//   across an await or a user callback

pub mod call;
pub mod config;
pub mod error;
pub(crate) mod pool;
pub mod router;
pub mod runtime;
pub mod script;
pub mod source;
pub mod thread_worker;
pub mod transport;

// Re-exports for convenience
pub use call::{Call, Progress};
pub use config::{RouterConfig, WorkerOptions};
pub use error::{
    CallError, ConfigError, Result, RouterError, RuntimeError, ScriptError, TransportError,
};
pub use router::{CancelAllOptions, MessageRouter, Outgoing, RouterBuilder, WorkerErrorHandler};
pub use runtime::{
    InboundEvent, MessageHandler, Subscription, SubscriptionKind, Transition, WorkerHost,
    WorkerMessage, WorkerRuntime,
};
pub use script::{body, ScriptRegistry, WorkerBody, WorkerScope, OBJECT_URL_PREFIX};
pub use source::SourceSpec;
pub use thread_worker::ThreadSpawner;
pub use transport::{
    EventSink, MessageSink, SpawnOptions, SpawnedWorker, WorkerEvent, WorkerFault, WorkerPort,
    WorkerSpawner,
};

// Protocol types used in the public API
pub use threadpost_protocol::{Frame, MessageId, MessageStatus, TransferList};

/// Everything needed to build a router and write worker bodies
pub mod prelude {
    pub use crate::call::{Call, Progress};
    pub use crate::config::RouterConfig;
    pub use crate::error::{CallError, RouterError};
    pub use crate::router::{CancelAllOptions, MessageRouter, Outgoing};
    pub use crate::runtime::{InboundEvent, WorkerMessage, WorkerRuntime};
    pub use crate::script::{ScriptRegistry, WorkerScope};
    pub use crate::source::SourceSpec;
    pub use threadpost_protocol::MessageId;
}
