//! Worker sources

use std::fmt;

use crate::script::{body, WorkerBody, WorkerScope};
use crate::runtime::WorkerRuntime;
use crate::transport::SpawnedWorker;

/// Where a router's workers come from
///
/// Inline bodies are published under a generated object url when the router
/// is built. Instance sources hand the router already running workers; such
/// pools have a fixed size and are never torn down for being idle.
pub enum SourceSpec {
    /// A single body run in every new worker
    Inline(WorkerBody),
    /// Several bodies run in order in every new worker
    InlineMany(Vec<WorkerBody>),
    /// Url of bodies registered in the router's script registry
    External(String),
    /// One pre-spawned worker
    Instance(SpawnedWorker),
    /// A fixed pool of pre-spawned workers
    InstancePool(Vec<SpawnedWorker>),
}

impl SourceSpec {
    /// Inline source from a closure
    pub fn inline<F>(f: F) -> Self
    where
        F: Fn(&WorkerRuntime, &WorkerScope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        SourceSpec::Inline(body(f))
    }

    /// Source registered under a url
    pub fn external(url: impl Into<String>) -> Self {
        SourceSpec::External(url.into())
    }
}

impl From<SpawnedWorker> for SourceSpec {
    fn from(worker: SpawnedWorker) -> Self {
        SourceSpec::Instance(worker)
    }
}

impl From<Vec<SpawnedWorker>> for SourceSpec {
    fn from(workers: Vec<SpawnedWorker>) -> Self {
        SourceSpec::InstancePool(workers)
    }
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Inline(_) => f.write_str("Inline"),
            SourceSpec::InlineMany(bodies) => write!(f, "InlineMany({})", bodies.len()),
            SourceSpec::External(url) => f.debug_tuple("External").field(url).finish(),
            SourceSpec::Instance(worker) => f.debug_tuple("Instance").field(worker).finish(),
            SourceSpec::InstancePool(workers) => {
                f.debug_tuple("InstancePool").field(workers).finish()
            }
        }
    }
}
