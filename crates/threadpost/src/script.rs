//! Worker bodies and the script registry
//!
//! A worker body is the code that runs once when a worker starts: it
//! registers handlers on the [`WorkerRuntime`] it is given. Bodies are
//! published in a [`ScriptRegistry`] under a url, and spawners resolve
//! worker sources and `import_scripts` calls against the same registry.
//!
//! Inline sources get a generated `blob:` url that lives until the router
//! that created it is disposed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ScriptError;
use crate::runtime::WorkerRuntime;

/// Prefix of urls created by [`ScriptRegistry::create_object_url`]
pub const OBJECT_URL_PREFIX: &str = "blob:threadpost/";

/// Code run once inside a freshly started worker
pub type WorkerBody =
    Arc<dyn Fn(&WorkerRuntime, &WorkerScope) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`WorkerBody`]
pub fn body<F>(f: F) -> WorkerBody
where
    F: Fn(&WorkerRuntime, &WorkerScope) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Global scope visible to worker bodies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerScope {
    /// Worker name
    pub name: String,
    /// Values injected by the router configuration
    pub primitive_parameters: Vec<Value>,
    /// Origin the controller speaks from
    pub origin: Option<String>,
}

impl WorkerScope {
    /// Injected parameter at `index`
    pub fn parameter(&self, index: usize) -> Option<&Value> {
        self.primitive_parameters.get(index)
    }
}

/// Registry mapping script urls to worker bodies
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    scripts: Arc<RwLock<HashMap<String, Vec<WorkerBody>>>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a body under a url, appending to anything already there
    pub fn register(&self, url: impl Into<String>, body: WorkerBody) {
        self.scripts.write().entry(url.into()).or_default().push(body);
    }

    /// Publish several bodies under a url, replacing what was there
    pub fn register_many(&self, url: impl Into<String>, bodies: Vec<WorkerBody>) {
        self.scripts.write().insert(url.into(), bodies);
    }

    /// Publish bodies under a fresh `blob:` url
    pub fn create_object_url(&self, bodies: Vec<WorkerBody>) -> String {
        let url = format!("{OBJECT_URL_PREFIX}{}", Uuid::now_v7());
        self.register_many(url.clone(), bodies);
        url
    }

    /// Remove a url; returns whether it was registered
    pub fn revoke_object_url(&self, url: &str) -> bool {
        self.scripts.write().remove(url).is_some()
    }

    /// Bodies registered under a url, in registration order
    pub fn resolve(&self, url: &str) -> Result<Vec<WorkerBody>, ScriptError> {
        self.scripts
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| ScriptError::NotFound(url.to_string()))
    }

    pub fn len(&self) -> usize {
        self.scripts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.read().is_empty()
    }
}

impl fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scripts = self.scripts.read();
        f.debug_struct("ScriptRegistry")
            .field("urls", &scripts.keys().collect::<Vec<_>>())
            .finish()
    }
}
