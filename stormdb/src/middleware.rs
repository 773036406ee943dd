// Pre/post interceptors registered per collection and method

use crate::error::{Result, StormError};
use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Create,
    Read,
    Update,
    Replace,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Read => "read",
            Method::Update => "update",
            Method::Replace => "replace",
            Method::Delete => "delete",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which methods an interceptor applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodSelector {
    Only(Method),
    All,
}

impl MethodSelector {
    fn matches(self, method: Method) -> bool {
        match self {
            MethodSelector::All => true,
            MethodSelector::Only(m) => m == method,
        }
    }
}

impl From<Method> for MethodSelector {
    fn from(method: Method) -> Self {
        MethodSelector::Only(method)
    }
}

impl FromStr for MethodSelector {
    type Err = StormError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "*" => MethodSelector::All,
            "create" => Method::Create.into(),
            "read" | "find" => Method::Read.into(),
            "update" => Method::Update.into(),
            "replace" => Method::Replace.into(),
            "delete" => Method::Delete.into(),
            other => {
                return Err(StormError::Middleware(format!(
                    "Unknown middleware method \"{other}\""
                )))
            }
        })
    }
}

/// Opaque handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MiddlewareId(u64);

/// An interceptor. It receives one payload element (a document or a query) and
/// may mutate it; an error aborts the operation.
pub type Handler = Arc<dyn Fn(&mut serde_json::Value) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut serde_json::Value) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Entry {
    id: MiddlewareId,
    phase: Phase,
    collection: String,
    method: MethodSelector,
    handler: Handler,
}

/// Registry of interceptors owned by one store instance.
#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        phase: Phase,
        collection: &str,
        method: MethodSelector,
        handler: Handler,
    ) -> MiddlewareId {
        let id = MiddlewareId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Entry {
            id,
            phase,
            collection: collection.to_string(),
            method,
            handler,
        });
        id
    }

    /// Register one handler for several methods, returning one id per method.
    pub fn register_many(
        &self,
        phase: Phase,
        collection: &str,
        methods: &[MethodSelector],
        handler: Handler,
    ) -> Vec<MiddlewareId> {
        methods
            .iter()
            .map(|m| self.register(phase, collection, *m, handler.clone()))
            .collect()
    }

    pub fn unregister(&self, id: MiddlewareId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run matching handlers over each payload element.
    ///
    /// Handlers run in registration order per element; the first error stops
    /// the run and is returned.
    pub fn run(
        &self,
        phase: Phase,
        collection: &str,
        method: Method,
        payload: &mut [serde_json::Value],
    ) -> Result<()> {
        let handlers: Vec<Handler> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.phase == phase && e.collection == collection && e.method.matches(method))
            .map(|e| e.handler.clone())
            .collect();
        if handlers.is_empty() {
            return Ok(());
        }

        for element in payload.iter_mut() {
            for handler in &handlers {
                handler(element)?;
            }
        }
        Ok(())
    }
}
