use crate::log_debug;
use crate::modules::source::traits::SourceExecutor;
use dashmap::DashMap;
use std::sync::Arc;

/// Capability table mapping source names to their executors.
///
/// Resolved once at composition time: new sources register additional
/// entries, nothing subclasses the core. Lookup is lock-free so the
/// scheduler can resolve executors from concurrent dispatch tasks.
#[derive(Default)]
pub struct SourceRegistry {
    executors: DashMap<String, Arc<dyn SourceExecutor>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            executors: DashMap::new(),
        }
    }

    /// Register an executor under its own source name.
    /// Re-registering a name replaces the previous executor.
    pub fn register(&self, executor: Arc<dyn SourceExecutor>) {
        let name = executor.source_name().to_string();
        log_debug!("Registered source executor: {}", name);
        self.executors.insert(name, executor);
    }

    pub fn get(&self, source_name: &str) -> Option<Arc<dyn SourceExecutor>> {
        self.executors.get(source_name).map(|e| e.value().clone())
    }

    pub fn contains(&self, source_name: &str) -> bool {
        self.executors.contains_key(source_name)
    }

    pub fn names(&self) -> Vec<String> {
        self.executors.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
