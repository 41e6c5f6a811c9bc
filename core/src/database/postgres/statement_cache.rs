use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use mini_moka::sync::Cache;

use crate::database::postgres::statement::{
    render_statement, LoadSpec, StatementError, StatementKind,
};

const DEFAULT_CAPACITY: u64 = 1024;

type StatementCacheKey = (StatementKind, LoadSpec);

/// Memoizes rendered statements by kind and spec.
///
/// Rendering is pure so a cached statement is always identical to a fresh
/// one; the cache only saves the string building.
pub struct StatementCache {
    cache: Cache<StatementCacheKey, Arc<str>>,
    enabled: AtomicBool,
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        StatementCache {
            cache: Cache::builder().max_capacity(max_capacity).build(),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn get_or_render(
        &self,
        kind: StatementKind,
        spec: &LoadSpec,
    ) -> Result<Arc<str>, StatementError> {
        if !self.is_enabled() {
            return render_statement(kind, spec).map(Arc::from);
        }

        let key = (kind, spec.clone());
        if let Some(statement) = self.cache.get(&key) {
            return Ok(statement);
        }

        let statement: Arc<str> = Arc::from(render_statement(kind, spec)?);
        self.cache.insert(key, Arc::clone(&statement));
        Ok(statement)
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Stops caching and drops everything cached so far.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.clear();
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}
