//! Value pools and the auto-interner (C8b): append-only, identified
//! sequences of values referenced from the value tree as `^S1:7`, plus
//! the string auto-interner that promotes repeated long strings into a
//! pool transparently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{GValue, PoolRef};

/// The two pool element shapes spec.md names: interned strings, and
/// interned structured objects (structs/maps reused verbatim elsewhere in
/// the value tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Str,
    Object,
}

/// An identified, append-only sequence of values. `values` is internally
/// locked so a pool can be pushed to from any holder of the `Arc`.
pub struct Pool {
    id: String,
    kind: PoolKind,
    capacity: usize,
    values: RwLock<Vec<GValue>>,
}

impl Pool {
    fn new(id: impl Into<String>, kind: PoolKind, capacity: usize) -> Self {
        Self {
            id: id.into(),
            kind,
            capacity,
            values: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Append a value, returning its index within the pool.
    pub fn push(&self, v: GValue) -> u64 {
        let mut g = self.values.write();
        let idx = g.len() as u64;
        g.push(v);
        idx
    }

    pub fn get(&self, index: u64) -> Option<GValue> {
        self.values.read().get(index as usize).cloned()
    }
}

/// Registry of pools by id, shared across encode calls. Readers (lookup,
/// resolve) share a lock; creating a new pool takes it exclusively.
#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<Pool>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Pool>> {
        self.pools.read().get(id).cloned()
    }

    /// Fetch the pool named `id`, creating it with the given kind/capacity
    /// if it doesn't exist yet. If it already exists, its existing
    /// kind/capacity are kept (the caller's values are ignored).
    pub fn get_or_create(&self, id: &str, kind: PoolKind, capacity: usize) -> Arc<Pool> {
        if let Some(pool) = self.get(id) {
            return pool;
        }
        let mut g = self.pools.write();
        if let Some(pool) = g.get(id) {
            return pool.clone();
        }
        let pool = Arc::new(Pool::new(id, kind, capacity));
        g.insert(id.to_string(), pool.clone());
        pool
    }

    /// Resolve a `^S1:7`-style reference to its pooled value.
    pub fn resolve(&self, r: &PoolRef) -> Option<GValue> {
        self.get(&r.pool_id)?.get(r.index)
    }
}

/// Tunables for [`AutoInterner`].
#[derive(Debug, Clone)]
pub struct InternerOptions {
    pub min_length: usize,
    pub min_occurs: usize,
    pub pool_capacity: usize,
    pub pool_prefix: String,
}

impl Default for InternerOptions {
    fn default() -> Self {
        Self {
            min_length: 50,
            min_occurs: 2,
            pool_capacity: 1024,
            pool_prefix: "S".to_string(),
        }
    }
}

/// Observes strings passed to the emitter and promotes repeated long ones
/// into a string pool, returning a [`PoolRef`] in place of the literal
/// from then on.
pub struct AutoInterner {
    registry: Arc<PoolRegistry>,
    options: InternerOptions,
    seen_counts: RwLock<HashMap<String, usize>>,
    interned: RwLock<HashMap<String, PoolRef>>,
    current_pool_index: RwLock<usize>,
}

impl AutoInterner {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self::with_options(registry, InternerOptions::default())
    }

    pub fn with_options(registry: Arc<PoolRegistry>, options: InternerOptions) -> Self {
        Self {
            registry,
            options,
            seen_counts: RwLock::new(HashMap::new()),
            interned: RwLock::new(HashMap::new()),
            current_pool_index: RwLock::new(1),
        }
    }

    /// Observe one occurrence of `s`. Returns `Some(ref)` once `s` is
    /// interned (this call or a previous one); `None` means the caller
    /// should keep emitting `s` as a literal string.
    pub fn observe(&self, s: &str) -> Option<PoolRef> {
        // Fast path: shared-lock lookup against already-interned strings.
        if let Some(r) = self.interned.read().get(s) {
            return Some(r.clone());
        }
        if s.chars().count() < self.options.min_length {
            return None;
        }

        // Slow path: exclusive lock, re-check in case another thread won
        // the race while we were computing the length above.
        let mut interned = self.interned.write();
        if let Some(r) = interned.get(s) {
            return Some(r.clone());
        }

        let occurs = {
            let mut counts = self.seen_counts.write();
            let count = counts.entry(s.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if occurs < self.options.min_occurs {
            return None;
        }
        self.seen_counts.write().remove(s);

        let pool = self.current_pool();
        let pool = if pool.is_full() { self.advance_pool() } else { pool };
        let idx = pool.push(GValue::str(s));
        let r = PoolRef::new(pool.id().to_string(), idx);
        tracing::trace!(pool = pool.id(), index = idx, "auto-interner promoted string to pool");
        interned.insert(s.to_string(), r.clone());
        Some(r)
    }

    fn current_pool(&self) -> Arc<Pool> {
        let k = *self.current_pool_index.read();
        let id = format!("{}{k}", self.options.pool_prefix);
        self.registry.get_or_create(&id, PoolKind::Str, self.options.pool_capacity)
    }

    fn advance_pool(&self) -> Arc<Pool> {
        let mut k = self.current_pool_index.write();
        *k += 1;
        let id = format!("{}{k}", self.options.pool_prefix);
        self.registry.get_or_create(&id, PoolKind::Str, self.options.pool_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_ref_resolves_through_registry() {
        let registry = PoolRegistry::new();
        let pool = registry.get_or_create("S1", PoolKind::Str, 10);
        let idx = pool.push(GValue::str("hello"));
        let r = PoolRef::new("S1", idx);
        assert_eq!(registry.resolve(&r), Some(GValue::str("hello")));
    }

    #[test]
    fn interner_ignores_short_strings() {
        let registry = Arc::new(PoolRegistry::new());
        let interner = AutoInterner::new(registry);
        for _ in 0..10 {
            assert_eq!(interner.observe("short"), None);
        }
    }

    #[test]
    fn interner_promotes_after_min_occurs_and_min_length() {
        let registry = Arc::new(PoolRegistry::new());
        let interner = AutoInterner::with_options(
            registry,
            InternerOptions {
                min_length: 5,
                min_occurs: 2,
                ..InternerOptions::default()
            },
        );
        let long = "x".repeat(10);
        assert_eq!(interner.observe(&long), None);
        let r = interner.observe(&long).expect("should intern on 2nd occurrence");
        assert_eq!(r.pool_id, "S1");
        // Third observation returns the same ref via the fast path.
        assert_eq!(interner.observe(&long), Some(r));
    }

    #[test]
    fn interner_rolls_over_to_next_pool_when_full() {
        let registry = Arc::new(PoolRegistry::new());
        let interner = AutoInterner::with_options(
            registry,
            InternerOptions {
                min_length: 1,
                min_occurs: 1,
                pool_capacity: 1,
                ..InternerOptions::default()
            },
        );
        let a = interner.observe("aaaaa").unwrap();
        let b = interner.observe("bbbbb").unwrap();
        assert_eq!(a.pool_id, "S1");
        assert_eq!(b.pool_id, "S2");
    }
}
