//! # Optimizer State Store
//!
//! Per-parameter optimizer state keyed by parameter identity.

use crate::tensor::{ParamId, Tensor};
use std::collections::HashMap;

/// Owns one state entry per parameter an optimizer has touched.
///
/// Entries are created on first access and live until [`StateStore::reset`]
/// or until the store is dropped. Nothing is ever evicted.
#[derive(Debug, Clone)]
pub struct StateStore<S> {
    entries: HashMap<ParamId, S>,
}

impl<S> Default for StateStore<S> {
    fn default() -> Self {
        StateStore {
            entries: HashMap::new(),
        }
    }
}

impl<S> StateStore<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for `param`, creating it with `init` on first touch.
    pub fn get_or_init<F>(&mut self, param: &Tensor, init: F) -> &mut S
    where
        F: FnOnce(&Tensor) -> S,
    {
        self.entries
            .entry(param.id())
            .or_insert_with(|| init(param))
    }

    /// Looks up state without creating it.
    pub fn get(&self, param: &Tensor) -> Option<&S> {
        self.entries.get(&param.id())
    }

    pub fn get_mut(&mut self, param: &Tensor) -> Option<&mut S> {
        self.entries.get_mut(&param.id())
    }

    /// Installs `state` for `param`, replacing any previous entry.
    pub fn insert(&mut self, param: &Tensor, state: S) -> Option<S> {
        self.entries.insert(param.id(), state)
    }

    pub fn contains(&self, param: &Tensor) -> bool {
        self.entries.contains_key(&param.id())
    }

    /// Iterates over every tracked parameter id and its state.
    pub fn iter(&self) -> impl Iterator<Item = (&ParamId, &S)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears all state, e.g. between independent runs reusing one optimizer.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::zeros;

    #[test]
    fn lazily_creates_once_per_parameter() {
        let p = zeros(&[2], true);
        let mut store: StateStore<u32> = StateStore::new();
        let mut calls = 0;

        *store.get_or_init(&p, |_| {
            calls += 1;
            0
        }) += 1;
        *store.get_or_init(&p, |_| {
            calls += 1;
            0
        }) += 1;

        assert_eq!(calls, 1);
        assert_eq!(store.get(&p), Some(&2));
    }

    #[test]
    fn identical_values_get_distinct_entries() {
        let a = zeros(&[2], true);
        let b = zeros(&[2], true);
        let mut store: StateStore<usize> = StateStore::new();
        store.get_or_init(&a, |t| t.size());
        store.get_or_init(&b, |t| t.size());
        assert_eq!(store.len(), 2);
        // a clone is the same parameter
        assert!(store.contains(&a.clone()));
    }

    #[test]
    fn reset_clears_everything() {
        let a = zeros(&[1], true);
        let mut store: StateStore<u8> = StateStore::new();
        store.get_or_init(&a, |_| 3);
        store.reset();
        assert!(store.is_empty());
        assert!(store.get(&a).is_none());
    }
}
