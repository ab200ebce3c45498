//! In-memory event store: an `RwLock`-guarded set of indexes with no
//! external dependencies. Used in tests and as the fallback backend when
//! `DATA_DIR` is absent or unwritable.

use super::{apply_limit, should_replace, sort_canonical, EventStore, Filter, StoreError};
use crate::event::{classify, Event, KindClass, ReplacementKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
struct Indexes {
    /// Primary store, keyed by event id. `query` scans this directly; at
    /// the scale this backend is meant for (tests, and the no-`DATA_DIR`
    /// fallback) a linear scan beats maintaining secondary indexes nothing
    /// ever reads.
    events: BTreeMap<String, Event>,
    /// Which event id currently occupies each replacement key.
    replacements: HashMap<ReplacementKey, String>,
}

/// A purely in-memory [`EventStore`].
pub struct MemoryStore {
    indexes: RwLock<Indexes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
        }
    }

    fn insert_into_indexes(indexes: &mut Indexes, event: Event) {
        indexes.events.insert(event.id.clone(), event);
    }

    fn remove_from_indexes(indexes: &mut Indexes, id: &str) {
        indexes.events.remove(id);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryStore {
    fn store(&self, event: &Event) -> Result<(), StoreError> {
        if matches!(classify(event.kind), KindClass::Ephemeral) {
            return Ok(());
        }

        let mut indexes = self
            .indexes
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))?;

        if let Some(key) = event.replacement_key() {
            if let Some(existing_id) = indexes.replacements.get(&key).cloned() {
                let existing = indexes.events.get(&existing_id);
                let replace = existing.map(|e| should_replace(e, event)).unwrap_or(true);
                if !replace {
                    return Ok(());
                }
                Self::remove_from_indexes(&mut indexes, &existing_id);
            }
            indexes.replacements.insert(key, event.id.clone());
            Self::insert_into_indexes(&mut indexes, event.clone());
            return Ok(());
        }

        if indexes.events.contains_key(&event.id) {
            return Ok(());
        }
        Self::insert_into_indexes(&mut indexes, event.clone());
        Ok(())
    }

    fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError> {
        let indexes = self
            .indexes
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))?;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for filter in filters {
            for event in indexes.events.values() {
                if filter.matches(event) && seen.insert(event.id.clone()) {
                    results.push(event.clone());
                }
            }
        }
        sort_canonical(&mut results);
        Ok(apply_limit(results, filters))
    }

    fn get(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let indexes = self
            .indexes
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))?;
        Ok(indexes.events.get(id).cloned())
    }
}
