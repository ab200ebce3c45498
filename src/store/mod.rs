//! # Event Store
//!
//! The pluggable storage abstraction every relay component talks to:
//! [`store()`](EventStore::store) to admit an event and [`query()`](EventStore::query)
//! to answer subscriptions. Two implementations exist, [`memory::MemoryStore`]
//! and [`sqlite::SqliteStore`], both behind the same trait so the rest of the
//! crate never branches on which backend is active.

pub mod memory;
pub mod sqlite;

use crate::event::Event;
use std::collections::HashMap;
use thiserror::Error;

/// A single subscription filter. Multiple filters on one subscription are
/// combined with OR semantics: an event matches the subscription if it
/// matches any one filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Exact or prefix hex matches against `event.id`.
    pub ids: Vec<String>,
    /// Exact or prefix hex matches against `event.pubkey`.
    pub authors: Vec<String>,
    /// Exact matches against `event.kind`.
    pub kinds: Vec<u32>,
    /// Inclusive lower bound on `event.created_at`.
    pub since: Option<i64>,
    /// Inclusive upper bound on `event.created_at`.
    pub until: Option<i64>,
    /// Single-letter tag filters, e.g. `#e` -> the set of acceptable values
    /// for the second element of any tag whose first element is `"e"`.
    pub tags: HashMap<char, Vec<String>>,
    /// Caps the number of events this filter alone may contribute.
    pub limit: Option<usize>,
}

impl Filter {
    /// Whether `event` satisfies every populated constraint on this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| event.id.starts_with(id.as_str())) {
            return false;
        }
        if !self.authors.is_empty()
            && !self
                .authors
                .iter()
                .any(|author| event.pubkey.starts_with(author.as_str()))
        {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (letter, values) in &self.tags {
            let letter_matches = event.tags.iter().any(|tag| {
                tag.first().map(|s| s.as_str()) == Some(letter.to_string().as_str())
                    && tag
                        .get(1)
                        .map(|v| values.iter().any(|wanted| wanted == v))
                        .unwrap_or(false)
            });
            if !letter_matches {
                return false;
            }
        }
        true
    }
}

/// Failures raised by a storage backend. There is deliberately only one
/// variant: duplicate ids and stale replaceable-event writes are not
/// errors, they're silently-accepted no-ops (spec.md §4.B).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// The storage abstraction. Implementations must be safe to share behind an
/// `Arc` and called concurrently from many connection tasks.
pub trait EventStore: Send + Sync {
    /// Admit `event`. Ephemeral events are accepted but never persisted.
    /// Replaceable and parameterized-replaceable events silently replace
    /// any existing event sharing their replacement key unless the
    /// existing event is newer or ties with a lower id (spec.md §3's
    /// tie-break). Always `Ok` unless the backend itself fails.
    fn store(&self, event: &Event) -> Result<(), StoreError>;

    /// Return the events matching any of `filters`, deduplicated, ordered
    /// by `created_at` descending and then `id` ascending for ties.
    fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError>;

    /// Exact point lookup by full id. `None` if no event with that exact id
    /// is stored — this is an exact match, unlike `query`'s id-prefix
    /// filter semantics.
    fn get(&self, id: &str) -> Result<Option<Event>, StoreError>;
}

/// Sort a result set into the canonical order every query must return:
/// newest first, lowest id breaking ties.
pub(crate) fn sort_canonical(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Apply the limit from the first filter (in listed order) that specifies
/// one to an already-sorted result set, matching observed Nostr relay
/// behavior (spec.md §4.B).
pub(crate) fn apply_limit(mut events: Vec<Event>, filters: &[Filter]) -> Vec<Event> {
    if let Some(limit) = filters.iter().find_map(|f| f.limit) {
        events.truncate(limit);
    }
    events
}

/// Whether `candidate` should replace `incumbent` under a shared
/// replacement key: strictly newer, or an equal-age tie broken in favor of
/// the lower id.
pub(crate) fn should_replace(incumbent: &Event, candidate: &Event) -> bool {
    match candidate.created_at.cmp(&incumbent.created_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => candidate.id < incumbent.id,
        std::cmp::Ordering::Less => false,
    }
}
