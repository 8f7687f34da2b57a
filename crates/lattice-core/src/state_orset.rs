//! State-based observed-remove set

use crate::error::{Error, Result};
use crate::orset::{OrSetState, TaggedSet};
use crate::tag::{assign_generator, ReplicaId, Tag, TagGenerator};
use std::collections::BTreeSet;
use tracing::trace;

/// OR-Set replicated by shipping the whole `(Added, Removed)` pair.
///
/// Updates mutate local state immediately; peers catch up on the next
/// full-state exchange. Since `merge` is a plain union, duplicated, stale
/// or reordered states are harmless.
#[derive(Debug, Clone, Default)]
pub struct StateOrSet {
    tags: Option<TagGenerator>,
    state: OrSetState,
}

impl StateOrSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replica(replica: ReplicaId) -> Self {
        Self {
            tags: Some(TagGenerator::new(replica)),
            state: OrSetState::new(),
        }
    }

    pub fn replica(&self) -> Option<ReplicaId> {
        self.tags.as_ref().map(TagGenerator::replica)
    }

    pub fn assign_replica(&mut self, replica: ReplicaId) -> Result<bool> {
        assign_generator(&mut self.tags, replica)
    }

    /// Add `element` under a fresh tag
    pub fn add(&mut self, element: impl Into<String>) -> Result<Tag> {
        let tag = self.tags.as_mut().ok_or(Error::NotInitialized)?.next_tag();
        let element = element.into();
        trace!(element = %element, tag = %tag, "add");
        self.state.insert_add(element, tag);
        Ok(tag)
    }

    /// Tombstone every tag of `element` observed so far.
    ///
    /// Returns the number of tags retired; zero means the element was never
    /// seen here and nothing changed.
    pub fn remove(&mut self, element: &str) -> usize {
        let observed = self.state.observed_tags(element);
        if observed.is_empty() {
            trace!(element = %element, "remove of unseen element ignored");
            return 0;
        }
        self.state.insert_tombstones(element, &observed)
    }

    pub fn lookup(&self, element: &str) -> bool {
        self.state.lookup(element)
    }

    pub fn merge(&mut self, other_added: &TaggedSet, other_removed: &TaggedSet) {
        self.state.merge(other_added, other_removed);
    }

    pub fn value(&self) -> BTreeSet<String> {
        self.state.value()
    }

    pub fn state(&self) -> &OrSetState {
        &self.state
    }
}
