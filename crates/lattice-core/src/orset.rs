//! Add and tombstone sets shared by both OR-Set flavours

use crate::tag::{ReplicaId, Tag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One add of one element
pub type TaggedElement = (String, Tag);

/// Set of tagged elements, ordered by element then tag
pub type TaggedSet = BTreeSet<TaggedElement>;

const FIRST_TAG: Tag = Tag {
    replica: ReplicaId::new(0),
    seq: 0,
};

/// The `(Added, Removed)` pair behind an observed-remove set.
///
/// Both sets only ever grow. An element is a member while at least one of
/// its tags is in `added` but not in `removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrSetState {
    added: TaggedSet,
    removed: TaggedSet,
}

impl OrSetState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(added: TaggedSet, removed: TaggedSet) -> Self {
        Self { added, removed }
    }

    pub fn added(&self) -> &TaggedSet {
        &self.added
    }

    pub fn removed(&self) -> &TaggedSet {
        &self.removed
    }

    pub fn into_parts(self) -> (TaggedSet, TaggedSet) {
        (self.added, self.removed)
    }

    fn tags_in<'a>(set: &'a TaggedSet, element: &'a str) -> impl Iterator<Item = Tag> + 'a {
        set.range((element.to_owned(), FIRST_TAG)..)
            .take_while(move |(e, _)| e == element)
            .map(|(_, tag)| *tag)
    }

    /// Every tag this replica has seen added for `element`
    pub fn observed_tags(&self, element: &str) -> BTreeSet<Tag> {
        Self::tags_in(&self.added, element).collect()
    }

    /// Tags of `element` that are added and not tombstoned
    pub fn live_tags(&self, element: &str) -> BTreeSet<Tag> {
        Self::tags_in(&self.added, element)
            .filter(|tag| !self.removed.contains(&(element.to_owned(), *tag)))
            .collect()
    }

    pub fn lookup(&self, element: &str) -> bool {
        Self::tags_in(&self.added, element)
            .any(|tag| !self.removed.contains(&(element.to_owned(), tag)))
    }

    /// Distinct elements with at least one live tag
    pub fn value(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .filter(|pair| !self.removed.contains(*pair))
            .map(|(element, _)| element.clone())
            .collect()
    }

    /// Record an add; returns false if it was already known
    pub fn insert_add(&mut self, element: impl Into<String>, tag: Tag) -> bool {
        self.added.insert((element.into(), tag))
    }

    /// Tombstone the given tags of `element`; returns how many were new
    pub fn insert_tombstones<'a>(
        &mut self,
        element: &str,
        tags: impl IntoIterator<Item = &'a Tag>,
    ) -> usize {
        tags.into_iter()
            .filter(|tag| self.removed.insert((element.to_owned(), **tag)))
            .count()
    }

    /// Union both components with another replica's sets
    pub fn merge(&mut self, other_added: &TaggedSet, other_removed: &TaggedSet) {
        self.added.extend(other_added.iter().cloned());
        self.removed.extend(other_removed.iter().cloned());
    }

    pub fn merge_state(&mut self, other: &OrSetState) {
        self.merge(&other.added, &other.removed);
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_requires_live_tag() {
        let mut state = OrSetState::new();
        state.insert_add("a", Tag::new(0, 0));
        state.insert_add("a", Tag::new(1, 0));
        assert!(state.lookup("a"));

        state.insert_tombstones("a", &[Tag::new(0, 0)]);
        assert!(state.lookup("a"));
        assert_eq!(state.live_tags("a"), BTreeSet::from([Tag::new(1, 0)]));

        state.insert_tombstones("a", &[Tag::new(1, 0)]);
        assert!(!state.lookup("a"));
        assert!(state.value().is_empty());
    }

    #[test]
    fn test_observed_tags_only_for_element() {
        let mut state = OrSetState::new();
        state.insert_add("a", Tag::new(0, 0));
        state.insert_add("ab", Tag::new(0, 1));
        state.insert_add("b", Tag::new(1, 0));

        assert_eq!(state.observed_tags("a"), BTreeSet::from([Tag::new(0, 0)]));
        assert!(state.observed_tags("c").is_empty());
    }

    #[test]
    fn test_tombstone_before_add() {
        let mut state = OrSetState::new();
        state.insert_tombstones("x", &[Tag::new(1, 4)]);
        assert!(!state.lookup("x"));

        state.insert_add("x", Tag::new(1, 4));
        assert!(!state.lookup("x"));
    }

    #[test]
    fn test_merge_is_union() {
        let mut a = OrSetState::new();
        a.insert_add("a", Tag::new(0, 0));
        let mut b = OrSetState::new();
        b.insert_add("b", Tag::new(1, 0));
        b.insert_tombstones("a", &[Tag::new(0, 0)]);

        a.merge_state(&b);
        assert_eq!(a.added().len(), 2);
        assert_eq!(a.removed().len(), 1);
        assert_eq!(a.value(), BTreeSet::from(["b".to_string()]));
    }
}
