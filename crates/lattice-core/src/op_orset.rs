//! Operation-based observed-remove set

use crate::error::{Error, Result};
use crate::orset::OrSetState;
use crate::tag::{assign_generator, ReplicaId, Tag, TagGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

/// Which update a replica wants to prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Remove,
}

/// A prepared update, ready to be applied everywhere with `effect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Add `element` under a freshly minted tag
    Add { element: String, tag: Tag },
    /// Retire exactly the tags the issuer had observed for `element`
    Remove { element: String, tags: BTreeSet<Tag> },
    /// Remove of an element the issuer never saw
    Noop,
}

impl Operation {
    pub fn is_noop(&self) -> bool {
        matches!(self, Operation::Noop)
    }

    pub fn element(&self) -> Option<&str> {
        match self {
            Operation::Add { element, .. } | Operation::Remove { element, .. } => Some(element),
            Operation::Noop => None,
        }
    }
}

/// OR-Set replicated by shipping prepared operations.
///
/// `prepare` never mutates; `effect` is the only mutator and is applied at
/// the issuing replica and at every peer alike. Operations issued here are
/// also kept in a log so they can be re-sent after a loss.
#[derive(Debug, Clone, Default)]
pub struct OpOrSet {
    tags: Option<TagGenerator>,
    state: OrSetState,
    log: Vec<Operation>,
}

impl OpOrSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replica(replica: ReplicaId) -> Self {
        Self {
            tags: Some(TagGenerator::new(replica)),
            ..Self::default()
        }
    }

    pub fn replica(&self) -> Option<ReplicaId> {
        self.tags.as_ref().map(TagGenerator::replica)
    }

    pub fn assign_replica(&mut self, replica: ReplicaId) -> Result<bool> {
        assign_generator(&mut self.tags, replica)
    }

    pub fn prepare(&mut self, kind: OpKind, element: &str) -> Result<Operation> {
        match kind {
            OpKind::Add => self.prepare_add(element),
            OpKind::Remove => Ok(self.prepare_remove(element)),
        }
    }

    /// Mint a tag for `element` without touching the sets
    pub fn prepare_add(&mut self, element: &str) -> Result<Operation> {
        let tag = self.tags.as_mut().ok_or(Error::NotInitialized)?.next_tag();
        Ok(Operation::Add {
            element: element.to_owned(),
            tag,
        })
    }

    /// Capture the tags currently observed for `element`
    pub fn prepare_remove(&self, element: &str) -> Operation {
        let tags = self.state.observed_tags(element);
        if tags.is_empty() {
            return Operation::Noop;
        }
        Operation::Remove {
            element: element.to_owned(),
            tags,
        }
    }

    /// Apply an operation, local or remote.
    ///
    /// Returns whether anything changed, so re-delivered operations can be
    /// told apart from new ones.
    pub fn effect(&mut self, op: &Operation) -> bool {
        trace!(op = ?op, "effect");
        match op {
            Operation::Add { element, tag } => self.state.insert_add(element.clone(), *tag),
            Operation::Remove { element, tags } => {
                self.state.insert_tombstones(element, tags) > 0
            }
            Operation::Noop => false,
        }
    }

    /// Prepare and apply an update issued by this replica.
    ///
    /// The returned operation is what peers need to receive.
    pub fn update(&mut self, kind: OpKind, element: &str) -> Result<Operation> {
        let op = self.prepare(kind, element)?;
        self.effect(&op);
        if !op.is_noop() {
            self.log.push(op.clone());
        }
        Ok(op)
    }

    /// Operations issued by this replica, in issue order
    pub fn log(&self) -> &[Operation] {
        &self.log
    }

    pub fn lookup(&self, element: &str) -> bool {
        self.state.lookup(element)
    }

    pub fn value(&self) -> BTreeSet<String> {
        self.state.value()
    }

    pub fn state(&self) -> &OrSetState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(id: u32) -> OpOrSet {
        OpOrSet::with_replica(ReplicaId::new(id))
    }

    #[test]
    fn test_prepare_does_not_mutate() {
        let mut set = replica(0);
        let op = set.prepare(OpKind::Add, "a").unwrap();
        assert!(!set.lookup("a"));
        assert!(set.state().is_empty());

        assert!(set.effect(&op));
        assert!(set.lookup("a"));
    }

    #[test]
    fn test_prepare_add_requires_identity() {
        let mut set = OpOrSet::new();
        assert_eq!(set.prepare(OpKind::Add, "a"), Err(Error::NotInitialized));
    }

    #[test]
    fn test_remove_of_unseen_element_is_noop() {
        let mut set = replica(0);
        let op = set.prepare(OpKind::Remove, "ghost").unwrap();
        assert_eq!(op, Operation::Noop);
        assert!(!set.effect(&op));
        assert!(set.state().is_empty());
        assert!(set.update(OpKind::Remove, "ghost").unwrap().is_noop());
        assert!(set.log().is_empty());
    }

    #[test]
    fn test_remove_captures_observed_tags() {
        let mut set = replica(1);
        set.update(OpKind::Add, "a").unwrap();
        set.update(OpKind::Add, "a").unwrap();

        let op = set.prepare(OpKind::Remove, "a").unwrap();
        match &op {
            Operation::Remove { element, tags } => {
                assert_eq!(element, "a");
                assert_eq!(tags.len(), 2);
            }
            other => panic!("expected remove, got {:?}", other),
        }
        set.effect(&op);
        assert!(!set.lookup("a"));
    }

    #[test]
    fn test_issuer_and_peer_reach_same_state() {
        let mut origin = replica(0);
        let mut peer = replica(1);

        let ops = vec![
            origin.update(OpKind::Add, "a").unwrap(),
            origin.update(OpKind::Add, "b").unwrap(),
            origin.update(OpKind::Remove, "a").unwrap(),
        ];
        for op in &ops {
            peer.effect(op);
        }

        assert_eq!(origin.state(), peer.state());
        assert_eq!(peer.value(), BTreeSet::from(["b".to_string()]));
        assert_eq!(origin.log(), ops.as_slice());
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let mut origin = replica(0);
        let mut peer = replica(1);
        let op = origin.update(OpKind::Add, "a").unwrap();

        assert!(peer.effect(&op));
        assert!(!peer.effect(&op));
        assert_eq!(origin.state(), peer.state());
    }

    #[test]
    fn test_concurrent_add_wins_over_remove() {
        let mut a = replica(0);
        let mut b = replica(1);

        let add1 = a.update(OpKind::Add, "e").unwrap();
        b.effect(&add1);

        let remove = b.update(OpKind::Remove, "e").unwrap();
        let add2 = a.update(OpKind::Add, "e").unwrap();

        a.effect(&remove);
        b.effect(&add2);

        assert!(a.lookup("e"));
        assert!(b.lookup("e"));
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn test_lost_operation_diverges_until_redelivered() {
        let mut r0 = replica(0);
        let mut r1 = replica(1);

        let _dropped = r0.update(OpKind::Add, "a").unwrap();
        assert!(!r1.lookup("a"));

        for op in r0.log() {
            r1.effect(op);
        }
        assert!(r1.lookup("a"));
    }
}
