//! Replica identity and causal tags

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Identity of one replica, assigned once by the rendezvous service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ReplicaId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one specific add of one element.
///
/// Ordering is by replica first, then sequence number, which keeps the
/// encoded sets stable across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub replica: ReplicaId,
    pub seq: u64,
}

impl Tag {
    pub fn new(replica: impl Into<ReplicaId>, seq: u64) -> Self {
        Self {
            replica: replica.into(),
            seq,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.replica, self.seq)
    }
}

/// Mints tags for a single replica.
///
/// Sequence numbers start at 0 and are never handed out twice, so every
/// tag minted anywhere is unique as long as replica IDs are.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    replica: ReplicaId,
    next: u64,
}

impl TagGenerator {
    pub fn new(replica: ReplicaId) -> Self {
        Self { replica, next: 0 }
    }

    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    /// Number of tags minted so far
    pub fn issued(&self) -> u64 {
        self.next
    }

    pub fn next_tag(&mut self) -> Tag {
        let tag = Tag {
            replica: self.replica,
            seq: self.next,
        };
        self.next += 1;
        tag
    }
}

/// Record `requested` as the identity held in `slot`.
///
/// Assigning the same ID twice is accepted and returns `false`; assigning
/// a different one once set fails, since identity is immutable.
pub(crate) fn assign_once(slot: &mut Option<ReplicaId>, requested: ReplicaId) -> Result<bool> {
    match *slot {
        None => {
            *slot = Some(requested);
            Ok(true)
        }
        Some(current) if current == requested => Ok(false),
        Some(current) => Err(Error::ReplicaAlreadyAssigned { current, requested }),
    }
}

/// `assign_once` for a replica whose identity lives in its tag generator
pub(crate) fn assign_generator(
    slot: &mut Option<TagGenerator>,
    requested: ReplicaId,
) -> Result<bool> {
    let mut current = slot.as_ref().map(TagGenerator::replica);
    let assigned = assign_once(&mut current, requested)?;
    if assigned {
        *slot = Some(TagGenerator::new(requested));
    }
    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_sequential() {
        let mut tags = TagGenerator::new(ReplicaId::new(3));
        assert_eq!(tags.next_tag(), Tag::new(3, 0));
        assert_eq!(tags.next_tag(), Tag::new(3, 1));
        assert_eq!(tags.next_tag(), Tag::new(3, 2));
        assert_eq!(tags.issued(), 3);
    }

    #[test]
    fn test_tags_from_different_replicas_differ() {
        let mut a = TagGenerator::new(ReplicaId::new(0));
        let mut b = TagGenerator::new(ReplicaId::new(1));
        assert_ne!(a.next_tag(), b.next_tag());
    }

    #[test]
    fn test_tag_ordering() {
        assert!(Tag::new(0, 9) < Tag::new(1, 0));
        assert!(Tag::new(1, 0) < Tag::new(1, 1));
    }

    #[test]
    fn test_assign_once() {
        let mut slot = None;
        assert_eq!(assign_once(&mut slot, ReplicaId::new(1)), Ok(true));
        assert_eq!(assign_once(&mut slot, ReplicaId::new(1)), Ok(false));
        assert!(matches!(
            assign_once(&mut slot, ReplicaId::new(0)),
            Err(Error::ReplicaAlreadyAssigned { .. })
        ));
        assert_eq!(slot, Some(ReplicaId::new(1)));
    }

    #[test]
    fn test_assign_generator_keeps_sequence() {
        let mut slot = None;
        assert_eq!(assign_generator(&mut slot, ReplicaId::new(2)), Ok(true));
        let tags = slot.as_mut().unwrap();
        tags.next_tag();
        tags.next_tag();

        assert_eq!(assign_generator(&mut slot, ReplicaId::new(2)), Ok(false));
        assert_eq!(
            assign_generator(&mut slot, ReplicaId::new(3)),
            Err(Error::ReplicaAlreadyAssigned {
                current: ReplicaId::new(2),
                requested: ReplicaId::new(3),
            })
        );
        let tags = slot.unwrap();
        assert_eq!(tags.replica(), ReplicaId::new(2));
        assert_eq!(tags.issued(), 2);
    }
}
