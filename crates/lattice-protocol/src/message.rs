//! Wire messages and their text encoding

use bytes::{BufMut, BytesMut};
use lattice_core::{CounterState, Operation, OrSetState, ReplicaId, Tag, TaggedSet};
use std::collections::BTreeSet;

use crate::escape::escape;

pub const SIGNUP_PREFIX: &str = "SIGNUP_TAG:";
pub const INFO_PREFIX: &str = "INFO:";
pub const COUNTER_PREFIX: &str = "COUNTER:";
pub const ADD_PREFIX: &str = "add:";
pub const REMOVE_PREFIX: &str = "remove:";
pub const ADDED_PREFIX: &str = "OR-set A:";
pub const REMOVED_MARKER: &str = " OR-set T:";
pub const DISCONNECT: &str = "!DISCONNECT";

/// A datagram exchanged with the rendezvous service or a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// SIGNUP_TAG:<port>
    Signup { port: u16 },

    /// INFO:<node_id>, <peer_host>, <peer_port>
    Info {
        node_id: ReplicaId,
        peer_host: String,
        peer_port: u16,
    },

    /// COUNTER:<c0>,<c1>
    CounterSync(CounterState),

    /// add:<element>,<replica>,<seq>
    Add { element: String, tag: Tag },

    /// remove:<element>|<replica>,<seq>;...
    Remove { element: String, tags: BTreeSet<Tag> },

    /// OR-set A:<pairs> OR-set T:<pairs>
    StateSync { added: TaggedSet, removed: TaggedSet },

    /// !DISCONNECT
    Disconnect,
}

impl Message {
    pub fn signup(port: u16) -> Self {
        Message::Signup { port }
    }

    pub fn info(node_id: ReplicaId, peer_host: impl Into<String>, peer_port: u16) -> Self {
        Message::Info {
            node_id,
            peer_host: peer_host.into(),
            peer_port,
        }
    }

    pub fn counter(state: CounterState) -> Self {
        Message::CounterSync(state)
    }

    pub fn state_sync(state: &OrSetState) -> Self {
        Message::StateSync {
            added: state.added().clone(),
            removed: state.removed().clone(),
        }
    }

    /// Wire form of a prepared operation; a no-op has none
    pub fn from_operation(op: &Operation) -> Option<Self> {
        match op {
            Operation::Add { element, tag } => Some(Message::Add {
                element: element.clone(),
                tag: *tag,
            }),
            Operation::Remove { element, tags } => Some(Message::Remove {
                element: element.clone(),
                tags: tags.clone(),
            }),
            Operation::Noop => None,
        }
    }

    /// The operation carried by an add or remove message
    pub fn into_operation(self) -> Option<Operation> {
        match self {
            Message::Add { element, tag } => Some(Operation::Add { element, tag }),
            Message::Remove { element, tags } => Some(Operation::Remove { element, tags }),
            _ => None,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Message::Signup { .. } => "signup",
            Message::Info { .. } => "info",
            Message::CounterSync(_) => "counter",
            Message::Add { .. } => "add",
            Message::Remove { .. } => "remove",
            Message::StateSync { .. } => "state",
            Message::Disconnect => "disconnect",
        }
    }

    /// Encode the message to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the message into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Message::Signup { port } => {
                buf.put_slice(SIGNUP_PREFIX.as_bytes());
                buf.put_slice(port.to_string().as_bytes());
            }
            Message::Info {
                node_id,
                peer_host,
                peer_port,
            } => {
                buf.put_slice(INFO_PREFIX.as_bytes());
                buf.put_slice(format!("{}, {}, {}", node_id, peer_host, peer_port).as_bytes());
            }
            Message::CounterSync(state) => {
                buf.put_slice(COUNTER_PREFIX.as_bytes());
                buf.put_slice(format!("{},{}", state[0], state[1]).as_bytes());
            }
            Message::Add { element, tag } => {
                buf.put_slice(ADD_PREFIX.as_bytes());
                put_pair(buf, element, tag);
            }
            Message::Remove { element, tags } => {
                buf.put_slice(REMOVE_PREFIX.as_bytes());
                buf.put_slice(escape(element).as_bytes());
                buf.put_u8(b'|');
                for (i, tag) in tags.iter().enumerate() {
                    if i > 0 {
                        buf.put_u8(b';');
                    }
                    put_tag(buf, tag);
                }
            }
            Message::StateSync { added, removed } => {
                buf.put_slice(ADDED_PREFIX.as_bytes());
                put_pairs(buf, added);
                buf.put_slice(REMOVED_MARKER.as_bytes());
                put_pairs(buf, removed);
            }
            Message::Disconnect => {
                buf.put_slice(DISCONNECT.as_bytes());
            }
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.encode()))
    }
}

fn put_tag(buf: &mut BytesMut, tag: &Tag) {
    buf.put_slice(format!("{},{}", tag.replica, tag.seq).as_bytes());
}

fn put_pair(buf: &mut BytesMut, element: &str, tag: &Tag) {
    buf.put_slice(escape(element).as_bytes());
    buf.put_u8(b',');
    put_tag(buf, tag);
}

fn put_pairs(buf: &mut BytesMut, pairs: &TaggedSet) {
    for (i, (element, tag)) in pairs.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b';');
        }
        put_pair(buf, element, tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_signup() {
        assert_eq!(&Message::signup(6001).encode()[..], b"SIGNUP_TAG:6001");
    }

    #[test]
    fn test_encode_info() {
        let msg = Message::info(ReplicaId::new(1), "localhost", 7002);
        assert_eq!(&msg.encode()[..], b"INFO:1, localhost, 7002");
    }

    #[test]
    fn test_encode_counter() {
        assert_eq!(&Message::counter([2, 1]).encode()[..], b"COUNTER:2,1");
    }

    #[test]
    fn test_encode_add() {
        let msg = Message::Add {
            element: "a b".into(),
            tag: Tag::new(0, 3),
        };
        assert_eq!(&msg.encode()[..], b"add:a%20b,0,3");
    }

    #[test]
    fn test_encode_remove() {
        let msg = Message::Remove {
            element: "a".into(),
            tags: BTreeSet::from([Tag::new(1, 0), Tag::new(0, 2)]),
        };
        assert_eq!(&msg.encode()[..], b"remove:a|0,2;1,0");
    }

    #[test]
    fn test_encode_state_sync() {
        let mut state = OrSetState::new();
        state.insert_add("b", Tag::new(1, 0));
        state.insert_add("a", Tag::new(0, 0));
        state.insert_tombstones("a", &[Tag::new(0, 0)]);

        let msg = Message::state_sync(&state);
        assert_eq!(
            &msg.encode()[..],
            b"OR-set A:a,0,0;b,1,0 OR-set T:a,0,0"
        );
    }

    #[test]
    fn test_encode_empty_state_sync() {
        let msg = Message::state_sync(&OrSetState::new());
        assert_eq!(&msg.encode()[..], b"OR-set A: OR-set T:");
    }

    #[test]
    fn test_noop_has_no_wire_form() {
        assert!(Message::from_operation(&Operation::Noop).is_none());
    }

    #[test]
    fn test_operation_conversion() {
        let op = Operation::Add {
            element: "x".into(),
            tag: Tag::new(2, 5),
        };
        let msg = Message::from_operation(&op).unwrap();
        assert_eq!(msg.name(), "add");
        assert_eq!(msg.into_operation(), Some(op));
        assert_eq!(Message::Disconnect.into_operation(), None);
    }
}
