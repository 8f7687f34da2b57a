//! Lattice wire protocol
//!
//! Newline-free UTF-8 text, one message per datagram.
//!
//! ## Message Format
//! ```text
//! SIGNUP_TAG:<port>                      # replica -> rendezvous
//! INFO:<node_id>, <host>, <port>         # rendezvous -> replica
//! COUNTER:<c0>,<c1>                      # counter state
//! add:<element>,<replica>,<seq>          # op-based add
//! remove:<element>|<replica>,<seq>;...   # op-based remove
//! OR-set A:<pairs> OR-set T:<pairs>      # state-based sync
//! !DISCONNECT                            # peer departure
//! ```
//!
//! `<pairs>` is a `;`-separated list of `<element>,<replica>,<seq>`.
//! Elements are escaped, see [`escape`].

pub mod error;
pub mod escape;
pub mod message;
pub mod parser;

pub use error::{ProtocolError, ProtocolResult};
pub use message::Message;
pub use parser::{parse_message, Parser, MAX_DATAGRAM_SIZE};
