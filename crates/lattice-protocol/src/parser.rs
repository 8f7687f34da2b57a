//! Datagram decoder

use crate::error::{ProtocolError, ProtocolResult};
use crate::escape::unescape;
use crate::message::*;
use lattice_core::{ReplicaId, Tag, TaggedElement, TaggedSet};
use std::collections::BTreeSet;
use tracing::trace;

/// Largest payload a UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Decodes whole datagrams into messages
#[derive(Debug, Clone)]
pub struct Parser {
    max_size: usize,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            max_size: MAX_DATAGRAM_SIZE,
        }
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Decode one datagram
    pub fn parse(&self, datagram: &[u8]) -> ProtocolResult<Message> {
        if datagram.len() > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: datagram.len(),
                max: self.max_size,
            });
        }
        let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::InvalidUtf8)?;
        let message = parse_message(text)?;
        trace!(bytes = datagram.len(), message = message.name(), "decoded");
        Ok(message)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one message from its text form.
///
/// Dispatch is on the leading keyword only; element text is escaped on
/// the wire, so it can never look like a keyword.
pub fn parse_message(text: &str) -> ProtocolResult<Message> {
    let line = text.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    if let Some(rest) = line.strip_prefix(ADDED_PREFIX) {
        parse_state_sync(rest)
    } else if let Some(rest) = line.strip_prefix(ADD_PREFIX) {
        let (element, tag) = parse_pair(rest)?;
        Ok(Message::Add { element, tag })
    } else if let Some(rest) = line.strip_prefix(REMOVE_PREFIX) {
        parse_remove(rest)
    } else if let Some(rest) = line.strip_prefix(COUNTER_PREFIX) {
        parse_counter(rest)
    } else if let Some(rest) = line.strip_prefix(INFO_PREFIX) {
        parse_info(rest)
    } else if let Some(rest) = line.strip_prefix(SIGNUP_PREFIX) {
        Ok(Message::signup(parse_number(rest.trim(), "port")?))
    } else if line == DISCONNECT {
        Ok(Message::Disconnect)
    } else {
        Err(ProtocolError::UnknownMessage(preview(line)))
    }
}

fn preview(line: &str) -> String {
    const MAX_PREVIEW: usize = 64;
    match line.char_indices().nth(MAX_PREVIEW) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(s: &str, field: &'static str) -> ProtocolResult<T> {
    if s.is_empty() {
        return Err(ProtocolError::MissingField(field));
    }
    s.parse().map_err(|_| ProtocolError::invalid(field, s))
}

fn parse_info(rest: &str) -> ProtocolResult<Message> {
    let mut fields = rest.splitn(3, ',').map(str::trim);
    let node_id: u32 = parse_number(
        fields.next().ok_or(ProtocolError::MissingField("node_id"))?,
        "node_id",
    )?;
    let peer_host = fields
        .next()
        .filter(|h| !h.is_empty())
        .ok_or(ProtocolError::MissingField("peer_host"))?;
    let peer_port = parse_number(
        fields.next().ok_or(ProtocolError::MissingField("peer_port"))?,
        "peer_port",
    )?;

    Ok(Message::info(ReplicaId::new(node_id), peer_host, peer_port))
}

fn parse_counter(rest: &str) -> ProtocolResult<Message> {
    let (c0, c1) = rest
        .split_once(',')
        .ok_or(ProtocolError::MissingField("counter slot"))?;
    Ok(Message::counter([
        parse_number(c0.trim(), "counter slot")?,
        parse_number(c1.trim(), "counter slot")?,
    ]))
}

fn parse_tag(text: &str) -> ProtocolResult<Tag> {
    let (replica, seq) = text
        .split_once(',')
        .ok_or_else(|| ProtocolError::invalid("tag", text))?;
    Ok(Tag::new(
        parse_number::<u32>(replica, "tag replica")?,
        parse_number(seq, "tag sequence")?,
    ))
}

fn parse_pair(text: &str) -> ProtocolResult<TaggedElement> {
    let (element, tag) = text
        .split_once(',')
        .ok_or_else(|| ProtocolError::invalid("tagged element", text))?;
    Ok((unescape(element)?, parse_tag(tag)?))
}

fn parse_pairs(text: &str) -> ProtocolResult<TaggedSet> {
    if text.is_empty() {
        return Ok(TaggedSet::new());
    }
    text.split(';').map(parse_pair).collect()
}

fn parse_remove(rest: &str) -> ProtocolResult<Message> {
    let (element, tags) = rest
        .split_once('|')
        .ok_or(ProtocolError::MissingField("remove tags"))?;
    let tags = if tags.is_empty() {
        BTreeSet::new()
    } else {
        tags.split(';').map(parse_tag).collect::<ProtocolResult<_>>()?
    };
    Ok(Message::Remove {
        element: unescape(element)?,
        tags,
    })
}

fn parse_state_sync(rest: &str) -> ProtocolResult<Message> {
    let (added, removed) = rest
        .split_once(REMOVED_MARKER)
        .ok_or(ProtocolError::MissingField("OR-set T"))?;
    Ok(Message::StateSync {
        added: parse_pairs(added)?,
        removed: parse_pairs(removed)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::OrSetState;

    #[test]
    fn test_parse_signup() {
        assert_eq!(parse_message("SIGNUP_TAG:5123").unwrap(), Message::signup(5123));
    }

    #[test]
    fn test_parse_info() {
        let msg = parse_message("INFO:0, localhost, 7002").unwrap();
        assert_eq!(msg, Message::info(ReplicaId::new(0), "localhost", 7002));
    }

    #[test]
    fn test_parse_info_missing_port() {
        assert_eq!(
            parse_message("INFO:0, localhost"),
            Err(ProtocolError::MissingField("peer_port"))
        );
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_message("COUNTER:2,1").unwrap(), Message::counter([2, 1]));
        assert!(matches!(
            parse_message("COUNTER:2,-1"),
            Err(ProtocolError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_parse_add() {
        let msg = parse_message("add:a%20b,0,3").unwrap();
        assert_eq!(
            msg,
            Message::Add {
                element: "a b".into(),
                tag: Tag::new(0, 3)
            }
        );
    }

    #[test]
    fn test_parse_remove() {
        let msg = parse_message("remove:a|0,2;1,0").unwrap();
        assert_eq!(
            msg,
            Message::Remove {
                element: "a".into(),
                tags: BTreeSet::from([Tag::new(0, 2), Tag::new(1, 0)]),
            }
        );
    }

    #[test]
    fn test_parse_state_sync_round_trip() {
        let mut state = OrSetState::new();
        state.insert_add("add:", Tag::new(0, 0));
        state.insert_add("OR-set T:", Tag::new(1, 4));
        state.insert_tombstones("add:", &[Tag::new(0, 0)]);

        let msg = Message::state_sync(&state);
        let decoded = Parser::new().parse(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_parse_empty_state_sync() {
        let msg = parse_message("OR-set A: OR-set T:").unwrap();
        assert_eq!(
            msg,
            Message::StateSync {
                added: TaggedSet::new(),
                removed: TaggedSet::new()
            }
        );
    }

    #[test]
    fn test_parse_disconnect_with_newline() {
        assert_eq!(parse_message("!DISCONNECT\r\n").unwrap(), Message::Disconnect);
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parse_message(""), Err(ProtocolError::Empty));
        assert!(matches!(
            parse_message("hello there"),
            Err(ProtocolError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_malformed_pairs_rejected() {
        assert!(parse_message("add:a").is_err());
        assert!(parse_message("add:a,0").is_err());
        assert!(parse_message("add:a,x,1").is_err());
        assert!(parse_message("OR-set A:a,0,0").is_err());
        assert!(parse_message("remove:a").is_err());
    }

    #[test]
    fn test_size_limit() {
        let parser = Parser::with_max_size(8);
        assert_eq!(
            parser.parse(b"COUNTER:10,20"),
            Err(ProtocolError::MessageTooLarge { size: 13, max: 8 })
        );
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(Parser::new().parse(&[0xff, 0xfe]), Err(ProtocolError::InvalidUtf8));
    }
}
