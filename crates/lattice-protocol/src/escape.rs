//! Element escaping
//!
//! Elements are free text typed by a user, so every byte that has meaning
//! in the wire format is written as `%XX`. Everything else passes through.

use crate::error::{ProtocolError, ProtocolResult};

const RESERVED: &[u8] = b"% ,;|:\r\n";

fn is_reserved(b: u8) -> bool {
    RESERVED.contains(&b)
}

/// Escape an element for the wire
pub fn escape(element: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut out = String::with_capacity(element.len());
    for c in element.chars() {
        if c.is_ascii() && is_reserved(c as u8) {
            let b = c as u8;
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse `escape`; fails on a truncated or non-hex `%` sequence
pub fn unescape(text: &str) -> ProtocolResult<String> {
    if !text.contains('%') {
        return Ok(text.to_string());
    }

    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| hex_value(*b));
            let lo = bytes.get(i + 2).and_then(|b| hex_value(*b));
            match (hi, lo) {
                (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                _ => return Err(ProtocolError::InvalidEscape(text.to_string())),
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| ProtocolError::InvalidUtf8)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
