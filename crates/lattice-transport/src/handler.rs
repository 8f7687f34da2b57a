//! Applies intents and peer messages to a replica's CRDT
//!
//! Everything here runs with the CRDT lock held and never awaits; the
//! coordinator sends whatever outbound messages come back once the lock
//! has been released.

use lattice_core::{Crdt, CrdtKind, OpKind, Snapshot};
use lattice_protocol::Message;
use tracing::debug;

use crate::error::{TransportError, TransportResult};

/// A user request, routed through the same lock as network input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Increment,
    Add(String),
    Remove(String),
    Lookup(String),
    /// Push local state (or the local operation log) to every peer now
    Resync,
    Snapshot,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Increment => "increment",
            Intent::Add(_) => "add",
            Intent::Remove(_) => "remove",
            Intent::Lookup(_) => "lookup",
            Intent::Resync => "resync",
            Intent::Snapshot => "snapshot",
        }
    }
}

/// What an intent did locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentOutcome {
    /// Local state changed
    Updated(Snapshot),
    /// Nothing to do, e.g. removing an element never seen here
    Unchanged(Snapshot),
    Lookup { element: String, present: bool },
    /// State was pushed to peers
    Resynced { messages: usize },
    Snapshot(Snapshot),
}

/// Apply a user intent.
///
/// Returns the outcome and the messages peers must receive right away.
pub fn apply_intent(
    crdt: &mut Crdt,
    intent: &Intent,
) -> TransportResult<(IntentOutcome, Vec<Message>)> {
    match intent {
        Intent::Resync => {
            let outbound = sync_messages(crdt, true);
            let messages = outbound.len();
            return Ok((IntentOutcome::Resynced { messages }, outbound));
        }
        Intent::Snapshot => return Ok((IntentOutcome::Snapshot(crdt.snapshot()), Vec::new())),
        _ => {}
    }

    let kind = crdt.kind();
    let effect = match (intent, &mut *crdt) {
        (Intent::Increment, Crdt::Counter(counter)) => {
            counter.increment()?;
            Effect::Changed(Vec::new())
        }
        (Intent::Add(element), Crdt::StateSet(set)) => {
            set.add(element.as_str())?;
            Effect::Changed(Vec::new())
        }
        (Intent::Remove(element), Crdt::StateSet(set)) => match set.remove(element) {
            0 => Effect::Unchanged,
            _ => Effect::Changed(Vec::new()),
        },
        (Intent::Add(element), Crdt::OpSet(set)) => {
            let op = set.update(OpKind::Add, element)?;
            Effect::Changed(Message::from_operation(&op).into_iter().collect())
        }
        (Intent::Remove(element), Crdt::OpSet(set)) => {
            let op = set.update(OpKind::Remove, element)?;
            match Message::from_operation(&op) {
                Some(msg) => Effect::Changed(vec![msg]),
                None => Effect::Unchanged,
            }
        }
        (Intent::Lookup(element), Crdt::StateSet(set)) => Effect::Lookup(set.lookup(element)),
        (Intent::Lookup(element), Crdt::OpSet(set)) => Effect::Lookup(set.lookup(element)),
        _ => {
            return Err(TransportError::Unsupported {
                intent: intent.name(),
                kind,
            })
        }
    };

    Ok(match effect {
        Effect::Changed(outbound) => (IntentOutcome::Updated(crdt.snapshot()), outbound),
        Effect::Unchanged => (IntentOutcome::Unchanged(crdt.snapshot()), Vec::new()),
        Effect::Lookup(present) => (
            IntentOutcome::Lookup {
                element: intent_element(intent).to_string(),
                present,
            },
            Vec::new(),
        ),
    })
}

enum Effect {
    Changed(Vec<Message>),
    Unchanged,
    Lookup(bool),
}

fn intent_element(intent: &Intent) -> &str {
    match intent {
        Intent::Add(e) | Intent::Remove(e) | Intent::Lookup(e) => e,
        _ => "",
    }
}

/// Apply a replication message from a peer.
///
/// Returns whether local state changed. Messages meant for a different
/// CRDT kind are rejected without touching state.
pub fn apply_message(crdt: &mut Crdt, message: Message) -> TransportResult<bool> {
    let kind = crdt.kind();
    let unexpected = |message: &Message| TransportError::Unexpected {
        message: message.name(),
        kind,
    };

    match (message, crdt) {
        (Message::CounterSync(other), Crdt::Counter(counter)) => {
            let before = counter.state();
            counter.merge(&other);
            Ok(counter.state() != before)
        }
        (Message::StateSync { added, removed }, Crdt::StateSet(set)) => {
            let before = (set.state().added().len(), set.state().removed().len());
            set.merge(&added, &removed);
            Ok((set.state().added().len(), set.state().removed().len()) != before)
        }
        (message @ (Message::Add { .. } | Message::Remove { .. }), Crdt::OpSet(set)) => {
            match message.into_operation() {
                Some(op) => Ok(set.effect(&op)),
                None => Ok(false),
            }
        }
        (message, _) => Err(unexpected(&message)),
    }
}

/// Messages carrying this replica's state to a peer.
///
/// State-based kinds always ship their full state. The op-based set has
/// no state message; it re-sends its own operation log when `include_log`
/// is set and sends nothing otherwise.
pub fn sync_messages(crdt: &Crdt, include_log: bool) -> Vec<Message> {
    match crdt {
        Crdt::Counter(counter) => vec![Message::counter(counter.state())],
        Crdt::StateSet(set) => vec![Message::state_sync(set.state())],
        Crdt::OpSet(set) if include_log => {
            let messages: Vec<Message> = set.log().iter().filter_map(Message::from_operation).collect();
            debug!(operations = messages.len(), "re-sending operation log");
            messages
        }
        Crdt::OpSet(_) => Vec::new(),
    }
}

/// Whether a replica of this kind ships state on a timer by default
pub fn is_state_based(kind: CrdtKind) -> bool {
    matches!(kind, CrdtKind::Counter | CrdtKind::StateSet)
}
