//! Interactive console
//!
//! Reads commands with rustyline on a dedicated thread and forwards them to
//! the replica as intents. Replica events are rendered by a separate task.

use std::sync::Arc;

use colored::*;
use lattice_transport::{Intent, Replica, ReplicaEvent};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Intent(Intent),
    /// Print the current value
    Value,
    /// Print the current value as JSON
    State,
    Peers,
    Help,
    Clear,
    Quit,
    /// Blank line, or an element command with no element
    Nothing,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0} (type 'help')")]
    Unknown(String),
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let element = |make: fn(String) -> Intent| {
        if rest.is_empty() {
            Command::Nothing
        } else {
            Command::Intent(make(rest.to_string()))
        }
    };

    let command = match word.to_lowercase().as_str() {
        "" => Command::Nothing,
        "inc" | "increment" => Command::Intent(Intent::Increment),
        "add" => element(Intent::Add),
        "remove" | "rm" => element(Intent::Remove),
        "lookup" => element(Intent::Lookup),
        "resync" => Command::Intent(Intent::Resync),
        "value" => Command::Value,
        "state" => Command::State,
        "peers" => Command::Peers,
        "help" => Command::Help,
        "clear" => Command::Clear,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}

/// Start the console on its own thread.
///
/// Quitting the console, or closing its input, shuts the replica down.
pub fn spawn(replica: Arc<Replica>, intents: mpsc::Sender<Intent>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            if let Err(e) = run(&replica, &intents) {
                eprintln!("{} {}", "Console error:".red(), e);
            }
            replica.shutdown();
        })?;
    Ok(())
}

fn run(replica: &Replica, intents: &mpsc::Sender<Intent>) -> rustyline::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let prompt = format!("{}> ", replica.kind().to_string().green());

    loop {
        if replica.is_shutting_down() {
            break;
        }
        match rl.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.as_str());
                }
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(replica, intents, command),
                    Err(e) => eprintln!("{} {}", "Error:".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn execute(replica: &Replica, intents: &mpsc::Sender<Intent>, command: Command) {
    match command {
        Command::Intent(intent) => {
            debug!(intent = intent.name(), "Queueing intent");
            if intents.blocking_send(intent).is_err() {
                warn!("Replica is no longer accepting intents");
            }
        }
        Command::Value => println!("{}", replica.snapshot().to_string().cyan()),
        Command::State => match serde_json::to_string_pretty(&replica.snapshot()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{} {}", "Error:".red(), e),
        },
        Command::Peers => {
            let peers = replica.peers();
            if peers.is_empty() {
                println!("{}", "(no peers)".dimmed());
            }
            for (i, peer) in peers.iter().enumerate() {
                println!("{}) {}", i + 1, peer);
            }
        }
        Command::Help => print_help(),
        Command::Clear => print!("\x1B[2J\x1B[1;1H"),
        Command::Quit | Command::Nothing => {}
    }
}

/// Plain-text description of an event
pub fn describe(event: &ReplicaEvent) -> String {
    match event {
        ReplicaEvent::Registered { replica, peer } => {
            format!("Registered as replica {} (peer {})", replica, peer)
        }
        ReplicaEvent::PeerJoined(peer) => format!("Peer joined: {}", peer),
        ReplicaEvent::PeerLeft(peer) => format!("Peer left: {}", peer),
        ReplicaEvent::Received { from, text } => format!("<- {} {}", from, text),
        ReplicaEvent::Updated(snapshot) => snapshot.to_string(),
        ReplicaEvent::Lookup { element, present } => {
            if *present {
                format!("{} is in the set", element)
            } else {
                format!("{} is not in the set", element)
            }
        }
        ReplicaEvent::Error(message) => format!("Error: {}", message),
    }
}

fn render(event: &ReplicaEvent) -> ColoredString {
    let text = describe(event);
    match event {
        ReplicaEvent::Registered { .. } => text.green().bold(),
        ReplicaEvent::PeerJoined(_) | ReplicaEvent::PeerLeft(_) => text.yellow(),
        ReplicaEvent::Received { .. } => text.dimmed(),
        ReplicaEvent::Updated(_) => text.cyan(),
        ReplicaEvent::Lookup { .. } => text.blue(),
        ReplicaEvent::Error(_) => text.red(),
    }
}

/// Print replica events until the replica goes away
pub async fn render_events(mut events: broadcast::Receiver<ReplicaEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", render(&event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                println!("{}", format!("({} events skipped)", skipped).dimmed());
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_help() {
    println!(
        r#"
{}

{}
  inc                 Increment this replica's slot

{}
  add <element>       Add an element
  remove <element>    Remove every observed copy of an element
  lookup <element>    Check membership

{}
  resync              Push local state (or the operation log) to peers now
  value               Show the current value
  state               Show the current value as JSON
  peers               List known peers

{}
  help                Show this help
  clear               Clear screen
  quit/exit           Stop the replica
"#,
        "Lattice Commands".cyan().bold(),
        "Counter".yellow().bold(),
        "Sets".yellow().bold(),
        "Replica".yellow().bold(),
        "Local".yellow().bold(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{ReplicaId, Snapshot};

    #[test]
    fn test_parse_intents() {
        assert_eq!(parse_command("inc").unwrap(), Command::Intent(Intent::Increment));
        assert_eq!(
            parse_command("  add   apple ").unwrap(),
            Command::Intent(Intent::Add("apple".into()))
        );
        assert_eq!(
            parse_command("RM pear").unwrap(),
            Command::Intent(Intent::Remove("pear".into()))
        );
        assert_eq!(
            parse_command("lookup two words").unwrap(),
            Command::Intent(Intent::Lookup("two words".into()))
        );
        assert_eq!(parse_command("resync").unwrap(), Command::Intent(Intent::Resync));
    }

    #[test]
    fn test_empty_elements_ignored() {
        assert_eq!(parse_command("add").unwrap(), Command::Nothing);
        assert_eq!(parse_command("remove   ").unwrap(), Command::Nothing);
        assert_eq!(parse_command("").unwrap(), Command::Nothing);
    }

    #[test]
    fn test_local_commands() {
        assert_eq!(parse_command("state").unwrap(), Command::State);
        assert_eq!(parse_command("EXIT").unwrap(), Command::Quit);
        assert_eq!(
            parse_command("frobnicate x").unwrap_err(),
            CommandError::Unknown("frobnicate".into())
        );
    }

    #[test]
    fn test_describe_events() {
        let snapshot = Snapshot::Counter {
            state: [2, 1],
            value: 3,
        };
        assert_eq!(
            describe(&ReplicaEvent::Updated(snapshot)),
            "Current value: 3 (2,1)"
        );

        let registered = ReplicaEvent::Registered {
            replica: ReplicaId::new(1),
            peer: "127.0.0.1:4000".parse().unwrap(),
        };
        assert_eq!(describe(&registered), "Registered as replica 1 (peer 127.0.0.1:4000)");

        let lookup = ReplicaEvent::Lookup {
            element: "a".into(),
            present: false,
        };
        assert_eq!(describe(&lookup), "a is not in the set");
    }
}
