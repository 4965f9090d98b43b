//! Line-oriented presentation: prints snapshots, takes commands from stdin.

use std::io::BufRead;
use tokio::sync::watch;
use crate::cli::OutputFormat;
use crate::{format_timestamp, BackupSnapshot, EngineHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Restore { file: String, timestamp: u64 },
    Quit,
}

pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    match verb {
        "list" | "ls" => Ok(Some(Command::List)),
        "quit" | "exit" | "q" => Ok(Some(Command::Quit)),
        "restore" => {
            let file = words.next().ok_or("usage: restore <file> <timestamp>")?;
            let timestamp = words
                .next()
                .ok_or("usage: restore <file> <timestamp>")?
                .parse::<u64>()
                .map_err(|_| "timestamp must be milliseconds since the epoch".to_string())?;
            Ok(Some(Command::Restore {
                file: file.to_string(),
                timestamp,
            }))
        }
        other => Err(format!("unknown command '{}' (try list, restore, quit)", other)),
    }
}

pub fn render_snapshot(snapshot: &BackupSnapshot, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string(snapshot).unwrap_or_else(|err| {
            tracing::error!("Could not serialize snapshot: {}", err);
            String::from("{}")
        }),
        OutputFormat::Text | OutputFormat::Tui => {
            let mut out = String::new();
            if let Some(outcome) = &snapshot.last_outcome {
                out.push_str(&format!("* {}\n", outcome.describe()));
            }
            for (name, backups) in &snapshot.files {
                out.push_str(&format!("{} ({} backups)\n", name, backups.len()));
                for ts in backups.iter().rev() {
                    out.push_str(&format!("  {}  {}\n", ts, format_timestamp(*ts)));
                }
            }
            out
        }
    }
}

/// Print every new snapshot until the engine stops publishing.
pub async fn print_snapshots(mut snapshots: watch::Receiver<BackupSnapshot>, format: OutputFormat) {
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        println!("{}", render_snapshot(&snapshot, format));
    }
}

/// Blocking stdin loop. Returns after `quit` or end of input, having asked
/// the engine to terminate.
pub fn read_commands<R: BufRead>(input: R, handle: &EngineHandle, format: OutputFormat) {
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::List)) => {
                let snapshot = handle.snapshots().borrow().clone();
                println!("{}", render_snapshot(&snapshot, format));
            }
            Ok(Some(Command::Restore { file, timestamp })) => {
                tracing::info!("Sending restore request: {} -> {}", file, format_timestamp(timestamp));
                if let Err(err) = handle.request_restore(file, timestamp) {
                    eprintln!("Restore not sent: {}", err);
                }
            }
            Ok(Some(Command::Quit)) => break,
            Err(message) => eprintln!("{}", message),
        }
    }
    handle.request_termination();
}
