//! Output and display management

use crate::config::OutputConfig;
use crate::session::SessionEvent;
use std::io::{self, Write};

/// Receives every event a session reports, in order
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Prints session events to stdout.
///
/// Console output from the server is written verbatim; everything else is a
/// status line, optionally prefixed with the local time.
pub struct ConsoleObserver {
    timestamps: bool,
}

impl ConsoleObserver {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            timestamps: config.timestamps,
        }
    }

    fn status(&self, text: &str) {
        if self.timestamps {
            println!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), text);
        } else {
            println!("{}", text);
        }
    }
}

impl Observer for ConsoleObserver {
    fn on_event(&self, event: &SessionEvent) {
        if let Some(line) = format_event(event) {
            self.status(&line);
            return;
        }

        if let SessionEvent::Message(text) = event {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(text.as_bytes());
            if !text.ends_with('\n') {
                let _ = stdout.write_all(b"\n");
            }
            let _ = stdout.flush();
        }
    }
}

/// Status line for an event, or `None` for events that are printed verbatim
/// or not at all.
pub fn format_event(event: &SessionEvent) -> Option<String> {
    let line = match event {
        SessionEvent::Message(_) => return None,
        SessionEvent::Ignored { .. } => return None,
        SessionEvent::Unsupported { packet: "Update", kind } => {
            format!("Unknown update {} from server", kind)
        }
        SessionEvent::Unsupported { kind, .. } => format!("Unknown packet {} from server", kind),
        SessionEvent::Rejected(error) => format!("Dropped malformed packet: {}", error),
        SessionEvent::Retrying { packet, attempt } => {
            format!("No response, resending {} (attempt {})", packet, attempt)
        }
        SessionEvent::LoggedIn { hostname: Some(hostname) } => {
            format!("Connected to {}", hostname)
        }
        SessionEvent::LoggedIn { hostname: None } => "Connected".to_string(),
        SessionEvent::Players(players) if players.is_empty() => "No players".to_string(),
        SessionEvent::Players(players) => {
            format!("Players ({}): {}", players.len(), players.join(", "))
        }
        SessionEvent::AdminCount(0) => "No other administrators".to_string(),
        SessionEvent::AdminCount(count) => format!("Administrators logged in: {}", count),
        SessionEvent::MapChanged(map) => format!("Map: {}", map),
        SessionEvent::Completions(candidates) => candidates.join("  "),
        SessionEvent::TooManyCompletions(count) => {
            format!("{} completions, type more characters", count)
        }
        SessionEvent::CompletionTimedOut => "No completion received".to_string(),
        SessionEvent::Disconnected(reason) => format!("Disconnected: {}", reason),
    };

    Some(line)
}
