//! Interactive console commands read from stdin.
//!
//! - `t` toggles per-packet trace logging
//! - `q` stops the publisher

use std::io::{self, BufRead};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleTrace,
    Quit,
}

/// Interpret one console line. Only the first non-blank character counts.
pub fn parse_command(line: &str) -> Option<Command> {
    match line.trim_start().chars().next()?.to_ascii_lowercase() {
        't' => Some(Command::ToggleTrace),
        'q' => Some(Command::Quit),
        _ => None,
    }
}

/// Forward commands from `input` until EOF or the receiver goes away.
pub fn forward_commands<R: BufRead>(input: R, tx: &Sender<Command>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        match parse_command(&line) {
            Some(cmd) => {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
            None if !line.trim().is_empty() => {
                tracing::warn!(input = %line.trim(), "unknown command (t = toggle trace, q = quit)");
            }
            None => {}
        }
    }
}

/// Spawn the stdin listener. The thread is detached: a blocking stdin read
/// cannot be interrupted, so it simply ends with the process.
pub fn spawn_stdin_listener(tx: Sender<Command>) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = io::stdin();
            forward_commands(stdin.lock(), &tx);
            tracing::debug!("stdin closed; command listener exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_commands() {
        assert_eq!(parse_command("t"), Some(Command::ToggleTrace));
        assert_eq!(parse_command("  T\n"), Some(Command::ToggleTrace));
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("quit"), Some(Command::Quit));
    }

    #[test]
    fn parse_ignores_everything_else() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("x"), None);
    }

    #[test]
    fn forward_stops_at_eof() {
        let (tx, rx) = crossbeam_channel::unbounded();
        forward_commands("t\nhello\n\nq\n".as_bytes(), &tx);
        drop(tx);
        let got: Vec<Command> = rx.iter().collect();
        assert_eq!(got, vec![Command::ToggleTrace, Command::Quit]);
    }
}
