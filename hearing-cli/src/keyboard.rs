//! Terminal input for a running test. Lines are read on their own thread and
//! forwarded over a channel so the session loop never blocks on stdin.

use std::io::{self, BufRead};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// Enter pressed: "I heard a tone".
    Heard,
    /// `q` or end of input: stop the test.
    Quit,
}

/// Spawns the stdin reader. The thread is detached; it ends with the process
/// or when input closes.
pub fn spawn_listener() -> Receiver<KeyEvent> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || read_keys(io::stdin().lock(), &tx));
    rx
}

fn read_keys<R: BufRead>(input: R, tx: &Sender<KeyEvent>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        let event = parse_line(&line);
        debug!("[KEYBOARD] {:?}", event);
        if tx.send(event).is_err() || event == KeyEvent::Quit {
            return;
        }
    }
    let _ = tx.send(KeyEvent::Quit);
}

fn parse_line(line: &str) -> KeyEvent {
    match line.trim() {
        "q" | "Q" | "quit" => KeyEvent::Quit,
        _ => KeyEvent::Heard,
    }
}
