use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::commands;

/// Host events, handled in order by the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Run the cache install step
  Install,
  /// Run the cache activate step
  Activate,
  /// Request a resource; relative paths resolve against the origin
  Fetch(String),
  /// User submitted a chat message
  Send(String),
  /// Print the conversation so far
  History,
  Help,
  Quit,
}

/// Event queue fed by stdin and by anything holding a sender
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Spawn a task turning stdin lines into events. EOF becomes `Quit`.
  pub fn spawn_stdin_reader(&self) {
    let tx = self.sender();

    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            let Some(event) = commands::parse_input(&line) else {
              continue;
            };
            if tx.send(event).is_err() {
              break;
            }
          }
          Ok(None) => {
            let _ = tx.send(Event::Quit);
            break;
          }
          Err(e) => {
            warn!(error = %e, "failed to read stdin");
            let _ = tx.send(Event::Quit);
            break;
          }
        }
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
