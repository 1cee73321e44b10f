//! A single cooperative cancellation signal shared by every task (spec §5).
//!
//! Built on `tokio::sync::watch` rather than pulling in `tokio-util` for a
//! `CancellationToken`, since a `bool` flip is all the fan-out this crate
//! needs and the pack doesn't otherwise reach for `tokio-util`.

use tokio::sync::watch;

#[derive(Clone)]
pub struct Token {
  rx: watch::Receiver<bool>,
}

impl Token {
  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once cancellation has been signalled. Safe to `select!`
  /// against any other suspension point (recv, send, sleep, DNS) per
  /// spec §5's "cancellation is observed at every suspension point".
  pub async fn cancelled(&mut self) {
    // `changed()` only errors if the sender was dropped without ever
    // signalling, which this crate never does (the trigger outlives every
    // task); treat that as "already cancelled" defensively.
    while !*self.rx.borrow() {
      if self.rx.changed().await.is_err() {
        return;
      }
    }
  }
}

pub struct Trigger {
  tx: watch::Sender<bool>,
}

impl Trigger {
  pub fn new() -> (Self, Token) {
    let (tx, rx) = watch::channel(false);
    (Self { tx }, Token { rx })
  }

  pub fn token(&self) -> Token {
    Token {
      rx: self.tx.subscribe(),
    }
  }

  pub fn cancel(&self) {
    let _ = self.tx.send(true);
  }
}
