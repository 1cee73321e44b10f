//! Wraps the peer-wire `MetadataSession` behind the polling contract the
//! fetcher's per-hash workflow expects (spec §4.2: "poll `has_metadata`
//! every 500 ms, up to `TimeoutSeconds`").
//!
//! The underlying `peer::MetadataSession` runs its handshake-to-reassembly
//! exchange as one continuous future; this module runs that future on its
//! own task and exposes its outcome through a `oneshot` channel, so the
//! fetcher's poll loop never blocks on peer I/O directly. Any collaborator
//! satisfying the `Session` trait below is acceptable (spec §4.2's
//! collaborator contract) — `PeerWireSession` is just the one this crate
//! ships.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::model::{InfoHash, TorrentRecord};
use crate::peer::session::{Error as SessionError, MetadataSession};

/// The result of one non-blocking poll of an in-flight session.
pub enum PollOutcome {
  Pending,
  Ready(Box<TorrentRecord>),
  Failed(String),
}

#[async_trait]
pub trait Session: Send {
  async fn poll_once(&mut self) -> PollOutcome;
}

/// Spawns a `peer::MetadataSession` and makes its terminal result visible
/// through non-blocking polls.
pub struct PeerWireSession {
  result_rx: oneshot::Receiver<Result<TorrentRecord, SessionError>>,
  task: tokio::task::JoinHandle<()>,
}

impl PeerWireSession {
  pub fn spawn(addr: SocketAddr, info_hash: InfoHash, connect_timeout: Duration, local_port: u16) -> Self {
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(async move {
      let outcome = async {
        let session = MetadataSession::connect(addr, info_hash, connect_timeout, local_port).await?;
        session.run().await
      }
      .await;
      let _ = tx.send(outcome);
    });
    Self { result_rx: rx, task }
  }
}

impl Drop for PeerWireSession {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[async_trait]
impl Session for PeerWireSession {
  async fn poll_once(&mut self) -> PollOutcome {
    match self.result_rx.try_recv() {
      Ok(Ok(record)) => PollOutcome::Ready(Box::new(record)),
      Ok(Err(error)) => PollOutcome::Failed(error.to_string()),
      Err(oneshot::error::TryRecvError::Empty) => PollOutcome::Pending,
      Err(oneshot::error::TryRecvError::Closed) => PollOutcome::Failed("session task ended unexpectedly".to_string()),
    }
  }
}
