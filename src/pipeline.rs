//! The hash pipeline coupling crawler and fetcher (spec §4.3).
//!
//! Modelled as a `tokio::sync::mpsc::UnboundedSender`/`Receiver` pair: many
//! producers (the crawler's receive loop, plus startup journal replay),
//! one dispatcher that drains the receiver and fans out to
//! `MaxConcurrentFetches` worker tasks — satisfying design note §9's
//! "`SingleReader/SingleWriter=false`... safe for many writers and many
//! readers" by pushing the "many readers" property one level up into the
//! fetcher's own dispatch, exactly as spec §4.3 describes.
//!
//! De-duplication is two-layered per spec §4.3: `SeenHashes` here is the
//! crawler-side layer; the fetcher's own processed-set and store lookup are
//! the second layer (see `fetcher`).

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::model::{InfoHash, NodeEndpoint};

/// One observed (info-hash, candidate peer) pair flowing from crawler to
/// fetcher. The candidate is only a best-effort contact address — the
/// fetcher's connection attempt may simply fail, which is an ordinary,
/// silently-absorbed outcome (spec §4.2 step 8).
#[derive(Clone, Copy, Debug)]
pub struct Sighting {
  pub info_hash: InfoHash,
  pub candidate: NodeEndpoint,
}

/// The crawler-side de-duplication set. Single-writer (the crawler's
/// receive loop), but also seeded once at startup from the store, so it's
/// guarded by a plain mutex rather than left as an unsynchronized
/// `HashSet` (spec §5: "SeenHashes... single-writer", but startup seeding
/// happens from a different task than the receive loop).
pub struct SeenHashes {
  inner: Mutex<HashSet<InfoHash>>,
}

impl SeenHashes {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(HashSet::new()),
    }
  }

  /// Returns `true` if this is the first time `hash` has been seen.
  pub fn insert(&self, hash: InfoHash) -> bool {
    self.inner.lock().expect("SeenHashes mutex poisoned").insert(hash)
  }

  pub fn seed(&self, hashes: impl IntoIterator<Item = InfoHash>) {
    let mut set = self.inner.lock().expect("SeenHashes mutex poisoned");
    set.extend(hashes);
  }

  pub fn len(&self) -> usize {
    self.inner.lock().expect("SeenHashes mutex poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for SeenHashes {
  fn default() -> Self {
    Self::new()
  }
}

/// The write end of the pipeline. Cloneable: the crawler's receive loop and
/// the startup journal-replay both hold one.
#[derive(Clone)]
pub struct Sender {
  tx: mpsc::UnboundedSender<Sighting>,
}

impl Sender {
  /// Fire-and-forget submit. Only admits hashes that already passed the
  /// 40-hex-character gate (spec §3 invariant) — callers construct
  /// `InfoHash` via `InfoHash::parse_hex` or `InfoHash::from_bytes`, which
  /// enforce that, so there is nothing left to validate here.
  ///
  /// Dropped silently if the receiver has already been closed (shutdown in
  /// progress) — per design note §9, backpressure here is by drop, never
  /// by stall.
  pub fn submit(&self, info_hash: InfoHash, candidate: NodeEndpoint) {
    let _ = self.tx.send(Sighting { info_hash, candidate });
  }
}

pub struct Receiver {
  rx: mpsc::UnboundedReceiver<Sighting>,
}

impl Receiver {
  pub async fn recv(&mut self) -> Option<Sighting> {
    self.rx.recv().await
  }
}

pub fn channel() -> (Sender, Receiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (Sender { tx }, Receiver { rx })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn hash(byte: u8) -> InfoHash {
    InfoHash::from_bytes([byte; 20])
  }

  fn endpoint() -> NodeEndpoint {
    NodeEndpoint::new(std::net::Ipv4Addr::new(10, 0, 0, 1), 6881)
  }

  #[test]
  fn seen_hashes_reports_first_insert_only() {
    let seen = SeenHashes::new();
    assert!(seen.insert(hash(1)));
    assert!(!seen.insert(hash(1)));
    assert!(seen.insert(hash(2)));
    assert_eq!(seen.len(), 2);
  }

  #[tokio::test]
  async fn submit_after_receiver_dropped_is_silently_discarded() {
    let (tx, rx) = channel();
    drop(rx);
    // Must not panic: backpressure-by-discard, never an error surfaced to
    // the caller.
    tx.submit(hash(9), endpoint());
  }

  #[tokio::test]
  async fn hashes_arrive_in_send_order() {
    let (tx, mut rx) = channel();
    tx.submit(hash(1), endpoint());
    tx.submit(hash(2), endpoint());
    assert_eq!(rx.recv().await.unwrap().info_hash, hash(1));
    assert_eq!(rx.recv().await.unwrap().info_hash, hash(2));
  }
}
