//! Process-wide metrics bus.
//!
//! Design note §9 ("Cross-subsystem mutable counters") re-architects the
//! source's ambient globals as one explicit struct constructed in `main`
//! and handed by `Arc` reference to every task — no `lazy_static`, no
//! thread-locals. The TUI dashboard mentioned in spec §1/§6 is just a
//! reader of this struct; it is not built here.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const RECENT_NAMES_CAPACITY: usize = 50;

#[derive(Default)]
pub struct Bus {
  pub crawler_packets_sent: AtomicU64,
  pub crawler_packets_received: AtomicU64,
  pub crawler_nodes_discovered: AtomicU64,
  pub crawler_hashes_discovered: AtomicU64,
  pub crawler_unique_hashes: AtomicU64,

  pub fetcher_received: AtomicU64,
  pub fetcher_attempts: AtomicU64,
  pub fetcher_successes: AtomicU64,
  pub fetcher_timeouts: AtomicU64,
  pub fetcher_errors: AtomicU64,
  pub fetcher_active: AtomicU64,

  recent_names: Mutex<VecDeque<String>>,
}

impl Bus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a successfully fetched torrent's display name in the bounded
  /// ring. Oldest entry is dropped once the ring is full (spec §6: capped
  /// at 50).
  pub fn push_recent_name(&self, name: impl Into<String>) {
    let mut ring = self.recent_names.lock().expect("recent_names mutex poisoned");
    if ring.len() >= RECENT_NAMES_CAPACITY {
      ring.pop_front();
    }
    ring.push_back(name.into());
  }

  pub fn recent_names(&self) -> Vec<String> {
    self
      .recent_names
      .lock()
      .expect("recent_names mutex poisoned")
      .iter()
      .cloned()
      .collect()
  }

  pub fn snapshot(&self) -> Snapshot {
    Snapshot {
      crawler_packets_sent: self.crawler_packets_sent.load(Ordering::Relaxed),
      crawler_packets_received: self.crawler_packets_received.load(Ordering::Relaxed),
      crawler_nodes_discovered: self.crawler_nodes_discovered.load(Ordering::Relaxed),
      crawler_hashes_discovered: self.crawler_hashes_discovered.load(Ordering::Relaxed),
      crawler_unique_hashes: self.crawler_unique_hashes.load(Ordering::Relaxed),
      fetcher_received: self.fetcher_received.load(Ordering::Relaxed),
      fetcher_attempts: self.fetcher_attempts.load(Ordering::Relaxed),
      fetcher_successes: self.fetcher_successes.load(Ordering::Relaxed),
      fetcher_timeouts: self.fetcher_timeouts.load(Ordering::Relaxed),
      fetcher_errors: self.fetcher_errors.load(Ordering::Relaxed),
      fetcher_active: self.fetcher_active.load(Ordering::Relaxed),
    }
  }
}

/// A point-in-time read of every atomic counter, for the debug log line or
/// a future TUI poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
  pub crawler_packets_sent: u64,
  pub crawler_packets_received: u64,
  pub crawler_nodes_discovered: u64,
  pub crawler_hashes_discovered: u64,
  pub crawler_unique_hashes: u64,
  pub fetcher_received: u64,
  pub fetcher_attempts: u64,
  pub fetcher_successes: u64,
  pub fetcher_timeouts: u64,
  pub fetcher_errors: u64,
  pub fetcher_active: u64,
}

trait AtomicInc {
  fn inc(&self);
}

impl AtomicInc for AtomicU64 {
  fn inc(&self) {
    self.fetch_add(1, Ordering::Relaxed);
  }
}

/// Small helper so call sites read as `metrics::inc(&bus.fetcher_errors)`
/// rather than spelling out an ordering at every call site.
pub fn inc(counter: &AtomicU64) {
  counter.inc();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recent_names_ring_drops_oldest() {
    let bus = Bus::new();
    for i in 0..RECENT_NAMES_CAPACITY + 5 {
      bus.push_recent_name(format!("name-{i}"));
    }
    let names = bus.recent_names();
    assert_eq!(names.len(), RECENT_NAMES_CAPACITY);
    assert_eq!(names.first().unwrap(), "name-5");
    assert_eq!(names.last().unwrap(), &format!("name-{}", RECENT_NAMES_CAPACITY + 4));
  }

  #[test]
  fn invariant_successes_plus_timeouts_plus_errors_le_attempts() {
    let bus = Bus::new();
    inc(&bus.fetcher_attempts);
    inc(&bus.fetcher_attempts);
    inc(&bus.fetcher_successes);
    inc(&bus.fetcher_timeouts);
    let snap = bus.snapshot();
    assert!(snap.fetcher_successes + snap.fetcher_timeouts + snap.fetcher_errors <= snap.fetcher_attempts);
  }
}
