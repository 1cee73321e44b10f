//! The Metadata Fetcher (spec §4.2): a bounded-concurrency pool that turns
//! each observed (info-hash, candidate peer) sighting into a persisted
//! `TorrentRecord`.
//!
//! Grounded on the teacher's `peer::info_fetcher::InfoFetcher` workflow for
//! the per-hash steps (connect, verify, persist), generalised into an
//! async dispatcher over `tokio::sync::Semaphore` the way `0xcaff-dht-crawler`
//! bounds its own concurrent work.

pub mod session;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::cancel::Token;
use crate::config::Settings;
use crate::metrics::{self, Bus};
use crate::model::{InfoHash, PendingHash, TorrentRecord};
use crate::pipeline::{self, Sighting};
use crate::store::{InsertOutcome, Store};

use session::{PeerWireSession, PollOutcome, Session};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// In-memory mirror of every hash this process has already reached a
/// terminal disposition for, seeded at startup from the store (spec §4.3:
/// "the fetcher's processed-hash set and store lookup catch anything the
/// crawler re-emits").
struct ProcessedHashes {
  inner: Mutex<HashSet<InfoHash>>,
}

impl ProcessedHashes {
  fn new() -> Self {
    Self {
      inner: Mutex::new(HashSet::new()),
    }
  }

  fn contains(&self, hash: &InfoHash) -> bool {
    self.inner.lock().expect("ProcessedHashes mutex poisoned").contains(hash)
  }

  fn insert(&self, hash: InfoHash) {
    self.inner.lock().expect("ProcessedHashes mutex poisoned").insert(hash);
  }

  fn seed(&self, hashes: impl IntoIterator<Item = InfoHash>) {
    self.inner.lock().expect("ProcessedHashes mutex poisoned").extend(hashes);
  }
}

pub struct Fetcher {
  settings: Arc<Settings>,
  bus: Arc<Bus>,
  store: Arc<dyn Store>,
  processed: ProcessedHashes,
  semaphore: Arc<Semaphore>,
}

impl Fetcher {
  pub fn new(settings: Arc<Settings>, bus: Arc<Bus>, store: Arc<dyn Store>) -> Self {
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_fetches));
    Self {
      settings,
      bus,
      store,
      processed: ProcessedHashes::new(),
      semaphore,
    }
  }

  /// Restart recovery (spec §4.3): every already-persisted hash is treated
  /// as processed, and every still-pending hash is re-dispatched ahead of
  /// fresh crawler traffic (scenario 6, §8).
  pub async fn recover(&self, hash_tx: &pipeline::Sender) -> crate::store::Result<()> {
    let persisted = self.store.all_torrent_hashes().await?;
    info!("fetcher restart recovery: {} persisted hashes loaded", persisted.len());
    self.processed.seed(persisted);

    let pending = self.store.all_pending_hashes().await?;
    info!("fetcher restart recovery: {} pending hashes re-queued", pending.len());
    for record in pending {
      // The original candidate peer is long gone by the time of a restart;
      // re-announce against the loopback placeholder so the retry still
      // goes through the same dispatch path and simply fails fast if
      // nothing is listening, rather than needing a second code path.
      hash_tx.submit(record.info_hash, crate::model::NodeEndpoint::new(std::net::Ipv4Addr::UNSPECIFIED, 0));
    }
    Ok(())
  }

  /// The dispatcher loop (spec §4.2's `run(cancel)`): drains the pipeline
  /// and spawns one bounded task per sighting.
  pub async fn run(self: Arc<Self>, mut hash_rx: pipeline::Receiver, mut cancel: Token) {
    loop {
      let sighting = tokio::select! {
        _ = cancel.cancelled() => return,
        sighting = hash_rx.recv() => sighting,
      };

      let Some(sighting) = sighting else {
        return;
      };

      metrics::inc(&self.bus.fetcher_received);

      if self.processed.contains(&sighting.info_hash) {
        self.clear_pending(sighting.info_hash).await;
        continue;
      }

      let permit = {
        let semaphore = self.semaphore.clone();
        tokio::select! {
          _ = cancel.cancelled() => return,
          permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
          },
        }
      };

      let this = self.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move {
        metrics::inc(&this.bus.fetcher_active);
        this.process(sighting, cancel).await;
        this.bus.fetcher_active.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        drop(permit);
      });
    }
  }

  /// The ten-step per-hash workflow (spec §4.2).
  async fn process(&self, sighting: Sighting, mut cancel: Token) {
    let Sighting { info_hash, candidate } = sighting;

    // Steps 1-2: skip if already terminal, or (structurally impossible
    // here since `InfoHash` is always exactly 20 bytes once constructed,
    // but kept as an explicit gate matching the spec's numbered workflow)
    // if the hash is the wrong length.
    if self.processed.contains(&info_hash) {
      self.clear_pending(info_hash).await;
      return;
    }
    match self.store.has_torrent(info_hash).await {
      Ok(true) => {
        self.processed.insert(info_hash);
        self.clear_pending(info_hash).await;
        return;
      }
      Ok(false) => {}
      Err(error) => {
        warn!("store lookup failed for {info_hash}: {error}");
        return;
      }
    }

    // Step 3: journal into PendingHash.
    if let Err(error) = self
      .store
      .upsert_pending(&PendingHash {
        info_hash,
        queued_at_utc: chrono::Utc::now(),
      })
      .await
    {
      warn!("failed to journal pending hash {info_hash}: {error}");
    }

    metrics::inc(&self.bus.fetcher_attempts);

    // Steps 4-5: start a session, poll to a deadline.
    let mut session: Box<dyn Session> = Box::new(PeerWireSession::spawn(
      candidate.into(),
      info_hash,
      Duration::from_secs(self.settings.timeout_seconds),
      self.settings.tcp_listen_port,
    ));

    let deadline = Instant::now() + Duration::from_secs(self.settings.timeout_seconds);
    let outcome = loop {
      if Instant::now() >= deadline {
        break Disposition::Timeout;
      }
      tokio::select! {
        _ = cancel.cancelled() => break Disposition::Cancelled,
        () = tokio::time::sleep(POLL_INTERVAL) => {}
      }
      match session.poll_once().await {
        PollOutcome::Pending => continue,
        PollOutcome::Ready(record) => break Disposition::Success(*record),
        PollOutcome::Failed(message) => break Disposition::Error(message),
      }
    };
    drop(session);

    match outcome {
      Disposition::Success(record) => self.on_success(info_hash, record).await,
      Disposition::Timeout => {
        metrics::inc(&self.bus.fetcher_timeouts);
        debug!("metadata fetch for {info_hash} timed out");
      }
      Disposition::Error(message) => {
        metrics::inc(&self.bus.fetcher_errors);
        debug!("metadata fetch for {info_hash} failed: {message}");
      }
      Disposition::Cancelled => {}
    }
  }

  async fn on_success(&self, info_hash: InfoHash, record: TorrentRecord) {
    match self.store.insert_torrent(&record).await {
      Ok(InsertOutcome::Inserted) => {
        metrics::inc(&self.bus.fetcher_successes);
        self.bus.push_recent_name(record.name.clone());
        self.processed.insert(info_hash);
        self.clear_pending(info_hash).await;
      }
      Ok(InsertOutcome::AlreadyIndexed) => {
        // Someone else already indexed this hash first; no counter moves,
        // only the bookkeeping that keeps this process from retrying it.
        self.processed.insert(info_hash);
        self.clear_pending(info_hash).await;
      }
      Err(error) => {
        metrics::inc(&self.bus.fetcher_errors);
        warn!("failed to persist torrent {info_hash}: {error}");
      }
    }
  }

  async fn clear_pending(&self, info_hash: InfoHash) {
    if let Err(error) = self.store.delete_pending(info_hash).await {
      warn!("failed to clear pending record for {info_hash}: {error}");
    }
  }
}

enum Disposition {
  Success(TorrentRecord),
  Timeout,
  Error(String),
  Cancelled,
}
