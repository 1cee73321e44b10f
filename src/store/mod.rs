//! The store contract (spec §6): "any store implementing this is
//! acceptable". The crawler and fetcher only ever depend on the `Store`
//! trait below; `sqlite` is the one concrete implementation this crate
//! ships, grounded on `torrust-torrust-tracker/src/databases/sqlite.rs`'s
//! `r2d2`-pooled `rusqlite` pattern.

pub mod sqlite;

use async_trait::async_trait;
use snafu::Snafu;

use crate::model::{InfoHash, PendingHash, ResponsiveNode, TorrentRecord};

#[derive(Debug, Snafu)]
pub enum Error {
  #[snafu(display("failed to acquire a pooled connection: {source}"))]
  Pool { source: r2d2::Error },
  #[snafu(display("sqlite error: {source}"))]
  Sqlite { source: r2d2_sqlite::rusqlite::Error },
  #[snafu(display("a background task panicked during a store operation"))]
  TaskJoin,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of inserting a torrent record, distinguishing a genuine new
/// insert from "someone else already indexed this" (spec §4.2, "Persistence
/// of the record": a unique-index rejection is success-by-race, not an
/// error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
  Inserted,
  AlreadyIndexed,
}

#[async_trait]
pub trait Store: Send + Sync {
  /// Every persisted `InfoHash`, for the fetcher's startup processed-set
  /// seed and the crawler's `SeenHashes` seed (spec §4.3).
  async fn all_torrent_hashes(&self) -> Result<Vec<InfoHash>>;

  async fn has_torrent(&self, hash: InfoHash) -> Result<bool>;

  /// Insert a torrent and its file children in one transaction. Returns
  /// `AlreadyIndexed` rather than an error if the unique index on
  /// `InfoHash` rejects the insert (spec §4.2).
  async fn insert_torrent(&self, record: &TorrentRecord) -> Result<InsertOutcome>;

  /// Every pending hash, for the restart-recovery replay (spec §4.3).
  async fn all_pending_hashes(&self) -> Result<Vec<PendingHash>>;

  /// Upsert-by-`InfoHash`; a no-op if the hash is already pending.
  async fn upsert_pending(&self, pending: &PendingHash) -> Result<()>;

  async fn delete_pending(&self, hash: InfoHash) -> Result<()>;

  /// Top-N responsive nodes by response count, for warm start (spec §3/§4.1).
  async fn top_responsive_nodes(&self, limit: usize) -> Result<Vec<ResponsiveNode>>;

  async fn save_responsive_nodes(&self, nodes: &[ResponsiveNode]) -> Result<()>;
}
