//! `rusqlite`-backed `Store`, pooled with `r2d2` exactly as
//! `torrust-torrust-tracker/src/databases/sqlite.rs` pools its connections.
//! `rusqlite` is synchronous, so every operation is dispatched to
//! `tokio::task::spawn_blocking` rather than blocking the async runtime.

use std::path::Path;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use r2d2::Pool;
use r2d2_sqlite::rusqlite::{params, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use snafu::ResultExt;

use super::{Error, InsertOutcome, PoolSnafu, Result, SqliteSnafu, Store, TaskJoinSnafu};
use crate::model::{FileEntry, InfoHash, NodeEndpoint, PendingHash, ResponsiveNode, TorrentRecord};

pub struct SqliteStore {
  pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let manager = SqliteConnectionManager::file(path.as_ref());
    let pool = Pool::new(manager).context(PoolSnafu)?;
    let store = Self { pool };
    store.create_tables()?;
    Ok(store)
  }

  fn create_tables(&self) -> Result<()> {
    let conn = self.pool.get().context(PoolSnafu)?;
    conn
      .execute_batch(
        "
        CREATE TABLE IF NOT EXISTS torrents (
          info_hash          TEXT PRIMARY KEY,
          name                TEXT NOT NULL,
          total_size_bytes    INTEGER NOT NULL,
          discovered_at_utc   INTEGER NOT NULL,
          creation_date       INTEGER,
          comment             TEXT,
          created_by          TEXT,
          is_private          INTEGER NOT NULL,
          piece_length_bytes  INTEGER NOT NULL,
          piece_count         INTEGER NOT NULL,
          trackers            TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS torrent_files (
          info_hash  TEXT NOT NULL REFERENCES torrents(info_hash),
          path        TEXT NOT NULL,
          size_bytes  INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS pending_hashes (
          info_hash    TEXT PRIMARY KEY,
          queued_at_utc INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS nodes (
          ip               TEXT NOT NULL,
          port              INTEGER NOT NULL,
          response_count    INTEGER NOT NULL,
          last_seen_utc     INTEGER NOT NULL,
          PRIMARY KEY (ip, port)
        );
        ",
      )
      .context(SqliteSnafu)?;
    Ok(())
  }
}

/// Runs a blocking closure against a pooled connection on the blocking
/// thread pool, translating join failures into `Error::TaskJoin`.
async fn with_conn<T, F>(pool: Pool<SqliteConnectionManager>, f: F) -> Result<T>
where
  T: Send + 'static,
  F: FnOnce(&mut r2d2_sqlite::rusqlite::Connection) -> Result<T> + Send + 'static,
{
  tokio::task::spawn_blocking(move || {
    let mut conn = pool.get().context(PoolSnafu)?;
    f(&mut conn)
  })
  .await
  .ok()
  .ok_or(Error::TaskJoin)?
}

#[async_trait]
impl Store for SqliteStore {
  async fn all_torrent_hashes(&self) -> Result<Vec<InfoHash>> {
    with_conn(self.pool.clone(), |conn| {
      let mut stmt = conn
        .prepare("SELECT info_hash FROM torrents")
        .context(SqliteSnafu)?;
      let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context(SqliteSnafu)?;
      let mut hashes = Vec::new();
      for row in rows {
        let text = row.context(SqliteSnafu)?;
        if let Ok(hash) = InfoHash::parse_hex(&text) {
          hashes.push(hash);
        }
      }
      Ok(hashes)
    })
    .await
  }

  async fn has_torrent(&self, hash: InfoHash) -> Result<bool> {
    with_conn(self.pool.clone(), move |conn| {
      let found: Option<String> = conn
        .query_row(
          "SELECT info_hash FROM torrents WHERE info_hash = ?1",
          params![hash.to_hex()],
          |row| row.get(0),
        )
        .optional()
        .context(SqliteSnafu)?;
      Ok(found.is_some())
    })
    .await
  }

  async fn insert_torrent(&self, record: &TorrentRecord) -> Result<InsertOutcome> {
    let record = record.clone();
    with_conn(self.pool.clone(), move |conn| {
      let tx = conn.transaction().context(SqliteSnafu)?;

      let trackers = record.trackers.join("\n");
      let inserted = tx
        .execute(
          "INSERT OR IGNORE INTO torrents
             (info_hash, name, total_size_bytes, discovered_at_utc, creation_date,
              comment, created_by, is_private, piece_length_bytes, piece_count, trackers)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          params![
            record.info_hash.to_hex(),
            record.name,
            record.total_size_bytes as i64,
            record.discovered_at_utc.timestamp(),
            record.creation_date.map(|d| d.timestamp()),
            record.comment,
            record.created_by,
            record.is_private as i64,
            record.piece_length_bytes as i64,
            record.piece_count as i64,
            trackers,
          ],
        )
        .context(SqliteSnafu)?;

      if inserted == 0 {
        // Someone else already holds this info_hash; nothing to commit.
        return Ok(InsertOutcome::AlreadyIndexed);
      }

      for file in &record.files {
        tx.execute(
          "INSERT INTO torrent_files (info_hash, path, size_bytes) VALUES (?1, ?2, ?3)",
          params![record.info_hash.to_hex(), file.path, file.size_bytes as i64],
        )
        .context(SqliteSnafu)?;
      }

      tx.commit().context(SqliteSnafu)?;
      Ok(InsertOutcome::Inserted)
    })
    .await
  }

  async fn all_pending_hashes(&self) -> Result<Vec<PendingHash>> {
    with_conn(self.pool.clone(), |conn| {
      let mut stmt = conn
        .prepare("SELECT info_hash, queued_at_utc FROM pending_hashes")
        .context(SqliteSnafu)?;
      let rows = stmt
        .query_map([], |row| {
          let hash: String = row.get(0)?;
          let queued_at: i64 = row.get(1)?;
          Ok((hash, queued_at))
        })
        .context(SqliteSnafu)?;

      let mut pending = Vec::new();
      for row in rows {
        let (hash_text, queued_at) = row.context(SqliteSnafu)?;
        if let Ok(info_hash) = InfoHash::parse_hex(&hash_text) {
          pending.push(PendingHash {
            info_hash,
            queued_at_utc: Utc.timestamp_opt(queued_at, 0).single().unwrap_or_else(Utc::now),
          });
        }
      }
      Ok(pending)
    })
    .await
  }

  async fn upsert_pending(&self, pending: &PendingHash) -> Result<()> {
    let pending = pending.clone();
    with_conn(self.pool.clone(), move |conn| {
      conn
        .execute(
          "INSERT OR IGNORE INTO pending_hashes (info_hash, queued_at_utc) VALUES (?1, ?2)",
          params![pending.info_hash.to_hex(), pending.queued_at_utc.timestamp()],
        )
        .context(SqliteSnafu)?;
      Ok(())
    })
    .await
  }

  async fn delete_pending(&self, hash: InfoHash) -> Result<()> {
    with_conn(self.pool.clone(), move |conn| {
      conn
        .execute(
          "DELETE FROM pending_hashes WHERE info_hash = ?1",
          params![hash.to_hex()],
        )
        .context(SqliteSnafu)?;
      Ok(())
    })
    .await
  }

  async fn top_responsive_nodes(&self, limit: usize) -> Result<Vec<ResponsiveNode>> {
    with_conn(self.pool.clone(), move |conn| {
      let mut stmt = conn
        .prepare("SELECT ip, port, response_count, last_seen_utc FROM nodes ORDER BY last_seen_utc DESC LIMIT ?1")
        .context(SqliteSnafu)?;
      let rows = stmt
        .query_map(params![limit as i64], |row| {
          let ip: String = row.get(0)?;
          let port: i64 = row.get(1)?;
          let response_count: i64 = row.get(2)?;
          let last_seen: i64 = row.get(3)?;
          Ok((ip, port, response_count, last_seen))
        })
        .context(SqliteSnafu)?;

      let mut nodes = Vec::new();
      for row in rows {
        let (ip, port, response_count, last_seen) = row.context(SqliteSnafu)?;
        if let Ok(addr) = ip.parse() {
          nodes.push(ResponsiveNode {
            endpoint: NodeEndpoint::new(addr, port as u16),
            response_count: response_count as u64,
            last_seen_utc: Utc.timestamp_opt(last_seen, 0).single().unwrap_or_else(Utc::now),
          });
        }
      }
      Ok(nodes)
    })
    .await
  }

  async fn save_responsive_nodes(&self, nodes: &[ResponsiveNode]) -> Result<()> {
    let nodes = nodes.to_vec();
    with_conn(self.pool.clone(), move |conn| {
      for node in &nodes {
        conn
          .execute(
            "INSERT INTO nodes (ip, port, response_count, last_seen_utc) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ip, port) DO UPDATE SET
               response_count = excluded.response_count,
               last_seen_utc = excluded.last_seen_utc",
            params![
              node.endpoint.addr.to_string(),
              node.endpoint.port,
              node.response_count as i64,
              node.last_seen_utc.timestamp(),
            ],
          )
          .context(SqliteSnafu)?;
      }
      Ok(())
    })
    .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn sample_record(hex: &str) -> TorrentRecord {
    TorrentRecord {
      info_hash: InfoHash::parse_hex(hex).unwrap(),
      name: "demo".into(),
      total_size_bytes: 1024,
      discovered_at_utc: Utc::now(),
      creation_date: None,
      comment: None,
      created_by: None,
      is_private: false,
      piece_length_bytes: 16_384,
      piece_count: 1,
      trackers: vec![],
      files: vec![FileEntry {
        path: "demo.bin".into(),
        size_bytes: 1024,
      }],
    }
  }

  #[tokio::test]
  async fn insert_is_write_once_and_duplicates_are_silently_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("test.sqlite3")).unwrap();
    let hash = "0123456789ABCDEF0123456789ABCDEF01234567";
    let record = sample_record(hash);

    assert_eq!(
      store.insert_torrent(&record).await.unwrap(),
      InsertOutcome::Inserted
    );
    assert_eq!(
      store.insert_torrent(&record).await.unwrap(),
      InsertOutcome::AlreadyIndexed
    );

    let hashes = store.all_torrent_hashes().await.unwrap();
    assert_eq!(hashes.len(), 1);
  }

  #[tokio::test]
  async fn pending_round_trips_and_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("test.sqlite3")).unwrap();
    let hash = InfoHash::parse_hex("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF").unwrap();

    store
      .upsert_pending(&PendingHash {
        info_hash: hash,
        queued_at_utc: Utc::now(),
      })
      .await
      .unwrap();

    let pending = store.all_pending_hashes().await.unwrap();
    assert_eq!(pending.len(), 1);

    store.delete_pending(hash).await.unwrap();
    assert!(store.all_pending_hashes().await.unwrap().is_empty());
  }
}
