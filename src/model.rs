//! Core data types shared across the crawler, fetcher, pipeline and store.
//!
//! Grounded on the record shapes of spec §3. `InfoHash`'s canonical textual
//! form is fixed to uppercase hex everywhere in this crate (see DESIGN.md,
//! "canonical hex case").

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use snafu::{ResultExt, Snafu};

/// 20-byte BitTorrent info-hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

#[derive(Debug, Snafu)]
pub enum InfoHashError {
  #[snafu(display("info-hash must be 40 hex characters, got {length}"))]
  WrongLength { length: usize },
  #[snafu(display("info-hash is not valid hex: {source}"))]
  NotHex { source: hex::FromHexError },
}

impl InfoHash {
  pub fn from_bytes(bytes: [u8; 20]) -> Self {
    Self(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 20] {
    &self.0
  }

  /// Parse a 40-character hex string (either case) into an `InfoHash`.
  ///
  /// This is the single seam through which a textual hash is admitted
  /// anywhere in the pipeline; anything that isn't exactly 40 hex
  /// characters is rejected here.
  pub fn parse_hex(text: &str) -> Result<Self, InfoHashError> {
    if text.len() != 40 {
      return WrongLengthSnafu { length: text.len() }.fail();
    }
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(text, &mut bytes).context(NotHexSnafu)?;
    Ok(Self(bytes))
  }

  /// Canonical uppercase-hex textual form, used at every store/pipeline seam.
  pub fn to_hex(&self) -> String {
    hex::encode_upper(self.0)
  }
}

impl fmt::Display for InfoHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_hex())
  }
}

impl fmt::Debug for InfoHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "InfoHash({})", self.to_hex())
  }
}

/// A DHT peer's (IPv4 address, UDP port).
///
/// Equality and the `SeenNodes`/`CrawlQueue` key discipline are defined over
/// the dotted-string form, not the raw tuple, per spec §3.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeEndpoint {
  pub addr: Ipv4Addr,
  pub port: u16,
}

impl NodeEndpoint {
  pub fn new(addr: Ipv4Addr, port: u16) -> Self {
    Self { addr, port }
  }

  /// The key used in `SeenNodes` and as the store's node primary key.
  pub fn key(&self) -> String {
    format!("{}:{}", self.addr, self.port)
  }
}

impl fmt::Display for NodeEndpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.key())
  }
}

impl From<NodeEndpoint> for std::net::SocketAddr {
  fn from(e: NodeEndpoint) -> Self {
    std::net::SocketAddr::V4(std::net::SocketAddrV4::new(e.addr, e.port))
  }
}

/// One file entry inside a torrent's file tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
  pub path: String,
  pub size_bytes: u64,
}

/// A fully-validated, write-once torrent record (spec §3).
#[derive(Clone, Debug)]
pub struct TorrentRecord {
  pub info_hash: InfoHash,
  pub name: String,
  pub total_size_bytes: u64,
  pub discovered_at_utc: DateTime<Utc>,
  pub creation_date: Option<DateTime<Utc>>,
  pub comment: Option<String>,
  pub created_by: Option<String>,
  pub is_private: bool,
  pub piece_length_bytes: u64,
  pub piece_count: u64,
  pub trackers: Vec<String>,
  pub files: Vec<FileEntry>,
}

impl TorrentRecord {
  pub fn file_count(&self) -> usize {
    self.files.len()
  }

  /// `piece_count = ceil(total_size / piece_length)` when `piece_length > 0`
  /// (spec §3 invariant).
  pub fn expected_piece_count(total_size_bytes: u64, piece_length_bytes: u64) -> u64 {
    if piece_length_bytes == 0 {
      0
    } else {
      (total_size_bytes + piece_length_bytes - 1) / piece_length_bytes
    }
  }
}

/// A hash that has entered the fetcher's work set but has not yet reached a
/// terminal disposition (spec §3).
#[derive(Clone, Debug)]
pub struct PendingHash {
  pub info_hash: InfoHash,
  pub queued_at_utc: DateTime<Utc>,
}

/// A warm-start candidate: an endpoint that has responded to us at least
/// once, plus how many times.
#[derive(Clone, Debug)]
pub struct ResponsiveNode {
  pub endpoint: NodeEndpoint,
  pub response_count: u64,
  pub last_seen_utc: DateTime<Utc>,
}
