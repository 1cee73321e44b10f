//! Layered configuration: defaults → optional TOML file → environment → CLI
//! flags, each layer only overriding what it actually sets. Grounded on
//! `patrickett-dryas/src/config.rs`'s config-dir convention, generalised
//! from a bare TOML file handle into a typed `Settings` struct the way
//! `jsondevers-bobby-bit` and `torrust-torrust-tracker` use `clap` derive
//! plus `serde` for their settings types.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
  #[snafu(display("could not read config file {path:?}: {source}"))]
  ReadFile { path: PathBuf, source: std::io::Error },
  #[snafu(display("could not parse config file {path:?}: {source}"))]
  ParseFile { path: PathBuf, source: toml::de::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Every tunable named in spec §6, with the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub max_concurrent_fetches: usize,
  pub timeout_seconds: u64,
  pub max_queries_per_second: u32,
  pub max_seen_nodes: usize,
  pub min_nodes_for_warm_start: usize,
  pub node_save_period_seconds: u64,
  pub max_nodes_to_save: usize,
  pub dht_port: u16,
  /// Local source port bound before every outbound metadata-exchange TCP
  /// connection (spec §6's `TcpListenPort`) — this crawler never accepts
  /// inbound peer connections, but binding a stable local port keeps its
  /// outbound behaviour identical to a normal BitTorrent client's.
  pub tcp_listen_port: u16,
  pub database_path: PathBuf,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      max_concurrent_fetches: 50,
      timeout_seconds: 12,
      max_queries_per_second: 200,
      max_seen_nodes: 75_000,
      min_nodes_for_warm_start: 50,
      node_save_period_seconds: 60,
      max_nodes_to_save: 500,
      dht_port: 6881,
      tcp_listen_port: 55555,
      database_path: PathBuf::from("dht-harvester.sqlite3"),
    }
  }
}

/// Fixed bootstrap hostnames (spec §6) — not user-tunable, the set the DHT
/// protocol expects a compliant crawler to know.
pub const BOOTSTRAP_HOSTS: &[(&str, u16)] = &[
  ("router.bittorrent.com", 6881),
  ("dht.transmissionbt.com", 6881),
  ("router.utorrent.com", 6881),
];

/// CLI overrides. Every field is optional: `None` means "keep whatever the
/// file/defaults layer already decided."
#[derive(Debug, Parser)]
#[command(name = "dht-harvester", about = "Passive Sybil DHT crawler and BEP-9 metadata scraper")]
pub struct Args {
  /// Path to a TOML settings file.
  #[arg(long, env = "DHT_HARVESTER_CONFIG")]
  pub config: Option<PathBuf>,

  #[arg(long, env = "DHT_HARVESTER_DHT_PORT")]
  pub dht_port: Option<u16>,

  #[arg(long, env = "DHT_HARVESTER_TCP_LISTEN_PORT")]
  pub tcp_listen_port: Option<u16>,

  #[arg(long, env = "DHT_HARVESTER_MAX_CONCURRENT_FETCHES")]
  pub max_concurrent_fetches: Option<usize>,

  #[arg(long, env = "DHT_HARVESTER_TIMEOUT_SECONDS")]
  pub timeout_seconds: Option<u64>,

  #[arg(long, env = "DHT_HARVESTER_DATABASE_PATH")]
  pub database_path: Option<PathBuf>,
}

impl Settings {
  /// `defaults → file (if present) → CLI/env overrides`.
  pub fn load(args: &Args) -> Result<Self> {
    let mut settings = match &args.config {
      Some(path) => Self::from_file(path)?,
      None => Self::default(),
    };

    if let Some(v) = args.dht_port {
      settings.dht_port = v;
    }
    if let Some(v) = args.tcp_listen_port {
      settings.tcp_listen_port = v;
    }
    if let Some(v) = args.max_concurrent_fetches {
      settings.max_concurrent_fetches = v;
    }
    if let Some(v) = args.timeout_seconds {
      settings.timeout_seconds = v;
    }
    if let Some(v) = &args.database_path {
      settings.database_path = v.clone();
    }

    Ok(settings)
  }

  fn from_file(path: &Path) -> Result<Self> {
    let text = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    toml::from_str(&text).context(ParseFileSnafu { path })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec() {
    let s = Settings::default();
    assert_eq!(s.dht_port, 6881);
    assert_eq!(s.tcp_listen_port, 55555);
    assert!(s.max_concurrent_fetches >= 25 && s.max_concurrent_fetches <= 100);
    assert!(s.timeout_seconds >= 10 && s.timeout_seconds <= 15);
  }

  #[test]
  fn file_values_are_overridden_by_explicit_cli_flags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, "dht_port = 7000\n").unwrap();

    let args = Args {
      config: Some(path),
      dht_port: Some(9999),
      tcp_listen_port: None,
      max_concurrent_fetches: None,
      timeout_seconds: None,
      database_path: None,
    };

    let settings = Settings::load(&args).unwrap();
    assert_eq!(settings.dht_port, 9999);
  }
}
