//! Wires the crawler, fetcher, pipeline, store and cancellation signal
//! together and runs them to completion (spec §5: "a single cancellation
//! signal propagates to every task").

use std::sync::Arc;

use log::info;
use snafu::{ResultExt, Snafu};

use crate::cancel::Trigger;
use crate::config::Settings;
use crate::dht::Crawler;
use crate::fetcher::Fetcher;
use crate::metrics::Bus;
use crate::pipeline;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

#[derive(Debug, Snafu)]
pub enum Error {
  #[snafu(display("failed to open the store: {source}"))]
  Store { source: crate::store::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runs the full application until a shutdown signal arrives, then waits
/// for every task to drain.
pub async fn run(settings: Settings) -> Result<()> {
  let settings = Arc::new(settings);
  let bus = Arc::new(Bus::new());
  let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&settings.database_path).context(StoreSnafu)?);

  let (hash_tx, hash_rx) = pipeline::channel();
  let seen_hashes = Arc::new(pipeline::SeenHashes::new());

  let fetcher = Arc::new(Fetcher::new(settings.clone(), bus.clone(), store.clone()));
  if let Err(error) = fetcher.recover(&hash_tx).await {
    log::warn!("restart recovery failed: {error}");
  }
  if let Ok(hashes) = store.all_torrent_hashes().await {
    seen_hashes.seed(hashes);
  }

  let crawler = Arc::new(Crawler::new(settings.clone(), bus.clone(), store.clone(), seen_hashes, hash_tx));

  let (trigger, token) = Trigger::new();

  let crawler_task = tokio::spawn(crawler.run(token.clone()));
  let fetcher_task = tokio::spawn(fetcher.run(hash_rx, token.clone()));

  info!("dht-harvester running; send SIGINT/SIGTERM to stop");
  wait_for_shutdown_signal().await;
  info!("shutdown signal received");
  trigger.cancel();

  let _ = tokio::join!(crawler_task, fetcher_task);
  info!("dht-harvester stopped cleanly");
  Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
  use tokio::signal::unix::{signal, SignalKind};

  let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
  tokio::select! {
    _ = tokio::signal::ctrl_c() => {}
    _ = sigterm.recv() => {}
  }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
  let _ = tokio::signal::ctrl_c().await;
}
