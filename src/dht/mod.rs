//! The DHT crawler (spec §4.1): a passive Sybil observer that floods
//! `find_node` queries under a fresh random identity per query, and sniffs
//! info-hashes and fresh endpoints out of whatever traffic that draws in.
//!
//! State machine: `Starting → Bootstrapping → Crawling ⇄ Draining → Stopped`
//! (spec §4.1). `Crawling`/`Draining` is realised as the send loop blocking
//! on the crawl queue with a deadline: a timeout means the queue is empty,
//! which triggers a re-bootstrap before resuming.

pub mod bootstrap;
pub mod compact;
pub mod krpc;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use snafu::{ResultExt, Snafu};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::bencode::Value;
use crate::cancel::Token;
use crate::config::Settings;
use crate::metrics::{self, Bus};
use crate::model::{InfoHash, NodeEndpoint, ResponsiveNode};
use crate::pipeline::{self, SeenHashes};
use crate::store::Store;

const MAX_DATAGRAM_SIZE: usize = 65_535;
const REBOOTSTRAP_BACKOFF: Duration = Duration::from_secs(5);
const RECV_BUFFER_SIZE: usize = 512 * 1024;

#[derive(Debug, Snafu)]
pub enum Error {
  #[snafu(display("failed to bind UDP socket on port {port}: {source}"))]
  Bind { port: u16, source: std::io::Error },
  #[snafu(display("failed to configure UDP socket: {source}"))]
  Configure { source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Bounded-memory approximation of every endpoint seen so far (spec §3/§9):
/// when it grows past `max_size` the whole set is cleared rather than
/// evicted with an LRU. Single-writer by construction (only the receive
/// loop touches it), wrapped in a `Mutex` only because it's shared with the
/// `queue_size`-style metrics reads a future TUI might add.
struct SeenNodes {
  keys: Mutex<HashSet<String>>,
  max_size: usize,
}

impl SeenNodes {
  fn new(max_size: usize) -> Self {
    Self {
      keys: Mutex::new(HashSet::new()),
      max_size,
    }
  }

  /// Returns `true` if `endpoint` is new. Clears the whole set first if it
  /// has grown past `max_size` (spec §8: "`SeenNodes` reaching exactly
  /// `MaxSeenNodes + 1` triggers a clear and the next insert succeeds").
  fn insert(&self, endpoint: &NodeEndpoint) -> bool {
    let mut keys = self.keys.lock().expect("SeenNodes mutex poisoned");
    if keys.len() > self.max_size {
      keys.clear();
    }
    keys.insert(endpoint.key())
  }
}

/// Warm-start candidate tracking: endpoints that have actually responded to
/// us, with a response count (spec §3: "Recording only responders... is
/// essential").
struct ResponsiveNodes {
  by_key: Mutex<HashMap<String, ResponsiveNode>>,
}

impl ResponsiveNodes {
  fn new() -> Self {
    Self {
      by_key: Mutex::new(HashMap::new()),
    }
  }

  fn record(&self, endpoint: NodeEndpoint) {
    let mut map = self.by_key.lock().expect("ResponsiveNodes mutex poisoned");
    map
      .entry(endpoint.key())
      .and_modify(|node| {
        node.response_count += 1;
        node.last_seen_utc = chrono::Utc::now();
      })
      .or_insert(ResponsiveNode {
        endpoint,
        response_count: 1,
        last_seen_utc: chrono::Utc::now(),
      });
  }

  fn top(&self, limit: usize) -> Vec<ResponsiveNode> {
    let map = self.by_key.lock().expect("ResponsiveNodes mutex poisoned");
    let mut nodes: Vec<ResponsiveNode> = map.values().cloned().collect();
    nodes.sort_by(|a, b| b.response_count.cmp(&a.response_count));
    nodes.truncate(limit);
    nodes
  }
}

pub struct Crawler {
  settings: Arc<Settings>,
  bus: Arc<Bus>,
  store: Arc<dyn Store>,
  seen_hashes: Arc<SeenHashes>,
  hash_tx: pipeline::Sender,
  seen_nodes: SeenNodes,
  responsive: ResponsiveNodes,
}

impl Crawler {
  pub fn new(
    settings: Arc<Settings>,
    bus: Arc<Bus>,
    store: Arc<dyn Store>,
    seen_hashes: Arc<SeenHashes>,
    hash_tx: pipeline::Sender,
  ) -> Self {
    let max_seen_nodes = settings.max_seen_nodes;
    Self {
      settings,
      bus,
      store,
      seen_hashes,
      hash_tx,
      seen_nodes: SeenNodes::new(max_seen_nodes),
      responsive: ResponsiveNodes::new(),
    }
  }

  /// The crawler's single entry point (spec §4.1). Runs until `cancel`
  /// fires, then performs a best-effort warm-start save and returns.
  pub async fn run(self: Arc<Self>, mut cancel: Token) {
    let socket = match self.bind_socket().await {
      Ok(socket) => Arc::new(socket),
      Err(error) => {
        warn!("dht crawler could not bind its socket: {error}");
        return;
      }
    };

    info!("dht crawler bootstrapping on port {}", self.settings.dht_port);
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    self.seed_queue(&queue_tx).await;

    let send_task = tokio::spawn(self.clone().send_loop(socket.clone(), queue_tx.clone(), cancel.clone(), queue_rx));
    let recv_task = tokio::spawn(self.clone().recv_loop(socket.clone(), queue_tx.clone(), cancel.clone()));
    let save_task = tokio::spawn(self.clone().save_warm_start_periodically(cancel.clone()));

    cancel.cancelled().await;
    info!("dht crawler shutting down");

    let _ = tokio::join!(send_task, recv_task, save_task);
    self.save_warm_start().await;
  }

  async fn bind_socket(&self) -> Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let addr: SocketAddr = ([0, 0, 0, 0], self.settings.dht_port).into();
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context(ConfigureSnafu)?;
    socket.set_nonblocking(true).context(ConfigureSnafu)?;
    // Target 256 KiB - 1 MiB receive buffer to survive bursty receives
    // (spec §4.1).
    if let Err(error) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
      debug!("could not raise SO_RCVBUF, continuing with the OS default: {error}");
    }
    socket
      .bind(&addr.into())
      .context(BindSnafu { port: self.settings.dht_port })?;

    UdpSocket::from_std(socket.into()).context(ConfigureSnafu)
  }

  /// Warm-start: load persisted responders if there are enough of them,
  /// otherwise resolve the public bootstrap hostnames (spec §4.1).
  async fn seed_queue(&self, queue_tx: &mpsc::UnboundedSender<NodeEndpoint>) {
    match self.store.top_responsive_nodes(self.settings.max_nodes_to_save).await {
      Ok(nodes) if nodes.len() >= self.settings.min_nodes_for_warm_start => {
        info!("warm-starting from {} persisted nodes", nodes.len());
        for node in nodes {
          let _ = queue_tx.send(node.endpoint);
        }
      }
      _ => self.bootstrap(queue_tx).await,
    }
  }

  async fn bootstrap(&self, queue_tx: &mpsc::UnboundedSender<NodeEndpoint>) {
    let endpoints = bootstrap::resolve().await;
    debug!("bootstrap resolved {} endpoints", endpoints.len());
    for endpoint in endpoints {
      let _ = queue_tx.send(endpoint);
    }
  }

  /// Dequeues one endpoint at a time, sends a `find_node` query carrying a
  /// fresh random node id (the Sybil trick), and paces to
  /// `MaxQueriesPerSecond`. When the queue drains, re-bootstraps after a
  /// fixed back-off (spec §4.1).
  async fn send_loop(
    self: Arc<Self>,
    socket: Arc<UdpSocket>,
    queue_tx: mpsc::UnboundedSender<NodeEndpoint>,
    mut cancel: Token,
    mut queue_rx: mpsc::UnboundedReceiver<NodeEndpoint>,
  ) {
    let min_gap = Duration::from_millis((1000 / self.settings.max_queries_per_second.max(1)) as u64);

    loop {
      if cancel.is_cancelled() {
        return;
      }

      let endpoint = tokio::select! {
        _ = cancel.cancelled() => return,
        endpoint = queue_rx.recv() => endpoint,
      };

      let Some(endpoint) = endpoint else {
        return;
      };

      let mut rng = rand::thread_rng();
      let id: [u8; 20] = rng.gen();
      let target: [u8; 20] = rng.gen();
      let query = krpc::build_find_node(&id, &target);
      let encoded = query.encode();

      if let Err(error) = socket.send_to(&encoded, SocketAddr::from(endpoint)).await {
        debug!("send to {endpoint} failed: {error}");
      } else {
        metrics::inc(&self.bus.crawler_packets_sent);
      }

      tokio::select! {
        _ = cancel.cancelled() => return,
        () = tokio::time::sleep(min_gap) => {}
      }

      if queue_rx.is_empty() {
        tokio::select! {
          _ = cancel.cancelled() => return,
          () = tokio::time::sleep(REBOOTSTRAP_BACKOFF) => {
            self.bootstrap(&queue_tx).await;
          }
        }
      }
    }
  }

  /// Classifies every inbound datagram and reacts (spec §4.1).
  async fn recv_loop(self: Arc<Self>, socket: Arc<UdpSocket>, queue_tx: mpsc::UnboundedSender<NodeEndpoint>, mut cancel: Token) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
      let (len, from) = tokio::select! {
        _ = cancel.cancelled() => return,
        result = socket.recv_from(&mut buf) => match result {
          Ok(pair) => pair,
          Err(error) => {
            debug!("udp recv error: {error}");
            continue;
          }
        },
      };

      metrics::inc(&self.bus.crawler_packets_received);

      let Ok(message) = Value::decode(&buf[..len]) else {
        continue;
      };

      let SocketAddr::V4(from) = from else {
        continue;
      };

      match krpc::classify(&message) {
        Some(krpc::Inbound::QueryWithInfoHash { info_hash, port }) => {
          let candidate = NodeEndpoint::new(*from.ip(), port.unwrap_or_else(|| from.port()));
          self.handle_info_hash(info_hash, candidate);
        }
        Some(krpc::Inbound::ResponseWithNodes { nodes }) => {
          self.handle_nodes(nodes, &queue_tx);
          self.responsive.record(NodeEndpoint::new(*from.ip(), from.port()));
        }
        _ => {}
      }
    }
  }

  fn handle_info_hash(&self, raw: [u8; 20], candidate: NodeEndpoint) {
    metrics::inc(&self.bus.crawler_hashes_discovered);
    let hash = InfoHash::from_bytes(raw);
    if self.seen_hashes.insert(hash) {
      metrics::inc(&self.bus.crawler_unique_hashes);
    }
    self.hash_tx.submit(hash, candidate);
  }

  fn handle_nodes(&self, nodes: Vec<NodeEndpoint>, queue_tx: &mpsc::UnboundedSender<NodeEndpoint>) {
    for node in nodes {
      if self.seen_nodes.insert(&node) {
        metrics::inc(&self.bus.crawler_nodes_discovered);
        let _ = queue_tx.send(node);
      }
    }
  }

  async fn save_warm_start_periodically(self: Arc<Self>, mut cancel: Token) {
    let period = Duration::from_secs(self.settings.node_save_period_seconds);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => return,
        () = tokio::time::sleep(period) => self.save_warm_start().await,
      }
    }
  }

  async fn save_warm_start(&self) {
    let top = self.responsive.top(self.settings.max_nodes_to_save);
    if top.is_empty() {
      return;
    }
    if let Err(error) = self.store.save_responsive_nodes(&top).await {
      warn!("failed to persist warm-start nodes: {error}");
    }
  }
}
