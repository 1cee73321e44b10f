//! Resolves the fixed bootstrap hostnames (spec §4.1/§6) into endpoints.
//! Resolution failures for one host never abort the others — DNS failure
//! is a transient-network error (spec §7) and is swallowed locally.

use std::net::SocketAddr;

use log::debug;

use crate::config::BOOTSTRAP_HOSTS;
use crate::model::NodeEndpoint;

/// Resolves every bootstrap hostname, collecting whatever addresses
/// succeed. A single bad hostname does not prevent the others from being
/// used.
pub async fn resolve() -> Vec<NodeEndpoint> {
  let mut endpoints = Vec::new();
  for (host, port) in BOOTSTRAP_HOSTS {
    match tokio::net::lookup_host((*host, *port)).await {
      Ok(addrs) => {
        for addr in addrs {
          if let SocketAddr::V4(v4) = addr {
            endpoints.push(NodeEndpoint::new(*v4.ip(), v4.port()));
          }
        }
      }
      Err(error) => debug!("bootstrap DNS resolution failed for {host}: {error}"),
    }
  }
  endpoints
}
