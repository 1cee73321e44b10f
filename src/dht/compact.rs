//! Compact node parsing (BEP-5): `[20 B node id][4 B IPv4 BE][2 B port BE]`.
//!
//! Grounded on the teacher's `parse_compact_peer_list` in `udp_tracker.rs`,
//! generalised from the 6-byte compact *peer* stride to the 26-byte compact
//! *node* stride `find_node` responses use.

use std::net::Ipv4Addr;

use crate::model::NodeEndpoint;

const COMPACT_NODE_LEN: usize = 26;

/// Parses a buffer of compact node records. A buffer of `k * 26` bytes
/// yields exactly `k` endpoints; a buffer whose length isn't a multiple of
/// 26 yields `floor(len / 26)` endpoints, discarding the trailing partial
/// record rather than erroring (spec §8).
pub fn parse_nodes(buf: &[u8]) -> Vec<NodeEndpoint> {
  buf
    .chunks_exact(COMPACT_NODE_LEN)
    .map(|chunk| {
      // chunk[0..20] is the advertised node id; the crawler is a passive
      // Sybil observer and keeps no routing table, so the id is discarded.
      let ip = Ipv4Addr::new(chunk[20], chunk[21], chunk[22], chunk[23]);
      let port = u16::from_be_bytes([chunk[24], chunk[25]]);
      NodeEndpoint::new(ip, port)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(id_byte: u8, ip: [u8; 4], port: u16) -> [u8; 26] {
    let mut buf = [id_byte; 26];
    buf[20..24].copy_from_slice(&ip);
    buf[24..26].copy_from_slice(&port.to_be_bytes());
    buf
  }

  #[test]
  fn parses_exact_multiple() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&record(1, [10, 0, 0, 1], 6881));
    buf.extend_from_slice(&record(2, [10, 0, 0, 2], 6882));
    let nodes = parse_nodes(&buf);
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0], NodeEndpoint::new(Ipv4Addr::new(10, 0, 0, 1), 6881));
    assert_eq!(nodes[1], NodeEndpoint::new(Ipv4Addr::new(10, 0, 0, 2), 6882));
  }

  #[test]
  fn empty_buffer_parses_without_error() {
    assert!(parse_nodes(&[]).is_empty());
  }

  #[test]
  fn trailing_partial_record_is_discarded() {
    let mut buf = record(1, [10, 0, 0, 1], 6881).to_vec();
    buf.extend_from_slice(&[0u8; 10]); // 10 extra bytes, not a full record
    let nodes = parse_nodes(&buf);
    assert_eq!(nodes.len(), 1);
  }
}
