//! KRPC (BEP-5) message construction and classification, on top of the
//! `bencode::Value` codec. Grounded on the wire shapes documented in the
//! teacher's `dht.rs` header comment and on the `5l1v3r1-dht-crawler`
//! `krpc_protocol` message envelope.

use crate::bencode::{dict, Value};
use crate::model::NodeEndpoint;

/// Static transaction id used for every outbound query (spec §4.1, §9):
/// this crawler never matches responses back to a specific query, which is
/// intentional for a passive Sybil observer.
pub const TRANSACTION_ID: &str = "aa";

/// Builds a `find_node` query with a fresh random id and target, both
/// supplied by the caller so the Sybil-identity randomisation policy lives
/// in one place (the crawler's send loop).
pub fn build_find_node(node_id: &[u8; 20], target: &[u8; 20]) -> Value {
  dict([
    ("t", Value::str(TRANSACTION_ID)),
    ("y", Value::str("q")),
    ("q", Value::str("find_node")),
    (
      "a",
      dict([
        ("id", Value::bytes(node_id.to_vec())),
        ("target", Value::bytes(target.to_vec())),
      ]),
    ),
  ])
}

/// What an inbound datagram turned out to be, once classified by its
/// top-level `y` field (spec §4.1). Anything that doesn't match one of
/// these shapes — including a missing `y` key or a parse failure upstream
/// — is not representable here; the caller drops it before ever
/// constructing an `Inbound`.
pub enum Inbound {
  /// An incoming query carrying a 20-byte `info_hash` argument. `port` is
  /// the peer's advertised BitTorrent port when the query was
  /// `announce_peer` with an explicit `port` argument — the only case
  /// where this crawler can identify an actual candidate peer to connect
  /// to for metadata (spec §4.1's "sniffs info-hashes... out of whatever
  /// traffic that draws in"; a bare `get_peers` query gives us a hash but
  /// no trustworthy peer port).
  QueryWithInfoHash { info_hash: [u8; 20], port: Option<u16> },
  /// A response carrying zero or more compact node records.
  ResponseWithNodes { nodes: Vec<NodeEndpoint> },
  /// Anything else well-formed but uninteresting to the crawler (e.g. a
  /// query without an info_hash, or a response without nodes).
  Uninteresting,
}

/// Classifies a decoded KRPC message. Returns `None` only when the message
/// has no usable `y` field at all (spec §8: "A KRPC datagram missing the
/// `y` key is dropped silently").
pub fn classify(message: &Value) -> Option<Inbound> {
  let y = message.get("y")?.as_str()?;
  match y {
    "q" => {
      let args = message.get("a");
      let info_hash = args
        .and_then(|a| a.get("info_hash"))
        .and_then(Value::as_bytes)
        .and_then(|b| <[u8; 20]>::try_from(b).ok());
      // `implied_port != 0` means "use the UDP source port, ignore the
      // `port` argument" (BEP-5); this crawler resolves that at the call
      // site, where the UDP source address is known, so it only surfaces
      // the explicit `port` argument here.
      let implied_port = args.and_then(|a| a.get("implied_port")).and_then(Value::as_int).unwrap_or(0) != 0;
      let explicit_port = args
        .and_then(|a| a.get("port"))
        .and_then(Value::as_int)
        .map(|p| p as u16);
      let port = if implied_port { None } else { explicit_port };
      Some(match info_hash {
        Some(info_hash) => Inbound::QueryWithInfoHash { info_hash, port },
        None => Inbound::Uninteresting,
      })
    }
    "r" => {
      let nodes = message
        .get("r")
        .and_then(|r| r.get("nodes"))
        .and_then(Value::as_bytes)
        .map(crate::dht::compact::parse_nodes)
        .unwrap_or_default();
      Some(Inbound::ResponseWithNodes { nodes })
    }
    _ => Some(Inbound::Uninteresting),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn find_node_query_round_trips_through_bencode() {
    let id = [1u8; 20];
    let target = [2u8; 20];
    let encoded = build_find_node(&id, &target).encode();
    let decoded = Value::decode(&encoded).unwrap();
    assert_eq!(decoded.get("q").unwrap().as_str(), Some("find_node"));
    assert_eq!(decoded.get("t").unwrap().as_str(), Some(TRANSACTION_ID));
    assert_eq!(
      decoded.get("a").unwrap().get("id").unwrap().as_bytes(),
      Some(id.as_slice())
    );
  }

  #[test]
  fn classifies_query_with_info_hash() {
    let msg = dict([
      ("y", Value::str("q")),
      ("q", Value::str("get_peers")),
      (
        "a",
        dict([
          ("id", Value::bytes(vec![0u8; 20])),
          ("info_hash", Value::bytes(vec![7u8; 20])),
        ]),
      ),
    ]);
    match classify(&msg) {
      Some(Inbound::QueryWithInfoHash { info_hash, port }) => {
        assert_eq!(info_hash, [7u8; 20]);
        assert_eq!(port, None);
      }
      _ => panic!("expected QueryWithInfoHash"),
    }
  }

  #[test]
  fn announce_peer_with_explicit_port_is_surfaced() {
    let msg = dict([
      ("y", Value::str("q")),
      ("q", Value::str("announce_peer")),
      (
        "a",
        dict([
          ("id", Value::bytes(vec![0u8; 20])),
          ("info_hash", Value::bytes(vec![7u8; 20])),
          ("port", Value::Int(6881)),
          ("implied_port", Value::Int(0)),
        ]),
      ),
    ]);
    match classify(&msg) {
      Some(Inbound::QueryWithInfoHash { port, .. }) => assert_eq!(port, Some(6881)),
      _ => panic!("expected QueryWithInfoHash"),
    }
  }

  #[test]
  fn announce_peer_with_implied_port_ignores_explicit_port() {
    let msg = dict([
      ("y", Value::str("q")),
      ("q", Value::str("announce_peer")),
      (
        "a",
        dict([
          ("id", Value::bytes(vec![0u8; 20])),
          ("info_hash", Value::bytes(vec![7u8; 20])),
          ("port", Value::Int(6881)),
          ("implied_port", Value::Int(1)),
        ]),
      ),
    ]);
    match classify(&msg) {
      Some(Inbound::QueryWithInfoHash { port, .. }) => assert_eq!(port, None),
      _ => panic!("expected QueryWithInfoHash"),
    }
  }

  #[test]
  fn missing_y_field_is_dropped() {
    let msg = dict([("q", Value::str("ping"))]);
    assert!(classify(&msg).is_none());
  }

  #[test]
  fn response_with_empty_nodes_parses_without_error() {
    let msg = dict([
      ("y", Value::str("r")),
      ("r", dict([("id", Value::bytes(vec![0u8; 20])), ("nodes", Value::bytes(vec![]))])),
    ]);
    match classify(&msg) {
      Some(Inbound::ResponseWithNodes { nodes }) => assert!(nodes.is_empty()),
      _ => panic!("expected ResponseWithNodes"),
    }
  }
}
