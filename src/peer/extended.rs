//! BEP-10 extended handshake and BEP-9 `ut_metadata` messages, built on the
//! bencode codec.
//!
//! Grounded on the teacher's `extended::Handshake`/`extended::UtMetadata`
//! (absent from this pack as source but described by their usage in
//! `info_fetcher.rs`: a `metadata_size` field, an `m` name-to-id map keyed
//! on `"ut_metadata"`, and a piece length of 16 KiB).

use snafu::{OptionExt, Snafu};

use crate::bencode::{dict, Value};

pub const UT_METADATA_NAME: &str = "ut_metadata";
pub const PIECE_LENGTH: usize = 16 * 1024;

#[derive(Debug, Snafu)]
pub enum Error {
  #[snafu(display("extended handshake payload did not decode as a bencoded dict: {source}"))]
  Decode { source: crate::bencode::Error },
  #[snafu(display("extended handshake is missing the 'm' dictionary"))]
  MissingExtensionMap,
  #[snafu(display("extended handshake did not advertise ut_metadata support"))]
  NoUtMetadata,
  #[snafu(display("extended handshake did not advertise metadata_size"))]
  NoMetadataSize,
}

pub type Result<T> = std::result::Result<T, Error>;

/// What this crate sends and expects back for the BEP-10 handshake: only
/// `ut_metadata` is ever offered, since peer wire is used exclusively to
/// fetch the `info` dict (spec §4.2 Non-goals: no piece download).
#[derive(Debug, Clone)]
pub struct Handshake {
  pub metadata_size: Option<usize>,
  pub ut_metadata_id: Option<u8>,
}

impl Handshake {
  /// The handshake this crate offers: `m: {ut_metadata: 1}`, no
  /// `metadata_size` (only a metadata *source* advertises that field).
  pub fn ours() -> Value {
    dict([("m", dict([(UT_METADATA_NAME, Value::Int(1))]))])
  }

  pub fn parse(payload: &[u8]) -> Result<Self> {
    let value = Value::decode(payload).context(DecodeSnafu)?;
    let m = value.get("m").context(MissingExtensionMapSnafu)?;
    let ut_metadata_id = m.get(UT_METADATA_NAME).and_then(Value::as_int).map(|i| i as u8);
    let metadata_size = value.get("metadata_size").and_then(Value::as_int).map(|i| i as usize);
    Ok(Self {
      metadata_size,
      ut_metadata_id,
    })
  }

  pub fn require_metadata_size(&self) -> Result<usize> {
    self.metadata_size.context(NoMetadataSizeSnafu)
  }

  pub fn require_ut_metadata_id(&self) -> Result<u8> {
    self.ut_metadata_id.context(NoUtMetadataSnafu)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
  Request,
  Data,
  Reject,
}

impl MsgType {
  fn as_i64(self) -> i64 {
    match self {
      MsgType::Request => 0,
      MsgType::Data => 1,
      MsgType::Reject => 2,
    }
  }

  fn from_i64(v: i64) -> Option<Self> {
    match v {
      0 => Some(MsgType::Request),
      1 => Some(MsgType::Data),
      2 => Some(MsgType::Reject),
      _ => None,
    }
  }
}

/// One `ut_metadata` message. For `Data`, the raw piece bytes follow this
/// bencoded dict in the same `Message::Extended` payload, undelimited — the
/// receiver must re-encode this dict to find the byte offset where the
/// piece data begins (mirrors the teacher's `ut_metadata_data` comment on
/// the same quirk).
#[derive(Debug, Clone)]
pub struct UtMetadata {
  pub msg_type: MsgType,
  pub piece: usize,
  pub total_size: Option<usize>,
}

impl UtMetadata {
  pub fn request(piece: usize) -> Self {
    Self {
      msg_type: MsgType::Request,
      piece,
      total_size: None,
    }
  }

  pub fn data(piece: usize, total_size: usize) -> Self {
    Self {
      msg_type: MsgType::Data,
      piece,
      total_size: Some(total_size),
    }
  }

  pub fn encode(&self) -> Vec<u8> {
    let mut entries = vec![
      ("msg_type", Value::Int(self.msg_type.as_i64())),
      ("piece", Value::Int(self.piece as i64)),
    ];
    if let Some(total_size) = self.total_size {
      entries.push(("total_size", Value::Int(total_size as i64)));
    }
    dict(entries).encode()
  }

  /// Parses the leading bencoded dict out of `payload`, returning the
  /// message and the byte offset where raw piece data (if any) begins.
  pub fn parse(payload: &[u8]) -> Result<(Self, usize)> {
    let (value, rest) = Value::decode_prefix(payload).context(DecodeSnafu)?;
    let consumed = payload.len() - rest.len();
    let msg_type = value
      .get("msg_type")
      .and_then(Value::as_int)
      .and_then(MsgType::from_i64)
      .unwrap_or(MsgType::Reject);
    let piece = value.get("piece").and_then(Value::as_int).unwrap_or(0) as usize;
    let total_size = value.get("total_size").and_then(Value::as_int).map(|i| i as usize);
    Ok((
      Self {
        msg_type,
        piece,
        total_size,
      },
      consumed,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ut_metadata_request_round_trips() {
    let msg = UtMetadata::request(3);
    let encoded = msg.encode();
    let (decoded, consumed) = UtMetadata::parse(&encoded).unwrap();
    assert_eq!(decoded.piece, 3);
    assert_eq!(decoded.msg_type, MsgType::Request);
    assert_eq!(consumed, encoded.len());
  }

  #[test]
  fn ut_metadata_data_trailing_bytes_are_not_consumed() {
    let msg = UtMetadata::data(0, 100);
    let mut payload = msg.encode();
    let prefix_len = payload.len();
    payload.extend_from_slice(&[0xAB; 16]);
    let (decoded, consumed) = UtMetadata::parse(&payload).unwrap();
    assert_eq!(decoded.msg_type, MsgType::Data);
    assert_eq!(consumed, prefix_len);
  }

  #[test]
  fn handshake_parses_metadata_size_and_ut_metadata_id() {
    let payload = dict([
      ("m", dict([(UT_METADATA_NAME, Value::Int(5))])),
      ("metadata_size", Value::Int(1234)),
    ])
    .encode();
    let handshake = Handshake::parse(&payload).unwrap();
    assert_eq!(handshake.require_ut_metadata_id().unwrap(), 5);
    assert_eq!(handshake.require_metadata_size().unwrap(), 1234);
  }

  #[test]
  fn handshake_missing_metadata_size_is_an_error() {
    let payload = dict([("m", dict([(UT_METADATA_NAME, Value::Int(1))]))]).encode();
    let handshake = Handshake::parse(&payload).unwrap();
    assert!(matches!(handshake.require_metadata_size(), Err(Error::NoMetadataSize)));
  }
}
