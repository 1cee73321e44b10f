//! The base BEP-3 wire message, framed as `<4-byte length><1-byte id><payload>`
//! with a zero-length message meaning keep-alive.
//!
//! Grounded on the teacher's `peer::message::Message` (absent from this
//! pack, known only by its usage in `info_fetcher.rs`/`strategy.rs`),
//! generalised to async framing over `tokio::net::TcpStream`.

use snafu::{ensure, ResultExt, Snafu};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;
const ID_EXTENDED: u8 = 20;

/// A message too large to be a legitimate metadata exchange (spec §4.2:
/// this crate never downloads piece payload, so nothing on this connection
/// should ever approach the full `2^16` BEP-3 length-prefix range).
const MAX_MESSAGE_LEN: u32 = 1 << 20;

#[derive(Debug, Snafu)]
pub enum Error {
  #[snafu(display("peer message length {len} exceeds the {max} byte cap"))]
  TooLarge { len: u32, max: u32 },
  #[snafu(display("i/o error reading or writing a peer message: {source}"))]
  Io { source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub enum Message {
  KeepAlive,
  Choke,
  Unchoke,
  Interested,
  NotInterested,
  Have { piece_index: u32 },
  Bitfield { bits: Vec<u8> },
  Request { index: u32, begin: u32, length: u32 },
  Piece { index: u32, begin: u32, block: Vec<u8> },
  Cancel { index: u32, begin: u32, length: u32 },
  /// A BEP-10 extended message: `id` is the locally-negotiated extended
  /// message id (0 for the handshake itself), `payload` is whatever that
  /// extension defines (see `peer::extended`).
  Extended { id: u8, payload: Vec<u8> },
}

impl Message {
  pub fn new_extended(id: u8, payload: Vec<u8>) -> Self {
    Message::Extended { id, payload }
  }

  fn encode(&self) -> Vec<u8> {
    let mut body = Vec::new();
    match self {
      Message::KeepAlive => return Vec::new(),
      Message::Choke => body.push(ID_CHOKE),
      Message::Unchoke => body.push(ID_UNCHOKE),
      Message::Interested => body.push(ID_INTERESTED),
      Message::NotInterested => body.push(ID_NOT_INTERESTED),
      Message::Have { piece_index } => {
        body.push(ID_HAVE);
        body.extend_from_slice(&piece_index.to_be_bytes());
      }
      Message::Bitfield { bits } => {
        body.push(ID_BITFIELD);
        body.extend_from_slice(bits);
      }
      Message::Request { index, begin, length } => {
        body.push(ID_REQUEST);
        body.extend_from_slice(&index.to_be_bytes());
        body.extend_from_slice(&begin.to_be_bytes());
        body.extend_from_slice(&length.to_be_bytes());
      }
      Message::Piece { index, begin, block } => {
        body.push(ID_PIECE);
        body.extend_from_slice(&index.to_be_bytes());
        body.extend_from_slice(&begin.to_be_bytes());
        body.extend_from_slice(block);
      }
      Message::Cancel { index, begin, length } => {
        body.push(ID_CANCEL);
        body.extend_from_slice(&index.to_be_bytes());
        body.extend_from_slice(&begin.to_be_bytes());
        body.extend_from_slice(&length.to_be_bytes());
      }
      Message::Extended { id, payload } => {
        body.push(ID_EXTENDED);
        body.push(*id);
        body.extend_from_slice(payload);
      }
    }
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    framed
  }

  pub async fn write_to<W: tokio::io::AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
    writer.write_all(&self.encode()).await.context(IoSnafu)
  }

  pub async fn read_from<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.context(IoSnafu)?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
      return Ok(Message::KeepAlive);
    }
    ensure!(len <= MAX_MESSAGE_LEN, TooLargeSnafu { len, max: MAX_MESSAGE_LEN });

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.context(IoSnafu)?;
    Self::parse(&body)
  }

  fn parse(body: &[u8]) -> Result<Self> {
    let id = body[0];
    let rest = &body[1..];
    Ok(match id {
      ID_CHOKE => Message::Choke,
      ID_UNCHOKE => Message::Unchoke,
      ID_INTERESTED => Message::Interested,
      ID_NOT_INTERESTED => Message::NotInterested,
      ID_HAVE if rest.len() >= 4 => Message::Have {
        piece_index: u32::from_be_bytes(rest[0..4].try_into().unwrap()),
      },
      ID_BITFIELD => Message::Bitfield { bits: rest.to_vec() },
      ID_REQUEST if rest.len() >= 12 => Message::Request {
        index: u32::from_be_bytes(rest[0..4].try_into().unwrap()),
        begin: u32::from_be_bytes(rest[4..8].try_into().unwrap()),
        length: u32::from_be_bytes(rest[8..12].try_into().unwrap()),
      },
      ID_PIECE if rest.len() >= 8 => Message::Piece {
        index: u32::from_be_bytes(rest[0..4].try_into().unwrap()),
        begin: u32::from_be_bytes(rest[4..8].try_into().unwrap()),
        block: rest[8..].to_vec(),
      },
      ID_CANCEL if rest.len() >= 12 => Message::Cancel {
        index: u32::from_be_bytes(rest[0..4].try_into().unwrap()),
        begin: u32::from_be_bytes(rest[4..8].try_into().unwrap()),
        length: u32::from_be_bytes(rest[8..12].try_into().unwrap()),
      },
      ID_EXTENDED if !rest.is_empty() => Message::Extended {
        id: rest[0],
        payload: rest[1..].to_vec(),
      },
      // An id this crate doesn't understand, or a too-short body for the
      // recognised id: treated as an uninteresting keep-alive-equivalent
      // rather than a hard error, since a peer sending a well-formed
      // message this crate has no use for (e.g. a `have` from a seeder
      // with no downloadable payload) is ordinary BEP-3 traffic.
      _ => Message::KeepAlive,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn round_trips_extended_message() {
    let msg = Message::new_extended(3, vec![1, 2, 3]);
    let mut buf = Vec::new();
    msg.write_to(&mut buf).await.unwrap();
    let decoded = Message::read_from(&mut buf.as_slice()).await.unwrap();
    match decoded {
      Message::Extended { id, payload } => {
        assert_eq!(id, 3);
        assert_eq!(payload, vec![1, 2, 3]);
      }
      _ => panic!("expected Extended"),
    }
  }

  #[tokio::test]
  async fn keep_alive_round_trips() {
    let mut buf = Vec::new();
    Message::KeepAlive.write_to(&mut buf).await.unwrap();
    assert_eq!(buf, vec![0, 0, 0, 0]);
    let decoded = Message::read_from(&mut buf.as_slice()).await.unwrap();
    assert!(matches!(decoded, Message::KeepAlive));
  }

  #[tokio::test]
  async fn oversized_length_prefix_is_rejected() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(MAX_MESSAGE_LEN + 1).to_be_bytes());
    let result = Message::read_from(&mut buf.as_slice()).await;
    assert!(matches!(result, Err(Error::TooLarge { .. })));
  }
}
