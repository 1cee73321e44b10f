//! A small bencode codec: byte string, integer, list, dictionary.
//!
//! This is the wire encoding KRPC (BEP-5) and the metadata extension
//! (BEP-9/10) messages use. Encoding is canonical: dictionary keys are
//! emitted in sorted byte order and integers in minimal decimal form, so
//! `decode(encode(x)) == x` for every `Value` (spec §8). Decoding preserves
//! first-occurrence semantics for duplicate dictionary keys and never
//! interprets byte strings as text.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
  #[snafu(display("unexpected end of input while decoding bencode"))]
  Truncated,
  #[snafu(display("expected {expected} at offset {offset}"))]
  Unexpected { expected: &'static str, offset: usize },
  #[snafu(display("integer at offset {offset} is not valid ASCII decimal"))]
  BadInteger { offset: usize },
  #[snafu(display("trailing data after a complete bencode value"))]
  TrailingData,
}

pub type Result<T> = std::result::Result<T, Error>;

/// A decoded bencode value. Dictionary keys and byte strings are raw bytes,
/// never `String`, since bencode byte strings carry no encoding guarantee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
  Bytes(Vec<u8>),
  Int(i64),
  List(Vec<Value>),
  Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
  pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
    Value::Bytes(b.into())
  }

  pub fn str(s: impl AsRef<str>) -> Self {
    Value::Bytes(s.as_ref().as_bytes().to_vec())
  }

  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      Value::Bytes(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(l) => Some(l),
      _ => None,
    }
  }

  pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
    match self {
      Value::Dict(d) => Some(d),
      _ => None,
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.as_dict().and_then(|d| d.get(key.as_bytes()))
  }

  /// Encode canonically: sorted dict keys, minimal integer form.
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    self.encode_into(&mut out);
    out
  }

  fn encode_into(&self, out: &mut Vec<u8>) {
    match self {
      Value::Bytes(b) => {
        out.extend_from_slice(b.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(b);
      }
      Value::Int(i) => {
        out.push(b'i');
        out.extend_from_slice(i.to_string().as_bytes());
        out.push(b'e');
      }
      Value::List(items) => {
        out.push(b'l');
        for item in items {
          item.encode_into(out);
        }
        out.push(b'e');
      }
      Value::Dict(map) => {
        out.push(b'd');
        // BTreeMap already iterates in sorted byte order.
        for (k, v) in map {
          Value::Bytes(k.clone()).encode_into(out);
          v.encode_into(out);
        }
        out.push(b'e');
      }
    }
  }

  /// Decode exactly one value, requiring the whole buffer be consumed.
  pub fn decode(input: &[u8]) -> Result<Self> {
    let mut parser = Parser { buf: input, pos: 0 };
    let value = parser.parse_value()?;
    if parser.pos != input.len() {
      return Err(Error::TrailingData);
    }
    Ok(value)
  }

  /// Decode one value, returning any unconsumed trailing bytes.
  pub fn decode_prefix(input: &[u8]) -> Result<(Self, &[u8])> {
    let mut parser = Parser { buf: input, pos: 0 };
    let value = parser.parse_value()?;
    Ok((value, &input[parser.pos..]))
  }
}

struct Parser<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> Parser<'a> {
  fn peek(&self) -> Result<u8> {
    self.buf.get(self.pos).copied().ok_or(Error::Truncated)
  }

  fn advance(&mut self) -> Result<u8> {
    let b = self.peek()?;
    self.pos += 1;
    Ok(b)
  }

  fn parse_value(&mut self) -> Result<Value> {
    match self.peek()? {
      b'i' => self.parse_int(),
      b'l' => self.parse_list(),
      b'd' => self.parse_dict(),
      b'0'..=b'9' => self.parse_bytes(),
      _ => UnexpectedSnafu {
        expected: "one of 'i', 'l', 'd', or a digit",
        offset: self.pos,
      }
      .fail(),
    }
  }

  fn parse_int(&mut self) -> Result<Value> {
    self.advance()?; // 'i'
    let start = self.pos;
    while self.peek()? != b'e' {
      self.pos += 1;
    }
    let digits = &self.buf[start..self.pos];
    self.advance()?; // 'e'
    let text = std::str::from_utf8(digits).map_err(|_| Error::BadInteger { offset: start })?;
    let value = text
      .parse::<i64>()
      .map_err(|_| Error::BadInteger { offset: start })?;
    Ok(Value::Int(value))
  }

  fn parse_bytes(&mut self) -> Result<Value> {
    let start = self.pos;
    while self.peek()? != b':' {
      self.pos += 1;
    }
    let len_digits = &self.buf[start..self.pos];
    self.advance()?; // ':'
    let len_text =
      std::str::from_utf8(len_digits).map_err(|_| Error::BadInteger { offset: start })?;
    let len: usize = len_text
      .parse()
      .map_err(|_| Error::BadInteger { offset: start })?;
    let end = self
      .pos
      .checked_add(len)
      .filter(|&e| e <= self.buf.len())
      .ok_or(Error::Truncated)?;
    let bytes = self.buf[self.pos..end].to_vec();
    self.pos = end;
    Ok(Value::Bytes(bytes))
  }

  fn parse_list(&mut self) -> Result<Value> {
    self.advance()?; // 'l'
    let mut items = Vec::new();
    while self.peek()? != b'e' {
      items.push(self.parse_value()?);
    }
    self.advance()?; // 'e'
    Ok(Value::List(items))
  }

  fn parse_dict(&mut self) -> Result<Value> {
    self.advance()?; // 'd'
    let mut map = BTreeMap::new();
    while self.peek()? != b'e' {
      let key = match self.parse_bytes()? {
        Value::Bytes(b) => b,
        _ => unreachable!(),
      };
      let value = self.parse_value()?;
      // First-occurrence semantics: a later duplicate key does not
      // overwrite the first one we saw.
      map.entry(key).or_insert(value);
    }
    self.advance()?; // 'e'
    Ok(Value::Dict(map))
  }
}

/// Builds a `Value::Dict` from `(&str, Value)` pairs, for constructing
/// outbound messages without spelling out `BTreeMap` at every call site.
pub fn dict(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
  let mut map = BTreeMap::new();
  for (k, v) in pairs {
    map.insert(k.as_bytes().to_vec(), v);
  }
  Value::Dict(map)
}

impl TryFrom<&Value> for i64 {
  type Error = Error;

  fn try_from(value: &Value) -> Result<Self> {
    value.as_int().ok_or(Error::Unexpected {
      expected: "integer",
      offset: 0,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_bytes() {
    let v = Value::bytes(*b"spam");
    assert_eq!(Value::decode(&v.encode()).unwrap(), v);
  }

  #[test]
  fn round_trips_int() {
    for i in [-1234i64, 0, 1, 42, i64::MAX, i64::MIN] {
      let v = Value::Int(i);
      assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }
  }

  #[test]
  fn round_trips_list() {
    let v = Value::List(vec![Value::Int(1), Value::bytes(*b"two"), Value::Int(3)]);
    assert_eq!(Value::decode(&v.encode()).unwrap(), v);
  }

  #[test]
  fn round_trips_dict() {
    let v = dict([("b", Value::Int(2)), ("a", Value::Int(1))]);
    let encoded = v.encode();
    // Canonical encoding sorts "a" before "b" regardless of insertion order.
    assert_eq!(encoded, b"d1:ai1e1:bi2ee");
    assert_eq!(Value::decode(&encoded).unwrap(), v);
  }

  #[test]
  fn dict_keeps_first_occurrence_on_decode() {
    let encoded = b"d1:ai1e1:ai2ee";
    let decoded = Value::decode(encoded).unwrap();
    assert_eq!(decoded.get("a").unwrap().as_int(), Some(1));
  }

  #[test]
  fn truncated_input_is_an_error() {
    assert_eq!(Value::decode(b"d1:a"), Err(Error::Truncated));
    assert_eq!(Value::decode(b"5:ab"), Err(Error::Truncated));
    assert_eq!(Value::decode(b"i5"), Err(Error::Truncated));
  }

  #[test]
  fn trailing_data_is_an_error() {
    assert_eq!(Value::decode(b"i1ei2e"), Err(Error::TrailingData));
  }

  #[test]
  fn decode_prefix_leaves_remainder() {
    let (value, rest) = Value::decode_prefix(b"i1eTAIL").unwrap();
    assert_eq!(value, Value::Int(1));
    assert_eq!(rest, b"TAIL");
  }
}
