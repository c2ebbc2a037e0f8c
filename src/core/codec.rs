//! Binary block codec
//!
//! Every value is written as a one-byte tag followed by a length-prefixed
//! payload, so a page can be walked record by record without consulting the
//! location index.
//!
//! ```text
//! Nat    0x01 | len u32 LE | magnitude bytes (little-endian)
//! Int    0x02 | len u32 LE | two's complement bytes (little-endian)
//! Text   0x03 | len u32 LE | UTF-8 bytes
//! Blob   0x04 | len u32 LE | raw bytes
//! Array  0x05 | count u32 LE | item*
//! Map    0x06 | count u32 LE | (key_len u32 LE | key bytes | value)*
//! ```
//!
//! Tag 0x00 is never produced; zero-filled page space therefore reads as
//! "no more records".

use crate::core::error::{ArchiveError, Result};
use crate::core::value::Value;
use num_bigint::{BigInt, BigUint};
use std::collections::HashSet;

pub const TAG_END: u8 = 0x00;
pub const TAG_NAT: u8 = 0x01;
pub const TAG_INT: u8 = 0x02;
pub const TAG_TEXT: u8 = 0x03;
pub const TAG_BLOB: u8 = 0x04;
pub const TAG_ARRAY: u8 = 0x05;
pub const TAG_MAP: u8 = 0x06;

/// Deepest Array/Map nesting accepted by either direction
pub const MAX_DEPTH: usize = 128;

/// Smallest possible encoding: a tag and a zero length
pub const MIN_ENCODED_LEN: usize = 5;

/// Encode a value into its self-describing byte form
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(value, &mut out, 1)?;
    Ok(out)
}

/// Decode exactly one value; trailing bytes are an error
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let (value, used) = decode_prefix(bytes)?;
    if used != bytes.len() {
        return Err(ArchiveError::Decode(format!(
            "{} trailing bytes after value",
            bytes.len() - used
        )));
    }
    Ok(value)
}

/// Decode one value from the front of `bytes`, returning it with the number of bytes consumed
pub fn decode_prefix(bytes: &[u8]) -> Result<(Value, usize)> {
    let mut reader = Reader { bytes, pos: 0 };
    let value = reader.value(1)?;
    Ok((value, reader.pos))
}

/// Length of the value at the front of `bytes` without building it
pub fn encoded_len(bytes: &[u8]) -> Result<usize> {
    let mut reader = Reader { bytes, pos: 0 };
    reader.skip(1)?;
    Ok(reader.pos)
}

fn encode_into(value: &Value, out: &mut Vec<u8>, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(ArchiveError::Encode(format!(
            "value nesting exceeds {} levels",
            MAX_DEPTH
        )));
    }

    match value {
        Value::Nat(n) => {
            out.push(TAG_NAT);
            put_bytes(out, &n.to_bytes_le())?;
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            put_bytes(out, &i.to_signed_bytes_le())?;
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            put_bytes(out, s.as_bytes())?;
        }
        Value::Blob(b) => {
            out.push(TAG_BLOB);
            put_bytes(out, b)?;
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            put_len(out, items.len())?;
            for item in items {
                encode_into(item, out, depth + 1)?;
            }
        }
        Value::Map(entries) => {
            out.push(TAG_MAP);
            put_len(out, entries.len())?;
            let mut seen = HashSet::with_capacity(entries.len());
            for (key, item) in entries {
                if !seen.insert(key.as_str()) {
                    return Err(ArchiveError::Encode(format!("duplicate map key {:?}", key)));
                }
                put_bytes(out, key.as_bytes())?;
                encode_into(item, out, depth + 1)?;
            }
        }
    }

    Ok(())
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| ArchiveError::Encode(format!("length {} does not fit in u32", len)))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    put_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes: &'a [u8] = self.bytes;
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                ArchiveError::Decode(format!(
                    "unexpected end of input: need {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.bytes.len().saturating_sub(self.pos)
                ))
            })?;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn tag(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn len(&mut self) -> Result<usize> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
    }

    fn chunk(&mut self) -> Result<&'a [u8]> {
        let len = self.len()?;
        self.take(len)
    }

    fn text(&mut self) -> Result<String> {
        let raw = self.chunk()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| ArchiveError::Decode(format!("invalid UTF-8 text: {}", e)))
    }

    fn check_depth(depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(ArchiveError::Decode(format!(
                "value nesting exceeds {} levels",
                MAX_DEPTH
            )));
        }
        Ok(())
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        Self::check_depth(depth)?;
        let tag = self.tag()?;
        match tag {
            TAG_NAT => Ok(Value::Nat(BigUint::from_bytes_le(self.chunk()?))),
            TAG_INT => Ok(Value::Int(BigInt::from_signed_bytes_le(self.chunk()?))),
            TAG_TEXT => Ok(Value::Text(self.text()?)),
            TAG_BLOB => Ok(Value::Blob(self.chunk()?.to_vec())),
            TAG_ARRAY => {
                let count = self.len()?;
                // Each item needs at least 5 bytes; don't trust the count for preallocation.
                let mut items = Vec::with_capacity(count.min(self.remaining() / 5));
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            TAG_MAP => {
                let count = self.len()?;
                let mut entries: Vec<(String, Value)> =
                    Vec::with_capacity(count.min(self.remaining() / 9));
                let mut seen = HashSet::with_capacity(entries.capacity());
                for _ in 0..count {
                    let key = self.text()?;
                    if !seen.insert(key.clone()) {
                        return Err(ArchiveError::Decode(format!("duplicate map key {:?}", key)));
                    }
                    let item = self.value(depth + 1)?;
                    entries.push((key, item));
                }
                Ok(Value::Map(entries))
            }
            TAG_END => Err(ArchiveError::Decode(format!(
                "end marker at offset {}",
                self.pos - 1
            ))),
            other => Err(ArchiveError::Decode(format!(
                "unknown tag 0x{:02x} at offset {}",
                other,
                self.pos - 1
            ))),
        }
    }

    fn skip(&mut self, depth: usize) -> Result<()> {
        Self::check_depth(depth)?;
        match self.tag()? {
            TAG_NAT | TAG_INT | TAG_TEXT | TAG_BLOB => {
                self.chunk()?;
            }
            TAG_ARRAY => {
                for _ in 0..self.len()? {
                    self.skip(depth + 1)?;
                }
            }
            TAG_MAP => {
                for _ in 0..self.len()? {
                    self.chunk()?;
                    self.skip(depth + 1)?;
                }
            }
            other => {
                return Err(ArchiveError::Decode(format!(
                    "unknown tag 0x{:02x} at offset {}",
                    other,
                    self.pos - 1
                )))
            }
        }
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Value {
        Value::map([
            ("phash", Value::blob([7u8; 32])),
            ("btype", Value::text("7xfer")),
            ("ts", Value::nat(1_700_000_000_000_000_000u64)),
            (
                "tx",
                Value::map([
                    ("tid", Value::nat(42u32)),
                    ("delta", Value::int(-5)),
                    ("from", Value::Array(vec![Value::blob([1, 2, 3])])),
                    ("memo", Value::blob([])),
                ]),
            ),
        ])
    }

    #[test]
    fn test_round_trip_block() {
        let block = sample_block();
        let bytes = encode(&block).unwrap();
        assert_eq!(decode(&bytes).unwrap(), block);
        assert_eq!(encoded_len(&bytes).unwrap(), bytes.len());
    }

    #[test]
    fn test_round_trip_empty_values() {
        for v in [
            Value::Array(vec![]),
            Value::Map(vec![]),
            Value::blob([]),
            Value::text(""),
            Value::nat(0u32),
            Value::int(0),
        ] {
            let bytes = encode(&v).unwrap();
            assert_eq!(decode(&bytes).unwrap(), v);
        }
    }

    #[test]
    fn test_big_integers() {
        let big: BigUint = "123456789012345678901234567890123456789".parse().unwrap();
        let neg: BigInt = "-98765432109876543210987654321".parse().unwrap();
        for v in [Value::Nat(big), Value::Int(neg), Value::int(-1), Value::int(128)] {
            assert_eq!(decode(&encode(&v).unwrap()).unwrap(), v);
        }
    }

    #[test]
    fn test_layout_is_tag_and_length_prefixed() {
        let bytes = encode(&Value::text("hi")).unwrap();
        assert_eq!(bytes, vec![TAG_TEXT, 2, 0, 0, 0, b'h', b'i']);

        let bytes = encode(&Value::Array(vec![])).unwrap();
        assert_eq!(bytes, vec![TAG_ARRAY, 0, 0, 0, 0]);
    }

    #[test]
    fn test_sequential_scan() {
        let a = Value::text("first");
        let b = sample_block();
        let mut buf = encode(&a).unwrap();
        buf.extend(encode(&b).unwrap());
        buf.extend([0u8; 16]); // page padding

        let (first, used) = decode_prefix(&buf).unwrap();
        assert_eq!(first, a);
        let (second, used2) = decode_prefix(&buf[used..]).unwrap();
        assert_eq!(second, b);
        assert_eq!(buf[used + used2], TAG_END);
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode(&sample_block()).unwrap();
        for cut in [0, 1, 4, bytes.len() / 2, bytes.len() - 1] {
            assert!(matches!(decode(&bytes[..cut]), Err(ArchiveError::Decode(_))));
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Value::nat(1u32)).unwrap();
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(ArchiveError::Decode(_))));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(matches!(decode(&[0x7f]), Err(ArchiveError::Decode(_))));
        assert!(matches!(decode(&[TAG_END]), Err(ArchiveError::Decode(_))));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let bytes = vec![TAG_TEXT, 2, 0, 0, 0, 0xff, 0xfe];
        assert!(matches!(decode(&bytes), Err(ArchiveError::Decode(_))));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let dup = Value::Map(vec![
            ("k".to_string(), Value::nat(1u32)),
            ("k".to_string(), Value::nat(2u32)),
        ]);
        assert!(matches!(encode(&dup), Err(ArchiveError::Encode(_))));

        // Hand-built map with a repeated key
        let mut bytes = vec![TAG_MAP, 2, 0, 0, 0];
        for _ in 0..2 {
            bytes.extend([1, 0, 0, 0, b'k']);
            bytes.extend(encode(&Value::nat(1u32)).unwrap());
        }
        assert!(matches!(decode(&bytes), Err(ArchiveError::Decode(_))));
    }

    #[test]
    fn test_nesting_limit() {
        let mut v = Value::nat(0u32);
        for _ in 0..MAX_DEPTH {
            v = Value::Array(vec![v]);
        }
        assert!(matches!(encode(&v), Err(ArchiveError::Encode(_))));

        let mut bytes = Vec::new();
        for _ in 0..=MAX_DEPTH {
            bytes.extend([TAG_ARRAY, 1, 0, 0, 0]);
        }
        bytes.extend(encode(&Value::nat(0u32)).unwrap());
        assert!(matches!(decode(&bytes), Err(ArchiveError::Decode(_))));
    }

    #[test]
    fn test_huge_count_does_not_preallocate() {
        let bytes = vec![TAG_ARRAY, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(decode(&bytes), Err(ArchiveError::Decode(_))));
    }
}
