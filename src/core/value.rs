//! Generic block value
//!
//! Every block stored in the archive is a [`Value`] tree. Maps keep their
//! insertion order and hold unique text keys.

use num_bigint::{BigInt, BigUint};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Global, ledger-wide block index
pub type TxIndex = u64;

/// A stored ledger event
pub type Transaction = Value;

/// Recursive block value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Signed arbitrary-precision integer
    Int(#[serde(with = "int_text")] BigInt),
    /// Unsigned arbitrary-precision integer
    Nat(#[serde(with = "nat_text")] BigUint),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Blob(Vec<u8>),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// Ordered (key, value) pairs with unique keys
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn nat(n: impl Into<BigUint>) -> Self {
        Value::Nat(n.into())
    }

    pub fn int(i: impl Into<BigInt>) -> Self {
        Value::Int(i.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn blob(bytes: impl AsRef<[u8]>) -> Self {
        Value::Blob(bytes.as_ref().to_vec())
    }

    /// Build a map from (key, value) pairs, keeping their order
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Look up a key if this value is a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Numeric value as `u64`, if this is a Nat or Int that fits
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Nat(n) => n.to_u64(),
            Value::Int(i) => i.to_u64(),
            _ => None,
        }
    }

    /// Nesting depth of the tree (a leaf has depth 1)
    pub fn depth(&self) -> usize {
        match self {
            Value::Array(items) => 1 + items.iter().map(Value::depth).max().unwrap_or(0),
            Value::Map(entries) => 1 + entries.iter().map(|(_, v)| v.depth()).max().unwrap_or(0),
            _ => 1,
        }
    }

    /// Variant name, used in log and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Nat(_) => "Nat",
            Value::Text(_) => "Text",
            Value::Blob(_) => "Blob",
            Value::Array(_) => "Array",
            Value::Map(_) => "Map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Nat(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Blob(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Nat(n.into())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Blob(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Big integers travel as decimal strings; plain JSON numbers are accepted on input.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

mod nat_text {
    use super::NumberRepr;
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(n: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&n.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        match NumberRepr::deserialize(d)? {
            NumberRepr::Text(s) => s.parse().map_err(D::Error::custom),
            NumberRepr::Unsigned(n) => Ok(n.into()),
            NumberRepr::Signed(i) => Err(D::Error::custom(format!("negative Nat: {}", i))),
        }
    }
}

mod int_text {
    use super::NumberRepr;
    use num_bigint::BigInt;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(i: &BigInt, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&i.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigInt, D::Error> {
        match NumberRepr::deserialize(d)? {
            NumberRepr::Text(s) => s.parse().map_err(D::Error::custom),
            NumberRepr::Unsigned(n) => Ok(n.into()),
            NumberRepr::Signed(i) => Ok(i.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_lookup_keeps_order() {
        let v = Value::map([("b", Value::from(1u64)), ("a", Value::from("x"))]);
        assert_eq!(v.get("a"), Some(&Value::text("x")));
        assert_eq!(v.get("missing"), None);

        if let Value::Map(entries) = &v {
            assert_eq!(entries[0].0, "b");
            assert_eq!(entries[1].0, "a");
        } else {
            panic!("expected map");
        }
    }

    #[test]
    fn test_as_u64() {
        assert_eq!(Value::nat(7u32).as_u64(), Some(7));
        assert_eq!(Value::int(-1).as_u64(), None);
        assert_eq!(Value::Nat(BigUint::from(u64::MAX) + 1u32).as_u64(), None);
        assert_eq!(Value::text("7").as_u64(), None);
    }

    #[test]
    fn test_depth() {
        assert_eq!(Value::from(1u64).depth(), 1);
        assert_eq!(Value::Array(vec![]).depth(), 1);
        let nested = Value::Array(vec![Value::map([("k", Value::Array(vec![]))])]);
        assert_eq!(nested.depth(), 3);
    }

    #[test]
    fn test_json_big_numbers_as_strings() {
        let big: BigUint = "340282366920938463463374607431768211456".parse().unwrap();
        let v = Value::Nat(big.clone());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"Nat":"340282366920938463463374607431768211456"}"#);

        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Nat(big));
    }

    #[test]
    fn test_json_accepts_plain_numbers() {
        let v: Value = serde_json::from_str(r#"{"Int":-42}"#).unwrap();
        assert_eq!(v, Value::int(-42));
        let v: Value = serde_json::from_str(r#"{"Nat":7}"#).unwrap();
        assert_eq!(v, Value::nat(7u32));
        assert!(serde_json::from_str::<Value>(r#"{"Nat":-1}"#).is_err());
    }

    #[test]
    fn test_display() {
        let v = Value::map([
            ("ts", Value::nat(5u32)),
            ("memo", Value::blob([0xde, 0xad])),
            ("ops", Value::Array(vec![Value::int(-1), Value::text("x")])),
        ]);
        assert_eq!(v.to_string(), r#"{"ts": 5, "memo": 0xdead, "ops": [-1, "x"]}"#);
    }
}
