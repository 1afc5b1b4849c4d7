//! Canonical dictionary encoding.
//!
//! Bencode-style codec used for handshake and control message bodies:
//! integers (`i<n>e`), byte strings (`<len>:<bytes>`), lists (`l...e`)
//! and dictionaries (`d...e`). Dictionaries keep their keys sorted, so
//! encoding is canonical: equal values always produce equal bytes. That
//! property is what lets router contacts be signed over their encoding.

use super::ProtocolError;
use std::collections::BTreeMap;

/// Maximum nesting depth accepted by the decoder.
const MAX_DEPTH: usize = 8;

/// A decoded dictionary-encoding value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// Ordered list.
    List(Vec<Value>),
    /// Dictionary with canonically sorted byte-string keys.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Build a byte-string value.
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(b.into())
    }

    /// Encode into `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Bytes(b) => {
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(b);
            }
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode(out);
                }
                out.push(b'e');
            }
            Value::Dict(map) => {
                out.push(b'd');
                for (key, val) in map {
                    Value::Bytes(key.clone()).encode(out);
                    val.encode(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decode a value that must span the entire input.
    pub fn decode(data: &[u8]) -> Result<Value, ProtocolError> {
        let (value, used) = Self::decode_prefix(data)?;
        if used != data.len() {
            return Err(ProtocolError::TrailingBytes {
                used,
                total: data.len(),
            });
        }
        Ok(value)
    }

    /// Decode a value from the front of the input, returning the value and
    /// the number of bytes consumed.
    pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), ProtocolError> {
        let mut reader = Reader { data, pos: 0 };
        let value = reader.read_value(0)?;
        Ok((value, reader.pos))
    }

    // === Accessors ===

    /// Interpret as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Interpret as a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Interpret as a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Interpret as a dictionary.
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }
}

/// Builder for dictionary values with single-character protocol keys.
#[derive(Default)]
pub struct DictBuilder {
    map: BTreeMap<Vec<u8>, Value>,
}

impl DictBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: &str, value: Value) -> Self {
        self.map.insert(key.as_bytes().to_vec(), value);
        self
    }

    pub fn build(self) -> Value {
        Value::Dict(self.map)
    }
}

/// Field lookup against a decoded dictionary.
pub fn dict_field<'a>(
    dict: &'a BTreeMap<Vec<u8>, Value>,
    key: &'static str,
) -> Result<&'a Value, ProtocolError> {
    dict.get(key.as_bytes())
        .ok_or(ProtocolError::MissingField(key))
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Result<u8, ProtocolError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(ProtocolError::Truncated)
    }

    fn bump(&mut self) -> Result<u8, ProtocolError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, ProtocolError> {
        if depth > MAX_DEPTH {
            return Err(ProtocolError::DepthExceeded(MAX_DEPTH));
        }
        match self.peek()? {
            b'i' => self.read_int(),
            b'l' => self.read_list(depth),
            b'd' => self.read_dict(depth),
            b'0'..=b'9' => self.read_bytes().map(Value::Bytes),
            other => Err(ProtocolError::UnexpectedByte(other)),
        }
    }

    fn read_int(&mut self) -> Result<Value, ProtocolError> {
        self.bump()?; // 'i'
        let start = self.pos;
        while self.peek()? != b'e' {
            self.pos += 1;
        }
        let digits = &self.data[start..self.pos];
        self.bump()?; // 'e'
        let text = std::str::from_utf8(digits).map_err(|_| ProtocolError::InvalidInteger)?;
        if text.is_empty() || (text.len() > 1 && (text.starts_with('0') || text.starts_with("-0")))
        {
            return Err(ProtocolError::InvalidInteger);
        }
        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ProtocolError::InvalidInteger)
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let start = self.pos;
        while self.peek()? != b':' {
            let b = self.bump()?;
            if !b.is_ascii_digit() {
                return Err(ProtocolError::UnexpectedByte(b));
            }
        }
        let text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| ProtocolError::InvalidInteger)?;
        let len: usize = text.parse().map_err(|_| ProtocolError::InvalidInteger)?;
        self.bump()?; // ':'
        if self.data.len() - self.pos < len {
            return Err(ProtocolError::Truncated);
        }
        let bytes = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    fn read_list(&mut self, depth: usize) -> Result<Value, ProtocolError> {
        self.bump()?; // 'l'
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.read_value(depth + 1)?);
        }
        self.bump()?; // 'e'
        Ok(Value::List(items))
    }

    fn read_dict(&mut self, depth: usize) -> Result<Value, ProtocolError> {
        self.bump()?; // 'd'
        let mut map = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = self.read_bytes()?;
            let value = self.read_value(depth + 1)?;
            map.insert(key, value);
        }
        self.bump()?; // 'e'
        Ok(Value::Dict(map))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_roundtrip() {
        for n in [0i64, 1, -1, 42, i64::MAX, i64::MIN] {
            let encoded = Value::Int(n).to_vec();
            assert_eq!(Value::decode(&encoded).unwrap(), Value::Int(n));
        }
        assert_eq!(Value::Int(42).to_vec(), b"i42e");
    }

    #[test]
    fn test_bytes_roundtrip() {
        let v = Value::bytes(&b"spam"[..]);
        assert_eq!(v.to_vec(), b"4:spam");
        assert_eq!(Value::decode(b"4:spam").unwrap(), v);

        let empty = Value::bytes(&b""[..]);
        assert_eq!(empty.to_vec(), b"0:");
        assert_eq!(Value::decode(b"0:").unwrap(), empty);
    }

    #[test]
    fn test_dict_keys_sorted() {
        let v = DictBuilder::new()
            .insert("z", Value::Int(1))
            .insert("a", Value::Int(2))
            .insert("m", Value::bytes(&b"x"[..]))
            .build();
        assert_eq!(v.to_vec(), b"d1:ai2e1:m1:x1:zi1ee");
    }

    #[test]
    fn test_canonical_encoding_is_stable() {
        // Same content built in different insertion orders encodes identically.
        let a = DictBuilder::new()
            .insert("n", Value::bytes(&b"nonce"[..]))
            .insert("r", Value::Int(7))
            .build();
        let b = DictBuilder::new()
            .insert("r", Value::Int(7))
            .insert("n", Value::bytes(&b"nonce"[..]))
            .build();
        assert_eq!(a.to_vec(), b.to_vec());
    }

    #[test]
    fn test_nested_roundtrip() {
        let v = DictBuilder::new()
            .insert(
                "a",
                Value::List(vec![
                    DictBuilder::new().insert("p", Value::Int(7000)).build(),
                    Value::bytes(&b"second"[..]),
                ]),
            )
            .insert("v", Value::Int(1))
            .build();
        let encoded = v.to_vec();
        assert_eq!(Value::decode(&encoded).unwrap(), v);
    }

    #[test]
    fn test_decode_prefix_reports_consumed() {
        let mut data = Value::Int(5).to_vec();
        data.extend_from_slice(b"leftover");
        let (value, used) = Value::decode_prefix(&data).unwrap();
        assert_eq!(value, Value::Int(5));
        assert_eq!(&data[used..], b"leftover");
    }

    #[test]
    fn test_decode_rejects_trailing() {
        assert!(matches!(
            Value::decode(b"i5eX"),
            Err(ProtocolError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        assert!(matches!(
            Value::decode(b"10:short"),
            Err(ProtocolError::Truncated)
        ));
        assert!(matches!(Value::decode(b"i42"), Err(ProtocolError::Truncated)));
        assert!(matches!(Value::decode(b"d1:a"), Err(ProtocolError::Truncated)));
    }

    #[test]
    fn test_decode_rejects_noncanonical_int() {
        assert!(matches!(
            Value::decode(b"i042e"),
            Err(ProtocolError::InvalidInteger)
        ));
        assert!(matches!(
            Value::decode(b"i-0e"),
            Err(ProtocolError::InvalidInteger)
        ));
        assert!(matches!(
            Value::decode(b"ie"),
            Err(ProtocolError::InvalidInteger)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Value::decode(b"x"),
            Err(ProtocolError::UnexpectedByte(b'x'))
        ));
    }

    #[test]
    fn test_depth_limit() {
        let mut data = Vec::new();
        for _ in 0..20 {
            data.push(b'l');
        }
        assert!(matches!(
            Value::decode(&data),
            Err(ProtocolError::DepthExceeded(_))
        ));
    }
}
