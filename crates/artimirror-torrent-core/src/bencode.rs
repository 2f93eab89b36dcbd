//! Bencode encoding and decoding for distribution metadata.
//!
//! Implements the subset of bencoding needed to persist and reload metadata
//! files: integers, byte strings, lists, and dictionaries with sorted keys.

use std::collections::BTreeMap;

use thiserror::Error;

/// A bencoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    /// Signed integer (`i<n>e`).
    Integer(i64),
    /// Raw byte string (`<len>:<bytes>`).
    Bytes(Vec<u8>),
    /// Ordered list (`l...e`).
    List(Vec<BencodeValue>),
    /// Dictionary keyed by raw bytes (`d...e`).
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

/// Failure decoding a bencoded buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BencodeError {
    /// Input ended before a value was complete.
    #[error("unexpected end of bencoded input")]
    UnexpectedEnd {
        /// Offset where more input was expected.
        offset: usize,
    },
    /// Byte at the offset cannot start or continue a value.
    #[error("unexpected byte in bencoded input")]
    UnexpectedByte {
        /// Offset of the offending byte.
        offset: usize,
        /// Offending byte.
        byte: u8,
    },
    /// Integer or length prefix was malformed.
    #[error("malformed bencoded number")]
    InvalidNumber {
        /// Offset where the number began.
        offset: usize,
    },
    /// Dictionary keys were not strictly ascending.
    #[error("bencoded dictionary keys out of order")]
    UnsortedKeys {
        /// Offset of the out-of-order key.
        offset: usize,
    },
    /// Bytes remained after the top-level value.
    #[error("trailing data after bencoded value")]
    TrailingData {
        /// Offset of the first trailing byte.
        offset: usize,
    },
}

impl BencodeValue {
    /// Create a string value from a `&str`.
    #[must_use]
    pub fn string(s: &str) -> Self {
        Self::Bytes(s.as_bytes().to_vec())
    }

    /// Create an integer value.
    #[must_use]
    pub const fn integer(i: i64) -> Self {
        Self::Integer(i)
    }

    /// Create an empty dict.
    #[must_use]
    pub const fn dict() -> Self {
        Self::Dict(BTreeMap::new())
    }

    /// Insert a key-value pair into a dict (builder pattern).
    #[must_use]
    pub fn insert(mut self, key: &str, value: Self) -> Self {
        if let Self::Dict(ref mut dict) = self {
            dict.insert(key.as_bytes().to_vec(), value);
        }
        self
    }

    /// Look up a key when this value is a dict.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dict(dict) => dict.get(key.as_bytes()),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Byte payload, if this is a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// UTF-8 payload, if this is a byte string holding valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Encode to bencoded bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode into an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Integer(i) => {
                buf.push(b'i');
                buf.extend_from_slice(i.to_string().as_bytes());
                buf.push(b'e');
            }
            Self::Bytes(bytes) => encode_bytes(bytes, buf),
            Self::List(list) => {
                buf.push(b'l');
                for item in list {
                    item.encode_into(buf);
                }
                buf.push(b'e');
            }
            Self::Dict(dict) => {
                buf.push(b'd');
                // BTreeMap keeps keys sorted
                for (key, value) in dict {
                    encode_bytes(key, buf);
                    value.encode_into(buf);
                }
                buf.push(b'e');
            }
        }
    }

    /// Decode a complete buffer holding exactly one value.
    ///
    /// # Errors
    ///
    /// Returns a [`BencodeError`] describing the first malformed byte.
    pub fn decode(input: &[u8]) -> Result<Self, BencodeError> {
        let mut decoder = Decoder { input, offset: 0 };
        let value = decoder.value()?;
        if decoder.offset != input.len() {
            return Err(BencodeError::TrailingData {
                offset: decoder.offset,
            });
        }
        Ok(value)
    }
}

fn encode_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(bytes);
}

struct Decoder<'a> {
    input: &'a [u8],
    offset: usize,
}

impl Decoder<'_> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.input
            .get(self.offset)
            .copied()
            .ok_or(BencodeError::UnexpectedEnd {
                offset: self.offset,
            })
    }

    fn value(&mut self) -> Result<BencodeValue, BencodeError> {
        match self.peek()? {
            b'i' => {
                self.offset += 1;
                let value = self.number_until(b'e')?;
                Ok(BencodeValue::Integer(value))
            }
            b'l' => {
                self.offset += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value()?);
                }
                self.offset += 1;
                Ok(BencodeValue::List(items))
            }
            b'd' => {
                self.offset += 1;
                let mut dict = BTreeMap::new();
                let mut previous: Option<Vec<u8>> = None;
                while self.peek()? != b'e' {
                    let key_offset = self.offset;
                    let key = self.bytes()?;
                    if previous.as_ref().is_some_and(|prev| prev >= &key) {
                        return Err(BencodeError::UnsortedKeys { offset: key_offset });
                    }
                    let value = self.value()?;
                    previous = Some(key.clone());
                    dict.insert(key, value);
                }
                self.offset += 1;
                Ok(BencodeValue::Dict(dict))
            }
            b'0'..=b'9' => self.bytes().map(BencodeValue::Bytes),
            byte => Err(BencodeError::UnexpectedByte {
                offset: self.offset,
                byte,
            }),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>, BencodeError> {
        let start = self.offset;
        let len = self.number_until(b':')?;
        let len = usize::try_from(len).map_err(|_| BencodeError::InvalidNumber { offset: start })?;
        let end = self
            .offset
            .checked_add(len)
            .ok_or(BencodeError::InvalidNumber { offset: start })?;
        let slice = self
            .input
            .get(self.offset..end)
            .ok_or(BencodeError::UnexpectedEnd {
                offset: self.input.len(),
            })?;
        self.offset = end;
        Ok(slice.to_vec())
    }

    fn number_until(&mut self, terminator: u8) -> Result<i64, BencodeError> {
        let start = self.offset;
        let remaining = self.input.get(start..).unwrap_or_default();
        let len = remaining
            .iter()
            .position(|byte| *byte == terminator)
            .ok_or(BencodeError::UnexpectedEnd {
                offset: self.input.len(),
            })?;
        let digits = &remaining[..len];
        let canonical = !matches!(digits, [] | [b'-'] | [b'-', b'0', ..] | [b'0', _, ..]);
        let parsed = std::str::from_utf8(digits)
            .ok()
            .filter(|_| canonical)
            .and_then(|text| text.parse::<i64>().ok())
            .ok_or(BencodeError::InvalidNumber { offset: start })?;
        self.offset = start + len + 1;
        Ok(parsed)
    }
}
