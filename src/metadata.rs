use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use log::warn;

/// Header names the protocol claims for itself. User metadata under these
/// keys is rejected at the RPC surface.
pub const RESERVED_KEYS: &[&str] = &[
    "grpc-timeout",
    "grpc-encoding",
    "grpc-accept-encoding",
    "grpc-status",
    "grpc-message",
    "grpc-previous-rpc-attempts",
    "grpc-retry-pushback-ms",
    "content-type",
    ":method",
    ":scheme",
    ":path",
    ":authority",
];

#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Ascii(String),
    Binary(Vec<u8>),
}

impl MetadataValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Ascii(value) => Some(value),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Ascii(value) => value.as_bytes(),
            Self::Binary(value) => value,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Ascii(value.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Ascii(value)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid metadata key {0:?}")]
    InvalidKey(String),
    #[error("binary value requires a -bin key, got {0:?}")]
    BinaryValueForAsciiKey(String),
    #[error("-bin key {0:?} requires a binary value")]
    AsciiValueForBinaryKey(String),
    #[error("value for {0:?} contains non-ASCII or control bytes")]
    InvalidValue(String),
}

/// Ordered multimap of gRPC metadata.
///
/// Iteration order equals insertion order; lookup is by case-insensitive
/// key (keys are normalized to lowercase on insert). Values under keys with
/// the `-bin` suffix are arbitrary bytes, transported base64-encoded; all
/// other values are printable ASCII.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry, keeping earlier values for the same key.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<(), MetadataError> {
        let key = normalize_key(key.into())?;
        let value = value.into();
        let binary_key = key.ends_with("-bin");
        match (&value, binary_key) {
            (MetadataValue::Binary(_), false) => {
                return Err(MetadataError::BinaryValueForAsciiKey(key))
            }
            (MetadataValue::Ascii(_), true) => {
                return Err(MetadataError::AsciiValueForBinaryKey(key))
            }
            (MetadataValue::Ascii(text), false) => {
                if !text.bytes().all(|b| (0x20..0x7f).contains(&b)) {
                    return Err(MetadataError::InvalidValue(key));
                }
            }
            (MetadataValue::Binary(_), true) => {}
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// First value for the key, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// First value for the key as a string, if it is an ASCII value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_str)
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a MetadataValue> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Removes every value for the key, returning how many were dropped.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Appends every entry of `other`, preserving its order.
    pub fn merge(&mut self, other: Metadata) {
        self.entries.extend(other.entries);
    }

    /// Wire form: binary values become base64 text under their `-bin` key.
    #[must_use]
    pub fn to_header_list(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| match v {
                MetadataValue::Ascii(text) => (k.clone(), text.clone()),
                MetadataValue::Binary(bytes) => (k.clone(), STANDARD_NO_PAD.encode(bytes)),
            })
            .collect()
    }

    /// Parses a decoded header list. Undecodable `-bin` values are skipped
    /// with a warning rather than failing the whole block.
    #[must_use]
    pub fn from_header_list<K, V>(headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut metadata = Self::new();
        for (key, value) in headers {
            let key = key.as_ref().to_ascii_lowercase();
            let value = value.as_ref();
            if key.ends_with("-bin") {
                match decode_base64(value) {
                    Some(bytes) => metadata.entries.push((key, MetadataValue::Binary(bytes))),
                    None => warn!("dropping undecodable binary metadata {key:?}"),
                }
            } else {
                metadata
                    .entries
                    .push((key, MetadataValue::Ascii(value.to_owned())));
            }
        }
        metadata
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a MetadataValue);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, MetadataValue)>,
        fn(&'a (String, MetadataValue)) -> (&'a String, &'a MetadataValue),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

fn normalize_key(key: String) -> Result<String, MetadataError> {
    let valid = !key.is_empty()
        && key.bytes().enumerate().all(|(i, b)| match b {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => true,
            b'A'..=b'Z' => true,
            b':' => i == 0,
            _ => false,
        });
    if !valid {
        return Err(MetadataError::InvalidKey(key));
    }
    Ok(key.to_ascii_lowercase())
}

// Senders should emit unpadded base64 but receivers accept both forms.
fn decode_base64(value: &str) -> Option<Vec<u8>> {
    STANDARD_NO_PAD
        .decode(value)
        .or_else(|_| STANDARD.decode(value))
        .ok()
}
