use std::{error::Error, fmt, io};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// The serialization strategies a connection may negotiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Json,
    Bincode,
}

impl CodecKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            CodecKind::Json => 0,
            CodecKind::Bincode => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> io::Result<Self> {
        match tag {
            0 => Ok(CodecKind::Json),
            1 => Ok(CodecKind::Bincode),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown codec tag {other}"),
            )),
        }
    }
}

/// Failure to turn bytes into a message or back. Scoped to a single message.
#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    Bincode(bincode::Error),
    Empty,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "json codec error: {e}"),
            CodecError::Bincode(e) => write!(f, "bincode codec error: {e}"),
            CodecError::Empty => write!(f, "cannot decode an empty payload"),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CodecError::Json(e) => Some(e),
            CodecError::Bincode(e) => Some(e),
            CodecError::Empty => None,
        }
    }
}

/// Converts domain objects to and from payload bytes using the configured strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    kind: CodecKind,
}

impl Codec {
    /// Creates a new `Codec`.
    ///
    /// # Arguments
    /// * `kind` - The serialization strategy.
    pub fn new(kind: CodecKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Serializes `value` into a fresh buffer.
    ///
    /// # Errors
    /// Returns a `CodecError` if the strategy cannot represent the value.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self.kind {
            CodecKind::Json => serde_json::to_vec(value).map_err(CodecError::Json),
            CodecKind::Bincode => bincode::serialize(value).map_err(CodecError::Bincode),
        }
    }

    /// Deserializes a value out of `buf`.
    ///
    /// # Errors
    /// Returns a `CodecError` on malformed bytes or an unknown tag.
    pub fn deserialize<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        if buf.is_empty() {
            return Err(CodecError::Empty);
        }

        match self.kind {
            CodecKind::Json => serde_json::from_slice(buf).map_err(CodecError::Json),
            CodecKind::Bincode => bincode::deserialize(buf).map_err(CodecError::Bincode),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(CodecKind::default())
    }
}
