use std::{error::Error, fmt, io};

use crate::CodecError;

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Failures of a framed connection.
#[derive(Debug)]
pub enum CommsErr {
    Io(io::Error),
    Codec(CodecError),
    Protocol(String),
    Tls(rustls::Error),
}

impl CommsErr {
    /// Whether the failure only concerns one message and the connection is still usable.
    pub fn is_message_scoped(&self) -> bool {
        matches!(self, CommsErr::Codec(_))
    }
}

impl fmt::Display for CommsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErr::Io(e) => write!(f, "io error: {e}"),
            CommsErr::Codec(e) => write!(f, "{e}"),
            CommsErr::Protocol(detail) => write!(f, "protocol error: {detail}"),
            CommsErr::Tls(e) => write!(f, "tls error: {e}"),
        }
    }
}

impl Error for CommsErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommsErr::Io(e) => Some(e),
            CommsErr::Codec(e) => Some(e),
            CommsErr::Tls(e) => Some(e),
            CommsErr::Protocol(_) => None,
        }
    }
}

impl From<io::Error> for CommsErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CodecError> for CommsErr {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

impl From<rustls::Error> for CommsErr {
    fn from(value: rustls::Error) -> Self {
        Self::Tls(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CommsErr> for io::Error {
    fn from(value: CommsErr) -> Self {
        match value {
            CommsErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
