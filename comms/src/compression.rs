use std::{
    borrow::Cow,
    io::{self, Read},
};

use serde::{Deserialize, Serialize};

use crate::MAX_FRAME_LEN;

/// The payload transform applied before framing and reversed after de-framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Zstd {
        level: i32,
    },
}

impl Compression {
    pub const DEFAULT_LEVEL: i32 = 3;

    /// Maps the on/off configuration switch into a transform.
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Compression::Zstd {
                level: Self::DEFAULT_LEVEL,
            }
        } else {
            Compression::None
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; 2] {
        match self {
            Compression::None => [0, 0],
            Compression::Zstd { level } => [1, level as i8 as u8],
        }
    }

    pub(crate) fn from_bytes(tag: u8, level: u8) -> io::Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd {
                level: level as i8 as i32,
            }),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown compression tag {other}"),
            )),
        }
    }

    /// Compresses `payload`, borrowing it unchanged when compression is off.
    pub fn compress<'a>(&self, payload: &'a [u8]) -> io::Result<Cow<'a, [u8]>> {
        match self {
            Compression::None => Ok(Cow::Borrowed(payload)),
            Compression::Zstd { level } => zstd::bulk::compress(payload, *level).map(Cow::Owned),
        }
    }

    /// Reverses `compress`.
    ///
    /// # Errors
    /// An `InvalidData` io error if the payload is corrupt or inflates past `MAX_FRAME_LEN`.
    pub fn decompress(&self, payload: Vec<u8>) -> io::Result<Vec<u8>> {
        match self {
            Compression::None => Ok(payload),
            Compression::Zstd { .. } => inflate(&payload, MAX_FRAME_LEN),
        }
    }
}

fn inflate(payload: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    zstd::stream::read::Decoder::new(payload)?
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;

    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("compressed payload inflates past {limit} bytes"),
        ));
    }

    Ok(out)
}
