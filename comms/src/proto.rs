//! Implements the framing protocol, every message is preceded by its length as 4 big endian bytes.

use std::io;

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// Builds the length header for a payload of `len` bytes.
///
/// # Errors
/// Returns `InvalidInput` if `len` exceeds `MAX_FRAME_LEN`.
pub(crate) fn header_for(len: usize) -> io::Result<[u8; LEN_TYPE_SIZE]> {
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {len} bytes exceeds the frame limit of {MAX_FRAME_LEN}"),
        ));
    }

    Ok((len as LenType).to_be_bytes())
}

/// Parses a length header.
///
/// # Errors
/// Returns `InvalidData` if the announced length exceeds `MAX_FRAME_LEN`.
pub(crate) fn payload_len(header: [u8; LEN_TYPE_SIZE]) -> io::Result<usize> {
    let len = LenType::from_be_bytes(header) as usize;

    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("peer announced a frame of {len} bytes, the limit is {MAX_FRAME_LEN}"),
        ));
    }

    Ok(len)
}

/// Prepends the length header to `payload`.
///
/// # Arguments
/// * `payload` - The bytes to frame.
///
/// # Returns
/// The framed bytes or an io error if the payload is too large.
pub fn frame(payload: &[u8]) -> io::Result<Vec<u8>> {
    let header = header_for(payload.len())?;

    let mut buf = Vec::with_capacity(LEN_TYPE_SIZE + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Extracts the payload of a buffer holding exactly one frame.
///
/// # Arguments
/// * `buf` - A complete frame, header included.
///
/// # Returns
/// The payload slice or an io error if the buffer is truncated or has trailing bytes.
pub fn deframe(buf: &[u8]) -> io::Result<&[u8]> {
    let Some((header, payload)) = buf.split_first_chunk::<LEN_TYPE_SIZE>() else {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame of {} bytes is shorter than its header", buf.len()),
        ));
    };

    let len = payload_len(*header)?;
    if payload.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame announces {len} bytes but carries {}", payload.len()),
        ));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_then_deframe_returns_the_payload() {
        for len in (0..=512).chain([4095, 4096, 65_537]) {
            let payload: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let framed = frame(&payload).unwrap();

            assert_eq!(framed.len(), LEN_TYPE_SIZE + len);
            assert_eq!(deframe(&framed).unwrap(), payload.as_slice());
        }
    }

    #[test]
    fn header_is_big_endian() {
        let framed = frame(&[7; 258]).unwrap();
        assert_eq!(&framed[..4], &[0, 0, 1, 2]);
    }

    #[test]
    fn deframe_rejects_truncated_and_padded_frames() {
        let framed = frame(b"hello").unwrap();

        assert!(deframe(&framed[..2]).is_err());
        assert!(deframe(&framed[..framed.len() - 1]).is_err());

        let mut padded = framed.clone();
        padded.push(0);
        assert!(deframe(&padded).is_err());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as LenType).to_be_bytes();
        let err = payload_len(header).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
