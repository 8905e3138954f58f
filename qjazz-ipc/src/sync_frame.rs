//! Blocking counterpart of [`crate::frame`], used by the worker process
//! (§4.C3's single-threaded blocking receive loop) rather than the async
//! supervisor side. Same wire shape: 4-byte big-endian length prefix,
//! MessagePack payload.

use std::io::{self, Read, Write};

use serde::{de::DeserializeOwned, Serialize};

use crate::frame::FrameError;

const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

pub fn write_message_sync<W: Write, T: Serialize>(out: &mut W, msg: &T) -> Result<(), FrameError> {
    let payload = rmp_serde::to_vec_named(msg)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::Io(io::Error::new(io::ErrorKind::InvalidInput, "frame too large")))?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(&payload)?;
    out.flush()?;
    Ok(())
}

/// Returns `Ok(None)` on clean EOF (peer closed the pipe before a new
/// frame started).
pub fn read_message_sync<R: Read, T: DeserializeOwned>(src: &mut R) -> Result<Option<T>, FrameError> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(src, &mut len_buf)? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds max {MAX_FRAME_LEN}"),
        )));
    }
    let mut payload = vec![0u8; len as usize];
    src.read_exact(&mut payload)?;
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

/// Like `read_exact` but returns `Ok(false)` instead of erroring when zero
/// bytes are available (clean EOF at a frame boundary).
fn read_exact_or_eof<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips_through_a_byte_buffer() {
        let mut buf = Vec::new();
        let msg = Sample {
            a: 42,
            b: "hi".to_string(),
        };
        write_message_sync(&mut buf, &msg).unwrap();

        let mut cursor = io::Cursor::new(buf);
        let decoded: Sample = read_message_sync(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn read_returns_none_on_clean_eof() {
        let mut cursor = io::Cursor::new(Vec::<u8>::new());
        let decoded: Option<Sample> = read_message_sync(&mut cursor).unwrap();
        assert!(decoded.is_none());
    }
}
