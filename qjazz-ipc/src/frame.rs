//! Wire framing for the worker ↔ supervisor pipe (§6): a 4-byte big-endian
//! length prefix followed by a MessagePack payload. `LengthDelimitedCodec`'s
//! default configuration is exactly this shape, so we lean on it rather than
//! hand-rolling length prefixing.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("peer closed the pipe")]
    Closed,
}

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u32>()
        .big_endian()
        .max_frame_length(256 * 1024 * 1024)
        .new_codec()
}

pub fn framed_write<W: AsyncWrite>(io: W) -> FramedWrite<W, LengthDelimitedCodec> {
    FramedWrite::new(io, codec())
}

pub fn framed_read<R: AsyncRead>(io: R) -> FramedRead<R, LengthDelimitedCodec> {
    FramedRead::new(io, codec())
}

use futures::{Sink, SinkExt, Stream, StreamExt};

pub async fn write_message<W, T>(sink: &mut W, msg: &T) -> Result<(), FrameError>
where
    W: Sink<bytes::Bytes, Error = std::io::Error> + Unpin,
    T: Serialize,
{
    let payload = rmp_serde::to_vec_named(msg)?;
    sink.send(bytes::Bytes::from(payload)).await?;
    Ok(())
}

pub async fn read_message<R, T>(stream: &mut R) -> Result<Option<T>, FrameError>
where
    R: Stream<Item = std::io::Result<bytes::BytesMut>> + Unpin,
    T: DeserializeOwned,
{
    match stream.next().await {
        Some(Ok(buf)) => Ok(Some(rmp_serde::from_slice(&buf)?)),
        Some(Err(e)) => Err(FrameError::Io(e)),
        None => Ok(None),
    }
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

    #[tokio::test]
    async fn round_trips_through_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let (_client_read, client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let mut writer = framed_write(client_write);
        let mut reader = framed_read(server_read);

        let msg = Sample {
            a: 7,
            b: "hello".to_string(),
        };
        write_message(&mut writer, &msg).await.unwrap();

        let decoded: Sample = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, msg);
    }
}
