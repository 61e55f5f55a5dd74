//! Frame codec: a 4-byte big-endian length followed by a CBOR body.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};

/// Largest body accepted on the wire.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Encode a message body as CBOR.
///
/// Bodies over [`MAX_FRAME_LEN`] fail with [`RpcError::MessageTooLarge`].
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| RpcError::Encode(e.to_string()))?;
    if buf.len() > MAX_FRAME_LEN {
        return Err(RpcError::MessageTooLarge(buf.len()));
    }
    Ok(buf)
}

/// Decode a CBOR message body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    ciborium::from_reader(body).map_err(|e| RpcError::Decode(e.to_string()))
}

/// Write one framed message.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(message)?;
    write_body(writer, &body).await
}

/// Write an already encoded body as one frame.
///
/// Lets one encoding be fanned out to many writers.
pub async fn write_body<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(RpcError::MessageTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            RpcError::ConnectionClosed
        } else {
            RpcError::Io(e)
        }
    })?;
    Ok(Some(body))
}

/// Read and decode one framed message.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(body) => decode(&body).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{BlobRequest, Request};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_frames_back_to_back() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let first = Request::Ping;
        let second = Request::Blob(BlobRequest::Put {
            payload: Bytes::from_static(b"img"),
        });

        write_frame(&mut client, &first).await.unwrap();
        write_frame(&mut client, &second).await.unwrap();
        drop(client);

        let a: Request = read_message(&mut server).await.unwrap().unwrap();
        let b: Request = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes())
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(RpcError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);
        assert!(matches!(
            read_frame(&mut server).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_message_writes_nothing() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let huge = Request::Blob(BlobRequest::Put {
            payload: Bytes::from(vec![0u8; MAX_FRAME_LEN + 1]),
        });
        assert!(matches!(
            write_frame(&mut client, &huge).await,
            Err(RpcError::MessageTooLarge(_))
        ));

        write_frame(&mut client, &Request::Ping).await.unwrap();
        let next: Request = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(next, Request::Ping);
    }

    #[tokio::test]
    async fn test_one_encoding_many_writers() {
        let body = encode(&Request::Ping).unwrap();
        for _ in 0..2 {
            let (mut client, mut server) = tokio::io::duplex(64);
            write_body(&mut client, &body).await.unwrap();
            let got: Request = read_message(&mut server).await.unwrap().unwrap();
            assert_eq!(got, Request::Ping);
        }
    }

    #[test]
    fn test_garbage_body_is_decode_error() {
        assert!(matches!(decode::<Request>(&[0xff, 0x13]), Err(RpcError::Decode(_))));
    }
}
