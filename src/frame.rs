//! Length-prefixed framing over a byte stream.
//!
//! ```text
//! Request:  <4 bytes: payload length, big-endian u32><payload>
//! Response: OK   (on success, then close)
//! ```
//!
//! Any failure closes the connection without a response.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::TransferError;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Acknowledgement sent after a photo is stored.
pub const ACK: &[u8; 2] = b"OK";

/// Largest single read issued while filling a frame.
const READ_CHUNK: usize = 64 * 1024;

/// The 4-byte length prefix preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingHeader {
    /// Exact number of payload bytes that follow.
    pub payload_len: u32,
}

impl FramingHeader {
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Self {
        Self {
            payload_len: u32::from_be_bytes(bytes),
        }
    }

    #[cfg(test)]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        self.payload_len.to_be_bytes()
    }
}

/// Read exactly `n` bytes, retrying short reads until the count is met.
///
/// A zero-byte read before `n` bytes have arrived means the peer closed the
/// stream and yields `IncompleteStream`; the partial data is dropped.
pub async fn read_exact_frame<R>(reader: &mut R, n: usize) -> Result<Bytes, TransferError>
where
    R: AsyncRead + Unpin,
{
    // Grow with the data actually received rather than trusting `n` up front
    let mut buffer = BytesMut::with_capacity(n.min(READ_CHUNK));

    while buffer.len() < n {
        let start = buffer.len();
        let chunk = (n - start).min(READ_CHUNK);
        buffer.resize(start + chunk, 0);

        let read = reader.read(&mut buffer[start..]).await?;
        buffer.truncate(start + read);

        if read == 0 {
            return Err(TransferError::IncompleteStream {
                expected: n,
                received: start,
            });
        }
    }

    Ok(buffer.freeze())
}

/// Read and decode the framing header.
pub async fn read_header<R>(reader: &mut R) -> Result<FramingHeader, TransferError>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_exact_frame(reader, HEADER_LEN).await?;
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&bytes);
    Ok(FramingHeader::decode(header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_exact_single_chunk() {
        let mut stream = Builder::new().read(b"hello").build();
        let data = read_exact_frame(&mut stream, 5).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn test_read_exact_fragmented() {
        let mut stream = Builder::new()
            .read(b"h")
            .read(b"el")
            .read(b"lo wor")
            .read(b"ld")
            .build();
        let data = read_exact_frame(&mut stream, 11).await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_read_exact_byte_at_a_time() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let mut builder = Builder::new();
        for byte in &payload {
            builder.read(std::slice::from_ref(byte));
        }
        let mut stream = builder.build();

        let data = read_exact_frame(&mut stream, payload.len()).await.unwrap();
        assert_eq!(&data[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_read_exact_leaves_trailing_bytes() {
        let mut stream = Builder::new().read(b"\x00\x00\x00\x05hel").read(b"lo").build();
        let header = read_header(&mut stream).await.unwrap();
        assert_eq!(header.payload_len, 5);

        let data = read_exact_frame(&mut stream, header.payload_len as usize)
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn test_read_exact_zero() {
        let mut stream = Builder::new().build();
        let data = read_exact_frame(&mut stream, 0).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_stream() {
        let mut stream = Builder::new().read(b"abc").build();
        match read_exact_frame(&mut stream, 10).await {
            Err(TransferError::IncompleteStream { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_header() {
        let mut stream = Builder::new().read(b"\x00\x00").build();
        assert!(matches!(
            read_header(&mut stream).await,
            Err(TransferError::IncompleteStream {
                expected: 4,
                received: 2
            })
        ));
    }

    #[test]
    fn test_header_big_endian() {
        let header = FramingHeader::decode([0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(header.payload_len, 10);
        assert_eq!(
            FramingHeader { payload_len: 0x01020304 }.encode(),
            [1, 2, 3, 4]
        );
    }
}
