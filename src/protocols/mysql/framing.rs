//! MySQL packet framing.
//!
//! Every wire frame is `[3-byte little-endian payload length][1-byte sequence id][payload]`.
//! A frame whose length is `0xFFFFFF` is followed by another frame of the same
//! logical packet. [`FrameReader`] hides that split: callers read one logical
//! packet as a single continuous byte sequence and see
//! [`FrameRead::EndOfFrame`] once it is exhausted.
//!
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use std::cmp::min;

use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error_handling::types::DecodeError;

/// Payload length marking a non-final frame.
pub const MAX_FRAME_PAYLOAD: usize = 0xFF_FFFF;

const HEADER_LEN: usize = 4;

/// Outcome of a single [`FrameReader::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    /// This many payload bytes were copied into the caller's buffer.
    Data(usize),
    /// The logical packet has no more bytes.
    EndOfFrame,
}

/// Cursor over the logical packets of one direction's byte stream.
///
/// A read never returns bytes from a frame other than the one whose header
/// was consumed last. Once a packet is exhausted, reads keep returning
/// `EndOfFrame` until [`FrameReader::reset`] re-arms the cursor.
pub struct FrameReader<R> {
    inner: R,
    remaining: usize,
    continuing: bool,
    sequence_id: u8,
    started: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            continuing: true,
            sequence_id: 0,
            started: false,
        }
    }

    /// Sequence id of the last frame header consumed.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// True once the current logical packet has been read completely.
    pub fn at_packet_end(&self) -> bool {
        self.remaining == 0 && !self.continuing
    }

    /// Re-arms the cursor for the next logical packet on the same stream.
    ///
    /// Unread payload bytes are not skipped; use [`FrameReader::finish`] for that.
    pub fn reset(&mut self) {
        self.remaining = 0;
        self.continuing = true;
        self.started = false;
    }

    /// Discards whatever is left of the current packet, then re-arms.
    pub async fn finish(&mut self) -> Result<u64, DecodeError> {
        let dropped = self.discard_remaining().await?;
        self.reset();
        Ok(dropped)
    }

    async fn read_header(&mut self) -> Result<usize, DecodeError> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                // A clean end of stream is only possible between packets.
                return Err(if filled == 0 && !self.started {
                    DecodeError::Eof
                } else {
                    DecodeError::Truncated
                });
            }
            filled += n;
        }

        self.started = true;
        self.sequence_id = header[3];
        let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        self.continuing = length == MAX_FRAME_PAYLOAD;
        trace!(
            "frame header: len={} seq={} continued={}",
            length,
            self.sequence_id,
            self.continuing
        );
        Ok(length)
    }

    /// Reads up to `buf.len()` bytes of the current logical packet.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<FrameRead, DecodeError> {
        if self.remaining == 0 {
            if !self.continuing {
                return Ok(FrameRead::EndOfFrame);
            }
            let length = self.read_header().await?;
            if length == 0 {
                return Ok(FrameRead::EndOfFrame);
            }
            self.remaining = length;
        }

        if buf.is_empty() {
            return Ok(FrameRead::Data(0));
        }

        let want = min(buf.len(), self.remaining);
        let n = self.inner.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(DecodeError::Truncated);
        }
        self.remaining -= n;
        Ok(FrameRead::Data(n))
    }

    /// Fills `buf` completely or fails if the packet ends first.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]).await? {
                FrameRead::Data(n) => filled += n,
                FrameRead::EndOfFrame => {
                    return Err(DecodeError::Malformed(format!(
                        "packet ended after {} of {} bytes",
                        filled,
                        buf.len()
                    )))
                }
            }
        }
        Ok(())
    }

    pub async fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf).await?;
        Ok(buf[0])
    }

    pub async fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf).await?;
        Ok(u16::from_le_bytes(buf))
    }

    pub async fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a NUL-terminated string. The end of the packet also terminates it.
    pub async fn read_nul_str(&mut self) -> Result<String, DecodeError> {
        let mut data = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.read(&mut byte).await? {
                FrameRead::Data(_) if byte[0] == 0 => break,
                FrameRead::Data(_) => data.push(byte[0]),
                FrameRead::EndOfFrame => break,
            }
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub async fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        let mut scratch = [0u8; 64];
        let mut left = n;
        while left > 0 {
            let chunk = min(left, scratch.len());
            self.read_exact(&mut scratch[..chunk]).await?;
            left -= chunk;
        }
        Ok(())
    }

    /// Reads the rest of the logical packet.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        while let FrameRead::Data(n) = self.read(&mut buf).await? {
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    pub async fn discard_remaining(&mut self) -> Result<u64, DecodeError> {
        let mut dropped = 0u64;
        let mut buf = [0u8; 4096];
        while let FrameRead::Data(n) = self.read(&mut buf).await? {
            dropped += n as u64;
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::mysql::test_support::frame;
    use tokio_test::io::Builder;

    async fn read_all_with<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
        chunk: usize,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            match reader.read(&mut buf).await.unwrap() {
                FrameRead::Data(n) => out.extend_from_slice(&buf[..n]),
                FrameRead::EndOfFrame => return out,
            }
        }
    }

    #[tokio::test]
    async fn payload_is_independent_of_caller_chunking() {
        let payload: Vec<u8> = (0..200u8).collect();
        let wire = frame(0, &payload);

        for chunk in [1usize, 3, 7, 64, 4096] {
            let mut reader = FrameReader::new(wire.as_slice());
            let got = read_all_with(&mut reader, chunk).await;
            assert_eq!(got, payload, "chunk size {}", chunk);
            assert_eq!(
                reader.read(&mut [0u8; 8]).await.unwrap(),
                FrameRead::EndOfFrame
            );
        }
    }

    #[tokio::test]
    async fn chunking_independence_across_continuation_boundary() {
        let mut first = vec![0u8; MAX_FRAME_PAYLOAD];
        for (i, byte) in first.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        let second: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let mut payload = first.clone();
        payload.extend_from_slice(&second);

        let mut wire = frame(0, &first);
        wire.extend_from_slice(&frame(1, &second));
        // next packet must stay untouched
        wire.extend_from_slice(&frame(0, b"tail"));

        for chunk in [1usize, 7, 4096] {
            let mut reader = FrameReader::new(wire.as_slice());
            let got = read_all_with(&mut reader, chunk).await;
            assert_eq!(got.len(), MAX_FRAME_PAYLOAD + second.len(), "chunk size {}", chunk);
            assert!(got == payload, "payload differs at chunk size {}", chunk);
            assert_eq!(reader.sequence_id(), 1);

            reader.reset();
            assert_eq!(reader.read_to_end().await.unwrap(), b"tail");
        }
    }

    #[tokio::test]
    async fn header_split_across_stream_deliveries() {
        let wire = frame(3, b"hello world");
        let mock = Builder::new()
            .read(&wire[..1])
            .read(&wire[1..3])
            .read(&wire[3..6])
            .read(&wire[6..])
            .build();

        let mut reader = FrameReader::new(mock);
        assert_eq!(reader.read_to_end().await.unwrap(), b"hello world");
        assert_eq!(reader.sequence_id(), 3);
        assert!(reader.at_packet_end());
    }

    #[tokio::test]
    async fn continuation_frames_form_one_logical_packet() {
        let k = 10usize;
        let mut first = vec![0xABu8; MAX_FRAME_PAYLOAD];
        first[MAX_FRAME_PAYLOAD - 1] = 0x01;
        let second: Vec<u8> = (0..k as u8).collect();

        let mut wire = frame(0, &first);
        wire.extend_from_slice(&frame(1, &second));

        let mut reader = FrameReader::new(wire.as_slice());
        let packet = reader.read_to_end().await.unwrap();

        assert_eq!(packet.len(), MAX_FRAME_PAYLOAD + k);
        assert_eq!(packet[MAX_FRAME_PAYLOAD - 1], 0x01);
        assert_eq!(&packet[MAX_FRAME_PAYLOAD..], second.as_slice());
        assert_eq!(reader.sequence_id(), 1);
    }

    #[tokio::test]
    async fn zero_length_frame_is_end_of_frame() {
        let mut wire = frame(0, b"");
        wire.extend_from_slice(&frame(1, b"next"));

        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(
            reader.read(&mut [0u8; 4]).await.unwrap(),
            FrameRead::EndOfFrame
        );
        reader.reset();
        assert_eq!(reader.read_to_end().await.unwrap(), b"next");
    }

    #[tokio::test]
    async fn end_of_frame_does_not_consume_the_next_header() {
        let mut wire = frame(0, b"ab");
        wire.extend_from_slice(&frame(0, b"cd"));

        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(reader.read_to_end().await.unwrap(), b"ab");
        assert_eq!(
            reader.read(&mut [0u8; 4]).await.unwrap(),
            FrameRead::EndOfFrame
        );
        reader.reset();
        assert_eq!(reader.read_to_end().await.unwrap(), b"cd");
    }

    #[tokio::test]
    async fn finish_skips_unread_payload() {
        let mut wire = frame(0, b"skip me please");
        wire.extend_from_slice(&frame(0, b"keep"));

        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(reader.read_u8().await.unwrap(), b's');
        assert_eq!(reader.finish().await.unwrap(), 13);
        assert_eq!(reader.read_to_end().await.unwrap(), b"keep");
    }

    #[tokio::test]
    async fn clean_end_of_stream_is_eof() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(matches!(
            reader.read(&mut [0u8; 4]).await,
            Err(DecodeError::Eof)
        ));
    }

    #[tokio::test]
    async fn stream_ending_inside_header_is_a_hard_error() {
        let mut reader = FrameReader::new(&[0x05u8, 0x00][..]);
        assert!(matches!(
            reader.read(&mut [0u8; 4]).await,
            Err(DecodeError::Truncated)
        ));
    }

    #[tokio::test]
    async fn stream_ending_inside_payload_is_a_hard_error() {
        let wire = [0x05u8, 0x00, 0x00, 0x00, b'a', b'b'];
        let mut reader = FrameReader::new(&wire[..]);
        assert!(matches!(
            reader.read_to_end().await,
            Err(DecodeError::Truncated)
        ));
    }

    #[tokio::test]
    async fn stream_ending_before_continuation_header_is_a_hard_error() {
        let first = vec![0u8; MAX_FRAME_PAYLOAD];
        let wire = frame(0, &first);
        let mut reader = FrameReader::new(wire.as_slice());
        assert!(matches!(
            reader.read_to_end().await,
            Err(DecodeError::Truncated)
        ));
    }

    #[tokio::test]
    async fn nul_string_stops_at_terminator_or_packet_end() {
        let mut wire = frame(0, b"8.0.30\0rest");
        wire.extend_from_slice(&frame(0, b"unterminated"));

        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(reader.read_nul_str().await.unwrap(), "8.0.30");
        assert_eq!(reader.read_to_end().await.unwrap(), b"rest");
        reader.reset();
        assert_eq!(reader.read_nul_str().await.unwrap(), "unterminated");
    }

    #[tokio::test]
    async fn read_exact_past_packet_end_is_malformed() {
        let wire = frame(0, b"ab");
        let mut reader = FrameReader::new(wire.as_slice());
        assert!(matches!(
            reader.read_u32_le().await,
            Err(DecodeError::Malformed(_))
        ));
    }
}
