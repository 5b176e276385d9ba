//! Bolt protocol codec for tokio_util.
//!
//! Messages travel as a sequence of chunks, each with a 2-byte big-endian
//! length prefix, terminated by an empty chunk (0x00 0x00).
//!
//! Outbound, [`ChunkedOutput`] lets the packstream encoder write straight into
//! chunks: it reserves each chunk header up front and patches the length in
//! once the chunk is full. Inbound, [`BoltCodec`] reassembles chunks into
//! complete messages and [`BoltMessageCodec`] decodes them into responses.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{BoltRequest, BoltResponse};
use super::packstream::{PackOutput, PackStreamDecoder, PackStreamEncoder, PackStreamError};
use super::BoltError;

/// Default maximum chunk payload size
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16383;

/// Default maximum reassembled message size (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// End of message marker (0x00 0x00)
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

const CHUNK_HEADER_SIZE: usize = 2;

/// Chunk-aware packstream sink.
///
/// A new chunk is opened lazily on the first write after the previous one was
/// closed. Primitive writes go whole into one chunk; only byte slices are split.
pub struct ChunkedOutput<'a> {
    buf: &'a mut BytesMut,
    max_chunk_size: usize,
    chunk_start: Option<usize>,
    chunk_len: usize,
}

impl<'a> ChunkedOutput<'a> {
    /// `max_chunk_size` is clamped to `1..=65535`.
    pub fn new(buf: &'a mut BytesMut, max_chunk_size: usize) -> Self {
        Self {
            buf,
            max_chunk_size: max_chunk_size.clamp(1, u16::MAX as usize),
            chunk_start: None,
            chunk_len: 0,
        }
    }

    /// Close the last chunk and append the end marker.
    pub fn finish(mut self) {
        self.close_chunk();
        self.buf.put_slice(&END_MARKER);
    }

    fn ensure_fits(&mut self, n: usize) {
        if self.chunk_start.is_some() && self.chunk_len > 0 && self.chunk_len + n > self.max_chunk_size {
            self.close_chunk();
        }
        if self.chunk_start.is_none() {
            self.open_chunk();
        }
    }

    fn open_chunk(&mut self) {
        self.chunk_start = Some(self.buf.len());
        self.chunk_len = 0;
        self.buf.put_u16(0);
    }

    fn close_chunk(&mut self) {
        if let Some(start) = self.chunk_start.take() {
            let len = (self.chunk_len as u16).to_be_bytes();
            self.buf[start..start + CHUNK_HEADER_SIZE].copy_from_slice(&len);
            self.chunk_len = 0;
        }
    }
}

impl PackOutput for ChunkedOutput<'_> {
    fn write_u8(&mut self, value: u8) {
        self.ensure_fits(1);
        self.buf.put_u8(value);
        self.chunk_len += 1;
    }

    fn write_u16(&mut self, value: u16) {
        self.ensure_fits(2);
        self.buf.put_u16(value);
        self.chunk_len += 2;
    }

    fn write_u32(&mut self, value: u32) {
        self.ensure_fits(4);
        self.buf.put_u32(value);
        self.chunk_len += 4;
    }

    fn write_i64(&mut self, value: i64) {
        self.ensure_fits(8);
        self.buf.put_i64(value);
        self.chunk_len += 8;
    }

    fn write_f64(&mut self, value: f64) {
        self.ensure_fits(8);
        self.buf.put_f64(value);
        self.chunk_len += 8;
    }

    fn write_bytes(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.chunk_start.is_none() || self.chunk_len >= self.max_chunk_size {
                self.close_chunk();
                self.open_chunk();
            }
            let room = self.max_chunk_size - self.chunk_len;
            let take = room.min(data.len());
            self.buf.put_slice(&data[..take]);
            self.chunk_len += take;
            data = &data[take..];
        }
    }
}

/// Pack one message into `dst` as chunks. On error `dst` is left untouched.
pub fn write_chunked<F>(dst: &mut BytesMut, max_chunk_size: usize, pack: F) -> Result<(), PackStreamError>
where
    F: FnOnce(&mut PackStreamEncoder<'_, ChunkedOutput<'_>>) -> Result<(), PackStreamError>,
{
    let mark = dst.len();
    let mut out = ChunkedOutput::new(dst, max_chunk_size);
    let result = pack(&mut PackStreamEncoder::new(&mut out));
    match result {
        Ok(()) => {
            out.finish();
            Ok(())
        }
        Err(e) => {
            drop(out);
            dst.truncate(mark);
            Err(e)
        }
    }
}

/// Reassembles chunks into complete raw messages.
#[derive(Debug)]
pub struct BoltCodec {
    /// Maximum message size
    max_message_size: usize,
    /// Buffer for accumulating chunks
    message_buffer: BytesMut,
}

impl BoltCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a codec with custom max message size.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            message_buffer: BytesMut::with_capacity(4096),
        }
    }
}

impl Default for BoltCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BoltCodec {
    type Item = BytesMut;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Need at least 2 bytes for chunk header
            if src.len() < CHUNK_HEADER_SIZE {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(CHUNK_HEADER_SIZE);
                if self.message_buffer.is_empty() {
                    // NOOP keep-alive
                    continue;
                }
                return Ok(Some(self.message_buffer.split()));
            }

            if src.len() < CHUNK_HEADER_SIZE + chunk_size {
                src.reserve(CHUNK_HEADER_SIZE + chunk_size - src.len());
                return Ok(None);
            }

            if self.message_buffer.len() + chunk_size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: self.message_buffer.len() + chunk_size,
                    max: self.max_message_size,
                });
            }

            src.advance(CHUNK_HEADER_SIZE);
            self.message_buffer.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
        }
    }
}

/// Client-side message codec: encodes requests, decodes responses.
#[derive(Debug)]
pub struct BoltMessageCodec {
    inner: BoltCodec,
    max_chunk_size: usize,
}

impl BoltMessageCodec {
    pub fn new(max_chunk_size: usize, max_message_size: usize) -> Self {
        Self {
            inner: BoltCodec::with_max_size(max_message_size),
            max_chunk_size,
        }
    }
}

impl Default for BoltMessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Decoder for BoltMessageCodec {
    type Item = BoltResponse;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(message) = self.inner.decode(src)? else {
            return Ok(None);
        };
        let mut dec = PackStreamDecoder::new(&message);
        let response = BoltResponse::unpack(&mut dec)?;
        if !dec.is_empty() {
            return Err(BoltError::Protocol(format!(
                "{} trailing bytes after {} message",
                dec.remaining(),
                response.name()
            )));
        }
        Ok(Some(response))
    }
}

impl Encoder<BoltRequest> for BoltMessageCodec {
    type Error = BoltError;

    fn encode(&mut self, item: BoltRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_chunked(dst, self.max_chunk_size, |enc| item.pack(enc))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::{PullMessage, RunMessage};
    use crate::bolt::packstream::{decode, encode, PackStreamValue};
    use proptest::prelude::*;

    fn chunked_value(value: &PackStreamValue, max_chunk_size: usize) -> BytesMut {
        let mut buf = BytesMut::new();
        write_chunked(&mut buf, max_chunk_size, |enc| enc.encode(value)).unwrap();
        buf
    }

    /// Split a framed buffer back into chunk payload sizes.
    fn chunk_sizes(mut framed: &[u8]) -> Vec<usize> {
        let mut sizes = Vec::new();
        while framed.len() >= 2 {
            let size = u16::from_be_bytes([framed[0], framed[1]]) as usize;
            sizes.push(size);
            framed = &framed[2 + size..];
        }
        sizes
    }

    #[test]
    fn test_single_chunk_layout() {
        let buf = chunked_value(&PackStreamValue::Integer(42), DEFAULT_MAX_CHUNK_SIZE);
        assert_eq!(&buf[..], &[0x00, 0x01, 42, 0x00, 0x00]);
    }

    #[test]
    fn test_large_value_is_split() {
        let value = PackStreamValue::String("x".repeat(DEFAULT_MAX_CHUNK_SIZE * 2 + 100));
        let buf = chunked_value(&value, DEFAULT_MAX_CHUNK_SIZE);
        let sizes = chunk_sizes(&buf);
        assert_eq!(sizes.last(), Some(&0));
        assert!(sizes[..sizes.len() - 1].iter().all(|&s| s > 0 && s <= DEFAULT_MAX_CHUNK_SIZE));
        assert_eq!(sizes.len(), 4);

        let mut codec = BoltCodec::new();
        let mut src = buf;
        let message = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(decode(&message).unwrap(), value);
    }

    #[test]
    fn test_primitives_never_split() {
        // marker + 8 bytes must not straddle a 6-byte chunk boundary
        let value = PackStreamValue::List(vec![
            PackStreamValue::Integer(i64::MAX),
            PackStreamValue::Float(2.5),
        ]);
        let buf = chunked_value(&value, 6);
        let sizes = chunk_sizes(&buf);
        assert!(sizes.contains(&8));

        let mut codec = BoltCodec::new();
        let mut src = buf;
        let message = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(decode(&message).unwrap(), value);
    }

    #[test]
    fn test_chunk_header_patched_at_boundary() {
        let value = PackStreamValue::Bytes(vec![9u8; 10]);
        let buf = chunked_value(&value, 4);
        // 0xCC 0x0A then 10 bytes: 12 bytes over chunks of 4
        assert_eq!(chunk_sizes(&buf), vec![4, 4, 4, 0]);
    }

    #[test]
    fn test_write_chunked_rolls_back_on_error() {
        let mut buf = BytesMut::from(&b"keep"[..]);
        let result = write_chunked(&mut buf, 16, |enc| {
            enc.encode_int(1);
            Err(PackStreamError::InvalidMapKey)
        });
        assert!(result.is_err());
        assert_eq!(&buf[..], b"keep");
    }

    #[test]
    fn test_partial_chunk() {
        let full = chunked_value(&PackStreamValue::Integer(42), DEFAULT_MAX_CHUNK_SIZE);
        let mut codec = BoltCodec::new();

        let mut src = BytesMut::from(&full[..2]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&full[2..]);
        let message = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&message[..], &[42]);
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = BoltCodec::with_max_size(100);
        let mut buf = BytesMut::new();
        buf.put_u16(200);
        buf.extend_from_slice(&[0u8; 200]);
        assert!(matches!(codec.decode(&mut buf), Err(BoltError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_empty_message_skipped() {
        let mut buf = BytesMut::new();
        buf.put_slice(&END_MARKER);
        buf.extend_from_slice(&chunked_value(&PackStreamValue::Boolean(true), 16));

        let mut codec = BoltCodec::new();
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&message[..], &[0xC3]);
    }

    #[test]
    fn test_multiple_messages() {
        let mut buf = BytesMut::new();
        for i in 1..=3 {
            buf.extend_from_slice(&chunked_value(&PackStreamValue::Integer(i), 16));
        }
        let mut codec = BoltCodec::new();
        for i in 1..=3u8 {
            assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &[i]);
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_message_codec_encodes_requests() {
        let mut codec = BoltMessageCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(BoltRequest::Run(RunMessage::new("RETURN 1")), &mut buf).unwrap();
        codec.encode(BoltRequest::Pull(PullMessage::all()), &mut buf).unwrap();

        let mut expected = vec![0x00, 0x0D, 0xB3, 0x10, 0x88];
        expected.extend_from_slice(b"RETURN 1");
        expected.extend_from_slice(&[0xA0, 0xA0, 0x00, 0x00]);
        expected.extend_from_slice(&[0x00, 0x06, 0xB1, 0x3F, 0xA1, 0x81, b'n', 0xFF, 0x00, 0x00]);
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn test_message_codec_decodes_responses() {
        let mut src = BytesMut::from(&[0x00, 0x02, 0xB0, 0x7E, 0x00, 0x00][..]);
        let mut codec = BoltMessageCodec::default();
        assert_eq!(codec.decode(&mut src).unwrap(), Some(BoltResponse::Ignored));
    }

    #[test]
    fn test_message_codec_rejects_bad_shape() {
        // IGNORED with one field
        let mut src = BytesMut::from(&[0x00, 0x03, 0xB1, 0x7E, 0xC0, 0x00, 0x00][..]);
        let mut codec = BoltMessageCodec::default();
        assert!(matches!(codec.decode(&mut src), Err(BoltError::PackStream(_))));
    }

    fn sample_message() -> PackStreamValue {
        let mut map = std::collections::HashMap::new();
        map.insert("name".to_string(), PackStreamValue::String("n".repeat(40)));
        map.insert("blob".to_string(), PackStreamValue::Bytes((0..=255u8).collect()));
        PackStreamValue::List(vec![
            PackStreamValue::Map(map),
            PackStreamValue::Integer(-70000),
            PackStreamValue::Float(1.0e-3),
        ])
    }

    #[test]
    fn test_split_at_every_offset() {
        let value = sample_message();
        let framed = chunked_value(&value, 64);

        for split in 0..=framed.len() {
            let mut codec = BoltCodec::new();
            let mut src = BytesMut::from(&framed[..split]);
            let mut decoded = codec.decode(&mut src).unwrap();
            if decoded.is_none() {
                src.extend_from_slice(&framed[split..]);
                decoded = codec.decode(&mut src).unwrap();
            }
            let message = decoded.expect("complete message");
            assert_eq!(decode(&message).unwrap(), value, "split at {}", split);
        }
    }

    proptest! {
        #[test]
        fn prop_chunking_is_transparent(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            text in ".{0,64}",
            max_chunk in 1usize..300,
            split in 0usize..4096,
        ) {
            let value = PackStreamValue::List(vec![
                PackStreamValue::Bytes(payload),
                PackStreamValue::String(text),
            ]);
            let framed = chunked_value(&value, max_chunk);
            prop_assert!(chunk_sizes(&framed).iter().all(|&s| s <= max_chunk.max(8)));

            let split = split.min(framed.len());
            let mut codec = BoltCodec::new();
            let mut src = BytesMut::from(&framed[..split]);
            let first = codec.decode(&mut src).unwrap();
            let message = match first {
                Some(m) => m,
                None => {
                    src.extend_from_slice(&framed[split..]);
                    codec.decode(&mut src).unwrap().unwrap()
                }
            };
            prop_assert_eq!(decode(&message).unwrap(), value.clone());
            prop_assert_eq!(&message[..], &encode(&value).unwrap()[..]);
        }
    }
}
