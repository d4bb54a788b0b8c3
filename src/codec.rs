//! Frame decoding and encoding.
//!
//! [`decode`] and [`encode_text`] are pure functions over complete buffers. The
//! [`Decoder`] wraps [`decode`] for byte streams: it leaves bytes in the accumulator
//! until a whole frame is available, so callers never have to assume that one
//! transport read carries exactly one frame.
use bytes::{Bytes, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Decoded, Frame, OpCode, MAX_PAYLOAD_LEN},
    mask::apply_mask,
    Result, WebSocketError,
};

/// Header of a text frame sent by the server: 2 fixed bytes and a 16-bit extended length.
const MAX_HEAD_SIZE: usize = 4;

/// Header fields read from the bytes preceding the payload.
struct Header {
    /// Indicates if this is the final fragment in a message.
    fin: bool,
    /// The operation code of the frame.
    opcode: OpCode,
    /// Masking key, if the frame is masked.
    mask: Option<[u8; 4]>,
    /// Length of the payload, in bytes.
    payload_len: usize,
    /// Total size of the header in bytes, masking key included.
    size: usize,
}

impl Header {
    /// Parses the frame header at the start of `buf`.
    ///
    /// # Returns
    /// - `Ok(Some(Header))` once the whole header is available.
    /// - `Ok(None)` if `buf` ends before the header does.
    /// - `Err(WebSocketError)` for reserved bits or a 64-bit payload length.
    fn parse(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        if buf[0] & 0b0111_0000 != 0 {
            return Err(WebSocketError::ProtocolViolation);
        }

        let fin = buf[0] & 0b1000_0000 != 0;
        let opcode = OpCode::from(buf[0]);
        let masked = buf[1] & 0b1000_0000 != 0;
        let length_code = buf[1] & 0x7F;

        let (payload_len, mut size) = match length_code {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (usize::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => return Err(WebSocketError::PayloadTooLarge),
            len => (usize::from(len), 2),
        };

        let mask = if masked {
            if buf.len() < size + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[size..size + 4]);
            size += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some(Self {
            fin,
            opcode,
            mask,
            payload_len,
            size,
        }))
    }
}

/// Decodes the single frame at the start of `buf`.
///
/// `buf` must hold the complete frame; bytes after it are ignored. Close frames are
/// reported as soon as the opcode is known and other non-text opcodes are skipped, so
/// their length and payload are never read.
///
/// # Errors
/// - [`WebSocketError::ProtocolViolation`] if any reserved bit is set.
/// - [`WebSocketError::TruncatedFrame`] if `buf` is shorter than the header or payload.
/// - [`WebSocketError::PayloadTooLarge`] if the frame uses the 64-bit length form.
/// - [`WebSocketError::InvalidUTF8`] if a text payload is not valid UTF-8.
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    let first = *buf.first().ok_or(WebSocketError::TruncatedFrame)?;
    if first & 0b0111_0000 != 0 {
        return Err(WebSocketError::ProtocolViolation);
    }

    match OpCode::from(first) {
        OpCode::Close => return Ok(Decoded::Close),
        OpCode::Text => {}
        _ => return Ok(Decoded::Ignored),
    }

    let header = Header::parse(buf)?.ok_or(WebSocketError::TruncatedFrame)?;
    let payload = buf
        .get(header.size..header.size + header.payload_len)
        .ok_or(WebSocketError::TruncatedFrame)?;

    // fresh buffer per frame, the wire bytes stay untouched
    let mut payload = payload.to_vec();
    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Decoded::Text(Frame::new(
        header.fin,
        header.opcode,
        header.mask,
        into_text(payload)?,
    )))
}

#[inline(always)]
fn into_text(payload: Vec<u8>) -> Result<String> {
    #[cfg(feature = "simd")]
    {
        simdutf8::basic::from_utf8(&payload)
            .map(str::to_owned)
            .map_err(|_| WebSocketError::InvalidUTF8)
    }
    #[cfg(not(feature = "simd"))]
    {
        String::from_utf8(payload).map_err(|_| WebSocketError::InvalidUTF8)
    }
}

/// Encodes `text` as a final, unmasked text frame.
///
/// # Errors
/// [`WebSocketError::PayloadTooLarge`] if `text` is 65536 bytes or longer.
pub fn encode_text(text: &str) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    codec::Encoder::encode(&mut Encoder, text, &mut dst)?;
    Ok(dst.freeze())
}

/// Serializes `value` to JSON and encodes it as a text frame.
pub fn encode_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    let json = serde_json::to_string(value)?;
    encode_text(&json)
}

/// Writes the header of a text frame carrying `len` payload bytes and returns its size.
fn fmt_head(len: usize, head: &mut [u8; MAX_HEAD_SIZE]) -> Result<usize> {
    head[0] = 0b1000_0000 | u8::from(OpCode::Text);

    if len < 126 {
        head[1] = len as u8;
        Ok(2)
    } else if len <= MAX_PAYLOAD_LEN {
        head[1] = 126;
        head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        Ok(4)
    } else {
        Err(WebSocketError::PayloadTooLarge)
    }
}

/// A combined codec that provides both encoding and decoding functionality.
///
/// Can be driven directly over a `BytesMut` accumulator, as the session does, or
/// plugged into `tokio_util::codec::Framed`.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        codec::Decoder::decode(&mut self.decoder, src)
    }
}

impl<'a> codec::Encoder<&'a str> for Codec {
    type Error = <Encoder as codec::Encoder<&'a str>>::Error;

    #[inline]
    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<()> {
        codec::Encoder::encode(&mut self.encoder, item, dst)
    }
}

/// Streaming frame decoder.
///
/// Holds no per-frame state: each call re-reads the header at the front of the
/// accumulator and only consumes bytes once a whole frame is buffered.
pub struct Decoder {
    /// Maximum allowed size for the frame payload.
    max_payload_read: usize,
}

impl Decoder {
    /// Creates a new `Decoder` that rejects payloads larger than `max_payload_read`.
    pub fn new(max_payload_read: usize) -> Self {
        Self { max_payload_read }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LEN)
    }
}

impl codec::Decoder for Decoder {
    type Item = Decoded;
    type Error = WebSocketError;

    /// Decodes the next frame from `src`.
    ///
    /// # Returns
    /// - `Ok(Some(Decoded))`: a whole frame was consumed from `src`.
    /// - `Ok(Some(Decoded::Close))` as soon as a close opcode is seen. The close
    ///   frame and anything after it are discarded.
    /// - `Ok(None)`: more data is needed; `src` is left untouched.
    /// - `Err(WebSocketError)`: the frame is invalid or larger than allowed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(&first) = src.first() else {
            return Ok(None);
        };
        if first & 0b0111_0000 != 0 {
            return Err(WebSocketError::ProtocolViolation);
        }

        // nothing after a close frame is read, so its length doesn't matter
        if OpCode::from(first) == OpCode::Close {
            src.clear();
            return Ok(Some(Decoded::Close));
        }

        let header = match Header::parse(src)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if header.payload_len > self.max_payload_read {
            return Err(WebSocketError::PayloadTooLarge);
        }

        let frame_len = header.size + header.payload_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        decode(&frame).map(Some)
    }
}

/// Encoder for outbound text frames.
///
/// Server frames are never masked, so the payload is copied as-is after the header.
pub struct Encoder;

impl<'a> codec::Encoder<&'a str> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, text: &'a str, dst: &mut BytesMut) -> Result<()> {
        let mut head = [0; MAX_HEAD_SIZE];
        let size = fmt_head(text.len(), &mut head)?;

        dst.reserve(size + text.len());
        dst.extend_from_slice(&head[..size]);
        dst.extend_from_slice(text.as_bytes());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::Decoder as _;

    /// Builds a frame the way a client would put it on the wire.
    fn client_frame(first: u8, mask: Option<[u8; 4]>, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![first];
        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        if payload.len() < 126 {
            out.push(mask_bit | payload.len() as u8);
        } else {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        let mut body = payload.to_vec();
        if let Some(mask) = mask {
            out.extend_from_slice(&mask);
            apply_mask(&mut body, mask);
        }
        out.extend_from_slice(&body);
        out
    }

    fn text_of(decoded: Decoded) -> String {
        match decoded {
            Decoded::Text(frame) => frame.into_text(),
            other => panic!("expected text, got {:?}", other),
        }
    }

    mod decode_tests {
        use super::*;

        #[test]
        fn test_masked_text() {
            let mask = [0x37, 0xfa, 0x21, 0x3d];
            let wire = client_frame(0x81, Some(mask), b"Hello");
            // RFC 6455 section 5.7 example
            assert_eq!(
                wire,
                [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
            );

            match decode(&wire).unwrap() {
                Decoded::Text(frame) => {
                    assert!(frame.fin);
                    assert_eq!(frame.opcode, OpCode::Text);
                    assert_eq!(frame.mask, Some(mask));
                    assert_eq!(frame.payload, "Hello");
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn test_unmasked_text() {
            let wire = client_frame(0x81, None, b"plain");
            match decode(&wire).unwrap() {
                Decoded::Text(frame) => {
                    assert!(frame.mask.is_none());
                    assert_eq!(frame.payload, "plain");
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn test_masking_law() {
            let mask = [0x01, 0x80, 0xFE, 0x42];
            let wire = client_frame(0x81, Some(mask), &[0u8; 10][..]);
            let masked = &wire[6..];
            for (i, byte) in masked.iter().enumerate() {
                assert_eq!(*byte, mask[i % 4]);
            }

            match decode(&wire).unwrap() {
                Decoded::Text(frame) => assert_eq!(frame.payload.as_bytes(), &[0u8; 10]),
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn test_random_masks() {
            let text = "masking keys should not matter, ünïcödé included";
            for _ in 0..16 {
                let mask: [u8; 4] = rand::random();
                let wire = client_frame(0x81, Some(mask), text.as_bytes());
                assert_eq!(text_of(decode(&wire).unwrap()), text);
            }
        }

        #[test]
        fn test_extended_length() {
            let text = "x".repeat(300);
            let wire = client_frame(0x81, Some([9, 8, 7, 6]), text.as_bytes());
            assert_eq!(wire[1], 0x80 | 126);
            assert_eq!(text_of(decode(&wire).unwrap()), text);
        }

        #[test]
        fn test_empty_text() {
            let wire = [0x81, 0x80, 1, 2, 3, 4];
            assert_eq!(text_of(decode(&wire).unwrap()), "");
        }

        #[test]
        fn test_close() {
            assert_eq!(decode(&[0x88, 0x00]).unwrap(), Decoded::Close);
            // close code 1000 with a reason, masked
            let wire = client_frame(0x88, Some([1, 2, 3, 4]), b"\x03\xE8bye");
            assert_eq!(decode(&wire).unwrap(), Decoded::Close);
            // the opcode alone is enough
            assert_eq!(decode(&[0x88]).unwrap(), Decoded::Close);
        }

        #[test]
        fn test_ignored_opcodes() {
            for first in [0x80, 0x82, 0x89, 0x8A, 0x83, 0x8F, 0x02] {
                let wire = client_frame(first, Some([1, 2, 3, 4]), b"data");
                assert_eq!(decode(&wire).unwrap(), Decoded::Ignored, "{:#x}", first);
            }
        }

        #[test]
        fn test_non_final_text_is_surfaced() {
            let wire = client_frame(0x01, None, b"part");
            match decode(&wire).unwrap() {
                Decoded::Text(frame) => {
                    assert!(!frame.fin);
                    assert_eq!(frame.payload, "part");
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn test_reserved_bits() {
            for first in [0xC1, 0xA1, 0x91, 0xF1, 0xC8] {
                let wire = [first, 0x00];
                assert!(
                    matches!(decode(&wire), Err(WebSocketError::ProtocolViolation)),
                    "{:#x}",
                    first
                );
            }
        }

        #[test]
        fn test_64bit_length() {
            let mut wire = vec![0x81, 0x80 | 127];
            wire.extend_from_slice(&70000u64.to_be_bytes());
            wire.extend_from_slice(&[0; 4]);
            assert!(matches!(decode(&wire), Err(WebSocketError::PayloadTooLarge)));
            assert!(matches!(
                decode(&[0x81, 127]),
                Err(WebSocketError::PayloadTooLarge)
            ));
        }

        #[test]
        fn test_truncated_payload() {
            let mut wire = vec![0x81, 126];
            wire.extend_from_slice(&200u16.to_be_bytes());
            wire.extend_from_slice(&[b'a'; 50]);
            assert!(matches!(decode(&wire), Err(WebSocketError::TruncatedFrame)));
        }

        #[test]
        fn test_truncated_header() {
            assert!(matches!(decode(&[]), Err(WebSocketError::TruncatedFrame)));
            assert!(matches!(decode(&[0x81]), Err(WebSocketError::TruncatedFrame)));
            assert!(matches!(
                decode(&[0x81, 126, 0x01]),
                Err(WebSocketError::TruncatedFrame)
            ));
            assert!(matches!(
                decode(&[0x81, 0x85, 1, 2]),
                Err(WebSocketError::TruncatedFrame)
            ));
        }

        #[test]
        fn test_invalid_utf8() {
            let wire = client_frame(0x81, Some([5, 6, 7, 8]), &[0xFF, 0xFE]);
            assert!(matches!(decode(&wire), Err(WebSocketError::InvalidUTF8)));
        }

        #[test]
        fn test_trailing_bytes_ignored() {
            let mut wire = client_frame(0x81, None, b"one");
            wire.extend_from_slice(&client_frame(0x81, None, b"two"));
            assert_eq!(text_of(decode(&wire).unwrap()), "one");
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn test_short_text() {
            let bytes = encode_text("Hello").unwrap();
            assert_eq!(&bytes[..], b"\x81\x05Hello");
        }

        #[test]
        fn test_empty_text() {
            assert_eq!(&encode_text("").unwrap()[..], &[0x81, 0x00]);
        }

        #[test]
        fn test_boundary_125_126() {
            let bytes = encode_text(&"a".repeat(125)).unwrap();
            assert_eq!(bytes[1], 125);
            assert_eq!(bytes.len(), 2 + 125);

            let bytes = encode_text(&"a".repeat(126)).unwrap();
            assert_eq!(bytes[1], 126);
            assert_eq!(&bytes[2..4], &126u16.to_be_bytes());
            assert_eq!(bytes.len(), 4 + 126);
        }

        #[test]
        fn test_130_byte_payload() {
            let text = "b".repeat(130);
            let bytes = encode_text(&text).unwrap();

            assert_eq!(bytes[0], 0x81);
            assert_eq!(bytes[1], 126);
            assert_eq!(&bytes[2..4], &[0x00, 130]);
            assert_eq!(&bytes[4..], text.as_bytes());
        }

        #[test]
        fn test_max_payload() {
            let text = "c".repeat(MAX_PAYLOAD_LEN);
            let bytes = encode_text(&text).unwrap();
            assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);

            let text = "c".repeat(MAX_PAYLOAD_LEN + 1);
            assert!(matches!(
                encode_text(&text),
                Err(WebSocketError::PayloadTooLarge)
            ));
        }

        #[test]
        fn test_never_masked() {
            for len in [0, 10, 125, 126, 1000] {
                let bytes = encode_text(&"m".repeat(len)).unwrap();
                assert_eq!(bytes[1] & 0x80, 0);
            }
        }

        #[test]
        fn test_json() {
            let bytes = encode_json(&serde_json::json!({ "message": "Hello from the server!" }))
                .unwrap();
            let expected = br#"{"message":"Hello from the server!"}"#;
            assert_eq!(bytes[0], 0x81);
            assert_eq!(bytes[1] as usize, expected.len());
            assert_eq!(&bytes[2..], &expected[..]);
        }

        #[test]
        fn test_round_trip() {
            let long = "z".repeat(126);
            let longer = "é".repeat(20000);
            for text in ["", "hi", "日本語のテキスト", long.as_str(), longer.as_str()] {
                let bytes = encode_text(text).unwrap();
                assert_eq!(text_of(decode(&bytes).unwrap()), text);
            }
        }
    }

    mod stream_tests {
        use super::*;

        #[test]
        fn test_partial_frame() {
            let wire = client_frame(0x81, Some([1, 2, 3, 4]), b"split across reads");
            let mut decoder = Decoder::default();
            let mut buf = BytesMut::new();

            for &byte in &wire[..wire.len() - 1] {
                buf.extend_from_slice(&[byte]);
                assert_eq!(decoder.decode(&mut buf).unwrap(), None);
            }
            assert_eq!(buf.len(), wire.len() - 1);

            buf.extend_from_slice(&wire[wire.len() - 1..]);
            let decoded = decoder.decode(&mut buf).unwrap().unwrap();
            assert_eq!(text_of(decoded), "split across reads");
            assert!(buf.is_empty());
        }

        #[test]
        fn test_several_frames() {
            let mut buf = BytesMut::new();
            buf.extend_from_slice(&client_frame(0x81, Some([1, 1, 1, 1]), b"first"));
            buf.extend_from_slice(&client_frame(0x89, Some([2, 2, 2, 2]), b"ping"));
            buf.extend_from_slice(&client_frame(0x81, Some([3, 3, 3, 3]), b"second"));
            buf.extend_from_slice(&[0x88, 0x80, 0, 0, 0, 0]);

            let mut decoder = Decoder::default();
            assert_eq!(text_of(decoder.decode(&mut buf).unwrap().unwrap()), "first");
            assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Decoded::Ignored));
            assert_eq!(text_of(decoder.decode(&mut buf).unwrap().unwrap()), "second");
            assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Decoded::Close));
            assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        }

        #[test]
        fn test_max_payload_read() {
            let mut decoder = Decoder::new(16);
            let mut buf = BytesMut::from(&client_frame(0x81, None, &[b'a'; 17])[..]);
            assert!(matches!(
                decoder.decode(&mut buf),
                Err(WebSocketError::PayloadTooLarge)
            ));

            let mut buf = BytesMut::from(&client_frame(0x81, None, &[b'a'; 16])[..]);
            assert!(decoder.decode(&mut buf).unwrap().is_some());
        }

        #[test]
        fn test_64bit_length_rejected_early() {
            let mut decoder = Decoder::default();
            let mut buf = BytesMut::from(&[0x82u8, 127][..]);
            assert!(matches!(
                decoder.decode(&mut buf),
                Err(WebSocketError::PayloadTooLarge)
            ));
        }

        #[test]
        fn test_close_regardless_of_length() {
            let mut decoder = Decoder::new(4);
            let mut buf = BytesMut::from(
                &client_frame(0x88, Some([1, 2, 3, 4]), b"\x03\xE8goodbye")[..],
            );
            assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Decoded::Close));
            assert!(buf.is_empty());

            let mut buf = BytesMut::from(&[0x88u8, 0xFF][..]);
            assert_eq!(
                Decoder::default().decode(&mut buf).unwrap(),
                Some(Decoded::Close)
            );
        }

        #[test]
        fn test_reserved_bits_before_close() {
            let mut buf = BytesMut::from(&[0xC8u8, 0x00][..]);
            assert!(matches!(
                Decoder::default().decode(&mut buf),
                Err(WebSocketError::ProtocolViolation)
            ));
        }

        #[test]
        fn test_codec_encoder() {
            let mut frames = Codec::from((Decoder::default(), Encoder));
            let mut dst = BytesMut::new();
            codec::Encoder::encode(&mut frames, "one", &mut dst).unwrap();
            codec::Encoder::encode(&mut frames, "two", &mut dst).unwrap();
            assert_eq!(&dst[..], b"\x81\x03one\x81\x03two");

            assert_eq!(text_of(frames.decode(&mut dst).unwrap().unwrap()), "one");
            assert_eq!(text_of(frames.decode(&mut dst).unwrap().unwrap()), "two");
        }
    }
}
