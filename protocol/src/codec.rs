//! Message framing for the wire protocol.
//!
//! Every frame is `magic (4 bytes) | length (4 bytes, big-endian) | payload`.
//! [`FrameDecoder`] keeps the partial-decode buffer for one inbound stream.

use crate::ProtocolError;

/// Maximum frame payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024; // 32 MiB

/// Bytes preceding every payload.
pub const FRAME_HEADER_LEN: usize = 8;

/// Frame a serialized payload for transmission.
pub fn encode_frame(magic: [u8; 4], payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&magic);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental frame decoder.
///
/// Bytes arrive in arbitrary slices; complete frames are returned in arrival
/// order and the remainder stays buffered until more bytes come in.
#[derive(Debug)]
pub struct FrameDecoder {
    magic: [u8; 4],
    max_frame: usize,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(magic: [u8; 4]) -> Self {
        Self::with_max_frame(magic, MAX_MESSAGE_SIZE)
    }

    pub fn with_max_frame(magic: [u8; 4], max_frame: usize) -> Self {
        Self {
            magic,
            max_frame,
            buf: Vec::new(),
        }
    }

    /// Feed bytes and drain every complete frame payload.
    ///
    /// An error leaves the decoder unusable: the byte stream is out of sync
    /// and the owning stream must be failed.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < FRAME_HEADER_LEN {
                break;
            }
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&self.buf[..4]);
            if magic != self.magic {
                return Err(ProtocolError::BadMagic(magic));
            }
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&self.buf[4..FRAME_HEADER_LEN]);
            let len = u32::from_be_bytes(len_bytes) as usize;
            if len > self.max_frame {
                return Err(ProtocolError::MessageTooLarge {
                    size: len,
                    max: self.max_frame,
                });
            }
            if self.buf.len() < FRAME_HEADER_LEN + len {
                break;
            }
            let rest = self.buf.split_off(FRAME_HEADER_LEN + len);
            let mut frame = std::mem::replace(&mut self.buf, rest);
            frame.drain(..FRAME_HEADER_LEN);
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MAGIC: [u8; 4] = [0xda, 0xb5, 0xbf, 0xfa];

    #[test]
    fn single_frame() {
        let frame = encode_frame(MAGIC, b"hello").unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 5);
        let mut dec = FrameDecoder::new(MAGIC);
        assert_eq!(dec.push(&frame).unwrap(), vec![b"hello".to_vec()]);
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn split_header_waits_for_more_bytes() {
        let frame = encode_frame(MAGIC, b"abc").unwrap();
        let mut dec = FrameDecoder::new(MAGIC);
        assert!(dec.push(&frame[..3]).unwrap().is_empty());
        assert!(dec.push(&frame[3..9]).unwrap().is_empty());
        assert_eq!(dec.push(&frame[9..]).unwrap(), vec![b"abc".to_vec()]);
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut bytes = encode_frame(MAGIC, b"one").unwrap();
        bytes.extend(encode_frame(MAGIC, b"two").unwrap());
        let mut dec = FrameDecoder::new(MAGIC);
        assert_eq!(
            dec.push(&bytes).unwrap(),
            vec![b"one".to_vec(), b"two".to_vec()]
        );
    }

    #[test]
    fn wrong_magic_fails() {
        let frame = encode_frame([1, 2, 3, 4], b"x").unwrap();
        let mut dec = FrameDecoder::new(MAGIC);
        assert_eq!(dec.push(&frame), Err(ProtocolError::BadMagic([1, 2, 3, 4])));
    }

    #[test]
    fn oversized_length_prefix_fails_before_buffering_body() {
        let mut dec = FrameDecoder::with_max_frame(MAGIC, 16);
        let mut header = MAGIC.to_vec();
        header.extend_from_slice(&1000u32.to_be_bytes());
        assert!(matches!(
            dec.push(&header),
            Err(ProtocolError::MessageTooLarge { size: 1000, max: 16 })
        ));
    }

    #[test]
    fn empty_payload_frame() {
        let frame = encode_frame(MAGIC, &[]).unwrap();
        let mut dec = FrameDecoder::new(MAGIC);
        assert_eq!(dec.push(&frame).unwrap(), vec![Vec::<u8>::new()]);
    }

    proptest! {
        /// Frames survive any re-slicing of the byte stream.
        #[test]
        fn arbitrary_split_points(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
            step in 1usize..17,
        ) {
            let mut stream = Vec::new();
            for p in &payloads {
                stream.extend(encode_frame(MAGIC, p).unwrap());
            }
            let mut dec = FrameDecoder::new(MAGIC);
            let mut out = Vec::new();
            for piece in stream.chunks(step) {
                out.extend(dec.push(piece).unwrap());
            }
            prop_assert_eq!(out, payloads);
        }
    }
}
