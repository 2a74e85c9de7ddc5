//! Frame reassembly for the PostgreSQL wire protocol
//!
//! A frame is an ordered pair of byte chunks: a fixed-size header chunk and a
//! variable-size payload chunk, reconstructed incrementally from the byte
//! stream. Two shapes exist:
//!
//! - *Untyped frame*: `[length: u32 BE][payload]`, used only during the
//!   pre-authentication phase (startup message, SSL probe). The length field
//!   counts itself, so `length = payload + 4`.
//! - *Typed frame*: `[tag: u8][length: u32 BE][payload]`, used for every
//!   message once the protocol has a type tag. The length again counts
//!   itself but not the tag.
//!
//! [`FrameDecoder`] is the generic incremental chunk assembler both shapes
//! plug into: it is fed arbitrary byte slices and yields complete frames,
//! independent of how the stream was split into reads.

use std::marker::PhantomData;

use crate::error::{ProxyError, Result};

/// Maximum accepted message length (100MB, protocol allows up to 1GB)
pub const MAX_MESSAGE_SIZE: u32 = 100 * 1024 * 1024;

/// Minimum message length (just the 4-byte length field)
pub const MIN_MESSAGE_LENGTH: u32 = 4;

// ============================================================================
// Frame Types
// ============================================================================

/// A complete untyped frame (pre-authentication messages)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntypedFrame {
    /// Frame payload, without the length field
    pub payload: Vec<u8>,
}

impl UntypedFrame {
    /// Create a frame from a payload
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Serialize to wire format: `[length][payload]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.extend_from_slice(&((self.payload.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// A complete typed frame (everything after the startup phase)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedFrame {
    /// Message type tag
    pub tag: u8,
    /// Frame payload, without tag and length field
    pub payload: Vec<u8>,
}

impl TypedFrame {
    /// Create a frame from a tag and payload
    pub fn new(tag: u8, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }

    /// Serialize to wire format: `[tag][length][payload]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.payload.len());
        out.push(self.tag);
        out.extend_from_slice(&((self.payload.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

// ============================================================================
// Frame Formats
// ============================================================================

/// Header layout of a frame shape: how large the header chunk is, what chunk
/// is required next, and how to turn the finished chunks into a frame.
///
/// The `next_chunk_size` contract mirrors the incremental reader it serves:
/// given the chunks read so far, return the byte size required for the next
/// chunk, or `None` when exactly two chunks exist and the frame is complete.
pub trait FrameFormat {
    /// The frame type this format assembles
    type Frame;

    /// Size of the fixed header chunk
    const HEADER_LEN: usize;

    /// Required size of the next chunk, or `None` when the frame is complete
    fn next_chunk_size(chunks: &[Vec<u8>]) -> Result<Option<usize>>;

    /// Build the frame from the completed header and payload chunks
    fn into_frame(chunks: Vec<Vec<u8>>) -> Self::Frame;
}

/// Validate a wire length field and convert it to a payload chunk size.
/// The length counts itself, so the payload is `length - 4` bytes.
fn payload_size(length: u32) -> Result<usize> {
    if length < MIN_MESSAGE_LENGTH {
        return Err(ProxyError::Protocol(format!(
            "Invalid message length: {}",
            length
        )));
    }
    if length > MAX_MESSAGE_SIZE {
        return Err(ProxyError::Protocol(format!(
            "Message too large: {} bytes (max: {})",
            length, MAX_MESSAGE_SIZE
        )));
    }
    Ok((length - 4) as usize)
}

/// Format of [`UntypedFrame`]: 4-byte header holding the length field
pub struct UntypedFormat;

impl FrameFormat for UntypedFormat {
    type Frame = UntypedFrame;

    const HEADER_LEN: usize = 4;

    fn next_chunk_size(chunks: &[Vec<u8>]) -> Result<Option<usize>> {
        match chunks {
            [header] => {
                let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
                payload_size(length).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn into_frame(mut chunks: Vec<Vec<u8>>) -> UntypedFrame {
        UntypedFrame {
            payload: chunks.remove(1),
        }
    }
}

/// Format of [`TypedFrame`]: 5-byte header holding the tag and length field
pub struct TypedFormat;

impl FrameFormat for TypedFormat {
    type Frame = TypedFrame;

    const HEADER_LEN: usize = 5;

    fn next_chunk_size(chunks: &[Vec<u8>]) -> Result<Option<usize>> {
        match chunks {
            [header] => {
                // Skip the tag byte, the length field starts at offset 1
                let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
                payload_size(length).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn into_frame(mut chunks: Vec<Vec<u8>>) -> TypedFrame {
        let payload = chunks.remove(1);
        TypedFrame {
            tag: chunks[0][0],
            payload,
        }
    }
}

// ============================================================================
// Incremental Decoder
// ============================================================================

/// Incremental frame assembler
///
/// Accumulates bytes fed in arbitrary slices into header/payload chunks and
/// yields complete frames. Bytes belonging to a frame that has not completed
/// yet are retained across calls; [`FrameDecoder::into_remainder`] hands them
/// back verbatim so a caller switching to raw relay loses nothing.
pub struct FrameDecoder<F: FrameFormat> {
    /// Completed and in-progress chunks of the current frame (at most two)
    chunks: Vec<Vec<u8>>,
    /// Required size of the chunk currently being filled
    target: usize,
    _format: PhantomData<F>,
}

impl<F: FrameFormat> FrameDecoder<F> {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            target: 0,
            _format: PhantomData,
        }
    }

    /// Feed bytes into the decoder, returning every frame completed by them
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<F::Frame>> {
        let mut frames = Vec::new();

        loop {
            if self.chunks.is_empty() {
                self.chunks.push(Vec::with_capacity(F::HEADER_LEN));
                self.target = F::HEADER_LEN;
            }

            // Fill the current chunk from the input
            let current = self.chunks.last_mut().expect("chunk in progress");
            let missing = self.target - current.len();
            let take = missing.min(data.len());
            current.extend_from_slice(&data[..take]);
            data = &data[take..];

            if current.len() < self.target {
                // Out of input before the chunk filled up
                return Ok(frames);
            }

            // Chunk complete; either start the next chunk or finish the frame
            match F::next_chunk_size(&self.chunks)? {
                Some(size) => {
                    self.chunks.push(Vec::with_capacity(size));
                    self.target = size;
                }
                None => {
                    let chunks = std::mem::take(&mut self.chunks);
                    frames.push(F::into_frame(chunks));
                }
            }

            if data.is_empty() && self.chunks.is_empty() {
                return Ok(frames);
            }
        }
    }

    /// Consume the decoder, returning any bytes of a partially assembled
    /// frame in their original wire order
    pub fn into_remainder(self) -> Vec<u8> {
        self.chunks.into_iter().flatten().collect()
    }
}

impl<F: FrameFormat> Default for FrameDecoder<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn untyped_wire(payload: &[u8]) -> Vec<u8> {
        UntypedFrame::new(payload.to_vec()).to_bytes()
    }

    fn typed_wire(tag: u8, payload: &[u8]) -> Vec<u8> {
        TypedFrame::new(tag, payload.to_vec()).to_bytes()
    }

    #[test]
    fn test_untyped_roundtrip() {
        let frame = UntypedFrame::new(b"hello".to_vec());
        let wire = frame.to_bytes();
        assert_eq!(&wire[..4], &9u32.to_be_bytes());
        assert_eq!(&wire[4..], b"hello");

        let mut decoder = FrameDecoder::<UntypedFormat>::new();
        let frames = decoder.feed(&wire).unwrap();
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_typed_roundtrip() {
        let frame = TypedFrame::new(b'R', vec![0, 0, 0, 5, 1, 2, 3, 4]);
        let wire = frame.to_bytes();
        assert_eq!(wire[0], b'R');
        assert_eq!(&wire[1..5], &12u32.to_be_bytes());

        let mut decoder = FrameDecoder::<TypedFormat>::new();
        let frames = decoder.feed(&wire).unwrap();
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_reassembly_is_split_independent() {
        // Two frames back to back, fed in every possible chunk size
        let mut wire = typed_wire(b'R', &[0, 0, 0, 5, 0xAA, 0xBB, 0xCC, 0xDD]);
        wire.extend_from_slice(&typed_wire(b'E', b"SFATAL\0"));

        let expected = {
            let mut decoder = FrameDecoder::<TypedFormat>::new();
            decoder.feed(&wire).unwrap()
        };
        assert_eq!(expected.len(), 2);

        for split in 1..wire.len() {
            let mut decoder = FrameDecoder::<TypedFormat>::new();
            let mut frames = Vec::new();
            for chunk in wire.chunks(split) {
                frames.extend(decoder.feed(chunk).unwrap());
            }
            assert_eq!(frames, expected, "split size {}", split);
        }
    }

    #[test]
    fn test_untyped_reassembly_byte_by_byte() {
        let wire = untyped_wire(&[0x04, 0xD2, 0x16, 0x2F]);
        let mut decoder = FrameDecoder::<UntypedFormat>::new();
        let mut frames = Vec::new();
        for b in &wire {
            frames.extend(decoder.feed(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(frames, vec![UntypedFrame::new(vec![0x04, 0xD2, 0x16, 0x2F])]);
    }

    #[test]
    fn test_multiple_frames_single_feed() {
        let mut wire = untyped_wire(b"first");
        wire.extend_from_slice(&untyped_wire(b"second"));

        let mut decoder = FrameDecoder::<UntypedFormat>::new();
        let frames = decoder.feed(&wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, b"first");
        assert_eq!(frames[1].payload, b"second");
    }

    #[test]
    fn test_empty_payload_frame() {
        // length = 4 means an empty payload; legal on the wire
        let wire = typed_wire(b'Z', b"");
        let mut decoder = FrameDecoder::<TypedFormat>::new();
        let frames = decoder.feed(&wire).unwrap();
        assert_eq!(frames, vec![TypedFrame::new(b'Z', Vec::new())]);
    }

    #[test]
    fn test_remainder_returns_partial_bytes() {
        let wire = typed_wire(b'R', &[0, 0, 0, 0]);
        let mut decoder = FrameDecoder::<TypedFormat>::new();
        // Feed all but the last two bytes
        let frames = decoder.feed(&wire[..wire.len() - 2]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(decoder.into_remainder(), &wire[..wire.len() - 2]);
    }

    #[test]
    fn test_remainder_empty_between_frames() {
        let wire = untyped_wire(b"whole");
        let mut decoder = FrameDecoder::<UntypedFormat>::new();
        decoder.feed(&wire).unwrap();
        assert!(decoder.into_remainder().is_empty());
    }

    #[test]
    fn test_length_below_minimum_rejected() {
        // length field of 3 cannot even cover itself
        let mut decoder = FrameDecoder::<UntypedFormat>::new();
        let result = decoder.feed(&3u32.to_be_bytes());
        assert!(matches!(result, Err(ProxyError::Protocol(_))));
    }

    #[test]
    fn test_length_above_maximum_rejected() {
        let mut wire = vec![b'D'];
        wire.extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
        let mut decoder = FrameDecoder::<TypedFormat>::new();
        let result = decoder.feed(&wire);
        assert!(matches!(result, Err(ProxyError::Protocol(_))));
    }

    #[test]
    fn test_tag_queryable_repeatedly() {
        let frame = TypedFrame::new(b'R', vec![0, 0, 0, 0]);
        // Reading the tag does not consume it
        assert_eq!(frame.tag, b'R');
        assert_eq!(frame.tag, b'R');
        assert_eq!(frame.payload, vec![0, 0, 0, 0]);
    }
}
