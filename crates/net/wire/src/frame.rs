//! The frame envelope: an 8-byte header (synchronization token + big-endian
//! body length) followed by an RLP list body.
//!
//! Outbound messages are built with an 8-byte placeholder header which the
//! host overwrites via [`seal`] just before the frame is queued. Inbound
//! bytes are accumulated and cut into frame bodies by [`FrameCodec`]; a
//! stream that loses synchronization is not scanned for the next token, it
//! is a fatal decode error.

use crate::errors::{GotExpected, WireError};
use alloy_rlp::Header;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The synchronization token every frame starts with.
pub const MAGIC: [u8; 4] = [0x22, 0x40, 0x08, 0x91];

/// Length of the fixed frame header: the 4-byte token and a big-endian
/// unsigned 32-bit body length.
pub const HEADER_LENGTH: usize = 8;

/// Maximum size of a frame body.
///
/// A declared length beyond this is rejected before any body bytes are
/// buffered.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Writes the synchronization token and body length over the 8-byte
/// placeholder header of an outbound frame.
///
/// This is the host's seal step: message builders emit
/// `[0u8; HEADER_LENGTH] || body` and the frame becomes valid only once it
/// has been sealed.
pub fn seal(frame: &mut BytesMut) {
    debug_assert!(frame.len() >= HEADER_LENGTH, "frame is missing its placeholder header");
    let body_len = (frame.len() - HEADER_LENGTH) as u32;
    frame[..4].copy_from_slice(&MAGIC);
    frame[4..HEADER_LENGTH].copy_from_slice(&body_len.to_be_bytes());
}

/// Validates a complete sealed frame.
///
/// A frame is valid iff it is at least [`HEADER_LENGTH`] bytes, starts with
/// the synchronization token, declares exactly the number of body bytes that
/// follow, and the body's outer RLP item spans the whole body.
pub fn check_frame(frame: &[u8]) -> Result<(), WireError> {
    if frame.len() < HEADER_LENGTH {
        return Err(WireError::TruncatedFrame(frame.len()))
    }
    if frame[..4] != MAGIC {
        return Err(WireError::BadMagic([frame[0], frame[1], frame[2], frame[3]]))
    }
    let declared = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
    if declared > MAX_PAYLOAD_SIZE {
        return Err(WireError::MessageTooBig { message_size: declared })
    }
    let body = &frame[HEADER_LENGTH..];
    if body.len() != declared {
        return Err(WireError::LengthMismatch(GotExpected { got: body.len(), expected: declared }))
    }
    let actual = rlp_item_size(body)?;
    if actual != declared {
        return Err(WireError::LengthMismatch(GotExpected { got: actual, expected: declared }))
    }
    Ok(())
}

/// Size in bytes of the leading RLP item of `buf`, header included.
fn rlp_item_size(buf: &[u8]) -> Result<usize, WireError> {
    let mut view = buf;
    let header = Header::decode(&mut view)?;
    Ok(header.payload_length + (buf.len() - view.len()))
}

/// Codec cutting a raw byte stream into validated frame bodies.
///
/// Decoding yields the RLP body of each complete frame with the header
/// stripped. The accumulator always begins on a frame boundary; a body is
/// only produced once all of its bytes have arrived and the frame passed the
/// [`check_frame`] validation rules.
///
/// Encoding expects fully sealed frames and passes them through unchanged;
/// senders validate before queueing.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LENGTH {
            return Ok(None)
        }
        if src[..4] != MAGIC {
            return Err(WireError::BadMagic([src[0], src[1], src[2], src[3]]))
        }
        let declared = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if declared > MAX_PAYLOAD_SIZE {
            return Err(WireError::MessageTooBig { message_size: declared })
        }
        if src.len() < HEADER_LENGTH + declared {
            src.reserve(HEADER_LENGTH + declared - src.len());
            return Ok(None)
        }

        src.advance(HEADER_LENGTH);
        let body = src.split_to(declared);

        let actual = rlp_item_size(&body)?;
        if actual != declared {
            return Err(WireError::LengthMismatch(GotExpected {
                got: actual,
                expected: declared,
            }))
        }
        Ok(Some(body))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
