use crate::frame::MAX_PAYLOAD_SIZE;
use std::{fmt, io};

/// A pair of values, one of which is expected and one of which is actually
/// observed somewhere, used to report mismatches in errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GotExpected<T> {
    /// The value that was actually observed.
    pub got: T,
    /// The expected value.
    pub expected: T,
}

impl<T: fmt::Display> fmt::Display for GotExpected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "got {}, expected {}", self.got, self.expected)
    }
}

/// Errors when processing frames or protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// An underlying I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A frame did not start with the synchronization token.
    #[error("invalid synchronization token: {0:02x?}")]
    BadMagic([u8; 4]),
    /// The declared body length does not match the RLP item in the body.
    #[error("frame body length mismatch: {0}")]
    LengthMismatch(GotExpected<usize>),
    /// A frame declared a body larger than [`MAX_PAYLOAD_SIZE`].
    #[error("message size ({message_size}) exceeds max payload size ({MAX_PAYLOAD_SIZE})")]
    MessageTooBig {
        /// The declared size of the offending message.
        message_size: usize,
    },
    /// A frame was shorter than its fixed header.
    #[error("frame too short: {0} bytes")]
    TruncatedFrame(usize),
    /// Failed to decode an RLP item.
    #[error(transparent)]
    Rlp(#[from] alloy_rlp::Error),
    /// A gossiped peer address was neither 4 nor 16 raw bytes.
    #[error("invalid peer address length: {0}")]
    InvalidAddressLength(usize),
    /// A packet id inside the reserved range that no built-in packet uses.
    #[error("unknown reserved packet id: {0:#04x}")]
    UnknownReservedPacket(u8),
    /// A disconnect reason value outside the known enumeration.
    #[error("unknown disconnect reason: {0:#04x}")]
    UnknownDisconnectReason(u8),
}

/// Errors from the [`Pinger`](crate::Pinger) keepalive state machine.
#[derive(Debug, thiserror::Error)]
pub enum PingerError {
    /// A pong arrived while no ping was outstanding.
    #[error("pong received while not expecting one")]
    UnexpectedPong,
}
