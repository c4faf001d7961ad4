//! Pluggable subprotocol handlers.
//!
//! Each capability occupies a contiguous window of packet-type ids starting
//! at its id offset. Windows live above the reserved built-in range and may
//! not overlap; both rules are enforced when handlers are installed.

use orbit_wire::{WireError, FIRST_CAPABILITY_OFFSET};
use std::fmt;

/// A subprotocol handler, instantiated by the host when a peer advertising
/// the capability registers.
pub trait Capability: fmt::Debug + Send {
    /// Whether the handler currently accepts packets.
    fn enabled(&self) -> bool;

    /// First packet-type id of this capability's window.
    fn id_offset(&self) -> u8;

    /// Number of packet-type ids the capability uses.
    fn message_count(&self) -> u8;

    /// Handles a packet addressed to this capability.
    ///
    /// `id` is rebased to the capability's window, so the first message of
    /// the subprotocol arrives as `0`. `body` is the complete frame body;
    /// the packet's arguments follow the leading type element of the list.
    ///
    /// Returning `Ok(false)` rejects the packet and terminates the session;
    /// an error is treated as a protocol violation.
    fn interpret(&mut self, id: u8, body: &[u8]) -> Result<bool, WireError>;

    /// Discards per-session state at teardown.
    fn reset(&mut self);
}

/// Installation errors for capability handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// The window would start inside the reserved built-in id range.
    #[error("capability id offset {0:#04x} is inside the reserved packet range")]
    ReservedOffset(u8),
    /// The window claims no ids at all.
    #[error("capability window at offset {0:#04x} is empty")]
    EmptyWindow(u8),
    /// The window intersects one that is already installed.
    #[error("capability window [{offset:#04x}..{end:#04x}) overlaps an installed window")]
    OverlappingWindow {
        /// Start of the rejected window.
        offset: u8,
        /// One past the end of the rejected window.
        end: u16,
    },
}

/// The set of capability handlers installed on a session.
#[derive(Debug, Default)]
pub struct Capabilities {
    handlers: Vec<Box<dyn Capability>>,
}

impl Capabilities {
    /// Installs a batch of handlers, validating every window against the
    /// reserved range and against all already-installed windows.
    ///
    /// On error nothing from the batch is installed.
    pub fn install(&mut self, handlers: Vec<Box<dyn Capability>>) -> Result<(), CapabilityError> {
        let mut windows: Vec<(u16, u16)> = self
            .handlers
            .iter()
            .map(|cap| Self::window(cap.as_ref()))
            .collect();
        for cap in &handlers {
            let offset = cap.id_offset();
            if offset < FIRST_CAPABILITY_OFFSET {
                return Err(CapabilityError::ReservedOffset(offset))
            }
            if cap.message_count() == 0 {
                return Err(CapabilityError::EmptyWindow(offset))
            }
            let (start, end) = Self::window(cap.as_ref());
            if windows.iter().any(|&(s, e)| start < e && s < end) {
                return Err(CapabilityError::OverlappingWindow { offset, end })
            }
            windows.push((start, end));
        }
        self.handlers.extend(handlers);
        Ok(())
    }

    /// Routes a packet to the first enabled handler whose window contains
    /// `id`, with the id rebased to the window start.
    ///
    /// Returns `Ok(false)` if no handler claims the packet.
    pub fn interpret(&mut self, id: u8, body: &[u8]) -> Result<bool, WireError> {
        for cap in &mut self.handlers {
            if !cap.enabled() {
                continue
            }
            let offset = cap.id_offset();
            if id >= offset && id - offset < cap.message_count() {
                return cap.interpret(id - offset, body)
            }
        }
        Ok(false)
    }

    /// Resets every handler.
    pub fn reset(&mut self) {
        for cap in &mut self.handlers {
            cap.reset();
        }
    }

    /// Number of installed handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are installed.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn window(cap: &dyn Capability) -> (u16, u16) {
        let start = cap.id_offset() as u16;
        (start, start + cap.message_count() as u16)
    }
}
