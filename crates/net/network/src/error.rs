//! Session error types.

use crate::capability::CapabilityError;
use orbit_wire::WireError;

/// Errors surfaced by session handles and internals.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session task has terminated; the command was not delivered.
    #[error("session closed")]
    Closed,
    /// A wire-level failure.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Installing capability handlers failed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}
