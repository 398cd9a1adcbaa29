//! Internal diagnostics.
//!
//! Nothing in this module crosses the public ABI: every entry point in
//! [`crate::pool`] still signals failure the cheap way, by returning `None`.
//! `ProvisionError` exists purely so that the reason for a failed raw page
//! request can be logged before it collapses into that `None`.

use core::fmt;

/// Why a raw page request from the system failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionError {
    /// The system allocator (`mmap`) refused the request.
    SystemOom,
    /// A request for zero bytes reached provisioning; callers should have
    /// rewritten `size` to 1 before getting here.
    ZeroSizeRequest,
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionError::SystemOom => write!(f, "system allocator refused raw page request"),
            ProvisionError::ZeroSizeRequest => write!(f, "zero-size request reached provisioning"),
        }
    }
}

impl std::error::Error for ProvisionError {}
