//! # Frontswap Errors
//!
//! Every failure in this layer degrades to "treat as a cache miss": the
//! caller goes back to the primary swap device. None of them is fatal.
//!
//! | Error | Raised by | Caller action |
//! |-------|-----------|---------------|
//! | `Unavailable` | any op while disabled or without a backend | primary path |
//! | `SlotBusy` | `load_async`/`store_on_core` | retry later or go synchronous |
//! | `NoRequest` | `poll_load` on an idle slot | nothing to wait for |
//! | `Miss` | `load`/`load_async` on a clear presence bit | primary path |
//! | `BackendFailed` | backend put/get failure | primary path |
//! | `WriteThrough` | `store` in writethrough mode | also write primary |

use core::fmt;

/// Frontswap error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontswapError {
    /// Frontswap is disabled or no backend is registered
    Unavailable,
    /// The CPU already has an outstanding async request
    SlotBusy,
    /// No async request is outstanding on the CPU
    NoRequest,
    /// The page is not held by the backend
    Miss,
    /// The backend rejected or failed the operation
    BackendFailed,
    /// The page was stored, but writethrough asks for the primary write too
    WriteThrough,
    /// Swap type is out of range or not active
    InvalidDevice,
    /// CPU id has no per-CPU slot
    InvalidCpu,
    /// Offset is beyond the device's slot count
    OffsetOutOfRange,
    /// Swap type is already active
    DeviceActive,
}

impl FrontswapError {
    /// Should the caller fall back to the primary swap device?
    pub const fn is_fallback(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::Miss | Self::BackendFailed | Self::WriteThrough
        )
    }
}

impl fmt::Display for FrontswapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "Frontswap unavailable"),
            Self::SlotBusy => write!(f, "Async slot busy"),
            Self::NoRequest => write!(f, "No outstanding request"),
            Self::Miss => write!(f, "Page not in backend"),
            Self::BackendFailed => write!(f, "Backend operation failed"),
            Self::WriteThrough => write!(f, "Stored in writethrough mode"),
            Self::InvalidDevice => write!(f, "Invalid swap device"),
            Self::InvalidCpu => write!(f, "Invalid CPU"),
            Self::OffsetOutOfRange => write!(f, "Offset out of range"),
            Self::DeviceActive => write!(f, "Swap device already active"),
        }
    }
}

/// Result type for frontswap operations
pub type FrontswapResult<T> = Result<T, FrontswapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_classification() {
        assert!(FrontswapError::Unavailable.is_fallback());
        assert!(FrontswapError::Miss.is_fallback());
        assert!(FrontswapError::WriteThrough.is_fallback());
        assert!(!FrontswapError::SlotBusy.is_fallback());
        assert!(!FrontswapError::NoRequest.is_fallback());
    }
}
