//! Runtime errors
//!
//! Every fallible runtime operation returns [`Result`]. The variants mirror the
//! failure classes a native binding can hit: admission refused by the memory
//! ceilings, the native allocator returning null, calls into modules that were
//! never loaded, malformed slicing, scope misuse and native exceptions raised
//! by generated code.

use crate::format_bytes;

pub type Result<T> = core::result::Result<T, Error>;

/// Which ceiling refused an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    /// Sum of tracked native bytes would exceed `max_bytes`
    TrackedBytes,
    /// Resident set size is above `max_physical_bytes`
    PhysicalBytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Admission refused after the bounded retry loop
    OutOfMemory {
        ceiling: Ceiling,
        attempted: usize,
        current: usize,
        limit: usize,
    },
    /// The native allocator returned null for a nonzero request
    AllocationFailed { bytes: usize },
    /// A generated entry point was reached before its module was loaded
    ModuleNotLoaded { module: String },
    /// Library or symbol resolution failed
    Linkage { name: String, reason: String },
    /// `limit < position` with a nonzero limit
    LimitBeforePosition { limit: usize, position: usize },
    /// A scope was closed while another scope opened after it is still open
    ScopeOrder { closing: u64, innermost: u64 },
    /// A restricted scope refused a handle of another kind
    KindNotAllowed { kind: String },
    /// Operation needs a handle of another kind
    KindMismatch { expected: String, found: String },
    /// Write would run past the handle capacity
    CapacityExceeded { needed: usize, capacity: usize },
    /// Indexer coordinates outside its sizes
    IndexOutOfBounds { index: Vec<usize>, sizes: Vec<usize> },
    /// Indexer sizes and strides that do not fit the handle
    InvalidShape { reason: String },
    /// Operation needs a non-null address
    NullHandle,
    /// Exception translated from native code
    Native { class: String, message: String },
    /// A startup property could not be parsed
    InvalidConfig { key: String, value: String },
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory {
                ceiling: Ceiling::TrackedBytes,
                attempted,
                current,
                limit,
            } => write!(
                f,
                "Failed to allocate memory within limits: totalBytes ({} + {}) > maxBytes ({})",
                format_bytes(*current),
                format_bytes(*attempted),
                format_bytes(*limit)
            ),
            Self::OutOfMemory {
                ceiling: Ceiling::PhysicalBytes,
                current,
                limit,
                ..
            } => write!(
                f,
                "Physical memory usage is too high: physicalBytes ({}) > maxPhysicalBytes ({})",
                format_bytes(*current),
                format_bytes(*limit)
            ),
            Self::AllocationFailed { bytes } => {
                write!(f, "Native allocator returned null for {} bytes", bytes)
            }
            Self::ModuleNotLoaded { module } => write!(
                f,
                "Native module '{}' is not loaded; call Loader::load before using its entry points",
                module
            ),
            Self::Linkage { name, reason } => write!(f, "Failed to link '{}': {}", name, reason),
            Self::LimitBeforePosition { limit, position } => {
                write!(f, "limit < position: ({} < {})", limit, position)
            }
            Self::ScopeOrder { closing, innermost } => write!(
                f,
                "Scope {} closed out of order: scope {} is still the innermost open scope",
                closing, innermost
            ),
            Self::KindNotAllowed { kind } => {
                write!(f, "Scope does not accept handles of kind {}", kind)
            }
            Self::KindMismatch { expected, found } => {
                write!(f, "Expected a {} handle, found {}", expected, found)
            }
            Self::CapacityExceeded { needed, capacity } => {
                write!(f, "capacity exceeded: {} elements needed, capacity is {}", needed, capacity)
            }
            Self::IndexOutOfBounds { index, sizes } => {
                write!(f, "Index {:?} is out of bounds for sizes {:?}", index, sizes)
            }
            Self::InvalidShape { reason } => write!(f, "Invalid indexer shape: {}", reason),
            Self::NullHandle => write!(f, "This pointer address is NULL."),
            Self::Native { class, message } => write!(f, "{}: {}", class, message),
            Self::InvalidConfig { key, value } => {
                write!(f, "Invalid value '{}' for property {}", value, key)
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_messages_name_the_ceiling() {
        let tracked = Error::OutOfMemory {
            ceiling: Ceiling::TrackedBytes,
            attempted: 4096,
            current: 1024,
            limit: 2048,
        };
        assert_eq!(
            tracked.to_string(),
            "Failed to allocate memory within limits: totalBytes (1024 + 4096) > maxBytes (2048)"
        );

        let physical = Error::OutOfMemory {
            ceiling: Ceiling::PhysicalBytes,
            attempted: 1,
            current: 300 * 1024 * 1024,
            limit: 200 * 1024 * 1024,
        };
        assert_eq!(
            physical.to_string(),
            "Physical memory usage is too high: physicalBytes (300M) > maxPhysicalBytes (200M)"
        );
    }

    #[test]
    fn limit_before_position_message() {
        let err = Error::LimitBeforePosition { limit: 2, position: 5 };
        assert_eq!(err.to_string(), "limit < position: (2 < 5)");
    }
}
