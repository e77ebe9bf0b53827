//! Error taxonomy for the extendable-file core.
//!
//! One variant per failure kind in the spec's error taxonomy, each with a
//! stable numeric code and a registered message — see [`registry`].

use std::sync::OnceLock;
use thiserror::Error;

/// Errors produced by [`crate::file::ExtendableFile`] operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation invoked on a closed or un-initialised instance.
    #[error("operation invoked on a closed or uninitialised file")]
    InvalidState,

    /// Missing path (or other required option) at open.
    #[error("invalid open arguments: {0}")]
    InvalidArgs(String),

    /// Negative/overflowing offset, or an mmap request reduced to zero after alignment.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    /// `add_mmap` called with a non-page-aligned offset.
    #[error("offset {offset} is not aligned to page size {page_size}")]
    NotAligned {
        /// Offset that failed the alignment check.
        offset: u64,
        /// System page size.
        page_size: u64,
    },

    /// Growth requested on a read-only file.
    #[error("growth requested on a read-only file")]
    Readonly,

    /// Operation would exceed the configured maximum offset.
    #[error("operation would exceed configured maximum offset {maxoff}")]
    MaxOff {
        /// The configured ceiling.
        maxoff: u64,
    },

    /// The resize policy returned an unusable size (too small or not page-aligned).
    #[error("resize policy returned an unusable size: {0}")]
    ResizePolicyFail(String),

    /// A new mmap slot would overlap an existing one.
    #[error("requested mmap region [{off}, {end}) overlaps an existing slot")]
    MmapOverlap {
        /// Start of the requested region.
        off: u64,
        /// End (exclusive) of the requested region.
        end: u64,
    },

    /// Slot lookup missed, or the slot is unrealised when realisation was required.
    #[error("no realised mmap slot at offset {0}")]
    NotMmaped(u64),

    /// A `probe_mmap` result was dereferenced after the mapping was remapped.
    #[error("stale mmap pointer: mapping was remapped since this probe was captured")]
    EpochMismatch,

    /// Wrapped OS error from I/O, mmap, or locking primitives.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable numeric error code, exposed so callers can match on it without
    /// depending on the enum's variant names across versions.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Error::InvalidState => 1,
            Error::InvalidArgs(_) => 2,
            Error::OutOfBounds(_) => 3,
            Error::NotAligned { .. } => 4,
            Error::Readonly => 5,
            Error::MaxOff { .. } => 6,
            Error::ResizePolicyFail(_) => 7,
            Error::MmapOverlap { .. } => 8,
            Error::NotMmaped(_) => 9,
            Error::EpochMismatch => 10,
            Error::Io(_) => 11,
        }
    }
}

/// Registry of stable error codes to localised (currently: English-only)
/// messages, registered exactly once per process.
///
/// Models spec.md §9's note on the original's `iwlog_register_ecodefn`
/// one-shot registration as an idempotent init function guarded by a
/// process-wide once-flag, with no per-instance mutable global state.
pub mod registry {
    use super::OnceLock;

    static INIT: OnceLock<()> = OnceLock::new();

    /// English message for a given error code, or `None` if the code is unknown.
    #[must_use]
    pub const fn message(code: u32) -> Option<&'static str> {
        match code {
            1 => Some("operation invoked on a closed or uninitialised file"),
            2 => Some("invalid open arguments"),
            3 => Some("out of bounds"),
            4 => Some("mmap offset is not page-aligned"),
            5 => Some("growth requested on a read-only file"),
            6 => Some("operation would exceed configured maximum offset"),
            7 => Some("resize policy returned an unusable size"),
            8 => Some("requested mmap region overlaps an existing slot"),
            9 => Some("no realised mmap slot at that offset"),
            10 => Some("stale mmap pointer after remap"),
            11 => Some("I/O error"),
            _ => None,
        }
    }

    /// Idempotent registration entry point. Safe to call from every
    /// `ExtendableFile::open` — only the first call does anything observable
    /// (a single debug log line).
    pub fn init() {
        INIT.get_or_init(|| {
            tracing::debug!("exfile error code registry initialised");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_per_variant() {
        assert_eq!(Error::InvalidState.code(), 1);
        assert_eq!(Error::Readonly.code(), 5);
        assert_eq!(Error::EpochMismatch.code(), 10);
    }

    #[test]
    fn io_error_wraps_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn registry_messages_match_known_codes() {
        for code in 1..=11 {
            assert!(registry::message(code).is_some(), "missing message for {code}");
        }
        assert!(registry::message(0).is_none());
        assert!(registry::message(999).is_none());
    }

    #[test]
    fn registry_init_is_idempotent() {
        registry::init();
        registry::init();
        registry::init();
    }
}
