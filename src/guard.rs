//! RAII/checked accessors returned by `acquire_mmap` and `probe_mmap`.
//!
//! Grounded in `storage/guard.rs`'s `VectorSliceGuard`: that type captures a
//! `remap_epoch` at construction and validates it before every dereference,
//! so a mapping that gets remapped out from under a zero-copy reader fails
//! loudly instead of handing back dangling or semantically-stale bytes.
//! [`MmapGuard`] (for `acquire_mmap`) holds the read lock for its own
//! lifetime, so it needs no epoch check — the lock itself prevents remaps.
//! [`MmapProbe`] (for `probe_mmap`) drops the lock before returning, so it
//! carries the epoch check instead ([SUPPLEMENT], see `SPEC_FULL.md`).

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLockReadGuard;

use crate::backend::PositionalFile;
use crate::error::{Error, Result};
use crate::file::Inner;

/// Result of `acquire_mmap`: a live pointer into the mapping, with the read
/// lock held for as long as this guard lives. Dropping it (or calling
/// [`MmapGuard::release`]) is the facade's `release_mmap`.
pub struct MmapGuard<'a, B: PositionalFile> {
    guard: RwLockReadGuard<'a, Inner<B>>,
    off: u64,
    len: u64,
}

impl<'a, B: PositionalFile> MmapGuard<'a, B> {
    pub(crate) fn new(guard: RwLockReadGuard<'a, Inner<B>>, off: u64, len: u64) -> Self {
        Self { guard, off, len }
    }

    /// The realised length at the moment this guard was taken.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the mapping is realised at all (`len == 0` means no).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the mapped bytes. The read lock backing this guard guarantees
    /// no concurrent remap can invalidate the slice while it's held.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        let slot = self.guard.slots.get(self.off).expect("slot removed while guard held");
        slot.mapping.as_ref().map(super::slot::MmapWindow::as_slice).unwrap_or(&[])
    }

    /// Offset this guard was acquired for.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.off
    }

    /// Explicitly releases the held lock (spec.md §4.9 `release_mmap`).
    /// Equivalent to dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

/// Result of `probe_mmap`: the lock has already been released by the time
/// this value is returned. [`MmapProbe::as_slice`] re-validates the capture
/// epoch against the file's current `remap_epoch` and fails with
/// [`Error::EpochMismatch`] if a realisation pass has happened since.
///
/// Carries the same `'a` lifetime as [`MmapGuard`], borrowed from the
/// `ExtendableFile` that produced it, so the borrow checker — not just the
/// epoch check — rules out the file being dropped or moved while a probe is
/// outstanding. The epoch check alone only catches remapping of a still-live
/// file; it cannot see a freed or relocated one.
pub struct MmapProbe<'a> {
    ptr: *const u8,
    len: usize,
    off: u64,
    epoch_at_capture: u64,
    epoch: &'a AtomicU64,
}

// SAFETY: `MmapProbe` only exposes the captured pointer through `as_slice`,
// which re-validates liveness via the epoch counter before trusting `ptr`.
// The pointer itself is never dereferenced except behind that check, and the
// `'a` lifetime ties the probe to the file that owns the mapping, so `ptr`
// cannot outlive the memory it points into.
unsafe impl Send for MmapProbe<'_> {}
unsafe impl Sync for MmapProbe<'_> {}

impl<'a> MmapProbe<'a> {
    pub(crate) fn new(ptr: *const u8, len: usize, off: u64, epoch: &'a AtomicU64) -> Self {
        Self { ptr, len, off, epoch_at_capture: epoch.load(Ordering::Acquire), epoch }
    }

    /// Offset this probe was taken at.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.off
    }

    /// Length captured at probe time.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Borrows the probed bytes, failing if the mapping has been remapped
    /// since this probe was captured.
    pub fn as_slice(&self) -> Result<&[u8]> {
        let current = self.epoch.load(Ordering::Acquire);
        if current != self.epoch_at_capture {
            return Err(Error::EpochMismatch);
        }
        if self.len == 0 {
            return Ok(&[]);
        }
        // SAFETY: the epoch check above establishes no realise_all() pass
        // has run since `ptr`/`len` were captured from a live mapping, and
        // the `'a` lifetime borrowed from the owning file guarantees that
        // file (and the mapping behind it) is still alive, so the memory
        // region is still mapped and of at least this length.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr, self.len) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_detects_epoch_change() {
        let epoch = AtomicU64::new(0);
        let data = [1u8, 2, 3, 4];
        let probe = MmapProbe::new(data.as_ptr(), data.len(), 0, &epoch);
        assert_eq!(probe.as_slice().unwrap(), &data[..]);
        epoch.fetch_add(1, Ordering::Release);
        assert!(matches!(probe.as_slice(), Err(Error::EpochMismatch)));
    }

    #[test]
    fn probe_empty_slot_yields_empty_slice() {
        let epoch = AtomicU64::new(5);
        let probe = MmapProbe::new(std::ptr::null(), 0, 0, &epoch);
        assert_eq!(probe.as_slice().unwrap(), &[] as &[u8]);
    }
}
