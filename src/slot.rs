//! The mmap slot registry: an ordered set of non-overlapping mapped windows.
//!
//! Grounded in spec.md §4.2/§4.3 and `original_source/src/fs/iwexfile.c`'s
//! `_exfile_add_mmap`/`_exfile_initmmap_slot_lw`/`_exfile_initmmap_lw`. Per
//! spec.md §9's design note, the original's doubly-linked list with a quirky
//! previous-pointer encoding is replaced with an ordinary sorted `Vec<MmapSlot>`
//! keyed by `off`; neighbour relations are derived at insert/remove time
//! instead of being threaded through the data itself.

use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;

use crate::error::{Error, Result};
use crate::policy::round_up;

/// A live memory mapping, in either read-only or read-write form depending on
/// whether the file was opened writable.
pub enum MmapWindow {
    /// Read-only mapping (`PROT_READ`).
    Read(Mmap),
    /// Read-write mapping (`PROT_READ | PROT_WRITE`).
    Write(MmapMut),
}

impl MmapWindow {
    /// Borrows the mapping's bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            MmapWindow::Read(m) => m,
            MmapWindow::Write(m) => m,
        }
    }

    /// Mutably borrows the mapping's bytes, if it is writable.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            MmapWindow::Read(_) => None,
            MmapWindow::Write(m) => Some(m),
        }
    }

    /// Raw mutable pointer into the mapping, for writers that hold only a
    /// shared reference to the owning slot (the read-lock fast path of the
    /// write upgrade dance, spec.md §4.6). `None` for read-only mappings.
    pub(crate) fn as_mut_ptr(&self) -> Option<*mut u8> {
        match self {
            MmapWindow::Read(_) => None,
            MmapWindow::Write(m) => Some(m.as_ptr().cast_mut()),
        }
    }

    /// Flushes this mapping's dirty pages to the backing file.
    fn flush(&self) -> std::io::Result<()> {
        match self {
            MmapWindow::Read(_) => Ok(()),
            MmapWindow::Write(m) => m.flush(),
        }
    }

    /// Flushes asynchronously (`msync(MS_ASYNC)` on unix; `flush_async` maps
    /// to the same intent on `memmap2`'s portable API).
    fn flush_async(&self) -> std::io::Result<()> {
        match self {
            MmapWindow::Read(_) => Ok(()),
            MmapWindow::Write(m) => m.flush_async(),
        }
    }
}

/// A registered intent to keep `[off, off+maxlen)` visible as a mapping, plus
/// its currently realised `[off, off+len)` window (spec.md §3).
pub struct MmapSlot {
    /// Start offset; always a multiple of the page size.
    pub off: u64,
    /// Maximum bytes this slot may ever map.
    pub maxlen: u64,
    /// Currently realised mapping length; `0` means unrealised.
    pub len: u64,
    /// The live mapping, present whenever `len > 0`.
    pub mapping: Option<MmapWindow>,
}

impl MmapSlot {
    fn new(off: u64, maxlen: u64) -> Self {
        Self { off, maxlen, len: 0, mapping: None }
    }

    /// End of this slot's reserved range (`off + maxlen`), exclusive.
    #[must_use]
    pub fn reserved_end(&self) -> u64 {
        self.off + self.maxlen
    }
}

/// Two half-open ranges overlap under the inclusive-open predicate spec.md
/// §4.2 calls for: `[a0, a1)` and `[b0, b1)` overlap iff `a0 < b1 && b0 < a1`.
fn ranges_overlap(a0: u64, a1: u64, b0: u64, b1: u64) -> bool {
    a0 < b1 && b0 < a1
}

/// Ordered, non-overlapping collection of [`MmapSlot`]s, sorted by `off`.
#[derive(Default)]
pub struct SlotRegistry {
    slots: Vec<MmapSlot>,
}

impl SlotRegistry {
    /// An empty registry, as produced by `open`.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of registered slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates slots in ascending `off` order.
    pub fn iter(&self) -> impl Iterator<Item = &MmapSlot> {
        self.slots.iter()
    }

    /// Iterates slots mutably in ascending `off` order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MmapSlot> {
        self.slots.iter_mut()
    }

    /// Exact-offset lookup (spec.md §4.2 `find_by_off`).
    #[must_use]
    pub fn find_index(&self, off: u64) -> Option<usize> {
        self.slots.binary_search_by_key(&off, |s| s.off).ok()
    }

    /// Borrows the slot at `off`, if any.
    #[must_use]
    pub fn get(&self, off: u64) -> Option<&MmapSlot> {
        self.find_index(off).map(|i| &self.slots[i])
    }

    /// Mutably borrows the slot at `off`, if any.
    pub fn get_mut(&mut self, off: u64) -> Option<&mut MmapSlot> {
        self.find_index(off).map(move |i| &mut self.slots[i])
    }

    /// Registers a new slot covering `[off, off+maxlen)` after page-rounding
    /// `maxlen` up, validating alignment and overlap per spec.md §4.2.
    /// Does not realise the slot; callers must call [`realise`] afterward.
    pub fn add(&mut self, off: u64, maxlen: u64, page_size: u64) -> Result<usize> {
        if off % page_size != 0 {
            return Err(Error::NotAligned { offset: off, page_size });
        }
        let rounded = round_up(maxlen, page_size);
        let adjusted = if rounded < maxlen {
            // round_up saturated (overflow); clamp down to the nearest lower
            // page multiple instead, per spec.md §4.2 "saturating down".
            (u64::MAX / page_size) * page_size
        } else {
            rounded
        };
        if adjusted == 0 {
            return Err(Error::OutOfBounds(format!(
                "requested mmap maxlen {maxlen} rounds to zero pages"
            )));
        }
        let end = off.checked_add(adjusted).ok_or_else(|| {
            Error::OutOfBounds(format!("slot [{off}, +{adjusted}) overflows the offset domain"))
        })?;

        for existing in &self.slots {
            if ranges_overlap(off, end, existing.off, existing.reserved_end()) {
                return Err(Error::MmapOverlap { off, end });
            }
        }

        let insert_at = self.slots.partition_point(|s| s.off < off);
        self.slots.insert(insert_at, MmapSlot::new(off, adjusted));
        Ok(insert_at)
    }

    /// Removes the slot at `off`, unmapping it first if realised. Unmap
    /// failures are reported but the slot is still removed (spec.md §4.2).
    pub fn remove(&mut self, off: u64) -> Result<()> {
        let idx = self.find_index(off).ok_or(Error::NotMmaped(off))?;
        let mut slot = self.slots.remove(idx);
        if slot.len > 0 {
            if let Some(window) = slot.mapping.take() {
                window.flush()?;
            }
        }
        Ok(())
    }
}

/// Re-realises a single slot against the current file size (spec.md §4.3).
///
/// `nlen = 0` if `slot.off >= fsize`, else `min(slot.maxlen, fsize - slot.off)`.
/// A no-op if the target length matches what's already realised.
pub fn realise(slot: &mut MmapSlot, file: &File, fsize: u64, writable: bool) -> Result<()> {
    let nlen = if slot.off >= fsize { 0 } else { (fsize - slot.off).min(slot.maxlen) };

    if nlen == slot.len {
        return Ok(());
    }

    if slot.len > 0 {
        if let Some(window) = slot.mapping.take() {
            if let Err(e) = window.flush() {
                slot.len = 0;
                return Err(Error::Io(e));
            }
        }
        slot.len = 0;
    }

    if nlen > 0 {
        let window = map_window(file, slot.off, nlen, writable)?;
        slot.mapping = Some(window);
        slot.len = nlen;
    }

    Ok(())
}

fn map_window(file: &File, off: u64, len: u64, writable: bool) -> Result<MmapWindow> {
    let len_usize = usize::try_from(len)
        .map_err(|_| Error::OutOfBounds(format!("mmap length {len} exceeds addressable range")))?;
    if writable {
        // SAFETY: the mapping is backed by a file this instance owns
        // exclusively for its lifetime; concurrent mutation through the
        // mapping is the caller's documented responsibility (spec.md §5).
        let mmap = unsafe { MmapOptions::new().offset(off).len(len_usize).map_mut(file)? };
        Ok(MmapWindow::Write(mmap))
    } else {
        // SAFETY: see above.
        let mmap = unsafe { MmapOptions::new().offset(off).len(len_usize).map(file)? };
        Ok(MmapWindow::Read(mmap))
    }
}

/// Re-realises every slot in ascending order, stopping at the first error
/// (spec.md §4.3 `realise_all`). Returns whether any slot's `len` changed,
/// which callers use to decide whether to bump the staleness epoch.
pub fn realise_all(registry: &mut SlotRegistry, file: &File, fsize: u64, writable: bool) -> Result<bool> {
    let mut changed = false;
    for slot in registry.iter_mut() {
        let before = slot.len;
        realise(slot, file, fsize, writable)?;
        if slot.len != before {
            changed = true;
        }
    }
    Ok(changed)
}

/// Synchronises every realised slot's mapping (spec.md §4.8 `sync`).
pub fn sync_all_slots(registry: &SlotRegistry, async_flush: bool) -> Result<()> {
    let mut first_err = None;
    for slot in registry.iter() {
        if slot.len == 0 {
            continue;
        }
        if let Some(window) = &slot.mapping {
            let res = if async_flush { window.flush_async() } else { window.flush() };
            if let Err(e) = res {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(Error::Io(e)),
        None => Ok(()),
    }
}

/// Synchronises exactly one slot, by offset (spec.md §4.8 `sync_mmap`).
pub fn sync_one_slot(registry: &SlotRegistry, off: u64, async_flush: bool) -> Result<()> {
    let slot = registry.get(off).ok_or(Error::NotMmaped(off))?;
    if slot.len == 0 {
        return Err(Error::NotMmaped(off));
    }
    let window = slot.mapping.as_ref().ok_or(Error::NotMmaped(off))?;
    let res = if async_flush { window.flush_async() } else { window.flush() };
    res.map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const PAGE: u64 = 4096;

    fn tmp_file(size: u64) -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let mut f = std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path).unwrap();
        f.set_len(size).unwrap();
        f.flush().unwrap();
        (dir, f)
    }

    #[test]
    fn add_rejects_unaligned_offset() {
        let mut reg = SlotRegistry::new();
        let err = reg.add(10, PAGE, PAGE).unwrap_err();
        assert!(matches!(err, Error::NotAligned { .. }));
    }

    #[test]
    fn add_rejects_overlap() {
        let mut reg = SlotRegistry::new();
        reg.add(0, PAGE, PAGE).unwrap();
        let err = reg.add(2048, PAGE, PAGE).unwrap_err();
        assert!(matches!(err, Error::MmapOverlap { .. }));
    }

    #[test]
    fn add_adjacent_slots_succeeds() {
        let mut reg = SlotRegistry::new();
        reg.add(0, PAGE, PAGE).unwrap();
        reg.add(PAGE, PAGE, PAGE).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn add_preserves_ascending_order() {
        let mut reg = SlotRegistry::new();
        reg.add(PAGE * 4, PAGE, PAGE).unwrap();
        reg.add(0, PAGE, PAGE).unwrap();
        reg.add(PAGE * 2, PAGE, PAGE).unwrap();
        let offsets: Vec<u64> = reg.iter().map(|s| s.off).collect();
        assert_eq!(offsets, vec![0, PAGE * 2, PAGE * 4]);
    }

    #[test]
    fn realise_on_empty_file_yields_zero_len() {
        let (_dir, file) = tmp_file(0);
        let mut reg = SlotRegistry::new();
        reg.add(0, PAGE, PAGE).unwrap();
        realise_all(&mut reg, &file, 0, true).unwrap();
        assert_eq!(reg.get(0).unwrap().len, 0);
    }

    #[test]
    fn realise_after_growth_maps_the_slot() {
        let (_dir, file) = tmp_file(0);
        let mut reg = SlotRegistry::new();
        reg.add(0, PAGE, PAGE).unwrap();
        file.set_len(PAGE).unwrap();
        let changed = realise_all(&mut reg, &file, PAGE, true).unwrap();
        assert!(changed);
        assert_eq!(reg.get(0).unwrap().len, PAGE);
    }

    #[test]
    fn realise_shrink_back_to_zero() {
        let (_dir, file) = tmp_file(PAGE);
        let mut reg = SlotRegistry::new();
        reg.add(0, PAGE, PAGE).unwrap();
        realise_all(&mut reg, &file, PAGE, true).unwrap();
        assert_eq!(reg.get(0).unwrap().len, PAGE);

        let changed = realise_all(&mut reg, &file, 0, true).unwrap();
        assert!(changed);
        assert_eq!(reg.get(0).unwrap().len, 0);
    }

    #[test]
    fn remove_unmaps_and_drops_the_slot() {
        let (_dir, file) = tmp_file(PAGE);
        let mut reg = SlotRegistry::new();
        reg.add(0, PAGE, PAGE).unwrap();
        realise_all(&mut reg, &file, PAGE, true).unwrap();
        reg.remove(0).unwrap();
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn remove_missing_offset_fails() {
        let mut reg = SlotRegistry::new();
        let err = reg.remove(0).unwrap_err();
        assert!(matches!(err, Error::NotMmaped(0)));
    }

    #[test]
    fn partial_realisation_when_slot_spans_eof() {
        let (_dir, file) = tmp_file(PAGE * 3 / 2);
        let mut reg = SlotRegistry::new();
        reg.add(0, PAGE * 2, PAGE).unwrap();
        realise_all(&mut reg, &file, PAGE * 3 / 2, true).unwrap();
        assert_eq!(reg.get(0).unwrap().len, PAGE * 3 / 2);
    }
}
