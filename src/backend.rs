//! The positional-I/O backend contract.
//!
//! spec.md §1 calls the byte-addressed, mmap-unaware file backend an external
//! collaborator and puts it out of scope for this core. [`PositionalFile`] is
//! the narrow contract the facade actually calls through (read/write at an
//! offset, truncate, sync, length, in-file copy); [`LocalFile`] is the one
//! concrete implementation this crate ships so the facade is usable standalone,
//! built directly on `std::fs::File` the way `velesdb-core`'s storage modules
//! (`storage/mmap.rs`, `storage/log_payload.rs`) hold a plain `std::fs::File`
//! and reach for platform positional I/O rather than `Seek` + `Read`/`Write`.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Byte-addressed, mmap-unaware file contract the facade delegates to for
/// any extent not covered by a realised mmap slot.
///
/// Implementations must be safe to call concurrently from multiple threads
/// (spec.md §5: "the positional backend is assumed to be internally
/// synchronised for its own operations; the core does not re-lock it") —
/// hence `&self` receivers throughout, matching `std::fs::File`'s own
/// `write_at`/`set_len` signatures.
pub trait PositionalFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`. Returns the number
    /// of bytes actually read (short at EOF).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `buf` at `offset`. Returns the number of bytes actually written.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Resizes the underlying file to exactly `len` bytes.
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Flushes data (not necessarily metadata) to stable storage.
    fn sync_data(&self) -> io::Result<()>;

    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> io::Result<()>;

    /// Current length of the underlying file.
    fn len(&self) -> io::Result<u64>;

    /// Copies `len` bytes starting at `src` to `dst` within the same file.
    /// Ranges may overlap; implementations must handle that correctly.
    fn copy_within(&self, src: u64, len: u64, dst: u64) -> io::Result<()>;

    /// The raw file handle, for `memmap2` to map windows against. The mmap
    /// layer is the one place this crate allows the "external" backend
    /// boundary to leak, since `mmap()` is fundamentally a file-descriptor
    /// operation the OS performs directly.
    fn raw_file(&self) -> &File;
}

/// Default [`PositionalFile`] backed directly by `std::fs::File`.
pub struct LocalFile {
    file: File,
}

impl LocalFile {
    /// Opens (or creates) the file at `path` per `opts`.
    pub fn open(path: &Path, opts: &OpenOptions) -> io::Result<Self> {
        let file = opts.open(path)?;
        Ok(Self { file })
    }

    /// Wraps an already-open file.
    #[must_use]
    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

#[cfg(unix)]
impl PositionalFile for LocalFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.write_at(buf, offset)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync_data(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn sync_all(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn copy_within(&self, src: u64, len: u64, dst: u64) -> io::Result<()> {
        copy_within_via_buffer(self, src, len, dst)
    }

    fn raw_file(&self) -> &File {
        &self.file
    }
}

#[cfg(windows)]
impl PositionalFile for LocalFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_write(buf, offset)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync_data(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn sync_all(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn copy_within(&self, src: u64, len: u64, dst: u64) -> io::Result<()> {
        copy_within_via_buffer(self, src, len, dst)
    }

    fn raw_file(&self) -> &File {
        &self.file
    }
}

/// Portable fallback for `copy_within`: streams through a fixed-size buffer,
/// walking backward when ranges overlap and `dst > src` so the read side
/// never catches up with bytes the write side hasn't copied yet.
fn copy_within_via_buffer<B: PositionalFile + ?Sized>(
    backend: &B,
    src: u64,
    len: u64,
    dst: u64,
) -> io::Result<()> {
    const CHUNK: u64 = 64 * 1024;
    let mut buf = vec![0u8; CHUNK as usize];

    if dst <= src || dst >= src + len {
        // Forward copy is safe: either no overlap, or dst is behind src.
        let mut done = 0u64;
        while done < len {
            let this = CHUNK.min(len - done);
            let n = backend.read_at(src + done, &mut buf[..this as usize])?;
            backend.write_at(dst + done, &buf[..n])?;
            done += this;
        }
    } else {
        // dst > src and ranges overlap: copy backward from the tail.
        let mut remaining = len;
        while remaining > 0 {
            let this = CHUNK.min(remaining);
            let off = remaining - this;
            let n = backend.read_at(src + off, &mut buf[..this as usize])?;
            backend.write_at(dst + off, &buf[..n])?;
            remaining -= this;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn open_tmp() -> (tempfile::TempDir, LocalFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create(true);
        let f = LocalFile::open(&path, &opts).unwrap();
        (dir, f)
    }

    #[test]
    fn write_then_read_roundtrip() {
        let (_dir, f) = open_tmp();
        f.set_len(4096).unwrap();
        f.write_at(10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        f.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn copy_within_non_overlapping() {
        let (_dir, f) = open_tmp();
        f.set_len(4096).unwrap();
        f.write_at(0, b"abcdef").unwrap();
        f.copy_within(0, 6, 100).unwrap();
        let mut buf = [0u8; 6];
        f.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn copy_within_overlapping_forward_shift() {
        let (_dir, f) = open_tmp();
        f.set_len(4096).unwrap();
        f.write_at(0, b"abcdefgh").unwrap();
        // shift right by 2, overlapping
        f.copy_within(0, 8, 2).unwrap();
        let mut buf = [0u8; 8];
        f.read_at(2, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdefgh");
    }

    #[test]
    fn len_reports_current_size() {
        let (_dir, f) = open_tmp();
        f.set_len(8192).unwrap();
        assert_eq!(f.len().unwrap(), 8192);
    }
}
