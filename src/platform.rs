//! Platform page-size query. spec.md §1 calls this an external collaborator
//! ("the platform page-size and file-stat primitives"); this module is the
//! thin seam that satisfies it, following the teacher's own target-gated
//! dependency split (`libc` on unix, `windows-sys` on windows) in its
//! `Cargo.toml`.

/// Returns the system's memory page size in bytes.
#[cfg(unix)]
#[must_use]
pub fn page_size() -> u64 {
    // SAFETY: `sysconf` with a valid `_SC_PAGESIZE` name has no preconditions
    // beyond being callable from any thread, which it is.
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 {
        4096
    } else {
        ret as u64
    }
}

/// Returns the system's memory page size in bytes.
#[cfg(windows)]
#[must_use]
pub fn page_size() -> u64 {
    use windows_sys::Win32::System::SystemInformation::GetSystemInfo;
    use windows_sys::Win32::System::SystemInformation::SYSTEM_INFO;

    let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is a valid, writable `SYSTEM_INFO` for the duration of
    // the call.
    unsafe { GetSystemInfo(&mut info) };
    if info.dwPageSize == 0 {
        4096
    } else {
        u64::from(info.dwPageSize)
    }
}

#[cfg(not(any(unix, windows)))]
#[must_use]
pub fn page_size() -> u64 {
    4096
}
