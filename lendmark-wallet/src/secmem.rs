//! Locked secret buffers
//!
//! Wallet seeds are held in [`LockedSecret`], which pins the backing pages in
//! RAM with `mlock()`/`VirtualLock()` so they are not written to swap, and
//! zeroes them on drop through `Zeroizing`.
//!
//! Locking is best effort: hosts without `CAP_IPC_LOCK` or with a low
//! `RLIMIT_MEMLOCK` still get a working wallet, only without the swap
//! protection. The failure is logged once per buffer.

use std::{fmt, ops::Deref, ptr::NonNull};
use zeroize::Zeroizing;

/// Outcome of a lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Locked,
    Failed,
    Unsupported,
}

/// Lock `len` bytes starting at `ptr`.
///
/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes.
pub unsafe fn mlock(ptr: NonNull<u8>, len: usize) -> LockResult {
    if len == 0 {
        return LockResult::Locked;
    }

    #[cfg(unix)]
    {
        let rc = libc::mlock(ptr.as_ptr() as *const libc::c_void, len);
        if rc == 0 {
            tracing::trace!("locked {} bytes of secret memory", len);
            return LockResult::Locked;
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        let reason = match errno {
            libc::ENOMEM => "exceeds RLIMIT_MEMLOCK",
            libc::EPERM => "missing CAP_IPC_LOCK",
            libc::EINVAL => "invalid address range",
            _ => "unknown error",
        };
        tracing::warn!(
            "mlock failed ({}, errno {}); seed may be swapped to disk",
            reason,
            errno
        );
        LockResult::Failed
    }

    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::VirtualLock;

        if VirtualLock(ptr.as_ptr() as *const std::ffi::c_void, len).is_ok() {
            tracing::trace!("locked {} bytes of secret memory", len);
            LockResult::Locked
        } else {
            tracing::warn!(
                "VirtualLock failed: {}; seed may be swapped to disk",
                windows::core::Error::from_win32()
            );
            LockResult::Failed
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = ptr;
        tracing::warn!("memory locking unsupported on this platform");
        LockResult::Unsupported
    }
}

/// Unlock a region previously passed to [`mlock`].
///
/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes that was locked
/// with [`mlock`].
pub unsafe fn munlock(ptr: NonNull<u8>, len: usize) {
    if len == 0 {
        return;
    }

    #[cfg(unix)]
    {
        if libc::munlock(ptr.as_ptr() as *const libc::c_void, len) != 0 {
            tracing::debug!("munlock returned non-zero (already unlocked?)");
        }
    }

    #[cfg(windows)]
    {
        use windows::Win32::System::Memory::VirtualUnlock;

        if VirtualUnlock(ptr.as_ptr() as *const std::ffi::c_void, len).is_err() {
            tracing::debug!("VirtualUnlock failed (already unlocked?)");
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = ptr;
    }
}

/// RAII lock over a memory region. Unlocks on drop.
#[derive(Debug)]
struct LockedRegion {
    ptr: NonNull<u8>,
    len: usize,
    locked: bool,
}

impl LockedRegion {
    /// # Safety
    /// The memory must stay valid and unmoved for the lifetime of the region.
    unsafe fn lock_str(s: &str) -> Self {
        match NonNull::new(s.as_ptr() as *mut u8) {
            Some(ptr) if !s.is_empty() => Self {
                ptr,
                len: s.len(),
                locked: mlock(ptr, s.len()) == LockResult::Locked,
            },
            _ => Self {
                ptr: NonNull::dangling(),
                len: 0,
                locked: true,
            },
        }
    }
}

impl Drop for LockedRegion {
    fn drop(&mut self) {
        if self.locked {
            // SAFETY: only regions we locked are unlocked, and LockedSecret
            // drops the region before the buffer it points into.
            unsafe { munlock(self.ptr, self.len) }
        }
    }
}

// SAFETY: the pointer is only handed to the OS locking calls, never read.
unsafe impl Send for LockedRegion {}
unsafe impl Sync for LockedRegion {}

/// A secret string that is memory-locked while alive and zeroed on drop.
pub struct LockedSecret {
    // Declared first so it drops (munlock) before the buffer is zeroed and
    // freed.
    region: LockedRegion,
    value: Zeroizing<String>,
}

impl LockedSecret {
    pub fn new(value: impl Into<String>) -> Self {
        let value = Zeroizing::new(value.into());
        // SAFETY: the String's heap buffer is never reallocated (no mutable
        // access is exposed) and outlives `region` by field order.
        let region = unsafe { LockedRegion::lock_str(&value) };
        Self { region, value }
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Whether the backing pages are pinned in RAM.
    pub fn is_locked(&self) -> bool {
        self.region.locked
    }
}

impl Clone for LockedSecret {
    fn clone(&self) -> Self {
        Self::new(self.value.as_str())
    }
}

impl Deref for LockedSecret {
    type Target = str;

    fn deref(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for LockedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockedSecret(<redacted>)")
    }
}

impl PartialEq for LockedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.value.as_str() == other.value.as_str()
    }
}

impl Eq for LockedSecret {}
