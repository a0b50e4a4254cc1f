//! The shared-memory IPC buffer (spec §4.10): the fixed region the
//! microkernel maps into both the root server and the calling process
//! for bulk argument/result transfer, since syscalls themselves carry
//! only a handful of integers.

use crate::error::{SosError, SosResult};

/// Longest path accepted in any path-taking syscall; a path that would
/// not fit the shared buffer is rejected as PATHINV rather than
/// truncated (spec §4.10, §8).
pub const MAX_PATH: usize = 256;

/// A fixed-size page the microkernel has mapped for this IPC, already
/// validated as resident by the caller (the pager faults it in before
/// the syscall dispatch reads from it).
pub struct SharedBuffer {
    data: [u8; crate::PAGE_SIZE],
}

impl SharedBuffer {
    pub fn zeroed() -> Self {
        SharedBuffer {
            data: [0u8; crate::PAGE_SIZE],
        }
    }

    /// Copies `src` into the buffer starting at `offset`. Used to stage
    /// read results before the caller collects them.
    pub fn copyout(&mut self, offset: usize, src: &[u8]) -> SosResult<()> {
        let end = offset.checked_add(src.len()).ok_or(SosError::PathInv)?;
        if end > self.data.len() {
            return Err(SosError::PathInv);
        }
        self.data[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Reads `len` bytes back out of the buffer at `offset`.
    pub fn copyin(&self, offset: usize, len: usize) -> SosResult<&[u8]> {
        let end = offset.checked_add(len).ok_or(SosError::PathInv)?;
        if end > self.data.len() {
            return Err(SosError::PathInv);
        }
        Ok(&self.data[offset..end])
    }

    /// Reads a NUL-terminated path out of the buffer, rejecting anything
    /// without a terminator within `MAX_PATH` or containing no bytes.
    pub fn read_path(&self) -> SosResult<String> {
        let end = self.data[..MAX_PATH].iter().position(|&b| b == 0).ok_or(SosError::PathInv)?;
        if end == 0 {
            return Err(SosError::PathInv);
        }
        std::str::from_utf8(&self.data[..end]).map(|s| s.to_string()).map_err(|_| SosError::PathInv)
    }

    pub fn write_path(&mut self, path: &str) -> SosResult<()> {
        if path.is_empty() || path.len() >= MAX_PATH {
            return Err(SosError::PathInv);
        }
        self.data[..path.len()].copy_from_slice(path.as_bytes());
        self.data[path.len()] = 0;
        Ok(())
    }
}
