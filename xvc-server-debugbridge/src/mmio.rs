//! Memory-mapped I/O facade (component A).
//!
//! Opens a device file read-write, optionally at a `<path>:<offset>`
//! suffix, and exposes a typed `rd`/`wr` indexed by 32-bit word. Mirrors
//! `original_source/xvcSrv/src/mmioHelper.h`'s `MemMap<T>` template, but
//! fixed to `u32` since every driver in this bridge speaks 32-bit
//! registers.
use std::{
    fs::{File, OpenOptions},
    num::NonZero,
    path::Path,
    ptr::NonNull,
};

use nix::libc::{_SC_PAGESIZE, c_void, sysconf};
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

use crate::error::BridgeError;

/// A mapped device register window.
///
/// `rd`/`wr` use volatile accesses so the compiler may never reorder,
/// elide or combine them — required because the memory behind `base` is
/// device registers with side effects, not ordinary RAM.
pub struct MemMap {
    base: NonNull<c_void>,
    map_len: usize,
    reg_offset: usize,
    // Kept alive so the fd closes only once the mapping is torn down;
    // see `Drop` below.
    file: File,
}

impl MemMap {
    /// Opens `spec`, which is `<path>` or `<path>:<offset>`, and maps at
    /// least `size` bytes starting at `offset`.
    pub fn open(spec: &str, size: usize) -> Result<MemMap, BridgeError> {
        let (path, offset) = match spec.split_once(':') {
            Some((p, o)) if !o.is_empty() => (p, parse_offset(o)?),
            _ => (spec, 0u64),
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(Path::new(path))?;

        let page_size = page_size();
        let reg_offset = (offset % page_size as u64) as usize;
        let map_off = offset - reg_offset as u64;
        let map_len = (reg_offset + size).div_ceil(page_size) * page_size;

        let len = NonZero::new(map_len)
            .ok_or_else(|| BridgeError::Proto("mmap of zero-sized region requested".into()))?;

        // SAFETY: `file` is open read-write on a device file the caller
        // identified; `map_off` is page-aligned by construction above.
        let base = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                map_off as i64,
            )?
        };

        Ok(MemMap {
            base,
            map_len,
            reg_offset,
            file,
        })
    }

    fn word_ptr(&self, index: u32) -> *mut u32 {
        // SAFETY: `index` addresses within the mapped region is the
        // caller's responsibility, same contract as the C++ original.
        unsafe {
            self.base
                .as_ptr()
                .cast::<u8>()
                .add(self.reg_offset)
                .cast::<u32>()
                .add(index as usize)
        }
    }

    /// Reads the 32-bit register at word `index`.
    pub fn rd(&self, index: u32) -> u32 {
        // SAFETY: volatile read of a word within the mapped region.
        unsafe { std::ptr::read_volatile(self.word_ptr(index)) }
    }

    /// Writes the 32-bit register at word `index`.
    pub fn wr(&self, index: u32, value: u32) {
        // SAFETY: volatile write of a word within the mapped region.
        unsafe { std::ptr::write_volatile(self.word_ptr(index), value) }
    }
}

// SAFETY: `base` points at a device register mapping, not thread-local or
// reference-counted state; moving the mapping to another thread is sound,
// access ordering across threads is the caller's responsibility via the
// backend's own `Mutex`.
unsafe impl Send for MemMap {}

impl Drop for MemMap {
    fn drop(&mut self) {
        // SAFETY: `base`/`map_len` describe exactly the region `mmap`
        // returned in `open`.
        unsafe {
            let _ = munmap(self.base, self.map_len);
        }
        // `file` drops right after this function returns, closing the
        // descriptor second -- unmap-then-close, per the facade contract.
    }
}

fn page_size() -> usize {
    // SAFETY: _SC_PAGESIZE is a pure query with no preconditions.
    let value = unsafe { sysconf(_SC_PAGESIZE) };
    if value > 0 { value as usize } else { 4096 }
}

fn parse_offset(s: &str) -> Result<u64, BridgeError> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u64::from_str_radix(digits, radix)
        .map_err(|_| BridgeError::Proto(format!("invalid mmap offset '{}'", s)))
}

#[cfg(test)]
mod test {
    use super::parse_offset;

    #[test]
    fn parses_decimal_offset() {
        assert_eq!(parse_offset("4096").unwrap(), 4096);
    }

    #[test]
    fn parses_hex_offset() {
        assert_eq!(parse_offset("0x1000").unwrap(), 0x1000);
    }

    #[test]
    fn rejects_garbage_offset() {
        assert!(parse_offset("not-a-number").is_err());
    }
}
