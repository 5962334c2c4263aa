//! Read-only view over a loaded module image.

use std::fmt;

use crate::error::{Error, Result};
use crate::scan::Pattern;

/// The bytes of a module mapped at `base`.
///
/// In-process this borrows the live image (`ModuleImage<'static>`); the signature
/// checker builds one over a PE file laid out at its virtual addresses.
#[derive(Clone, Copy)]
pub struct ModuleImage<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> ModuleImage<'a> {
    pub fn new(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    /// Borrow `len` bytes of live process memory starting at `base`.
    ///
    /// # Safety
    ///
    /// The whole range must stay mapped and readable for `'a`.
    pub unsafe fn from_raw(base: *const u8, len: usize) -> Self {
        // SAFETY: upheld by the caller.
        let bytes = unsafe { std::slice::from_raw_parts(base, len) };
        Self {
            base: base as u64,
            bytes,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    /// Image offset of `address`, if `len` bytes from there are inside the image.
    pub fn offset_of(&self, address: u64, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        (offset.checked_add(len)? <= self.bytes.len()).then_some(offset)
    }

    pub fn read_bytes(&self, address: u64, len: usize) -> Result<&'a [u8]> {
        let offset = self
            .offset_of(address, len)
            .ok_or(Error::OutOfImage { address, len })?;
        Ok(&self.bytes[offset..offset + len])
    }

    /// Bytes from `address` to the end of the image, at most `len` of them.
    pub fn read_up_to(&self, address: u64, len: usize) -> Result<&'a [u8]> {
        let offset = self
            .offset_of(address, 0)
            .ok_or(Error::OutOfImage { address, len })?;
        let end = offset.saturating_add(len).min(self.bytes.len());
        Ok(&self.bytes[offset..end])
    }

    pub fn read_u8(&self, address: u64) -> Result<u8> {
        Ok(self.read_bytes(address, 1)?[0])
    }

    pub fn read_i32(&self, address: u64) -> Result<i32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = self.read_bytes(address, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Address of the first match of `pattern` in the whole image.
    pub fn scan(&self, pattern: &Pattern) -> Option<u64> {
        first_match(self.bytes, pattern).map(|pos| self.base + pos as u64)
    }

    /// Every match of `pattern`, in address order.
    pub fn scan_all(&self, pattern: &Pattern) -> Vec<u64> {
        let mut results = Vec::new();
        let mut from = 0;
        while let Some(pos) = first_match(&self.bytes[from..], pattern) {
            results.push(self.base + (from + pos) as u64);
            from += pos + 1;
        }
        results
    }
}

impl fmt::Debug for ModuleImage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleImage")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &format_args!("{:#x}", self.bytes.len()))
            .finish()
    }
}

fn first_match(buffer: &[u8], pattern: &Pattern) -> Option<usize> {
    if pattern.is_empty() || buffer.len() < pattern.len() {
        return None;
    }
    let last = buffer.len() - pattern.len();

    match pattern.anchor() {
        Some((anchor_index, anchor_value)) => {
            // Candidates are positions where the anchor byte lines up.
            let haystack = &buffer[anchor_index..=last + anchor_index];
            memchr::memchr_iter(anchor_value, haystack)
                .find(|&start| pattern.matches(&buffer[start..]))
        }
        None => (0..=last).find(|&start| pattern.matches(&buffer[start..])),
    }
}
