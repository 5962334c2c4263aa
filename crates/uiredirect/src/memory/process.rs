//! Code memory of the current process.

use crate::error::{Error, Result};
use crate::memory::CodeWriter;
use crate::scan::ModuleImage;

#[cfg(target_os = "windows")]
use tracing::warn;

/// Writes code pages of the running process, lifting page protection for the
/// duration of each write.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory {
    _private: (),
}

impl ProcessMemory {
    /// # Safety
    ///
    /// Every address handed to the returned writer must lie inside mapped memory
    /// of the current process, and no other thread may execute the bytes while
    /// they are being rewritten.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(target_os = "windows")]
impl CodeWriter for ProcessMemory {
    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        if address == 0 {
            return Err(Error::OutOfImage { address, len });
        }
        // SAFETY: the address is mapped per the contract of `ProcessMemory::new`.
        let bytes = unsafe { std::slice::from_raw_parts(address as *const u8, len) };
        Ok(bytes.to_vec())
    }

    fn write(&self, address: u64, bytes: &[u8]) -> Result<()> {
        use std::ffi::c_void;
        use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
        use windows::Win32::System::Memory::{
            PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, VirtualProtect,
        };
        use windows::Win32::System::Threading::GetCurrentProcess;

        if address == 0 {
            return Err(Error::OutOfImage {
                address,
                len: bytes.len(),
            });
        }
        let target = address as *mut u8;

        let mut old = PAGE_PROTECTION_FLAGS::default();
        // SAFETY: the range is mapped per the contract of `ProcessMemory::new`.
        unsafe {
            VirtualProtect(
                target as *const c_void,
                bytes.len(),
                PAGE_EXECUTE_READWRITE,
                &mut old,
            )
        }
        .map_err(|e| Error::ProtectFailed {
            address,
            message: e.message().to_string(),
        })?;

        // SAFETY: the page is now writable and the range is mapped.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), target, bytes.len()) };

        let mut ignored = PAGE_PROTECTION_FLAGS::default();
        // SAFETY: restores the protection captured above on the same range.
        if let Err(e) =
            unsafe { VirtualProtect(target as *const c_void, bytes.len(), old, &mut ignored) }
        {
            warn!(
                "Failed to restore page protection at {:#x}: {}",
                address,
                e.message()
            );
        }

        // SAFETY: flushing a mapped range of the current process.
        if let Err(e) = unsafe {
            FlushInstructionCache(
                GetCurrentProcess(),
                Some(target as *const c_void),
                bytes.len(),
            )
        } {
            warn!(
                "Failed to flush instruction cache at {:#x}: {}",
                address,
                e.message()
            );
        }

        Ok(())
    }
}

#[cfg(not(target_os = "windows"))]
impl CodeWriter for ProcessMemory {
    fn read(&self, _address: u64, _len: usize) -> Result<Vec<u8>> {
        Err(Error::Unsupported("process memory access"))
    }

    fn write(&self, _address: u64, _bytes: &[u8]) -> Result<()> {
        Err(Error::Unsupported("process memory access"))
    }
}

/// The main executable of the current process, as loaded.
#[cfg(target_os = "windows")]
pub fn executable_image() -> Result<ModuleImage<'static>> {
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
    use windows::Win32::System::Threading::GetCurrentProcess;

    // SAFETY: querying the handle of the already-loaded main module.
    let module = unsafe { GetModuleHandleW(None) }
        .map_err(|e| Error::Module(format!("GetModuleHandleW: {}", e.message())))?;

    let mut info = MODULEINFO::default();
    // SAFETY: `info` is a valid MODULEINFO of the size passed.
    unsafe {
        GetModuleInformation(
            GetCurrentProcess(),
            module,
            &mut info,
            std::mem::size_of::<MODULEINFO>() as u32,
        )
    }
    .map_err(|e| Error::Module(format!("GetModuleInformation: {}", e.message())))?;

    // SAFETY: the main module stays mapped for the lifetime of the process.
    Ok(unsafe { ModuleImage::from_raw(info.lpBaseOfDll as *const u8, info.SizeOfImage as usize) })
}

#[cfg(not(target_os = "windows"))]
pub fn executable_image() -> Result<ModuleImage<'static>> {
    Err(Error::Unsupported("module enumeration"))
}
