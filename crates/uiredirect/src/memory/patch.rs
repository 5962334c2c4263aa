//! Reversible in-place code patches.

use tracing::{debug, error};

use crate::error::{Error, Result};

/// Reads and writes code bytes of the current process.
///
/// `write` must be all-or-nothing: either every byte lands or none does.
pub trait CodeWriter: Send {
    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>>;
    fn write(&self, address: u64, bytes: &[u8]) -> Result<()>;
}

/// An in-place byte overwrite that restores the original bytes when reverted or dropped.
pub struct Patch<W: CodeWriter> {
    writer: W,
    address: u64,
    original: Vec<u8>,
    patched: Vec<u8>,
    installed: bool,
}

impl<W: CodeWriter> Patch<W> {
    /// Save the bytes at `address` and, if `enable`, overwrite them with `bytes`.
    pub fn install(writer: W, address: u64, bytes: Vec<u8>, enable: bool) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::PatchState {
                address,
                message: "empty patch".to_string(),
            });
        }

        let original = writer.read(address, bytes.len())?;
        let mut patch = Self {
            writer,
            address,
            original,
            patched: bytes,
            installed: false,
        };

        if enable {
            patch.enable()?;
        }

        Ok(patch)
    }

    /// Patch one byte to `original | mask`.
    pub fn or_byte(writer: W, address: u64, mask: u8) -> Result<Self> {
        let current = writer.read(address, 1)?;
        Self::install(writer, address, vec![current[0] | mask], true)
    }

    /// Write the patched bytes. Does nothing when already installed.
    pub fn enable(&mut self) -> Result<()> {
        if self.installed {
            return Ok(());
        }
        self.writer.write(self.address, &self.patched)?;
        self.installed = true;
        debug!(
            "Patched {} byte(s) at {:#x}: {:02X?} -> {:02X?}",
            self.patched.len(),
            self.address,
            self.original,
            self.patched
        );
        Ok(())
    }

    /// Restore the original bytes. Does nothing when not installed.
    pub fn revert(&mut self) -> Result<()> {
        if !self.installed {
            return Ok(());
        }
        self.writer.write(self.address, &self.original)?;
        self.installed = false;
        debug!("Reverted patch at {:#x}", self.address);
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    pub fn patched_bytes(&self) -> &[u8] {
        &self.patched
    }
}

impl<W: CodeWriter> Drop for Patch<W> {
    fn drop(&mut self) {
        if let Err(e) = self.revert() {
            error!("Failed to revert patch at {:#x}: {}", self.address, e);
        }
    }
}

impl<W: CodeWriter> std::fmt::Debug for Patch<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patch")
            .field("address", &format_args!("{:#x}", self.address))
            .field("original", &self.original)
            .field("patched", &self.patched)
            .field("installed", &self.installed)
            .finish()
    }
}
