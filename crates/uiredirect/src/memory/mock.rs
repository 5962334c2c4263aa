//! In-memory stand-in for process code memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::memory::CodeWriter;

/// A shared byte buffer mapped at `base`. Clones see the same memory.
#[derive(Clone)]
pub struct MockCodeWriter {
    base: u64,
    memory: Arc<Mutex<Vec<u8>>>,
    fail: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MockCodeWriter {
    pub fn new(base: u64, memory: Vec<u8>) -> Self {
        Self {
            base,
            memory: Arc::new(Mutex::new(memory)),
            fail: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.memory.lock().clone()
    }

    /// Make every following write fail as if the page could not be unprotected.
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn range(&self, address: u64, len: usize, total: usize) -> Result<std::ops::Range<usize>> {
        let start = address
            .checked_sub(self.base)
            .map(|offset| offset as usize)
            .filter(|&offset| offset + len <= total)
            .ok_or(Error::OutOfImage { address, len })?;
        Ok(start..start + len)
    }
}

impl CodeWriter for MockCodeWriter {
    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let memory = self.memory.lock();
        let range = self.range(address, len, memory.len())?;
        Ok(memory[range].to_vec())
    }

    fn write(&self, address: u64, bytes: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ProtectFailed {
                address,
                message: "mock protection failure".to_string(),
            });
        }
        let mut memory = self.memory.lock();
        let range = self.range(address, bytes.len(), memory.len())?;
        memory[range].copy_from_slice(bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
