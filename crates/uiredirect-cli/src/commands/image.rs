//! Load a PE file from disk and lay it out the way the loader maps it.

use std::path::Path;

use anyhow::{Context, Result, bail};
use pelite::pe64::{Pe, PeFile};
use tracing::debug;
use uiredirect::ModuleImage;

/// A PE image mapped at its preferred base, sections at their RVAs.
pub struct MappedImage {
    base: u64,
    bytes: Vec<u8>,
}

impl MappedImage {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_pe(&file).with_context(|| format!("Failed to map {}", path.display()))
    }

    pub fn from_pe(file: &[u8]) -> Result<Self> {
        let pe = PeFile::from_bytes(file)?;
        let header = pe.optional_header();
        let size = header.SizeOfImage as usize;
        if size == 0 {
            bail!("SizeOfImage is zero");
        }

        let mut bytes = vec![0u8; size];
        let headers = (header.SizeOfHeaders as usize).min(size).min(file.len());
        bytes[..headers].copy_from_slice(&file[..headers]);

        for section in pe.section_headers().iter() {
            map_section(
                &mut bytes,
                file,
                section.VirtualAddress as usize,
                section.PointerToRawData as usize,
                section.SizeOfRawData as usize,
                section.VirtualSize as usize,
            );
        }

        debug!(
            "Mapped {:#x} bytes at {:#x} ({} sections)",
            size,
            header.ImageBase,
            pe.section_headers().iter().count()
        );
        Ok(Self {
            base: header.ImageBase,
            bytes,
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn image(&self) -> ModuleImage<'_> {
        ModuleImage::new(self.base, &self.bytes)
    }
}

/// Copy a section's raw data to its virtual address, truncating at both buffers' ends.
fn map_section(
    image: &mut [u8],
    file: &[u8],
    virtual_address: usize,
    raw_offset: usize,
    raw_size: usize,
    virtual_size: usize,
) {
    let len = if virtual_size == 0 {
        raw_size
    } else {
        raw_size.min(virtual_size)
    };

    let src_end = raw_offset.saturating_add(len).min(file.len());
    if raw_offset >= src_end {
        return;
    }
    let dst_end = virtual_address
        .saturating_add(src_end - raw_offset)
        .min(image.len());
    if virtual_address >= dst_end {
        return;
    }

    let count = dst_end - virtual_address;
    image[virtual_address..dst_end].copy_from_slice(&file[raw_offset..raw_offset + count]);
}
