//! Search command implementation.

use std::path::Path;

use anyhow::Result;
use uiredirect::{ModuleImage, Pattern};

use super::hex_utils::{format_bytes, format_hex_address, format_rva};
use super::image::MappedImage;

/// Bytes shown after each match.
const CONTEXT_LEN: usize = 16;

pub fn run(exe: &Path, pattern: &str, limit: usize) -> Result<()> {
    let pattern = Pattern::parse(pattern)?;
    let mapped = MappedImage::load(exe)?;
    let image = mapped.image();

    let matches = find_matches(&image, &pattern, limit);
    println!("Pattern: {}", pattern);
    println!("Matches: {}", matches.len());
    for addr in matches {
        let context = image.read_up_to(addr, CONTEXT_LEN).unwrap_or_default();
        println!(
            "  {}  {:<14}  {}",
            format_hex_address(addr),
            format_rva(image.base(), addr),
            format_bytes(context)
        );
    }

    Ok(())
}

fn find_matches(image: &ModuleImage<'_>, pattern: &Pattern, limit: usize) -> Vec<u64> {
    let mut matches = image.scan_all(pattern);
    matches.truncate(limit);
    matches
}
