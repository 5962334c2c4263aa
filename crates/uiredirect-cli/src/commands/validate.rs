//! Validate command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use uiredirect::load_signatures;

/// Parse the table at `path` and print its contents.
pub fn run(path: &Path) -> Result<()> {
    let table = load_signatures(path)
        .with_context(|| format!("Invalid signature table {}", path.display()))?;

    println!("{} {}", "valid".green(), path.display());
    println!("  version:           {}", table.version);
    println!(
        "  system resolution: {} (disp +{}, len {})",
        table.system_resolution.pattern,
        table.system_resolution.disp_offset,
        table.system_resolution.instr_len
    );
    println!(
        "  lighting patch:    '{}' -> {} (byte +{} |= {:#04x})",
        table.lighting_patch.anchor,
        table.lighting_patch.instruction,
        table.lighting_patch.patch_offset,
        table.lighting_patch.or_mask
    );

    Ok(())
}
