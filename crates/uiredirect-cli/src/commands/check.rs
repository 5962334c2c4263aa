//! Check command implementation.
//!
//! Runs the same lookups the plugin performs at startup against an executable
//! on disk, so a new game build can be vetted without launching it.

use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;
use uiredirect::{
    Error, LightingPatchSite, ModuleImage, SignatureTable, builtin_signatures, load_signatures,
};

use super::hex_utils::{format_hex_address, format_rva};
use super::image::MappedImage;

/// Outcome of every lookup for one executable.
pub struct CheckReport {
    pub version: String,
    pub system_resolution: uiredirect::Result<(u64, (i32, i32))>,
    pub lighting_patch: uiredirect::Result<LightingPatchSite>,
}

impl CheckReport {
    pub fn all_found(&self) -> bool {
        self.system_resolution.is_ok() && self.lighting_patch.is_ok()
    }
}

/// Returns whether every signature resolved.
pub fn run(exe: &Path, signatures: Option<&Path>) -> Result<bool> {
    let table = match signatures {
        Some(path) => load_signatures(path)?,
        None => builtin_signatures(),
    };
    let mapped = MappedImage::load(exe)?;
    let image = mapped.image();

    println!("Executable: {}", exe.display());
    println!("Image base: {}", format_hex_address(image.base()));

    let report = check_image(&image, &table);
    print_report(&report, image.base());
    Ok(report.all_found())
}

pub fn check_image(image: &ModuleImage<'_>, table: &SignatureTable) -> CheckReport {
    let system_resolution = table
        .system_resolution
        .resolve(image)
        .and_then(|found| {
            found.ok_or_else(|| Error::SignatureNotFound("GSystemResolution".to_string()))
        })
        .and_then(|addr| {
            let width = image.read_i32(addr)?;
            let height = image.read_i32(addr + 4)?;
            Ok((addr, (width, height)))
        });

    CheckReport {
        version: table.version.clone(),
        system_resolution,
        lighting_patch: table.lighting_patch.locate(image),
    }
}

fn print_report(report: &CheckReport, base: u64) {
    println!("Signatures: {}", report.version);
    println!();

    match &report.system_resolution {
        Ok((addr, (width, height))) => println!(
            "{} GSystemResolution  {} ({}), initial {}x{}",
            "found".green(),
            format_hex_address(*addr),
            format_rva(base, *addr),
            width,
            height
        ),
        Err(e) => println!("{} GSystemResolution  {}", "missing".red(), e),
    }

    match &report.lighting_patch {
        Ok(site) => println!(
            "{} lighting patch     {} ({}) in function {}, {:#04x} -> {:#04x}",
            "found".green(),
            format_hex_address(site.address),
            format_rva(base, site.address),
            format_rva(base, site.function),
            site.original,
            site.patched
        ),
        Err(e) => println!("{} lighting patch     {}", "missing".red(), e),
    }

    println!();
    if report.all_found() {
        println!("{}", "All signatures resolved".green());
    } else {
        println!("{}", "Some signatures did not resolve".yellow());
    }
}
