//! Versioned table of build-specific signatures.
//!
//! Everything that ties this crate to one engine build lives here: byte
//! patterns, displacement layouts, the anchor string of the lighting pass and
//! the patch mask. Swapping builds means swapping the table (built-in or JSON),
//! never touching the redirector or clear pipeline.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::scan::{
    FunctionTable, ModuleImage, Pattern, find_function_from_string_ref, scan_disasm,
};

/// A RIP-relative reference to data, found via the instruction that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSignature {
    pub pattern: String,
    /// Start of the referencing instruction relative to the match.
    pub instr_offset: usize,
    /// Position of the disp32 relative to the instruction start.
    pub disp_offset: usize,
    /// Full instruction length; RIP points past it.
    pub instr_len: usize,
    #[serde(default)]
    pub deref: bool,
    #[serde(default)]
    pub addend: i64,
}

impl CodeSignature {
    pub fn pattern(&self) -> Result<Pattern> {
        Pattern::parse(&self.pattern)
    }

    /// Resolve the absolute address the first match refers to.
    pub fn resolve(&self, image: &ModuleImage<'_>) -> Result<Option<u64>> {
        let pattern = self.pattern()?;
        Ok(image
            .scan(&pattern)
            .and_then(|match_addr| self.target_from_match(image, match_addr)))
    }

    /// Decode the displacement of the instruction at `match_addr`.
    pub fn target_from_match(&self, image: &ModuleImage<'_>, match_addr: u64) -> Option<u64> {
        let instr_addr = match_addr + self.instr_offset as u64;
        let disp = image
            .read_i32(instr_addr + self.disp_offset as u64)
            .ok()?;
        let next_ip = instr_addr + self.instr_len as u64;
        let mut target = next_ip.wrapping_add_signed(disp as i64);

        if self.deref {
            target = image.read_u64(target).ok()?;
        }

        if self.addend != 0 {
            target = target.wrapping_add_signed(self.addend);
        }

        (target != 0).then_some(target)
    }
}

/// Where and how to force the lighting feature bit on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightingPatchSignature {
    /// String literal referenced by the lighting pass.
    pub anchor: String,
    /// Bytes of the function body to disassemble.
    pub search_span: usize,
    /// Signature of the flag-manipulating instruction.
    pub instruction: String,
    /// Patched byte relative to the instruction start.
    pub patch_offset: usize,
    /// Bits OR-ed into the patched byte.
    pub or_mask: u8,
}

impl LightingPatchSignature {
    pub fn instruction_pattern(&self) -> Result<Pattern> {
        Pattern::parse(&self.instruction)
    }

    /// Find the byte to patch: anchor string, then its function, then the instruction.
    ///
    /// Function entries come from the image's exception directory when it has one.
    pub fn locate(&self, image: &ModuleImage<'_>) -> Result<LightingPatchSite> {
        let pattern = self.instruction_pattern()?;

        let functions = match FunctionTable::from_image(image) {
            Ok(table) if !table.is_empty() => Some(table),
            Ok(_) => {
                warn!("Exception directory is empty, delimiting functions by padding");
                None
            }
            Err(e) => {
                warn!("{}, delimiting functions by padding", e);
                None
            }
        };

        let function = find_function_from_string_ref(image, &self.anchor, functions.as_ref())
            .ok_or_else(|| {
                Error::SignatureNotFound(format!("function referencing '{}'", self.anchor))
            })?;

        let instruction =
            scan_disasm(image, function, self.search_span, &pattern).ok_or_else(|| {
                Error::SignatureNotFound(format!(
                    "'{}' within {:#x} bytes of {:#x}",
                    self.instruction, self.search_span, function
                ))
            })?;

        let address = instruction + self.patch_offset as u64;
        let original = image.read_u8(address)?;
        Ok(LightingPatchSite {
            function,
            instruction,
            address,
            original,
            patched: original | self.or_mask,
        })
    }
}

/// A located lighting patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightingPatchSite {
    pub function: u64,
    pub instruction: u64,
    pub address: u64,
    pub original: u8,
    pub patched: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureTable {
    pub version: String,
    pub system_resolution: CodeSignature,
    pub lighting_patch: LightingPatchSignature,
}

impl SignatureTable {
    /// Parse every pattern once so a bad table is reported at load time.
    pub fn validate(&self) -> Result<()> {
        self.system_resolution.pattern()?;
        self.lighting_patch.instruction_pattern()?;
        if self.lighting_patch.anchor.is_empty() {
            return Err(Error::InvalidPattern(
                "Lighting patch anchor string is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// The table for the build this crate ships against.
pub fn builtin_signatures() -> SignatureTable {
    SignatureTable {
        version: "ff7-rebirth-1.0".to_string(),
        // cmp dword ptr [rip+disp32], 780h: the hardcoded 1920 check against GSystemResolution.
        system_resolution: CodeSignature {
            pattern: "81 3D ? ? ? ? 80 07 00 00".to_string(),
            instr_offset: 0,
            disp_offset: 2,
            instr_len: 10,
            deref: false,
            addend: 0,
        },
        // and eax, imm8 on the pass flags; setting bit 2 of the immediate keeps that flag alive.
        lighting_patch: LightingPatchSignature {
            anchor: "ScreenShadowMaskTexture".to_string(),
            search_span: 0x1000,
            instruction: "83 E0 ?".to_string(),
            patch_offset: 2,
            or_mask: 0x04,
        },
    }
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<SignatureTable> {
    let content = fs::read_to_string(&path)?;
    let table: SignatureTable = serde_json::from_str(&content)?;
    table.validate()?;
    Ok(table)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, table: &SignatureTable) -> Result<()> {
    let content = serde_json::to_string_pretty(table)?;
    fs::write(path, content)?;
    Ok(())
}
