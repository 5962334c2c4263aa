//! Function bounds from the x64 exception directory (`.pdata`).

use pelite::pe64::{Pe, PeView};
use tracing::debug;

use crate::error::{Error, Result};
use crate::scan::ModuleImage;

const UNW_FLAG_CHAININFO: u8 = 0x4;
const RUNTIME_FUNCTION_SIZE: usize = 12;
/// Upper bound on chained unwind entries followed for one function.
const MAX_CHAIN_DEPTH: usize = 32;

/// One `RUNTIME_FUNCTION`, image-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFunction {
    pub begin: u32,
    pub end: u32,
    /// RVA of the `UNWIND_INFO`, or of another `RUNTIME_FUNCTION` when odd.
    pub unwind: u32,
}

/// Where an address falls relative to the exception directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionLookup {
    /// Inside a listed function; the entry of its primary range.
    Entry(u64),
    /// Not covered by any entry. Leaf functions have no unwind data.
    /// `after` is the end of the closest listed function below the address.
    Uncovered { after: Option<u64> },
}

/// The runtime function table of one image, sorted by start address.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: Vec<RuntimeFunction>,
}

impl FunctionTable {
    pub fn new(mut functions: Vec<RuntimeFunction>) -> Self {
        functions.sort_by_key(|f| f.begin);
        Self { functions }
    }

    /// Read the exception directory of an image mapped at its virtual addresses.
    pub fn from_image(image: &ModuleImage<'_>) -> Result<Self> {
        let view = PeView::from_bytes(image.as_bytes())
            .map_err(|e| Error::Module(format!("Image at {:#x} is not a PE: {}", image.base(), e)))?;
        let exception = view
            .exception()
            .map_err(|e| Error::Module(format!("No exception directory: {}", e)))?;

        let functions: Vec<RuntimeFunction> = exception
            .image()
            .iter()
            .map(|f| RuntimeFunction {
                begin: f.BeginAddress,
                end: f.EndAddress,
                unwind: f.UnwindData,
            })
            .collect();
        debug!("{} runtime functions in {:?}", functions.len(), image);
        Ok(Self::new(functions))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Classify `address`. `None` if it is outside the image or a chain is broken.
    pub fn lookup(&self, image: &ModuleImage<'_>, address: u64) -> Option<FunctionLookup> {
        let rva = u32::try_from(address.checked_sub(image.base())?).ok()?;
        let index = self.functions.partition_point(|f| f.begin <= rva);

        match index.checked_sub(1).map(|i| self.functions[i]) {
            Some(function) if rva < function.end => {
                let begin = primary_entry(image, function)?;
                Some(FunctionLookup::Entry(image.base() + begin as u64))
            }
            Some(function) => Some(FunctionLookup::Uncovered {
                after: Some(image.base() + function.end as u64),
            }),
            None => Some(FunctionLookup::Uncovered { after: None }),
        }
    }
}

/// Follow chained unwind info back to the range holding the real entry.
fn primary_entry(image: &ModuleImage<'_>, mut function: RuntimeFunction) -> Option<u32> {
    for _ in 0..MAX_CHAIN_DEPTH {
        match chained_parent(image, function) {
            Ok(Some(parent)) => function = parent,
            Ok(None) => return Some(function.begin),
            Err(e) => {
                debug!("Unwind chain from {:#x} is unreadable: {}", function.begin, e);
                return None;
            }
        }
    }
    debug!("Unwind chain from {:#x} is too deep", function.begin);
    None
}

fn chained_parent(
    image: &ModuleImage<'_>,
    function: RuntimeFunction,
) -> Result<Option<RuntimeFunction>> {
    let base = image.base();
    if function.unwind & 1 != 0 {
        return read_runtime_function(image, base + (function.unwind & !1) as u64).map(Some);
    }

    let info = base + function.unwind as u64;
    let header = image.read_bytes(info, 4)?;
    if (header[0] >> 3) & UNW_FLAG_CHAININFO == 0 {
        return Ok(None);
    }
    // Unwind codes are two bytes each, padded to an even count.
    let codes = (header[2] as u64 + 1) & !1;
    read_runtime_function(image, info + 4 + codes * 2).map(Some)
}

fn read_runtime_function(image: &ModuleImage<'_>, address: u64) -> Result<RuntimeFunction> {
    let bytes = image.read_bytes(address, RUNTIME_FUNCTION_SIZE)?;
    let field = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    Ok(RuntimeFunction {
        begin: field(0),
        end: field(4),
        unwind: field(8),
    })
}
