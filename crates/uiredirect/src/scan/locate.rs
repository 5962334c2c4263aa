//! Find engine functions through the string literals they reference.

use tracing::debug;

use crate::scan::{FunctionLookup, FunctionTable, ModuleImage, Pattern, PatternByte};

/// Upper bound on how far back a function entry is searched for.
pub const MAX_FUNCTION_SIZE: u64 = 0x10000;

/// Functions are 16-byte aligned and padded with `int3`.
const FUNCTION_ALIGNMENT: u64 = 16;
const PADDING_BYTE: u8 = 0xCC;

/// Locate the entry of a function that references `literal`.
///
/// The literal is looked up as a NUL-terminated UTF-16LE string first, then as
/// narrow ASCII. Each occurrence is followed to its `lea r64, [rip+disp32]`
/// references, and the first reference whose containing function can be
/// delimited wins. See [`find_function_entry`] for how `functions` is used.
pub fn find_function_from_string_ref(
    image: &ModuleImage<'_>,
    literal: &str,
    functions: Option<&FunctionTable>,
) -> Option<u64> {
    for string_addr in find_string(image, literal) {
        for reference in find_lea_references(image, string_addr) {
            if let Some(entry) = find_function_entry(image, reference, functions) {
                debug!(
                    "'{}' at {:#x} referenced from {:#x}, function entry {:#x}",
                    literal, string_addr, reference, entry
                );
                return Some(entry);
            }
        }
    }
    None
}

/// Addresses of `literal`, wide encoding first.
///
/// A match must start the image or follow a terminator of the same width, so
/// the tail of a longer string is not reported.
pub fn find_string(image: &ModuleImage<'_>, literal: &str) -> Vec<u64> {
    let wide: Vec<u8> = literal
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect();
    let mut results: Vec<u64> = image
        .scan_all(&Pattern::from_literal(&wide))
        .into_iter()
        .filter(|&addr| starts_string(image, addr, 2))
        .collect();

    let mut narrow = literal.as_bytes().to_vec();
    narrow.push(0);
    results.extend(
        image
            .scan_all(&Pattern::from_literal(&narrow))
            .into_iter()
            .filter(|&addr| starts_string(image, addr, 1)),
    );
    results
}

fn starts_string(image: &ModuleImage<'_>, addr: u64, char_width: usize) -> bool {
    if addr == image.base() {
        return true;
    }
    match addr.checked_sub(char_width as u64) {
        Some(prev) => image
            .read_bytes(prev, char_width)
            .is_ok_and(|bytes| bytes.iter().all(|&b| b == 0)),
        None => false,
    }
}

/// Every `lea r64, [rip+disp32]` in the image whose target is `target`.
///
/// Matches `48 8D /r` and `4C 8D /r` with `mod = 00, r/m = 101`.
pub fn find_lea_references(image: &ModuleImage<'_>, target: u64) -> Vec<u64> {
    const LEA_LEN: usize = 7;
    // 4? 8D ?5 ?? ?? ?? ??
    let lea = Pattern::new(vec![
        PatternByte { value: 0x40, mask: 0xF0 },
        PatternByte::exact(0x8D),
        PatternByte { value: 0x05, mask: 0x0F },
        PatternByte::ANY,
        PatternByte::ANY,
        PatternByte::ANY,
        PatternByte::ANY,
    ]);

    image
        .scan_all(&lea)
        .into_iter()
        .filter(|&addr| {
            let Ok(bytes) = image.read_bytes(addr, LEA_LEN) else {
                return false;
            };
            let rex = bytes[0];
            let modrm = bytes[2];
            if rex != 0x48 && rex != 0x4C {
                return false;
            }
            if modrm & 0xC7 != 0x05 {
                return false;
            }
            let disp = i32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
            let next_ip = addr + LEA_LEN as u64;
            next_ip.wrapping_add_signed(disp as i64) == target
        })
        .collect()
}

/// Entry of the function containing `inside`.
///
/// With a function table, covered addresses resolve through it and uncovered
/// ones are delimited by padding no lower than the end of the preceding listed
/// function. Without one, only `int3` padding delimits functions.
pub fn find_function_entry(
    image: &ModuleImage<'_>,
    inside: u64,
    functions: Option<&FunctionTable>,
) -> Option<u64> {
    let Some(functions) = functions else {
        return find_function_start(image, inside);
    };
    match functions.lookup(image, inside)? {
        FunctionLookup::Entry(entry) => Some(entry),
        FunctionLookup::Uncovered { after: None } => find_function_start(image, inside),
        FunctionLookup::Uncovered { after: Some(floor) } => walk_back_to_padding(image, inside, floor)
            .or_else(|| first_code_from(image, floor, inside)),
    }
}

/// Walk back from `inside` to the nearest aligned address that follows `int3` padding.
pub fn find_function_start(image: &ModuleImage<'_>, inside: u64) -> Option<u64> {
    walk_back_to_padding(image, inside, inside.saturating_sub(MAX_FUNCTION_SIZE))
}

fn walk_back_to_padding(image: &ModuleImage<'_>, inside: u64, lowest: u64) -> Option<u64> {
    let lowest = lowest.max(image.base() + 1);
    let mut candidate = inside - inside % FUNCTION_ALIGNMENT;

    while candidate >= lowest {
        let padded = image.read_u8(candidate - 1).ok()? == PADDING_BYTE;
        let not_padding = image.read_u8(candidate).ok()? != PADDING_BYTE;
        if padded && not_padding {
            return Some(candidate);
        }
        candidate = candidate.checked_sub(FUNCTION_ALIGNMENT)?;
    }
    None
}

/// First aligned non-padding address in `[floor, inside]`.
fn first_code_from(image: &ModuleImage<'_>, floor: u64, inside: u64) -> Option<u64> {
    let mut candidate = floor.next_multiple_of(FUNCTION_ALIGNMENT);
    while candidate <= inside {
        if image.read_u8(candidate).ok()? != PADDING_BYTE {
            return Some(candidate);
        }
        candidate += FUNCTION_ALIGNMENT;
    }
    None
}
