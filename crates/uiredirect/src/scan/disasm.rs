//! Instruction-aligned signature search.

use iced_x86::{Decoder, DecoderOptions, Instruction};

use crate::scan::{ModuleImage, Pattern};

/// Decode x86-64 code from `start` and return the first instruction, within
/// `span` bytes, whose encoding starts with `pattern`.
///
/// Only instruction boundaries are tested, so bytes inside an immediate or
/// displacement never produce a match.
pub fn scan_disasm(
    image: &ModuleImage<'_>,
    start: u64,
    span: usize,
    pattern: &Pattern,
) -> Option<u64> {
    let code = image.read_up_to(start, span).ok()?;
    let mut decoder = Decoder::with_ip(64, code, start, DecoderOptions::NONE);
    let mut instruction = Instruction::default();

    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        if instruction.is_invalid() {
            continue;
        }

        let ip = instruction.ip();
        let Ok(bytes) = image.read_up_to(ip, pattern.len()) else {
            break;
        };
        if pattern.matches(bytes) {
            return Some(ip);
        }
    }

    None
}
