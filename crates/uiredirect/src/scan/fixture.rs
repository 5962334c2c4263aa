//! Miniature executable images containing what the built-in signatures look for.

use crate::scan::ModuleImage;

pub const IMAGE_SIZE: usize = 0x300;
/// Entry of the function referencing `ScreenShadowMaskTexture`.
pub const LIGHTING_FUNCTION: u64 = 0x80;
/// `and eax, 0FFFFFFFBh` inside it.
pub const LIGHTING_AND: u64 = 0x87;
/// `cmp dword ptr [rip+disp32], 780h`
pub const RESOLUTION_CMP: u64 = 0x100;
pub const ANCHOR_STRING: u64 = 0x200;
/// `(1920, 1080)` as two `i32`.
pub const SYSTEM_RESOLUTION: u64 = 0x280;

fn rel32(instr: u64, len: u64, target: u64) -> [u8; 4] {
    ((target as i64 - (instr + len) as i64) as i32).to_le_bytes()
}

pub fn game_image() -> Vec<u8> {
    let mut data = vec![0xCCu8; IMAGE_SIZE];

    // unrelated leaf function
    data[0x40..0x47].copy_from_slice(&[0x48, 0x83, 0xEC, 0x28, 0x90, 0x90, 0xC3]);

    let f = LIGHTING_FUNCTION as usize;
    let mut code = vec![
        0x48, 0x83, 0xEC, 0x28, // sub rsp, 28h
        0x8B, 0x41, 0x10, // mov eax, [rcx+10h]
        0x83, 0xE0, 0xFB, // and eax, 0FFFFFFFBh
        0x48, 0x8D, 0x15, // lea rdx, [rip+disp32]
    ];
    code.extend_from_slice(&rel32(LIGHTING_FUNCTION + 10, 7, ANCHOR_STRING));
    code.extend_from_slice(&[
        0x89, 0x41, 0x10, // mov [rcx+10h], eax
        0x48, 0x83, 0xC4, 0x28, // add rsp, 28h
        0xC3, // ret
    ]);
    data[f..f + code.len()].copy_from_slice(&code);

    let c = RESOLUTION_CMP as usize;
    data[c..c + 2].copy_from_slice(&[0x81, 0x3D]);
    data[c + 2..c + 6].copy_from_slice(&rel32(RESOLUTION_CMP, 10, SYSTEM_RESOLUTION));
    data[c + 6..c + 10].copy_from_slice(&1920u32.to_le_bytes());
    data[c + 10] = 0xC3;

    let wide: Vec<u8> = "ScreenShadowMaskTexture"
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect();
    let s = ANCHOR_STRING as usize;
    data[s - 2..s].fill(0);
    data[s..s + wide.len()].copy_from_slice(&wide);

    let r = SYSTEM_RESOLUTION as usize;
    data[r..r + 4].copy_from_slice(&1920i32.to_le_bytes());
    data[r + 4..r + 8].copy_from_slice(&1080i32.to_le_bytes());

    data
}

pub const PE_BASE: u64 = 0x1_4000_0000;
pub const PE_IMAGE_SIZE: usize = 0x400;
/// Ends in `ret` exactly where the next function starts, so no `int3` separates them.
pub const PE_FIRST_FUNCTION: u64 = 0x200;
/// References `ScreenShadowMaskTexture`; starts with `and eax, 0FFFFFFFBh`.
pub const PE_SECOND_FUNCTION: u64 = 0x240;
pub const PE_ANCHOR_STRING: u64 = 0x300;
const PE_EXCEPTION_DIRECTORY: usize = 0x380;
const PE_UNWIND_INFO: usize = 0x3C0;

/// A mapped PE32+ image with an exception directory listing two adjacent functions.
/// The first also contains an `and eax, imm8`, and padding precedes it.
///
/// The image is placed 16-byte aligned inside `storage`.
pub fn pe_image(storage: &mut Vec<u8>) -> ModuleImage<'_> {
    let mut data = vec![0u8; PE_IMAGE_SIZE];
    fn put16(data: &mut [u8], at: usize, v: u16) {
        data[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }
    fn put32(data: &mut [u8], at: usize, v: u32) {
        data[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    // DOS header, NT headers at 0x40
    data[0..2].copy_from_slice(b"MZ");
    put32(&mut data, 0x3C, 0x40);
    data[0x40..0x44].copy_from_slice(b"PE\0\0");
    put16(&mut data, 0x44, 0x8664);
    put16(&mut data, 0x54, 0xF0);
    let optional = 0x58;
    put16(&mut data, optional, 0x20B);
    data[optional + 24..optional + 32].copy_from_slice(&PE_BASE.to_le_bytes());
    put32(&mut data, optional + 32, 0x1000);
    put32(&mut data, optional + 36, 0x200);
    put32(&mut data, optional + 56, PE_IMAGE_SIZE as u32);
    put32(&mut data, optional + 60, 0x200);
    put32(&mut data, optional + 108, 16);
    // exception directory entry
    put32(&mut data, optional + 112 + 3 * 8, PE_EXCEPTION_DIRECTORY as u32);
    put32(&mut data, optional + 112 + 3 * 8 + 4, 24);

    data[0x1F0..0x380].fill(0xCC);

    let a = PE_FIRST_FUNCTION as usize;
    data[a..a + 0x40].fill(0x90);
    data[a..a + 4].copy_from_slice(&[0x48, 0x83, 0xEC, 0x28]); // sub rsp, 28h
    data[a + 6..a + 9].copy_from_slice(&[0x83, 0xE0, 0x01]); // and eax, 1
    data[a + 0x3B..a + 0x3F].copy_from_slice(&[0x48, 0x83, 0xC4, 0x28]); // add rsp, 28h
    data[a + 0x3F] = 0xC3;

    let b = PE_SECOND_FUNCTION as usize;
    data[b..b + 3].copy_from_slice(&[0x83, 0xE0, 0xFB]); // and eax, 0FFFFFFFBh
    data[b + 3..b + 6].copy_from_slice(&[0x48, 0x8D, 0x15]); // lea rdx, [rip+disp32]
    data[b + 6..b + 10].copy_from_slice(&rel32(PE_SECOND_FUNCTION + 3, 7, PE_ANCHOR_STRING));
    data[b + 10] = 0xC3;

    let wide: Vec<u8> = "ScreenShadowMaskTexture"
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect();
    let s = PE_ANCHOR_STRING as usize;
    data[s - 2..s].fill(0);
    data[s..s + wide.len()].copy_from_slice(&wide);

    let pdata = PE_EXCEPTION_DIRECTORY;
    for (i, (begin, end)) in [(a, b), (b, b + 11)].into_iter().enumerate() {
        let at = pdata + i * 12;
        put32(&mut data, at, begin as u32);
        put32(&mut data, at + 4, end as u32);
        put32(&mut data, at + 8, (PE_UNWIND_INFO + i * 8) as u32);
        // UNWIND_INFO version 1, no flags, no codes
        data[PE_UNWIND_INFO + i * 8] = 0x01;
    }

    *storage = vec![0u8; PE_IMAGE_SIZE + 16];
    let skew = storage.as_ptr().align_offset(16);
    let image = &mut storage[skew..skew + PE_IMAGE_SIZE];
    image.copy_from_slice(&data);
    ModuleImage::new(PE_BASE, image)
}
