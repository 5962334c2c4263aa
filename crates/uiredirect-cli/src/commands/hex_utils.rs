//! Address formatting shared by the commands.

/// Format an address as a hex string with 0x prefix.
pub fn format_hex_address(addr: u64) -> String {
    format!("0x{:X}", addr)
}

/// Format `addr` as `exe+0xRVA`, the form debuggers accept.
pub fn format_rva(base: u64, addr: u64) -> String {
    match addr.checked_sub(base) {
        Some(rva) => format!("exe+0x{:X}", rva),
        None => format_hex_address(addr),
    }
}

/// Render bytes as space separated upper-case hex.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
