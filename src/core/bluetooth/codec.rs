//! Hex payload codec.
//! Command payloads arrive as hex strings (possibly whitespace-separated
//! for readability); the link itself wants raw bytes, or base64 where a
//! transport insists on a text encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::BridgeError;

/// Decodes a hex string into bytes. All ASCII whitespace is stripped
/// first; anything else outside `[0-9A-Fa-f]`, or an odd cleaned length,
/// is `InvalidEncoding`.
pub fn decode(hex: &str) -> Result<Vec<u8>, BridgeError> {
    let clean: String = hex.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if let Some(bad) = clean.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(BridgeError::InvalidEncoding(format!(
            "non-hex character {bad:?}"
        )));
    }
    if clean.len() % 2 != 0 {
        return Err(BridgeError::InvalidEncoding(format!(
            "odd number of hex digits ({})",
            clean.len()
        )));
    }

    let mut bytes = Vec::with_capacity(clean.len() / 2);
    for pair in clean.as_bytes().chunks(2) {
        let hi = hex_value(pair[0]);
        let lo = hex_value(pair[1]);
        bytes.push((hi << 4) | lo);
    }
    Ok(bytes)
}

/// Renders bytes as uppercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Encodes bytes in the text format transports that cannot carry raw
/// bytes expect.
pub fn encode_transport(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Appends one checksum byte: the sum of all input bytes modulo 256.
pub fn append_checksum(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.extend_from_slice(bytes);
    out.push(checksum(bytes));
    out
}

/// Low-8-bit sum checksum over the given bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn hex_value(digit: u8) -> u8 {
    // Input already validated as an ASCII hex digit.
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}
