//! Helpers for converting values to and from hex strings
//!
//! Hashes on the ledger are displayed byte-reversed, so the helpers come in a
//! plain and a reversed flavor

/// Convert a byte array to a hex string
pub fn bytes_to_hex_string(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Convert a hex string to a byte array
pub fn bytes_from_hex_string(hex: &str) -> Result<Vec<u8>, String> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    hex::decode(hex).map_err(|e| format!("error deserializing bytes from hex string: {e}"))
}

/// Convert a byte array to a hex string in reversed byte order
pub fn bytes_to_reversed_hex_string(bytes: &[u8]) -> String {
    let mut reversed = bytes.to_vec();
    reversed.reverse();
    hex::encode(reversed)
}

/// Parse a hex string in reversed byte order into a fixed size array
pub fn array_from_reversed_hex_string<const N: usize>(hex: &str) -> Result<[u8; N], String> {
    let mut bytes = bytes_from_hex_string(hex)?;
    bytes.reverse();
    bytes.try_into().map_err(|b: Vec<u8>| format!("expected {N} bytes, got {}", b.len()))
}

/// Parse a hex string into a fixed size array
pub fn array_from_hex_string<const N: usize>(hex: &str) -> Result<[u8; N], String> {
    let bytes = bytes_from_hex_string(hex)?;
    bytes.try_into().map_err(|b: Vec<u8>| format!("expected {N} bytes, got {}", b.len()))
}
