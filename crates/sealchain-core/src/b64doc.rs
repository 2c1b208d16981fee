//! Helpers for the JSON documents that carry byte fields as base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub(crate) fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub(crate) fn decode_array<const N: usize>(
    field: &'static str,
    text: &str,
) -> Result<[u8; N], String> {
    let bytes =
        BASE64.decode(text).map_err(|e| format!("field {field}: invalid base64: {e}"))?;
    <[u8; N]>::try_from(bytes.as_slice())
        .map_err(|_| format!("field {field}: expected {N} bytes, got {}", bytes.len()))
}
