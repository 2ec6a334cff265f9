//! Content normalization: turns raw message bytes into a value that is
//! always safe to store as document text, together with the canonical
//! content-encoding label describing how the bytes were transcoded.
//!
//! The declared encoding hint is sanitized before matching so variants like
//! `"UTF-8"`, `"utf_8"` and `"Utf8"` collapse to a single token. Unknown
//! encodings degrade to base64 rather than corrupting or truncating data,
//! and content that is already base64 text is never encoded a second time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Canonical label for UTF-8 text content.
pub const ENCODING_UTF8: &str = "utf8";
/// Canonical label for base64-encoded content.
pub const ENCODING_BASE64: &str = "base64";

/// Lower-cases an encoding hint and strips every character that is not a
/// lowercase ASCII letter or digit. Returns `None` when nothing is left.
pub fn sanitize_hint(hint: Option<&str>) -> Option<String> {
    let cleaned: String = hint?
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Converts raw bytes into storable text, returning the text and the
/// canonical content-encoding label. Total function: transcoding cannot
/// fail for any byte sequence.
pub fn normalize(
    raw: &[u8],
    content_type: Option<&str>,
    content_encoding: Option<&str>,
) -> (String, String) {
    let hint = sanitize_hint(content_encoding);
    match hint.as_deref() {
        // JSON without a declared encoding is assumed to be UTF-8 text.
        None if content_type.is_some_and(|ct| ct.starts_with("application/json")) => {
            (decode_utf8(raw), ENCODING_UTF8.to_string())
        }
        // Hex strings stay viewable as hex.
        Some("hex") => (decode_single_byte(raw), "hex".to_string()),
        Some("ascii") => (decode_single_byte(raw), "ascii".to_string()),
        Some("utf8") => (decode_utf8(raw), ENCODING_UTF8.to_string()),
        // UCS-2/UTF-16 is transcoded to the canonical text form.
        Some("utf16le") | Some("ucs2") => (decode_utf16le(raw), ENCODING_UTF8.to_string()),
        Some("binary") => (BASE64.encode(raw), ENCODING_BASE64.to_string()),
        // Already base64 text: pass through, never double-encode.
        Some("base64") => (decode_single_byte(raw), ENCODING_BASE64.to_string()),
        // Unknown encodings fall back to base64, keeping a trace of the hint.
        Some(other) => (BASE64.encode(raw), format!("{ENCODING_BASE64},{other}")),
        None => (BASE64.encode(raw), ENCODING_BASE64.to_string()),
    }
}

/// Single-byte decode: each byte masked to 7 bits, matching how the AMQP
/// tooling this archiver replaces rendered `ascii` buffers.
fn decode_single_byte(raw: &[u8]) -> String {
    raw.iter().map(|b| char::from(b & 0x7f)).collect()
}

fn decode_utf8(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// UTF-16LE decode; a trailing odd byte is ignored.
fn decode_utf16le(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
