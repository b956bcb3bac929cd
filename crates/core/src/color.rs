//! Deterministic peer colors
//!
//! A peer's color is derived from its display name so that the same name
//! always maps to the same palette entry, across reconnects and across
//! implementations of the editor plugin.

/// Palette shared with the editor plugin
pub const PALETTE: [&str; 8] = [
    "#ff7675", "#74b9ff", "#55efc4", "#ffeaa7", "#a29bfe", "#fd79a8", "#81ecec", "#fab1a0",
];

/// Name hashed when the display name is empty
const FALLBACK_NAME: &str = "user";

/// Hash a name the way the editor does: `h = h * 31 + code` over UTF-16
/// code units, wrapping at 32 bits.
pub fn name_hash(name: &str) -> u32 {
    let name = if name.is_empty() { FALLBACK_NAME } else { name };
    name.encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

/// Pick the palette color for a display name
pub fn color_from_name(name: &str) -> &'static str {
    PALETTE[name_hash(name) as usize % PALETTE.len()]
}
