//! Deterministic node colours.
//!
//! A node's colour is a pure function of its identity key: BLAKE3 of the
//! key bytes picks a hue, while saturation and lightness stay inside a
//! fixed band so every node reads well on the same background.

use crate::identity::IdentityKey;

/// Colour used for placeholder nodes and anything without a usable id.
pub const NEUTRAL_COLOR: &str = "#9ca3af";

/// Colour used for edges.
pub const EDGE_COLOR: &str = "#4b5563";

const SATURATION: u8 = 65;
const LIGHTNESS_MIN: u8 = 50;
const LIGHTNESS_SPAN: u8 = 15;

/// Stable colour for `id`, as a CSS `hsl()` string.
pub fn node_color(id: &IdentityKey) -> String {
    if id.as_str().is_empty() {
        return NEUTRAL_COLOR.to_string();
    }
    let hash = blake3::hash(id.as_str().as_bytes());
    let bytes = hash.as_bytes();
    let hue = u16::from_be_bytes([bytes[0], bytes[1]]) % 360;
    let lightness = LIGHTNESS_MIN + bytes[2] % LIGHTNESS_SPAN;
    format!("hsl({hue}, {SATURATION}%, {lightness}%)")
}
