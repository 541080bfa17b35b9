//! Picasa's `rect64(...)` face rectangle encoding.
//!
//! The payload is up to 16 hex digits; Picasa drops leading zeros. After
//! left-padding to 16 digits it holds four big-endian 16-bit fixed-point
//! fractions (`left`, `top`, `right`, `bottom`), each `value / 65536`.

use serde::Serialize;

/// Fixed-point denominator. Part of the on-disk contract, never change.
pub const RECT64_DENOMINATOR: f64 = 65536.0;

const PREFIX: &str = "rect64(";

/// Normalized rectangle, all edges in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect64 {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect64 {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Decode one 16-bit fixed-point fraction.
pub fn parse_hexfloat(data: &str) -> Result<f64, String> {
    let value = u16::from_str_radix(data, 16).map_err(|_| format!("invalid hex value {data:?}"))?;
    Ok((value as f64 / RECT64_DENOMINATOR).clamp(0.0, 1.0))
}

/// Parse `rect64(HEX)` into a normalized rectangle.
pub fn parse_rect64(data: &str) -> Result<Rect64, String> {
    let inner = data
        .trim()
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| format!("expected rect64(...), got {data:?}"))?;

    if inner.is_empty() || inner.len() > 16 {
        return Err(format!("rect64 payload must be 1-16 hex digits, got {inner:?}"));
    }
    if !inner.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("rect64 payload is not hex: {inner:?}"));
    }

    let padded = format!("{inner:0>16}");
    let left = parse_hexfloat(&padded[0..4])?;
    let top = parse_hexfloat(&padded[4..8])?;
    let right = parse_hexfloat(&padded[8..12])?;
    let bottom = parse_hexfloat(&padded[12..16])?;

    if right < left || bottom < top {
        return Err(format!("rect64 has inverted edges: {data}"));
    }

    Ok(Rect64 { left, top, right, bottom })
}
