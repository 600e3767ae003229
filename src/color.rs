//! Color type and the RRGGBB hex codec.
//!
//! The twin stores the strip color as six hex digits, two per channel
//! (`"FF0000"` is full red, `"000000"` is off). [`decode`] turns that text
//! into a [`Color`], [`encode`] goes back the other way.
//!
//! ## Rust concepts
//! - `FromStr` and `Display` so `"00FF00".parse::<Color>()` and
//!   `color.to_string()` just work
//! - `u8::from_str_radix` for base-16 parsing
//! - Hand-written serde impls that (de)serialize through the hex text

use crate::error::InvalidColorFormat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One RGB color, 8 bits per channel.
///
/// Decoupled from the hardware crate so color logic can be tested on any
/// machine. At the driver boundary it converts into `smart_leds::RGB8`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// All channels off. This is what the `Off` command writes.
    pub const OFF: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Apply brightness scaling (0-100) to this color.
    pub fn apply_brightness(self, brightness: u8) -> Self {
        if brightness >= 100 {
            return self;
        }
        Self {
            r: ((self.r as u16 * brightness as u16) / 100) as u8,
            g: ((self.g as u16 * brightness as u16) / 100) as u8,
            b: ((self.b as u16 * brightness as u16) / 100) as u8,
        }
    }
}

/// Parse six hex digits (`RRGGBB`, either case) into a [`Color`].
///
/// No trimming and no `#` prefix: the twin and the `On` command both carry
/// the bare six digits.
pub fn decode(text: &str) -> Result<Color, InvalidColorFormat> {
    let len = text.chars().count();
    if len != 6 {
        return Err(InvalidColorFormat::WrongLength(len));
    }
    if let Some(bad) = text.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(InvalidColorFormat::NonHexDigit(bad));
    }

    // All six chars are ASCII now, so byte offsets are char offsets.
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&text[range], 16).map_err(|_| InvalidColorFormat::WrongLength(len))
    };

    Ok(Color::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

/// Format a [`Color`] as six uppercase hex digits.
pub fn encode(color: Color) -> String {
    format!("{:02X}{:02X}{:02X}", color.r, color.g, color.b)
}

impl FromStr for Color {
    type Err = InvalidColorFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(*self))
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(feature = "hardware")]
impl From<Color> for smart_leds::RGB8 {
    fn from(c: Color) -> Self {
        smart_leds::RGB8::new(c.r, c.g, c.b)
    }
}
