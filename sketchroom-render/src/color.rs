//! CSS color parsing for stroke and cursor colors.
//!
//! Accepts `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb()`/`rgba()`,
//! `hsl()`/`hsla()`, `transparent`, and a table of common named colors.

use tiny_skia::Color;

/// Straight (non-premultiplied) 8-bit RGBA.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);
    pub const TRANSPARENT: Rgba = Rgba { r: 0, g: 0, b: 0, a: 0 };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_color(self) -> Color {
        Color::from_rgba8(self.r, self.g, self.b, self.a)
    }

    /// Parse a CSS color string. `None` if it isn't one we understand.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim().to_ascii_lowercase();
        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex(hex);
        }
        if let Some(args) = function_args(&s, &["rgba", "rgb"]) {
            return parse_rgb(args);
        }
        if let Some(args) = function_args(&s, &["hsla", "hsl"]) {
            return parse_hsl(args);
        }
        named(&s)
    }

    /// Like [`Rgba::parse`], falling back to black.
    pub fn parse_or_black(input: &str) -> Self {
        Self::parse(input).unwrap_or_else(|| {
            log::debug!("Unparseable color {input:?}, using black");
            Self::BLACK
        })
    }
}

fn function_args<'a>(s: &'a str, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        s.strip_prefix(name)?
            .trim_start()
            .strip_prefix('(')?
            .strip_suffix(')')
    })
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some(Rgba::rgb(nibble(0)?, nibble(1)?, nibble(2)?)),
        4 => Some(Rgba {
            r: nibble(0)?,
            g: nibble(1)?,
            b: nibble(2)?,
            a: nibble(3)?,
        }),
        6 => Some(Rgba::rgb(byte(0)?, byte(2)?, byte(4)?)),
        8 => Some(Rgba {
            r: byte(0)?,
            g: byte(2)?,
            b: byte(4)?,
            a: byte(6)?,
        }),
        _ => None,
    }
}

/// Comma or whitespace separated, with an optional `/ alpha`.
fn split_args(args: &str) -> Vec<&str> {
    args.split(|c: char| c == ',' || c == '/' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_channel(part: &str) -> Option<u8> {
    let value = if let Some(pct) = part.strip_suffix('%') {
        pct.parse::<f32>().ok()? * 2.55
    } else {
        part.parse::<f32>().ok()?
    };
    value.is_finite().then(|| value.round().clamp(0.0, 255.0) as u8)
}

fn parse_alpha(part: Option<&&str>) -> Option<u8> {
    let Some(part) = part else {
        return Some(255);
    };
    let value = if let Some(pct) = part.strip_suffix('%') {
        pct.parse::<f32>().ok()? / 100.0
    } else {
        part.parse::<f32>().ok()?
    };
    value
        .is_finite()
        .then(|| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn parse_rgb(args: &str) -> Option<Rgba> {
    let parts = split_args(args);
    if !(3..=4).contains(&parts.len()) {
        return None;
    }
    Some(Rgba {
        r: parse_channel(parts[0])?,
        g: parse_channel(parts[1])?,
        b: parse_channel(parts[2])?,
        a: parse_alpha(parts.get(3))?,
    })
}

fn parse_hsl(args: &str) -> Option<Rgba> {
    let parts = split_args(args);
    if !(3..=4).contains(&parts.len()) {
        return None;
    }
    let hue = parts[0].trim_end_matches("deg").parse::<f32>().ok()?;
    let sat = parts[1].strip_suffix('%')?.parse::<f32>().ok()? / 100.0;
    let light = parts[2].strip_suffix('%')?.parse::<f32>().ok()? / 100.0;
    if !(hue.is_finite() && sat.is_finite() && light.is_finite()) {
        return None;
    }
    let (sat, light) = (sat.clamp(0.0, 1.0), light.clamp(0.0, 1.0));
    let hue = hue.rem_euclid(360.0) / 30.0;

    let a = sat * light.min(1.0 - light);
    let channel = |n: f32| {
        let k = (n + hue) % 12.0;
        let v = light - a * (k - 3.0).min(9.0 - k).clamp(-1.0, 1.0);
        (v * 255.0).round() as u8
    };
    Some(Rgba {
        r: channel(0.0),
        g: channel(8.0),
        b: channel(4.0),
        a: parse_alpha(parts.get(3))?,
    })
}

fn named(name: &str) -> Option<Rgba> {
    let rgb = match name {
        "transparent" => return Some(Rgba::TRANSPARENT),
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "lime" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "cyan" | "aqua" => (0, 255, 255),
        "magenta" | "fuchsia" => (255, 0, 255),
        "gray" | "grey" => (128, 128, 128),
        "silver" => (192, 192, 192),
        "maroon" => (128, 0, 0),
        "olive" => (128, 128, 0),
        "purple" => (128, 0, 128),
        "teal" => (0, 128, 128),
        "navy" => (0, 0, 128),
        "orange" => (255, 165, 0),
        "pink" => (255, 192, 203),
        "brown" => (165, 42, 42),
        "gold" => (255, 215, 0),
        "indigo" => (75, 0, 130),
        "violet" => (238, 130, 238),
        "coral" => (255, 127, 80),
        "crimson" => (220, 20, 60),
        "tomato" => (255, 99, 71),
        "turquoise" => (64, 224, 208),
        "royalblue" => (65, 105, 225),
        "dodgerblue" => (30, 144, 255),
        "hotpink" => (255, 105, 180),
        _ => return None,
    };
    Some(Rgba::rgb(rgb.0, rgb.1, rgb.2))
}
