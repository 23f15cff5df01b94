//! Draws status icons for each `IconStyle`.

use super::bitmap::{Bitmap, Rgba};
use super::glyphs::{draw_number, number_width, GLYPH_HEIGHT};
use super::key::RenderKey;
use super::Appearance;
use crate::profiles::IconStyle;

pub const ICON_SIZE: u32 = 22;

pub const GREEN: Rgba = [76, 175, 80, 255];
pub const AMBER: Rgba = [255, 152, 0, 255];
pub const RED: Rgba = [244, 67, 54, 255];
pub const TRACK: Rgba = [117, 117, 117, 255];

const DIGIT_SCALE: u32 = 2;

/// Severity color for a used percentage.
pub fn severity_color(used_percent: u8) -> Rgba {
    match used_percent {
        0..=74 => GREEN,
        75..=89 => AMBER,
        _ => RED,
    }
}

fn foreground(appearance: Appearance) -> Rgba {
    match appearance {
        Appearance::Light => [0, 0, 0, 255],
        Appearance::Dark => [255, 255, 255, 255],
    }
}

struct Palette {
    fill: Rgba,
    track: Rgba,
    outline: Rgba,
}

impl Palette {
    fn for_key(key: &RenderKey) -> Self {
        let fg = foreground(key.appearance);
        if key.monochrome {
            Self {
                fill: fg,
                track: [fg[0], fg[1], fg[2], 80],
                outline: fg,
            }
        } else {
            Self {
                fill: severity_color(key.used_percent()),
                track: TRACK,
                outline: fg,
            }
        }
    }
}

/// Renders the icon described by `key`.
pub fn paint(key: &RenderKey) -> Bitmap {
    let mut bitmap = Bitmap::new(ICON_SIZE, ICON_SIZE);
    let palette = Palette::for_key(key);
    let fraction = f64::from(key.shown_percent().min(100)) / 100.0;
    match key.style {
        IconStyle::Battery => battery(&mut bitmap, fraction, &palette),
        IconStyle::Bar => bar(&mut bitmap, fraction, &palette),
        IconStyle::Ring => ring(&mut bitmap, fraction, &palette),
        IconStyle::Percentage => {
            let value = u32::from(key.shown_percent());
            let width = number_width(value, DIGIT_SCALE);
            let x = ICON_SIZE.saturating_sub(width) / 2;
            let y = (ICON_SIZE - GLYPH_HEIGHT * DIGIT_SCALE) / 2;
            draw_number(&mut bitmap, value, x, y, DIGIT_SCALE, palette.fill);
        }
    }
    bitmap
}

fn filled_width(span: u32, fraction: f64) -> u32 {
    (f64::from(span) * fraction).round() as u32
}

fn battery(bitmap: &mut Bitmap, fraction: f64, palette: &Palette) {
    bitmap.stroke_rect(1, 6, 19, 16, palette.outline);
    bitmap.fill_rect(19, 9, 21, 13, palette.outline);
    // Interior is 14x6 with a one-pixel gap inside the outline.
    bitmap.fill_rect(3, 8, 17, 14, palette.track);
    let width = filled_width(14, fraction);
    bitmap.fill_rect(3, 8, 3 + width, 14, palette.fill);
}

fn bar(bitmap: &mut Bitmap, fraction: f64, palette: &Palette) {
    bitmap.fill_rect(1, 9, 21, 13, palette.track);
    let width = filled_width(20, fraction);
    bitmap.fill_rect(1, 9, 1 + width, 13, palette.fill);
}

fn ring(bitmap: &mut Bitmap, fraction: f64, palette: &Palette) {
    let center = f64::from(ICON_SIZE) / 2.0;
    let (outer, inner) = (10.0, 7.0);
    for y in 0..ICON_SIZE {
        for x in 0..ICON_SIZE {
            let dx = f64::from(x) + 0.5 - center;
            let dy = f64::from(y) + 0.5 - center;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > outer || dist < inner {
                continue;
            }
            // Clockwise from twelve o'clock.
            let mut angle = dx.atan2(-dy);
            if angle < 0.0 {
                angle += std::f64::consts::TAU;
            }
            let color = if angle / std::f64::consts::TAU < fraction {
                palette.fill
            } else {
                palette.track
            };
            bitmap.put(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::DisplayConfig;

    fn key(percent: f64, style: IconStyle, monochrome: bool, appearance: Appearance) -> RenderKey {
        let display = DisplayConfig {
            style,
            monochrome,
            ..DisplayConfig::default()
        };
        RenderKey::new(percent, appearance, &display)
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(severity_color(0), GREEN);
        assert_eq!(severity_color(74), GREEN);
        assert_eq!(severity_color(75), AMBER);
        assert_eq!(severity_color(89), AMBER);
        assert_eq!(severity_color(90), RED);
        assert_eq!(severity_color(100), RED);
    }

    #[test]
    fn test_bar_fill_is_proportional() {
        let half = paint(&key(50.0, IconStyle::Bar, false, Appearance::Light));
        assert_eq!(half.count_pixels(GREEN), 10 * 4);
        assert_eq!(half.count_pixels(TRACK), 10 * 4);

        let full = paint(&key(100.0, IconStyle::Bar, false, Appearance::Light));
        assert_eq!(full.count_pixels(RED), 20 * 4);
        assert_eq!(full.count_pixels(TRACK), 0);
    }

    #[test]
    fn test_battery_has_outline_and_fill() {
        let icon = paint(&key(80.0, IconStyle::Battery, false, Appearance::Dark));
        assert_eq!(icon.pixel(1, 6), Some([255, 255, 255, 255]));
        assert_eq!(icon.pixel(3, 8), Some(AMBER));
        assert_eq!(icon.pixel(16, 13), Some(TRACK));
    }

    #[test]
    fn test_monochrome_uses_foreground_only() {
        let icon = paint(&key(95.0, IconStyle::Ring, true, Appearance::Light));
        assert_eq!(icon.count_pixels(RED), 0);
        assert!(icon.count_pixels([0, 0, 0, 255]) > 0);
    }

    #[test]
    fn test_ring_empty_and_full() {
        let empty = paint(&key(0.0, IconStyle::Ring, false, Appearance::Light));
        assert_eq!(empty.count_pixels(GREEN), 0);
        assert!(empty.count_pixels(TRACK) > 0);

        let full = paint(&key(100.0, IconStyle::Ring, false, Appearance::Light));
        assert_eq!(full.count_pixels(TRACK), 0);
        assert!(full.count_pixels(RED) > 0);
    }

    #[test]
    fn test_percentage_draws_digits() {
        let icon = paint(&key(42.0, IconStyle::Percentage, false, Appearance::Light));
        assert_eq!(icon.count_pixels(GREEN), (9 + 11) * 4);
    }
}
