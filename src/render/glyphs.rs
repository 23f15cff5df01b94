use super::bitmap::{Bitmap, Rgba};

/// 3x5 digit bitmaps for 0-9; each row is a byte, low three bits are pixels.
const DIGIT_BITMAPS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b001, 0b001, 0b001], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];

const GLYPH_WIDTH: u32 = 3;
pub const GLYPH_HEIGHT: u32 = 5;

/// Draws one digit with its top-left corner at `(x, y)`, each pixel `scale` wide.
pub fn draw_digit(bitmap: &mut Bitmap, digit: u8, x: u32, y: u32, scale: u32, color: Rgba) {
    let rows = &DIGIT_BITMAPS[usize::from(digit.min(9))];
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                let px = x + col * scale;
                let py = y + row as u32 * scale;
                bitmap.fill_rect(px, py, px + scale, py + scale, color);
            }
        }
    }
}

/// Width in pixels of `value` drawn by `draw_number`.
pub fn number_width(value: u32, scale: u32) -> u32 {
    let digits = value.to_string().len() as u32;
    digits * GLYPH_WIDTH * scale + digits.saturating_sub(1) * scale
}

/// Draws `value` left to right starting at `(x, y)`.
pub fn draw_number(bitmap: &mut Bitmap, value: u32, x: u32, y: u32, scale: u32, color: Rgba) {
    let mut cursor = x;
    for ch in value.to_string().chars() {
        if let Some(digit) = ch.to_digit(10) {
            draw_digit(bitmap, digit as u8, cursor, y, scale, color);
        }
        cursor += (GLYPH_WIDTH + 1) * scale;
    }
}
