//! 页码标签绘制
//!
//! 只需要 `PAGE_<n>`，用内置的 5x7 点阵字形绘制

use image::{Rgb, RgbImage};

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// 每行 5 位，最高位在最左
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        _ => return None,
    };
    Some(rows)
}

/// 字形放大倍数，随单元宽度等比例变化
pub fn label_scale(tile_width: u32) -> u32 {
    (tile_width / 150).max(1)
}

/// 标签框尺寸 (宽, 高)，含内边距
pub fn label_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    let padding = 2 * scale;
    let text_w = if chars == 0 {
        0
    } else {
        chars * (GLYPH_W + 1) * scale - scale
    };
    (text_w + 2 * padding, GLYPH_H * scale + 2 * padding)
}

fn fill_rect(canvas: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(canvas.width());
    let y_end = (y + h).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            canvas.put_pixel(px, py, color);
        }
    }
}

/// 在 (x, y) 处绘制白底黑框黑字的标签，超出画布的部分被裁掉
pub fn draw_label(canvas: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32) {
    let scale = scale.max(1);
    let (box_w, box_h) = label_size(text, scale);
    let border = (scale / 2).max(1);
    let padding = 2 * scale;

    fill_rect(canvas, x, y, box_w, box_h, BLACK);
    fill_rect(
        canvas,
        x + border,
        y + border,
        box_w.saturating_sub(2 * border),
        box_h.saturating_sub(2 * border),
        WHITE,
    );

    let mut cursor_x = x + padding;
    let top = y + padding;
    for c in text.chars() {
        if let Some(rows) = glyph(c.to_ascii_uppercase()) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                        fill_rect(
                            canvas,
                            cursor_x + col * scale,
                            top + row as u32 * scale,
                            scale,
                            scale,
                            BLACK,
                        );
                    }
                }
            }
        }
        cursor_x += (GLYPH_W + 1) * scale;
    }
}
