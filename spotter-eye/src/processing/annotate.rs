//! Draw detections onto an image: class-colored boxes with a label band

use crate::detector::DetectedObject;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const PALETTE: [u32; 20] = [
    0xFF3838, 0xFF9D97, 0xFF701F, 0xFFB21D, 0xCFD231, 0x48F90A, 0x92CC17, 0x3DDB86, 0x1A9334,
    0x00D4BB, 0x2C99A8, 0x00C2FF, 0x344593, 0x6473FF, 0x0018EC, 0x8438FF, 0x520085, 0xCB38FF,
    0xFF95C8, 0xFF37C7,
];

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const LABEL_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Box color for a class id
pub fn color_for(class_id: usize) -> Rgb<u8> {
    let hex = PALETTE[class_id % PALETTE.len()];
    Rgb([(hex >> 16) as u8, (hex >> 8) as u8, hex as u8])
}

/// Label text drawn above a box, e.g. `person 0.87`
pub fn label_for(detection: &DetectedObject) -> String {
    format!("{} {:.2}", detection.class_name, detection.confidence)
}

/// Box line width for an image of the given size (never below 2px)
pub fn line_width(width: u32, height: u32) -> i32 {
    (((width + height) as f32 / 2.0 * 0.003).round() as i32).max(2)
}

/// Draw every detection onto `image` in place
pub fn annotate(image: &mut RgbImage, detections: &[DetectedObject]) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let lw = line_width(width, height);
    let scale = (lw / 2).max(1);

    for detection in detections {
        let (x, y, w, h) = detection.bbox;
        let left = (x.round() as i32).clamp(0, width as i32 - 1);
        let top = (y.round() as i32).clamp(0, height as i32 - 1);
        let right = ((x + w).round() as i32).clamp(0, width as i32);
        let bottom = ((y + h).round() as i32).clamp(0, height as i32);
        let color = color_for(detection.class_id);

        for i in 0..lw {
            let rw = right - left - 2 * i;
            let rh = bottom - top - 2 * i;
            if rw <= 0 || rh <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                image,
                Rect::at(left + i, top + i).of_size(rw as u32, rh as u32),
                color,
            );
        }

        draw_label(image, left, top, &label_for(detection), color, scale);
    }
}

fn draw_label(image: &mut RgbImage, left: i32, top: i32, text: &str, band: Rgb<u8>, scale: i32) {
    let chars = text.chars().count() as i32;
    let band_w = chars * (GLYPH_WIDTH + 1) * scale + 2 * LABEL_PADDING;
    let band_h = GLYPH_HEIGHT * scale + 2 * LABEL_PADDING;

    // Above the box when there is room, inside its top edge otherwise
    let band_top = if top >= band_h { top - band_h } else { top };

    draw_filled_rect_mut(
        image,
        Rect::at(left, band_top).of_size(band_w as u32, band_h as u32),
        band,
    );

    let mut cursor = left + LABEL_PADDING;
    let baseline = band_top + LABEL_PADDING;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(rows) = glyph(ch) {
            draw_glyph(image, cursor, baseline, &rows, scale);
        }
        cursor += (GLYPH_WIDTH + 1) * scale;
    }
}

fn draw_glyph(image: &mut RgbImage, x: i32, y: i32, rows: &[u8; 7], scale: i32) {
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                draw_filled_rect_mut(
                    image,
                    Rect::at(x + col * scale, y + row as i32 * scale).of_size(scale as u32, scale as u32),
                    TEXT_COLOR,
                );
            }
        }
    }
}

/// 5x7 bitmap for the characters a label can contain
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '%' => [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::COCO_CLASSES;

    fn detection(class_id: usize, bbox: (f32, f32, f32, f32)) -> DetectedObject {
        DetectedObject {
            class_id,
            class_name: "person".to_string(),
            confidence: 0.87,
            bbox,
        }
    }

    #[test]
    fn test_palette_wraps() {
        assert_eq!(color_for(0), Rgb([0xFF, 0x38, 0x38]));
        assert_eq!(color_for(11), Rgb([0x00, 0xC2, 0xFF]));
        assert_eq!(color_for(20), color_for(0));
    }

    #[test]
    fn test_label_format() {
        assert_eq!(label_for(&detection(0, (0.0, 0.0, 1.0, 1.0))), "person 0.87");
    }

    #[test]
    fn test_line_width_minimum() {
        assert_eq!(line_width(100, 100), 2);
        assert_eq!(line_width(2000, 2000), 6);
    }

    #[test]
    fn test_annotate_draws_box_outline() {
        let mut image = RgbImage::new(100, 100);
        annotate(&mut image, &[detection(0, (20.0, 30.0, 40.0, 30.0))]);

        let color = color_for(0);
        assert_eq!(image.get_pixel(20, 45), &color);
        assert_eq!(image.get_pixel(21, 45), &color);
        assert_eq!(image.get_pixel(59, 45), &color);
        // Interior untouched
        assert_eq!(image.get_pixel(40, 45), &Rgb([0, 0, 0]));
        // Label band sits above the box
        assert_eq!(image.get_pixel(20, 20), &color);
    }

    #[test]
    fn test_annotate_without_detections_is_noop() {
        let mut image = RgbImage::from_pixel(32, 32, Rgb([9, 9, 9]));
        let before = image.clone();
        annotate(&mut image, &[]);
        assert_eq!(image, before);
    }

    #[test]
    fn test_annotate_tolerates_out_of_bounds_boxes() {
        let mut image = RgbImage::new(50, 50);
        annotate(
            &mut image,
            &[
                detection(3, (-10.0, -10.0, 200.0, 200.0)),
                detection(4, (49.5, 49.5, 0.0, 0.0)),
            ],
        );
        assert_eq!(image.get_pixel(0, 25), &color_for(3));
    }

    #[test]
    fn test_glyphs_cover_coco_labels() {
        for name in COCO_CLASSES {
            for ch in label_for(&DetectedObject {
                class_id: 0,
                class_name: name.to_string(),
                confidence: 0.5,
                bbox: (0.0, 0.0, 1.0, 1.0),
            })
            .chars()
            .flat_map(|c| c.to_uppercase())
            {
                assert!(glyph(ch).is_some(), "missing glyph for {:?}", ch);
            }
        }
    }
}
