//! Match overlay: outline plus a filled label bar along the bottom edge.

use crate::types::BoundingBox;
use image::{Rgb, RgbImage};

pub const MATCH_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const OUTLINE_THICKNESS: i64 = 2;
const LABEL_BAR_HEIGHT: i64 = 35;

/// Pixel rectangle, inclusive of `x0,y0`, exclusive of `x1,y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl Rect {
    fn from_bbox(b: &BoundingBox) -> Self {
        Self {
            x0: b.x.round() as i64,
            y0: b.y.round() as i64,
            x1: (b.x + b.width).round() as i64,
            y1: (b.y + b.height).round() as i64,
        }
    }
}

fn fill(img: &mut RgbImage, r: Rect, colour: Rgb<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    for y in r.y0.max(0)..r.y1.min(h) {
        for x in r.x0.max(0)..r.x1.min(w) {
            img.put_pixel(x as u32, y as u32, colour);
        }
    }
}

/// Draw a rectangle outline around `face`.
pub fn draw_outline(img: &mut RgbImage, face: &BoundingBox, colour: Rgb<u8>) {
    let r = Rect::from_bbox(face);
    let t = OUTLINE_THICKNESS;
    fill(img, Rect { y1: r.y0 + t, ..r }, colour);
    fill(img, Rect { y0: r.y1 - t, ..r }, colour);
    fill(img, Rect { x1: r.x0 + t, ..r }, colour);
    fill(img, Rect { x0: r.x1 - t, ..r }, colour);
}

/// Outline plus filled label bar for a recognised face.
///
/// The bar carries no text; callers report the name alongside (log line or console).
pub fn draw_match(img: &mut RgbImage, face: &BoundingBox) {
    draw_outline(img, face, MATCH_COLOUR);
    let r = Rect::from_bbox(face);
    fill(
        img,
        Rect {
            y0: r.y1 - LABEL_BAR_HEIGHT,
            ..r
        },
        MATCH_COLOUR,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 1.0,
            landmarks: None,
        }
    }

    #[test]
    fn test_outline_leaves_interior() {
        let mut img = RgbImage::new(100, 100);
        draw_outline(&mut img, &face(10.0, 10.0, 50.0, 50.0), MATCH_COLOUR);
        assert_eq!(*img.get_pixel(10, 10), MATCH_COLOUR);
        assert_eq!(*img.get_pixel(59, 30), MATCH_COLOUR);
        assert_eq!(*img.get_pixel(35, 35), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(60, 60), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_match_fills_label_bar() {
        let mut img = RgbImage::new(200, 200);
        draw_match(&mut img, &face(20.0, 20.0, 100.0, 100.0));
        // Bar spans the bottom 35 rows of the box.
        assert_eq!(*img.get_pixel(70, 110), MATCH_COLOUR);
        assert_eq!(*img.get_pixel(70, 86), MATCH_COLOUR);
        assert_eq!(*img.get_pixel(70, 80), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_clipped_to_frame() {
        let mut img = RgbImage::new(40, 40);
        draw_match(&mut img, &face(-30.0, -30.0, 100.0, 100.0));
        assert_eq!(*img.get_pixel(39, 39), MATCH_COLOUR);
    }
}
