use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use super::font::{self, GLYPH_HEIGHT};
use super::{OverlayShape, TAG_CHAR_WIDTH};

/// Something the overlay renderer can draw on.
pub trait OverlaySurface {
    /// Display size in pixels; box coordinates are scaled into this space.
    fn size(&self) -> (u32, u32);
    fn clear(&mut self);
    fn draw(&mut self, shape: &OverlayShape);
}

/// Retained shape list for a host-drawn transparent layer over an external player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeLayer {
    width: u32,
    height: u32,
    shapes: Vec<OverlayShape>,
}

impl ShapeLayer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            shapes: Vec::new(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn shapes(&self) -> &[OverlayShape] {
        &self.shapes
    }
}

impl OverlaySurface for ShapeLayer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.shapes.clear();
    }

    fn draw(&mut self, shape: &OverlayShape) {
        self.shapes.push(shape.clone());
    }
}

/// Rasterizes shapes straight onto a decoded frame.
///
/// `clear` is a no-op: every frame arrives freshly decoded.
pub struct ImageSurface<'a> {
    image: &'a mut RgbaImage,
}

impl<'a> ImageSurface<'a> {
    pub fn new(image: &'a mut RgbaImage) -> Self {
        Self { image }
    }
}

// Far beyond any display; keeps every derived coordinate inside i32.
const MAX_PIXEL_COORD: f32 = (1 << 24) as f32;
// Edges pushed this far off canvas stay invisible at any stroke width we draw.
const OFF_CANVAS_MARGIN: i32 = 64;

fn to_pixel(v: f32) -> i32 {
    v.round().clamp(-MAX_PIXEL_COORD, MAX_PIXEL_COORD) as i32
}

/// Pixel rect for a box, clipped to the canvas plus a margin so line drawing
/// never walks far outside the image.
fn pixel_rect(x1: f32, y1: f32, x2: f32, y2: f32, (w, h): (u32, u32)) -> Rect {
    let clip_x = |v: f32| to_pixel(v).clamp(-OFF_CANVAS_MARGIN, w as i32 + OFF_CANVAS_MARGIN);
    let clip_y = |v: f32| to_pixel(v).clamp(-OFF_CANVAS_MARGIN, h as i32 + OFF_CANVAS_MARGIN);
    let (left, top) = (clip_x(x1), clip_y(y1));
    let width = clip_x(x2).saturating_sub(left).max(1) as u32;
    let height = clip_y(y2).saturating_sub(top).max(1) as u32;
    Rect::at(left, top).of_size(width, height)
}

impl OverlaySurface for ImageSurface<'_> {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn clear(&mut self) {}

    fn draw(&mut self, shape: &OverlayShape) {
        let [r, g, b] = shape.color;
        let color = Rgba([r, g, b, 255]);
        let bbox = &shape.bbox;
        let canvas = self.image.dimensions();
        let outline = pixel_rect(bbox.x1, bbox.y1, bbox.x2, bbox.y2, canvas);
        for offset in 0..shape.stroke_width as i32 {
            let inset_w = outline.width() as i32 - 2 * offset;
            let inset_h = outline.height() as i32 - 2 * offset;
            if inset_w < 1 || inset_h < 1 {
                break;
            }
            let rect = Rect::at(outline.left() + offset, outline.top() + offset)
                .of_size(inset_w as u32, inset_h as u32);
            draw_hollow_rect_mut(&mut *self.image, rect, color);
        }

        if let Some(tag) = &shape.label {
            let t = &tag.rect;
            let bg = pixel_rect(t.x1, t.y1, t.x2, t.y2, canvas);
            draw_filled_rect_mut(&mut *self.image, bg, color);
            // Text is placed from the unclipped tag so it scrolls off-canvas with it.
            let (text_x, top) = (to_pixel(t.x1), to_pixel(t.y1));
            let tag_height = to_pixel(t.y2).saturating_sub(top).max(1);
            let text_y = top.saturating_add((tag_height - GLYPH_HEIGHT) / 2);
            font::draw_text(
                self.image,
                &tag.text,
                text_x.saturating_add(1),
                text_y,
                TAG_CHAR_WIDTH as i32,
                Rgba([255, 255, 255, 255]),
            );
        }
    }
}
