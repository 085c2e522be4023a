//! Bitmap decode, box drawing and PNG encoding

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{ColorType, ImageEncoder, Pixel, Rgba, RgbaImage};

use crate::analyzer::{BoundingBox, DetectedObject};
use crate::error::{DecodeError, EncodeError};

/// Red at alpha 70/255 (~27%)
pub const FILL_COLOR: Rgba<u8> = Rgba([255, 0, 0, 70]);
pub const STROKE_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const STROKE_WIDTH: u32 = 2;

/// Image operations the upload pipeline depends on
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, DecodeError>;

    /// Alpha-blend `color` over every pixel inside `rect`.
    fn draw_filled_rect(&self, canvas: &mut RgbaImage, rect: BoundingBox, color: Rgba<u8>);

    /// Outline `rect` with a stroke of `width` pixels centred on its edges.
    fn draw_stroked_rect(
        &self,
        canvas: &mut RgbaImage,
        rect: BoundingBox,
        color: Rgba<u8>,
        width: u32,
    );

    /// Shrink to fit a `max_side` square, keeping the aspect ratio. Never upscales.
    fn resize_to_fit(&self, canvas: RgbaImage, max_side: u32) -> RgbaImage;

    fn encode_png(&self, canvas: &RgbaImage) -> Result<Vec<u8>, EncodeError>;
}

/// `ImageCodec` backed by the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterCodec;

/// Half-open pixel span `[x0, x1) x [y0, y1)` clipped to the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Span {
    fn clipped(left: i64, top: i64, right: i64, bottom: i64, canvas: &RgbaImage) -> Option<Span> {
        let (w, h) = (canvas.width() as i64, canvas.height() as i64);
        let x0 = left.clamp(0, w);
        let y0 = top.clamp(0, h);
        let x1 = right.clamp(0, w);
        let y1 = bottom.clamp(0, h);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(Span {
            x0: x0 as u32,
            y0: y0 as u32,
            x1: x1 as u32,
            y1: y1 as u32,
        })
    }

    fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

fn edges(rect: BoundingBox) -> (i64, i64, i64, i64) {
    let left = rect.x as i64;
    let top = rect.y as i64;
    (left, top, left + rect.width as i64, top + rect.height as i64)
}

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
        let format = image::guess_format(bytes).map_err(|_| DecodeError::UnsupportedFormat)?;
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| DecodeError::DecodeFailed(e.to_string()))?;
        Ok(img.into_rgba8())
    }

    fn draw_filled_rect(&self, canvas: &mut RgbaImage, rect: BoundingBox, color: Rgba<u8>) {
        let (left, top, right, bottom) = edges(rect);
        let Some(span) = Span::clipped(left, top, right, bottom, canvas) else {
            return;
        };
        for y in span.y0..span.y1 {
            for x in span.x0..span.x1 {
                canvas.get_pixel_mut(x, y).blend(&color);
            }
        }
    }

    fn draw_stroked_rect(
        &self,
        canvas: &mut RgbaImage,
        rect: BoundingBox,
        color: Rgba<u8>,
        width: u32,
    ) {
        if width == 0 {
            return;
        }
        let (left, top, right, bottom) = edges(rect);
        let outside = (width / 2) as i64;
        let inside = width as i64 - outside;

        let Some(outer) = Span::clipped(
            left - outside,
            top - outside,
            right + inside,
            bottom + inside,
            canvas,
        ) else {
            return;
        };
        let inner = Span::clipped(
            left + inside,
            top + inside,
            right - outside,
            bottom - outside,
            canvas,
        );

        for y in outer.y0..outer.y1 {
            for x in outer.x0..outer.x1 {
                if inner.is_some_and(|hole| hole.contains(x, y)) {
                    continue;
                }
                canvas.get_pixel_mut(x, y).blend(&color);
            }
        }
    }

    fn resize_to_fit(&self, canvas: RgbaImage, max_side: u32) -> RgbaImage {
        let (w, h) = canvas.dimensions();
        if max_side == 0 || (w <= max_side && h <= max_side) {
            return canvas;
        }
        let scale = max_side as f64 / w.max(h) as f64;
        let nw = ((w as f64 * scale).round() as u32).max(1);
        let nh = ((h as f64 * scale).round() as u32).max(1);
        imageops::resize(&canvas, nw, nh, FilterType::Lanczos3)
    }

    fn encode_png(&self, canvas: &RgbaImage) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive)
            .write_image(
                canvas.as_raw(),
                canvas.width(),
                canvas.height(),
                ColorType::Rgba8,
            )
            .map_err(|e| EncodeError(e.to_string()))?;
        Ok(out)
    }
}

/// Draw a translucent fill and a solid outline for every detected object.
pub fn annotate(codec: &dyn ImageCodec, canvas: &mut RgbaImage, objects: &[DetectedObject]) {
    for object in objects {
        codec.draw_filled_rect(canvas, object.bounding_box, FILL_COLOR);
        codec.draw_stroked_rect(canvas, object.bounding_box, STROKE_COLOR, STROKE_WIDTH);
    }
}
