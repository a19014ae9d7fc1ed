//! Page rasterization: turns a laid-out page into an RGB bitmap.

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use tiny_skia::{
    Color, FillRule, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Rect, Transform,
};
use tracing::warn;
use ttf_parser::OutlineBuilder;

use crate::{
    html::decode_data_uri,
    layout::{LayoutEngine, Placed},
    paginate::{Measure, Page},
};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot allocate a {width}x{height} page surface")]
    Surface { width: u32, height: u32 },
    #[error("cannot decode embedded image: {0}")]
    Image(String),
}

/// The rendering collaborator of the export stage.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, page: &Page) -> Result<RgbImage, RenderError>;
}

const TEXT_COLOR: [u8; 3] = [0x11, 0x18, 0x27];
const GREEK_COLOR: [u8; 3] = [0x9C, 0xA3, 0xAF];

/// Paints pages laid out by a [`LayoutEngine`] at `scale` device pixels
/// per layout pixel. Every page is at least `max_height` tall so output
/// pages share one size.
pub struct PageRasterizer {
    layout: Arc<LayoutEngine>,
    scale: f32,
}

impl PageRasterizer {
    pub fn new(layout: Arc<LayoutEngine>, scale: f32) -> Self {
        Self { layout, scale }
    }
}

impl Rasterizer for PageRasterizer {
    fn rasterize(&self, page: &Page) -> Result<RgbImage, RenderError> {
        let metrics = *self.layout.metrics();
        let height = self.layout.measure(page.nodes()).max(metrics.max_height);
        let (width_px, height_px) = ((metrics.width * self.scale).ceil() as u32, (height * self.scale).ceil() as u32);
        let mut pixmap = Pixmap::new(width_px, height_px)
            .ok_or(RenderError::Surface { width: width_px, height: height_px })?;
        pixmap.fill(Color::WHITE);

        let base = Transform::from_scale(self.scale, self.scale);
        let face = self.layout.font().and_then(|bytes| ttf_parser::Face::parse(bytes, 0).ok());
        let mut top = metrics.padding;
        for node in page.nodes() {
            let laid_out = self.layout.layout_node(node);
            for item in &laid_out.items {
                match item {
                    Placed::Text { x, y, font_size, line_height, text } => {
                        let (x, y) = (metrics.padding + x, top + y);
                        match &face {
                            Some(face) => draw_text(&mut pixmap, face, base, x, y, *font_size, *line_height, text),
                            None => draw_greeked(&mut pixmap, &self.layout, base, x, y, *font_size, *line_height, text),
                        }
                    }
                    Placed::Image { x, y, width, height, image } => {
                        let Some(embedded) = node.images.get(*image) else { continue };
                        let Some((_, bytes)) = decode_data_uri(&embedded.src) else {
                            warn!(node = node.index, "Skipping non-embedded image source");
                            continue;
                        };
                        let picture = decode_pixmap(&bytes)?;
                        let sx = width / picture.width() as f32;
                        let sy = height / picture.height() as f32;
                        let transform = base.pre_translate(metrics.padding + x, top + y).pre_scale(sx, sy);
                        let paint = PixmapPaint { quality: FilterQuality::Bilinear, ..PixmapPaint::default() };
                        pixmap.draw_pixmap(0, 0, picture.as_ref(), &paint, transform, None);
                    }
                }
            }
            top += laid_out.height;
        }

        Ok(to_rgb(&pixmap))
    }
}

fn paint_rgb([r, g, b]: [u8; 3]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, 255);
    paint.anti_alias = true;
    paint
}

#[allow(clippy::too_many_arguments)]
fn draw_text(
    pixmap: &mut Pixmap,
    face: &ttf_parser::Face<'_>,
    base: Transform,
    x: f32,
    y: f32,
    font_size: f32,
    line_height: f32,
    text: &str,
) {
    let scale = font_size / face.units_per_em() as f32;
    let ascent = face.ascender() as f32 * scale;
    let descent = -(face.descender() as f32) * scale;
    let half_leading = (font_size * line_height - (ascent + descent)) / 2.0;
    let baseline = y + half_leading + ascent;
    let paint = paint_rgb(TEXT_COLOR);

    let mut pen = x;
    for c in text.chars() {
        let Some(gid) = face.glyph_index(c) else {
            pen += font_size * 0.5;
            continue;
        };
        let mut builder = GlyphPathBuilder::new(pen, baseline, scale);
        if face.outline_glyph(gid, &mut builder).is_some() {
            if let Some(path) = builder.finish() {
                pixmap.fill_path(&path, &paint, FillRule::Winding, base, None);
            }
        }
        pen += face.glyph_hor_advance(gid).map(|a| a as f32 * scale).unwrap_or(font_size * 0.5);
    }
}

/// Without a font each word becomes a grey bar of its measured width.
#[allow(clippy::too_many_arguments)]
fn draw_greeked(
    pixmap: &mut Pixmap,
    layout: &LayoutEngine,
    base: Transform,
    x: f32,
    y: f32,
    font_size: f32,
    line_height: f32,
    text: &str,
) {
    let paint = paint_rgb(GREEK_COLOR);
    let space = layout.text_width(" ", font_size);
    let bar_height = font_size * 0.55;
    let top = y + (font_size * line_height - bar_height) / 2.0;
    let mut pen = x;
    for word in text.split_whitespace() {
        let width = layout.text_width(word, font_size);
        if let Some(rect) = Rect::from_xywh(pen, top, width, bar_height) {
            pixmap.fill_rect(rect, &paint, base, None);
        }
        pen += width + space;
    }
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self { builder: PathBuilder::new(), origin_x, origin_y, scale }
    }

    fn finish(self) -> Option<tiny_skia::Path> {
        self.builder.finish()
    }

    // Font units are y-up, the page is y-down.
    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x, y) = self.point(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x2, y2) = self.point(x2, y2);
        let (x, y) = self.point(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn decode_pixmap(bytes: &[u8]) -> Result<Pixmap, RenderError> {
    let rgba = image::load_from_memory(bytes)
        .map_err(|e| RenderError::Image(e.to_string()))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height).ok_or(RenderError::Surface { width, height })?;
    for (src, dst) in rgba.as_raw().chunks_exact(4).zip(pixmap.data_mut().chunks_exact_mut(4)) {
        let a = src[3];
        dst[0] = premultiply(src[0], a);
        dst[1] = premultiply(src[1], a);
        dst[2] = premultiply(src[2], a);
        dst[3] = a;
    }
    Ok(pixmap)
}

fn premultiply(channel: u8, alpha: u8) -> u8 {
    let prod = channel as u16 * alpha as u16 + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

// The surface is filled opaque white first, so premultiplied RGB is plain RGB.
fn to_rgb(pixmap: &Pixmap) -> RgbImage {
    let rgb: Vec<u8> = pixmap.data().chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect();
    RgbImage::from_raw(pixmap.width(), pixmap.height(), rgb)
        .unwrap_or_else(|| RgbImage::new(pixmap.width(), pixmap.height()))
}
