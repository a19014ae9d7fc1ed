//! Export stage: one bitmap per page, each placed at the top margin of its
//! own PDF page and scaled to the usable width.

use std::io::BufWriter;

use image::{codecs::jpeg::JpegEncoder, RgbImage};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use printpdf::{
    ColorBits, ColorSpace, Image, ImageFilter, ImageTransform, ImageXObject, Mm, PdfDocument, Px,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    paginate::Document,
    raster::{Rasterizer, RenderError},
};

const JPEG_QUALITY: u8 = 85;
const MM_PER_INCH: f32 = 25.4;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export, the document has no pages")]
    EmptyDocument,
    #[error("page {page} could not be rendered: {source}")]
    Render { page: usize, source: RenderError },
    #[error("page {page} could not be encoded: {message}")]
    Encode { page: usize, message: String },
    #[error("PDF could not be written: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    #[default]
    A4,
    Letter,
    Kdp6x9,
}

/// Physical output page in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
}

impl PageGeometry {
    pub fn usable_width(&self) -> f32 {
        self.width - self.margin * 2.0
    }
}

impl PageFormat {
    pub fn geometry(self) -> PageGeometry {
        let (width, height) = match self {
            PageFormat::A4 => (210.0, 297.0),
            PageFormat::Letter => (215.9, 279.4),
            PageFormat::Kdp6x9 => (152.0, 229.0),
        };
        PageGeometry { width, height, margin: 12.0 }
    }
}

#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Lower-cased title with whitespace runs turned into `-`, keeping only
/// characters that are safe in a file name.
pub fn file_stem(title: &str) -> String {
    let stem = title
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let stem = stem.trim_matches('.').to_string();
    if stem.is_empty() { "ebook".to_string() } else { stem }
}

pub fn file_name(title: &str) -> String {
    format!("{}.pdf", file_stem(title))
}

/// `Content-Disposition` value with an ASCII fallback and an RFC 5987
/// `filename*` carrying the full name.
pub fn content_disposition(filename: &str) -> String {
    let ascii: String = filename.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).collect();
    let ascii = if ascii.trim_end_matches(".pdf").is_empty() { "ebook.pdf".to_string() } else { ascii };
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

fn encode_jpeg(bitmap: &RgbImage, page: usize) -> Result<Vec<u8>, ExportError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(bitmap)
        .map_err(|e| ExportError::Encode { page, message: e.to_string() })?;
    Ok(jpeg)
}

/// Rasterizes every page in order and assembles the PDF. The first failing
/// page aborts the export; no partial document is produced.
pub fn export_document(
    document: &Document,
    title: &str,
    format: PageFormat,
    rasterizer: &dyn Rasterizer,
) -> Result<ExportedDocument, ExportError> {
    if document.is_empty() {
        return Err(ExportError::EmptyDocument);
    }

    let mut encoded = Vec::with_capacity(document.len());
    for (idx, page) in document.pages().iter().enumerate() {
        let number = idx + 1;
        let bitmap = rasterizer
            .rasterize(page)
            .map_err(|source| ExportError::Render { page: number, source })?;
        debug!(page = number, width = bitmap.width(), height = bitmap.height(), "page rasterized");
        encoded.push((bitmap.width(), bitmap.height(), encode_jpeg(&bitmap, number)?));
    }

    let geometry = format.geometry();
    let display_title = if title.trim().is_empty() { "Ebook" } else { title.trim() };
    let (doc, first_page, first_layer) =
        PdfDocument::new(display_title, Mm(geometry.width), Mm(geometry.height), "Page 1");

    for (idx, (width, height, jpeg)) in encoded.into_iter().enumerate() {
        let (page, layer) = if idx == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(Mm(geometry.width), Mm(geometry.height), format!("Page {}", idx + 1))
        };
        let layer = doc.get_page(page).get_layer(layer);

        // Choosing the DPI so the bitmap spans the usable width keeps its
        // aspect ratio.
        let dpi = width as f32 * MM_PER_INCH / geometry.usable_width();
        let height_mm = height as f32 * MM_PER_INCH / dpi;
        let image = Image::from(ImageXObject {
            width: Px(width as usize),
            height: Px(height as usize),
            color_space: ColorSpace::Rgb,
            bits_per_component: ColorBits::Bit8,
            interpolate: true,
            image_data: jpeg,
            image_filter: Some(ImageFilter::DCT),
            smask: None,
            clipping_bbox: None,
        });
        image.add_to_layer(
            layer,
            ImageTransform {
                translate_x: Some(Mm(geometry.margin)),
                translate_y: Some(Mm(geometry.height - geometry.margin - height_mm)),
                dpi: Some(dpi),
                ..Default::default()
            },
        );
    }

    let mut bytes: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut bytes);
        doc.save(&mut writer).map_err(|e| ExportError::Pdf(e.to_string()))?;
    }

    let filename = file_name(title);
    info!(%filename, pages = document.len(), size_kb = bytes.len() / 1024, "📄 PDF exported");
    Ok(ExportedDocument { filename, bytes, page_count: document.len() })
}
