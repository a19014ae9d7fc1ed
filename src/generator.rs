//! The generation collaborator: anything that can turn prompts into ebook
//! HTML and chapter illustrations.

use async_trait::async_trait;
use base64::Engine;
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use tracing::info;

use crate::{error::GenerationError, models::ModelTier};

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub system: String,
    pub user: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub tier: ModelTier,
    /// Chapter count the prompt asks for.
    pub chapters: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub chapter: u32,
    pub prompt: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self { mime_type: "image/png".to_string(), bytes }
    }

    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Produces the ebook HTML. Implementations return the raw text; empty
    /// output is judged by the caller.
    async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError>;

    /// Produces up to `request.count` images. Returning fewer is allowed.
    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>, GenerationError>;
}

/// Offline generator used when `EBOOK_DEMO_MODE` is set: deterministic HTML
/// with image markers and flat-colour placeholder PNGs.
#[derive(Debug, Default, Clone)]
pub struct DemoGenerator;

const CHAPTER_COLORS: [[u8; 3]; 5] = [
    [0x3B, 0x82, 0xF6],
    [0xEF, 0x44, 0x44],
    [0x10, 0xB9, 0x81],
    [0xF5, 0x9E, 0x0B],
    [0x8B, 0x5C, 0xF6],
];

impl DemoGenerator {
    pub fn placeholder_png(chapter: u32, slot: usize) -> Result<Vec<u8>, GenerationError> {
        let [r, g, b] = CHAPTER_COLORS[(chapter as usize + slot) % CHAPTER_COLORS.len()];
        let img = ImageBuffer::from_fn(320, 240, |x, y| {
            let shade = 0.6 + 0.4 * ((x + y) as f32 / 560.0);
            Rgb([(r as f32 * shade) as u8, (g as f32 * shade) as u8, (b as f32 * shade) as u8])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| GenerationError::Parse(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

#[async_trait]
impl ContentGenerator for DemoGenerator {
    async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError> {
        let chapters = request.chapters.max(1);
        info!(chapters, "Using demo mode - generating placeholder ebook");
        let mut html = String::from("<h1>Demo Ebook</h1>\n<h2>Introduction</h2>\n");
        html.push_str("<p>This ebook was produced in demo mode without calling the model API.</p>\n");
        for ch in 1..=chapters {
            html.push_str(&format!("<h2>Chapter {ch}: Demo chapter</h2>\n"));
            html.push_str(&format!("<!--IMAGE_CH{ch}_SLOT1-->\n<!--IMAGE_CH{ch}_SLOT2-->\n"));
            for p in 1..=3 {
                html.push_str(&format!(
                    "<p>Paragraph {p} of chapter {ch}. Demo content keeps the layout realistic \
                     enough to exercise pagination, illustrations and export.</p>\n"
                ));
            }
            html.push_str("<ul><li>First takeaway</li><li>Second takeaway</li></ul>\n");
        }
        html.push_str("<h2>Conclusion</h2>\n<p>Thanks for reading.</p>\n");
        Ok(html)
    }

    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>, GenerationError> {
        (0..request.count)
            .map(|slot| Self::placeholder_png(request.chapter, slot).map(GeneratedImage::png))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_text_contains_two_markers_per_chapter() {
        let request = TextRequest {
            system: String::new(),
            user: String::new(),
            max_output_tokens: 100,
            temperature: 0.85,
            tier: ModelTier::Basic,
            chapters: 3,
        };
        let html = DemoGenerator.generate_text(&request).await.unwrap();
        for ch in 1..=3 {
            assert!(html.contains(&format!("<!--IMAGE_CH{ch}_SLOT1-->")));
            assert!(html.contains(&format!("<!--IMAGE_CH{ch}_SLOT2-->")));
        }
        assert!(!html.contains("IMAGE_CH4"));
    }

    #[tokio::test]
    async fn demo_images_are_decodable_pngs() {
        let request = ImageRequest { chapter: 2, prompt: "x".into(), count: 2 };
        let images = DemoGenerator.generate_images(&request).await.unwrap();
        assert_eq!(images.len(), 2);
        let decoded = image::load_from_memory(&images[0].bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
        assert!(images[0].to_data_uri().starts_with("data:image/png;base64,iVBORw0KGgo"));
    }
}
