//! Request-level orchestration: generation with illustrations, pagination
//! and export. Holds no per-request state.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::AppError,
    export::{export_document, ExportedDocument, PageFormat},
    generator::{ContentGenerator, TextRequest},
    html::split_fragment,
    layout::{LayoutEngine, PageMetrics},
    models::{EbookParams, GenerateRequest},
    paginate::{paginate, Document},
    placeholders::resolve_placeholders,
    prompt,
    raster::PageRasterizer,
};

#[derive(Clone)]
pub struct EbookService {
    generator: Arc<dyn ContentGenerator>,
    config: Arc<AppConfig>,
    font: Option<Arc<Vec<u8>>>,
}

impl EbookService {
    pub fn new(generator: Arc<dyn ContentGenerator>, config: Arc<AppConfig>, font: Option<Arc<Vec<u8>>>) -> Self {
        Self { generator, config, font }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Text first, then illustrations. Validation happens before any
    /// upstream call.
    pub async fn generate(&self, request: GenerateRequest) -> Result<String, AppError> {
        let params = request
            .into_params()
            .ok_or_else(|| AppError::Validation("The ebook title is missing.".to_string()))?;
        self.generate_params(&params).await
    }

    async fn generate_params(&self, params: &EbookParams) -> Result<String, AppError> {
        info!(
            title = %params.title,
            chapters = params.chapters,
            pages = params.pages,
            language = params.language.code(),
            tier = ?params.tier,
            "🚀 Generating ebook"
        );

        let text_request = TextRequest {
            system: prompt::system_instructions(params),
            user: prompt::user_summary(params),
            max_output_tokens: prompt::max_output_tokens(params.pages),
            temperature: prompt::TEXT_TEMPERATURE,
            tier: params.tier,
            chapters: params.chapters,
        };
        let raw = self.generator.generate_text(&text_request).await?;
        let html = prompt::strip_code_fences(&raw);
        if html.is_empty() {
            warn!("Model returned an empty ebook");
            return Err(AppError::EmptyGeneration);
        }

        let resolved = resolve_placeholders(
            html.to_string(),
            params,
            Arc::clone(&self.generator),
            self.config.image_concurrency,
        )
        .await;
        info!(chars = resolved.html.len(), "✅ Ebook generated");
        Ok(resolved.html)
    }

    /// A fresh layout engine per document; its height cache is keyed by
    /// node position.
    pub fn layout_engine(&self, max_height: Option<f32>) -> Arc<LayoutEngine> {
        let max_height = max_height.filter(|h| *h > 0.0).unwrap_or(self.config.max_page_height);
        Arc::new(LayoutEngine::new(PageMetrics::with_max_height(max_height), self.font.clone()))
    }

    pub fn paginate(&self, html: &str, layout: &LayoutEngine) -> Document {
        let nodes = split_fragment(html);
        let node_count = nodes.len();
        let document = paginate(nodes, layout, layout.metrics().max_height);
        info!(nodes = node_count, pages = document.len(), "📑 Ebook paginated");
        document
    }

    /// CPU-bound; callers on the async runtime should use `spawn_blocking`.
    pub fn export(&self, html: &str, title: &str, format: PageFormat) -> Result<ExportedDocument, AppError> {
        if html.trim().is_empty() {
            return Err(AppError::Validation("Generate an ebook before exporting.".to_string()));
        }
        let layout = self.layout_engine(None);
        let document = self.paginate(html, &layout);
        let rasterizer = PageRasterizer::new(layout, self.config.raster_scale);
        Ok(export_document(&document, title, format, &rasterizer)?)
    }
}
