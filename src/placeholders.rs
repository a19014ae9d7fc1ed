//! Resolution of `<!--IMAGE_CH{n}_SLOT{s}-->` markers into illustrated
//! `<figure>` blocks.

use std::{collections::BTreeMap, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::{
    error::GenerationError,
    generator::{ContentGenerator, GeneratedImage, ImageRequest},
    models::EbookParams,
    prompt,
};

pub const SLOTS_PER_CHAPTER: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub chapter: u32,
    pub slot: u32,
    pub marker: String,
}

/// All markers of one chapter, in ascending slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterBatch {
    pub chapter: u32,
    pub placeholders: Vec<Placeholder>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IllustrationReport {
    pub requested_chapters: Vec<u32>,
    pub failed_chapters: Vec<u32>,
    pub filled: usize,
    pub reused: usize,
    pub unresolved: usize,
}

#[derive(Debug, Clone)]
pub struct ResolvedHtml {
    pub html: String,
    pub report: IllustrationReport,
}

/// Markers present in `html`, chapter-major then slot-minor, regardless of
/// where they appear in the text.
pub fn collect_placeholders(html: &str, chapter_count: u32) -> Vec<Placeholder> {
    (1..=chapter_count)
        .flat_map(|chapter| (1..=SLOTS_PER_CHAPTER).map(move |slot| (chapter, slot)))
        .filter_map(|(chapter, slot)| {
            let marker = prompt::image_marker(chapter, slot);
            html.contains(&marker).then_some(Placeholder { chapter, slot, marker })
        })
        .collect()
}

pub fn plan_batches(placeholders: Vec<Placeholder>) -> Vec<ChapterBatch> {
    let mut batches: Vec<ChapterBatch> = Vec::new();
    for placeholder in placeholders {
        match batches.last_mut() {
            Some(batch) if batch.chapter == placeholder.chapter => batch.placeholders.push(placeholder),
            _ => batches.push(ChapterBatch { chapter: placeholder.chapter, placeholders: vec![placeholder] }),
        }
    }
    batches
}

/// Splices one chapter's images into `html`. The k-th image fills the k-th
/// marker, missing ones reuse the first image, and with no images the
/// markers stay in place.
pub fn splice_chapter(
    html: &mut String,
    batch: &ChapterBatch,
    images: &[GeneratedImage],
    params: &EbookParams,
    report: &mut IllustrationReport,
) {
    let Some(first) = images.first() else {
        report.unresolved += batch.placeholders.len();
        return;
    };
    for (idx, placeholder) in batch.placeholders.iter().enumerate() {
        let image = match images.get(idx) {
            Some(image) => {
                report.filled += 1;
                image
            }
            None => {
                report.reused += 1;
                first
            }
        };
        let figure = prompt::figure_html(&image.to_data_uri(), batch.chapter, params.language);
        *html = html.replacen(&placeholder.marker, &figure, 1);
    }
}

fn request_for(batch: &ChapterBatch, params: &EbookParams) -> ImageRequest {
    ImageRequest {
        chapter: batch.chapter,
        prompt: prompt::chapter_image_prompt(params, batch.chapter),
        count: batch.placeholders.len(),
    }
}

/// Requests one image batch per chapter with markers and splices the
/// results back. Never fails: a chapter whose batch errors keeps its
/// markers.
pub async fn resolve_placeholders(
    html: String,
    params: &EbookParams,
    generator: Arc<dyn ContentGenerator>,
    concurrency: usize,
) -> ResolvedHtml {
    let batches = plan_batches(collect_placeholders(&html, params.chapters));
    let mut report = IllustrationReport {
        requested_chapters: batches.iter().map(|b| b.chapter).collect(),
        ..Default::default()
    };
    if batches.is_empty() {
        info!("⚠️ No image markers found, returning text-only ebook");
        return ResolvedHtml { html, report };
    }

    let results = if concurrency <= 1 {
        fetch_sequential(&batches, params, generator.as_ref()).await
    } else {
        fetch_concurrent(&batches, params, generator, concurrency).await
    };

    let mut html = html;
    for batch in &batches {
        let images: &[GeneratedImage] = match results.get(&batch.chapter) {
            Some(Ok(images)) => images.as_slice(),
            Some(Err(e)) => {
                warn!(chapter = batch.chapter, error = %e, "❌ Chapter illustrations failed, keeping markers");
                report.failed_chapters.push(batch.chapter);
                &[]
            }
            None => {
                report.failed_chapters.push(batch.chapter);
                &[]
            }
        };
        if !images.is_empty() && images.len() < batch.placeholders.len() {
            warn!(
                chapter = batch.chapter,
                returned = images.len(),
                requested = batch.placeholders.len(),
                "Partial image batch, reusing first image"
            );
        }
        splice_chapter(&mut html, batch, images, params, &mut report);
    }

    info!(
        chapters = report.requested_chapters.len(),
        failed = report.failed_chapters.len(),
        filled = report.filled,
        reused = report.reused,
        unresolved = report.unresolved,
        "🖼️ Illustrations resolved"
    );
    ResolvedHtml { html, report }
}

type BatchResults = BTreeMap<u32, Result<Vec<GeneratedImage>, GenerationError>>;

async fn fetch_sequential(
    batches: &[ChapterBatch],
    params: &EbookParams,
    generator: &dyn ContentGenerator,
) -> BatchResults {
    let mut results = BTreeMap::new();
    for batch in batches {
        let request = request_for(batch, params);
        info!(chapter = batch.chapter, count = request.count, "🎯 Requesting chapter illustrations");
        results.insert(batch.chapter, generator.generate_images(&request).await);
    }
    results
}

async fn fetch_concurrent(
    batches: &[ChapterBatch],
    params: &EbookParams,
    generator: Arc<dyn ContentGenerator>,
    concurrency: usize,
) -> BatchResults {
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut set = JoinSet::new();
    for batch in batches {
        let request = request_for(batch, params);
        let generator = Arc::clone(&generator);
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            info!(chapter = request.chapter, count = request.count, "🎯 Requesting chapter illustrations");
            let result = generator.generate_images(&request).await;
            (request.chapter, result)
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((chapter, result)) => {
                results.insert(chapter, result);
            }
            Err(e) => warn!(error = %e, "Illustration task aborted"),
        }
    }
    results
}
