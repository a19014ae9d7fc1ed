use crate::models::{EbookParams, Language, Template, Tone};

pub const TEXT_TEMPERATURE: f32 = 0.85;
const TOKENS_PER_PAGE: u32 = 120;
const MAX_OUTPUT_TOKENS: u32 = 12_000;

pub fn max_output_tokens(pages: u32) -> u32 {
    pages.saturating_mul(TOKENS_PER_PAGE).min(MAX_OUTPUT_TOKENS)
}

pub fn tone_label(tone: Tone) -> &'static str {
    match tone {
        Tone::Professional => "professional, structured and serious",
        Tone::Friendly => "friendly, conversational and simple",
        Tone::Playful => "lively, entertaining with gentle humour",
        Tone::Inspirational => "inspiring, motivating and full of positive energy",
        Tone::Default => "neutral, clear and easy to follow",
    }
}

fn template_hint(template: Template) -> &'static str {
    match template {
        Template::Dark => "Visual style meant for a dark background: light headings and clearly separated sections.",
        Template::Minimal => "Minimalist visual style, like a clean modern editorial book.",
        Template::Colorful => "Creative colourful visual style, like modern marketing material.",
        Template::Classic => "Classic golden visual style, elegant, like a premium book.",
    }
}

fn language_name(language: Language) -> &'static str {
    match language {
        Language::Es => "Spanish",
        Language::En => "English",
    }
}

pub fn image_marker(chapter: u32, slot: u32) -> String {
    format!("<!--IMAGE_CH{chapter}_SLOT{slot}-->")
}

pub fn system_instructions(params: &EbookParams) -> String {
    let language = language_name(params.language);
    let tone = tone_label(params.tone);
    let template = template_hint(params.template);
    let chapters = params.chapters;
    let first = image_marker(1, 1);
    let second = image_marker(1, 2);
    format!(
        r#"You are an expert ebook ghostwriter for info-product creators.
Write a COMPLETE, HIGH QUALITY ebook with fully developed chapters, ready to be sold as a digital product.

Always write in {language}, with a {tone} tone.
Do not explain what you are doing, return only the ebook CONTENT as HTML.

1) OUTPUT
   - Return ONLY valid HTML, without <html>, <head>, <body> or embedded styles.
   - Structure:
     - <h1> for the main title.
     - An introduction with <h2> and several paragraphs.
     - For each chapter an <h2> "Chapter X: ..." followed by paragraphs, lists and examples.
     - Use <ul><li>...</li></ul> where it makes sense.
     - Finish with a well developed conclusion under an <h2>.
   - Write real content, never filler like "content goes here".

2) LENGTH
   - Every chapter must be well developed (assume 400-600 words per chapter).

3) IMAGE PLACEHOLDERS
   - Right after each chapter heading (chapters only, not the introduction or conclusion)
     insert exactly TWO HTML comments as image markers, e.g. {first} and {second},
     for every chapter from 1 to {chapters}.
   - Do not add visible text about the markers.

4) STYLE
   - Examples, steps, actionable advice, short stories and chapter summaries.
   - Avoid repeating the same sentence across chapters.

5) TEMPLATE
   - Keep this visual approach in mind: {template}
   - Use <h3> subheadings when useful.

Again: return only the ebook HTML, keeping the <!--IMAGE_CHX_SLOTY--> markers."#
    )
}

pub fn user_summary(params: &EbookParams) -> String {
    let or_unspecified = |s: &str| if s.is_empty() { "Not specified".to_string() } else { s.to_string() };
    let extra = if params.extra.is_empty() { "(no additional notes)".to_string() } else { params.extra.clone() };
    format!(
        "EBOOK TO GENERATE\n\n\
         Title: {title}\n\
         Brand or author: {topic}\n\
         Target audience: {audience}\n\
         Number of chapters: {chapters}\n\
         Approximate pages: {pages}\n\
         Tone: {tone}\n\
         Language: {language}\n\
         Visual template: {template}\n\
         User plan: {plan}\n\n\
         Additional notes from the creator:\n{extra}\n\n\
         Use all of this to decide chapters, subtopics, examples and advice.\n\
         Answer now with the complete ebook HTML, following the system instructions.\n",
        title = params.title,
        topic = or_unspecified(&params.topic),
        audience = or_unspecified(&params.audience),
        chapters = params.chapters,
        pages = params.pages,
        tone = tone_label(params.tone),
        language = language_name(params.language),
        template = params.template.name(),
        plan = params.plan.as_deref().unwrap_or("basic"),
    )
}

pub fn chapter_image_prompt(params: &EbookParams, chapter: u32) -> String {
    let lead = match params.language {
        Language::En => "Illustration for an ebook in English.",
        Language::Es => "Illustration for an ebook in Spanish.",
    };
    let topic = if params.topic.is_empty() { "not specified" } else { &params.topic };
    let audience = if params.audience.is_empty() { "readers interested in the subject" } else { &params.audience };
    format!(
        "{lead}\nEbook title: \"{title}\".\nBrand / author: {topic}.\nTarget audience: {audience}.\n\
         A clean, modern illustration for chapter {chapter}, with simple visual metaphors, soft gradients \
         and subtle golden accents.\nNo large text inside the image, no logos, no trademarks. Simple icons, \
         objects, characters or scenes that help visualise the chapter.",
        title = params.title,
    )
}

pub fn figure_html(data_uri: &str, chapter: u32, language: Language) -> String {
    let alt = match language {
        Language::En => format!("Illustration for chapter {chapter} of the ebook."),
        Language::Es => format!("Ilustración para el capítulo {chapter} del ebook."),
    };
    format!("<figure class=\"ebook-figure\"><img src=\"{data_uri}\" alt=\"{alt}\" /></figure>")
}

/// Models often wrap HTML in a Markdown fence despite the instructions.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else { return trimmed };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerateRequest;

    fn params() -> EbookParams {
        GenerateRequest {
            title: Some("Golden Habits".into()),
            chapters_count: Some(4),
            pages_count: Some(30),
            language: Some("en".into()),
            ..Default::default()
        }
        .into_params()
        .unwrap()
    }

    #[test]
    fn token_budget_scales_with_pages_and_caps() {
        assert_eq!(max_output_tokens(5), 600);
        assert_eq!(max_output_tokens(120), 12_000);
        assert_eq!(max_output_tokens(u32::MAX), 12_000);
    }

    #[test]
    fn prompts_carry_request_fields() {
        let p = params();
        let system = system_instructions(&p);
        assert!(system.contains("English"));
        assert!(system.contains("from 1 to 4"));
        assert!(system.contains("<!--IMAGE_CH1_SLOT1-->"));
        let user = user_summary(&p);
        assert!(user.contains("Title: Golden Habits"));
        assert!(user.contains("Number of chapters: 4"));
        assert!(user.contains("Brand or author: Not specified"));
        let image = chapter_image_prompt(&p, 3);
        assert!(image.contains("chapter 3"));
        assert!(image.contains("\"Golden Habits\""));
    }

    #[test]
    fn figure_alt_is_localised() {
        assert!(figure_html("data:x", 2, Language::Es).contains("capítulo 2"));
        assert!(figure_html("data:x", 2, Language::En).contains("chapter 2"));
    }

    #[test]
    fn code_fences_are_removed() {
        assert_eq!(strip_code_fences("```html\n<h1>A</h1>\n```"), "<h1>A</h1>");
        assert_eq!(strip_code_fences("  <h1>A</h1> "), "<h1>A</h1>");
        assert_eq!(strip_code_fences("```\n<p>x</p>"), "<p>x</p>");
    }
}
