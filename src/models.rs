use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use serde_with::{serde_as, DeserializeAs, SerializeAs};

use crate::export::PageFormat;
use crate::paginate::Document;

pub const MIN_CHAPTERS: i64 = 1;
pub const MAX_CHAPTERS: i64 = 20;
pub const MIN_PAGES: i64 = 5;
pub const MAX_PAGES: i64 = 120;

/// Body of `POST /generate`. Everything except `title` is optional and
/// normalised by [`GenerateRequest::into_params`].
#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub topic: Option<String>, // brand or author in the UI
    #[serde(default)]
    pub audience: Option<String>,
    #[serde_as(as = "LeadingInt")]
    #[serde(default)]
    pub chapters_count: Option<i64>,
    #[serde_as(as = "LeadingInt")]
    #[serde(default)]
    pub pages_count: Option<i64>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub extra: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
}

/// Lenient count: numbers are truncated, strings contribute their leading
/// integer (`"7.5"` is 7, `"12 pages"` is 12). Anything else is `None`,
/// which later clamps to the minimum.
pub struct LeadingInt;

impl<'de> DeserializeAs<'de, Option<i64>> for LeadingInt {
    fn deserialize_as<D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
            Value::String(s) => leading_int(&s),
            _ => None,
        })
    }
}

impl SerializeAs<Option<i64>> for LeadingInt {
    fn serialize_as<S>(source: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source.serialize(serializer)
    }
}

/// Optional sign then decimal digits, after leading whitespace. Overflow
/// saturates.
pub fn leading_int(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let (negative, rest) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() {
        return None;
    }
    let magnitude = digits.parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    #[default]
    Default,
    Professional,
    Friendly,
    Playful,
    Inspirational,
}

impl Tone {
    /// Unknown values fall back to [`Tone::Default`]. The Spanish names the
    /// original form used are accepted as aliases.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "professional" | "profesional" => Tone::Professional,
            "friendly" | "cercano" => Tone::Friendly,
            "playful" | "divertido" => Tone::Playful,
            "inspirational" | "inspirador" => Tone::Inspirational,
            _ => Tone::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Es,
    En,
}

impl Language {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("en") { Language::En } else { Language::Es }
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::Es => "es",
            Language::En => "en",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Template {
    #[default]
    Classic,
    Dark,
    Minimal,
    Colorful,
}

impl Template {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dark" => Template::Dark,
            "minimal" => Template::Minimal,
            "colorful" => Template::Colorful,
            _ => Template::Classic,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Template::Classic => "classic",
            Template::Dark => "dark",
            Template::Minimal => "minimal",
            Template::Colorful => "colorful",
        }
    }
}

/// Which text model tier serves the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelTier {
    #[default]
    Basic,
    Pro,
}

impl ModelTier {
    pub fn from_plan(plan: Option<&str>) -> Self {
        match plan.map(|p| p.trim().to_ascii_lowercase()) {
            Some(p) if p == "pro" => ModelTier::Pro,
            _ => ModelTier::Basic,
        }
    }
}

/// Validated, clamped view of a [`GenerateRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct EbookParams {
    pub title: String,
    pub topic: String,
    pub audience: String,
    pub chapters: u32,
    pub pages: u32,
    pub tone: Tone,
    pub language: Language,
    pub extra: String,
    pub template: Template,
    pub plan: Option<String>,
    pub tier: ModelTier,
}

impl GenerateRequest {
    /// Returns `None` when the title is missing or blank.
    pub fn into_params(self) -> Option<EbookParams> {
        let title = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?.to_string();
        let trimmed = |v: Option<String>| v.map(|s| s.trim().to_string()).unwrap_or_default();
        let plan = self.plan.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        Some(EbookParams {
            title,
            topic: trimmed(self.topic),
            audience: trimmed(self.audience),
            chapters: clamp_count(self.chapters_count, MIN_CHAPTERS, MAX_CHAPTERS),
            pages: clamp_count(self.pages_count, MIN_PAGES, MAX_PAGES),
            tone: self.tone.as_deref().map(Tone::parse).unwrap_or_default(),
            language: self.language.as_deref().map(Language::parse).unwrap_or_default(),
            extra: trimmed(self.extra),
            template: self.template.as_deref().map(Template::parse).unwrap_or_default(),
            tier: ModelTier::from_plan(plan.as_deref()),
            plan,
        })
    }
}

/// Missing values clamp to `min`, like a failed integer parse.
pub fn clamp_count(value: Option<i64>, min: i64, max: i64) -> u32 {
    value.unwrap_or(min).clamp(min, max) as u32
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerateResponse {
    pub html: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaginateRequest {
    pub html: String,
    #[serde(default)]
    pub max_height: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PagePreview {
    pub height: f32,
    pub nodes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaginateResponse {
    pub page_count: usize,
    pub pages: Vec<PagePreview>,
}

impl PaginateResponse {
    pub fn from_document(document: &Document, measure: &dyn crate::paginate::Measure) -> Self {
        let pages = document
            .pages()
            .iter()
            .map(|page| PagePreview {
                height: measure.measure(page.nodes()),
                nodes: page.nodes().iter().map(|n| n.html.clone()).collect(),
            })
            .collect();
        Self { page_count: document.len(), pages }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub html: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub format: Option<PageFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_accept_numbers_and_numeric_strings() {
        let req: GenerateRequest = serde_json::from_value(serde_json::json!({
            "title": "  Ventas  ",
            "chaptersCount": "7",
            "pagesCount": 500
        }))
        .unwrap();
        let params = req.into_params().unwrap();
        assert_eq!(params.title, "Ventas");
        assert_eq!(params.chapters, 7);
        assert_eq!(params.pages, 120);
    }

    fn counts_of(chapters: Value) -> (u32, u32) {
        let req: GenerateRequest = serde_json::from_value(serde_json::json!({
            "title": "T",
            "chaptersCount": chapters,
            "pagesCount": chapters,
        }))
        .unwrap();
        let params = req.into_params().unwrap();
        (params.chapters, params.pages)
    }

    #[test]
    fn unparsable_counts_fall_back_to_minimum() {
        assert_eq!(counts_of(serde_json::json!("abc")), (1, 5));
        assert_eq!(counts_of(serde_json::json!("")), (1, 5));
        assert_eq!(counts_of(serde_json::json!(null)), (1, 5));
        assert_eq!(counts_of(serde_json::json!([3])), (1, 5));
    }

    #[test]
    fn counts_use_leading_integer() {
        assert_eq!(counts_of(serde_json::json!("7.5")), (7, 7));
        assert_eq!(counts_of(serde_json::json!(3.0)), (3, 5));
        assert_eq!(counts_of(serde_json::json!(" 12 pages")), (12, 12));
        assert_eq!(counts_of(serde_json::json!("-4")), (1, 5));
        assert_eq!(counts_of(serde_json::json!(99.9)), (20, 99));
        assert_eq!(leading_int("99999999999999999999"), Some(i64::MAX));
        assert_eq!(leading_int("+8x"), Some(8));
        assert_eq!(leading_int("-"), None);
    }

    #[test]
    fn missing_counts_clamp_to_minimum() {
        assert_eq!(clamp_count(None, MIN_CHAPTERS, MAX_CHAPTERS), 1);
        assert_eq!(clamp_count(Some(-3), MIN_PAGES, MAX_PAGES), 5);
        assert_eq!(clamp_count(Some(40), MIN_CHAPTERS, MAX_CHAPTERS), 20);
    }

    #[test]
    fn blank_title_is_rejected() {
        let req = GenerateRequest { title: Some("   ".into()), ..Default::default() };
        assert!(req.into_params().is_none());
        assert!(GenerateRequest::default().into_params().is_none());
    }

    #[test]
    fn unknown_enumerations_fall_back_to_defaults() {
        assert_eq!(Tone::parse("sarcastic"), Tone::Default);
        assert_eq!(Tone::parse("Profesional"), Tone::Professional);
        assert_eq!(Language::parse("fr"), Language::Es);
        assert_eq!(Language::parse("EN"), Language::En);
        assert_eq!(Template::parse("neon"), Template::Classic);
        assert_eq!(ModelTier::from_plan(Some(" PRO ")), ModelTier::Pro);
        assert_eq!(ModelTier::from_plan(Some("basic")), ModelTier::Basic);
        assert_eq!(ModelTier::from_plan(None), ModelTier::Basic);
    }
}
