use std::{path::PathBuf, str::FromStr, time::Duration};

use tracing::warn;

use crate::models::ModelTier;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_PAGE_HEIGHT: f32 = 1050.0;
/// Illustrated ebooks carry their images as base64 data URIs, a few MB per
/// chapter.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Runtime configuration, read once at startup from the environment
/// (after `.env` has been loaded).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: String,
    pub text_model_pro: String,
    pub image_model: String,
    pub demo_mode: bool,
    pub port: u16,
    pub upstream_timeout: Duration,
    pub image_concurrency: usize,
    pub max_page_height: f32,
    pub raster_scale: f32,
    pub font_path: Option<PathBuf>,
    pub max_body_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            text_model_pro: "gemini-2.5-pro".to_string(),
            image_model: "gemini-2.5-flash-image-preview".to_string(),
            demo_mode: false,
            port: 8080,
            upstream_timeout: Duration::from_secs(180),
            image_concurrency: 2,
            max_page_height: DEFAULT_MAX_PAGE_HEIGHT,
            raster_scale: 2.0,
            font_path: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Invalid values are logged and
    /// replaced by their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let image_concurrency: usize = parse_or(&get, "EBOOK_IMAGE_CONCURRENCY", defaults.image_concurrency);
        let max_page_height: f32 = parse_or(&get, "EBOOK_MAX_PAGE_HEIGHT", defaults.max_page_height);
        let raster_scale: f32 = parse_or(&get, "EBOOK_RASTER_SCALE", defaults.raster_scale);
        let max_body_bytes: usize = parse_or(&get, "EBOOK_MAX_BODY_BYTES", defaults.max_body_bytes);

        Self {
            api_key: get("GEMINI_API_KEY"),
            api_base: get("GEMINI_API_BASE").unwrap_or(defaults.api_base),
            text_model: get("EBOOK_TEXT_MODEL").unwrap_or(defaults.text_model),
            text_model_pro: get("EBOOK_TEXT_MODEL_PRO").unwrap_or(defaults.text_model_pro),
            image_model: get("EBOOK_IMAGE_MODEL").unwrap_or(defaults.image_model),
            demo_mode: get("EBOOK_DEMO_MODE").map(|v| is_truthy(&v)).unwrap_or(false),
            port: parse_or(&get, "PORT", defaults.port),
            upstream_timeout: Duration::from_secs(parse_or(
                &get,
                "EBOOK_UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout.as_secs(),
            )),
            image_concurrency: image_concurrency.max(1),
            max_page_height: if max_page_height > 0.0 { max_page_height } else { defaults.max_page_height },
            raster_scale: if raster_scale > 0.0 { raster_scale } else { defaults.raster_scale },
            font_path: get("EBOOK_FONT_PATH").map(PathBuf::from),
            max_body_bytes: if max_body_bytes > 0 { max_body_bytes } else { defaults.max_body_bytes },
        }
    }

    pub fn text_model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Basic => &self.text_model,
            ModelTier::Pro => &self.text_model_pro,
        }
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match get(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Invalid config value, using default");
            default
        }),
        None => default,
    }
}

fn is_truthy(value: &str) -> bool {
    !(value == "0" || value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = config(&[]);
        assert!(cfg.api_key.is_none());
        assert!(!cfg.demo_mode);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_page_height, DEFAULT_MAX_PAGE_HEIGHT);
        assert_eq!(cfg.api_base, DEFAULT_API_BASE);
        assert_eq!(cfg.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = config(&[
            ("PORT", "eighty"),
            ("EBOOK_IMAGE_CONCURRENCY", "0"),
            ("EBOOK_MAX_PAGE_HEIGHT", "-4"),
            ("GEMINI_API_KEY", "   "),
            ("EBOOK_MAX_BODY_BYTES", "0"),
        ]);
        assert_eq!(cfg.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.image_concurrency, 1);
        assert_eq!(cfg.max_page_height, DEFAULT_MAX_PAGE_HEIGHT);
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn body_limit_is_configurable() {
        assert_eq!(config(&[("EBOOK_MAX_BODY_BYTES", "1048576")]).max_body_bytes, 1 << 20);
    }

    #[test]
    fn plan_tier_selects_model() {
        let cfg = config(&[("EBOOK_TEXT_MODEL_PRO", "big-model"), ("EBOOK_DEMO_MODE", "true")]);
        assert!(cfg.demo_mode);
        assert_eq!(cfg.text_model_for(ModelTier::Pro), "big-model");
        assert_eq!(cfg.text_model_for(ModelTier::Basic), "gemini-2.5-flash");
    }
}
