use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header, HeaderValue},
    response::Response,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    error::AppError,
    export::content_disposition,
    models::{ExportRequest, GenerateRequest, GenerateResponse, PaginateRequest, PaginateResponse},
    service::EbookService,
};

#[derive(Clone)]
pub struct AppState {
    pub service: EbookService,
}

pub fn router(state: AppState) -> Router {
    // paginate and export receive the full illustrated HTML
    let body_limit = state.service.config().max_body_bytes;
    Router::new()
        .route("/generate", post(generate_ebook).fallback(method_not_allowed))
        .route("/api/generate-content", post(generate_ebook).fallback(method_not_allowed))
        .route(
            "/api/paginate",
            post(paginate_ebook)
                .fallback(method_not_allowed)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/api/export",
            post(export_ebook)
                .fallback(method_not_allowed)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

fn bad_body(rejection: JsonRejection) -> AppError {
    AppError::Validation(format!("Invalid request body: {}", rejection.body_text()))
}

pub async fn generate_ebook(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(request) = body.map_err(bad_body)?;
    let request_id = Uuid::new_v4();
    let html = state
        .service
        .generate(request)
        .instrument(info_span!("generate", %request_id))
        .await?;
    Ok(Json(GenerateResponse { html }))
}

pub async fn paginate_ebook(
    State(state): State<AppState>,
    body: Result<Json<PaginateRequest>, JsonRejection>,
) -> Result<Json<PaginateResponse>, AppError> {
    let Json(request) = body.map_err(bad_body)?;
    let service = state.service.clone();
    let response = tokio::task::spawn_blocking(move || {
        let layout = service.layout_engine(request.max_height);
        let document = service.paginate(&request.html, &layout);
        PaginateResponse::from_document(&document, layout.as_ref())
    })
    .await
    .map_err(|e| AppError::Task(format!("pagination: {e}")))?;
    Ok(Json(response))
}

pub async fn export_ebook(
    State(state): State<AppState>,
    body: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body.map_err(bad_body)?;
    let title = request.title.unwrap_or_default();
    let format = request.format.unwrap_or_default();
    info!(title = %title, ?format, "📄 Exporting ebook");

    let service = state.service.clone();
    let exported = tokio::task::spawn_blocking(move || service.export(&request.html, &title, format))
        .await
        .map_err(|e| AppError::Task(format!("export: {e}")))??;

    let disposition = HeaderValue::from_str(&content_disposition(&exported.filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"ebook.pdf\""));
    let mut response = Response::new(Body::from(Bytes::from(exported.bytes)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        error::GenerationError,
        generator::{ContentGenerator, DemoGenerator, GeneratedImage, ImageRequest, TextRequest},
        models::ErrorResponse,
    };
    use async_trait::async_trait;
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Broken {
        text: Option<&'static str>,
    }

    #[async_trait]
    impl ContentGenerator for Broken {
        async fn generate_text(&self, _request: &TextRequest) -> Result<String, GenerationError> {
            self.text.map(str::to_string).ok_or(GenerationError::MissingCredential)
        }

        async fn generate_images(&self, _request: &ImageRequest) -> Result<Vec<GeneratedImage>, GenerationError> {
            Err(GenerationError::NoContent("image"))
        }
    }

    fn app(generator: Arc<dyn ContentGenerator>) -> Router {
        let config = AppConfig { raster_scale: 0.5, ..AppConfig::default() };
        router(AppState { service: EbookService::new(generator, Arc::new(config), None) })
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    async fn error_of(response: Response) -> String {
        let parsed: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        parsed.error
    }

    #[tokio::test]
    async fn missing_title_is_rejected() {
        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json("/generate", json!({"chaptersCount": 3})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(error_of(response).await.contains("title"));
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/generate-content")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app(Arc::new(DemoGenerator)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_is_not_allowed() {
        for uri in ["/generate", "/api/paginate", "/api/export"] {
            let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
            let response = app(Arc::new(DemoGenerator)).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{uri}");
            assert_eq!(response.headers().get(header::ALLOW).unwrap(), "POST");
        }
    }

    #[tokio::test]
    async fn demo_generation_returns_illustrated_html() {
        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json(
                "/generate",
                json!({"title": "Ventas", "chaptersCount": "2", "pagesCount": 10, "language": "en"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let html = body["html"].as_str().unwrap();
        assert!(html.contains("<h1>"));
        assert_eq!(html.matches("<figure").count(), 4);
        assert!(!html.contains("<!--IMAGE_CH"));
    }

    #[tokio::test]
    async fn upstream_failure_is_a_server_error() {
        let response = app(Arc::new(Broken { text: None }))
            .oneshot(post_json("/generate", json!({"title": "T"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error_of(response).await.contains("credential"));
    }

    #[tokio::test]
    async fn empty_generation_is_a_server_error() {
        let response = app(Arc::new(Broken { text: Some("   ") }))
            .oneshot(post_json("/generate", json!({"title": "T"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn failed_illustrations_keep_the_text() {
        let text = "<h2>One</h2><!--IMAGE_CH1_SLOT1--><p>body</p>";
        let response = app(Arc::new(Broken { text: Some(text) }))
            .oneshot(post_json("/generate", json!({"title": "T", "chaptersCount": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["html"], text);
    }

    #[tokio::test]
    async fn paginate_puts_sections_on_new_pages() {
        let html = "<h1>Book</h1><p>intro</p><h2>One</h2><p>a</p><h2>Two</h2><p>b</p>";
        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json("/api/paginate", json!({"html": html})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: PaginateResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.page_count, 3);
        assert_eq!(body.pages[1].nodes, vec!["<h2>One</h2>".to_string(), "<p>a</p>".to_string()]);
        assert!(body.pages.iter().all(|p| p.height > 0.0 && p.height <= 1050.0));
    }

    #[tokio::test]
    async fn paginate_empty_html_has_no_pages() {
        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json("/api/paginate", json!({"html": ""})))
            .await
            .unwrap();
        let body: PaginateResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.page_count, 0);
    }

    #[tokio::test]
    async fn export_returns_a_named_pdf() {
        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json(
                "/api/export",
                json!({"html": "<h1>Guía</h1><p>Hola</p><h2>Uno</h2><p>texto</p>", "title": "Guía Rápida", "format": "letter"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "application/pdf");
        let disposition = response.headers().get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap().to_string();
        assert!(disposition.contains("filename*=UTF-8''gu%C3%ADa%2Dr%C3%A1pida%2Epdf"));
        assert!(body_bytes(response).await.starts_with(b"%PDF"));
    }

    /// A decodable PNG followed by `padding` zero bytes, so the JSON body
    /// outgrows axum's 2 MB default.
    fn illustrated_html(padding: usize) -> String {
        let mut png = DemoGenerator::placeholder_png(1, 0).unwrap();
        png.resize(png.len() + padding, 0);
        let src = GeneratedImage::png(png).to_data_uri();
        format!("<h1>T</h1><h2>C1</h2><figure><img src=\"{src}\"></figure><p>x</p>")
    }

    #[tokio::test]
    async fn export_accepts_large_illustrated_bodies() {
        let html = illustrated_html(3 * 1024 * 1024);
        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json("/api/export", json!({"html": html, "title": "Big"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_bytes(response).await.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn paginate_accepts_large_illustrated_bodies() {
        let html = illustrated_html(3 * 1024 * 1024);
        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json("/api/paginate", json!({"html": html})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn body_limit_follows_configuration() {
        let config = AppConfig { max_body_bytes: 1024, ..AppConfig::default() };
        let app = router(AppState { service: EbookService::new(Arc::new(DemoGenerator), Arc::new(config), None) });
        let response = app
            .oneshot(post_json("/api/paginate", json!({"html": "x".repeat(4096)})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn loose_counts_do_not_reject_the_request() {
        for count in [json!("abc"), json!("7.5"), json!(3.0), json!("")] {
            let response = app(Arc::new(DemoGenerator))
                .oneshot(post_json("/generate", json!({"title": "T", "chaptersCount": count, "pagesCount": count})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{count}");
        }
    }

    #[tokio::test]
    async fn export_rejects_blank_html_and_unknown_formats() {
        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json("/api/export", json!({"html": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(Arc::new(DemoGenerator))
            .oneshot(post_json("/api/export", json!({"html": "<p>x</p>", "format": "a5"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
