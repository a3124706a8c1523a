//! HTTP surface: routes requests to the read-path assembler, applies CORS
//! and security headers to every response, and enforces a per-IP token
//! bucket ahead of the handlers (§6-§7).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Path as AxumPath, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::assembler::Assembler;
use crate::config::Config;
use crate::locale::{self, Locale};

/// Per-process state shared by every request handler.
pub struct AppState {
    pub assembler: Arc<Assembler>,
    pub config: Arc<Config>,
    ip_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(assembler: Arc<Assembler>, config: Arc<Config>) -> Self {
        Self {
            ip_limiter: IpRateLimiter::new(config.rate_limit_rps, config.rate_limit_burst),
            assembler,
            config,
        }
    }
}

/// Mutex-protected `ip -> (tokens, last)` map; cleared entirely once it
/// grows past 20000 entries rather than tracked per-entry (§5).
struct IpRateLimiter {
    rps: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, (f64, Instant)>>,
}

impl IpRateLimiter {
    fn new(rps: f64, burst: f64) -> Self {
        Self {
            rps,
            burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the request is allowed. Never blocks: callers get
    /// an immediate yes/no rather than a queued wait.
    fn allow(&self, ip: &str) -> bool {
        if self.rps <= 0.0 || self.burst <= 0.0 {
            return true;
        }
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let (tokens, last) = buckets.get(ip).copied().unwrap_or((self.burst, now));
        let elapsed = now.saturating_duration_since(last).as_secs_f64();
        let tokens = (tokens + elapsed * self.rps).min(self.burst);
        if tokens < 1.0 {
            buckets.insert(ip.to_string(), (tokens, now));
            if buckets.len() > 20_000 {
                buckets.clear();
            }
            return false;
        }
        buckets.insert(ip.to_string(), (tokens - 1.0, now));
        if buckets.len() > 20_000 {
            buckets.clear();
        }
        true
    }
}

/// Builds the full router: routes, per-IP rate limiting, CORS, and security
/// headers are all applied through one outer middleware layer so every
/// response (including 404s and the OPTIONS fallback) carries them.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(health))
        .route("/health", get(health))
        .route("/v1/home", get(home))
        .route("/v1/titles/{id}", get(title))
        .route("/v1/browse/{tab}/{page}", get(browse))
        .route("/v1/search", get(search_empty))
        .route("/v1/search/{query}", get(search))
        .fallback(fallback)
        .layer(axum::middleware::from_fn_with_state(state.clone(), wrap_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok\n"
}

#[derive(Debug, Default, serde::Deserialize)]
struct LangQuery {
    lang: Option<String>,
}

fn resolve_locale(query: &LangQuery, headers: &HeaderMap) -> Locale {
    let accept_language = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok());
    locale::resolve(query.lang.as_deref(), accept_language)
}

async fn home(State(state): State<Arc<AppState>>, Query(query): Query<LangQuery>, headers: HeaderMap) -> Response {
    let locale = resolve_locale(&query, &headers);
    match state.assembler.home(&locale).await {
        Ok(entry) => {
            let accept = headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let (body, encoding): (Arc<Vec<u8>>, Option<&'static str>) = if accept.contains("br") && entry.brotli.is_some() {
                (entry.brotli.clone().unwrap(), Some("br"))
            } else if accept.contains("gzip") || state.config.force_gzip {
                (entry.gzip.clone(), Some("gzip"))
            } else {
                (entry.raw.clone(), None)
            };
            json_bytes_response(StatusCode::OK, (*body).clone(), encoding)
        }
        Err(err) => {
            warn!(error = %err, "home assembly failed");
            server_error()
        }
    }
}

async fn title(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> Response {
    let Ok(id) = id.parse::<i64>() else {
        return not_found();
    };
    let locale = resolve_locale(&query, &headers);
    match state.assembler.title(id, &locale).await {
        Ok(Some(body)) => json_response(StatusCode::OK, body, &headers),
        Ok(None) => not_found(),
        Err(err) => {
            warn!(error = %err, id, "title assembly failed");
            server_error()
        }
    }
}

async fn browse(
    State(state): State<Arc<AppState>>,
    AxumPath((tab, page)): AxumPath<(String, String)>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> Response {
    let Ok(page) = page.parse::<i64>() else {
        return not_found();
    };
    let locale = resolve_locale(&query, &headers);
    match state.assembler.browse(&tab, page, &locale).await {
        Ok(Some(body)) => json_response(StatusCode::OK, body, &headers),
        Ok(None) => not_found(),
        Err(err) => {
            warn!(error = %err, tab, page, "browse assembly failed");
            server_error()
        }
    }
}

async fn search_empty(State(state): State<Arc<AppState>>, Query(query): Query<LangQuery>, headers: HeaderMap) -> Response {
    let locale = resolve_locale(&query, &headers);
    match state.assembler.search_empty(&locale).await {
        Ok(body) => json_response(StatusCode::OK, body, &headers),
        Err(err) => {
            warn!(error = %err, "empty search assembly failed");
            server_error()
        }
    }
}

async fn search(
    State(state): State<Arc<AppState>>,
    AxumPath(query_segment): AxumPath<String>,
    Query(query): Query<LangQuery>,
    headers: HeaderMap,
) -> Response {
    let locale = resolve_locale(&query, &headers);
    match state.assembler.search(&query_segment, &locale).await {
        Ok(body) => json_response(StatusCode::OK, body, &headers),
        Err(err) => {
            warn!(error = %err, "search assembly failed");
            server_error()
        }
    }
}

async fn fallback() -> Response {
    ApiError::NotFound.into_response()
}

fn not_found() -> Response {
    ApiError::NotFound.into_response()
}

fn server_error() -> Response {
    ApiError::Internal.into_response()
}

/// The HTTP-boundary error taxonomy (§7): internal failures are mapped to
/// one of these before a response ever reaches a client, so no internal
/// detail (store errors, Provider error kinds) ever leaks out.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("internal error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut response = (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response();
        if matches!(self, ApiError::RateLimited) {
            response.headers_mut().insert("Retry-After", HeaderValue::from_static("1"));
        }
        response
    }
}

/// Serializes `body`, then compresses on the fly with gzip when the client
/// advertises it or looks like it is behind a reverse proxy (§6). Unlike
/// the home endpoint there is no precomputed representation to reuse.
fn json_response(status: StatusCode, body: Value, headers: &HeaderMap) -> Response {
    let raw = match serde_json::to_vec(&body) {
        Ok(raw) => raw,
        Err(_) => return server_error(),
    };
    let accept = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let via_proxy = headers.contains_key("cf-connecting-ip") || headers.contains_key(header::FORWARDED) || headers.get("x-forwarded-for").is_some();
    if accept.contains("gzip") || via_proxy {
        let gzipped = gzip_compress(&raw);
        json_bytes_response(status, gzipped, Some("gzip"))
    } else {
        json_bytes_response(status, raw, None)
    }
}

fn json_bytes_response(status: StatusCode, body: Vec<u8>, encoding: Option<&'static str>) -> Response {
    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8");
    if let Some(encoding) = encoding {
        response = response
            .header(header::CONTENT_ENCODING, encoding)
            .header(header::VARY, "Accept-Encoding");
    }
    response.body(axum::body::Body::from(body)).unwrap()
}

fn gzip_compress(raw: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    gz.write_all(raw).and_then(|_| gz.finish()).unwrap_or_else(|_| raw.to_vec())
}

/// Determines the origin this codebase echoes on CORS responses: only when
/// localhost is explicitly allowed, or the origin's host matches the
/// configured allow-list and its scheme is `https` (§6).
fn allowed_origin<'a>(origin: &'a str, config: &Config) -> Option<&'a str> {
    let parsed = url::Url::parse(origin).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    let host = parsed.host_str()?.to_lowercase();
    if config.cors_allow_localhost && matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1") {
        return Some(origin);
    }
    if parsed.scheme() == "https" && config.cors_allow_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
        return Some(origin);
    }
    None
}

fn client_ip(headers: &HeaderMap, connect_info: Option<&SocketAddr>) -> String {
    if let Some(ip) = headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok()) {
        let trimmed = ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    connect_info.map(|a| a.ip().to_string()).unwrap_or_default()
}

/// Outer middleware: per-IP rate limiting, CORS, and the fixed security
/// header set (§6) applied uniformly to every response this service sends,
/// including 404s, 429s, and OPTIONS preflights.
async fn wrap_response(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let ip = client_ip(&headers, Some(&addr));
    if !state.ip_limiter.allow(&ip) {
        let mut response = ApiError::RateLimited.into_response();
        apply_cors_and_security(&mut response, &headers, &state.config);
        return response;
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()).map(str::to_string);

    let mut response = if method == Method::OPTIONS {
        let mut response = Response::builder().status(StatusCode::NO_CONTENT).body(axum::body::Body::empty()).unwrap();
        if let Some(origin) = origin.as_deref().and_then(|o| allowed_origin(o, &state.config)) {
            let response_headers = response.headers_mut();
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_str(origin).unwrap());
            response_headers.insert(header::VARY, HeaderValue::from_static("Origin"));
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, OPTIONS"));
            if let Some(requested) = headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
                response_headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            }
            response_headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
        }
        response
    } else {
        next.run(request).await
    };

    apply_cors_and_security(&mut response, &headers, &state.config);
    response
}

fn apply_cors_and_security(response: &mut Response, request_headers: &HeaderMap, config: &Config) {
    let headers = response.headers_mut();
    if let Some(origin) = request_headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .and_then(|o| allowed_origin(o, config))
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_str(origin).unwrap());
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'; base-uri 'none'; form-action 'none'"),
    );
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            catalog_db: std::path::PathBuf::from(":memory:"),
            tmdb_api_key: None,
            tmdb_rps: 47,
            tmdb_rps_foreground: 7,
            backfill_workers: 1,
            backfill_queue_limit: 10,
            backfill_ttl_secs: 600,
            bind_addr: "127.0.0.1".to_string(),
            http_port: 0,
            cors_allow_hosts: vec!["example.com".to_string()],
            cors_allow_localhost: true,
            rate_limit_rps: 3.0,
            rate_limit_burst: 3.0,
            conn_timeout_s: 10,
            write_timeout_s: 10,
            force_gzip: false,
            brotli_quality: 5,
        }
    }

    #[test]
    fn allowed_origin_accepts_localhost_when_enabled() {
        let config = test_config();
        assert_eq!(allowed_origin("http://localhost:3000", &config), Some("http://localhost:3000"));
    }

    #[test]
    fn allowed_origin_rejects_http_allow_listed_host() {
        let config = test_config();
        assert_eq!(allowed_origin("http://example.com", &config), None);
    }

    #[test]
    fn allowed_origin_accepts_https_allow_listed_host() {
        let config = test_config();
        assert_eq!(allowed_origin("https://example.com", &config), Some("https://example.com"));
    }

    #[test]
    fn allowed_origin_rejects_unlisted_host() {
        let config = test_config();
        assert_eq!(allowed_origin("https://evil.example", &config), None);
    }

    #[test]
    fn ip_limiter_blocks_after_burst_exhausted() {
        let limiter = IpRateLimiter::new(3.0, 3.0);
        for _ in 0..3 {
            assert!(limiter.allow("1.2.3.4"));
        }
        assert!(!limiter.allow("1.2.3.4"));
    }

    #[test]
    fn ip_limiter_zero_rate_always_allows() {
        let limiter = IpRateLimiter::new(0.0, 0.0);
        for _ in 0..100 {
            assert!(limiter.allow("1.2.3.4"));
        }
    }

    #[test]
    fn client_ip_prefers_cf_connecting_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip(&headers, None), "9.9.9.9");
    }

    // End-to-end router tests driving the full axum stack (CORS/security
    // middleware, locale resolution, assembler, store) over an isolated
    // on-disk catalog seeded per test, via `tower::ServiceExt::oneshot`.
    mod end_to_end {
        use super::*;
        use crate::assembler::Assembler;
        use crate::backfill::BackfillScheduler;
        use crate::cache::Caches;
        use crate::provider::ProviderClient;
        use crate::store::{
            self, BaseUpsert, CastUpsert, EpisodeUpsert, MediaKind, SeasonUpsert, Store, VideoUpsert,
        };
        use axum::body::Body;
        use axum::http::Request;
        use http_body_util::BodyExt;
        use std::net::{IpAddr, Ipv4Addr};
        use tower::ServiceExt;

        async fn seed_catalog(store: &Store) {
            let conn = store.connect().unwrap();

            store::upsert_base(
                &conn,
                MediaKind::Movie,
                &BaseUpsert {
                    id: 1,
                    name: Some("English Movie".to_string()),
                    overview: Some("A story told in English.".to_string()),
                    popularity: 50.0,
                    vote_average: 7.5,
                    vote_count: 1000,
                    date: Some("2020-01-01".to_string()),
                    poster_path: Some("/poster1.jpg".to_string()),
                    backdrop_path: Some("/backdrop1.jpg".to_string()),
                    genres: Some("Action".to_string()),
                    networks: None,
                },
            )
            .await
            .unwrap();
            store::upsert_translation(
                &conn,
                MediaKind::Movie,
                1,
                "de",
                "DE",
                Some("Deutscher Film"),
                Some("Eine Geschichte auf Deutsch."),
                None,
                None,
            )
            .await
            .unwrap();
            store::upsert_video_if_absent(
                &conn,
                MediaKind::Movie,
                1,
                &VideoUpsert {
                    video_id: Some("v1".to_string()),
                    key: Some("abc123".to_string()),
                    site: Some("YouTube".to_string()),
                    name: Some("Official Trailer".to_string()),
                    kind_label: Some("Trailer".to_string()),
                    official: true,
                    published_at: None,
                    iso_639_1: None,
                    iso_3166_1: None,
                    size: None,
                },
            )
            .await
            .unwrap();
            conn.execute(
                "INSERT INTO genres(media_type, genre_id, name) VALUES ('movie', 28, 'Action')",
                libsql::params![],
            )
            .await
            .unwrap();
            conn.execute(
                "INSERT INTO title_genres(media_type, tmdb_id, genre_id) VALUES ('movie', 1, 28)",
                libsql::params![],
            )
            .await
            .unwrap();

            store::upsert_base(
                &conn,
                MediaKind::Series,
                &BaseUpsert {
                    id: 100,
                    name: Some("English Series".to_string()),
                    overview: Some("A series told in English.".to_string()),
                    popularity: 40.0,
                    vote_average: 8.0,
                    vote_count: 500,
                    date: Some("2019-06-01".to_string()),
                    poster_path: Some("/poster100.jpg".to_string()),
                    backdrop_path: Some("/backdrop100.jpg".to_string()),
                    genres: Some("Drama".to_string()),
                    networks: Some("Netflix".to_string()),
                },
            )
            .await
            .unwrap();
            store::upsert_translation(
                &conn,
                MediaKind::Series,
                100,
                "de",
                "DE",
                Some("Deutsche Serie"),
                None,
                None,
                None,
            )
            .await
            .unwrap();
            store::upsert_season(
                &conn,
                100,
                &SeasonUpsert {
                    season_number: 1,
                    season_id: Some(1),
                    name: Some("Season 1".to_string()),
                    overview: None,
                    air_date: Some("2019-06-01".to_string()),
                    poster_path: None,
                    episode_count: Some(8),
                },
            )
            .await
            .unwrap();
            for episode_number in 1..=8 {
                store::upsert_episode(
                    &conn,
                    100,
                    1,
                    &EpisodeUpsert {
                        episode_number,
                        episode_id: Some(episode_number),
                        name: Some(if episode_number == 1 { "Pilot".to_string() } else { format!("Episode {episode_number}") }),
                        overview: None,
                        air_date: None,
                        runtime: Some(42),
                        still_path: None,
                        vote_average: Some(7.0),
                        vote_count: Some(10),
                    },
                )
                .await
                .unwrap();
            }
            store::replace_cast(
                &conn,
                MediaKind::Series,
                100,
                &[CastUpsert {
                    person_id: 1,
                    credit_id: "c1".to_string(),
                    cast_id: None,
                    name: Some("Actor One".to_string()),
                    original_name: Some("Actor One".to_string()),
                    character: Some("Lead".to_string()),
                    ord: 0,
                    known_for_department: Some("Acting".to_string()),
                    gender: Some(2),
                    popularity: Some(5.0),
                    profile_path: None,
                }],
            )
            .await
            .unwrap();
        }

        async fn build_test_app() -> (Router, tempfile::TempDir) {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::open(&dir.path().join("catalog.sqlite")).await.unwrap();
            seed_catalog(&store).await;

            let provider = ProviderClient::new(None, 47, 7);
            let backfill = BackfillScheduler::start(store.clone(), provider.clone(), 1, 10, std::time::Duration::from_secs(600));
            let caches = std::sync::Arc::new(Caches::default());
            let assembler = std::sync::Arc::new(Assembler::new(store, provider, backfill, caches));
            let state = Arc::new(AppState::new(assembler, Arc::new(test_config())));
            (router(state), dir)
        }

        fn get(uri: &str) -> Request<Body> {
            Request::builder()
                .method("GET")
                .uri(uri)
                .extension(ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0)))
                .body(Body::empty())
                .unwrap()
        }

        async fn body_json(response: Response) -> Value {
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            serde_json::from_slice(&bytes).unwrap()
        }

        #[tokio::test]
        async fn s1_query_lang_outranks_accept_language_header() {
            let (app, _dir) = build_test_app().await;
            let mut request = get("/v1/home?lang=de");
            request
                .headers_mut()
                .insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            let names: Vec<&str> = body["slider"].as_array().unwrap().iter().filter_map(|c| c["name"].as_str()).collect();
            assert!(names.contains(&"Deutscher Film"), "slider names: {names:?}");
        }

        #[tokio::test]
        async fn s2_header_then_default_locale_fallback() {
            let (app, _dir) = build_test_app().await;

            let mut with_header = get("/v1/home");
            with_header
                .headers_mut()
                .insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("de-DE"));
            let response = app.clone().oneshot(with_header).await.unwrap();
            let body = body_json(response).await;
            let names: Vec<&str> = body["slider"].as_array().unwrap().iter().filter_map(|c| c["name"].as_str()).collect();
            assert!(names.contains(&"Deutscher Film"), "slider names: {names:?}");

            let without_header = get("/v1/home");
            let response = app.oneshot(without_header).await.unwrap();
            let body = body_json(response).await;
            let names: Vec<&str> = body["slider"].as_array().unwrap().iter().filter_map(|c| c["name"].as_str()).collect();
            assert!(names.contains(&"English Movie"), "slider names: {names:?}");
        }

        #[tokio::test]
        async fn s3_title_detail_carries_trailer_and_translated_name() {
            let (app, _dir) = build_test_app().await;
            let response = app.oneshot(get("/v1/titles/1?lang=de")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            assert_eq!(body["kind"], "movie");
            assert_eq!(body["name"], "Deutscher Film");
            assert_eq!(body["trailer_youtube"]["key"], "abc123");
            assert!(body["trailer_youtube"]["url"].as_str().unwrap().contains("youtube.com"));
        }

        #[tokio::test]
        async fn s4_series_detail_prefetches_lowest_season() {
            let (app, _dir) = build_test_app().await;
            let response = app.oneshot(get("/v1/titles/100?lang=de")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            assert_eq!(body["kind"], "series");
            assert_eq!(body["name"], "Deutsche Serie");
            assert_eq!(body["prefetch_season"], 1);
            assert_eq!(body["prefetch_episodes"][0]["episode"], 1);
            assert_eq!(body["cast"][0]["name"], "Actor One");
        }

        #[tokio::test]
        async fn s5_browse_and_search() {
            let (app, _dir) = build_test_app().await;

            let response = app.clone().oneshot(get("/v1/browse/recent/1?lang=en")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            assert!(!body["items"].as_array().unwrap().is_empty());

            let response = app.clone().oneshot(get("/v1/browse/action/1?lang=en")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            let ids: Vec<i64> = body["items"].as_array().unwrap().iter().filter_map(|c| c["id"].as_i64()).collect();
            assert!(ids.contains(&1), "action browse ids: {ids:?}");

            let response = app.oneshot(get("/v1/search/Deutscher?lang=de")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            assert_eq!(body["query"], "Deutscher");
            assert!(!body["results"].as_array().unwrap().is_empty());
        }
    }
}
