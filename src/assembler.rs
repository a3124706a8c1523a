//! Read-path assembler: composes the home, title-detail, browse, and search
//! responses from the store, with locale-aware projection, and invokes the
//! backfill scheduler whenever it notices a gap.

use std::sync::Arc;

use libsql::Connection;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::Value;

use crate::backfill::{self, BackfillScheduler};
use crate::cache::{Caches, HomeCacheEntry};
use crate::constants::{HOME_GENRES, PROVIDERS, genre_needles, provider_needles};
use crate::locale::Locale;
use crate::provider::{BucketKind, ProviderClient};
use crate::store::{self, MediaKind, SchemaInfo, Store};

const DESCRIPTION_MAX_CHARS: usize = 240;
const ELLIPSIS: char = '…';

/// The uniform card shape shared by every list endpoint (§4.4).
#[derive(Debug, Clone, Serialize)]
pub struct Card {
    pub id: i64,
    pub kind: &'static str,
    pub name: Option<String>,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub rating: f64,
    pub poster: Option<String>,
    pub logo: Option<String>,
    pub backdrop: Option<String>,
}

/// Truncates `text` to `max` chars, appending an ellipsis when it was cut.
pub fn truncate_description(text: &str) -> String {
    let char_count = text.chars().count();
    if char_count <= DESCRIPTION_MAX_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(DESCRIPTION_MAX_CHARS).collect();
    truncated.push(ELLIPSIS);
    truncated
}

fn card_from_parts(
    id: i64,
    kind: MediaKind,
    name: Option<String>,
    overview: Option<String>,
    date: Option<&str>,
    vote_average: f64,
    poster: Option<String>,
    backdrop: Option<String>,
    logo: Option<String>,
) -> Card {
    Card {
        id,
        kind: kind.as_str(),
        name,
        description: overview.as_deref().map(truncate_description),
        year: store::year_from_date(date),
        rating: vote_average,
        poster,
        logo,
        backdrop,
    }
}

/// Locale-projects a stored list row into a card: a translation row wins over
/// the base columns when present (§4.4 `translated`).
async fn card_from_list_row(
    conn: &Connection,
    row: &store::ListRow,
    lang: &str,
    region: Option<&str>,
) -> anyhow::Result<Card> {
    let translation = store::translated(conn, row.kind, row.id, lang, region).await?;
    let (name, overview) = match translation {
        Some((Some(name), overview)) => (Some(name), overview.or_else(|| row.overview.clone())),
        Some((None, _)) | None => (row.name.clone(), row.overview.clone()),
    };
    let logo = store::pick_logo(row.logos_json.as_deref(), lang);
    Ok(card_from_parts(
        row.id,
        row.kind,
        name,
        overview,
        row.date.as_deref(),
        row.vote_average,
        row.poster_path.clone(),
        row.backdrop_path.clone(),
        logo,
    ))
}

async fn cards_from_list_rows(
    conn: &Connection,
    rows: &[store::ListRow],
    lang: &str,
    region: Option<&str>,
) -> anyhow::Result<Vec<Card>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(card_from_list_row(conn, row, lang, region).await?);
    }
    Ok(out)
}

fn kind_from_media_type(media_type: &str) -> Option<MediaKind> {
    match media_type {
        "movie" => Some(MediaKind::Movie),
        "tv" => Some(MediaKind::Series),
        _ => None,
    }
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Builds a card directly off a Provider trending/similar item, which already
/// carries localized fields because the call passed `language=lang_tag`.
/// Falls back to whatever translation/logo the local store already has,
/// since an earlier backfill may have produced a better one than the
/// Provider returned for this call.
async fn card_from_provider_item(
    conn: &Connection,
    item: &Value,
    lang: &str,
    region: Option<&str>,
) -> anyhow::Result<Option<Card>> {
    let id = match item.get("id").and_then(Value::as_i64) {
        Some(id) => id,
        None => return Ok(None),
    };
    let media_type = item
        .get("media_type")
        .and_then(Value::as_str)
        .unwrap_or("movie");
    let Some(kind) = kind_from_media_type(media_type) else {
        return Ok(None);
    };
    let (name_field, date_field) = match kind {
        MediaKind::Movie => ("title", "release_date"),
        MediaKind::Series => ("name", "first_air_date"),
    };

    let local_base = store::get_base(conn, kind, id).await?;
    let translation = store::translated(conn, kind, id, lang, region).await?;

    let provider_name = str_field(item, name_field);
    let provider_overview = str_field(item, "overview");
    let (name, overview) = match translation {
        Some((Some(name), overview)) => (Some(name), overview.or(provider_overview)),
        _ => (provider_name, provider_overview),
    };

    let logos_json = local_base.as_ref().and_then(|b| b.logos_json.clone());
    let logo = store::pick_logo(logos_json.as_deref(), lang);

    let poster = str_field(item, "poster_path").or_else(|| local_base.as_ref().and_then(|b| b.poster_path.clone()));
    let backdrop = str_field(item, "backdrop_path").or_else(|| local_base.as_ref().and_then(|b| b.backdrop_path.clone()));
    let date = str_field(item, date_field);
    let vote_average = item.get("vote_average").and_then(Value::as_f64).unwrap_or(0.0);

    Ok(Some(card_from_parts(
        id,
        kind,
        name,
        overview,
        date.as_deref(),
        vote_average,
        poster,
        backdrop,
        logo,
    )))
}

/// Shared dependencies every read-path endpoint composes its response from.
#[derive(Clone)]
pub struct Assembler {
    pub store: Store,
    pub provider: ProviderClient,
    pub backfill: BackfillScheduler,
    pub caches: Arc<Caches>,
}

impl Assembler {
    pub fn new(store: Store, provider: ProviderClient, backfill: BackfillScheduler, caches: Arc<Caches>) -> Self {
        Self {
            store,
            provider,
            backfill,
            caches,
        }
    }

    fn schema(&self) -> SchemaInfo {
        self.store.schema
    }

    async fn schedule_minimal(&self, kind: MediaKind, id: i64, lang: &str, region: Option<&str>) {
        let _ = self
            .backfill
            .request_if_missing(kind, id, lang, region, false)
            .await;
    }

    /// Logo picks are stable for a title+locale over the title's 3-day
    /// cache tier, so repeated detail views skip the JSON parse.
    fn cached_pick_logo(&self, kind: MediaKind, id: i64, lang: &str, logos_json: Option<&str>) -> Option<String> {
        let cache_key = format!("{}:{}:{}", kind.as_str(), id, lang);
        if let Some(cached) = self.caches.logo_pick.get(&cache_key) {
            return cached;
        }
        let picked = store::pick_logo(logos_json, lang);
        self.caches.logo_pick.insert(cache_key, picked.clone());
        picked
    }

    // ---------------------------------------------------------------
    // Home
    // ---------------------------------------------------------------

    pub async fn home(&self, locale: &Locale) -> anyhow::Result<HomeCacheEntry> {
        let lang_tag = locale.tag();
        if let Some(entry) = self.caches.home.get(&lang_tag) {
            return Ok(entry);
        }

        let object = self.compose_home(locale).await?;
        let raw = serde_json::to_vec(&object)?;
        let (gzip, brotli) = compress_body(&raw);
        let entry = HomeCacheEntry {
            object,
            raw: Arc::new(raw),
            gzip: Arc::new(gzip),
            brotli: brotli.map(Arc::new),
        };
        self.caches.home.insert(lang_tag, entry.clone());
        Ok(entry)
    }

    async fn compose_home(&self, locale: &Locale) -> anyhow::Result<Value> {
        let lang = locale.lang.as_str();
        let region = locale.region.as_deref();
        let conn = self.store.connect()?;

        let (slider, top10_today, trending_today) = if self.provider.has_api_key() {
            self.home_from_provider(&conn, locale).await?
        } else {
            self.home_from_local(&conn, lang, region).await?
        };

        let mut series_on = serde_json::Map::new();
        for provider in PROVIDERS {
            let rows = store::list_series_on(&conn, provider_needles(*provider), 18).await?;
            let cards = cards_from_list_rows(&conn, &rows, lang, region).await?;
            series_on.insert(provider.to_string(), serde_json::to_value(cards)?);
        }

        let top_rated_movies = store::list_top_rated(&conn, MediaKind::Movie, 48, 12).await?;
        let top_rated_series = store::list_top_rated(&conn, MediaKind::Series, 48, 12).await?;
        let top_rated = serde_json::json!({
            "movies": cards_from_list_rows(&conn, &top_rated_movies, lang, region).await?,
            "series": cards_from_list_rows(&conn, &top_rated_series, lang, region).await?,
        });

        let schema = self.schema();
        let mut genres = serde_json::Map::new();
        for (label, _) in HOME_GENRES {
            let needles = genre_needles(*label);
            let rows = store::list_browse_genre(&conn, &schema, &needles, 18, 0).await?;
            let cards = cards_from_list_rows(&conn, &rows, lang, region).await?;
            genres.insert(label.to_string(), serde_json::to_value(cards)?);
        }

        Ok(serde_json::json!({
            "as_of": now_rfc3339(),
            "providers": PROVIDERS,
            "slider": slider,
            "top10_today": top10_today,
            "trending_today": trending_today,
            "series_on": series_on,
            "top_rated": top_rated,
            "genres": genres,
        }))
    }

    async fn home_from_local(
        &self,
        conn: &Connection,
        lang: &str,
        region: Option<&str>,
    ) -> anyhow::Result<(Vec<Card>, Vec<Card>, Vec<Card>)> {
        let mixed = |movies: Vec<store::ListRow>, series: Vec<store::ListRow>| {
            let mut rows = movies;
            rows.extend(series);
            rows
        };
        let small = mixed(
            store::list_popular(conn, MediaKind::Movie, 10, 0).await?,
            store::list_popular(conn, MediaKind::Series, 10, 0).await?,
        );
        let large = mixed(
            store::list_popular(conn, MediaKind::Movie, 30, 0).await?,
            store::list_popular(conn, MediaKind::Series, 30, 0).await?,
        );
        let slider = cards_from_list_rows(conn, &small, lang, region).await?;
        let top10 = cards_from_list_rows(conn, &small, lang, region).await?;
        let trending = cards_from_list_rows(conn, &large, lang, region).await?;
        Ok((slider, top10, trending))
    }

    async fn home_from_provider(
        &self,
        conn: &Connection,
        locale: &Locale,
    ) -> anyhow::Result<(Vec<Card>, Vec<Card>, Vec<Card>)> {
        let lang = locale.lang.clone();
        let region = locale.region.clone();
        let lang_tag = locale.tag();

        let day_items = self.fetch_trending(&lang_tag, "day").await?;
        let week_items = self.fetch_trending(&lang_tag, "week").await?;

        let mut rng = rand::thread_rng();
        // Independent samples from the same day list with no mutual
        // exclusion (§9 open question: preserved deliberately).
        let slider_sample: Vec<&Value> = day_items.choose_multiple(&mut rng, 10.min(day_items.len())).collect();
        let top10_sample: Vec<&Value> = day_items.choose_multiple(&mut rng, 10.min(day_items.len())).collect();

        let mut slider = Vec::new();
        for item in &slider_sample {
            if let Some(card) = self.enrich_provider_item(conn, item, &lang, region.as_deref(), false).await? {
                slider.push(card);
            }
        }
        let mut top10 = Vec::new();
        for item in &top10_sample {
            if let Some(card) = self.enrich_provider_item(conn, item, &lang, region.as_deref(), false).await? {
                top10.push(card);
            }
        }
        let mut trending = Vec::new();
        for item in &week_items {
            if let Some(card) = self.enrich_provider_item(conn, item, &lang, region.as_deref(), false).await? {
                trending.push(card);
            }
        }
        Ok((slider, top10, trending))
    }

    async fn enrich_provider_item(
        &self,
        conn: &Connection,
        item: &Value,
        lang: &str,
        region: Option<&str>,
        full: bool,
    ) -> anyhow::Result<Option<Card>> {
        let card = card_from_provider_item(conn, item, lang, region).await?;
        if let (Some(id), Some(media_type)) = (
            item.get("id").and_then(Value::as_i64),
            item.get("media_type").and_then(Value::as_str),
        ) {
            if let Some(kind) = kind_from_media_type(media_type) {
                if full {
                    let _ = self.backfill.request_if_missing(kind, id, lang, region, true).await;
                } else {
                    self.schedule_minimal(kind, id, lang, region).await;
                }
            }
        }
        Ok(card)
    }

    async fn fetch_trending(&self, lang_tag: &str, window: &str) -> anyhow::Result<Vec<Value>> {
        let cache_key = format!("trending:{window}:{lang_tag}");
        if let Some(cached) = self.caches.trending.get(&cache_key) {
            return Ok(cached.as_array().cloned().unwrap_or_default());
        }
        let provider = self.provider.clone();
        let path = format!("/trending/all/{window}");
        let lang_tag_owned = lang_tag.to_string();
        let resp = tokio::task::spawn_blocking(move || {
            provider.get_json(BucketKind::Foreground, &path, &[("language", &lang_tag_owned)])
        })
        .await?;
        let success = resp.is_success();
        let items = resp
            .body
            .filter(|_| success)
            .and_then(|body| body.get("results").and_then(Value::as_array).cloned())
            .unwrap_or_default();
        self.caches.trending.insert(cache_key, Value::Array(items.clone()));
        Ok(items)
    }

    // ---------------------------------------------------------------
    // Title detail
    // ---------------------------------------------------------------

    pub async fn title(&self, id: i64, locale: &Locale) -> anyhow::Result<Option<Value>> {
        let lang = locale.lang.as_str();
        let region = locale.region.as_deref();
        let conn = self.store.connect()?;

        let found = match store::find_title(&conn, id).await? {
            Some(found) => Some(found),
            None => self.fetch_unknown_title(&conn, id).await?,
        };
        let Some((kind, base)) = found else {
            return Ok(None);
        };

        let _ = self
            .backfill
            .request_if_missing(kind, id, lang, region, true)
            .await;

        Ok(Some(self.compose_title_detail(&conn, kind, id, &base, locale).await?))
    }

    /// Concurrently probes `/movie/{id}` and `/tv/{id}` and accepts whichever
    /// returns 200 first (§9: structured concurrency over a thread-pool-join
    /// idiom).
    async fn fetch_unknown_title(
        &self,
        conn: &Connection,
        id: i64,
    ) -> anyhow::Result<Option<(MediaKind, store::BaseRow)>> {
        if !self.provider.has_api_key() {
            return Ok(None);
        }
        let provider_movie = self.provider.clone();
        let provider_series = self.provider.clone();
        let movie_fut = tokio::task::spawn_blocking(move || {
            provider_movie.get_json(BucketKind::Foreground, &format!("/movie/{id}"), &[])
        });
        let series_fut = tokio::task::spawn_blocking(move || {
            provider_series.get_json(BucketKind::Foreground, &format!("/tv/{id}"), &[])
        });
        let (movie_resp, series_resp) = tokio::join!(movie_fut, series_fut);
        let movie_resp = movie_resp?;
        let series_resp = series_resp?;

        let (kind, body) = if movie_resp.is_success() {
            (MediaKind::Movie, movie_resp.body)
        } else if series_resp.is_success() {
            (MediaKind::Series, series_resp.body)
        } else {
            (MediaKind::Movie, None)
        };

        let Some(body) = body else {
            return Ok(None);
        };
        backfill::upsert_base_from_body(conn, kind, id, &body).await?;
        let base = store::get_base(conn, kind, id).await?;
        Ok(base.map(|base| (kind, base)))
    }

    async fn compose_title_detail(
        &self,
        conn: &Connection,
        kind: MediaKind,
        id: i64,
        base: &store::BaseRow,
        locale: &Locale,
    ) -> anyhow::Result<Value> {
        let lang = locale.lang.as_str();
        let region = locale.region.as_deref();

        let translation = store::translated(conn, kind, id, lang, region).await?;
        let (name, overview) = match translation {
            Some((Some(name), overview)) => (Some(name), overview.or_else(|| base.overview.clone())),
            _ => (base.name.clone(), base.overview.clone()),
        };
        let logo = self.cached_pick_logo(kind, id, lang, base.logos_json.as_deref());
        let tags: Vec<String> = base
            .genres
            .as_deref()
            .map(|g| g.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let trailer = store::get_video(conn, kind, id).await?.map(|(_, key)| {
            serde_json::json!({
                "key": key,
                "url": format!("https://www.youtube.com/watch?v={key}"),
            })
        });

        let cast_rows = store::list_cast(conn, kind, id, 24).await?;
        let cast: Vec<Value> = cast_rows
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "character": c.character,
                    "order": c.ord,
                    "profile": c.profile_path,
                })
            })
            .collect();

        let mut seasons_json = None;
        let mut prefetch_season = None;
        let mut prefetch_episodes_json = None;
        if kind == MediaKind::Series {
            let seasons = store::list_seasons(conn, id).await?;
            seasons_json = Some(
                seasons
                    .iter()
                    .map(|s| serde_json::json!({"season_number": s.season_number, "episode_count": s.episode_count}))
                    .collect::<Vec<_>>(),
            );
            let first_with_episodes = seasons.iter().find(|s| s.season_number > 0);
            if let Some(season) = first_with_episodes {
                let episodes = store::list_episodes(conn, id, season.season_number).await?;
                if !episodes.is_empty() {
                    prefetch_season = Some(season.season_number);
                    prefetch_episodes_json = Some(
                        episodes
                            .iter()
                            .map(|e| {
                                serde_json::json!({
                                    "episode": e.episode_number,
                                    "name": e.name,
                                    "overview": e.overview,
                                    "air_date": e.air_date,
                                    "runtime": e.runtime,
                                    "still": e.still_path,
                                    "rating": e.vote_average,
                                })
                            })
                            .collect::<Vec<_>>(),
                    );
                }
            }
        }

        let similar = self.similar(kind, id, locale).await.unwrap_or_default();

        let mut out = serde_json::json!({
            "id": id,
            "kind": kind.as_str(),
            "name": name,
            "description": overview.as_deref().map(truncate_description),
            "tags": tags,
            "year": store::year_from_date(base.date.as_deref()),
            "rating": base.vote_average,
            "poster": base.poster_path,
            "logo": logo,
            "backdrop": base.backdrop_path,
            "trailer_youtube": trailer,
            "cast": cast,
            "similar": similar,
        });
        if let Value::Object(map) = &mut out {
            if let Some(seasons_json) = seasons_json {
                map.insert("seasons".to_string(), serde_json::to_value(seasons_json)?);
                map.insert("prefetch_season".to_string(), serde_json::to_value(prefetch_season)?);
                map.insert(
                    "prefetch_episodes".to_string(),
                    serde_json::to_value(prefetch_episodes_json.unwrap_or_default())?,
                );
            }
        }
        Ok(out)
    }

    async fn similar(&self, kind: MediaKind, id: i64, locale: &Locale) -> anyhow::Result<Vec<Value>> {
        let lang_tag = locale.tag();
        let cache_key = format!("similar:{}:{}:{}", kind.as_str(), id, lang_tag);
        if let Some(cached) = self.caches.similar.get(&cache_key) {
            return Ok(cached.as_array().cloned().unwrap_or_default());
        }
        if !self.provider.has_api_key() {
            return Ok(Vec::new());
        }
        let provider = self.provider.clone();
        let path = format!("/{}/{}/similar", backfill::media_path(kind), id);
        let lang_tag_owned = lang_tag.clone();
        let resp = tokio::task::spawn_blocking(move || {
            provider.get_json(BucketKind::Foreground, &path, &[("language", &lang_tag_owned)])
        })
        .await?;
        let success = resp.is_success();
        let Some(body) = resp.body.filter(|_| success) else {
            return Ok(Vec::new());
        };
        let Some(results) = body.get("results").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let conn = self.store.connect()?;
        let mut cards = Vec::new();
        for item in results.iter().take(24) {
            let mut item = item.clone();
            if let Value::Object(map) = &mut item {
                map.entry("media_type").or_insert_with(|| Value::String(backfill::media_path(kind).to_string()));
            }
            if let Some(card) = self
                .enrich_provider_item(&conn, &item, &locale.lang, locale.region.as_deref(), false)
                .await?
            {
                cards.push(serde_json::to_value(card)?);
            }
        }
        self.caches.similar.insert(cache_key, Value::Array(cards.clone()));
        Ok(cards)
    }

    // ---------------------------------------------------------------
    // Browse
    // ---------------------------------------------------------------

    pub async fn browse(&self, tab: &str, page: i64, locale: &Locale) -> anyhow::Result<Option<Value>> {
        if page < 1 {
            return Ok(None);
        }
        let Some((_, mode, arg)) = crate::constants::BROWSE_TABS.iter().find(|(name, _, _)| *name == tab) else {
            return Ok(None);
        };

        const PAGE_SIZE: i64 = 48;
        let offset = (page - 1) * PAGE_SIZE;
        let conn = self.store.connect()?;
        let schema = self.schema();

        let mut rows = match *mode {
            "genre" => {
                let needles = genre_needles(*arg);
                store::list_browse_genre(&conn, &schema, &needles, PAGE_SIZE + 1, offset).await?
            }
            other => store::list_browse(&conn, other, PAGE_SIZE + 1, offset).await?,
        };

        let has_more = rows.len() as i64 > PAGE_SIZE;
        rows.truncate(PAGE_SIZE as usize);
        let items = cards_from_list_rows(&conn, &rows, &locale.lang, locale.region.as_deref()).await?;

        Ok(Some(serde_json::json!({
            "tab": tab,
            "page": page,
            "page_size": PAGE_SIZE,
            "has_more": has_more,
            "items": items,
        })))
    }

    // ---------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------

    pub async fn search_empty(&self, locale: &Locale) -> anyhow::Result<Value> {
        let home = self.home(locale).await?;
        let trending_today = home
            .object
            .get("trending_today")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        Ok(serde_json::json!({
            "trending_today": trending_today,
            "query": "",
            "results": [],
        }))
    }

    pub async fn search(&self, query: &str, locale: &Locale) -> anyhow::Result<Value> {
        if query.is_empty() {
            return self.search_empty(locale).await;
        }
        let conn = self.store.connect()?;
        let rows = store::search(&conn, &locale.lang, query, 12).await?;
        let results = cards_from_list_rows(&conn, &rows, &locale.lang, locale.region.as_deref()).await?;
        Ok(serde_json::json!({
            "query": query,
            "results": results,
        }))
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn compress_body(raw: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
    use std::io::Write;
    let gzip = {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        gz.write_all(raw).and_then(|_| gz.finish()).unwrap_or_else(|_| raw.to_vec())
    };

    let mut brotli_buf = Vec::new();
    let brotli_ok = {
        let mut writer = brotli::CompressorWriter::new(&mut brotli_buf, 4096, 5, 22);
        writer.write_all(raw).and_then(|_| writer.flush()).is_ok()
    };
    let brotli = brotli_ok.then_some(brotli_buf);
    (gzip, brotli)
}
