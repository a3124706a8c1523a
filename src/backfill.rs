//! Online lazy-backfill scheduler.
//!
//! The read path never blocks on the Provider: it reads what is on disk and,
//! when a title+locale is incomplete, hands a backfill job to this scheduler
//! and returns immediately with whatever local data is available. Workers
//! drain a bounded channel, rate-limited against the background Provider
//! bucket, deduplicating requests that are already in flight or were
//! recently completed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{BucketKind, ProviderClient};
use crate::store::{
    self, BaseUpsert, CastUpsert, EpisodeUpsert, MediaKind, MissingParts, SeasonUpsert, Store,
    VideoUpsert,
};

/// Identifies one backfill unit of work: a title, in one locale, optionally
/// including the "full" detail parts (cast/videos/seasons+episodes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job {
    pub kind: MediaKind,
    pub id: i64,
    pub lang: String,
    pub region: Option<String>,
    pub full: bool,
}

impl Job {
    fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.kind.as_str(),
            self.id,
            self.lang,
            self.region.as_deref().unwrap_or(""),
            self.full
        )
    }

    /// The tag passed to Provider calls: `lang` or `lang-region`.
    fn tag(&self) -> String {
        match &self.region {
            Some(r) => format!("{}-{}", self.lang, r),
            None => self.lang.clone(),
        }
    }
}

struct Tracker {
    recent: std::collections::HashMap<String, Instant>,
    inflight: HashSet<String>,
}

/// Owns the work queue and the dedup state; cheap to clone (all state is
/// behind `Arc`).
#[derive(Clone)]
pub struct BackfillScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    provider: ProviderClient,
    tx: mpsc::Sender<Job>,
    tracker: Mutex<Tracker>,
    ttl: Duration,
    queue_limit: usize,
}

impl BackfillScheduler {
    /// Spawns `workers` background tasks draining the queue. The returned
    /// scheduler can be cloned freely into request handlers.
    pub fn start(store: Store, provider: ProviderClient, workers: usize, queue_limit: usize, ttl: Duration) -> Self {
        let (tx, rx) = mpsc::channel(queue_limit.max(1));
        let inner = Arc::new(Inner {
            store,
            provider,
            tx,
            tracker: Mutex::new(Tracker {
                recent: std::collections::HashMap::new(),
                inflight: HashSet::new(),
            }),
            ttl,
            queue_limit,
        });
        let scheduler = Self { inner };
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..workers.max(1) {
            let scheduler = scheduler.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        break;
                    };
                    debug!(worker_id, ?job, "running backfill job");
                    scheduler.run_job(&job).await;
                }
            });
        }
        scheduler
    }

    /// Queues a job unless it is already in flight, was completed within the
    /// TTL window, or the queue is saturated. Non-blocking and best-effort:
    /// callers never wait on this.
    pub fn request(&self, job: Job) {
        if !self.inner.provider.has_api_key() {
            return;
        }
        let key = job.key();
        {
            let mut tracker = self.inner.tracker.lock();
            if tracker.inflight.contains(&key) {
                return;
            }
            if let Some(at) = tracker.recent.get(&key) {
                if at.elapsed() < self.inner.ttl {
                    return;
                }
            }
            if tracker.inflight.len() >= self.inner.queue_limit {
                warn!(queue_limit = self.inner.queue_limit, "backfill queue saturated, dropping job");
                return;
            }
            tracker.inflight.insert(key.clone());
        }
        if self.inner.tx.try_send(job).is_err() {
            let mut tracker = self.inner.tracker.lock();
            tracker.inflight.remove(&key);
        }
    }

    /// Convenience wrapper: checks what is missing before queuing, so a
    /// fully backfilled title never enters the channel at all.
    pub async fn request_if_missing(
        &self,
        kind: MediaKind,
        id: i64,
        lang: &str,
        region: Option<&str>,
        full: bool,
    ) -> anyhow::Result<MissingParts> {
        let conn = self.inner.store.connect()?;
        let parts = store::missing_parts(&conn, kind, id, lang, region, full).await?;
        if !parts.is_empty() {
            self.request(Job {
                kind,
                id,
                lang: lang.to_string(),
                region: region.map(str::to_string),
                full,
            });
        }
        Ok(parts)
    }

    async fn run_job(&self, job: &Job) {
        let key = job.key();
        let result = self.fetch_and_store(job).await;
        if let Err(err) = result {
            warn!(?job, error = %err, "backfill job failed");
        }
        let mut tracker = self.inner.tracker.lock();
        tracker.inflight.remove(&key);
        tracker.recent.insert(key, Instant::now());
        if tracker.recent.len() > 20_000 {
            tracker.recent.clear();
        }
    }

    async fn fetch_and_store(&self, job: &Job) -> anyhow::Result<()> {
        let conn = self.inner.store.connect()?;
        let parts = store::missing_parts(&conn, job.kind, job.id, &job.lang, job.region.as_deref(), job.full).await?;
        if parts.is_empty() {
            return Ok(());
        }

        let provider = self.inner.provider.clone();
        let path = format!("/{}/{}", media_path(job.kind), job.id);
        let lang_tag = job.tag();

        if parts.need_base || (job.kind == MediaKind::Series && parts.need_tv) {
            let resp = {
                let provider = provider.clone();
                let path = path.clone();
                let lang_tag = lang_tag.clone();
                tokio::task::spawn_blocking(move || provider.get_json(BucketKind::Background, &path, &[("language", &lang_tag)])).await?
            };
            let Some(body) = resp.body.filter(|_| resp.is_success()) else {
                // A failed base fetch aborts the whole job: nothing else here
                // is trustworthy without it.
                return Ok(());
            };
            upsert_base_from_body(&conn, job.kind, job.id, &body).await?;
            if job.kind == MediaKind::Series && parts.need_tv {
                self.upsert_seasons_episodes(&conn, job.id, &lang_tag, &body).await?;
            }
        }

        if parts.need_logos {
            self.backfill_logos(&conn, job.kind, job.id, &lang_tag).await?;
        }

        if parts.need_translations {
            let resp = {
                let provider = provider.clone();
                let path = format!("{path}/translations");
                tokio::task::spawn_blocking(move || provider.get_json(BucketKind::Background, &path, &[])).await?
            };
            if let Some(body) = resp.body.filter(|_| resp.is_success()) {
                upsert_translations_from_body(&conn, job.kind, job.id, &job.lang, job.region.as_deref(), &body).await?;
            }
        }

        if parts.need_videos {
            let resp = {
                let provider = provider.clone();
                let path = format!("{path}/videos");
                tokio::task::spawn_blocking(move || provider.get_json(BucketKind::Background, &path, &[])).await?
            };
            if let Some(body) = resp.body.filter(|_| resp.is_success()) {
                upsert_video_from_body(&conn, job.kind, job.id, &body).await?;
            }
        }

        if parts.need_cast {
            let resp = {
                let provider = provider.clone();
                let path = format!("{path}/credits");
                tokio::task::spawn_blocking(move || provider.get_json(BucketKind::Background, &path, &[])).await?
            };
            if let Some(body) = resp.body.filter(|_| resp.is_success()) {
                upsert_cast_from_body(&conn, job.kind, job.id, &body).await?;
            }
        }

        Ok(())
    }

    /// Upserts every season row straight from the series base response
    /// (no extra Provider call), then fetches and upserts episodes for the
    /// single lowest positive-numbered season only.
    async fn upsert_seasons_episodes(
        &self,
        conn: &libsql::Connection,
        series_id: i64,
        lang_tag: &str,
        body: &Value,
    ) -> anyhow::Result<()> {
        let Some(seasons) = body.get("seasons").and_then(Value::as_array) else {
            return Ok(());
        };

        let mut lowest_season_number = None;
        for season in seasons {
            let season_number = season.get("season_number").and_then(Value::as_i64).unwrap_or(0);
            store::upsert_season(
                conn,
                series_id,
                &SeasonUpsert {
                    season_number,
                    season_id: season.get("id").and_then(Value::as_i64),
                    name: str_field(season, "name"),
                    overview: str_field(season, "overview"),
                    air_date: str_field(season, "air_date"),
                    poster_path: str_field(season, "poster_path"),
                    episode_count: season.get("episode_count").and_then(Value::as_i64),
                },
            )
            .await?;
            if season_number > 0 && lowest_season_number.is_none() {
                lowest_season_number = Some(season_number);
            }
        }

        let Some(season_number) = lowest_season_number else {
            return Ok(());
        };

        let provider = self.inner.provider.clone();
        let path = format!("/tv/{series_id}/season/{season_number}");
        let lang_tag = lang_tag.to_string();
        let resp = tokio::task::spawn_blocking(move || provider.get_json(BucketKind::Background, &path, &[("language", &lang_tag)])).await?;
        let Some(season_body) = resp.body.filter(|_| resp.is_success()) else {
            return Ok(());
        };
        let Some(episodes) = season_body.get("episodes").and_then(Value::as_array) else {
            return Ok(());
        };
        for episode in episodes {
            let episode_number = episode.get("episode_number").and_then(Value::as_i64).unwrap_or(0);
            store::upsert_episode(
                conn,
                series_id,
                season_number,
                &EpisodeUpsert {
                    episode_number,
                    episode_id: episode.get("id").and_then(Value::as_i64),
                    name: str_field(episode, "name"),
                    overview: str_field(episode, "overview"),
                    air_date: str_field(episode, "air_date"),
                    runtime: episode.get("runtime").and_then(Value::as_i64),
                    still_path: str_field(episode, "still_path"),
                    vote_average: episode.get("vote_average").and_then(Value::as_f64),
                    vote_count: episode.get("vote_count").and_then(Value::as_i64),
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Independent logo backfill: tries a locale-filtered `/images` call
    /// first, falls back to an unfiltered call if that came back empty or
    /// failed, and only writes if something was harvested.
    async fn backfill_logos(&self, conn: &libsql::Connection, kind: MediaKind, id: i64, lang_tag: &str) -> anyhow::Result<()> {
        let provider = self.inner.provider.clone();
        let path = format!("/{}/{}/images", media_path(kind), id);
        let include = format!("{lang_tag},en,null");

        let by_lang = {
            let provider = provider.clone();
            let path = path.clone();
            let resp = tokio::task::spawn_blocking(move || provider.get_json(BucketKind::Background, &path, &[("include_image_language", &include)])).await?;
            resp.body.filter(|_| resp.is_success()).map(|body| harvest_logos(&body))
        };

        let by_lang = match by_lang {
            Some(map) if !map.is_empty() => map,
            _ => {
                let resp = tokio::task::spawn_blocking(move || provider.get_json(BucketKind::Background, &path, &[])).await?;
                match resp.body.filter(|_| resp.is_success()).map(|body| harvest_logos(&body)) {
                    Some(map) => map,
                    None => return Ok(()),
                }
            }
        };

        if by_lang.is_empty() {
            return Ok(());
        }
        store::upsert_logos(conn, kind, id, &by_lang).await
    }
}

pub(crate) fn media_path(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Movie => "movie",
        MediaKind::Series => "tv",
    }
}

pub(crate) fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

fn genres_label(body: &Value) -> Option<String> {
    let genres = body.get("genres")?.as_array()?;
    let names: Vec<&str> = genres.iter().filter_map(|g| g.get("name").and_then(Value::as_str)).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

fn networks_label(body: &Value) -> Option<String> {
    let networks = body.get("networks")?.as_array()?;
    let names: Vec<&str> = networks.iter().filter_map(|n| n.get("name").and_then(Value::as_str)).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

pub(crate) async fn upsert_base_from_body(conn: &libsql::Connection, kind: MediaKind, id: i64, body: &Value) -> anyhow::Result<()> {
    let (name_field, date_field) = match kind {
        MediaKind::Movie => ("title", "release_date"),
        MediaKind::Series => ("name", "first_air_date"),
    };
    let row = BaseUpsert {
        id,
        name: str_field(body, name_field),
        overview: str_field(body, "overview"),
        popularity: body.get("popularity").and_then(Value::as_f64).unwrap_or(0.0),
        vote_average: body.get("vote_average").and_then(Value::as_f64).unwrap_or(0.0),
        vote_count: body.get("vote_count").and_then(Value::as_i64).unwrap_or(0),
        date: str_field(body, date_field),
        poster_path: str_field(body, "poster_path"),
        backdrop_path: str_field(body, "backdrop_path"),
        genres: genres_label(body),
        networks: networks_label(body),
    };
    store::upsert_base(conn, kind, &row).await
}

fn harvest_logos(body: &Value) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    let Some(logos) = body.get("logos").and_then(Value::as_array) else {
        return map;
    };
    for logo in logos {
        let Some(path) = logo.get("file_path").and_then(Value::as_str) else {
            continue;
        };
        let lang = logo
            .get("iso_639_1")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("und")
            .to_string();
        map.entry(lang).or_insert_with(|| path.to_string());
    }
    map
}

async fn upsert_translations_from_body(
    conn: &libsql::Connection,
    kind: MediaKind,
    id: i64,
    lang: &str,
    region: Option<&str>,
    body: &Value,
) -> anyhow::Result<()> {
    let Some(translations) = body.get("translations").and_then(Value::as_array) else {
        return Ok(());
    };
    for translation in translations {
        let iso_639_1 = translation.get("iso_639_1").and_then(Value::as_str).unwrap_or("");
        let iso_3166_1 = translation.get("iso_3166_1").and_then(Value::as_str).unwrap_or("");
        if iso_639_1 != lang {
            continue;
        }
        if let Some(region) = region {
            if !iso_3166_1.is_empty() && !iso_3166_1.eq_ignore_ascii_case(region) {
                continue;
            }
        }
        let data = translation.get("data").cloned().unwrap_or(Value::Null);
        let name_field = match kind {
            MediaKind::Movie => "title",
            MediaKind::Series => "name",
        };
        store::upsert_translation(
            conn,
            kind,
            id,
            iso_639_1,
            iso_3166_1,
            str_field(&data, name_field).as_deref(),
            str_field(&data, "overview").as_deref(),
            str_field(&data, "tagline").as_deref(),
            str_field(&data, "homepage").as_deref(),
        )
        .await?;
    }
    Ok(())
}

async fn upsert_video_from_body(conn: &libsql::Connection, kind: MediaKind, id: i64, body: &Value) -> anyhow::Result<()> {
    let Some(results) = body.get("results").and_then(Value::as_array) else {
        return Ok(());
    };
    let chosen = results
        .iter()
        .find(|v| {
            v.get("site").and_then(Value::as_str) == Some("YouTube")
                && v.get("type").and_then(Value::as_str) == Some("Trailer")
                && v.get("official").and_then(Value::as_bool).unwrap_or(false)
        })
        .or_else(|| {
            results
                .iter()
                .find(|v| v.get("site").and_then(Value::as_str) == Some("YouTube"))
        });
    let Some(video) = chosen else {
        return Ok(());
    };
    let upsert = VideoUpsert {
        video_id: str_field(video, "id"),
        key: str_field(video, "key"),
        site: str_field(video, "site"),
        name: str_field(video, "name"),
        kind_label: str_field(video, "type"),
        official: video.get("official").and_then(Value::as_bool).unwrap_or(false),
        published_at: str_field(video, "published_at"),
        iso_639_1: str_field(video, "iso_639_1"),
        iso_3166_1: str_field(video, "iso_3166_1"),
        size: video.get("size").and_then(Value::as_i64),
    };
    store::upsert_video_if_absent(conn, kind, id, &upsert).await
}

async fn upsert_cast_from_body(conn: &libsql::Connection, kind: MediaKind, id: i64, body: &Value) -> anyhow::Result<()> {
    let Some(cast) = body.get("cast").and_then(Value::as_array) else {
        return Ok(());
    };
    let rows: Vec<CastUpsert> = cast
        .iter()
        .take(24)
        .enumerate()
        .filter_map(|(ord, member)| {
            let person_id = member.get("id").and_then(Value::as_i64)?;
            let credit_id = member.get("credit_id").and_then(Value::as_str)?.to_string();
            Some(CastUpsert {
                person_id,
                credit_id,
                cast_id: member.get("cast_id").and_then(Value::as_i64),
                name: str_field(member, "name"),
                original_name: str_field(member, "original_name"),
                character: str_field(member, "character"),
                ord: ord as i64,
                known_for_department: str_field(member, "known_for_department"),
                gender: member.get("gender").and_then(Value::as_i64),
                popularity: member.get("popularity").and_then(Value::as_f64),
                profile_path: str_field(member, "profile_path"),
            })
        })
        .collect();
    store::replace_cast(conn, kind, id, &rows).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderAuth;

    async fn test_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        Store::open(&dir.path().join("catalog.sqlite")).await.unwrap()
    }

    #[tokio::test]
    async fn request_without_api_key_is_a_noop() {
        let store = test_store().await;
        let provider = ProviderClient::new(None, 47, 7);
        let scheduler = BackfillScheduler::start(store, provider, 1, 10, Duration::from_secs(60));
        scheduler.request(Job {
            kind: MediaKind::Movie,
            id: 1,
            lang: "en".to_string(),
            region: None,
            full: false,
        });
    }

    #[tokio::test]
    async fn request_if_missing_reports_missing_base_for_unknown_title() {
        let store = test_store().await;
        let provider = ProviderClient::new(Some(ProviderAuth::ApiKey("x".into())), 47, 7);
        let scheduler = BackfillScheduler::start(store, provider, 1, 10, Duration::from_secs(60));
        let parts = scheduler
            .request_if_missing(MediaKind::Movie, 42, "en", None, false)
            .await
            .unwrap();
        assert!(parts.need_base);
    }

    #[test]
    fn job_key_distinguishes_locale_and_full_flag() {
        let a = Job {
            kind: MediaKind::Movie,
            id: 1,
            lang: "en".to_string(),
            region: None,
            full: false,
        };
        let b = Job { full: true, ..a.clone() };
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn genres_label_joins_names() {
        let body = serde_json::json!({"genres": [{"name": "Action"}, {"name": "Drama"}]});
        assert_eq!(genres_label(&body).as_deref(), Some("Action, Drama"));
    }

    #[test]
    fn networks_label_joins_names() {
        let body = serde_json::json!({"networks": [{"name": "Netflix"}]});
        assert_eq!(networks_label(&body).as_deref(), Some("Netflix"));
    }

    #[test]
    fn harvest_logos_keeps_first_per_language() {
        let body = serde_json::json!({"logos": [
            {"iso_639_1": "en", "file_path": "/first.png"},
            {"iso_639_1": "en", "file_path": "/second.png"},
            {"iso_639_1": "", "file_path": "/untagged.png"},
        ]});
        let map = harvest_logos(&body);
        assert_eq!(map.get("en").map(String::as_str), Some("/first.png"));
        assert_eq!(map.get("und").map(String::as_str), Some("/untagged.png"));
    }

    #[test]
    fn harvest_logos_empty_without_logos_field() {
        let body = serde_json::json!({});
        assert!(harvest_logos(&body).is_empty());
    }

    #[test]
    fn job_tag_formats_lang_region() {
        let job = Job {
            kind: MediaKind::Movie,
            id: 1,
            lang: "en".to_string(),
            region: Some("US".to_string()),
            full: false,
        };
        assert_eq!(job.tag(), "en-US");
        let job = Job { region: None, ..job };
        assert_eq!(job.tag(), "en");
    }
}
