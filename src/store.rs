//! Embedded relational store: catalog schema, schema introspection, and the
//! idempotent upserts / read queries the backfill scheduler and read-path
//! assembler build on.
//!
//! Mirrors `movies`/`series`/translation/video/cast/season/episode tables as
//! they are actually laid out by the offline ingestion jobs this service
//! reads behind; that schema is out of this repo's scope to populate from
//! scratch; the store only needs to read it and extend it idempotently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use libsql::{Builder, Connection, Database, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Distinguishes the two title tables. A given provider id is never present
/// in both `movies` and `series` (§3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "series",
        }
    }

    /// The `media_type` value ingestion and this store's own DB columns use
    /// for a series: `"tv"`, not the `"series"` response label `as_str()`
    /// returns. Every `media_type` column read/write in this module must go
    /// through this, not `as_str()`, or series rows ingestion wrote under
    /// `"tv"` become invisible to the read path.
    pub fn media_type(self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "tv",
        }
    }

    fn table(self) -> &'static str {
        match self {
            MediaKind::Movie => "movies",
            MediaKind::Series => "series",
        }
    }

    fn name_column(self) -> &'static str {
        match self {
            MediaKind::Movie => "title",
            MediaKind::Series => "name",
        }
    }

    fn date_column(self) -> &'static str {
        match self {
            MediaKind::Movie => "release_date",
            MediaKind::Series => "first_air_date",
        }
    }

}

/// Connection-level pragmas applied to every connection this process opens,
/// mirroring the WAL/foreign-key setup the rest of this codebase's store
/// layer uses.
pub async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=30000;
         PRAGMA foreign_keys=ON;",
    )
    .await
    .context("configuring connection pragmas")?;
    Ok(())
}

/// Creates every table this service reads or writes if it does not already
/// exist. Safe to run against a database the offline ingestion jobs already
/// populated: `CREATE TABLE IF NOT EXISTS` never touches existing rows.
pub async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS movies(
          id INTEGER PRIMARY KEY,
          title TEXT,
          vote_average REAL,
          vote_count INTEGER,
          release_date TEXT,
          adult INTEGER,
          backdrop_path TEXT,
          original_language TEXT,
          original_title TEXT,
          overview TEXT,
          popularity REAL,
          poster_path TEXT,
          genres TEXT,
          logos_json TEXT
        );
        CREATE INDEX IF NOT EXISTS movies_popularity_idx ON movies(popularity DESC);
        CREATE INDEX IF NOT EXISTS movies_vote_average_idx ON movies(vote_average DESC);

        CREATE TABLE IF NOT EXISTS series(
          id INTEGER PRIMARY KEY,
          name TEXT,
          vote_average REAL,
          vote_count INTEGER,
          first_air_date TEXT,
          backdrop_path TEXT,
          original_language TEXT,
          original_name TEXT,
          overview TEXT,
          popularity REAL,
          poster_path TEXT,
          networks TEXT,
          genres TEXT,
          logos_json TEXT
        );
        CREATE INDEX IF NOT EXISTS series_popularity_idx ON series(popularity DESC);
        CREATE INDEX IF NOT EXISTS series_vote_average_idx ON series(vote_average DESC);

        CREATE TABLE IF NOT EXISTS genres(
          media_type TEXT NOT NULL,
          genre_id INTEGER NOT NULL,
          name TEXT NOT NULL,
          PRIMARY KEY(media_type, genre_id)
        );

        CREATE TABLE IF NOT EXISTS title_genres(
          media_type TEXT NOT NULL,
          tmdb_id INTEGER NOT NULL,
          genre_id INTEGER NOT NULL,
          PRIMARY KEY(media_type, tmdb_id, genre_id)
        );
        CREATE INDEX IF NOT EXISTS title_genres_lookup_idx ON title_genres(media_type, tmdb_id);

        CREATE TABLE IF NOT EXISTS title_translations(
          media_type TEXT NOT NULL,
          tmdb_id INTEGER NOT NULL,
          iso_639_1 TEXT NOT NULL,
          iso_3166_1 TEXT NOT NULL,
          title TEXT,
          overview TEXT,
          tagline TEXT,
          homepage TEXT,
          PRIMARY KEY(media_type, tmdb_id, iso_639_1, iso_3166_1)
        );
        CREATE INDEX IF NOT EXISTS title_translations_lookup_idx ON title_translations(media_type, tmdb_id, iso_639_1);

        CREATE TABLE IF NOT EXISTS title_videos(
          media_type TEXT NOT NULL,
          tmdb_id INTEGER NOT NULL,
          video_id TEXT,
          key TEXT,
          site TEXT,
          name TEXT,
          type TEXT,
          official INTEGER,
          published_at TEXT,
          iso_639_1 TEXT,
          iso_3166_1 TEXT,
          size INTEGER,
          PRIMARY KEY(media_type, tmdb_id)
        );

        CREATE TABLE IF NOT EXISTS title_cast(
          media_type TEXT NOT NULL,
          tmdb_id INTEGER NOT NULL,
          person_id INTEGER NOT NULL,
          credit_id TEXT NOT NULL,
          cast_id INTEGER,
          name TEXT,
          original_name TEXT,
          character TEXT,
          ord INTEGER,
          known_for_department TEXT,
          gender INTEGER,
          popularity REAL,
          profile_path TEXT,
          PRIMARY KEY(media_type, tmdb_id, credit_id)
        );
        CREATE INDEX IF NOT EXISTS title_cast_lookup_idx ON title_cast(media_type, tmdb_id, ord);

        CREATE TABLE IF NOT EXISTS tv_seasons(
          series_id INTEGER NOT NULL,
          season_number INTEGER NOT NULL,
          season_id INTEGER,
          name TEXT,
          overview TEXT,
          air_date TEXT,
          poster_path TEXT,
          episode_count INTEGER,
          PRIMARY KEY(series_id, season_number)
        );

        CREATE TABLE IF NOT EXISTS tv_episodes(
          series_id INTEGER NOT NULL,
          season_number INTEGER NOT NULL,
          episode_number INTEGER NOT NULL,
          episode_id INTEGER,
          name TEXT,
          overview TEXT,
          air_date TEXT,
          runtime INTEGER,
          still_path TEXT,
          vote_average REAL,
          vote_count INTEGER,
          PRIMARY KEY(series_id, season_number, episode_number)
        );
        CREATE INDEX IF NOT EXISTS tv_episodes_lookup_idx ON tv_episodes(series_id, season_number, episode_number);
        "#,
    )
    .await
    .context("creating catalog schema")?;
    Ok(())
}

/// Which optional extensions the on-disk schema carries. Ingestion may run
/// an older schema without the normalized genre-edge tables; the assembler
/// degrades gracefully to substring matching on the label column when they
/// are absent.
#[derive(Debug, Clone, Copy)]
pub struct SchemaInfo {
    pub has_genre_edges: bool,
}

impl SchemaInfo {
    pub async fn introspect(conn: &Connection) -> Result<Self> {
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('genres','title_genres')",
                params![],
            )
            .await?;
        let mut found = 0;
        while let Some(row) = rows.next().await? {
            let _name: String = row.get(0)?;
            found += 1;
        }
        Ok(Self {
            has_genre_edges: found == 2,
        })
    }
}

/// A shared handle to the on-disk database. Cheap to clone; each caller
/// should open its own [`Connection`] via [`Store::connect`] rather than
/// share one across concurrent requests (§5).
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    pub schema: SchemaInfo,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening store at {}", path.display()))?;
        let conn = db.connect().context("opening bootstrap connection")?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        let schema = SchemaInfo::introspect(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            schema,
        })
    }

    pub fn connect(&self) -> Result<Connection> {
        self.db.connect().context("opening store connection")
    }
}

/// A title's base row, projected to the fields the assembler needs
/// regardless of whether it came from `movies` or `series`.
#[derive(Debug, Clone)]
pub struct BaseRow {
    pub id: i64,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub popularity: f64,
    pub vote_average: f64,
    pub vote_count: i64,
    pub date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub genres: Option<String>,
    pub logos_json: Option<String>,
    pub networks: Option<String>,
}

pub async fn get_base(conn: &Connection, kind: MediaKind, id: i64) -> Result<Option<BaseRow>> {
    let networks_col = if kind == MediaKind::Series {
        ", networks"
    } else {
        ""
    };
    let sql = format!(
        "SELECT id, {name_col}, overview, popularity, vote_average, vote_count, {date_col}, \
         poster_path, backdrop_path, genres, logos_json{networks_col} FROM {table} WHERE id = ?1",
        name_col = kind.name_column(),
        date_col = kind.date_column(),
        table = kind.table(),
    );
    let mut rows = conn.query(&sql, params![id]).await?;
    let Some(row) = rows.next().await? else {
        return Ok(None);
    };
    Ok(Some(BaseRow {
        id: row.get(0)?,
        name: row.get(1)?,
        overview: row.get(2)?,
        popularity: row.get::<Option<f64>>(3)?.unwrap_or(0.0),
        vote_average: row.get::<Option<f64>>(4)?.unwrap_or(0.0),
        vote_count: row.get::<Option<i64>>(5)?.unwrap_or(0),
        date: row.get(6)?,
        poster_path: row.get(7)?,
        backdrop_path: row.get(8)?,
        genres: row.get(9)?,
        logos_json: row.get(10)?,
        networks: if kind == MediaKind::Series {
            row.get(11)?
        } else {
            None
        },
    }))
}

/// Finds the kind+base row for an id by probing `movies` then `series`.
pub async fn find_title(conn: &Connection, id: i64) -> Result<Option<(MediaKind, BaseRow)>> {
    if let Some(row) = get_base(conn, MediaKind::Movie, id).await? {
        return Ok(Some((MediaKind::Movie, row)));
    }
    if let Some(row) = get_base(conn, MediaKind::Series, id).await? {
        return Ok(Some((MediaKind::Series, row)));
    }
    Ok(None)
}

/// Locale-aware title/overview lookup (§4.4 `translated`): exact
/// `(lang, region)` first, then language-only, else `None` (caller falls
/// back to base columns).
pub async fn translated(
    conn: &Connection,
    kind: MediaKind,
    id: i64,
    lang: &str,
    region: Option<&str>,
) -> Result<Option<(Option<String>, Option<String>)>> {
    if let Some(region) = region {
        let mut rows = conn
            .query(
                "SELECT title, overview FROM title_translations \
                 WHERE media_type = ?1 AND tmdb_id = ?2 AND iso_639_1 = ?3 AND iso_3166_1 = ?4 LIMIT 1",
                params![kind.media_type(), id, lang, region],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            return Ok(Some((row.get(0)?, row.get(1)?)));
        }
    }
    let mut rows = conn
        .query(
            "SELECT title, overview FROM title_translations \
             WHERE media_type = ?1 AND tmdb_id = ?2 AND iso_639_1 = ?3 LIMIT 1",
            params![kind.media_type(), id, lang],
        )
        .await?;
    if let Some(row) = rows.next().await? {
        return Ok(Some((row.get(0)?, row.get(1)?)));
    }
    Ok(None)
}

/// Picks a logo path out of a `{lang: path}` JSON map: requested lang, then
/// `en`, then `und`, then any value; `None` if the map is empty/absent.
pub fn pick_logo(logos_json: Option<&str>, lang: &str) -> Option<String> {
    let raw = logos_json?;
    let map: HashMap<String, String> = serde_json::from_str(raw).ok()?;
    for key in [lang, "en", "und"] {
        if let Some(v) = map.get(key) {
            if !v.is_empty() {
                return Some(v.clone());
            }
        }
    }
    map.values().find(|v| !v.is_empty()).cloned()
}

/// Which parts of a title+locale are missing and would need a backfill
/// fetch (§4.3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissingParts {
    pub need_base: bool,
    pub need_logos: bool,
    pub need_translations: bool,
    pub need_cast: bool,
    pub need_videos: bool,
    pub need_tv: bool,
}

impl MissingParts {
    pub fn is_empty(self) -> bool {
        self == MissingParts::default()
    }
}

pub async fn missing_parts(
    conn: &Connection,
    kind: MediaKind,
    id: i64,
    lang: &str,
    region: Option<&str>,
    full: bool,
) -> Result<MissingParts> {
    let base = get_base(conn, kind, id).await?;
    let Some(base) = base else {
        return Ok(MissingParts {
            need_base: true,
            ..Default::default()
        });
    };

    let mut parts = MissingParts {
        need_logos: base.logos_json.as_deref().unwrap_or("").is_empty()
            || base.logos_json.as_deref() == Some("{}"),
        need_translations: translated(conn, kind, id, lang, region).await?.is_none(),
        ..Default::default()
    };

    if full {
        let mut rows = conn
            .query(
                "SELECT 1 FROM title_cast WHERE media_type = ?1 AND tmdb_id = ?2 LIMIT 1",
                params![kind.media_type(), id],
            )
            .await?;
        parts.need_cast = rows.next().await?.is_none();

        let mut rows = conn
            .query(
                "SELECT 1 FROM title_videos WHERE media_type = ?1 AND tmdb_id = ?2 LIMIT 1",
                params![kind.media_type(), id],
            )
            .await?;
        parts.need_videos = rows.next().await?.is_none();

        if kind == MediaKind::Series {
            let mut rows = conn
                .query(
                    "SELECT 1 FROM tv_seasons WHERE series_id = ?1 LIMIT 1",
                    params![id],
                )
                .await?;
            let has_seasons = rows.next().await?.is_some();
            let mut rows = conn
                .query(
                    "SELECT 1 FROM tv_episodes WHERE series_id = ?1 LIMIT 1",
                    params![id],
                )
                .await?;
            let has_episodes = rows.next().await?.is_some();
            parts.need_tv = !has_seasons || !has_episodes;
        }
    }

    Ok(parts)
}

/// Fields upserted into `movies`/`series` from a Provider `/movie/{id}` or
/// `/tv/{id}` response.
#[derive(Debug, Clone, Default)]
pub struct BaseUpsert {
    pub id: i64,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub popularity: f64,
    pub vote_average: f64,
    pub vote_count: i64,
    pub date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub genres: Option<String>,
    pub networks: Option<String>,
}

pub async fn upsert_base(conn: &Connection, kind: MediaKind, row: &BaseUpsert) -> Result<()> {
    match kind {
        MediaKind::Movie => {
            conn.execute(
                r#"
                INSERT INTO movies(
                  id, title, overview, popularity, vote_average, vote_count,
                  release_date, poster_path, backdrop_path, genres
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(id) DO UPDATE SET
                  title = excluded.title,
                  overview = excluded.overview,
                  popularity = excluded.popularity,
                  vote_average = excluded.vote_average,
                  vote_count = excluded.vote_count,
                  release_date = excluded.release_date,
                  poster_path = excluded.poster_path,
                  backdrop_path = excluded.backdrop_path,
                  genres = excluded.genres
                "#,
                params![
                    row.id,
                    row.name.as_deref(),
                    row.overview.as_deref(),
                    row.popularity,
                    row.vote_average,
                    row.vote_count,
                    row.date.as_deref(),
                    row.poster_path.as_deref(),
                    row.backdrop_path.as_deref(),
                    row.genres.as_deref(),
                ],
            )
            .await?;
        }
        MediaKind::Series => {
            conn.execute(
                r#"
                INSERT INTO series(
                  id, name, overview, popularity, vote_average, vote_count,
                  first_air_date, poster_path, backdrop_path, genres, networks
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                  name = excluded.name,
                  overview = excluded.overview,
                  popularity = excluded.popularity,
                  vote_average = excluded.vote_average,
                  vote_count = excluded.vote_count,
                  first_air_date = excluded.first_air_date,
                  poster_path = excluded.poster_path,
                  backdrop_path = excluded.backdrop_path,
                  genres = excluded.genres,
                  networks = excluded.networks
                "#,
                params![
                    row.id,
                    row.name.as_deref(),
                    row.overview.as_deref(),
                    row.popularity,
                    row.vote_average,
                    row.vote_count,
                    row.date.as_deref(),
                    row.poster_path.as_deref(),
                    row.backdrop_path.as_deref(),
                    row.genres.as_deref(),
                    row.networks.as_deref(),
                ],
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn upsert_logos(
    conn: &Connection,
    kind: MediaKind,
    id: i64,
    logos: &HashMap<String, String>,
) -> Result<()> {
    let json = serde_json::to_string(logos).context("serializing logos map")?;
    let sql = format!("UPDATE {} SET logos_json = ?1 WHERE id = ?2", kind.table());
    conn.execute(&sql, params![json, id]).await?;
    Ok(())
}

/// A single trailer candidate from `/{kind}/{id}/videos`.
#[derive(Debug, Clone, Default)]
pub struct VideoUpsert {
    pub video_id: Option<String>,
    pub key: Option<String>,
    pub site: Option<String>,
    pub name: Option<String>,
    pub kind_label: Option<String>,
    pub official: bool,
    pub published_at: Option<String>,
    pub iso_639_1: Option<String>,
    pub iso_3166_1: Option<String>,
    pub size: Option<i64>,
}

/// Inserts the title's single video row if one is not already present.
/// `title_videos` keeps at most one row per title, and per the Open
/// Question in §9 a later call can never supersede an earlier one — this
/// is preserved deliberately, not a bug.
pub async fn upsert_video_if_absent(
    conn: &Connection,
    kind: MediaKind,
    id: i64,
    video: &VideoUpsert,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR IGNORE INTO title_videos(
          media_type, tmdb_id, video_id, key, site, name, type, official,
          published_at, iso_639_1, iso_3166_1, size
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            kind.media_type(),
            id,
            video.video_id.as_deref(),
            video.key.as_deref(),
            video.site.as_deref(),
            video.name.as_deref(),
            video.kind_label.as_deref(),
            video.official as i64,
            video.published_at.as_deref(),
            video.iso_639_1.as_deref(),
            video.iso_3166_1.as_deref(),
            video.size,
        ],
    )
    .await?;
    Ok(())
}

pub async fn get_video(conn: &Connection, kind: MediaKind, id: i64) -> Result<Option<(String, String)>> {
    let mut rows = conn
        .query(
            "SELECT site, key FROM title_videos WHERE media_type = ?1 AND tmdb_id = ?2 LIMIT 1",
            params![kind.media_type(), id],
        )
        .await?;
    let Some(row) = rows.next().await? else {
        return Ok(None);
    };
    let site: Option<String> = row.get(0)?;
    let key: Option<String> = row.get(1)?;
    match (site, key) {
        (Some(site), Some(key)) if site.eq_ignore_ascii_case("youtube") => Ok(Some((site, key))),
        _ => Ok(None),
    }
}

/// One cast entry as fetched from `/{kind}/{id}/credits`.
#[derive(Debug, Clone, Default)]
pub struct CastUpsert {
    pub person_id: i64,
    pub credit_id: String,
    pub cast_id: Option<i64>,
    pub name: Option<String>,
    pub original_name: Option<String>,
    pub character: Option<String>,
    pub ord: i64,
    pub known_for_department: Option<String>,
    pub gender: Option<i64>,
    pub popularity: Option<f64>,
    pub profile_path: Option<String>,
}

/// Replaces every cast row for a title atomically, keeping at most the
/// first 24 entries (already truncated by the caller).
pub async fn replace_cast(conn: &Connection, kind: MediaKind, id: i64, rows: &[CastUpsert]) -> Result<()> {
    let tx = conn.transaction().await?;
    tx.execute(
        "DELETE FROM title_cast WHERE media_type = ?1 AND tmdb_id = ?2",
        params![kind.media_type(), id],
    )
    .await?;
    for row in rows.iter().take(24) {
        tx.execute(
            r#"
            INSERT INTO title_cast(
              media_type, tmdb_id, person_id, credit_id, cast_id, name,
              original_name, character, ord, known_for_department, gender,
              popularity, profile_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                kind.media_type(),
                id,
                row.person_id,
                row.credit_id.as_str(),
                row.cast_id,
                row.name.as_deref(),
                row.original_name.as_deref(),
                row.character.as_deref(),
                row.ord,
                row.known_for_department.as_deref(),
                row.gender,
                row.popularity,
                row.profile_path.as_deref(),
            ],
        )
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CastRow {
    pub name: Option<String>,
    pub character: Option<String>,
    pub ord: i64,
    pub profile_path: Option<String>,
}

pub async fn list_cast(conn: &Connection, kind: MediaKind, id: i64, limit: i64) -> Result<Vec<CastRow>> {
    let mut rows = conn
        .query(
            "SELECT name, character, ord, profile_path FROM title_cast \
             WHERE media_type = ?1 AND tmdb_id = ?2 ORDER BY ord ASC LIMIT ?3",
            params![kind.media_type(), id, limit],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(CastRow {
            name: row.get(0)?,
            character: row.get(1)?,
            ord: row.get::<Option<i64>>(2)?.unwrap_or(0),
            profile_path: row.get(3)?,
        });
    }
    Ok(out)
}

pub async fn upsert_translation(
    conn: &Connection,
    kind: MediaKind,
    id: i64,
    lang: &str,
    region: &str,
    title: Option<&str>,
    overview: Option<&str>,
    tagline: Option<&str>,
    homepage: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO title_translations(
          media_type, tmdb_id, iso_639_1, iso_3166_1, title, overview, tagline, homepage
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(media_type, tmdb_id, iso_639_1, iso_3166_1) DO UPDATE SET
          title = excluded.title,
          overview = excluded.overview,
          tagline = excluded.tagline,
          homepage = excluded.homepage
        "#,
        params![kind.media_type(), id, lang, region, title, overview, tagline, homepage],
    )
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct SeasonUpsert {
    pub season_number: i64,
    pub season_id: Option<i64>,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub poster_path: Option<String>,
    pub episode_count: Option<i64>,
}

pub async fn upsert_season(conn: &Connection, series_id: i64, season: &SeasonUpsert) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tv_seasons(
          series_id, season_number, season_id, name, overview, air_date, poster_path, episode_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(series_id, season_number) DO UPDATE SET
          season_id = excluded.season_id,
          name = excluded.name,
          overview = excluded.overview,
          air_date = excluded.air_date,
          poster_path = excluded.poster_path,
          episode_count = excluded.episode_count
        "#,
        params![
            series_id,
            season.season_number,
            season.season_id,
            season.name.as_deref(),
            season.overview.as_deref(),
            season.air_date.as_deref(),
            season.poster_path.as_deref(),
            season.episode_count,
        ],
    )
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SeasonRow {
    pub season_number: i64,
    pub episode_count: Option<i64>,
}

pub async fn list_seasons(conn: &Connection, series_id: i64) -> Result<Vec<SeasonRow>> {
    let mut rows = conn
        .query(
            "SELECT season_number, episode_count FROM tv_seasons \
             WHERE series_id = ?1 ORDER BY season_number ASC",
            params![series_id],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(SeasonRow {
            season_number: row.get(0)?,
            episode_count: row.get(1)?,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Default)]
pub struct EpisodeUpsert {
    pub episode_number: i64,
    pub episode_id: Option<i64>,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub runtime: Option<i64>,
    pub still_path: Option<String>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<i64>,
}

pub async fn upsert_episode(
    conn: &Connection,
    series_id: i64,
    season_number: i64,
    episode: &EpisodeUpsert,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tv_episodes(
          series_id, season_number, episode_number, episode_id, name, overview,
          air_date, runtime, still_path, vote_average, vote_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(series_id, season_number, episode_number) DO UPDATE SET
          episode_id = excluded.episode_id,
          name = excluded.name,
          overview = excluded.overview,
          air_date = excluded.air_date,
          runtime = excluded.runtime,
          still_path = excluded.still_path,
          vote_average = excluded.vote_average,
          vote_count = excluded.vote_count
        "#,
        params![
            series_id,
            season_number,
            episode.episode_number,
            episode.episode_id,
            episode.name.as_deref(),
            episode.overview.as_deref(),
            episode.air_date.as_deref(),
            episode.runtime,
            episode.still_path.as_deref(),
            episode.vote_average,
            episode.vote_count,
        ],
    )
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct EpisodeRow {
    pub episode_number: i64,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub runtime: Option<i64>,
    pub still_path: Option<String>,
    pub vote_average: Option<f64>,
}

pub async fn list_episodes(conn: &Connection, series_id: i64, season_number: i64) -> Result<Vec<EpisodeRow>> {
    let mut rows = conn
        .query(
            "SELECT episode_number, name, overview, air_date, runtime, still_path, vote_average \
             FROM tv_episodes WHERE series_id = ?1 AND season_number = ?2 ORDER BY episode_number ASC",
            params![series_id, season_number],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(EpisodeRow {
            episode_number: row.get(0)?,
            name: row.get(1)?,
            overview: row.get(2)?,
            air_date: row.get(3)?,
            runtime: row.get(4)?,
            still_path: row.get(5)?,
            vote_average: row.get(6)?,
        });
    }
    Ok(out)
}

/// A row shape common to every browse/search/home list query, before
/// locale projection turns it into a response card.
#[derive(Debug, Clone)]
pub struct ListRow {
    pub id: i64,
    pub kind: MediaKind,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub date: Option<String>,
    pub vote_average: f64,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub logos_json: Option<String>,
}

fn list_sql(kind: MediaKind, predicate: &str, order_by: &str) -> String {
    format!(
        "SELECT id, {name_col}, overview, {date_col}, vote_average, poster_path, backdrop_path, logos_json \
         FROM {table} {predicate} ORDER BY {order_by} LIMIT ?1 OFFSET ?2",
        name_col = kind.name_column(),
        date_col = kind.date_column(),
        table = kind.table(),
    )
}

async fn collect_list_rows(conn: &Connection, kind: MediaKind, sql: &str, limit: i64, offset: i64) -> Result<Vec<ListRow>> {
    let mut rows = conn.query(sql, params![limit, offset]).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(ListRow {
            id: row.get(0)?,
            kind,
            name: row.get(1)?,
            overview: row.get(2)?,
            date: row.get(3)?,
            vote_average: row.get::<Option<f64>>(4)?.unwrap_or(0.0),
            poster_path: row.get(5)?,
            backdrop_path: row.get(6)?,
            logos_json: row.get(7)?,
        });
    }
    Ok(out)
}

pub async fn list_popular(conn: &Connection, kind: MediaKind, limit: i64, offset: i64) -> Result<Vec<ListRow>> {
    let sql = list_sql(kind, "", "popularity DESC");
    collect_list_rows(conn, kind, &sql, limit, offset).await
}

fn row_to_list_row(row: &libsql::Row) -> Result<ListRow> {
    let kind_label: String = row.get(1)?;
    Ok(ListRow {
        id: row.get(0)?,
        kind: if kind_label == "series" { MediaKind::Series } else { MediaKind::Movie },
        name: row.get(2)?,
        overview: row.get(3)?,
        date: row.get(4)?,
        vote_average: row.get::<Option<f64>>(5)?.unwrap_or(0.0),
        poster_path: row.get(6)?,
        backdrop_path: row.get(7)?,
        logos_json: row.get(8)?,
    })
}

/// Cross-table (movies+series) browse ordering used by popular/rating/recent
/// tabs: the two tables are unioned before `LIMIT`/`OFFSET` apply so a page
/// can straddle both kinds, mirroring the single combined query the source
/// system runs rather than two independently-paginated per-kind queries.
pub async fn list_browse(conn: &Connection, mode: &str, limit: i64, offset: i64) -> Result<Vec<ListRow>> {
    let order_by = match mode {
        "rating" => "vote_average DESC, popularity DESC",
        "recent" => "date DESC, popularity DESC",
        _ => "popularity DESC",
    };
    let sql = format!(
        "SELECT id, kind, name, overview, date, vote_average, poster_path, backdrop_path, logos_json FROM ( \
           SELECT id, 'movie' AS kind, title AS name, overview, release_date AS date, popularity, vote_average, poster_path, backdrop_path, logos_json FROM movies \
           UNION ALL \
           SELECT id, 'series' AS kind, name, overview, first_air_date AS date, popularity, vote_average, poster_path, backdrop_path, logos_json FROM series \
         ) ORDER BY {order_by} LIMIT ?1 OFFSET ?2"
    );
    let mut rows = conn.query(&sql, params![limit, offset]).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_list_row(&row)?);
    }
    Ok(out)
}

/// Cross-table genre browse: normalized edge join when available, else
/// substring match on the `genres` label column, unioned across both tables
/// before `LIMIT`/`OFFSET` apply (see [`list_browse`]).
pub async fn list_browse_genre(
    conn: &Connection,
    schema: &SchemaInfo,
    needles: &[&str],
    limit: i64,
    offset: i64,
) -> Result<Vec<ListRow>> {
    if needles.is_empty() {
        return Ok(Vec::new());
    }
    if schema.has_genre_edges {
        let n = needles.len();
        let movie_ph: Vec<String> = (0..n).map(|i| format!("?{}", i + 1)).collect();
        let series_ph: Vec<String> = (0..n).map(|i| format!("?{}", i + 1 + n)).collect();
        let sql = format!(
            "SELECT DISTINCT id, kind, name, overview, date, vote_average, poster_path, backdrop_path, logos_json FROM ( \
               SELECT m.id AS id, 'movie' AS kind, m.title AS name, m.overview, m.release_date AS date, m.popularity, m.vote_average, m.poster_path, m.backdrop_path, m.logos_json \
               FROM movies m JOIN title_genres tg ON tg.media_type = 'movie' AND tg.tmdb_id = m.id \
               JOIN genres g ON g.media_type = tg.media_type AND g.genre_id = tg.genre_id \
               WHERE g.name IN ({mph}) \
               UNION ALL \
               SELECT s.id AS id, 'series' AS kind, s.name AS name, s.overview, s.first_air_date AS date, s.popularity, s.vote_average, s.poster_path, s.backdrop_path, s.logos_json \
               FROM series s JOIN title_genres tg ON tg.media_type = 'tv' AND tg.tmdb_id = s.id \
               JOIN genres g ON g.media_type = tg.media_type AND g.genre_id = tg.genre_id \
               WHERE g.name IN ({sph}) \
             ) ORDER BY popularity DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            mph = movie_ph.join(","),
            sph = series_ph.join(","),
            limit_idx = 2 * n + 1,
            offset_idx = 2 * n + 2,
        );
        let mut args: Vec<libsql::Value> = needles.iter().map(|n| libsql::Value::from(*n)).collect();
        args.extend(needles.iter().map(|n| libsql::Value::from(*n)));
        args.push(limit.into());
        args.push(offset.into());
        let mut rows = conn.query(&sql, args).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_list_row(&row)?);
        }
        Ok(out)
    } else {
        let movie_pred = needles.iter().map(|_| "genres LIKE ?").collect::<Vec<_>>().join(" OR ");
        let series_pred = movie_pred.clone();
        let sql = format!(
            "SELECT id, kind, name, overview, date, vote_average, poster_path, backdrop_path, logos_json FROM ( \
               SELECT id, 'movie' AS kind, title AS name, overview, release_date AS date, popularity, vote_average, poster_path, backdrop_path, logos_json FROM movies WHERE {movie_pred} \
               UNION ALL \
               SELECT id, 'series' AS kind, name, overview, first_air_date AS date, popularity, vote_average, poster_path, backdrop_path, logos_json FROM series WHERE {series_pred} \
             ) ORDER BY popularity DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            limit_idx = 2 * needles.len() + 1,
            offset_idx = 2 * needles.len() + 2,
        );
        let mut args: Vec<libsql::Value> = needles.iter().map(|n| libsql::Value::from(format!("%{n}%"))).collect();
        args.extend(needles.iter().map(|n| libsql::Value::from(format!("%{n}%"))));
        args.push(limit.into());
        args.push(offset.into());
        let mut rows = conn.query(&sql, args).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_list_row(&row)?);
        }
        Ok(out)
    }
}

/// Series whose `networks` label matches any of the given provider needles.
pub async fn list_series_on(conn: &Connection, needles: &[&str], limit: i64) -> Result<Vec<ListRow>> {
    if needles.is_empty() {
        return Ok(Vec::new());
    }
    let predicate = needles
        .iter()
        .map(|_| "networks LIKE ?".to_string())
        .collect::<Vec<_>>()
        .join(" OR ");
    let sql = format!(
        "SELECT id, name, overview, first_air_date, vote_average, poster_path, backdrop_path, logos_json \
         FROM series WHERE {predicate} ORDER BY popularity DESC LIMIT ?"
    );
    let mut args: Vec<libsql::Value> = needles
        .iter()
        .map(|n| libsql::Value::from(format!("%{n}%")))
        .collect();
    args.push(limit.into());
    let mut rows = conn.query(&sql, args).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(ListRow {
            id: row.get(0)?,
            kind: MediaKind::Series,
            name: row.get(1)?,
            overview: row.get(2)?,
            date: row.get(3)?,
            vote_average: row.get::<Option<f64>>(4)?.unwrap_or(0.0),
            poster_path: row.get(5)?,
            backdrop_path: row.get(6)?,
            logos_json: row.get(7)?,
        });
    }
    Ok(out)
}

/// Top 48 by rating, narrowed to the 12 with the highest vote count (§4.4.1).
pub async fn list_top_rated(conn: &Connection, kind: MediaKind, shelf_limit: i64, final_limit: i64) -> Result<Vec<ListRow>> {
    let sql = format!(
        "SELECT id, {name_col}, overview, {date_col}, vote_average, poster_path, backdrop_path, logos_json FROM ( \
           SELECT * FROM {table} ORDER BY vote_average DESC LIMIT ?1 \
         ) sub ORDER BY vote_count DESC LIMIT ?2",
        name_col = kind.name_column(),
        date_col = kind.date_column(),
        table = kind.table(),
    );
    let mut rows = conn.query(&sql, params![shelf_limit, final_limit]).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(ListRow {
            id: row.get(0)?,
            kind,
            name: row.get(1)?,
            overview: row.get(2)?,
            date: row.get(3)?,
            vote_average: row.get::<Option<f64>>(4)?.unwrap_or(0.0),
            poster_path: row.get(5)?,
            backdrop_path: row.get(6)?,
            logos_json: row.get(7)?,
        });
    }
    Ok(out)
}

/// Substring match on the localized-or-base name/overview across both
/// tables, ordered by popularity (§4.4.4): a title whose name only exists as
/// a `title_translations` row in the requested language must still match.
pub async fn search(conn: &Connection, lang: &str, query: &str, limit: i64) -> Result<Vec<ListRow>> {
    let needle = format!("%{query}%");
    let sql = "
        SELECT id, kind, name, overview, date, vote_average, poster_path, backdrop_path, logos_json FROM (
          SELECT m.id AS id, 'movie' AS kind, COALESCE(tt.title, m.title) AS name, COALESCE(tt.overview, m.overview) AS overview,
                 m.release_date AS date, m.popularity AS popularity, m.vote_average AS vote_average,
                 m.poster_path AS poster_path, m.backdrop_path AS backdrop_path, m.logos_json AS logos_json
          FROM movies m
          LEFT JOIN title_translations tt ON tt.media_type = 'movie' AND tt.tmdb_id = m.id AND tt.iso_639_1 = ?1
          UNION ALL
          SELECT s.id AS id, 'series' AS kind, COALESCE(tt.title, s.name) AS name, COALESCE(tt.overview, s.overview) AS overview,
                 s.first_air_date AS date, s.popularity AS popularity, s.vote_average AS vote_average,
                 s.poster_path AS poster_path, s.backdrop_path AS backdrop_path, s.logos_json AS logos_json
          FROM series s
          LEFT JOIN title_translations tt ON tt.media_type = 'tv' AND tt.tmdb_id = s.id AND tt.iso_639_1 = ?1
        )
        WHERE COALESCE(name, '') LIKE ?2 OR COALESCE(overview, '') LIKE ?2
        ORDER BY popularity DESC LIMIT ?3
    ";
    let mut rows = conn.query(sql, params![lang, needle, limit]).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_list_row(&row)?);
    }
    Ok(out)
}

pub fn year_from_date(date: Option<&str>) -> Option<i32> {
    let date = date?;
    if date.len() < 4 {
        return None;
    }
    date[..4].parse::<i32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_test_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        Store::open(&dir.path().join("catalog.sqlite")).await.unwrap()
    }

    #[tokio::test]
    async fn base_upsert_then_get_roundtrips() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_base(
            &conn,
            MediaKind::Movie,
            &BaseUpsert {
                id: 1,
                name: Some("English Movie".into()),
                overview: Some("overview".into()),
                popularity: 12.5,
                vote_average: 7.5,
                vote_count: 100,
                date: Some("2020-01-02".into()),
                poster_path: Some("/poster.jpg".into()),
                backdrop_path: None,
                genres: Some("Action".into()),
                networks: None,
            },
        )
        .await
        .unwrap();

        let row = get_base(&conn, MediaKind::Movie, 1).await.unwrap().unwrap();
        assert_eq!(row.name.as_deref(), Some("English Movie"));
        assert_eq!(year_from_date(row.date.as_deref()), Some(2020));
    }

    #[tokio::test]
    async fn base_upsert_is_idempotent() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        let mut row = BaseUpsert {
            id: 1,
            name: Some("First".into()),
            popularity: 1.0,
            ..Default::default()
        };
        upsert_base(&conn, MediaKind::Movie, &row).await.unwrap();
        row.name = Some("Second".into());
        row.popularity = 2.0;
        upsert_base(&conn, MediaKind::Movie, &row).await.unwrap();

        let got = get_base(&conn, MediaKind::Movie, 1).await.unwrap().unwrap();
        assert_eq!(got.name.as_deref(), Some("Second"));
        assert_eq!(got.popularity, 2.0);
    }

    #[tokio::test]
    async fn translated_falls_back_from_region_to_language_only() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_translation(
            &conn,
            MediaKind::Movie,
            1,
            "de",
            "",
            Some("Deutscher Film"),
            Some("Beschreibung"),
            None,
            None,
        )
        .await
        .unwrap();

        let exact = translated(&conn, MediaKind::Movie, 1, "de", Some("DE")).await.unwrap();
        assert_eq!(exact.unwrap().0.as_deref(), Some("Deutscher Film"));

        let miss = translated(&conn, MediaKind::Movie, 1, "fr", None).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn video_upsert_keeps_first_row_per_title() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_video_if_absent(
            &conn,
            MediaKind::Movie,
            1,
            &VideoUpsert {
                site: Some("YouTube".into()),
                key: Some("abc123".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        upsert_video_if_absent(
            &conn,
            MediaKind::Movie,
            1,
            &VideoUpsert {
                site: Some("YouTube".into()),
                key: Some("later".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let (site, key) = get_video(&conn, MediaKind::Movie, 1).await.unwrap().unwrap();
        assert_eq!(site, "YouTube");
        assert_eq!(key, "abc123");
    }

    #[tokio::test]
    async fn cast_replace_is_atomic_and_ordered() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        replace_cast(
            &conn,
            MediaKind::Series,
            100,
            &[
                CastUpsert {
                    person_id: 1,
                    credit_id: "c1".into(),
                    name: Some("Actor One".into()),
                    ord: 0,
                    ..Default::default()
                },
                CastUpsert {
                    person_id: 2,
                    credit_id: "c2".into(),
                    name: Some("Actor Two".into()),
                    ord: 1,
                    ..Default::default()
                },
            ],
        )
        .await
        .unwrap();

        let cast = list_cast(&conn, MediaKind::Series, 100, 24).await.unwrap();
        assert_eq!(cast.len(), 2);
        assert_eq!(cast[0].name.as_deref(), Some("Actor One"));

        replace_cast(
            &conn,
            MediaKind::Series,
            100,
            &[CastUpsert {
                person_id: 3,
                credit_id: "c3".into(),
                name: Some("Actor Three".into()),
                ord: 0,
                ..Default::default()
            }],
        )
        .await
        .unwrap();
        let cast = list_cast(&conn, MediaKind::Series, 100, 24).await.unwrap();
        assert_eq!(cast.len(), 1);
        assert_eq!(cast[0].name.as_deref(), Some("Actor Three"));
    }

    #[tokio::test]
    async fn missing_parts_reports_need_base_when_absent() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        let parts = missing_parts(&conn, MediaKind::Movie, 999, "en", None, false).await.unwrap();
        assert!(parts.need_base);
    }

    #[tokio::test]
    async fn missing_parts_is_empty_once_fully_populated() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_base(
            &conn,
            MediaKind::Movie,
            &BaseUpsert {
                id: 1,
                name: Some("Movie".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let mut logos = HashMap::new();
        logos.insert("en".to_string(), "/logo.png".to_string());
        upsert_logos(&conn, MediaKind::Movie, 1, &logos).await.unwrap();
        upsert_translation(&conn, MediaKind::Movie, 1, "en", "", Some("Movie"), None, None, None)
            .await
            .unwrap();

        let parts = missing_parts(&conn, MediaKind::Movie, 1, "en", None, false).await.unwrap();
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn pick_logo_prefers_requested_lang_then_en_then_und() {
        let mut map = HashMap::new();
        map.insert("und".to_string(), "/und.png".to_string());
        map.insert("en".to_string(), "/en.png".to_string());
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(pick_logo(Some(&json), "de").as_deref(), Some("/en.png"));

        map.insert("de".to_string(), "/de.png".to_string());
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(pick_logo(Some(&json), "de").as_deref(), Some("/de.png"));

        assert_eq!(pick_logo(None, "de"), None);
    }

    #[tokio::test]
    async fn seasons_and_episodes_roundtrip_in_order() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_season(
            &conn,
            100,
            &SeasonUpsert {
                season_number: 1,
                episode_count: Some(8),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        upsert_episode(
            &conn,
            100,
            1,
            &EpisodeUpsert {
                episode_number: 1,
                name: Some("Pilot".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let seasons = list_seasons(&conn, 100).await.unwrap();
        assert_eq!(seasons.len(), 1);
        assert_eq!(seasons[0].episode_count, Some(8));

        let episodes = list_episodes(&conn, 100, 1).await.unwrap();
        assert_eq!(episodes[0].name.as_deref(), Some("Pilot"));
    }

    #[tokio::test]
    async fn browse_popular_orders_by_popularity_desc() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        for (id, pop) in [(1, 5.0), (2, 50.0), (3, 25.0)] {
            upsert_base(
                &conn,
                MediaKind::Movie,
                &BaseUpsert {
                    id,
                    name: Some(format!("Movie {id}")),
                    popularity: pop,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        let rows = list_popular(&conn, MediaKind::Movie, 10, 0).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn search_matches_name_or_overview_case_insensitively_on_substring() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_base(
            &conn,
            MediaKind::Movie,
            &BaseUpsert {
                id: 1,
                name: Some("Game of Thrones Movie".into()),
                popularity: 9.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let results = search(&conn, "en", "Thrones", 12).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
    }

    #[tokio::test]
    async fn search_matches_titles_that_only_exist_as_a_translation() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_base(
            &conn,
            MediaKind::Movie,
            &BaseUpsert {
                id: 1,
                name: Some("English Title".into()),
                overview: Some("English overview".into()),
                popularity: 1.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        upsert_translation(
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

        let hits = search(&conn, "de", "Deutscher", 12).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);

        let misses = search(&conn, "en", "Deutscher", 12).await.unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn search_unions_movies_and_series_ordered_by_popularity() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_base(
            &conn,
            MediaKind::Movie,
            &BaseUpsert {
                id: 1,
                name: Some("Thrones Movie".into()),
                popularity: 5.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        upsert_base(
            &conn,
            MediaKind::Series,
            &BaseUpsert {
                id: 100,
                name: Some("Thrones Series".into()),
                popularity: 50.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let hits = search(&conn, "en", "Thrones", 12).await.unwrap();
        assert_eq!(hits.iter().map(|r| (r.id, r.kind)).collect::<Vec<_>>(), vec![(100, MediaKind::Series), (1, MediaKind::Movie)]);
    }

    #[tokio::test]
    async fn list_browse_interleaves_movies_and_series_by_popularity() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_base(
            &conn,
            MediaKind::Movie,
            &BaseUpsert {
                id: 1,
                name: Some("Low Movie".into()),
                popularity: 5.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        upsert_base(
            &conn,
            MediaKind::Series,
            &BaseUpsert {
                id: 100,
                name: Some("High Series".into()),
                popularity: 50.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let rows = list_browse(&conn, "popular", 10, 0).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].id, rows[0].kind), (100, MediaKind::Series));
        assert_eq!((rows[1].id, rows[1].kind), (1, MediaKind::Movie));
    }

    #[tokio::test]
    async fn list_browse_has_more_reflects_overfetch() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        for id in 1..=3 {
            upsert_base(
                &conn,
                MediaKind::Movie,
                &BaseUpsert {
                    id,
                    name: Some(format!("Movie {id}")),
                    popularity: id as f64,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        let page = list_browse(&conn, "popular", 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, 3);
    }

    #[tokio::test]
    async fn list_browse_genre_unions_both_kinds_without_edge_tables() {
        let store = open_test_store().await;
        let conn = store.connect().unwrap();
        upsert_base(
            &conn,
            MediaKind::Movie,
            &BaseUpsert {
                id: 1,
                name: Some("Space Movie".into()),
                genres: Some("Science Fiction".into()),
                popularity: 1.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        upsert_base(
            &conn,
            MediaKind::Series,
            &BaseUpsert {
                id: 100,
                name: Some("Space Series".into()),
                genres: Some("Sci-Fi & Fantasy".into()),
                popularity: 2.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let schema = SchemaInfo {
            has_genre_edges: false,
        };
        let rows = list_browse_genre(&conn, &schema, &["Science Fiction", "Sci-Fi & Fantasy", "Sci-Fi"], 10, 0)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 100);
    }
}
