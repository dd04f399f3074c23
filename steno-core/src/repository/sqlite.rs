//! Reference [`Repository`] implementation backed by `rusqlite`.
//!
//! Grounded on the teacher's `dictum-app/src/storage.rs` (`LocalStore`):
//! schema initialized via a single `execute_batch` with
//! `PRAGMA journal_mode = WAL;`, one `CREATE TABLE IF NOT EXISTS` per
//! table plus indexes. Differs from the teacher in three ways the
//! repository contract (`spec.md` §4.1) requires: `ON DELETE CASCADE`
//! foreign keys from segments/summaries/topics to sessions, `CHECK`
//! constraints on text length/confidence range, and a `UNIQUE(session_id,
//! sequence_number)` constraint that turns a duplicate `saveSegment` into a
//! SQLite constraint failure mapped straight to
//! `RepositoryError::ConstraintViolation` — no teacher-style
//! check-then-insert race.
//!
//! `rusqlite::Connection` is not `Sync`; the connection lives behind a
//! `std::sync::Mutex` inside an `Arc` and every operation runs inside
//! `tokio::task::spawn_blocking`, mirroring the teacher's idiom of doing
//! blocking-resource work off the async executor (`engine/mod.rs`
//! `start_with_device` opens `cpal::Stream` inside `spawn_blocking` for the
//! same reason: the resource is not safe/cheap to touch from async code).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::collaborators::Repository;
use crate::domain::{Session, SessionStatus, Source, StoredSegment, Summary, SummaryType, Topic};
use crate::error::RepositoryError;

pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (creating if absent) the database at `db_path`, initializing
    /// schema on first use.
    pub fn open(db_path: PathBuf) -> Result<Self, RepositoryError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        }
        let conn = Connection::open(db_path).map_err(RepositoryError::from)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory().map_err(RepositoryError::from)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| RepositoryError::Backend(format!("blocking task panicked: {e}")))?
    }
}

fn init_schema(conn: &Connection) -> Result<(), RepositoryError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS sessions (
          id TEXT PRIMARY KEY,
          locale TEXT NOT NULL,
          started_at INTEGER NOT NULL,
          ended_at INTEGER,
          title TEXT,
          status TEXT NOT NULL CHECK (status IN ('active', 'completed')),
          created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS segments (
          id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
          text TEXT NOT NULL CHECK (length(text) BETWEEN 1 AND 10000),
          started_at INTEGER NOT NULL,
          ended_at INTEGER NOT NULL,
          confidence REAL CHECK (confidence IS NULL OR (confidence BETWEEN 0 AND 1)),
          sequence_number INTEGER NOT NULL,
          source TEXT NOT NULL CHECK (source IN ('microphone', 'systemAudio')),
          created_at INTEGER NOT NULL,
          UNIQUE (session_id, sequence_number)
        );

        CREATE TABLE IF NOT EXISTS summaries (
          id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
          content TEXT NOT NULL,
          summary_type TEXT NOT NULL CHECK (summary_type IN ('rolling', 'final')),
          segment_range_start INTEGER NOT NULL,
          segment_range_end INTEGER NOT NULL CHECK (segment_range_end >= segment_range_start),
          model_id TEXT NOT NULL,
          created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS topics (
          id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
          title TEXT NOT NULL,
          summary TEXT NOT NULL,
          segment_range_start INTEGER NOT NULL,
          segment_range_end INTEGER NOT NULL,
          created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_segments_session ON segments(session_id, sequence_number);
        CREATE INDEX IF NOT EXISTS idx_segments_started_at ON segments(started_at);
        CREATE INDEX IF NOT EXISTS idx_summaries_session ON summaries(session_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_topics_session ON topics(session_id, segment_range_start);
        "#,
    )
    .map_err(RepositoryError::from)
}

fn micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

fn from_micros(v: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(v).single().unwrap_or_else(Utc::now)
}

fn source_to_str(s: Source) -> &'static str {
    match s {
        Source::Microphone => "microphone",
        Source::SystemAudio => "systemAudio",
    }
}

fn source_from_str(s: &str) -> Result<Source, RepositoryError> {
    match s {
        "microphone" => Ok(Source::Microphone),
        "systemAudio" => Ok(Source::SystemAudio),
        other => Err(RepositoryError::Backend(format!("unknown source tag: {other}"))),
    }
}

fn status_to_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Active => "active",
        SessionStatus::Completed => "completed",
    }
}

fn status_from_str(s: &str) -> Result<SessionStatus, RepositoryError> {
    match s {
        "active" => Ok(SessionStatus::Active),
        "completed" => Ok(SessionStatus::Completed),
        other => Err(RepositoryError::Backend(format!("unknown session status: {other}"))),
    }
}

fn summary_type_to_str(t: SummaryType) -> &'static str {
    match t {
        SummaryType::Rolling => "rolling",
        SummaryType::Final => "final",
    }
}

fn summary_type_from_str(s: &str) -> Result<SummaryType, RepositoryError> {
    match s {
        "rolling" => Ok(SummaryType::Rolling),
        "final" => Ok(SummaryType::Final),
        other => Err(RepositoryError::Backend(format!("unknown summary type: {other}"))),
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_session(&self, locale: &str) -> Result<Session, RepositoryError> {
        let locale = locale.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now();
            let session = Session {
                id: Uuid::new_v4(),
                locale,
                started_at: now,
                ended_at: None,
                title: None,
                status: SessionStatus::Active,
                created_at: now,
            };
            conn.execute(
                "INSERT INTO sessions (id, locale, started_at, ended_at, title, status, created_at)
                 VALUES (?1, ?2, ?3, NULL, NULL, ?4, ?5)",
                params![
                    session.id.to_string(),
                    session.locale,
                    micros(session.started_at),
                    status_to_str(session.status),
                    micros(session.created_at),
                ],
            )?;
            Ok(session)
        })
        .await
    }

    async fn end_session(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.with_conn(move |conn| {
            let now = micros(Utc::now());
            conn.execute(
                "UPDATE sessions SET ended_at = ?1, status = 'completed'
                 WHERE id = ?2 AND status != 'completed'",
                params![now, id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn session(&self, id: Uuid) -> Result<Option<Session>, RepositoryError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, locale, started_at, ended_at, title, status, created_at
                 FROM sessions WHERE id = ?1",
                params![id.to_string()],
                row_to_session,
            )
            .optional()
            .map_err(RepositoryError::from)
        })
        .await
    }

    async fn all_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, locale, started_at, ended_at, title, status, created_at
                 FROM sessions ORDER BY started_at DESC",
            )?;
            let rows = stmt.query_map([], row_to_session)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(RepositoryError::from)?);
            }
            Ok(out)
        })
        .await
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])?;
            Ok(())
        })
        .await
    }

    async fn save_segment(&self, segment: StoredSegment) -> Result<(), RepositoryError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO segments
                 (id, session_id, text, started_at, ended_at, confidence, sequence_number, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    segment.id.to_string(),
                    segment.session_id.to_string(),
                    segment.text,
                    micros(segment.started_at),
                    micros(segment.ended_at),
                    segment.confidence,
                    segment.sequence_number as i64,
                    source_to_str(segment.source),
                    micros(segment.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn segments(&self, session_id: Uuid) -> Result<Vec<StoredSegment>, RepositoryError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, text, started_at, ended_at, confidence, sequence_number, source, created_at
                 FROM segments WHERE session_id = ?1 ORDER BY sequence_number ASC",
            )?;
            let rows = stmt.query_map(params![session_id.to_string()], row_to_segment)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(RepositoryError::from)?);
            }
            Ok(out)
        })
        .await
    }

    async fn segments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredSegment>, RepositoryError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, text, started_at, ended_at, confidence, sequence_number, source, created_at
                 FROM segments WHERE started_at >= ?1 AND started_at <= ?2 ORDER BY started_at ASC",
            )?;
            let rows = stmt.query_map(params![micros(from), micros(to)], row_to_segment)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(RepositoryError::from)?);
            }
            Ok(out)
        })
        .await
    }

    async fn segment_count(&self, session_id: Uuid) -> Result<u64, RepositoryError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM segments WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn save_summary(&self, summary: Summary) -> Result<(), RepositoryError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO summaries
                 (id, session_id, content, summary_type, segment_range_start, segment_range_end, model_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    summary.id.to_string(),
                    summary.session_id.to_string(),
                    summary.content,
                    summary_type_to_str(summary.summary_type),
                    summary.segment_range_start as i64,
                    summary.segment_range_end as i64,
                    summary.model_id,
                    micros(summary.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn summaries(&self, session_id: Uuid) -> Result<Vec<Summary>, RepositoryError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, content, summary_type, segment_range_start, segment_range_end, model_id, created_at
                 FROM summaries WHERE session_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![session_id.to_string()], row_to_summary)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(RepositoryError::from)?);
            }
            Ok(out)
        })
        .await
    }

    async fn latest_summary(&self, session_id: Uuid) -> Result<Option<Summary>, RepositoryError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, session_id, content, summary_type, segment_range_start, segment_range_end, model_id, created_at
                 FROM summaries WHERE session_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![session_id.to_string()],
                row_to_summary,
            )
            .optional()
            .map_err(RepositoryError::from)
        })
        .await
    }

    async fn save_topic(&self, topic: Topic) -> Result<(), RepositoryError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO topics
                 (id, session_id, title, summary, segment_range_start, segment_range_end, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    topic.id.to_string(),
                    topic.session_id.to_string(),
                    topic.title,
                    topic.summary,
                    topic.segment_range_start as i64,
                    topic.segment_range_end as i64,
                    micros(topic.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn topics(&self, session_id: Uuid) -> Result<Vec<Topic>, RepositoryError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, title, summary, segment_range_start, segment_range_end, created_at
                 FROM topics WHERE session_id = ?1 ORDER BY segment_range_start ASC",
            )?;
            let rows = stmt.query_map(params![session_id.to_string()], row_to_topic)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(RepositoryError::from)?);
            }
            Ok(out)
        })
        .await
    }
}

/// Maps a SQL-layer decode failure (bad UUID, unknown enum tag) into a
/// `rusqlite::Error` so callers can funnel everything through one
/// `RepositoryError::from(rusqlite::Error)` conversion.
fn conversion_failure(col: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_uuid(col: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| conversion_failure(col, e))
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let locale: String = row.get(1)?;
    let started_at: i64 = row.get(2)?;
    let ended_at: Option<i64> = row.get(3)?;
    let title: Option<String> = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: i64 = row.get(6)?;
    Ok(Session {
        id: parse_uuid(0, &id)?,
        locale,
        started_at: from_micros(started_at),
        ended_at: ended_at.map(from_micros),
        title,
        status: status_from_str(&status).map_err(|e| conversion_failure(5, AsIoError(e.to_string())))?,
        created_at: from_micros(created_at),
    })
}

fn row_to_segment(row: &rusqlite::Row) -> rusqlite::Result<StoredSegment> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let text: String = row.get(2)?;
    let started_at: i64 = row.get(3)?;
    let ended_at: i64 = row.get(4)?;
    let confidence: Option<f32> = row.get(5)?;
    let sequence_number: i64 = row.get(6)?;
    let source: String = row.get(7)?;
    let created_at: i64 = row.get(8)?;
    Ok(StoredSegment {
        id: parse_uuid(0, &id)?,
        session_id: parse_uuid(1, &session_id)?,
        text,
        started_at: from_micros(started_at),
        ended_at: from_micros(ended_at),
        confidence,
        sequence_number: sequence_number as u64,
        source: source_from_str(&source).map_err(|e| conversion_failure(7, AsIoError(e.to_string())))?,
        created_at: from_micros(created_at),
    })
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<Summary> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let content: String = row.get(2)?;
    let summary_type: String = row.get(3)?;
    let segment_range_start: i64 = row.get(4)?;
    let segment_range_end: i64 = row.get(5)?;
    let model_id: String = row.get(6)?;
    let created_at: i64 = row.get(7)?;
    Ok(Summary {
        id: parse_uuid(0, &id)?,
        session_id: parse_uuid(1, &session_id)?,
        content,
        summary_type: summary_type_from_str(&summary_type)
            .map_err(|e| conversion_failure(3, AsIoError(e.to_string())))?,
        segment_range_start: segment_range_start as u64,
        segment_range_end: segment_range_end as u64,
        model_id,
        created_at: from_micros(created_at),
    })
}

fn row_to_topic(row: &rusqlite::Row) -> rusqlite::Result<Topic> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let title: String = row.get(2)?;
    let summary: String = row.get(3)?;
    let segment_range_start: i64 = row.get(4)?;
    let segment_range_end: i64 = row.get(5)?;
    let created_at: i64 = row.get(6)?;
    Ok(Topic {
        id: parse_uuid(0, &id)?,
        session_id: parse_uuid(1, &session_id)?,
        title,
        summary,
        segment_range_start: segment_range_start as u64,
        segment_range_end: segment_range_end as u64,
        created_at: from_micros(created_at),
    })
}

/// Wraps a `String` as a `std::error::Error` so `RepositoryError`'s own
/// `String`-producing helpers can be boxed into a `rusqlite::Error`.
#[derive(Debug)]
struct AsIoError(String);

impl std::fmt::Display for AsIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AsIoError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_segment(session_id: Uuid, seq: u64) -> StoredSegment {
        let now = Utc::now();
        StoredSegment {
            id: Uuid::new_v4(),
            session_id,
            text: format!("segment {seq}"),
            started_at: now,
            ended_at: now,
            confidence: Some(0.9),
            sequence_number: seq,
            source: Source::Microphone,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn create_session_then_fetch_round_trips() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let session = repo.create_session("en-US").await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        let fetched = repo.session(session.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.locale, "en-US");
        assert!(fetched.ended_at.is_none());
    }

    #[tokio::test]
    async fn end_session_is_idempotent() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let session = repo.create_session("en-US").await.unwrap();
        repo.end_session(session.id).await.unwrap();
        repo.end_session(session.id).await.unwrap();

        let fetched = repo.session(session.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
        assert!(fetched.ended_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_sequence_number_is_constraint_violation() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let session = repo.create_session("en-US").await.unwrap();
        repo.save_segment(sample_segment(session.id, 1)).await.unwrap();

        let err = repo
            .save_segment(sample_segment(session.id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn empty_text_is_constraint_violation() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let session = repo.create_session("en-US").await.unwrap();
        let mut segment = sample_segment(session.id, 1);
        segment.text = String::new();

        let err = repo.save_segment(segment).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn delete_session_cascades_to_segments_summaries_topics() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let session = repo.create_session("en-US").await.unwrap();
        repo.save_segment(sample_segment(session.id, 1)).await.unwrap();
        repo.save_summary(Summary {
            id: Uuid::new_v4(),
            session_id: session.id,
            content: "summary".into(),
            summary_type: SummaryType::Rolling,
            segment_range_start: 1,
            segment_range_end: 1,
            model_id: "test-model".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        repo.save_topic(Topic {
            id: Uuid::new_v4(),
            session_id: session.id,
            title: "Topic A".into(),
            summary: "about a thing".into(),
            segment_range_start: 1,
            segment_range_end: 1,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        repo.delete_session(session.id).await.unwrap();

        assert_eq!(repo.segments(session.id).await.unwrap().len(), 0);
        assert_eq!(repo.summaries(session.id).await.unwrap().len(), 0);
        assert_eq!(repo.topics(session.id).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn segments_ordered_by_sequence_number() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let session = repo.create_session("en-US").await.unwrap();
        repo.save_segment(sample_segment(session.id, 2)).await.unwrap();
        repo.save_segment(sample_segment(session.id, 1)).await.unwrap();
        repo.save_segment(sample_segment(session.id, 3)).await.unwrap();

        let segments = repo.segments(session.id).await.unwrap();
        let seqs: Vec<u64> = segments.iter().map(|s| s.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
