// 🗄️ SQLite store - students, peer ratings, submission gate, audit events
// Ratings are replaced per rater on every submission: latest write wins

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Lowest accepted peer rating score.
pub const MIN_SCORE: i32 = 1;

/// Highest accepted peer rating score.
pub const MAX_SCORE: i32 = 5;

/// A student on the roster. Ids are externally assigned (student numbers)
/// and compared lexicographically everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
}

/// One directed peer rating. The store keeps at most one row per
/// (rater, rated) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub rater_id: String,
    pub rated_id: String,
    pub score: i32,
}

impl Rating {
    pub fn score_in_range(score: i32) -> bool {
        (MIN_SCORE..=MAX_SCORE).contains(&score)
    }
}

/// Audit trail entry. Every mutation of the store is recorded as an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rater_id TEXT NOT NULL,
            rated_id TEXT NOT NULL,
            score INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(rater_id, rated_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_rater ON evaluations(rater_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_id)",
        [],
    )?;

    // Submission gate starts open
    conn.execute(
        "INSERT OR IGNORE INTO settings (key, value) VALUES ('form_open', '1')",
        [],
    )?;

    info!("store initialized");
    Ok(())
}

/// Insert students, skipping ids already present. Returns the number
/// actually inserted.
pub fn insert_students(conn: &Connection, students: &[Student]) -> Result<usize> {
    let mut inserted = 0;

    for student in students {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO students (id, name) VALUES (?1, ?2)",
            params![student.id, student.name],
        )?;
        inserted += changed;
    }

    if inserted > 0 {
        let event = Event::new(
            "roster_imported",
            "roster",
            serde_json::json!({ "inserted": inserted, "received": students.len() }),
            "roster_importer",
        );
        let _ = insert_event(conn, &event);
    }

    info!(inserted, received = students.len(), "roster import");
    Ok(inserted)
}

pub fn get_all_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare("SELECT id, name FROM students ORDER BY id")?;

    let students = stmt
        .query_map([], |row| {
            Ok(Student {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(students)
}

pub fn count_students(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;

    Ok(count)
}

/// Replace the full rating batch of one rater. The previous batch is
/// deleted first so a re-submission always wins. Every score is validated
/// before any row is touched.
pub fn replace_ratings_for_rater(
    conn: &Connection,
    rater_id: &str,
    ratings: &[Rating],
) -> Result<usize> {
    if rater_id.trim().is_empty() {
        bail!("rater id must not be empty");
    }

    for rating in ratings {
        if rating.rater_id != rater_id {
            bail!(
                "rating for {} carries rater id {} but batch belongs to {}",
                rating.rated_id,
                rating.rater_id,
                rater_id
            );
        }
        if !Rating::score_in_range(rating.score) {
            bail!(
                "score {} for {} out of range {}..={}",
                rating.score,
                rating.rated_id,
                MIN_SCORE,
                MAX_SCORE
            );
        }
    }

    conn.execute(
        "DELETE FROM evaluations WHERE rater_id = ?1",
        params![rater_id],
    )?;

    for rating in ratings {
        conn.execute(
            "INSERT INTO evaluations (rater_id, rated_id, score) VALUES (?1, ?2, ?3)",
            params![rating.rater_id, rating.rated_id, rating.score],
        )?;
    }

    let event = Event::new(
        "ratings_submitted",
        rater_id,
        serde_json::json!({ "count": ratings.len() }),
        rater_id,
    );
    let _ = insert_event(conn, &event);

    Ok(ratings.len())
}

pub fn get_all_ratings(conn: &Connection) -> Result<Vec<Rating>> {
    let mut stmt = conn.prepare("SELECT rater_id, rated_id, score FROM evaluations")?;

    let ratings = stmt
        .query_map([], |row| {
            Ok(Rating {
                rater_id: row.get(0)?,
                rated_id: row.get(1)?,
                score: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ratings)
}

pub fn get_ratings_by_rater(conn: &Connection, rater_id: &str) -> Result<Vec<Rating>> {
    let mut stmt = conn.prepare(
        "SELECT rater_id, rated_id, score FROM evaluations WHERE rater_id = ?1 ORDER BY rated_id",
    )?;

    let ratings = stmt
        .query_map(params![rater_id], |row| {
            Ok(Rating {
                rater_id: row.get(0)?,
                rated_id: row.get(1)?,
                score: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ratings)
}

/// Whether the rating submission form is currently accepting batches.
pub fn is_form_open(conn: &Connection) -> Result<bool> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = 'form_open'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.as_deref() == Some("1"))
}

pub fn set_form_open(conn: &Connection, open: bool) -> Result<()> {
    let value = if open { "1" } else { "0" };

    conn.execute(
        "INSERT INTO settings (key, value) VALUES ('form_open', ?1)
         ON CONFLICT(key) DO UPDATE SET value = ?1",
        params![value],
    )?;

    let event = Event::new(
        "form_toggled",
        "form_open",
        serde_json::json!({ "open": open }),
        "admin",
    );
    let _ = insert_event(conn, &event);

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, entity_id, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_id, data, actor
         FROM events
         WHERE entity_id = ?1
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(4)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_id: row.get(3)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
