use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

/// Incoming violation frame, as posted by a monitor's `HttpReporter`.
///
/// Every field is optional at the wire level so missing ones can be
/// reported as a client error rather than a parse failure.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewViolationFrame {
    pub quiz_id: Option<String>,
    pub student_username: Option<String>,
    pub violation_type: Option<String>,
    pub frame_data: Option<String>,
    pub timestamp: Option<String>,
}

impl NewViolationFrame {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("quiz_id", &self.quiz_id),
            ("student_username", &self.student_username),
            ("violation_type", &self.violation_type),
            ("frame_data", &self.frame_data),
        ] {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                missing.push(name);
            }
        }
        missing
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ViolationFrameRow {
    pub id: i64,
    pub quiz_id: String,
    pub student_username: String,
    pub violation_type: String,
    pub timestamp: String,
    pub frame_data: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Default)]
pub struct FrameQuery {
    pub quiz_id: String,
    pub student_username: Option<String>,
    pub violation_type: Option<String>,
    /// Inclusive lower bound on `timestamp` (ISO-8601 string compare).
    pub start_date: Option<String>,
    /// Inclusive upper bound on `timestamp`.
    pub end_date: Option<String>,
}

pub struct ViolationFrameStore {
    conn: Connection,
}

impl ViolationFrameStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_violation_frames (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              quiz_id TEXT NOT NULL,
              student_username TEXT NOT NULL,
              violation_type TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              frame_data TEXT NOT NULL,
              created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_violation_frames_quiz
              ON quiz_violation_frames(quiz_id, student_username);
            "#,
        )?;
        Ok(())
    }

    /// Store a frame and return its row id. A missing timestamp is stamped
    /// with the current time.
    pub fn insert(&mut self, frame: &NewViolationFrame) -> Result<i64> {
        let missing = frame.missing_fields();
        if !missing.is_empty() {
            return Err(anyhow!("missing required fields: {}", missing.join(", ")));
        }
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let timestamp = frame
            .timestamp
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| now.clone());

        self.conn.execute(
            r#"
            INSERT INTO quiz_violation_frames
              (quiz_id, student_username, violation_type, timestamp, frame_data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                frame.quiz_id,
                frame.student_username,
                frame.violation_type,
                timestamp,
                frame.frame_data,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Matching rows, newest timestamp first.
    pub fn query(&self, query: &FrameQuery) -> Result<Vec<ViolationFrameRow>> {
        let mut sql = String::from(
            "SELECT id, quiz_id, student_username, violation_type, timestamp, frame_data, created_at \
             FROM quiz_violation_frames WHERE quiz_id = ?",
        );
        let mut args: Vec<&str> = vec![&query.quiz_id];
        for (clause, value) in [
            (" AND student_username = ?", &query.student_username),
            (" AND violation_type = ?", &query.violation_type),
            (" AND timestamp >= ?", &query.start_date),
            (" AND timestamp <= ?", &query.end_date),
        ] {
            if let Some(value) = value {
                sql.push_str(clause);
                args.push(value);
            }
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok(ViolationFrameRow {
                id: row.get(0)?,
                quiz_id: row.get(1)?,
                student_username: row.get(2)?,
                violation_type: row.get(3)?,
                timestamp: row.get(4)?,
                frame_data: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
