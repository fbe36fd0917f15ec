//! Job repository: CRUD operations for the `conversion_jobs` table.
//!
//! Every query is scoped to a single presentation or a single row. Several
//! rows may exist for one presentation; the most recently created one is
//! authoritative.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Lifecycle state of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    /// `finished` and `failed` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Valid moves: `queued → started → finished` and
    /// `queued | started → failed`. Re-asserting a non-terminal status is a
    /// no-op and allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Queued | JobStatus::Started | JobStatus::Failed) => true,
            (JobStatus::Started, JobStatus::Started | JobStatus::Finished | JobStatus::Failed) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "started" => Ok(JobStatus::Started),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DatabaseError::UnknownStatus(other.to_string())),
        }
    }
}

/// A conversion job row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionJob {
    pub id: i64,
    pub presentation_id: i64,
    /// Queue identifier, or a `local-` marker for inline conversions.
    pub job_id: Option<String>,
    pub status: JobStatus,
    /// PDF filename once finished; error text once failed.
    pub result: Option<String>,
    /// Newline-joined trace of conversion steps.
    pub log: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl ConversionJob {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = status.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

        Ok(Self {
            id: row.get("id")?,
            presentation_id: row.get("presentation_id")?,
            job_id: row.get("job_id")?,
            status,
            result: row.get("result")?,
            log: row.get("log")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Changes applied by [`update`]. Unset fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct JobUpdate<'a> {
    pub status: Option<JobStatus>,
    pub result: Option<&'a str>,
    /// Appended to the existing log with a newline separator.
    pub log_append: Option<&'a str>,
}

impl<'a> JobUpdate<'a> {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn log(line: &'a str) -> Self {
        Self {
            log_append: Some(line),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: &'a str) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_log(mut self, line: &'a str) -> Self {
        self.log_append = Some(line);
        self
    }
}

/// Timestamps are fixed-width RFC 3339 so that text ordering matches time
/// ordering.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn append_line(existing: Option<String>, line: &str) -> String {
    match existing {
        Some(log) if !log.is_empty() => format!("{}\n{}", log, line),
        _ => line.to_string(),
    }
}

fn select_by_id(
    conn: &rusqlite::Connection,
    id: i64,
) -> Result<Option<ConversionJob>, DatabaseError> {
    let job = conn
        .query_row(
            "SELECT * FROM conversion_jobs WHERE id = ?1",
            params![id],
            ConversionJob::from_row,
        )
        .optional()?;
    Ok(job)
}

/// Inserts a new job row and returns it.
pub fn create(
    db: &Database,
    presentation_id: i64,
    status: JobStatus,
    job_id: Option<&str>,
) -> Result<ConversionJob, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO conversion_jobs (presentation_id, job_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![presentation_id, job_id, status.as_str(), now_timestamp()],
        )?;
        let id = conn.last_insert_rowid();
        select_by_id(conn, id)?.ok_or(DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    })
}

/// Inserts a `queued` row for `job_id` unless a row carrying that job id
/// already exists. Returns `None` when the insert was skipped, which
/// happens when a worker picked the task up before the enqueuing caller
/// got to record it.
pub fn insert_queued(
    db: &Database,
    presentation_id: i64,
    job_id: &str,
) -> Result<Option<ConversionJob>, DatabaseError> {
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT INTO conversion_jobs (presentation_id, job_id, status, created_at)
             SELECT ?1, ?2, ?3, ?4
             WHERE NOT EXISTS (SELECT 1 FROM conversion_jobs WHERE job_id = ?2)",
            params![
                presentation_id,
                job_id,
                JobStatus::Queued.as_str(),
                now_timestamp()
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        select_by_id(conn, conn.last_insert_rowid())
    })
}

/// Finds a job by its row id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ConversionJob>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Finds the newest row carrying the given queue job id.
pub fn find_by_job_id(db: &Database, job_id: &str) -> Result<Option<ConversionJob>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                "SELECT * FROM conversion_jobs WHERE job_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![job_id],
                ConversionJob::from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Returns the authoritative (most recently created) job for a presentation.
pub fn find_latest(
    db: &Database,
    presentation_id: i64,
) -> Result<Option<ConversionJob>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                "SELECT * FROM conversion_jobs WHERE presentation_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![presentation_id],
                ConversionJob::from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// All jobs for a presentation, newest first.
pub fn list_for_presentation(
    db: &Database,
    presentation_id: i64,
) -> Result<Vec<ConversionJob>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM conversion_jobs WHERE presentation_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![presentation_id], ConversionJob::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Applies `changes` to the row with the given id.
///
/// The current row is re-read under the connection lock, so callers never
/// write back a stale copy. Returns `Ok(None)` if the row no longer exists.
pub fn update(
    db: &Database,
    id: i64,
    changes: &JobUpdate<'_>,
) -> Result<Option<ConversionJob>, DatabaseError> {
    db.with_conn(|conn| {
        let Some(current) = select_by_id(conn, id)? else {
            return Ok(None);
        };

        let status = match changes.status {
            Some(next) if !current.status.can_transition_to(next) => {
                return Err(DatabaseError::InvalidTransition {
                    id,
                    from: current.status,
                    to: next,
                });
            }
            Some(next) => next,
            None => current.status,
        };

        let result = changes
            .result
            .map(str::to_string)
            .or(current.result);
        let log = match changes.log_append {
            Some(line) => Some(append_line(current.log, line)),
            None => current.log,
        };

        conn.execute(
            "UPDATE conversion_jobs SET status = ?2, result = ?3, log = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, status.as_str(), result, log, now_timestamp()],
        )?;

        select_by_id(conn, id)
    })
}
