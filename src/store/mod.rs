//! Synchronous embedded relational store: one row per job, plus a
//! key-value table for queue-wide flags. Opened once at process start and
//! closed explicitly on shutdown; WAL mode is enabled so a commit that
//! returns implies the row is recoverable.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::queue::job::{FailureReason, Job, JobMetadata, JobStatus};

pub struct Store {
    conn: Connection,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    file_type TEXT,
    file_staging_path TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    error TEXT,
    failure_reason TEXT,
    retry_count INTEGER NOT NULL,
    result_output_path TEXT,
    result_subtitle_path TEXT,
    result_subtitles_json TEXT,
    metadata_json TEXT NOT NULL,
    log_tail_json TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS jobs_status_idx ON jobs(status);
CREATE INDEX IF NOT EXISTS jobs_created_at_idx ON jobs(created_at);

CREATE TABLE IF NOT EXISTS queue_flags (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

impl Store {
    /// Opens (creating if absent) the store at `path` and enables WAL mode.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Opens an in-memory store. Used by tests that do not need durability
    /// across a process restart.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Upserts `job`'s row. All scalar fields are written; `metadata` is
    /// serialized into `metadata_json`.
    pub fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let metadata_json = serde_json::to_string(&job.metadata)?;
        let log_tail_json = serde_json::to_string(&job.log_tail)?;
        let subtitles_json = job
            .result
            .as_ref()
            .and_then(|r| r.subtitles.as_ref())
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO jobs (
                id, status, progress, file_name, file_size, file_type, file_staging_path,
                created_at, started_at, completed_at, error, failure_reason,
                retry_count, result_output_path, result_subtitle_path, result_subtitles_json,
                metadata_json, log_tail_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                file_type = excluded.file_type,
                file_staging_path = excluded.file_staging_path,
                created_at = excluded.created_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                error = excluded.error,
                failure_reason = excluded.failure_reason,
                retry_count = excluded.retry_count,
                result_output_path = excluded.result_output_path,
                result_subtitle_path = excluded.result_subtitle_path,
                result_subtitles_json = excluded.result_subtitles_json,
                metadata_json = excluded.metadata_json,
                log_tail_json = excluded.log_tail_json",
            params![
                job.id,
                job.status.as_str(),
                job.progress as i64,
                job.file.name,
                job.file.size_bytes as i64,
                job.file.media_type,
                job.file.staging_path,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.error,
                job.failure_reason.map(|r| r.as_str()),
                job.retry_count as i64,
                job.result.as_ref().and_then(|r| r.output_video_path.clone()),
                job.result.as_ref().and_then(|r| r.output_subtitle_path.clone()),
                subtitles_json,
                metadata_json,
                log_tail_json,
            ],
        )?;
        Ok(())
    }

    /// Returns all jobs ordered by `created_at` ascending.
    pub fn load_all_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, status, progress, file_name, file_size, file_type, file_staging_path,
                    created_at, started_at, completed_at, error, failure_reason,
                    retry_count, result_output_path, result_subtitle_path, result_subtitles_json,
                    metadata_json, log_tail_json
             FROM jobs ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Idempotent: returns whether a row existed.
    pub fn delete_job(&self, id: &str) -> Result<bool, StoreError> {
        let affected = self.conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Atomically updates status and progress, setting `started_at` on
    /// transition into processing and `completed_at` on terminal transition.
    pub fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        progress: u8,
        now_millis: i64,
    ) -> Result<(), StoreError> {
        match status {
            JobStatus::Processing => {
                self.conn.execute(
                    "UPDATE jobs SET status = ?1, progress = ?2, started_at = ?3 WHERE id = ?4",
                    params![status.as_str(), progress as i64, now_millis, id],
                )?;
            }
            JobStatus::Completed | JobStatus::Failed => {
                self.conn.execute(
                    "UPDATE jobs SET status = ?1, progress = ?2, completed_at = ?3 WHERE id = ?4",
                    params![status.as_str(), progress as i64, now_millis, id],
                )?;
            }
            JobStatus::Pending => {
                self.conn.execute(
                    "UPDATE jobs SET status = ?1, progress = ?2 WHERE id = ?3",
                    params![status.as_str(), progress as i64, id],
                )?;
            }
        }
        Ok(())
    }

    /// Flushes the write-ahead log into the main database file. Called on
    /// graceful shutdown so a subsequent crash has nothing left to replay.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        self.conn.pragma_query(None, "wal_checkpoint", |_| Ok(()))?;
        Ok(())
    }

    pub fn set_flag(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO queue_flags (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_flag(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM queue_flags WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Marks every row with status = processing as failed/crash/"interrupted".
    /// Returns the number of rows affected.
    pub fn mark_interrupted_as_failed(&self) -> Result<usize, StoreError> {
        let affected = self.conn.execute(
            "UPDATE jobs SET status = ?1, failure_reason = ?2, error = ?3
             WHERE status = ?4",
            params![
                JobStatus::Failed.as_str(),
                FailureReason::Crash.as_str(),
                "interrupted",
                JobStatus::Processing.as_str(),
            ],
        )?;
        Ok(affected)
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let status_str: String = row.get(1)?;
    let mut status = JobStatus::from_str(&status_str).unwrap_or(JobStatus::Failed);
    let failure_reason_str: Option<String> = row.get(11)?;
    let metadata_json: String = row.get(16)?;
    let log_tail_json: String = row.get(17)?;
    let mut error: Option<String> = row.get(10)?;
    let mut failure_reason = failure_reason_str.and_then(|s| FailureReason::from_str(&s));

    // An unrecognized metadata kind (e.g. written by a newer version, or
    // corrupted) is surfaced as a failed job with a clear error rather than
    // silently losing the row or aborting the whole load.
    let metadata: JobMetadata = serde_json::from_str(&metadata_json).unwrap_or_else(|_| {
        status = JobStatus::Failed;
        error = Some(format!("unrecognized job metadata: {metadata_json}"));
        failure_reason = Some(FailureReason::Unknown);
        JobMetadata::Unknown { kind: "unrecognized".to_string() }
    });
    let log_tail: Vec<String> = serde_json::from_str(&log_tail_json).unwrap_or_default();

    let output_video_path: Option<String> = row.get(13)?;
    let output_subtitle_path: Option<String> = row.get(14)?;
    let subtitles_json: Option<String> = row.get(15)?;
    let subtitles: Option<Vec<String>> = subtitles_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());
    let result = if output_video_path.is_some() || output_subtitle_path.is_some() || subtitles.is_some() {
        Some(crate::queue::job::JobResult {
            output_video_path,
            output_subtitle_path,
            subtitles,
        })
    } else {
        None
    };

    Ok(Job {
        id: row.get(0)?,
        status,
        progress: row.get::<_, i64>(2)? as u8,
        file: crate::queue::job::FileRecord {
            name: row.get(3)?,
            size_bytes: row.get::<_, i64>(4)? as u64,
            staging_path: row.get(6)?,
            media_type: row.get(5)?,
        },
        metadata,
        result,
        error,
        failure_reason,
        retry_count: row.get::<_, i64>(12)? as u32,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
        log_tail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::{FileRecord, JobMetadata};

    fn sample_job(id: &str, created_at: i64) -> Job {
        Job {
            id: id.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            file: FileRecord {
                name: "input.mp4".to_string(),
                size_bytes: 1024,
                staging_path: Some("/tmp/input.mp4".to_string()),
                media_type: Some("video/mp4".to_string()),
            },
            metadata: JobMetadata::SingleBurn {
                input_path: "/tmp/input.mp4".to_string(),
                subtitle_path: "/tmp/input.srt".to_string(),
                output_path: "/tmp/out.mp4".to_string(),
                duration_seconds: Some(12.0),
            },
            result: None,
            error: None,
            failure_reason: None,
            retry_count: 0,
            created_at,
            started_at: None,
            completed_at: None,
            log_tail: Vec::new(),
        }
    }

    #[test]
    fn save_and_load_round_trips_every_field() {
        let store = Store::open_in_memory().unwrap();
        let job = sample_job("job-1", 1000);
        store.save_job(&job).unwrap();
        let loaded = store.load_all_jobs().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, job.id);
        assert_eq!(loaded[0].status, job.status);
        assert_eq!(loaded[0].file.name, job.file.name);
        assert_eq!(loaded[0].file.size_bytes, job.file.size_bytes);
        assert_eq!(loaded[0].file.staging_path, job.file.staging_path);
        assert_eq!(loaded[0].created_at, job.created_at);
    }

    #[test]
    fn save_and_load_round_trips_result_subtitles_and_staging_path() {
        let store = Store::open_in_memory().unwrap();
        let mut job = sample_job("job-1", 1000);
        job.file.staging_path = Some("/staging/job-1/input.mp4".to_string());
        job.result = Some(crate::queue::job::JobResult {
            output_video_path: None,
            output_subtitle_path: None,
            subtitles: Some(vec!["hello".to_string(), "world".to_string()]),
        });
        store.save_job(&job).unwrap();

        let loaded = store.load_all_jobs().unwrap();
        assert_eq!(loaded[0].file.staging_path.as_deref(), Some("/staging/job-1/input.mp4"));
        let result = loaded[0].result.as_ref().expect("result persisted");
        assert_eq!(result.subtitles.as_deref(), Some(&["hello".to_string(), "world".to_string()][..]));
    }

    #[test]
    fn load_all_jobs_orders_by_created_at() {
        let store = Store::open_in_memory().unwrap();
        store.save_job(&sample_job("b", 200)).unwrap();
        store.save_job(&sample_job("a", 100)).unwrap();
        let loaded = store.load_all_jobs().unwrap();
        assert_eq!(loaded[0].id, "a");
        assert_eq!(loaded[1].id, "b");
    }

    #[test]
    fn delete_job_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.save_job(&sample_job("job-1", 1)).unwrap();
        assert!(store.delete_job("job-1").unwrap());
        assert!(!store.delete_job("job-1").unwrap());
    }

    #[test]
    fn mark_interrupted_as_failed_counts_processing_rows() {
        let store = Store::open_in_memory().unwrap();
        let mut processing = sample_job("p1", 1);
        processing.status = JobStatus::Processing;
        store.save_job(&processing).unwrap();
        store.save_job(&sample_job("pending", 2)).unwrap();

        let count = store.mark_interrupted_as_failed().unwrap();
        assert_eq!(count, 1);

        let loaded = store.load_all_jobs().unwrap();
        let reloaded = loaded.iter().find(|j| j.id == "p1").unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
        assert_eq!(reloaded.failure_reason, Some(FailureReason::Crash));
        assert_eq!(reloaded.error.as_deref(), Some("interrupted"));
    }

    #[test]
    fn unrecognized_metadata_kind_surfaces_as_failed_on_load() {
        let store = Store::open_in_memory().unwrap();
        store.save_job(&sample_job("job-1", 1)).unwrap();
        store
            .conn
            .execute(
                "UPDATE jobs SET metadata_json = ?1 WHERE id = 'job-1'",
                params![r#"{"kind":"from-the-future","field":1}"#],
            )
            .unwrap();

        let loaded = store.load_all_jobs().unwrap();
        assert_eq!(loaded[0].status, JobStatus::Failed);
        assert_eq!(loaded[0].failure_reason, Some(FailureReason::Unknown));
        assert!(loaded[0].error.as_deref().unwrap().contains("unrecognized"));
        assert!(matches!(loaded[0].metadata, JobMetadata::Unknown { .. }));
    }

    #[test]
    fn flags_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_flag("paused").unwrap(), None);
        store.set_flag("paused", "true").unwrap();
        assert_eq!(store.get_flag("paused").unwrap(), Some("true".to_string()));
        store.set_flag("paused", "false").unwrap();
        assert_eq!(store.get_flag("paused").unwrap(), Some("false".to_string()));
    }

    #[test]
    fn update_status_sets_started_at_on_processing_transition() {
        let store = Store::open_in_memory().unwrap();
        store.save_job(&sample_job("job-1", 1)).unwrap();
        store.update_status("job-1", JobStatus::Processing, 0, 5000).unwrap();
        let loaded = store.load_all_jobs().unwrap();
        assert_eq!(loaded[0].started_at, Some(5000));
        assert_eq!(loaded[0].completed_at, None);
    }

    #[test]
    fn update_status_sets_completed_at_on_terminal_transition() {
        let store = Store::open_in_memory().unwrap();
        store.save_job(&sample_job("job-1", 1)).unwrap();
        store.update_status("job-1", JobStatus::Completed, 100, 9000).unwrap();
        let loaded = store.load_all_jobs().unwrap();
        assert_eq!(loaded[0].completed_at, Some(9000));
    }
}
