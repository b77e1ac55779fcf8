//! The job domain model: status state machine, opaque-to-callers but typed
//! kind-specific metadata, and the record shape persisted by the store.

use serde::{Deserialize, Serialize};

use crate::ai_fallback::ModelConfig;
use crate::filter_graph::{Input, ProjectConfig, TimelineItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    Crash,
    ApiError,
    UserCancelled,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Crash => "crash",
            FailureReason::ApiError => "api_error",
            FailureReason::UserCancelled => "user_cancelled",
            FailureReason::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "crash" => Some(FailureReason::Crash),
            "api_error" => Some(FailureReason::ApiError),
            "user_cancelled" => Some(FailureReason::UserCancelled),
            "unknown" => Some(FailureReason::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub size_bytes: u64,
    pub staging_path: Option<String>,
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub output_video_path: Option<String>,
    pub output_subtitle_path: Option<String>,
    pub subtitles: Option<Vec<String>>,
}

/// Tagged sum over the known job kinds, replacing a free-form metadata map so
/// a processor can reconstitute its own inputs without guessing at shapes.
/// Serialized as a versioned blob in the `metadata_json` column; an unknown
/// kind on load surfaces as [`JobMetadata::Unknown`] rather than failing to
/// deserialize the whole row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobMetadata {
    #[serde(rename = "single-burn")]
    SingleBurn {
        input_path: String,
        subtitle_path: String,
        output_path: String,
        /// Probed duration of the input, seconds. Progress is computed as
        /// elapsed / this value; `None` means progress stays at 0 until a
        /// duration line is parsed from the toolchain's own stderr.
        #[serde(default)]
        duration_seconds: Option<f64>,
    },
    #[serde(rename = "multi-export")]
    MultiExport {
        inputs: Vec<Input>,
        timeline: Vec<TimelineItem>,
        project_config: ProjectConfig,
        subtitle_path: Option<String>,
        output_path: String,
    },
    /// Transcribe (or translate, when `source_language` is set and the
    /// caller wants the result in a different language) a video via the AI
    /// fallback chain (component D). The processor never decodes the video
    /// itself for this kind — it hands `input_path` straight to the adapter,
    /// which is expected to extract or receive audio on its own terms; the
    /// core's only job is picking the chain and classifying failures.
    #[serde(rename = "transcribe")]
    Transcribe {
        input_path: String,
        prompt: String,
        #[serde(default)]
        chain: Vec<ModelConfig>,
    },
    Unknown { kind: String },
}

impl JobMetadata {
    pub fn kind_str(&self) -> &str {
        match self {
            JobMetadata::SingleBurn { .. } => "single-burn",
            JobMetadata::MultiExport { .. } => "multi-export",
            JobMetadata::Transcribe { .. } => "transcribe",
            JobMetadata::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub file: FileRecord,
    pub metadata: JobMetadata,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub retry_count: u32,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Bounded tail of the processor's recent log/stderr lines (cap 200).
    /// Operational detail, not part of the state-machine invariants.
    pub log_tail: Vec<String>,
}

pub const LOG_TAIL_CAPACITY: usize = 200;

impl Job {
    pub fn push_log_line(&mut self, line: String) {
        self.log_tail.push(line);
        if self.log_tail.len() > LOG_TAIL_CAPACITY {
            let excess = self.log_tail.len() - LOG_TAIL_CAPACITY;
            self.log_tail.drain(0..excess);
        }
    }
}
