//! Routes a job to the right execution strategy by examining
//! `metadata.kind`, builds the external toolchain's argv, and translates its
//! progress stream into `0..100`. The job processor is the only place that
//! runs the external toolchain; the filter-graph builder it calls for
//! multi-export jobs stays pure.

use std::fs;
use std::path::Path;

use crate::ai_fallback::{self, AdapterRegistry, TaskParams};
use crate::config::Config;
use crate::error::Task;
use crate::filter_graph::build_filter_graph;
use crate::path_safety::is_path_safe;
use crate::queue::job::{Job, JobMetadata, JobResult};
use crate::toolchain::{self, CancellationToken};

#[derive(Debug)]
pub enum ProcessorError {
    UnsafePath(String),
    InputMissing(String),
    Io(String),
    Toolchain(crate::error::ToolchainError),
    Fallback(crate::error::FallbackError),
    UnknownKind(String),
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorError::UnsafePath(p) => write!(f, "path rejected by safety gate: {p}"),
            ProcessorError::InputMissing(p) => write!(f, "required input path does not exist: {p}"),
            ProcessorError::Io(msg) => write!(f, "{msg}"),
            ProcessorError::Toolchain(e) => write!(f, "{e}"),
            ProcessorError::Fallback(e) => write!(f, "{e}"),
            ProcessorError::UnknownKind(k) => write!(f, "unrecognized job kind: {k}"),
        }
    }
}

/// Checks that `path` passes the path-safety gate and that the file it names
/// already exists. Used for every required input path before the toolchain
/// or an AI adapter ever sees it.
fn check_input(staging_root: &Path, path: &str) -> Result<(), ProcessorError> {
    if !is_path_safe(path, staging_root) {
        return Err(ProcessorError::UnsafePath(path.to_string()));
    }
    if !Path::new(path).exists() {
        return Err(ProcessorError::InputMissing(path.to_string()));
    }
    Ok(())
}

/// Checks that `path` passes the path-safety gate and creates its parent
/// directory, so the toolchain (or a later file write) never fails because
/// an output directory is missing.
fn check_output(staging_root: &Path, path: &str) -> Result<(), ProcessorError> {
    if !is_path_safe(path, staging_root) {
        return Err(ProcessorError::UnsafePath(path.to_string()));
    }
    create_dir(Path::new(path).parent())
}

fn create_dir(dir: Option<&Path>) -> Result<(), ProcessorError> {
    let Some(dir) = dir else { return Ok(()) };
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| ProcessorError::Io(format!("creating output directory {dir:?}: {e}")))
}

/// Executes `job` against the external toolchain or the AI fallback engine
/// (component D), reporting progress through `on_progress` as it is parsed
/// from the toolchain's stderr. Every required path is checked against the
/// path-safety gate (and, for inputs, for existence) before any I/O runs;
/// required output directories — both the job's own container directory
/// under the staging layout and the specific output path's parent — are
/// created first. Returns the populated job result on success.
pub fn run_job(
    job: &Job,
    binary: &Path,
    config: &Config,
    registry: &dyn AdapterRegistry,
    on_progress: impl FnMut(u8),
    cancel: &CancellationToken,
) -> Result<JobResult, ProcessorError> {
    let staging_root = config.staging_root.as_path();
    match &job.metadata {
        JobMetadata::SingleBurn {
            input_path,
            subtitle_path,
            output_path,
            duration_seconds,
        } => {
            check_input(staging_root, input_path)?;
            check_input(staging_root, subtitle_path)?;
            create_dir(Some(&config.job_video_dir(&job.id)))?;
            check_output(staging_root, output_path)?;
            let args = single_burn_args(input_path, subtitle_path, output_path);
            toolchain::run(binary, &args, *duration_seconds, on_progress, cancel)
                .map_err(ProcessorError::Toolchain)?;
            Ok(JobResult {
                output_video_path: Some(output_path.clone()),
                output_subtitle_path: Some(subtitle_path.clone()),
                subtitles: None,
            })
        }
        JobMetadata::MultiExport {
            inputs,
            timeline,
            project_config,
            subtitle_path,
            output_path,
        } => {
            for input in inputs {
                check_input(staging_root, &input.path)?;
            }
            if let Some(subtitle_path) = subtitle_path {
                check_input(staging_root, subtitle_path)?;
            }
            create_dir(Some(&config.job_export_dir(&job.id)))?;
            check_output(staging_root, output_path)?;
            let graph = build_filter_graph(inputs, timeline, project_config);
            let total_duration = timeline
                .iter()
                .map(|item| timeline_item_end(item))
                .fold(0.0_f64, f64::max);
            let args = multi_export_args(inputs, &graph, subtitle_path.as_deref(), output_path);
            toolchain::run(binary, &args, Some(total_duration), on_progress, cancel)
                .map_err(ProcessorError::Toolchain)?;
            Ok(JobResult {
                output_video_path: Some(output_path.clone()),
                output_subtitle_path: subtitle_path.clone(),
                subtitles: None,
            })
        }
        JobMetadata::Transcribe { input_path, prompt, chain } => {
            check_input(staging_root, input_path)?;
            let result = ai_fallback::process(
                Task::Generate,
                &TaskParams::Generate { prompt: prompt.clone() },
                chain,
                registry,
            )
            .map_err(ProcessorError::Fallback)?;
            Ok(JobResult {
                output_video_path: None,
                output_subtitle_path: None,
                subtitles: Some(result.subtitles.into_iter().map(|s| s.text).collect()),
            })
        }
        JobMetadata::Unknown { kind } => Err(ProcessorError::UnknownKind(kind.clone())),
    }
}

fn timeline_item_end(item: &crate::filter_graph::TimelineItem) -> f64 {
    use crate::filter_graph::TimelineItem::*;
    match item {
        Clip { project_start, duration, .. } => project_start + duration,
        Image { project_start, duration, .. } => project_start + duration,
    }
}

fn single_burn_args(input_path: &str, subtitle_path: &str, output_path: &str) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input_path.to_string(),
        "-vf".to_string(),
        format!("subtitles={subtitle_path}"),
        "-progress".to_string(),
        "pipe:2".to_string(),
        output_path.to_string(),
    ]
}

fn multi_export_args(
    inputs: &[crate::filter_graph::Input],
    graph: &crate::filter_graph::FilterGraphResult,
    subtitle_path: Option<&str>,
    output_path: &str,
) -> Vec<String> {
    let mut args = Vec::new();
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.path.clone());
    }

    let filter_complex = match subtitle_path {
        Some(path) => format!(
            "{};{}subtitles={path}[vfinal]",
            graph.graph, graph.map.video
        ),
        None => graph.graph.clone(),
    };
    let video_map = if subtitle_path.is_some() {
        "[vfinal]".to_string()
    } else {
        graph.map.video.clone()
    };

    args.push("-filter_complex".to_string());
    args.push(filter_complex);
    args.push("-map".to_string());
    args.push(video_map);
    args.push("-map".to_string());
    args.push(graph.map.audio.clone());
    args.push("-progress".to_string());
    args.push("pipe:2".to_string());
    args.push(output_path.to_string());
    args
}
