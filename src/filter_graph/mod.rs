//! Pure filter-graph construction for multi-clip timeline export.
//!
//! `build_filter_graph` has no side effects: given inputs, timeline items and
//! a project configuration it deterministically produces the textual filter
//! graph the external video toolchain consumes, plus the final video/audio
//! stream labels the caller maps to output. Keep it pure — the job processor
//! is the only place that runs the toolchain.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputKind {
    Video,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub kind: InputKind,
    pub path: String,
    pub id: String,
    /// Whether the input has an audio stream. Always `false` for images.
    pub has_audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TimelineItem {
    Clip {
        id: String,
        source_id: String,
        project_start: f64,
        source_in: f64,
        duration: f64,
    },
    Image {
        id: String,
        source_id: String,
        project_start: f64,
        duration: f64,
    },
}

impl TimelineItem {
    fn project_start(&self) -> f64 {
        match self {
            TimelineItem::Clip { project_start, .. } => *project_start,
            TimelineItem::Image { project_start, .. } => *project_start,
        }
    }

    fn duration(&self) -> f64 {
        match self {
            TimelineItem::Clip { duration, .. } => *duration,
            TimelineItem::Image { duration, .. } => *duration,
        }
    }

    fn source_id(&self) -> &str {
        match self {
            TimelineItem::Clip { source_id, .. } => source_id,
            TimelineItem::Image { source_id, .. } => source_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingMode {
    Fit,
    Fill,
    Stretch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub scaling_mode: ScalingMode,
}

/// The final labelled streams produced by the graph, ready for the caller to
/// burn subtitles onto `video` and map alongside `audio`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraphMap {
    pub video: String,
    pub audio: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraphResult {
    pub graph: String,
    pub map: FilterGraphMap,
}

fn scale_chain(mode: ScalingMode, width: u32, height: u32) -> String {
    match mode {
        ScalingMode::Fit => format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease, pad={width}:{height}:(ow-iw)/2:(oh-ih)/2, setsar=1"
        ),
        ScalingMode::Fill => format!(
            "scale={width}:{height}:force_original_aspect_ratio=increase, crop={width}:{height}, setsar=1"
        ),
        ScalingMode::Stretch => format!("scale={width}:{height}, setsar=1"),
    }
}

/// Builds the filter graph for a timeline. Never panics or errors: unknown
/// source ids are skipped with a warning, missing audio is substituted with
/// silence, and a zero-item timeline produces an empty `n=0` concat.
pub fn build_filter_graph(
    inputs: &[Input],
    timeline_items: &[TimelineItem],
    project_config: &ProjectConfig,
) -> FilterGraphResult {
    let mut sorted: Vec<&TimelineItem> = timeline_items.iter().collect();
    sorted.sort_by(|a, b| {
        a.project_start()
            .partial_cmp(&b.project_start())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut filters: Vec<String> = Vec::new();
    let mut video_labels: Vec<String> = Vec::new();
    let mut audio_labels: Vec<String> = Vec::new();

    let mut current_time = 0.0_f64;
    let mut segment_index = 0usize;
    let width = project_config.width;
    let height = project_config.height;
    let fps = project_config.fps;

    for item in sorted {
        if item.project_start() > current_time {
            let gap_duration = item.project_start() - current_time;
            let gapv = format!("gapv{segment_index}");
            let gapa = format!("gapa{segment_index}");
            filters.push(format!(
                "color=s={width}x{height}:c=black:d={gap}[{gapv}]",
                gap = fmt_duration(gap_duration)
            ));
            filters.push(format!(
                "anullsrc=cl=stereo:r=44100:d={gap}[{gapa}]",
                gap = fmt_duration(gap_duration)
            ));
            video_labels.push(format!("[{gapv}]"));
            audio_labels.push(format!("[{gapa}]"));
            segment_index += 1;
        }

        let source = inputs.iter().enumerate().find(|(_, input)| {
            input.id == item.source_id()
                && match item {
                    TimelineItem::Clip { .. } => matches!(input.kind, InputKind::Video),
                    TimelineItem::Image { .. } => matches!(input.kind, InputKind::Image),
                }
        });

        let Some((input_idx, input)) = source else {
            tracing::warn!(
                source_id = item.source_id(),
                "filter graph: unknown source id, skipping timeline item"
            );
            current_time = item.project_start() + item.duration();
            continue;
        };

        let scale = scale_chain(project_config.scaling_mode, width, height);
        let vlabel = format!("v{segment_index}");
        let alabel = format!("a{segment_index}");

        match item {
            TimelineItem::Clip {
                source_in,
                duration,
                ..
            } => {
                filters.push(format!(
                    "[{input_idx}:v] trim=start={source_in}:duration={duration}, setpts=PTS-STARTPTS, {scale}, fps={fps} [{vlabel}]",
                    source_in = fmt_duration(*source_in),
                    duration = fmt_duration(*duration),
                ));
                if input.has_audio {
                    filters.push(format!(
                        "[{input_idx}:a] atrim=start={source_in}:duration={duration}, asetpts=PTS-STARTPTS, aformat=channel_layouts=stereo:sample_rates=44100 [{alabel}]",
                        source_in = fmt_duration(*source_in),
                        duration = fmt_duration(*duration),
                    ));
                } else {
                    filters.push(format!(
                        "anullsrc=cl=stereo:r=44100:d={duration} [{alabel}]",
                        duration = fmt_duration(*duration)
                    ));
                }
            }
            TimelineItem::Image { duration, .. } => {
                filters.push(format!(
                    "[{input_idx}:v] loop=loop=-1:size=1:start=0, trim=duration={duration}, setpts=PTS-STARTPTS, {scale}, fps={fps} [{vlabel}]",
                    duration = fmt_duration(*duration)
                ));
                filters.push(format!(
                    "anullsrc=cl=stereo:r=44100:d={duration} [{alabel}]",
                    duration = fmt_duration(*duration)
                ));
            }
        }

        video_labels.push(format!("[{vlabel}]"));
        audio_labels.push(format!("[{alabel}]"));
        current_time = item.project_start() + item.duration();
        segment_index += 1;
    }

    let segment_count = video_labels.len();
    let concat_inputs: String = video_labels
        .iter()
        .zip(audio_labels.iter())
        .map(|(v, a)| format!("{v}{a}"))
        .collect();
    filters.push(format!(
        "{concat_inputs}concat=n={segment_count}:v=1:a=1[vconcat][aconcat]"
    ));

    FilterGraphResult {
        graph: filters.join(";"),
        map: FilterGraphMap {
            video: "[vconcat]".to_string(),
            audio: "[aconcat]".to_string(),
        },
    }
}

fn fmt_duration(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
