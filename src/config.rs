//! Environment-driven configuration resolved once at construction time.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolved configuration for a [`crate::queue::Queue`] instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical staging root. Contains `queue.db`, `videos/`, `exports/`,
    /// `temp/`. `drafts.db`/`settings.db` may live alongside it but are
    /// never touched by this crate.
    pub staging_root: PathBuf,
    /// Whether file removal should perform a multi-pass secure erase.
    pub secure_erase: bool,
    /// Maximum number of jobs processed concurrently.
    pub max_concurrent: usize,
    /// Whether newly submitted jobs may begin immediately (subject to the
    /// `paused` flag and `max_concurrent`).
    pub auto_start: bool,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    /// Name (resolved via `PATH`) or explicit path of the external video
    /// toolchain binary. Defaults to `"ffmpeg"`; tests typically override
    /// this with an explicit path to a mock binary.
    pub toolchain_binary: PathBuf,
}

impl Config {
    /// Reads `STAGING_DIR`, `SECURE_ERASE` and the provider API key
    /// variables from the process environment, defaulting
    /// `STAGING_DIR` to `<cwd>/storage` when unset.
    pub fn from_env() -> Result<Self> {
        let staging_dir = std::env::var("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join("storage")
            });
        let mut cfg = Self {
            staging_root: staging_dir,
            secure_erase: env_flag("SECURE_ERASE"),
            max_concurrent: 1,
            auto_start: true,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            deepseek_api_key: std::env::var("DEEPSEEK_API_KEY").ok(),
            toolchain_binary: PathBuf::from("ffmpeg"),
        };
        cfg.prepare_staging_root()?;
        Ok(cfg)
    }

    /// Builds a config rooted at an explicit directory, bypassing the
    /// environment. Used by tests and embedders that manage their own
    /// staging directory.
    pub fn with_staging_root(staging_root: impl Into<PathBuf>) -> Result<Self> {
        let mut cfg = Self {
            staging_root: staging_root.into(),
            secure_erase: env_flag("SECURE_ERASE"),
            max_concurrent: 1,
            auto_start: true,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            deepseek_api_key: std::env::var("DEEPSEEK_API_KEY").ok(),
            toolchain_binary: PathBuf::from("ffmpeg"),
        };
        cfg.prepare_staging_root()?;
        Ok(cfg)
    }

    pub fn max_concurrent(mut self, value: usize) -> Self {
        self.max_concurrent = value.max(1);
        self
    }

    pub fn auto_start(mut self, value: bool) -> Self {
        self.auto_start = value;
        self
    }

    pub fn toolchain_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.toolchain_binary = path.into();
        self
    }

    fn prepare_staging_root(&mut self) -> Result<()> {
        fs::create_dir_all(&self.staging_root)
            .with_context(|| format!("creating staging root {:?}", self.staging_root))?;
        self.staging_root = self
            .staging_root
            .canonicalize()
            .with_context(|| format!("canonicalizing staging root {:?}", self.staging_root))?;
        for sub in ["videos", "exports", "temp"] {
            fs::create_dir_all(self.staging_root.join(sub))
                .with_context(|| format!("creating {sub} directory"))?;
        }
        Ok(())
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.staging_root.join("queue.db")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.staging_root.join("videos")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.staging_root.join("exports")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.staging_root.join("temp")
    }

    pub fn job_video_dir(&self, job_id: &str) -> PathBuf {
        self.videos_dir().join(job_id)
    }

    pub fn job_export_dir(&self, job_id: &str) -> PathBuf {
        self.exports_dir().join(job_id)
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Removes a file, honoring [`Config::secure_erase`]: three passes of
/// random overwrite, one zero pass, each fsynced, before unlinking;
/// otherwise a plain unlink.
pub fn remove_file_securely(path: &Path, secure_erase: bool) -> std::io::Result<()> {
    if !secure_erase {
        return match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };
    }

    use std::io::{Seek, SeekFrom, Write};
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let mut file = fs::OpenOptions::new().write(true).open(path)?;
    let mut rng_state: u64 = 0x9E3779B97F4A7C15 ^ (len.wrapping_add(1));
    for _ in 0..3 {
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        let mut buf = [0u8; 4096];
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            fill_random(&mut buf[..chunk], &mut rng_state);
            file.write_all(&buf[..chunk])?;
            remaining -= chunk as u64;
        }
        file.sync_all()?;
    }

    file.seek(SeekFrom::Start(0))?;
    let mut remaining = len;
    let zeros = [0u8; 4096];
    while remaining > 0 {
        let chunk = remaining.min(zeros.len() as u64) as usize;
        file.write_all(&zeros[..chunk])?;
        remaining -= chunk as u64;
    }
    file.sync_all()?;
    drop(file);

    fs::remove_file(path)
}

fn fill_random(buf: &mut [u8], state: &mut u64) {
    // xorshift64* — not cryptographic, adequate for overwrite-pass filler.
    for byte in buf.iter_mut() {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        *byte = (*state & 0xFF) as u8;
    }
}
