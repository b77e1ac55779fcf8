//! End-to-end scenarios against the public `Queue` API, using the mock
//! toolchain binary in place of the real external video toolchain.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reelqueue::ai_fallback::NoAdapters;
use reelqueue::config::Config;
use reelqueue::queue::job::{FileRecord, JobMetadata, JobStatus};
use reelqueue::queue::{JobSubmission, Queue};
use reelqueue::store::Store;

fn mock_toolchain_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_mock_toolchain") {
        return PathBuf::from(path);
    }
    let mut dir = std::env::current_exe().expect("current exe");
    dir.pop();
    if dir.ends_with("deps") {
        dir.pop();
    }
    let direct = dir.join(format!("mock_toolchain{}", std::env::consts::EXE_SUFFIX));
    if direct.exists() {
        return direct;
    }
    dir.join("deps").join(format!("mock_toolchain{}", std::env::consts::EXE_SUFFIX))
}

fn submission(name: &str) -> JobSubmission {
    JobSubmission {
        file: FileRecord {
            name: name.to_string(),
            size_bytes: 10,
            staging_path: None,
            media_type: Some("video/mp4".to_string()),
        },
        metadata: JobMetadata::SingleBurn {
            input_path: "/in.mp4".to_string(),
            subtitle_path: "/subs.srt".to_string(),
            output_path: "/out.mp4".to_string(),
            duration_seconds: Some(1.0),
        },
    }
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

#[test]
fn fifo_under_concurrency_one() {
    let binary = mock_toolchain_path();
    if !binary.exists() {
        eprintln!("skipping: mock_toolchain not built");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = Config::with_staging_root(dir.path().join("root"))
        .unwrap()
        .max_concurrent(1)
        .toolchain_binary(binary);
    let queue = Queue::new(config, Arc::new(NoAdapters)).unwrap();

    let j1 = queue.submit(submission("j1")).unwrap();
    let j2 = queue.submit(submission("j2")).unwrap();
    let j3 = queue.submit(submission("j3")).unwrap();

    let all_done = wait_until(
        || {
            queue
                .get_all_jobs()
                .iter()
                .all(|j| j.status == JobStatus::Completed)
        },
        Duration::from_secs(10),
    );
    assert!(all_done, "expected all jobs to complete");

    let jobs = queue.get_all_jobs();
    assert_eq!(jobs.iter().map(|j| j.id.clone()).collect::<Vec<_>>(), vec![j1.id, j2.id, j3.id]);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
}

#[test]
fn crash_recovery_hold_then_resume_schedules_first() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("root");
    std::fs::create_dir_all(&staging).unwrap();
    let db_path = staging.join("queue.db");

    {
        let store = Store::open(&db_path).unwrap();
        let mut j1 = submission_job("j1", 100);
        j1.status = JobStatus::Processing;
        j1.started_at = Some(100);
        store.save_job(&j1).unwrap();

        let j2 = submission_job("j2", 200);
        store.save_job(&j2).unwrap();
    }

    let config = Config::with_staging_root(staging).unwrap().max_concurrent(1);
    let queue = Queue::new(config, Arc::new(NoAdapters)).unwrap();

    assert!(queue.is_paused());
    let reloaded = queue.get_job("j1").unwrap();
    assert_eq!(reloaded.status, JobStatus::Failed);
    assert_eq!(reloaded.retry_count, 1);
    assert!(reloaded.created_at < 200);

    let j2_unchanged = queue.get_job("j2").unwrap();
    assert_eq!(j2_unchanged.status, JobStatus::Pending);

    queue.resume();
    assert!(!queue.is_paused());
    let j1_after_resume = queue.get_job("j1").unwrap();
    assert_eq!(j1_after_resume.status, JobStatus::Pending);
    assert!(j1_after_resume.created_at < j2_unchanged.created_at);
    assert!(j1_after_resume.completed_at.is_none());
}

fn submission_job(id: &str, created_at: i64) -> reelqueue::queue::job::Job {
    reelqueue::queue::job::Job {
        id: id.to_string(),
        status: JobStatus::Pending,
        progress: 0,
        file: FileRecord {
            name: format!("{id}.mp4"),
            size_bytes: 10,
            staging_path: None,
            media_type: None,
        },
        metadata: JobMetadata::SingleBurn {
            input_path: "/in.mp4".to_string(),
            subtitle_path: "/subs.srt".to_string(),
            output_path: "/out.mp4".to_string(),
            duration_seconds: Some(1.0),
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
fn forced_removal_of_processing_job() {
    let binary = mock_toolchain_path();
    if !binary.exists() {
        eprintln!("skipping: mock_toolchain not built");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    // SAFETY: test process; no concurrent env access expected across threads at this point.
    unsafe {
        std::env::set_var("MOCK_TOOLCHAIN_SLEEP_MS", "2000");
    }
    let config = Config::with_staging_root(dir.path().join("root"))
        .unwrap()
        .max_concurrent(1)
        .toolchain_binary(binary);
    let queue = Queue::new(config, Arc::new(NoAdapters)).unwrap();

    let job = queue.submit(submission("slow")).unwrap();
    let became_processing = wait_until(
        || queue.get_job(&job.id).map(|j| j.status == JobStatus::Processing).unwrap_or(false),
        Duration::from_secs(5),
    );
    assert!(became_processing);

    assert!(queue.remove(&job.id, true).unwrap());
    assert!(queue.get_job(&job.id).is_none());

    // Give the worker time to finish its (now orphaned) run; completion
    // must be a no-op rather than re-inserting the job.
    std::thread::sleep(Duration::from_millis(2500));
    assert!(queue.get_job(&job.id).is_none());
    assert_eq!(queue.clear_all().unwrap(), 0);

    unsafe {
        std::env::remove_var("MOCK_TOOLCHAIN_SLEEP_MS");
    }
}

#[test]
fn cancel_current_requeues_instead_of_failing() {
    let binary = mock_toolchain_path();
    if !binary.exists() {
        eprintln!("skipping: mock_toolchain not built");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    // SAFETY: test process; no concurrent env access expected across threads at this point.
    unsafe {
        std::env::set_var("MOCK_TOOLCHAIN_SLEEP_MS", "2000");
    }
    let config = Config::with_staging_root(dir.path().join("root"))
        .unwrap()
        .max_concurrent(1)
        .toolchain_binary(binary);
    let queue = Queue::new(config, Arc::new(NoAdapters)).unwrap();

    let job = queue.submit(submission("cancel-me")).unwrap();
    let became_processing = wait_until(
        || queue.get_job(&job.id).map(|j| j.status == JobStatus::Processing).unwrap_or(false),
        Duration::from_secs(5),
    );
    assert!(became_processing);

    assert!(queue.cancel_current(&job.id));
    let rewound = queue.get_job(&job.id).unwrap();
    assert_eq!(rewound.status, JobStatus::Pending);
    assert_eq!(rewound.started_at, None);

    // The worker tearing down the cancelled run must not clobber the
    // rewind with a `failed`/`user_cancelled` outcome; once the next
    // (unrestricted) run starts, it should be allowed to actually finish.
    unsafe {
        std::env::remove_var("MOCK_TOOLCHAIN_SLEEP_MS");
    }
    let completed = wait_until(
        || queue.get_job(&job.id).map(|j| j.status == JobStatus::Completed).unwrap_or(false),
        Duration::from_secs(10),
    );
    assert!(completed, "expected the requeued job to be reprocessed to completion");
    let final_job = queue.get_job(&job.id).unwrap();
    assert_eq!(final_job.retry_count, 0);
}
