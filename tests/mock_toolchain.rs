// A stand-in for the external video toolchain binary, used by integration
// tests. Captures its own argv, optionally emits synthetic progress lines on
// stderr, and exits with a configurable code — never touches real media.

use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

#[derive(Serialize)]
struct CapturePayload {
    argv: Vec<String>,
}

fn main() {
    let argv: Vec<String> = env::args().skip(1).collect();

    if let Ok(capture_path) = env::var("MOCK_TOOLCHAIN_CAPTURE_PATH") {
        let path = PathBuf::from(capture_path);
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let payload = CapturePayload { argv: argv.clone() };
        let json = serde_json::to_string(&payload).expect("mock toolchain capture JSON must serialize");
        fs::write(&path, json).expect("mock toolchain must write capture file");
    }

    if let Ok(sleep_ms) = env::var("MOCK_TOOLCHAIN_SLEEP_MS") {
        if let Ok(ms) = sleep_ms.parse::<u64>() {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }

    let emit_progress = env::var("MOCK_TOOLCHAIN_EMIT_PROGRESS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if emit_progress {
        eprintln!("out_time_ms=0");
        eprintln!("progress=continue");
        eprintln!("out_time_ms=500000");
        eprintln!("progress=continue");
        eprintln!("out_time_ms=1000000");
        eprintln!("progress=end");
        let _ = std::io::stderr().flush();
    }

    let exit_code: i32 = env::var("MOCK_TOOLCHAIN_EXIT_CODE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    std::process::exit(exit_code);
}
