//! End-to-end tests for the process runner against real processes.
//!
//! These only exercise POSIX shell utilities, so they are unix-gated;
//! the conversion pipeline itself needs a TeX distribution and is not
//! tested here.

#![cfg(unix)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use teximg::config::{ConversionConfig, FreezePrompt, TimeoutPolicy};
use teximg::error::TexImgError;
use teximg::runner::{LineSink, ProcessRunner, ToolInvocation};

fn collecting_sink() -> (Arc<Mutex<Vec<String>>>, LineSink) {
    let acc = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let acc = Arc::clone(&acc);
        Arc::new(move |line: &str| acc.lock().unwrap().push(line.to_string()))
    };
    (acc, sink as LineSink)
}

#[tokio::test(flavor = "multi_thread")]
async fn captures_stdout_and_stderr_separately() {
    let config = ConversionConfig::default();
    let runner = ProcessRunner::new(&config);
    let (out, out_sink) = collecting_sink();
    let (err, err_sink) = collecting_sink();
    let inv = ToolInvocation::new("sh", std::env::temp_dir())
        .arg("-c")
        .arg("echo hello; echo oops >&2");
    let status = runner.run(&inv, out_sink, err_sink).await.unwrap();
    assert!(status.success());
    // First stdout line is the echoed command line.
    let out = out.lock().unwrap();
    assert!(out.iter().any(|l| l == "hello"), "{out:?}");
    assert!(err.lock().unwrap().iter().any(|l| l == "oops"));
}

#[tokio::test(flavor = "multi_thread")]
async fn always_stop_kills_a_frozen_tool() {
    let config = ConversionConfig::builder()
        .timeout(Some(Duration::from_secs(1)))
        .timeout_policy(TimeoutPolicy::AlwaysStop)
        .build()
        .unwrap();
    let runner = ProcessRunner::new(&config);
    let inv = ToolInvocation::new("sleep", std::env::temp_dir()).arg("100");
    let started = Instant::now();
    let err = runner.run_logged(&inv).await.unwrap_err();
    assert!(matches!(err, TexImgError::ToolTimedOut { .. }), "{err}");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "kill took {:?}",
        started.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_flag_overrides_a_lenient_policy() {
    let config = ConversionConfig::builder()
        .timeout(Some(Duration::from_millis(200)))
        .timeout_policy(TimeoutPolicy::AlwaysContinue)
        .build()
        .unwrap();
    let abort = config.abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        abort.set();
    });
    let runner = ProcessRunner::new(&config);
    let inv = ToolInvocation::new("sleep", std::env::temp_dir()).arg("100");
    let started = Instant::now();
    let err = runner.run_logged(&inv).await.unwrap_err();
    assert!(
        matches!(
            err,
            TexImgError::ToolTimedOut { .. } | TexImgError::Aborted
        ),
        "{err}"
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// A prompt that records whether it was consulted and always answers no.
struct RefusingPrompt(Arc<AtomicBool>);

impl FreezePrompt for RefusingPrompt {
    fn ask_continue(&self, _message: &str) -> bool {
        self.0.store(true, Ordering::SeqCst);
        false
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_policy_consults_the_prompt() {
    let asked = Arc::new(AtomicBool::new(false));
    let config = ConversionConfig::builder()
        .timeout(Some(Duration::from_millis(300)))
        .timeout_policy(TimeoutPolicy::AskThenContinue)
        .prompt(Arc::new(RefusingPrompt(Arc::clone(&asked))))
        .build()
        .unwrap();
    let runner = ProcessRunner::new(&config);
    let inv = ToolInvocation::new("sleep", std::env::temp_dir()).arg("100");
    let err = runner.run_logged(&inv).await.unwrap_err();
    assert!(matches!(err, TexImgError::ToolTimedOut { .. }), "{err}");
    assert!(asked.load(Ordering::SeqCst), "prompt was never consulted");
}

#[tokio::test]
async fn ask_policy_on_a_current_thread_runtime_falls_back_to_its_verb() {
    // Blocking on the prompt is impossible here, so AskThenStop must
    // behave like AlwaysStop instead of panicking.
    let asked = Arc::new(AtomicBool::new(false));
    let config = ConversionConfig::builder()
        .timeout(Some(Duration::from_millis(300)))
        .timeout_policy(TimeoutPolicy::AskThenStop)
        .prompt(Arc::new(RefusingPrompt(Arc::clone(&asked))))
        .build()
        .unwrap();
    let runner = ProcessRunner::new(&config);
    let inv = ToolInvocation::new("sleep", std::env::temp_dir()).arg("100");
    let started = Instant::now();
    let err = runner.run_logged(&inv).await.unwrap_err();
    assert!(matches!(err, TexImgError::ToolTimedOut { .. }), "{err}");
    assert!(!asked.load(Ordering::SeqCst), "prompt cannot be asked here");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_program_reports_tool_not_found() {
    let config = ConversionConfig::default();
    let runner = ProcessRunner::new(&config);
    let inv = ToolInvocation::new("definitely-not-a-real-tool-4921", std::env::temp_dir())
        .hint("nothing installable");
    let err = runner.run_logged(&inv).await.unwrap_err();
    match err {
        TexImgError::ToolNotFound { tool, hint, .. } => {
            assert_eq!(tool, "definitely-not-a-real-tool-4921");
            assert_eq!(hint, "nothing installable");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn nonzero_exit_is_reported_in_the_status() {
    let config = ConversionConfig::default();
    let runner = ProcessRunner::new(&config);
    let inv = ToolInvocation::new("sh", std::env::temp_dir())
        .arg("-c")
        .arg("exit 3");
    let status = runner.run_logged(&inv).await.unwrap();
    assert!(!status.success());
    assert_eq!(status.code(), Some(3));
}
