//! External process execution with concurrent output capture, timeout
//! detection, and forced cancellation.
//!
//! ## Shape of one invocation
//!
//! Every external tool run follows the same pattern: spawn with both
//! streams piped, start two reader tasks that push complete lines to the
//! caller's sinks, and wait for exit in bounded slices so the deadline and
//! the abort flag are checked with sub-second latency. The two readers
//! share one mutex around sink delivery — stdout and stderr may race to
//! produce, but a consumer never sees an interleaved partial line.
//!
//! ## Why kill the process *group*?
//!
//! Several wrapped tools spawn helpers (TeX engines run `mktexpk` and
//! friends; Ghostscript may shell out). Killing only the direct child
//! leaves those orphaned and still holding the output files. Each child is
//! therefore started in its own process group, and forced termination
//! signals the whole group.

use crate::config::{ConversionConfig, TimeoutPolicy};
use crate::error::TexImgError;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Poll slice used when no deadline is configured.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// How long to wait for the reader tasks to observe end-of-stream after a
/// forced kill before abandoning them.
const READER_DRAIN: Duration = Duration::from_millis(500);

/// Cooperative cancellation flag, shared between the caller, the poll
/// loop, and the stream readers. Setting it always escalates to forced
/// termination of the running tool, without consulting the timeout policy.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm before a new job (a config may be reused across jobs).
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Consumer for one captured output line. Both of a process's streams are
/// delivered through sinks of this type under a common lock.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// One external tool launch: executable, arguments, working directory,
/// environment overrides, and a human-readable stage description used in
/// timeout prompts and error messages.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub envs: Vec<(String, String)>,
    /// What the user should install when the program is missing
    /// ("Ghostscript", "a TeX distribution").
    pub hint: String,
    /// What this run is doing, for the freeze prompt
    /// ("compiling the TeX source").
    pub stage: String,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            hint: program.clone(),
            program,
            args: Vec::new(),
            working_dir: working_dir.into(),
            envs: Vec::new(),
            stage: String::from("running an external tool"),
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Append extra TeX search directories to the child's `TEXINPUTS`,
    /// keeping whatever the ambient environment already has. The trailing
    /// separator keeps the default search path active.
    pub fn tex_inputs(mut self, dirs: &[PathBuf]) -> Self {
        if dirs.is_empty() {
            return self;
        }
        let sep = if cfg!(windows) { ';' } else { ':' };
        let mut value = std::env::var("TEXINPUTS").unwrap_or_default();
        if !value.is_empty() && !value.ends_with(sep) {
            value.push(sep);
        }
        for d in dirs {
            value.push_str(&d.to_string_lossy());
            value.push(sep);
        }
        self.envs.push(("TEXINPUTS".into(), value));
        self
    }

    /// The command line as a loggable string.
    fn command_line(&self) -> String {
        format!(
            "{}>\"{}\" {}",
            self.working_dir.display(),
            self.program,
            self.args.join(" ")
        )
    }
}

/// Runs [`ToolInvocation`]s under the policies of one [`ConversionConfig`].
pub struct ProcessRunner<'a> {
    config: &'a ConversionConfig,
}

impl<'a> ProcessRunner<'a> {
    pub fn new(config: &'a ConversionConfig) -> Self {
        Self { config }
    }

    /// A sink that forwards lines to the configured [`OutputListener`]
    /// (and to the debug log). The default destination for tool chatter.
    pub fn console_sink(&self) -> LineSink {
        let listener = self.config.listener.clone();
        Arc::new(move |line: &str| {
            debug!(target: "teximg::tool", "{line}");
            if let Some(ref l) = listener {
                l.line(line);
            }
        })
    }

    /// Run with both streams going to the console sink.
    pub async fn run_logged(&self, inv: &ToolInvocation) -> Result<ExitStatus, TexImgError> {
        let sink = self.console_sink();
        self.run(inv, sink.clone(), sink).await
    }

    /// Launch the tool and wait for it under the configured timeout policy.
    ///
    /// # Errors
    /// * [`TexImgError::ToolNotFound`] — the executable could not be started.
    /// * [`TexImgError::ToolTimedOut`] — deadline elapsed and the policy
    ///   (or the abort flag) chose to kill.
    /// * [`TexImgError::Aborted`] — the abort flag was set, even if the
    ///   process happened to finish.
    pub async fn run(
        &self,
        inv: &ToolInvocation,
        stdout_sink: LineSink,
        stderr_sink: LineSink,
    ) -> Result<ExitStatus, TexImgError> {
        let sink_lock = Arc::new(Mutex::new(()));
        // Echo the command line through the same serialized path as the
        // tool's own output.
        {
            let _g = sink_lock.lock().unwrap_or_else(|p| p.into_inner());
            stdout_sink(&inv.command_line());
        }

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .current_dir(&inv.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &inv.envs {
            cmd.env(k, v);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| TexImgError::ToolNotFound {
            tool: inv.program.clone(),
            hint: inv.hint.clone(),
            detail: e.to_string(),
        })?;

        let abort = self.config.abort.clone();
        let out_task = spawn_reader(
            child.stdout.take(),
            stdout_sink,
            Arc::clone(&sink_lock),
            abort.clone(),
        );
        let err_task = spawn_reader(
            child.stderr.take(),
            stderr_sink,
            Arc::clone(&sink_lock),
            abort.clone(),
        );

        let slice = self.config.timeout.unwrap_or(POLL_SLICE);
        let started = Instant::now();
        let status = loop {
            match tokio::time::timeout(slice, child.wait()).await {
                Ok(waited) => {
                    break waited.map_err(|e| {
                        TexImgError::Internal(format!("wait on '{}': {e}", inv.program))
                    })?;
                }
                Err(_elapsed) => {
                    let kill = abort.is_set()
                        || (self.config.timeout.is_some() && self.should_kill(inv, &sink_lock));
                    if kill {
                        self.kill_tree(&mut child, &inv.program).await;
                        drain_readers(out_task, err_task).await;
                        return Err(TexImgError::ToolTimedOut {
                            tool: inv.program.clone(),
                            secs: started.elapsed().as_secs(),
                        });
                    }
                }
            }
        };

        drain_readers(out_task, err_task).await;
        if abort.is_set() {
            return Err(TexImgError::Aborted);
        }
        debug!("'{}' exited with {status}", inv.program);
        Ok(status)
    }

    /// Apply the timeout policy for one elapsed deadline. `Ask*` policies
    /// hold the sink lock across the prompt so no tool output is printed
    /// mid-question.
    fn should_kill(&self, inv: &ToolInvocation, sink_lock: &Mutex<()>) -> bool {
        match self.config.timeout_policy {
            TimeoutPolicy::AlwaysContinue => false,
            TimeoutPolicy::AlwaysStop => true,
            TimeoutPolicy::AskThenContinue | TimeoutPolicy::AskThenStop => {
                // block_in_place is only legal on the multi-threaded
                // runtime; on a current-thread runtime the prompt cannot
                // be asked, so the policy falls back to its verb.
                let can_block = tokio::runtime::Handle::current().runtime_flavor()
                    == tokio::runtime::RuntimeFlavor::MultiThread;
                match self.config.prompt {
                    Some(ref prompt) if can_block => {
                        let message = format!(
                            "{} is taking a long time. It may be frozen.\n\
                             Keep waiting? Answering no terminates the running program.",
                            inv.stage
                        );
                        let _g = sink_lock.lock().unwrap_or_else(|p| p.into_inner());
                        !tokio::task::block_in_place(|| prompt.ask_continue(&message))
                    }
                    _ => matches!(self.config.timeout_policy, TimeoutPolicy::AskThenStop),
                }
            }
        }
    }

    /// Forcibly terminate the child and all of its descendants, then reap.
    async fn kill_tree(&self, child: &mut Child, program: &str) {
        warn!("terminating '{program}' and its process tree");
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // The child is its own process-group leader (process_group(0)),
            // so signalling -pid reaches every descendant.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Spawn a task that reads complete lines from one stream and delivers
/// them to `sink` under `lock`. Stops early when the abort flag is set.
fn spawn_reader<R>(
    stream: Option<R>,
    sink: LineSink,
    lock: Arc<Mutex<()>>,
    abort: AbortFlag,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(stream) = stream else { return };
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if abort.is_set() {
                return;
            }
            let _g = lock.lock().unwrap_or_else(|p| p.into_inner());
            sink(&line);
        }
    })
}

/// Wait briefly for both readers to observe end-of-stream; abandon them
/// if the pipes stay open (a surviving grandchild can hold them).
async fn drain_readers(out_task: JoinHandle<()>, err_task: JoinHandle<()>) {
    let join = async {
        let _ = out_task.await;
        let _ = err_task.await;
    };
    if tokio::time::timeout(READER_DRAIN, join).await.is_err() {
        warn!("tool output readers did not reach end-of-stream; abandoning them");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_flag_round_trip() {
        let f = AbortFlag::new();
        assert!(!f.is_set());
        let g = f.clone();
        g.set();
        assert!(f.is_set());
        f.reset();
        assert!(!g.is_set());
    }

    #[test]
    fn invocation_builder_accumulates() {
        let inv = ToolInvocation::new("gs", "/tmp")
            .arg("-q")
            .args(["-dBATCH", "-dNOPAUSE"])
            .env("X", "1")
            .hint("Ghostscript")
            .stage("probing bounding boxes");
        assert_eq!(inv.args, vec!["-q", "-dBATCH", "-dNOPAUSE"]);
        assert_eq!(inv.hint, "Ghostscript");
        assert!(inv.command_line().contains("\"gs\" -q"));
    }

    #[test]
    fn tex_inputs_keeps_default_search_path() {
        let inv =
            ToolInvocation::new("platex", "/tmp").tex_inputs(&[PathBuf::from("/opt/styles")]);
        let (_, v) = inv
            .envs
            .iter()
            .find(|(k, _)| k == "TEXINPUTS")
            .expect("TEXINPUTS set");
        assert!(v.contains("/opt/styles"));
        let sep = if cfg!(windows) { ';' } else { ':' };
        assert!(v.ends_with(sep), "trailing separator keeps defaults: {v:?}");
    }
}
