//! Preparing and running trials of user programs.
//!
//! Every prepared artifact owns a private scratch workspace that is removed when the
//! artifact is dropped, whichever way the request ends.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::{EcoError, EcoResult, JsonExecutor, Language, Target};

/// Polling starts fine-grained for short trials and backs off so long trials spend
/// little CPU inside the sampling window.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for output readers once the trial's process group is gone.
const READER_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialOutcome {
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
}

impl TrialOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// A prepared artifact. Dropping it releases everything `prepare` acquired.
pub trait Workload: Send {
    fn execute(&mut self, timeout: Duration) -> EcoResult<TrialOutcome>;
}

pub trait WorkloadExecutor: Send + Sync {
    /// Fails with [`EcoError::Compilation`] when the toolchain rejects the source.
    fn prepare(&self, source: &str, target: Target) -> EcoResult<Box<dyn Workload>>;
}

/// Exclusive scratch directory for one request.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn acquire() -> EcoResult<Self> {
        let dir = std::env::temp_dir().join(format!("ecobench-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("acquired workspace {}", dir.display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => tracing::debug!("released workspace {}", self.dir.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!("failed to remove workspace {}: {err}", self.dir.display()),
        }
    }
}

/// Interpreter and compiler commands, overridable from `[toolchain]` in the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    pub python: String,
    pub node: String,
    pub javac: String,
    pub java: String,
    pub gcc: String,
    pub gxx: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            node: "node".to_string(),
            javac: "javac".to_string(),
            java: "java".to_string(),
            gcc: "gcc".to_string(),
            gxx: "g++".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct RunCommand {
    program: String,
    args: Vec<String>,
}

/// Runs programs as child processes using the configured toolchain.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    toolchain: Toolchain,
}

impl ProcessExecutor {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    fn compile(
        &self,
        compiler: &str,
        args: &[String],
        workspace: &Workspace,
    ) -> EcoResult<()> {
        tracing::info!("compiling with {compiler}");
        let output = Command::new(compiler)
            .args(args)
            .current_dir(workspace.path())
            .output()
            .map_err(|e| {
                EcoError::Compilation(format!("compilation error: failed to start {compiler}: {e}"))
            })?;
        if !output.status.success() {
            let diagnostic = String::from_utf8_lossy(&output.stderr);
            tracing::warn!("compilation failed: {}", diagnostic.trim_end());
            return Err(EcoError::Compilation(format!("compilation error:\n{diagnostic}")));
        }
        Ok(())
    }
}

impl WorkloadExecutor for ProcessExecutor {
    fn prepare(&self, source: &str, target: Target) -> EcoResult<Box<dyn Workload>> {
        let Target::Code(language) = target else {
            return Err(EcoError::InvalidArgument(format!(
                "process executor cannot run {target} targets"
            )));
        };

        let workspace = Workspace::acquire()?;
        let source_path = workspace.path().join(language.source_file_name());
        std::fs::write(&source_path, source)?;
        let source_arg = source_path.to_string_lossy().to_string();
        let binary_arg = workspace.path().join("Main").to_string_lossy().to_string();

        let command = match language {
            Language::Python => RunCommand {
                program: self.toolchain.python.clone(),
                args: vec![source_arg],
            },
            Language::Javascript => RunCommand {
                program: self.toolchain.node.clone(),
                args: vec![source_arg],
            },
            Language::Java => {
                self.compile(&self.toolchain.javac, &[source_arg], &workspace)?;
                RunCommand {
                    program: self.toolchain.java.clone(),
                    args: vec![
                        "-cp".to_string(),
                        workspace.path().to_string_lossy().to_string(),
                        "Main".to_string(),
                    ],
                }
            }
            Language::C | Language::Cpp => {
                let compiler = if language == Language::C {
                    &self.toolchain.gcc
                } else {
                    &self.toolchain.gxx
                };
                self.compile(
                    compiler,
                    &[source_arg, "-o".to_string(), binary_arg.clone()],
                    &workspace,
                )?;
                RunCommand {
                    program: binary_arg,
                    args: Vec::new(),
                }
            }
        };

        Ok(Box::new(ProcessWorkload { command, workspace }))
    }
}

struct ProcessWorkload {
    command: RunCommand,
    workspace: Workspace,
}

impl Workload for ProcessWorkload {
    fn execute(&mut self, timeout: Duration) -> EcoResult<TrialOutcome> {
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .current_dir(self.workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so anything the program spawns dies with it.
        #[cfg(unix)]
        command.process_group(0);
        wait_with_timeout(command.spawn()?, timeout)
    }
}

fn spawn_reader<R: Read + Send + 'static>(handle: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut handle) = handle {
            let _ = handle.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn next_poll_interval(current: Duration) -> Duration {
    (current * 2).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

/// Kills the trial's whole process group; the direct child is killed as well in case
/// the group could not be signalled.
fn kill_trial(child: &mut Child) {
    kill_process_group(child.id());
    let _ = child.kill();
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let status = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pgid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = status {
        tracing::warn!("failed to signal process group {pgid}: {err}");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Output of one stream, bounded by the trial deadline. A descendant that keeps the pipe
/// open past the deadline gets its group killed; the second value reports that.
fn collect_output(
    rx: &Receiver<Vec<u8>>,
    deadline: Instant,
    child: &mut Child,
) -> (Vec<u8>, bool) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(buf) => (buf, false),
        Err(RecvTimeoutError::Disconnected) => (Vec::new(), false),
        Err(RecvTimeoutError::Timeout) => {
            kill_trial(child);
            (rx.recv_timeout(READER_GRACE).unwrap_or_default(), true)
        }
    }
}

/// Polls the child until it exits or the deadline passes. At the deadline the whole
/// process group is killed, and output collection never outlives the deadline either.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> EcoResult<TrialOutcome> {
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());
    let deadline = Instant::now() + timeout;
    let mut interval = MIN_POLL_INTERVAL;

    let (status, mut timed_out) = loop {
        if let Some(status) = child.try_wait()? {
            break (status, false);
        }
        let now = Instant::now();
        if now >= deadline {
            kill_trial(&mut child);
            break (child.wait()?, true);
        }
        thread::sleep(interval.min(deadline - now));
        interval = next_poll_interval(interval);
    };

    let (stdout, stdout_overran) = collect_output(&stdout, deadline, &mut child);
    let (stderr, stderr_overran) = collect_output(&stderr, deadline, &mut child);
    if stdout_overran || stderr_overran {
        tracing::warn!("trial left processes holding its output past the deadline");
        timed_out = true;
    }

    Ok(TrialOutcome {
        exit_code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        timed_out,
    })
}

/// Routes code targets to child processes and JSON targets to the in-process parsers.
#[derive(Debug, Clone, Default)]
pub struct DefaultExecutor {
    process: ProcessExecutor,
    json: JsonExecutor,
}

impl DefaultExecutor {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            process: ProcessExecutor::new(toolchain),
            json: JsonExecutor,
        }
    }
}

impl WorkloadExecutor for DefaultExecutor {
    fn prepare(&self, source: &str, target: Target) -> EcoResult<Box<dyn Workload>> {
        match target {
            Target::Code(_) => self.process.prepare(source, target),
            Target::Json(_) => self.json.prepare(source, target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonParser;

    fn available(program: &str) -> bool {
        Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let ws = Workspace::acquire().expect("workspace");
        let dir = ws.path().to_path_buf();
        std::fs::write(dir.join("Main.py"), "print(1)").expect("write");
        assert!(dir.exists());
        drop(ws);
        assert!(!dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn hung_trial_is_killed_at_the_deadline() {
        let mut workload = ProcessWorkload {
            command: RunCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo started; exec sleep 5".to_string()],
            },
            workspace: Workspace::acquire().expect("workspace"),
        };
        let started = Instant::now();
        let outcome = workload
            .execute(Duration::from_millis(200))
            .expect("execute");
        assert!(outcome.timed_out);
        assert!(!outcome.succeeded());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    fn shell_workload(script: &str) -> ProcessWorkload {
        ProcessWorkload {
            command: RunCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
            },
            workspace: Workspace::acquire().expect("workspace"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_the_whole_process_group() {
        let mut workload = shell_workload("sleep 3; true");
        let started = Instant::now();
        let outcome = workload
            .execute(Duration::from_millis(200))
            .expect("execute");
        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn background_descendant_cannot_hold_the_trial_open() {
        let mut workload = shell_workload("sleep 3 & echo done");
        let started = Instant::now();
        let outcome = workload
            .execute(Duration::from_millis(300))
            .expect("execute");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(outcome.timed_out);
        assert_eq!(outcome.stdout, "done\n");
    }

    #[test]
    fn poll_interval_backs_off_to_a_cap() {
        assert_eq!(next_poll_interval(MIN_POLL_INTERVAL), Duration::from_millis(2));
        let mut interval = MIN_POLL_INTERVAL;
        for _ in 0..10 {
            interval = next_poll_interval(interval);
        }
        assert_eq!(interval, MAX_POLL_INTERVAL);
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_and_output_are_captured() {
        let mut workload = ProcessWorkload {
            command: RunCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
            },
            workspace: Workspace::acquire().expect("workspace"),
        };
        let outcome = workload.execute(Duration::from_secs(10)).expect("execute");
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert!(!outcome.timed_out);
    }

    #[test]
    fn python_program_runs_when_interpreter_is_present() {
        let executor = ProcessExecutor::default();
        if !available("python3") {
            eprintln!("python3 not available, skipping");
            return;
        }
        let mut workload = executor
            .prepare("print(1+1)", Target::Code(Language::Python))
            .expect("prepare");
        let outcome = workload.execute(Duration::from_secs(30)).expect("execute");
        assert!(outcome.succeeded(), "stderr: {}", outcome.stderr);
        assert_eq!(outcome.stdout.trim(), "2");
    }

    #[test]
    fn rejected_c_source_is_a_compilation_error() {
        if !available("gcc") {
            eprintln!("gcc not available, skipping");
            return;
        }
        let err = ProcessExecutor::default()
            .prepare("int main( {", Target::Code(Language::C))
            .err()
            .expect("compile error");
        assert!(matches!(err, EcoError::Compilation(msg) if msg.starts_with("compilation error")));
    }

    #[test]
    fn missing_compiler_is_a_compilation_error() {
        let executor = ProcessExecutor::new(Toolchain {
            gcc: "ecobench-no-such-compiler".to_string(),
            ..Toolchain::default()
        });
        let err = executor
            .prepare("int main(void) { return 0; }", Target::Code(Language::C))
            .err()
            .expect("compile error");
        assert!(matches!(err, EcoError::Compilation(_)));
    }

    #[test]
    fn process_executor_rejects_json_targets() {
        let err = ProcessExecutor::default()
            .prepare("{}", Target::Json(JsonParser::Dom))
            .err()
            .expect("rejected");
        assert!(matches!(err, EcoError::InvalidArgument(_)));
    }
}
