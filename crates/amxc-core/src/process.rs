use std::{
    io::{self, Read},
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use tracing::warn;

pub(crate) const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;
pub(crate) const TRUNCATION_MARKER: &str = "\n[...truncated...]\n";

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Minimum time allowed for the pipes to drain after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Bounds applied to a single child process.
#[derive(Debug, Clone, Copy)]
pub struct CaptureLimits {
    pub max_bytes: usize,
    pub timeout: Option<Duration>,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_CAPTURE_BYTES,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to capture {stream} of {program}: {message}")]
    Capture {
        program: String,
        stream: &'static str,
        message: String,
    },
}

/// Execute a program and capture stdout/stderr.
///
/// The child runs in `cwd` with its own process group (on Unix). When the
/// child exits or the timeout fires, whatever is left in that group is
/// killed. Output beyond `limits.max_bytes` per stream is dropped and marked
/// as truncated; the pipes keep draining so a chatty child never blocks on a
/// full buffer. With a timeout, draining the pipes is bounded by the same
/// deadline, so a helper that escaped the group cannot stretch the run.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned, waited on, or its
/// output streams cannot be read.
pub fn run_command(
    program: &Path,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
    limits: CaptureLimits,
) -> Result<RunOutput, ProcessError> {
    let display = program.display().to_string();
    let mut command = configured_command(program, args, envs, cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: display.clone(),
        source,
    })?;
    let pid = child.id();
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        terminate_tree(&mut child);
        let _ = child.wait();
        return Err(ProcessError::Capture {
            program: display,
            stream: "stdio",
            message: "pipes missing".to_string(),
        });
    };
    let stdout_capture = StreamCapture::start(stdout, limits.max_bytes);
    let stderr_capture = StreamCapture::start(stderr, limits.max_bytes);

    let waited = wait_with_deadline(&mut child, limits.timeout, started);
    let (code, mut timed_out) = match waited {
        Ok(result) => result,
        Err(source) => {
            terminate_tree(&mut child);
            let _ = child.wait();
            return Err(ProcessError::Wait {
                program: display,
                source,
            });
        }
    };
    // Background helpers left in the group must not outlive the run.
    kill_group(pid);

    let drain_deadline = limits
        .timeout
        .map(|timeout| (started + timeout).max(Instant::now() + DRAIN_GRACE));
    let (stdout, stdout_done) = stdout_capture.finish(drain_deadline, &display, "stdout")?;
    let (stderr, stderr_done) = stderr_capture.finish(drain_deadline, &display, "stderr")?;
    if !(stdout_done && stderr_done) {
        let program_name = &display;
        warn!(program = %program_name, "output pipes still open at the deadline; giving up on them");
        timed_out = true;
    }
    Ok(RunOutput {
        code,
        stdout,
        stderr,
        timed_out,
        elapsed: started.elapsed(),
    })
}

fn configured_command(
    program: &Path,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        command.env(key, value);
    }
    command.current_dir(cwd);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
    started: Instant,
) -> io::Result<(i32, bool)> {
    let Some(timeout) = timeout else {
        let status = child.wait()?;
        return Ok((exit_code(status), false));
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((exit_code(status), false));
        }
        if started.elapsed() >= timeout {
            terminate_tree(child);
            child.wait()?;
            return Ok((-1, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Kill the child and every process sharing its group.
fn terminate_tree(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::{
        sys::signal::{killpg, Signal},
        unistd::Pid,
    };

    if let Ok(pid) = i32::try_from(pid) {
        // ESRCH just means the group is already empty.
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

// TODO: assign the child to a job object so grandchildren die with it on Windows.
#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[derive(Default)]
struct CaptureBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CaptureBuffer {
    fn render(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// One output pipe drained on its own thread into a shared, bounded buffer.
struct StreamCapture {
    buffer: Arc<Mutex<CaptureBuffer>>,
    handle: thread::JoinHandle<Result<()>>,
}

impl StreamCapture {
    fn start(reader: impl Read + Send + 'static, limit: usize) -> Self {
        let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
        let sink = Arc::clone(&buffer);
        let handle = thread::spawn(move || read_limited(reader, limit, &sink));
        Self { buffer, handle }
    }

    /// Wait for the pipe to close, up to `deadline`. Returns what was captured
    /// and whether the stream reached end of file.
    fn finish(
        self,
        deadline: Option<Instant>,
        program: &str,
        stream: &'static str,
    ) -> Result<(String, bool), ProcessError> {
        let capture_err = |message: String| ProcessError::Capture {
            program: program.to_string(),
            stream,
            message,
        };
        if let Some(deadline) = deadline {
            while !self.handle.is_finished() {
                if Instant::now() >= deadline {
                    // The reader thread stays parked on the pipe; it exits on
                    // its own once the last writer goes away.
                    return Ok((lock(&self.buffer).render(), false));
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        self.handle
            .join()
            .map_err(|_| capture_err("reader thread panicked".to_string()))?
            .map_err(|err| capture_err(err.to_string()))?;
        Ok((lock(&self.buffer).render(), true))
    }
}

fn lock(buffer: &Mutex<CaptureBuffer>) -> MutexGuard<'_, CaptureBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_limited(mut reader: impl Read, limit: usize, sink: &Mutex<CaptureBuffer>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            return Ok(());
        }
        let mut guard = lock(sink);
        let buffer = &mut *guard;
        append_limited(&mut buffer.bytes, &chunk[..read], limit, &mut buffer.truncated);
    }
}

fn append_limited(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut bool) {
    let room = limit.saturating_sub(buffer.len());
    if chunk.len() <= room {
        buffer.extend_from_slice(chunk);
        return;
    }
    *truncated = true;
    buffer.extend_from_slice(&chunk[..room]);
}
