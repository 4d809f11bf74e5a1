//! Bounded execution of the external converter.
//!
//! Converters can hang on malformed input or print huge diagnostics. Output is
//! captured up to a fixed size per stream, and the whole process tree is
//! killed when the timeout, the caller's deadline or its cancellation token
//! fires.

use std::{
    fmt,
    io::{self, Read},
    path::PathBuf,
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

/// Program, arguments and optional working directory of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunLimits {
    pub timeout: Option<Duration>,
    pub deadline: Option<Instant>,
    pub cancellation: Option<CancellationToken>,
    /// Maximum bytes captured per stream.
    pub max_output_bytes: usize,
    /// Wait between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: None,
            deadline: None,
            cancellation: None,
            max_output_bytes: 64 * 1024,
            kill_grace: Duration::from_millis(250),
        }
    }
}

impl RunLimits {
    /// The earlier of `start + timeout` and the absolute deadline.
    fn effective_deadline(&self, start: Instant) -> Option<Instant> {
        let from_timeout = self.timeout.map(|timeout| start + timeout);
        match (from_timeout, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream had more bytes than were captured.
    pub truncated: bool,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out && !self.cancelled
    }
}

/// Run `spec` to completion or until a limit trips.
///
/// Always returns the exit status; hitting a limit kills the process tree and
/// sets `timed_out` or `cancelled`.
pub fn run_bounded(spec: &CommandSpec, limits: &RunLimits) -> io::Result<CommandOutcome> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    // Own process group so a wrapper script and everything it spawns can be
    // killed together.
    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;

        cmd.pre_exec(|| {
            // SAFETY: `setpgid` is async-signal-safe and does not allocate.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;

    let Some(stdout) = child.stdout.take() else {
        return Err(io::Error::other("child stdout was not captured"));
    };
    let Some(stderr) = child.stderr.take() else {
        return Err(io::Error::other("child stderr was not captured"));
    };

    let max_bytes = limits.max_output_bytes;
    let stdout_handle = thread::spawn(move || read_bounded(stdout, max_bytes));
    let stderr_handle = thread::spawn(move || read_bounded(stderr, max_bytes));

    let start = Instant::now();
    let deadline = limits.effective_deadline(start);
    let mut timed_out = false;
    let mut cancelled = false;

    let status = if deadline.is_some() || limits.cancellation.is_some() {
        let poll = Duration::from_millis(50);
        loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if limits
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                cancelled = true;
                break terminate_process_tree(&mut child, limits.kill_grace)?;
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = true;
                        break terminate_process_tree(&mut child, limits.kill_grace)?;
                    }
                    thread::sleep(poll.min(deadline - now));
                }
                None => thread::sleep(poll),
            }
        }
    } else {
        child.wait()?
    };

    let (stdout_bytes, stdout_truncated) = join_reader(stdout_handle, "stdout")??;
    let (stderr_bytes, stderr_truncated) = join_reader(stderr_handle, "stderr")??;

    Ok(CommandOutcome {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        truncated: stdout_truncated || stderr_truncated,
        timed_out,
        cancelled,
    })
}

fn terminate_process_tree(
    child: &mut std::process::Child,
    grace: Duration,
) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        // Negative pid targets the group created by `setpgid(0, 0)`.
        unsafe {
            let _ = libc::kill(-pid, libc::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(25));
        }

        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(windows)]
    {
        let _ = grace;
        // `Child::kill` only stops the immediate process; `taskkill /T` takes
        // the tree so inherited pipe handles get closed.
        let pid = child.id().to_string();
        let _ = Command::new("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let _ = child.kill();
        child.wait()
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = grace;
        let _ = child.kill();
        child.wait()
    }
}

fn join_reader(
    handle: thread::JoinHandle<io::Result<(Vec<u8>, bool)>>,
    stream: &'static str,
) -> io::Result<io::Result<(Vec<u8>, bool)>> {
    handle
        .join()
        .map_err(|_| io::Error::other(format!("{stream} reader thread panicked")))
}

fn read_bounded(mut reader: impl Read, max_bytes: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(out.len());
        let to_store = remaining.min(n);
        out.extend_from_slice(&buf[..to_store]);
        if to_store < n {
            truncated = true;
        }
    }

    Ok((out, truncated))
}
