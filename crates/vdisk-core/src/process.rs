//! External command execution.
//!
//! Every OS tool vdisk drives (losetup, kpartx, lvm, mount, chroot, ...) is
//! reached through [`CommandRunner`]. [`SystemRunner`] spawns real processes;
//! tests substitute a scripted runner. Commands are never retried.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use vdisk_common::error::{Result, VdiskError};

/// Interval between liveness checks while a timed command runs.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A fully described external command.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
    env: Vec<(String, String)>,
    stdin: Option<PathBuf>,
    capture: bool,
    checked: bool,
    timeout: Option<Duration>,
}

impl Invocation {
    /// Starts describing a call to `program`.
    ///
    /// By default output is inherited, a non-zero exit is an error, and there
    /// is no timeout.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            capture: false,
            checked: true,
            timeout: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Sets an environment variable on top of the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets several environment variables on top of the inherited environment.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Feeds the contents of `path` to the command's standard input.
    #[must_use]
    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Captures stdout and stderr instead of inheriting them.
    #[must_use]
    pub const fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Reports a non-zero exit through [`CommandOutput::exit_code`] instead of
    /// as an error.
    #[must_use]
    pub const fn unchecked(mut self) -> Self {
        self.checked = false;
        self
    }

    /// Kills the command if it runs longer than `timeout`.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, lossily converted to UTF-8.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Environment overrides.
    #[must_use]
    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    /// File redirected to standard input, if any.
    #[must_use]
    pub fn stdin_path(&self) -> Option<&Path> {
        self.stdin.as_deref()
    }

    /// Whether output is captured.
    #[must_use]
    pub const fn is_captured(&self) -> bool {
        self.capture
    }

    /// Whether a non-zero exit is turned into an error.
    #[must_use]
    pub const fn is_checked(&self) -> bool {
        self.checked
    }

    fn failure(&self, exit_code: i32) -> VdiskError {
        VdiskError::CommandFailed {
            command: self.program.clone(),
            args: self.argv(),
            exit_code,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `128 + signal` when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured stdout lines, trimmed, empty lines removed.
    pub stdout: Vec<String>,
    /// Captured stderr lines, trimmed, empty lines removed.
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// First captured stdout line.
    #[must_use]
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.first().map(String::as_str)
    }
}

/// Something that can run external commands.
pub trait CommandRunner {
    /// Runs the command and reports how it ended, whatever its exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be started or times out.
    fn execute(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Runs the command, turning a non-zero exit into
    /// [`VdiskError::CommandFailed`] unless the invocation is unchecked.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be started, times out, or exits
    /// non-zero while checked.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let output = self.execute(invocation)?;
        if invocation.is_checked() && !output.success() {
            if !output.stderr.is_empty() {
                tracing::warn!(
                    command = %invocation,
                    exit_code = output.exit_code,
                    stderr = ?output.stderr,
                    "command failed"
                );
            }
            return Err(invocation.failure(output.exit_code));
        }
        Ok(output)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    default_timeout: Option<Duration>,
}

impl SystemRunner {
    /// Creates a runner without a default timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_timeout: None,
        }
    }

    /// Creates a runner that applies `timeout` to invocations without one.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::debug!(command = %invocation, "running");

        let mut command = Command::new(&invocation.program);
        let _ = command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        if let Some(path) = &invocation.stdin {
            let file = File::open(path).map_err(|e| VdiskError::Io {
                path: path.clone(),
                source: e,
            })?;
            let _ = command.stdin(Stdio::from(file));
        }

        if invocation.capture {
            let _ = command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|e| {
            tracing::error!(command = %invocation, error = %e, "failed to spawn");
            VdiskError::Spawn {
                command: invocation.program.clone(),
                source: e,
            }
        })?;

        let stdout = child.stdout.take().map(read_to_end);
        let stderr = child.stderr.take().map(read_to_end);

        let spawn_error = |e| VdiskError::Spawn {
            command: invocation.program.clone(),
            source: e,
        };
        let status = match invocation.timeout.or(self.default_timeout) {
            Some(limit) => match wait_with_timeout(&mut child, limit).map_err(spawn_error)? {
                Some(status) => status,
                None => {
                    tracing::error!(command = %invocation, secs = limit.as_secs(), "command timed out");
                    return Err(VdiskError::CommandTimeout {
                        command: invocation.program.clone(),
                        args: invocation.argv(),
                        timeout: limit,
                    });
                }
            },
            None => child.wait().map_err(spawn_error)?,
        };

        Ok(CommandOutput {
            exit_code: exit_code(status),
            stdout: stdout.map(join_lines).unwrap_or_default(),
            stderr: stderr.map(join_lines).unwrap_or_default(),
        })
    }
}

fn read_to_end<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_lines(handle: JoinHandle<Vec<u8>>) -> Vec<String> {
    split_lines(&handle.join().unwrap_or_default())
}

/// Polls `child` until it exits or `limit` elapses; on timeout the child is
/// killed, reaped, and `None` returned.
fn wait_with_timeout(child: &mut Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            let _ = child.kill();
            let _ = child.wait()?;
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(-1, |signal| 128 + signal))
}

/// Splits raw output into trimmed, non-empty lines.
#[must_use]
pub fn split_lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A runner bound to one program, optionally with fixed leading arguments.
#[derive(Clone)]
pub struct Tool<'r> {
    runner: &'r dyn CommandRunner,
    program: &'static str,
    prefix: Vec<OsString>,
}

impl<'r> Tool<'r> {
    /// Binds `program` to `runner`.
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner, program: &'static str) -> Self {
        Self {
            runner,
            program,
            prefix: Vec::new(),
        }
    }

    /// Returns a tool that puts `args` before every call's own arguments.
    #[must_use]
    pub fn prefix<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut prefix = self.prefix.clone();
        prefix.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        Self {
            runner: self.runner,
            program: self.program,
            prefix,
        }
    }

    /// Starts an invocation with the program and prefix filled in.
    #[must_use]
    pub fn command(&self) -> Invocation {
        Invocation::new(self.program).args(&self.prefix)
    }

    /// Runs the tool with `args`, output inherited.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot run or exits non-zero.
    pub fn run<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.runner.run(&self.command().args(args))
    }

    /// Runs the tool with `args`, output captured.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot run or exits non-zero.
    pub fn capture<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.runner.run(&self.command().args(args).capture())
    }
}

/// Waits for pending udev events so new or removed device nodes are visible.
///
/// # Errors
///
/// Returns an error if `udevadm settle` fails.
pub fn settle(runner: &dyn CommandRunner) -> Result<()> {
    let _ = Tool::new(runner, "udevadm").run(["settle"])?;
    Ok(())
}

/// Builds `chroot <root> <program>`; further arguments are appended by the
/// caller.
#[must_use]
pub fn chroot(root: &Path, program: &str) -> Invocation {
    Invocation::new("chroot").arg(root).arg(program)
}
