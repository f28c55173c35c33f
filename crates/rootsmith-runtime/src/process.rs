//! External command execution with in-flight tracking.
//!
//! Every child is started in its own process group and recorded until it
//! exits. [`ProcessTracker::permanently_stop_all`] kills every recorded
//! group and refuses further launches; shutdown uses it so no build step is
//! left holding a mount point that is about to be torn down.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use rootsmith_common::error::{Result, RootsmithError};

/// Captured output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
}

#[derive(Debug, Default)]
struct State {
    children: HashMap<u32, String>,
    stopped: bool,
}

/// Launches external commands and remembers the ones still running.
#[derive(Debug, Default)]
pub struct ProcessTracker {
    state: Mutex<State>,
}

impl ProcessTracker {
    /// Creates a tracker with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tracked children that have not exited yet.
    pub fn in_flight(&self) -> usize {
        self.state().children.len()
    }

    /// Whether [`ProcessTracker::permanently_stop_all`] has run.
    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    /// Runs a command to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns [`RootsmithError::ProcessesStopped`] after a shutdown, an I/O
    /// error if the command cannot be started, or
    /// [`RootsmithError::CommandFailed`] if it exits unsuccessfully.
    pub fn execute<I, S>(&self, program: &str, args: I) -> Result<ExecOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        let _ = command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = self.spawn(&mut command, program)?;
        let pid = child.id();
        let output = child.wait_with_output();
        self.untrack(pid);
        let output = output.map_err(|e| RootsmithError::io(program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(RootsmithError::CommandFailed {
                program: program.to_owned(),
                status: output.status.code(),
                stderr,
            });
        }
        Ok(ExecOutput { stdout, stderr })
    }

    /// Runs a command to completion, streaming its output to the log.
    ///
    /// Standard output lines are logged at `info`, standard error lines at
    /// `warn`.
    ///
    /// # Errors
    ///
    /// Same as [`ProcessTracker::execute`]; the error carries the collected
    /// standard error.
    pub fn execute_live<I, S>(&self, program: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        let _ = command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = self.spawn(&mut command, program)?;
        let pid = child.id();

        let stderr = child.stderr.take();
        let stderr_logger = std::thread::spawn(move || {
            let mut collected = String::new();
            if let Some(stderr) = stderr {
                for line in BufReader::new(stderr).lines().map_while(std::io::Result::ok) {
                    tracing::warn!("{line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(std::io::Result::ok) {
                tracing::info!("{line}");
            }
        }

        let status = child.wait();
        let stderr = stderr_logger.join().unwrap_or_default();
        self.untrack(pid);
        let status = status.map_err(|e| RootsmithError::io(program, e))?;

        if !status.success() {
            return Err(RootsmithError::CommandFailed {
                program: program.to_owned(),
                status: status.code(),
                stderr,
            });
        }
        Ok(())
    }

    /// Kills every tracked process group and refuses new launches.
    ///
    /// Best effort: failures to signal are logged. There is no way back.
    pub fn permanently_stop_all(&self) {
        let mut state = self.state();
        state.stopped = true;
        for (pid, program) in &state.children {
            let Ok(raw) = i32::try_from(*pid) else {
                continue;
            };
            tracing::warn!(pid, program = %program, "killing in-flight process group");
            if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                tracing::warn!(pid, error = %e, "failed to kill process group");
            }
        }
    }

    /// Starts `command` and records it, atomically with respect to
    /// [`ProcessTracker::permanently_stop_all`].
    fn spawn(&self, command: &mut Command, program: &str) -> Result<Child> {
        let mut state = self.state();
        if state.stopped {
            return Err(RootsmithError::ProcessesStopped);
        }
        let child = command
            .process_group(0)
            .spawn()
            .map_err(|e| RootsmithError::io(program, e))?;
        tracing::debug!(pid = child.id(), program, "started process");
        let _ = state.children.insert(child.id(), program.to_owned());
        Ok(child)
    }

    fn untrack(&self, pid: u32) {
        let _ = self.state().children.remove(&pid);
    }
}
