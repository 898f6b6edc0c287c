//! Process execution.
//!
//! Every interaction with podman, systemctl, kubectl and helm goes through
//! [`CommandRunner`] so adapters can be exercised without a container
//! runtime. Commands run to completion; there is no retry and no
//! cancellation once a child is spawned.

use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to execute '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: &str) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Trimmed stdout.
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }

    /// Stdout followed by stderr, for error reports.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

pub trait CommandRunner {
    /// Run a command to completion and capture its output.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, RunError>;
}

/// Runs real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, RunError> {
        debug!(command = %format_command(program, args), "running");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| RunError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(program, status = result.status, "finished");
        Ok(result)
    }
}

/// Shell-like rendering of a command line, for logs and error messages.
pub fn format_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            line.push('\'');
            line.push_str(arg);
            line.push('\'');
        } else {
            line.push_str(arg);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgradm_core::argv;

    #[test]
    fn combined_output_joins_streams() {
        let output = CommandOutput {
            status: 1,
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(output.combined(), "out\nerr");
        assert_eq!(CommandOutput::failed(2, "boom").combined(), "boom");
    }

    #[test]
    fn format_quotes_spaces() {
        let line = format_command("sh", &argv(&["-c", "echo hi"]));
        assert_eq!(line, "sh -c 'echo hi'");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_exit_code() {
        let output = SystemRunner
            .run("sh", &argv(&["-c", "echo hello; exit 3"]))
            .unwrap();
        assert_eq!(output.status, 3);
        assert_eq!(output.text(), "hello");
    }

    #[test]
    fn system_runner_reports_missing_program() {
        let err = SystemRunner
            .run("mgradm-definitely-not-a-program", &[])
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }
}
