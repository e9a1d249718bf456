//! Helpers for executing external commands.

use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};

fn command_repr(cmd: &Command) -> String {
    let args: Vec<String> = std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|v| v.to_string_lossy().into_owned())
        .collect();
    shlex::try_join(args.iter().map(|v| v.as_str())).unwrap_or_else(|_| args.join(" "))
}

/// Extension helpers for [`std::process::Command`].
pub trait CommandRunExt {
    /// Log (at debug level) the full command line that will be executed.
    fn log_debug(&mut self) -> &mut Self;

    /// Execute the child process, discarding stdout; stderr is captured
    /// and included in the error on a non-zero exit status.
    fn run_capture_stderr(&mut self) -> Result<()>;

    /// Execute the child process, capturing stdout as a UTF-8 string;
    /// stderr is captured and included in the error on failure.
    fn run_get_string(&mut self) -> Result<String>;

    /// Execute the child process and return its raw output; a non-zero
    /// exit status is not an error here.
    fn run_get_output(&mut self) -> Result<Output>;

    /// Execute the child process with inherited stdout/stderr, erroring
    /// with the command name on a non-zero exit status.
    fn run_inherited_with_cmd_context(&mut self) -> Result<()>;
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", command_repr(self));
        self
    }

    fn run_capture_stderr(&mut self) -> Result<()> {
        let output = self
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Spawning {}", command_repr(self)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{}: {}: {}",
                command_repr(self),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    fn run_get_string(&mut self) -> Result<String> {
        let output = self
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Spawning {}", command_repr(self)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{}: {}: {}",
                command_repr(self),
                output.status,
                stderr.trim()
            );
        }
        let stdout = String::from_utf8(output.stdout).context("Invalid UTF-8 in command output")?;
        Ok(stdout)
    }

    fn run_get_output(&mut self) -> Result<Output> {
        self.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Spawning {}", command_repr(self)))
    }

    fn run_inherited_with_cmd_context(&mut self) -> Result<()> {
        let status = self
            .status()
            .with_context(|| format!("Spawning {}", command_repr(self)))?;
        if !status.success() {
            anyhow::bail!("{}: {}", command_repr(self), status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_capture_stderr() -> Result<()> {
        Command::new("true").run_capture_stderr()?;
        let e = Command::new("false").run_capture_stderr().unwrap_err();
        assert!(e.to_string().contains("false"));
        Ok(())
    }

    #[test]
    fn test_run_get_string() -> Result<()> {
        let out = Command::new("echo").arg("hello").run_get_string()?;
        assert_eq!(out.trim(), "hello");
        Ok(())
    }
}
