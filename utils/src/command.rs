//! Helpers intended for [`std::process::Command`].

use std::process::{Command, ExitStatus};

use anyhow::{Context, Result};

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Execute the child process, returning an error that includes the
    /// full command line if it exits unsuccessfully.
    fn run_with_cmd_context(&mut self) -> Result<()>;

    /// Execute the child process, capturing its stdout as UTF-8.
    fn run_get_string(&mut self) -> Result<String>;
}

/// Render a command the way a shell user would type it.
pub fn command_line(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn check_status(cmd: &Command, st: ExitStatus) -> Result<()> {
    if !st.success() {
        anyhow::bail!("Command `{}` failed: {st}", command_line(cmd));
    }
    Ok(())
}

impl CommandRunExt for Command {
    fn run_with_cmd_context(&mut self) -> Result<()> {
        tracing::debug!("exec: {}", command_line(self));
        let st = self
            .status()
            .with_context(|| format!("Spawning `{}`", command_line(self)))?;
        check_status(self, st)
    }

    fn run_get_string(&mut self) -> Result<String> {
        tracing::debug!("exec: {}", command_line(self));
        let o = self
            .output()
            .with_context(|| format!("Spawning `{}`", command_line(self)))?;
        check_status(self, o.status)?;
        String::from_utf8(o.stdout)
            .with_context(|| format!("Decoding output of `{}`", command_line(self)))
    }
}
