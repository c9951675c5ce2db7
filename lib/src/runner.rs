//! The seam between the repair logic and the host.
//!
//! Every disk-touching operation goes through a [`Runner`], so the same code
//! drives the real machine via [`HostRunner`] and a recording fake in tests.

use std::io::Write;
use std::process::Stdio;

use anyhow::{Context, Result};
use camino::Utf8Path;
use devrepair_utils::CommandRunExt;

use crate::task::Task;

pub(crate) trait Runner: std::fmt::Debug {
    /// Run the task, returning an error if it does not exit successfully.
    fn run(&self, task: &Task) -> Result<()>;

    /// Like [`Runner::run()`], but return stdout.
    fn read(&self, task: &Task) -> Result<String>;

    fn path_exists(&self, path: &Utf8Path) -> bool;
}

/// Executes tasks on the running system.
#[derive(Debug, Default)]
pub(crate) struct HostRunner;

impl HostRunner {
    fn announce(task: &Task) {
        if !task.quiet {
            println!("{}", task.description);
        }
        tracing::debug!("exec: {task}");
    }

    fn run_with_stdin(task: &Task, buf: &str) -> Result<()> {
        let mut child = task
            .to_command()
            .spawn()
            .with_context(|| format!("Spawning {}", task.program))?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow::anyhow!("No stdin for {}", task.program))?;
            stdin.write_all(buf.as_bytes())?;
        }
        let st = child.wait()?;
        if !st.success() {
            anyhow::bail!("Task {} failed: {st:?}", task.description);
        }
        Ok(())
    }
}

impl Runner for HostRunner {
    fn run(&self, task: &Task) -> Result<()> {
        Self::announce(task);
        match task.stdin.as_deref() {
            Some(buf) => Self::run_with_stdin(task, buf),
            None => task
                .to_command()
                .run_with_cmd_context()
                .with_context(|| format!("Task {} failed", task.description)),
        }
    }

    fn read(&self, task: &Task) -> Result<String> {
        Self::announce(task);
        let mut cmd = task.to_command();
        // Diagnostics still go to the console
        cmd.stderr(Stdio::inherit());
        cmd.run_get_string()
            .with_context(|| format!("Task {} failed", task.description))
    }

    fn path_exists(&self, path: &Utf8Path) -> bool {
        path.exists()
    }
}
