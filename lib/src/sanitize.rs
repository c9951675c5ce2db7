//! # Erasing the disk before a full reinstall
//!
//! The default is a manual best-effort wipe: drop every recognized
//! signature and zero a window at both ends of the disk, where partition
//! tables and superblocks live. A drive-level sanitize can be opted into
//! through the configuration; it is used only when the drive reports it
//! can run one, and falls back to the manual wipe otherwise.
//!
//! Nothing here is fatal. The partition table written afterwards makes
//! the disk usable regardless of how much of the erase succeeded.

use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Deserialize;

use crate::blockdev;
use crate::runner::Runner;
use crate::status;
use crate::task::Task;

/// Size of the zeroed windows at the head and tail of the disk.
const ZERO_WINDOW_MIB: u64 = 32;
const ZERO_WINDOW_BYTES: u64 = ZERO_WINDOW_MIB * 1024 * 1024;

/// Sanitize action 2: block erase.
const SANACT_BLOCK_ERASE: &str = "--sanact=2";
/// Low bits of `sstat` holding the status of the most recent sanitize.
const SSTAT_STATUS_MASK: u32 = 0x7;
const SSTAT_IN_PROGRESS: u32 = 2;
const SSTAT_FAILED: u32 = 3;
/// `sprog` is a fraction of 65536.
const SPROG_SCALE: u32 = 65536;

/// What the drive reports about sanitize operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SanitizeState {
    ReadyToSanitize,
    /// Percent complete.
    InProgress(u8),
    /// The most recent sanitize did not complete.
    Failed,
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct SanitizeLog {
    sprog: u32,
    sstat: u32,
}

/// Parse `nvme sanitize-log --output-format=json`. Depending on the
/// nvme-cli version the log is either top-level or keyed by device name.
fn parse_sanitize_log(buf: &str) -> Result<SanitizeState> {
    let v: serde_json::Value = serde_json::from_str(buf).context("Parsing sanitize log")?;
    let log = match v.get("sstat") {
        Some(_) => v,
        None => v
            .as_object()
            .and_then(|o| o.values().next())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Empty sanitize log"))?,
    };
    let log: SanitizeLog = serde_json::from_value(log).context("Parsing sanitize log")?;
    let state = match log.sstat & SSTAT_STATUS_MASK {
        SSTAT_IN_PROGRESS => {
            let percent = u64::from(log.sprog) * 100 / u64::from(SPROG_SCALE);
            SanitizeState::InProgress(percent.min(100) as u8)
        }
        SSTAT_FAILED => SanitizeState::Failed,
        _ => SanitizeState::ReadyToSanitize,
    };
    Ok(state)
}

/// Query the drive; any failure means the drive cannot be sanitized by us.
pub(crate) fn query_state(runner: &dyn Runner, disk: &Utf8Path) -> SanitizeState {
    let task = Task::new("Querying sanitize status", "nvme")
        .args(["sanitize-log", disk.as_str(), "--output-format=json"])
        .quiet();
    match runner.read(&task).and_then(|buf| parse_sanitize_log(&buf)) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("Hardware sanitize unavailable: {e:#}");
            SanitizeState::Unsupported
        }
    }
}

fn best_effort(what: &str, r: Result<()>) {
    if let Err(e) = r {
        status::warning(format!("{what} failed (ignored): {e:#}"));
    }
}

/// Zero the window starting at byte `offset`. The offset need not be
/// MiB aligned, so the tail window always reaches the last byte.
fn zero_window(runner: &dyn Runner, disk: &Utf8Path, offset: u64) -> Result<()> {
    runner.run(
        &Task::new(format!("Zeroing {ZERO_WINDOW_MIB} MiB of {disk} at byte {offset}"), "dd")
            .args(["if=/dev/zero", &format!("of={disk}"), "bs=1M"])
            .arg(format!("count={ZERO_WINDOW_MIB}"))
            .arg(format!("seek={offset}"))
            .args(["oflag=sync,seek_bytes", "status=none"]),
    )
}

/// Wipe signatures, zero both ends and flush. Every step is best effort.
pub(crate) fn manual_wipe(runner: &dyn Runner, disk: &Utf8Path) {
    best_effort(
        "Wiping signatures",
        runner.run(
            &Task::new(format!("Wiping signatures on {disk}"), "wipefs")
                .args(["-a", disk.as_str()])
                .quiet_output(),
        ),
    );
    best_effort("Zeroing disk head", zero_window(runner, disk, 0));
    let tail = blockdev::size_bytes(runner, disk).and_then(|size| {
        anyhow::ensure!(size >= ZERO_WINDOW_BYTES, "Disk {disk} is only {size} bytes");
        zero_window(runner, disk, size - ZERO_WINDOW_BYTES)
    });
    best_effort("Zeroing disk tail", tail);
    best_effort("Flushing", runner.run(&Task::new("Flushing", "sync").quiet()));
}

/// Wait for a running sanitize to finish, showing its progress.
fn wait_for_sanitize(runner: &dyn Runner, disk: &Utf8Path, mut percent: u8, poll: Duration) -> Result<()> {
    let pb = indicatif::ProgressBar::new(100);
    pb.set_style(indicatif::ProgressStyle::default_bar().template("{msg} [{bar:40}] {pos}%")?);
    pb.set_message(format!("Sanitizing {disk}"));
    loop {
        pb.set_position(percent.into());
        std::thread::sleep(poll);
        match query_state(runner, disk) {
            SanitizeState::InProgress(p) => percent = p,
            SanitizeState::ReadyToSanitize => break,
            SanitizeState::Failed => {
                pb.abandon();
                anyhow::bail!("Drive reported the sanitize of {disk} as failed");
            }
            SanitizeState::Unsupported => {
                pb.abandon();
                anyhow::bail!("Lost sanitize status of {disk}");
            }
        }
    }
    pb.finish_with_message(format!("Sanitized {disk}"));
    Ok(())
}

fn hardware_sanitize(runner: &dyn Runner, disk: &Utf8Path, state: SanitizeState, poll: Duration) -> Result<()> {
    let percent = match state {
        SanitizeState::InProgress(p) => p,
        _ => {
            runner.run(
                &Task::new(format!("Starting drive sanitize of {disk}"), "nvme")
                    .args(["sanitize", disk.as_str(), SANACT_BLOCK_ERASE]),
            )?;
            0
        }
    };
    wait_for_sanitize(runner, disk, percent, poll)
}

/// Erase the disk ahead of a full reinstall.
pub(crate) fn sanitize(runner: &dyn Runner, disk: &Utf8Path, use_hardware: bool, poll: Duration) {
    if use_hardware {
        let state = query_state(runner, disk);
        if state != SanitizeState::Unsupported {
            match hardware_sanitize(runner, disk, state, poll) {
                Ok(()) => return,
                Err(e) => status::warning(format!("Drive sanitize failed, wiping instead: {e:#}")),
            }
        }
    }
    manual_wipe(runner, disk)
}
