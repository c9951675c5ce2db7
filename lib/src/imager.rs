//! # Root filesystem imaging
//!
//! The installer's own running root filesystem is the image: it is frozen
//! once, copied block-for-block onto both root slots, and released. Each
//! copy then gets a new filesystem UUID so that the two slots (and the
//! installer) never share an identity, and is checked before it is trusted.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use uuid::Uuid;

use crate::blockdev::{self, Disk};
use crate::guard::{ExitGuard, ReleaseHandle};
use crate::runner::Runner;
use crate::task::Task;

/// A precondition of the run does not hold; nothing was modified.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PreconditionError {
    #[error("Disk {0} does not exist")]
    MissingDisk(Utf8PathBuf),
    #[error("Cannot resolve the device of the running root filesystem (got {0:?})")]
    UnresolvableSource(String),
}

/// The running root filesystem used as the image source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceRoot {
    pub(crate) device: Utf8PathBuf,
    pub(crate) mountpoint: Utf8PathBuf,
}

/// Parse `findmnt -o SOURCE`, which may carry a `[/subvolume]` suffix.
fn parse_findmnt_source(s: &str) -> Option<Utf8PathBuf> {
    let s = s.trim();
    let s = s.split_once('[').map_or(s, |(dev, _)| dev);
    s.starts_with("/dev/").then(|| Utf8PathBuf::from(s))
}

/// Find the block device backing `/`.
#[context("Resolving installer root device")]
pub(crate) fn resolve_source_root(runner: &dyn Runner, disk: &Disk) -> Result<SourceRoot> {
    let mountpoint = Utf8PathBuf::from("/");
    let out = runner.read(
        &Task::new("Resolving running root", "findmnt")
            .args(["-n", "-o", "SOURCE", "--target", mountpoint.as_str()])
            .quiet(),
    )?;
    let device = parse_findmnt_source(&out)
        .ok_or_else(|| PreconditionError::UnresolvableSource(out.trim().to_string()))?;
    if disk.contains(&device) {
        anyhow::bail!("Running root {device} is on the target disk {}", disk.path());
    }
    tracing::debug!("Source root is {device}");
    Ok(SourceRoot { device, mountpoint })
}

/// Freeze the source filesystem so a consistent block copy can be taken.
/// The returned handle thaws it.
#[context("Freezing {}", source.mountpoint)]
pub(crate) fn freeze<'r>(
    runner: &'r dyn Runner,
    guard: &ExitGuard<'r>,
    source: &SourceRoot,
) -> Result<ReleaseHandle<'r>> {
    let mountpoint = source.mountpoint.clone();
    runner.run(
        &Task::new(format!("Freezing {} ({})", mountpoint, source.device), "fsfreeze")
            .args(["-f", mountpoint.as_str()]),
    )?;
    Ok(guard.register(format!("thaw {mountpoint}"), move || {
        runner.run(
            &Task::new(format!("Thawing {mountpoint}"), "fsfreeze").args(["-u", mountpoint.as_str()]),
        )
    }))
}

fn probe_uuid(runner: &dyn Runner, dev: &Utf8Path) -> Option<Uuid> {
    let task = Task::new(format!("Probing UUID of {dev}"), "blkid")
        .args(["-o", "value", "-s", "UUID", dev.as_str()])
        .quiet();
    runner
        .read(&task)
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

/// A v4 UUID equal to none of `taken`.
fn fresh_uuid(taken: &[Uuid]) -> Uuid {
    loop {
        let u = Uuid::new_v4();
        if !taken.contains(&u) {
            return u;
        }
    }
}

/// Copy the frozen `source` onto `target`, give the copy a new filesystem
/// UUID distinct from the source and from everything in `assigned`, and
/// check it. Returns the new UUID.
///
/// The caller must keep `source` frozen for the duration.
#[context("Imaging {source} to {target}")]
pub(crate) fn image_root(
    runner: &dyn Runner,
    source: &Utf8Path,
    target: &Utf8Path,
    assigned: &[Uuid],
) -> Result<Uuid> {
    let source_size = blockdev::size_bytes(runner, source)?;
    let target_size = blockdev::size_bytes(runner, target)?;
    anyhow::ensure!(
        target_size >= source_size,
        "Target {target} ({target_size} bytes) is smaller than source {source} ({source_size} bytes)"
    );

    let mut taken = assigned.to_vec();
    taken.extend(probe_uuid(runner, source));

    runner.run(
        &Task::new(format!("Copying {source} to {target}"), "dd")
            .arg(format!("if={source}"))
            .arg(format!("of={target}"))
            .args(["bs=128M", "status=progress", "oflag=sync"]),
    )?;

    let uuid = fresh_uuid(&taken);
    runner
        .run(
            &Task::new(format!("Assigning new filesystem UUID to {target}"), "btrfstune")
                .args(["-f", "-U", &uuid.to_string(), target.as_str()])
                .quiet_output(),
        )
        .context("Changing filesystem UUID")?;
    runner
        .run(
            &Task::new(format!("Checking {target}"), "btrfs")
                .args(["check", target.as_str()]),
        )
        .context("Filesystem check")?;
    Ok(uuid)
}
