//! Filesystem creation for the formatted partitions.

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;

use crate::blockdev::Disk;
use crate::partitions::{FsKind, Role};
use crate::runner::Runner;
use crate::task::Task;

/// Options for the home filesystem: case-insensitive lookups and an inode
/// ratio tuned for large game files.
const HOME_EXT4_OPTS: &[&str] = &["-O", "casefold", "-T", "huge"];

fn mkfs<'a>(
    runner: &dyn Runner,
    dev: &Utf8Path,
    fs: FsKind,
    label: &str,
    opts: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let t = Task::new(format!("Creating {fs} filesystem {label} on {dev}"), format!("mkfs.{fs}"));
    let t = match fs {
        FsKind::Ext4 => t.args(["-F", "-L", label]),
        FsKind::Vfat => t.args(["-n", label]),
        FsKind::Btrfs => t.args(["-f", "-L", label]),
    };
    // All the mkfs commands are unnecessarily noisy by default
    runner.run(&t.args(opts).arg(dev).quiet_output())
}

/// Reformat the partition for `role` with its filesystem and label from the
/// fixed layout.
#[context("Formatting {role}")]
pub(crate) fn format_role(runner: &dyn Runner, disk: &Disk, role: Role) -> Result<()> {
    let spec = role.spec();
    let dev = &disk.partition(role);
    let label = spec
        .fs_label
        .ok_or_else(|| anyhow::anyhow!("{role} is not formatted in place"))?;
    match role {
        Role::Home => {
            mkfs(runner, dev, spec.fs, label, HOME_EXT4_OPTS.iter().copied())?;
            // No reserved blocks, the whole partition belongs to the user
            runner.run(
                &Task::new(format!("Tuning {dev}"), "tune2fs")
                    .args(["-m", "0", dev.as_str()])
                    .quiet_output(),
            )
        }
        _ => mkfs(runner, dev, spec.fs, label, []),
    }
}
