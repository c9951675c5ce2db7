use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::partitions::{self, Role};
use crate::runner::Runner;
use crate::task::Task;

/// The physical disk being repaired; resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Disk {
    path: Utf8PathBuf,
    /// Only used when writing the partition table.
    sector_size: u64,
}

impl Disk {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            sector_size: partitions::DEFAULT_SECTOR_SIZE,
        }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Device names ending in a digit (nvme0n1, mmcblk0) separate the
    /// partition number with a `p`.
    fn partition_separator(&self) -> &'static str {
        if self.path.as_str().ends_with(|c: char| c.is_ascii_digit()) {
            "p"
        } else {
            ""
        }
    }

    /// The device node for a partition number.
    pub(crate) fn partition_node(&self, index: u32) -> Utf8PathBuf {
        format!("{}{}{index}", self.path, self.partition_separator()).into()
    }

    pub(crate) fn partition(&self, role: Role) -> Utf8PathBuf {
        self.partition_node(role.spec().index)
    }

    /// Whether `dev` is this disk or one of its partitions.
    pub(crate) fn contains(&self, dev: &Utf8Path) -> bool {
        let dev = dev.as_str();
        let disk = self.path.as_str();
        dev == disk
            || dev
                .strip_prefix(disk)
                .and_then(|rest| rest.strip_prefix(self.partition_separator()))
                .map_or(false, |n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    }
}

/// Size of a block device in bytes.
#[context("Querying size of {dev}")]
pub(crate) fn size_bytes(runner: &dyn Runner, dev: &Utf8Path) -> Result<u64> {
    let out = runner.read(
        &Task::new(format!("Querying size of {dev}"), "blockdev")
            .args(["--getsize64", dev.as_str()])
            .quiet(),
    )?;
    out.trim()
        .parse::<u64>()
        .with_context(|| format!("Parsing blockdev output {out:?}"))
}

pub(crate) fn udev_settle(runner: &dyn Runner) -> Result<()> {
    runner.run(
        &Task::new("Waiting for udev", "udevadm")
            .arg("settle")
            .quiet(),
    )
}

/// Unconditionally replace the partition table with the fixed layout.
#[context("Writing partition table to {}", disk.path())]
pub(crate) fn write_partition_table(runner: &dyn Runner, disk: &Disk) -> Result<()> {
    let script = partitions::sfdisk_script(disk.sector_size);
    tracing::debug!("Partition table:\n{script}");
    runner.run(
        &Task::new("Writing partition table", "sfdisk")
            .args(["--wipe", "always", "--wipe-partitions", "always"])
            .arg(disk.path())
            .stdin_buf(script)
            .quiet_output(),
    )?;
    // Make sure the kernel and udev agree on the new nodes before formatting
    runner.run(
        &Task::new("Rereading partition table", "partx")
            .args(["--update", disk.path().as_str()])
            .quiet(),
    )?;
    udev_settle(runner)
}
