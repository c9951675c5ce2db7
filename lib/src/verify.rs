//! Guard against partial repairs on a disk that does not carry our layout.
//!
//! Before reformatting individual partitions we check that each one still
//! has the filesystem type and GPT partition name we expect. Any mismatch
//! stops the run; the operator can still do a full reinstall, which writes
//! a fresh table and never verifies.

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::config::RepairConfig;
use crate::runner::Runner;
use crate::task::Task;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum VerifyError {
    #[error("Device {device} is type {found:?} but expected {expected:?}")]
    TypeMismatch {
        device: Utf8PathBuf,
        found: String,
        expected: String,
    },
    #[error("Device {device} has label {found:?} but expected {expected:?}")]
    LabelMismatch {
        device: Utf8PathBuf,
        found: String,
        expected: String,
    },
}

impl VerifyError {
    /// Process exit code used when not halting.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            VerifyError::TypeMismatch { .. } => 1,
            VerifyError::LabelMismatch { .. } => 2,
        }
    }
}

/// Read a single `blkid` tag. A missing tag makes `blkid` exit nonzero,
/// which we treat as an empty value.
fn probe(runner: &dyn Runner, device: &Utf8Path, tag: &str) -> String {
    let task = Task::new(format!("Probing {tag} of {device}"), "blkid")
        .args(["-o", "value", "-s", tag, device.as_str()])
        .quiet();
    match runner.read(&task) {
        Ok(v) => v.trim().to_string(),
        Err(e) => {
            tracing::debug!("No {tag} on {device}: {e:#}");
            String::new()
        }
    }
}

/// Check the live filesystem type and partition label of `device`.
/// Does nothing when verification is disabled in the configuration.
#[context("Verifying {device}")]
pub(crate) fn verify_partition(
    runner: &dyn Runner,
    config: &RepairConfig,
    device: &Utf8Path,
    expected_type: &str,
    expected_label: &str,
) -> Result<()> {
    if !config.verify_partitions {
        tracing::debug!("Skipping verification of {device}");
        return Ok(());
    }
    let found = probe(runner, device, "TYPE");
    if found != expected_type {
        return Err(VerifyError::TypeMismatch {
            device: device.to_owned(),
            found,
            expected: expected_type.to_owned(),
        }
        .into());
    }
    let found = probe(runner, device, "PARTLABEL");
    if found != expected_label {
        return Err(VerifyError::LabelMismatch {
            device: device.to_owned(),
            found,
            expected: expected_label.to_owned(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeRunner;

    const DEV: &str = "/dev/nvme0n1p8";

    #[test]
    fn test_matches() -> Result<()> {
        let r = FakeRunner::new();
        r.output("blkid -o value -s TYPE", "ext4\n");
        r.output("blkid -o value -s PARTLABEL", "home\n");
        verify_partition(&r, &RepairConfig::default(), Utf8Path::new(DEV), "ext4", "home")?;
        assert_eq!(r.commands().len(), 2);
        Ok(())
    }

    #[test]
    fn test_type_mismatch() {
        let r = FakeRunner::new();
        r.output("blkid -o value -s TYPE", "ntfs\n");
        let e = verify_partition(&r, &RepairConfig::default(), Utf8Path::new(DEV), "ext4", "home")
            .unwrap_err();
        let e = e.downcast_ref::<VerifyError>().unwrap();
        assert_eq!(e.exit_code(), 1);
        // The label is never probed after a type mismatch
        assert!(r.matching("blkid -o value -s PARTLABEL").is_empty());
    }

    #[test]
    fn test_missing_filesystem() {
        let r = FakeRunner::new();
        r.fail("blkid", 1);
        let e = verify_partition(&r, &RepairConfig::default(), Utf8Path::new(DEV), "vfat", "esp")
            .unwrap_err();
        assert!(matches!(
            e.downcast_ref::<VerifyError>(),
            Some(VerifyError::TypeMismatch { found, .. }) if found.is_empty()
        ));
    }

    #[test]
    fn test_label_mismatch() {
        let r = FakeRunner::new();
        r.output("blkid -o value -s TYPE", "ext4\n");
        r.output("blkid -o value -s PARTLABEL", "var-A\n");
        let e = verify_partition(&r, &RepairConfig::default(), Utf8Path::new(DEV), "ext4", "home")
            .unwrap_err();
        assert_eq!(e.downcast_ref::<VerifyError>().unwrap().exit_code(), 2);
        assert!(format!("{e:#}").contains("has label \"var-A\" but expected \"home\""));
    }

    #[test]
    fn test_disabled() -> Result<()> {
        let r = FakeRunner::new();
        let config = RepairConfig {
            verify_partitions: false,
            ..Default::default()
        };
        verify_partition(&r, &config, Utf8Path::new(DEV), "ext4", "home")?;
        assert!(r.commands().is_empty());
        Ok(())
    }
}
