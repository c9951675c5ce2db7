//! Helpers for interacting with mountpoints

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;

use crate::guard::{ExitGuard, ReleaseHandle};
use crate::runner::Runner;
use crate::task::Task;

/// Mount a device to the target path. The returned handle unmounts it; if
/// it is never released explicitly the exit guard does so.
#[context("Mounting {dev} on {target}")]
pub(crate) fn mount<'r>(
    runner: &'r dyn Runner,
    guard: &ExitGuard<'r>,
    dev: &Utf8Path,
    target: &Utf8Path,
) -> Result<ReleaseHandle<'r>> {
    runner.run(&Task::new(format!("Mounting {target}"), "mount").args([dev.as_str(), target.as_str()]))?;
    let target = target.to_owned();
    Ok(guard.register(format!("unmount {target}"), move || {
        runner.run(
            &Task::new(format!("Unmounting {target}"), "umount")
                .arg(&target)
                .quiet(),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeRunner;

    #[test]
    fn test_mount_unmount_once() -> Result<()> {
        let r = FakeRunner::new();
        {
            let guard = ExitGuard::new();
            let h = mount(&r, &guard, Utf8Path::new("/dev/nvme0n1p1"), Utf8Path::new("/esp"))?;
            h.release()?;
            let _other = mount(&r, &guard, Utf8Path::new("/dev/nvme0n1p2"), Utf8Path::new("/efi"))?;
        }
        similar_asserts::assert_eq!(
            r.commands(),
            [
                "mount /dev/nvme0n1p1 /esp",
                "umount /esp",
                "mount /dev/nvme0n1p2 /efi",
                "umount /efi",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_failed_mount_registers_nothing() {
        let r = FakeRunner::new();
        r.fail("mount", 1);
        let guard = ExitGuard::new();
        assert!(mount(&r, &guard, Utf8Path::new("/dev/nvme0n1p1"), Utf8Path::new("/esp")).is_err());
        assert_eq!(guard.outstanding(), 0);
    }
}
