//! # Executing a repair plan
//!
//! [`Repair`] interprets a [`Plan`] step by step against a [`Runner`]. It
//! owns the [`ExitGuard`] for the run: every mount and the freeze of the
//! installer's root are registered there as they are acquired, so that a
//! failure at any step leaves the host unfrozen and unmounted.
//!
//! An interrupt is noticed between steps. A tool killed by the same signal
//! fails its step, so either way the run ends through the normal failure
//! path and the guard is drained.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use crate::blockdev::{self, Disk};
use crate::bootconf;
use crate::config::{EnvFlags, RepairConfig};
use crate::firmware;
use crate::guard::{ExitGuard, ReleaseHandle};
use crate::imager::{self, PreconditionError, SourceRoot};
use crate::mkfs;
use crate::partitions::Role;
use crate::plan::{Plan, Step};
use crate::runner::Runner;
use crate::sanitize;
use crate::status;
use crate::verify;

/// How often a running drive sanitize is polled.
const SANITIZE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// State of one run.
#[derive(Debug)]
pub(crate) struct Repair<'r> {
    runner: &'r dyn Runner,
    config: &'r RepairConfig,
    flags: EnvFlags,
    disk: Disk,
    guard: ExitGuard<'r>,
    source: Option<SourceRoot>,
    frozen: Option<ReleaseHandle<'r>>,
    /// Filesystem UUIDs given to root slots so far.
    assigned: Vec<Uuid>,
    poll_interval: Duration,
    /// Set asynchronously when the process is asked to stop.
    interrupted: &'r AtomicBool,
}

impl<'r> Repair<'r> {
    /// Fails if the configured disk does not exist.
    pub(crate) fn new(
        runner: &'r dyn Runner,
        config: &'r RepairConfig,
        flags: EnvFlags,
        interrupted: &'r AtomicBool,
    ) -> Result<Self> {
        if !runner.path_exists(&config.disk) {
            return Err(PreconditionError::MissingDisk(config.disk.clone()).into());
        }
        Ok(Self {
            runner,
            config,
            flags,
            disk: Disk::new(config.disk.clone()),
            guard: ExitGuard::new(),
            source: None,
            frozen: None,
            assigned: Vec::new(),
            poll_interval: SANITIZE_POLL_INTERVAL,
            interrupted,
        })
    }

    /// Run every step of `plan` in order, stopping at the first failure.
    /// Resources still held on failure stay registered until [`Self::cleanup`]
    /// or drop.
    pub(crate) fn execute(&mut self, plan: &Plan) -> Result<()> {
        tracing::debug!("Plan for {}: {:?}", plan.target, plan.steps);
        for step in plan.steps.iter().copied() {
            if self.interrupted.load(Ordering::Relaxed) {
                anyhow::bail!("Interrupted before: {step}");
            }
            status::progress(step);
            self.step(step)?;
        }
        let held = self.guard.outstanding();
        if held > 0 {
            tracing::warn!("{held} resource(s) still held after {}", plan.target);
        }
        Ok(())
    }

    fn source(&self) -> Result<&SourceRoot> {
        self.source
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Installer root not resolved"))
    }

    fn step(&mut self, step: Step) -> Result<()> {
        let runner = self.runner;
        let config = self.config;
        let disk = &self.disk;
        match step {
            Step::Sanitize => {
                sanitize::sanitize(runner, disk.path(), config.hardware_sanitize, self.poll_interval);
            }
            Step::WritePartitionTable => blockdev::write_partition_table(runner, disk)?,
            Step::Verify(role) => {
                let spec = role.spec();
                verify::verify_partition(runner, config, &disk.partition(role), spec.fs.as_str(), spec.name)?
            }
            Step::Format(role) => mkfs::format_role(runner, disk, role)?,
            Step::StageBios => {
                firmware::stage_bios(runner, &self.guard, config, disk, self.flags.forcebios)?
            }
            Step::StageController => firmware::stage_controller(runner, config),
            Step::ResolveSource => {
                self.source = Some(imager::resolve_source_root(runner, disk)?);
            }
            Step::FreezeSource => {
                let handle = imager::freeze(runner, &self.guard, self.source()?)?;
                self.frozen = Some(handle);
            }
            Step::ImageRoot(set) => {
                anyhow::ensure!(
                    self.frozen.as_ref().is_some_and(|h| !h.is_released()),
                    "Installer root is not frozen"
                );
                let source = &self.source()?.device;
                let target = disk.partition(Role::Root(set));
                let uuid = imager::image_root(runner, source, &target, &self.assigned)?;
                tracing::debug!("rootfs-{set} has filesystem UUID {uuid}");
                self.assigned.push(uuid);
            }
            Step::ThawSource => {
                if let Some(h) = self.frozen.take() {
                    h.release()?;
                }
            }
            Step::FinalizeBoot(set) => bootconf::finalize_partset(runner, config, disk, set)?,
            Step::InstallBootloader => bootconf::install_bootloader(runner, config, disk)?,
            Step::Chroot => bootconf::interactive_chroot(runner, config, disk)?,
        }
        Ok(())
    }

    /// Release everything still held; returns the number of failed releases.
    pub(crate) fn cleanup(&self) -> usize {
        self.guard.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitions::PartitionSet;
    use crate::plan::Target;
    use crate::testutil::FakeRunner;
    use crate::verify::VerifyError;

    static RUNNING: AtomicBool = AtomicBool::new(false);

    fn run(r: &FakeRunner, config: &RepairConfig, flags: EnvFlags, target: Target) -> Result<()> {
        let mut repair = Repair::new(r, config, flags, &RUNNING)?;
        repair.poll_interval = Duration::ZERO;
        let res = repair.execute(&Plan::new(target));
        if res.is_err() {
            repair.cleanup();
        }
        res
    }

    fn touches(cmds: &[String], dev: &str) -> bool {
        cmds.iter()
            .any(|c| !c.starts_with("blkid") && c.split(' ').any(|a| a == dev || a == format!("of={dev}")))
    }

    #[test]
    fn test_missing_disk() {
        let r = FakeRunner::new();
        let e = Repair::new(&r, &RepairConfig::default(), EnvFlags::default(), &RUNNING).unwrap_err();
        assert!(matches!(
            e.downcast_ref::<PreconditionError>(),
            Some(PreconditionError::MissingDisk(_))
        ));
        assert!(r.commands().is_empty());
    }

    #[test]
    fn test_home() -> Result<()> {
        let r = FakeRunner::with_layout();
        run(&r, &RepairConfig::default(), EnvFlags::default(), Target::Home)?;
        let cmds = r.commands();
        let mutating: Vec<_> = cmds.iter().filter(|c| !c.starts_with("blkid")).collect();
        similar_asserts::assert_eq!(
            mutating,
            [
                "mkfs.ext4 -F -L var /dev/nvme0n1p6",
                "mkfs.ext4 -F -L var /dev/nvme0n1p7",
                "mkfs.ext4 -F -L home -O casefold -T huge /dev/nvme0n1p8",
                "tune2fs -m 0 /dev/nvme0n1p8",
            ]
        );
        assert_eq!(r.matching("blkid").len(), 12);
        for dev in ["/dev/nvme0n1p1", "/dev/nvme0n1p2", "/dev/nvme0n1p3", "/dev/nvme0n1p4", "/dev/nvme0n1p5"] {
            assert!(!touches(&cmds, dev), "{dev} was touched");
        }
        Ok(())
    }

    #[test]
    fn test_home_verify_mismatch() {
        let r = FakeRunner::with_installer();
        r.output("blkid -o value -s TYPE /dev/nvme0n1p1", "vfat");
        r.output("blkid -o value -s PARTLABEL /dev/nvme0n1p1", "esp");
        r.output("blkid -o value -s TYPE /dev/nvme0n1p2", "ext4");
        let e = run(&r, &RepairConfig::default(), EnvFlags::default(), Target::Home).unwrap_err();
        let v = e.downcast_ref::<VerifyError>().unwrap();
        assert_eq!(v.exit_code(), 1);
        // Nothing past the failing check ran
        assert_eq!(r.commands().last().unwrap(), "blkid -o value -s TYPE /dev/nvme0n1p2");
        assert!(r.matching("mkfs").is_empty());
    }

    #[test]
    fn test_verification_disabled() -> Result<()> {
        let r = FakeRunner::with_installer();
        let config = RepairConfig {
            verify_partitions: false,
            ..Default::default()
        };
        run(&r, &config, EnvFlags::default(), Target::Home)?;
        assert!(r.matching("blkid").is_empty());
        assert_eq!(r.matching("mkfs").len(), 3);
        Ok(())
    }

    #[test]
    fn test_system() -> Result<()> {
        let r = FakeRunner::with_layout();
        run(&r, &RepairConfig::default(), EnvFlags::default(), Target::System)?;
        let cmds = r.commands();
        assert!(!touches(&cmds, "/dev/nvme0n1p8"));
        assert_eq!(r.matching("mkfs").len(), 5);
        let freeze = cmds.iter().position(|c| c == "fsfreeze -f /").unwrap();
        let thaw = cmds.iter().position(|c| c == "fsfreeze -u /").unwrap();
        let dds: Vec<_> = cmds
            .iter()
            .enumerate()
            .filter(|(_, c)| c.starts_with("dd if=/dev/sda3"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(dds.len(), 2);
        assert!(dds.iter().all(|&i| freeze < i && i < thaw));
        assert_eq!(r.matching("fsfreeze").len(), 2);
        let chroot = cmds.iter().position(|c| c.starts_with("steamos-chroot")).unwrap();
        assert!(thaw < chroot);
        assert!(cmds.last().unwrap().ends_with("--force-extra-removable"));
        Ok(())
    }

    #[test]
    fn test_all() -> Result<()> {
        let r = FakeRunner::with_installer();
        r.output("blockdev --getsize64 /dev/nvme0n1", "64023257088\n");
        run(&r, &RepairConfig::default(), EnvFlags::default(), Target::All)?;
        let cmds = r.commands();
        assert!(r.matching("blkid -o value -s TYPE").is_empty());
        assert!(r.matching("blkid -o value -s PARTLABEL").is_empty());
        assert_eq!(cmds[0], "wipefs -a /dev/nvme0n1");
        let sfdisk = cmds.iter().position(|c| c.starts_with("sfdisk")).unwrap();
        let first_mkfs = cmds.iter().position(|c| c.starts_with("mkfs")).unwrap();
        assert!(sfdisk < first_mkfs);
        assert_eq!(r.matching("sfdisk").len(), 1);
        assert_eq!(r.matching("mkfs").len(), 6);
        assert_eq!(r.matching("/usr/bin/jupiter-biosupdate").len(), 1);
        assert_eq!(r.matching("JUPITER_CONTROLLER_UPDATE_IN_OOBE=1").len(), 1);
        assert_eq!(r.matching("btrfstune").len(), 2);
        assert_eq!(r.matching("steamos-chroot").len(), 13);
        Ok(())
    }

    #[test]
    fn test_imaging_failure_thaws_once() {
        let r = FakeRunner::with_layout();
        r.output("blockdev --getsize64 /dev/nvme0n1p5", "1\n");
        let e = run(&r, &RepairConfig::default(), EnvFlags::default(), Target::System).unwrap_err();
        assert!(format!("{e:#}").contains("smaller than source"));
        similar_asserts::assert_eq!(r.matching("fsfreeze"), ["fsfreeze -f /", "fsfreeze -u /"]);
        assert_eq!(r.matching("dd if=/dev/sda3").len(), 1);
        assert!(r.matching("steamos-chroot").is_empty());
    }

    #[test]
    fn test_image_requires_freeze() {
        let r = FakeRunner::with_layout();
        let config = RepairConfig::default();
        let mut repair = Repair::new(&r, &config, EnvFlags::default(), &RUNNING).unwrap();
        let plan = Plan {
            target: Target::System,
            steps: vec![Step::ResolveSource, Step::ImageRoot(PartitionSet::A)],
        };
        let e = repair.execute(&plan).unwrap_err();
        assert!(format!("{e:#}").contains("not frozen"), "{e:#}");
        assert!(r.matching("dd").is_empty());
        assert!(r.matching("fsfreeze").is_empty());
    }

    #[test]
    fn test_interrupt_between_steps() -> Result<()> {
        let r = FakeRunner::with_layout();
        let config = RepairConfig::default();
        let interrupted = AtomicBool::new(false);
        let mut repair = Repair::new(&r, &config, EnvFlags::default(), &interrupted)?;
        repair.execute(&Plan {
            target: Target::System,
            steps: vec![Step::ResolveSource, Step::FreezeSource],
        })?;
        interrupted.store(true, Ordering::Relaxed);
        let e = repair
            .execute(&Plan {
                target: Target::System,
                steps: vec![Step::ImageRoot(PartitionSet::A), Step::ThawSource],
            })
            .unwrap_err();
        assert!(format!("{e:#}").starts_with("Interrupted"), "{e:#}");
        assert!(r.matching("dd").is_empty());
        // Still frozen until the failure path drains the guard
        assert_eq!(r.matching("fsfreeze"), ["fsfreeze -f /"]);
        assert_eq!(repair.cleanup(), 0);
        similar_asserts::assert_eq!(r.matching("fsfreeze"), ["fsfreeze -f /", "fsfreeze -u /"]);
        Ok(())
    }

    #[test]
    fn test_forcebios() -> Result<()> {
        let r = FakeRunner::with_layout();
        r.fail("/usr/bin/jupiter-biosupdate", 1);
        let flags = EnvFlags {
            forcebios: true,
            ..Default::default()
        };
        run(&r, &RepairConfig::default(), flags, Target::System)?;
        assert_eq!(
            r.matching("/usr/bin/jupiter-biosupdate"),
            [
                "/usr/bin/jupiter-biosupdate --auto",
                "/usr/bin/jupiter-biosupdate --force"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_chroot() -> Result<()> {
        let r = FakeRunner::with_installer();
        run(&r, &RepairConfig::default(), EnvFlags::default(), Target::Chroot)?;
        assert_eq!(r.commands(), ["steamos-chroot --disk /dev/nvme0n1 --partset A"]);
        Ok(())
    }
}
