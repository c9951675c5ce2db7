//! # Vendor firmware staging
//!
//! The BIOS and controller updaters ship either bundled next to the
//! installer (an override directory holding the tool and its payload) or
//! as part of the running image. Which one to use is decided once per
//! firmware kind and captured in a [`FirmwareTool`].
//!
//! Updater failures are reported but do not fail the repair; the device
//! still boots on its previous firmware.

use anyhow::Result;
use camino::Utf8PathBuf;
use fn_error_context::context;

use crate::blockdev::Disk;
use crate::config::{FirmwareConfig, RepairConfig};
use crate::guard::ExitGuard;
use crate::mount;
use crate::partitions::{PartitionSet, Role};
use crate::runner::Runner;
use crate::status;
use crate::task::Task;

/// Tells the controller updater it runs outside a booted session.
const CONTROLLER_OOBE_ENV: (&str, &str) = ("JUPITER_CONTROLLER_UPDATE_IN_OOBE", "1");

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum FirmwareKind {
    Bios,
    Controller,
}

impl FirmwareKind {
    fn config(self, config: &RepairConfig) -> &FirmwareConfig {
        match self {
            FirmwareKind::Bios => &config.bios,
            FirmwareKind::Controller => &config.controller,
        }
    }
}

impl std::fmt::Display for FirmwareKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FirmwareKind::Bios => f.write_str("BIOS"),
            FirmwareKind::Controller => f.write_str("controller"),
        }
    }
}

/// The updater chosen for one firmware kind and the environment it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FirmwareTool {
    kind: FirmwareKind,
    program: Utf8PathBuf,
    env: Vec<(String, String)>,
}

impl FirmwareTool {
    /// Prefer the override directory when it exists.
    pub(crate) fn select(runner: &dyn Runner, config: &RepairConfig, kind: FirmwareKind) -> Self {
        let fw = kind.config(config);
        let mut env = Vec::new();
        let program = if runner.path_exists(&fw.override_dir) {
            tracing::debug!("Using {kind} firmware from {}", fw.override_dir);
            env.push((fw.source_env.clone(), fw.override_dir.to_string()));
            fw.override_dir.join(&fw.tool_name)
        } else {
            fw.default_tool.clone()
        };
        if kind == FirmwareKind::Controller {
            env.push((CONTROLLER_OOBE_ENV.0.into(), CONTROLLER_OOBE_ENV.1.into()));
        }
        Self { kind, program, env }
    }

    pub(crate) fn invoke(&self, runner: &dyn Runner, args: &[&str]) -> Result<()> {
        let t = Task::new(format!("Updating {} firmware", self.kind), &self.program)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .args(args);
        runner.run(&t)
    }
}

/// Run the BIOS updater against the freshly written ESP and EFI-A, which
/// it expects at the installer's own mount points. Both are unmounted
/// again before returning.
#[context("Staging BIOS firmware")]
pub(crate) fn stage_bios<'r>(
    runner: &'r dyn Runner,
    guard: &ExitGuard<'r>,
    config: &RepairConfig,
    disk: &Disk,
    force_retry: bool,
) -> Result<()> {
    let tool = FirmwareTool::select(runner, config, FirmwareKind::Bios);
    let esp = mount::mount(runner, guard, &disk.partition(Role::Esp), &config.esp_mount)?;
    let efi = mount::mount(
        runner,
        guard,
        &disk.partition(Role::Efi(PartitionSet::A)),
        &config.efi_mount,
    )?;

    if let Err(e) = tool.invoke(runner, &["--auto"]) {
        if force_retry {
            status::warning(format!("{e:#}; retrying with --force"));
            if let Err(e) = tool.invoke(runner, &["--force"]) {
                status::warning(format!("Forced BIOS update failed: {e:#}"));
            }
        } else {
            status::warning(format!("BIOS update failed: {e:#}"));
        }
    }

    efi.release()?;
    esp.release()?;
    Ok(())
}

/// Run the controller updater; it needs no mounts and is never retried.
pub(crate) fn stage_controller(runner: &dyn Runner, config: &RepairConfig) {
    let tool = FirmwareTool::select(runner, config, FirmwareKind::Controller);
    if let Err(e) = tool.invoke(runner, &[]) {
        status::warning(format!("Controller update failed: {e:#}"));
    }
}
