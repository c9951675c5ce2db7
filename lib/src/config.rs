//! # Repair configuration
//!
//! The configuration is resolved once at startup and then passed by
//! reference; nothing mutates it during a run. The defaults describe the
//! fixed device this tool was written for; a TOML file may override them.

use std::ffi::OsString;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::Deserialize;

/// Environment variable naming an alternative configuration file.
pub(crate) const CONFIG_ENV: &str = "DEVREPAIR_CONFIG";
/// Loaded if present and [`CONFIG_ENV`] is unset.
pub(crate) const DEFAULT_CONFIG_PATH: &str = "/etc/devrepair.toml";

/// How to find and invoke one vendor firmware updater.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct FirmwareConfig {
    /// Local directory with a bundled updater and payload; preferred when it exists.
    pub(crate) override_dir: Utf8PathBuf,
    /// Name of the updater binary inside `override_dir`.
    pub(crate) tool_name: String,
    /// Updater used when there is no override directory.
    pub(crate) default_tool: Utf8PathBuf,
    /// Variable through which the override directory is exported to the updater.
    pub(crate) source_env: String,
}

impl FirmwareConfig {
    fn default_bios() -> Self {
        Self {
            override_dir: "jupiter-bios".into(),
            tool_name: "jupiter-biosupdate".into(),
            default_tool: "/usr/bin/jupiter-biosupdate".into(),
            source_env: "JUPITER_BIOS_DIR".into(),
        }
    }

    fn default_controller() -> Self {
        Self {
            override_dir: "jupiter-controller-fw".into(),
            tool_name: "jupiter-controller-update".into(),
            default_tool: "/usr/bin/jupiter-controller-update".into(),
            source_env: "JUPITER_CONTROLLER_UPDATE_FIRMWARE_DIR".into(),
        }
    }
}

/// External tools implementing the boot-configuration convention.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub(crate) struct Tools {
    /// Runs a command inside the isolated root of one partition set.
    pub(crate) chroot: String,
    pub(crate) partsets: String,
    pub(crate) bootconf: String,
    pub(crate) bootloader_install: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            chroot: "steamos-chroot".into(),
            partsets: "steamos-partsets".into(),
            bootconf: "steamos-bootconf".into(),
            bootloader_install: "steamcl-install".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub(crate) struct RepairConfig {
    /// The physical disk holding both partition sets.
    pub(crate) disk: Utf8PathBuf,
    /// Check live filesystem type and partition label before partial repairs.
    pub(crate) verify_partitions: bool,
    /// On failure, park forever for operator inspection instead of exiting.
    pub(crate) halt_on_failure: bool,
    /// Use the drive's own sanitize command when it reports support.
    pub(crate) hardware_sanitize: bool,
    /// Where the running installer mounts the target's ESP for firmware tools.
    pub(crate) esp_mount: Utf8PathBuf,
    /// Where the running installer mounts the target's EFI-A partition.
    pub(crate) efi_mount: Utf8PathBuf,
    pub(crate) tools: Tools,
    #[serde(default = "FirmwareConfig::default_bios")]
    pub(crate) bios: FirmwareConfig,
    #[serde(default = "FirmwareConfig::default_controller")]
    pub(crate) controller: FirmwareConfig,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            disk: "/dev/nvme0n1".into(),
            verify_partitions: true,
            halt_on_failure: true,
            hardware_sanitize: false,
            esp_mount: "/esp".into(),
            efi_mount: "/efi".into(),
            tools: Tools::default(),
            bios: FirmwareConfig::default_bios(),
            controller: FirmwareConfig::default_controller(),
        }
    }
}

impl RepairConfig {
    /// Parse a TOML configuration; missing keys take their defaults.
    pub(crate) fn parse(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("Parsing configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.disk.starts_with("/dev/"),
            "Disk must be a device node under /dev, not {}",
            self.disk
        );
        for p in [&self.esp_mount, &self.efi_mount] {
            anyhow::ensure!(p.is_absolute(), "Mount point {p} must be absolute");
        }
        Ok(())
    }

    /// Override directories are looked up relative to where the tool was started.
    fn resolve_relative(&mut self, cwd: &Utf8Path) {
        for fw in [&mut self.bios, &mut self.controller] {
            if fw.override_dir.is_relative() {
                fw.override_dir = cwd.join(&fw.override_dir);
            }
        }
    }

    /// Load the configuration from [`CONFIG_ENV`], [`DEFAULT_CONFIG_PATH`],
    /// or fall back to the built-in defaults.
    #[context("Loading configuration")]
    pub(crate) fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(p) => Some(
                Utf8PathBuf::try_from(std::path::PathBuf::from(p))
                    .with_context(|| format!("{CONFIG_ENV} is not UTF-8"))?,
            ),
            None => {
                let p = Utf8Path::new(DEFAULT_CONFIG_PATH);
                p.try_exists()?.then(|| p.to_owned())
            }
        };
        let mut config = match path {
            Some(path) => {
                tracing::debug!("Reading configuration from {path}");
                let buf = std::fs::read_to_string(&path)
                    .with_context(|| format!("Reading {path}"))?;
                Self::parse(&buf).with_context(|| format!("In {path}"))?
            }
            None => Self::default(),
        };
        let cwd = std::env::current_dir()?;
        let cwd = Utf8PathBuf::try_from(cwd).context("Working directory is not UTF-8")?;
        config.resolve_relative(&cwd);
        Ok(config)
    }
}

/// Behavior switches read once from the environment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EnvFlags {
    /// Skip confirmation prompts, printing their message instead.
    pub(crate) noprompt: bool,
    /// Confirm the final reboot even when `noprompt` is set.
    pub(crate) rebootprompt: bool,
    /// Power off instead of rebooting after success.
    pub(crate) poweroff: bool,
    /// Retry a failed BIOS update once, forcing it.
    pub(crate) forcebios: bool,
}

impl EnvFlags {
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var_os(k))
    }

    /// A flag is set when the variable is present and non-empty.
    fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let get = |k: &str| lookup(k).map_or(false, |v| !v.is_empty());
        Self {
            noprompt: get("NOPROMPT"),
            rebootprompt: get("REBOOTPROMPT"),
            poweroff: get("POWEROFF"),
            forcebios: get("FORCEBIOS"),
        }
    }
}
