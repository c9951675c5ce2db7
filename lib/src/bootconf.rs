//! Boot configuration for freshly imaged partition sets.
//!
//! Everything here runs inside the partition set's own root through the
//! chroot tool, so the tools and paths are those of the image, not of the
//! running installer.

use anyhow::Result;
use fn_error_context::context;

use crate::blockdev::Disk;
use crate::config::RepairConfig;
use crate::partitions::PartitionSet;
use crate::runner::Runner;
use crate::task::Task;

/// Where the per-set EFI partition is mounted inside the chroot.
const CHROOT_EFI: &str = "/efi";
/// Boot-selection records live on the shared ESP.
const CHROOT_BOOTCONF_DIR: &str = "/esp/SteamOS/conf";

/// A command run in the isolated root of `set`.
fn in_partset<S: AsRef<str>>(
    config: &RepairConfig,
    disk: &Disk,
    set: PartitionSet,
    description: impl AsRef<str>,
    overlay: bool,
    argv: impl IntoIterator<Item = S>,
) -> Task {
    let t = Task::new(description, &config.tools.chroot);
    let t = if overlay { t } else { t.arg("--no-overlay") };
    t.args(["--disk", disk.path().as_str(), "--partset", set.name(), "--"])
        .args(argv)
}

/// Write the boot metadata of `set` so that it is bootable and titled
/// after itself.
#[context("Finalizing boot configuration for set {set}")]
pub(crate) fn finalize_partset(
    runner: &dyn Runner,
    config: &RepairConfig,
    disk: &Disk,
    set: PartitionSet,
) -> Result<()> {
    let efi_dir = format!("{CHROOT_EFI}/SteamOS");
    let partsets = format!("{efi_dir}/partsets");
    let tools = &config.tools;
    let steps: [(&str, Vec<&str>); 6] = [
        ("Creating EFI directory", vec!["mkdir", "-p", efi_dir.as_str()]),
        ("Creating boot configuration directory", vec!["mkdir", "-p", CHROOT_BOOTCONF_DIR]),
        ("Installing partition set catalog", vec![tools.partsets.as_str(), partsets.as_str()]),
        (
            "Creating boot configuration",
            vec![
                tools.bootconf.as_str(),
                "create",
                "--image",
                set.name(),
                "--conf-dir",
                CHROOT_BOOTCONF_DIR,
                "--efi-dir",
                CHROOT_EFI,
                "--set",
                "title",
                set.name(),
            ],
        ),
        ("Generating bootloader image", vec!["grub-mkimage"]),
        ("Updating bootloader menu", vec!["update-grub"]),
    ];
    for (description, argv) in steps {
        runner.run(&in_partset(
            config,
            disk,
            set,
            format!("{description} ({set})"),
            false,
            argv,
        ))?;
    }
    Ok(())
}

/// Install the first-stage bootloader onto EFI-A.
#[context("Installing bootloader")]
pub(crate) fn install_bootloader(runner: &dyn Runner, config: &RepairConfig, disk: &Disk) -> Result<()> {
    runner.run(&in_partset(
        config,
        disk,
        PartitionSet::A,
        "Installing bootloader",
        true,
        [
            config.tools.bootloader_install.as_str(),
            "--flags",
            "restricted",
            "--force-extra-removable",
        ],
    ))
}

/// Hand the terminal to a shell in the root of set A.
pub(crate) fn interactive_chroot(runner: &dyn Runner, config: &RepairConfig, disk: &Disk) -> Result<()> {
    let t = Task::new("Entering chroot of partition set A", &config.tools.chroot)
        .args(["--disk", disk.path().as_str(), "--partset", PartitionSet::A.name()])
        .interactive();
    runner.run(&t)
}
