//! # Repair plans
//!
//! A target selected on the command line maps to an [`Intent`], and the
//! intent to an ordered list of [`Step`]s computed once before anything is
//! touched. The list is the whole contract of a run: the interpreter in
//! [`crate::repair`] executes it in order and does nothing else.

use std::fmt::Display;

use crate::partitions::{PartitionSet, Role, PARTITIONS};

/// A top-level action selectable on the command line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    All,
    System,
    Home,
    Chroot,
    Sanitize,
}

impl Target {
    pub(crate) const ALL: [Target; 5] = [
        Target::All,
        Target::System,
        Target::Home,
        Target::Chroot,
        Target::Sanitize,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Target::All => "all",
            Target::System => "system",
            Target::Home => "home",
            Target::Chroot => "chroot",
            Target::Sanitize => "sanitize",
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// One-line description for the help text.
    pub(crate) fn about(self) -> &'static str {
        match self {
            Target::All => "Erase the disk and reinstall everything, including user data",
            Target::System => "Reinstall the operating system, keeping user data",
            Target::Home => "Reset user data, keeping the operating system",
            Target::Chroot => "Open a shell inside the installed system (partition set A)",
            Target::Sanitize => "Erase the disk",
        }
    }

    pub(crate) fn intent(self) -> Intent {
        match self {
            Target::All => Intent {
                write_partition_table: true,
                write_os: true,
                write_home: true,
            },
            Target::System => Intent {
                write_os: true,
                ..Default::default()
            },
            Target::Home => Intent {
                write_home: true,
                ..Default::default()
            },
            Target::Chroot | Target::Sanitize => Intent::default(),
        }
    }

    pub(crate) fn mode(self) -> RepairMode {
        match self {
            Target::Chroot => RepairMode::InteractiveChroot,
            Target::Sanitize => RepairMode::SanitizeOnly,
            _ => self.intent().mode(),
        }
    }

    /// The question put to the operator before a destructive target runs.
    pub(crate) fn confirmation(self) -> Option<&'static str> {
        match self {
            Target::All => Some(
                "This will erase the whole disk and reinstall the system. All user data will be lost. Continue?",
            ),
            Target::System => Some(
                "This will reinstall the operating system on both partition sets. User data is kept. Continue?",
            ),
            Target::Home => Some("This will delete all user data. Continue?"),
            Target::Sanitize => Some("This will irrecoverably erase the whole disk. Continue?"),
            Target::Chroot => None,
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a run writes; fixed once the target is chosen.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Intent {
    pub(crate) write_partition_table: bool,
    pub(crate) write_os: bool,
    pub(crate) write_home: bool,
}

impl Intent {
    pub(crate) fn mode(self) -> RepairMode {
        if self.write_partition_table {
            RepairMode::FullReinstall
        } else if self.write_os {
            RepairMode::SystemRepair
        } else if self.write_home {
            RepairMode::HomeRepair
        } else {
            RepairMode::NoOp
        }
    }

    /// Partial repairs check that the disk still carries our layout.
    fn verifies(self) -> bool {
        !self.write_partition_table && (self.write_os || self.write_home)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum RepairMode {
    FullReinstall,
    SystemRepair,
    HomeRepair,
    SanitizeOnly,
    InteractiveChroot,
    NoOp,
}

impl RepairMode {
    /// Whether a completed run leaves a system worth rebooting into.
    pub(crate) fn offers_reboot(self) -> bool {
        matches!(
            self,
            RepairMode::FullReinstall | RepairMode::SystemRepair | RepairMode::HomeRepair
        )
    }
}

/// One unit of work.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Sanitize,
    WritePartitionTable,
    Verify(Role),
    Format(Role),
    StageBios,
    StageController,
    /// Find the device backing the installer's running root.
    ResolveSource,
    FreezeSource,
    ImageRoot(PartitionSet),
    ThawSource,
    FinalizeBoot(PartitionSet),
    InstallBootloader,
    Chroot,
}

impl Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Sanitize => f.write_str("Erasing disk"),
            Step::WritePartitionTable => f.write_str("Writing partition table"),
            Step::Verify(role) => write!(f, "Verifying {role}"),
            Step::Format(role) => write!(f, "Formatting {role}"),
            Step::StageBios => f.write_str("Updating BIOS"),
            Step::StageController => f.write_str("Updating controller firmware"),
            Step::ResolveSource => f.write_str("Locating installer image"),
            Step::FreezeSource => f.write_str("Freezing installer image"),
            Step::ImageRoot(set) => write!(f, "Installing root filesystem {set}"),
            Step::ThawSource => f.write_str("Thawing installer image"),
            Step::FinalizeBoot(set) => write!(f, "Configuring boot for set {set}"),
            Step::InstallBootloader => f.write_str("Installing bootloader"),
            Step::Chroot => f.write_str("Entering chroot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Plan {
    pub(crate) target: Target,
    pub(crate) steps: Vec<Step>,
}

impl Plan {
    pub(crate) fn new(target: Target) -> Self {
        use PartitionSet::*;
        let mut steps = Vec::new();
        match target.mode() {
            RepairMode::InteractiveChroot => steps.push(Step::Chroot),
            RepairMode::SanitizeOnly => steps.push(Step::Sanitize),
            RepairMode::NoOp => {}
            RepairMode::FullReinstall | RepairMode::SystemRepair | RepairMode::HomeRepair => {
                let intent = target.intent();
                if intent.write_partition_table {
                    steps.extend([Step::Sanitize, Step::WritePartitionTable]);
                } else if intent.verifies() {
                    // Root partitions are overwritten wholesale and never checked
                    steps.extend(
                        PARTITIONS
                            .iter()
                            .filter(|p| !matches!(p.role, Role::Root(_)))
                            .map(|p| Step::Verify(p.role)),
                    );
                }
                // Stale var state breaks the overlay of either set
                steps.extend([Step::Format(Role::Var(A)), Step::Format(Role::Var(B))]);
                if intent.write_os {
                    steps.extend([
                        Step::Format(Role::Esp),
                        Step::Format(Role::Efi(A)),
                        Step::Format(Role::Efi(B)),
                    ]);
                }
                if intent.write_home {
                    steps.push(Step::Format(Role::Home));
                }
                if intent.write_os {
                    steps.extend([
                        Step::StageBios,
                        Step::StageController,
                        Step::ResolveSource,
                        Step::FreezeSource,
                        Step::ImageRoot(A),
                        Step::ImageRoot(B),
                        Step::ThawSource,
                        Step::FinalizeBoot(A),
                        Step::FinalizeBoot(B),
                        Step::InstallBootloader,
                    ]);
                }
            }
        }
        Self { target, steps }
    }
}
