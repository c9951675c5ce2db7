//! Handling of system restarts/reboot

use std::io::Write;

use fn_error_context::context;

use crate::runner::Runner;
use crate::task::Task;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PowerAction {
    Reboot,
    Poweroff,
}

impl PowerAction {
    pub(crate) fn from_poweroff_flag(poweroff: bool) -> Self {
        if poweroff {
            PowerAction::Poweroff
        } else {
            PowerAction::Reboot
        }
    }

    fn verb(self) -> &'static str {
        match self {
            PowerAction::Reboot => "reboot",
            PowerAction::Poweroff => "poweroff",
        }
    }
}

/// Ask systemd to reboot or power off. Returns once the request is queued.
#[context("Initiating {}", action.verb())]
pub(crate) fn request(runner: &dyn Runner, action: PowerAction) -> anyhow::Result<()> {
    // Flush output streams
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    runner.run(&Task::new(format!("Requesting {}", action.verb()), "systemctl").arg(action.verb()))
}

/// Park the process forever. Used after a reboot was requested and after a
/// fatal error, so that the state stays inspectable and automation sees a
/// hang rather than a spurious exit.
pub(crate) fn halt() -> ! {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    tracing::debug!("Sleeping forever...");
    loop {
        std::thread::park();
    }
}
