//! # Device repair CLI
//!
//! Command line entrypoint: pick a target, confirm it with the operator,
//! run its plan and offer a reboot.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use crate::config::{EnvFlags, RepairConfig};
use crate::plan::{Plan, Target};
use crate::prompt::{self, PromptKind};
use crate::reboot::{self, PowerAction};
use crate::repair::Repair;
use crate::runner::{HostRunner, Runner};
use crate::status;
use crate::verify::VerifyError;

/// Repair or reinstall the operating system on this device.
///
/// Without a known target this help is shown.
#[derive(Debug, Parser)]
#[clap(name = "devrepair", version, after_help = targets_help())]
pub(crate) struct Opt {
    /// What to repair
    #[clap(value_name = "TARGET")]
    pub(crate) target: Option<String>,
}

fn targets_help() -> String {
    let mut r = String::from("Targets:\n");
    for t in Target::ALL {
        // Writing to a String cannot fail
        let _ = writeln!(r, "  {:<10} {}", t.name(), t.about());
    }
    r
}

fn is_superuser() -> bool {
    rustix::process::getuid().is_root()
}

/// Parse the provided arguments and execute.
/// Calls [`clap::Error::exit`] on failure, printing the error message and aborting the program.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

/// Set from the signal handler; checked between steps.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// How a run ended when nothing failed.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Cancelled,
    Finished,
    /// A reboot or power off has been requested.
    Restarting,
}

/// Report a fatal error and stop. Halts forever unless disabled by
/// configuration, in which case the process exits with the failure's code.
fn stop(config: &RepairConfig, e: anyhow::Error) -> ! {
    status::error(format!("{e:#}"));
    let code = match e.downcast_ref::<VerifyError>() {
        Some(v) => {
            status::warning(format!(
                "The disk does not carry the expected layout. A full reinstall (`devrepair {}`) can still recover it.",
                Target::All
            ));
            v.exit_code()
        }
        None => 1,
    };
    if config.halt_on_failure {
        status::error("Repair failed; halting for inspection");
        reboot::halt()
    }
    std::process::exit(code)
}

/// Check the disk, confirm, run the plan for `target` and offer a reboot.
/// Any error is fatal to the run; resources still held have been released
/// by the time it is returned.
fn run_target(
    runner: &dyn Runner,
    config: &RepairConfig,
    flags: EnvFlags,
    target: Target,
    interrupted: &AtomicBool,
    confirm: impl Fn(PromptKind, &str) -> Result<bool>,
) -> Result<Outcome> {
    // A missing disk is reported before anything is asked or touched
    let mut repair = Repair::new(runner, config, flags, interrupted)?;

    if let Some(question) = target.confirmation() {
        if !confirm(PromptKind::Destructive, question)? {
            return Ok(Outcome::Cancelled);
        }
    }

    if let Err(e) = repair.execute(&Plan::new(target)) {
        let failed_cleanups = repair.cleanup();
        if failed_cleanups > 0 {
            tracing::warn!("{failed_cleanups} cleanup action(s) failed");
        }
        return Err(e);
    }
    status::progress(format!("Finished {target}"));

    if !target.mode().offers_reboot() {
        return Ok(Outcome::Finished);
    }
    let action = PowerAction::from_poweroff_flag(flags.poweroff);
    let question = match action {
        PowerAction::Reboot => "Reboot now?",
        PowerAction::Poweroff => "Power off now?",
    };
    if !confirm(PromptKind::Reboot, question)? {
        return Ok(Outcome::Finished);
    }
    reboot::request(runner, action)?;
    Ok(Outcome::Restarting)
}

/// Internal (non-generic/monomorphized) primary CLI entrypoint
fn run_from_opt(opt: Opt) -> Result<()> {
    let target = opt.target.as_deref().and_then(Target::from_name);
    let root = is_superuser();
    let Some(target) = target.filter(|_| root) else {
        if let Some(name) = opt.target.as_deref().filter(|_| target.is_none()) {
            status::warning(format!("Unknown target: {name}"));
        }
        Opt::command().print_help()?;
        anyhow::ensure!(root, "This tool must be run as root");
        return Ok(());
    };

    let config = RepairConfig::load()?;
    let flags = EnvFlags::from_env();
    // Only record the request; the tool being run sees the same signal
    // and fails its step, which releases everything held.
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed))
        .context("Installing signal handler")?;

    let confirm = |kind, question: &str| prompt::confirm(&flags, kind, question);
    match run_target(&HostRunner, &config, flags, target, &INTERRUPTED, confirm) {
        Ok(Outcome::Cancelled) => println!("Cancelled; nothing was changed."),
        Ok(Outcome::Finished) => {}
        Ok(Outcome::Restarting) => reboot::halt(),
        Err(e) => stop(&config, e),
    }
    Ok(())
}
