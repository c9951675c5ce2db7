//! Operator confirmation before destructive actions.

use anyhow::{Context, Result};

use crate::config::EnvFlags;

/// Which kind of question is being asked; the final reboot can be made
/// to prompt even when everything else is unattended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PromptKind {
    Destructive,
    Reboot,
}

fn should_ask(flags: &EnvFlags, kind: PromptKind) -> bool {
    match kind {
        PromptKind::Destructive => !flags.noprompt,
        PromptKind::Reboot => !flags.noprompt || flags.rebootprompt,
    }
}

pub(crate) fn ask_yes_no(prompt: &str, default: bool) -> Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .wait_for_newline(true)
        .interact()
        .context("prompting")
}

/// Ask the operator to confirm; when prompts are suppressed the message
/// is printed and the answer is yes.
pub(crate) fn confirm(flags: &EnvFlags, kind: PromptKind, message: &str) -> Result<bool> {
    // Print an empty line so that the question stands out from the rest of the output
    println!();
    if should_ask(flags, kind) {
        ask_yes_no(message, false)
    } else {
        println!("{message} (yes, prompts disabled)");
        Ok(true)
    }
}
