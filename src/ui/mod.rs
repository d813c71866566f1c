//! User interface module - interaction (prompts) and formatting.
//!
//! Separates concerns:
//! - `formatter` - Pure formatting functions
//! - This module - Interactive prompts and user input handling

use std::io::{self, Write};

use console::Term;

use crate::domain::{CommitId, Version};
use crate::error::{FlowError, Result};

pub mod formatter;

// Re-export formatter functions for convenience
pub use formatter::{
    display_error, display_finish_plan, display_fork_plan, display_forked, display_init,
    display_manual_push_instruction, display_merge_plan, display_merge_report,
    display_partial_release, display_status, display_status_report, display_success,
    display_warning,
};

/// Whether prompts can be answered. Scripts and CI never get asked.
pub fn is_interactive() -> bool {
    console::user_attended()
}

/// Prompts user to confirm an action with a yes/no prompt.
///
/// Displays the given prompt and accepts "y" or "yes" (case-insensitive) as confirmation.
/// Default is "no" if user presses Enter.
///
/// # Arguments
/// * `prompt` - The prompt message to display (without the "(y/N): " suffix)
///
/// # Returns
/// * `Ok(true)` - If user entered "y" or "yes"
/// * `Ok(false)` - Otherwise (including Enter, or "n"/"no")
/// * `Err` - If input error occurs
pub fn confirm_action(prompt: &str) -> Result<bool> {
    print!("\n{} (y/N): ", prompt);
    io::stdout().flush()?;

    let input = Term::stdout().read_line()?;
    Ok(parse_confirmation(&input))
}

fn parse_confirmation(input: &str) -> bool {
    let response = input.trim().to_lowercase();
    response == "y" || response == "yes"
}

/// Ask before an operation that moves shared branches.
///
/// Skipped (treated as confirmed) with `force` or when nobody is at the terminal.
pub fn confirm_or_force(prompt: &str, force: bool) -> Result<bool> {
    if force || !is_interactive() {
        return Ok(true);
    }
    confirm_action(prompt)
}

/// Parse a version typed on the command line, as `1.2.3` or `v1.2.3`.
pub fn parse_version_arg(input: &str) -> Result<Version> {
    Version::parse(input)
}

/// Validates a commit id given with `--expect`.
///
/// Full 40-character hex ids only, so a short prefix never matches by accident.
pub fn parse_commit_arg(input: &str) -> Result<CommitId> {
    let trimmed = input.trim();
    if trimmed.len() != 40 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FlowError::config(format!(
            "'{}' is not a full 40-character commit id",
            input
        )));
    }
    Ok(CommitId::new(trimmed.to_ascii_lowercase()))
}
