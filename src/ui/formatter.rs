//! Pure formatting functions for UI output.
//!
//! `format_*` functions build the text; `display_*` functions print it.

use console::style;

use crate::cli::{FinishPlan, ForkPlan, InitOutcome, StatusReport};
use crate::domain::BranchRef;
use crate::error::{PartialRelease, PendingStep};
use crate::orchestrator::{MergePlan, MergeReport, MergeStep};
use crate::warning::FlowWarning;

/// Format and print an error message in red.
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("ERROR:").red().bold(), message);
}

/// Format and print a success message with green checkmark.
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green(), message);
}

/// Format and print a status message with yellow arrow.
pub fn display_status(message: &str) {
    println!("{} {}", style("→").yellow(), message);
}

pub fn display_warning(warning: &FlowWarning) {
    eprintln!("{} {}", style("⚠ WARNING:").yellow(), warning);
}

pub fn format_step(step: &MergeStep) -> String {
    match step {
        MergeStep::Merged { target, new_head } => {
            format!("merged into {} at {}", target, new_head.short())
        }
        MergeStep::AlreadyMerged { target, head } => {
            format!("{} already contains it ({})", target, head.short())
        }
    }
}

pub fn display_merge_report(report: &MergeReport) {
    println!(
        "\n{}",
        style(format!("Landed {} on {}", report.source, report.target)).bold()
    );
    for step in &report.steps {
        display_success(&format_step(step));
    }
    if let Some(tag) = &report.tag {
        display_success(&format!(
            "tagged {} as {}",
            tag.commit.short(),
            style(&tag.name).green()
        ));
    }
    if report.deleted_source {
        display_status(&format!("deleted {}", report.source));
    }
    for refname in &report.pushed {
        display_status(&format!("pushed {}", refname));
    }
    for warning in &report.warnings {
        display_warning(warning);
    }
}

pub fn format_partial_release(partial: &PartialRelease) -> String {
    let (failed, retry) = match &partial.pending {
        PendingStep::CompanionMerge { target } => (
            format!("merging it into {}", target),
            "re-run the same finish",
        ),
        PendingStep::Tag { name } => (
            format!("creating tag {}", name),
            "re-run the finish with a version above the latest tag",
        ),
    };
    format!(
        "{} landed on {} at {}, but {} failed: {}\n\
         Resolve the cause and {}; merges already done will be skipped.",
        partial.source,
        partial.landed_on,
        partial.landed_head.short(),
        failed,
        partial.cause,
        retry
    )
}

/// Report an incomplete paired merge. Printed in full since main and its
/// companion now disagree until the finish is re-run.
pub fn display_partial_release(partial: &PartialRelease) {
    eprintln!("{}", style("PARTIAL RELEASE").red().bold().reverse());
    eprintln!("{}", format_partial_release(partial));
}

pub fn format_merge_plan(plan: &MergePlan) -> Vec<String> {
    let mut lines = vec![format!(
        "merge {} ({}) into {} ({})",
        plan.source.name, plan.source.role, plan.target.name, plan.target.role
    )];
    if let Some(companion) = &plan.companion {
        lines.push(format!("merge {} into {}", plan.target.name, companion));
    }
    if let Some(tag) = &plan.tag_name {
        lines.push(format!("create tag {}", tag));
    }
    if plan.deletes_source {
        lines.push(format!("delete {}", plan.source.name));
    }
    lines
}

pub fn display_merge_plan(plan: &MergePlan, dry_run: bool) {
    if dry_run {
        display_status("Dry run, would:");
    } else {
        display_status("Plan:");
    }
    for (i, line) in format_merge_plan(plan).iter().enumerate() {
        println!("  Step {}: {}", i + 1, line);
    }
}

pub fn display_finish_plan(plan: &FinishPlan, dry_run: bool) {
    println!("\n{} {}", style("Version:").bold(), style(plan.version).green());
    display_merge_plan(&plan.merge, dry_run);
}

pub fn display_fork_plan(plan: &ForkPlan) {
    display_status(&format!(
        "Dry run, would fork {} branch {} from {} at {}",
        plan.role,
        plan.name,
        plan.parent,
        plan.from.short()
    ));
}

pub fn display_forked(branch: &BranchRef) {
    display_success(&format!(
        "Created {} branch {} from {}",
        branch.role,
        style(&branch.name).cyan(),
        branch.forked_from.as_deref().unwrap_or("?")
    ));
}

pub fn display_init(outcome: &InitOutcome) {
    if outcome.created {
        display_success(&format!(
            "Created {} at {}",
            outcome.develop,
            outcome.head.short()
        ));
    } else {
        display_status(&format!("{} already exists", outcome.develop));
    }
}

pub fn format_branch_line(branch: &BranchRef) -> String {
    let lineage = match &branch.forked_from {
        Some(parent) => format!(" (from {})", parent),
        None => String::new(),
    };
    format!(
        "{:<12} {:<30} {}{}",
        branch.role.as_str(),
        branch.name,
        branch.head.short(),
        lineage
    )
}

pub fn display_status_report(status: &StatusReport) {
    println!("{}", style("Branches:").bold());
    for branch in &status.branches {
        println!("  {}", format_branch_line(branch));
    }
    match &status.active_release {
        Some(release) => println!("{} {}", style("Active release:").bold(), release),
        None => println!("{} none", style("Active release:").bold()),
    }
    match &status.latest_tag {
        Some(tag) => println!(
            "{} {} on {}",
            style("Latest tag:").bold(),
            style(&tag.name).green(),
            tag.commit.short()
        ),
        None => println!("{} none", style("Latest tag:").bold()),
    }
    if status.missing_from_develop > 0 {
        eprintln!(
            "{} {} commit(s) on main are not on develop",
            style("⚠ WARNING:").yellow(),
            status.missing_from_develop
        );
    }
    if !status.unclassified.is_empty() {
        display_warning(&FlowWarning::UnclassifiedBranches {
            names: status.unclassified.clone(),
        });
    }
}

/// Display manual push instruction for refs left local.
pub fn display_manual_push_instruction(refs: &[String], remote: &str) {
    if refs.is_empty() {
        return;
    }
    println!(
        "\n{} To publish, run:\n  {}",
        style("→").yellow(),
        style(format!("git push {} {}", remote, refs.join(" "))).cyan()
    );
}
