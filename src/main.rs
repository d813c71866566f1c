use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gitflow::cli::{FinishKind, FlowContext};
use gitflow::config;
use gitflow::domain::BranchRole;
use gitflow::git::Git2Backend;
use gitflow::orchestrator::MergeReport;
use gitflow::{ui, FlowError};

#[derive(clap::Parser)]
#[command(
    name = "gitflow",
    version,
    about = "Gitflow branch lifecycle with enforced merge policy"
)]
struct Args {
    #[arg(short, long, global = true, help = "Custom configuration file path")]
    config: Option<String>,

    #[arg(long, global = true, default_value = ".", help = "Path inside the repository")]
    repo: PathBuf,

    #[arg(long, global = true, help = "Name recorded as the requesting actor")]
    actor: Option<String>,

    #[arg(long, global = true, help = "Push advanced branches and tags")]
    push: bool,

    #[arg(short, long, global = true, help = "Skip confirmation prompts")]
    force: bool,

    #[arg(long, global = true, help = "Preview what would happen without making changes")]
    dry_run: bool,

    #[arg(short, long, global = true, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the develop branch from main when missing
    Init,
    /// Fork a feature, release or maintenance branch
    Fork {
        /// feature, release, maintenance (or hotfix), or auto to infer from the name
        role: String,
        name: String,
        /// Parent branch; defaults to develop, or main for maintenance
        #[arg(long)]
        from: Option<String>,
    },
    /// Merge a branch into another as the policy allows
    Land {
        source: String,
        target: String,
        /// Target head the merge must start from (full commit id)
        #[arg(long)]
        expect: Option<String>,
    },
    /// Release branch operations
    Release {
        #[command(subcommand)]
        action: FinishAction,
    },
    /// Maintenance branch operations
    Hotfix {
        #[command(subcommand)]
        action: FinishAction,
    },
    /// Show branches, the active release and the latest tag
    Status,
}

#[derive(Subcommand)]
enum FinishAction {
    /// Land on main, merge back and tag
    Finish {
        branch: String,
        /// Version to tag; taken from the branch name or the latest tag when omitted
        #[arg(value_name = "VERSION")]
        release_version: Option<String>,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        std::process::exit(report_error(&e));
    }
}

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Print `e` and pick the exit code for it.
fn report_error(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<FlowError>() {
        Some(flow) => {
            match flow {
                FlowError::PartialRelease(partial) => ui::display_partial_release(partial),
                _ => ui::display_error(&flow.to_string()),
            }
            flow.exit_code()
        }
        None => {
            ui::display_error(&format!("{:#}", e));
            1
        }
    }
}

fn parse_role(role: &str) -> Result<Option<BranchRole>> {
    if role.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    Ok(Some(role.parse::<BranchRole>()?))
}

fn default_actor() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn run(args: Args) -> Result<()> {
    let config = config::load_config(args.config.as_deref()).context("Error loading config")?;
    let remote = config.sync.remote.clone();
    let push_enabled = args.push || config.sync.push;

    let backend = Git2Backend::open(&args.repo, remote.as_str())
        .with_context(|| format!("Git repository error at {}", args.repo.display()))?;
    let actor = args.actor.clone().unwrap_or_else(default_actor);
    let ctx = FlowContext::new(&backend, config, actor)?.with_push(args.push);

    match args.command {
        Command::Init => {
            if args.dry_run {
                ui::display_status("Dry run, would create develop from main if missing");
                return Ok(());
            }
            ui::display_init(&ctx.init()?);
        }
        Command::Fork { role, name, from } => {
            let role = parse_role(&role)?;
            if args.dry_run {
                let model = ctx.load_model()?;
                ui::display_fork_plan(&ctx.plan_fork(&model, role, &name, from.as_deref())?);
                return Ok(());
            }
            ui::display_forked(&ctx.fork(role, &name, from.as_deref())?);
        }
        Command::Land {
            source,
            target,
            expect,
        } => {
            let expect = expect.map(|id| ui::parse_commit_arg(&id)).transpose()?;
            let expect = expect.as_ref().map(|id| id.as_str());

            let plan = ctx.plan_land(&source, &target, expect)?;
            ui::display_merge_plan(&plan, args.dry_run);
            if args.dry_run {
                return Ok(());
            }
            if !ui::confirm_or_force(&format!("Land {} on {}?", source, target), args.force)? {
                println!("Operation cancelled by user.");
                return Ok(());
            }
            // Merge from the head that was shown, not whatever is there now
            let expected = expect.unwrap_or(plan.target.head.as_str());
            let report = ctx.land(&source, &target, Some(expected))?;
            show_report(&report, push_enabled, &remote);
        }
        Command::Release {
            action: FinishAction::Finish {
                branch,
                release_version,
            },
        } => finish(
            &ctx,
            FinishKind::Release,
            branch,
            release_version,
            args.dry_run,
            args.force,
            push_enabled,
            &remote,
        )?,
        Command::Hotfix {
            action: FinishAction::Finish {
                branch,
                release_version,
            },
        } => finish(
            &ctx,
            FinishKind::Hotfix,
            branch,
            release_version,
            args.dry_run,
            args.force,
            push_enabled,
            &remote,
        )?,
        Command::Status => {
            ui::display_status_report(&ctx.status()?);
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn finish(
    ctx: &FlowContext<'_, Git2Backend>,
    kind: FinishKind,
    branch: String,
    version: Option<String>,
    dry_run: bool,
    force: bool,
    push_enabled: bool,
    remote: &str,
) -> Result<()> {
    let version = version.map(|v| ui::parse_version_arg(&v)).transpose()?;
    let plan = ctx.plan_finish(kind, &branch, version)?;
    ui::display_finish_plan(&plan, dry_run);
    if dry_run {
        return Ok(());
    }
    if !ui::confirm_or_force(
        &format!("Finish {} as {}?", branch, plan.version),
        force,
    )? {
        println!("Operation cancelled by user.");
        return Ok(());
    }

    let report = ctx.finish(
        kind,
        &branch,
        Some(plan.version),
        Some(&plan.merge.target.head),
    )?;
    show_report(&report, push_enabled, remote);
    Ok(())
}

fn show_report(report: &MergeReport, push_enabled: bool, remote: &str) {
    ui::display_merge_report(report);
    if !push_enabled {
        let mut refs: Vec<String> = Vec::new();
        for step in &report.steps {
            if !refs.iter().any(|r| r == step.target()) {
                refs.push(step.target().to_string());
            }
        }
        if let Some(tag) = &report.tag {
            refs.push(tag.name.clone());
        }
        ui::display_manual_push_instruction(&refs, remote);
    }
}
