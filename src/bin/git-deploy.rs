// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use git_deploy::{
    error::USAGE_EXIT_CODE, DeployEngine, DeployError, HookOutcome, RevertOptions, SyncOptions,
    SyncReport,
};

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::{
    env::current_dir,
    io::{stdout, Write},
    process::exit,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Index of default level in LEVELS.
const DEFAULT_LEVEL: usize = 2;

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  git deploy [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Increase logging verbosity, repeatable.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Decrease logging verbosity, repeatable.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Disable logging entirely.
    #[arg(long, global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        if self.silent {
            return "off";
        }

        let level = (DEFAULT_LEVEL + usize::from(self.verbose))
            .saturating_sub(usize::from(self.quiet))
            .min(LEVELS.len() - 1);
        LEVELS[level]
    }

    fn run(self) -> Result<()> {
        let engine = DeployEngine::open(current_dir()?)?;
        match self.command {
            Command::Start => run_start(&engine),
            Command::Abort => Ok(engine.abort()?),
            Command::Finish => Ok(engine.finish()?),
            Command::Sync(opts) => run_sync(&engine, opts),
            Command::Revert(opts) => run_revert(&engine, opts),
            Command::ShowTag => {
                println!("{}", engine.show_latest_tag()?);
                Ok(())
            }
            Command::Log(opts) => {
                for tag in engine.log_deploys(opts.count)? {
                    println!("{tag}");
                }
                Ok(())
            }
            Command::Diff => {
                print!("{}", engine.diff()?);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Take the deploy lock and tag the start of a deployment.
    Start,

    /// Give up on deployment in progress and drop the deploy lock.
    Abort,

    /// Close deployment left open by a release sync.
    Finish,

    /// Tag and ship release to deploy target.
    #[command(override_usage = "git deploy sync [options] [remote] [branch]")]
    Sync(SyncArgs),

    /// Roll back to an earlier deploy tag.
    #[command(override_usage = "git deploy revert [options]")]
    Revert(RevertArgs),

    /// Show most recent deploy tag.
    ShowTag,

    /// List most recent deploy tags.
    Log(LogArgs),

    /// Show changes between the two most recent deploys.
    Diff,
}

#[derive(Args, Clone, Debug)]
struct SyncArgs {
    /// Remote to sync through.
    #[arg(value_name = "remote")]
    pub remote: Option<String>,

    /// Branch to sync.
    #[arg(value_name = "branch")]
    pub branch: Option<String>,

    /// Passed on to hooks as GIT_DEPLOY_FORCE.
    #[arg(short, long)]
    pub force: bool,

    /// Environment whose hooks run.
    #[arg(short, long, value_name = "env")]
    pub env: Option<String>,

    /// Show hook sources instead of running anything.
    #[arg(long = "dryrun", visible_alias = "dry-run")]
    pub dry_run: bool,

    /// Push and make the target pull instead of running hooks.
    #[arg(short, long)]
    pub default: bool,

    /// Only run pre-sync hooks, finish deployment later.
    #[arg(short, long)]
    pub release: bool,
}

impl From<SyncArgs> for SyncOptions {
    fn from(args: SyncArgs) -> Self {
        Self {
            remote: args.remote,
            branch: args.branch,
            force: args.force,
            env: args.env,
            dry_run: args.dry_run,
            default: args.default,
            release: args.release,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct RevertArgs {
    /// Deploy tag to roll back to, second most recent by default.
    #[arg(short, long, value_name = "tag")]
    pub tag: Option<String>,

    /// Sync right after rolling back.
    #[arg(short, long)]
    pub auto_sync: bool,

    /// Passed on to hooks of the chained sync.
    #[arg(short, long)]
    pub force: bool,

    /// Environment whose hooks run in the chained sync.
    #[arg(short, long, value_name = "env")]
    pub env: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct LogArgs {
    /// Number of deploy tags to list.
    #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
    pub count: i64,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = if error.exit_code() == 0 {
                0
            } else {
                USAGE_EXIT_CODE
            };
            let _ = error.print();
            exit(code);
        }
    };

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run() {
        let code = error
            .downcast_ref::<DeployError>()
            .map_or(1, DeployError::exit_code);
        error!("{error:#}");
        exit(code);
    }

    exit(0)
}

fn run_start(engine: &DeployEngine) -> Result<()> {
    match engine.start()? {
        Some(tag) => info!("deployment started at {tag}"),
        None => info!("deployment started without start tag"),
    }

    Ok(())
}

fn run_sync(engine: &DeployEngine, opts: SyncArgs) -> Result<()> {
    let report = engine.sync(&opts.into())?;
    print_report(&report)
}

fn run_revert(engine: &DeployEngine, opts: RevertArgs) -> Result<()> {
    let options = RevertOptions {
        tag: opts.tag,
        auto_sync: opts.auto_sync,
        sync: SyncOptions {
            force: opts.force,
            env: opts.env,
            ..Default::default()
        },
    };

    let report = engine.revert(&options)?;
    info!(
        "rolled back {} commits to {} in {}",
        report.reverted, report.target, report.commit
    );
    if let Some(sync) = &report.sync {
        print_report(sync)?;
    }

    Ok(())
}

fn print_report(report: &SyncReport) -> Result<()> {
    if let Some(tag) = &report.tag {
        info!("synced {tag} with {:?} strategy", report.strategy);
    }

    let mut out = stdout().lock();
    for hook in &report.hooks {
        if let HookOutcome::Previewed { source } = &hook.outcome {
            writeln!(out, "==> {} <==", hook.path.display())?;
            out.write_all(source)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
