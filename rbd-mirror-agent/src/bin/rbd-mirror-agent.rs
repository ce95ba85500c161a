// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable for rbd-mirror-agent: RBD pool mirroring reconciler

use anyhow::{anyhow, Context};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use rbd_mirror_agent::agent;
use rbd_mirror_agent::cmd::{fatal, CmdError};
use rbd_mirror_agent::{AgentReconciler, Config, ServerContext};
use rbd_mirror_reconciler::ActionError;
use rbd_utils::rbd::{OutputFormat, PoolAction, PoolActionFlags};

#[derive(Debug, Parser)]
#[clap(
    name = "rbd-mirror-agent",
    about = "Keeps RBD pools mirrored to a remote Ceph cluster"
)]
struct Args {
    /// Path to the agent's TOML configuration
    #[clap(long, action)]
    config: Utf8PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reconciler until interrupted
    Run,

    /// Run a single reconciliation tick and print its report
    Reconcile,

    /// Print the workload status
    Status,

    /// Promote mirrored pools to primary
    Promote(PoolActionArgs),

    /// Demote mirrored pools to non-primary
    Demote(PoolActionArgs),

    /// Show mirroring status of pools
    PoolStatus(PoolActionArgs),

    /// Force a resync of every mirrored image in the pools
    ResyncPools {
        #[clap(flatten)]
        pools: PoolSelection,

        /// Required: resync discards the local copy of each image
        #[clap(long, action)]
        i_really_mean_it: bool,
    },

    /// Ask both clusters to republish their pools, then reconcile
    RefreshPools,
}

#[derive(Debug, clap::Args)]
struct PoolSelection {
    /// Comma-separated pools to act on (default: every mirrored pool)
    #[clap(long, value_delimiter = ',', action)]
    pools: Vec<String>,
}

#[derive(Debug, clap::Args)]
struct PoolActionArgs {
    #[clap(flatten)]
    pools: PoolSelection,

    /// Pass `--force` to rbd
    #[clap(long, action)]
    force: bool,

    /// Pass `--verbose` to rbd
    #[clap(long, action)]
    verbose: bool,

    /// Output format requested from rbd
    #[clap(long, value_enum)]
    format: Option<Format>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Plain,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Plain => OutputFormat::Plain,
            Format::Json => OutputFormat::Json,
        }
    }
}

impl PoolActionArgs {
    fn flags(&self) -> PoolActionFlags {
        PoolActionFlags {
            force: self.force,
            verbose: self.verbose,
            format: self.format.map(OutputFormat::from),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(cmd_error) = do_run().await {
        fatal(cmd_error);
    }
}

async fn do_run() -> Result<(), CmdError> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to parse {}", args.config))
        .map_err(CmdError::Failure)?;
    let log = config
        .log
        .to_logger("rbd-mirror-agent")
        .map_err(|msg| anyhow!("initializing logger: {msg}"))
        .map_err(CmdError::Failure)?;
    let ctx = ServerContext::new(config, log);

    match args.command {
        Command::Run => agent::run(ctx).await.map_err(CmdError::Failure),
        Command::Reconcile => {
            let report = agent::tick_and_record(
                &ctx.reconciler(),
                &ctx.config.state_dir,
                &ctx.log,
            );
            print_json(&report)?;
            if report.errors.is_empty() {
                Ok(())
            } else {
                Err(CmdError::Action(report.errors.join("\n")))
            }
        }
        Command::Status => {
            match ctx.reconciler().assess_status() {
                Some(status) => println!("{status}"),
                None => println!("unknown"),
            }
            Ok(())
        }
        Command::Promote(args) => {
            pool_action(&ctx.reconciler(), PoolAction::Promote, &args)
        }
        Command::Demote(args) => {
            pool_action(&ctx.reconciler(), PoolAction::Demote, &args)
        }
        Command::PoolStatus(args) => {
            pool_action(&ctx.reconciler(), PoolAction::Status, &args)
        }
        Command::ResyncPools { pools, i_really_mean_it } => {
            let output = ctx
                .reconciler()
                .resync_pools(&pools.pools, i_really_mean_it)
                .map_err(action_error)?;
            println!("{output}");
            Ok(())
        }
        Command::RefreshPools => {
            let report = ctx
                .reconciler()
                .refresh_pools_action()
                .map_err(action_error)?;
            print_json(&report)
        }
    }
}

fn pool_action(
    reconciler: &AgentReconciler,
    action: PoolAction,
    args: &PoolActionArgs,
) -> Result<(), CmdError> {
    let output = reconciler
        .pool_action(action, &args.pools.pools, &args.flags())
        .map_err(action_error)?;
    println!("{output}");
    Ok(())
}

fn action_error(err: ActionError) -> CmdError {
    match err {
        ActionError::Reconcile(err) => CmdError::Failure(err.into()),
        err => CmdError::Action(err.to_string()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CmdError> {
    let json = serde_json::to_string_pretty(value)
        .context("serializing report")
        .map_err(CmdError::Failure)?;
    println!("{json}");
    Ok(())
}
