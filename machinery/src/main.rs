//! Thin CLI wiring the external surface (spec §6) onto the core crates.
//! No tabulated `ls`/`help` formatting beyond what `clap` gives for free,
//! no embedded HTTP server, no zip packaging — those are out of scope.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use machinery_core::error::MachineryError;
use machinery_model::{Cluster, ResolverConfig};
use machinery_tool::runner::{RunOptions, Tool, ToolRunner};
use tracing::{info, warn};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "machinery")]
#[command(about = "Declarative lifecycle manager for Docker machine clusters")]
#[command(version)]
struct Args {
    /// Path to the cluster YAML file
    #[arg(short = 'f', long = "file", global = true, default_value = "cluster.yml")]
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bring every machine in the cluster up, running the full init pipeline
    Up,
    /// Gracefully stop every machine
    Halt,
    /// Halt and remove every machine
    Destroy,
    /// Halt then start every machine
    Restart,
    /// Re-run the init pipeline, optionally restricted to a subset of steps
    Reinit {
        #[arg(long = "steps", value_delimiter = ',')]
        steps: Vec<String>,
    },
    /// Print the shell exports for reaching a machine's Docker daemon
    Env {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Run a command over SSH on one machine
    Ssh { name: String, cmd: Vec<String> },
    /// List running processes on one or more machines
    Ps { names: Vec<String> },
    /// List every machine and its bound state
    Ls,
    /// Print (and optionally refresh) the cached Swarm discovery token
    Token {
        #[arg(long)]
        force: bool,
    },
    /// Show Swarm Mode node membership
    Swarm,
    /// Show `docker node ls` from the cluster's master
    Node,
    /// Deploy every `applications:` stack again
    Stack,
    /// Sync rsync-backed shares in one direction
    Sync {
        #[arg(long = "op", default_value = "put")]
        op: String,
    },
    /// Search machine names/aliases for a pattern
    Search { pattern: Vec<String> },
    /// Run a command against every machine matching a pattern
    Forall {
        #[arg(long)]
        restrict: Option<String>,
        pattern: Option<String>,
        cmd: Vec<String>,
    },
    /// Not implemented: the embedded HTTP/JSON server is out of scope
    Server,
    /// Not implemented: zip packaging is out of scope
    Pack {
        #[arg(long)]
        zap: bool,
        zipfile: Option<String>,
    },
    /// Print the engine version
    Version,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if matches!(args.command, Command::Version) {
        println!("machinery {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let runner = ToolRunner::new();
    runner.ensure_installed(Tool::Docker).context("docker is required")?;
    runner.ensure_installed(Tool::DockerMachine).context("docker-machine is required")?;

    let cluster = load_cluster(&args.file)?;

    match args.command {
        Command::Up => commands::up(&runner, &cluster),
        Command::Halt => commands::halt(&runner, &cluster),
        Command::Destroy => commands::destroy(&runner, &cluster),
        Command::Restart => commands::restart(&runner, &cluster),
        Command::Reinit { steps } => commands::reinit(&runner, &cluster, &steps),
        Command::Env { name, force } => commands::env(&runner, &cluster, &name, force),
        Command::Ssh { name, cmd } => commands::ssh(&runner, &cluster, &name, &cmd),
        Command::Ps { names } => commands::ps(&runner, &cluster, &names),
        Command::Ls => commands::ls(&runner, &cluster),
        Command::Token { force } => commands::token(&runner, &cluster, force),
        Command::Swarm => commands::swarm(&runner, &cluster),
        Command::Node => commands::node(&runner, &cluster),
        Command::Stack => commands::stack(&runner, &cluster),
        Command::Sync { op } => commands::sync(&runner, &cluster, &op),
        Command::Search { pattern } => commands::search(&cluster, &pattern),
        Command::Forall { restrict, pattern, cmd } => commands::forall(&runner, &cluster, restrict.as_deref(), pattern.as_deref(), &cmd),
        Command::Server => Err(MachineryError::Config("the embedded HTTP server is out of scope for this engine".to_string()).into()),
        Command::Pack { .. } => Err(MachineryError::Config("zip packaging is out of scope for this engine".to_string()).into()),
        Command::Version => unreachable!("handled above"),
    }
    .map_err(|e: MachineryError| e.into())
}

fn load_cluster(path: &PathBuf) -> Result<Cluster> {
    info!(file = %path.display(), "loading cluster");
    machinery_model::parse_cluster(path, &ResolverConfig::default())
        .map_err(|e: MachineryError| e.into())
        .with_context(|| format!("loading cluster file '{}'", path.display()))
}

/// Returns the current `docker-machine ls` row for `full_name`, if the
/// machine has been created yet.
pub(crate) fn bound_row(runner: &ToolRunner, full_name: &str) -> Option<indexmap::IndexMap<String, String>> {
    let output = runner
        .run(
            Tool::DockerMachine,
            &["ls".to_string(), "--filter".to_string(), format!("name={full_name}")],
            &RunOptions::capture(),
        )
        .ok()?;
    machinery_tool::table::parse_table(&output.lines, &[]).into_iter().next()
}

pub(crate) fn warn_and_continue(context: &str, err: MachineryError) {
    warn!(context, error = %err, "step failed, continuing");
}
