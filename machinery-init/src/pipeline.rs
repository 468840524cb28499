//! Orchestrates the Init Pipeline across a whole cluster (spec §4.3, §5).
//!
//! Per-machine steps run in [`crate::steps::CANONICAL_ORDER`]. Under Swarm
//! Mode, manager-only steps (`networks`, `labels`, `applications`) are held
//! back until every machine has finished its worker-class steps (spec §5's
//! cluster-wide ordering guarantee), then run once against the cluster's
//! master machine.
//!
//! A failing step never blocks the rest of the cluster (spec §7): each step
//! is logged at `WARN` and skipped on error rather than aborting the batch,
//! the same `warn_and_continue` pattern the CLI uses for per-machine
//! lifecycle operations.

use machinery_core::error::{MachineryError, Result};
use machinery_model::{ClusteringMode, Cluster, Machine};
use machinery_tool::runner::ToolRunner;
use tracing::warn;

use crate::ops;
use crate::steps::{resolve_steps, InitStep};

/// Knobs the pipeline needs beyond the cluster/tool runner: the
/// `VBoxManage` binary path and the cluster's caching configuration (spec
/// §4.5's `caching:`/`-no-cache`).
pub struct InitContext<'a> {
    pub runner: &'a ToolRunner,
    pub vbox_binary: String,
    pub caching_patterns: Vec<String>,
    pub global_cache_disable: bool,
}

fn warn_and_continue(context: &str, err: MachineryError) {
    warn!(context, error = %err, "init step failed, continuing");
}

/// Runs `requested` steps (empty = all) against every machine in
/// `cluster`, honoring the manager-only phase split under Swarm Mode.
pub fn run(ctx: &InitContext, cluster: &Cluster, requested: &[String]) -> Result<()> {
    let steps = resolve_steps(requested);
    let (worker_steps, manager_steps): (Vec<InitStep>, Vec<InitStep>) =
        steps.iter().copied().partition(|s| !s.manager_only());

    for machine in &cluster.machines {
        run_worker_steps(ctx, machine, &worker_steps);
    }

    if manager_steps.is_empty() {
        return Ok(());
    }

    let clustering = cluster.options.clustering;
    let master = cluster.machines.iter().find(|m| m.is_master());
    let Some(master) = master else {
        warn!("no master machine found, skipping manager-only init steps");
        return Ok(());
    };

    for step in &manager_steps {
        match step {
            InitStep::Networks => {
                if let Err(e) = ops::apply_networks(ctx.runner, &master.full_name, &cluster.networks) {
                    warn_and_continue("networks", e);
                }
            }
            InitStep::Labels => {
                for machine in &cluster.machines {
                    if matches!(clustering, ClusteringMode::SwarmMode) {
                        if let Err(e) = ops::apply_labels(ctx.runner, &master.full_name, &machine.full_name, &machine.spec.labels) {
                            warn_and_continue(&format!("labels:{}", machine.full_name), e);
                        }
                    }
                }
            }
            InitStep::Applications => {
                if let Err(e) = ops::apply_applications(ctx.runner, &master.full_name, &cluster.origin, &cluster.applications) {
                    warn_and_continue("applications", e);
                }
            }
            _ => unreachable!("manager_steps only contains manager-only InitStep variants"),
        }
    }
    Ok(())
}

fn run_worker_steps(ctx: &InitContext, machine: &Machine, steps: &[InitStep]) {
    for step in steps {
        let context = format!("{}:{:?}", machine.full_name, step);
        let result = match step {
            InitStep::Shares => ops::apply_shares(ctx.runner, &ctx.vbox_binary, machine, true),
            InitStep::Files => ops::apply_files(ctx.runner, machine),
            InitStep::Prelude => ops::run_exec_specs(ctx.runner, machine, &machine.spec.prelude),
            InitStep::Registries => ops::apply_registries(ctx.runner, machine),
            InitStep::Images => ops::apply_images(ctx.runner, machine, &ctx.caching_patterns, ctx.global_cache_disable),
            InitStep::Compose => ops::apply_compose(ctx.runner, machine),
            InitStep::Addendum => ops::run_exec_specs(ctx.runner, machine, &machine.spec.addendum),
            InitStep::Networks | InitStep::Labels | InitStep::Applications => {
                unreachable!("worker_steps excludes manager-only InitStep variants")
            }
        };
        if let Err(e) = result {
            warn_and_continue(&context, e);
        }
    }
}
