//! Rank launcher
//!
//! Starts one thread per rank on the loopback backend and walks each of them
//! through endpoint selection, rendezvous, engine connection and the
//! benchmark cases. Rank 0's reports are returned to the caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::bench::{BenchContext, BenchSettings, BenchmarkRunner, CaseReport, OperationCase};
use crate::cli::RunArgs;
use crate::cluster::{LocalProcessGroup, ProcessGroup};
use crate::collective::{EngineConnector, ExecutionPlan, LoopbackConnector, LoopbackHub};
use crate::config::BenchConfig;
use crate::device::{Device, LoopbackDevice};
use crate::error::{Error, Result};
use crate::net::{
    EndpointSelector, InterfaceSource, NetworkEndpoint, RendezvousCoordinator, SystemInterfaces,
};
use crate::types::{parse_size, ByteSize, DataType, PacketType, SizeSweep};

/// Fold `run` flags into the loaded configuration and re-validate it
pub fn apply_run_overrides(config: &mut BenchConfig, args: &RunArgs) -> Result<()> {
    if let Some(world_size) = args.world_size {
        config.cluster.world_size = world_size;
    }
    if let Some(iterations) = args.iterations {
        config.benchmark.iterations = iterations;
    }
    if let Some(replays) = args.replays {
        config.benchmark.replays = replays;
    }
    if let Some(ref aggregation) = args.aggregation {
        config.benchmark.aggregation = aggregation.parse()?;
    }
    if let Some(step_factor) = args.step_factor {
        config.benchmark.step_factor = step_factor;
    }
    if let Some(ref output) = args.output {
        config.report.output = Some(crate::config::expand_path(output));
    }
    config.validate()
}

/// Build the cases of a run from the command line
///
/// Every string is parsed and every size checked against `world_size`
/// here, before any rank touches a device.
pub fn build_cases(
    args: &RunArgs,
    step_factor: u64,
    world_size: usize,
) -> Result<Vec<OperationCase>> {
    let dtype: DataType = args.dtype.parse()?;
    let packet: PacketType = args.packet_type.parse()?;
    let min = parse_size(&args.size)?;
    let max = match args.max_size {
        Some(ref max) => parse_size(max)?,
        None => min,
    };
    if max < min {
        return Err(Error::invalid_size(
            max.to_string(),
            format!("--max_size is below --size ({})", ByteSize(min)),
        ));
    }

    let plan = ExecutionPlan::load(&args.execution_plan_name, &args.execution_plan_path)?;

    let cases: Vec<OperationCase> = SizeSweep::new(min, max, step_factor)
        .map(|size_bytes| OperationCase {
            plan: plan.clone(),
            in_place: args.in_place,
            packet,
            dtype,
            size_bytes,
        })
        .collect();
    for case in &cases {
        case.validate(world_size)?;
    }

    debug!(plan = %plan.name(), kind = %plan.kind(), cases = cases.len(), "Cases prepared");
    Ok(cases)
}

/// Runs a set of cases on a group of in-process ranks
pub struct Launcher {
    config: BenchConfig,
    settings: BenchSettings,
    cases: Vec<OperationCase>,
    interfaces: Box<dyn InterfaceSource + Send + Sync>,
}

impl Launcher {
    pub fn new(config: BenchConfig, seed: u64, cases: Vec<OperationCase>) -> Self {
        let settings = config.bench_settings(seed);
        Self {
            config,
            settings,
            cases,
            interfaces: Box::new(SystemInterfaces),
        }
    }

    /// Replace host interface discovery
    #[cfg(test)]
    pub fn with_interfaces(mut self, source: impl InterfaceSource + Send + Sync + 'static) -> Self {
        self.interfaces = Box::new(source);
        self
    }

    /// Run every case on every rank and return rank 0's reports
    ///
    /// A failing rank aborts the process group so its peers return instead
    /// of waiting forever. The first error that is not such an abort wins.
    pub fn run(&self) -> Result<Vec<CaseReport>> {
        let world_size = self.config.cluster.world_size;
        let selector = EndpointSelector::new()
            .with_interface(self.config.rendezvous.interface.clone())
            .with_static_endpoint(self.config.static_endpoint()?);
        let hub = LoopbackHub::new();

        info!(
            world_size,
            cases = self.cases.len(),
            iterations = self.settings.iterations,
            replays = self.settings.replays,
            "Launching ranks"
        );

        let results: Vec<Result<Vec<CaseReport>>> = thread::scope(|scope| {
            let handles: Vec<_> = LocalProcessGroup::create(world_size)
                .into_iter()
                .map(|group| {
                    let selector = &selector;
                    let hub = hub.clone();
                    thread::Builder::new()
                        .name(format!("rank-{}", group.rank()))
                        .spawn_scoped(scope, move || self.run_rank(group, selector, hub))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Internal("rank thread panicked".into()))),
                    Err(e) => Err(Error::Internal(format!("failed to spawn rank thread: {}", e))),
                })
                .collect()
        });

        pick_outcome(results)
    }

    fn run_rank(
        &self,
        group: LocalProcessGroup,
        selector: &EndpointSelector,
        hub: LoopbackHub,
    ) -> Result<Vec<CaseReport>> {
        let rank = group.rank();
        let result = self.rank_main(&group, selector, hub);
        if let Err(ref e) = result {
            if !matches!(e.root(), Error::GroupAborted { .. }) {
                error!(rank, stage = ?e.stage(), error = %e.format_for_log(), "Rank failed");
            }
            group.abort();
        }
        result
    }

    fn rank_main(
        &self,
        group: &LocalProcessGroup,
        selector: &EndpointSelector,
        hub: LoopbackHub,
    ) -> Result<Vec<CaseReport>> {
        let rank = group.rank();
        let world_size = group.world_size();
        let device = LoopbackDevice::new(rank % self.config.cluster.devices_per_node);

        info!(
            rank,
            world_size,
            pid = std::process::id(),
            host = %hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_default(),
            device = device.ordinal(),
            "Rank started"
        );

        let local = selector.select(self.interfaces.as_ref())?;
        let coordinator =
            RendezvousCoordinator::new(self.config.rendezvous.root_rank, self.config.rendezvous.port);
        let identity = coordinator.establish(group, local.as_ref())?;

        let engine = LoopbackConnector::new(hub, device.clone()).connect(
            &identity.rendezvous,
            rank,
            world_size,
        )?;
        let ctx = BenchContext::new(
            Box::new(group.clone()),
            Arc::new(device.clone()),
            engine,
            identity,
        )?;

        let runner = BenchmarkRunner::new(self.settings.clone());
        let outcome: Result<Vec<CaseReport>> = self
            .cases
            .iter()
            .map(|case| {
                let report = runner.run_case(&ctx, case)?;
                println!("{}", report.summary_line());
                Ok(report)
            })
            .collect();

        let teardown = ctx.teardown();
        let reports = outcome?;
        teardown?;

        if device.live_allocations() > 0 || device.live_streams() > 0 {
            warn!(
                rank,
                allocations = device.live_allocations(),
                streams = device.live_streams(),
                "Device resources outlived the run"
            );
        }
        debug!(rank, graph_launches = device.graph_launches(), "Rank finished");
        Ok(reports)
    }

    pub fn report_path(&self) -> Option<PathBuf> {
        self.config.report_path()
    }
}

/// Rank 0's reports, or the most telling failure
fn pick_outcome(results: Vec<Result<Vec<CaseReport>>>) -> Result<Vec<CaseReport>> {
    let mut aborted = None;
    let mut reports = None;
    for result in results {
        match result {
            Ok(r) => {
                if reports.is_none() {
                    reports = Some(r);
                }
            }
            Err(e) if matches!(e.root(), Error::GroupAborted { .. }) => {
                aborted.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    if let Some(e) = aborted {
        return Err(e);
    }
    reports.ok_or_else(|| Error::Internal("no ranks were started".into()))
}

/// Print rank 0's table of group results
pub fn print_table(reports: &[CaseReport]) {
    let Some(first) = reports.first() else {
        return;
    };
    println!();
    println!(
        "# {} ({}) on {} ranks, aggregation {}",
        first.plan, first.kind, first.world_size, first.aggregation
    );
    println!("{}", CaseReport::table_header());
    for report in reports {
        println!("{}", report.table_row());
    }
}

/// Endpoint this host would publish, for the `endpoint` command
pub fn resolve_endpoint(
    config: &BenchConfig,
    interface: Option<String>,
    source: &dyn InterfaceSource,
) -> Result<NetworkEndpoint> {
    let selector = EndpointSelector::new()
        .with_interface(interface.or_else(|| config.rendezvous.interface.clone()))
        .with_static_endpoint(config.static_endpoint()?);
    selector.select(source)?.ok_or_else(|| Error::NoEndpoint {
        message: "no interface has a routable IPv4 address".into(),
    })
}
