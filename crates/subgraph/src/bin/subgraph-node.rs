//! subgraph-node: hosts the subgraph runtime for one node.
//!
//! Binds the node's PULL endpoint from the mesh config and executes
//! instantiate/destroy requests forwarded by other nodes until Ctrl-C.
//! Events are minted with this node's id, so handles from separate
//! processes never collide; triggers travel back over the mesh.
//! With `--demo N` it first compiles a small diamond-shaped graph and
//! replays it N times back to back, logging the timing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};

use weave_core::config::load_dotenv;
use weave_core::{
    Barrier, BarrierService, Event, EventService, LocalBarrierService, LocalCopyEngine,
    LocalEventService, LocalProcessorGroup, LocalReservationService, ProcessorId,
    ProfilingRequestSet, TaskFuncId,
};
use weave_eisenbahn::{EisenbahnConfig, ZmqNodeMesh};
use weave_subgraph::{
    ArrivalOp, Interpolation, InterpolationTarget, OpKey, RuntimeContext, SubgraphConfig,
    SubgraphDefinition, SubgraphRuntime, TaskOp,
};

const DEMO_TASK: TaskFuncId = TaskFuncId(1);

// ── CLI ─────────────────────────────────────────────────────────────

/// Subgraph runtime node.
#[derive(Parser, Debug)]
#[command(name = "subgraph-node", version, about)]
struct Cli {
    /// Path to weave.toml (mesh and subgraph settings).
    #[arg(long, env = "WEAVE_CONFIG", default_value = "config/weave.toml")]
    config: String,

    /// Node id; overrides `subgraph.node_id`.
    #[arg(long)]
    node: Option<u32>,

    /// Worker threads (processors) on this node.
    #[arg(long, env = "WEAVE_PROCESSORS", default_value_t = 4)]
    processors: usize,

    /// Compile the demo graph and replay it this many times.
    #[arg(long)]
    demo: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match SubgraphConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, "loaded subgraph config");
            cfg
        }
        Err(e) => {
            warn!(error = %e, path = %cli.config, "failed to load config, using defaults");
            SubgraphConfig::from_env()?
        }
    };
    if let Some(node) = cli.node {
        config.node_id = node;
    }
    let node = config.node();

    let mesh_config = match EisenbahnConfig::from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "failed to load mesh config, using local defaults");
            EisenbahnConfig::local(node.0 + 1)
        }
    };

    let events: Arc<dyn EventService> = Arc::new(LocalEventService::for_node(node));
    let processors = Arc::new(LocalProcessorGroup::new(node, cli.processors, events.clone()));
    let barriers = Arc::new(LocalBarrierService::new(events.clone()));
    let reservations = Arc::new(LocalReservationService::new(events.clone()));
    let copies = Arc::new(LocalCopyEngine::new(events.clone()));

    let mesh = Arc::new(ZmqNodeMesh::bind(node, mesh_config).await?);
    let ctx = RuntimeContext::new(
        node,
        events.clone(),
        barriers.clone(),
        reservations,
        processors.clone(),
        copies,
    )
    .with_mesh(mesh.clone());
    let runtime = SubgraphRuntime::new(ctx, config);
    mesh.serve(runtime.inbound_handler());
    info!(node = node.0, processors = cli.processors, "subgraph node ready");

    if let Some(iterations) = cli.demo {
        let demo_runtime = runtime.clone();
        let demo_processors = processors.clone();
        tokio::task::spawn_blocking(move || {
            run_demo(&demo_runtime, &demo_processors, &barriers, iterations)
        })
        .await??;
        info!(metrics = %serde_json::to_string(&runtime.metrics())?, "demo finished");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    mesh.shutdown();
    processors.shutdown();
    Ok(())
}

/// Five tasks in a diamond with extra edges, gated on one external
/// precondition, plus one barrier arrival whose generation comes from the
/// instantiation arguments.
fn demo_definition(procs: &[ProcessorId]) -> SubgraphDefinition {
    let mut def = SubgraphDefinition::new();
    let tasks: Vec<OpKey> = (0..5)
        .map(|i| {
            let proc = procs[i % procs.len()];
            def.add_task(TaskOp::new(proc, DEMO_TASK, vec![0; 4]))
        })
        .collect();
    let arrival = def.add_arrival(ArrivalOp {
        barrier: Barrier::NO_BARRIER,
        count: 1,
        reduce_value: Vec::new(),
    });

    for (src, tgt) in [(0, 1), (0, 2), (1, 3), (2, 3), (0, 3), (1, 2), (1, 4)] {
        def.depend(tasks[src], tasks[tgt]);
    }
    def.depend(OpKey::ext_precondition(0), tasks[0]);
    def.interpolate(Interpolation::overwrite(
        0,
        16,
        InterpolationTarget::ArrivalBarrier,
        arrival.index,
        0,
    ));
    def
}

fn run_demo(
    runtime: &SubgraphRuntime,
    processors: &LocalProcessorGroup,
    barriers: &LocalBarrierService,
    iterations: u32,
) -> anyhow::Result<()> {
    let counter = Arc::new(AtomicU64::new(0));
    let c = counter.clone();
    processors.register_task(
        DEMO_TASK,
        Arc::new(move |_args, _proc| {
            c.fetch_add(1, Ordering::Relaxed);
        }),
    );

    let events = runtime.context().events.clone();
    let id = runtime.create(
        demo_definition(&processors.processors()),
        &ProfilingRequestSet::new(),
        Event::NO_EVENT,
    )?;

    let mut barrier = barriers.create_barrier(1);
    let started = Instant::now();
    let mut previous = Event::NO_EVENT;
    for _ in 0..iterations {
        let gate = events.create();
        let finish = runtime.instantiate_with_conditions(
            id,
            &barrier.to_bytes(),
            &ProfilingRequestSet::new(),
            &[gate],
            &mut [],
            previous,
            0,
        )?;
        events.trigger(gate, false);
        previous = finish;
        barrier = barriers.advance(barrier);
    }
    let poisoned = events.wait(previous);
    let elapsed = started.elapsed();

    info!(
        iterations,
        tasks = counter.load(Ordering::Relaxed),
        poisoned,
        elapsed_ms = elapsed.as_millis() as u64,
        per_iteration_us = elapsed.as_micros() as u64 / u64::from(iterations.max(1)),
        "demo replay complete"
    );
    runtime.destroy(id, previous)?;
    Ok(())
}
