use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use vrouter::{Config, HopKind, Identifier, Network, TrafficKind};

#[derive(Parser, Debug)]
#[command(name = "vrouter")]
#[command(author, version, about = "Simulate a bloom-indexed Kademlia overlay", long_about = None)]
struct Args {
    /// Number of simulated nodes.
    #[arg(short, long, default_value = "50")]
    nodes: usize,

    /// Data items stored before any query is issued.
    #[arg(short, long, default_value = "100")]
    data: usize,

    /// Lookups issued after index propagation settles.
    #[arg(short, long, default_value = "200")]
    queries: usize,

    /// Cycles to run once all lookups are queued.
    #[arg(short, long, default_value = "30")]
    cycles: u64,

    /// Seed for identifiers and workload.
    #[arg(short, long, default_value = "1")]
    seed: u64,

    #[arg(long, default_value = "160")]
    bits: usize,

    #[arg(long, default_value = "20")]
    k: usize,

    #[arg(long, default_value = "3")]
    alpha: usize,

    #[arg(long, default_value = "5")]
    shortlist: usize,

    #[arg(long, default_value = "0")]
    election_seed: u64,

    /// Cycles between longest-chain syncs; 0 disables.
    #[arg(long, default_value = "5")]
    sync_interval: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(Config {
        bits: args.bits,
        k: args.k,
        alpha: args.alpha,
        shortlist_size: args.shortlist,
        election_seed: args.election_seed,
        ledger_sync_interval: args.sync_interval,
        ..Config::default()
    });

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut network = Network::with_random_nodes(config.clone(), args.nodes, &mut rng)
        .context("failed to build network")?;
    network.bootstrap_mesh();
    let ids: Vec<Identifier> = network.nodes().map(|node| node.id()).collect();

    let mut stored = Vec::with_capacity(args.data);
    for _ in 0..args.data {
        let Some(owner) = ids.choose(&mut rng).copied() else {
            break;
        };
        let data_id = Identifier::random(&mut rng, config.bits);
        network.store(owner, data_id)?;
        stored.push(data_id);
    }
    let settle = network.run_until_quiet(1_000)?;
    info!(stored = stored.len(), cycles = settle, "index propagation settled");

    if let Some(first) = ids.first() {
        network.designate_coordinator(*first)?;
    }

    for _ in 0..args.queries {
        let Some(origin) = ids.choose(&mut rng).copied() else {
            break;
        };
        let Some(data_id) = stored.choose(&mut rng).copied() else {
            warn!("nothing stored, skipping queries");
            break;
        };
        network.lookup(origin, data_id)?;
    }

    let summaries = network.run(args.cycles)?;
    let elections: usize = summaries.iter().map(|s| s.elections.len()).sum();

    let stats = network.stats();
    for kind in HopKind::ALL {
        let hops = stats.hop_stats(kind);
        info!(
            kind = kind.label(),
            n = hops.n,
            mean = %format!("{:.2}", hops.mean()),
            min = hops.min,
            max = hops.max,
            "hop statistics"
        );
    }
    let height = network
        .nodes()
        .map(|node| node.ledger().len().saturating_sub(1))
        .max()
        .unwrap_or(0);
    info!(
        lookups = stats.traffic(TrafficKind::Lookup),
        index = stats.traffic(TrafficKind::Index),
        filters = stats.filters_created(),
        elections,
        switches = stats.coordinator_switches(),
        ledger_height = height,
        pending = network.pending(),
        "simulation complete"
    );

    Ok(())
}
