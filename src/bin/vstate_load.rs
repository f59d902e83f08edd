use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use vstate::{
    DocumentLoader, Entity, EntityType, Identity, RelationSpec, TransactionConfig,
    TransactionManager,
};

#[derive(Parser)]
#[command(name = "vstate-load")]
#[command(about = "Contention load tool for versioned entity state")]
struct Cli {
    /// Concurrent tasks
    #[arg(long, default_value_t = 8)]
    tasks: usize,

    /// Entities shared by all tasks
    #[arg(long, default_value_t = 4)]
    entities: usize,

    /// Increments issued by each task
    #[arg(long, default_value_t = 200)]
    ops: usize,

    /// Attempts per transaction before giving up
    #[arg(long, default_value_t = 64)]
    max_attempts: usize,

    /// Backoff bounds in milliseconds
    #[arg(long, default_value_t = 1)]
    base_backoff_ms: u64,
    #[arg(long, default_value_t = 20)]
    max_backoff_ms: u64,

    /// Also record every task in each entity's `visitors` relation
    #[arg(long)]
    relations: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CounterState {
    label: String,
    value: u64,
}

struct Counter;

impl EntityType for Counter {
    type State = CounterState;
    const KIND_NAME: &'static str = "Counter";
    const KIND_ID: u16 = 1;

    fn relations() -> &'static [RelationSpec] {
        const RELATIONS: &[RelationSpec] = &[RelationSpec::lazy("visitors")];
        RELATIONS
    }
}

const WORKER_KIND: u16 = 2;

#[derive(Debug, Serialize)]
struct Report {
    tasks: usize,
    entities: usize,
    elapsed_ms: u128,
    commits: u64,
    conflicts: u64,
    attempts: u64,
    retries: u64,
    expected_total: u64,
    final_total: u64,
    visitors: Vec<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.tasks == 0 || cli.entities == 0 {
        bail!("--tasks and --entities must be positive");
    }

    let manager = Arc::new(TransactionManager::with_config(
        TransactionConfig::new()
            .max_attempts(cli.max_attempts)
            .backoff_ms(cli.base_backoff_ms, cli.max_backoff_ms),
    ));
    let counters = Arc::new(seed_counters(&manager, cli.entities)?);

    let attempts = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut handles = Vec::with_capacity(cli.tasks);

    for task_id in 0..cli.tasks {
        let manager = Arc::clone(&manager);
        let counters = Arc::clone(&counters);
        let attempts = Arc::clone(&attempts);
        let ops = cli.ops;
        let relations = cli.relations;
        let worker = Identity::new(WORKER_KIND, task_id as u64 + 1);

        handles.push(tokio::spawn(async move {
            for op in 0..ops {
                let counter = Arc::clone(&counters[(task_id + op) % counters.len()]);
                manager
                    .with_transaction(|txn| {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        let counter = Arc::clone(&counter);
                        async move {
                            // Conflicts are detected on written snapshots, so the
                            // increment reads and writes inside one update.
                            counter.update(&txn, |s| s.value += 1)?;
                            tokio::task::yield_now().await;
                            if relations {
                                counter.relation("visitors")?.add(&txn, worker)?;
                            }
                            Ok::<_, vstate::StateError>(())
                        }
                    })
                    .await?;
            }
            Ok::<_, vstate::StateError>(())
        }));
    }

    for handle in handles {
        handle
            .await
            .context("load task panicked")?
            .context("load task failed")?;
    }
    let elapsed = start.elapsed();

    let reader = manager.begin_read_only();
    let mut final_total = 0;
    let mut visitors = Vec::with_capacity(counters.len());
    for counter in counters.iter() {
        final_total += counter.get(&reader, |s| s.value)?;
        visitors.push(counter.relation("visitors")?.len(&reader)?);
    }

    let stats = manager.stats();
    let attempts = attempts.load(Ordering::Relaxed);
    let report = Report {
        tasks: cli.tasks,
        entities: cli.entities,
        elapsed_ms: elapsed.as_millis(),
        commits: stats.committed,
        conflicts: stats.conflicts,
        attempts,
        retries: attempts.saturating_sub((cli.tasks * cli.ops) as u64),
        expected_total: (cli.tasks * cli.ops) as u64,
        final_total,
        visitors,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("vstate-load results:");
        println!("  tasks: {}", report.tasks);
        println!("  entities: {}", report.entities);
        println!("  elapsed_ms: {}", report.elapsed_ms);
        println!("  commits: {}", report.commits);
        println!("  conflicts: {}", report.conflicts);
        println!("  retries: {}", report.retries);
        println!("  expected_total: {}", report.expected_total);
        println!("  final_total: {}", report.final_total);
        println!("  visitors: {:?}", report.visitors);
    }

    if report.final_total != report.expected_total {
        bail!(
            "lost updates: expected {} increments, found {}",
            report.expected_total,
            report.final_total
        );
    }
    Ok(())
}

/// Materializes the counters from an in-memory document store, the way an
/// application would load them from storage.
fn seed_counters(manager: &TransactionManager, count: usize) -> Result<Vec<Arc<Entity<Counter>>>> {
    let documents = DocumentLoader::new();
    let identities: Vec<Identity> = (1..=count as u64)
        .map(|n| Identity::new(Counter::KIND_ID, n))
        .collect();
    for identity in &identities {
        documents
            .insert_state(
                *identity,
                &CounterState {
                    label: format!("counter-{}", identity.counter()),
                    value: 0,
                },
            )
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    let load = manager.begin_read_only();
    let counters = identities
        .into_iter()
        .map(|identity| {
            let counter = Entity::<Counter>::materialize(identity);
            counter.load_with(&documents, load.number())?;
            counter
                .relation("visitors")?
                .load(std::iter::empty(), load.number())?;
            Ok(Arc::new(counter))
        })
        .collect::<vstate::Result<Vec<_>>>()
        .context("failed to load counters")?;
    manager.commit(&load)?;
    Ok(counters)
}
