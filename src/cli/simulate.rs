use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};
use vellum_client::{
    BackendMethod, ClientConfig, DatabaseClient, ProgrammableBackend, SimulatedExecutionTime,
    TxnError,
};
use vellum_mock_backend::fixtures;
use vellum_txn::metrics;

#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Number of transactions to run
    #[arg(long, default_value_t = 100)]
    pub transactions: usize,

    /// Number of concurrent tasks issuing transactions
    #[arg(long, default_value_t = 8)]
    pub concurrency: usize,

    /// Probability that any statement is aborted by the backend
    #[arg(long)]
    pub abort_probability: Option<f64>,

    /// Minimum latency of every statement, e.g. `5ms`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub latency: Option<Duration>,

    /// Seed for the backend's random source
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Default, Serialize)]
struct SimulationReport {
    transactions: usize,
    committed: usize,
    exhausted: usize,
    failed: usize,
    attempts: u64,
    elapsed_ms: u64,
    pool: PoolReport,
    metrics: MetricsReport,
}

#[derive(Debug, Default, Serialize)]
struct PoolReport {
    total: usize,
    idle: usize,
    created: u64,
    destroyed: u64,
}

#[derive(Debug, Default, Serialize)]
struct MetricsReport {
    started: u64,
    committed: u64,
    aborted: u64,
    failed: u64,
    exhausted: u64,
    cancelled: u64,
}

enum Outcome {
    Committed(u32),
    Exhausted(u32),
    Failed(u32),
}

pub async fn cmd_simulate(args: SimulateArgs, config: &ClientConfig) -> Result<()> {
    if args.concurrency == 0 {
        return Err(anyhow!("--concurrency must be at least 1"));
    }

    let backend = Arc::new(ProgrammableBackend::with_seed(
        args.seed.unwrap_or(config.backend.seed),
    ));
    fixtures::register_all(&backend)
        .context("failed to register canned statements")?;
    backend
        .set_abort_probability(
            args.abort_probability
                .unwrap_or(config.backend.abort_probability),
        )
        .context("invalid abort probability")?;
    let min_latency = args
        .latency
        .unwrap_or(Duration::from_millis(config.backend.min_latency_ms));
    let random_latency = Duration::from_millis(config.backend.random_latency_ms);
    if !min_latency.is_zero() || !random_latency.is_zero() {
        backend.set_execution_time(
            BackendMethod::ExecuteSql,
            SimulatedExecutionTime::latency(min_latency, random_latency),
        );
    }

    let client = DatabaseClient::from_config(config, backend.clone())
        .context("failed to create database client")?;
    info!(
        target: "vellum",
        transactions = args.transactions,
        concurrency = args.concurrency,
        abort_probability = backend.abort_probability(),
        "starting simulation"
    );

    let started = Instant::now();
    let next = Arc::new(AtomicUsize::new(0));
    let mut tasks: JoinSet<Vec<Outcome>> = JoinSet::new();
    for _ in 0..args.concurrency {
        let client = client.clone();
        let next = Arc::clone(&next);
        let total = args.transactions;
        tasks.spawn(async move {
            let mut outcomes = Vec::new();
            while next.fetch_add(1, Ordering::Relaxed) < total {
                outcomes.push(run_one(&client).await);
            }
            outcomes
        });
    }

    let mut report = SimulationReport {
        transactions: args.transactions,
        ..SimulationReport::default()
    };
    while let Some(joined) = tasks.join_next().await {
        for outcome in joined.context("simulation task panicked")? {
            match outcome {
                Outcome::Committed(attempts) => {
                    report.committed += 1;
                    report.attempts += u64::from(attempts);
                }
                Outcome::Exhausted(attempts) => {
                    report.exhausted += 1;
                    report.attempts += u64::from(attempts);
                }
                Outcome::Failed(attempts) => {
                    report.failed += 1;
                    report.attempts += u64::from(attempts);
                }
            }
        }
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    let stats = client.pool().stats();
    report.pool = PoolReport {
        total: stats.total,
        idle: stats.idle,
        created: stats.created,
        destroyed: stats.destroyed,
    };
    let snapshot = metrics::snapshot();
    report.metrics = MetricsReport {
        started: snapshot.started,
        committed: snapshot.committed,
        aborted: snapshot.aborted,
        failed: snapshot.failed,
        exhausted: snapshot.exhausted,
        cancelled: snapshot.cancelled,
    };
    client
        .close_async()
        .await
        .context("session pool reported leaked sessions")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn run_one(client: &DatabaseClient) -> Outcome {
    let mut runner = client.async_runner();
    let result = runner
        .run(|ctx| async move {
            ctx.execute_update_async(&fixtures::UPDATE_STATEMENT)
                .await
        })
        .await;
    let attempts = runner.attempts();
    match result {
        Ok(_) => Outcome::Committed(attempts),
        Err(TxnError::AbortedExceeded { .. }) => Outcome::Exhausted(attempts),
        Err(err) => {
            warn!(target: "vellum", error = %err, "transaction failed");
            Outcome::Failed(attempts)
        }
    }
}

fn print_report(report: &SimulationReport) {
    println!("Simulation finished in {} ms", report.elapsed_ms);
    println!(
        "  transactions: {} committed, {} exhausted, {} failed (of {})",
        report.committed, report.exhausted, report.failed, report.transactions
    );
    let average = if report.transactions == 0 {
        0.0
    } else {
        report.attempts as f64 / report.transactions as f64
    };
    println!(
        "  attempts:     {} total, {:.2} per transaction",
        report.attempts, average
    );
    println!(
        "  pool:         {} sessions ({} idle), {} created, {} destroyed",
        report.pool.total, report.pool.idle, report.pool.created, report.pool.destroyed
    );
}
