//! CLI for the fanout telemetry appender.
//!
//! Provides commands for validating router configs, replaying recorded
//! samples through a router, and benchmarking the append path.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use fanout::config::{DestinationKind, FanoutConfig};
use fanout::memory::MemoryDestination;
use fanout::{AppendContext, Appendable, Appender, FanoutRouter, LabelSet, SeriesRef, SeriesRegistry};
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// fanout: Replicate metric writes to many destinations.
#[derive(Parser)]
#[command(name = "fanout", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Load and validate a router config, then list its destinations.
    Validate {
        /// Path to the JSON config.
        config: PathBuf,
    },

    /// Append samples from a JSON-lines file through a configured router.
    Replay {
        /// Path to the JSON config.
        config: PathBuf,

        /// Samples file, one `{"labels":{..},"timestamp_ms":..,"value":..}` per line.
        samples: PathBuf,

        /// Samples per transaction.
        #[arg(long, default_value = "500")]
        batch: usize,
    },

    /// Run an append-path microbenchmark over in-memory destinations.
    Bench {
        /// Number of distinct series.
        #[arg(long, default_value = "100")]
        series: u32,

        /// Total number of samples to append.
        #[arg(long, default_value = "1000000")]
        points: u64,

        /// Number of memory destinations to fan out to.
        #[arg(long, default_value = "2")]
        destinations: u32,

        /// Number of writer threads sharing one registry.
        #[arg(long, default_value = "4")]
        threads: u32,
    },
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
struct SampleLine {
    labels: LabelSet,
    timestamp_ms: i64,
    value: f64,
}

/// Totals collected during a replay.
#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    samples: u64,
    transactions: u64,
    append_errors: u64,
    commit_errors: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Replay {
            config,
            samples,
            batch,
        } => cmd_replay(&config, &samples, batch),
        Commands::Bench {
            series,
            points,
            destinations,
            threads,
        } => cmd_bench(series, points, destinations, threads),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `fanout validate <config>`.
fn cmd_validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = FanoutConfig::load(config_path)?;

    println!("Config: {}", config_path.display());
    println!("Component: {}", config.component_id);
    println!("Destinations: {}", config.destinations.len());

    for (i, dest) in config.destinations.iter().enumerate() {
        match &dest.kind {
            DestinationKind::Memory { limit: Some(limit) } => {
                println!("  {i}: \"{}\" memory (limit {limit})", dest.name);
            }
            DestinationKind::Memory { limit: None } => {
                println!("  {i}: \"{}\" memory", dest.name);
            }
            DestinationKind::RemoteWrite {
                endpoint,
                max_retries,
                ..
            } => {
                println!(
                    "  {i}: \"{}\" remote_write {endpoint} (retries {max_retries})",
                    dest.name
                );
            }
        }
    }

    Ok(())
}

/// Implements `fanout replay <config> <samples> [--batch N]`.
fn cmd_replay(
    config_path: &Path,
    samples_path: &Path,
    batch: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if batch == 0 {
        return Err("--batch must be at least 1".into());
    }

    let config = FanoutConfig::load(config_path)?;
    let (router, built) = config.build_router(SeriesRegistry::global())?;
    info!(
        component_id = router.component_id(),
        destinations = built.destinations.len(),
        "replaying samples"
    );

    let file = File::open(samples_path)
        .map_err(|e| format!("cannot open '{}': {e}", samples_path.display()))?;
    let samples = read_samples(BufReader::new(file))?;

    let start = Instant::now();
    let summary = replay(&router, &samples, batch);
    let elapsed = start.elapsed();

    println!("Replayed {} samples in {elapsed:.3?}", summary.samples);
    println!("  Transactions: {}", summary.transactions);
    println!("  Append errors: {}", summary.append_errors);
    println!("  Commit errors: {}", summary.commit_errors);
    println!("  Series: {}", router.registry().len());

    if !built.memory.is_empty() {
        println!();
        println!("Memory destinations:");
        for (name, dest) in &built.memory {
            let stats = dest.stats();
            println!(
                "  {name}: {} samples ({} commits, {} rejected)",
                dest.len(),
                stats.commits,
                stats.rejected
            );
        }
    }

    Ok(())
}

/// Parses a JSON-lines sample stream. Blank lines are skipped.
fn read_samples<R: BufRead>(reader: R) -> Result<Vec<SampleLine>, Box<dyn std::error::Error>> {
    let mut samples = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: SampleLine =
            serde_json::from_str(&line).map_err(|e| format!("line {}: {e}", i + 1))?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Appends `samples` in transactions of `batch`, logging and counting errors.
fn replay(router: &FanoutRouter, samples: &[SampleLine], batch: usize) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    let ctx = AppendContext::new();

    for chunk in samples.chunks(batch) {
        let mut app = router.appender(&ctx);
        for sample in chunk {
            summary.samples += 1;
            if let Err(e) = app.append(SeriesRef::UNSET, &sample.labels, sample.timestamp_ms, sample.value) {
                summary.append_errors += 1;
                warn!(labels = %sample.labels, error = %e, "append failed");
            }
        }

        summary.transactions += 1;
        match app.commit() {
            Ok(()) => debug!(samples = chunk.len(), "transaction committed"),
            Err(e) => {
                summary.commit_errors += 1;
                warn!(error = %e, "commit failed");
            }
        }
    }

    summary
}

/// Implements `fanout bench`.
#[allow(clippy::cast_precision_loss)]
fn cmd_bench(
    series_count: u32,
    points: u64,
    destination_count: u32,
    threads: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if series_count == 0 || threads == 0 {
        return Err("--series and --threads must be at least 1".into());
    }

    println!("fanout append benchmark");
    println!("  Points: {points}");
    println!("  Series: {series_count}");
    println!("  Destinations: {destination_count}");
    println!("  Threads: {threads}");
    println!();

    let memory: Vec<MemoryDestination> = (0..destination_count)
        .map(|i| MemoryDestination::new(format!("bench_{i}")))
        .collect();
    let router = Arc::new(FanoutRouter::with_registry(
        memory.iter().map(|m| Arc::new(m.clone()) as Arc<dyn Appendable>),
        "bench",
        Arc::new(SeriesRegistry::new()),
    ));

    let labels: Arc<[LabelSet]> = (0..series_count)
        .map(|i| LabelSet::from([("__name__", format!("metric_{i}")), ("id", i.to_string())]))
        .collect();

    let per_thread = points / u64::from(threads);
    println!("Appending {per_thread} samples on each of {threads} threads...");

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let router = Arc::clone(&router);
            let labels = Arc::clone(&labels);
            std::thread::spawn(move || bench_worker(&router, &labels, per_thread))
        })
        .collect();

    let mut errors = 0u64;
    for handle in handles {
        errors += handle.join().map_err(|_| "bench worker panicked")?;
    }
    let elapsed = start.elapsed();

    let total = per_thread * u64::from(threads);
    let ns_per_append = elapsed.as_nanos() as f64 / total as f64;
    let appends_per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results:");
    println!("  Total appends: {total}");
    println!("  Errors: {errors}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_append:.1} ns/append");
    println!("  Throughput: {appends_per_sec:.0} appends/sec");
    println!("  Registered series: {}", router.registry().len());
    for dest in &memory {
        println!("  {}: {} samples", dest.name(), dest.len());
    }

    Ok(())
}

/// Appends `count` samples round-robin over `labels`, committing every 1000.
fn bench_worker(router: &FanoutRouter, labels: &[LabelSet], count: u64) -> u64 {
    const BATCH: u64 = 1000;

    let ctx = AppendContext::new();
    let mut errors = 0;
    let mut ts = 1_700_000_000_000i64;
    let mut app = router.appender(&ctx);

    for i in 0..count {
        #[allow(clippy::cast_possible_truncation)]
        let series = &labels[(i % labels.len() as u64) as usize];
        ts += 1;
        if app.append(SeriesRef::UNSET, series, ts, 1.0).is_err() {
            errors += 1;
        }
        if (i + 1) % BATCH == 0 {
            if app.commit().is_err() {
                errors += 1;
            }
            app = router.appender(&ctx);
        }
    }

    if app.commit().is_err() {
        errors += 1;
    }
    errors
}
