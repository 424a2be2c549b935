use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::seq::SliceRandom;
use schedforge::{Device, DeviceConfig, QueueId, WaitStatus};

#[derive(Parser, Debug)]
#[command(name = "schedforge", version)]
#[command(about = "Exercise the emulated command scheduler", long_about = None)]
struct Cli {
    /// Per-entity credit limit
    #[arg(long, default_value_t = 1)]
    credit_limit: usize,

    /// Regular queue emulation latency in microseconds
    #[arg(long, default_value_t = 150)]
    regular_latency_us: u64,

    /// Fast queue emulation latency in microseconds
    #[arg(long, default_value_t = 20)]
    fast_latency_us: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit/wait round trips on one queue and report IOPS
    Throughput {
        /// Number of round trips
        #[arg(short, long, default_value_t = 1000)]
        count: usize,
        /// Queue to target (regular or fast)
        #[arg(short, long, default_value = "regular")]
        queue: String,
    },
    /// Submit a fast-queue job feeding a regular-queue job and wait the chain
    Chain {
        /// Per-wait timeout in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Interleave submissions across both queues, wait for all, print stats
    Soak {
        /// Submissions per queue
        #[arg(long, default_value_t = 1000)]
        per_queue: usize,
        /// Print device stats as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    schedforge::init_logging_from_env();
    let cli = Cli::parse();

    let config = DeviceConfig::new()
        .with_credit_limit(cli.credit_limit)
        .with_latencies(
            Duration::from_micros(cli.regular_latency_us),
            Duration::from_micros(cli.fast_latency_us),
        );
    let device = Device::new(config).context("device bring-up failed")?;

    match cli.command {
        Commands::Throughput { count, queue } => throughput(&device, count, &queue),
        Commands::Chain { timeout_ms } => chain(&device, Duration::from_millis(timeout_ms)),
        Commands::Soak { per_queue, json } => soak(&device, per_queue, json),
    }
}

fn throughput(device: &std::sync::Arc<Device>, count: usize, queue: &str) -> Result<()> {
    let queue: QueueId = queue.parse().context("bad --queue")?;
    let session = device.open();

    let start = Instant::now();
    for _ in 0..count {
        let handle = session.submit(queue, None)?;
        let status = session.wait(handle, Duration::from_millis(100))?;
        if status != WaitStatus::Signaled {
            bail!("round trip did not complete: {:?}", status);
        }
    }
    let elapsed = start.elapsed();

    let iops = count as f64 / elapsed.as_secs_f64() / 1000.0;
    println!(
        "{} round trips on {} queue in {:.2?} ({:.1} K/s)",
        count, queue, elapsed, iops
    );
    Ok(())
}

fn chain(device: &std::sync::Arc<Device>, timeout: Duration) -> Result<()> {
    let session = device.open();

    let producer = session.submit(QueueId::Fast, None)?;
    let consumer = session.submit(QueueId::Regular, Some(producer))?;

    let start = Instant::now();
    let status = session.wait(consumer, timeout)?;
    if status != WaitStatus::Signaled {
        bail!("chain did not complete: {:?}", status);
    }
    println!("chain completed after {:.2?}", start.elapsed());
    Ok(())
}

fn soak(device: &std::sync::Arc<Device>, per_queue: usize, json: bool) -> Result<()> {
    let session = device.open();

    let mut plan: Vec<QueueId> = QueueId::ALL
        .iter()
        .flat_map(|&q| std::iter::repeat(q).take(per_queue))
        .collect();
    plan.shuffle(&mut rand::thread_rng());

    let start = Instant::now();
    let handles: Vec<_> = plan
        .iter()
        .map(|&q| session.submit(q, None))
        .collect::<Result<_, _>>()?;
    for handle in handles {
        let status = session.wait(handle, Duration::from_secs(30))?;
        if status != WaitStatus::Signaled {
            bail!("soak job did not complete: {:?}", status);
        }
    }
    let elapsed = start.elapsed();

    let stats = device.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "{} jobs across {} queues in {:.2?}",
            plan.len(),
            stats.queues.len(),
            elapsed
        );
        for qs in &stats.queues {
            println!(
                "  {}: submitted {} dispatched {} completed {} processed {}",
                qs.queue, qs.submitted, qs.dispatched, qs.completed, qs.events_processed
            );
        }
    }
    Ok(())
}
