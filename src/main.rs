//! shmcast - multicast demo
//!
//! Runs one producer and several consumers over a shared region and checks
//! that every consumer observed the complete, contiguous stream. The
//! participants are either threads of this process or separate processes
//! sharing a named POSIX segment.

mod config;
mod processes;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use config::DemoConfig;
use shmcast::disruptor::{
    available_cores, wait_strategy, DisruptorError, SharedRegion, ThreadContext, WaitLimit,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use tracing::{error, info};

const CAPACITY: usize = 1024;
const READER_SLOTS: usize = 8;
const DEFAULT_REGION: &str = "/shmcast-demo";

type DemoRegion = SharedRegion<u64, CAPACITY, READER_SLOTS>;

#[derive(Parser, Debug)]
#[command(name = "shmcast")]
#[command(about = "Single-producer multicast over threads or shared memory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration file
    #[arg(long, env = "SHMCAST_LOG", value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Number of values to publish, overriding the configuration file
    #[arg(long, global = true)]
    messages: Option<u64>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Mode {
    /// Producer and consumers as threads of this process (default)
    Threads,
    /// Create a named region, publish into it and check every reader process
    Writer {
        /// Shared memory name
        #[arg(long, default_value = DEFAULT_REGION)]
        name: String,
        /// Reader processes to wait for (defaults to `consumers`)
        #[arg(long)]
        readers: Option<usize>,
        /// Wait for readers started by hand instead of spawning them
        #[arg(long)]
        external: bool,
    },
    /// Join a region created by a writer and check what arrives
    Reader {
        /// Shared memory name
        #[arg(long, default_value = DEFAULT_REGION)]
        name: String,
        /// Stop after this many values
        #[arg(long)]
        count: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = DemoConfig::load(args.config.as_deref())?;
    if let Some(messages) = args.messages {
        config.messages = messages;
    }
    init_logging(config.level(args.log_level.as_deref())?);
    config.validate(READER_SLOTS)?;
    let shutdown = shutdown_flag()?;

    let result = match args.mode.clone().unwrap_or(Mode::Threads) {
        Mode::Threads => run_threads(&config, &shutdown),
        Mode::Writer {
            name,
            readers,
            external,
        } => {
            let options = processes::WriterOptions {
                name,
                readers: readers.unwrap_or(config.consumers),
                spawn: !external,
                config_path: args.config.clone(),
            };
            processes::run_writer(&config, &options, &shutdown)
        }
        Mode::Reader { name, count } => processes::run_reader(&config, &name, count, &shutdown),
    };

    if let Err(e) = &result {
        error!("demo failed: {e:#}");
    }
    result
}

fn init_logging(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_names(true)
        .init();
}

/// Raised by SIGINT or SIGTERM
fn shutdown_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .with_context(|| format!("installing handler for signal {signal}"))?;
    }
    Ok(flag)
}

fn spawn_context(config: &DemoConfig, name: String, index: usize, cores: &[usize]) -> ThreadContext {
    let context = ThreadContext::new().thread_name(name);
    match cores.get(index % cores.len().max(1)) {
        Some(&core) if config.pin_cores => context.pin_at_core(core),
        _ => context,
    }
}

fn run_threads(config: &DemoConfig, shutdown: &Arc<AtomicBool>) -> anyhow::Result<()> {
    info!(
        consumers = config.consumers,
        messages = config.messages,
        wait_strategy = %config.wait_strategy,
        capacity = CAPACITY,
        "starting multicast demo"
    );

    let elapsed = multicast_on_threads(config, shutdown)?;
    let rate = config.messages as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(?elapsed, per_second = rate as u64, "every consumer saw the full stream");
    Ok(())
}

fn multicast_on_threads(config: &DemoConfig, shutdown: &Arc<AtomicBool>) -> anyhow::Result<Duration> {
    let region: Arc<DemoRegion> = Arc::from(SharedRegion::new());
    let ready = Arc::new(Barrier::new(config.consumers + 1));
    let cores = available_cores();

    let mut consumers = Vec::with_capacity(config.consumers);
    for index in 0..config.consumers {
        let region = Arc::clone(&region);
        let ready = Arc::clone(&ready);
        let shutdown = Arc::clone(shutdown);
        let messages = config.messages;
        let timeout = config.recv_timeout();
        let strategy = wait_strategy::from_name(&config.wait_strategy)
            .ok_or_else(|| anyhow!("unknown wait strategy: {}", config.wait_strategy))?;

        let context = spawn_context(config, format!("consumer-{index}"), index + 1, &cores);
        let thread = context.spawn(move || -> anyhow::Result<u64> {
            let joined = region.join(strategy);
            ready.wait();
            let mut consumer = joined?;
            let mut sum = 0u64;
            for expected in 0..messages {
                let limit = WaitLimit::none().with_timeout(timeout).with_shutdown(&shutdown);
                let value = consumer
                    .recv_within(limit)
                    .with_context(|| format!("waiting for value {expected}"))?;
                if value != expected {
                    bail!("expected {expected}, received {value}");
                }
                sum = sum.wrapping_add(value);
            }
            Ok(sum)
        })?;
        consumers.push(thread);
    }

    let messages = config.messages;
    let strategy = wait_strategy::from_name(&config.wait_strategy)
        .ok_or_else(|| anyhow!("unknown wait strategy: {}", config.wait_strategy))?;
    let producer_region = Arc::clone(&region);
    let producer_ready = Arc::clone(&ready);
    let producer_shutdown = Arc::clone(shutdown);
    let producer = spawn_context(config, "producer".to_string(), 0, &cores).spawn(
        move || -> anyhow::Result<Duration> {
            producer_ready.wait();
            let mut producer = producer_region.open_writer(strategy)?;
            let start = Instant::now();
            for value in 0..messages {
                let limit = WaitLimit::none().with_shutdown(&producer_shutdown);
                match producer.publish_within(value, limit) {
                    Ok(_) => {}
                    Err(DisruptorError::Shutdown) => bail!("interrupted after {value} values"),
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(start.elapsed())
        },
    )?;

    let elapsed = match producer.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("producer thread panicked")),
    };
    if elapsed.is_err() {
        // Consumers would otherwise wait out their timeout.
        region.close();
    }
    let elapsed = elapsed?;

    let expected_sum = (0..messages).fold(0u64, u64::wrapping_add);
    for (index, consumer) in consumers.into_iter().enumerate() {
        let sum = consumer
            .join()
            .map_err(|_| anyhow!("consumer-{index} panicked"))?
            .with_context(|| format!("consumer-{index}"))?;
        if sum != expected_sum {
            bail!("consumer-{index} checksum {sum} != {expected_sum}");
        }
    }
    Ok(elapsed)
}
