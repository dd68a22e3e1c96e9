//! Writer and reader processes over a named segment
//!
//! The writer creates the segment, starts (or waits for) its readers and
//! publishes `0..messages`. Each value equals the position it was published
//! at, so a reader checks every value against its own position.

use crate::config::DemoConfig;
use crate::{CAPACITY, READER_SLOTS};
use anyhow::{anyhow, bail, Context};
use shmcast::disruptor::{wait_strategy, DisruptorError, WaitLimit, WaitStrategy};
use shmcast::ipc::{Creator, MappedRegion, MappingMode, Opener};
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type DemoMapping<M> = MappedRegion<u64, CAPACITY, READER_SLOTS, M>;

/// How the writer finds its readers
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub name: String,
    pub readers: usize,
    /// Start the readers as child processes
    pub spawn: bool,
    /// Handed on to spawned readers
    pub config_path: Option<PathBuf>,
}

fn strategy(config: &DemoConfig) -> anyhow::Result<Box<dyn WaitStrategy>> {
    wait_strategy::from_name(&config.wait_strategy)
        .ok_or_else(|| anyhow!("unknown wait strategy: {}", config.wait_strategy))
}

/// Reader children, killed if the writer bails out before reaping them
struct ReaderProcesses {
    children: Vec<Child>,
}

impl ReaderProcesses {
    fn spawn(config: &DemoConfig, options: &WriterOptions) -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("locating the shmcast binary")?;
        let level = config.level(None)?.to_string();
        let mut processes = Self {
            children: Vec::with_capacity(options.readers),
        };
        for index in 0..options.readers {
            let mut command = Command::new(&exe);
            command
                .args(["reader", "--name", &options.name])
                .args(["--count", &config.messages.to_string()])
                .args(["--log-level", &level]);
            if let Some(path) = &options.config_path {
                command.arg("--config").arg(path);
            }
            let child = command
                .spawn()
                .with_context(|| format!("starting reader process {index}"))?;
            debug!(index, pid = child.id(), "reader process started");
            processes.children.push(child);
        }
        Ok(processes)
    }

    /// Wait for every child; fails if any of them did
    fn wait_all(mut self, shutdown: &AtomicBool) -> anyhow::Result<()> {
        let mut failed = 0;
        for mut child in self.children.drain(..) {
            let pid = child.id();
            let status = child
                .wait()
                .with_context(|| format!("waiting for reader process {pid}"))?;
            if status.success() {
                debug!(pid, "reader process finished");
            } else {
                warn!(pid, %status, "reader process failed");
                failed += 1;
            }
        }
        if failed > 0 && !shutdown.load(Ordering::Acquire) {
            bail!("{failed} reader process(es) failed");
        }
        Ok(())
    }
}

impl Drop for ReaderProcesses {
    fn drop(&mut self) {
        for child in &mut self.children {
            if let Err(error) = child.kill() {
                debug!(pid = child.id(), %error, "reader process already gone");
            }
            let _ = child.wait();
        }
    }
}

fn await_readers<M: MappingMode>(
    region: &DemoMapping<M>,
    readers: usize,
    timeout: Duration,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    while region.reader_count() < readers {
        if shutdown.load(Ordering::Acquire) {
            bail!("interrupted while waiting for readers");
        }
        if Instant::now() >= deadline {
            bail!(
                "only {} of {readers} readers joined within {timeout:?}",
                region.reader_count()
            );
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

/// Create the segment, publish the stream and reap the readers
pub fn run_writer(
    config: &DemoConfig,
    options: &WriterOptions,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    if options.readers > READER_SLOTS {
        bail!(
            "{} readers requested but the region has {READER_SLOTS} reader slots",
            options.readers
        );
    }
    let region = DemoMapping::<Creator>::create(&options.name)
        .with_context(|| format!("creating shared region {}", options.name))?;
    info!(
        name = %options.name,
        readers = options.readers,
        messages = config.messages,
        wait_strategy = %config.wait_strategy,
        "writer started"
    );

    let children = if options.spawn {
        Some(ReaderProcesses::spawn(config, options)?)
    } else {
        None
    };
    await_readers(&region, options.readers, config.recv_timeout(), shutdown)?;

    let mut producer = region.open_writer(strategy(config)?)?;
    let start = Instant::now();
    let mut published = 0u64;
    for value in 0..config.messages {
        match producer.publish_within(value, WaitLimit::none().with_shutdown(shutdown)) {
            Ok(_) => published += 1,
            Err(DisruptorError::Shutdown) => {
                info!(published, "writer interrupted");
                break;
            }
            Err(e) => {
                region.close();
                return Err(e).context("publishing");
            }
        }
    }
    let elapsed = start.elapsed();
    drop(producer);

    // Readers drain whatever is left once they see the region closed
    region.close();
    info!(published, ?elapsed, "writer finished");

    if let Some(children) = children {
        children.wait_all(shutdown)?;
        info!(readers = options.readers, "every reader process saw the full stream");
    }
    Ok(())
}

/// Tracks one reader's progress through the stream
#[derive(Debug, Default)]
struct StreamCheck {
    received: u64,
}

impl StreamCheck {
    fn accept(&mut self, value: u64, position: i64) -> anyhow::Result<()> {
        if value as i64 != position {
            bail!("expected {position}, received {value}");
        }
        self.received += 1;
        Ok(())
    }

    fn wants_more(&self, count: Option<u64>) -> bool {
        count.map_or(true, |count| self.received < count)
    }
}

/// Join the region `name` and check every value until `count`, a close or a
/// signal
pub fn run_reader(
    config: &DemoConfig,
    name: &str,
    count: Option<u64>,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let region = DemoMapping::<Opener>::open(name)
        .with_context(|| format!("opening shared region {name}"))?;
    let mut consumer = region.join(strategy(config)?)?;
    info!(name, slot = consumer.slot(), position = consumer.position(), "reader started");

    let mut check = StreamCheck::default();
    while check.wants_more(count) {
        match consumer.recv_within(WaitLimit::none().with_shutdown(shutdown)) {
            Ok(value) => check.accept(value, consumer.position())?,
            Err(DisruptorError::Alert) => {
                while check.wants_more(count) {
                    let Some(value) = consumer.try_recv() else {
                        break;
                    };
                    check.accept(value, consumer.position())?;
                }
                debug!(received = check.received, "writer closed the region");
                break;
            }
            Err(DisruptorError::Shutdown) => {
                info!(received = check.received, "reader interrupted");
                return Ok(());
            }
            Err(e) => return Err(e).context("receiving"),
        }
    }

    if let Some(count) = count {
        if check.received < count {
            bail!("region closed after {} of {count} values", check.received);
        }
    }
    info!(received = check.received, "reader finished");
    Ok(())
}
