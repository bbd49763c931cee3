//! # Benchmark Driver
//!
//! Runs the size sweep on one process. Both processes execute the same
//! driver; the role derived from the rank decides whether a process sends
//! (initiator) or receives (target) and whether it reports.
//!
//! ## Per-Size Protocol
//!
//! 1. Barrier
//! 2. Warmup: untimed send/receive pairs of exactly `size` bytes
//! 3. Barrier
//! 4. Start timestamp (initiator)
//! 5. Measurement: timed send/receive pairs, back to back
//! 6. Barrier
//! 7. End timestamp (initiator), then one sample and one report line
//!
//! The closing barrier makes the measured interval cover the completion of
//! the last receive, so the time per message is a one-way figure.
//!
//! ## Failure Handling
//!
//! Every fabric error is fatal and aborts the sweep immediately. The line of
//! the size in flight is never written, and the message buffer is released
//! on every exit path.

use crate::{
    cli::Args,
    error::BenchError,
    fabric::{Fabric, FabricError},
    memory::{Allocator, BufferManager, MessageBuffer},
    placement::{resolve, Role, TransferMode},
    report::ReportWriter,
    sizes::{SizeSequence, SizeSweep},
};
use serde::Serialize;
use std::io::Write;
use tracing::{debug, info, warn};

/// Parameters of one sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    /// Message sizes to test
    pub sizes: SizeSweep,
    /// Untimed iterations per size
    pub warmup_iterations: usize,
    /// Timed iterations per size; never zero
    pub measured_iterations: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sizes: SizeSweep::default(),
            warmup_iterations: crate::defaults::WARMUP_ITERATIONS,
            measured_iterations: crate::defaults::MEASURED_ITERATIONS,
        }
    }
}

impl SweepConfig {
    /// Build the sweep from command-line options
    pub fn from_args(args: &Args) -> Result<Self, BenchError> {
        let config = Self {
            sizes: SizeSweep::default().with_upper_bound(args.max_size),
            warmup_iterations: args.warmup_iterations,
            measured_iterations: args.iterations,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.measured_iterations == 0 {
            return Err(BenchError::InvalidOption(
                "--iterations must be at least 1".to_string(),
            ));
        }
        if self.sizes.upper_bound == 0 {
            return Err(BenchError::InvalidOption(
                "--max-size must be at least 1 byte".to_string(),
            ));
        }
        Ok(())
    }
}

/// One measurement: mean one-way time and bandwidth for a message size
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub bytes: usize,
    pub time_us: f64,
    #[serde(rename = "bw_Gbps")]
    pub bandwidth_gbps: f64,
}

impl Sample {
    /// Derive a sample from `elapsed_secs` spent on `iterations` messages
    /// of `bytes` bytes each
    pub fn from_elapsed(bytes: usize, elapsed_secs: f64, iterations: usize) -> Self {
        let time_us = elapsed_secs / iterations as f64 * 1e6;
        let bandwidth_gbps = (bytes as f64 * 8.0 / 1e9) / (time_us / 1e6);
        Self {
            bytes,
            time_us,
            bandwidth_gbps,
        }
    }
}

/// Drives the warmup and measurement phases over the size sweep
pub struct BenchmarkRunner {
    mode: TransferMode,
    config: SweepConfig,
}

impl BenchmarkRunner {
    pub fn new(mode: TransferMode, config: SweepConfig) -> Self {
        Self { mode, config }
    }

    /// Run the whole sweep on this process
    ///
    /// Returns the samples measured by the initiator; the target returns an
    /// empty list. Only the initiator writes to `report`.
    pub async fn run<F, A, W>(
        &self,
        fabric: &mut F,
        buffers: &mut BufferManager<A>,
        report: &mut ReportWriter<W>,
    ) -> Result<Vec<Sample>, BenchError>
    where
        F: Fabric + ?Sized,
        A: Allocator,
        W: Write,
    {
        self.config.validate()?;
        let role = Role::from_rank(fabric.rank()).ok_or(FabricError::InvalidRank {
            rank: fabric.rank(),
            size: fabric.size(),
        })?;

        let placement = resolve(self.mode, role);
        let sizes = self.config.sizes.generate();
        let capacity = sizes.max().unwrap_or(0);
        info!(
            "{} {} over {}: {} {} of {}, {} sizes",
            self.mode,
            role,
            fabric.name(),
            placement,
            role.buffer_name(),
            crate::utils::format_bytes(capacity),
            sizes.len()
        );

        let acquired = buffers.acquire(placement, capacity);
        let all_acquired = fabric.all_succeeded(acquired.is_ok()).await;
        let mut buffer = match (acquired, all_acquired) {
            (Err(e), _) => return Err(e.into()),
            (Ok(buffer), Ok(true)) => buffer,
            (Ok(buffer), Ok(false)) => {
                buffers.release(buffer)?;
                return Err(BenchError::PeerAllocation(role.peer_rank()));
            }
            (Ok(buffer), Err(e)) => {
                if let Err(release) = buffers.release(buffer) {
                    warn!("Releasing the {} failed: {}", role.buffer_name(), release);
                }
                return Err(e.into());
            }
        };

        let outcome = self.sweep(fabric, role, &mut buffer, &sizes, report).await;
        let released = buffers.release(buffer);
        let samples = outcome?;
        released?;
        Ok(samples)
    }

    async fn sweep<F, W>(
        &self,
        fabric: &mut F,
        role: Role,
        buffer: &mut MessageBuffer,
        sizes: &SizeSequence,
        report: &mut ReportWriter<W>,
    ) -> Result<Vec<Sample>, BenchError>
    where
        F: Fabric + ?Sized,
        W: Write,
    {
        let timed = role == Role::Initiator;
        let peer = role.peer_rank();
        let mut samples = Vec::with_capacity(if timed { sizes.len() } else { 0 });

        if timed {
            report.header(self.mode).map_err(BenchError::Report)?;
        }

        for size in sizes.iter() {
            fabric.barrier().await?;
            for _ in 0..self.config.warmup_iterations {
                transfer(fabric, role, buffer, size, peer).await?;
            }

            fabric.barrier().await?;
            let start = if timed { fabric.wtime() } else { 0.0 };
            for _ in 0..self.config.measured_iterations {
                transfer(fabric, role, buffer, size, peer).await?;
            }
            fabric.barrier().await?;

            if timed {
                let end = fabric.wtime();
                let sample = Sample::from_elapsed(size, end - start, self.config.measured_iterations);
                report.sample(&sample).map_err(BenchError::Report)?;
                debug!(
                    "{}: {:.3} us, {:.6} Gbps",
                    crate::utils::format_bytes(size),
                    sample.time_us,
                    sample.bandwidth_gbps
                );
                samples.push(sample);
            }
        }

        Ok(samples)
    }
}

/// One blocking message of `len` bytes from the initiator to the target
async fn transfer<F>(
    fabric: &mut F,
    role: Role,
    buffer: &mut MessageBuffer,
    len: usize,
    peer: usize,
) -> Result<(), FabricError>
where
    F: Fabric + ?Sized,
{
    match role {
        Role::Initiator => fabric.send(buffer, len, peer).await,
        Role::Target => fabric.receive(buffer, len, peer).await,
    }
}
