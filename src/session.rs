//! # Benchmark Session
//!
//! One run from the command line to teardown:
//!
//! 1. Validate the process count and the mode, then the options
//! 2. Bring up the fabric (spawning the peer when needed)
//! 3. Pin this process to its CPU core, if requested
//! 4. Run the sweep
//! 5. Tear the fabric down and reap the peer
//!
//! Usage errors are detected before anything is allocated or spawned.

use crate::{
    benchmark::{BenchmarkRunner, SweepConfig},
    cli::Args,
    error::BenchError,
    fabric::{Fabric, Launch},
    memory::{BufferManager, SystemAllocator},
    placement::{Role, TransferMode},
    report::ReportWriter,
};
use tracing::{debug, info};

/// Check the process count, then the mode argument
pub fn validate(world_size: usize, mode: Option<&str>) -> Result<TransferMode, BenchError> {
    if world_size != crate::defaults::WORLD_SIZE {
        return Err(BenchError::ProcessCount {
            expected: crate::defaults::WORLD_SIZE,
            actual: world_size,
        });
    }
    mode.ok_or(BenchError::MissingMode)?.parse()
}

pub struct Session {
    args: Args,
    rank: usize,
    reported: bool,
}

impl Session {
    pub fn new(args: Args) -> Self {
        let rank = args.local_rank();
        Self {
            args,
            rank,
            reported: false,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Whether this process prints the report and diagnostics
    pub fn is_reporter(&self) -> bool {
        self.rank == 0
    }

    /// Print `err` as the run's diagnostic, once and on the reporting rank only
    pub fn report_error(&mut self, err: &BenchError) {
        if self.is_reporter() && !self.reported {
            eprintln!("Error: {}", err);
        }
        self.reported = true;
    }

    pub async fn run(&mut self) -> Result<(), BenchError> {
        match self.args.fabric {
            #[cfg(feature = "mpi")]
            crate::cli::FabricKind::Mpi => self.run_mpi().await,
            _ => self.run_stream().await,
        }
    }

    async fn run_stream(&mut self) -> Result<(), BenchError> {
        let mode = validate(self.args.processes, self.args.mode.as_deref())?;
        let config = SweepConfig::from_args(&self.args)?;

        let mut launch = Launch::bootstrap(&self.args).await?;
        let result = match self.pin() {
            Ok(()) => execute(&self.args, mode, config, launch.fabric()).await,
            Err(e) => Err(e),
        };

        let finished = launch.finish(result.is_ok()).await;
        result?;
        finished?;
        info!("Sweep complete");
        Ok(())
    }

    #[cfg(feature = "mpi")]
    async fn run_mpi(&mut self) -> Result<(), BenchError> {
        let mut fabric = crate::fabric::mpi::MpiFabric::initialize()?;
        self.rank = fabric.rank();

        // identical on every rank, so every rank stops on its own
        let mode = validate(fabric.size(), self.args.mode.as_deref())?;
        let config = SweepConfig::from_args(&self.args)?;

        let result = match self.pin() {
            Ok(()) => execute(&self.args, mode, config, &mut fabric).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            // the peer may be blocked in a receive or barrier that will never complete
            self.abort_world(&mut fabric, e);
        }
        fabric.shutdown().await?;
        result
    }

    /// Report `err`, then bring down every process of the world
    ///
    /// Returns only when the fabric has no abort of its own.
    #[cfg_attr(not(feature = "mpi"), allow(dead_code))]
    fn abort_world<F>(&mut self, fabric: &mut F, err: &BenchError)
    where
        F: Fabric + ?Sized,
    {
        self.report_error(err);
        fabric.abort(i32::from(err.exit_code()));
    }

    /// Pin this process to the core requested for its role
    fn pin(&self) -> Result<(), BenchError> {
        let core = match Role::from_rank(self.rank) {
            Some(Role::Initiator) => self.args.initiator_affinity,
            Some(Role::Target) => self.args.target_affinity,
            None => None,
        };
        if let Some(core) = core {
            crate::utils::pin_current_thread(core)?;
            debug!("Rank {} pinned to CPU core {}", self.rank, core);
        }
        Ok(())
    }
}

async fn execute<F>(
    args: &Args,
    mode: TransferMode,
    config: SweepConfig,
    fabric: &mut F,
) -> Result<(), BenchError>
where
    F: Fabric + ?Sized,
{
    let mut buffers = BufferManager::new(SystemAllocator::new(args.device));
    let mut report = ReportWriter::new(std::io::stdout(), args.format);
    let runner = BenchmarkRunner::new(mode, config);
    runner.run(fabric, &mut buffers, &mut report).await?;
    Ok(())
}
