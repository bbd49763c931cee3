//! # Point-to-Point Transfer Benchmark Library
//!
//! Measures one-way latency and bandwidth between exactly two cooperating
//! processes over a sweep of message sizes, for every combination of
//! host-resident and device-resident (accelerator) buffers on the sending
//! and receiving side.
//!
//! ## Transfer Modes
//!
//! - **HtoH**: host memory on both sides
//! - **HtoD**: host sender, device receiver
//! - **DtoH**: device sender, host receiver
//! - **DtoD**: device memory on both sides
//!
//! ## Architecture Overview
//!
//! - `placement`: transfer modes, roles and the placement policy
//! - `sizes`: the deterministic message size sweep
//! - `memory`: allocator capability and the per-process message buffer
//! - `fabric`: the two-party messaging fabric (stream sockets, optional MPI)
//! - `benchmark`: the warmup/measure driver and bandwidth computation
//! - `report`: textual and JSON Lines output of samples
//! - `session`: validation, bootstrap and teardown around one run
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use p2p_bench::{
//!     fabric::StreamFabric, BenchmarkRunner, BufferManager, OutputFormat, ReportWriter,
//!     SweepConfig, SystemAllocator, TransferMode,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = tokio::net::TcpStream::connect("10.0.0.2:7000").await?;
//!     let mut fabric = StreamFabric::new(stream, 0);
//!     let mut buffers = BufferManager::new(SystemAllocator::new(0));
//!     let mut report = ReportWriter::new(std::io::stdout(), OutputFormat::Text);
//!
//!     let runner = BenchmarkRunner::new(TransferMode::HostToHost, SweepConfig::default());
//!     let samples = runner.run(&mut fabric, &mut buffers, &mut report).await?;
//!     println!("measured {} sizes", samples.len());
//!     Ok(())
//! }
//! ```

/// Warmup/measure driver and bandwidth computation
pub mod benchmark;

/// Command-line interface and option parsing
pub mod cli;

/// Top-level error taxonomy
pub mod error;

/// Two-party messaging fabric abstraction and implementations
pub mod fabric;

/// Colourised, rank-tagged log formatting
pub mod logging;

/// Allocator capability, buffer manager and message buffers
pub mod memory;

/// Transfer modes, roles and placement policy
pub mod placement;

/// Per-sample report output
pub mod report;

/// One benchmark run from argument validation to teardown
pub mod session;

/// Message size sweep generation
pub mod sizes;

pub mod utils;

pub use benchmark::{BenchmarkRunner, Sample, SweepConfig};
pub use cli::{Args, FabricKind, OutputFormat};
pub use error::{BenchError, ErrorKind};
pub use fabric::{Fabric, FabricError};
pub use memory::{Allocator, BufferError, BufferManager, MessageBuffer, SystemAllocator};
pub use placement::{resolve, Placement, Role, TransferMode};
pub use report::ReportWriter;
pub use session::Session;
pub use sizes::{SizeSequence, SizeSweep};

/// The current version of the benchmark
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Every constant here is the value used when the corresponding option is
/// not given on the command line.
pub mod defaults {
    use std::time::Duration;

    /// Smallest message size in bytes
    pub const MIN_SIZE: usize = 1;

    /// End of the linear size region (inclusive)
    pub const LINEAR_END: usize = 2;

    /// Start of the geometric size region
    pub const GEOMETRIC_START: usize = 2;

    /// Factor between consecutive geometric sizes
    pub const GEOMETRIC_MULTIPLIER: usize = 2;

    /// Upper bound of the geometric region: 100 MiB
    pub const UPPER_BOUND: usize = 1024 * 1024 * 100;

    /// Untimed iterations per size
    pub const WARMUP_ITERATIONS: usize = 5;

    /// Timed iterations per size
    pub const MEASURED_ITERATIONS: usize = 5;

    /// Number of cooperating processes the benchmark requires
    pub const WORLD_SIZE: usize = 2;

    /// Listen address of the initiator for the TCP fabric
    pub const LISTEN_ADDRESS: &str = "127.0.0.1:0";

    /// How long the initiator waits for its peer to connect
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Accelerator ordinal used for device buffers
    pub const DEVICE_ORDINAL: usize = 0;
}
