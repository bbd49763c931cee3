use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Point-to-point benchmark - one-way latency and bandwidth between two processes
/// for host- and device-resident buffers
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Transfer mode: HtoH, HtoD, DtoH or DtoD
    #[clap(value_name = "MODE")]
    pub mode: Option<String>,

    /// Number of cooperating processes (the benchmark requires exactly 2)
    #[clap(short = 'n', long = "np", default_value_t = crate::defaults::WORLD_SIZE, help_heading = "Fabric Options")]
    pub processes: usize,

    /// Messaging fabric connecting the two processes
    #[clap(long, value_enum, default_value_t = FabricKind::Tcp, help_heading = "Fabric Options")]
    pub fabric: FabricKind,

    /// Address the initiator listens on (TCP fabric)
    #[clap(long, default_value = crate::defaults::LISTEN_ADDRESS, help_heading = "Fabric Options")]
    pub listen: String,

    /// Endpoint of the initiator to join as rank 1 (host:port, or a socket path)
    #[clap(long, help_heading = "Fabric Options")]
    pub connect: Option<String>,

    /// Socket path for the Unix fabric (default: a unique path under /tmp)
    #[clap(long, help_heading = "Fabric Options")]
    pub socket_path: Option<PathBuf>,

    /// Do not spawn rank 1; wait for it to be started separately with --rank 1 --connect
    #[clap(long, default_value_t = false, help_heading = "Fabric Options")]
    pub no_spawn: bool,

    /// Seconds to wait for the peer to connect
    #[clap(long, default_value_t = crate::defaults::CONNECT_TIMEOUT.as_secs(), help_heading = "Fabric Options")]
    pub connect_timeout: u64,

    /// Socket send and receive buffer size in bytes
    #[clap(long, help_heading = "Fabric Options")]
    pub socket_buffer_size: Option<usize>,

    /// Rank of this process within the run
    #[clap(long, hide = true)]
    pub rank: Option<usize>,

    /// Untimed iterations per message size
    #[clap(short = 'w', long, default_value_t = crate::defaults::WARMUP_ITERATIONS, help_heading = "Sweep Options")]
    pub warmup_iterations: usize,

    /// Timed iterations per message size
    #[clap(short = 'i', long, default_value_t = crate::defaults::MEASURED_ITERATIONS, help_heading = "Sweep Options")]
    pub iterations: usize,

    /// Upper bound of the message size sweep in bytes
    #[clap(long, default_value_t = crate::defaults::UPPER_BOUND, help_heading = "Sweep Options")]
    pub max_size: usize,

    /// Accelerator ordinal for device buffers
    #[clap(long, default_value_t = crate::defaults::DEVICE_ORDINAL, help_heading = "Sweep Options")]
    pub device: usize,

    /// Pin the initiator (rank 0) to this CPU core
    #[clap(long, help_heading = "Sweep Options")]
    pub initiator_affinity: Option<usize>,

    /// Pin the target (rank 1) to this CPU core
    #[clap(long, help_heading = "Sweep Options")]
    pub target_affinity: Option<usize>,

    /// Output format of the report on standard output
    #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Verbose logging on standard error
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Available messaging fabrics
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FabricKind {
    /// TCP sockets; rank 0 spawns rank 1 unless --no-spawn is given
    #[clap(name = "tcp")]
    Tcp,

    /// Unix domain sockets; both processes on one host
    #[cfg(unix)]
    #[clap(name = "unix")]
    Unix,

    /// MPI_COMM_WORLD; start both ranks with mpirun
    #[cfg(feature = "mpi")]
    #[clap(name = "mpi")]
    Mpi,
}

impl FabricKind {
    /// The command-line name of this fabric
    pub fn as_str(&self) -> &'static str {
        match self {
            FabricKind::Tcp => "tcp",
            #[cfg(unix)]
            FabricKind::Unix => "unix",
            #[cfg(feature = "mpi")]
            FabricKind::Mpi => "mpi",
        }
    }
}

impl std::fmt::Display for FabricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report formats
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `#`-prefixed header, then `bytes time_us bw_Gbps` per line
    #[clap(name = "text")]
    Text,

    /// JSON Lines: a header object, then one object per sample
    #[clap(name = "json")]
    Json,
}

impl Args {
    /// Rank of this process; the process started by the user is rank 0
    pub fn local_rank(&self) -> usize {
        self.rank.unwrap_or(0)
    }

    /// Command line for the rank 1 process joining through `endpoint`
    ///
    /// Everything that shapes the sweep is forwarded so that both processes
    /// derive the same size sequence and iteration counts.
    pub fn peer_arguments(&self, endpoint: &str) -> Vec<String> {
        let mut args = vec![
            "--rank".to_string(),
            "1".to_string(),
            "--np".to_string(),
            self.processes.to_string(),
            "--fabric".to_string(),
            self.fabric.as_str().to_string(),
            "--connect".to_string(),
            endpoint.to_string(),
            "--connect-timeout".to_string(),
            self.connect_timeout.to_string(),
            "--warmup-iterations".to_string(),
            self.warmup_iterations.to_string(),
            "--iterations".to_string(),
            self.iterations.to_string(),
            "--max-size".to_string(),
            self.max_size.to_string(),
            "--device".to_string(),
            self.device.to_string(),
        ];
        if let Some(size) = self.socket_buffer_size {
            args.push("--socket-buffer-size".to_string());
            args.push(size.to_string());
        }
        if let Some(core) = self.target_affinity {
            args.push("--target-affinity".to_string());
            args.push(core.to_string());
        }
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if let Some(mode) = &self.mode {
            // after `--` so a mode token can never be read as a flag
            args.push("--".to_string());
            args.push(mode.clone());
        }
        args
    }
}
