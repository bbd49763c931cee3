//! # Point-to-Point Benchmark - Main Entry Point
//!
//! Measures one-way latency and bandwidth between two processes for a
//! transfer mode (HtoH, HtoD, DtoH or DtoD) over a sweep of message sizes.
//!
//! ```text
//! p2p-bench HtoH                         # spawns rank 1 locally over TCP
//! p2p-bench --fabric unix DtoD           # Unix domain socket, device buffers
//! p2p-bench --listen 0.0.0.0:7000 --no-spawn HtoD
//! p2p-bench --rank 1 --connect node0:7000 HtoD   # on the second node
//! mpirun -np 2 p2p-bench --fabric mpi HtoH       # with the `mpi` feature
//! ```
//!
//! Rank 0 writes the report to standard output and diagnostics prefixed with
//! `Error: ` to standard error. Every failure exits with status 1.

use clap::Parser;
use p2p_bench::{cli::Args, logging, session::Session};
use std::process::ExitCode;

/// The process never runs more than one task at a time, so a
/// single-threaded runtime keeps every fabric call on this thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };
    logging::init(args.verbose, args.local_rank());

    let mut session = Session::new(args);
    match session.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            session.report_error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}
