//! # Messaging Fabric
//!
//! The benchmark talks to its peer through the narrow [`Fabric`] capability:
//! blocking point-to-point send and receive, a barrier, a status agreement
//! and a wall clock. Everything the driver measures goes through it, so the
//! driver can run against in-memory stubs as well as real transports.
//!
//! ## Implementations
//!
//! - [`StreamFabric`]: any ordered byte stream (TCP, Unix socket, in-memory duplex)
//! - [`MpiFabric`](mpi::MpiFabric): `MPI_COMM_WORLD` (feature `mpi`)
//!
//! The [`launch`] module bootstraps a two-process stream fabric, spawning
//! the peer process when needed.

use crate::memory::{BufferError, MessageBuffer};
use async_trait::async_trait;
use thiserror::Error;

pub mod launch;
pub mod stream;

#[cfg(feature = "mpi")]
pub mod mpi;

pub use launch::Launch;
pub use stream::StreamFabric;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: expected {expected}, received {received}")]
    Protocol { expected: String, received: String },

    #[error("rank {rank} is not part of a {size}-process world")]
    InvalidRank { rank: usize, size: usize },

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Two-party synchronous messaging fabric
///
/// Every operation blocks the calling process until its condition holds:
/// `send` until the bytes are handed to the transport, `receive` until the
/// matching message has landed in the buffer, `barrier` until both
/// processes have reached it.
#[async_trait(?Send)]
pub trait Fabric {
    /// Rank of this process
    fn rank(&self) -> usize;

    /// Number of processes in the world
    fn size(&self) -> usize;

    /// Send the first `len` bytes of `buffer` to `dest`
    ///
    /// The buffer is borrowed mutably so device contents can be copied into
    /// its host bounce memory.
    async fn send(
        &mut self,
        buffer: &mut MessageBuffer,
        len: usize,
        dest: usize,
    ) -> Result<(), FabricError>;

    /// Receive exactly `len` bytes from `source` into the start of `buffer`
    async fn receive(
        &mut self,
        buffer: &mut MessageBuffer,
        len: usize,
        source: usize,
    ) -> Result<(), FabricError>;

    /// Wait until every process has reached this point
    async fn barrier(&mut self) -> Result<(), FabricError>;

    /// Collective agreement: true only if `ok` is true on every process
    async fn all_succeeded(&mut self, ok: bool) -> Result<bool, FabricError>;

    /// Seconds elapsed on a monotonic clock with an arbitrary origin
    fn wtime(&self) -> f64;

    /// Terminate every process of the world after an unrecoverable local error
    ///
    /// Fabrics whose peer notices a closed connection need nothing here.
    /// Implementations that do abort do not return.
    fn abort(&mut self, _code: i32) {}

    /// Tear the fabric down once the run is over
    async fn shutdown(&mut self) -> Result<(), FabricError> {
        Ok(())
    }

    /// Name of the fabric for logs
    fn name(&self) -> &'static str;
}
