use super::{Fabric, FabricError};
use crate::memory::MessageBuffer;
use async_trait::async_trait;
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use tracing::{debug, trace};

/// Fabric over `MPI_COMM_WORLD`
///
/// Both ranks are started by `mpirun`; rank and size come from the world
/// communicator. MPI calls block the (single-threaded) process, which is
/// exactly the blocking semantics the driver expects. Device buffers go
/// through their host bounce memory, so a CUDA-aware MPI is not required.
pub struct MpiFabric {
    // dropped before `universe`, which finalizes MPI
    world: SimpleCommunicator,
    universe: Universe,
}

impl MpiFabric {
    /// Initialize MPI and attach to the world communicator
    pub fn initialize() -> Result<Self, FabricError> {
        let universe = mpi::initialize().ok_or_else(|| {
            FabricError::Bootstrap("MPI is already initialized in this process".to_string())
        })?;
        let world = universe.world();
        debug!(
            "MPI initialized: rank {} of {}",
            world.rank(),
            world.size()
        );
        Ok(Self { world, universe })
    }

    fn check_peer(&self, rank: usize) -> Result<i32, FabricError> {
        let size = self.size();
        if rank >= size || rank == self.rank() {
            return Err(FabricError::InvalidRank { rank, size });
        }
        Ok(rank as i32)
    }
}

#[async_trait(?Send)]
impl Fabric for MpiFabric {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    async fn send(
        &mut self,
        buffer: &mut MessageBuffer,
        len: usize,
        dest: usize,
    ) -> Result<(), FabricError> {
        let dest = self.check_peer(dest)?;
        let payload = buffer.outbound(len)?;
        self.world.process_at_rank(dest).send(payload);
        trace!("Sent {} bytes to rank {}", len, dest);
        Ok(())
    }

    async fn receive(
        &mut self,
        buffer: &mut MessageBuffer,
        len: usize,
        source: usize,
    ) -> Result<(), FabricError> {
        let source = self.check_peer(source)?;
        let status = self
            .world
            .process_at_rank(source)
            .receive_into(buffer.inbound(len)?);
        buffer.land(len)?;

        let received = status.count(u8::equivalent_datatype());
        if received as usize != len {
            return Err(FabricError::Protocol {
                expected: format!("message of {} bytes", len),
                received: format!("message of {} bytes", received),
            });
        }
        trace!("Received {} bytes from rank {}", len, source);
        Ok(())
    }

    async fn barrier(&mut self) -> Result<(), FabricError> {
        self.world.barrier();
        Ok(())
    }

    async fn all_succeeded(&mut self, ok: bool) -> Result<bool, FabricError> {
        let local = i32::from(ok);
        let mut all = 0i32;
        self.world
            .all_reduce_into(&local, &mut all, SystemOperation::min());
        Ok(all == 1)
    }

    fn wtime(&self) -> f64 {
        mpi::time()
    }

    fn abort(&mut self, code: i32) {
        debug!("Aborting MPI_COMM_WORLD with code {}", code);
        self.world.abort(code)
    }

    fn name(&self) -> &'static str {
        "mpi"
    }
}

impl std::fmt::Debug for MpiFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiFabric")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .field("threading", &self.universe.threading_support())
            .finish()
    }
}
