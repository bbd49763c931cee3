//! # Buffer Management
//!
//! Each process owns exactly one message buffer for the whole run. It is
//! sized to the largest message of the sweep, lives in the memory space the
//! placement policy chose, and is sliced to the current message size on
//! every transfer.
//!
//! Allocation goes through the [`Allocator`] capability so that host and
//! device paths share the same bookkeeping and tests can count calls
//! without accelerator hardware. A buffer is always released through the
//! routine matching the placement it was acquired with.

use crate::placement::Placement;
use thiserror::Error;
use tracing::debug;

#[cfg(feature = "cuda")]
pub mod cuda;

/// Buffer allocation and access failures
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("{placement} allocation of {bytes} bytes failed: {reason}")]
    AllocationFailed {
        placement: Placement,
        bytes: usize,
        reason: String,
    },

    #[error("device memory is not available: {0}")]
    DeviceUnavailable(String),

    #[error("{released} release requested for a buffer allocated in {allocated} memory")]
    PlacementMismatch {
        allocated: Placement,
        released: Placement,
    },

    #[error("message of {requested} bytes exceeds the {capacity}-byte buffer")]
    OutOfBounds { requested: usize, capacity: usize },

    #[error("device copy failed: {0}")]
    DeviceCopy(String),
}

/// Memory that lives on an accelerator and is not host-addressable
pub trait DeviceRegion {
    /// Size of the region in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the first `dst.len()` bytes of the region into host memory
    fn copy_to_host(&self, dst: &mut [u8]) -> Result<(), BufferError>;

    /// Overwrite the first `src.len()` bytes of the region from host memory
    fn copy_from_host(&mut self, src: &[u8]) -> Result<(), BufferError>;
}

/// A block of memory handed out by an [`Allocator`]
pub enum Region {
    Host(Vec<u8>),
    Device(Box<dyn DeviceRegion>),
}

impl Region {
    pub fn len(&self) -> usize {
        match self {
            Region::Host(bytes) => bytes.len(),
            Region::Device(region) => region.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memory space the region actually lives in
    pub fn placement(&self) -> Placement {
        match self {
            Region::Host(_) => Placement::Host,
            Region::Device(_) => Placement::Device,
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Region::{:?}({} bytes)", self.placement(), self.len())
    }
}

/// Allocation capability keyed by placement
pub trait Allocator {
    /// Allocate `bytes` bytes in the memory space named by `placement`
    fn allocate(&mut self, placement: Placement, bytes: usize) -> Result<Region, BufferError>;

    /// Free a region with the routine belonging to `placement`
    fn free(&mut self, placement: Placement, region: Region) -> Result<(), BufferError>;
}

impl<A: Allocator + ?Sized> Allocator for &mut A {
    fn allocate(&mut self, placement: Placement, bytes: usize) -> Result<Region, BufferError> {
        (**self).allocate(placement, bytes)
    }

    fn free(&mut self, placement: Placement, region: Region) -> Result<(), BufferError> {
        (**self).free(placement, region)
    }
}

/// Host memory from the global allocator, device memory from the
/// accelerator runtime when one is compiled in
pub struct SystemAllocator {
    device_ordinal: usize,
    #[cfg(feature = "cuda")]
    device: Option<std::sync::Arc<cudarc::driver::CudaDevice>>,
}

impl SystemAllocator {
    /// Create an allocator whose device buffers live on accelerator `device_ordinal`
    pub fn new(device_ordinal: usize) -> Self {
        Self {
            device_ordinal,
            #[cfg(feature = "cuda")]
            device: None,
        }
    }

    fn allocate_host(bytes: usize) -> Result<Region, BufferError> {
        host_memory(bytes).map(Region::Host)
    }

    #[cfg(feature = "cuda")]
    fn allocate_device(&mut self, bytes: usize) -> Result<Region, BufferError> {
        let device = match &self.device {
            Some(device) => device.clone(),
            None => {
                let device = cudarc::driver::CudaDevice::new(self.device_ordinal).map_err(|e| {
                    BufferError::DeviceUnavailable(format!(
                        "cannot open CUDA device {}: {}",
                        self.device_ordinal, e
                    ))
                })?;
                self.device = Some(device.clone());
                device
            }
        };
        let region = cuda::CudaRegion::allocate(device, bytes)?;
        Ok(Region::Device(Box::new(region)))
    }

    #[cfg(not(feature = "cuda"))]
    fn allocate_device(&mut self, bytes: usize) -> Result<Region, BufferError> {
        Err(BufferError::DeviceUnavailable(format!(
            "cannot allocate {} bytes on device {}: built without an accelerator runtime (enable the `cuda` feature)",
            bytes, self.device_ordinal
        )))
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&mut self, placement: Placement, bytes: usize) -> Result<Region, BufferError> {
        match placement {
            Placement::Host => Self::allocate_host(bytes),
            Placement::Device => self.allocate_device(bytes),
        }
    }

    fn free(&mut self, placement: Placement, region: Region) -> Result<(), BufferError> {
        match (placement, region) {
            // Dropping the Vec hands the block back to the global allocator.
            (Placement::Host, Region::Host(memory)) => drop(memory),
            // Device regions release their allocation with the runtime's free on drop.
            (Placement::Device, Region::Device(memory)) => drop(memory),
            (released, region) => {
                return Err(BufferError::PlacementMismatch {
                    allocated: region.placement(),
                    released,
                })
            }
        }
        Ok(())
    }
}

/// The single per-process message buffer
///
/// Device buffers carry a host bounce buffer of the same capacity, filled
/// once at acquisition, so that fabrics which cannot address device memory
/// never allocate during a transfer.
pub struct MessageBuffer {
    placement: Placement,
    region: Region,
    bounce: Vec<u8>,
}

impl MessageBuffer {
    /// Placement the buffer was acquired with
    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    fn check_bounds(&self, len: usize) -> Result<(), BufferError> {
        if len > self.len() {
            return Err(BufferError::OutOfBounds {
                requested: len,
                capacity: self.len(),
            });
        }
        Ok(())
    }

    /// Host view of the first `len` bytes for sending
    ///
    /// Host buffers are borrowed directly. Device buffers are copied into
    /// the bounce buffer first.
    pub fn outbound(&mut self, len: usize) -> Result<&[u8], BufferError> {
        self.check_bounds(len)?;
        match &self.region {
            Region::Host(memory) => Ok(&memory[..len]),
            Region::Device(region) => {
                region.copy_to_host(&mut self.bounce[..len])?;
                Ok(&self.bounce[..len])
            }
        }
    }

    /// Host memory to receive the first `len` bytes into
    ///
    /// Follow with [`land`](Self::land) once the bytes are in place.
    pub fn inbound(&mut self, len: usize) -> Result<&mut [u8], BufferError> {
        self.check_bounds(len)?;
        match &mut self.region {
            Region::Host(memory) => Ok(&mut memory[..len]),
            Region::Device(_) => Ok(&mut self.bounce[..len]),
        }
    }

    /// Move `len` received bytes from the bounce buffer to the device
    ///
    /// Host buffers were written in place, so there is nothing to move.
    pub fn land(&mut self, len: usize) -> Result<(), BufferError> {
        self.check_bounds(len)?;
        match &mut self.region {
            Region::Host(_) => Ok(()),
            Region::Device(region) => region.copy_from_host(&self.bounce[..len]),
        }
    }
}

impl std::fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("region", &self.region)
            .field("bounce_bytes", &self.bounce.len())
            .finish()
    }
}

/// Zero-filled host memory, failing instead of aborting when exhausted
fn host_memory(bytes: usize) -> Result<Vec<u8>, BufferError> {
    let mut memory = Vec::new();
    memory
        .try_reserve_exact(bytes)
        .map_err(|e| BufferError::AllocationFailed {
            placement: Placement::Host,
            bytes,
            reason: e.to_string(),
        })?;
    memory.resize(bytes, 0);
    Ok(memory)
}

/// Acquires and releases message buffers through an [`Allocator`]
pub struct BufferManager<A: Allocator> {
    allocator: A,
}

impl<A: Allocator> BufferManager<A> {
    pub fn new(allocator: A) -> Self {
        Self { allocator }
    }

    /// Allocate a buffer of `bytes` bytes in `placement` memory
    pub fn acquire(&mut self, placement: Placement, bytes: usize) -> Result<MessageBuffer, BufferError> {
        let region = self.allocator.allocate(placement, bytes)?;
        if region.placement() != placement {
            let allocated = region.placement();
            self.allocator.free(allocated, region)?;
            return Err(BufferError::AllocationFailed {
                placement,
                bytes,
                reason: format!("allocator returned {} memory", allocated),
            });
        }
        let bounce = match placement {
            Placement::Host => Vec::new(),
            Placement::Device => match host_memory(bytes) {
                Ok(bounce) => bounce,
                Err(e) => {
                    self.allocator.free(placement, region)?;
                    return Err(e);
                }
            },
        };
        debug!(
            "Acquired {} buffer of {}",
            placement,
            crate::utils::format_bytes(bytes)
        );
        Ok(MessageBuffer {
            placement,
            region,
            bounce,
        })
    }

    /// Free a buffer with the routine matching the placement it was acquired with
    pub fn release(&mut self, buffer: MessageBuffer) -> Result<(), BufferError> {
        let MessageBuffer {
            placement, region, ..
        } = buffer;
        let bytes = region.len();
        self.allocator.free(placement, region)?;
        debug!(
            "Released {} buffer of {}",
            placement,
            crate::utils::format_bytes(bytes)
        );
        Ok(())
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn into_allocator(self) -> A {
        self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Host-backed stand-in for accelerator memory
    struct FakeDevice(Vec<u8>);

    impl DeviceRegion for FakeDevice {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn copy_to_host(&self, dst: &mut [u8]) -> Result<(), BufferError> {
            dst.copy_from_slice(&self.0[..dst.len()]);
            Ok(())
        }

        fn copy_from_host(&mut self, src: &[u8]) -> Result<(), BufferError> {
            self.0[..src.len()].copy_from_slice(src);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingAllocator {
        allocations: HashMap<Placement, usize>,
        frees: HashMap<Placement, usize>,
        fail: Option<Placement>,
    }

    impl Allocator for CountingAllocator {
        fn allocate(&mut self, placement: Placement, bytes: usize) -> Result<Region, BufferError> {
            if self.fail == Some(placement) {
                return Err(BufferError::AllocationFailed {
                    placement,
                    bytes,
                    reason: "injected failure".into(),
                });
            }
            *self.allocations.entry(placement).or_default() += 1;
            Ok(match placement {
                Placement::Host => Region::Host(vec![0; bytes]),
                Placement::Device => Region::Device(Box::new(FakeDevice(vec![0; bytes]))),
            })
        }

        fn free(&mut self, placement: Placement, region: Region) -> Result<(), BufferError> {
            assert_eq!(region.placement(), placement, "mismatched free");
            *self.frees.entry(placement).or_default() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_release_routes_by_placement() {
        let mut manager = BufferManager::new(CountingAllocator::default());

        for placement in [Placement::Host, Placement::Device] {
            let buffer = manager.acquire(placement, 128).unwrap();
            assert_eq!(buffer.placement(), placement);
            assert_eq!(buffer.len(), 128);
            manager.release(buffer).unwrap();
        }

        let allocator = manager.allocator();
        assert_eq!(allocator.allocations, allocator.frees);
        assert_eq!(allocator.frees[&Placement::Host], 1);
        assert_eq!(allocator.frees[&Placement::Device], 1);
    }

    #[test]
    fn test_failed_acquire_allocates_nothing() {
        let mut manager = BufferManager::new(CountingAllocator {
            fail: Some(Placement::Device),
            ..Default::default()
        });

        let err = manager.acquire(Placement::Device, 64).unwrap_err();
        assert!(matches!(err, BufferError::AllocationFailed { .. }));
        assert!(manager.allocator().allocations.is_empty());
        assert!(manager.allocator().frees.is_empty());
    }

    #[test]
    fn test_system_allocator_host_round_trip() {
        let mut manager = BufferManager::new(SystemAllocator::new(0));
        let mut buffer = manager.acquire(Placement::Host, 16).unwrap();

        buffer.inbound(4).unwrap().copy_from_slice(&[7; 4]);
        buffer.land(4).unwrap();
        assert_eq!(buffer.outbound(4).unwrap(), &[7u8; 4]);
        manager.release(buffer).unwrap();
    }

    #[test]
    fn test_system_allocator_rejects_mismatched_free() {
        let mut allocator = SystemAllocator::new(0);
        let region = allocator.allocate(Placement::Host, 8).unwrap();

        let err = allocator.free(Placement::Device, region).unwrap_err();
        assert!(matches!(
            err,
            BufferError::PlacementMismatch {
                allocated: Placement::Host,
                released: Placement::Device
            }
        ));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_device_allocation_without_runtime_fails() {
        let mut allocator = SystemAllocator::new(0);
        let err = allocator.allocate(Placement::Device, 1024).unwrap_err();
        assert!(matches!(err, BufferError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_device_buffer_is_staged_through_host() {
        let mut manager = BufferManager::new(CountingAllocator::default());
        let mut buffer = manager.acquire(Placement::Device, 32).unwrap();

        buffer.inbound(3).unwrap().copy_from_slice(&[1, 2, 3]);
        buffer.land(3).unwrap();
        // overwrite the bounce buffer so the next read must come from the device
        buffer.inbound(3).unwrap().fill(0);
        assert_eq!(buffer.outbound(3).unwrap(), &[1, 2, 3]);

        manager.release(buffer).unwrap();
    }

    #[test]
    fn test_bounce_buffer_is_sized_at_acquisition() {
        let mut manager = BufferManager::new(CountingAllocator::default());

        let mut device = manager.acquire(Placement::Device, 4096).unwrap();
        assert_eq!(device.bounce.len(), 4096);
        let host = manager.acquire(Placement::Host, 4096).unwrap();
        assert!(host.bounce.is_empty());

        // the first transfer at full capacity touches no new memory
        let before = device.bounce.as_ptr();
        device.outbound(4096).unwrap();
        device.inbound(4096).unwrap();
        assert_eq!(device.bounce.as_ptr(), before);
        assert_eq!(device.bounce.capacity(), 4096);

        manager.release(device).unwrap();
        manager.release(host).unwrap();
    }

    #[test]
    fn test_slices_are_bounds_checked() {
        let mut manager = BufferManager::new(CountingAllocator::default());
        let mut buffer = manager.acquire(Placement::Host, 4).unwrap();

        assert!(matches!(
            buffer.outbound(5),
            Err(BufferError::OutOfBounds {
                requested: 5,
                capacity: 4
            })
        ));
        assert!(buffer.inbound(5).is_err());
        assert!(buffer.land(5).is_err());
        manager.release(buffer).unwrap();
    }
}
