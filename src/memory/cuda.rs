use super::{BufferError, DeviceRegion};
use crate::placement::Placement;
use cudarc::driver::{CudaDevice, CudaSlice};
use std::sync::Arc;

/// A buffer in CUDA device memory
///
/// The allocation is returned to the driver when the region is dropped.
pub struct CudaRegion {
    device: Arc<CudaDevice>,
    memory: CudaSlice<u8>,
}

impl CudaRegion {
    pub fn allocate(device: Arc<CudaDevice>, bytes: usize) -> Result<Self, BufferError> {
        let memory = device
            .alloc_zeros::<u8>(bytes)
            .map_err(|e| BufferError::AllocationFailed {
                placement: Placement::Device,
                bytes,
                reason: e.to_string(),
            })?;
        Ok(Self { device, memory })
    }
}

impl DeviceRegion for CudaRegion {
    fn len(&self) -> usize {
        self.memory.len()
    }

    fn copy_to_host(&self, dst: &mut [u8]) -> Result<(), BufferError> {
        let view = self.memory.slice(0..dst.len());
        self.device
            .dtoh_sync_copy_into(&view, dst)
            .map_err(|e| BufferError::DeviceCopy(e.to_string()))
    }

    fn copy_from_host(&mut self, src: &[u8]) -> Result<(), BufferError> {
        let mut view = self.memory.slice_mut(0..src.len());
        self.device
            .htod_sync_copy_into(src, &mut view)
            .map_err(|e| BufferError::DeviceCopy(e.to_string()))
    }
}
