/// UniformBufferManager - allocation and lookup of named uniform buffers
///
/// Two families of buffers are tracked:
///
/// * **per-frame**: `(name, id)` maps to exactly `frame_count` buffers, one per
///   frame in flight, allocated together on first request.
/// * **global**: `(name, id)` maps to one persistent buffer. Ids are dense: the
///   caller appends id `global_buffer_count(name)` when the previous one is full.
///
/// Every buffer is host-visible and coherent, sized to the device's uniform
/// range, and never reallocated while the manager holds it.

use std::sync::Arc;
use bytemuck::Pod;
use rustc_hash::FxHashMap;
use crate::error::Result;
use crate::{engine_bail, engine_debug, engine_error};
use crate::graphics_device::{Buffer, BufferDesc, BufferUsage, DeviceLimits, GraphicsDevice};

/// Upper bound on the size of one uniform buffer
///
/// Some drivers report a uniform range of several gigabytes.
pub const UNIFORM_BUFFER_SIZE_CAP: u64 = 64 * 1024;

/// Write-through view of one uniform buffer
///
/// Writes go straight to the coherent memory; dropping the mapping unmaps it.
pub struct UniformBufferMapping {
    buffer: Arc<dyn Buffer>,
}

impl UniformBufferMapping {
    /// Buffer size in bytes
    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    /// Copy `bytes` to `offset`
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.buffer.update(offset, bytes)
    }

    /// Copy a plain-old-data value to `offset`
    pub fn write_pod<T: Pod>(&self, offset: u64, value: &T) -> Result<()> {
        self.buffer.update(offset, bytemuck::bytes_of(value))
    }

    /// Read `len` bytes starting at `offset`
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.buffer.read(offset, &mut out)?;
        Ok(out)
    }
}

pub struct UniformBufferManager {
    frame_count: usize,
    buffer_size: u64,
    per_frame: FxHashMap<(String, u32), Vec<Arc<dyn Buffer>>>,
    global: FxHashMap<String, Vec<Arc<dyn Buffer>>>,
}

impl UniformBufferManager {
    /// Manager for `frame_count` frames in flight, buffers of `buffer_size` bytes
    pub fn new(frame_count: usize, buffer_size: u64) -> Self {
        Self {
            frame_count,
            buffer_size,
            per_frame: FxHashMap::default(),
            global: FxHashMap::default(),
        }
    }

    /// Manager whose buffers span the device's uniform range (capped)
    pub fn from_limits(frame_count: usize, limits: &DeviceLimits) -> Self {
        Self::new(
            frame_count,
            limits.max_uniform_buffer_range.min(UNIFORM_BUFFER_SIZE_CAP),
        )
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Size in bytes of every buffer
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    fn allocate(&self, device: &mut dyn GraphicsDevice) -> Result<Arc<dyn Buffer>> {
        device.create_buffer(BufferDesc {
            size: self.buffer_size,
            usage: BufferUsage::Uniform,
        })
    }

    fn check_frame_index(&self, name: &str, id: u32, frame_index: usize) {
        if frame_index >= self.frame_count {
            engine_error!(
                "nova3d::UniformBufferManager",
                "Frame index {} out of range for '{}'[{}] ({} frames)",
                frame_index,
                name,
                id,
                self.frame_count
            );
            panic!("frame index {} >= frame count {}", frame_index, self.frame_count);
        }
    }

    // ===== PER-FRAME BUFFERS =====

    /// Buffer of `(name, id)` for `frame_index`, allocating the whole set on first use
    ///
    /// # Panics
    ///
    /// Panics when `frame_index >= frame_count`.
    pub fn find_or_create_per_frame_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        id: u32,
        frame_index: usize,
    ) -> Result<Arc<dyn Buffer>> {
        self.check_frame_index(name, id, frame_index);

        let key = (name.to_string(), id);
        if let Some(buffers) = self.per_frame.get(&key) {
            return Ok(buffers[frame_index].clone());
        }

        let buffers = (0..self.frame_count)
            .map(|_| self.allocate(device))
            .collect::<Result<Vec<_>>>()?;
        engine_debug!(
            "nova3d::UniformBufferManager",
            "Allocated per-frame uniform buffer '{}'[{}] ({} x {} bytes)",
            name,
            id,
            self.frame_count,
            self.buffer_size
        );
        let buffer = buffers[frame_index].clone();
        self.per_frame.insert(key, buffers);
        Ok(buffer)
    }

    /// Buffer of `(name, id)` for `frame_index`, if the set exists
    pub fn find_per_frame_buffer(&self, name: &str, id: u32, frame_index: usize) -> Option<Arc<dyn Buffer>> {
        self.check_frame_index(name, id, frame_index);
        self.per_frame
            .get(&(name.to_string(), id))
            .map(|buffers| buffers[frame_index].clone())
    }

    /// Number of per-frame buffer sets
    pub fn per_frame_set_count(&self) -> usize {
        self.per_frame.len()
    }

    /// Map the per-frame buffer of `(name, id)` for `frame_index`, creating it if needed
    pub fn map_per_frame_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        id: u32,
        frame_index: usize,
    ) -> Result<UniformBufferMapping> {
        let buffer = self.find_or_create_per_frame_buffer(device, name, id, frame_index)?;
        Ok(UniformBufferMapping { buffer })
    }

    /// Forget every per-frame buffer (swapchain recreation)
    ///
    /// The buffers are released once nothing else references them.
    pub fn invalidate_per_frame_buffers(&mut self) {
        engine_debug!(
            "nova3d::UniformBufferManager",
            "Invalidating {} per-frame uniform buffer sets",
            self.per_frame.len()
        );
        self.per_frame.clear();
    }

    // ===== GLOBAL BUFFERS =====

    /// Create global buffer `id` of `name`
    ///
    /// `id` must be the next free id (`global_buffer_count(name)`); asking for an
    /// existing id returns that buffer unchanged.
    pub fn create_global_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        id: u32,
    ) -> Result<Arc<dyn Buffer>> {
        let count = self.global_buffer_count(name);
        if id < count {
            return Ok(self.global[name][id as usize].clone());
        }
        if id > count {
            engine_bail!(
                "nova3d::UniformBufferManager",
                "Global uniform buffer '{}' id {} skips ids (next id is {})",
                name,
                id,
                count
            );
        }

        let buffer = self.allocate(device)?;
        engine_debug!(
            "nova3d::UniformBufferManager",
            "Allocated global uniform buffer '{}'[{}] ({} bytes)",
            name,
            id,
            self.buffer_size
        );
        self.global
            .entry(name.to_string())
            .or_default()
            .push(buffer.clone());
        Ok(buffer)
    }

    /// Global buffer `id` of `name`
    pub fn find_global_buffer(&self, name: &str, id: u32) -> Option<Arc<dyn Buffer>> {
        self.global.get(name).and_then(|b| b.get(id as usize)).cloned()
    }

    /// Number of global buffers created for `name`
    pub fn global_buffer_count(&self, name: &str) -> u32 {
        self.global.get(name).map_or(0, |b| b.len() as u32)
    }

    /// Map global buffer `id` of `name`
    pub fn map_global_buffer(&self, name: &str, id: u32) -> Result<UniformBufferMapping> {
        match self.find_global_buffer(name, id) {
            Some(buffer) => Ok(UniformBufferMapping { buffer }),
            None => engine_bail!(
                "nova3d::UniformBufferManager",
                "Global uniform buffer '{}'[{}] does not exist",
                name,
                id
            ),
        }
    }

    /// Release every buffer (shutdown)
    pub fn free(&mut self) {
        self.per_frame.clear();
        self.global.clear();
    }
}

#[cfg(test)]
#[path = "uniform_buffer_manager_tests.rs"]
mod tests;
