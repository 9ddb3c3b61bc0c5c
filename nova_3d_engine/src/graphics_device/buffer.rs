//! Buffer trait and buffer descriptor

use std::any::Any;
use crate::error::Result;

/// Buffer usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex buffer
    Vertex,
    /// Index buffer
    Index,
    /// Uniform buffer
    Uniform,
    /// Staging source for uploads
    Staging,
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
}

/// Host-visible, host-coherent GPU buffer
///
/// Writes become visible to the GPU without an explicit flush. The buffer is
/// destroyed when the last `Arc` is dropped.
pub trait Buffer: Send + Sync {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Copy `data` into the buffer at `offset`
    ///
    /// Fails when `offset + data.len()` exceeds the buffer size.
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Copy `out.len()` bytes starting at `offset` back to the CPU
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn Any;
}

/// Bounds check shared by backends
pub fn check_buffer_range(size: u64, offset: u64, len: usize) -> bool {
    offset
        .checked_add(len as u64)
        .map_or(false, |end| end <= size)
}
