//! Named uniform buffers: persistent globals and per-frame-in-flight copies

pub mod uniform_buffer_manager;

pub use uniform_buffer_manager::{UniformBufferManager, UniformBufferMapping, UNIFORM_BUFFER_SIZE_CAP};
