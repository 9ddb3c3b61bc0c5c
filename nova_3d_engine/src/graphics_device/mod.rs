//! Graphics device module - backend-agnostic GPU object traits and descriptors

pub mod graphics_device;
pub mod buffer;
pub mod texture;
pub mod sampler;
pub mod render_target;
pub mod shader;
pub mod render_pass;
pub mod frame_buffer;
pub mod pipeline;
pub mod binding_group;
pub mod command_list;
pub mod swapchain;

pub use graphics_device::*;
pub use buffer::*;
pub use texture::*;
pub use sampler::*;
pub use render_target::*;
pub use shader::*;
pub use render_pass::*;
pub use frame_buffer::*;
pub use pipeline::*;
pub use binding_group::*;
pub use command_list::*;
pub use swapchain::*;

// Mock graphics device for tests (no GPU required)
#[cfg(test)]
pub mod mock_graphics_device;
