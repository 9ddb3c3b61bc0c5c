/*!
# Nova 3D Engine - Vulkan Backend

Vulkan implementation of the `nova3d::render` traits, built on `ash` for the
API bindings and `gpu-allocator` for memory.

```no_run
use nova_3d_engine::nova3d::render::Config;
use nova_3d_engine_renderer_vulkan::nova3d::VulkanGraphicsDevice;
# fn run(window: &winit::window::Window) -> nova_3d_engine::nova3d::Result<()> {
let device = VulkanGraphicsDevice::from_window(window, Config::default())?;
# Ok(())
# }
```

Validation layer support (debug messenger, message routing and statistics)
is compiled in only with the `vulkan-validation` feature.
*/

mod vulkan;
mod vulkan_context;
mod vulkan_buffer;
mod vulkan_texture;
mod vulkan_sampler;
mod vulkan_render_target;
mod vulkan_shader;
mod vulkan_render_pass;
mod vulkan_frame_buffer;
mod vulkan_pipeline;
mod vulkan_binding_group;
mod vulkan_command_list;
mod vulkan_swapchain;
mod vulkan_format;

#[cfg(feature = "vulkan-validation")]
mod debug;

pub mod nova3d {
    pub use crate::vulkan::VulkanGraphicsDevice;

    #[cfg(feature = "vulkan-validation")]
    pub use crate::debug::{print_validation_stats_report, validation_stats};
}
