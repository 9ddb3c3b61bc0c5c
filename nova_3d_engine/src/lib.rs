/*!
# Nova 3D Engine

Backend-agnostic core of the Nova3D renderer.

Rendering goes through trait objects: a backend (Vulkan) implements
`GraphicsDevice` and the GPU object traits, and everything above that layer
only talks to `dyn` interfaces.

## Architecture

- **GraphicsDevice**: factory for buffers, textures, render passes, pipelines,
  binding groups, command lists and the swapchain
- **RenderPassCache / MaterialPipelineCache**: create-once GPU object caches
- **UniformBufferManager**: named global and per-frame uniform buffers
- **RenderGraph**: bakes a `RenderQueue` into ordered physical passes
- **Renderer**: resources, frame-in-flight ring and swapchain lifecycle

Everything public is reached through the [`nova3d`] namespace.
*/

// Internal modules
mod error;
mod engine;
mod log;
mod graphics_device;
mod cache;
mod uniform_buffer;
mod render_graph;
mod renderer;

// Main nova3d namespace module
pub mod nova3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton (logger management)
    pub use crate::engine::Engine;

    // Logging sub-module (types only, the engine_* macros live at the crate root)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
    }

    // Graphics device abstraction
    pub mod render {
        pub use crate::graphics_device::*;
    }

    // GPU object caches
    pub mod cache {
        pub use crate::cache::*;
    }

    // Uniform buffers
    pub mod uniform {
        pub use crate::uniform_buffer::*;
    }

    // Render queue and render graph
    pub mod graph {
        pub use crate::render_graph::*;
    }

    // Renderer and its resources
    pub use crate::renderer::*;
}

// Re-export math library at crate root
pub use glam;
