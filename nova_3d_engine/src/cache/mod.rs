//! GPU object caches backing the render graph
//!
//! Both caches are owned by the renderer and live for its lifetime. Cached
//! objects are only released by an explicit `free()` at shutdown.

pub mod render_pass_cache;
pub mod pipeline_settings;
pub mod pipeline_cache;

pub use render_pass_cache::{RenderPassCache, RenderPassCookie};
pub use pipeline_settings::PipelineSettings;
pub use pipeline_cache::{MaterialPipelineCache, PipelineCacheInfo, PipelineProgram};
