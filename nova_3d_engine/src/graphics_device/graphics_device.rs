//! GraphicsDevice trait - factory for GPU objects and frame submission
//!
//! Backends (Vulkan) implement this trait; the renderer, caches and render
//! graph only ever talk to `dyn GraphicsDevice`.

use std::sync::Arc;
use crate::error::Result;
use crate::graphics_device::{
    Buffer, BufferDesc, Texture, TextureDesc, Sampler, SamplerDesc,
    RenderTarget, RenderTargetDesc, Shader, ShaderDesc,
    RenderPass, RenderPassDesc, Framebuffer, FramebufferDesc,
    Pipeline, PipelineDesc, BindingGroup, BindingGroupLayoutDesc, BindingResource,
    CommandList, Swapchain,
};

/// Number of frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

// ============================================================================
// Configuration
// ============================================================================

/// Which validation messages are displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    /// Errors only
    ErrorsOnly,
    /// Errors and warnings
    ErrorsAndWarnings,
    /// Everything, including info and verbose
    All,
}

/// Where validation messages are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugOutput {
    /// Engine logger
    Console,
    /// Append to a file
    File(String),
    /// Logger and file
    Both(String),
}

/// Validation message categories to display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugMessageFilter {
    pub show_general: bool,
    pub show_validation: bool,
    pub show_performance: bool,
}

impl Default for DebugMessageFilter {
    fn default() -> Self {
        Self {
            show_general: true,
            show_validation: true,
            show_performance: true,
        }
    }
}

/// Validation message counters (filled when `enable_validation_stats` is set)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
    pub info: u32,
    pub verbose: u32,
}

impl ValidationStats {
    /// Sum of all counters
    pub fn total(&self) -> u32 {
        self.errors + self.warnings + self.info + self.verbose
    }
}

/// Graphics device configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Enable validation layers (requires the backend's validation feature)
    pub enable_validation: bool,
    /// Application name reported to the driver
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Wait for vertical blank when presenting
    pub vsync: bool,
    /// Validation severity filter
    pub debug_severity: DebugSeverity,
    /// Validation output target
    pub debug_output: DebugOutput,
    /// Validation category filter
    pub debug_message_filter: DebugMessageFilter,
    /// Abort the process on the first validation error
    pub break_on_validation_error: bool,
    /// Panic on the first validation error
    pub panic_on_error: bool,
    /// Count validation messages per severity
    pub enable_validation_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            app_name: "Nova3D Application".to_string(),
            app_version: (1, 0, 0),
            vsync: true,
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            debug_output: DebugOutput::Console,
            debug_message_filter: DebugMessageFilter::default(),
            break_on_validation_error: false,
            panic_on_error: false,
            enable_validation_stats: false,
        }
    }
}

/// Device limits the core needs to size and align uniform data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest range bindable as one uniform buffer
    pub max_uniform_buffer_range: u64,
    /// Required alignment of uniform buffer binding offsets
    pub min_uniform_buffer_offset_alignment: u64,
}

// ============================================================================
// GraphicsDevice trait
// ============================================================================

/// GPU object factory plus frame submission
///
/// Frame slots are indices in `0..MAX_FRAMES_IN_FLIGHT`. Each slot owns one
/// in-flight fence on the backend side.
pub trait GraphicsDevice: Send + Sync {
    /// Device limits
    fn limits(&self) -> DeviceLimits;

    /// Create a host-visible buffer
    fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Create a sampled texture, uploading `desc.data` when present
    fn create_texture(&mut self, desc: TextureDesc) -> Result<Arc<dyn Texture>>;

    /// Create a sampler
    fn create_sampler(&mut self, desc: SamplerDesc) -> Result<Arc<dyn Sampler>>;

    /// Create an offscreen attachment (the depth image)
    fn create_render_target(&mut self, desc: RenderTargetDesc) -> Result<Arc<dyn RenderTarget>>;

    /// Create a shader module
    fn create_shader(&mut self, desc: ShaderDesc) -> Result<Arc<dyn Shader>>;

    /// Create a render pass (callers go through `RenderPassCache`)
    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<Arc<dyn RenderPass>>;

    /// Create a framebuffer
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>>;

    /// Create a graphics pipeline (callers go through `MaterialPipelineCache`)
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<Arc<dyn Pipeline>>;

    /// Create a binding group (descriptor set) for `layout`
    fn create_binding_group(
        &mut self,
        layout: &BindingGroupLayoutDesc,
        resources: &[BindingResource],
    ) -> Result<Arc<dyn BindingGroup>>;

    /// Create a primary command list
    fn create_command_list(&mut self) -> Result<Box<dyn CommandList>>;

    /// Create the presentation swapchain for the device's surface
    fn create_swapchain(&mut self, width: u32, height: u32) -> Result<Box<dyn Swapchain>>;

    /// Block until the GPU finished the last submission made for `frame_slot`
    fn wait_for_frame(&mut self, frame_slot: usize) -> Result<()>;

    /// Submit `commands` for `frame_slot`
    ///
    /// Waits on the swapchain's image-available semaphore for the slot, signals
    /// the render-finished semaphore of `image_index` and the slot's fence.
    fn submit_frame(
        &mut self,
        frame_slot: usize,
        commands: &dyn CommandList,
        swapchain: &dyn Swapchain,
        image_index: u32,
    ) -> Result<()>;

    /// Block until the device is idle
    fn wait_idle(&self) -> Result<()>;
}
