//! Mock graphics device for unit tests (no GPU required)
//!
//! Every created object and every recorded command is appended to a shared
//! event log so tests can assert on creation counts and command ordering.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::engine_bail;
use crate::graphics_device::{
    check_buffer_range, BindingGroup, BindingGroupLayoutDesc, BindingResource, Buffer,
    BufferDesc, ClearValue, CommandList, CompareOp, DeviceLimits, FrameStatus, Framebuffer,
    FramebufferDesc, GraphicsDevice, ImageLayout, IndexType, Pipeline, PipelineDesc, Rect2D,
    ReflectedBinding, RenderPass, RenderPassDesc, RenderTarget, RenderTargetDesc, Sampler,
    SamplerDesc, Shader, ShaderDesc, ShaderStage, ShaderStageFlags, Swapchain, Texture,
    TextureDesc, TextureFormat, TextureInfo, TextureUsage, Viewport, MAX_FRAMES_IN_FLIGHT,
};

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the mock device and the objects it creates
#[derive(Debug, Default)]
pub struct MockState {
    /// Ordered log of device calls and recorded commands
    pub events: Vec<String>,
    pub buffers_created: u32,
    pub render_passes_created: u32,
    pub framebuffers_created: u32,
    pub pipelines_created: u32,
    pub binding_groups_created: u32,
    /// Statuses returned by the next acquire calls (Success when empty)
    pub acquire_results: VecDeque<FrameStatus>,
    /// Statuses returned by the next present calls (Success when empty)
    pub present_results: VecDeque<FrameStatus>,
    /// Surface size reported to swapchain recreation, if it differs from the request
    pub surface_size: Option<(u32, u32)>,
    /// Draw calls fail while set
    pub fail_draws: bool,
}

impl MockState {
    /// Events that start with `prefix`
    pub fn events_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events.iter().filter(|e| e.starts_with(prefix)).cloned().collect()
    }

    /// Index of the first event equal to `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.iter().position(|e| e == event)
    }
}

pub type SharedMockState = Arc<Mutex<MockState>>;

fn push_event(state: &SharedMockState, event: String) {
    state.lock().unwrap().events.push(event);
}

// ============================================================================
// Mock resources
// ============================================================================

pub struct MockBuffer {
    pub usage_name: String,
    data: Mutex<Vec<u8>>,
    /// Event log for writes, set when created through the device
    state: Option<SharedMockState>,
}

impl MockBuffer {
    pub fn new(size: u64, usage_name: String) -> Self {
        Self {
            usage_name,
            data: Mutex::new(vec![0; size as usize]),
            state: None,
        }
    }
}

impl Buffer for MockBuffer {
    fn size(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut bytes = self.data.lock().unwrap();
        if !check_buffer_range(bytes.len() as u64, offset, data.len()) {
            engine_bail!("nova3d::mock", "write of {} bytes at {} overflows buffer", data.len(), offset);
        }
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        if let Some(state) = &self.state {
            push_event(state, format!("update_buffer {} offset={} size={}", self.usage_name, offset, data.len()));
        }
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let bytes = self.data.lock().unwrap();
        if !check_buffer_range(bytes.len() as u64, offset, out.len()) {
            engine_bail!("nova3d::mock", "read of {} bytes at {} overflows buffer", out.len(), offset);
        }
        let start = offset as usize;
        out.copy_from_slice(&bytes[start..start + out.len()]);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockTexture {
    pub info: TextureInfo,
}

impl Texture for MockTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockSampler;

impl Sampler for MockSampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockRenderTarget {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl RenderTarget for MockRenderTarget {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Name of a mock render target ("?" for foreign types)
pub fn target_name(target: &Arc<dyn RenderTarget>) -> String {
    target
        .as_any()
        .downcast_ref::<MockRenderTarget>()
        .map(|t| t.name.clone())
        .unwrap_or_else(|| "?".to_string())
}

pub struct MockShader {
    pub stage: ShaderStage,
    pub reflected: Vec<ReflectedBinding>,
}

impl Shader for MockShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn reflected_bindings(&self) -> &[ReflectedBinding] {
        &self.reflected
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockRenderPass {
    pub id: u32,
    pub desc: RenderPassDesc,
}

impl RenderPass for MockRenderPass {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockFramebuffer {
    pub width: u32,
    pub height: u32,
    pub attachments: Vec<String>,
}

impl Framebuffer for MockFramebuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockPipeline {
    pub id: u32,
    pub render_pass_id: u32,
    pub depth_compare_op: CompareOp,
    pub blend_enable: bool,
    pub set_count: usize,
}

impl Pipeline for MockPipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Id of a mock pipeline (u32::MAX for foreign types)
pub fn pipeline_id(pipeline: &Arc<dyn Pipeline>) -> u32 {
    pipeline
        .as_any()
        .downcast_ref::<MockPipeline>()
        .map_or(u32::MAX, |p| p.id)
}

pub struct MockBindingGroup {
    pub id: u32,
    pub resource_count: usize,
}

impl BindingGroup for MockBindingGroup {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock command list
// ============================================================================

pub struct MockCommandList {
    pub id: u32,
    pub commands: Vec<String>,
    state: SharedMockState,
    recording: bool,
    in_render_pass: bool,
}

impl MockCommandList {
    fn record(&mut self, command: String) {
        push_event(&self.state, format!("cmd{}:{}", self.id, command));
        self.commands.push(command);
    }

    fn require_recording(&self) -> Result<()> {
        if !self.recording {
            engine_bail!("nova3d::mock", "command list {} is not recording", self.id);
        }
        Ok(())
    }
}

impl CommandList for MockCommandList {
    fn begin(&mut self) -> Result<()> {
        self.commands.clear();
        self.recording = true;
        self.record("begin".to_string());
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.require_recording()?;
        if self.in_render_pass {
            engine_bail!("nova3d::mock", "end() inside a render pass");
        }
        self.recording = false;
        self.record("end".to_string());
        Ok(())
    }

    fn clear_render_target(
        &mut self,
        target: &Arc<dyn RenderTarget>,
        old_layout: ImageLayout,
        value: ClearValue,
    ) -> Result<()> {
        self.require_recording()?;
        self.record(format!("clear {} from {:?} {:?}", target_name(target), old_layout, value));
        Ok(())
    }

    fn transition_render_target(
        &mut self,
        target: &Arc<dyn RenderTarget>,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Result<()> {
        self.require_recording()?;
        self.record(format!("transition {} {:?}->{:?}", target_name(target), old_layout, new_layout));
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<dyn RenderPass>,
        _framebuffer: &Arc<dyn Framebuffer>,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        self.require_recording()?;
        let id = render_pass
            .as_any()
            .downcast_ref::<MockRenderPass>()
            .map_or(u32::MAX, |p| p.id);
        self.in_render_pass = true;
        self.record(format!("begin_render_pass {} clears={}", id, clear_values.len()));
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nova3d::mock", "end_render_pass() without begin");
        }
        self.in_render_pass = false;
        self.record("end_render_pass".to_string());
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.record(format!("set_viewport {}x{}", viewport.width, viewport.height));
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.record(format!("set_scissor {}x{}", scissor.width, scissor.height));
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) -> Result<()> {
        self.record(format!("bind_pipeline {}", pipeline_id(pipeline)));
        Ok(())
    }

    fn bind_binding_group(
        &mut self,
        _pipeline: &Arc<dyn Pipeline>,
        set_index: u32,
        binding_group: &Arc<dyn BindingGroup>,
    ) -> Result<()> {
        let id = binding_group
            .as_any()
            .downcast_ref::<MockBindingGroup>()
            .map_or(u32::MAX, |g| g.id);
        self.record(format!("bind_binding_group set={} group={}", set_index, id));
        Ok(())
    }

    fn push_constants(
        &mut self,
        _pipeline: &Arc<dyn Pipeline>,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        self.record(format!("push_constants {:?} offset={} size={}", stages, offset, data.len()));
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, _buffer: &Arc<dyn Buffer>, offset: u64) -> Result<()> {
        self.record(format!("bind_vertex_buffer offset={}", offset));
        Ok(())
    }

    fn bind_index_buffer(&mut self, _buffer: &Arc<dyn Buffer>, offset: u64, index_type: IndexType) -> Result<()> {
        self.record(format!("bind_index_buffer offset={} {:?}", offset, index_type));
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nova3d::mock", "draw outside a render pass");
        }
        if self.state.lock().unwrap().fail_draws {
            engine_bail!("nova3d::mock", "draw failed");
        }
        self.record(format!("draw {} {}", vertex_count, first_vertex));
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nova3d::mock", "draw_indexed outside a render pass");
        }
        if self.state.lock().unwrap().fail_draws {
            engine_bail!("nova3d::mock", "draw_indexed failed");
        }
        self.record(format!("draw_indexed {} {} {}", index_count, first_index, vertex_offset));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock swapchain
// ============================================================================

pub struct MockSwapchain {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    images: Vec<Arc<dyn RenderTarget>>,
    next_image: u32,
    state: SharedMockState,
}

impl MockSwapchain {
    fn build_images(width: u32, height: u32, format: TextureFormat, count: usize) -> Vec<Arc<dyn RenderTarget>> {
        (0..count)
            .map(|i| {
                Arc::new(MockRenderTarget {
                    name: format!("swapchain{}", i),
                    width,
                    height,
                    format,
                }) as Arc<dyn RenderTarget>
            })
            .collect()
    }
}

impl Swapchain for MockSwapchain {
    fn acquire_next_image(&mut self, frame_slot: usize) -> Result<(u32, FrameStatus)> {
        let status = self.state.lock().unwrap().acquire_results.pop_front().unwrap_or(FrameStatus::Success);
        let index = self.next_image;
        push_event(&self.state, format!("acquire slot={} image={} {:?}", frame_slot, index, status));
        if status != FrameStatus::OutOfDate {
            self.next_image = (self.next_image + 1) % self.images.len() as u32;
        }
        Ok((index, status))
    }

    fn present(&mut self, image_index: u32) -> Result<FrameStatus> {
        let status = self.state.lock().unwrap().present_results.pop_front().unwrap_or(FrameStatus::Success);
        push_event(&self.state, format!("present image={} {:?}", image_index, status));
        Ok(status)
    }

    fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        let (width, height) = self.state.lock().unwrap().surface_size.unwrap_or((width, height));
        self.width = width;
        self.height = height;
        self.images = Self::build_images(width, height, self.format, self.images.len());
        self.next_image = 0;
        push_event(&self.state, format!("recreate_swapchain {}x{}", width, height));
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn render_target(&self, image_index: u32) -> Arc<dyn RenderTarget> {
        self.images[image_index as usize].clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock graphics device
// ============================================================================

pub struct MockGraphicsDevice {
    state: SharedMockState,
    limits: DeviceLimits,
    next_id: u32,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits {
            max_uniform_buffer_range: 65536,
            min_uniform_buffer_offset_alignment: 256,
        })
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            limits,
            next_id: 0,
        }
    }

    /// Handle on the shared state (stays valid after the device is boxed)
    pub fn state(&self) -> SharedMockState {
        self.state.clone()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn event(&self, event: String) {
        push_event(&self.state, event);
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<dyn Buffer>> {
        self.state.lock().unwrap().buffers_created += 1;
        self.event(format!("create_buffer {:?} {}", desc.usage, desc.size));
        let mut buffer = MockBuffer::new(desc.size, format!("{:?}", desc.usage));
        buffer.state = Some(self.state.clone());
        Ok(Arc::new(buffer))
    }

    fn create_texture(&mut self, desc: TextureDesc) -> Result<Arc<dyn Texture>> {
        if let Some(data) = &desc.data {
            let expected = (desc.width * desc.height * desc.format.bytes_per_pixel()) as usize;
            if data.len() != expected {
                engine_bail!("nova3d::mock", "texture data is {} bytes, expected {}", data.len(), expected);
            }
        }
        self.event(format!("create_texture {}x{}", desc.width, desc.height));
        Ok(Arc::new(MockTexture {
            info: TextureInfo {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                usage: TextureUsage::Sampled,
            },
        }))
    }

    fn create_sampler(&mut self, _desc: SamplerDesc) -> Result<Arc<dyn Sampler>> {
        self.event("create_sampler".to_string());
        Ok(Arc::new(MockSampler))
    }

    fn create_render_target(&mut self, desc: RenderTargetDesc) -> Result<Arc<dyn RenderTarget>> {
        self.event(format!("create_render_target {}x{} {:?}", desc.width, desc.height, desc.format));
        Ok(Arc::new(MockRenderTarget {
            name: if desc.format.is_depth() { "depth".to_string() } else { "offscreen".to_string() },
            width: desc.width,
            height: desc.height,
            format: desc.format,
        }))
    }

    fn create_shader(&mut self, desc: ShaderDesc) -> Result<Arc<dyn Shader>> {
        if desc.code.len() % 4 != 0 {
            engine_bail!("nova3d::mock", "shader code not 4-byte aligned");
        }
        self.event(format!("create_shader {:?}", desc.stage));
        Ok(Arc::new(MockShader { stage: desc.stage, reflected: Vec::new() }))
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<Arc<dyn RenderPass>> {
        let id = self.next_id();
        self.state.lock().unwrap().render_passes_created += 1;
        self.event(format!("create_render_pass {}", id));
        Ok(Arc::new(MockRenderPass { id, desc: desc.clone() }))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>> {
        self.state.lock().unwrap().framebuffers_created += 1;
        let mut attachments: Vec<String> = desc.color_attachments.iter().map(target_name).collect();
        if let Some(depth) = &desc.depth_stencil_attachment {
            attachments.push(target_name(depth));
        }
        self.event(format!("create_framebuffer {}x{} [{}]", desc.width, desc.height, attachments.join(",")));
        Ok(Arc::new(MockFramebuffer {
            width: desc.width,
            height: desc.height,
            attachments,
        }))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<Arc<dyn Pipeline>> {
        let id = self.next_id();
        let render_pass_id = desc
            .render_pass
            .as_any()
            .downcast_ref::<MockRenderPass>()
            .map_or(u32::MAX, |p| p.id);
        self.state.lock().unwrap().pipelines_created += 1;
        self.event(format!("create_pipeline {} pass={}", id, render_pass_id));
        Ok(Arc::new(MockPipeline {
            id,
            render_pass_id,
            depth_compare_op: desc.depth_stencil.depth_compare_op,
            blend_enable: desc.color_blend.blend_enable,
            set_count: desc.binding_group_layouts.len(),
        }))
    }

    fn create_binding_group(
        &mut self,
        layout: &BindingGroupLayoutDesc,
        resources: &[BindingResource],
    ) -> Result<Arc<dyn BindingGroup>> {
        if layout.entries.len() != resources.len() {
            engine_bail!(
                "nova3d::mock",
                "binding group has {} resources for {} layout entries",
                resources.len(),
                layout.entries.len()
            );
        }
        let id = self.next_id();
        self.state.lock().unwrap().binding_groups_created += 1;
        self.event(format!("create_binding_group {}", id));
        Ok(Arc::new(MockBindingGroup { id, resource_count: resources.len() }))
    }

    fn create_command_list(&mut self) -> Result<Box<dyn CommandList>> {
        let id = self.next_id();
        self.event(format!("create_command_list {}", id));
        Ok(Box::new(MockCommandList {
            id,
            commands: Vec::new(),
            state: self.state.clone(),
            recording: false,
            in_render_pass: false,
        }))
    }

    fn create_swapchain(&mut self, width: u32, height: u32) -> Result<Box<dyn Swapchain>> {
        self.event(format!("create_swapchain {}x{}", width, height));
        let format = TextureFormat::B8G8R8A8_SRGB;
        Ok(Box::new(MockSwapchain {
            width,
            height,
            format,
            images: MockSwapchain::build_images(width, height, format, 3),
            next_image: 0,
            state: self.state.clone(),
        }))
    }

    fn wait_for_frame(&mut self, frame_slot: usize) -> Result<()> {
        if frame_slot >= MAX_FRAMES_IN_FLIGHT {
            engine_bail!("nova3d::mock", "frame slot {} out of range", frame_slot);
        }
        self.event(format!("wait_for_frame {}", frame_slot));
        Ok(())
    }

    fn submit_frame(
        &mut self,
        frame_slot: usize,
        commands: &dyn CommandList,
        _swapchain: &dyn Swapchain,
        image_index: u32,
    ) -> Result<()> {
        let id = commands
            .as_any()
            .downcast_ref::<MockCommandList>()
            .map_or(u32::MAX, |c| c.id);
        self.event(format!("submit slot={} cmd={} image={}", frame_slot, id, image_index));
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.event("wait_idle".to_string());
        Ok(())
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
