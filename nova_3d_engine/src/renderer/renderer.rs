/// Renderer - frame orchestration over a GraphicsDevice
///
/// Owns the swapchain, the depth target, the frame-in-flight ring, both
/// caches, the uniform buffer manager and every mesh, texture, shader and
/// shader-material created through it. All calls come from one thread.
///
/// Frame lifecycle:
///
/// ```text
/// begin_frame -> draw_render_queue -> end_frame
///      |                                  |
///      +-- OutOfDate --> recreate_swapchain <-- OutOfDate / SubOptimal
/// ```

use std::mem::size_of;
use std::sync::Arc;
use glam::Mat4;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use crate::error::{Error, Result};
use crate::{engine_bail_warn, engine_debug, engine_err, engine_error, engine_info, engine_warn};
use crate::cache::{MaterialPipelineCache, PipelineCacheInfo, PipelineProgram, PipelineSettings, RenderPassCache};
use crate::graphics_device::{
    AttachmentDesc, BindingGroup, BindingResource, BufferDesc, BufferUsage, CommandList, FrameStatus,
    GraphicsDevice, ImageLayout, IndexType, LoadOp, RenderPassDesc, RenderTarget, RenderTargetDesc,
    SampleCount, Sampler, SamplerDesc, ShaderDesc, ShaderStage, ShaderStageFlags, StoreOp, Swapchain,
    Texture, TextureDesc, TextureFormat, Viewport, MAX_FRAMES_IN_FLIGHT,
};
use crate::render_graph::{
    BakeContext, MaterialResolver, PhysicalPass, PhysicalTargets, RenderGraph, RenderQueue,
    ResolvedMaterial, FINAL_COLOR,
};
use crate::renderer::frame::{
    FramePhase, FrameSlot, FrameUniforms, ViewUniforms, FRAME_UNIFORMS_NAME, VIEW_UNIFORMS_NAME,
};
use crate::renderer::resources::{
    engine_binding_layout, material_binding_layout, model_push_constant_range, MaterialBlockLocation,
    Mesh, MeshDesc, ShaderMaterial, ShaderMaterialDesc, ShaderProgram, ShaderProgramDesc,
    TextureResource, ENGINE_SET, MATERIAL_SET,
};
use crate::renderer::{
    MaterialBlockLayout, MaterialValue, MeshHandle, ShaderHandle, ShaderMaterialHandle, TextureHandle,
};
use crate::uniform_buffer::UniformBufferManager;

/// Global uniform buffers holding every shader-material block
pub const MATERIAL_BUFFER_NAME: &str = "material";

/// Format of the persistent depth target
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::D32_FLOAT;

/// Returns the current drawable size; may block until it is nonzero
pub type WindowSizeCallback = Box<dyn Fn() -> (u32, u32) + Send + Sync>;

// ============================================================================
// Configuration and statistics
// ============================================================================

/// Renderer creation parameters
pub struct RendererDesc {
    pub width: u32,
    pub height: u32,
    /// Polled by `recreate_swapchain`; `None` uses the last `resize` size
    pub window_size: Option<WindowSizeCallback>,
}

impl RendererDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            window_size: None,
        }
    }

    pub fn with_window_size(mut self, query: impl Fn() -> (u32, u32) + Send + Sync + 'static) -> Self {
        self.window_size = Some(Box::new(query));
        self
    }
}

/// Renderer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    /// Number of draw calls this frame
    pub draw_calls: u32,
    /// Number of triangles drawn this frame
    pub triangles: u32,
    /// Physical passes recorded this frame
    pub physical_passes: u32,
    /// Draw items skipped this frame (missing mesh or shader-material)
    pub skipped_items: u32,
    /// Pipelines alive in the pipeline cache
    pub cached_pipelines: u32,
    /// Render passes alive in the render pass cache
    pub cached_render_passes: u32,
}

// ============================================================================
// Material lookup for the bake
// ============================================================================

struct MaterialTable<'a> {
    materials: &'a SlotMap<ShaderMaterialHandle, ShaderMaterial>,
    shaders: &'a SlotMap<ShaderHandle, Arc<ShaderProgram>>,
}

impl MaterialResolver for MaterialTable<'_> {
    fn resolve(&self, material: ShaderMaterialHandle, shader: ShaderHandle) -> Option<ResolvedMaterial<'_>> {
        let material = self.materials.get(material)?;
        if material.shader != shader {
            return None;
        }
        let program = self.shaders.get(shader)?;
        Some(ResolvedMaterial {
            program: &program.program,
            settings: material.settings,
        })
    }
}

// ============================================================================
// Command recording
// ============================================================================

/// Records the baked passes of one frame into its command list
struct FrameRecorder<'a> {
    queue: &'a RenderQueue,
    view_groups: &'a [Arc<dyn BindingGroup>],
    meshes: &'a SlotMap<MeshHandle, Mesh>,
    materials: &'a SlotMap<ShaderMaterialHandle, ShaderMaterial>,
    stats: &'a mut RendererStats,
    /// Set between begin_render_pass and end_render_pass
    in_render_pass: bool,
}

impl FrameRecorder<'_> {
    fn record(
        &mut self,
        commands: &mut dyn CommandList,
        passes: &[PhysicalPass],
        bound_groups: &mut Vec<Arc<dyn BindingGroup>>,
    ) -> Result<()> {
        bound_groups.extend(self.view_groups.iter().cloned());

        for pass in passes {
            for clear in &pass.clears {
                commands.clear_render_target(&clear.target, clear.old_layout, clear.value)?;
            }
            let Some(physical) = &pass.render_pass else {
                continue;
            };

            commands.begin_render_pass(&physical.render_pass, &physical.framebuffer, &physical.clear_values)?;
            self.in_render_pass = true;
            let viewport = self.queue.view_blocks[pass.view_index]
                .viewport
                .unwrap_or_else(|| Viewport::from_extent(physical.width, physical.height));
            commands.set_viewport(viewport)?;
            commands.set_scissor(viewport.scissor())?;

            for batch in pass.ranges.iter().flat_map(|r| r.batches.iter()) {
                let Some(material) = self.materials.get(batch.shader_material) else {
                    continue;
                };
                commands.bind_pipeline(&batch.pipeline)?;
                commands.bind_binding_group(&batch.pipeline, ENGINE_SET, &self.view_groups[pass.view_index])?;
                commands.bind_binding_group(&batch.pipeline, MATERIAL_SET, &material.binding_group)?;
                bound_groups.push(material.binding_group.clone());

                for item in &pass.items[batch.first_item..batch.first_item + batch.item_count] {
                    let Some(mesh) = self.meshes.get(item.mesh) else {
                        engine_debug!("nova3d::Renderer", "Skipping draw item: mesh {:?} does not exist", item.mesh);
                        self.stats.skipped_items += 1;
                        continue;
                    };
                    commands.push_constants(
                        &batch.pipeline,
                        ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::bytes_of(&item.transform),
                    )?;
                    commands.bind_vertex_buffer(&mesh.vertex_buffer, 0)?;
                    match &mesh.index_buffer {
                        Some((buffer, count)) => {
                            commands.bind_index_buffer(buffer, 0, IndexType::U32)?;
                            commands.draw_indexed(*count, 0, 0)?;
                        }
                        None => commands.draw(mesh.vertex_count, 0)?,
                    }
                    self.stats.draw_calls += 1;
                    self.stats.triangles += mesh.element_count() / 3;
                }
            }

            commands.end_render_pass()?;
            self.in_render_pass = false;
            self.stats.physical_passes += 1;
            self.stats.skipped_items += (pass.items.len() - pass.drawn_item_count()) as u32;
        }
        Ok(())
    }
}

// ============================================================================
// Renderer
// ============================================================================

pub struct Renderer {
    device: Box<dyn GraphicsDevice>,
    swapchain: Option<Box<dyn Swapchain>>,
    depth: Option<Arc<dyn RenderTarget>>,
    frames: Vec<FrameSlot>,
    current_slot: usize,
    phase: FramePhase,
    frame_counter: u64,

    width: u32,
    height: u32,
    window_size: Option<WindowSizeCallback>,
    swapchain_stale: bool,

    render_passes: RenderPassCache,
    pipelines: MaterialPipelineCache,
    uniform_buffers: UniformBufferManager,
    /// First free byte of the newest "material" buffer
    material_cursor: u64,
    /// Blocks released by destroyed shader-materials
    free_material_blocks: Vec<MaterialBlockLocation>,
    /// Set 0 groups by (frame block, view, frame slot)
    engine_groups: FxHashMap<(usize, usize, usize), Arc<dyn BindingGroup>>,

    default_sampler: Arc<dyn Sampler>,
    fallback_texture: Arc<dyn Texture>,
    meshes: SlotMap<MeshHandle, Mesh>,
    textures: SlotMap<TextureHandle, TextureResource>,
    shaders: SlotMap<ShaderHandle, Arc<ShaderProgram>>,
    materials: SlotMap<ShaderMaterialHandle, ShaderMaterial>,

    stats: RendererStats,
    shut_down: bool,
}

impl Renderer {
    /// Create the swapchain, depth target, frame ring and engine defaults
    pub fn new(mut device: Box<dyn GraphicsDevice>, desc: RendererDesc) -> Result<Self> {
        if desc.width == 0 || desc.height == 0 {
            engine_error!("nova3d::Renderer", "Cannot initialize with a {}x{} surface", desc.width, desc.height);
            return Err(Error::InitializationFailed(format!(
                "invalid surface size {}x{}",
                desc.width, desc.height
            )));
        }

        let swapchain = device.create_swapchain(desc.width, desc.height)?;
        let (width, height) = (swapchain.width(), swapchain.height());
        let depth = Self::create_depth_target(&mut *device, width, height)?;
        let frames = Self::create_frames(&mut *device)?;
        let default_sampler = device.create_sampler(SamplerDesc::default())?;
        let fallback_texture = device.create_texture(TextureDesc {
            width: 1,
            height: 1,
            format: TextureFormat::R8G8B8A8_UNORM,
            data: Some(vec![255; 4]),
        })?;
        let uniform_buffers = UniformBufferManager::from_limits(MAX_FRAMES_IN_FLIGHT, &device.limits());

        engine_info!(
            "nova3d::Renderer",
            "Renderer initialized: {}x{} {:?}, {} swapchain images, {} frames in flight",
            width,
            height,
            swapchain.format(),
            swapchain.image_count(),
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            device,
            swapchain: Some(swapchain),
            depth: Some(depth),
            frames,
            current_slot: 0,
            phase: FramePhase::Idle,
            frame_counter: 0,
            width,
            height,
            window_size: desc.window_size,
            swapchain_stale: false,
            render_passes: RenderPassCache::new(),
            pipelines: MaterialPipelineCache::new(),
            uniform_buffers,
            material_cursor: 0,
            free_material_blocks: Vec::new(),
            engine_groups: FxHashMap::default(),
            default_sampler,
            fallback_texture,
            meshes: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            stats: RendererStats::default(),
            shut_down: false,
        })
    }

    fn create_depth_target(device: &mut dyn GraphicsDevice, width: u32, height: u32) -> Result<Arc<dyn RenderTarget>> {
        device.create_render_target(RenderTargetDesc {
            width,
            height,
            format: DEPTH_FORMAT,
        })
    }

    fn create_frames(device: &mut dyn GraphicsDevice) -> Result<Vec<FrameSlot>> {
        (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Ok(FrameSlot::new(device.create_command_list()?)))
            .collect()
    }

    fn invalid_state(message: &str) -> Error {
        engine_warn!("nova3d::Renderer", "{}", message);
        Error::InvalidState(message.to_string())
    }

    fn check_alive(&self) -> Result<()> {
        if self.shut_down {
            return Err(Self::invalid_state("renderer has been shut down"));
        }
        Ok(())
    }

    fn swapchain_mut(&mut self) -> Result<&mut (dyn Swapchain + 'static)> {
        self.swapchain
            .as_deref_mut()
            .ok_or_else(|| Self::invalid_state("renderer has no swapchain"))
    }

    // ===== MESHES =====

    /// Upload vertex (and index) data to host-visible buffers
    pub fn create_mesh(&mut self, desc: MeshDesc) -> Result<MeshHandle> {
        self.check_alive()?;
        if desc.vertex_stride == 0 || desc.vertices.is_empty() || desc.vertices.len() % desc.vertex_stride as usize != 0 {
            engine_bail_warn!(
                "nova3d::Renderer",
                "Mesh has {} vertex bytes, not a nonzero multiple of stride {}",
                desc.vertices.len(),
                desc.vertex_stride
            );
        }
        if desc.indices.as_ref().is_some_and(|i| i.is_empty()) {
            engine_bail_warn!("nova3d::Renderer", "Mesh index list is empty");
        }

        let vertex_buffer = self.device.create_buffer(BufferDesc {
            size: desc.vertices.len() as u64,
            usage: BufferUsage::Vertex,
        })?;
        vertex_buffer.update(0, &desc.vertices)?;

        let index_buffer = match &desc.indices {
            Some(indices) => {
                let bytes: &[u8] = bytemuck::cast_slice(indices.as_slice());
                let buffer = self.device.create_buffer(BufferDesc {
                    size: bytes.len() as u64,
                    usage: BufferUsage::Index,
                })?;
                buffer.update(0, bytes)?;
                Some((buffer, indices.len() as u32))
            }
            None => None,
        };

        Ok(self.meshes.insert(Mesh {
            vertex_buffer,
            vertex_count: desc.vertices.len() as u32 / desc.vertex_stride,
            index_buffer,
        }))
    }

    pub fn destroy_mesh(&mut self, handle: MeshHandle) -> Result<()> {
        if !self.meshes.contains_key(handle) {
            engine_bail_warn!("nova3d::Renderer", "destroy_mesh: mesh {:?} does not exist", handle);
        }
        self.device.wait_idle()?;
        self.meshes.remove(handle);
        Ok(())
    }

    // ===== TEXTURES =====

    /// Upload a sampled texture; `sampler` defaults to linear filtering + repeat
    pub fn create_texture(&mut self, desc: TextureDesc, sampler: Option<SamplerDesc>) -> Result<TextureHandle> {
        self.check_alive()?;
        let texture = self.device.create_texture(desc)?;
        let sampler = match sampler {
            Some(sampler) => self.device.create_sampler(sampler)?,
            None => self.default_sampler.clone(),
        };
        Ok(self.textures.insert(TextureResource { texture, sampler }))
    }

    /// Destroy a texture
    ///
    /// Shader-materials already bound to it keep the GPU image alive until
    /// they are destroyed or rebound.
    pub fn destroy_texture(&mut self, handle: TextureHandle) -> Result<()> {
        if !self.textures.contains_key(handle) {
            engine_bail_warn!("nova3d::Renderer", "destroy_texture: texture {:?} does not exist", handle);
        }
        self.device.wait_idle()?;
        self.textures.remove(handle);
        Ok(())
    }

    // ===== SHADERS =====

    /// Create both shader stages and the program's pipeline interface
    ///
    /// # Panics
    ///
    /// Panics when two material fields or two texture slots share a name.
    pub fn create_shader(&mut self, desc: ShaderProgramDesc) -> Result<ShaderHandle> {
        self.check_alive()?;
        for (index, slot) in desc.texture_slots.iter().enumerate() {
            if desc.texture_slots[..index].contains(slot) {
                engine_error!("nova3d::Renderer", "Texture slot '{}' is declared twice", slot);
                panic!("duplicate texture slot '{}'", slot);
            }
        }
        let block = MaterialBlockLayout::new(&desc.material_fields);

        let vertex_shader = self.device.create_shader(ShaderDesc {
            code: desc.vertex_code,
            stage: ShaderStage::Vertex,
            entry_point: desc.vertex_entry,
        })?;
        let fragment_shader = self.device.create_shader(ShaderDesc {
            code: desc.fragment_code,
            stage: ShaderStage::Fragment,
            entry_point: desc.fragment_entry,
        })?;

        let material_layout = material_binding_layout(desc.texture_slots.len());
        let reflected: Vec<_> = vertex_shader
            .reflected_bindings()
            .iter()
            .chain(fragment_shader.reflected_bindings())
            .collect();
        if !reflected.is_empty() {
            let declared = material_layout
                .entries
                .iter()
                .filter(|entry| entry.binding > 0 || !desc.material_fields.is_empty());
            for entry in declared {
                let found = reflected
                    .iter()
                    .any(|r| r.set == MATERIAL_SET && r.binding == entry.binding && r.binding_type == entry.binding_type);
                if !found {
                    engine_warn!(
                        "nova3d::Renderer",
                        "Material binding (set {}, binding {}) is not used by the shader",
                        MATERIAL_SET,
                        entry.binding
                    );
                }
            }
        }

        let program = PipelineProgram {
            vertex_shader,
            fragment_shader,
            vertex_layout: desc.vertex_layout,
            binding_group_layouts: vec![engine_binding_layout(), material_layout],
            push_constant_ranges: vec![model_push_constant_range()],
        };
        Ok(self.shaders.insert(Arc::new(ShaderProgram {
            program,
            block,
            texture_slots: desc.texture_slots,
        })))
    }

    /// Destroy a shader no shader-material uses anymore
    pub fn destroy_shader(&mut self, handle: ShaderHandle) -> Result<()> {
        if !self.shaders.contains_key(handle) {
            engine_bail_warn!("nova3d::Renderer", "destroy_shader: shader {:?} does not exist", handle);
        }
        let users = self.materials.values().filter(|m| m.shader == handle).count();
        if users > 0 {
            engine_bail_warn!("nova3d::Renderer", "Shader {:?} is still used by {} shader-materials", handle, users);
        }
        self.device.wait_idle()?;
        self.shaders.remove(handle);
        Ok(())
    }

    // ===== SHADER-MATERIALS =====

    /// Compile property values onto the shader's material block and texture slots
    ///
    /// The main-pass pipeline is created right away so the first frame
    /// drawing the material does not compile it.
    pub fn create_shader_material(&mut self, desc: ShaderMaterialDesc) -> Result<ShaderMaterialHandle> {
        self.check_alive()?;
        let Some(shader) = self.shaders.get(desc.shader).cloned() else {
            engine_bail_warn!("nova3d::Renderer", "Shader {:?} does not exist", desc.shader);
        };

        let mut block = vec![0u8; shader.block.size() as usize];
        for (name, value) in &desc.properties {
            shader.block.write(&mut block, name, value)?;
        }
        let mut textures = vec![None; shader.texture_slots.len()];
        self.bind_textures(&shader, &mut textures, &desc.textures)?;

        let location = self.allocate_material_block(shader.block.size())?;
        self.uniform_buffers
            .map_global_buffer(MATERIAL_BUFFER_NAME, location.buffer_id)?
            .write(location.offset, &block)?;
        let binding_group = self.create_material_binding_group(&shader, location, &textures)?;

        let handle = self.materials.insert(ShaderMaterial {
            shader: desc.shader,
            settings: desc.settings,
            block,
            location,
            textures,
            binding_group,
        });
        if let Err(error) = self.prewarm_pipeline(handle, &shader, desc.settings) {
            self.materials.remove(handle);
            self.free_material_blocks.push(location);
            return Err(error);
        }
        engine_debug!(
            "nova3d::Renderer",
            "Created shader-material {:?} (buffer {}, offset {}, {} bytes)",
            handle,
            location.buffer_id,
            location.offset,
            location.size
        );
        Ok(handle)
    }

    /// Rewrite property values (and texture bindings) of a live shader-material
    ///
    /// Nothing changes when any value or texture is rejected.
    pub fn update_shader_material(
        &mut self,
        handle: ShaderMaterialHandle,
        properties: &[(String, MaterialValue)],
        textures: &[(String, TextureHandle)],
    ) -> Result<()> {
        self.check_alive()?;
        let Some(material) = self.materials.get(handle) else {
            engine_bail_warn!("nova3d::Renderer", "Shader-material {:?} does not exist", handle);
        };
        let Some(shader) = self.shaders.get(material.shader).cloned() else {
            engine_bail_warn!("nova3d::Renderer", "Shader of shader-material {:?} was destroyed", handle);
        };

        let mut block = material.block.clone();
        for (name, value) in properties {
            shader.block.write(&mut block, name, value)?;
        }
        let mut bound = material.textures.clone();
        self.bind_textures(&shader, &mut bound, textures)?;
        let location = material.location;

        // Frames in flight may still read the block
        self.device.wait_idle()?;
        self.uniform_buffers
            .map_global_buffer(MATERIAL_BUFFER_NAME, location.buffer_id)?
            .write(location.offset, &block)?;
        let binding_group = if textures.is_empty() {
            None
        } else {
            Some(self.create_material_binding_group(&shader, location, &bound)?)
        };

        if let Some(material) = self.materials.get_mut(handle) {
            material.block = block;
            material.textures = bound;
            if let Some(group) = binding_group {
                material.binding_group = group;
            }
        }
        Ok(())
    }

    /// Destroy a shader-material and its cached pipelines
    pub fn destroy_shader_material(&mut self, handle: ShaderMaterialHandle) -> Result<()> {
        if !self.materials.contains_key(handle) {
            engine_bail_warn!("nova3d::Renderer", "Shader-material {:?} does not exist", handle);
        }
        self.device.wait_idle()?;
        if let Some(material) = self.materials.remove(handle) {
            self.free_material_blocks.push(material.location);
        }
        let removed = self.pipelines.remove_material(handle);
        engine_debug!("nova3d::Renderer", "Destroyed shader-material {:?} ({} pipelines)", handle, removed);
        Ok(())
    }

    /// Where the material block of `handle` lives
    pub fn material_block_location(&self, handle: ShaderMaterialHandle) -> Option<MaterialBlockLocation> {
        self.materials.get(handle).map(|m| m.location)
    }

    fn bind_textures(
        &self,
        shader: &ShaderProgram,
        bound: &mut [Option<TextureHandle>],
        textures: &[(String, TextureHandle)],
    ) -> Result<()> {
        for (slot, texture) in textures {
            let Some(index) = shader.texture_slot(slot) else {
                engine_bail_warn!("nova3d::Renderer", "Shader has no texture slot '{}'", slot);
            };
            if !self.textures.contains_key(*texture) {
                engine_bail_warn!("nova3d::Renderer", "Texture {:?} bound to '{}' does not exist", texture, slot);
            }
            bound[index] = Some(*texture);
        }
        Ok(())
    }

    /// Reserve `size` bytes for a material block
    ///
    /// A freed block of the same size is reused first; otherwise the block is
    /// appended to the newest "material" buffer, opening the next one when full.
    fn allocate_material_block(&mut self, size: u64) -> Result<MaterialBlockLocation> {
        if let Some(index) = self.free_material_blocks.iter().position(|b| b.size == size) {
            return Ok(self.free_material_blocks.swap_remove(index));
        }
        let capacity = self.uniform_buffers.buffer_size();
        if size > capacity {
            engine_bail_warn!(
                "nova3d::Renderer",
                "Material block of {} bytes exceeds the uniform buffer size ({})",
                size,
                capacity
            );
        }
        let alignment = self.device.limits().min_uniform_buffer_offset_alignment.max(1);
        let aligned = self.material_cursor.div_ceil(alignment) * alignment;
        let count = self.uniform_buffers.global_buffer_count(MATERIAL_BUFFER_NAME);

        let (buffer_id, offset) = if count > 0 && aligned + size <= capacity {
            (count - 1, aligned)
        } else {
            self.uniform_buffers
                .create_global_buffer(&mut *self.device, MATERIAL_BUFFER_NAME, count)?;
            (count, 0)
        };
        self.material_cursor = offset + size;
        Ok(MaterialBlockLocation { buffer_id, offset, size })
    }

    fn create_material_binding_group(
        &mut self,
        shader: &ShaderProgram,
        location: MaterialBlockLocation,
        textures: &[Option<TextureHandle>],
    ) -> Result<Arc<dyn BindingGroup>> {
        let buffer = self
            .uniform_buffers
            .find_global_buffer(MATERIAL_BUFFER_NAME, location.buffer_id)
            .ok_or_else(|| engine_err!("nova3d::Renderer", "Material buffer {} is missing", location.buffer_id))?;

        let mut resources = vec![BindingResource::UniformBuffer {
            buffer,
            offset: location.offset,
            range: location.size,
        }];
        for texture in textures {
            let (texture, sampler) = match texture.and_then(|h| self.textures.get(h)) {
                Some(resource) => (resource.texture.clone(), resource.sampler.clone()),
                None => (self.fallback_texture.clone(), self.default_sampler.clone()),
            };
            resources.push(BindingResource::SampledTexture { texture, sampler });
        }
        self.device.create_binding_group(shader.material_layout(), &resources)
    }

    /// Render pass shape of a pass drawing into the swapchain image after a clear
    fn main_pass_desc(&self) -> Result<RenderPassDesc> {
        let Some(swapchain) = self.swapchain.as_deref() else {
            return Err(Self::invalid_state("renderer has no swapchain"));
        };
        let attachment = |format, final_layout| AttachmentDesc {
            format,
            samples: SampleCount::S1,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            initial_layout: ImageLayout::TransferDst,
            final_layout,
        };
        Ok(RenderPassDesc {
            color_attachments: vec![attachment(swapchain.format(), ImageLayout::PresentSrc)],
            depth_attachment: Some(attachment(DEPTH_FORMAT, ImageLayout::DepthStencilAttachment)),
        })
    }

    fn prewarm_pipeline(
        &mut self,
        handle: ShaderMaterialHandle,
        shader: &ShaderProgram,
        settings: PipelineSettings,
    ) -> Result<()> {
        let desc = self.main_pass_desc()?;
        let (_, cookie) = self.render_passes.find_or_create(&mut *self.device, &desc)?;
        let info = PipelineCacheInfo {
            shader_material: handle,
            render_pass_cookie: cookie,
            settings,
        };
        self.pipelines
            .find_or_create(&mut *self.device, &self.render_passes, &info, &shader.program)?;
        Ok(())
    }

    // ===== FRAME =====

    /// Wait for the current ring slot, acquire a swapchain image and start recording
    ///
    /// `OutOfDate` means no frame was opened: call `recreate_swapchain` and
    /// skip this frame. `SubOptimal` opens the frame; recreate after `end_frame`.
    pub fn begin_frame(&mut self) -> Result<FrameStatus> {
        self.check_alive()?;
        if self.phase != FramePhase::Idle {
            return Err(Self::invalid_state("begin_frame called while a frame is open"));
        }
        if self.swapchain_stale {
            return Ok(FrameStatus::OutOfDate);
        }

        let slot = self.current_slot;
        self.device.wait_for_frame(slot)?;
        self.frames[slot].recycle();

        let (image_index, status) = self.swapchain_mut()?.acquire_next_image(slot)?;
        if status.needs_recreation() {
            self.swapchain_stale = true;
        }
        if status == FrameStatus::OutOfDate {
            engine_debug!("nova3d::Renderer", "Swapchain out of date on acquire");
            return Ok(status);
        }

        self.frames[slot].commands.begin()?;
        self.stats = RendererStats::default();
        self.phase = FramePhase::Acquired { image_index };
        Ok(status)
    }

    /// Write engine uniforms, bake `queue` and record every physical pass
    ///
    /// Allowed once per frame, between `begin_frame` and `end_frame`.
    /// On error the frame is closed as recorded so `end_frame` still presents it.
    pub fn draw_render_queue(&mut self, queue: &RenderQueue) -> Result<()> {
        let FramePhase::Acquired { image_index } = self.phase else {
            return Err(Self::invalid_state("draw_render_queue needs a frame opened by begin_frame"));
        };
        match self.record_render_queue(queue, image_index) {
            Ok(color_layout) => {
                self.phase = FramePhase::Recorded { image_index, color_layout };
                Ok(())
            }
            Err(error) => {
                engine_warn!("nova3d::Renderer", "Frame {} recorded without its render queue", self.frame_counter);
                self.phase = FramePhase::Recorded {
                    image_index,
                    color_layout: ImageLayout::Undefined,
                };
                Err(error)
            }
        }
    }

    /// Bake and record `queue`; returns the layout the swapchain image is left in
    fn record_render_queue(&mut self, queue: &RenderQueue, image_index: u32) -> Result<ImageLayout> {
        let slot = self.current_slot;
        let view_groups = self.write_engine_uniforms(queue, slot)?;

        let color = self.swapchain_mut()?.render_target(image_index);
        let Some(depth) = self.depth.clone() else {
            return Err(Self::invalid_state("renderer has no depth target"));
        };

        let mut graph = RenderGraph::new();
        {
            let table = MaterialTable {
                materials: &self.materials,
                shaders: &self.shaders,
            };
            let mut ctx = BakeContext {
                device: &mut *self.device,
                render_passes: &mut self.render_passes,
                pipelines: &mut self.pipelines,
                materials: &table,
                targets: PhysicalTargets { color, depth },
            };
            graph.bake(queue, &mut ctx)?;
        }
        let color_layout = graph.final_layout(FINAL_COLOR).unwrap_or(ImageLayout::Undefined);
        let passes = graph.into_physical_passes();

        let frame = &mut self.frames[slot];
        let mut recorder = FrameRecorder {
            queue,
            view_groups: &view_groups,
            meshes: &self.meshes,
            materials: &self.materials,
            stats: &mut self.stats,
            in_render_pass: false,
        };
        let recorded = recorder.record(&mut *frame.commands, &passes, &mut frame.bound_groups);
        if recorded.is_err() && recorder.in_render_pass {
            frame.commands.end_render_pass()?;
        }
        frame.in_flight = passes;
        recorded.map(|()| color_layout)
    }

    /// Fill "engine_frame" / "engine_view" for `slot` and return the set 0 group of each view
    fn write_engine_uniforms(&mut self, queue: &RenderQueue, slot: usize) -> Result<Vec<Arc<dyn BindingGroup>>> {
        let mut groups = Vec::with_capacity(queue.view_blocks.len());
        for (view_index, view) in queue.view_blocks.iter().enumerate() {
            let block = queue.frame_blocks.get(view.frame_block).copied().unwrap_or_default();
            let frame_uniforms = FrameUniforms {
                time: block.frame_time,
                delta_time: block.delta_time,
                frame_index: self.frame_counter as u32,
                _padding: 0,
            };
            let frame_buffer = self.uniform_buffers.find_or_create_per_frame_buffer(
                &mut *self.device,
                FRAME_UNIFORMS_NAME,
                view.frame_block as u32,
                slot,
            )?;
            frame_buffer.update(0, bytemuck::bytes_of(&frame_uniforms))?;

            let viewport = view
                .viewport
                .unwrap_or_else(|| Viewport::from_extent(self.width, self.height));
            let view_uniforms = ViewUniforms {
                projection: view.projection,
                view: view.view,
                view_projection: view.projection * view.view,
                viewport: [viewport.x, viewport.y, viewport.width, viewport.height],
            };
            let view_buffer = self.uniform_buffers.find_or_create_per_frame_buffer(
                &mut *self.device,
                VIEW_UNIFORMS_NAME,
                view_index as u32,
                slot,
            )?;
            view_buffer.update(0, bytemuck::bytes_of(&view_uniforms))?;

            let key = (view.frame_block, view_index, slot);
            let group = match self.engine_groups.get(&key) {
                Some(group) => group.clone(),
                None => {
                    let group = self.device.create_binding_group(
                        &engine_binding_layout(),
                        &[
                            BindingResource::UniformBuffer {
                                buffer: frame_buffer,
                                offset: 0,
                                range: size_of::<FrameUniforms>() as u64,
                            },
                            BindingResource::UniformBuffer {
                                buffer: view_buffer,
                                offset: 0,
                                range: size_of::<ViewUniforms>() as u64,
                            },
                        ],
                    )?;
                    self.engine_groups.insert(key, group.clone());
                    group
                }
            };
            groups.push(group);
        }
        Ok(groups)
    }

    /// Submit the frame and present it
    ///
    /// `OutOfDate` and `SubOptimal` require `recreate_swapchain` before the next frame.
    pub fn end_frame(&mut self) -> Result<FrameStatus> {
        let (image_index, color_layout) = match self.phase {
            FramePhase::Idle => return Err(Self::invalid_state("end_frame called without begin_frame")),
            FramePhase::Acquired { image_index } => (image_index, ImageLayout::Undefined),
            FramePhase::Recorded { image_index, color_layout } => (image_index, color_layout),
        };
        self.phase = FramePhase::Idle;
        let slot = self.current_slot;

        let Some(swapchain) = self.swapchain.as_deref_mut() else {
            return Err(Self::invalid_state("renderer has no swapchain"));
        };
        let frame = &mut self.frames[slot];
        if color_layout != ImageLayout::PresentSrc {
            let target = swapchain.render_target(image_index);
            frame
                .commands
                .transition_render_target(&target, color_layout, ImageLayout::PresentSrc)?;
        }
        frame.commands.end()?;
        self.device.submit_frame(slot, &*frame.commands, &*swapchain, image_index)?;

        let status = swapchain.present(image_index)?;
        if status.needs_recreation() {
            engine_debug!("nova3d::Renderer", "Present reported {:?}", status);
            self.swapchain_stale = true;
        }
        self.current_slot = (slot + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frame_counter += 1;
        Ok(status)
    }

    // ===== SWAPCHAIN =====

    /// Record a new surface size; frames report `OutOfDate` until `recreate_swapchain`
    pub fn resize(&mut self, width: u32, height: u32) {
        engine_debug!("nova3d::Renderer", "Resize requested: {}x{}", width, height);
        self.width = width;
        self.height = height;
        self.swapchain_stale = true;
    }

    pub fn is_swapchain_stale(&self) -> bool {
        self.swapchain_stale
    }

    /// Rebuild every swapchain-dependent resource
    ///
    /// Tear-down order: frame ring, per-frame uniforms, depth. Then the
    /// swapchain is recreated, followed by depth and frames, and every live
    /// shader-material gets a new binding group and main-pass pipeline.
    /// Cached pipelines stay valid since viewport and scissor are dynamic.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        self.check_alive()?;
        if self.phase != FramePhase::Idle {
            return Err(Self::invalid_state("recreate_swapchain called while a frame is open"));
        }
        let (width, height) = self.poll_window_size()?;
        self.device.wait_idle()?;

        self.frames.clear();
        self.engine_groups.clear();
        self.uniform_buffers.invalidate_per_frame_buffers();
        self.depth = None;

        let swapchain = self.swapchain_mut()?;
        swapchain.recreate(width, height)?;
        let (width, height) = (swapchain.width(), swapchain.height());

        self.depth = Some(Self::create_depth_target(&mut *self.device, width, height)?);
        self.frames = Self::create_frames(&mut *self.device)?;
        self.width = width;
        self.height = height;
        self.reregister_materials()?;

        self.swapchain_stale = false;
        self.current_slot = 0;
        engine_info!("nova3d::Renderer", "Swapchain recreated at {}x{}", width, height);
        Ok(())
    }

    fn poll_window_size(&self) -> Result<(u32, u32)> {
        match &self.window_size {
            Some(query) => loop {
                let (width, height) = query();
                if width > 0 && height > 0 {
                    return Ok((width, height));
                }
                std::thread::yield_now();
            },
            None if self.width > 0 && self.height > 0 => Ok((self.width, self.height)),
            None => Err(Self::invalid_state("cannot recreate the swapchain at a zero size")),
        }
    }

    fn reregister_materials(&mut self) -> Result<()> {
        let handles: Vec<ShaderMaterialHandle> = self.materials.keys().collect();
        for handle in handles {
            let Some(material) = self.materials.get(handle) else {
                continue;
            };
            let Some(shader) = self.shaders.get(material.shader).cloned() else {
                continue;
            };
            let (location, textures, settings) = (material.location, material.textures.clone(), material.settings);

            let group = self.create_material_binding_group(&shader, location, &textures)?;
            if let Some(material) = self.materials.get_mut(handle) {
                material.binding_group = group;
            }
            self.prewarm_pipeline(handle, &shader, settings)?;
        }
        engine_debug!("nova3d::Renderer", "Re-registered {} shader-materials", self.materials.len());
        Ok(())
    }

    // ===== QUERIES =====

    /// (width, height, aspect ratio) of the swapchain
    pub fn shape(&self) -> (u32, u32, f32) {
        (self.width, self.height, self.width as f32 / self.height.max(1) as f32)
    }

    /// Right-handed, reverse-Z perspective projection for Vulkan clip space
    ///
    /// The near plane maps to depth 1 and the far plane to depth 0. Y points
    /// down in clip space.
    pub fn build_perspective_matrix(fov_y_radians: f32, aspect_ratio: f32, near: f32, far: f32) -> Mat4 {
        let mut projection = Mat4::perspective_rh(fov_y_radians, aspect_ratio, far, near);
        projection.y_axis.y = -projection.y_axis.y;
        projection
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    pub fn stats(&self) -> RendererStats {
        RendererStats {
            cached_pipelines: self.pipelines.pipeline_count() as u32,
            cached_render_passes: self.render_passes.len() as u32,
            ..self.stats
        }
    }

    pub fn frame_phase(&self) -> FramePhase {
        self.phase
    }

    /// Ring slot the next (or current) frame records into
    pub fn current_frame_slot(&self) -> usize {
        self.current_slot
    }

    pub fn pipeline_cache(&self) -> &MaterialPipelineCache {
        &self.pipelines
    }

    pub fn render_pass_cache(&self) -> &RenderPassCache {
        &self.render_passes
    }

    pub fn uniform_buffers(&self) -> &UniformBufferManager {
        &self.uniform_buffers
    }

    // ===== SHUTDOWN =====

    /// Wait for the GPU and release every resource; later calls do nothing
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if let Err(error) = self.device.wait_idle() {
            engine_warn!("nova3d::Renderer", "wait_idle failed during shutdown: {}", error);
        }

        self.phase = FramePhase::Idle;
        self.frames.clear();
        self.engine_groups.clear();
        self.materials.clear();
        self.free_material_blocks.clear();
        self.shaders.clear();
        self.textures.clear();
        self.meshes.clear();
        self.pipelines.free();
        self.render_passes.free();
        self.uniform_buffers.free();
        self.depth = None;
        self.swapchain = None;
        self.shut_down = true;
        engine_info!("nova3d::Renderer", "Renderer shut down");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
