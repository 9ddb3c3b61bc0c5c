/// Renderer-owned resources: meshes, textures, shader programs, shader-materials
///
/// Descriptors are public; the stored objects are crate-internal and reached
/// through slotmap handles only.

use std::sync::Arc;
use crate::cache::{PipelineProgram, PipelineSettings};
use crate::graphics_device::{
    BindingGroup, BindingGroupLayoutDesc, BindingSlotDesc, BindingType, Buffer, PushConstantRange,
    Sampler, ShaderStageFlags, Texture, VertexLayout,
};
use crate::renderer::{MaterialBlockLayout, MaterialFieldDesc, MaterialValue, ShaderHandle, TextureHandle};

// ===== ENGINE BINDING LAYOUT =====

/// Descriptor set of the engine globals (frame + view uniforms)
pub const ENGINE_SET: u32 = 0;
/// Descriptor set of the shader-material (block + textures)
pub const MATERIAL_SET: u32 = 1;
/// Size of the model matrix push constant
pub const MODEL_PUSH_CONSTANT_SIZE: u32 = 64;

/// Set 0: binding 0 = frame uniforms, binding 1 = view uniforms
pub fn engine_binding_layout() -> BindingGroupLayoutDesc {
    BindingGroupLayoutDesc {
        entries: vec![
            BindingSlotDesc {
                binding: 0,
                binding_type: BindingType::UniformBuffer,
                stage_flags: ShaderStageFlags::VERTEX_FRAGMENT,
            },
            BindingSlotDesc {
                binding: 1,
                binding_type: BindingType::UniformBuffer,
                stage_flags: ShaderStageFlags::VERTEX_FRAGMENT,
            },
        ],
    }
}

/// Set 1: binding 0 = material block, bindings 1..=n = texture slots
pub fn material_binding_layout(texture_slots: usize) -> BindingGroupLayoutDesc {
    let mut entries = vec![BindingSlotDesc {
        binding: 0,
        binding_type: BindingType::UniformBuffer,
        stage_flags: ShaderStageFlags::VERTEX_FRAGMENT,
    }];
    entries.extend((0..texture_slots).map(|slot| BindingSlotDesc {
        binding: slot as u32 + 1,
        binding_type: BindingType::CombinedImageSampler,
        stage_flags: ShaderStageFlags::FRAGMENT,
    }));
    BindingGroupLayoutDesc { entries }
}

/// Model matrix, vertex stage
pub fn model_push_constant_range() -> PushConstantRange {
    PushConstantRange {
        stages: ShaderStageFlags::VERTEX,
        offset: 0,
        size: MODEL_PUSH_CONSTANT_SIZE,
    }
}

// ===== MESH =====

/// Interleaved vertex data plus optional 32-bit indices
#[derive(Debug, Clone)]
pub struct MeshDesc {
    /// Raw vertex bytes (binding 0)
    pub vertices: Vec<u8>,
    /// Bytes per vertex
    pub vertex_stride: u32,
    pub indices: Option<Vec<u32>>,
}

pub(crate) struct Mesh {
    pub(crate) vertex_buffer: Arc<dyn Buffer>,
    pub(crate) vertex_count: u32,
    pub(crate) index_buffer: Option<(Arc<dyn Buffer>, u32)>,
}

impl Mesh {
    /// Vertices (or indices) consumed by one draw
    pub(crate) fn element_count(&self) -> u32 {
        self.index_buffer.as_ref().map_or(self.vertex_count, |(_, count)| *count)
    }
}

// ===== TEXTURE =====

pub(crate) struct TextureResource {
    pub(crate) texture: Arc<dyn Texture>,
    pub(crate) sampler: Arc<dyn Sampler>,
}

// ===== SHADER PROGRAM =====

/// Vertex + fragment program and its material interface
#[derive(Debug, Clone)]
pub struct ShaderProgramDesc {
    /// Vertex stage SPIR-V
    pub vertex_code: Vec<u8>,
    /// Fragment stage SPIR-V
    pub fragment_code: Vec<u8>,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub vertex_layout: VertexLayout,
    /// Fields of the set 1, binding 0 uniform block, in declaration order
    pub material_fields: Vec<MaterialFieldDesc>,
    /// Sampled textures at set 1, bindings 1..
    pub texture_slots: Vec<String>,
}

pub(crate) struct ShaderProgram {
    pub(crate) program: PipelineProgram,
    pub(crate) block: MaterialBlockLayout,
    pub(crate) texture_slots: Vec<String>,
}

impl ShaderProgram {
    pub(crate) fn texture_slot(&self, name: &str) -> Option<usize> {
        self.texture_slots.iter().position(|slot| slot == name)
    }

    pub(crate) fn material_layout(&self) -> &BindingGroupLayoutDesc {
        &self.program.binding_group_layouts[MATERIAL_SET as usize]
    }
}

// ===== SHADER-MATERIAL =====

/// Property values bound to a shader
#[derive(Debug, Clone)]
pub struct ShaderMaterialDesc {
    pub shader: ShaderHandle,
    /// Values for the shader's material block; fields left out stay zero
    pub properties: Vec<(String, MaterialValue)>,
    /// Textures by slot name; slots left out sample a 1x1 white texture
    pub textures: Vec<(String, TextureHandle)>,
    pub settings: PipelineSettings,
}

impl ShaderMaterialDesc {
    pub fn new(shader: ShaderHandle) -> Self {
        Self {
            shader,
            properties: Vec::new(),
            textures: Vec::new(),
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_property(mut self, name: &str, value: MaterialValue) -> Self {
        self.properties.push((name.to_string(), value));
        self
    }

    pub fn with_texture(mut self, slot: &str, texture: TextureHandle) -> Self {
        self.textures.push((slot.to_string(), texture));
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Where a material block lives in the global "material" buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialBlockLocation {
    pub buffer_id: u32,
    pub offset: u64,
    pub size: u64,
}

pub(crate) struct ShaderMaterial {
    pub(crate) shader: ShaderHandle,
    pub(crate) settings: PipelineSettings,
    /// CPU copy of the std140 block
    pub(crate) block: Vec<u8>,
    pub(crate) location: MaterialBlockLocation,
    /// One entry per texture slot of the shader
    pub(crate) textures: Vec<Option<TextureHandle>>,
    pub(crate) binding_group: Arc<dyn BindingGroup>,
}
