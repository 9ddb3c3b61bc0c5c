/// Shader - Vulkan implementation of the nova3d Shader trait
///
/// Holds the shader module, its entry point and the descriptor bindings found
/// by SPIR-V reflection (spirq).

use nova_3d_engine::nova3d::Result;
use nova_3d_engine::nova3d::render::{
    BindingType, ReflectedBinding, Shader as RendererShader, ShaderDesc, ShaderStage,
};
use nova_3d_engine::{engine_bail_warn, engine_err, engine_warn};
use ash::vk;
use std::any::Any;
use std::ffi::CString;
use std::io::Cursor;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan shader module
pub struct Shader {
    ctx: Arc<GpuContext>,
    pub(crate) module: vk::ShaderModule,
    pub(crate) entry_point: CString,
    stage: ShaderStage,
    bindings: Vec<ReflectedBinding>,
}

impl Shader {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: ShaderDesc) -> Result<Self> {
        if desc.code.is_empty() || desc.code.len() % 4 != 0 {
            engine_bail_warn!("nova3d::vulkan",
                "SPIR-V code length must be a non-zero multiple of 4 (got {} bytes)", desc.code.len());
        }

        let entry_point = match CString::new(desc.entry_point.as_str()) {
            Ok(name) => name,
            Err(_) => engine_bail_warn!("nova3d::vulkan",
                "Shader entry point '{}' contains a NUL byte", desc.entry_point.escape_debug()),
        };

        // read_spv copies into an aligned Vec<u32> and checks the magic number
        let words = ash::util::read_spv(&mut Cursor::new(&desc.code))
            .map_err(|e| engine_err!("nova3d::vulkan", "Invalid SPIR-V for {:?} shader: {}", desc.stage, e))?;

        let bindings = match reflect_bindings(&words, &desc.entry_point) {
            Ok(bindings) => bindings,
            Err(message) => {
                engine_warn!("nova3d::vulkan",
                    "SPIR-V reflection failed for {:?} shader '{}': {}", desc.stage, desc.entry_point, message);
                Vec::new()
            }
        };

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe {
            ctx.device.create_shader_module(&create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create {:?} shader module: {:?}", desc.stage, e))?
        };

        Ok(Self {
            ctx,
            module,
            entry_point,
            stage: desc.stage,
            bindings,
        })
    }
}

/// Uniform buffers and sampled images used by `entry_point`
///
/// Descriptor types the engine cannot bind (storage buffers, ...) are skipped.
fn reflect_bindings(words: &[u32], entry_point: &str) -> std::result::Result<Vec<ReflectedBinding>, String> {
    use spirq::ty::DescriptorType;

    let entry_points = spirq::ReflectConfig::new()
        .spv(words)
        .ref_all_rscs(false)
        .reflect()
        .map_err(|e| format!("{:?}", e))?;

    let mut bindings = Vec::new();
    for ep in entry_points.iter().filter(|ep| ep.name == entry_point) {
        for var in ep.vars.iter() {
            if let spirq::var::Variable::Descriptor { name, desc_bind, desc_ty, .. } = var {
                let binding_type = match desc_ty {
                    DescriptorType::UniformBuffer() => BindingType::UniformBuffer,
                    DescriptorType::CombinedImageSampler() | DescriptorType::SampledImage() => {
                        BindingType::CombinedImageSampler
                    }
                    _ => continue,
                };
                bindings.push(ReflectedBinding {
                    name: name.clone().unwrap_or_default(),
                    set: desc_bind.set(),
                    binding: desc_bind.bind(),
                    binding_type,
                });
            }
        }
    }
    bindings.sort_by_key(|b| (b.set, b.binding));
    Ok(bindings)
}

impl RendererShader for Shader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn reflected_bindings(&self) -> &[ReflectedBinding] {
        &self.bindings
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_shader_module(self.module, None);
        }
    }
}
