/// Sampler - Vulkan implementation of the nova3d Sampler trait

use nova_3d_engine::nova3d::Result;
use nova_3d_engine::nova3d::render::{Filter, Sampler as RendererSampler, SamplerDesc};
use nova_3d_engine::{engine_debug, engine_err};
use ash::vk;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{address_mode_to_vk, filter_to_vk};

/// Vulkan sampler (single mip level)
pub struct Sampler {
    ctx: Arc<GpuContext>,
    pub(crate) sampler: vk::Sampler,
}

impl Sampler {
    /// `device_max_anisotropy` is `None` when the device has no anisotropic filtering
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &SamplerDesc, device_max_anisotropy: Option<f32>) -> Result<Self> {
        let address = address_mode_to_vk(desc.address_mode);
        let mipmap_mode = match desc.min_filter {
            Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
            Filter::Linear => vk::SamplerMipmapMode::LINEAR,
        };

        let anisotropy = match (desc.max_anisotropy, device_max_anisotropy) {
            (Some(requested), Some(limit)) if requested > 1.0 => Some(requested.min(limit)),
            (Some(requested), None) if requested > 1.0 => {
                engine_debug!("nova3d::vulkan", "Anisotropic filtering unsupported, ignoring max_anisotropy {}", requested);
                None
            }
            _ => None,
        };

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter_to_vk(desc.mag_filter))
            .min_filter(filter_to_vk(desc.min_filter))
            .mipmap_mode(mipmap_mode)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe {
            ctx.device.create_sampler(&create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create sampler: {:?}", e))?
        };

        Ok(Self { ctx, sampler })
    }
}

impl RendererSampler for Sampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_sampler(self.sampler, None);
        }
    }
}
