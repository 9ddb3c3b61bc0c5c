/// Texture - Vulkan implementation of the nova3d Texture trait
///
/// Sampled 2D textures with a single mip level. Pixel data is uploaded through
/// a staging buffer; the image ends in `SHADER_READ_ONLY_OPTIMAL`.

use nova_3d_engine::nova3d::Result;
use nova_3d_engine::nova3d::render::{Texture as RendererTexture, TextureDesc, TextureFormat, TextureInfo, TextureUsage};
use nova_3d_engine::{engine_bail, engine_bail_warn, engine_err};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{aspect_mask, texture_format_to_vk};

/// Vulkan texture: image + memory + view
pub struct Texture {
    ctx: Arc<GpuContext>,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    allocation: Option<Allocation>,
    info: TextureInfo,
}

/// Create a GPU-only 2D image and bind fresh memory to it
pub(crate) fn create_image(
    ctx: &GpuContext,
    name: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: vk::ImageUsageFlags,
) -> Result<(vk::Image, Allocation)> {
    let image_create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(texture_format_to_vk(format))
        .extent(vk::Extent3D { width, height, depth: 1 })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    unsafe {
        let image = ctx.device.create_image(&image_create_info, None)
            .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create {} image {}x{}: {:?}", name, width, height, e))?;

        let requirements = ctx.device.get_image_memory_requirements(image);
        let allocation = match ctx.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                ctx.device.destroy_image(image, None);
                return Err(e);
            }
        };

        if let Err(e) = ctx.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
            ctx.free(allocation);
            ctx.device.destroy_image(image, None);
            engine_bail!("nova3d::vulkan", "Failed to bind {} image memory: {:?}", name, e);
        }

        Ok((image, allocation))
    }
}

impl Texture {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &TextureDesc) -> Result<Self> {
        if desc.width == 0 || desc.height == 0 {
            engine_bail_warn!("nova3d::vulkan", "Texture size must be non-zero (got {}x{})", desc.width, desc.height);
        }
        if desc.format.is_depth() {
            engine_bail_warn!("nova3d::vulkan", "Sampled textures cannot use depth format {:?}", desc.format);
        }
        let expected = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
        if let Some(data) = &desc.data {
            if data.len() != expected {
                engine_bail_warn!("nova3d::vulkan",
                    "Texture data is {} bytes, {}x{} {:?} needs {}",
                    data.len(), desc.width, desc.height, desc.format, expected);
            }
        }

        let (image, allocation) = create_image(
            &ctx,
            "texture",
            desc.width,
            desc.height,
            desc.format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )?;

        let mut texture = Self {
            view: vk::ImageView::null(),
            image,
            allocation: Some(allocation),
            info: TextureInfo {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                usage: TextureUsage::Sampled,
            },
            ctx,
        };

        // From here on Drop cleans up partially built textures
        texture.view = texture.ctx.create_image_view(
            image,
            texture_format_to_vk(desc.format),
            aspect_mask(desc.format),
        )?;

        match &desc.data {
            Some(data) => texture.upload(data)?,
            None => texture.transition_to_shader_read()?,
        }

        Ok(texture)
    }

    fn full_range() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Staging copy: UNDEFINED -> TRANSFER_DST -> copy -> SHADER_READ_ONLY
    fn upload(&self, data: &[u8]) -> Result<()> {
        let ctx = &self.ctx;
        let staging_info = vk::BufferCreateInfo::default()
            .size(data.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe {
            let staging = ctx.device.create_buffer(&staging_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create texture staging buffer: {:?}", e))?;
            let requirements = ctx.device.get_buffer_memory_requirements(staging);
            let staging_allocation = match ctx.allocate("texture_staging", requirements, MemoryLocation::CpuToGpu, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    ctx.device.destroy_buffer(staging, None);
                    return Err(e);
                }
            };

            let result = self.record_upload(staging, &staging_allocation, data);

            ctx.free(staging_allocation);
            ctx.device.destroy_buffer(staging, None);
            result
        }
    }

    unsafe fn record_upload(&self, staging: vk::Buffer, staging_allocation: &Allocation, data: &[u8]) -> Result<()> {
        let ctx = &self.ctx;
        ctx.device.bind_buffer_memory(staging, staging_allocation.memory(), staging_allocation.offset())
            .map_err(|e| engine_err!("nova3d::vulkan", "Failed to bind texture staging memory: {:?}", e))?;

        let mapped = staging_allocation
            .mapped_ptr()
            .ok_or_else(|| engine_err!("nova3d::vulkan", "Texture staging buffer is not mapped"))?
            .as_ptr() as *mut u8;
        std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());

        let image = self.image;
        let (width, height) = (self.info.width, self.info.height);
        ctx.immediate_submit(|device, cb| {
            let to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(Self::full_range())
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D { width, height, depth: 1 });
            device.cmd_copy_buffer_to_image(cb, staging, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);

            let to_shader = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(Self::full_range())
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
        })
    }

    /// No data: the image still has to be in a sampleable layout
    fn transition_to_shader_read(&self) -> Result<()> {
        let image = self.image;
        self.ctx.immediate_submit(|device, cb| unsafe {
            let barrier = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(Self::full_range())
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }
}

impl RendererTexture for Texture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.ctx.device.destroy_image_view(self.view, None);
            }
            if let Some(allocation) = self.allocation.take() {
                self.ctx.free(allocation);
            }
            self.ctx.device.destroy_image(self.image, None);
        }
    }
}
