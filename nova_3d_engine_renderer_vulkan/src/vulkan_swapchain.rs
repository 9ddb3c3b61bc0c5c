/// Swapchain - Vulkan implementation of the nova3d Swapchain trait
///
/// Presentation for the device surface. Synchronization:
/// - one image-available semaphore per frame slot (signalled by acquire)
/// - one render-finished semaphore per swapchain image (waited on by present)

use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::nova3d::render::{
    FrameStatus, RenderTarget as RendererRenderTarget, Swapchain as RendererSwapchain, TextureFormat,
    MAX_FRAMES_IN_FLIGHT,
};
use nova_3d_engine::{engine_debug, engine_err, engine_error, engine_info};
use ash::vk;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::vk_to_texture_format;
use crate::vulkan_render_target::RenderTarget;

/// Vulkan swapchain
pub struct Swapchain {
    ctx: Arc<GpuContext>,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    format: TextureFormat,
    extent: vk::Extent2D,
    vsync: bool,
    targets: Vec<Arc<RenderTarget>>,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
}

impl Swapchain {
    pub(crate) fn new(ctx: Arc<GpuContext>, width: u32, height: u32, vsync: bool) -> Result<Self> {
        let (surface_format, format) = Self::choose_surface_format(&ctx)?;

        let mut swapchain = Self {
            ctx,
            swapchain: vk::SwapchainKHR::null(),
            surface_format,
            format,
            extent: vk::Extent2D { width: 0, height: 0 },
            vsync,
            targets: Vec::new(),
            image_available: Vec::new(),
            render_finished: Vec::new(),
        };
        // Drop releases whatever was created if build fails half-way
        swapchain.build(width, height)?;
        engine_info!("nova3d::vulkan", "Swapchain created: {}x{}, {} images, {:?}",
            swapchain.extent.width, swapchain.extent.height, swapchain.targets.len(), format);
        Ok(swapchain)
    }

    /// sRGB BGRA/RGBA when available, otherwise the first format the engine knows
    fn choose_surface_format(ctx: &GpuContext) -> Result<(vk::SurfaceFormatKHR, TextureFormat)> {
        let formats = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
                .map_err(|e| {
                    engine_error!("nova3d::vulkan", "Failed to query surface formats: {:?}", e);
                    Error::InitializationFailed(format!("Failed to query surface formats: {:?}", e))
                })?
        };

        let preferred = formats.iter().find(|f| {
            matches!(f.format, vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        });
        let chosen = preferred
            .or_else(|| formats.iter().find(|f| vk_to_texture_format(f.format).is_some()))
            .ok_or_else(|| {
                engine_error!("nova3d::vulkan", "No supported surface format among {} candidates", formats.len());
                Error::InitializationFailed("No supported surface format".to_string())
            })?;

        match vk_to_texture_format(chosen.format) {
            Some(format) => Ok((*chosen, format)),
            None => Err(Error::InitializationFailed(format!("Unsupported surface format {:?}", chosen.format))),
        }
    }

    fn choose_present_mode(&self) -> vk::PresentModeKHR {
        if self.vsync {
            return vk::PresentModeKHR::FIFO;
        }
        let modes = unsafe {
            self.ctx.surface_loader
                .get_physical_device_surface_present_modes(self.ctx.physical_device, self.ctx.surface)
                .unwrap_or_default()
        };
        [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|mode| modes.contains(mode))
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }

    /// (Re)create the swapchain, its targets and semaphores, retiring the current handle
    fn build(&mut self, width: u32, height: u32) -> Result<()> {
        let ctx = self.ctx.clone();
        unsafe {
            let capabilities = ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
                .map_err(|e| {
                    engine_error!("nova3d::vulkan", "Failed to get surface capabilities: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get surface capabilities: {:?}", e))
                })?;

            let extent = if capabilities.current_extent.width != u32::MAX {
                capabilities.current_extent
            } else {
                vk::Extent2D {
                    width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                    height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
                }
            };
            if extent.width == 0 || extent.height == 0 {
                return Err(Error::InvalidState("Surface has a zero extent (window minimized?)".to_string()));
            }

            let mut image_count = capabilities.min_image_count + 1;
            if capabilities.max_image_count > 0 {
                image_count = image_count.min(capabilities.max_image_count);
            }

            let old_swapchain = self.swapchain;
            let create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(ctx.surface)
                .min_image_count(image_count)
                .image_format(self.surface_format.format)
                .image_color_space(self.surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(self.choose_present_mode())
                .clipped(true)
                .old_swapchain(old_swapchain);

            let swapchain = ctx.swapchain_loader.create_swapchain(&create_info, None)
                .map_err(|e| {
                    engine_error!("nova3d::vulkan", "Failed to create swapchain: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create swapchain: {:?}", e))
                })?;

            // Old views and semaphores go before the retired swapchain
            self.release_images();
            if old_swapchain != vk::SwapchainKHR::null() {
                ctx.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
            self.swapchain = swapchain;
            self.extent = extent;

            let images = ctx.swapchain_loader.get_swapchain_images(swapchain)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to get swapchain images: {:?}", e))?;
            for image in images {
                let target = RenderTarget::new_swapchain_target(ctx.clone(), image, extent.width, extent.height, self.format)?;
                self.targets.push(Arc::new(target));
            }

            let semaphore_info = vk::SemaphoreCreateInfo::default();
            for _ in 0..MAX_FRAMES_IN_FLIGHT {
                let semaphore = ctx.device.create_semaphore(&semaphore_info, None)
                    .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create image-available semaphore: {:?}", e))?;
                self.image_available.push(semaphore);
            }
            for _ in 0..self.targets.len() {
                let semaphore = ctx.device.create_semaphore(&semaphore_info, None)
                    .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create render-finished semaphore: {:?}", e))?;
                self.render_finished.push(semaphore);
            }
        }
        Ok(())
    }

    fn release_images(&mut self) {
        unsafe {
            for semaphore in self.image_available.drain(..).chain(self.render_finished.drain(..)) {
                self.ctx.device.destroy_semaphore(semaphore, None);
            }
        }
        self.targets.clear();
    }

    /// Semaphores for a submit: (wait: image available for `frame_slot`, signal: render finished for `image_index`)
    pub(crate) fn sync_semaphores(&self, frame_slot: usize, image_index: u32) -> Result<(vk::Semaphore, vk::Semaphore)> {
        let wait = self.image_available.get(frame_slot).copied();
        let signal = self.render_finished.get(image_index as usize).copied();
        match (wait, signal) {
            (Some(wait), Some(signal)) => Ok((wait, signal)),
            _ => Err(Error::InvalidState(format!(
                "No swapchain semaphores for frame slot {} / image {} ({} images)",
                frame_slot, image_index, self.targets.len()
            ))),
        }
    }
}

impl RendererSwapchain for Swapchain {
    fn acquire_next_image(&mut self, frame_slot: usize) -> Result<(u32, FrameStatus)> {
        let Some(&semaphore) = self.image_available.get(frame_slot) else {
            return Err(Error::InvalidState(format!("Frame slot {} out of range", frame_slot)));
        };

        let result = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, false)) => Ok((image_index, FrameStatus::Success)),
            Ok((image_index, true)) => {
                engine_debug!("nova3d::vulkan", "Swapchain suboptimal on acquire");
                Ok((image_index, FrameStatus::SubOptimal))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((0, FrameStatus::OutOfDate)),
            Err(e) => Err(engine_err!("nova3d::vulkan", "Failed to acquire swapchain image: {:?}", e)),
        }
    }

    fn present(&mut self, image_index: u32) -> Result<FrameStatus> {
        let Some(&wait_semaphore) = self.render_finished.get(image_index as usize) else {
            return Err(Error::InvalidState(format!("Swapchain image {} out of range", image_index)));
        };

        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.ctx.swapchain_loader.queue_present(self.ctx.present_queue, &present_info) };
        match result {
            Ok(false) => Ok(FrameStatus::Success),
            Ok(true) => Ok(FrameStatus::SubOptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(FrameStatus::OutOfDate),
            Err(e) => Err(engine_err!("nova3d::vulkan", "Failed to present swapchain image: {:?}", e)),
        }
    }

    fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.ctx.device.device_wait_idle()
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to wait idle before swapchain recreate: {:?}", e))?;
        }
        self.build(width, height)?;
        engine_debug!("nova3d::vulkan", "Swapchain recreated: {}x{}, {} images",
            self.extent.width, self.extent.height, self.targets.len());
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.targets.len()
    }

    fn width(&self) -> u32 {
        self.extent.width
    }

    fn height(&self) -> u32 {
        self.extent.height
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn render_target(&self, image_index: u32) -> Arc<dyn RendererRenderTarget> {
        // Out-of-range indices are a caller bug: the index always comes from acquire
        self.targets[image_index as usize].clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();
        }
        self.release_images();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.ctx.swapchain_loader.destroy_swapchain(self.swapchain, None);
            }
        }
    }
}
