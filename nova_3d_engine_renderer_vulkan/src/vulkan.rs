/// VulkanGraphicsDevice - Vulkan implementation of the nova3d GraphicsDevice trait
///
/// Creation order: instance (+ debug messenger) -> surface -> physical device
/// -> logical device -> allocator -> [`GpuContext`]. Every GPU object holds an
/// `Arc<GpuContext>`; the context tears the device down once the last of them
/// is gone.

use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::nova3d::render::{
    BindingGroup as RendererBindingGroup, BindingGroupLayoutDesc, BindingResource,
    Buffer as RendererBuffer, BufferDesc, CommandList as RendererCommandList, Config, DeviceLimits,
    Framebuffer as RendererFramebuffer, FramebufferDesc, GraphicsDevice, Pipeline as RendererPipeline,
    PipelineDesc, RenderPass as RendererRenderPass, RenderPassDesc, RenderTarget as RendererRenderTarget,
    RenderTargetDesc, Sampler as RendererSampler, SamplerDesc, Shader as RendererShader, ShaderDesc,
    Swapchain as RendererSwapchain, Texture as RendererTexture, TextureDesc, MAX_FRAMES_IN_FLIGHT,
};
use nova_3d_engine::{engine_debug, engine_err, engine_error, engine_info, engine_warn};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use crate::vulkan_binding_group::{BindingGroup, DescriptorAllocator};
use crate::vulkan_buffer::Buffer;
use crate::vulkan_command_list::CommandList;
use crate::vulkan_context::{downcast, GpuContext, GpuContextParts};
use crate::vulkan_frame_buffer::Framebuffer;
use crate::vulkan_pipeline::Pipeline;
use crate::vulkan_render_pass::RenderPass;
use crate::vulkan_render_target::RenderTarget;
use crate::vulkan_sampler::Sampler;
use crate::vulkan_shader::Shader;
use crate::vulkan_swapchain::Swapchain;
use crate::vulkan_texture::Texture;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[cfg(feature = "vulkan-validation")]
type DebugMessenger = Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>;
#[cfg(not(feature = "vulkan-validation"))]
type DebugMessenger = ();

/// Physical device chosen for rendering
struct SelectedDevice {
    physical_device: vk::PhysicalDevice,
    graphics_family: u32,
    present_family: u32,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
}

/// Vulkan graphics device
pub struct VulkanGraphicsDevice {
    /// Per-slot in-flight fences, created signaled
    frame_fences: Vec<vk::Fence>,
    descriptors: Arc<DescriptorAllocator>,
    limits: DeviceLimits,
    /// `None` when samplerAnisotropy is unsupported
    max_anisotropy: Option<f32>,
    depth_bounds_supported: bool,
    vsync: bool,
    ctx: Arc<GpuContext>,
}

fn init_error(message: String) -> Error {
    engine_error!("nova3d::vulkan", "{}", message);
    Error::InitializationFailed(message)
}

impl VulkanGraphicsDevice {
    /// Create a device presenting to `window`
    ///
    /// The window must outlive the device (the surface refers to it).
    pub fn from_window<W: HasDisplayHandle + HasWindowHandle>(window: &W, config: Config) -> Result<Self> {
        let display_handle = window.display_handle()
            .map_err(|e| init_error(format!("Failed to get display handle: {}", e)))?;
        let window_handle = window.window_handle()
            .map_err(|e| init_error(format!("Failed to get window handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| init_error(format!("Failed to get required surface extensions: {:?}", e)))?;

        Self::new(config, extensions, |entry, instance| unsafe {
            ash_window::create_surface(entry, instance, display_handle.as_raw(), window_handle.as_raw(), None)
                .map_err(|e| init_error(format!("Failed to create surface: {:?}", e)))
        })
    }

    /// Create a device for any surface
    ///
    /// `instance_extensions` are the surface extensions the platform needs;
    /// `create_surface` is called once the instance exists.
    pub fn new<F>(config: Config, instance_extensions: &[*const c_char], create_surface: F) -> Result<Self>
    where
        F: FnOnce(&ash::Entry, &ash::Instance) -> Result<vk::SurfaceKHR>,
    {
        let entry = unsafe {
            ash::Entry::load().map_err(|e| init_error(format!("Failed to load Vulkan library: {:?}", e)))?
        };

        let validation = config.enable_validation && Self::validation_available(&entry);
        let (instance, messenger) = Self::create_instance(&entry, &config, instance_extensions, validation)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let surface = match create_surface(&entry, &instance) {
            Ok(surface) => surface,
            Err(e) => {
                Self::destroy_instance(&instance, messenger);
                return Err(e);
            }
        };

        let built = Self::select_physical_device(&instance, &surface_loader, surface).and_then(|selected| {
            let device = Self::create_logical_device(&instance, &selected)?;
            match Self::create_allocator_and_pool(&instance, &device, &selected) {
                Ok((allocator, upload_pool)) => Ok((selected, device, allocator, upload_pool)),
                Err(e) => {
                    unsafe { device.destroy_device(None); }
                    Err(e)
                }
            }
        });
        let (selected, device, allocator, upload_command_pool) = match built {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None); }
                Self::destroy_instance(&instance, messenger);
                return Err(e);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(selected.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(selected.present_family, 0) };

        #[cfg(not(feature = "vulkan-validation"))]
        let () = messenger;

        let ctx = Arc::new(GpuContext::new(GpuContextParts {
            entry,
            instance,
            physical_device: selected.physical_device,
            device,
            allocator,
            graphics_queue,
            graphics_queue_family: selected.graphics_family,
            present_queue,
            surface,
            surface_loader,
            upload_command_pool,
            #[cfg(feature = "vulkan-validation")]
            debug_messenger: messenger,
        }));

        // From here on GpuContext's Drop owns cleanup
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let mut frame_fences = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let fence = unsafe { ctx.device.create_fence(&fence_info, None) };
            match fence {
                Ok(fence) => frame_fences.push(fence),
                Err(e) => {
                    for fence in frame_fences {
                        unsafe { ctx.device.destroy_fence(fence, None); }
                    }
                    return Err(init_error(format!("Failed to create frame fence: {:?}", e)));
                }
            }
        }

        let descriptors = match DescriptorAllocator::new(ctx.clone()) {
            Ok(descriptors) => Arc::new(descriptors),
            Err(e) => {
                for fence in frame_fences {
                    unsafe { ctx.device.destroy_fence(fence, None); }
                }
                return Err(e);
            }
        };

        let device_limits = &selected.properties.limits;
        let max_anisotropy = (selected.features.sampler_anisotropy == vk::TRUE)
            .then_some(device_limits.max_sampler_anisotropy);
        let limits = DeviceLimits {
            max_uniform_buffer_range: device_limits.max_uniform_buffer_range as u64,
            min_uniform_buffer_offset_alignment: device_limits.min_uniform_buffer_offset_alignment,
        };

        let name = selected.properties.device_name_as_c_str().unwrap_or(c"unknown");
        engine_info!("nova3d::vulkan", "Vulkan device ready: {} ({:?}), validation {}",
            name.to_string_lossy(), selected.properties.device_type, if validation { "on" } else { "off" });

        Ok(Self {
            frame_fences,
            descriptors,
            limits,
            max_anisotropy,
            depth_bounds_supported: selected.features.depth_bounds == vk::TRUE,
            vsync: config.vsync,
            ctx,
        })
    }

    // ===== INSTANCE =====

    #[cfg(feature = "vulkan-validation")]
    fn validation_available(entry: &ash::Entry) -> bool {
        let layers = unsafe { entry.enumerate_instance_layer_properties().unwrap_or_default() };
        let found = layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().map_or(false, |name| name == VALIDATION_LAYER));
        if !found {
            engine_warn!("nova3d::vulkan", "{} not installed, validation disabled", VALIDATION_LAYER.to_string_lossy());
        }
        found
    }

    #[cfg(not(feature = "vulkan-validation"))]
    fn validation_available(_entry: &ash::Entry) -> bool {
        engine_warn!("nova3d::vulkan",
            "Validation requested but the 'vulkan-validation' feature is disabled, {} not loaded",
            VALIDATION_LAYER.to_string_lossy());
        false
    }

    fn create_instance(
        entry: &ash::Entry,
        config: &Config,
        surface_extensions: &[*const c_char],
        validation: bool,
    ) -> Result<(ash::Instance, DebugMessenger)> {
        let app_name = CString::new(config.app_name.as_str())
            .map_err(|_| init_error(format!("Application name '{}' contains a NUL byte", config.app_name.escape_debug())))?;
        let (major, minor, patch) = config.app_version;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(c"Nova3D")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extension_names = surface_extensions.to_vec();
        let mut layer_names = Vec::new();
        if validation {
            #[cfg(feature = "vulkan-validation")]
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(|e| init_error(format!("Failed to create Vulkan instance: {:?}", e)))?
        };

        #[cfg(feature = "vulkan-validation")]
        let messenger = if validation {
            match Self::create_debug_messenger(entry, &instance, config) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None); }
                    return Err(e);
                }
            }
        } else {
            None
        };
        #[cfg(not(feature = "vulkan-validation"))]
        let messenger = ();

        Ok((instance, messenger))
    }

    #[cfg(feature = "vulkan-validation")]
    fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
        config: &Config,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        use crate::debug;

        debug::init_debug_config(debug::DebugConfig {
            severity: config.debug_severity,
            output: config.debug_output.clone(),
            message_filter: config.debug_message_filter,
            break_on_error: config.break_on_validation_error,
            panic_on_error: config.panic_on_error,
            enable_stats: config.enable_validation_stats,
        });

        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(debug::severity_flags(config.debug_severity))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug::vulkan_debug_callback));

        let messenger = unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(|e| init_error(format!("Failed to create debug messenger: {:?}", e)))?
        };
        Ok((debug_utils, messenger))
    }

    /// Failure path before the GpuContext exists
    fn destroy_instance(instance: &ash::Instance, messenger: DebugMessenger) {
        unsafe {
            #[cfg(feature = "vulkan-validation")]
            if let Some((debug_utils, messenger)) = messenger {
                crate::debug::cleanup_debug_config();
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            #[cfg(not(feature = "vulkan-validation"))]
            let () = messenger;
            instance.destroy_instance(None);
        }
    }

    // ===== DEVICE =====

    /// Prefer discrete GPUs, then integrated, then anything that can present
    fn select_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<SelectedDevice> {
        let physical_devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(|e| init_error(format!("Failed to enumerate physical devices: {:?}", e)))?
        };

        let mut best: Option<(u32, SelectedDevice)> = None;
        for physical_device in physical_devices {
            let Some(candidate) = Self::evaluate_device(instance, surface_loader, surface, physical_device) else {
                continue;
            };
            let score = match candidate.properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            };
            if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                best = Some((score, candidate));
            }
        }

        best.map(|(_, selected)| selected)
            .ok_or_else(|| init_error("No Vulkan GPU with graphics and present support found".to_string()))
    }

    fn evaluate_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Option<SelectedDevice> {
        unsafe {
            let extensions = instance.enumerate_device_extension_properties(physical_device).ok()?;
            let has_swapchain = extensions
                .iter()
                .any(|ext| ext.extension_name_as_c_str().map_or(false, |name| name == ash::khr::swapchain::NAME));
            if !has_swapchain {
                return None;
            }

            let families = instance.get_physical_device_queue_family_properties(physical_device);
            let supports_present = |index: u32| {
                surface_loader
                    .get_physical_device_surface_support(physical_device, index, surface)
                    .unwrap_or(false)
            };
            let graphics_families: Vec<u32> = families
                .iter()
                .enumerate()
                .filter(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(index, _)| index as u32)
                .collect();

            // A family doing both avoids cross-queue ownership
            let (graphics_family, present_family) = match graphics_families.iter().copied().find(|&i| supports_present(i)) {
                Some(family) => (family, family),
                None => {
                    let graphics = *graphics_families.first()?;
                    let present = (0..families.len() as u32).find(|&i| supports_present(i))?;
                    (graphics, present)
                }
            };

            Some(SelectedDevice {
                physical_device,
                graphics_family,
                present_family,
                properties: instance.get_physical_device_properties(physical_device),
                features: instance.get_physical_device_features(physical_device),
            })
        }
    }

    fn create_logical_device(instance: &ash::Instance, selected: &SelectedDevice) -> Result<ash::Device> {
        let priorities = [1.0];
        let mut queue_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(selected.graphics_family)
            .queue_priorities(&priorities)];
        if selected.present_family != selected.graphics_family {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(selected.present_family)
                    .queue_priorities(&priorities),
            );
        }

        let extension_names = [ash::khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(selected.features.sampler_anisotropy == vk::TRUE)
            .depth_bounds(selected.features.depth_bounds == vk::TRUE);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        unsafe {
            instance.create_device(selected.physical_device, &create_info, None)
                .map_err(|e| init_error(format!("Failed to create logical device: {:?}", e)))
        }
    }

    fn create_allocator_and_pool(
        instance: &ash::Instance,
        device: &ash::Device,
        selected: &SelectedDevice,
    ) -> Result<(Allocator, vk::CommandPool)> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: selected.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| init_error(format!("Failed to create GPU allocator: {:?}", e)))?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(selected.graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let upload_pool = unsafe {
            device.create_command_pool(&pool_info, None)
                .map_err(|e| init_error(format!("Failed to create upload command pool: {:?}", e)))?
        };
        Ok((allocator, upload_pool))
    }

    fn frame_fence(&self, frame_slot: usize) -> Result<vk::Fence> {
        self.frame_fences.get(frame_slot).copied().ok_or_else(|| {
            Error::InvalidState(format!("Frame slot {} out of range (max {})", frame_slot, MAX_FRAMES_IN_FLIGHT))
        })
    }

    /// Raise a validation error recorded under `panic_on_error`
    fn check_validation(&self) {
        #[cfg(feature = "vulkan-validation")]
        if let Some(message) = crate::debug::take_pending_error() {
            panic!("Vulkan validation error (panic_on_error): {}", message);
        }
    }
}

impl GraphicsDevice for VulkanGraphicsDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<dyn RendererBuffer>> {
        Ok(Arc::new(Buffer::new(self.ctx.clone(), &desc)?))
    }

    fn create_texture(&mut self, desc: TextureDesc) -> Result<Arc<dyn RendererTexture>> {
        let texture = Texture::new(self.ctx.clone(), &desc)?;
        engine_debug!("nova3d::vulkan", "Texture created: {}x{} {:?}", desc.width, desc.height, desc.format);
        Ok(Arc::new(texture))
    }

    fn create_sampler(&mut self, desc: SamplerDesc) -> Result<Arc<dyn RendererSampler>> {
        Ok(Arc::new(Sampler::new(self.ctx.clone(), &desc, self.max_anisotropy)?))
    }

    fn create_render_target(&mut self, desc: RenderTargetDesc) -> Result<Arc<dyn RendererRenderTarget>> {
        Ok(Arc::new(RenderTarget::new_owned(self.ctx.clone(), &desc)?))
    }

    fn create_shader(&mut self, desc: ShaderDesc) -> Result<Arc<dyn RendererShader>> {
        Ok(Arc::new(Shader::new(self.ctx.clone(), desc)?))
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<Arc<dyn RendererRenderPass>> {
        Ok(Arc::new(RenderPass::new(self.ctx.clone(), desc)?))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<Arc<dyn RendererFramebuffer>> {
        Ok(Arc::new(Framebuffer::new(self.ctx.clone(), desc)?))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<Arc<dyn RendererPipeline>> {
        let pipeline = Pipeline::new(self.ctx.clone(), self.descriptors.clone(), desc, self.depth_bounds_supported)?;
        Ok(Arc::new(pipeline))
    }

    fn create_binding_group(
        &mut self,
        layout: &BindingGroupLayoutDesc,
        resources: &[BindingResource],
    ) -> Result<Arc<dyn RendererBindingGroup>> {
        let group = BindingGroup::new(
            self.descriptors.clone(),
            layout,
            resources,
            self.limits.min_uniform_buffer_offset_alignment,
        )?;
        Ok(Arc::new(group))
    }

    fn create_command_list(&mut self) -> Result<Box<dyn RendererCommandList>> {
        Ok(Box::new(CommandList::new(self.ctx.clone())?))
    }

    fn create_swapchain(&mut self, width: u32, height: u32) -> Result<Box<dyn RendererSwapchain>> {
        Ok(Box::new(Swapchain::new(self.ctx.clone(), width, height, self.vsync)?))
    }

    fn wait_for_frame(&mut self, frame_slot: usize) -> Result<()> {
        let fence = self.frame_fence(frame_slot)?;
        // Reset happens in submit_frame so a skipped frame keeps the fence signaled
        unsafe {
            self.ctx.device.wait_for_fences(&[fence], true, u64::MAX)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to wait for frame fence {}: {:?}", frame_slot, e))?;
        }
        self.check_validation();
        Ok(())
    }

    fn submit_frame(
        &mut self,
        frame_slot: usize,
        commands: &dyn RendererCommandList,
        swapchain: &dyn RendererSwapchain,
        image_index: u32,
    ) -> Result<()> {
        let fence = self.frame_fence(frame_slot)?;
        let command_list: &CommandList = downcast(commands.as_any(), "Command list")?;
        let vk_swapchain: &Swapchain = downcast(swapchain.as_any(), "Swapchain")?;
        if !command_list.is_executable() {
            return Err(Error::InvalidState("submit_frame: command list has not been ended".to_string()));
        }
        let (wait_semaphore, signal_semaphore) = vk_swapchain.sync_semaphores(frame_slot, image_index)?;

        let wait_semaphores = [wait_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER];
        let command_buffers = [command_list.command_buffer];
        let signal_semaphores = [signal_semaphore];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx.device.reset_fences(&[fence])
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to reset frame fence {}: {:?}", frame_slot, e))?;
            self.ctx.device.queue_submit(self.ctx.graphics_queue, &[submit_info], fence)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to submit frame {}: {:?}", frame_slot, e))?;
        }
        self.check_validation();
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.ctx.device.device_wait_idle()
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to wait for device idle: {:?}", e))
        }
    }
}

impl Drop for VulkanGraphicsDevice {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();
            for fence in self.frame_fences.drain(..) {
                self.ctx.device.destroy_fence(fence, None);
            }
        }
        engine_debug!("nova3d::vulkan", "Vulkan device dropped ({} context references left)", Arc::strong_count(&self.ctx) - 1);
    }
}
