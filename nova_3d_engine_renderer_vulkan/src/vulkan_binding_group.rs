/// BindingGroup - Vulkan implementation of the nova3d BindingGroup trait
///
/// Descriptor sets come from a [`DescriptorAllocator`] shared by the device,
/// its pipelines and every binding group. The allocator caches one
/// `VkDescriptorSetLayout` per distinct [`BindingGroupLayoutDesc`], so a
/// pipeline and a binding group built from equal descriptions always agree on
/// the layout handle. Pools grow on demand and sets are returned to their pool
/// when the binding group is dropped.

use nova_3d_engine::nova3d::Result;
use nova_3d_engine::nova3d::render::{
    BindingGroup as RendererBindingGroup, BindingGroupLayoutDesc, BindingResource, BindingType,
};
use nova_3d_engine::{engine_bail_warn, engine_debug, engine_err};
use ash::vk;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::vulkan_buffer::Buffer;
use crate::vulkan_context::{downcast, GpuContext};
use crate::vulkan_format::{binding_type_to_vk, stage_flags_to_vk};
use crate::vulkan_sampler::Sampler;
use crate::vulkan_texture::Texture;

const SETS_PER_POOL: u32 = 1024;

// ===== DESCRIPTOR ALLOCATOR =====

/// Layout cache + growing descriptor pools
pub(crate) struct DescriptorAllocator {
    ctx: Arc<GpuContext>,
    layouts: Mutex<FxHashMap<BindingGroupLayoutDesc, vk::DescriptorSetLayout>>,
    pools: Mutex<Vec<vk::DescriptorPool>>,
}

impl DescriptorAllocator {
    pub(crate) fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        let first_pool = Self::create_pool(&ctx)?;
        Ok(Self {
            ctx,
            layouts: Mutex::new(FxHashMap::default()),
            pools: Mutex::new(vec![first_pool]),
        })
    }

    fn create_pool(ctx: &GpuContext) -> Result<vk::DescriptorPool> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: SETS_PER_POOL * 2,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: SETS_PER_POOL * 2,
            },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&pool_sizes)
            .max_sets(SETS_PER_POOL);

        unsafe {
            ctx.device.create_descriptor_pool(&create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create descriptor pool: {:?}", e))
        }
    }

    /// Cached layout for `desc`, created on first use
    pub(crate) fn layout(&self, desc: &BindingGroupLayoutDesc) -> Result<vk::DescriptorSetLayout> {
        let mut layouts = self.layouts
            .lock()
            .map_err(|_| engine_err!("nova3d::vulkan", "Descriptor layout cache mutex poisoned"))?;
        if let Some(&layout) = layouts.get(desc) {
            return Ok(layout);
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(binding_type_to_vk(entry.binding_type))
                    .descriptor_count(1)
                    .stage_flags(stage_flags_to_vk(entry.stage_flags))
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe {
            self.ctx.device.create_descriptor_set_layout(&create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create descriptor set layout: {:?}", e))?
        };
        layouts.insert(desc.clone(), layout);
        engine_debug!("nova3d::vulkan", "Descriptor set layout cached ({} bindings, {} layouts)", bindings.len(), layouts.len());
        Ok(layout)
    }

    /// Allocate one set, adding a pool when the current one is exhausted
    fn allocate(&self, layout: vk::DescriptorSetLayout) -> Result<(vk::DescriptorPool, vk::DescriptorSet)> {
        let mut pools = self.pools
            .lock()
            .map_err(|_| engine_err!("nova3d::vulkan", "Descriptor pool mutex poisoned"))?;
        let layouts = [layout];

        // Older pools may have room again after sets were freed
        for &pool in pools.iter().rev() {
            let allocate_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts);
            match unsafe { self.ctx.device.allocate_descriptor_sets(&allocate_info) } {
                Ok(sets) => return Ok((pool, sets[0])),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => continue,
                Err(e) => return Err(engine_err!("nova3d::vulkan", "Failed to allocate descriptor set: {:?}", e)),
            }
        }

        let pool = Self::create_pool(&self.ctx)?;
        pools.push(pool);
        engine_debug!("nova3d::vulkan", "Descriptor pools exhausted, created a new pool (total: {})", pools.len());

        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe {
            self.ctx.device.allocate_descriptor_sets(&allocate_info)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to allocate descriptor set after pool growth: {:?}", e))?
        };
        Ok((pool, sets[0]))
    }

    fn free(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        // Serialized with allocations from the same pool
        if let Ok(_pools) = self.pools.lock() {
            unsafe {
                self.ctx.device.free_descriptor_sets(pool, &[set]).ok();
            }
        }
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        unsafe {
            if let Ok(pools) = self.pools.get_mut() {
                for pool in pools.drain(..) {
                    self.ctx.device.destroy_descriptor_pool(pool, None);
                }
            }
            if let Ok(layouts) = self.layouts.get_mut() {
                for (_, layout) in layouts.drain() {
                    self.ctx.device.destroy_descriptor_set_layout(layout, None);
                }
            }
        }
    }
}

// ===== BINDING GROUP =====

/// Vulkan binding group: one immutable descriptor set
pub struct BindingGroup {
    allocator: Arc<DescriptorAllocator>,
    pool: vk::DescriptorPool,
    pub(crate) descriptor_set: vk::DescriptorSet,
    _resources: Vec<BindingResource>,
}

impl BindingGroup {
    pub(crate) fn new(
        allocator: Arc<DescriptorAllocator>,
        layout_desc: &BindingGroupLayoutDesc,
        resources: &[BindingResource],
        min_uniform_offset_alignment: u64,
    ) -> Result<Self> {
        if resources.len() != layout_desc.entries.len() {
            engine_bail_warn!("nova3d::vulkan",
                "Binding group has {} resources, layout declares {} bindings",
                resources.len(), layout_desc.entries.len());
        }

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for (entry, resource) in layout_desc.entries.iter().zip(resources) {
            match (entry.binding_type, resource) {
                (BindingType::UniformBuffer, BindingResource::UniformBuffer { buffer, offset, range }) => {
                    let vk_buffer: &Buffer = downcast(buffer.as_any(), "Uniform buffer")?;
                    let in_bounds = offset.checked_add(*range).map_or(false, |end| end <= buffer.size());
                    if *range == 0 || !in_bounds {
                        engine_bail_warn!("nova3d::vulkan",
                            "Binding {}: uniform range {}..+{} outside buffer of {} bytes",
                            entry.binding, offset, range, buffer.size());
                    }
                    if min_uniform_offset_alignment > 1 && offset % min_uniform_offset_alignment != 0 {
                        engine_bail_warn!("nova3d::vulkan",
                            "Binding {}: uniform offset {} not aligned to {}",
                            entry.binding, offset, min_uniform_offset_alignment);
                    }
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(vk_buffer.buffer)
                            .offset(*offset)
                            .range(*range),
                    );
                }
                (BindingType::CombinedImageSampler, BindingResource::SampledTexture { texture, sampler }) => {
                    let vk_texture: &Texture = downcast(texture.as_any(), "Sampled texture")?;
                    let vk_sampler: &Sampler = downcast(sampler.as_any(), "Sampler")?;
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                            .image_view(vk_texture.view)
                            .sampler(vk_sampler.sampler),
                    );
                }
                (expected, _) => {
                    engine_bail_warn!("nova3d::vulkan",
                        "Binding {}: resource does not match layout type {:?}", entry.binding, expected);
                }
            }
        }

        let layout = allocator.layout(layout_desc)?;
        let (pool, descriptor_set) = allocator.allocate(layout)?;

        // Infos are fully built above, so the slices below stay valid
        let mut buffer_iter = buffer_infos.iter();
        let mut image_iter = image_infos.iter();
        let writes: Vec<vk::WriteDescriptorSet> = layout_desc
            .entries
            .iter()
            .filter_map(|entry| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(entry.binding)
                    .dst_array_element(0)
                    .descriptor_type(binding_type_to_vk(entry.binding_type));
                match entry.binding_type {
                    BindingType::UniformBuffer => buffer_iter.next().map(|info| write.buffer_info(std::slice::from_ref(info))),
                    BindingType::CombinedImageSampler => image_iter.next().map(|info| write.image_info(std::slice::from_ref(info))),
                }
            })
            .collect();

        unsafe {
            allocator.ctx.device.update_descriptor_sets(&writes, &[]);
        }

        Ok(Self {
            allocator,
            pool,
            descriptor_set,
            _resources: resources.to_vec(),
        })
    }
}

impl RendererBindingGroup for BindingGroup {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for BindingGroup {
    fn drop(&mut self) {
        self.allocator.free(self.pool, self.descriptor_set);
    }
}
