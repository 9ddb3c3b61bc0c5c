/// RenderGraph - bakes a RenderQueue into an ordered list of physical passes
///
/// One bake consumes a whole queue. Each view goes through five phases in
/// queue order:
///
/// 1. create one logical pass per render task
/// 2. assign the well-known logical image ids
/// 3. merge consecutive draw passes that target the same images
/// 4. infer load ops and layouts from a per-bake "last layout" table
/// 5. bind physical targets and build render passes, framebuffers and pipelines
///
/// The layout table lives for one bake and carries over from one view to the
/// next, so a later view loads what an earlier view drew.

use std::sync::Arc;
use rustc_hash::FxHashMap;
use crate::error::Result;
use crate::{engine_debug, engine_trace};
use crate::cache::{
    MaterialPipelineCache, PipelineCacheInfo, PipelineProgram, PipelineSettings, RenderPassCache,
    RenderPassCookie,
};
use crate::graphics_device::{
    AttachmentDesc, ClearValue, FramebufferDesc, GraphicsDevice, ImageLayout, LoadOp,
    RenderPassDesc, RenderTarget, SampleCount, StoreOp,
};
use crate::render_graph::logical_pass::{
    ImageAspect, LogicalImageId, LogicalImageResource, LogicalPass, LogicalPassKind, LogicalRange,
    FINAL_COLOR, FINAL_DEPTH,
};
use crate::render_graph::physical_pass::{
    PhysicalClear, PhysicalPass, PhysicalRenderPass, PipelineBatch, RenderRange,
    DEFAULT_CLEAR_COLOR, DEFAULT_CLEAR_DEPTH,
};
use crate::render_graph::{RenderQueue, RenderTask, ViewBlock};
use crate::renderer::{ShaderHandle, ShaderMaterialHandle};

// ===== BAKE INPUTS =====

/// Concrete images behind the well-known logical ids for this frame
#[derive(Clone)]
pub struct PhysicalTargets {
    pub color: Arc<dyn RenderTarget>,
    pub depth: Arc<dyn RenderTarget>,
}

/// Pipeline inputs of a shader-material
pub struct ResolvedMaterial<'a> {
    pub program: &'a PipelineProgram,
    pub settings: PipelineSettings,
}

/// Looks up uploaded shader-materials
pub trait MaterialResolver {
    /// `None` when `material` does not exist (yet) or is not bound to `shader`
    fn resolve(&self, material: ShaderMaterialHandle, shader: ShaderHandle) -> Option<ResolvedMaterial<'_>>;
}

/// Everything a bake reads or fills
pub struct BakeContext<'a> {
    pub device: &'a mut dyn GraphicsDevice,
    pub render_passes: &'a mut RenderPassCache,
    pub pipelines: &'a mut MaterialPipelineCache,
    pub materials: &'a dyn MaterialResolver,
    pub targets: PhysicalTargets,
}

// ===== RENDER GRAPH =====

pub struct RenderGraph {
    /// Per view, after merging and layout inference
    logical_passes: Vec<Vec<LogicalPass>>,
    physical_passes: Vec<PhysicalPass>,
    /// Layout of every touched image once all passes have run
    layouts: FxHashMap<LogicalImageId, ImageLayout>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            logical_passes: Vec::new(),
            physical_passes: Vec::new(),
            layouts: FxHashMap::default(),
        }
    }

    /// Bake every view of `queue`, replacing the result of any previous bake
    pub fn bake(&mut self, queue: &RenderQueue, ctx: &mut BakeContext) -> Result<()> {
        self.logical_passes.clear();
        self.physical_passes.clear();
        self.layouts.clear();

        let resources = Self::assign_physical_resources(&ctx.targets);

        for (view_index, view) in queue.view_blocks.iter().enumerate() {
            let mut passes = Self::create_logical_passes(view);
            Self::assign_logical_ids(&mut passes);
            let created = passes.len();
            let mut passes = Self::merge_logical_passes(passes);
            Self::compute_logical_layouts(&mut passes, &mut self.layouts);

            let physical = Self::create_physical_passes(view_index, &passes, &resources, ctx)?;
            engine_trace!(
                "nova3d::RenderGraph",
                "View {}: {} tasks, {} logical passes, {} physical passes",
                view_index,
                created,
                passes.len(),
                physical.len()
            );

            self.logical_passes.push(passes);
            self.physical_passes.extend(physical);
        }
        Ok(())
    }

    // ===== ACCESSORS =====

    pub fn physical_passes(&self) -> &[PhysicalPass] {
        &self.physical_passes
    }

    pub fn into_physical_passes(self) -> Vec<PhysicalPass> {
        self.physical_passes
    }

    /// Logical passes of `view_index` after merging and layout inference
    pub fn logical_passes(&self, view_index: usize) -> &[LogicalPass] {
        self.logical_passes.get(view_index).map(|p| p.as_slice()).unwrap_or(&[])
    }

    /// Layout `id` is left in after the last pass, `None` if nothing touched it
    pub fn final_layout(&self, id: LogicalImageId) -> Option<ImageLayout> {
        self.layouts.get(&id).copied()
    }

    // ===== PHASE 1: LOGICAL PASSES =====

    fn create_logical_passes(view: &ViewBlock) -> Vec<LogicalPass> {
        view.tasks
            .iter()
            .map(|task| match task {
                RenderTask::ClearTarget(clear) => LogicalPass {
                    kind: LogicalPassKind::Clear { color: clear.color, depth: clear.depth },
                    items: Vec::new(),
                    ranges: vec![LogicalRange { first_item: 0, item_count: 0 }],
                    color_images: Vec::new(),
                    depth_image: None,
                },
                RenderTask::RenderGroup(items) => LogicalPass {
                    kind: LogicalPassKind::Draw,
                    items: items.clone(),
                    ranges: vec![LogicalRange { first_item: 0, item_count: items.len() }],
                    color_images: Vec::new(),
                    depth_image: None,
                },
            })
            .collect()
    }

    // ===== PHASE 2: LOGICAL IDS =====

    fn assign_logical_ids(passes: &mut [LogicalPass]) {
        for pass in passes {
            let (color, depth) = match pass.kind {
                LogicalPassKind::Draw => (true, true),
                LogicalPassKind::Clear { color, depth } => (color.is_some(), depth.is_some()),
            };
            if color {
                pass.color_images = vec![LogicalImageResource::new(FINAL_COLOR, ImageAspect::Color)];
            }
            if depth {
                pass.depth_image = Some(LogicalImageResource::new(FINAL_DEPTH, ImageAspect::Depth));
            }
        }
    }

    // ===== PHASE 3: MERGE =====

    /// Fold each draw pass into the previous pass when that one is a draw pass
    /// on the same color and depth ids
    fn merge_logical_passes(passes: Vec<LogicalPass>) -> Vec<LogicalPass> {
        let mut merged: Vec<LogicalPass> = Vec::with_capacity(passes.len());
        for pass in passes {
            let target = merged.last_mut().filter(|prev| {
                !prev.is_clear()
                    && !pass.is_clear()
                    && prev.color_ids() == pass.color_ids()
                    && prev.depth_image.map(|d| d.id) == pass.depth_image.map(|d| d.id)
            });
            match target {
                Some(prev) => prev.absorb(pass),
                None => merged.push(pass),
            }
        }
        merged
    }

    // ===== PHASE 4: LAYOUTS =====

    fn compute_logical_layouts(passes: &mut [LogicalPass], table: &mut FxHashMap<LogicalImageId, ImageLayout>) {
        for pass in passes {
            let is_clear = pass.is_clear();
            for image in pass.images_mut() {
                match table.get(&image.id) {
                    Some(&previous) => {
                        image.load_op = LoadOp::Load;
                        image.initial_layout = previous;
                    }
                    None => {
                        image.load_op = LoadOp::Clear;
                        image.initial_layout = ImageLayout::Undefined;
                    }
                }
                image.final_layout = image.aspect.final_layout();
                // Clears are recorded as transfer operations before the next pass
                image.transition_layout = if is_clear {
                    ImageLayout::TransferDst
                } else {
                    image.final_layout
                };
                table.insert(image.id, image.transition_layout);
            }
        }
    }

    // ===== PHASE 5: PHYSICAL =====

    fn assign_physical_resources(targets: &PhysicalTargets) -> FxHashMap<LogicalImageId, Arc<dyn RenderTarget>> {
        let mut resources = FxHashMap::default();
        resources.insert(FINAL_COLOR, targets.color.clone());
        resources.insert(FINAL_DEPTH, targets.depth.clone());
        resources
    }

    fn create_physical_passes(
        view_index: usize,
        passes: &[LogicalPass],
        resources: &FxHashMap<LogicalImageId, Arc<dyn RenderTarget>>,
        ctx: &mut BakeContext,
    ) -> Result<Vec<PhysicalPass>> {
        let mut physical = Vec::new();
        let mut index = 0;

        while index < passes.len() {
            let pass = &passes[index];
            if !pass.is_clear() {
                physical.push(Self::create_draw_pass(view_index, pass, None, resources, ctx)?);
                index += 1;
                continue;
            }

            let folds = passes.get(index + 1).is_some_and(|next| {
                !next.is_clear() && pass.images().all(|img| next.images().any(|n| n.id == img.id))
            });
            if folds {
                let draw = &passes[index + 1];
                physical.push(Self::create_draw_pass(view_index, draw, Some(pass), resources, ctx)?);
                index += 2;
            } else {
                let (clear_colors, clear_depths, clears) = Self::physical_clears(pass, resources);
                physical.push(PhysicalPass {
                    view_index,
                    clear_colors,
                    clear_depths,
                    clears,
                    render_pass: None,
                    items: Vec::new(),
                    ranges: Vec::new(),
                });
                index += 1;
            }
        }
        Ok(physical)
    }

    fn physical_clears(
        pass: &LogicalPass,
        resources: &FxHashMap<LogicalImageId, Arc<dyn RenderTarget>>,
    ) -> (Vec<[f32; 4]>, Vec<(f32, u32)>, Vec<PhysicalClear>) {
        let LogicalPassKind::Clear { color, depth } = pass.kind else {
            return (Vec::new(), Vec::new(), Vec::new());
        };
        let mut clears = Vec::new();
        for image in pass.images() {
            let value = match image.aspect {
                ImageAspect::Color => ClearValue::Color(color.unwrap_or(DEFAULT_CLEAR_COLOR)),
                ImageAspect::Depth => {
                    let (depth, stencil) = depth.unwrap_or((DEFAULT_CLEAR_DEPTH, 0));
                    ClearValue::DepthStencil { depth, stencil }
                }
            };
            clears.push(PhysicalClear {
                target: resources[&image.id].clone(),
                old_layout: image.initial_layout,
                value,
            });
        }
        (color.into_iter().collect(), depth.into_iter().collect(), clears)
    }

    fn attachment(image: &LogicalImageResource, target: &Arc<dyn RenderTarget>) -> AttachmentDesc {
        AttachmentDesc {
            format: target.format(),
            samples: SampleCount::S1,
            load_op: image.load_op,
            store_op: StoreOp::Store,
            initial_layout: image.initial_layout,
            final_layout: image.final_layout,
        }
    }

    fn create_draw_pass(
        view_index: usize,
        pass: &LogicalPass,
        clear: Option<&LogicalPass>,
        resources: &FxHashMap<LogicalImageId, Arc<dyn RenderTarget>>,
        ctx: &mut BakeContext,
    ) -> Result<PhysicalPass> {
        let (clear_colors, clear_depths, clears) = match clear {
            Some(clear) => Self::physical_clears(clear, resources),
            None => (Vec::new(), Vec::new(), Vec::new()),
        };

        let colors: Vec<Arc<dyn RenderTarget>> =
            pass.color_images.iter().map(|i| resources[&i.id].clone()).collect();
        let depth = pass.depth_image.map(|i| resources[&i.id].clone());

        let desc = RenderPassDesc {
            color_attachments: pass
                .color_images
                .iter()
                .zip(&colors)
                .map(|(image, target)| Self::attachment(image, target))
                .collect(),
            depth_attachment: pass
                .depth_image
                .as_ref()
                .zip(depth.as_ref())
                .map(|(image, target)| Self::attachment(image, target)),
        };
        let (render_pass, cookie) = ctx.render_passes.find_or_create(&mut *ctx.device, &desc)?;

        let (width, height) = colors
            .first()
            .or(depth.as_ref())
            .map_or((0, 0), |t| (t.width(), t.height()));
        let framebuffer = ctx.device.create_framebuffer(&FramebufferDesc {
            render_pass: &render_pass,
            color_attachments: colors.clone(),
            depth_stencil_attachment: depth.clone(),
            width,
            height,
        })?;

        let mut clear_values: Vec<ClearValue> =
            colors.iter().map(|_| ClearValue::Color(DEFAULT_CLEAR_COLOR)).collect();
        if depth.is_some() {
            clear_values.push(ClearValue::DepthStencil { depth: DEFAULT_CLEAR_DEPTH, stencil: 0 });
        }

        let ranges = pass
            .ranges
            .iter()
            .map(|range| Self::create_render_range(pass, range, cookie, ctx))
            .collect::<Result<Vec<_>>>()?;

        Ok(PhysicalPass {
            view_index,
            clear_colors,
            clear_depths,
            clears,
            render_pass: Some(PhysicalRenderPass {
                desc,
                render_pass,
                cookie,
                framebuffer,
                clear_values,
                width,
                height,
            }),
            items: pass.items.clone(),
            ranges,
        })
    }

    /// Split `range` into runs of consecutive items sharing a shader-material
    fn create_render_range(
        pass: &LogicalPass,
        range: &LogicalRange,
        cookie: RenderPassCookie,
        ctx: &mut BakeContext,
    ) -> Result<RenderRange> {
        let materials = ctx.materials;
        let mut batches: Vec<PipelineBatch> = Vec::new();

        for index in range.first_item..range.first_item + range.item_count {
            let item = &pass.items[index];
            let Some(resolved) = materials.resolve(item.material, item.shader) else {
                engine_debug!(
                    "nova3d::RenderGraph",
                    "Skipping draw item {}: shader-material {:?} is not available for shader {:?}",
                    index,
                    item.material,
                    item.shader
                );
                continue;
            };

            if let Some(last) = batches.last_mut() {
                if last.shader_material == item.material && last.first_item + last.item_count == index {
                    last.item_count += 1;
                    continue;
                }
            }

            let info = PipelineCacheInfo {
                shader_material: item.material,
                render_pass_cookie: cookie,
                settings: resolved.settings,
            };
            let pipeline = ctx
                .pipelines
                .find_or_create(&mut *ctx.device, ctx.render_passes, &info, resolved.program)?;
            batches.push(PipelineBatch {
                first_item: index,
                item_count: 1,
                shader_material: item.material,
                pipeline,
            });
        }

        Ok(RenderRange {
            first_item: range.first_item,
            item_count: range.item_count,
            batches,
        })
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "render_graph_tests.rs"]
mod tests;
