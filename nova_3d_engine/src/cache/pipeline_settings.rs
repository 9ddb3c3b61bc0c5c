/// PipelineSettings - the per-material fixed-function state of a pipeline
///
/// Equality and hashing use the bit patterns of the float fields so the
/// settings can key a hash map.

use std::hash::{Hash, Hasher};
use rustc_hash::FxHasher;
use crate::graphics_device::{
    BlendFactor, BlendOp, ColorBlendState, CompareOp, CullMode, DepthStencilState, FrontFace,
    PolygonMode, PrimitiveTopology, RasterizationState,
};

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub color_blend: ColorBlendState,
    pub depth_stencil: DepthStencilState,
    pub rasterization: RasterizationState,
    pub topology: PrimitiveTopology,
}

impl Default for PipelineSettings {
    /// Opaque geometry with reverse-Z depth testing
    fn default() -> Self {
        Self {
            color_blend: ColorBlendState {
                blend_enable: false,
                src_color_factor: BlendFactor::One,
                dst_color_factor: BlendFactor::Zero,
                color_blend_op: BlendOp::Add,
                src_alpha_factor: BlendFactor::One,
                dst_alpha_factor: BlendFactor::Zero,
                alpha_blend_op: BlendOp::Add,
            },
            depth_stencil: DepthStencilState {
                depth_test_enable: true,
                depth_write_enable: true,
                depth_compare_op: CompareOp::GreaterOrEqual,
                depth_bounds_test_enable: false,
                min_depth_bounds: 0.0,
                max_depth_bounds: 1.0,
            },
            rasterization: RasterizationState {
                cull_mode: CullMode::Back,
                front_face: FrontFace::CounterClockwise,
                polygon_mode: PolygonMode::Fill,
            },
            topology: PrimitiveTopology::TriangleList,
        }
    }
}

impl PipelineSettings {
    /// Straight alpha blending, depth test without depth writes
    pub fn alpha_blended() -> Self {
        let mut settings = Self::default();
        settings.color_blend.blend_enable = true;
        settings.color_blend.src_color_factor = BlendFactor::SrcAlpha;
        settings.color_blend.dst_color_factor = BlendFactor::OneMinusSrcAlpha;
        settings.color_blend.src_alpha_factor = BlendFactor::One;
        settings.color_blend.dst_alpha_factor = BlendFactor::OneMinusSrcAlpha;
        settings.depth_stencil.depth_write_enable = false;
        settings
    }

    /// 64-bit hash of every field
    pub fn settings_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn key(&self) -> SettingsKey {
        let b = &self.color_blend;
        let d = &self.depth_stencil;
        let r = &self.rasterization;
        (
            (b.blend_enable, b.src_color_factor, b.dst_color_factor, b.color_blend_op),
            (b.src_alpha_factor, b.dst_alpha_factor, b.alpha_blend_op),
            (d.depth_test_enable, d.depth_write_enable, d.depth_compare_op, d.depth_bounds_test_enable),
            (d.min_depth_bounds.to_bits(), d.max_depth_bounds.to_bits()),
            (r.cull_mode, r.front_face, r.polygon_mode),
            self.topology,
        )
    }
}

type SettingsKey = (
    (bool, BlendFactor, BlendFactor, BlendOp),
    (BlendFactor, BlendFactor, BlendOp),
    (bool, bool, CompareOp, bool),
    (u32, u32),
    (CullMode, FrontFace, PolygonMode),
    PrimitiveTopology,
);

impl PartialEq for PipelineSettings {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PipelineSettings {}

impl Hash for PipelineSettings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}
