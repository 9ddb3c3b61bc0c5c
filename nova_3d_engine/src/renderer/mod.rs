//! Renderer module - frame orchestration and renderer-owned resources

pub mod handles;
pub mod material_layout;
pub mod resources;
pub mod frame;
pub mod renderer;

pub use handles::*;
pub use material_layout::*;
pub use resources::{
    engine_binding_layout, material_binding_layout, model_push_constant_range, MaterialBlockLocation,
    MeshDesc, ShaderMaterialDesc, ShaderProgramDesc, ENGINE_SET, MATERIAL_SET, MODEL_PUSH_CONSTANT_SIZE,
};
pub use frame::{FramePhase, FrameUniforms, ViewUniforms, FRAME_UNIFORMS_NAME, VIEW_UNIFORMS_NAME};
pub use renderer::{
    Renderer, RendererDesc, RendererStats, WindowSizeCallback, DEPTH_FORMAT, MATERIAL_BUFFER_NAME,
};
