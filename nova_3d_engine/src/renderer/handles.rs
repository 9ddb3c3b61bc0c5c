//! Generational handles to renderer-owned resources
//!
//! A handle stays valid until its own resource is destroyed; a stale handle
//! never aliases a resource created later in the same slot.

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a mesh (vertex + optional index buffer)
    pub struct MeshHandle;

    /// Handle to a sampled texture
    pub struct TextureHandle;

    /// Handle to a shader program (vertex + fragment stage)
    pub struct ShaderHandle;

    /// Handle to a shader-material (a shader with bound property values)
    pub struct ShaderMaterialHandle;
}
