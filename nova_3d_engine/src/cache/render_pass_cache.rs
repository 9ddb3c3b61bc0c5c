/// RenderPassCache - structural render pass descriptions to reusable passes
///
/// Besides exact lookups, the cache groups passes into compatibility classes
/// (attachment count, formats and sample counts). Each class gets a
/// [`RenderPassCookie`]; a pipeline built against any pass of a class can be
/// used with every other pass of that class.

use std::sync::Arc;
use rustc_hash::FxHashMap;
use crate::error::Result;
use crate::engine_debug;
use crate::graphics_device::{
    AttachmentDesc, GraphicsDevice, RenderPass, RenderPassDesc, SampleCount, TextureFormat,
};

/// Stable identifier of a render pass compatibility class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderPassCookie(pub u32);

/// The part of a render pass description that decides compatibility
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CompatibilityKey {
    colors: Vec<(TextureFormat, SampleCount)>,
    depth: Option<(TextureFormat, SampleCount)>,
}

impl CompatibilityKey {
    fn from_desc(desc: &RenderPassDesc) -> Self {
        let shape = |a: &AttachmentDesc| (a.format, a.samples);
        Self {
            colors: desc.color_attachments.iter().map(shape).collect(),
            depth: desc.depth_attachment.as_ref().map(shape),
        }
    }

    fn samples(&self) -> SampleCount {
        self.colors
            .first()
            .or(self.depth.as_ref())
            .map_or(SampleCount::S1, |&(_, samples)| samples)
    }
}

/// First pass created for a class, used when building pipelines
struct CompatibilityClass {
    render_pass: Arc<dyn RenderPass>,
    samples: SampleCount,
}

pub struct RenderPassCache {
    /// Exact description -> (pass, cookie)
    passes: FxHashMap<RenderPassDesc, (Arc<dyn RenderPass>, RenderPassCookie)>,
    /// Compatibility key -> cookie
    cookies: FxHashMap<CompatibilityKey, RenderPassCookie>,
    /// Indexed by cookie
    classes: Vec<CompatibilityClass>,
}

impl RenderPassCache {
    pub fn new() -> Self {
        Self {
            passes: FxHashMap::default(),
            cookies: FxHashMap::default(),
            classes: Vec::new(),
        }
    }

    /// Return the pass for `desc`, creating it on first use
    pub fn find_or_create(
        &mut self,
        device: &mut dyn GraphicsDevice,
        desc: &RenderPassDesc,
    ) -> Result<(Arc<dyn RenderPass>, RenderPassCookie)> {
        if let Some((render_pass, cookie)) = self.passes.get(desc) {
            return Ok((render_pass.clone(), *cookie));
        }

        let render_pass = device.create_render_pass(desc)?;
        let key = CompatibilityKey::from_desc(desc);
        let cookie = match self.cookies.get(&key) {
            Some(cookie) => *cookie,
            None => {
                let cookie = RenderPassCookie(self.classes.len() as u32);
                self.classes.push(CompatibilityClass {
                    render_pass: render_pass.clone(),
                    samples: key.samples(),
                });
                self.cookies.insert(key, cookie);
                cookie
            }
        };

        engine_debug!(
            "nova3d::RenderPassCache",
            "Created render pass ({} color, depth: {}) in class {}",
            desc.color_attachments.len(),
            desc.depth_attachment.is_some(),
            cookie.0
        );
        self.passes.insert(desc.clone(), (render_pass.clone(), cookie));
        Ok((render_pass, cookie))
    }

    /// A pass of the class `cookie`, or `None` if no pass of that class was created
    pub fn find_compatible(&self, cookie: RenderPassCookie) -> Option<Arc<dyn RenderPass>> {
        self.classes.get(cookie.0 as usize).map(|c| c.render_pass.clone())
    }

    /// Sample count shared by every attachment of class `cookie`
    pub fn sample_count(&self, cookie: RenderPassCookie) -> Option<SampleCount> {
        self.classes.get(cookie.0 as usize).map(|c| c.samples)
    }

    /// Cookie of the class `desc` belongs to, without creating anything
    pub fn cookie_of(&self, desc: &RenderPassDesc) -> Option<RenderPassCookie> {
        self.cookies.get(&CompatibilityKey::from_desc(desc)).copied()
    }

    /// Number of distinct passes
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Number of compatibility classes
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Release every cached pass
    ///
    /// Cookies handed out before are invalid afterwards.
    pub fn free(&mut self) {
        engine_debug!("nova3d::RenderPassCache", "Freeing {} render passes", self.passes.len());
        self.passes.clear();
        self.cookies.clear();
        self.classes.clear();
    }
}

impl Default for RenderPassCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "render_pass_cache_tests.rs"]
mod tests;
