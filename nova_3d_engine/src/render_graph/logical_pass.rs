/// Logical passes: render tasks with unresolved image references

use crate::render_graph::GraphicalFrameData;
use crate::graphics_device::{ImageLayout, LoadOp};

/// Abstract image id, resolved to a concrete target in the physical phase
pub type LogicalImageId = u32;

/// The presented color image
pub const FINAL_COLOR: LogicalImageId = 0;
/// The depth image paired with the final color image
pub const FINAL_DEPTH: LogicalImageId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAspect {
    Color,
    Depth,
}

impl ImageAspect {
    /// Layout every pass leaves an image of this aspect in
    pub fn final_layout(&self) -> ImageLayout {
        match self {
            ImageAspect::Color => ImageLayout::PresentSrc,
            ImageAspect::Depth => ImageLayout::DepthStencilAttachment,
        }
    }
}

/// An image reference of one logical pass with its inferred layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalImageResource {
    pub id: LogicalImageId,
    pub aspect: ImageAspect,
    pub load_op: LoadOp,
    /// Layout when the pass starts
    pub initial_layout: ImageLayout,
    /// Render pass final layout
    pub final_layout: ImageLayout,
    /// Layout the next pass referencing this image starts from
    pub transition_layout: ImageLayout,
}

impl LogicalImageResource {
    pub fn new(id: LogicalImageId, aspect: ImageAspect) -> Self {
        Self {
            id,
            aspect,
            load_op: LoadOp::DontCare,
            initial_layout: ImageLayout::Undefined,
            final_layout: aspect.final_layout(),
            transition_layout: aspect.final_layout(),
        }
    }
}

/// Items `first_item..first_item + item_count` came from one render task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalRange {
    pub first_item: usize,
    pub item_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalPassKind {
    Clear {
        color: Option<[f32; 4]>,
        depth: Option<(f32, u32)>,
    },
    Draw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalPass {
    pub kind: LogicalPassKind,
    pub items: Vec<GraphicalFrameData>,
    pub ranges: Vec<LogicalRange>,
    pub color_images: Vec<LogicalImageResource>,
    pub depth_image: Option<LogicalImageResource>,
}

impl LogicalPass {
    pub fn is_clear(&self) -> bool {
        matches!(self.kind, LogicalPassKind::Clear { .. })
    }

    pub fn color_ids(&self) -> Vec<LogicalImageId> {
        self.color_images.iter().map(|i| i.id).collect()
    }

    /// Every image reference, colors first
    pub fn images(&self) -> impl Iterator<Item = &LogicalImageResource> {
        self.color_images.iter().chain(self.depth_image.iter())
    }

    pub fn images_mut(&mut self) -> impl Iterator<Item = &mut LogicalImageResource> {
        self.color_images.iter_mut().chain(self.depth_image.iter_mut())
    }

    /// Append `other`'s items, shifting its ranges past the existing items
    pub fn absorb(&mut self, other: LogicalPass) {
        let base = self.items.len();
        self.ranges.extend(other.ranges.into_iter().map(|r| LogicalRange {
            first_item: r.first_item + base,
            item_count: r.item_count,
        }));
        self.items.extend(other.items);
    }
}
