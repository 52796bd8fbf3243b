//! Core sculpting types.
//!
//! Tool identifiers and their category tables, brush shape enums and the
//! recorded input sample that drives a stroke.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Brush tool.
///
/// The tool selects the entry in the brush action table and the rows of the
/// per-tool lookup tables (strength curve, grab-delta mode, restore policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BrushTool {
    #[default]
    Draw = 0,
    DrawSharp = 1,
    Clay = 2,
    ClayStrips = 3,
    ClayThumb = 4,
    Layer = 5,
    Inflate = 6,
    Blob = 7,
    Crease = 8,
    Smooth = 9,
    Flatten = 10,
    Fill = 11,
    Scrape = 12,
    MultiplaneScrape = 13,
    Pinch = 14,
    Grab = 15,
    ElasticDeform = 16,
    SnakeHook = 17,
    Thumb = 18,
    Pose = 19,
    Nudge = 20,
    Rotate = 21,
    Boundary = 22,
    Cloth = 23,
    Simplify = 24,
    Mask = 25,
    DisplacementEraser = 26,
    DisplacementSmear = 27,
    Paint = 28,
    Smear = 29,
    DrawFaceSets = 30,
}

impl BrushTool {
    /// Tools that can keep accumulating on top of the previous step.
    pub fn has_accumulate(self) -> bool {
        matches!(
            self,
            Self::Draw
                | Self::DrawSharp
                | Self::Crease
                | Self::Blob
                | Self::Inflate
                | Self::Clay
                | Self::ClayStrips
                | Self::ClayThumb
                | Self::Rotate
                | Self::Scrape
                | Self::Flatten
        )
    }

    /// Tools whose displacement is blended toward the surface normal.
    pub fn has_normal_weight(self) -> bool {
        matches!(self, Self::Grab | Self::SnakeHook | Self::ElasticDeform)
    }

    /// Tools that follow the stroke direction with a rake rotation.
    pub fn has_rake(self) -> bool {
        matches!(self, Self::Grab | Self::SnakeHook)
    }

    /// Tools that always read pre-stroke coordinates.
    pub fn needs_original(self) -> bool {
        matches!(
            self,
            Self::Grab
                | Self::Rotate
                | Self::Thumb
                | Self::Layer
                | Self::DrawSharp
                | Self::ElasticDeform
                | Self::Smooth
                | Self::Boundary
                | Self::Pose
        )
    }

    /// Tools that operate on every node regardless of the brush radius.
    pub fn needs_all_nodes(self) -> bool {
        matches!(self, Self::ElasticDeform | Self::Pose | Self::Boundary)
    }

    /// Tools whose grab delta is measured from the anchored origin.
    pub fn uses_anchored_delta(self) -> bool {
        matches!(
            self,
            Self::Grab | Self::Pose | Self::Boundary | Self::Thumb | Self::ElasticDeform
        )
    }

    /// Tools that orient the brush tip along the stroke.
    pub fn has_tip_orientation(self) -> bool {
        matches!(
            self,
            Self::ClayStrips
                | Self::Pinch
                | Self::MultiplaneScrape
                | Self::ClayThumb
                | Self::Nudge
                | Self::SnakeHook
                | Self::Cloth
        )
    }

    /// Tools that never receive the gravity pass.
    pub fn excludes_gravity(self) -> bool {
        matches!(
            self,
            Self::Mask
                | Self::Smooth
                | Self::Simplify
                | Self::DisplacementSmear
                | Self::DisplacementEraser
        )
    }

    /// Tools that restore the pre-stroke coordinates before every step.
    pub fn restores_each_step(self) -> bool {
        matches!(
            self,
            Self::Grab | Self::Thumb | Self::Rotate | Self::Pose | Self::ElasticDeform
        )
    }

    /// Tools that write vertex colors.
    pub fn is_paint(self) -> bool {
        matches!(self, Self::Paint | Self::Smear)
    }

    /// Tools that keep the sculpt normal of the first step.
    pub fn freezes_sculpt_normal(self) -> bool {
        matches!(self, Self::Grab | Self::ElasticDeform)
    }

    /// Tools that need the sculpt normal even without an area plane.
    pub fn needs_normal(self) -> bool {
        matches!(
            self,
            Self::Blob
                | Self::Crease
                | Self::Draw
                | Self::DrawSharp
                | Self::Cloth
                | Self::Layer
                | Self::Nudge
                | Self::Pinch
                | Self::Rotate
                | Self::ElasticDeform
                | Self::Thumb
        )
    }
}

/// Shape of the brush influence volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FalloffShape {
    /// Euclidean distance to the brush center
    #[default]
    Sphere = 0,
    /// Distance to the view ray through the brush center
    Tube = 1,
}

/// Direction used as the primary displacement axis of a brush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisplacementDirection {
    /// Weighted average normal under the brush
    #[default]
    Area = 0,
    /// View direction
    View = 1,
    X = 2,
    Y = 3,
    Z = 4,
}

/// Coordinate space used to sample a brush texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TextureMapMode {
    /// Screen-space projection of the point
    #[default]
    View = 0,
    /// Brush-local area projection
    Area = 1,
    /// Object-space 3D lookup
    Tiled3D = 2,
}

/// Object axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }
}

/// Pen flip flag for [`StrokeSample::flags`].
pub const SAMPLE_PEN_FLIP: u32 = 1 << 0;
/// Invert flag for [`StrokeSample::flags`].
pub const SAMPLE_INVERT: u32 = 1 << 1;

/// A single recorded input sample.
///
/// Samples are stored in a flat log for deterministic replay, so the layout is
/// plain old data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct StrokeSample {
    /// Object-space location under the cursor
    pub location: [f32; 3],
    /// Surface normal at the location
    pub normal: [f32; 3],
    /// Region-space mouse position in pixels
    pub mouse: [f32; 2],
    /// Pen pressure 0.0-1.0
    pub pressure: f32,
    /// Pen tilt in [-1, 1] per axis
    pub tilt: [f32; 2],
    /// `SAMPLE_*` bit flags
    pub flags: u32,
}

impl StrokeSample {
    /// Create a sample at a location with full pressure.
    pub fn at(location: Vec3, normal: Vec3) -> Self {
        Self {
            location: location.to_array(),
            normal: normal.to_array(),
            mouse: [0.0; 2],
            pressure: 1.0,
            tilt: [0.0; 2],
            flags: 0,
        }
    }

    pub fn with_pressure(mut self, pressure: f32) -> Self {
        self.pressure = pressure.clamp(0.0, 1.0);
        self
    }

    pub fn with_mouse(mut self, mouse: Vec2) -> Self {
        self.mouse = mouse.to_array();
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn location(&self) -> Vec3 {
        Vec3::from_array(self.location)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }

    pub fn mouse(&self) -> Vec2 {
        Vec2::from_array(self.mouse)
    }

    pub fn pen_flip(&self) -> bool {
        self.flags & SAMPLE_PEN_FLIP != 0
    }

    pub fn invert(&self) -> bool {
        self.flags & SAMPLE_INVERT != 0
    }
}
