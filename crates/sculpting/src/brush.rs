//! Brush configuration.
//!
//! A [`Brush`] is the serializable per-tool configuration a stroke is started
//! with. Named constructors give a sensible starting point per tool, the same
//! way presets are handed out by the UI layer.

use serde::{Deserialize, Serialize};

use crate::error::SculptResult;
use crate::falloff::FalloffCurve;
use crate::types::{BrushTool, DisplacementDirection, FalloffShape, TextureMapMode};

/// Sub-mode of the mask tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskTool {
    #[default]
    Draw,
    Smooth,
}

/// Deformation used by the smooth tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmoothDeform {
    /// Plain neighbor average
    #[default]
    Laplacian,
    /// Volume preserving HC smoothing
    Surface,
}

/// Per-tool brush settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Brush {
    pub name: String,
    pub tool: BrushTool,

    /// Object-space radius
    pub radius: f32,
    /// Strength (0.0 to 1.0, squared before use)
    pub strength: f32,
    pub curve: FalloffCurve,
    /// Fraction of the radius with full strength
    pub hardness: f32,
    pub falloff_shape: FalloffShape,
    pub direction: DisplacementDirection,

    /// Roundness of the cube tip. Values below 1 switch to a square tip.
    pub tip_roundness: f32,
    /// Horizontal scale of the cube tip
    pub tip_scale_x: f32,

    /// Blend of the grab delta toward the surface normal
    pub normal_weight: f32,
    /// Rotation following the stroke direction
    pub rake_factor: f32,
    /// Smoothing applied after the main action
    pub autosmooth_factor: f32,
    /// Height offset of the brush plane relative to the radius
    pub plane_offset: f32,
    /// Distance beyond which plane brushes stop affecting vertices
    pub plane_trim: f32,
    /// Layer brush displacement limit
    pub height: f32,
    /// Pinch ratio of the crease and blob brushes
    pub crease_pinch_factor: f32,
    /// Radius scale used when sampling the sculpt normal
    pub normal_radius_factor: f32,
    /// Radius scale used when sampling the plane center (Scrape, Fill)
    pub area_radius_factor: f32,

    pub mask_tool: MaskTool,
    pub smooth_deform: SmoothDeform,
    /// Surface smoothing: how much of the original shape is kept
    pub surface_smooth_shape_preservation: f32,
    /// Surface smoothing: weight of the vertex itself in the displacement
    pub surface_smooth_current_vertex: f32,
    pub surface_smooth_iterations: u32,

    pub texture_mode: TextureMapMode,

    // Paint
    pub color: [f32; 4],
    pub flow: f32,
    pub wet_mix: f32,
    pub wet_persistence: f32,
    pub density: f32,

    // Flags
    pub accumulate: bool,
    pub anchored: bool,
    pub drag_dot: bool,
    pub frontface: bool,
    pub original_normal: bool,
    pub original_plane: bool,
    pub use_plane_trim: bool,
    pub invert_to_scrape_fill: bool,
    /// Subtract instead of add (`BRUSH_DIR_IN`)
    pub invert_direction: bool,
    pub size_pressure: bool,
    pub strength_pressure: bool,
    pub offset_pressure: bool,
    pub area_radius_pressure: bool,
    pub inverse_smooth_pressure: bool,
    pub hardness_pressure: bool,
    pub hardness_pressure_invert: bool,
    pub flow_pressure: bool,
    pub flow_pressure_invert: bool,
    pub wet_mix_pressure: bool,
    pub wet_mix_pressure_invert: bool,
    pub wet_persistence_pressure: bool,
    pub wet_persistence_pressure_invert: bool,
    pub density_pressure: bool,
    pub density_pressure_invert: bool,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            name: "Draw".to_string(),
            tool: BrushTool::Draw,
            radius: 0.25,
            strength: 0.5,
            curve: FalloffCurve::Smooth,
            hardness: 0.0,
            falloff_shape: FalloffShape::Sphere,
            direction: DisplacementDirection::Area,
            tip_roundness: 1.0,
            tip_scale_x: 1.0,
            normal_weight: 0.0,
            rake_factor: 0.0,
            autosmooth_factor: 0.0,
            plane_offset: 0.0,
            plane_trim: 0.5,
            height: 0.5,
            crease_pinch_factor: 0.5,
            normal_radius_factor: 0.5,
            area_radius_factor: 0.5,
            mask_tool: MaskTool::Draw,
            smooth_deform: SmoothDeform::Laplacian,
            surface_smooth_shape_preservation: 0.5,
            surface_smooth_current_vertex: 0.5,
            surface_smooth_iterations: 4,
            texture_mode: TextureMapMode::View,
            color: [1.0, 1.0, 1.0, 1.0],
            flow: 1.0,
            wet_mix: 0.0,
            wet_persistence: 0.0,
            density: 1.0,
            accumulate: false,
            anchored: false,
            drag_dot: false,
            frontface: false,
            original_normal: false,
            original_plane: false,
            use_plane_trim: false,
            invert_to_scrape_fill: false,
            invert_direction: false,
            size_pressure: false,
            strength_pressure: true,
            offset_pressure: false,
            area_radius_pressure: false,
            inverse_smooth_pressure: false,
            hardness_pressure: false,
            hardness_pressure_invert: false,
            flow_pressure: false,
            flow_pressure_invert: false,
            wet_mix_pressure: false,
            wet_mix_pressure_invert: false,
            wet_persistence_pressure: false,
            wet_persistence_pressure_invert: false,
            density_pressure: false,
            density_pressure_invert: false,
        }
    }
}

/// Inputs to [`Brush::stroke_strength`] that change per step.
#[derive(Debug, Clone, Copy)]
pub struct StrengthInput {
    pub pressure: f32,
    pub pen_flip: bool,
    pub invert: bool,
    /// Spacing overlap reported by the stroke sampler
    pub overlap: f32,
    /// Symmetry feather
    pub feather: f32,
}

impl Brush {
    fn named(name: &str, tool: BrushTool) -> Self {
        Self {
            name: name.to_string(),
            tool,
            ..Default::default()
        }
    }

    pub fn draw() -> Self {
        Self::named("Draw", BrushTool::Draw)
    }

    pub fn draw_sharp() -> Self {
        Self {
            curve: FalloffCurve::Sharp,
            ..Self::named("Draw Sharp", BrushTool::DrawSharp)
        }
    }

    pub fn clay() -> Self {
        Self {
            accumulate: true,
            ..Self::named("Clay", BrushTool::Clay)
        }
    }

    pub fn clay_strips() -> Self {
        Self {
            tip_roundness: 0.18,
            curve: FalloffCurve::Constant,
            strength: 0.6,
            accumulate: true,
            ..Self::named("Clay Strips", BrushTool::ClayStrips)
        }
    }

    pub fn clay_thumb() -> Self {
        Self {
            size_pressure: true,
            ..Self::named("Clay Thumb", BrushTool::ClayThumb)
        }
    }

    pub fn layer() -> Self {
        Self {
            strength: 1.0,
            ..Self::named("Layer", BrushTool::Layer)
        }
    }

    pub fn inflate() -> Self {
        Self::named("Inflate", BrushTool::Inflate)
    }

    pub fn blob() -> Self {
        Self {
            crease_pinch_factor: 0.5,
            ..Self::named("Blob", BrushTool::Blob)
        }
    }

    pub fn crease() -> Self {
        Self {
            curve: FalloffCurve::Sharp,
            crease_pinch_factor: 0.5,
            ..Self::named("Crease", BrushTool::Crease)
        }
    }

    pub fn smooth() -> Self {
        Self {
            strength: 0.5,
            ..Self::named("Smooth", BrushTool::Smooth)
        }
    }

    pub fn flatten() -> Self {
        Self::named("Flatten", BrushTool::Flatten)
    }

    pub fn fill() -> Self {
        Self {
            invert_to_scrape_fill: true,
            ..Self::named("Fill", BrushTool::Fill)
        }
    }

    pub fn scrape() -> Self {
        Self {
            invert_to_scrape_fill: true,
            ..Self::named("Scrape", BrushTool::Scrape)
        }
    }

    pub fn pinch() -> Self {
        Self {
            curve: FalloffCurve::Sharp,
            ..Self::named("Pinch", BrushTool::Pinch)
        }
    }

    pub fn grab() -> Self {
        Self {
            strength: 1.0,
            strength_pressure: false,
            ..Self::named("Grab", BrushTool::Grab)
        }
    }

    pub fn snake_hook() -> Self {
        Self {
            strength: 1.0,
            rake_factor: 1.0,
            strength_pressure: false,
            ..Self::named("Snake Hook", BrushTool::SnakeHook)
        }
    }

    pub fn thumb() -> Self {
        Self::named("Thumb", BrushTool::Thumb)
    }

    pub fn nudge() -> Self {
        Self::named("Nudge", BrushTool::Nudge)
    }

    pub fn rotate() -> Self {
        Self::named("Rotate", BrushTool::Rotate)
    }

    pub fn mask() -> Self {
        Self {
            strength: 1.0,
            ..Self::named("Mask", BrushTool::Mask)
        }
    }

    pub fn paint() -> Self {
        Self {
            strength: 1.0,
            ..Self::named("Paint", BrushTool::Paint)
        }
    }

    /// Parse a brush from JSON. Missing fields fall back to the defaults.
    pub fn from_json_str(json: &str) -> SculptResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> SculptResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether vertices are tested against the square tip instead of a sphere.
    pub fn has_cube_tip(&self) -> bool {
        self.tool == BrushTool::ClayStrips || self.tip_roundness < 1.0
    }

    /// Whether the footprint may change between steps.
    ///
    /// Anchored strokes and grab-like tools keep the footprint of the first
    /// step, including its pressure.
    pub fn supports_dynamic_size(&self) -> bool {
        !self.anchored
            && !matches!(
                self.tool,
                BrushTool::Grab
                    | BrushTool::ElasticDeform
                    | BrushTool::Pose
                    | BrushTool::Boundary
                    | BrushTool::Thumb
                    | BrushTool::Rotate
                    | BrushTool::SnakeHook
            )
    }

    /// Whether the radius follows pen pressure.
    pub fn uses_size_pressure(&self) -> bool {
        self.size_pressure && self.supports_dynamic_size()
    }

    /// Whether the mesh goes back to its pre-stroke state before every step.
    pub fn restores_each_step(&self) -> bool {
        if self.tool == BrushTool::Cloth {
            return false;
        }
        self.tool.restores_each_step() || self.anchored || self.drag_dot
    }

    /// Plane offset scaled by pressure when `offset_pressure` is set.
    pub fn plane_offset_for(&self, pressure: f32) -> f32 {
        if self.offset_pressure {
            self.plane_offset * pressure
        } else {
            self.plane_offset
        }
    }

    /// Overall strength of one step, before per-vertex factors.
    ///
    /// Strength is squared to give more precision at low values, then shaped
    /// per tool. Tools without a row return 0.
    pub fn stroke_strength(&self, input: StrengthInput) -> f32 {
        let root_alpha = self.strength;
        let alpha = root_alpha * root_alpha;
        let pressure = if self.strength_pressure { input.pressure } else { 1.0 };
        let sign = |flag: bool| if flag { -1.0 } else { 1.0 };

        let mut flip = sign(self.invert_direction) * sign(input.invert) * sign(input.pen_flip);
        if self.invert_to_scrape_fill {
            flip = 1.0;
        }

        let feather = input.feather;
        let overlap = input.overlap;
        let half_overlap = (1.0 + overlap) / 2.0;

        match self.tool {
            BrushTool::Clay => 0.25 * alpha * flip * pressure.powi(4) * half_overlap * feather,
            BrushTool::Draw
            | BrushTool::DrawSharp
            | BrushTool::Layer
            | BrushTool::Crease
            | BrushTool::Blob => alpha * flip * pressure * overlap * feather,
            BrushTool::DisplacementEraser
            | BrushTool::DrawFaceSets
            | BrushTool::Smear
            | BrushTool::DisplacementSmear => alpha * pressure * overlap * feather,
            BrushTool::Cloth => 10.0 * alpha * flip * pressure * overlap * feather,
            BrushTool::Paint => pressure * pressure * overlap * feather,
            BrushTool::ClayStrips => {
                alpha * flip * pressure.powf(1.5) * overlap * feather * 0.3
            }
            BrushTool::ClayThumb => alpha * flip * pressure * pressure * overlap * feather * 1.3,
            BrushTool::Mask => match self.mask_tool {
                MaskTool::Draw => alpha * flip * pressure * half_overlap * feather,
                MaskTool::Smooth => alpha * pressure * feather,
            },
            BrushTool::Inflate => {
                let scale = if flip > 0.0 { 0.25 } else { 0.125 };
                scale * alpha * flip * pressure * overlap * feather
            }
            BrushTool::MultiplaneScrape => alpha * flip * pressure * half_overlap * feather,
            BrushTool::Fill | BrushTool::Scrape | BrushTool::Flatten => {
                if flip > 0.0 {
                    alpha * flip * pressure * half_overlap * feather
                } else {
                    0.5 * alpha * flip * pressure * overlap * feather
                }
            }
            BrushTool::Smooth => flip * alpha * pressure * feather,
            BrushTool::Pinch => {
                let scale = if flip > 0.0 { 1.0 } else { 0.25 };
                scale * alpha * flip * pressure * overlap * feather
            }
            BrushTool::Nudge => alpha * pressure * half_overlap * feather,
            BrushTool::Thumb | BrushTool::Rotate => alpha * pressure * feather,
            BrushTool::SnakeHook
            | BrushTool::Grab
            | BrushTool::ElasticDeform
            | BrushTool::Pose
            | BrushTool::Boundary => root_alpha * feather,
            BrushTool::Simplify => 0.0,
        }
    }
}
