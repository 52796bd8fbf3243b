//! Per-stroke state.
//!
//! A [`StrokeCache`] lives from the first sample of a stroke to its end or
//! cancel. Values that never change during the stroke are captured once in
//! [`StrokeCache::begin`], per-step values are refreshed by
//! [`StrokeCache::update_variants`] and the symmetry driver rewrites the
//! per-pass fields before every pass.

use std::any::Any;
use std::f32::consts::{FRAC_PI_2, TAU};
use std::fmt;
use std::sync::Arc;

use chisel_config::SculptSettings;
use glam::{Mat4, Quat, Vec2, Vec3};

use crate::brush::{Brush, StrengthInput};
use crate::brush_test::ClipPlanes;
use crate::factors::AutoMaskProvider;
use crate::types::{BrushTool, FalloffShape, StrokeSample};

/// Length of the ring buffer that smooths clay thumb pressure.
pub const CLAY_STABILIZER_LEN: usize = 10;

/// Rake follow distance relative to the radius.
pub const RAKE_FOLLOW_FACTOR: f32 = 0.4;

/// Pixels the mouse must travel before the rotate dial picks a direction.
const DIAL_THRESHOLD_PX: f32 = 5.0;

/// Lifecycle of a [`StrokeCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokePhase {
    Uninitialized,
    InvariantsSet,
    PerStepVariantsSet,
    PerPassActive,
    Destroyed,
}

/// How the stroke was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrokeMode {
    #[default]
    Normal,
    Invert,
}

/// Mirror modifier on the sculpted object.
#[derive(Debug, Clone)]
pub struct MirrorModifier {
    /// Keep vertices on the mirror plane from crossing it
    pub clip: bool,
    /// Mirrored axes (bit0 = X, bit1 = Y, bit2 = Z)
    pub axes: u8,
    /// Distance from the plane within which vertices are clipped
    pub tolerance: f32,
    /// World transform of the mirror object, if mirroring around one
    pub mirror_object_to_world: Option<Mat4>,
}

/// Object, view and modifier state captured at stroke start.
#[derive(Debug, Clone)]
pub struct ViewContext {
    pub object_to_world: Mat4,
    /// Direction toward the viewer, world space
    pub view_dir: Vec3,
    /// Screen right, world space
    pub view_right: Vec3,
    /// Screen up, world space
    pub view_up: Vec3,
    /// Object space to normalized device coordinates
    pub projection: Mat4,
    pub clip_planes: Option<ClipPlanes>,
    pub mirror_modifiers: Vec<MirrorModifier>,
    /// World-space "up" for gravity. `None` uses +Z.
    pub gravity_up: Option<Vec3>,
}

impl Default for ViewContext {
    fn default() -> Self {
        Self {
            object_to_world: Mat4::IDENTITY,
            view_dir: Vec3::Z,
            view_right: Vec3::X,
            view_up: Vec3::Y,
            projection: Mat4::IDENTITY,
            clip_planes: None,
            mirror_modifiers: Vec::new(),
            gravity_up: None,
        }
    }
}

impl ViewContext {
    /// A world-space direction expressed in object space, normalized.
    pub fn direction_to_object(&self, direction: Vec3) -> Vec3 {
        self.object_to_world
            .inverse()
            .transform_vector3(direction)
            .normalize_or_zero()
    }
}

/// Surface point under the cursor when no stroke is active.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    pub location: Vec3,
    pub normal: Vec3,
    pub radius: f32,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            location: Vec3::ZERO,
            normal: Vec3::Z,
            radius: 0.0,
        }
    }
}

/// Mirror modifier clipping merged over all modifiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MirrorClip {
    /// Clipped axes (bit0 = X, bit1 = Y, bit2 = Z)
    pub axes: u8,
    pub tolerance: Vec3,
    /// Object space to mirror space
    pub matrix: Mat4,
}

impl Default for MirrorClip {
    fn default() -> Self {
        Self {
            axes: 0,
            tolerance: Vec3::ZERO,
            matrix: Mat4::IDENTITY,
        }
    }
}

impl MirrorClip {
    pub fn from_modifiers(modifiers: &[MirrorModifier], object_to_world: Mat4) -> Self {
        let mut clip = Self::default();
        for modifier in modifiers.iter().filter(|m| m.clip) {
            for axis in 0..3 {
                if modifier.axes & (1 << axis) == 0 {
                    continue;
                }
                clip.axes |= 1 << axis;
                clip.tolerance[axis] = clip.tolerance[axis].max(modifier.tolerance);
                if let Some(mirror) = modifier.mirror_object_to_world {
                    clip.matrix = mirror.inverse() * object_to_world;
                }
            }
        }
        clip
    }

    pub fn is_clipped(&self, axis: usize) -> bool {
        self.axes & (1 << axis) != 0
    }
}

/// Screen-space rotation tracker for the rotate tool.
#[derive(Debug, Clone)]
pub struct Dial {
    center: Vec2,
    threshold_squared: f32,
    initial_direction: Option<Vec2>,
    last_angle: f32,
    rotations: i32,
}

impl Dial {
    pub fn new(center: Vec2, threshold: f32) -> Self {
        Self {
            center,
            threshold_squared: threshold * threshold,
            initial_direction: None,
            last_angle: 0.0,
            rotations: 0,
        }
    }

    /// Total angle swept around the center, counting full turns.
    pub fn angle(&mut self, position: Vec2) -> f32 {
        let direction = position - self.center;
        if direction.length_squared() <= self.threshold_squared {
            return self.last_angle + TAU * self.rotations as f32;
        }
        let direction = direction.normalize();
        let initial = *self.initial_direction.get_or_insert(direction);

        let cos = direction.dot(initial);
        let sin = direction.perp_dot(initial);
        let angle = sin.atan2(cos);

        // Crossing the half turn changes sign; count the turn
        if angle * self.last_angle < 0.0 && self.last_angle.abs() > FRAC_PI_2 {
            if self.last_angle < 0.0 {
                self.rotations -= 1;
            } else {
                self.rotations += 1;
            }
        }
        self.last_angle = angle;
        angle + TAU * self.rotations as f32
    }
}

/// Point trailing the cursor for rake rotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RakeData {
    pub follow_co: Vec3,
    pub follow_dist: f32,
}

impl RakeData {
    fn update(&mut self, co: Vec3) {
        let dist = self.follow_co.distance(co);
        if dist > self.follow_dist {
            self.follow_co = self.follow_co.lerp(co, dist - self.follow_dist);
        }
    }
}

/// Pressure-modulated paint parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaintVariants {
    pub hardness: f32,
    pub flow: f32,
    pub wet_mix: f32,
    pub wet_persistence: f32,
    pub density: f32,
}

/// The per-stroke state.
pub struct StrokeCache {
    phase: StrokePhase,
    pub tool: BrushTool,

    // Invariants
    /// Per-axis compensation for non-uniform object scale
    pub scale: Vec3,
    pub plane_trim_squared: f32,
    pub mirror_clip: MirrorClip,
    pub clip_planes: Option<ClipPlanes>,
    pub projection: Mat4,
    pub initial_mouse: Vec2,
    pub initial_location: Vec3,
    pub true_initial_location: Vec3,
    pub initial_normal: Vec3,
    pub true_initial_normal: Vec3,
    pub invert: bool,
    pub normal_weight: f32,
    pub true_view_normal: Vec3,
    /// Screen right in object space
    pub view_right: Vec3,
    /// Screen up in object space
    pub view_up: Vec3,
    pub supports_gravity: bool,
    pub true_gravity_direction: Vec3,
    /// Whether the stroke builds on its own previous steps
    pub accum: bool,
    pub first_time: bool,
    dial: Option<Dial>,

    // Per step
    pub pen_flip: bool,
    pub mouse: Vec2,
    pub pressure: f32,
    pub tilt: Vec2,
    /// Location of the last sample, object space
    pub sample_location: Vec3,
    pub initial_radius: f32,
    pub radius: f32,
    pub radius_squared: f32,
    pub true_location: Vec3,
    pub true_last_location: Vec3,
    clay_pressure_stabilizer: [f32; CLAY_STABILIZER_LEN],
    clay_pressure_stabilizer_index: usize,
    pub paint_brush: PaintVariants,
    pub orig_grab_location: Vec3,
    pub old_grab_location: Vec3,
    pub grab_delta: Vec3,
    pub anchored_location: Vec3,
    pub rake_data: RakeData,
    pub is_rake_rotation_valid: bool,
    pub rake_rotation: Quat,
    pub vertex_rotation: f32,
    pub special_rotation: f32,
    pub iteration_count: u32,
    /// Spacing overlap reported by the stroke sampler
    pub overlap_factor: f32,
    /// Strength of the current step including the symmetry feather
    pub bstrength: f32,

    // Per pass
    pub mirror_symmetry_pass: u8,
    pub radial_symmetry_pass: u32,
    pub tile_pass: u32,
    pub symm_rot_mat: Mat4,
    pub symm_rot_mat_inv: Mat4,
    pub plane_offset: Vec3,
    pub location: Vec3,
    pub last_location: Vec3,
    pub view_normal: Vec3,
    pub grab_delta_symmetry: Vec3,
    pub rake_rotation_symmetry: Quat,
    pub gravity_direction: Vec3,
    pub sculpt_normal: Vec3,
    pub sculpt_normal_symm: Vec3,
    pub last_center: Vec3,
    pub brush_local_mat: Mat4,
    pub brush_local_mat_inv: Mat4,

    // Sub-caches
    pub automask: Option<Arc<dyn AutoMaskProvider>>,
    pub cloth_sim: Option<Box<dyn Any + Send + Sync>>,
    pub surface_smooth_laplacian_disp: Vec<Vec3>,
    /// Layer brush displacement per dense vertex index
    pub layer_displacement_factor: Vec<f32>,
}

impl fmt::Debug for StrokeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrokeCache")
            .field("phase", &self.phase)
            .field("tool", &self.tool)
            .field("radius", &self.radius)
            .field("true_location", &self.true_location)
            .field("mirror_symmetry_pass", &self.mirror_symmetry_pass)
            .field("radial_symmetry_pass", &self.radial_symmetry_pass)
            .field("tile_pass", &self.tile_pass)
            .field("iteration_count", &self.iteration_count)
            .finish_non_exhaustive()
    }
}

impl Default for StrokeCache {
    fn default() -> Self {
        Self {
            phase: StrokePhase::Uninitialized,
            tool: BrushTool::Draw,
            scale: Vec3::ONE,
            plane_trim_squared: 0.0,
            mirror_clip: MirrorClip::default(),
            clip_planes: None,
            projection: Mat4::IDENTITY,
            initial_mouse: Vec2::ZERO,
            initial_location: Vec3::ZERO,
            true_initial_location: Vec3::ZERO,
            initial_normal: Vec3::Z,
            true_initial_normal: Vec3::Z,
            invert: false,
            normal_weight: 0.0,
            true_view_normal: Vec3::Z,
            view_right: Vec3::X,
            view_up: Vec3::Y,
            supports_gravity: false,
            true_gravity_direction: Vec3::Z,
            accum: true,
            first_time: true,
            dial: None,
            pen_flip: false,
            mouse: Vec2::ZERO,
            pressure: 1.0,
            tilt: Vec2::ZERO,
            sample_location: Vec3::ZERO,
            initial_radius: 0.0,
            radius: 0.0,
            radius_squared: 0.0,
            true_location: Vec3::ZERO,
            true_last_location: Vec3::ZERO,
            clay_pressure_stabilizer: [0.0; CLAY_STABILIZER_LEN],
            clay_pressure_stabilizer_index: 0,
            paint_brush: PaintVariants::default(),
            orig_grab_location: Vec3::ZERO,
            old_grab_location: Vec3::ZERO,
            grab_delta: Vec3::ZERO,
            anchored_location: Vec3::ZERO,
            rake_data: RakeData::default(),
            is_rake_rotation_valid: false,
            rake_rotation: Quat::IDENTITY,
            vertex_rotation: 0.0,
            special_rotation: 0.0,
            iteration_count: 0,
            overlap_factor: 1.0,
            bstrength: 0.0,
            mirror_symmetry_pass: 0,
            radial_symmetry_pass: 0,
            tile_pass: 0,
            symm_rot_mat: Mat4::IDENTITY,
            symm_rot_mat_inv: Mat4::IDENTITY,
            plane_offset: Vec3::ZERO,
            location: Vec3::ZERO,
            last_location: Vec3::ZERO,
            view_normal: Vec3::Z,
            grab_delta_symmetry: Vec3::ZERO,
            rake_rotation_symmetry: Quat::IDENTITY,
            gravity_direction: Vec3::Z,
            sculpt_normal: Vec3::ZERO,
            sculpt_normal_symm: Vec3::ZERO,
            last_center: Vec3::ZERO,
            brush_local_mat: Mat4::IDENTITY,
            brush_local_mat_inv: Mat4::IDENTITY,
            automask: None,
            cloth_sim: None,
            surface_smooth_laplacian_disp: Vec::new(),
            layer_displacement_factor: Vec::new(),
        }
    }
}

impl StrokeCache {
    /// Create the cache for a new stroke and capture its invariants.
    pub fn begin(
        brush: &Brush,
        settings: &SculptSettings,
        view: &ViewContext,
        cursor: &Cursor,
        mode: StrokeMode,
        mouse: Vec2,
    ) -> Self {
        let mut cache = Self::default();
        cache.update_invariants(brush, settings, view, cursor, mode, mouse);
        cache
    }

    pub fn phase(&self) -> StrokePhase {
        self.phase
    }

    fn update_invariants(
        &mut self,
        brush: &Brush,
        settings: &SculptSettings,
        view: &ViewContext,
        cursor: &Cursor,
        mode: StrokeMode,
        mouse: Vec2,
    ) {
        debug_assert_eq!(self.phase, StrokePhase::Uninitialized);
        self.tool = brush.tool;

        let (scale, _, _) = view.object_to_world.to_scale_rotation_translation();
        let max_scale = scale.abs().max_element();
        self.scale = Vec3::from_array(
            scale
                .to_array()
                .map(|s| if s == 0.0 { 1.0 } else { max_scale / s }),
        );

        self.plane_trim_squared = brush.plane_trim * brush.plane_trim;
        self.mirror_clip = MirrorClip::from_modifiers(&view.mirror_modifiers, view.object_to_world);
        self.clip_planes = view.clip_planes;
        self.projection = view.projection;

        self.initial_mouse = mouse;
        self.mouse = mouse;
        self.initial_location = cursor.location;
        self.true_initial_location = cursor.location;
        self.initial_normal = cursor.normal;
        self.true_initial_normal = cursor.normal;

        self.invert = mode == StrokeMode::Invert;
        self.normal_weight = brush.normal_weight;
        // Invert means "follow the normal" for grab-like tools
        if brush.tool.has_normal_weight() && self.invert {
            self.invert = false;
            self.normal_weight = if self.normal_weight == 0.0 { 1.0 } else { 0.0 };
        }

        self.true_view_normal = view.direction_to_object(view.view_dir);
        self.view_normal = self.true_view_normal;
        self.view_right = view.direction_to_object(view.view_right);
        self.view_up = view.direction_to_object(view.view_up);

        self.supports_gravity = !brush.tool.excludes_gravity() && settings.gravity_factor > 0.0;
        if self.supports_gravity {
            self.true_gravity_direction = view.direction_to_object(view.gravity_up.unwrap_or(Vec3::Z));
        }

        self.accum = true;
        if brush.anchored || brush.tool == BrushTool::DrawSharp {
            self.accum = false;
        }
        if brush.tool.has_accumulate() && !brush.accumulate {
            // Draw sharp reads original coordinates, so it accumulates the other way round
            self.accum = brush.tool == BrushTool::DrawSharp;
        }

        self.first_time = true;
        if brush.tool == BrushTool::Rotate {
            self.dial = Some(Dial::new(self.initial_mouse, DIAL_THRESHOLD_PX));
        }

        self.phase = StrokePhase::InvariantsSet;
    }

    /// Whether this is the first step of the main (unmirrored, untiled) pass.
    pub fn is_first_step_of_pass(&self) -> bool {
        self.first_time
            && self.mirror_symmetry_pass == 0
            && self.radial_symmetry_pass == 0
            && self.tile_pass == 0
    }

    /// Whether the per-pass values describe the unmirrored, untiled pass.
    pub fn is_main_pass(&self) -> bool {
        self.mirror_symmetry_pass == 0 && self.radial_symmetry_pass == 0 && self.tile_pass == 0
    }

    /// Refresh the values that change with every input sample.
    pub fn update_variants(&mut self, brush: &Brush, sample: &StrokeSample) {
        debug_assert!(matches!(
            self.phase,
            StrokePhase::InvariantsSet | StrokePhase::PerStepVariantsSet | StrokePhase::PerPassActive
        ));
        let first = self.is_first_step_of_pass();

        if first
            || !(brush.anchored || matches!(brush.tool, BrushTool::SnakeHook | BrushTool::Rotate))
        {
            self.true_location = sample.location();
        }
        self.sample_location = sample.location();

        self.pen_flip = sample.pen_flip();
        self.mouse = sample.mouse();
        // Tools with a fixed footprint keep the pressure of the first step
        if brush.supports_dynamic_size() || self.first_time {
            self.pressure = sample.pressure;
        }
        self.tilt = Vec2::from_array(sample.tilt);

        if first {
            self.initial_radius = brush.radius;
        }

        if brush.tool == BrushTool::ClayThumb {
            if first {
                self.clay_pressure_stabilizer = [0.0; CLAY_STABILIZER_LEN];
                self.clay_pressure_stabilizer_index = 0;
            } else {
                self.clay_pressure_stabilizer[self.clay_pressure_stabilizer_index] = self.pressure;
                self.clay_pressure_stabilizer_index =
                    (self.clay_pressure_stabilizer_index + 1) % CLAY_STABILIZER_LEN;
            }
        }

        self.radius = if brush.uses_size_pressure() {
            self.dynamic_size(brush.tool, self.initial_radius)
        } else {
            self.initial_radius
        };

        self.update_paint_variants(brush);
        self.radius_squared = self.radius * self.radius;

        if brush.anchored {
            // The footprint grows with the drag distance from the anchor
            self.radius = self.true_location.distance(sample.location());
            self.radius_squared = self.radius * self.radius;
            self.anchored_location = self.true_location;
        }

        self.update_brush_delta(brush, sample.location());

        if brush.tool == BrushTool::Rotate {
            let angle = self.dial.as_mut().map(|d| d.angle(sample.mouse())).unwrap_or(0.0);
            self.vertex_rotation = -angle * self.bstrength;
            self.anchored_location = self.true_location;
        }

        if brush.tool.has_tip_orientation() && self.grab_delta != Vec3::ZERO {
            self.special_rotation = self
                .grab_delta
                .dot(self.view_up)
                .atan2(self.grab_delta.dot(self.view_right));
        }

        self.iteration_count += 1;
        self.phase = StrokePhase::PerStepVariantsSet;
    }

    /// Average of the clay thumb pressure ring.
    pub fn stabilized_pressure(&self) -> f32 {
        self.clay_pressure_stabilizer.iter().sum::<f32>() / CLAY_STABILIZER_LEN as f32
    }

    fn dynamic_size(&self, tool: BrushTool, initial: f32) -> f32 {
        let p = self.pressure;
        match tool {
            BrushTool::Clay => (initial * 0.2).max(initial * p * p * p),
            BrushTool::ClayStrips => (initial * 0.3).max(initial * p.powf(1.5)),
            BrushTool::ClayThumb => initial * self.stabilized_pressure(),
            _ => initial * p,
        }
    }

    fn update_paint_variants(&mut self, brush: &Brush) {
        let p = self.pressure;
        let pressure = |invert: bool| if invert { 1.0 - p } else { p };
        let paint = &mut self.paint_brush;

        paint.hardness = brush.hardness;
        if brush.hardness_pressure {
            paint.hardness *= pressure(brush.hardness_pressure_invert);
        }
        paint.flow = brush.flow;
        if brush.flow_pressure {
            paint.flow *= pressure(brush.flow_pressure_invert);
        }
        paint.wet_mix = brush.wet_mix;
        if brush.wet_mix_pressure {
            paint.wet_mix *= pressure(brush.wet_mix_pressure_invert);
            // Spread the useful range over more of the pressure curve
            paint.wet_mix = 1.0 - (1.0 - paint.wet_mix).powi(2);
        }
        paint.wet_persistence = brush.wet_persistence;
        if brush.wet_persistence_pressure {
            paint.wet_persistence = pressure(brush.wet_persistence_pressure_invert);
        }
        paint.density = brush.density;
        if brush.density_pressure {
            paint.density = pressure(brush.density_pressure_invert);
        }
    }

    fn update_brush_delta(&mut self, brush: &Brush, grab_location: Vec3) {
        let tool = brush.tool;
        let needs_delta = matches!(
            tool,
            BrushTool::Paint
                | BrushTool::Grab
                | BrushTool::ElasticDeform
                | BrushTool::Cloth
                | BrushTool::Nudge
                | BrushTool::ClayStrips
                | BrushTool::Pinch
                | BrushTool::MultiplaneScrape
                | BrushTool::ClayThumb
                | BrushTool::SnakeHook
                | BrushTool::Pose
                | BrushTool::Boundary
                | BrushTool::Smear
                | BrushTool::Thumb
        );
        if !needs_delta {
            return;
        }
        let first = self.is_first_step_of_pass();
        let from_anchor =
            tool.uses_anchored_delta() || (tool == BrushTool::Smear && brush.anchored);

        if first {
            self.orig_grab_location = self.true_location;
        } else if tool == BrushTool::SnakeHook {
            self.true_location += self.grab_delta;
        }

        if first {
            self.grab_delta = Vec3::ZERO;
        } else if from_anchor {
            self.grab_delta += grab_location - self.old_grab_location;
        } else if tool.has_tip_orientation() && brush.anchored {
            self.grab_delta = grab_location - self.orig_grab_location;
        } else {
            self.grab_delta = grab_location - self.old_grab_location;
        }

        if brush.falloff_shape == FalloffShape::Tube {
            let n = self.true_view_normal;
            self.grab_delta -= n * self.grab_delta.dot(n);
        }

        self.old_grab_location = grab_location;

        match tool {
            BrushTool::Grab | BrushTool::ElasticDeform => {
                self.anchored_location = self.true_location;
            }
            BrushTool::Thumb => self.anchored_location = self.orig_grab_location,
            _ => {}
        }

        if from_anchor {
            // The footprint stays where the grab started
            self.true_location = self.orig_grab_location;
        }

        self.is_rake_rotation_valid = false;
        if first {
            self.rake_data.follow_co = grab_location;
        }
        if !tool.has_rake() || brush.rake_factor <= 0.0 {
            return;
        }
        self.rake_data.follow_dist = self.radius * RAKE_FOLLOW_FACTOR;

        if self.grab_delta != Vec3::ZERO {
            const EPS: f32 = 0.00001;
            let v1 = self.rake_data.follow_co - grab_location;
            let v2 = self.rake_data.follow_co - self.grab_delta - grab_location;
            if v1.length() > EPS && v2.length() > EPS {
                let (v1, v2) = (v1.normalize(), v2.normalize());
                if v1.distance_squared(v2) > EPS {
                    let dist_sq = self.rake_data.follow_co.distance_squared(grab_location);
                    let follow = self.rake_data.follow_dist;
                    let fade = if dist_sq > follow * follow {
                        1.0
                    } else {
                        dist_sq.sqrt() / follow
                    };
                    let (axis, angle) = Quat::from_rotation_arc(v1, v2).to_axis_angle();
                    self.rake_rotation =
                        Quat::from_axis_angle(axis.normalize_or_zero(), angle * brush.rake_factor * fade);
                    self.is_rake_rotation_valid = true;
                }
            }
        }
        self.rake_data.update(grab_location);
    }

    /// Inputs for [`Brush::stroke_strength`] at the given symmetry feather.
    pub fn strength_input(&self, feather: f32) -> StrengthInput {
        StrengthInput {
            pressure: self.pressure,
            pen_flip: self.pen_flip,
            invert: self.invert,
            overlap: self.overlap_factor,
            feather,
        }
    }

    /// Mark the start of a symmetry pass.
    pub fn enter_pass(&mut self) {
        debug_assert!(matches!(
            self.phase,
            StrokePhase::PerStepVariantsSet | StrokePhase::PerPassActive
        ));
        self.phase = StrokePhase::PerPassActive;
    }

    /// Close the current step after every pass ran.
    pub fn finish_step(&mut self) {
        self.first_time = false;
        self.true_last_location = self.true_location;
        self.phase = StrokePhase::PerStepVariantsSet;
    }

    /// Release every sub-cache. The cache is unusable afterwards.
    pub fn destroy(&mut self) {
        self.dial = None;
        self.cloth_sim = None;
        self.automask = None;
        self.surface_smooth_laplacian_disp = Vec::new();
        self.layer_displacement_factor = Vec::new();
        self.phase = StrokePhase::Destroyed;
    }

    pub fn has_dial(&self) -> bool {
        self.dial.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin(brush: &Brush) -> StrokeCache {
        StrokeCache::begin(
            brush,
            &SculptSettings::without_symmetry(),
            &ViewContext::default(),
            &Cursor::default(),
            StrokeMode::Normal,
            Vec2::ZERO,
        )
    }

    fn sample(x: f32, pressure: f32) -> StrokeSample {
        StrokeSample::at(Vec3::new(x, 0.0, 0.0), Vec3::Z).with_pressure(pressure)
    }

    #[test]
    fn test_phase_transitions() {
        let brush = Brush::draw();
        let mut cache = begin(&brush);
        assert_eq!(cache.phase(), StrokePhase::InvariantsSet);
        cache.update_variants(&brush, &sample(0.0, 1.0));
        assert_eq!(cache.phase(), StrokePhase::PerStepVariantsSet);
        cache.enter_pass();
        assert_eq!(cache.phase(), StrokePhase::PerPassActive);
        cache.finish_step();
        assert!(!cache.first_time);
        cache.destroy();
        assert_eq!(cache.phase(), StrokePhase::Destroyed);
    }

    #[test]
    fn test_scale_normalization() {
        let view = ViewContext {
            object_to_world: Mat4::from_scale(Vec3::new(2.0, 1.0, 4.0)),
            ..Default::default()
        };
        let cache = StrokeCache::begin(
            &Brush::draw(),
            &SculptSettings::default(),
            &view,
            &Cursor::default(),
            StrokeMode::Normal,
            Vec2::ZERO,
        );
        assert!((cache.scale - Vec3::new(2.0, 4.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_accumulate_rules() {
        assert!(begin(&Brush::draw_sharp()).accum);
        let sharp_accumulating = Brush {
            accumulate: true,
            ..Brush::draw_sharp()
        };
        assert!(!begin(&sharp_accumulating).accum);
        assert!(!begin(&Brush::draw()).accum);
        assert!(begin(&Brush::clay()).accum);
        assert!(begin(&Brush::grab()).accum);
        let anchored = Brush {
            anchored: true,
            ..Brush::grab()
        };
        assert!(!begin(&anchored).accum);
    }

    #[test]
    fn test_invert_becomes_normal_weight_for_grab() {
        let cache = StrokeCache::begin(
            &Brush::grab(),
            &SculptSettings::default(),
            &ViewContext::default(),
            &Cursor::default(),
            StrokeMode::Invert,
            Vec2::ZERO,
        );
        assert!(!cache.invert);
        assert_eq!(cache.normal_weight, 1.0);
    }

    #[test]
    fn test_gravity_support() {
        let mut settings = SculptSettings::default();
        settings.gravity_factor = 0.5;
        let view = ViewContext::default();
        let cursor = Cursor::default();
        let draw = StrokeCache::begin(&Brush::draw(), &settings, &view, &cursor, StrokeMode::Normal, Vec2::ZERO);
        assert!(draw.supports_gravity);
        assert!((draw.true_gravity_direction - Vec3::Z).length() < 1e-6);
        let smooth = StrokeCache::begin(&Brush::smooth(), &settings, &view, &cursor, StrokeMode::Normal, Vec2::ZERO);
        assert!(!smooth.supports_gravity);
    }

    #[test]
    fn test_clay_dynamic_size() {
        let brush = Brush {
            radius: 1.0,
            size_pressure: true,
            ..Brush::clay()
        };
        let mut cache = begin(&brush);
        cache.update_variants(&brush, &sample(0.0, 0.1));
        assert!((cache.radius - 0.2).abs() < 1e-6);
        cache.finish_step();
        cache.update_variants(&brush, &sample(0.1, 1.0));
        assert!((cache.radius - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_clay_thumb_stabilizer_wraps() {
        let brush = Brush {
            radius: 1.0,
            ..Brush::clay_thumb()
        };
        let mut cache = begin(&brush);
        cache.update_variants(&brush, &sample(0.0, 1.0));
        assert_eq!(cache.radius, 0.0);
        cache.finish_step();
        for i in 0..CLAY_STABILIZER_LEN + 3 {
            cache.update_variants(&brush, &sample(i as f32 * 0.1, 1.0));
            cache.finish_step();
        }
        assert!((cache.stabilized_pressure() - 1.0).abs() < 1e-6);
        assert!((cache.radius - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_wet_mix_pressure_curve() {
        let brush = Brush {
            wet_mix: 1.0,
            wet_mix_pressure: true,
            ..Brush::paint()
        };
        let mut cache = begin(&brush);
        cache.update_variants(&brush, &sample(0.0, 0.5));
        assert!((cache.paint_brush.wet_mix - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_grab_delta_from_anchored_origin() {
        let brush = Brush::grab();
        let mut cache = begin(&brush);
        cache.update_variants(&brush, &sample(0.0, 1.0));
        assert_eq!(cache.grab_delta, Vec3::ZERO);
        cache.finish_step();
        cache.update_variants(&brush, &sample(0.5, 1.0));
        cache.finish_step();
        cache.update_variants(&brush, &sample(1.0, 1.0));
        assert!((cache.grab_delta - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-6);
        // The footprint stays at the start of the grab
        assert_eq!(cache.true_location, Vec3::ZERO);
    }

    #[test]
    fn test_tip_orientation_delta_is_per_step() {
        let brush = Brush::pinch();
        let mut cache = begin(&brush);
        cache.update_variants(&brush, &sample(0.0, 1.0));
        cache.finish_step();
        cache.update_variants(&brush, &sample(0.5, 1.0));
        cache.finish_step();
        cache.update_variants(&brush, &sample(0.75, 1.0));
        assert!((cache.grab_delta - Vec3::new(0.25, 0.0, 0.0)).length() < 1e-6);
        assert!(cache.special_rotation.abs() < 1e-6);
    }

    #[test]
    fn test_tube_projects_grab_delta() {
        let brush = Brush {
            falloff_shape: FalloffShape::Tube,
            ..Brush::grab()
        };
        let mut cache = begin(&brush);
        cache.update_variants(&brush, &StrokeSample::at(Vec3::ZERO, Vec3::Z));
        cache.finish_step();
        cache.update_variants(&brush, &StrokeSample::at(Vec3::new(1.0, 0.0, 1.0), Vec3::Z));
        assert!(cache.grab_delta.z.abs() < 1e-6);
        assert!((cache.grab_delta.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_snake_hook_rake() {
        let brush = Brush {
            radius: 1.0,
            ..Brush::snake_hook()
        };
        let mut cache = begin(&brush);
        cache.update_variants(&brush, &sample(0.0, 1.0));
        cache.finish_step();
        cache.update_variants(
            &brush,
            &StrokeSample::at(Vec3::new(1.0, 0.0, 0.0), Vec3::Z),
        );
        cache.finish_step();
        cache.update_variants(
            &brush,
            &StrokeSample::at(Vec3::new(1.5, 0.5, 0.0), Vec3::Z),
        );
        assert!(cache.is_rake_rotation_valid);
        assert!(cache.rake_rotation.to_axis_angle().1.abs() > 0.0);
    }

    #[test]
    fn test_dial_counts_turns() {
        let mut dial = Dial::new(Vec2::ZERO, 5.0);
        assert_eq!(dial.angle(Vec2::new(1.0, 0.0)), 0.0);
        assert_eq!(dial.angle(Vec2::new(10.0, 0.0)), 0.0);
        let quarter = dial.angle(Vec2::new(0.0, 10.0));
        assert!((quarter.abs() - FRAC_PI_2).abs() < 1e-5);
        // Keep turning counter-clockwise past the half turn
        dial.angle(Vec2::new(-10.0, 0.1));
        let past_half = dial.angle(Vec2::new(-10.0, -0.1));
        assert!(past_half.abs() > std::f32::consts::PI);
    }

    #[test]
    fn test_rotate_initializes_dial() {
        assert!(begin(&Brush::rotate()).has_dial());
        assert!(!begin(&Brush::draw()).has_dial());
    }

    #[test]
    fn test_mirror_clip_merges_modifiers() {
        let modifiers = vec![
            MirrorModifier {
                clip: true,
                axes: 0b001,
                tolerance: 0.01,
                mirror_object_to_world: None,
            },
            MirrorModifier {
                clip: true,
                axes: 0b101,
                tolerance: 0.05,
                mirror_object_to_world: Some(Mat4::from_translation(Vec3::X)),
            },
            MirrorModifier {
                clip: false,
                axes: 0b010,
                tolerance: 1.0,
                mirror_object_to_world: None,
            },
        ];
        let clip = MirrorClip::from_modifiers(&modifiers, Mat4::IDENTITY);
        assert!(clip.is_clipped(0));
        assert!(!clip.is_clipped(1));
        assert!(clip.is_clipped(2));
        assert_eq!(clip.tolerance, Vec3::new(0.05, 0.0, 0.05));
        assert!((clip.matrix.transform_point3(Vec3::X)).length() < 1e-6);
    }

    #[test]
    fn test_destroy_clears_sub_caches() {
        let brush = Brush::rotate();
        let mut cache = begin(&brush);
        cache.cloth_sim = Some(Box::new(42_u32));
        cache.surface_smooth_laplacian_disp = vec![Vec3::ONE; 4];
        cache.destroy();
        assert!(!cache.has_dial());
        assert!(cache.cloth_sim.is_none());
        assert!(cache.surface_smooth_laplacian_disp.is_empty());
    }
}
