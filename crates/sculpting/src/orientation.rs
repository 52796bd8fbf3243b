//! Sculpt normal, brush plane and brush-local frame.
//!
//! These are sampled on the main pass and mirrored onto the other passes,
//! so every pass of a step works against the same surface orientation.

use glam::{Mat4, Vec3, Vec4};

use crate::brush::Brush;
use crate::cache::StrokeCache;
use crate::geometry::Geometry;
use crate::reduce::AreaSampler;
use crate::spatial::Node;
use crate::symmetry::symmetry_flip;
use crate::types::{BrushTool, DisplacementDirection, FalloffShape};
use crate::undo::SnapshotSource;

/// Where the orientation reductions read vertices from.
#[derive(Clone, Copy)]
pub struct SampleSource<'a> {
    pub geometry: &'a Geometry,
    pub original: Option<&'a dyn SnapshotSource>,
    pub parallel: bool,
}

impl<'a> SampleSource<'a> {
    pub fn new(geometry: &'a Geometry) -> Self {
        Self {
            geometry,
            original: None,
            parallel: false,
        }
    }

    fn sampler<'b>(&self, brush: &'b Brush, cache: &'b StrokeCache) -> AreaSampler<'b>
    where
        'a: 'b,
    {
        AreaSampler::new(self.geometry, brush, cache)
            .with_original(self.original)
            .with_parallel(self.parallel)
    }
}

fn project_out(v: Vec3, normal: Vec3) -> Vec3 {
    let n = normal.normalize_or_zero();
    v - n * v.dot(n)
}

/// Primary displacement direction before mirroring.
pub fn calc_sculpt_normal(source: &SampleSource, brush: &Brush, cache: &StrokeCache, nodes: &[&Node]) -> Vec3 {
    match brush.direction {
        DisplacementDirection::Area => source.sampler(brush, cache).area_normal(nodes).unwrap_or(Vec3::ZERO),
        DisplacementDirection::View => cache.true_view_normal,
        DisplacementDirection::X => Vec3::X,
        DisplacementDirection::Y => Vec3::Y,
        DisplacementDirection::Z => Vec3::Z,
    }
}

/// Refresh `sculpt_normal` on the main pass and derive `sculpt_normal_symm`
/// for the current pass.
///
/// Grab-like tools keep the normal of their first step.
pub fn update_sculpt_normal(source: &SampleSource, brush: &Brush, cache: &mut StrokeCache, nodes: &[&Node]) {
    let update_normal = !brush.original_normal
        && !brush.tool.freezes_sculpt_normal()
        && !(brush.tool == BrushTool::Thumb && !brush.anchored)
        && !(brush.tool == BrushTool::SnakeHook && cache.normal_weight > 0.0);

    if cache.mirror_symmetry_pass == 0
        && cache.radial_symmetry_pass == 0
        && (cache.is_first_step_of_pass() || update_normal)
    {
        let mut normal = calc_sculpt_normal(source, brush, cache, nodes);
        if brush.falloff_shape == FalloffShape::Tube {
            normal = project_out(normal, cache.view_normal).normalize_or_zero();
        }
        cache.sculpt_normal = normal;
        cache.sculpt_normal_symm = normal;
    } else {
        let flipped = symmetry_flip(cache.sculpt_normal, cache.mirror_symmetry_pass);
        cache.sculpt_normal_symm = cache.symm_rot_mat.transform_vector3(flipped);
    }
}

/// Brush-local frame at `location` with Z along `normal` and Y along the
/// stroke motion, scaled by the radius.
///
/// Returns `(object_to_local, local_to_object)`.
pub fn calc_brush_local_mat(cache: &StrokeCache, normal: Vec3, location: Vec3, rotation: f32) -> (Mat4, Mat4) {
    let angle = rotation + cache.special_rotation;
    // Screen-space transverse direction of the motion, taken to object space
    let motion_normal = (cache.view_right * angle.cos() + cache.view_up * angle.sin()).normalize_or_zero();

    let z = normal.normalize_or_zero();
    let mut y = z.cross(motion_normal).normalize_or_zero();
    if y == Vec3::ZERO {
        y = z.any_orthonormal_vector();
    }
    let x = y.cross(z).normalize_or_zero();

    let local_to_object = Mat4::from_cols(
        (x * cache.radius).extend(0.0),
        (y * cache.radius).extend(0.0),
        (z * cache.radius).extend(0.0),
        location.extend(1.0),
    );
    if local_to_object.determinant().abs() <= f32::EPSILON {
        return (Mat4::IDENTITY, Mat4::IDENTITY);
    }
    (local_to_object.inverse(), local_to_object)
}

/// Store the brush-local frame for the main pass.
pub fn update_brush_local_mat(cache: &mut StrokeCache) {
    if cache.mirror_symmetry_pass != 0 || cache.radial_symmetry_pass != 0 {
        return;
    }
    let (mat, inv) = calc_brush_local_mat(cache, cache.sculpt_normal, cache.location, 0.0);
    cache.brush_local_mat = mat;
    cache.brush_local_mat_inv = inv;
}

/// Normal and center of the plane used by the plane brushes.
///
/// Sampled on the main pass (or kept from the first step with
/// `original_normal` / `original_plane`), then mirrored, rotated and shifted
/// by the tile offset on the other passes.
pub fn calc_brush_plane(
    source: &SampleSource,
    brush: &Brush,
    cache: &mut StrokeCache,
    nodes: &[&Node],
) -> (Vec3, Vec3) {
    let first = cache.is_first_step_of_pass();
    if cache.is_main_pass() && (first || !brush.original_plane || !brush.original_normal) {
        let (mut normal, mut center) = match brush.direction {
            DisplacementDirection::Area => {
                let (mut normal, center) = source.sampler(brush, cache).area_normal_and_center(nodes);
                if brush.falloff_shape == FalloffShape::Tube {
                    normal = project_out(normal, cache.view_normal).normalize_or_zero();
                }
                (normal, center)
            }
            DisplacementDirection::View => (cache.true_view_normal, Vec3::ZERO),
            DisplacementDirection::X => (Vec3::X, Vec3::ZERO),
            DisplacementDirection::Y => (Vec3::Y, Vec3::ZERO),
            DisplacementDirection::Z => (Vec3::Z, Vec3::ZERO),
        };
        if brush.direction != DisplacementDirection::Area {
            center = source.sampler(brush, cache).area_center(nodes);
        }

        if !first && brush.original_normal {
            normal = cache.sculpt_normal;
        } else {
            cache.sculpt_normal = normal;
        }
        if !first && brush.original_plane {
            center = cache.last_center;
        } else {
            cache.last_center = center;
        }
        return (normal, center);
    }

    let symm = cache.mirror_symmetry_pass;
    let normal = cache
        .symm_rot_mat
        .transform_vector3(symmetry_flip(cache.sculpt_normal, symm));
    let center = cache
        .symm_rot_mat
        .transform_point3(symmetry_flip(cache.last_center, symm))
        + cache.plane_offset;
    (normal, center)
}

/// Plane through the area center, pushed along the normal by the brush
/// plane offset.
pub fn displaced_plane(brush: &Brush, cache: &StrokeCache, normal: Vec3, center: Vec3) -> Vec4 {
    let offset = brush.plane_offset_for(cache.pressure);
    let displace = cache.radius * offset;
    let point = center + normal * displace;
    normal.extend(-normal.dot(point))
}
