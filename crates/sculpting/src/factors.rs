//! Per-vertex influence factors.
//!
//! Factors are computed for one node at a time into a flat array parallel to
//! the node's vertex list. Each stage multiplies into the array in place; the
//! standard order is implemented by [`FactorContext::calc_factors`]. Plane
//! brushes add the plane filters on top with the translation helpers at the
//! end of this module.

use glam::{Mat4, Vec3, Vec4};

use crate::brush::Brush;
use crate::brush_test::{BrushTest, apply_hardness_to_distances, project_to_plane};
use crate::cache::StrokeCache;
use crate::falloff::curve_strength;
use crate::geometry::{Geometry, VertexHandle};
use crate::spatial::Node;
use crate::symmetry::symmetry_flip;
use crate::types::{FalloffShape, TextureMapMode};

/// Source of automasking weights.
///
/// Providers are shared across worker threads for the whole stroke.
pub trait AutoMaskProvider: Send + Sync {
    /// Weight in `[0, 1]` for one vertex of `node`.
    fn factor(&self, cache: &StrokeCache, geometry: &Geometry, vert: VertexHandle, node: &Node) -> f32;
}

/// Restricts the brush to the face set under the cursor at stroke start.
#[derive(Debug, Clone, Copy)]
pub struct FaceSetAutoMask {
    pub face_set: i32,
}

impl AutoMaskProvider for FaceSetAutoMask {
    fn factor(&self, _cache: &StrokeCache, geometry: &Geometry, vert: VertexHandle, _node: &Node) -> f32 {
        if geometry.vert_has_face_set(vert, self.face_set) {
            1.0
        } else {
            0.0
        }
    }
}

/// Keeps open mesh borders fixed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryAutoMask;

impl AutoMaskProvider for BoundaryAutoMask {
    fn factor(&self, _cache: &StrokeCache, geometry: &Geometry, vert: VertexHandle, _node: &Node) -> f32 {
        if geometry.vert_is_boundary(vert) { 0.0 } else { 1.0 }
    }
}

/// Brush texture lookup.
pub trait TextureSampler: Send + Sync {
    /// Intensity at `coord`. For [`TextureMapMode::Tiled3D`] the coordinate
    /// is an object-space point, otherwise `xy` carries the 2D lookup.
    fn sample(&self, mode: TextureMapMode, coord: Vec3) -> f32;
}

// ============================================================================
// Stages
// ============================================================================

/// Seed factors with `1 - mask`, zero for hidden vertices.
pub fn fill_factor_from_hide_and_mask(geometry: &Geometry, verts: &[VertexHandle], factors: &mut [f32]) {
    debug_assert_eq!(verts.len(), factors.len());
    for (factor, &vert) in factors.iter_mut().zip(verts) {
        *factor = if geometry.is_hidden(vert) {
            0.0
        } else {
            1.0 - geometry.mask(vert)
        };
    }
}

/// Seed factors with 1, zero for hidden vertices.
pub fn fill_factor_from_hide(geometry: &Geometry, verts: &[VertexHandle], factors: &mut [f32]) {
    debug_assert_eq!(verts.len(), factors.len());
    for (factor, &vert) in factors.iter_mut().zip(verts) {
        *factor = if geometry.is_hidden(vert) { 0.0 } else { 1.0 };
    }
}

/// Scale by how much each normal faces the viewer.
pub fn calc_front_face(view_normal: Vec3, normals: &[Vec3], factors: &mut [f32]) {
    debug_assert_eq!(normals.len(), factors.len());
    for (factor, normal) in factors.iter_mut().zip(normals) {
        *factor *= view_normal.dot(*normal).max(0.0);
    }
}

/// Distance of every position to the brush center.
///
/// Tube falloff measures in the view plane through the center.
pub fn calc_brush_distances(
    location: Vec3,
    view_normal: Vec3,
    shape: FalloffShape,
    positions: &[Vec3],
    distances: &mut [f32],
) {
    debug_assert_eq!(positions.len(), distances.len());
    match shape {
        FalloffShape::Sphere => {
            for (distance, position) in distances.iter_mut().zip(positions) {
                *distance = position.distance(location);
            }
        }
        FalloffShape::Tube => {
            let normal = view_normal.normalize_or_zero();
            let plane = normal.extend(-normal.dot(location));
            for (distance, position) in distances.iter_mut().zip(positions) {
                *distance = project_to_plane(*position, plane).distance(location);
            }
        }
    }
}

/// Zero the factor of everything beyond the radius.
pub fn filter_distances_with_radius(radius: f32, distances: &[f32], factors: &mut [f32]) {
    for (factor, &distance) in factors.iter_mut().zip(distances) {
        if distance > radius {
            *factor = 0.0;
        }
    }
}

/// Normalized square-tip distances. Vertices outside the tip get a zero
/// factor and `f32::MAX` distance.
pub fn calc_brush_cube_distances(
    test: &BrushTest,
    local_mat: &Mat4,
    roundness: f32,
    positions: &[Vec3],
    distances: &mut [f32],
    factors: &mut [f32],
) {
    for ((distance, factor), position) in distances.iter_mut().zip(factors.iter_mut()).zip(positions) {
        if *factor == 0.0 {
            *distance = f32::MAX;
            continue;
        }
        match test.cube(*position, local_mat, roundness) {
            Some(d) => *distance = d,
            None => {
                *factor = 0.0;
                *distance = f32::MAX;
            }
        }
    }
}

/// Multiply by the falloff curve at each distance.
pub fn calc_brush_strength_factors(brush: &Brush, radius: f32, distances: &[f32], factors: &mut [f32]) {
    for (factor, &distance) in factors.iter_mut().zip(distances) {
        *factor *= curve_strength(distance, radius, brush.curve);
    }
}

/// Zero the factor of vertices whose mirrored counterpart is view clipped.
pub fn filter_region_clip_factors(cache: &StrokeCache, positions: &[Vec3], factors: &mut [f32]) {
    let Some(clip) = &cache.clip_planes else {
        return;
    };
    for (factor, position) in factors.iter_mut().zip(positions) {
        let mut symm_co = symmetry_flip(*position, cache.mirror_symmetry_pass);
        if cache.radial_symmetry_pass != 0 {
            symm_co = cache.symm_rot_mat_inv.transform_point3(symm_co);
        }
        if clip.is_clipped(symm_co) {
            *factor = 0.0;
        }
    }
}

/// Texture lookup coordinate of a point for the current pass.
pub fn texture_coord(cache: &StrokeCache, mode: TextureMapMode, position: Vec3) -> Vec3 {
    let point = position - cache.plane_offset;
    if mode == TextureMapMode::Tiled3D {
        return point;
    }
    let mut symm_point = point;
    if cache.radial_symmetry_pass != 0 {
        symm_point = cache.symm_rot_mat_inv.transform_point3(symm_point);
    }
    symm_point = symmetry_flip(symm_point, cache.mirror_symmetry_pass);
    match mode {
        TextureMapMode::Area => cache.brush_local_mat.transform_point3(symm_point),
        _ => cache.projection.project_point3(symm_point),
    }
}

/// Multiply by the brush texture.
pub fn calc_brush_texture_factors(
    cache: &StrokeCache,
    brush: &Brush,
    sampler: &dyn TextureSampler,
    positions: &[Vec3],
    factors: &mut [f32],
) {
    for (factor, position) in factors.iter_mut().zip(positions) {
        if *factor == 0.0 {
            continue;
        }
        let coord = texture_coord(cache, brush.texture_mode, *position);
        *factor *= sampler.sample(brush.texture_mode, coord);
    }
}

/// Multiply by the automask weight of every vertex.
pub fn calc_automask_factors(
    provider: &dyn AutoMaskProvider,
    cache: &StrokeCache,
    geometry: &Geometry,
    node: &Node,
    factors: &mut [f32],
) {
    for (factor, &vert) in factors.iter_mut().zip(&node.verts) {
        if *factor == 0.0 {
            continue;
        }
        *factor *= provider.factor(cache, geometry, vert, node);
    }
}

// ============================================================================
// Standard pipeline
// ============================================================================

/// Shared inputs of the factor stages for one pass.
#[derive(Clone, Copy)]
pub struct FactorContext<'a> {
    pub geometry: &'a Geometry,
    pub cache: &'a StrokeCache,
    pub brush: &'a Brush,
    pub texture: Option<&'a dyn TextureSampler>,
    /// Seed from the mask. Off for tools that edit the mask itself.
    pub use_mask: bool,
}

/// Factors and distances of one node.
#[derive(Debug, Clone, Default)]
pub struct NodeFactors {
    pub factors: Vec<f32>,
    pub distances: Vec<f32>,
}

impl<'a> FactorContext<'a> {
    pub fn new(geometry: &'a Geometry, cache: &'a StrokeCache, brush: &'a Brush) -> Self {
        Self {
            geometry,
            cache,
            brush,
            texture: None,
            use_mask: true,
        }
    }

    pub fn with_texture(mut self, texture: Option<&'a dyn TextureSampler>) -> Self {
        self.texture = texture;
        self
    }

    pub fn ignoring_mask(mut self) -> Self {
        self.use_mask = false;
        self
    }

    fn seed(&self, node: &Node, factors: &mut [f32]) {
        if self.use_mask {
            fill_factor_from_hide_and_mask(self.geometry, &node.verts, factors);
        } else {
            fill_factor_from_hide(self.geometry, &node.verts, factors);
        }
    }

    /// Run the standard stages for a spherical or tube footprint:
    /// mask seed, front face, distance falloff, region clip, texture and
    /// automask.
    pub fn calc_factors(&self, node: &Node, positions: &[Vec3], normals: &[Vec3]) -> NodeFactors {
        let cache = self.cache;
        let brush = self.brush;
        let len = node.verts.len();
        let mut out = NodeFactors {
            factors: vec![0.0; len],
            distances: vec![0.0; len],
        };

        self.seed(node, &mut out.factors);
        if brush.frontface {
            calc_front_face(cache.view_normal, normals, &mut out.factors);
        }

        calc_brush_distances(
            cache.location,
            cache.view_normal,
            brush.falloff_shape,
            positions,
            &mut out.distances,
        );
        filter_distances_with_radius(cache.radius, &out.distances, &mut out.factors);
        apply_hardness_to_distances(cache.radius, cache.paint_brush.hardness, &mut out.distances);
        calc_brush_strength_factors(brush, cache.radius, &out.distances, &mut out.factors);

        self.finish(node, positions, &mut out.factors);
        out
    }

    /// Same stages with the square tip test in `local_mat` space in place of
    /// the radius falloff. Distances are scaled back to object units.
    pub fn calc_cube_factors(
        &self,
        node: &Node,
        positions: &[Vec3],
        normals: &[Vec3],
        local_mat: &Mat4,
    ) -> NodeFactors {
        let cache = self.cache;
        let brush = self.brush;
        let len = node.verts.len();
        let mut out = NodeFactors {
            factors: vec![0.0; len],
            distances: vec![0.0; len],
        };

        self.seed(node, &mut out.factors);
        if brush.frontface {
            calc_front_face(cache.view_normal, normals, &mut out.factors);
        }

        let test = BrushTest::from_cache(cache, brush.falloff_shape);
        calc_brush_cube_distances(
            &test,
            local_mat,
            brush.tip_roundness,
            positions,
            &mut out.distances,
            &mut out.factors,
        );
        for distance in out.distances.iter_mut().filter(|d| **d != f32::MAX) {
            *distance *= cache.radius;
        }
        filter_distances_with_radius(cache.radius, &out.distances, &mut out.factors);
        apply_hardness_to_distances(cache.radius, cache.paint_brush.hardness, &mut out.distances);
        calc_brush_strength_factors(brush, cache.radius, &out.distances, &mut out.factors);

        self.finish(node, positions, &mut out.factors);
        out
    }

    fn finish(&self, node: &Node, positions: &[Vec3], factors: &mut [f32]) {
        filter_region_clip_factors(self.cache, positions, factors);
        if let Some(texture) = self.texture {
            calc_brush_texture_factors(self.cache, self.brush, texture, positions, factors);
        }
        if let Some(automask) = &self.cache.automask {
            calc_automask_factors(automask.as_ref(), self.cache, self.geometry, node, factors);
        }
    }
}

// ============================================================================
// Translations
// ============================================================================

pub fn scale_factors(factors: &mut [f32], strength: f32) {
    if strength == 1.0 {
        return;
    }
    for factor in factors {
        *factor *= strength;
    }
}

pub fn translations_from_offset_and_factors(offset: Vec3, factors: &[f32], translations: &mut [Vec3]) {
    for (translation, &factor) in translations.iter_mut().zip(factors) {
        *translation = offset * factor;
    }
}

pub fn scale_translations(translations: &mut [Vec3], factors: &[f32]) {
    for (translation, &factor) in translations.iter_mut().zip(factors) {
        *translation *= factor;
    }
}

pub fn translations_from_new_positions(new_positions: &[Vec3], old_positions: &[Vec3], translations: &mut [Vec3]) {
    for ((translation, new), old) in translations.iter_mut().zip(new_positions).zip(old_positions) {
        *translation = *new - *old;
    }
}

/// Remove the component of every translation along `normal`.
pub fn project_translations(translations: &mut [Vec3], normal: Vec3) {
    let normal = normal.normalize_or_zero();
    for translation in translations {
        *translation -= normal * translation.dot(normal);
    }
}

/// Translation from each position to its closest point on `plane`.
pub fn calc_translations_to_plane(positions: &[Vec3], plane: Vec4, translations: &mut [Vec3]) {
    for (translation, position) in translations.iter_mut().zip(positions) {
        *translation = project_to_plane(*position, plane) - *position;
    }
}

/// Zero the factor of vertices farther from the plane than the trim
/// distance. No-op unless the brush enables plane trim.
pub fn filter_plane_trim_limit_factors(
    brush: &Brush,
    cache: &StrokeCache,
    translations: &[Vec3],
    factors: &mut [f32],
) {
    if !brush.use_plane_trim {
        return;
    }
    let threshold = cache.radius_squared * cache.plane_trim_squared;
    for (factor, translation) in factors.iter_mut().zip(translations) {
        if translation.length_squared() > threshold {
            *factor = 0.0;
        }
    }
}

pub fn plane_point_side(plane: Vec4, point: Vec3) -> f32 {
    plane.truncate().dot(point) + plane.w
}

/// Zero the factor of points on or below the plane.
pub fn filter_below_plane_factors(positions: &[Vec3], plane: Vec4, factors: &mut [f32]) {
    for (factor, position) in factors.iter_mut().zip(positions) {
        if plane_point_side(plane, *position) <= 0.0 {
            *factor = 0.0;
        }
    }
}

/// Zero the factor of points above the plane.
pub fn filter_above_plane_factors(positions: &[Vec3], plane: Vec4, factors: &mut [f32]) {
    for (factor, position) in factors.iter_mut().zip(positions) {
        if plane_point_side(plane, *position) > 0.0 {
            *factor = 0.0;
        }
    }
}

/// Plane through `point` with the normalized `normal`.
pub fn plane_from_point_normal(point: Vec3, normal: Vec3) -> Vec4 {
    let normal = normal.normalize_or_zero();
    normal.extend(-normal.dot(point))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush_test::ClipPlanes;
    use crate::geometry::PlainMesh;
    use crate::spatial::{Aabb, NodeId};
    use std::sync::Arc;

    fn strip() -> Geometry {
        let positions: Vec<Vec3> = (0..5).map(|i| Vec3::new(i as f32 * 0.25, 0.0, 0.0)).collect();
        let mut tail = positions.clone();
        for p in &mut tail {
            p.y = 1.0;
        }
        let all: Vec<Vec3> = positions.into_iter().chain(tail).collect();
        let polys: Vec<Vec<u32>> = (0..4).map(|i| vec![i, i + 1, i + 6, i + 5]).collect();
        Geometry::Plain(PlainMesh::new(all, &polys).unwrap())
    }

    fn whole(geometry: &Geometry) -> Node {
        Node {
            id: NodeId(0),
            bounds: Aabb::new(Vec3::ZERO, Vec3::ONE),
            original_bounds: Aabb::new(Vec3::ZERO, Vec3::ONE),
            verts: geometry.all_vertices(),
            bounds_stale: false,
            fully_hidden: false,
            fully_masked: false,
        }
    }

    fn cache_at(location: Vec3, radius: f32) -> StrokeCache {
        let mut cache = StrokeCache::default();
        cache.location = location;
        cache.radius = radius;
        cache.radius_squared = radius * radius;
        cache.view_normal = Vec3::Z;
        cache
    }

    fn positions(geometry: &Geometry, node: &Node) -> Vec<Vec3> {
        node.verts.iter().map(|&v| geometry.position(v)).collect()
    }

    fn normals(geometry: &Geometry, node: &Node) -> Vec<Vec3> {
        node.verts.iter().map(|&v| geometry.normal(v)).collect()
    }

    struct Half;

    impl TextureSampler for Half {
        fn sample(&self, _mode: TextureMapMode, _coord: Vec3) -> f32 {
            0.5
        }
    }

    #[test]
    fn test_mask_and_hide_seed() {
        let mut geometry = strip();
        let v = geometry.vertex_handle(1);
        geometry.set_mask(v, 0.25);
        let verts = geometry.all_vertices();
        let mut factors = vec![0.0; verts.len()];
        fill_factor_from_hide_and_mask(&geometry, &verts, &mut factors);
        assert_eq!(factors[0], 1.0);
        assert_eq!(factors[1], 0.75);
    }

    #[test]
    fn test_factors_vanish_outside_radius() {
        let geometry = strip();
        let node = whole(&geometry);
        let cache = cache_at(Vec3::ZERO, 0.6);
        let brush = Brush::draw();
        let ctx = FactorContext::new(&geometry, &cache, &brush);
        let result = ctx.calc_factors(&node, &positions(&geometry, &node), &normals(&geometry, &node));
        assert!((result.factors[0] - 1.0).abs() < 1e-6);
        assert!(result.factors[1] > 0.0 && result.factors[1] < 1.0);
        assert_eq!(result.factors[3], 0.0);
        assert_eq!(result.factors[4], 0.0);
    }

    #[test]
    fn test_stages_never_increase_factors() {
        let mut geometry = strip();
        for i in 0..10 {
            let v = geometry.vertex_handle(i);
            geometry.set_mask(v, i as f32 * 0.1);
        }
        let node = whole(&geometry);
        let mut cache = cache_at(Vec3::new(0.5, 0.5, 0.0), 1.0);
        cache.automask = Some(Arc::new(BoundaryAutoMask));
        cache.clip_planes = Some(ClipPlanes::new([Vec4::new(1.0, 0.0, 0.0, -0.3); 4]));
        let brush = Brush {
            frontface: true,
            ..Brush::draw()
        };
        let mut seed = vec![0.0; node.verts.len()];
        fill_factor_from_hide_and_mask(&geometry, &node.verts, &mut seed);
        let ctx = FactorContext::new(&geometry, &cache, &brush);
        let result = ctx.calc_factors(&node, &positions(&geometry, &node), &normals(&geometry, &node));
        for (f, s) in result.factors.iter().zip(&seed) {
            assert!(*f <= *s + 1e-6);
            assert!(*f >= 0.0);
        }
    }

    #[test]
    fn test_region_clip_uses_mirrored_point() {
        let geometry = strip();
        let node = whole(&geometry);
        let mut cache = cache_at(Vec3::ZERO, 10.0);
        // Visible only for x > 0.6
        cache.clip_planes = Some(ClipPlanes::new([Vec4::new(1.0, 0.0, 0.0, -0.6); 4]));
        let pos = positions(&geometry, &node);
        let mut factors = vec![1.0; pos.len()];
        filter_region_clip_factors(&cache, &pos, &mut factors);
        assert_eq!(factors[0], 0.0);
        assert_eq!(factors[4], 1.0);

        cache.mirror_symmetry_pass = 1;
        let mirrored: Vec<Vec3> = pos.iter().map(|p| symmetry_flip(*p, 1)).collect();
        let mut factors = vec![1.0; pos.len()];
        filter_region_clip_factors(&cache, &mirrored, &mut factors);
        assert_eq!(factors[0], 0.0);
        assert_eq!(factors[4], 1.0);
    }

    #[test]
    fn test_texture_scales_factors() {
        let geometry = strip();
        let node = whole(&geometry);
        let cache = cache_at(Vec3::ZERO, 0.6);
        let brush = Brush::draw();
        let ctx = FactorContext::new(&geometry, &cache, &brush).with_texture(Some(&Half));
        let result = ctx.calc_factors(&node, &positions(&geometry, &node), &normals(&geometry, &node));
        assert!((result.factors[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_texture_coord_undoes_mirror() {
        let mut cache = cache_at(Vec3::ZERO, 1.0);
        cache.mirror_symmetry_pass = 1;
        let coord = texture_coord(&cache, TextureMapMode::Area, Vec3::new(-0.5, 0.25, 0.0));
        assert!((coord - Vec3::new(0.5, 0.25, 0.0)).length() < 1e-6);
        let coord = texture_coord(&cache, TextureMapMode::Tiled3D, Vec3::new(-0.5, 0.25, 0.0));
        assert_eq!(coord, Vec3::new(-0.5, 0.25, 0.0));
    }

    #[test]
    fn test_face_set_automask() {
        let geometry = strip();
        let node = whole(&geometry);
        let cache = cache_at(Vec3::ZERO, 1.0);
        let mut factors = vec![1.0; node.verts.len()];
        calc_automask_factors(&FaceSetAutoMask { face_set: 99 }, &cache, &geometry, &node, &mut factors);
        assert!(factors.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_tube_distance_ignores_depth() {
        let positions = [Vec3::new(0.5, 0.0, 3.0)];
        let mut distances = [0.0];
        calc_brush_distances(Vec3::ZERO, Vec3::Z, FalloffShape::Tube, &positions, &mut distances);
        assert!((distances[0] - 0.5).abs() < 1e-6);
        calc_brush_distances(Vec3::ZERO, Vec3::Z, FalloffShape::Sphere, &positions, &mut distances);
        assert!(distances[0] > 3.0);
    }

    #[test]
    fn test_plane_filters() {
        let plane = plane_from_point_normal(Vec3::ZERO, Vec3::Z);
        let positions = [Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0)];
        let mut below = [1.0; 3];
        filter_below_plane_factors(&positions, plane, &mut below);
        assert_eq!(below, [1.0, 0.0, 0.0]);
        let mut above = [1.0; 3];
        filter_above_plane_factors(&positions, plane, &mut above);
        assert_eq!(above, [0.0, 1.0, 1.0]);

        let mut translations = [Vec3::ZERO; 3];
        calc_translations_to_plane(&positions, plane, &mut translations);
        assert_eq!(translations[0], Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(translations[2], Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_plane_trim() {
        let brush = Brush {
            use_plane_trim: true,
            plane_trim: 0.5,
            ..Brush::flatten()
        };
        let mut cache = cache_at(Vec3::ZERO, 2.0);
        cache.plane_trim_squared = 0.25;
        let translations = [Vec3::new(0.0, 0.0, 0.5), Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, 1.5)];
        let mut factors = [1.0; 3];
        filter_plane_trim_limit_factors(&brush, &cache, &translations, &mut factors);
        assert_eq!(factors, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_project_translations() {
        let mut translations = [Vec3::new(1.0, 2.0, 3.0)];
        project_translations(&mut translations, Vec3::Z);
        assert_eq!(translations[0], Vec3::new(1.0, 2.0, 0.0));
    }
}
