//! Mirror, radial and tiled repetition of brush passes.
//!
//! Every step of a stroke is evaluated once per valid mirror combination,
//! once per radial copy around each axis and once per tile. The driver
//! rewrites the per-pass fields of the [`StrokeCache`] before each pass and
//! hands it to the brush action.

use std::f32::consts::TAU;

use chisel_config::SculptSettings;
use glam::{Mat4, Quat, Vec3};

use crate::brush::Brush;
use crate::cache::StrokeCache;
use crate::spatial::Aabb;
use crate::types::Axis;

/// Whether mirror combination `i` is evaluated for the symmetry mask `symm`.
///
/// With two mirror axes enabled the diagonal combination of the disabled
/// axis pairs is skipped, so each enabled combination runs once.
pub fn is_symmetry_iteration_valid(i: u8, symm: u8) -> bool {
    i == 0
        || (symm & i != 0
            && !(symm == 5 && i == 3)
            && !(symm == 6 && (i == 3 || i == 5)))
}

/// Mirror a point across every axis set in `symm`.
pub fn symmetry_flip(v: Vec3, symm: u8) -> Vec3 {
    let mut out = v;
    for axis in 0..3 {
        if symm & (1 << axis) != 0 {
            out[axis] = -out[axis];
        }
    }
    out
}

/// Mirror a rotation across every axis set in `symm`.
pub fn flip_quat(q: Quat, symm: u8) -> Quat {
    let (axis, angle) = q.to_axis_angle();
    let mut axis = axis.normalize_or_zero();
    let mut angle = angle;
    for i in 0..3 {
        if symm & (1 << i) != 0 {
            axis[i] = -axis[i];
            angle = -angle;
        }
    }
    if axis == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    Quat::from_axis_angle(axis, angle)
}

fn radial_rotation(axis: Axis, angle: f32) -> Mat4 {
    Mat4::from_axis_angle(axis.unit(), angle)
}

/// Footprint overlap of the mirrored copy with the unmirrored brush.
pub fn calc_overlap(cache: &StrokeCache, symm: u8, axis: Option<Axis>, angle: f32) -> f32 {
    let mut mirror = symmetry_flip(cache.true_location, symm);
    if let Some(axis) = axis {
        mirror = radial_rotation(axis, angle).transform_point3(mirror);
    }
    let distsq = mirror.distance_squared(cache.true_location);
    if distsq <= 4.0 * cache.radius_squared && cache.radius > 0.0 {
        return (2.0 * cache.radius - distsq.sqrt()) / (2.0 * cache.radius);
    }
    0.0
}

fn radial_overlap(cache: &StrokeCache, settings: &SculptSettings, symm: u8, axis: Axis) -> f32 {
    let count = settings.radial_counts[axis.index()];
    (1..count)
        .map(|i| calc_overlap(cache, symm, Some(axis), TAU * i as f32 / count as f32))
        .sum()
}

/// Strength scale that keeps overlapping symmetric copies from adding up.
pub fn symmetry_feather(cache: &StrokeCache, settings: &SculptSettings) -> f32 {
    if !settings.symmetry_feather {
        return 1.0;
    }
    let symm = settings.symmetry;
    let mut overlap = 0.0;
    for i in 0..=symm {
        if !is_symmetry_iteration_valid(i, symm) {
            continue;
        }
        overlap += calc_overlap(cache, i, None, 0.0);
        for axis in Axis::ALL {
            overlap += radial_overlap(cache, settings, i, axis);
        }
    }
    if overlap <= 0.0 {
        return 1.0;
    }
    1.0 / overlap
}

/// Derive the per-pass values of mirror combination `symm`, rotated by
/// `angle` around `axis` for radial copies.
pub fn calc_brushdata_symm(cache: &mut StrokeCache, symm: u8, axis: Option<Axis>, angle: f32) {
    cache.location = symmetry_flip(cache.true_location, symm);
    cache.last_location = symmetry_flip(cache.true_last_location, symm);
    cache.grab_delta_symmetry = symmetry_flip(cache.grab_delta, symm);
    cache.view_normal = symmetry_flip(cache.true_view_normal, symm);
    cache.initial_location = symmetry_flip(cache.true_initial_location, symm);
    cache.initial_normal = symmetry_flip(cache.true_initial_normal, symm);

    cache.symm_rot_mat = Mat4::IDENTITY;
    cache.symm_rot_mat_inv = Mat4::IDENTITY;
    cache.plane_offset = Vec3::ZERO;
    if let Some(axis) = axis {
        cache.symm_rot_mat = radial_rotation(axis, angle);
        cache.symm_rot_mat_inv = radial_rotation(axis, -angle);
    }

    cache.location = cache.symm_rot_mat.transform_point3(cache.location);
    cache.grab_delta_symmetry = cache.symm_rot_mat.transform_vector3(cache.grab_delta_symmetry);

    if cache.supports_gravity {
        cache.gravity_direction = cache
            .symm_rot_mat
            .transform_vector3(symmetry_flip(cache.true_gravity_direction, symm));
    }

    if cache.is_rake_rotation_valid {
        cache.rake_rotation_symmetry = flip_quat(cache.rake_rotation, symm);
    }
}

/// Run the untiled pass, then one pass per tile intersecting the object.
///
/// Returns the number of passes run.
pub fn do_tiled(
    cache: &mut StrokeCache,
    settings: &SculptSettings,
    object_bounds: &Aabb,
    action: &mut dyn FnMut(&mut StrokeCache),
) -> u32 {
    let radius = cache.radius;
    let step = Vec3::from_array(settings.tile_offset);
    let origin = cache.location;
    let original_initial_location = cache.initial_location;

    let mut start = [0_i32; 3];
    let mut end = [0_i32; 3];
    for dim in 0..3 {
        if settings.tiling_axes & (1 << dim) != 0 && step[dim] > 0.0 {
            start[dim] = ((object_bounds.min[dim] - origin[dim] - radius) / step[dim]) as i32;
            end[dim] = ((object_bounds.max[dim] - origin[dim] + radius) / step[dim]) as i32;
        }
    }

    cache.tile_pass = 0;
    cache.enter_pass();
    action(cache);
    let mut passes = 1;

    for x in start[0]..=end[0] {
        for y in start[1]..=end[1] {
            for z in start[2]..=end[2] {
                if x == 0 && y == 0 && z == 0 {
                    continue;
                }
                cache.tile_pass += 1;
                let offset = Vec3::new(x as f32, y as f32, z as f32) * step;
                cache.location = origin + offset;
                cache.plane_offset = offset;
                cache.initial_location = original_initial_location + offset;
                cache.enter_pass();
                action(cache);
                passes += 1;
            }
        }
    }
    passes
}

fn do_radial_symmetry(
    cache: &mut StrokeCache,
    settings: &SculptSettings,
    object_bounds: &Aabb,
    symm: u8,
    axis: Axis,
    action: &mut dyn FnMut(&mut StrokeCache),
) -> u32 {
    let count = settings.radial_counts[axis.index()];
    let mut passes = 0;
    for i in 1..count {
        let angle = TAU * i as f32 / count as f32;
        cache.radial_symmetry_pass = i;
        calc_brushdata_symm(cache, symm, Some(axis), angle);
        passes += do_tiled(cache, settings, object_bounds, action);
    }
    passes
}

/// Evaluate one step of the stroke across every symmetric copy.
///
/// Sets the step strength (including the symmetry feather) first. Passes run
/// strictly in order: for each valid mirror combination the base pass with
/// its tiles, then its radial copies around X, Y and Z. Returns the number of
/// passes run.
pub fn do_symmetrical_brush_actions(
    cache: &mut StrokeCache,
    brush: &Brush,
    settings: &SculptSettings,
    object_bounds: &Aabb,
    action: &mut dyn FnMut(&mut StrokeCache),
) -> u32 {
    let feather = symmetry_feather(cache, settings);
    cache.bstrength = brush.stroke_strength(cache.strength_input(feather));

    let symm = settings.symmetry;
    let mut passes = 0;
    for i in 0..=symm {
        if !is_symmetry_iteration_valid(i, symm) {
            continue;
        }
        cache.mirror_symmetry_pass = i;
        cache.radial_symmetry_pass = 0;

        calc_brushdata_symm(cache, i, None, 0.0);
        passes += do_tiled(cache, settings, object_bounds, action);

        for axis in Axis::ALL {
            passes += do_radial_symmetry(cache, settings, object_bounds, i, axis, action);
        }
    }
    tracing::trace!("do_symmetrical_brush_actions: {} passes", passes);
    passes
}

/// Whether `vertex` is within `radius` of any mirrored copy of `brush_co`.
pub fn is_vertex_inside_brush_radius_symm(vertex: Vec3, brush_co: Vec3, radius: f32, symm: u8) -> bool {
    (0..=symm)
        .filter(|&i| is_symmetry_iteration_valid(i, symm))
        .any(|i| vertex.distance_squared(symmetry_flip(brush_co, i)) < radius * radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cursor, StrokeMode, ViewContext};
    use crate::types::StrokeSample;
    use glam::Vec2;

    fn settings(symmetry: u8) -> SculptSettings {
        SculptSettings {
            symmetry,
            ..SculptSettings::without_symmetry()
        }
    }

    fn stroke(brush: &Brush, settings: &SculptSettings, at: Vec3) -> StrokeCache {
        let mut cache = StrokeCache::begin(
            brush,
            settings,
            &ViewContext::default(),
            &Cursor::default(),
            StrokeMode::Normal,
            Vec2::ZERO,
        );
        cache.update_variants(brush, &StrokeSample::at(at, Vec3::Z));
        cache
    }

    fn bounds() -> Aabb {
        Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0))
    }

    fn count_passes(settings: &SculptSettings) -> u32 {
        let brush = Brush::draw();
        let mut cache = stroke(&brush, settings, Vec3::new(0.5, 0.2, 0.1));
        let mut seen = 0;
        let passes =
            do_symmetrical_brush_actions(&mut cache, &brush, settings, &bounds(), &mut |_| seen += 1);
        assert_eq!(passes, seen);
        passes
    }

    #[test]
    fn test_iteration_validity() {
        let valid = |symm: u8| (0..=symm).filter(|&i| is_symmetry_iteration_valid(i, symm)).collect::<Vec<_>>();
        assert_eq!(valid(0), vec![0]);
        assert_eq!(valid(1), vec![0, 1]);
        assert_eq!(valid(3), vec![0, 1, 2, 3]);
        assert_eq!(valid(5), vec![0, 1, 4, 5]);
        assert_eq!(valid(6), vec![0, 2, 4, 6]);
        assert_eq!(valid(7), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_pass_count_for_full_symmetry() {
        assert_eq!(count_passes(&settings(0)), 1);
        assert_eq!(count_passes(&settings(1)), 2);
        assert_eq!(count_passes(&settings(7)), 8);
    }

    #[test]
    fn test_radial_passes() {
        let settings = SculptSettings {
            radial_counts: [1, 1, 4],
            ..settings(1)
        };
        // Each mirror pass adds three radial copies around Z
        assert_eq!(count_passes(&settings), 2 * 4);
    }

    #[test]
    fn test_mirror_closure() {
        let p = Vec3::new(0.3, -0.7, 1.1);
        let copies: Vec<Vec3> = (0..=7).map(|i| symmetry_flip(p, i)).collect();
        for &c in &copies {
            for i in 0..=7 {
                let flipped = symmetry_flip(c, i);
                assert!(copies.iter().any(|&o| o.distance(flipped) < 1e-6));
            }
            assert_eq!(symmetry_flip(symmetry_flip(c, 5), 5), c);
        }
    }

    #[test]
    fn test_mirror_locations_per_pass() {
        let brush = Brush::draw();
        let settings = settings(1);
        let mut cache = stroke(&brush, &settings, Vec3::new(0.5, 0.2, 0.0));
        let mut locations = Vec::new();
        do_symmetrical_brush_actions(&mut cache, &brush, &settings, &bounds(), &mut |c| {
            locations.push((c.mirror_symmetry_pass, c.location, c.view_normal))
        });
        assert_eq!(locations[0].0, 0);
        assert_eq!(locations[0].1, Vec3::new(0.5, 0.2, 0.0));
        assert_eq!(locations[1].0, 1);
        assert_eq!(locations[1].1, Vec3::new(-0.5, 0.2, 0.0));
    }

    #[test]
    fn test_radial_rotation_matrices_are_inverse() {
        let mut cache = StrokeCache::default();
        cache.true_location = Vec3::new(1.0, 0.0, 0.0);
        calc_brushdata_symm(&mut cache, 0, Some(Axis::Z), TAU / 4.0);
        assert!((cache.location - Vec3::Y).length() < 1e-5);
        let back = cache.symm_rot_mat_inv.transform_point3(cache.location);
        assert!((back - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_untiled_pass_runs_first_once() {
        let brush = Brush::draw();
        let settings = SculptSettings {
            tiling_axes: 0b001,
            tile_offset: [1.0, 1.0, 1.0],
            ..settings(0)
        };
        let mut cache = stroke(&brush, &settings, Vec3::ZERO);
        let mut tiles = Vec::new();
        do_symmetrical_brush_actions(&mut cache, &brush, &settings, &bounds(), &mut |c| {
            tiles.push((c.tile_pass, c.plane_offset))
        });
        assert_eq!(tiles[0], (0, Vec3::ZERO));
        assert_eq!(tiles.iter().filter(|(_, o)| *o == Vec3::ZERO).count(), 1);
        assert!(tiles.len() > 1);
        for (pass, offset) in &tiles[1..] {
            assert!(*pass > 0);
            assert!(offset.x != 0.0);
            assert_eq!(offset.y, 0.0);
        }
    }

    #[test]
    fn test_feather_halves_overlapping_copies() {
        let brush = Brush {
            radius: 1.0,
            ..Brush::draw()
        };
        let settings = SculptSettings {
            symmetry_feather: true,
            ..settings(1)
        };
        // On the mirror plane both copies coincide
        let cache = stroke(&brush, &settings, Vec3::ZERO);
        assert!((symmetry_feather(&cache, &settings) - 0.5).abs() < 1e-6);
        // Far from it only the base pass counts
        let cache = stroke(&brush, &settings, Vec3::new(5.0, 0.0, 0.0));
        assert!((symmetry_feather(&cache, &settings) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_flip_quat_mirrors_rotation() {
        let q = Quat::from_axis_angle(Vec3::Z, 0.5);
        let flipped = flip_quat(q, 1);
        let v = flipped * Vec3::X;
        let expected = symmetry_flip(q * symmetry_flip(Vec3::X, 1), 1);
        assert!((v - expected).length() < 1e-5);
    }

    #[test]
    fn test_inside_radius_symm() {
        let brush_co = Vec3::new(1.0, 0.0, 0.0);
        assert!(is_vertex_inside_brush_radius_symm(Vec3::new(-1.0, 0.0, 0.0), brush_co, 0.1, 1));
        assert!(!is_vertex_inside_brush_radius_symm(Vec3::new(-1.0, 0.0, 0.0), brush_co, 0.1, 0));
    }
}
