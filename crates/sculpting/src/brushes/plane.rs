//! Plane brushes: flatten, fill, scrape, clay and clay strips.
//!
//! All of them move vertices toward a plane sampled from the surface under
//! the brush. They differ in which side of the plane is affected and in how
//! far the plane is pushed along its normal.

use glam::{Mat4, Vec3, Vec4};

use crate::factors::{
    calc_translations_to_plane, filter_above_plane_factors, filter_below_plane_factors,
    filter_plane_trim_limit_factors, plane_from_point_normal, plane_point_side, scale_factors,
    scale_translations,
};
use crate::orientation::{calc_brush_local_mat, displaced_plane};
use crate::spatial::NodeId;
use crate::types::DisplacementDirection;

use super::{BrushAction, BrushContext, NodeTranslations};

/// Which side of the plane a plane brush works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneKind {
    /// Both sides
    Flatten,
    /// Raise points below the plane
    Fill,
    /// Lower points above the plane
    Scrape,
}

impl PlaneKind {
    fn swapped(self) -> Self {
        match self {
            Self::Fill => Self::Scrape,
            Self::Scrape => Self::Fill,
            Self::Flatten => Self::Flatten,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlaneAction(pub PlaneKind);

impl BrushAction for PlaneAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let mut kind = self.0;
        if ctx.cache.invert && ctx.brush.invert_to_scrape_fill {
            kind = kind.swapped();
        }

        let (mut normal, center) = ctx.brush_plane(nodes);
        let strength = ctx.cache.bstrength;
        if kind != PlaneKind::Flatten && strength < 0.0 {
            normal = -normal;
        }
        let plane = displaced_plane(ctx.brush, ctx.cache, normal, center);
        let strength = if kind == PlaneKind::Flatten { strength } else { strength.abs() };

        let brush = ctx.brush;
        let cache = &*ctx.cache;
        let results = ctx.map_nodes(nodes, |node| {
            let mut data = ctx.node_data(node, false);
            let mut translations = vec![Vec3::ZERO; data.positions.len()];
            calc_translations_to_plane(&data.positions, plane, &mut translations);
            filter_plane_trim_limit_factors(brush, cache, &translations, &mut data.factors);
            match kind {
                PlaneKind::Flatten => {}
                PlaneKind::Fill => filter_above_plane_factors(&data.positions, plane, &mut data.factors),
                PlaneKind::Scrape => filter_below_plane_factors(&data.positions, plane, &mut data.factors),
            }
            scale_factors(&mut data.factors, strength);
            scale_translations(&mut translations, &data.factors);
            NodeTranslations {
                node: node.id,
                verts: node.verts.clone(),
                translations,
            }
        });
        ctx.write(results);
    }
}

/// Builds up toward a plane above the surface.
#[derive(Debug, Clone, Copy)]
pub struct ClayAction;

impl BrushAction for ClayAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let cache = &*ctx.cache;
        let offset = ctx.brush.plane_offset_for(cache.pressure);
        let flip = cache.bstrength < 0.0;
        let mut displace = (cache.initial_radius * (0.25 + offset)).abs();
        if flip {
            displace = -displace;
        }
        let strength = cache.bstrength.abs();
        let scale = cache.scale;

        let resolved = ctx.resolve(nodes);
        let (normal, center) = ctx.area_sampler(nodes.len()).area_normal_and_center(&resolved);
        let plane = plane_from_point_normal(center + normal * scale * displace, normal);

        ctx.deform(nodes, false, move |data| {
            let mut translations = vec![Vec3::ZERO; data.positions.len()];
            calc_translations_to_plane(&data.positions, plane, &mut translations);
            scale_factors(&mut data.factors, strength);
            scale_translations(&mut translations, &data.factors);
            translations
        });
    }
}

/// Square strips laid along the stroke.
///
/// The first step of every pass only records the stroke direction.
#[derive(Debug, Clone, Copy)]
pub struct ClayStripsAction;

impl ClayStripsAction {
    /// Object-to-tip matrix: Y runs along the stroke, Z along `normal`.
    fn tip_matrix(ctx: &BrushContext<'_>, normal: Vec3, origin: Vec3) -> Mat4 {
        let cache = &*ctx.cache;
        let x = normal.cross(cache.grab_delta_symmetry).normalize_or_zero();
        let y = normal.cross(x).normalize_or_zero();
        let radius = cache.radius;
        let local_to_object = if x == Vec3::ZERO || y == Vec3::ZERO {
            let (_, local_to_object) = calc_brush_local_mat(cache, normal, origin, 0.0);
            local_to_object
        } else {
            Mat4::from_cols(
                (x * radius).extend(0.0),
                (y * radius).extend(0.0),
                (normal * radius).extend(0.0),
                origin.extend(1.0),
            )
        };
        let scaled = local_to_object * Mat4::from_scale(Vec3::new(ctx.brush.tip_scale_x, 1.0, 1.0));
        if scaled.determinant().abs() <= f32::EPSILON {
            return Mat4::IDENTITY;
        }
        scaled.inverse()
    }
}

impl BrushAction for ClayStripsAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let (plane_normal, mut center) = ctx.brush_plane(nodes);
        if ctx.cache.is_first_step_of_pass() {
            return;
        }

        let brush = ctx.brush;
        let resolved = ctx.resolve(nodes);
        let area_normal = if brush.direction != DisplacementDirection::Area || brush.original_normal {
            ctx.area_sampler(nodes.len())
                .area_normal(&resolved)
                .unwrap_or(plane_normal)
        } else {
            plane_normal
        };

        let cache = &*ctx.cache;
        let flip = cache.bstrength < 0.0;
        let radius = if flip { -cache.radius } else { cache.radius };
        let displace = radius * (0.18 + brush.plane_offset_for(cache.pressure));
        center += plane_normal * cache.scale * displace;
        let plane: Vec4 = plane_from_point_normal(center, plane_normal);

        // Sink the tip so vertices just below the plane are still inside it
        let origin = center - area_normal * radius * 0.7;
        let local_mat = Self::tip_matrix(ctx, area_normal, origin);
        let strength = cache.bstrength.abs();

        let results = ctx.map_nodes(nodes, |node| {
            let positions = ctx.current_positions(node);
            let normals = ctx.current_normals(node);
            let mut factors = ctx
                .factor_context()
                .calc_cube_factors(node, &positions, &normals, &local_mat)
                .factors;
            for (factor, position) in factors.iter_mut().zip(&positions) {
                let mut side = plane_point_side(plane, *position);
                if flip {
                    side = -side;
                }
                if side > 0.0 {
                    *factor = 0.0;
                }
            }
            let mut translations = vec![Vec3::ZERO; positions.len()];
            calc_translations_to_plane(&positions, plane, &mut translations);
            filter_plane_trim_limit_factors(brush, cache, &translations, &mut factors);
            scale_factors(&mut factors, strength);
            scale_translations(&mut translations, &factors);
            NodeTranslations {
                node: node.id,
                verts: node.verts.clone(),
                translations,
            }
        });
        ctx.write(results);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::brush::Brush;

    /// Grid with a bump at the center and a dent next to it.
    fn bumpy(brush: Brush) -> (Harness, usize, usize) {
        let mut harness = Harness::new(grid_plane(9, 0.125), brush);
        let bump = harness.index_at(Vec3::new(0.125, 0.0, 0.0));
        let dent = harness.index_at(Vec3::new(-0.125, 0.0, 0.0));
        let geometry = &mut harness.session.geometry;
        let (vb, vd) = (geometry.vertex_handle(bump), geometry.vertex_handle(dent));
        geometry.set_base_position(vb, Vec3::new(0.125, 0.0, 0.1));
        geometry.set_base_position(vd, Vec3::new(-0.125, 0.0, -0.1));
        (harness, bump, dent)
    }

    fn run(harness: &mut Harness, action: impl BrushAction) {
        harness.brush.direction = DisplacementDirection::Z;
        harness.run(|ctx, nodes| action.apply(ctx, nodes));
    }

    #[test]
    fn test_flatten_moves_both_sides() {
        let (mut harness, bump, dent) = bumpy(Brush::flatten());
        run(&mut harness, PlaneAction(PlaneKind::Flatten));
        assert!(harness.position_of(bump).z < 0.1);
        assert!(harness.position_of(dent).z > -0.1);
    }

    #[test]
    fn test_fill_only_raises() {
        let (mut harness, bump, dent) = bumpy(Brush::fill());
        run(&mut harness, PlaneAction(PlaneKind::Fill));
        assert_eq!(harness.position_of(bump).z, 0.1);
        assert!(harness.position_of(dent).z > -0.1);
    }

    #[test]
    fn test_scrape_only_lowers() {
        let (mut harness, bump, dent) = bumpy(Brush::scrape());
        run(&mut harness, PlaneAction(PlaneKind::Scrape));
        assert!(harness.position_of(bump).z < 0.1);
        assert_eq!(harness.position_of(dent).z, -0.1);
    }

    #[test]
    fn test_inverted_fill_scrapes() {
        let (mut harness, bump, dent) = bumpy(Brush::fill());
        harness.cache.invert = true;
        run(&mut harness, PlaneAction(PlaneKind::Fill));
        assert!(harness.position_of(bump).z < 0.1);
        assert_eq!(harness.position_of(dent).z, -0.1);
    }

    #[test]
    fn test_plane_trim_skips_far_vertices() {
        let mut brush = Brush::flatten();
        brush.use_plane_trim = true;
        let (mut harness, bump, _) = bumpy(brush);
        harness.cache.plane_trim_squared = 0.05 * 0.05;
        run(&mut harness, PlaneAction(PlaneKind::Flatten));
        assert_eq!(harness.position_of(bump).z, 0.1);
    }

    #[test]
    fn test_clay_builds_up() {
        let mut harness = Harness::new(grid_plane(5, 0.25), Brush::clay());
        harness.brush.direction = DisplacementDirection::Z;
        harness.cache.bstrength = 0.5;
        let center = harness.index_at(Vec3::ZERO);
        harness.run(|ctx, nodes| ClayAction.apply(ctx, nodes));
        assert!(harness.position_of(center).z > 0.0);
    }

    #[test]
    fn test_clay_strips_skip_first_step() {
        let mut harness = Harness::new(grid_plane(5, 0.25), Brush::clay_strips());
        harness.cache.first_time = true;
        harness.run(|ctx, nodes| ClayStripsAction.apply(ctx, nodes));
        assert!(harness.dirty.is_empty());

        harness.cache.first_time = false;
        harness.cache.grab_delta_symmetry = Vec3::new(0.1, 0.0, 0.0);
        let center = harness.index_at(Vec3::ZERO);
        harness.run(|ctx, nodes| ClayStripsAction.apply(ctx, nodes));
        assert!(harness.position_of(center).z > 0.0);
    }
}
