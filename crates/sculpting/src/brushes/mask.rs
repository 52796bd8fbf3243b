//! Mask painting and mask smoothing.

use crate::brush::MaskTool;
use crate::geometry::VertexHandle;
use crate::session::SessionState;
use crate::spatial::NodeId;

use super::{BrushAction, BrushContext};

/// Average mask of the neighbors of `vert`, fake neighbors included.
pub fn neighbor_mask_average(session: &SessionState, vert: VertexHandle) -> f32 {
    let neighbors = session.neighbors(vert, false);
    if neighbors.is_empty() {
        return session.geometry.mask(vert);
    }
    let sum: f32 = neighbors.iter().map(|&n| session.geometry.mask(n)).sum();
    sum / neighbors.len() as f32
}

#[derive(Debug, Clone, Copy)]
pub struct MaskAction;

impl BrushAction for MaskAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let strength = ctx.cache.bstrength;
        let tool = ctx.brush.mask_tool;
        let updates = ctx.map_nodes(nodes, |node| {
            let session = &*ctx.session;
            let geometry = &session.geometry;
            let positions = ctx.current_positions(node);
            let normals = ctx.current_normals(node);
            let factors = ctx
                .factor_context()
                .ignoring_mask()
                .calc_factors(node, &positions, &normals)
                .factors;
            let masks: Vec<f32> = node
                .verts
                .iter()
                .zip(&factors)
                .map(|(&v, &factor)| {
                    let mask = geometry.mask(v);
                    let delta = match tool {
                        MaskTool::Draw => factor * strength,
                        MaskTool::Smooth => (neighbor_mask_average(session, v) - mask) * factor * strength,
                    };
                    (mask + delta).clamp(0.0, 1.0)
                })
                .collect();
            (node.id, node.verts.clone(), masks)
        });

        for (id, verts, masks) in updates {
            for (&v, &mask) in verts.iter().zip(&masks) {
                ctx.session.geometry.set_mask(v, mask);
            }
            ctx.dirty.mark_node(id, &verts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::brush::Brush;
    use glam::Vec3;

    fn mask_of(harness: &Harness, index: usize) -> f32 {
        let v = harness.session.geometry.vertex_handle(index);
        harness.session.geometry.mask(v)
    }

    #[test]
    fn test_mask_draw_adds_and_clamps() {
        let mut harness = Harness::new(grid_plane(5, 0.25), Brush::mask());
        let center = harness.index_at(Vec3::ZERO);
        harness.run(|ctx, nodes| MaskAction.apply(ctx, nodes));
        assert!(mask_of(&harness, center) > 0.0);
        for _ in 0..4 {
            harness.run(|ctx, nodes| MaskAction.apply(ctx, nodes));
        }
        assert_eq!(mask_of(&harness, center), 1.0);
        // Positions are untouched
        assert_eq!(harness.position_of(center), Vec3::ZERO);
    }

    #[test]
    fn test_mask_subtracts_with_negative_strength() {
        let mut harness = Harness::new(grid_plane(5, 0.25), Brush::mask());
        let center = harness.index_at(Vec3::ZERO);
        let v = harness.session.geometry.vertex_handle(center);
        harness.session.geometry.set_mask(v, 1.0);
        harness.cache.bstrength = -1.0;
        harness.run(|ctx, nodes| MaskAction.apply(ctx, nodes));
        assert_eq!(mask_of(&harness, center), 0.0);
    }

    #[test]
    fn test_mask_smooth_spreads() {
        let mut brush = Brush::mask();
        brush.mask_tool = MaskTool::Smooth;
        let mut harness = Harness::new(grid_plane(5, 0.25), brush);
        let center = harness.index_at(Vec3::ZERO);
        let side = harness.index_at(Vec3::new(0.25, 0.0, 0.0));
        let v = harness.session.geometry.vertex_handle(center);
        harness.session.geometry.set_mask(v, 1.0);
        harness.cache.bstrength = 0.5;
        harness.run(|ctx, nodes| MaskAction.apply(ctx, nodes));
        let center_mask = mask_of(&harness, center);
        assert!(center_mask < 1.0 && center_mask > 0.0);
        assert!(mask_of(&harness, side) > 0.0);
    }
}
