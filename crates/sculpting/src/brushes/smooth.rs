//! Smoothing: laplacian relax, enhance details and surface (HC) smoothing.
//!
//! The laplacian path is also the autosmooth pass run after other brushes.

use glam::Vec3;

use crate::brush::SmoothDeform;
use crate::geometry::{Geometry, VertexHandle};
use crate::spatial::NodeId;

use super::{BrushAction, BrushContext, NodeTranslations};

const MAX_ITERATIONS: u32 = 4;

/// Average position of the interior neighbors of `vert`. A vertex without
/// neighbors averages to itself.
pub fn neighbor_position_average(geometry: &Geometry, vert: VertexHandle) -> Vec3 {
    let neighbors = geometry.neighbors_interior(vert);
    if neighbors.is_empty() {
        return geometry.position(vert);
    }
    let sum: Vec3 = neighbors.iter().map(|&n| geometry.position(n)).sum();
    sum / neighbors.len() as f32
}

/// Split a strength into whole iterations and a final partial one.
fn iteration_strengths(strength: f32) -> Vec<f32> {
    let strength = strength.clamp(0.0, 1.0);
    let fract = 1.0 / MAX_ITERATIONS as f32;
    let count = (strength * MAX_ITERATIONS as f32) as u32;
    let last = MAX_ITERATIONS as f32 * (strength - count as f32 * fract);
    (0..=count).map(|i| if i != count { 1.0 } else { last }).collect()
}

/// Relax the gathered region toward neighbor averages.
pub fn do_smooth_brush(ctx: &mut BrushContext<'_>, nodes: &[NodeId], strength: f32) {
    for iteration_strength in iteration_strengths(strength) {
        if iteration_strength <= 0.0 {
            continue;
        }
        let results = ctx.map_nodes(nodes, |node| {
            let data = ctx.node_data(node, false);
            let geometry = &ctx.session.geometry;
            let translations = node
                .verts
                .iter()
                .zip(&data.positions)
                .zip(&data.factors)
                .map(|((&v, position), &factor)| {
                    (neighbor_position_average(geometry, v) - *position) * factor * iteration_strength
                })
                .collect();
            NodeTranslations {
                node: node.id,
                verts: node.verts.clone(),
                translations,
            }
        });
        ctx.write(results);
    }
}

/// Push vertices away from their neighbor average. `strength` is negative.
fn enhance_details(ctx: &mut BrushContext<'_>, nodes: &[NodeId], strength: f32) {
    let results = ctx.map_nodes(nodes, |node| {
        let data = ctx.node_data(node, false);
        let geometry = &ctx.session.geometry;
        let translations = node
            .verts
            .iter()
            .zip(&data.positions)
            .zip(&data.factors)
            .map(|((&v, position), &factor)| (neighbor_position_average(geometry, v) - *position) * factor * strength)
            .collect();
        NodeTranslations {
            node: node.id,
            verts: node.verts.clone(),
            translations,
        }
    });
    ctx.write(results);
}

struct LaplacianNode {
    result: NodeTranslations,
    indices: Vec<usize>,
    laplacian: Vec<Vec3>,
}

/// Volume preserving smoothing.
///
/// Every iteration first relaxes vertices while recording how far each one
/// drifted from a blend of its original and current position, then pulls
/// them back by the averaged drift of their neighbors.
fn surface_smooth(ctx: &mut BrushContext<'_>, nodes: &[NodeId], strength: f32) {
    let vertex_count = ctx.session.geometry.vertex_count();
    if ctx.cache.surface_smooth_laplacian_disp.len() != vertex_count {
        ctx.cache.surface_smooth_laplacian_disp = vec![Vec3::ZERO; vertex_count];
    }
    let alpha = ctx.brush.surface_smooth_shape_preservation;
    let beta = ctx.brush.surface_smooth_current_vertex;

    for _ in 0..ctx.brush.surface_smooth_iterations {
        let laplacian_nodes = ctx.map_nodes(nodes, |node| {
            let geometry = &ctx.session.geometry;
            let data = ctx.node_data(node, true);
            let mut indices = Vec::with_capacity(node.verts.len());
            let mut laplacian = Vec::with_capacity(node.verts.len());
            let mut translations = Vec::with_capacity(node.verts.len());
            for (i, &v) in node.verts.iter().enumerate() {
                let position = data.positions[i];
                let average = neighbor_position_average(geometry, v);
                let blended = data.sample_positions[i] * alpha + position * (1.0 - alpha);
                indices.push(geometry.vertex_index(v).unwrap_or(usize::MAX));
                laplacian.push(average - blended);
                let fade = (data.factors[i] * strength).clamp(0.0, 1.0);
                translations.push((average - position) * fade);
            }
            LaplacianNode {
                result: NodeTranslations {
                    node: node.id,
                    verts: node.verts.clone(),
                    translations,
                },
                indices,
                laplacian,
            }
        });

        let mut results = Vec::with_capacity(laplacian_nodes.len());
        for node in laplacian_nodes {
            for (&index, &disp) in node.indices.iter().zip(&node.laplacian) {
                if let Some(stored) = ctx.cache.surface_smooth_laplacian_disp.get_mut(index) {
                    *stored = disp;
                }
            }
            results.push(node.result);
        }
        ctx.write(results);

        let results = ctx.map_nodes(nodes, |node| {
            let geometry = &ctx.session.geometry;
            let stored = &ctx.cache.surface_smooth_laplacian_disp;
            let lookup = |v: VertexHandle| {
                geometry
                    .vertex_index(v)
                    .and_then(|i| stored.get(i).copied())
                    .unwrap_or(Vec3::ZERO)
            };
            let data = ctx.node_data(node, false);
            let translations = node
                .verts
                .iter()
                .zip(&data.factors)
                .map(|(&v, &factor)| {
                    let neighbors = geometry.neighbors(v, false);
                    if neighbors.is_empty() {
                        return Vec3::ZERO;
                    }
                    let sum: Vec3 = neighbors.iter().map(|&n| lookup(n)).sum();
                    let current = sum * ((1.0 - beta) / neighbors.len() as f32) + lookup(v) * beta;
                    -current * (factor * strength).clamp(0.0, 1.0)
                })
                .collect();
            NodeTranslations {
                node: node.id,
                verts: node.verts.clone(),
                translations,
            }
        });
        ctx.write(results);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SmoothAction;

impl BrushAction for SmoothAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let strength = ctx.cache.bstrength;
        if strength < 0.0 {
            enhance_details(ctx, nodes, strength);
            return;
        }
        match ctx.brush.smooth_deform {
            SmoothDeform::Laplacian => do_smooth_brush(ctx, nodes, strength),
            SmoothDeform::Surface => surface_smooth(ctx, nodes, strength),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::brush::Brush;

    fn spiked(brush: Brush) -> (Harness, usize) {
        let mut harness = Harness::new(grid_plane(5, 0.25), brush);
        let center = harness.index_at(Vec3::ZERO);
        let v = harness.session.geometry.vertex_handle(center);
        harness.session.geometry.set_base_position(v, Vec3::new(0.0, 0.0, 0.2));
        (harness, center)
    }

    #[test]
    fn test_iteration_strengths() {
        assert_eq!(iteration_strengths(1.0), vec![1.0, 1.0, 1.0, 1.0, 0.0]);
        let half = iteration_strengths(0.5);
        assert_eq!(half.len(), 3);
        assert_eq!(half[2], 0.0);
        let partial = iteration_strengths(0.1);
        assert_eq!(partial.len(), 1);
        assert!((partial[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_corner_vertex_stays_pinned() {
        let mut geometry = grid_plane(3, 1.0);
        geometry.ensure_random_access();
        let corner = geometry.vertex_handle(0);
        assert_eq!(neighbor_position_average(&geometry, corner), geometry.position(corner));
        // Boundary vertices only average along the boundary
        let edge = geometry.vertex_handle(1);
        assert_eq!(neighbor_position_average(&geometry, edge), geometry.position(edge));
    }

    #[test]
    fn test_smooth_flattens_spike() {
        let (mut harness, center) = spiked(Brush::smooth());
        harness.cache.bstrength = 0.5;
        harness.run(|ctx, nodes| SmoothAction.apply(ctx, nodes));
        let z = harness.position_of(center).z;
        assert!(z < 0.2 && z >= 0.0);
    }

    #[test]
    fn test_negative_strength_enhances() {
        let (mut harness, center) = spiked(Brush::smooth());
        harness.cache.bstrength = -0.5;
        harness.run(|ctx, nodes| SmoothAction.apply(ctx, nodes));
        assert!(harness.position_of(center).z > 0.2);
    }

    #[test]
    fn test_surface_smooth_reduces_spike() {
        let mut brush = Brush::smooth();
        brush.smooth_deform = SmoothDeform::Surface;
        let (mut harness, center) = spiked(brush);
        harness.cache.bstrength = 0.5;
        harness.run(|ctx, nodes| SmoothAction.apply(ctx, nodes));
        assert!(harness.position_of(center).z < 0.2);
        assert_eq!(
            harness.cache.surface_smooth_laplacian_disp.len(),
            harness.session.geometry.vertex_count()
        );
    }

    #[test]
    fn test_zero_strength_smooth_is_noop() {
        let (mut harness, center) = spiked(Brush::draw());
        harness.run(|ctx, nodes| do_smooth_brush(ctx, nodes, 0.0));
        assert_eq!(harness.position_of(center).z, 0.2);
    }
}
