//! Displacement along normals: draw, inflate, layer, crease and blob.

use glam::Vec3;

use crate::factors::{scale_factors, scale_translations, translations_from_offset_and_factors};
use crate::spatial::NodeId;

use super::{BrushAction, BrushContext, NodeTranslations};

/// Draw and DrawSharp.
#[derive(Debug, Clone, Copy)]
pub struct DrawAction {
    /// Compute factors on pre-stroke positions
    pub sharp: bool,
}

impl BrushAction for DrawAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let cache = &*ctx.cache;
        let offset = cache.sculpt_normal_symm * cache.radius * cache.scale * cache.bstrength;
        ctx.deform(nodes, self.sharp, move |data| {
            let mut translations = vec![Vec3::ZERO; data.factors.len()];
            translations_from_offset_and_factors(offset, &data.factors, &mut translations);
            translations
        });
    }
}

/// Push every vertex along its own normal.
#[derive(Debug, Clone, Copy)]
pub struct InflateAction;

impl BrushAction for InflateAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let cache = &*ctx.cache;
        let scale = cache.scale * cache.radius;
        let strength = cache.bstrength;
        ctx.deform(nodes, false, move |data| {
            scale_factors(&mut data.factors, strength);
            let mut translations: Vec<Vec3> = data.sample_normals.iter().map(|n| *n * scale).collect();
            scale_translations(&mut translations, &data.factors);
            translations
        });
    }
}

/// Height limited displacement along the original normals.
///
/// The accumulated displacement of every vertex lives in the stroke cache so
/// it survives across steps. Masked vertices are limited to `1 - mask`.
#[derive(Debug, Clone, Copy)]
pub struct LayerAction;

struct LayerNode {
    result: NodeTranslations,
    indices: Vec<usize>,
    displacement: Vec<f32>,
}

impl BrushAction for LayerAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let vertex_count = ctx.session.geometry.vertex_count();
        if ctx.cache.layer_displacement_factor.len() != vertex_count {
            ctx.cache.layer_displacement_factor = vec![0.0; vertex_count];
        }

        let strength = ctx.cache.bstrength;
        let height = ctx.brush.height;
        let layer_nodes = ctx.map_nodes(nodes, |node| {
            // The mask only limits the layer height
            let data = ctx.node_data_ignoring_mask(node, true);
            let geometry = &ctx.session.geometry;
            let stored = &ctx.cache.layer_displacement_factor;

            let indices: Vec<usize> = node
                .verts
                .iter()
                .map(|&v| geometry.vertex_index(v).unwrap_or(usize::MAX))
                .collect();
            let mut displacement = Vec::with_capacity(indices.len());
            let mut translations = Vec::with_capacity(indices.len());
            for (i, &index) in indices.iter().enumerate() {
                let mut disp = stored.get(index).copied().unwrap_or(0.0);
                disp += data.factors[i] * strength * (1.05 - disp.abs());
                let limit = 1.0 - geometry.mask(node.verts[i]);
                disp = disp.clamp(-limit, limit);
                displacement.push(disp);

                let target = data.sample_positions[i] + data.sample_normals[i] * height * disp;
                translations.push(target - data.positions[i]);
            }
            LayerNode {
                result: NodeTranslations {
                    node: node.id,
                    verts: node.verts.clone(),
                    translations,
                },
                indices,
                displacement,
            }
        });

        let mut results = Vec::with_capacity(layer_nodes.len());
        for layer in layer_nodes {
            for (&index, &disp) in layer.indices.iter().zip(&layer.displacement) {
                if let Some(stored) = ctx.cache.layer_displacement_factor.get_mut(index) {
                    *stored = disp;
                }
            }
            results.push(layer.result);
        }
        ctx.write(results);
    }
}

/// Crease pinches toward the stroke line while drawing; blob relaxes
/// outward instead.
#[derive(Debug, Clone, Copy)]
pub struct CreaseAction {
    pub blob: bool,
}

impl BrushAction for CreaseAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let cache = &*ctx.cache;
        let brush = ctx.brush;
        let strength = cache.bstrength;
        let normal = cache.sculpt_normal_symm;
        let location = cache.location;
        let offset = normal * cache.radius * cache.scale * strength;

        let mut crease_correction = brush.crease_pinch_factor * brush.crease_pinch_factor;
        let alpha = brush.strength;
        if alpha > 0.0 {
            crease_correction /= alpha * alpha;
        }
        // Pinch direction does not follow the sign of the draw
        let mut pinch = crease_correction * strength.abs();
        if self.blob {
            pinch = -pinch;
        }

        ctx.deform(nodes, false, move |data| {
            data.positions
                .iter()
                .zip(&data.factors)
                .map(|(position, &factor)| {
                    let to_center = location - *position;
                    let in_plane = to_center - normal * to_center.dot(normal);
                    in_plane * factor * pinch + offset * factor
                })
                .collect()
        });
    }
}
