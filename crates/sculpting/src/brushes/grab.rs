//! Brushes driven by the grab delta and by rotation: grab, snake hook,
//! thumb, nudge, rotate and pinch.

use glam::{Quat, Vec3};

use crate::cache::StrokeCache;
use crate::spatial::NodeId;
use crate::types::FalloffShape;

use super::{BrushAction, BrushContext, reset_translations_to_original};

/// Mirror passes that reverse the winding of a rotation.
const ROTATION_FLIP: [f32; 8] = [1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0];

fn project_out(v: Vec3, normal: Vec3) -> Vec3 {
    let n = normal.normalize_or_zero();
    v - n * v.dot(n)
}

/// Blend `delta` toward the sculpt normal by `normal_weight`.
///
/// The normal component is scaled so dragging keeps following the cursor as
/// the normal turns toward the viewer.
pub fn normal_align(cache: &StrokeCache, normal_weight: f32, delta: Vec3) -> Vec3 {
    let normal = cache.sculpt_normal_symm;
    let len_signed = normal.dot(delta);
    let view_aligned = project_out(normal, cache.view_normal);
    let len_view = view_aligned.dot(normal).abs();
    let len_view_scale = if len_view > f32::EPSILON { 1.0 / len_view } else { 1.0 };
    delta * (1.0 - normal_weight) + normal * (len_signed * normal_weight * len_view_scale)
}

/// Grab delta of the pass with the normal weight applied.
fn weighted_grab_delta(cache: &StrokeCache) -> Vec3 {
    let delta = cache.grab_delta_symmetry;
    if cache.normal_weight > 0.0 {
        normal_align(cache, cache.normal_weight, delta)
    } else {
        delta
    }
}

/// Moves the region under the first sample along with the cursor.
#[derive(Debug, Clone, Copy)]
pub struct GrabAction;

impl BrushAction for GrabAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let offset = weighted_grab_delta(ctx.cache) * ctx.cache.bstrength;
        ctx.deform(nodes, true, move |data| {
            let mut translations: Vec<Vec3> = data.factors.iter().map(|&f| offset * f).collect();
            reset_translations_to_original(&mut translations, &data.positions, &data.sample_positions);
            translations
        });
    }
}

/// Pulls geometry along the stroke, optionally pinching and twisting it.
#[derive(Debug, Clone, Copy)]
pub struct SnakeHookAction;

impl BrushAction for SnakeHookAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let cache = &*ctx.cache;
        let brush = ctx.brush;
        let strength = cache.bstrength;
        let location = cache.location;
        let radius = cache.radius;
        let tube = brush.falloff_shape == FalloffShape::Tube;
        let view_normal = cache.true_view_normal;
        let rake = cache.is_rake_rotation_valid.then_some(cache.rake_rotation_symmetry);

        let mut delta = cache.grab_delta_symmetry;
        if strength < 0.0 {
            delta = -delta;
        }
        if cache.normal_weight > 0.0 {
            delta = normal_align(cache, cache.normal_weight, delta);
        }
        let pinch = if brush.crease_pinch_factor != 0.5 && radius > 0.0 {
            2.0 * (0.5 - brush.crease_pinch_factor) * (delta.length() / radius)
        } else {
            0.0
        };

        ctx.deform(nodes, false, move |data| {
            data.positions
                .iter()
                .zip(&data.factors)
                .map(|(position, &factor)| {
                    let fade = factor * strength;
                    let mut translation = delta * fade;

                    // Negative pinch inflates, which keeps the volume of long hooks
                    if pinch != 0.0 {
                        let mut to_vertex = *position - location;
                        if tube {
                            to_vertex = project_out(to_vertex, view_normal);
                        }
                        let initial = project_out(to_vertex + delta, delta);
                        let mut pinch_fade = pinch * fade;
                        if pinch > 0.0 {
                            pinch_fade *= (initial.length() / radius).min(1.0).powi(2);
                        }
                        translation += initial - initial * (1.0 + pinch_fade);
                    }

                    if let Some(rotation) = rake {
                        let partial = Quat::IDENTITY.slerp(rotation, fade);
                        let arm = *position - location;
                        translation += partial * arm - arm;
                    }
                    translation
                })
                .collect()
        });
    }
}

/// Smears the surface along the stroke, keeping to the tangent plane.
#[derive(Debug, Clone, Copy)]
pub struct ThumbAction;

impl BrushAction for ThumbAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let offset = tangent_delta(ctx.cache) * ctx.cache.bstrength;
        ctx.deform(nodes, true, move |data| {
            let mut translations: Vec<Vec3> = data.factors.iter().map(|&f| offset * f).collect();
            reset_translations_to_original(&mut translations, &data.positions, &data.sample_positions);
            translations
        });
    }
}

/// Like thumb, but accumulating on current positions.
#[derive(Debug, Clone, Copy)]
pub struct NudgeAction;

impl BrushAction for NudgeAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let offset = tangent_delta(ctx.cache) * ctx.cache.bstrength;
        ctx.deform(nodes, false, move |data| data.factors.iter().map(|&f| offset * f).collect());
    }
}

/// Grab delta with the normal component removed.
fn tangent_delta(cache: &StrokeCache) -> Vec3 {
    let normal = cache.sculpt_normal_symm;
    normal.cross(cache.grab_delta_symmetry).cross(normal)
}

/// Twists the surface around the sculpt normal.
#[derive(Debug, Clone, Copy)]
pub struct RotateAction;

impl BrushAction for RotateAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let cache = &*ctx.cache;
        let flip = ROTATION_FLIP[usize::from(cache.mirror_symmetry_pass & 7)];
        let angle = cache.vertex_rotation * flip;
        let axis = cache.sculpt_normal_symm.normalize_or_zero();
        let location = cache.location;
        let strength = cache.bstrength;
        if axis == Vec3::ZERO {
            return;
        }

        ctx.deform(nodes, true, move |data| {
            data.sample_positions
                .iter()
                .zip(&data.positions)
                .zip(&data.factors)
                .map(|((orig, position), &factor)| {
                    let rotation = Quat::from_axis_angle(axis, angle * factor * strength);
                    let target = rotation * (*orig - location) + location;
                    target - *position
                })
                .collect()
        });
    }
}

/// Pulls vertices toward the brush center within the surface.
#[derive(Debug, Clone, Copy)]
pub struct PinchAction;

impl BrushAction for PinchAction {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
        let cache = &*ctx.cache;
        let normal = cache.sculpt_normal_symm;
        let location = cache.location;
        let strength = cache.bstrength;
        let view_normal = cache.view_normal;
        let tube = ctx.brush.falloff_shape == FalloffShape::Tube;

        ctx.deform(nodes, false, move |data| {
            data.positions
                .iter()
                .zip(&data.factors)
                .map(|(position, &factor)| {
                    let mut to_center = project_out(location - *position, normal);
                    if tube {
                        to_center = project_out(to_center, view_normal);
                    }
                    to_center * factor * strength
                })
                .collect()
        });
    }
}
