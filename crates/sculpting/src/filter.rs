//! Whole-mesh filters.
//!
//! A filter deforms every visible, unmasked vertex at once, without a brush
//! or a cursor. It shares snapshots, automasking and the write path with
//! strokes, so locks and mirror clipping behave the same way.

use std::sync::Arc;

use glam::{Mat3, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use chisel_config::SculptSettings;

use crate::apply::{
    DirtyVertices, RedrawNotifier, UpdateType, flush_update_done, flush_update_step,
    restore_position_from_undo_step, write_translations,
};
use crate::brushes::smooth::neighbor_position_average;
use crate::cache::{MirrorClip, StrokeCache};
use crate::factors::AutoMaskProvider;
use crate::geometry::{Geometry, VertexHandle};
use crate::session::SessionState;
use crate::spatial::{Node, NodeId, SpatialGather};
use crate::undo::{SnapshotSource, UndoKind, UndoLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterType {
    /// Relax toward neighbor averages
    #[default]
    Smooth,
    /// Scale about the object origin
    Scale,
    /// Push along the original normals
    Inflate,
    /// Morph toward a sphere around the object origin
    Sphere,
    /// Noise along the normals
    Random,
    /// Exaggerate the difference to neighbor averages
    EnhanceDetails,
}

impl FilterType {
    /// Continuous filters build on the result of the previous iteration.
    pub fn is_continuous(self) -> bool {
        matches!(self, Self::Smooth)
    }
}

/// Space in which disabled axes are zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterOrientation {
    #[default]
    Local,
    World,
    View,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshFilterSettings {
    pub filter_type: FilterType,
    pub strength: f32,
    /// Bit 0 = X, bit 1 = Y, bit 2 = Z
    pub deform_axes: u8,
    pub orientation: FilterOrientation,
    /// Seed of the [`FilterType::Random`] noise
    pub random_seed: u32,
}

impl Default for MeshFilterSettings {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Smooth,
            strength: 1.0,
            deform_axes: 0b111,
            orientation: FilterOrientation::Local,
            random_seed: 0,
        }
    }
}

/// One running filter session, from `begin` to `end` or `cancel`.
pub struct MeshFilter {
    settings: MeshFilterSettings,
    nodes: Vec<NodeId>,
    lock_axes: u8,
    parallel_threshold: usize,
    mirror_clip: MirrorClip,
    to_orientation: Mat3,
    from_orientation: Mat3,
    /// Neighbor average minus position at filter start, by dense index
    detail_directions: Vec<Vec3>,
    automask: Option<Arc<dyn AutoMaskProvider>>,
    automask_cache: StrokeCache,
    /// Build on current positions instead of the snapshot
    no_orig_co: bool,
    iteration_count: u32,
}

struct FilterNode {
    id: NodeId,
    verts: Vec<VertexHandle>,
    translations: Vec<Vec3>,
}

impl MeshFilter {
    /// Gather the filtered nodes and snapshot their positions.
    pub fn begin(
        session: &mut SessionState,
        sculpt_settings: &SculptSettings,
        undo: &mut dyn UndoLog,
        settings: MeshFilterSettings,
    ) -> Self {
        session.ensure_tree();
        session.tree.update_visibility_flags(&session.geometry);

        let nodes: Vec<NodeId> = session
            .tree
            .search(false, &|_| true)
            .into_iter()
            .filter(|&id| {
                session
                    .tree
                    .node(id)
                    .is_some_and(|n| !n.fully_hidden && !n.fully_masked)
            })
            .collect();
        undo.push_nodes(&session.geometry, &session.tree, &nodes, UndoKind::Position);

        let detail_directions = if settings.filter_type == FilterType::EnhanceDetails {
            let geometry = &session.geometry;
            (0..geometry.vertex_count())
                .map(|i| {
                    let v = geometry.vertex_handle(i);
                    neighbor_position_average(geometry, v) - geometry.position(v)
                })
                .collect()
        } else {
            Vec::new()
        };

        let (to_orientation, from_orientation) = orientation_matrices(session, settings.orientation);
        let mirror_clip = MirrorClip::from_modifiers(&session.view.mirror_modifiers, session.view.object_to_world);

        debug!(
            "MeshFilter::begin: {:?} over {} nodes",
            settings.filter_type,
            nodes.len()
        );

        Self {
            settings,
            nodes,
            lock_axes: sculpt_settings.lock_axes,
            parallel_threshold: sculpt_settings.parallel_threshold,
            mirror_clip,
            to_orientation,
            from_orientation,
            detail_directions,
            automask: None,
            automask_cache: StrokeCache::default(),
            no_orig_co: false,
            iteration_count: 0,
        }
    }

    pub fn with_automask(mut self, provider: Arc<dyn AutoMaskProvider>) -> Self {
        self.automask = Some(provider);
        self
    }

    pub fn settings(&self) -> &MeshFilterSettings {
        &self.settings
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    /// Evaluate the filter once with `strength`.
    ///
    /// Non-continuous filters recompute from the snapshot every call, so
    /// dragging the strength back and forth is stable.
    pub fn apply(
        &mut self,
        session: &mut SessionState,
        snapshots: &dyn SnapshotSource,
        strength: f32,
        notifier: &mut dyn RedrawNotifier,
    ) {
        if self.settings.deform_axes & 0b111 == 0 {
            debug!("MeshFilter::apply: every axis disabled");
            return;
        }
        self.settings.strength = strength;

        let results: Vec<FilterNode> = {
            let session = &*session;
            let nodes: Vec<&Node> = self.nodes.iter().filter_map(|&id| session.tree.node(id)).collect();
            if nodes.len() >= self.parallel_threshold {
                nodes
                    .par_iter()
                    .map(|&node| self.filter_node(session, snapshots, node))
                    .collect()
            } else {
                nodes
                    .iter()
                    .map(|&node| self.filter_node(session, snapshots, node))
                    .collect()
            }
        };

        let mut dirty = DirtyVertices::new();
        for mut result in results {
            write_translations(
                session,
                self.lock_axes,
                &self.mirror_clip,
                &result.verts,
                &mut result.translations,
            );
            dirty.mark_node(result.id, &result.verts);
        }
        self.iteration_count += 1;
        trace!("MeshFilter::apply: iteration {}", self.iteration_count);
        flush_update_step(session, &mut dirty, UpdateType::Position, notifier);
    }

    /// Run `iterations` steps, each building on the previous result.
    pub fn repeat(
        &mut self,
        session: &mut SessionState,
        snapshots: &dyn SnapshotSource,
        iterations: u32,
        notifier: &mut dyn RedrawNotifier,
    ) {
        self.no_orig_co = true;
        let strength = self.settings.strength;
        for _ in 0..iterations {
            self.apply(session, snapshots, strength, notifier);
        }
    }

    pub fn end(self, session: &mut SessionState) {
        flush_update_done(session, UpdateType::Position);
        debug!("MeshFilter::end: {} iterations", self.iteration_count);
    }

    /// Put every filtered vertex back where it was at `begin`.
    pub fn cancel(self, session: &mut SessionState, snapshots: &dyn SnapshotSource) {
        restore_position_from_undo_step(session, snapshots);
        flush_update_done(session, UpdateType::Position);
    }

    fn filter_node(&self, session: &SessionState, snapshots: &dyn SnapshotSource, node: &Node) -> FilterNode {
        let geometry = &session.geometry;
        let snapshot = snapshots
            .snapshot(node.id, UndoKind::Position)
            .filter(|s| s.verts.len() == node.verts.len());
        let from_current = self.settings.filter_type.is_continuous() || self.no_orig_co;

        let translations = node
            .verts
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                if geometry.is_hidden(v) {
                    return Vec3::ZERO;
                }
                let mut fade = (1.0 - geometry.mask(v)) * self.settings.strength;
                if let Some(provider) = &self.automask {
                    fade *= provider.factor(&self.automask_cache, geometry, v, node);
                }
                if fade == 0.0 {
                    return Vec3::ZERO;
                }

                let current = geometry.position(v);
                let (orig_position, orig_normal) = match snapshot {
                    Some(s) => (s.positions[i], s.normals[i]),
                    None => (current, geometry.normal(v)),
                };
                let base = if from_current { current } else { orig_position };

                let disp = self.displacement(geometry, v, base, orig_normal, fade);
                let disp = self.from_orientation * zero_axes(self.to_orientation * disp, self.settings.deform_axes);
                base + disp - current
            })
            .collect();

        FilterNode {
            id: node.id,
            verts: node.verts.clone(),
            translations,
        }
    }

    fn displacement(&self, geometry: &Geometry, v: VertexHandle, base: Vec3, normal: Vec3, fade: f32) -> Vec3 {
        match self.settings.filter_type {
            FilterType::Smooth => {
                let fade = fade.clamp(-1.0, 1.0);
                (neighbor_position_average(geometry, v) - base) * fade
            }
            FilterType::Inflate => normal * fade,
            FilterType::Scale => base * fade,
            FilterType::Sphere => {
                let to_sphere = base.normalize_or_zero() * fade.abs();
                let scale = if fade > 0.0 { 1.0 - fade } else { 1.0 + fade };
                let to_center = base * scale - base;
                (to_sphere + to_center) * 0.5
            }
            FilterType::Random => {
                let hash = hash_int_2d(base.x.to_bits(), base.y.to_bits())
                    ^ hash_int_2d(base.z.to_bits(), self.settings.random_seed);
                let noise = hash as f32 / u32::MAX as f32 - 0.5;
                normal * noise * fade
            }
            FilterType::EnhanceDetails => {
                let direction = geometry
                    .vertex_index(v)
                    .and_then(|i| self.detail_directions.get(i).copied())
                    .unwrap_or(Vec3::ZERO);
                direction * -fade.abs()
            }
        }
    }
}

impl std::fmt::Debug for MeshFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshFilter")
            .field("settings", &self.settings)
            .field("nodes", &self.nodes.len())
            .field("automask", &self.automask.is_some())
            .field("iteration_count", &self.iteration_count)
            .finish()
    }
}

/// Object space to orientation space and back.
fn orientation_matrices(session: &SessionState, orientation: FilterOrientation) -> (Mat3, Mat3) {
    let object_to_world = Mat3::from_mat4(session.view.object_to_world);
    let world_to_object = if object_to_world.determinant().abs() > f32::EPSILON {
        object_to_world.inverse()
    } else {
        Mat3::IDENTITY
    };
    match orientation {
        FilterOrientation::Local => (Mat3::IDENTITY, Mat3::IDENTITY),
        FilterOrientation::World => (object_to_world, world_to_object),
        FilterOrientation::View => {
            let view = &session.view;
            let view_to_world = Mat3::from_cols(view.view_right, view.view_up, view.view_dir);
            let world_to_view = if view_to_world.determinant().abs() > f32::EPSILON {
                view_to_world.inverse()
            } else {
                Mat3::IDENTITY
            };
            (world_to_view * object_to_world, world_to_object * view_to_world)
        }
    }
}

fn zero_axes(mut v: Vec3, deform_axes: u8) -> Vec3 {
    for axis in 0..3 {
        if deform_axes & (1 << axis) == 0 {
            v[axis] = 0.0;
        }
    }
    v
}

/// Jenkins lookup3 final mix of two words.
fn hash_int_2d(kx: u32, ky: u32) -> u32 {
    let mut a = 0xdead_beef_u32.wrapping_add(2 << 2).wrapping_add(13);
    let mut b = a.wrapping_add(ky);
    let mut c = a;
    a = a.wrapping_add(kx);

    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::NoRedraw;
    use crate::brushes::test_support::grid_plane;
    use crate::factors::BoundaryAutoMask;
    use crate::undo::MemoryUndoLog;

    fn setup() -> (SessionState, SculptSettings, MemoryUndoLog) {
        let settings = SculptSettings::without_symmetry();
        let session = SessionState::new(grid_plane(5, 0.25), &settings);
        let mut undo = MemoryUndoLog::new(4);
        undo.begin("filter");
        (session, settings, undo)
    }

    fn position(session: &SessionState, index: usize) -> Vec3 {
        session.geometry.position(session.geometry.vertex_handle(index))
    }

    fn run(filter_settings: MeshFilterSettings, strength: f32) -> (SessionState, MeshFilter) {
        let (mut session, settings, mut undo) = setup();
        let mut filter = MeshFilter::begin(&mut session, &settings, &mut undo, filter_settings);
        filter.apply(&mut session, &undo, strength, &mut NoRedraw);
        (session, filter)
    }

    #[test]
    fn test_scale_grows_from_origin() {
        let settings = MeshFilterSettings {
            filter_type: FilterType::Scale,
            ..Default::default()
        };
        let (session, filter) = run(settings, 0.5);
        // Corner of the grid
        let corner = position(&session, 0);
        assert!((corner - Vec3::new(-0.75, -0.75, 0.0)).length() < 1e-5);
        assert_eq!(filter.iteration_count(), 1);
    }

    #[test]
    fn test_scale_is_stable_across_calls() {
        let (mut session, settings, mut undo) = setup();
        let filter_settings = MeshFilterSettings {
            filter_type: FilterType::Scale,
            ..Default::default()
        };
        let mut filter = MeshFilter::begin(&mut session, &settings, &mut undo, filter_settings);
        filter.apply(&mut session, &undo, 0.5, &mut NoRedraw);
        filter.apply(&mut session, &undo, 0.5, &mut NoRedraw);
        let corner = position(&session, 0);
        assert!((corner - Vec3::new(-0.75, -0.75, 0.0)).length() < 1e-5);

        filter.repeat(&mut session, &undo, 1, &mut NoRedraw);
        assert!(position(&session, 0).x < -0.75);
    }

    #[test]
    fn test_disabled_axis_stays_fixed() {
        let settings = MeshFilterSettings {
            filter_type: FilterType::Scale,
            deform_axes: 0b001,
            ..Default::default()
        };
        let (session, _) = run(settings, 1.0);
        let corner = position(&session, 0);
        assert!((corner.x + 1.0).abs() < 1e-5);
        assert!((corner.y + 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_no_axes_is_noop() {
        let settings = MeshFilterSettings {
            filter_type: FilterType::Inflate,
            deform_axes: 0,
            ..Default::default()
        };
        let (session, filter) = run(settings, 1.0);
        assert_eq!(position(&session, 12), Vec3::ZERO);
        assert_eq!(filter.iteration_count(), 0);
    }

    #[test]
    fn test_masked_vertex_does_not_move() {
        let (mut session, settings, mut undo) = setup();
        let masked = session.geometry.vertex_handle(0);
        session.geometry.set_mask(masked, 1.0);
        let filter_settings = MeshFilterSettings {
            filter_type: FilterType::Inflate,
            ..Default::default()
        };
        let mut filter = MeshFilter::begin(&mut session, &settings, &mut undo, filter_settings);
        filter.apply(&mut session, &undo, 0.1, &mut NoRedraw);
        assert_eq!(position(&session, 0).z, 0.0);
        assert!((position(&session, 12).z.abs() - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_sphere_moves_toward_sphere() {
        let settings = MeshFilterSettings {
            filter_type: FilterType::Sphere,
            ..Default::default()
        };
        let (session, _) = run(settings, 1.0);
        // Full strength lands halfway to the unit sphere
        let corner = position(&session, 0);
        let expected = (Vec3::new(-0.5, -0.5, 0.0).length() + 1.0) * 0.5;
        assert!((corner.length() - expected).abs() < 1e-5);
        assert_eq!(position(&session, 12), Vec3::ZERO);
    }

    #[test]
    fn test_random_is_deterministic_for_seed() {
        let settings = MeshFilterSettings {
            filter_type: FilterType::Random,
            random_seed: 7,
            ..Default::default()
        };
        let (first, _) = run(settings.clone(), 1.0);
        let (second, _) = run(settings, 1.0);
        for i in 0..first.geometry.vertex_count() {
            assert_eq!(position(&first, i), position(&second, i));
        }
        assert!((0..first.geometry.vertex_count()).any(|i| position(&first, i).z != 0.0));
    }

    #[test]
    fn test_smooth_reduces_spike() {
        let (mut session, settings, mut undo) = setup();
        let center = session.geometry.vertex_handle(12);
        session.geometry.set_base_position(center, Vec3::new(0.0, 0.0, 0.2));
        let mut filter = MeshFilter::begin(&mut session, &settings, &mut undo, MeshFilterSettings::default());
        filter.apply(&mut session, &undo, 0.5, &mut NoRedraw);
        let z = position(&session, 12).z;
        assert!(z < 0.2 && z > 0.0);
    }

    #[test]
    fn test_enhance_details_grows_spike() {
        let (mut session, settings, mut undo) = setup();
        let center = session.geometry.vertex_handle(12);
        session.geometry.set_base_position(center, Vec3::new(0.0, 0.0, 0.2));
        let filter_settings = MeshFilterSettings {
            filter_type: FilterType::EnhanceDetails,
            ..Default::default()
        };
        let mut filter = MeshFilter::begin(&mut session, &settings, &mut undo, filter_settings);
        filter.apply(&mut session, &undo, 0.5, &mut NoRedraw);
        assert!(position(&session, 12).z > 0.2);
    }

    #[test]
    fn test_automask_and_cancel() {
        let (mut session, settings, mut undo) = setup();
        let filter_settings = MeshFilterSettings {
            filter_type: FilterType::Inflate,
            ..Default::default()
        };
        let mut filter = MeshFilter::begin(&mut session, &settings, &mut undo, filter_settings)
            .with_automask(Arc::new(BoundaryAutoMask));
        filter.apply(&mut session, &undo, 0.1, &mut NoRedraw);
        assert_eq!(position(&session, 0).z, 0.0);
        assert!(position(&session, 12).z != 0.0);

        filter.cancel(&mut session, &undo);
        assert_eq!(position(&session, 12), Vec3::ZERO);
        assert_eq!(session.tree.stale_count(), 0);
    }

    #[test]
    fn test_filter_settings_from_json() {
        let settings: MeshFilterSettings = serde_json::from_str(r#"{"filter_type":"Sphere"}"#).unwrap();
        assert_eq!(settings.filter_type, FilterType::Sphere);
        assert_eq!(settings.deform_axes, 0b111);
        assert!(FilterType::Smooth.is_continuous());
        assert!(!settings.filter_type.is_continuous());
    }
}
