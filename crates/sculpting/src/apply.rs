//! Writing displacements back to the mesh.
//!
//! Brush actions produce one translation per vertex. [`write_translations`]
//! locks and clips them, writes the evaluated buffer, maps them through the
//! deform matrices and adds them to the base positions and shape keys. The
//! flush functions then refresh normals and bounds and notify the redraw
//! collaborator once.

use std::collections::{BTreeSet, HashSet};

use glam::{Mat3, Vec3};

use crate::cache::MirrorClip;
use crate::geometry::{BackendKind, Geometry, VertexHandle};
use crate::session::SessionState;
use crate::spatial::NodeId;
use crate::undo::{SnapshotSource, UndoKind};

/// Which attribute a flush covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    Position,
    Mask,
    Color,
}

/// Receives geometry change notifications, at most once per flush.
pub trait RedrawNotifier {
    fn mark_geometry_changed(&mut self, kind: UpdateType);
}

/// Notifier that ignores every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRedraw;

impl RedrawNotifier for NoRedraw {
    fn mark_geometry_changed(&mut self, _kind: UpdateType) {}
}

/// Nodes and vertices modified since the last flush.
#[derive(Debug, Default)]
pub struct DirtyVertices {
    pub nodes: BTreeSet<NodeId>,
    pub verts: HashSet<VertexHandle>,
}

impl DirtyVertices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_node(&mut self, id: NodeId, verts: &[VertexHandle]) {
        self.nodes.insert(id);
        self.verts.extend(verts.iter().copied());
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.verts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.verts.len()
    }
}

// ============================================================================
// Translations
// ============================================================================

/// Zero locked axes and keep vertices on a clipping mirror plane from
/// leaving it.
///
/// Clipping looks at the current position in mirror space: within the
/// tolerance of the plane, the translation is replaced by the one that moves
/// the vertex exactly onto the plane.
pub fn clip_and_lock_translations(
    lock_axes: u8,
    clip: &MirrorClip,
    positions: &[Vec3],
    translations: &mut [Vec3],
) {
    debug_assert_eq!(positions.len(), translations.len());
    for axis in 0..3 {
        if lock_axes & (1 << axis) != 0 {
            for translation in translations.iter_mut() {
                translation[axis] = 0.0;
            }
            continue;
        }
        if !clip.is_clipped(axis) {
            continue;
        }
        let mirror = clip.matrix;
        let mirror_inverse = mirror.inverse();
        for (translation, position) in translations.iter_mut().zip(positions) {
            let mut co_mirror = mirror.transform_point3(*position);
            if co_mirror[axis].abs() > clip.tolerance[axis] {
                continue;
            }
            co_mirror[axis] = 0.0;
            let co_local = mirror_inverse.transform_point3(co_mirror);
            translation[axis] = co_local[axis] - position[axis];
        }
    }
}

/// Map translations from deformed space back to base-mesh space.
pub fn apply_crazyspace_to_translations(deform_imats: &[Mat3], indices: &[usize], translations: &mut [Vec3]) {
    for (translation, &index) in translations.iter_mut().zip(indices) {
        if let Some(imat) = deform_imats.get(index) {
            *translation = *imat * *translation;
        }
    }
}

/// Add translations to the active shape key and the keys relative to it.
///
/// Editing the reference key copies the new base positions instead.
pub fn apply_translations_to_shape_keys(
    session: &mut SessionState,
    verts: &[VertexHandle],
    indices: &[usize],
    translations: &[Vec3],
) {
    let Some(keys) = session.shape_keys.as_mut() else {
        return;
    };
    let active = keys.active;
    let dependent = keys.dependent_keys();
    let geometry = &session.geometry;

    if let Some(key) = keys.keys.get_mut(active) {
        if active == keys.reference {
            for (&vert, &index) in verts.iter().zip(indices) {
                if let Some(slot) = key.positions.get_mut(index) {
                    *slot = geometry.base_position(vert);
                }
            }
        } else {
            add_at(&mut key.positions, indices, translations);
        }
    }
    for other in dependent {
        if let Some(key) = keys.keys.get_mut(other) {
            add_at(&mut key.positions, indices, translations);
        }
    }
}

fn add_at(data: &mut [Vec3], indices: &[usize], translations: &[Vec3]) {
    for (&index, translation) in indices.iter().zip(translations) {
        if let Some(slot) = data.get_mut(index) {
            *slot += *translation;
        }
    }
}

fn dense_indices(geometry: &Geometry, verts: &[VertexHandle]) -> Vec<usize> {
    verts
        .iter()
        .map(|&v| geometry.vertex_index(v).unwrap_or(usize::MAX))
        .collect()
}

/// Write translations computed on evaluated positions back to every
/// position buffer.
///
/// Order: lock and clip, evaluated buffer, deform matrices, base positions,
/// shape keys. `translations` holds the base-space values afterwards.
pub fn write_translations(
    session: &mut SessionState,
    lock_axes: u8,
    clip: &MirrorClip,
    verts: &[VertexHandle],
    translations: &mut [Vec3],
) {
    debug_assert_eq!(verts.len(), translations.len());
    let positions_eval: Vec<Vec3> = verts.iter().map(|&v| session.geometry.position(v)).collect();

    clip_and_lock_translations(lock_axes, clip, &positions_eval, translations);

    if session.geometry.is_deformed() {
        for ((&vert, position), translation) in verts.iter().zip(&positions_eval).zip(translations.iter()) {
            session.geometry.set_deformed_position(vert, *position + *translation);
        }
    }

    let indices = dense_indices(&session.geometry, verts);
    if !session.deform_imats.is_empty() {
        apply_crazyspace_to_translations(&session.deform_imats, &indices, translations);
    }

    for (&vert, translation) in verts.iter().zip(translations.iter()) {
        let base = session.geometry.base_position(vert);
        session.geometry.set_base_position(vert, base + *translation);
    }

    apply_translations_to_shape_keys(session, verts, &indices, translations);
}

// ============================================================================
// Restore
// ============================================================================

/// Put every vertex with a position snapshot back to its pre-stroke place.
///
/// Dynamic topology meshes restore coordinates only, best effort: vertices
/// created since the snapshot keep their position. Returns the restored
/// nodes.
pub fn restore_position_from_undo_step<S>(session: &mut SessionState, source: &S) -> Vec<NodeId>
where
    S: SnapshotSource + ?Sized,
{
    let ids: Vec<NodeId> = session.tree.nodes().iter().map(|n| n.id).collect();
    let mut restored = Vec::new();
    let mut touched = Vec::new();

    for id in ids {
        let Some(snapshot) = source.snapshot(id, UndoKind::Position) else {
            continue;
        };
        let verts = &snapshot.verts;
        let undo_positions = &snapshot.positions;

        match session.geometry.kind() {
            BackendKind::Plain => {
                let mut translations: Vec<Vec3> = verts
                    .iter()
                    .zip(undo_positions)
                    .map(|(&v, undo)| *undo - session.geometry.position(v))
                    .collect();
                let deformed = session.geometry.is_deformed();
                for (&v, undo) in verts.iter().zip(undo_positions) {
                    if deformed {
                        session.geometry.set_deformed_position(v, *undo);
                    } else {
                        session.geometry.set_base_position(v, *undo);
                    }
                }
                let indices = dense_indices(&session.geometry, verts);
                if deformed {
                    if session.deform_imats.is_empty() {
                        for (&v, undo) in verts.iter().zip(undo_positions) {
                            session.geometry.set_base_position(v, *undo);
                        }
                    } else {
                        apply_crazyspace_to_translations(&session.deform_imats, &indices, &mut translations);
                        for (&v, translation) in verts.iter().zip(&translations) {
                            let base = session.geometry.base_position(v);
                            session.geometry.set_base_position(v, base + *translation);
                        }
                    }
                }
                apply_translations_to_shape_keys(session, verts, &indices, &translations);
            }
            BackendKind::Grid => {
                for (&v, undo) in verts.iter().zip(undo_positions) {
                    if !session.geometry.is_hidden(v) {
                        session.geometry.set_base_position(v, *undo);
                    }
                }
            }
            BackendKind::Dynamic => {
                // Removed vertices are skipped by the write
                for (&v, undo) in verts.iter().zip(undo_positions) {
                    session.geometry.set_base_position(v, *undo);
                }
            }
        }
        session.tree.mark_stale(id);
        touched.extend_from_slice(verts);
        restored.push(id);
    }

    session.geometry.stitch_seams(&touched);
    session.geometry.update_normals(&touched);
    tracing::debug!("restore_position_from_undo_step: {} nodes", restored.len());
    restored
}

pub fn restore_mask_from_undo_step<S>(session: &mut SessionState, source: &S) -> Vec<NodeId>
where
    S: SnapshotSource + ?Sized,
{
    let ids: Vec<NodeId> = session.tree.nodes().iter().map(|n| n.id).collect();
    let mut restored = Vec::new();
    for id in ids {
        let Some(snapshot) = source.snapshot(id, UndoKind::Mask) else {
            continue;
        };
        for (&v, &mask) in snapshot.verts.iter().zip(&snapshot.masks) {
            session.geometry.set_mask(v, mask);
        }
        restored.push(id);
    }
    restored
}

pub fn restore_color_from_undo_step<S>(session: &mut SessionState, source: &S) -> Vec<NodeId>
where
    S: SnapshotSource + ?Sized,
{
    let ids: Vec<NodeId> = session.tree.nodes().iter().map(|n| n.id).collect();
    let mut restored = Vec::new();
    for id in ids {
        let Some(snapshot) = source.snapshot(id, UndoKind::Color) else {
            continue;
        };
        for (&v, &color) in snapshot.verts.iter().zip(&snapshot.colors) {
            session.geometry.set_color(v, color);
        }
        restored.push(id);
    }
    restored
}

/// Restore every attribute the source holds snapshots for.
pub fn restore_all<S>(session: &mut SessionState, source: &S) -> Vec<UpdateType>
where
    S: SnapshotSource + ?Sized,
{
    let mut updated = Vec::new();
    if !restore_position_from_undo_step(session, source).is_empty() {
        updated.push(UpdateType::Position);
    }
    if !restore_mask_from_undo_step(session, source).is_empty() {
        updated.push(UpdateType::Mask);
    }
    if !restore_color_from_undo_step(session, source).is_empty() {
        updated.push(UpdateType::Color);
    }
    updated
}

// ============================================================================
// Flush
// ============================================================================

/// Per-step flush: grid seams, normals and bounds of dirty nodes, then one
/// notification.
pub fn flush_update_step(
    session: &mut SessionState,
    dirty: &mut DirtyVertices,
    kind: UpdateType,
    notifier: &mut dyn RedrawNotifier,
) {
    if kind == UpdateType::Position {
        for &id in &dirty.nodes {
            session.tree.mark_stale(id);
        }
        let verts: Vec<VertexHandle> = dirty.verts.iter().copied().collect();
        session.geometry.stitch_seams(&verts);
        session.geometry.update_normals(&verts);
        session.tree.update_bounds(&session.geometry);
    }
    tracing::trace!("flush_update_step: {:?} over {} nodes", kind, dirty.nodes.len());
    dirty.clear();
    notifier.mark_geometry_changed(kind);
}

/// End-of-stroke flush.
pub fn flush_update_done(session: &mut SessionState, kind: UpdateType) {
    match kind {
        UpdateType::Position => {
            session.tree.update_bounds(&session.geometry);
            session.tree.store_original_bounds();
            // Coordinates moved, so island links may be wrong
            session.fake_neighbors.invalidate();
        }
        UpdateType::Mask => session.tree.update_visibility_flags(&session.geometry),
        UpdateType::Color => {}
    }
}
