//! Geometry backend facade.
//!
//! Brush and factor code reads and writes vertices through [`Geometry`]
//! without knowing which representation is active. The backends are a closed
//! set, so dispatch is a single `match` per call.
//!
//! Reads never fail. A handle of the wrong kind or out of range produces a
//! neutral value (zero vector, no mask, [`FACE_SET_NONE`], empty neighbor
//! list) that the callers treat as "nothing to do".

pub mod dynamic;
pub mod grids;
pub mod plain;

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

pub use dynamic::{DynamicMesh, FaceId, VertexId};
pub use grids::GridMesh;
pub use plain::PlainMesh;

/// Face set value meaning "no face set"
pub const FACE_SET_NONE: i32 = 0;

/// Which representation backs the geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Plain,
    Grid,
    Dynamic,
}

/// Packed position of a vertex inside a multires grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub grid: u32,
    pub x: u16,
    pub y: u16,
}

/// Opaque vertex reference.
///
/// Only valid for the representation it was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexHandle {
    Plain(u32),
    Grid(GridCoord),
    Dynamic(VertexId),
}

/// The mesh being sculpted, in one of three representations.
#[derive(Debug, Clone)]
pub enum Geometry {
    Plain(PlainMesh),
    Grid(GridMesh),
    Dynamic(DynamicMesh),
}

impl Geometry {
    pub fn kind(&self) -> BackendKind {
        match self {
            Geometry::Plain(_) => BackendKind::Plain,
            Geometry::Grid(_) => BackendKind::Grid,
            Geometry::Dynamic(_) => BackendKind::Dynamic,
        }
    }

    pub fn vertex_count(&self) -> usize {
        match self {
            Geometry::Plain(m) => m.vertex_count(),
            Geometry::Grid(m) => m.vertex_count(),
            Geometry::Dynamic(m) => m.vertex_count(),
        }
    }

    pub fn topology_version(&self) -> u64 {
        match self {
            Geometry::Plain(m) => m.topology_version(),
            Geometry::Grid(m) => m.topology_version(),
            Geometry::Dynamic(m) => m.topology_version(),
        }
    }

    /// Build adjacency and index tables if the topology changed since they
    /// were last built.
    pub fn ensure_random_access(&mut self) {
        match self {
            Geometry::Plain(m) => m.ensure_adjacency(),
            Geometry::Grid(m) => m.ensure_adjacency(),
            // Half-edge links are maintained incrementally
            Geometry::Dynamic(_) => {}
        }
    }

    /// Handle for a dense vertex index
    pub fn vertex_handle(&self, index: usize) -> VertexHandle {
        match self {
            Geometry::Plain(_) => VertexHandle::Plain(index as u32),
            Geometry::Grid(m) => VertexHandle::Grid(m.coord(index)),
            Geometry::Dynamic(_) => VertexHandle::Dynamic(VertexId(index as u32)),
        }
    }

    /// Dense index of a handle, `None` for a handle of another backend
    pub fn vertex_index(&self, vert: VertexHandle) -> Option<usize> {
        match (self, vert) {
            (Geometry::Plain(_), VertexHandle::Plain(i)) => Some(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => Some(m.index(c)),
            (Geometry::Dynamic(_), VertexHandle::Dynamic(id)) => Some(id.0 as usize),
            _ => None,
        }
    }

    /// Every vertex handle in dense order
    pub fn all_vertices(&self) -> Vec<VertexHandle> {
        (0..self.vertex_count()).map(|i| self.vertex_handle(i)).collect()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Evaluated position
    pub fn position(&self, vert: VertexHandle) -> Vec3 {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.position(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.position(c),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => {
                m.vertex(id).map(|v| v.position).unwrap_or(Vec3::ZERO)
            }
            _ => Vec3::ZERO,
        }
    }

    /// Undeformed position. Equal to [`Self::position`] unless a plain mesh
    /// carries deformed coordinates.
    pub fn base_position(&self, vert: VertexHandle) -> Vec3 {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.base_position(i as usize),
            _ => self.position(vert),
        }
    }

    pub fn normal(&self, vert: VertexHandle) -> Vec3 {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.normal(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.normal(c),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => {
                m.vertex(id).map(|v| v.normal).unwrap_or(Vec3::ZERO)
            }
            _ => Vec3::ZERO,
        }
    }

    pub fn is_hidden(&self, vert: VertexHandle) -> bool {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.is_hidden(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.is_hidden(c),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => {
                m.vertex(id).is_some_and(|v| v.hidden)
            }
            _ => false,
        }
    }

    pub fn mask(&self, vert: VertexHandle) -> f32 {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.mask(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.mask(c),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => {
                m.vertex(id).map(|v| v.mask).unwrap_or(0.0)
            }
            _ => 0.0,
        }
    }

    pub fn face_set(&self, vert: VertexHandle) -> i32 {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.face_set(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.face_set(c),
            _ => FACE_SET_NONE,
        }
    }

    pub fn has_colors(&self) -> bool {
        matches!(self, Geometry::Plain(m) if m.has_colors())
    }

    /// Vertex color, plain meshes only
    pub fn color(&self, vert: VertexHandle) -> Option<Vec4> {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.color(i as usize),
            _ => None,
        }
    }

    pub fn is_deformed(&self) -> bool {
        matches!(self, Geometry::Plain(m) if m.is_deformed())
    }

    // ========================================================================
    // Visibility and face sets
    // ========================================================================

    /// Not hidden and at least one incident face visible
    pub fn is_visible(&self, vert: VertexHandle) -> bool {
        !self.is_hidden(vert) && self.vert_any_face_visible(vert)
    }

    pub fn vert_any_face_visible(&self, vert: VertexHandle) -> bool {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.any_face_visible(i as usize),
            _ => true,
        }
    }

    pub fn vert_all_faces_visible(&self, vert: VertexHandle) -> bool {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.all_faces_visible(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.all_faces_visible(c),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => m.all_faces_visible(id),
            _ => true,
        }
    }

    pub fn vert_has_face_set(&self, vert: VertexHandle, face_set: i32) -> bool {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.has_face_set(i as usize, face_set),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.has_face_set(c, face_set),
            _ => face_set == FACE_SET_NONE,
        }
    }

    /// Dynamic meshes carry no face sets, so every vertex is unique there.
    pub fn vert_has_unique_face_set(&self, vert: VertexHandle) -> bool {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.has_unique_face_set(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.has_unique_face_set(c),
            _ => true,
        }
    }

    pub fn vert_is_boundary(&self, vert: VertexHandle) -> bool {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.is_boundary(i as usize),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.is_boundary(c),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => m.is_boundary_vertex(id),
            _ => false,
        }
    }

    // ========================================================================
    // Neighbors
    // ========================================================================

    /// Connected neighbors. `include_duplicates` only affects grids, where it
    /// appends the seam copies of the vertex itself.
    pub fn neighbors(&self, vert: VertexHandle, include_duplicates: bool) -> Vec<VertexHandle> {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m
                .neighbors(i as usize)
                .into_iter()
                .map(VertexHandle::Plain)
                .collect(),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m
                .neighbors(c, include_duplicates)
                .into_iter()
                .map(VertexHandle::Grid)
                .collect(),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => m
                .loop_neighbors(id)
                .into_iter()
                .map(VertexHandle::Dynamic)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Neighbors used by boundary-preserving smoothing
    pub fn neighbors_interior(&self, vert: VertexHandle) -> Vec<VertexHandle> {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m
                .neighbors_interior(i as usize)
                .into_iter()
                .map(VertexHandle::Plain)
                .collect(),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m
                .neighbors_interior(c)
                .into_iter()
                .map(VertexHandle::Grid)
                .collect(),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => {
                let mut result = m.loop_neighbors(id);
                if m.is_boundary_vertex(id) {
                    if result.len() == 2 {
                        result.clear();
                    } else {
                        result.retain(|&n| m.is_boundary_vertex(n));
                    }
                }
                result.into_iter().map(VertexHandle::Dynamic).collect()
            }
            _ => Vec::new(),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn set_mask(&mut self, vert: VertexHandle, value: f32) {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.set_mask(i as usize, value),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.set_mask(c, value),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => {
                if let Some(v) = m.vertex_mut(id) {
                    v.mask = value;
                }
            }
            _ => {}
        }
    }

    pub fn set_color(&mut self, vert: VertexHandle, color: Vec4) {
        if let (Geometry::Plain(m), VertexHandle::Plain(i)) = (self, vert) {
            m.set_color(i as usize, color);
        }
    }

    /// Write the undeformed position
    pub fn set_base_position(&mut self, vert: VertexHandle, position: Vec3) {
        match (self, vert) {
            (Geometry::Plain(m), VertexHandle::Plain(i)) => m.set_base_position(i as usize, position),
            (Geometry::Grid(m), VertexHandle::Grid(c)) => m.set_position(c, position),
            (Geometry::Dynamic(m), VertexHandle::Dynamic(id)) => {
                if let Some(v) = m.vertex_mut(id) {
                    v.position = position;
                }
            }
            _ => {}
        }
    }

    /// Write the evaluated position. No-op unless the mesh is deformed.
    pub fn set_deformed_position(&mut self, vert: VertexHandle, position: Vec3) {
        if let (Geometry::Plain(m), VertexHandle::Plain(i)) = (self, vert) {
            m.set_deformed_position(i as usize, position);
        }
    }

    /// Merge grid seam duplicates of the given vertices after per-handle
    /// writes. No-op on the other backends.
    pub fn stitch_seams(&mut self, verts: &[VertexHandle]) {
        if let Geometry::Grid(m) = self {
            let coords: Vec<GridCoord> = verts
                .iter()
                .filter_map(|v| match v {
                    VertexHandle::Grid(c) => Some(*c),
                    _ => None,
                })
                .collect();
            m.stitch(&coords);
        }
    }

    /// Recompute normals around the given vertices
    pub fn update_normals(&mut self, verts: &[VertexHandle]) {
        match self {
            Geometry::Plain(m) => {
                let indices: Vec<usize> = verts
                    .iter()
                    .filter_map(|v| match v {
                        VertexHandle::Plain(i) => Some(*i as usize),
                        _ => None,
                    })
                    .collect();
                m.update_normals(&indices);
            }
            Geometry::Grid(m) => {
                let coords: Vec<GridCoord> = verts
                    .iter()
                    .filter_map(|v| match v {
                        VertexHandle::Grid(c) => Some(*c),
                        _ => None,
                    })
                    .collect();
                m.update_normals(&coords);
            }
            Geometry::Dynamic(m) => {
                let ids: Vec<VertexId> = verts
                    .iter()
                    .filter_map(|v| match v {
                        VertexHandle::Dynamic(id) => Some(*id),
                        _ => None,
                    })
                    .collect();
                m.update_normals(&ids);
            }
        }
    }
}
