//! Edit-mode session state.
//!
//! [`SessionState`] lives for as long as the object is in sculpt mode. It owns
//! the geometry, the spatial tree built over it and the optional data that
//! shapes how translations are written back: shape keys, deform matrices and
//! the fake-neighbor table.

use std::collections::VecDeque;

use chisel_config::SculptSettings;
use glam::{Mat3, Vec3};

use crate::cache::{Cursor, ViewContext};
use crate::error::{check_len, SculptError, SculptResult};
use crate::geometry::{BackendKind, Geometry, VertexHandle};
use crate::spatial::{node_in_sphere, Aabb, SpatialGather, SpatialTree, TreeConfig};

/// One shape key of a plain mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeKey {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// Index of the key this one is relative to
    pub relative_to: usize,
}

/// Shape keys with the reference (basis) key and the key being edited.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeKeys {
    pub keys: Vec<ShapeKey>,
    pub reference: usize,
    pub active: usize,
}

impl ShapeKeys {
    /// Keys other than the active one whose relative chain reaches it.
    pub fn dependent_keys(&self) -> Vec<usize> {
        (0..self.keys.len())
            .filter(|&i| i != self.active && self.depends_on_active(i))
            .collect()
    }

    fn depends_on_active(&self, mut index: usize) -> bool {
        for _ in 0..self.keys.len() {
            let Some(key) = self.keys.get(index) else {
                return false;
            };
            if key.relative_to == index {
                return false;
            }
            if key.relative_to == self.active {
                return true;
            }
            index = key.relative_to;
        }
        false
    }
}

/// Links between the nearest vertices of disconnected mesh islands.
///
/// Built on demand for a maximum distance and dropped whenever positions
/// change.
#[derive(Debug, Clone, Default)]
pub struct FakeNeighbors {
    enabled: bool,
    /// Distance the table was built for
    built_for: Option<f32>,
    table: Vec<Option<u32>>,
}

impl FakeNeighbors {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_built(&self) -> bool {
        self.built_for.is_some()
    }

    /// Fake neighbor of a dense vertex index
    pub fn get(&self, index: usize) -> Option<usize> {
        if !self.enabled {
            return None;
        }
        self.table.get(index).copied().flatten().map(|n| n as usize)
    }

    /// Drop the table but keep the enabled state.
    pub fn invalidate(&mut self) {
        self.built_for = None;
        self.table.clear();
    }

    pub fn free(&mut self) {
        self.invalidate();
        self.enabled = false;
    }

    fn build(&mut self, geometry: &Geometry, tree: &SpatialTree, max_distance: f32) {
        let count = geometry.vertex_count();
        let islands = island_ids(geometry);
        let positions: Vec<Vec3> = (0..count).map(|i| geometry.position(geometry.vertex_handle(i))).collect();
        let max_sq = max_distance * max_distance;
        self.table = vec![None; count];

        for i in 0..count {
            if self.table[i].is_some() {
                continue;
            }
            let co = positions[i];
            let nodes = tree.search(false, &|b| node_in_sphere(b, co, max_sq));
            let mut nearest: Option<(usize, f32)> = None;
            for id in nodes {
                let Some(node) = tree.node(id) else {
                    continue;
                };
                for &v in &node.verts {
                    let Some(j) = geometry.vertex_index(v) else {
                        continue;
                    };
                    if islands[j] == islands[i] || self.table[j].is_some() {
                        continue;
                    }
                    let d = positions[j].distance_squared(co);
                    if d < max_sq && nearest.is_none_or(|(_, best)| d < best) {
                        nearest = Some((j, d));
                    }
                }
            }
            if let Some((j, _)) = nearest {
                self.table[i] = Some(j as u32);
                self.table[j] = Some(i as u32);
            }
        }
        self.built_for = Some(max_distance);
        tracing::debug!(
            "FakeNeighbors::build: {} links within {}",
            self.table.iter().filter(|n| n.is_some()).count() / 2,
            max_distance
        );
    }
}

/// Connected component id per dense vertex index.
fn island_ids(geometry: &Geometry) -> Vec<u32> {
    let count = geometry.vertex_count();
    let mut ids = vec![u32::MAX; count];
    let mut next = 0;
    let mut queue = VecDeque::new();
    for start in 0..count {
        if ids[start] != u32::MAX {
            continue;
        }
        ids[start] = next;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            for n in geometry.neighbors(geometry.vertex_handle(i), false) {
                if let Some(j) = geometry.vertex_index(n)
                    && ids[j] == u32::MAX
                {
                    ids[j] = next;
                    queue.push_back(j);
                }
            }
        }
        next += 1;
    }
    ids
}

/// State shared by every stroke while the object is being sculpted.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub geometry: Geometry,
    pub tree: SpatialTree,
    pub tree_config: TreeConfig,
    pub view: ViewContext,
    /// Hover cursor, used when no stroke is active
    pub cursor: Cursor,
    pub shape_keys: Option<ShapeKeys>,
    /// Per-vertex inverse deform matrices. Empty when the mesh is not deformed.
    pub deform_imats: Vec<Mat3>,
    pub fake_neighbors: FakeNeighbors,
}

impl SessionState {
    pub fn new(mut geometry: Geometry, settings: &SculptSettings) -> Self {
        geometry.ensure_random_access();
        let tree_config = TreeConfig {
            leaf_limit: settings.leaf_limit,
            ..Default::default()
        };
        let tree = SpatialTree::build(&geometry, &tree_config);
        Self {
            geometry,
            tree,
            tree_config,
            view: ViewContext::default(),
            cursor: Cursor::default(),
            shape_keys: None,
            deform_imats: Vec::new(),
            fake_neighbors: FakeNeighbors::default(),
        }
    }

    pub fn with_view(mut self, view: ViewContext) -> Self {
        self.view = view;
        self
    }

    /// Attach shape keys. Only plain meshes carry them.
    pub fn with_shape_keys(mut self, shape_keys: ShapeKeys) -> SculptResult<Self> {
        if self.geometry.kind() != BackendKind::Plain {
            return Err(SculptError::InvalidTopology(
                "shape keys require a plain mesh".to_string(),
            ));
        }
        let count = self.geometry.vertex_count();
        for key in &shape_keys.keys {
            check_len("shape_key", &key.positions, count)?;
        }
        if shape_keys.active >= shape_keys.keys.len() || shape_keys.reference >= shape_keys.keys.len() {
            return Err(SculptError::InvalidTopology("shape key index out of range".to_string()));
        }
        self.shape_keys = Some(shape_keys);
        Ok(self)
    }

    /// Attach inverse deform matrices for writing back through a deformer.
    pub fn with_deform_imats(mut self, imats: Vec<Mat3>) -> SculptResult<Self> {
        check_len("deform_imats", &imats, self.geometry.vertex_count())?;
        self.deform_imats = imats;
        Ok(self)
    }

    /// Switch to another representation. Handles, fake neighbors and data
    /// that only fits the old representation are dropped.
    pub fn set_geometry(&mut self, mut geometry: Geometry) {
        geometry.ensure_random_access();
        if geometry.kind() != BackendKind::Plain
            || geometry.vertex_count() != self.geometry.vertex_count()
        {
            self.shape_keys = None;
            self.deform_imats.clear();
        }
        self.geometry = geometry;
        self.tree = SpatialTree::build(&self.geometry, &self.tree_config);
        self.fake_neighbors.invalidate();
    }

    /// Rebuild index tables and the tree if the topology changed.
    pub fn ensure_tree(&mut self) {
        self.geometry.ensure_random_access();
        if !self.tree.is_valid_for(&self.geometry) {
            tracing::debug!("SessionState::ensure_tree: topology changed, rebuilding");
            self.tree = SpatialTree::build(&self.geometry, &self.tree_config);
            self.fake_neighbors.invalidate();
        }
    }

    /// Bounds of the whole mesh
    pub fn object_bounds(&self) -> Aabb {
        let bounds = self
            .tree
            .nodes()
            .iter()
            .fold(Aabb::empty(), |acc, node| acc.union(&node.bounds));
        if bounds.is_empty() {
            return Aabb::new(Vec3::ZERO, Vec3::ZERO);
        }
        bounds
    }

    /// Connected neighbors plus the fake neighbor, if enabled.
    pub fn neighbors(&self, vert: VertexHandle, include_duplicates: bool) -> Vec<VertexHandle> {
        let mut neighbors = self.geometry.neighbors(vert, include_duplicates);
        if let Some(fake) = self
            .geometry
            .vertex_index(vert)
            .and_then(|i| self.fake_neighbors.get(i))
        {
            let fake = self.geometry.vertex_handle(fake);
            if !neighbors.contains(&fake) {
                neighbors.push(fake);
            }
        }
        neighbors
    }

    /// Enable fake neighbors, building the table if `max_distance` changed.
    pub fn enable_fake_neighbors(&mut self, max_distance: f32) {
        self.fake_neighbors.enabled = true;
        if self.fake_neighbors.built_for == Some(max_distance) {
            return;
        }
        self.fake_neighbors.build(&self.geometry, &self.tree, max_distance);
    }

    pub fn disable_fake_neighbors(&mut self) {
        self.fake_neighbors.enabled = false;
    }

    pub fn free_fake_neighbors(&mut self) {
        self.fake_neighbors.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlainMesh;

    /// Two unit quads side by side with a gap between them.
    fn two_islands(gap: f32) -> Geometry {
        let mut positions = Vec::new();
        for offset in [0.0, 1.0 + gap] {
            positions.push(Vec3::new(offset, 0.0, 0.0));
            positions.push(Vec3::new(offset + 1.0, 0.0, 0.0));
            positions.push(Vec3::new(offset + 1.0, 1.0, 0.0));
            positions.push(Vec3::new(offset, 1.0, 0.0));
        }
        Geometry::Plain(PlainMesh::new(positions, &[vec![0, 1, 2, 3], vec![4, 5, 6, 7]]).unwrap())
    }

    #[test]
    fn test_fake_neighbors_bridge_islands() {
        let mut session = SessionState::new(two_islands(0.1), &SculptSettings::default());
        let v1 = session.geometry.vertex_handle(1);
        assert_eq!(session.neighbors(v1, false).len(), 2);

        session.enable_fake_neighbors(0.2);
        let neighbors = session.neighbors(v1, false);
        assert_eq!(neighbors.len(), 3);
        assert!(neighbors.contains(&session.geometry.vertex_handle(4)));
        // Links are symmetric
        assert_eq!(session.fake_neighbors.get(4), Some(1));

        session.disable_fake_neighbors();
        assert_eq!(session.neighbors(v1, false).len(), 2);
    }

    #[test]
    fn test_fake_neighbors_respect_distance() {
        let mut session = SessionState::new(two_islands(0.5), &SculptSettings::default());
        session.enable_fake_neighbors(0.2);
        assert!((0..8).all(|i| session.fake_neighbors.get(i).is_none()));
        assert!(session.fake_neighbors.is_built());
        session.free_fake_neighbors();
        assert!(!session.fake_neighbors.is_enabled());
        assert!(!session.fake_neighbors.is_built());
    }

    #[test]
    fn test_dependent_shape_keys() {
        let key = |name: &str, relative_to| ShapeKey {
            name: name.to_string(),
            positions: Vec::new(),
            relative_to,
        };
        let keys = ShapeKeys {
            keys: vec![key("Basis", 0), key("A", 0), key("B", 1), key("C", 0)],
            reference: 0,
            active: 1,
        };
        assert_eq!(keys.dependent_keys(), vec![2]);
        let from_basis = ShapeKeys { active: 0, ..keys };
        assert_eq!(from_basis.dependent_keys(), vec![1, 2, 3]);
    }

    #[test]
    fn test_shape_keys_need_matching_length() {
        let session = SessionState::new(two_islands(0.1), &SculptSettings::default());
        let keys = ShapeKeys {
            keys: vec![ShapeKey {
                name: "Basis".to_string(),
                positions: vec![Vec3::ZERO; 3],
                relative_to: 0,
            }],
            reference: 0,
            active: 0,
        };
        assert!(session.with_shape_keys(keys).is_err());
    }

    #[test]
    fn test_object_bounds() {
        let session = SessionState::new(two_islands(0.1), &SculptSettings::default());
        let bounds = session.object_bounds();
        assert_eq!(bounds.min, Vec3::ZERO);
        assert!((bounds.max - Vec3::new(2.1, 1.0, 0.0)).length() < 1e-6);
    }
}
