//! Spatial partitioning of mesh vertices into leaf nodes.
//!
//! The tree is built by octant subdivision and flattened into a list of
//! leaves. Every vertex belongs to exactly one leaf. Brushes consume it through
//! the [`SpatialGather`] trait, which only hands out node ids whose bounds
//! pass a predicate.

use glam::Vec3;

use crate::geometry::{Geometry, VertexHandle};

/// Subdivision limits for tree construction.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Maximum depth of the subdivision.
    pub max_depth: u32,
    /// Maximum vertices per leaf before splitting.
    pub leaf_limit: usize,
    /// Minimum node size (prevents infinite subdivision).
    pub min_node_size: f32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            leaf_limit: chisel_config::DEFAULT_LEAF_LIMIT,
            min_node_size: 0.0001,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn include_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Closest point of the box to `point`
    pub fn nearest_point(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }

    /// Octant index (0-7) of a point relative to the box center.
    fn octant_for_point(&self, point: Vec3) -> usize {
        let center = self.center();
        let mut index = 0;
        if point.x >= center.x {
            index |= 1;
        }
        if point.y >= center.y {
            index |= 2;
        }
        if point.z >= center.z {
            index |= 4;
        }
        index
    }

    fn octant_bounds(&self, octant: usize) -> Aabb {
        let center = self.center();
        let pick = |bit: usize, lo: f32, mid: f32, hi: f32| {
            if octant & bit != 0 { (mid, hi) } else { (lo, mid) }
        };
        let (x0, x1) = pick(1, self.min.x, center.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, center.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, center.z, self.max.z);
        Aabb::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }
}

/// Index of a leaf node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// A leaf bucket of vertices.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Current bounds
    pub bounds: Aabb,
    /// Bounds captured at stroke start
    pub original_bounds: Aabb,
    pub verts: Vec<VertexHandle>,
    pub bounds_stale: bool,
    pub fully_hidden: bool,
    pub fully_masked: bool,
}

/// Search interface over the spatial structure.
pub trait SpatialGather {
    /// Ids of nodes whose bounds pass `predicate`. With `original` the
    /// predicate sees the bounds captured at stroke start.
    fn search(&self, original: bool, predicate: &dyn Fn(&Aabb) -> bool) -> Vec<NodeId>;

    fn node(&self, id: NodeId) -> Option<&Node>;
}

/// True when the box comes closer than `radius_sq` to `center`.
pub fn node_in_sphere(bounds: &Aabb, center: Vec3, radius_sq: f32) -> bool {
    bounds.nearest_point(center).distance_squared(center) < radius_sq
}

/// Tube falloff keeps every node; the per-vertex test does the culling.
pub fn node_in_cylinder(_bounds: &Aabb, _center: Vec3, _radius_sq: f32) -> bool {
    true
}

/// Flattened octant tree over the vertices of a [`Geometry`].
#[derive(Debug, Clone, Default)]
pub struct SpatialTree {
    nodes: Vec<Node>,
    /// Dense vertex index to owning leaf
    vert_to_node: Vec<u32>,
    topology_version: u64,
}

impl SpatialTree {
    pub fn build(geometry: &Geometry, config: &TreeConfig) -> Self {
        let verts: Vec<(VertexHandle, Vec3)> = geometry
            .all_vertices()
            .into_iter()
            .map(|v| (v, geometry.position(v)))
            .collect();

        let mut bounds = Aabb::empty();
        for &(_, p) in &verts {
            bounds.include_point(p);
        }
        if bounds.is_empty() {
            bounds = Aabb::new(Vec3::ZERO, Vec3::ZERO);
        }
        // Expand bounds slightly to handle edge cases
        let padding = bounds.size() * 0.01 + Vec3::splat(0.001);
        let root = Aabb::new(bounds.min - padding, bounds.max + padding);

        let mut leaves: Vec<Vec<(VertexHandle, Vec3)>> = Vec::new();
        Self::split(root, verts, 0, config, &mut leaves);

        let mut tree = Self {
            nodes: Vec::with_capacity(leaves.len()),
            vert_to_node: vec![0; geometry.vertex_count()],
            topology_version: geometry.topology_version(),
        };
        for items in leaves {
            let id = NodeId(tree.nodes.len() as u32);
            let mut node_bounds = Aabb::empty();
            for &(v, p) in &items {
                node_bounds.include_point(p);
                if let Some(slot) = geometry
                    .vertex_index(v)
                    .and_then(|i| tree.vert_to_node.get_mut(i))
                {
                    *slot = id.0;
                }
            }
            tree.nodes.push(Node {
                id,
                bounds: node_bounds,
                original_bounds: node_bounds,
                verts: items.into_iter().map(|(v, _)| v).collect(),
                bounds_stale: false,
                fully_hidden: false,
                fully_masked: false,
            });
        }
        tree.update_visibility_flags(geometry);

        tracing::debug!(
            "SpatialTree::build: {} verts in {} leaves",
            geometry.vertex_count(),
            tree.nodes.len()
        );
        tree
    }

    fn split(
        bounds: Aabb,
        items: Vec<(VertexHandle, Vec3)>,
        depth: u32,
        config: &TreeConfig,
        leaves: &mut Vec<Vec<(VertexHandle, Vec3)>>,
    ) {
        if items.is_empty() {
            return;
        }
        if items.len() <= config.leaf_limit
            || depth >= config.max_depth
            || bounds.size().max_element() <= config.min_node_size * 2.0
        {
            leaves.push(items);
            return;
        }
        let mut octants: [Vec<(VertexHandle, Vec3)>; 8] = Default::default();
        for item in items {
            octants[bounds.octant_for_point(item.1)].push(item);
        }
        for (octant, children) in octants.into_iter().enumerate() {
            Self::split(bounds.octant_bounds(octant), children, depth + 1, config, leaves);
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree was built for the current topology
    pub fn is_valid_for(&self, geometry: &Geometry) -> bool {
        self.topology_version == geometry.topology_version()
            && self.vert_to_node.len() == geometry.vertex_count()
    }

    /// Leaf owning a dense vertex index
    pub fn node_of(&self, vert_index: usize) -> Option<NodeId> {
        self.vert_to_node.get(vert_index).map(|&n| NodeId(n))
    }

    pub fn mark_stale(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id.0 as usize) {
            node.bounds_stale = true;
        }
    }

    pub fn stale_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.bounds_stale).count()
    }

    /// Recompute the bounds of stale nodes from current positions.
    pub fn update_bounds(&mut self, geometry: &Geometry) {
        for node in self.nodes.iter_mut().filter(|n| n.bounds_stale) {
            let mut bounds = Aabb::empty();
            for &v in &node.verts {
                bounds.include_point(geometry.position(v));
            }
            node.bounds = bounds;
            node.bounds_stale = false;
        }
    }

    /// Capture current bounds as the pre-stroke bounds.
    pub fn store_original_bounds(&mut self) {
        for node in &mut self.nodes {
            node.original_bounds = node.bounds;
        }
    }

    pub fn update_visibility_flags(&mut self, geometry: &Geometry) {
        for node in &mut self.nodes {
            node.fully_hidden = node.verts.iter().all(|&v| geometry.is_hidden(v));
            node.fully_masked = node.verts.iter().all(|&v| geometry.mask(v) >= 1.0);
        }
    }
}

impl SpatialGather for SpatialTree {
    fn search(&self, original: bool, predicate: &dyn Fn(&Aabb) -> bool) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| {
                let bounds = if original { &node.original_bounds } else { &node.bounds };
                predicate(bounds)
            })
            .map(|node| node.id)
            .collect()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlainMesh;

    fn grid_plane(n: u32) -> Geometry {
        let mut positions = Vec::new();
        for y in 0..n {
            for x in 0..n {
                positions.push(Vec3::new(x as f32, y as f32, 0.0));
            }
        }
        let mut polys = Vec::new();
        for y in 0..n - 1 {
            for x in 0..n - 1 {
                let i = y * n + x;
                polys.push(vec![i, i + 1, i + n + 1, i + n]);
            }
        }
        Geometry::Plain(PlainMesh::new(positions, &polys).unwrap())
    }

    #[test]
    fn test_every_vertex_in_exactly_one_leaf() {
        let geometry = grid_plane(10);
        let config = TreeConfig {
            leaf_limit: 8,
            ..Default::default()
        };
        let tree = SpatialTree::build(&geometry, &config);
        assert!(tree.node_count() > 1);
        let total: usize = tree.nodes().iter().map(|n| n.verts.len()).sum();
        assert_eq!(total, 100);
        for node in tree.nodes() {
            assert!(node.verts.len() <= 8);
            for &v in &node.verts {
                let index = geometry.vertex_index(v).unwrap();
                assert_eq!(tree.node_of(index), Some(node.id));
            }
        }
    }

    #[test]
    fn test_sphere_search() {
        let geometry = grid_plane(10);
        let config = TreeConfig {
            leaf_limit: 8,
            ..Default::default()
        };
        let tree = SpatialTree::build(&geometry, &config);
        let center = Vec3::new(0.0, 0.0, 0.0);
        let hits = tree.search(false, &|b| node_in_sphere(b, center, 1.0));
        assert!(!hits.is_empty());
        assert!(hits.len() < tree.node_count());
        let all = tree.search(false, &|b| node_in_cylinder(b, center, 1.0));
        assert_eq!(all.len(), tree.node_count());
    }

    #[test]
    fn test_node_in_sphere_is_strict() {
        let bounds = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(!node_in_sphere(&bounds, Vec3::ZERO, 1.0));
        assert!(node_in_sphere(&bounds, Vec3::ZERO, 1.01));
    }

    #[test]
    fn test_stale_bounds_update() {
        let mut geometry = grid_plane(3);
        let mut tree = SpatialTree::build(&geometry, &TreeConfig::default());
        let v = geometry.vertex_handle(4);
        geometry.set_base_position(v, Vec3::new(1.0, 1.0, 5.0));
        tree.mark_stale(NodeId(0));
        assert_eq!(tree.stale_count(), 1);
        tree.update_bounds(&geometry);
        assert_eq!(tree.stale_count(), 0);
        assert_eq!(tree.nodes()[0].bounds.max.z, 5.0);
        // Original bounds only move when stored explicitly
        assert_eq!(tree.nodes()[0].original_bounds.max.z, 0.0);
        tree.store_original_bounds();
        assert_eq!(tree.nodes()[0].original_bounds.max.z, 5.0);
    }

    #[test]
    fn test_visibility_flags() {
        let mut geometry = grid_plane(3);
        for i in 0..9 {
            let v = geometry.vertex_handle(i);
            geometry.set_mask(v, 1.0);
        }
        let tree = SpatialTree::build(&geometry, &TreeConfig::default());
        assert!(tree.nodes()[0].fully_masked);
        assert!(!tree.nodes()[0].fully_hidden);
    }
}
