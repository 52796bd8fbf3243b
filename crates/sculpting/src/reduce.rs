//! Parallel reductions over gathered nodes.
//!
//! Each reduction maps every node to a partial result and joins the partials
//! with an associative combine, so the answer does not depend on how rayon
//! splits the node list.

use glam::Vec3;
use rayon::prelude::*;

use crate::brush::Brush;
use crate::brush_test::BrushTest;
use crate::cache::{Cursor, StrokeCache};
use crate::geometry::{Geometry, VertexHandle};
use crate::spatial::{Node, SpatialGather, node_in_sphere};
use crate::types::BrushTool;
use crate::undo::{SnapshotSource, UndoKind};

/// Map every node and fold the results with `join`.
///
/// Runs on the rayon pool when `parallel` is set.
pub(crate) fn map_reduce<T, M, J>(nodes: &[&Node], parallel: bool, identity: T, map: M, join: J) -> T
where
    T: Clone + Send + Sync,
    M: Fn(&Node) -> T + Send + Sync,
    J: Fn(T, T) -> T + Send + Sync,
{
    if parallel {
        nodes
            .par_iter()
            .map(|node| map(node))
            .reduce(|| identity.clone(), &join)
    } else {
        nodes.iter().map(|node| map(node)).fold(identity.clone(), &join)
    }
}

/// Partial sums of the area normal and center.
///
/// Index 0 collects vertices facing the viewer, index 1 the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AreaData {
    pub area_cos: [Vec3; 2],
    pub count_co: [u32; 2],
    pub area_nos: [Vec3; 2],
    pub count_no: [u32; 2],
}

impl AreaData {
    pub fn join(a: AreaData, b: AreaData) -> AreaData {
        AreaData {
            area_cos: [a.area_cos[0] + b.area_cos[0], a.area_cos[1] + b.area_cos[1]],
            count_co: [a.count_co[0] + b.count_co[0], a.count_co[1] + b.count_co[1]],
            area_nos: [a.area_nos[0] + b.area_nos[0], a.area_nos[1] + b.area_nos[1]],
            count_no: [a.count_no[0] + b.count_no[0], a.count_no[1] + b.count_no[1]],
        }
    }

    /// Average of the first non-empty bucket.
    pub fn center(&self) -> Option<Vec3> {
        (0..2)
            .find(|&i| self.count_co[i] != 0)
            .map(|i| self.area_cos[i] / self.count_co[i] as f32)
    }

    /// Normalized sum of the first bucket with a non-zero normal.
    pub fn normal(&self) -> Option<Vec3> {
        (0..2)
            .filter(|&i| self.count_no[i] != 0)
            .find_map(|i| self.area_nos[i].try_normalize())
    }
}

/// Smoothstep weight toward the brush center.
pub fn area_weight(distance_sq: f32, radius: f32) -> f32 {
    if radius <= 0.0 {
        return 1.0;
    }
    let p = 1.0 - distance_sq.sqrt() / radius;
    (3.0 * p * p - 2.0 * p * p * p).clamp(0.0, 1.0)
}

/// Pull `co` toward the test location, more strongly near the center.
pub fn area_center_weighted(test_location: Vec3, distance_sq: f32, radius: f32, co: Vec3) -> Vec3 {
    let weight = area_weight(distance_sq, radius);
    test_location + (co - test_location) * (1.0 - weight)
}

/// Inputs of the area normal and center reductions.
pub struct AreaSampler<'a> {
    pub geometry: &'a Geometry,
    pub brush: &'a Brush,
    /// The active stroke, `None` when sampling under the hover cursor
    pub cache: Option<&'a StrokeCache>,
    pub cursor: &'a Cursor,
    pub cursor_view_normal: Vec3,
    /// Pre-stroke data, read when the stroke does not accumulate
    pub original: Option<&'a dyn SnapshotSource>,
    pub parallel: bool,
}

impl<'a> AreaSampler<'a> {
    pub fn new(geometry: &'a Geometry, brush: &'a Brush, cache: &'a StrokeCache) -> Self {
        Self {
            geometry,
            brush,
            cache: Some(cache),
            cursor: &DEFAULT_CURSOR,
            cursor_view_normal: cache.view_normal,
            original: None,
            parallel: false,
        }
    }

    pub fn with_original(mut self, original: Option<&'a dyn SnapshotSource>) -> Self {
        self.original = original;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn base_radius(&self) -> f32 {
        self.cache.map(|c| c.radius).unwrap_or(self.cursor.radius)
    }

    fn normal_radius(&self) -> f32 {
        self.base_radius() * self.brush.normal_radius_factor
    }

    fn position_radius(&self) -> f32 {
        let mut radius = self.base_radius();
        if matches!(self.brush.tool, BrushTool::Scrape | BrushTool::Fill)
            && self.brush.area_radius_factor > 0.0
        {
            radius *= self.brush.area_radius_factor;
            if let Some(cache) = self.cache
                && self.brush.area_radius_pressure
            {
                radius *= cache.pressure;
            }
        } else {
            radius *= self.brush.normal_radius_factor;
        }
        radius
    }

    fn test(&self, radius: f32) -> BrushTest {
        let mut test = BrushTest::init(
            self.cache,
            self.cursor,
            self.cursor_view_normal,
            self.brush.falloff_shape,
        );
        test.radius = radius;
        test.radius_squared = radius * radius;
        test
    }

    fn view_normal(&self) -> Vec3 {
        self.cache.map(|c| c.view_normal).unwrap_or(self.cursor_view_normal)
    }

    fn accumulate_node(&self, node: &Node, use_nos: bool, use_cos: bool) -> AreaData {
        let normal_test = self.test(self.normal_radius());
        let area_test = self.test(self.position_radius());
        let view_normal = self.view_normal();
        let mut data = AreaData::default();

        let mut add = |co: Vec3, no: Vec3| {
            let normal_hit = normal_test.test_sq(co);
            let area_hit = area_test.test_sq(co);
            if normal_hit.is_none() && area_hit.is_none() {
                return;
            }
            let flip = usize::from(view_normal.dot(no) <= 0.0);
            if use_cos && let Some(dist) = area_hit {
                data.area_cos[flip] += area_center_weighted(area_test.location, dist, area_test.radius, co);
                data.count_co[flip] += 1;
            }
            if use_nos && let Some(dist) = normal_hit {
                data.area_nos[flip] += no * area_weight(dist, normal_test.radius);
                data.count_no[flip] += 1;
            }
        };

        let use_original = self.cache.is_some_and(|c| !c.accum);
        let snapshot = self
            .original
            .filter(|_| use_original)
            .and_then(|source| source.snapshot(node.id, UndoKind::Position));

        match snapshot {
            Some(snapshot) => {
                for ((&vert, &co), &no) in snapshot.verts.iter().zip(&snapshot.positions).zip(&snapshot.normals) {
                    if !self.geometry.is_hidden(vert) {
                        add(co, no);
                    }
                }
            }
            None => {
                for &vert in &node.verts {
                    if !self.geometry.is_hidden(vert) {
                        add(self.geometry.position(vert), self.geometry.normal(vert));
                    }
                }
            }
        }
        data
    }

    fn reduce(&self, nodes: &[&Node], use_nos: bool, use_cos: bool) -> AreaData {
        map_reduce(
            nodes,
            self.parallel,
            AreaData::default(),
            |node| self.accumulate_node(node, use_nos, use_cos),
            AreaData::join,
        )
    }

    fn fallback_center(&self) -> Vec3 {
        self.cache.map(|c| c.location).unwrap_or(Vec3::ZERO)
    }

    /// Weighted center of the vertices under the brush.
    pub fn area_center(&self, nodes: &[&Node]) -> Vec3 {
        self.reduce(nodes, false, true)
            .center()
            .unwrap_or_else(|| self.fallback_center())
    }

    /// Weighted average normal under the brush, `None` when nothing
    /// contributes.
    pub fn area_normal(&self, nodes: &[&Node]) -> Option<Vec3> {
        self.reduce(nodes, true, false).normal()
    }

    /// Both values from one pass. The normal is zero when nothing
    /// contributes.
    pub fn area_normal_and_center(&self, nodes: &[&Node]) -> (Vec3, Vec3) {
        let data = self.reduce(nodes, true, true);
        let center = data.center().unwrap_or_else(|| self.fallback_center());
        (data.normal().unwrap_or(Vec3::ZERO), center)
    }
}

static DEFAULT_CURSOR: Cursor = Cursor {
    location: Vec3::ZERO,
    normal: Vec3::Z,
    radius: 0.0,
};

/// Closest visible vertex to `location` among the nodes within
/// `max_distance`.
///
/// Only nodes are culled by the distance, so the result may lie slightly
/// beyond it.
pub fn nearest_vertex(
    geometry: &Geometry,
    tree: &dyn SpatialGather,
    location: Vec3,
    max_distance: f32,
    use_original: bool,
    parallel: bool,
) -> Option<VertexHandle> {
    let max_distance_sq = max_distance * max_distance;
    let ids = tree.search(use_original, &|bounds| node_in_sphere(bounds, location, max_distance_sq));
    let nodes: Vec<&Node> = ids.iter().filter_map(|&id| tree.node(id)).collect();
    if nodes.is_empty() {
        return None;
    }

    let nearest = map_reduce(
        &nodes,
        parallel,
        (None, f32::MAX),
        |node| {
            let mut best: (Option<VertexHandle>, f32) = (None, f32::MAX);
            for &vert in &node.verts {
                if geometry.is_hidden(vert) {
                    continue;
                }
                let distance_sq = geometry.position(vert).distance_squared(location);
                if distance_sq < best.1 {
                    best = (Some(vert), distance_sq);
                }
            }
            best
        },
        |a, b| if a.1 <= b.1 { a } else { b },
    );
    nearest.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlainMesh;
    use crate::spatial::{SpatialTree, TreeConfig};

    fn plane(n: u32, spacing: f32) -> Geometry {
        let mut positions = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let half = (n - 1) as f32 * spacing * 0.5;
                positions.push(Vec3::new(x as f32 * spacing - half, y as f32 * spacing - half, 0.0));
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

    fn cache_at(location: Vec3, radius: f32) -> StrokeCache {
        let mut cache = StrokeCache::default();
        cache.location = location;
        cache.radius = radius;
        cache.radius_squared = radius * radius;
        cache.view_normal = Vec3::Z;
        cache
    }

    #[test]
    fn test_area_weight_endpoints() {
        assert_eq!(area_weight(0.0, 1.0), 1.0);
        assert_eq!(area_weight(1.0, 1.0), 0.0);
        assert!((area_weight(0.25, 1.0) - 0.5).abs() < 1e-6);
        assert_eq!(area_weight(0.0, 0.0), 1.0);
    }

    #[test]
    fn test_join_is_associative() {
        let a = AreaData {
            area_cos: [Vec3::X, Vec3::ZERO],
            count_co: [1, 0],
            ..Default::default()
        };
        let b = AreaData {
            area_nos: [Vec3::Z, Vec3::ZERO],
            count_no: [1, 0],
            ..Default::default()
        };
        let c = AreaData {
            area_cos: [Vec3::Y, Vec3::Z],
            count_co: [1, 1],
            ..Default::default()
        };
        assert_eq!(
            AreaData::join(AreaData::join(a, b), c),
            AreaData::join(a, AreaData::join(b, c))
        );
    }

    #[test]
    fn test_flat_plane_normal_and_center() {
        let geometry = plane(9, 0.25);
        let tree = SpatialTree::build(&geometry, &TreeConfig::default());
        let nodes: Vec<&Node> = tree.nodes().iter().collect();
        let mut brush = Brush::flatten();
        brush.normal_radius_factor = 1.0;
        let cache = cache_at(Vec3::ZERO, 0.6);

        let sampler = AreaSampler::new(&geometry, &brush, &cache);
        let (normal, center) = sampler.area_normal_and_center(&nodes);
        assert!((normal - Vec3::Z).length() < 1e-5);
        assert!(center.length() < 1e-5);

        let parallel = AreaSampler::new(&geometry, &brush, &cache).with_parallel(true);
        let (normal_par, center_par) = parallel.area_normal_and_center(&nodes);
        assert!((normal_par - normal).length() < 1e-5);
        assert!((center_par - center).length() < 1e-5);
    }

    #[test]
    fn test_empty_footprint_falls_back_to_location() {
        let geometry = plane(3, 1.0);
        let tree = SpatialTree::build(&geometry, &TreeConfig::default());
        let nodes: Vec<&Node> = tree.nodes().iter().collect();
        let brush = Brush::flatten();
        let cache = cache_at(Vec3::new(10.0, 10.0, 0.0), 0.5);
        let sampler = AreaSampler::new(&geometry, &brush, &cache);
        assert_eq!(sampler.area_center(&nodes), Vec3::new(10.0, 10.0, 0.0));
        assert_eq!(sampler.area_normal(&nodes), None);
    }

    #[test]
    fn test_nearest_vertex() {
        let geometry = plane(3, 1.0);
        let tree = SpatialTree::build(&geometry, &TreeConfig::default());
        let nearest = nearest_vertex(&geometry, &tree, Vec3::new(0.9, 0.8, 0.1), 2.0, false, false).unwrap();
        assert_eq!(geometry.position(nearest), Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(
            nearest_vertex(&geometry, &tree, Vec3::new(0.9, 0.8, 0.1), 2.0, false, true),
            Some(nearest)
        );
        assert!(nearest_vertex(&geometry, &tree, Vec3::splat(50.0), 1.0, false, false).is_none());
    }
}
