//! Dynamic-topology backend: a half-edge triangle mesh.
//!
//! Vertices, half-edges and faces live in flat arrays addressed by typed ids.
//! Per-vertex hide and mask flags are stored inline because there is no
//! separate attribute layer for this representation.

use std::collections::{HashMap, HashSet};

use glam::Vec3;

use crate::error::{SculptError, SculptResult};

/// Type-safe vertex identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub u32);

/// Type-safe half-edge identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HalfEdgeId(pub u32);

/// Type-safe face identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceId(pub u32);

/// A vertex in the half-edge mesh
#[derive(Debug, Clone)]
pub struct DynVertex {
    pub id: VertexId,
    pub position: Vec3,
    pub normal: Vec3,
    /// One outgoing half-edge from this vertex (arbitrary choice if multiple)
    pub outgoing_half_edge: Option<HalfEdgeId>,
    pub hidden: bool,
    pub mask: f32,
}

/// A half-edge in the mesh
#[derive(Debug, Clone)]
pub struct HalfEdge {
    pub id: HalfEdgeId,
    /// The vertex this half-edge originates from
    pub origin: VertexId,
    /// The opposite half-edge (None for boundary edges)
    pub twin: Option<HalfEdgeId>,
    /// The next half-edge around the face (counter-clockwise)
    pub next: HalfEdgeId,
    /// The previous half-edge around the face (counter-clockwise)
    pub prev: HalfEdgeId,
    pub face: Option<FaceId>,
}

/// A triangle of the mesh
#[derive(Debug, Clone)]
pub struct DynFace {
    pub id: FaceId,
    /// One half-edge on the boundary of this face
    pub half_edge: HalfEdgeId,
    /// Cached face normal
    pub normal: Vec3,
    pub hidden: bool,
}

/// Half-edge mesh used while dynamic topology is enabled.
#[derive(Debug, Clone, Default)]
pub struct DynamicMesh {
    vertices: Vec<DynVertex>,
    half_edges: Vec<HalfEdge>,
    faces: Vec<DynFace>,
    /// Map from (origin, destination) vertex pair to half-edge
    edge_map: HashMap<(VertexId, VertexId), HalfEdgeId>,
    topology_version: u64,
}

impl DynamicMesh {
    /// Build a half-edge mesh from triangle soup.
    ///
    /// Positionally identical vertices are welded so the ring walks close
    /// around seams, and triangles that collapse after welding are dropped.
    pub fn from_triangles(positions: &[Vec3], triangles: &[[u32; 3]]) -> SculptResult<Self> {
        let quantize = |p: Vec3| -> [i64; 3] {
            [
                (p.x * 1_000_000.0) as i64,
                (p.y * 1_000_000.0) as i64,
                (p.z * 1_000_000.0) as i64,
            ]
        };

        let mut position_to_canonical: HashMap<[i64; 3], usize> = HashMap::new();
        let canonical_map: Vec<usize> = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| *position_to_canonical.entry(quantize(p)).or_insert(i))
            .collect();

        let welded = canonical_map.iter().enumerate().filter(|(i, c)| **c != *i).count();
        if welded > 0 {
            tracing::debug!(
                "DynamicMesh::from_triangles: welded {} duplicate vertices ({} unique of {})",
                welded,
                position_to_canonical.len(),
                positions.len()
            );
        }

        let mut vertices: Vec<DynVertex> = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| DynVertex {
                id: VertexId(i as u32),
                position,
                normal: Vec3::ZERO,
                outgoing_half_edge: None,
                hidden: false,
                mask: 0.0,
            })
            .collect();

        let mut half_edges: Vec<HalfEdge> = Vec::with_capacity(triangles.len() * 3);
        let mut faces: Vec<DynFace> = Vec::with_capacity(triangles.len());
        let mut edge_map: HashMap<(VertexId, VertexId), HalfEdgeId> = HashMap::new();

        for tri in triangles {
            if tri.iter().any(|&i| i as usize >= positions.len()) {
                return Err(SculptError::InvalidTopology(format!(
                    "triangle {:?} references a vertex out of range ({} vertices)",
                    tri,
                    positions.len()
                )));
            }
            let [i0, i1, i2] = tri.map(|i| canonical_map[i as usize]);
            if i0 == i1 || i1 == i2 || i0 == i2 {
                continue;
            }
            let v = [i0, i1, i2].map(|i| VertexId(i as u32));

            let face_id = FaceId(faces.len() as u32);
            let base = half_edges.len() as u32;
            let ids = [HalfEdgeId(base), HalfEdgeId(base + 1), HalfEdgeId(base + 2)];

            for k in 0..3 {
                let (origin, dest) = (v[k], v[(k + 1) % 3]);
                if edge_map.contains_key(&(origin, dest)) {
                    return Err(SculptError::InvalidTopology(format!(
                        "half-edge {:?} -> {:?} used twice",
                        origin, dest
                    )));
                }
                half_edges.push(HalfEdge {
                    id: ids[k],
                    origin,
                    twin: None,
                    next: ids[(k + 1) % 3],
                    prev: ids[(k + 2) % 3],
                    face: Some(face_id),
                });
                let vertex = &mut vertices[origin.0 as usize];
                if vertex.outgoing_half_edge.is_none() {
                    vertex.outgoing_half_edge = Some(ids[k]);
                }
                if let Some(&twin_id) = edge_map.get(&(dest, origin)) {
                    half_edges[ids[k].0 as usize].twin = Some(twin_id);
                    half_edges[twin_id.0 as usize].twin = Some(ids[k]);
                }
                edge_map.insert((origin, dest), ids[k]);
            }

            let p0 = vertices[i0].position;
            let normal = (vertices[i1].position - p0)
                .cross(vertices[i2].position - p0)
                .normalize_or_zero();
            faces.push(DynFace {
                id: face_id,
                half_edge: ids[0],
                normal,
                hidden: false,
            });
        }

        let mut mesh = Self {
            vertices,
            half_edges,
            faces,
            edge_map,
            topology_version: 1,
        };
        let all: Vec<VertexId> = mesh.vertices.iter().map(|v| v.id).collect();
        mesh.update_normals(&all);
        Ok(mesh)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn vertex(&self, id: VertexId) -> Option<&DynVertex> {
        self.vertices.get(id.0 as usize)
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut DynVertex> {
        self.vertices.get_mut(id.0 as usize)
    }

    pub fn half_edge(&self, id: HalfEdgeId) -> Option<&HalfEdge> {
        self.half_edges.get(id.0 as usize)
    }

    pub fn face(&self, id: FaceId) -> Option<&DynFace> {
        self.faces.get(id.0 as usize)
    }

    pub fn vertices(&self) -> &[DynVertex] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    /// Find a half-edge by its origin and destination vertices
    pub fn find_half_edge(&self, from: VertexId, to: VertexId) -> Option<HalfEdgeId> {
        self.edge_map.get(&(from, to)).copied()
    }

    pub fn set_vertex_hidden(&mut self, id: VertexId, hidden: bool) {
        if let Some(v) = self.vertex_mut(id) {
            v.hidden = hidden;
        }
    }

    pub fn set_face_hidden(&mut self, id: FaceId, hidden: bool) {
        if let Some(f) = self.faces.get_mut(id.0 as usize) {
            f.hidden = hidden;
        }
    }

    // ========================================================================
    // Topology Queries
    // ========================================================================

    /// All faces around a vertex.
    ///
    /// Walks clockwise first; when the walk hits a boundary it restarts from
    /// the first outgoing half-edge and walks the other way so open fans are
    /// covered completely.
    pub fn vertex_faces(&self, vertex_id: VertexId) -> Vec<FaceId> {
        let mut faces = Vec::new();
        let Some(start) = self.vertex(vertex_id).and_then(|v| v.outgoing_half_edge) else {
            return faces;
        };

        let mut visited = HashSet::new();
        let mut current = start;
        let mut closed = false;
        while visited.insert(current) {
            let Some(he) = self.half_edge(current) else {
                break;
            };
            if let Some(face) = he.face {
                faces.push(face);
            }
            match self.half_edge(he.prev).and_then(|prev| prev.twin) {
                Some(next) if next == start => {
                    closed = true;
                    break;
                }
                Some(next) => current = next,
                None => break,
            }
        }

        if !closed {
            // Counter-clockwise: twin of the outgoing edge, then its next.
            let mut current = start;
            while let Some(twin) = self.half_edge(current).and_then(|he| he.twin) {
                let Some(next) = self.half_edge(twin).map(|he| he.next) else {
                    break;
                };
                if !visited.insert(next) {
                    break;
                }
                if let Some(face) = self.half_edge(next).and_then(|he| he.face) {
                    faces.push(face);
                }
                current = next;
            }
        }

        faces
    }

    /// Vertices of a face in winding order
    pub fn face_vertices(&self, face_id: FaceId) -> Vec<VertexId> {
        let mut vertices = Vec::with_capacity(3);
        let Some(face) = self.face(face_id) else {
            return vertices;
        };
        let start = face.half_edge;
        let mut current = start;
        loop {
            let Some(he) = self.half_edge(current) else {
                break;
            };
            vertices.push(he.origin);
            current = he.next;
            if current == start || vertices.len() > self.half_edges.len() {
                break;
            }
        }
        vertices
    }

    /// The previous and next vertex of every loop around the vertex,
    /// deduplicated.
    pub fn loop_neighbors(&self, vertex_id: VertexId) -> Vec<VertexId> {
        let mut neighbors = Vec::new();
        for face in self.vertex_faces(vertex_id) {
            let verts = self.face_vertices(face);
            let Some(pos) = verts.iter().position(|&v| v == vertex_id) else {
                continue;
            };
            let len = verts.len();
            for v in [verts[(pos + len - 1) % len], verts[(pos + 1) % len]] {
                if !neighbors.contains(&v) {
                    neighbors.push(v);
                }
            }
        }
        neighbors
    }

    /// Check if a vertex touches a boundary edge (or is isolated)
    pub fn is_boundary_vertex(&self, vertex_id: VertexId) -> bool {
        let Some(vertex) = self.vertex(vertex_id) else {
            return false;
        };
        if vertex.outgoing_half_edge.is_none() {
            return true;
        }
        self.vertex_faces(vertex_id).iter().any(|&face| {
            let Some(f) = self.face(face) else {
                return false;
            };
            let start = f.half_edge;
            let mut current = start;
            loop {
                let Some(he) = self.half_edge(current) else {
                    return false;
                };
                let dest = self.half_edge(he.next).map(|n| n.origin);
                let touches = he.origin == vertex_id || dest == Some(vertex_id);
                if touches && he.twin.is_none() {
                    return true;
                }
                current = he.next;
                if current == start {
                    return false;
                }
            }
        })
    }

    /// Whether every face around the vertex is visible
    pub fn all_faces_visible(&self, vertex_id: VertexId) -> bool {
        self.vertex_faces(vertex_id)
            .iter()
            .all(|&f| self.face(f).is_some_and(|face| !face.hidden))
    }

    // ========================================================================
    // Normals
    // ========================================================================

    /// Recompute face normals around the given vertices, then the vertex
    /// normals as the average of their face normals.
    pub fn update_normals(&mut self, vertices: &[VertexId]) {
        let mut dirty_faces: HashSet<FaceId> = HashSet::new();
        for &v in vertices {
            dirty_faces.extend(self.vertex_faces(v));
        }

        for face_id in dirty_faces {
            let verts = self.face_vertices(face_id);
            if verts.len() < 3 {
                continue;
            }
            let p: Vec<Vec3> = verts
                .iter()
                .filter_map(|&v| self.vertex(v).map(|vx| vx.position))
                .collect();
            if p.len() < 3 {
                continue;
            }
            let normal = (p[1] - p[0]).cross(p[2] - p[0]).normalize_or_zero();
            if let Some(face) = self.faces.get_mut(face_id.0 as usize) {
                face.normal = normal;
            }
        }

        for &v in vertices {
            let sum: Vec3 = self
                .vertex_faces(v)
                .iter()
                .filter_map(|&f| self.face(f).map(|face| face.normal))
                .sum();
            if let Some(vertex) = self.vertex_mut(v) {
                vertex.normal = sum.normalize_or_zero();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two triangles sharing the diagonal of a unit square.
    fn quad() -> DynamicMesh {
        let positions = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        DynamicMesh::from_triangles(&positions, &[[0, 1, 2], [0, 2, 3]]).unwrap()
    }

    #[test]
    fn test_from_triangles_links_twins() {
        let mesh = quad();
        assert_eq!(mesh.face_count(), 2);
        let he = mesh.find_half_edge(VertexId(0), VertexId(2)).unwrap();
        let twin = mesh.find_half_edge(VertexId(2), VertexId(0)).unwrap();
        assert_eq!(mesh.half_edge(he).unwrap().twin, Some(twin));
    }

    #[test]
    fn test_vertex_faces_on_open_fan() {
        let mesh = quad();
        let mut faces = mesh.vertex_faces(VertexId(0));
        faces.sort_by_key(|f| f.0);
        assert_eq!(faces, vec![FaceId(0), FaceId(1)]);
        assert_eq!(mesh.vertex_faces(VertexId(1)), vec![FaceId(0)]);
    }

    #[test]
    fn test_loop_neighbors() {
        let mesh = quad();
        let mut n = mesh.loop_neighbors(VertexId(0));
        n.sort();
        assert_eq!(n, vec![VertexId(1), VertexId(2), VertexId(3)]);
    }

    #[test]
    fn test_welding_merges_duplicates() {
        let positions = [
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
            Vec3::X, // duplicate of 1
            Vec3::new(1.0, 1.0, 0.0),
        ];
        let mesh = DynamicMesh::from_triangles(&positions, &[[0, 1, 2], [3, 4, 2]]).unwrap();
        assert!(mesh.find_half_edge(VertexId(1), VertexId(4)).is_some());
    }

    #[test]
    fn test_out_of_range_index_is_error() {
        let result = DynamicMesh::from_triangles(&[Vec3::ZERO], &[[0, 1, 2]]);
        assert!(matches!(result, Err(SculptError::InvalidTopology(_))));
    }

    #[test]
    fn test_boundary_and_normals() {
        let mesh = quad();
        assert!(mesh.is_boundary_vertex(VertexId(0)));
        let n = mesh.vertex(VertexId(2)).unwrap().normal;
        assert!((n - Vec3::Z).length() < 1e-5);
    }
}
