//! Plain indexed polygon mesh backend.

use std::collections::HashMap;

use glam::{Vec3, Vec4};

use super::FACE_SET_NONE;
use crate::error::{check_len, SculptError, SculptResult};

/// Vertex to face map plus base-mesh boundary flags.
///
/// Stamped with the topology version it was built from so stale tables are
/// detected after a representation change.
#[derive(Debug, Clone, Default)]
struct VertToFace {
    version: u64,
    offsets: Vec<u32>,
    faces: Vec<u32>,
    boundary: Vec<bool>,
}

impl VertToFace {
    fn faces_of(&self, vert: usize) -> &[u32] {
        match (self.offsets.get(vert), self.offsets.get(vert + 1)) {
            (Some(&start), Some(&end)) => &self.faces[start as usize..end as usize],
            _ => &[],
        }
    }
}

/// Indexed polygon mesh with optional per-element attributes.
#[derive(Debug, Clone, Default)]
pub struct PlainMesh {
    positions: Vec<Vec3>,
    /// Evaluated positions when a deform modifier is active
    deformed: Option<Vec<Vec3>>,
    normals: Vec<Vec3>,
    /// Face `f` owns corners `face_offsets[f]..face_offsets[f + 1]`
    face_offsets: Vec<u32>,
    corner_verts: Vec<u32>,
    hide_vert: Option<Vec<bool>>,
    hide_poly: Option<Vec<bool>>,
    mask: Option<Vec<f32>>,
    face_sets: Option<Vec<i32>>,
    colors: Option<Vec<Vec4>>,
    topology_version: u64,
    vert_to_face: VertToFace,
}

impl PlainMesh {
    /// Build a mesh from positions and polygons given as vertex index lists.
    pub fn new(positions: Vec<Vec3>, polygons: &[Vec<u32>]) -> SculptResult<Self> {
        let mut face_offsets = Vec::with_capacity(polygons.len() + 1);
        let mut corner_verts = Vec::new();
        face_offsets.push(0);
        for poly in polygons {
            if poly.len() < 3 {
                return Err(SculptError::InvalidTopology(format!(
                    "polygon with {} corners",
                    poly.len()
                )));
            }
            if let Some(&bad) = poly.iter().find(|&&v| v as usize >= positions.len()) {
                return Err(SculptError::InvalidTopology(format!(
                    "corner references vertex {} of {}",
                    bad,
                    positions.len()
                )));
            }
            corner_verts.extend_from_slice(poly);
            face_offsets.push(corner_verts.len() as u32);
        }

        let mut mesh = Self {
            normals: vec![Vec3::ZERO; positions.len()],
            positions,
            face_offsets,
            corner_verts,
            topology_version: 1,
            ..Default::default()
        };
        mesh.rebuild_vert_to_face();
        mesh.recalculate_all_normals();
        Ok(mesh)
    }

    // ========================================================================
    // Attribute builders
    // ========================================================================

    pub fn with_mask(mut self, mask: Vec<f32>) -> SculptResult<Self> {
        check_len("mask", &mask, self.positions.len())?;
        self.mask = Some(mask);
        Ok(self)
    }

    pub fn with_hidden_verts(mut self, hidden: Vec<bool>) -> SculptResult<Self> {
        check_len("hide_vert", &hidden, self.positions.len())?;
        self.hide_vert = Some(hidden);
        Ok(self)
    }

    pub fn with_hidden_faces(mut self, hidden: Vec<bool>) -> SculptResult<Self> {
        check_len("hide_poly", &hidden, self.face_count())?;
        self.hide_poly = Some(hidden);
        Ok(self)
    }

    pub fn with_face_sets(mut self, face_sets: Vec<i32>) -> SculptResult<Self> {
        check_len("face_sets", &face_sets, self.face_count())?;
        self.face_sets = Some(face_sets);
        Ok(self)
    }

    pub fn with_colors(mut self, colors: Vec<Vec4>) -> SculptResult<Self> {
        check_len("colors", &colors, self.positions.len())?;
        self.colors = Some(colors);
        Ok(self)
    }

    /// Attach evaluated positions produced by a deform modifier.
    pub fn with_deformed(mut self, deformed: Vec<Vec3>) -> SculptResult<Self> {
        check_len("deformed", &deformed, self.positions.len())?;
        self.deformed = Some(deformed);
        self.recalculate_all_normals();
        Ok(self)
    }

    // ========================================================================
    // Topology
    // ========================================================================

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.face_offsets.len().saturating_sub(1)
    }

    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    pub fn face_verts(&self, face: usize) -> &[u32] {
        match (self.face_offsets.get(face), self.face_offsets.get(face + 1)) {
            (Some(&start), Some(&end)) => &self.corner_verts[start as usize..end as usize],
            _ => &[],
        }
    }

    /// Faces using the vertex
    pub fn vert_faces(&self, vert: usize) -> &[u32] {
        self.vert_to_face.faces_of(vert)
    }

    /// Rebuild adjacency tables if they were built for an older topology.
    pub fn ensure_adjacency(&mut self) {
        if self.vert_to_face.version != self.topology_version {
            self.rebuild_vert_to_face();
        }
    }

    fn rebuild_vert_to_face(&mut self) {
        let vert_count = self.positions.len();
        let mut counts = vec![0u32; vert_count + 1];
        for &v in &self.corner_verts {
            counts[v as usize + 1] += 1;
        }
        for i in 1..counts.len() {
            counts[i] += counts[i - 1];
        }
        let offsets = counts.clone();
        let mut faces = vec![0u32; self.corner_verts.len()];
        for face in 0..self.face_count() {
            for &v in self.face_verts(face) {
                let slot = &mut counts[v as usize];
                faces[*slot as usize] = face as u32;
                *slot += 1;
            }
        }

        // Edges used by exactly one face lie on the base boundary.
        let mut edge_use: HashMap<(u32, u32), u32> = HashMap::new();
        for face in 0..self.face_count() {
            let verts = self.face_verts(face);
            for i in 0..verts.len() {
                let (a, b) = (verts[i], verts[(i + 1) % verts.len()]);
                *edge_use.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        let mut boundary = vec![false; vert_count];
        for (&(a, b), &uses) in &edge_use {
            if uses == 1 {
                boundary[a as usize] = true;
                boundary[b as usize] = true;
            }
        }

        tracing::debug!(
            "PlainMesh: built vert-to-face map for {} verts, {} faces (version {})",
            vert_count,
            self.face_count(),
            self.topology_version
        );

        self.vert_to_face = VertToFace {
            version: self.topology_version,
            offsets,
            faces,
            boundary,
        };
    }

    fn face_hidden(&self, face: u32) -> bool {
        self.hide_poly
            .as_ref()
            .is_some_and(|h| h.get(face as usize).copied().unwrap_or(false))
    }

    /// Neighbors through visible faces, deduplicated.
    pub fn neighbors(&self, vert: usize) -> Vec<u32> {
        debug_assert_eq!(self.vert_to_face.version, self.topology_version);
        let mut result = Vec::new();
        for &face in self.vert_faces(vert) {
            if self.face_hidden(face) {
                continue;
            }
            let verts = self.face_verts(face as usize);
            let Some(pos) = verts.iter().position(|&v| v as usize == vert) else {
                continue;
            };
            let len = verts.len();
            for v in [verts[(pos + len - 1) % len], verts[(pos + 1) % len]] {
                if !result.contains(&v) {
                    result.push(v);
                }
            }
        }
        result
    }

    /// Neighbors used by boundary-preserving smoothing.
    ///
    /// Corners (boundary vertices with two neighbors) stay pinned and other
    /// boundary vertices only see neighbors along the boundary.
    pub fn neighbors_interior(&self, vert: usize) -> Vec<u32> {
        let mut result = self.neighbors(vert);
        if self.is_boundary(vert) {
            if result.len() == 2 {
                result.clear();
            } else {
                result.retain(|&n| self.is_boundary(n as usize));
            }
        }
        result
    }

    /// Base-mesh boundary or touching a hidden face
    pub fn is_boundary(&self, vert: usize) -> bool {
        !self.all_faces_visible(vert)
            || self.vert_to_face.boundary.get(vert).copied().unwrap_or(false)
    }

    // ========================================================================
    // Visibility / masks / face sets
    // ========================================================================

    pub fn is_hidden(&self, vert: usize) -> bool {
        self.hide_vert
            .as_ref()
            .is_some_and(|h| h.get(vert).copied().unwrap_or(false))
    }

    pub fn any_face_visible(&self, vert: usize) -> bool {
        if self.hide_poly.is_none() {
            return true;
        }
        self.vert_faces(vert).iter().any(|&f| !self.face_hidden(f))
    }

    pub fn all_faces_visible(&self, vert: usize) -> bool {
        if self.hide_poly.is_none() {
            return true;
        }
        self.vert_faces(vert).iter().all(|&f| !self.face_hidden(f))
    }

    pub fn mask(&self, vert: usize) -> f32 {
        self.mask
            .as_ref()
            .and_then(|m| m.get(vert).copied())
            .unwrap_or(0.0)
    }

    /// Write a mask value, creating the layer on first use.
    pub fn set_mask(&mut self, vert: usize, value: f32) {
        let len = self.positions.len();
        let mask = self.mask.get_or_insert_with(|| vec![0.0; len]);
        if let Some(slot) = mask.get_mut(vert) {
            *slot = value;
        }
    }

    /// Largest face set of the incident faces
    pub fn face_set(&self, vert: usize) -> i32 {
        let Some(face_sets) = &self.face_sets else {
            return FACE_SET_NONE;
        };
        self.vert_faces(vert)
            .iter()
            .filter_map(|&f| face_sets.get(f as usize).copied())
            .max()
            .unwrap_or(FACE_SET_NONE)
    }

    pub fn has_face_set(&self, vert: usize, face_set: i32) -> bool {
        let Some(face_sets) = &self.face_sets else {
            return face_set == FACE_SET_NONE;
        };
        self.vert_faces(vert)
            .iter()
            .any(|&f| face_sets.get(f as usize) == Some(&face_set))
    }

    pub fn has_unique_face_set(&self, vert: usize) -> bool {
        let Some(face_sets) = &self.face_sets else {
            return true;
        };
        let mut seen = None;
        for &f in self.vert_faces(vert) {
            let fs = face_sets.get(f as usize).copied();
            match seen {
                None => seen = Some(fs),
                Some(prev) if prev != fs => return false,
                _ => {}
            }
        }
        true
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    pub fn color(&self, vert: usize) -> Option<Vec4> {
        self.colors.as_ref().and_then(|c| c.get(vert).copied())
    }

    pub fn set_color(&mut self, vert: usize, color: Vec4) {
        if let Some(slot) = self.colors.as_mut().and_then(|c| c.get_mut(vert)) {
            *slot = color;
        }
    }

    // ========================================================================
    // Positions and normals
    // ========================================================================

    pub fn is_deformed(&self) -> bool {
        self.deformed.is_some()
    }

    /// Evaluated position (deformed if a deform modifier is active)
    pub fn position(&self, vert: usize) -> Vec3 {
        self.deformed
            .as_ref()
            .unwrap_or(&self.positions)
            .get(vert)
            .copied()
            .unwrap_or(Vec3::ZERO)
    }

    pub fn base_position(&self, vert: usize) -> Vec3 {
        self.positions.get(vert).copied().unwrap_or(Vec3::ZERO)
    }

    pub fn base_positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn set_base_position(&mut self, vert: usize, position: Vec3) {
        if let Some(slot) = self.positions.get_mut(vert) {
            *slot = position;
        }
    }

    /// No-op when the mesh is not deformed.
    pub fn set_deformed_position(&mut self, vert: usize, position: Vec3) {
        if let Some(slot) = self.deformed.as_mut().and_then(|d| d.get_mut(vert)) {
            *slot = position;
        }
    }

    pub fn normal(&self, vert: usize) -> Vec3 {
        self.normals.get(vert).copied().unwrap_or(Vec3::ZERO)
    }

    fn face_normal(&self, face: usize) -> Vec3 {
        // Newell's method handles non-planar polygons.
        let verts = self.face_verts(face);
        let mut normal = Vec3::ZERO;
        for i in 0..verts.len() {
            let a = self.position(verts[i] as usize);
            let b = self.position(verts[(i + 1) % verts.len()] as usize);
            normal.x += (a.y - b.y) * (a.z + b.z);
            normal.y += (a.z - b.z) * (a.x + b.x);
            normal.z += (a.x - b.x) * (a.y + b.y);
        }
        normal.normalize_or_zero()
    }

    /// Recompute vertex normals as the average of incident face normals.
    pub fn update_normals(&mut self, verts: &[usize]) {
        let mut face_normals: HashMap<u32, Vec3> = HashMap::new();
        for &v in verts {
            for &f in self.vert_faces(v) {
                face_normals
                    .entry(f)
                    .or_insert_with(|| self.face_normal(f as usize));
            }
        }
        for &v in verts {
            let sum: Vec3 = self
                .vert_faces(v)
                .iter()
                .filter_map(|f| face_normals.get(f))
                .sum();
            if let Some(slot) = self.normals.get_mut(v) {
                *slot = sum.normalize_or_zero();
            }
        }
    }

    fn recalculate_all_normals(&mut self) {
        let all: Vec<usize> = (0..self.positions.len()).collect();
        self.update_normals(&all);
    }
}
