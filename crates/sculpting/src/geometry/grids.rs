//! Multiresolution grid backend.
//!
//! Every base-mesh face corner owns a square grid of `grid_size²` vertices.
//! Grids are stitched by position: border vertices that coincide with a
//! border vertex of another grid are duplicates of the same surface point.

use std::collections::HashMap;

use glam::Vec3;

use super::{GridCoord, FACE_SET_NONE};
use crate::error::{check_len, SculptError, SculptResult};

fn quantize(p: Vec3) -> [i64; 3] {
    [
        (p.x * 1_000_000.0).round() as i64,
        (p.y * 1_000_000.0).round() as i64,
        (p.z * 1_000_000.0).round() as i64,
    ]
}

/// Cross-grid adjacency, stamped with the topology version.
#[derive(Debug, Clone, Default)]
struct GridAdjacency {
    version: u64,
    /// Dense index to the dense indices of its duplicates in other grids
    duplicates: HashMap<u32, Vec<u32>>,
    /// Dense index to base boundary flag
    boundary: Vec<bool>,
}

/// Subdivision grids of a multiresolution mesh.
#[derive(Debug, Clone, Default)]
pub struct GridMesh {
    grid_size: usize,
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    masks: Option<Vec<f32>>,
    /// Optional per-grid hidden bitmap
    grid_hidden: Vec<Option<Vec<bool>>>,
    grid_to_face: Vec<u32>,
    hide_poly: Option<Vec<bool>>,
    face_sets: Option<Vec<i32>>,
    topology_version: u64,
    adjacency: GridAdjacency,
}

impl GridMesh {
    /// Build from flat grid positions (`grid_count * grid_size²`, row-major
    /// per grid) and the base face of each grid.
    pub fn new(grid_size: usize, positions: Vec<Vec3>, grid_to_face: Vec<u32>) -> SculptResult<Self> {
        if grid_size < 2 {
            return Err(SculptError::InvalidTopology(format!(
                "grid size {} is below 2",
                grid_size
            )));
        }
        let area = grid_size * grid_size;
        check_len("grid positions", &positions, grid_to_face.len() * area)?;

        let grid_count = grid_to_face.len();
        let mut mesh = Self {
            grid_size,
            normals: vec![Vec3::ZERO; positions.len()],
            positions,
            grid_hidden: vec![None; grid_count],
            grid_to_face,
            topology_version: 1,
            ..Default::default()
        };
        mesh.rebuild_adjacency();
        mesh.recalculate_all_normals();
        Ok(mesh)
    }

    pub fn with_masks(mut self, masks: Vec<f32>) -> SculptResult<Self> {
        check_len("grid masks", &masks, self.positions.len())?;
        self.masks = Some(masks);
        Ok(self)
    }

    /// Face sets of the base mesh, indexed through `grid_to_face`
    pub fn with_face_sets(mut self, face_sets: Vec<i32>) -> Self {
        self.face_sets = Some(face_sets);
        self
    }

    /// Hidden flags of the base mesh faces
    pub fn with_hidden_faces(mut self, hide_poly: Vec<bool>) -> Self {
        self.hide_poly = Some(hide_poly);
        self
    }

    /// Set the hidden bitmap of one grid.
    pub fn set_grid_hidden(&mut self, grid: usize, hidden: Vec<bool>) -> SculptResult<()> {
        check_len("grid hidden", &hidden, self.grid_area())?;
        if let Some(slot) = self.grid_hidden.get_mut(grid) {
            *slot = Some(hidden);
        }
        Ok(())
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn grid_area(&self) -> usize {
        self.grid_size * self.grid_size
    }

    pub fn grid_count(&self) -> usize {
        self.grid_to_face.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    // ========================================================================
    // Index mapping
    // ========================================================================

    /// Dense index `grid * area + y * size + x`
    pub fn index(&self, coord: GridCoord) -> usize {
        coord.grid as usize * self.grid_area()
            + coord.y as usize * self.grid_size
            + coord.x as usize
    }

    pub fn coord(&self, index: usize) -> GridCoord {
        let area = self.grid_area();
        let local = index % area;
        GridCoord {
            grid: (index / area) as u32,
            x: (local % self.grid_size) as u16,
            y: (local / self.grid_size) as u16,
        }
    }

    fn on_border(&self, coord: GridCoord) -> bool {
        let last = (self.grid_size - 1) as u16;
        coord.x == 0 || coord.y == 0 || coord.x == last || coord.y == last
    }

    // ========================================================================
    // Adjacency
    // ========================================================================

    pub fn ensure_adjacency(&mut self) {
        if self.adjacency.version != self.topology_version {
            self.rebuild_adjacency();
        }
    }

    fn rebuild_adjacency(&mut self) {
        let size = self.grid_size;
        let last = size - 1;

        let mut by_position: HashMap<[i64; 3], Vec<u32>> = HashMap::new();
        let mut segment_use: HashMap<([i64; 3], [i64; 3]), u32> = HashMap::new();
        for grid in 0..self.grid_count() {
            let base = grid * self.grid_area();
            let border: Vec<usize> = (0..size)
                .chain((1..size).map(|y| y * size + last))
                .chain((0..last).rev().map(|x| last * size + x))
                .chain((1..last).rev().map(|y| y * size))
                .collect();
            for &local in &border {
                let dense = (base + local) as u32;
                by_position
                    .entry(quantize(self.positions[dense as usize]))
                    .or_default()
                    .push(dense);
            }
            for i in 0..border.len() {
                let a = quantize(self.positions[base + border[i]]);
                let b = quantize(self.positions[base + border[(i + 1) % border.len()]]);
                let key = if a <= b { (a, b) } else { (b, a) };
                *segment_use.entry(key).or_insert(0) += 1;
            }
        }

        let mut duplicates: HashMap<u32, Vec<u32>> = HashMap::new();
        for group in by_position.values().filter(|g| g.len() > 1) {
            for &v in group {
                duplicates.insert(v, group.iter().copied().filter(|&d| d != v).collect());
            }
        }

        let mut boundary = vec![false; self.positions.len()];
        let boundary_points: std::collections::HashSet<[i64; 3]> = segment_use
            .iter()
            .filter(|&(_, &uses)| uses == 1)
            .flat_map(|(&(a, b), _)| [a, b])
            .collect();
        for group in by_position.values() {
            if let Some(&first) = group.first() {
                if boundary_points.contains(&quantize(self.positions[first as usize])) {
                    for &v in group {
                        boundary[v as usize] = true;
                    }
                }
            }
        }

        tracing::debug!(
            "GridMesh: stitched {} grids, {} duplicated border verts",
            self.grid_count(),
            duplicates.len()
        );

        self.adjacency = GridAdjacency {
            version: self.topology_version,
            duplicates,
            boundary,
        };
    }

    /// Duplicates of a border vertex in neighboring grids
    pub fn duplicates(&self, coord: GridCoord) -> &[u32] {
        self.adjacency
            .duplicates
            .get(&(self.index(coord) as u32))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn in_grid_neighbors(&self, coord: GridCoord, out: &mut Vec<GridCoord>) {
        let last = (self.grid_size - 1) as u16;
        let GridCoord { grid, x, y } = coord;
        if x > 0 {
            out.push(GridCoord { grid, x: x - 1, y });
        }
        if x < last {
            out.push(GridCoord { grid, x: x + 1, y });
        }
        if y > 0 {
            out.push(GridCoord { grid, x, y: y - 1 });
        }
        if y < last {
            out.push(GridCoord { grid, x, y: y + 1 });
        }
    }

    /// Neighbors across grid seams.
    ///
    /// Neighbors of every duplicate are merged and deduplicated by position.
    /// With `include_duplicates` the duplicates themselves are appended.
    pub fn neighbors(&self, coord: GridCoord, include_duplicates: bool) -> Vec<GridCoord> {
        debug_assert_eq!(self.adjacency.version, self.topology_version);
        let mut candidates = Vec::with_capacity(4);
        self.in_grid_neighbors(coord, &mut candidates);
        let dups: Vec<GridCoord> = self
            .duplicates(coord)
            .iter()
            .map(|&d| self.coord(d as usize))
            .collect();
        for &dup in &dups {
            self.in_grid_neighbors(dup, &mut candidates);
        }

        let own = quantize(self.position(coord));
        let mut seen = vec![own];
        let mut result = Vec::with_capacity(candidates.len());
        for c in candidates {
            let key = quantize(self.position(c));
            if !seen.contains(&key) {
                seen.push(key);
                result.push(c);
            }
        }
        if include_duplicates {
            result.extend(dups);
        }
        result
    }

    /// Neighbors for boundary-preserving smoothing.
    pub fn neighbors_interior(&self, coord: GridCoord) -> Vec<GridCoord> {
        let mut result = self.neighbors(coord, false);
        if self.is_boundary(coord) {
            if result.len() == 2 {
                result.clear();
            } else {
                result.retain(|&n| self.is_boundary(n));
            }
        }
        result
    }

    /// Boundary of the base mesh, stitched across grids
    pub fn is_boundary(&self, coord: GridCoord) -> bool {
        self.on_border(coord)
            && self
                .adjacency
                .boundary
                .get(self.index(coord))
                .copied()
                .unwrap_or(false)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn position(&self, coord: GridCoord) -> Vec3 {
        self.positions
            .get(self.index(coord))
            .copied()
            .unwrap_or(Vec3::ZERO)
    }

    /// Write one grid slot. Seam duplicates are left untouched until
    /// [`GridMesh::stitch`] runs.
    pub fn set_position(&mut self, coord: GridCoord, position: Vec3) {
        let index = self.index(coord);
        if let Some(slot) = self.positions.get_mut(index) {
            *slot = position;
        }
    }

    /// Average every seam vertex in `coords` with its duplicates and write
    /// the result back to all of them.
    pub fn stitch(&mut self, coords: &[GridCoord]) {
        for &coord in coords {
            let index = self.index(coord);
            let Some(dups) = self.adjacency.duplicates.get(&(index as u32)) else {
                continue;
            };
            let mut sum = self.positions.get(index).copied().unwrap_or(Vec3::ZERO);
            let mut count = 1.0;
            for &d in dups {
                if let Some(p) = self.positions.get(d as usize) {
                    sum += *p;
                    count += 1.0;
                }
            }
            let average = sum / count;
            for i in dups.clone().into_iter().chain(std::iter::once(index as u32)) {
                if let Some(slot) = self.positions.get_mut(i as usize) {
                    *slot = average;
                }
            }
        }
    }

    pub fn normal(&self, coord: GridCoord) -> Vec3 {
        self.normals
            .get(self.index(coord))
            .copied()
            .unwrap_or(Vec3::ZERO)
    }

    pub fn is_hidden(&self, coord: GridCoord) -> bool {
        let local = coord.y as usize * self.grid_size + coord.x as usize;
        self.grid_hidden
            .get(coord.grid as usize)
            .and_then(|g| g.as_ref())
            .is_some_and(|bits| bits.get(local).copied().unwrap_or(false))
    }

    pub fn mask(&self, coord: GridCoord) -> f32 {
        self.masks
            .as_ref()
            .and_then(|m| m.get(self.index(coord)).copied())
            .unwrap_or(0.0)
    }

    pub fn set_mask(&mut self, coord: GridCoord, value: f32) {
        let len = self.positions.len();
        let index = self.index(coord);
        let masks = self.masks.get_or_insert_with(|| vec![0.0; len]);
        if let Some(slot) = masks.get_mut(index) {
            *slot = value;
        }
    }

    fn base_face(&self, coord: GridCoord) -> Option<usize> {
        self.grid_to_face.get(coord.grid as usize).map(|&f| f as usize)
    }

    /// Whether the base face of the grid is visible
    pub fn all_faces_visible(&self, coord: GridCoord) -> bool {
        let (Some(hide_poly), Some(face)) = (&self.hide_poly, self.base_face(coord)) else {
            return true;
        };
        !hide_poly.get(face).copied().unwrap_or(false)
    }

    pub fn face_set(&self, coord: GridCoord) -> i32 {
        match (&self.face_sets, self.base_face(coord)) {
            (Some(sets), Some(face)) => sets.get(face).copied().unwrap_or(FACE_SET_NONE),
            _ => FACE_SET_NONE,
        }
    }

    /// All grids sharing this point belong to the same face set.
    pub fn has_unique_face_set(&self, coord: GridCoord) -> bool {
        let own = self.face_set(coord);
        self.duplicates(coord)
            .iter()
            .all(|&d| self.face_set(self.coord(d as usize)) == own)
    }

    pub fn has_face_set(&self, coord: GridCoord, face_set: i32) -> bool {
        self.face_set(coord) == face_set
            || self
                .duplicates(coord)
                .iter()
                .any(|&d| self.face_set(self.coord(d as usize)) == face_set)
    }

    // ========================================================================
    // Normals
    // ========================================================================

    fn grid_normal(&self, coord: GridCoord) -> Vec3 {
        let last = (self.grid_size - 1) as u16;
        let at = |x: u16, y: u16| self.position(GridCoord { grid: coord.grid, x, y });
        let (x0, x1) = (coord.x.saturating_sub(1), (coord.x + 1).min(last));
        let (y0, y1) = (coord.y.saturating_sub(1), (coord.y + 1).min(last));
        let du = at(x1, coord.y) - at(x0, coord.y);
        let dv = at(coord.x, y1) - at(coord.x, y0);
        du.cross(dv).normalize_or_zero()
    }

    /// Recompute normals from in-grid differences, averaged over seams.
    pub fn update_normals(&mut self, coords: &[GridCoord]) {
        let computed: Vec<(usize, Vec3)> = coords
            .iter()
            .map(|&c| {
                let mut sum = self.grid_normal(c);
                for &d in self.duplicates(c) {
                    sum += self.grid_normal(self.coord(d as usize));
                }
                (self.index(c), sum.normalize_or_zero())
            })
            .collect();
        for (index, normal) in computed {
            if let Some(slot) = self.normals.get_mut(index) {
                *slot = normal;
            }
            if let Some(dups) = self.adjacency.duplicates.get(&(index as u32)) {
                for &d in dups {
                    if let Some(slot) = self.normals.get_mut(d as usize) {
                        *slot = normal;
                    }
                }
            }
        }
    }

    fn recalculate_all_normals(&mut self) {
        let all: Vec<GridCoord> = (0..self.positions.len()).map(|i| self.coord(i)).collect();
        self.update_normals(&all);
    }
}
