//! Original-data snapshots for restore, cancel and undo.
//!
//! The first time a node is touched by a stroke its data is copied into the
//! open undo step. Later pushes of the same (node, kind) are ignored, so the
//! snapshot always holds the pre-stroke state. Brushes that read original
//! coordinates take them from here.

use std::collections::{HashMap, VecDeque};

use glam::{Vec3, Vec4};

use crate::geometry::{Geometry, VertexHandle};
use crate::spatial::{NodeId, SpatialGather};

/// Which attribute a snapshot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UndoKind {
    Position,
    Mask,
    Color,
}

/// Pre-stroke data of one node.
#[derive(Debug, Clone, Default)]
pub struct NodeSnapshot {
    pub verts: Vec<VertexHandle>,
    /// Evaluated positions
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub masks: Vec<f32>,
    pub colors: Vec<Vec4>,
}

impl NodeSnapshot {
    pub fn capture(geometry: &Geometry, verts: &[VertexHandle], kind: UndoKind) -> Self {
        let mut snapshot = Self {
            verts: verts.to_vec(),
            ..Default::default()
        };
        match kind {
            UndoKind::Position => {
                snapshot.positions = verts.iter().map(|&v| geometry.position(v)).collect();
                snapshot.normals = verts.iter().map(|&v| geometry.normal(v)).collect();
            }
            UndoKind::Mask => {
                snapshot.masks = verts.iter().map(|&v| geometry.mask(v)).collect();
            }
            UndoKind::Color => {
                snapshot.colors = verts
                    .iter()
                    .map(|&v| geometry.color(v).unwrap_or(Vec4::ONE))
                    .collect();
            }
        }
        snapshot
    }
}

/// Read access to pre-stroke snapshots.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self, node: NodeId, kind: UndoKind) -> Option<&NodeSnapshot>;
}

/// Storage of pre-stroke snapshots. [`SnapshotSource::snapshot`] reads the
/// open step.
pub trait UndoLog: SnapshotSource {
    /// Capture `nodes` for `kind` unless already captured in the open step.
    fn push_nodes(&mut self, geometry: &Geometry, tree: &dyn SpatialGather, nodes: &[NodeId], kind: UndoKind);

    fn as_snapshots(&self) -> &dyn SnapshotSource;
}

/// One stroke or filter application worth of snapshots.
#[derive(Debug, Clone, Default)]
pub struct UndoStep {
    pub name: String,
    nodes: HashMap<(NodeId, UndoKind), NodeSnapshot>,
}

impl UndoStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, node: NodeId, kind: UndoKind) -> Option<&NodeSnapshot> {
        self.nodes.get(&(node, kind))
    }

    /// Snapshots of one kind, ordered by node.
    pub fn snapshots(&self, kind: UndoKind) -> Vec<(NodeId, &NodeSnapshot)> {
        let mut out: Vec<(NodeId, &NodeSnapshot)> = self
            .nodes
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|((id, _), snapshot)| (*id, snapshot))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().map(|(id, _)| *id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// In-memory undo history with a bounded number of steps.
#[derive(Debug, Clone)]
pub struct MemoryUndoLog {
    open: Option<UndoStep>,
    history: VecDeque<UndoStep>,
    max_levels: usize,
}

impl Default for MemoryUndoLog {
    fn default() -> Self {
        Self::new(chisel_config::DEFAULT_MAX_UNDO_LEVELS)
    }
}

impl MemoryUndoLog {
    pub fn new(max_levels: usize) -> Self {
        Self {
            open: None,
            history: VecDeque::new(),
            max_levels,
        }
    }

    /// Open a new step. An already open step is committed first.
    pub fn begin(&mut self, name: &str) {
        if self.open.is_some() {
            tracing::warn!("MemoryUndoLog::begin: committing unfinished step");
            self.end();
        }
        self.open = Some(UndoStep::new(name));
    }

    /// Commit the open step. Empty steps are dropped.
    pub fn end(&mut self) {
        let Some(step) = self.open.take() else {
            return;
        };
        if step.is_empty() {
            return;
        }
        tracing::debug!("MemoryUndoLog::end: '{}' with {} snapshots", step.name, step.len());
        self.history.push_back(step);
        while self.history.len() > self.max_levels {
            self.history.pop_front();
        }
    }

    /// Close the open step without committing it and hand it back.
    pub fn cancel(&mut self) -> Option<UndoStep> {
        self.open.take()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_step(&self) -> Option<&UndoStep> {
        self.open.as_ref()
    }

    /// Remove and return the most recent committed step.
    pub fn pop_last(&mut self) -> Option<UndoStep> {
        self.history.pop_back()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl UndoLog for MemoryUndoLog {
    fn push_nodes(&mut self, geometry: &Geometry, tree: &dyn SpatialGather, nodes: &[NodeId], kind: UndoKind) {
        let step = self.open.get_or_insert_with(|| UndoStep::new("Sculpt"));
        let mut captured = 0;
        for &id in nodes {
            if step.nodes.contains_key(&(id, kind)) {
                continue;
            }
            let Some(node) = tree.node(id) else {
                continue;
            };
            step.nodes.insert((id, kind), NodeSnapshot::capture(geometry, &node.verts, kind));
            captured += 1;
        }
        if captured > 0 {
            tracing::trace!("MemoryUndoLog::push_nodes: {} new {:?} snapshots", captured, kind);
        }
    }

    fn as_snapshots(&self) -> &dyn SnapshotSource {
        self
    }
}

impl SnapshotSource for MemoryUndoLog {
    fn snapshot(&self, node: NodeId, kind: UndoKind) -> Option<&NodeSnapshot> {
        self.open.as_ref().and_then(|step| step.get(node, kind))
    }
}

impl SnapshotSource for UndoStep {
    fn snapshot(&self, node: NodeId, kind: UndoKind) -> Option<&NodeSnapshot> {
        self.get(node, kind)
    }
}
