//! Brush actions.
//!
//! Every tool is an entry in an [`ActionTable`]. An action receives the
//! gathered nodes of one symmetry pass and writes its result through the
//! apply stage. Node work runs in two phases: translations are computed from
//! a read-only view of the mesh (in parallel above the configured node
//! count), then written back in order.
//!
//! Tools without a built-in action (cloth, pose, boundary, paint and the
//! other solver-backed tools) are registered by the embedding application.

pub mod draw;
pub mod grab;
pub mod mask;
pub mod plane;
pub mod smooth;

use std::collections::HashMap;
use std::f32::consts::SQRT_2;
use std::sync::Arc;

use chisel_config::SculptSettings;
use glam::Vec3;
use rayon::prelude::*;

use crate::apply::{DirtyVertices, write_translations};
use crate::brush::Brush;
use crate::cache::StrokeCache;
use crate::factors::{FactorContext, NodeFactors, TextureSampler};
use crate::geometry::VertexHandle;
use crate::orientation::{self, SampleSource};
use crate::reduce::AreaSampler;
use crate::session::SessionState;
use crate::spatial::{Node, NodeId, SpatialGather, node_in_cylinder, node_in_sphere};
use crate::types::{BrushTool, FalloffShape, TextureMapMode};
use crate::undo::{UndoKind, UndoLog};

/// Everything an action may read or write during one pass.
pub struct BrushContext<'a> {
    pub session: &'a mut SessionState,
    pub cache: &'a mut StrokeCache,
    pub brush: &'a Brush,
    pub settings: &'a SculptSettings,
    pub undo: &'a mut dyn UndoLog,
    pub texture: Option<&'a dyn TextureSampler>,
    pub dirty: &'a mut DirtyVertices,
}

/// Translations computed for one node.
#[derive(Debug, Clone, Default)]
pub struct NodeTranslations {
    pub node: NodeId,
    pub verts: Vec<VertexHandle>,
    pub translations: Vec<Vec3>,
}

/// Per-node inputs of a deformation.
#[derive(Debug, Clone)]
pub struct NodeData<'n> {
    pub node: &'n Node,
    /// Current evaluated positions
    pub positions: Vec<Vec3>,
    /// Positions the factors were computed on, original or current
    pub sample_positions: Vec<Vec3>,
    pub sample_normals: Vec<Vec3>,
    pub factors: Vec<f32>,
    pub distances: Vec<f32>,
}

impl<'a> BrushContext<'a> {
    /// Whether node loops should run on the rayon pool.
    pub fn use_parallel(&self, node_count: usize) -> bool {
        node_count >= self.settings.parallel_threshold
    }

    pub fn factor_context(&self) -> FactorContext<'_> {
        FactorContext::new(&self.session.geometry, self.cache, self.brush).with_texture(self.texture)
    }

    pub fn resolve(&self, ids: &[NodeId]) -> Vec<&Node> {
        ids.iter().filter_map(|&id| self.session.tree.node(id)).collect()
    }

    /// Run `f` over every node, in parallel when there are enough of them.
    pub fn map_nodes<T, F>(&self, ids: &[NodeId], f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&Node) -> T + Send + Sync,
    {
        let nodes = self.resolve(ids);
        if self.use_parallel(nodes.len()) {
            nodes.par_iter().map(|&node| f(node)).collect()
        } else {
            nodes.iter().map(|&node| f(node)).collect()
        }
    }

    pub fn current_positions(&self, node: &Node) -> Vec<Vec3> {
        node.verts.iter().map(|&v| self.session.geometry.position(v)).collect()
    }

    pub fn current_normals(&self, node: &Node) -> Vec<Vec3> {
        node.verts.iter().map(|&v| self.session.geometry.normal(v)).collect()
    }

    /// Pre-stroke positions and normals of `node`, or the current ones when
    /// no snapshot was taken.
    pub fn original_data(&self, node: &Node) -> (Vec<Vec3>, Vec<Vec3>) {
        match self.undo.snapshot(node.id, UndoKind::Position) {
            Some(snapshot) if snapshot.verts.len() == node.verts.len() => {
                (snapshot.positions.clone(), snapshot.normals.clone())
            }
            _ => (self.current_positions(node), self.current_normals(node)),
        }
    }

    /// Standard factors for `node`, sampled on original or current data.
    pub fn node_data<'n>(&self, node: &'n Node, use_original: bool) -> NodeData<'n> {
        self.build_node_data(node, use_original, self.factor_context())
    }

    /// Like [`BrushContext::node_data`], but the factors are not seeded from
    /// the mask. Hidden vertices still get zero.
    pub fn node_data_ignoring_mask<'n>(&self, node: &'n Node, use_original: bool) -> NodeData<'n> {
        self.build_node_data(node, use_original, self.factor_context().ignoring_mask())
    }

    fn build_node_data<'n>(&self, node: &'n Node, use_original: bool, context: FactorContext<'_>) -> NodeData<'n> {
        let positions = self.current_positions(node);
        let (sample_positions, sample_normals) = if use_original {
            self.original_data(node)
        } else {
            (positions.clone(), self.current_normals(node))
        };
        let NodeFactors { factors, distances } = context.calc_factors(node, &sample_positions, &sample_normals);
        NodeData {
            node,
            positions,
            sample_positions,
            sample_normals,
            factors,
            distances,
        }
    }

    /// Compute translations per node with `f`, then write them all.
    pub fn deform<F>(&mut self, ids: &[NodeId], use_original: bool, f: F)
    where
        F: Fn(&mut NodeData<'_>) -> Vec<Vec3> + Send + Sync,
    {
        let results = self.map_nodes(ids, |node| {
            let mut data = self.node_data(node, use_original);
            let translations = f(&mut data);
            NodeTranslations {
                node: node.id,
                verts: node.verts.clone(),
                translations,
            }
        });
        self.write(results);
    }

    /// Area reductions over the gathered nodes, reading snapshots of the
    /// open stroke.
    pub fn area_sampler(&self, node_count: usize) -> AreaSampler<'_> {
        AreaSampler::new(&self.session.geometry, self.brush, self.cache)
            .with_original(Some(self.undo.as_snapshots()))
            .with_parallel(self.use_parallel(node_count))
    }

    /// Refresh the sculpt normal of the current pass.
    pub fn update_sculpt_normal(&mut self, ids: &[NodeId]) {
        let parallel = self.use_parallel(ids.len());
        let tree = &self.session.tree;
        let nodes: Vec<&Node> = ids.iter().filter_map(|&id| tree.node(id)).collect();
        let source = SampleSource {
            geometry: &self.session.geometry,
            original: Some(self.undo.as_snapshots()),
            parallel,
        };
        orientation::update_sculpt_normal(&source, self.brush, self.cache, &nodes);
    }

    /// Normal and center of the brush plane for the current pass.
    pub fn brush_plane(&mut self, ids: &[NodeId]) -> (Vec3, Vec3) {
        let parallel = self.use_parallel(ids.len());
        let tree = &self.session.tree;
        let nodes: Vec<&Node> = ids.iter().filter_map(|&id| tree.node(id)).collect();
        let source = SampleSource {
            geometry: &self.session.geometry,
            original: Some(self.undo.as_snapshots()),
            parallel,
        };
        orientation::calc_brush_plane(&source, self.brush, self.cache, &nodes)
    }

    /// Write computed translations and mark their nodes dirty.
    pub fn write(&mut self, results: Vec<NodeTranslations>) {
        let clip = self.cache.mirror_clip;
        let lock_axes = self.settings.lock_axes;
        for mut result in results {
            write_translations(self.session, lock_axes, &clip, &result.verts, &mut result.translations);
            self.dirty.mark_node(result.node, &result.verts);
        }
    }
}

/// Move translations so they apply to the original positions instead of the
/// current ones.
pub fn reset_translations_to_original(translations: &mut [Vec3], positions: &[Vec3], original: &[Vec3]) {
    for ((translation, position), orig) in translations.iter_mut().zip(positions).zip(original) {
        *translation += *orig - *position;
    }
}

/// A per-tool brush implementation.
pub trait BrushAction: Send + Sync {
    fn apply(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]);
}

/// Brush actions keyed by tool.
#[derive(Clone, Default)]
pub struct ActionTable {
    actions: HashMap<BrushTool, Arc<dyn BrushAction>>,
}

impl std::fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<&BrushTool> = self.actions.keys().collect();
        tools.sort_by_key(|tool| **tool as u8);
        f.debug_struct("ActionTable").field("tools", &tools).finish()
    }
}

impl ActionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with every built-in action registered.
    pub fn with_builtins() -> Self {
        use draw::{CreaseAction, DrawAction, InflateAction, LayerAction};
        use grab::{GrabAction, NudgeAction, PinchAction, RotateAction, SnakeHookAction, ThumbAction};
        use mask::MaskAction;
        use plane::{ClayAction, ClayStripsAction, PlaneAction, PlaneKind};
        use smooth::SmoothAction;

        let mut table = Self::new();
        table.register(BrushTool::Draw, DrawAction { sharp: false });
        table.register(BrushTool::DrawSharp, DrawAction { sharp: true });
        table.register(BrushTool::Layer, LayerAction);
        table.register(BrushTool::Inflate, InflateAction);
        table.register(BrushTool::Blob, CreaseAction { blob: true });
        table.register(BrushTool::Crease, CreaseAction { blob: false });
        table.register(BrushTool::Smooth, SmoothAction);
        table.register(BrushTool::Flatten, PlaneAction(PlaneKind::Flatten));
        table.register(BrushTool::Fill, PlaneAction(PlaneKind::Fill));
        table.register(BrushTool::Scrape, PlaneAction(PlaneKind::Scrape));
        table.register(BrushTool::Clay, ClayAction);
        table.register(BrushTool::ClayStrips, ClayStripsAction);
        table.register(BrushTool::Pinch, PinchAction);
        table.register(BrushTool::Grab, GrabAction);
        table.register(BrushTool::SnakeHook, SnakeHookAction);
        table.register(BrushTool::Thumb, ThumbAction);
        table.register(BrushTool::Nudge, NudgeAction);
        table.register(BrushTool::Rotate, RotateAction);
        table.register(BrushTool::Mask, MaskAction);
        table
    }

    /// Register or replace the action of `tool`.
    pub fn register<A: BrushAction + 'static>(&mut self, tool: BrushTool, action: A) {
        self.actions.insert(tool, Arc::new(action));
    }

    pub fn get(&self, tool: BrushTool) -> Option<Arc<dyn BrushAction>> {
        self.actions.get(&tool).cloned()
    }

    pub fn contains(&self, tool: BrushTool) -> bool {
        self.actions.contains_key(&tool)
    }

    /// Run the action of the context's tool. Missing actions are a no-op.
    pub fn run(&self, ctx: &mut BrushContext<'_>, nodes: &[NodeId]) -> bool {
        let tool = ctx.brush.tool;
        let Some(action) = self.actions.get(&tool) else {
            tracing::warn!("ActionTable::run: no action registered for {:?}", tool);
            return false;
        };
        action.apply(ctx, nodes);
        true
    }
}

/// Nodes that may be affected by the current pass.
///
/// Square tips reach past the radius at their corners, so their search
/// radius is widened.
pub fn gather_nodes(session: &SessionState, cache: &StrokeCache, brush: &Brush) -> Vec<NodeId> {
    let use_original = brush.tool.needs_original() || !cache.accum;
    if brush.tool.needs_all_nodes() {
        return session.tree.search(use_original, &|_| true);
    }

    let mut radius_scale = 1.0;
    if brush.has_cube_tip() {
        radius_scale = SQRT_2;
    }
    if brush.tool == BrushTool::Draw && brush.original_normal {
        radius_scale = 2.0;
    }
    let radius = cache.radius * radius_scale;
    let radius_sq = radius * radius;
    let location = cache.location;
    match brush.falloff_shape {
        FalloffShape::Sphere => {
            session
                .tree
                .search(use_original, &|bounds| node_in_sphere(bounds, location, radius_sq))
        }
        FalloffShape::Tube => {
            session
                .tree
                .search(use_original, &|bounds| node_in_cylinder(bounds, location, radius_sq))
        }
    }
}

/// Undo data the tool modifies.
pub fn undo_kind_for(brush: &Brush) -> UndoKind {
    match brush.tool {
        BrushTool::Mask => UndoKind::Mask,
        BrushTool::Paint | BrushTool::Smear => UndoKind::Color,
        _ => UndoKind::Position,
    }
}

/// Whether the pass needs an up to date sculpt normal.
pub fn brush_needs_normal(brush: &Brush, cache: &StrokeCache, has_texture: bool) -> bool {
    (brush.tool.has_normal_weight() && cache.normal_weight > 0.0)
        || brush.tool.needs_normal()
        || (has_texture && brush.texture_mode == TextureMapMode::Area)
}

/// Smoothing applied after the main action of a pass.
pub fn do_autosmooth(ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
    let brush = ctx.brush;
    if matches!(brush.tool, BrushTool::Smooth | BrushTool::Mask) || brush.autosmooth_factor <= 0.0 {
        return;
    }
    let strength = if brush.inverse_smooth_pressure {
        brush.autosmooth_factor * (1.0 - ctx.cache.pressure)
    } else {
        brush.autosmooth_factor
    };
    smooth::do_smooth_brush(ctx, nodes, strength);
}

/// Pull vertices along the gravity direction of the pass.
pub fn do_gravity(ctx: &mut BrushContext<'_>, nodes: &[NodeId]) {
    if !ctx.cache.supports_gravity
        || ctx.settings.gravity_factor <= 0.0
        || matches!(
            ctx.brush.tool,
            BrushTool::Cloth | BrushTool::DrawFaceSets | BrushTool::Boundary
        )
    {
        return;
    }
    let offset = ctx.cache.gravity_direction * -ctx.cache.radius * ctx.settings.gravity_factor;
    ctx.deform(nodes, false, |data| {
        data.factors.iter().map(|&factor| offset * factor).collect()
    });
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_missing_action_is_noop() {
        let mut harness = Harness::new(grid_plane(3, 1.0), Brush::grab());
        let table = ActionTable::new();
        let before = harness.position_of(4);
        harness.run(|ctx, nodes| {
            assert!(!table.run(ctx, nodes));
        });
        assert_eq!(harness.position_of(4), before);
        assert!(harness.dirty.is_empty());
    }

    #[test]
    fn test_builtins_cover_core_tools() {
        let table = ActionTable::with_builtins();
        for tool in [BrushTool::Draw, BrushTool::Smooth, BrushTool::Grab, BrushTool::Mask] {
            assert!(table.contains(tool));
        }
        assert!(!table.contains(BrushTool::Cloth));
        assert!(!table.contains(BrushTool::Paint));
    }

    #[test]
    fn test_gather_respects_radius() {
        let harness = Harness::new(grid_plane(3, 1.0), Brush::draw());
        let mut cache = StrokeCache::default();
        cache.location = Vec3::new(10.0, 0.0, 0.0);
        cache.radius = 1.0;
        assert!(gather_nodes(&harness.session, &cache, &harness.brush).is_empty());
        cache.location = Vec3::ZERO;
        assert!(!gather_nodes(&harness.session, &cache, &harness.brush).is_empty());
        // Anchored strokes start with no radius
        cache.radius = 0.0;
        cache.location = Vec3::new(1.5, 0.0, 0.0);
        assert!(gather_nodes(&harness.session, &cache, &harness.brush).is_empty());
    }

    #[test]
    fn test_gravity_pulls_down() {
        let mut harness = Harness::new(grid_plane(5, 0.25), Brush::draw());
        harness.settings.gravity_factor = 1.0;
        harness.cache.supports_gravity = true;
        harness.cache.gravity_direction = Vec3::Z;
        let center = harness.index_at(Vec3::ZERO);
        harness.run(|ctx, nodes| do_gravity(ctx, nodes));
        assert!(harness.position_of(center).z < 0.0);
        assert!(!harness.dirty.is_empty());
    }

    #[test]
    fn test_lock_axes_apply_to_actions() {
        let mut harness = Harness::new(grid_plane(5, 0.25), Brush::draw());
        harness.settings.lock_axes = 0b100;
        let table = ActionTable::with_builtins();
        let center = harness.index_at(Vec3::ZERO);
        harness.run(|ctx, nodes| {
            table.run(ctx, nodes);
        });
        assert_eq!(harness.position_of(center).z, 0.0);
    }

    #[test]
    fn test_empty_node_translations() {
        let empty = NodeTranslations::default();
        assert_eq!(empty.node, NodeId(0));
        assert!(empty.verts.is_empty());
        assert!(empty.translations.is_empty());
    }
}
