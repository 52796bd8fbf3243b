//! Sculpting pipeline orchestration.
//!
//! This module drives one stroke from start to finish:
//! 1. Begin: mode check, stroke cache invariants, undo step
//! 2. Step: sample → variants → restore → symmetric passes → flush
//! 3. End: final flush, undo commit, cache teardown
//!
//! Every pass of a step gathers nodes, snapshots them, refreshes the sculpt
//! normal and brush matrix, runs the tool's action, then autosmooth and
//! gravity. Recorded samples allow deterministic replay.

use std::sync::Arc;

use glam::Vec2;
use tracing::{debug, trace, warn};

use chisel_config::SculptSettings;

use crate::apply::{
    DirtyVertices, RedrawNotifier, UpdateType, flush_update_done, flush_update_step, restore_all,
    restore_color_from_undo_step, restore_mask_from_undo_step, restore_position_from_undo_step,
};
use crate::brush::Brush;
use crate::brushes::{
    ActionTable, BrushAction, BrushContext, brush_needs_normal, do_autosmooth, do_gravity, gather_nodes,
    undo_kind_for,
};
use crate::cache::{StrokeCache, StrokeMode};
use crate::error::{SculptError, SculptResult};
use crate::factors::{AutoMaskProvider, TextureSampler};
use crate::filter::{MeshFilter, MeshFilterSettings};
use crate::geometry::BackendKind;
use crate::orientation::update_brush_local_mat;
use crate::session::SessionState;
use crate::symmetry::do_symmetrical_brush_actions;
use crate::types::{BrushTool, StrokeSample};
use crate::undo::{MemoryUndoLog, UndoKind, UndoLog};

/// Result of evaluating a single stroke step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    /// Symmetry and tiling passes that ran.
    pub passes: u32,
    /// Nodes gathered over all passes.
    pub nodes_gathered: usize,
    /// Vertices written by the step.
    pub vertices_modified: usize,
}

/// Result of ending a stroke.
#[derive(Debug, Default, Clone)]
pub struct StrokeEndResult {
    /// Steps evaluated during the stroke.
    pub steps: u32,
    /// Every sample the stroke received, in order.
    pub samples: Vec<StrokeSample>,
}

/// State tracked during an active stroke.
#[derive(Debug)]
struct ActiveStroke {
    cache: StrokeCache,
    /// Brush settings captured at stroke start
    brush: Brush,
    samples: Vec<StrokeSample>,
    kind: UndoKind,
    steps: u32,
}

fn update_type_for(kind: UndoKind) -> UpdateType {
    match kind {
        UndoKind::Position => UpdateType::Position,
        UndoKind::Mask => UpdateType::Mask,
        UndoKind::Color => UpdateType::Color,
    }
}

/// The sculpting pipeline orchestrates stroke → passes → actions → flush.
///
/// It owns the edit-mode session, the undo history and the action table. A
/// single stroke may be active at a time.
pub struct SculptingPipeline {
    /// Mesh, spatial tree and view of the edit session.
    pub session: SessionState,
    /// Scene-level sculpt settings.
    pub settings: SculptSettings,
    brush: Brush,
    actions: ActionTable,
    undo: MemoryUndoLog,
    texture: Option<Arc<dyn TextureSampler>>,
    automask: Option<Arc<dyn AutoMaskProvider>>,
    stroke: Option<ActiveStroke>,
    /// Samples of the last finished stroke
    last_samples: Vec<StrokeSample>,
    dirty: DirtyVertices,
}

impl std::fmt::Debug for SculptingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SculptingPipeline")
            .field("settings", &self.settings)
            .field("brush", &self.brush.name)
            .field("actions", &self.actions)
            .field("undo_levels", &self.undo.history_len())
            .field("texture", &self.texture.is_some())
            .field("stroke_active", &self.stroke.is_some())
            .finish()
    }
}

impl SculptingPipeline {
    /// Create a pipeline over `session` with the built-in actions.
    pub fn new(session: SessionState, settings: SculptSettings, brush: Brush) -> Self {
        let undo = MemoryUndoLog::new(settings.max_undo_levels);
        Self {
            session,
            settings,
            brush,
            actions: ActionTable::with_builtins(),
            undo,
            texture: None,
            automask: None,
            stroke: None,
            last_samples: Vec::new(),
            dirty: DirtyVertices::new(),
        }
    }

    /// Set the brush used by the next stroke.
    pub fn set_brush(&mut self, brush: Brush) {
        self.brush = brush;
    }

    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    pub fn set_texture(&mut self, texture: Option<Arc<dyn TextureSampler>>) {
        self.texture = texture;
    }

    /// Automasking applied by the next stroke and by mesh filters.
    pub fn set_automask(&mut self, automask: Option<Arc<dyn AutoMaskProvider>>) {
        self.automask = automask;
    }

    /// Install or replace the action of `tool`.
    pub fn register_action<A: BrushAction + 'static>(&mut self, tool: BrushTool, action: A) {
        self.actions.register(tool, action);
    }

    pub fn undo_history_len(&self) -> usize {
        self.undo.history_len()
    }

    pub fn is_stroke_active(&self) -> bool {
        self.stroke.is_some()
    }

    /// Begin a new stroke with the current brush.
    ///
    /// Fails before any state is created when the tool cannot run on the
    /// mesh, or when a stroke is already active.
    pub fn begin_stroke(&mut self, mode: StrokeMode, mouse: Vec2) -> SculptResult<()> {
        if self.stroke.is_some() {
            return Err(SculptError::StrokeAlreadyActive);
        }
        let tool = self.brush.tool;
        if tool.is_paint() {
            let backend = self.session.geometry.kind();
            if backend != BackendKind::Plain {
                return Err(SculptError::UnsupportedPaintBackend { tool, backend });
            }
            if !self.session.geometry.has_colors() {
                return Err(SculptError::MissingColorAttribute(tool));
            }
        }

        self.session.ensure_tree();
        let mut cache = StrokeCache::begin(
            &self.brush,
            &self.settings,
            &self.session.view,
            &self.session.cursor,
            mode,
            mouse,
        );
        cache.automask = self.automask.clone();
        self.undo.begin(&self.brush.name);
        self.stroke = Some(ActiveStroke {
            cache,
            brush: self.brush.clone(),
            samples: Vec::new(),
            kind: undo_kind_for(&self.brush),
            steps: 0,
        });
        debug!("begin_stroke: {:?} ({:?})", tool, mode);
        Ok(())
    }

    /// Evaluate one stroke step at `sample`.
    pub fn update_step(
        &mut self,
        sample: StrokeSample,
        notifier: &mut dyn RedrawNotifier,
    ) -> SculptResult<StepResult> {
        let Some(stroke) = self.stroke.as_mut() else {
            return Err(SculptError::NoActiveStroke);
        };
        stroke.samples.push(sample);
        let ActiveStroke {
            cache,
            brush,
            kind,
            steps,
            ..
        } = stroke;
        let kind = *kind;

        cache.update_variants(brush, &sample);

        if brush.restores_each_step() && !cache.first_time {
            let snapshots = self.undo.as_snapshots();
            let restored = match kind {
                UndoKind::Position => restore_position_from_undo_step(&mut self.session, snapshots),
                UndoKind::Mask => restore_mask_from_undo_step(&mut self.session, snapshots),
                UndoKind::Color => restore_color_from_undo_step(&mut self.session, snapshots),
            };
            self.session.tree.update_bounds(&self.session.geometry);
            trace!("update_step: restored {} nodes", restored.len());
        }

        let session = &mut self.session;
        let settings = &self.settings;
        let actions = &self.actions;
        let undo = &mut self.undo;
        let dirty = &mut self.dirty;
        let texture = self.texture.as_deref();
        let brush: &Brush = brush;

        let object_bounds = session.object_bounds();
        let mut nodes_gathered = 0;
        let passes = do_symmetrical_brush_actions(cache, brush, settings, &object_bounds, &mut |cache| {
            let nodes = gather_nodes(session, cache, brush);
            if nodes.is_empty() {
                return;
            }
            nodes_gathered += nodes.len();
            undo.push_nodes(&session.geometry, &session.tree, &nodes, kind);

            let mut ctx = BrushContext {
                session: &mut *session,
                cache,
                brush,
                settings,
                undo: &mut *undo,
                texture,
                dirty: &mut *dirty,
            };
            if brush_needs_normal(brush, ctx.cache, texture.is_some()) {
                ctx.update_sculpt_normal(&nodes);
            }
            update_brush_local_mat(ctx.cache);

            actions.run(&mut ctx, &nodes);
            do_autosmooth(&mut ctx, &nodes);
            do_gravity(&mut ctx, &nodes);
        });

        let vertices_modified = self.dirty.len();
        if !self.dirty.is_empty() {
            flush_update_step(&mut self.session, &mut self.dirty, update_type_for(kind), notifier);
        }
        cache.finish_step();
        *steps += 1;

        trace!(
            "update_step: {} passes, {} nodes, {} vertices",
            passes, nodes_gathered, vertices_modified
        );
        Ok(StepResult {
            passes,
            nodes_gathered,
            vertices_modified,
        })
    }

    /// Finish the active stroke and commit its undo step.
    pub fn end_stroke(&mut self) -> SculptResult<StrokeEndResult> {
        let Some(mut stroke) = self.stroke.take() else {
            return Err(SculptError::NoActiveStroke);
        };
        flush_update_done(&mut self.session, update_type_for(stroke.kind));
        self.undo.end();
        stroke.cache.destroy();
        debug!(
            "end_stroke: {} steps, {} samples",
            stroke.steps,
            stroke.samples.len()
        );
        self.last_samples = stroke.samples.clone();
        Ok(StrokeEndResult {
            steps: stroke.steps,
            samples: stroke.samples,
        })
    }

    /// Abort the active stroke and put the mesh back the way it was.
    pub fn cancel_stroke(&mut self, notifier: &mut dyn RedrawNotifier) -> SculptResult<()> {
        let Some(mut stroke) = self.stroke.take() else {
            return Err(SculptError::NoActiveStroke);
        };
        if let Some(step) = self.undo.cancel() {
            self.restore_step(&step, notifier);
        }
        self.dirty.clear();
        stroke.cache.destroy();
        debug!("cancel_stroke: {:?} after {} steps", stroke.brush.tool, stroke.steps);
        Ok(())
    }

    /// Revert the most recent committed step. Returns false when the
    /// history is empty.
    pub fn undo_last(&mut self, notifier: &mut dyn RedrawNotifier) -> SculptResult<bool> {
        if self.stroke.is_some() {
            return Err(SculptError::StrokeAlreadyActive);
        }
        let Some(step) = self.undo.pop_last() else {
            return Ok(false);
        };
        debug!("undo_last: '{}'", step.name);
        self.restore_step(&step, notifier);
        Ok(true)
    }

    fn restore_step(&mut self, step: &crate::undo::UndoStep, notifier: &mut dyn RedrawNotifier) {
        let updated = restore_all(&mut self.session, step);
        self.session.tree.update_bounds(&self.session.geometry);
        for kind in updated {
            flush_update_done(&mut self.session, kind);
            notifier.mark_geometry_changed(kind);
        }
    }

    /// Samples of the active stroke, or of the last finished one, as raw
    /// bytes for recording.
    pub fn recorded_samples(&self) -> &[u8] {
        let samples = match &self.stroke {
            Some(stroke) => &stroke.samples,
            None => &self.last_samples,
        };
        bytemuck::cast_slice(samples)
    }

    /// Run a mesh filter as one undoable operation.
    ///
    /// Continuous filters are evaluated `iterations` times on their own
    /// result; the others are evaluated once at `strength`.
    pub fn run_mesh_filter(
        &mut self,
        filter_settings: MeshFilterSettings,
        iterations: u32,
        notifier: &mut dyn RedrawNotifier,
    ) -> SculptResult<()> {
        if self.stroke.is_some() {
            return Err(SculptError::StrokeAlreadyActive);
        }
        if iterations == 0 {
            warn!("run_mesh_filter: zero iterations");
            return Ok(());
        }
        let continuous = filter_settings.filter_type.is_continuous();
        let strength = filter_settings.strength;
        self.undo.begin("Mesh Filter");
        let mut filter = MeshFilter::begin(&mut self.session, &self.settings, &mut self.undo, filter_settings);
        if let Some(automask) = &self.automask {
            filter = filter.with_automask(Arc::clone(automask));
        }
        if continuous {
            filter.repeat(&mut self.session, &self.undo, iterations, notifier);
        } else {
            filter.apply(&mut self.session, &self.undo, strength, notifier);
        }
        filter.end(&mut self.session);
        self.undo.end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brushes::test_support::grid_plane;
    use crate::geometry::{Geometry, GridMesh};
    use glam::Vec3;

    #[derive(Default)]
    struct CountingNotifier {
        positions: usize,
        masks: usize,
    }

    impl RedrawNotifier for CountingNotifier {
        fn mark_geometry_changed(&mut self, kind: UpdateType) {
            match kind {
                UpdateType::Position => self.positions += 1,
                UpdateType::Mask => self.masks += 1,
                UpdateType::Color => {}
            }
        }
    }

    fn pipeline(brush: Brush) -> SculptingPipeline {
        let settings = SculptSettings::without_symmetry();
        let session = SessionState::new(grid_plane(9, 0.125), &settings);
        let mut brush = brush;
        brush.radius = 0.3;
        SculptingPipeline::new(session, settings, brush)
    }

    fn z_at_origin(pipeline: &SculptingPipeline) -> f32 {
        let geometry = &pipeline.session.geometry;
        geometry.position(geometry.vertex_handle(40)).z
    }

    fn sample(x: f32) -> StrokeSample {
        StrokeSample::at(Vec3::new(x, 0.0, 0.0), Vec3::Z)
    }

    #[test]
    fn test_draw_stroke_lifecycle() {
        let mut pipeline = pipeline(Brush::draw());
        let mut notifier = CountingNotifier::default();
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        assert!(pipeline.is_stroke_active());

        let result = pipeline.update_step(sample(0.0), &mut notifier).unwrap();
        assert_eq!(result.passes, 1);
        assert!(result.nodes_gathered > 0);
        assert!(result.vertices_modified > 0);
        assert_eq!(notifier.positions, 1);
        assert!(z_at_origin(&pipeline) > 0.0);

        let end = pipeline.end_stroke().unwrap();
        assert_eq!(end.steps, 1);
        assert_eq!(end.samples.len(), 1);
        assert!(!pipeline.is_stroke_active());
        assert_eq!(pipeline.undo_history_len(), 1);
        assert_eq!(pipeline.session.tree.stale_count(), 0);
    }

    #[test]
    fn test_stroke_lifecycle_errors() {
        let mut pipeline = pipeline(Brush::draw());
        assert!(matches!(
            pipeline.update_step(sample(0.0), &mut CountingNotifier::default()),
            Err(SculptError::NoActiveStroke)
        ));
        assert!(matches!(pipeline.end_stroke(), Err(SculptError::NoActiveStroke)));
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        assert!(matches!(
            pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO),
            Err(SculptError::StrokeAlreadyActive)
        ));
    }

    #[test]
    fn test_paint_on_grid_is_rejected_before_stroke() {
        let settings = SculptSettings::without_symmetry();
        let grid = GridMesh::new(3, vec![Vec3::ZERO; 9], vec![0]).unwrap();
        let session = SessionState::new(Geometry::Grid(grid), &settings);
        let mut pipeline = SculptingPipeline::new(session, settings, Brush::paint());
        let err = pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap_err();
        assert!(matches!(
            err,
            SculptError::UnsupportedPaintBackend {
                tool: BrushTool::Paint,
                backend: BackendKind::Grid
            }
        ));
        assert!(!pipeline.is_stroke_active());
    }

    #[test]
    fn test_cancel_restores_mesh() {
        let mut pipeline = pipeline(Brush::draw());
        let mut notifier = CountingNotifier::default();
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        pipeline.update_step(sample(0.0), &mut notifier).unwrap();
        pipeline.update_step(sample(0.05), &mut notifier).unwrap();
        assert!(z_at_origin(&pipeline) > 0.0);

        pipeline.cancel_stroke(&mut notifier).unwrap();
        assert_eq!(z_at_origin(&pipeline), 0.0);
        assert_eq!(pipeline.undo_history_len(), 0);
        assert_eq!(pipeline.session.tree.stale_count(), 0);
    }

    #[test]
    fn test_undo_last_reverts_committed_stroke() {
        let mut pipeline = pipeline(Brush::draw());
        let mut notifier = CountingNotifier::default();
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        pipeline.update_step(sample(0.0), &mut notifier).unwrap();
        pipeline.end_stroke().unwrap();

        assert!(pipeline.undo_last(&mut notifier).unwrap());
        assert_eq!(z_at_origin(&pipeline), 0.0);
        assert!(!pipeline.undo_last(&mut notifier).unwrap());
    }

    #[test]
    fn test_symmetry_runs_mirrored_passes() {
        let mut pipeline = pipeline(Brush::draw());
        pipeline.settings.symmetry = 1;
        let mut notifier = CountingNotifier::default();
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        let result = pipeline.update_step(sample(0.25), &mut notifier).unwrap();
        assert_eq!(result.passes, 2);
        // One notification per flush, not per pass
        assert_eq!(notifier.positions, 1);

        let geometry = &pipeline.session.geometry;
        let left = geometry.position(geometry.vertex_handle(38)).z;
        let right = geometry.position(geometry.vertex_handle(42)).z;
        assert!(right > 0.0);
        assert!((left - right).abs() < 1e-5);
    }

    #[test]
    fn test_mask_stroke_flushes_mask() {
        let mut pipeline = pipeline(Brush::mask());
        let mut notifier = CountingNotifier::default();
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        pipeline.update_step(sample(0.0), &mut notifier).unwrap();
        assert_eq!(notifier.masks, 1);
        assert_eq!(notifier.positions, 0);
        pipeline.end_stroke().unwrap();

        let geometry = &pipeline.session.geometry;
        assert!(geometry.mask(geometry.vertex_handle(40)) > 0.0);
    }

    #[test]
    fn test_grab_restores_between_steps() {
        let mut pipeline = pipeline(Brush::grab());
        let mut notifier = CountingNotifier::default();
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        pipeline.update_step(sample(0.0), &mut notifier).unwrap();
        pipeline
            .update_step(StrokeSample::at(Vec3::new(0.0, 0.0, 0.1), Vec3::Z), &mut notifier)
            .unwrap();
        let once = z_at_origin(&pipeline);
        pipeline
            .update_step(StrokeSample::at(Vec3::new(0.0, 0.0, 0.1), Vec3::Z), &mut notifier)
            .unwrap();
        // Same cursor position, same result
        assert!(once > 0.0);
        assert!((z_at_origin(&pipeline) - once).abs() < 1e-5);
    }

    #[test]
    fn test_missing_action_leaves_mesh_untouched() {
        let mut pipeline = pipeline(Brush {
            tool: BrushTool::Cloth,
            ..Brush::draw()
        });
        let mut notifier = CountingNotifier::default();
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        let result = pipeline.update_step(sample(0.0), &mut notifier).unwrap();
        assert_eq!(result.vertices_modified, 0);
        assert_eq!(notifier.positions, 0);
        assert_eq!(z_at_origin(&pipeline), 0.0);
    }

    #[test]
    fn test_recorded_samples_are_bytes() {
        let mut pipeline = pipeline(Brush::draw());
        let mut notifier = CountingNotifier::default();
        pipeline.begin_stroke(StrokeMode::Normal, Vec2::ZERO).unwrap();
        pipeline.update_step(sample(0.0), &mut notifier).unwrap();
        pipeline.update_step(sample(0.1), &mut notifier).unwrap();
        let bytes = pipeline.recorded_samples().to_vec();
        assert_eq!(bytes.len(), 2 * std::mem::size_of::<StrokeSample>());
        pipeline.end_stroke().unwrap();
        assert_eq!(pipeline.recorded_samples(), bytes.as_slice());

        let samples: &[StrokeSample] = bytemuck::cast_slice(&bytes);
        assert_eq!(samples[1].location, [0.1, 0.0, 0.0]);
    }

    #[test]
    fn test_mesh_filter_is_undoable() {
        let mut pipeline = pipeline(Brush::draw());
        let mut notifier = CountingNotifier::default();
        let filter = MeshFilterSettings {
            filter_type: crate::filter::FilterType::Scale,
            strength: 0.5,
            ..Default::default()
        };
        pipeline.run_mesh_filter(filter, 1, &mut notifier).unwrap();
        let corner = {
            let geometry = &pipeline.session.geometry;
            geometry.position(geometry.vertex_handle(0))
        };
        assert!((corner.x + 0.75).abs() < 1e-5);
        assert_eq!(pipeline.undo_history_len(), 1);

        pipeline.undo_last(&mut notifier).unwrap();
        let geometry = &pipeline.session.geometry;
        assert!((geometry.position(geometry.vertex_handle(0)).x + 0.5).abs() < 1e-5);
    }
}
