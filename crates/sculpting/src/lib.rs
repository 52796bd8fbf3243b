//! Brush-stroke evaluation core for mesh sculpting.
//!
//! This crate turns a stream of stroke samples into vertex displacement on
//! three kinds of meshes:
//! - Plain polygon meshes with optional deform matrices and shape keys
//! - Multiresolution subdivision grids
//! - Dynamic topology meshes
//!
//! # Architecture
//!
//! A stroke is evaluated one step at a time. Each step runs once per
//! symmetric copy of the brush (mirror, radial and tiling passes). Every
//! pass gathers the spatial-tree nodes under the brush, snapshots them for
//! undo, computes per-vertex weights and hands them to the tool's action,
//! which writes translations through a common apply stage.
//!
//! ## Key Components
//!
//! - **Geometry**: One facade over the three mesh backends
//! - **Brush test / falloff**: Distance tests and falloff curves
//! - **Factors**: Per-vertex weight pipeline
//! - **Symmetry**: Mirror, radial and tiled pass driver
//! - **Cache**: Per-stroke state machine
//! - **Apply**: Lock, clip, crazyspace and shape key aware writes, flush
//! - **Brushes**: Built-in brush actions
//! - **Filter**: Whole-mesh filters
//! - **Pipeline**: Orchestrates begin → steps → end, cancel and undo

pub mod apply;
pub mod brush;
pub mod brushes;
pub mod cache;
pub mod error;
pub mod factors;
pub mod falloff;
pub mod filter;
pub mod geometry;
pub mod orientation;
pub mod pipeline;
pub mod reduce;
pub mod session;
pub mod spatial;
pub mod symmetry;
pub mod types;
pub mod undo;

pub use apply::{NoRedraw, RedrawNotifier, UpdateType};
pub use brush::Brush;
pub use brushes::{ActionTable, BrushAction, BrushContext};
pub use cache::{Cursor, StrokeCache, StrokeMode, ViewContext};
pub use error::{SculptError, SculptResult};
pub use factors::{AutoMaskProvider, TextureSampler};
pub use filter::{FilterOrientation, FilterType, MeshFilter, MeshFilterSettings};
pub use geometry::{BackendKind, Geometry, VertexHandle};
pub use pipeline::{SculptingPipeline, StepResult, StrokeEndResult};
pub use session::SessionState;
pub use spatial::{NodeId, SpatialGather, SpatialTree};
pub use types::{BrushTool, FalloffShape, StrokeSample};
pub use undo::{MemoryUndoLog, SnapshotSource, UndoKind, UndoLog};
