//! Error types for stroke evaluation.

use chisel_config::ConfigError;
use thiserror::Error;

use crate::geometry::BackendKind;
use crate::types::BrushTool;

/// Errors that can occur while setting up or driving a stroke.
///
/// Per-vertex evaluation never fails; degenerate input produces empty or
/// identity results instead. Only the stroke lifecycle and backend
/// construction report errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SculptError {
    /// The tool needs an attribute the backend cannot provide.
    #[error("{tool:?} cannot paint on a {backend:?} mesh")]
    UnsupportedPaintBackend { tool: BrushTool, backend: BackendKind },

    /// The mesh has no color attribute to paint into.
    #[error("{0:?} requires a color attribute")]
    MissingColorAttribute(BrushTool),

    /// A stroke is already running.
    #[error("A stroke is already active")]
    StrokeAlreadyActive,

    /// An operation needs an active stroke.
    #[error("No stroke is active")]
    NoActiveStroke,

    /// Backend construction received inconsistent topology.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// An attribute array does not match the element count.
    #[error("Attribute '{name}' has {actual} values, expected {expected}")]
    AttributeLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Settings failed to load or validate.
    #[error("Invalid settings: {0}")]
    Config(#[from] ConfigError),

    /// A brush failed to deserialize.
    #[error("Invalid brush: {0}")]
    Brush(#[from] serde_json::Error),
}

/// Result type for sculpt operations.
pub type SculptResult<T> = Result<T, SculptError>;

/// Check an attribute length against the element count.
pub(crate) fn check_len<T>(name: &'static str, values: &[T], expected: usize) -> SculptResult<()> {
    if values.len() != expected {
        return Err(SculptError::AttributeLength {
            name,
            expected,
            actual: values.len(),
        });
    }
    Ok(())
}
