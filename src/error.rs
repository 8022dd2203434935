// ⚠️ Error taxonomy for the reappointment pipeline
// Structural errors abort a run, statistical precondition errors abort only
// the trend stage. Per-record problems are never errors: they are counted.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// A required column is absent from an input table
    #[error("Required column missing: '{column}' in {source_name}")]
    MissingColumn { column: String, source_name: String },

    /// Input contained no rows at all
    #[error("Empty input: {what}")]
    EmptyInput { what: String },

    /// Regression needs at least `required` usable (year, proportion) points
    #[error("Insufficient data for regression: {found} valid years, at least {required} required")]
    InsufficientData { found: usize, required: usize },

    #[error("Invalid normalization table: {reason}")]
    InvalidNormalizationTable { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

// ============================================================================
// TESTS
// ============================================================================
