// Reappointment Trends - Core Library
// Exposes every pipeline stage for use in the CLI and tests

pub mod error;
pub mod config;
pub mod record;
pub mod normalizer;  // Text normalization + year parsing
pub mod identity;    // Identity keys
pub mod marker;      // Reappointment marking
pub mod aggregator;  // Org-year counts + rates
pub mod annual;      // Government-wide annual proportions
pub mod stats;       // Distributions + regression primitives
pub mod trend;       // Trend regression + diagnostics
pub mod loader;      // CSV interchange
pub mod pipeline;

// Re-export commonly used types
pub use error::{PipelineError, PipelineResult};
pub use config::PipelineConfig;
pub use record::{
    AppointmentRecord, MarkStatus, MarkedRecord, RawAppointment, Reappointed,
};
pub use normalizer::{NormalizationSummary, NormalizationTable, RecordNormalizer};
pub use identity::{IdentityKey, IdentityResolver};
pub use marker::{MarkingSummary, ReappointmentMarker};
pub use aggregator::{
    AggregationOutcome, AggregationSummary, Aggregator, IntegrityFlag, IntegrityWarning,
    OrgYearAggregate, OrgYearCount, YearlyTopOrg,
};
pub use annual::{aggregate_by_year, AnnualProportion};
pub use trend::{
    ConfidenceInterval, Diagnostic, DiagnosticStatus, TrendAnalyzer, TrendDirection, TrendModel,
};
pub use pipeline::{Pipeline, PipelineOutput, PipelineReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
