// 🔗 Pipeline - Normalizer → Resolver → Marker → Aggregator → Annual → Trend
// Each stage is a pure transformation; the run report carries every count
// needed to reconcile rows in against rows out.

use crate::aggregator::{
    AggregationOutcome, AggregationSummary, Aggregator, IntegrityWarning, YearlyTopOrg,
};
use crate::annual::{aggregate_by_year, AnnualProportion};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::identity::IdentityResolver;
use crate::loader;
use crate::marker::{MarkingSummary, ReappointmentMarker};
use crate::normalizer::{NormalizationSummary, NormalizationTable, RecordNormalizer};
use crate::record::{MarkedRecord, RawAppointment};
use crate::trend::{TrendAnalyzer, TrendModel};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub crate_version: String,
    pub normalization_table_version: String,
    pub normalization_table_fingerprint: String,
    pub normalization: NormalizationSummary,
    pub marking: MarkingSummary,
    pub aggregation: AggregationSummary,
    pub integrity_warnings: Vec<IntegrityWarning>,
    pub annual: Vec<AnnualProportion>,
    pub trend: Option<TrendModel>,
    /// Set when the trend stage could not run; upstream output stays valid
    pub trend_error: Option<String>,
    pub conclusion: String,
}

impl PipelineReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records: {} marked, {} unresolved identity, {} missing year | \
             {} reappointments | {} org-year rows ({} integrity warnings) | {} years",
            self.marking.records_in,
            self.marking.marked,
            self.marking.unresolved_identity,
            self.marking.missing_year,
            self.marking.reappointments,
            self.aggregation.pairs_observed + self.aggregation.pairs_filled,
            self.integrity_warnings.len(),
            self.annual.len(),
        )
    }

    pub fn has_integrity_warnings(&self) -> bool {
        !self.integrity_warnings.is_empty()
    }
}

/// Every stage's output from one run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub marked: Vec<MarkedRecord>,
    /// Stage 4-6 tables, all from one tally
    pub aggregation: AggregationOutcome,
    pub top_orgs: Vec<YearlyTopOrg>,
    pub annual: Vec<AnnualProportion>,
    pub report: PipelineReport,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: RecordNormalizer,
}

impl Pipeline {
    /// Pipeline with the built-in normalization table
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        Self::with_table(config, NormalizationTable::builtin())
    }

    pub fn with_table(config: PipelineConfig, table: NormalizationTable) -> PipelineResult<Self> {
        config.validate()?;
        let normalizer = RecordNormalizer::with_table(table)?;
        Ok(Pipeline { config, normalizer })
    }

    /// Honors `config.normalization_table` when set
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let table = match &config.normalization_table {
            Some(path) => NormalizationTable::from_file(path)?,
            None => NormalizationTable::builtin(),
        };
        Ok(Self::with_table(config, table)?)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, raws: &[RawAppointment]) -> PipelineResult<PipelineOutput> {
        if raws.is_empty() {
            return Err(PipelineError::EmptyInput {
                what: "no appointment records".to_string(),
            });
        }

        let (records, normalization) = self.normalizer.normalize_all(raws);

        let marker = ReappointmentMarker::new(IdentityResolver::new(&self.normalizer));
        let (marked, marking) = marker.mark(&records);

        let aggregator = Aggregator::new(&self.normalizer, &self.config);
        let aggregation = aggregator.aggregate(&marked);
        let top_orgs = aggregator.top_org_by_year(&aggregation.aggregates);

        let annual = aggregate_by_year(&aggregation.aggregates);

        let (trend, trend_error) = match TrendAnalyzer::new(&self.config).fit(&annual) {
            Ok(model) => (Some(model), None),
            Err(err @ PipelineError::InsufficientData { .. }) => {
                warn!(error = %err, "trend analysis skipped");
                (None, Some(err.to_string()))
            }
            Err(err) => return Err(err),
        };

        let conclusion = match (&trend, &trend_error) {
            (Some(model), _) => model.conclusion(),
            (None, Some(err)) => format!("No trend conclusion: {}.", err),
            (None, None) => String::new(),
        };

        let table = self.normalizer.table();
        let report = PipelineReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            crate_version: crate::VERSION.to_string(),
            normalization_table_version: table.version.clone(),
            normalization_table_fingerprint: table.fingerprint(),
            normalization,
            marking,
            aggregation: aggregation.summary.clone(),
            integrity_warnings: aggregation.warnings.clone(),
            annual: annual.clone(),
            trend,
            trend_error,
            conclusion,
        };

        info!(summary = %report.summary(), "pipeline complete");

        Ok(PipelineOutput {
            marked,
            aggregation,
            top_orgs,
            annual,
            report,
        })
    }

    /// Write every stage table and the report into `dir`
    pub fn write_outputs(&self, output: &PipelineOutput, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        loader::write_marked(&dir.join("step3_marked.csv"), &output.marked)?;
        loader::write_counts(
            &dir.join("step4_appointment_counts.csv"),
            &output.aggregation.appointment_counts,
            "total_appointments",
        )?;
        loader::write_counts(
            &dir.join("step5_reappointment_counts.csv"),
            &output.aggregation.reappointment_counts,
            "reappointment_count",
        )?;
        loader::write_rates(
            &dir.join("step6_rates.csv"),
            &output.aggregation.aggregates,
            self.config.clamp_rates_for_display,
        )?;
        loader::write_top_orgs(&dir.join("step7_yearly_max_rates.csv"), &output.top_orgs)?;
        loader::write_annual(&dir.join("step8_annual_proportions.csv"), &output.annual)?;
        loader::write_json(&dir.join("step9_trend_report.json"), &output.report)?;

        info!(dir = %dir.display(), "wrote pipeline outputs");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
