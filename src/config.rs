// ⚙️ Pipeline Configuration - explicit settings passed into every stage
// Loaded from JSON (every field optional) or built with defaults.

use crate::error::{PipelineError, PipelineResult};
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Significance level for the slope test and the confidence interval
    pub alpha: f64,

    /// Minimum number of valid years before a regression is attempted
    pub min_regression_points: usize,

    /// Durbin-Watson statistic outside [lower, upper] flags autocorrelation
    pub durbin_watson_bounds: (f64, f64),

    /// Shapiro-Wilk is reported as "not tested" below this many residuals
    pub shapiro_min_points: usize,

    /// Below this many points the residual-vs-fitted correlation replaces Breusch-Pagan
    pub breusch_pagan_min_points: usize,

    /// |corr(|residual|, fitted)| above this flags heteroscedasticity (fallback only)
    pub heteroscedasticity_corr_threshold: f64,

    /// |slope| at or below this is classified as flat
    pub flat_slope_tolerance: f64,

    /// Emit zero rows for every unobserved (org, year) combination
    pub fill_missing_pairs: bool,

    /// Clamp rates to [0, 1] in display output (persisted rates are never clamped)
    pub clamp_rates_for_display: bool,

    /// Minimum appointments an org needs to be considered for the yearly top rate
    pub top_org_min_appointments: u64,

    /// Optional JSON normalization table; the built-in table is used otherwise
    pub normalization_table: Option<PathBuf>,

    /// Lower-cased header name -> canonical column name
    pub column_aliases: BTreeMap<String, String>,
}

impl PipelineConfig {
    pub fn new() -> Self {
        PipelineConfig {
            alpha: 0.05,
            min_regression_points: 3,
            durbin_watson_bounds: (1.5, 2.5),
            shapiro_min_points: 8,
            breusch_pagan_min_points: 5,
            heteroscedasticity_corr_threshold: 0.5,
            flat_slope_tolerance: 0.0,
            fill_missing_pairs: true,
            clamp_rates_for_display: false,
            top_org_min_appointments: 1,
            normalization_table: None,
            column_aliases: default_column_aliases(),
        }
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the statistics meaningless
    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(PipelineError::InvalidConfig {
                reason: format!("alpha must be in (0, 1), got {}", self.alpha),
            });
        }

        if self.min_regression_points < 3 {
            return Err(PipelineError::InvalidConfig {
                reason: format!(
                    "min_regression_points must be at least 3, got {}",
                    self.min_regression_points
                ),
            });
        }

        let (lower, upper) = self.durbin_watson_bounds;
        if lower >= upper {
            return Err(PipelineError::InvalidConfig {
                reason: format!("durbin_watson_bounds inverted: [{}, {}]", lower, upper),
            });
        }

        if self.flat_slope_tolerance < 0.0 {
            return Err(PipelineError::InvalidConfig {
                reason: "flat_slope_tolerance must be non-negative".to_string(),
            });
        }

        Ok(())
    }

    /// Resolve a raw header to its canonical column name, if known
    pub fn canonical_column(&self, header: &str) -> Option<&str> {
        let key = header.trim().to_lowercase();
        self.column_aliases.get(&key).map(|s| s.as_str())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_column_aliases() -> BTreeMap<String, String> {
    let table: &[(&str, &[&str])] = &[
        ("reappointed", &["reappointed", "reappointment", "re-appointed", "reappointed?"]),
        ("name", &["name", "appointee", "full name", "appointee name"]),
        ("position", &["position", "title", "position title", "role"]),
        ("org", &["org", "organization", "organisation", "agency", "body"]),
        ("year", &["year", "source_year", "data_year", "fiscal year"]),
    ];

    let mut aliases = BTreeMap::new();
    for (canonical, variants) in table {
        for variant in variants.iter() {
            aliases.insert(variant.to_string(), canonical.to_string());
        }
    }
    aliases
}

// ============================================================================
// TESTS
// ============================================================================
