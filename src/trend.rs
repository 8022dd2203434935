// 📈 Trend Analyzer - OLS of annual proportion on calendar year
// Reports slope, intercept, r², two-tailed p-value, standard error and a
// confidence interval, plus three independent residual diagnostics.
// Direction (slope sign) and significance (p < alpha) are classified
// separately and never derived from each other.

use crate::annual::AnnualProportion;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::stats;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Residual or response variance below this share of Σy² counts as zero
const NEGLIGIBLE_VARIANCE: f64 = 1e-20;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Flat,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Flat => "flat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Pass,
    Fail,
    NotTested,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub name: String,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    /// Human-readable pass criterion
    pub threshold: String,
    pub status: DiagnosticStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Diagnostic {
    fn not_tested(name: &str, threshold: String, note: impl Into<String>) -> Self {
        Diagnostic {
            name: name.to_string(),
            statistic: None,
            p_value: None,
            threshold,
            status: DiagnosticStatus::NotTested,
            note: Some(note.into()),
        }
    }

    pub fn failed(&self) -> bool {
        self.status == DiagnosticStatus::Fail
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// e.g. 0.95
    pub level: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Fitted trend. x is the calendar year: `intercept` is the fitted value at
/// year 0, `baseline_proportion` the fitted value at the first year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendModel {
    pub years: Vec<i32>,
    pub proportions: Vec<f64>,
    /// Years present in the input but left out for having no appointments
    pub excluded_years: Vec<i32>,
    pub n_points: usize,
    pub degrees_of_freedom: usize,
    pub slope: f64,
    pub intercept: f64,
    pub baseline_year: i32,
    pub baseline_proportion: f64,
    pub r_squared: f64,
    pub std_error: f64,
    /// None when the slope has zero standard error
    pub t_statistic: Option<f64>,
    pub p_value: f64,
    pub confidence_interval: ConfidenceInterval,
    /// slope × (last year - first year)
    pub total_change: f64,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    pub autocorrelation: Diagnostic,
    pub heteroscedasticity: Diagnostic,
    pub normality: Diagnostic,
    pub alpha: f64,
    pub direction: TrendDirection,
    pub significant: bool,
}

impl TrendModel {
    pub fn diagnostics(&self) -> [&Diagnostic; 3] {
        [&self.autocorrelation, &self.heteroscedasticity, &self.normality]
    }

    pub fn failed_diagnostics(&self) -> Vec<&str> {
        self.diagnostics()
            .iter()
            .filter(|d| d.failed())
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Plain-language summary
    pub fn conclusion(&self) -> String {
        let first = self.years.first().copied().unwrap_or_default();
        let last = self.years.last().copied().unwrap_or_default();

        let mut text = format!(
            "Between {} and {}, the government-wide reappointment proportion shows {} trend \
             ({:+.2} percentage points per year, {:+.2} points over the period). ",
            first,
            last,
            match self.direction {
                TrendDirection::Increasing => "an increasing",
                TrendDirection::Decreasing => "a decreasing",
                TrendDirection::Flat => "a flat",
            },
            self.slope * 100.0,
            self.total_change * 100.0,
        );

        text.push_str(&format!(
            "The slope is {} at alpha = {} (p = {:.4}, R² = {:.3}, {:.0}% CI [{:+.4}, {:+.4}]).",
            if self.significant {
                "statistically significant"
            } else {
                "not statistically significant"
            },
            self.alpha,
            self.p_value,
            self.r_squared,
            self.confidence_interval.level * 100.0,
            self.confidence_interval.lower,
            self.confidence_interval.upper,
        ));

        let failed = self.failed_diagnostics();
        if !failed.is_empty() {
            text.push_str(&format!(
                " Residual diagnostics flagged: {}; interpret the p-value with caution.",
                failed.join(", ")
            ));
        }
        text
    }
}

/// Significance is strict: p equal to alpha is not significant
pub fn is_significant(p_value: f64, alpha: f64) -> bool {
    p_value < alpha
}

pub fn classify_direction(slope: f64, flat_tolerance: f64) -> TrendDirection {
    if slope.abs() <= flat_tolerance {
        TrendDirection::Flat
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    }
}

// ============================================================================
// ANALYZER
// ============================================================================

pub struct TrendAnalyzer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> TrendAnalyzer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        TrendAnalyzer { config }
    }

    /// Fit over years with at least one appointment
    pub fn fit(&self, annual: &[AnnualProportion]) -> PipelineResult<TrendModel> {
        let mut points: Vec<&AnnualProportion> = annual.iter().filter(|a| a.is_usable()).collect();
        points.sort_by_key(|a| a.year);
        let excluded_years: Vec<i32> = annual
            .iter()
            .filter(|a| !a.is_usable())
            .map(|a| a.year)
            .collect();

        let required = self.config.min_regression_points.max(3);
        let insufficient = PipelineError::InsufficientData {
            found: points.len(),
            required,
        };
        if points.len() < required {
            return Err(insufficient);
        }

        let years: Vec<i32> = points.iter().map(|a| a.year).collect();
        let proportions: Vec<f64> = points.iter().map(|a| a.proportion).collect();
        let x: Vec<f64> = years.iter().map(|&y| f64::from(y)).collect();

        // Distinct years are guaranteed upstream; a repeated single year has no spread
        let fit = stats::least_squares(&x, &proportions).ok_or(insufficient)?;

        let n = points.len();
        let df = n - 2;
        let scale: f64 = proportions.iter().map(|y| y * y).sum();
        let constant_response = fit.sst <= NEGLIGIBLE_VARIANCE * scale;
        let perfect_fit = fit.sse <= NEGLIGIBLE_VARIANCE * scale;

        let slope = if constant_response { 0.0 } else { fit.slope };
        let intercept = fit.y_mean - slope * fit.x_mean;

        let std_error = if perfect_fit {
            0.0
        } else {
            (fit.sse / df as f64 / fit.sxx).sqrt()
        };

        let (t_statistic, p_value) = if std_error > 0.0 {
            let t = slope / std_error;
            (Some(t), stats::student_t_two_tailed_p(t, df as f64))
        } else if slope != 0.0 {
            (None, 0.0)
        } else {
            (None, 1.0)
        };

        let alpha = self.config.alpha;
        let t_critical = stats::student_t_quantile(1.0 - alpha / 2.0, df as f64);
        let confidence_interval = ConfidenceInterval {
            level: 1.0 - alpha,
            lower: slope - t_critical * std_error,
            upper: slope + t_critical * std_error,
        };

        let r_squared = if constant_response {
            0.0
        } else if perfect_fit {
            1.0
        } else {
            fit.r_squared().unwrap_or(0.0)
        };

        let first_year = years[0];
        let last_year = years[n - 1];

        let residual_variance_zero = perfect_fit || constant_response;
        let autocorrelation = self.durbin_watson(&fit.residuals, residual_variance_zero);
        let heteroscedasticity =
            self.heteroscedasticity(&x, &fit.residuals, &fit.fitted, residual_variance_zero);
        let normality = self.normality(&fit.residuals, residual_variance_zero);

        let model = TrendModel {
            excluded_years,
            n_points: n,
            degrees_of_freedom: df,
            slope,
            intercept,
            baseline_year: first_year,
            baseline_proportion: intercept + slope * f64::from(first_year),
            r_squared,
            std_error,
            t_statistic,
            p_value,
            confidence_interval,
            total_change: slope * f64::from(last_year - first_year),
            fitted: fit.fitted,
            residuals: fit.residuals,
            autocorrelation,
            heteroscedasticity,
            normality,
            alpha,
            direction: classify_direction(slope, self.config.flat_slope_tolerance),
            significant: is_significant(p_value, alpha),
            years,
            proportions,
        };

        info!(
            points = model.n_points,
            slope = model.slope,
            r_squared = model.r_squared,
            p_value = model.p_value,
            direction = model.direction.as_str(),
            significant = model.significant,
            "fitted trend"
        );
        for failed in model.failed_diagnostics() {
            warn!(diagnostic = failed, "residual diagnostic failed");
        }

        Ok(model)
    }

    fn durbin_watson(&self, residuals: &[f64], variance_zero: bool) -> Diagnostic {
        const NAME: &str = "durbin_watson";
        let (lower, upper) = self.config.durbin_watson_bounds;
        let threshold = format!("statistic within [{}, {}]", lower, upper);

        if variance_zero {
            return Diagnostic::not_tested(NAME, threshold, "residuals have no variance");
        }

        match stats::durbin_watson(residuals) {
            Some(dw) => Diagnostic {
                name: NAME.to_string(),
                statistic: Some(dw),
                p_value: None,
                threshold,
                status: if (lower..=upper).contains(&dw) {
                    DiagnosticStatus::Pass
                } else {
                    DiagnosticStatus::Fail
                },
                note: None,
            },
            None => Diagnostic::not_tested(NAME, threshold, "statistic not computable"),
        }
    }

    fn heteroscedasticity(
        &self,
        x: &[f64],
        residuals: &[f64],
        fitted: &[f64],
        variance_zero: bool,
    ) -> Diagnostic {
        let alpha = self.config.alpha;

        if variance_zero {
            return Diagnostic::not_tested(
                "breusch_pagan",
                format!("p-value >= {}", alpha),
                "residuals have no variance",
            );
        }

        if residuals.len() >= self.config.breusch_pagan_min_points {
            if let Some((lm, p)) = stats::breusch_pagan(x, residuals) {
                return Diagnostic {
                    name: "breusch_pagan".to_string(),
                    statistic: Some(lm),
                    p_value: Some(p),
                    threshold: format!("p-value >= {}", alpha),
                    status: if p >= alpha {
                        DiagnosticStatus::Pass
                    } else {
                        DiagnosticStatus::Fail
                    },
                    note: None,
                };
            }
        }

        // Fallback: correlation between |residual| and fitted value
        const NAME: &str = "residual_fitted_correlation";
        let limit = self.config.heteroscedasticity_corr_threshold;
        let threshold = format!("|r| <= {}", limit);
        let absolute: Vec<f64> = residuals.iter().map(|e| e.abs()).collect();

        match stats::pearson_correlation(&absolute, fitted) {
            Some(r) => Diagnostic {
                name: NAME.to_string(),
                statistic: Some(r),
                p_value: None,
                threshold,
                status: if r.abs() <= limit {
                    DiagnosticStatus::Pass
                } else {
                    DiagnosticStatus::Fail
                },
                note: Some(format!(
                    "fewer than {} points or Breusch-Pagan not computable",
                    self.config.breusch_pagan_min_points
                )),
            },
            None => Diagnostic::not_tested(NAME, threshold, "correlation not computable"),
        }
    }

    fn normality(&self, residuals: &[f64], variance_zero: bool) -> Diagnostic {
        const NAME: &str = "shapiro_wilk";
        let alpha = self.config.alpha;
        let threshold = format!("p-value >= {}", alpha);

        if residuals.len() < self.config.shapiro_min_points {
            return Diagnostic::not_tested(
                NAME,
                threshold,
                format!(
                    "{} residuals, at least {} required",
                    residuals.len(),
                    self.config.shapiro_min_points
                ),
            );
        }
        if variance_zero {
            return Diagnostic::not_tested(NAME, threshold, "residuals have no variance");
        }

        match stats::shapiro_wilk(residuals) {
            Some((w, p)) => Diagnostic {
                name: NAME.to_string(),
                statistic: Some(w),
                p_value: Some(p),
                threshold,
                status: if p >= alpha {
                    DiagnosticStatus::Pass
                } else {
                    DiagnosticStatus::Fail
                },
                note: None,
            },
            None => Diagnostic::not_tested(NAME, threshold, "sample outside 3..=5000"),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
