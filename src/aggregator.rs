// 📊 Aggregator - organization-year counts and reappointment rates
// Totals and reappointment counts are tallied separately, then merged over
// the full org x year grid. Anomalies are flagged, never clamped away.

use crate::config::PipelineConfig;
use crate::normalizer::RecordNormalizer;
use crate::record::MarkedRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

// ============================================================================
// TYPES
// ============================================================================

/// One (org, year) count - stage 4 totals or stage 5 reappointments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgYearCount {
    pub org: String,
    pub year: i32,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFlag {
    /// More reappointments than appointments
    CountExceedsTotal,
    /// Rate above 100%
    RateAboveOne,
    /// Reappointments reported for a pair with no known total
    UnknownTotal,
}

impl IntegrityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityFlag::CountExceedsTotal => "count_exceeds_total",
            IntegrityFlag::RateAboveOne => "rate_above_one",
            IntegrityFlag::UnknownTotal => "unknown_total",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgYearAggregate {
    pub org: String,
    pub year: i32,
    pub total_appointments: u64,
    pub reappointment_count: u64,
    /// 0 when both counts are 0; NaN only when the rate cannot be computed
    pub reappointment_rate: f64,
    pub flags: Vec<IntegrityFlag>,
}

impl OrgYearAggregate {
    pub fn is_anomalous(&self) -> bool {
        !self.flags.is_empty()
    }

    /// Rate for display; clamping is the caller's explicit choice
    pub fn display_rate(&self, clamp: bool) -> f64 {
        if clamp && self.reappointment_rate.is_finite() {
            self.reappointment_rate.clamp(0.0, 1.0)
        } else {
            self.reappointment_rate
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityWarning {
    pub org: String,
    pub year: i32,
    pub total_appointments: u64,
    pub reappointment_count: u64,
    pub flags: Vec<IntegrityFlag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationSummary {
    pub records_in: usize,
    pub records_aggregated: usize,
    pub excluded_missing_org: usize,
    pub excluded_missing_year: usize,
    /// Pairs with at least one appointment or reappointment
    pub pairs_observed: usize,
    /// Zero rows added by the grid fill
    pub pairs_filled: usize,
    pub organizations: usize,
    pub years: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationOutcome {
    /// Stage 4 table the merge was built from
    pub appointment_counts: Vec<OrgYearCount>,
    /// Stage 5 table the merge was built from
    pub reappointment_counts: Vec<OrgYearCount>,
    pub aggregates: Vec<OrgYearAggregate>,
    pub summary: AggregationSummary,
    pub warnings: Vec<IntegrityWarning>,
}

/// Stage 7 row: the organization with the highest rate in a year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyTopOrg {
    pub year: i32,
    /// None when no organization qualified that year
    pub org: Option<String>,
    pub max_rate: f64,
    pub total_appointments: u64,
    pub reappointment_count: u64,
}

struct Tally {
    totals: BTreeMap<(String, i32), u64>,
    reappointments: BTreeMap<(String, i32), u64>,
    summary: AggregationSummary,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct Aggregator<'a> {
    normalizer: &'a RecordNormalizer,
    config: &'a PipelineConfig,
}

impl<'a> Aggregator<'a> {
    pub fn new(normalizer: &'a RecordNormalizer, config: &'a PipelineConfig) -> Self {
        Aggregator { normalizer, config }
    }

    /// Stage 4: appointments per (org, year)
    pub fn count_appointments(&self, marked: &[MarkedRecord]) -> Vec<OrgYearCount> {
        to_counts(self.tally(marked).totals)
    }

    /// Stage 5: reappointments per (org, year), zero rows included
    pub fn count_reappointments(&self, marked: &[MarkedRecord]) -> Vec<OrgYearCount> {
        to_counts(self.tally(marked).reappointments)
    }

    /// Stages 4-6 from a single tally
    pub fn aggregate(&self, marked: &[MarkedRecord]) -> AggregationOutcome {
        let tally = self.tally(marked);
        let totals = to_counts(tally.totals);
        let reappointments = to_counts(tally.reappointments);

        let mut outcome = self.merge_counts(&totals, &reappointments);
        outcome.summary = AggregationSummary {
            pairs_observed: outcome.summary.pairs_observed,
            pairs_filled: outcome.summary.pairs_filled,
            organizations: outcome.summary.organizations,
            years: outcome.summary.years,
            ..tally.summary
        };
        outcome
    }

    /// Stage 6: join totals with reappointment counts over the org x year grid.
    /// Pairs missing from `totals` but present in `reappointments` have an
    /// unknown total.
    pub fn merge_counts(
        &self,
        totals: &[OrgYearCount],
        reappointments: &[OrgYearCount],
    ) -> AggregationOutcome {
        let total_map: HashMap<(&str, i32), u64> = totals
            .iter()
            .map(|c| ((c.org.as_str(), c.year), c.count))
            .collect();
        let reapp_map: HashMap<(&str, i32), u64> = reappointments
            .iter()
            .map(|c| ((c.org.as_str(), c.year), c.count))
            .collect();

        let orgs: BTreeSet<&str> = totals
            .iter()
            .chain(reappointments)
            .map(|c| c.org.as_str())
            .collect();
        let years: BTreeSet<i32> = totals.iter().chain(reappointments).map(|c| c.year).collect();
        let observed: BTreeSet<(&str, i32)> =
            total_map.keys().chain(reapp_map.keys()).copied().collect();

        let pairs: Vec<(&str, i32)> = if self.config.fill_missing_pairs {
            orgs.iter()
                .flat_map(|org| years.iter().map(move |year| (*org, *year)))
                .collect()
        } else {
            observed.iter().copied().collect()
        };

        let mut aggregates = Vec::with_capacity(pairs.len());
        let mut warnings = Vec::new();

        for (org, year) in pairs {
            let known_total = total_map.get(&(org, year)).copied();
            let reappointment_count = reapp_map.get(&(org, year)).copied().unwrap_or(0);
            let aggregate = build_aggregate(
                org,
                year,
                known_total,
                reappointment_count,
                observed.contains(&(org, year)),
            );

            if aggregate.is_anomalous() {
                warn!(
                    org = %aggregate.org,
                    year = aggregate.year,
                    total = aggregate.total_appointments,
                    reappointments = aggregate.reappointment_count,
                    flags = ?aggregate.flags,
                    "data-integrity warning"
                );
                warnings.push(IntegrityWarning {
                    org: aggregate.org.clone(),
                    year: aggregate.year,
                    total_appointments: aggregate.total_appointments,
                    reappointment_count: aggregate.reappointment_count,
                    flags: aggregate.flags.clone(),
                });
            }
            aggregates.push(aggregate);
        }

        let summary = AggregationSummary {
            pairs_observed: observed.len(),
            pairs_filled: aggregates.len().saturating_sub(observed.len()),
            organizations: orgs.len(),
            years: years.len(),
            ..Default::default()
        };

        info!(
            pairs = aggregates.len(),
            observed = summary.pairs_observed,
            filled = summary.pairs_filled,
            warnings = warnings.len(),
            "aggregated org-year rates"
        );

        AggregationOutcome {
            appointment_counts: totals.to_vec(),
            reappointment_counts: reappointments.to_vec(),
            aggregates,
            summary,
            warnings,
        }
    }

    /// Stage 7: highest-rate organization per year. Ties go to the
    /// alphabetically first organization.
    pub fn top_org_by_year(&self, aggregates: &[OrgYearAggregate]) -> Vec<YearlyTopOrg> {
        let mut by_year: BTreeMap<i32, Option<&OrgYearAggregate>> = BTreeMap::new();

        for aggregate in aggregates {
            let best = by_year.entry(aggregate.year).or_insert(None);

            let eligible = aggregate.reappointment_rate.is_finite()
                && aggregate.total_appointments >= self.config.top_org_min_appointments.max(1);
            if !eligible {
                continue;
            }

            let better = match best {
                None => true,
                Some(current) => {
                    aggregate.reappointment_rate > current.reappointment_rate
                        || (aggregate.reappointment_rate == current.reappointment_rate
                            && aggregate.org < current.org)
                }
            };
            if better {
                *best = Some(aggregate);
            }
        }

        by_year
            .into_iter()
            .map(|(year, best)| match best {
                Some(a) => YearlyTopOrg {
                    year,
                    org: Some(a.org.clone()),
                    max_rate: a.display_rate(self.config.clamp_rates_for_display),
                    total_appointments: a.total_appointments,
                    reappointment_count: a.reappointment_count,
                },
                None => YearlyTopOrg {
                    year,
                    org: None,
                    max_rate: 0.0,
                    total_appointments: 0,
                    reappointment_count: 0,
                },
            })
            .collect()
    }

    /// Count eligible records. Orgs are grouped by normalized name and shown
    /// with the first display form seen in input order.
    fn tally(&self, marked: &[MarkedRecord]) -> Tally {
        let mut summary = AggregationSummary {
            records_in: marked.len(),
            ..Default::default()
        };
        let mut display: HashMap<String, String> = HashMap::new();
        let mut totals = BTreeMap::new();
        let mut reappointments = BTreeMap::new();

        for m in marked {
            let org_key = self.normalizer.normalize_org(m.record.org.as_deref());
            let org_display = match m.record.org.as_deref() {
                Some(org) if !org_key.is_empty() => display
                    .entry(org_key)
                    .or_insert_with(|| org.to_string())
                    .clone(),
                _ => {
                    summary.excluded_missing_org += 1;
                    continue;
                }
            };

            let year = match m.record.year {
                Some(year) => year,
                None => {
                    summary.excluded_missing_year += 1;
                    continue;
                }
            };

            summary.records_aggregated += 1;
            *totals.entry((org_display.clone(), year)).or_insert(0) += 1;
            *reappointments.entry((org_display, year)).or_insert(0) += u64::from(m.reappointed);
        }

        if summary.excluded_missing_org + summary.excluded_missing_year > 0 {
            info!(
                excluded_missing_org = summary.excluded_missing_org,
                excluded_missing_year = summary.excluded_missing_year,
                "records excluded from aggregation"
            );
        }

        Tally {
            totals,
            reappointments,
            summary,
        }
    }
}

fn to_counts(map: BTreeMap<(String, i32), u64>) -> Vec<OrgYearCount> {
    map.into_iter()
        .map(|((org, year), count)| OrgYearCount { org, year, count })
        .collect()
}

fn build_aggregate(
    org: &str,
    year: i32,
    known_total: Option<u64>,
    reappointment_count: u64,
    observed: bool,
) -> OrgYearAggregate {
    let mut flags = Vec::new();

    // Filled grid cells are known zeros; only observed pairs can lack a total
    let total = match known_total {
        Some(total) => Some(total),
        None if observed && reappointment_count > 0 => None,
        None => Some(0),
    };

    let (total_appointments, reappointment_rate) = match total {
        None => {
            flags.push(IntegrityFlag::UnknownTotal);
            (0, f64::NAN)
        }
        Some(0) if reappointment_count > 0 => {
            flags.push(IntegrityFlag::CountExceedsTotal);
            (0, f64::NAN)
        }
        Some(0) => (0, 0.0),
        Some(total) => {
            let rate = reappointment_count as f64 / total as f64;
            if reappointment_count > total {
                flags.push(IntegrityFlag::CountExceedsTotal);
            }
            if rate > 1.0 {
                flags.push(IntegrityFlag::RateAboveOne);
            }
            (total, rate)
        }
    };

    OrgYearAggregate {
        org: org.to_string(),
        year,
        total_appointments,
        reappointment_count,
        reappointment_rate,
        flags,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityResolver;
    use crate::marker::ReappointmentMarker;
    use crate::record::{AppointmentRecord, Reappointed};

    fn create_test_record(
        index: usize,
        name: &str,
        org: Option<&str>,
        year: Option<i32>,
    ) -> AppointmentRecord {
        AppointmentRecord {
            source_index: index,
            name: Some(name.to_string()),
            position: Some("Board Member".to_string()),
            org: org.map(str::to_string),
            year,
            reappointed: Reappointed::Unknown,
        }
    }

    fn create_count(org: &str, year: i32, count: u64) -> OrgYearCount {
        OrgYearCount {
            org: org.to_string(),
            year,
            count,
        }
    }

    fn mark(normalizer: &RecordNormalizer, records: &[AppointmentRecord]) -> Vec<MarkedRecord> {
        ReappointmentMarker::new(IdentityResolver::new(normalizer))
            .mark(records)
            .0
    }

    fn find<'b>(aggregates: &'b [OrgYearAggregate], org: &str, year: i32) -> &'b OrgYearAggregate {
        aggregates
            .iter()
            .find(|a| a.org == org && a.year == year)
            .unwrap()
    }

    #[test]
    fn test_smith_scenario() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let records = vec![
            create_test_record(0, "J Smith", Some("Dept X"), Some(2015)),
            create_test_record(1, "J Smith", Some("Dept X"), Some(2017)),
            create_test_record(2, "J Smith", Some("Dept X"), Some(2019)),
        ];

        let marked = mark(&normalizer, &records);
        let outcome = Aggregator::new(&normalizer, &config).aggregate(&marked);

        let a2015 = find(&outcome.aggregates, "Dept X", 2015);
        assert_eq!((a2015.total_appointments, a2015.reappointment_count), (1, 0));
        assert_eq!(a2015.reappointment_rate, 0.0);

        let a2017 = find(&outcome.aggregates, "Dept X", 2017);
        assert_eq!((a2017.total_appointments, a2017.reappointment_count), (1, 1));
        assert_eq!(a2017.reappointment_rate, 1.0);

        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_grid_fill_adds_zero_rows() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let records = vec![
            create_test_record(0, "A", Some("Org A"), Some(2015)),
            create_test_record(1, "B", Some("Org B"), Some(2016)),
        ];

        let marked = mark(&normalizer, &records);
        let outcome = Aggregator::new(&normalizer, &config).aggregate(&marked);

        assert_eq!(outcome.aggregates.len(), 4);
        let filled = find(&outcome.aggregates, "Org A", 2016);
        assert_eq!(filled.total_appointments, 0);
        assert_eq!(filled.reappointment_rate, 0.0);
        assert!(!filled.is_anomalous());
        assert_eq!(outcome.summary.pairs_filled, 2);
        assert_eq!(outcome.summary.pairs_observed, 2);
    }

    #[test]
    fn test_grid_fill_can_be_disabled() {
        let normalizer = RecordNormalizer::new();
        let mut config = PipelineConfig::default();
        config.fill_missing_pairs = false;
        let records = vec![
            create_test_record(0, "A", Some("Org A"), Some(2015)),
            create_test_record(1, "B", Some("Org B"), Some(2016)),
        ];

        let marked = mark(&normalizer, &records);
        let outcome = Aggregator::new(&normalizer, &config).aggregate(&marked);

        assert_eq!(outcome.aggregates.len(), 2);
    }

    #[test]
    fn test_org_variants_merge_under_first_display_form() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let records = vec![
            create_test_record(0, "A", Some("Dept. of Health"), Some(2015)),
            create_test_record(1, "B", Some("Department of Health"), Some(2015)),
        ];

        let marked = mark(&normalizer, &records);
        let outcome = Aggregator::new(&normalizer, &config).aggregate(&marked);

        assert_eq!(outcome.aggregates.len(), 1);
        assert_eq!(outcome.aggregates[0].org, "Dept. of Health");
        assert_eq!(outcome.aggregates[0].total_appointments, 2);
    }

    #[test]
    fn test_records_missing_org_or_year_are_counted_not_aggregated() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let records = vec![
            create_test_record(0, "A", Some("Org"), Some(2015)),
            create_test_record(1, "B", None, Some(2015)),
            create_test_record(2, "C", Some("Org"), None),
        ];

        let marked = mark(&normalizer, &records);
        let outcome = Aggregator::new(&normalizer, &config).aggregate(&marked);

        assert_eq!(outcome.summary.records_in, 3);
        assert_eq!(outcome.summary.records_aggregated, 1);
        assert_eq!(outcome.summary.excluded_missing_org, 1);
        assert_eq!(outcome.summary.excluded_missing_year, 1);
    }

    #[test]
    fn test_merge_flags_count_exceeding_total() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let aggregator = Aggregator::new(&normalizer, &config);

        let totals = vec![create_count("Org", 2015, 2)];
        let reapps = vec![create_count("Org", 2015, 3)];
        let outcome = aggregator.merge_counts(&totals, &reapps);

        let row = &outcome.aggregates[0];
        assert_eq!(row.reappointment_rate, 1.5);
        assert!(row.flags.contains(&IntegrityFlag::CountExceedsTotal));
        assert!(row.flags.contains(&IntegrityFlag::RateAboveOne));
        assert_eq!(row.display_rate(false), 1.5);
        assert_eq!(row.display_rate(true), 1.0);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_merge_unknown_total_is_nan() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let aggregator = Aggregator::new(&normalizer, &config);

        let totals = vec![create_count("Org A", 2015, 4)];
        let reapps = vec![create_count("Org A", 2015, 1), create_count("Org B", 2015, 2)];
        let outcome = aggregator.merge_counts(&totals, &reapps);

        let unknown = find(&outcome.aggregates, "Org B", 2015);
        assert!(unknown.reappointment_rate.is_nan());
        assert_eq!(unknown.flags, vec![IntegrityFlag::UnknownTotal]);

        let known = find(&outcome.aggregates, "Org A", 2015);
        assert_eq!(known.reappointment_rate, 0.25);
    }

    #[test]
    fn test_rates_bounded_for_marked_input() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let records: Vec<AppointmentRecord> = (0..40)
            .map(|i| {
                create_test_record(
                    i,
                    &format!("Person {}", i % 6),
                    Some(if i % 2 == 0 { "Org A" } else { "Org B" }),
                    Some(2010 + (i % 5) as i32),
                )
            })
            .collect();

        let marked = mark(&normalizer, &records);
        let outcome = Aggregator::new(&normalizer, &config).aggregate(&marked);

        for a in &outcome.aggregates {
            assert!(a.reappointment_count <= a.total_appointments);
            assert!((0.0..=1.0).contains(&a.reappointment_rate));
        }
    }

    #[test]
    fn test_count_tables_match_aggregate() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let aggregator = Aggregator::new(&normalizer, &config);
        let records = vec![
            create_test_record(0, "A", Some("Org"), Some(2015)),
            create_test_record(1, "A", Some("Org"), Some(2016)),
            create_test_record(2, "B", Some("Org"), Some(2016)),
        ];

        let marked = mark(&normalizer, &records);
        let totals = aggregator.count_appointments(&marked);
        let reapps = aggregator.count_reappointments(&marked);

        assert_eq!(totals, vec![create_count("Org", 2015, 1), create_count("Org", 2016, 2)]);
        assert_eq!(reapps, vec![create_count("Org", 2015, 0), create_count("Org", 2016, 1)]);

        let outcome = aggregator.aggregate(&marked);
        assert_eq!(outcome.appointment_counts, totals);
        assert_eq!(outcome.reappointment_counts, reapps);
        assert_eq!(outcome.summary.records_aggregated, 3);
    }

    #[test]
    fn test_top_org_by_year() {
        let normalizer = RecordNormalizer::new();
        let config = PipelineConfig::default();
        let aggregator = Aggregator::new(&normalizer, &config);

        let totals = vec![
            create_count("Beta", 2015, 4),
            create_count("Alpha", 2015, 2),
            create_count("Gamma", 2015, 10),
            create_count("Alpha", 2016, 0),
        ];
        let reapps = vec![
            create_count("Beta", 2015, 2),
            create_count("Alpha", 2015, 1),
            create_count("Gamma", 2015, 1),
        ];
        let outcome = aggregator.merge_counts(&totals, &reapps);
        let top = aggregator.top_org_by_year(&outcome.aggregates);

        assert_eq!(top.len(), 2);
        // Alpha and Beta tie at 0.5; Alpha wins alphabetically
        assert_eq!(top[0].org.as_deref(), Some("Alpha"));
        assert_eq!(top[0].max_rate, 0.5);
        // No org had appointments in 2016
        assert_eq!(top[1].year, 2016);
        assert_eq!(top[1].org, None);
    }
}
