// 🔁 Reappointment Marker - chronological labelling per identity group
// Group by identity key, stable-sort each group by year, keep the first
// record's explicit `true`, mark every later record as a reappointment.

use crate::identity::{IdentityKey, IdentityResolver};
use crate::record::{AppointmentRecord, MarkStatus, MarkedRecord, Reappointed};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

// ============================================================================
// MARKING SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkingSummary {
    pub records_in: usize,
    /// Records grouped and labelled
    pub marked: usize,
    /// Excluded from grouping: identity fields all empty
    pub unresolved_identity: usize,
    /// Excluded from grouping: no valid year to order by
    pub missing_year: usize,
    /// Records reported as reappointed in the source
    pub originally_true: usize,
    /// Later occurrences that grouping turned into reappointments
    pub promoted_to_true: usize,
    /// Unknown flags resolved to false: first occurrences and pass-through
    /// records. Unknown flags on later occurrences count as promoted instead.
    pub unknown_resolved_false: usize,
    /// Distinct identity groups
    pub groups: usize,
    /// Identity groups with more than one record
    pub repeated_groups: usize,
    /// Records flagged true after marking
    pub reappointments: usize,
}

// ============================================================================
// MARKER
// ============================================================================

pub struct ReappointmentMarker<'a> {
    resolver: IdentityResolver<'a>,
}

impl<'a> ReappointmentMarker<'a> {
    pub fn new(resolver: IdentityResolver<'a>) -> Self {
        ReappointmentMarker { resolver }
    }

    /// Label every record. Output order matches input order; no record is dropped.
    pub fn mark(&self, records: &[AppointmentRecord]) -> (Vec<MarkedRecord>, MarkingSummary) {
        let mut summary = MarkingSummary {
            records_in: records.len(),
            ..Default::default()
        };

        let mut output: Vec<Option<MarkedRecord>> = vec![None; records.len()];
        let mut groups: BTreeMap<IdentityKey, Vec<usize>> = BTreeMap::new();

        for (position, record) in records.iter().enumerate() {
            if record.reappointed.is_true() {
                summary.originally_true += 1;
            }

            let key = match self.resolver.resolve(record) {
                Some(key) => key,
                None => {
                    let status = MarkStatus::UnresolvedIdentity;
                    output[position] = Some(pass_through(record, None, status, &mut summary));
                    continue;
                }
            };

            if record.year.is_none() {
                let status = MarkStatus::MissingYear;
                output[position] = Some(pass_through(record, Some(key), status, &mut summary));
                continue;
            }

            groups.entry(key).or_default().push(position);
        }

        summary.groups = groups.len();

        for (key, mut members) in groups {
            if members.len() > 1 {
                summary.repeated_groups += 1;
            }

            // Stable: equal years keep input order
            members.sort_by_key(|&i| records[i].year);

            for (rank, &i) in members.iter().enumerate() {
                let record = &records[i];
                let reappointed = if rank == 0 {
                    if record.reappointed == Reappointed::Unknown {
                        summary.unknown_resolved_false += 1;
                    }
                    record.reappointed.is_true()
                } else {
                    if !record.reappointed.is_true() {
                        summary.promoted_to_true += 1;
                    }
                    true
                };

                output[i] = Some(MarkedRecord {
                    record: record.clone(),
                    identity: Some(key.clone()),
                    reappointed,
                    status: MarkStatus::Marked,
                });
                summary.marked += 1;
            }
        }

        let marked: Vec<MarkedRecord> = output.into_iter().flatten().collect();
        summary.reappointments = marked.iter().filter(|m| m.reappointed).count();

        info!(
            records = summary.records_in,
            marked = summary.marked,
            unresolved_identity = summary.unresolved_identity,
            missing_year = summary.missing_year,
            groups = summary.groups,
            repeated_groups = summary.repeated_groups,
            promoted = summary.promoted_to_true,
            reappointments = summary.reappointments,
            "marked reappointments"
        );

        (marked, summary)
    }
}

/// Records that cannot be grouped keep an explicit `true`, otherwise false
fn pass_through(
    record: &AppointmentRecord,
    identity: Option<IdentityKey>,
    status: MarkStatus,
    summary: &mut MarkingSummary,
) -> MarkedRecord {
    match status {
        MarkStatus::UnresolvedIdentity => summary.unresolved_identity += 1,
        MarkStatus::MissingYear => summary.missing_year += 1,
        MarkStatus::Marked => {}
    }
    if record.reappointed == Reappointed::Unknown {
        summary.unknown_resolved_false += 1;
    }

    MarkedRecord {
        record: record.clone(),
        identity,
        reappointed: record.reappointed.is_true(),
        status,
    }
}

// ============================================================================
// TESTS
// ============================================================================
