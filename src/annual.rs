// 📅 Annual Proportion Engine - government-wide proportion per year

use crate::aggregator::OrgYearAggregate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualProportion {
    pub year: i32,
    pub total_appointments: u64,
    pub total_reappointments: u64,
    /// 0 for years without appointments
    pub proportion: f64,
}

impl AnnualProportion {
    /// Years without appointments carry no information for the regression
    pub fn is_usable(&self) -> bool {
        self.total_appointments > 0
    }
}

/// One row per year present in `aggregates`, ascending by year
pub fn aggregate_by_year(aggregates: &[OrgYearAggregate]) -> Vec<AnnualProportion> {
    let mut sums: BTreeMap<i32, (u64, u64)> = BTreeMap::new();

    for aggregate in aggregates {
        let entry = sums.entry(aggregate.year).or_insert((0, 0));
        entry.0 += aggregate.total_appointments;
        entry.1 += aggregate.reappointment_count;
    }

    let annual: Vec<AnnualProportion> = sums
        .into_iter()
        .map(|(year, (total, reappointments))| AnnualProportion {
            year,
            total_appointments: total,
            total_reappointments: reappointments,
            proportion: if total == 0 {
                0.0
            } else {
                reappointments as f64 / total as f64
            },
        })
        .collect();

    info!(
        years = annual.len(),
        empty_years = annual.iter().filter(|a| !a.is_usable()).count(),
        "computed annual proportions"
    );

    annual
}

// ============================================================================
// TESTS
// ============================================================================
