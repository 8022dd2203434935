// 📄 Appointment records - raw rows, parsed records, marked records
// Raw rows are what the interchange layer hands over; the normalizer turns
// them into AppointmentRecords; the marker turns those into MarkedRecords.

use crate::identity::IdentityKey;
use serde::{Deserialize, Serialize};

// ============================================================================
// TRI-STATE REAPPOINTED FLAG
// ============================================================================

/// Reappointment status as originally reported.
/// Unknown stays Unknown until the marker applies an explicit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Reappointed {
    True,
    False,
    #[default]
    Unknown,
}

impl Reappointed {
    /// Parse a literal spelling (case-insensitive).
    /// Recognized: true/false, yes/no, 1/0, y/n, t/f. Anything else is Unknown.
    pub fn parse(raw: Option<&str>) -> Self {
        let value = match raw {
            Some(v) => v.trim().to_lowercase(),
            None => return Reappointed::Unknown,
        };

        match value.as_str() {
            "true" | "yes" | "y" | "t" | "1" | "1.0" => Reappointed::True,
            "false" | "no" | "n" | "f" | "0" | "0.0" => Reappointed::False,
            _ => Reappointed::Unknown,
        }
    }

    pub fn is_true(&self) -> bool {
        *self == Reappointed::True
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reappointed::True => "true",
            Reappointed::False => "false",
            Reappointed::Unknown => "unknown",
        }
    }
}

// ============================================================================
// RAW ROW (interchange input, stage 2 -> 3)
// ============================================================================

/// One row of the combined table after header mapping, all fields as text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAppointment {
    pub reappointed: Option<String>,
    pub name: Option<String>,
    pub position: Option<String>,
    pub org: Option<String>,
    pub year: Option<String>,
}

impl RawAppointment {
    pub fn new(
        reappointed: Option<&str>,
        name: Option<&str>,
        position: Option<&str>,
        org: Option<&str>,
        year: Option<&str>,
    ) -> Self {
        RawAppointment {
            reappointed: reappointed.map(str::to_string),
            name: name.map(str::to_string),
            position: position.map(str::to_string),
            org: org.map(str::to_string),
            year: year.map(str::to_string),
        }
    }
}

// ============================================================================
// PARSED RECORD
// ============================================================================

/// One appointment observation with strict field types.
/// Text fields keep their display form (trimmed, whitespace collapsed,
/// original casing); comparison always goes through the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    /// Position in the input table, used for stable tie-breaking
    pub source_index: usize,
    pub name: Option<String>,
    pub position: Option<String>,
    pub org: Option<String>,
    /// None when the raw year could not be parsed as a valid year
    pub year: Option<i32>,
    pub reappointed: Reappointed,
}

// ============================================================================
// MARKED RECORD (stage 3 output)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkStatus {
    /// Grouped by identity and labelled chronologically
    Marked,
    /// All identity fields empty; passed through without grouping
    UnresolvedIdentity,
    /// Identity resolved but no valid year to order by; passed through
    MissingYear,
}

impl MarkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkStatus::Marked => "marked",
            MarkStatus::UnresolvedIdentity => "unresolved_identity",
            MarkStatus::MissingYear => "missing_year",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkedRecord {
    pub record: AppointmentRecord,
    pub identity: Option<IdentityKey>,
    /// Definite flag after marking
    pub reappointed: bool,
    pub status: MarkStatus,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_truthy_spellings() {
        for literal in ["true", "TRUE", "Yes", "y", "Y", "1", " t ", "1.0"] {
            assert_eq!(Reappointed::parse(Some(literal)), Reappointed::True, "{}", literal);
        }
    }

    #[test]
    fn test_parse_falsy_spellings() {
        for literal in ["false", "False", "NO", "n", "0", "F", "0.0"] {
            assert_eq!(Reappointed::parse(Some(literal)), Reappointed::False, "{}", literal);
        }
    }

    #[test]
    fn test_unrecognized_is_unknown_not_false() {
        assert_eq!(Reappointed::parse(None), Reappointed::Unknown);
        assert_eq!(Reappointed::parse(Some("")), Reappointed::Unknown);
        assert_eq!(Reappointed::parse(Some("maybe")), Reappointed::Unknown);
        assert_eq!(Reappointed::parse(Some("nan")), Reappointed::Unknown);
        assert_eq!(Reappointed::parse(Some("2")), Reappointed::Unknown);
    }

    #[test]
    fn test_reappointed_serializes_lowercase() {
        let json = serde_json::to_string(&Reappointed::Unknown).unwrap();
        assert_eq!(json, "\"unknown\"");
    }
}
