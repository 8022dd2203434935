// 🧹 Record Normalizer - canonical text, strict years, tri-state flags
// Normalization rules live in a versioned lookup table (rules as data),
// so they can be swapped and tested independently of the pipeline.

use crate::error::{PipelineError, PipelineResult};
use crate::record::{AppointmentRecord, RawAppointment, Reappointed};
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Years outside this range are treated as unparseable
pub const MIN_VALID_YEAR: i32 = 1000;
pub const MAX_VALID_YEAR: i32 = 9999;

// ============================================================================
// NORMALIZATION TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationTable {
    /// Bumped whenever any mapping changes; reported with every run
    pub version: String,

    /// Stripped from the start of names ("dr", "mr", ...)
    #[serde(default)]
    pub honorific_prefixes: BTreeSet<String>,

    /// Stripped from the end of names ("jr", "phd", ...)
    #[serde(default)]
    pub honorific_suffixes: BTreeSet<String>,

    /// Token -> expansion ("dept" -> "department")
    #[serde(default)]
    pub abbreviations: BTreeMap<String, String>,

    /// Whole normalized org name -> canonical normalized org name
    #[serde(default)]
    pub org_aliases: BTreeMap<String, String>,
}

impl NormalizationTable {
    /// Built-in table
    pub fn builtin() -> Self {
        let prefixes = [
            "dr", "mr", "mrs", "ms", "miss", "mx", "prof", "professor", "hon", "honourable",
            "honorable", "rev", "reverend", "sir", "dame",
        ];
        let suffixes = ["jr", "sr", "ii", "iii", "iv", "phd", "md", "qc", "kc", "esq", "mba"];
        let abbreviations = [
            ("&", "and"),
            ("dept", "department"),
            ("govt", "government"),
            ("gov", "government"),
            ("intl", "international"),
            ("assoc", "association"),
            ("assn", "association"),
            ("corp", "corporation"),
            ("inc", "incorporated"),
            ("ltd", "limited"),
            ("cttee", "committee"),
            ("bd", "board"),
            ("admin", "administration"),
            ("mgmt", "management"),
            ("natl", "national"),
            ("svcs", "services"),
            ("dev", "development"),
            ("vp", "vice president"),
        ];

        NormalizationTable {
            version: "2024.1".to_string(),
            honorific_prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
            honorific_suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            abbreviations: abbreviations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            org_aliases: BTreeMap::new(),
        }
    }

    /// Load a table from JSON and check it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read normalization table: {:?}", path.as_ref())
        })?;

        let table: NormalizationTable =
            serde_json::from_str(&content).context("Failed to parse normalization table JSON")?;

        table.validate()?;
        Ok(table)
    }

    /// Check the conditions under which normalization is idempotent:
    /// expansions are fixed points, alias targets are normalized and final.
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |reason: String| PipelineError::InvalidNormalizationTable { reason };

        if self.version.trim().is_empty() {
            return Err(invalid("version must not be empty".to_string()));
        }

        for entry in self.honorific_prefixes.iter().chain(&self.honorific_suffixes) {
            if tokenize(entry) != vec![entry.clone()] {
                return Err(invalid(format!(
                    "honorific '{}' must be a single lower-case token",
                    entry
                )));
            }
        }

        for (key, expansion) in &self.abbreviations {
            if tokenize(key) != vec![key.clone()] {
                return Err(invalid(format!(
                    "abbreviation key '{}' must be a single lower-case token",
                    key
                )));
            }
            let tokens = tokenize(expansion);
            if tokens.is_empty() || tokens.join(" ") != *expansion {
                return Err(invalid(format!(
                    "expansion '{}' for '{}' is not in normalized form",
                    expansion, key
                )));
            }
            for token in &tokens {
                if self.abbreviations.contains_key(token) {
                    return Err(invalid(format!(
                        "expansion '{}' for '{}' contains abbreviation '{}'",
                        expansion, key, token
                    )));
                }
                if self.honorific_prefixes.contains(token)
                    || self.honorific_suffixes.contains(token)
                {
                    return Err(invalid(format!(
                        "expansion '{}' for '{}' contains honorific '{}'",
                        expansion, key, token
                    )));
                }
            }
        }

        for (alias, canonical) in &self.org_aliases {
            if self.expand(tokenize(alias)).join(" ") != *alias {
                return Err(invalid(format!("org alias '{}' is not normalized", alias)));
            }
            if canonical.is_empty() || self.expand(tokenize(canonical)).join(" ") != *canonical {
                return Err(invalid(format!(
                    "org alias target '{}' is not normalized",
                    canonical
                )));
            }
            if self.org_aliases.contains_key(canonical) {
                return Err(invalid(format!(
                    "org alias target '{}' is itself an alias",
                    canonical
                )));
            }
        }

        Ok(())
    }

    /// SHA-256 over the canonical JSON form
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self).unwrap_or_default());
        format!("{:x}", hasher.finalize())
    }

    fn expand(&self, tokens: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            match self.abbreviations.get(&token) {
                Some(expansion) => out.extend(expansion.split(' ').map(str::to_string)),
                None => out.push(token),
            }
        }
        out
    }

    fn strip_honorifics(&self, mut tokens: Vec<String>) -> Vec<String> {
        loop {
            let before = tokens.len();
            while tokens
                .first()
                .map_or(false, |t| self.honorific_prefixes.contains(t))
            {
                tokens.remove(0);
            }
            while tokens
                .last()
                .map_or(false, |t| self.honorific_suffixes.contains(t))
            {
                tokens.pop();
            }
            if tokens.len() == before {
                return tokens;
            }
        }
    }
}

impl Default for NormalizationTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Lower-case, drop apostrophes, isolate '&', turn other punctuation into
/// whitespace, split.
fn tokenize(raw: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        match c {
            '\'' | '\u{2019}' | '`' => {}
            '&' => cleaned.push_str(" & "),
            c if c.is_alphanumeric() => cleaned.push(c),
            _ => cleaned.push(' '),
        }
    }
    cleaned.split_whitespace().map(str::to_string).collect()
}

// ============================================================================
// RECORD NORMALIZER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationSummary {
    pub records_in: usize,
    /// Year present but not a valid integer year
    pub invalid_years: usize,
    /// Year blank or absent
    pub missing_years: usize,
    /// Reappointed flag not recognized as true/false
    pub unknown_flags: usize,
}

#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    table: NormalizationTable,
}

impl RecordNormalizer {
    /// Normalizer with the built-in table
    pub fn new() -> Self {
        RecordNormalizer {
            table: NormalizationTable::builtin(),
        }
    }

    pub fn with_table(table: NormalizationTable) -> PipelineResult<Self> {
        table.validate()?;
        Ok(RecordNormalizer { table })
    }

    pub fn table(&self) -> &NormalizationTable {
        &self.table
    }

    pub fn normalize_name(&self, raw: Option<&str>) -> String {
        let tokens = self.table.strip_honorifics(tokenize(raw.unwrap_or("")));
        self.table.expand(tokens).join(" ")
    }

    pub fn normalize_position(&self, raw: Option<&str>) -> String {
        self.table.expand(tokenize(raw.unwrap_or(""))).join(" ")
    }

    pub fn normalize_org(&self, raw: Option<&str>) -> String {
        let normalized = self.table.expand(tokenize(raw.unwrap_or(""))).join(" ");
        match self.table.org_aliases.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => normalized,
        }
    }

    /// Trimmed, whitespace-collapsed, original casing. None when blank.
    pub fn display_form(raw: Option<&str>) -> Option<String> {
        let collapsed = raw?.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    }

    /// Coerce a raw year to an integer. Accepts "2015" and "2015.0".
    pub fn parse_year(raw: Option<&str>) -> Option<i32> {
        let value = raw?.trim();
        if value.is_empty() {
            return None;
        }

        let year = match value.parse::<i64>() {
            Ok(y) => y,
            Err(_) => {
                let f = value.parse::<f64>().ok()?;
                if !f.is_finite() || f.fract() != 0.0 {
                    return None;
                }
                f as i64
            }
        };

        if year < MIN_VALID_YEAR as i64 || year > MAX_VALID_YEAR as i64 {
            return None;
        }
        Some(year as i32)
    }

    /// Turn one raw row into a strict record
    pub fn normalize_record(&self, source_index: usize, raw: &RawAppointment) -> AppointmentRecord {
        AppointmentRecord {
            source_index,
            name: Self::display_form(raw.name.as_deref()),
            position: Self::display_form(raw.position.as_deref()),
            org: Self::display_form(raw.org.as_deref()),
            year: Self::parse_year(raw.year.as_deref()),
            reappointed: Reappointed::parse(raw.reappointed.as_deref()),
        }
    }

    /// Normalize every row; rows are never dropped here, problems are counted
    pub fn normalize_all(
        &self,
        raws: &[RawAppointment],
    ) -> (Vec<AppointmentRecord>, NormalizationSummary) {
        let mut summary = NormalizationSummary {
            records_in: raws.len(),
            ..Default::default()
        };

        let records: Vec<AppointmentRecord> = raws
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let record = self.normalize_record(i, raw);
                if record.year.is_none() {
                    let blank = raw.year.as_deref().map_or(true, |y| y.trim().is_empty());
                    if blank {
                        summary.missing_years += 1;
                    } else {
                        summary.invalid_years += 1;
                        debug!(row = i, year = ?raw.year, "unparseable year");
                    }
                }
                if record.reappointed == Reappointed::Unknown {
                    summary.unknown_flags += 1;
                }
                record
            })
            .collect();

        info!(
            records = summary.records_in,
            invalid_years = summary.invalid_years,
            missing_years = summary.missing_years,
            unknown_flags = summary.unknown_flags,
            "normalized records"
        );

        (records, summary)
    }
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
