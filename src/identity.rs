// 🪪 Identity Resolver - composite (name, position, org) keys
// Exact equality over normalized fields, no fuzzy matching: two records are
// the same appointment line only if all three normalized fields agree.

use crate::normalizer::RecordNormalizer;
use crate::record::AppointmentRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// IDENTITY KEY
// ============================================================================

/// Normalized (name, position, org). Ordering is lexicographic over the
/// three fields, which keeps group iteration deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    name: String,
    position: String,
    org: String,
}

impl IdentityKey {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    /// Stable short hash for audit trails
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.position.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.org.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {}", self.name, self.position, self.org)
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct IdentityResolver<'a> {
    normalizer: &'a RecordNormalizer,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(normalizer: &'a RecordNormalizer) -> Self {
        IdentityResolver { normalizer }
    }

    /// Build the key for raw field values. Never fails; returns None only
    /// when all three fields normalize to empty.
    pub fn resolve_fields(
        &self,
        name: Option<&str>,
        position: Option<&str>,
        org: Option<&str>,
    ) -> Option<IdentityKey> {
        let key = IdentityKey {
            name: self.normalizer.normalize_name(name),
            position: self.normalizer.normalize_position(position),
            org: self.normalizer.normalize_org(org),
        };

        if key.name.is_empty() && key.position.is_empty() && key.org.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    pub fn resolve(&self, record: &AppointmentRecord) -> Option<IdentityKey> {
        self.resolve_fields(
            record.name.as_deref(),
            record.position.as_deref(),
            record.org.as_deref(),
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
