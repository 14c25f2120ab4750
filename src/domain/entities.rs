//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the geobridge domain.
//! They have no external dependencies and contain only business logic.

use serde::{Deserialize, Serialize};

/// Code assigned to free-text locations that match nothing in the lookup table.
pub const UNKNOWN_CODE: &str = "UNK";

/// A structured country (or broad region) record.
///
/// Records are produced only by the location normalizer and are immutable
/// once constructed. Many identifiers may share the same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryRecord {
    /// ISO 3166-1 alpha-2 code, a broad region code, or "UNK"
    pub code: String,
    /// Emoji glyph rendered next to the identifier
    pub flag: String,
    /// Display name; for unresolved input this preserves the raw string
    pub name: String,
}

impl CountryRecord {
    pub fn new(code: impl Into<String>, flag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            flag: flag.into(),
            name: name.into(),
        }
    }

    /// Record for free text that matched nothing; keeps the raw string for display.
    pub fn unresolved(raw: &str) -> Self {
        Self::new(UNKNOWN_CODE, "🌍", raw)
    }

    /// Record for a profile that carried no location string at all.
    pub fn unknown_placeholder() -> Self {
        Self::new(UNKNOWN_CODE, "❓", "Unknown")
    }

    pub fn is_unknown(&self) -> bool {
        self.code == UNKNOWN_CODE
    }
}

/// A cache row: the resolved record plus its recency stamp.
///
/// `last_seen_ms` (unix epoch milliseconds) is refreshed on every save,
/// including re-saves of an unchanged record, so pruning ages out
/// identifiers that stopped appearing rather than ones resolved long ago.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLocation {
    pub record: CountryRecord,
    pub last_seen_ms: i64,
}

/// Free-tier profile payload, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceProfile {
    /// Free-text "based in" string, absent when the account hides it
    pub raw_location: Option<String>,
    /// Upstream numeric account id, used for usage reporting
    pub source_user_id: Option<String>,
}

/// Paid-tier lookup reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackReply {
    pub found: bool,
    /// Opaque location string to run through the normalizer
    pub payload: Option<String>,
    /// Remaining credit balance, when the backend includes it
    pub updated_balance: Option<i64>,
}

/// One entry of the priority candidate feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BountyCandidate {
    pub identifier: String,
    /// Opaque backend-provided tag for this candidate
    pub hint: String,
}

/// Persisted free-tier quota counters.
///
/// Invariant: `units_used > 0` implies `window_start_ms` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub units_used: u32,
    /// Start of the current window (unix millis); absent while empty
    pub window_start_ms: Option<i64>,
}

/// Payload of a fire-and-forget usage report to the paid-tier backend.
///
/// The hashed identifier is the only key the accounting side is given;
/// the raw identifier rides along for bounty matching only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    pub hashed_identifier: String,
    pub code: String,
    pub source_user_id: String,
    pub identifier: String,
}
