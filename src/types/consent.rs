//! Consent and suppression records.
//!
//! Both are owned by external capture flows and read-only from the dispatch
//! engine's perspective. Serialized field names match the stored documents;
//! note the historical spelling of the commercial-consent field, which is
//! preserved on the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EmailAddress;

/// A recipient's consent state, keyed by case-folded email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub email: EmailAddress,

    /// Baseline marketing consent; without it the address is never resolved.
    #[serde(default)]
    pub consent_marketing: bool,

    /// Commercial-offer consent, required when a campaign is
    /// commercial-only. Stored under its historical field name.
    #[serde(default, rename = "consent_comercial")]
    pub consent_commercial: bool,

    /// Named topic subscriptions. Only topics mapped to `true` count.
    #[serde(default)]
    pub topics: BTreeMap<String, bool>,

    pub updated_at: DateTime<Utc>,
}

impl ConsentRecord {
    /// Whether this record subscribes to at least one of the given topics.
    ///
    /// An empty filter imposes no topic restriction.
    pub fn matches_topics(&self, filter: &std::collections::BTreeSet<String>) -> bool {
        if filter.is_empty() {
            return true;
        }
        filter
            .iter()
            .any(|topic| self.topics.get(topic).copied().unwrap_or(false))
    }
}

/// A suppression-list entry. Presence excludes the address from every
/// resolved recipient set, regardless of consent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub email: EmailAddress,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
