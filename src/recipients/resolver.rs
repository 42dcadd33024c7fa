//! Recipient resolution from consent records.
//!
//! Resolution runs once per job, at first processing, and the result is
//! frozen into the job's recipient snapshot. Later retries reuse the
//! snapshot rather than re-querying, which keeps index-based checkpointing
//! valid even when consent data changes mid-campaign.

use std::collections::{BTreeSet, HashSet};

use crate::store::{ConsentSource, StoreError};
use crate::types::EmailAddress;

/// Computes the ordered, deduplicated recipient set for a campaign.
///
/// An address is included when all of these hold:
/// - its record has marketing consent;
/// - the topic filter is empty, or at least one filtered topic is
///   subscribed;
/// - `only_commercial` is false, or the record has commercial consent;
/// - the address is not suppressed.
///
/// The result is sorted by the case-folded address, so resolution order is
/// deterministic.
pub async fn resolve_recipients<C: ConsentSource>(
    consent: &C,
    suppressed: &HashSet<EmailAddress>,
    topic_filter: &BTreeSet<String>,
    only_commercial: bool,
) -> Result<Vec<EmailAddress>, StoreError> {
    let records = consent.consent_records().await?;

    let mut selected = BTreeSet::new();
    for record in records {
        if !record.consent_marketing {
            continue;
        }
        if !record.matches_topics(topic_filter) {
            continue;
        }
        if only_commercial && !record.consent_commercial {
            continue;
        }
        if suppressed.contains(&record.email) {
            continue;
        }
        selected.insert(record.email);
    }

    Ok(selected.into_iter().collect())
}
