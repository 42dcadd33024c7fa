//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different identifier kinds (e.g.
//! using a raw string where a job id is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A campaign job identifier.
///
/// Either explicit (caller-chosen) or content-derived from the campaign's
/// subject, body and schedule, so that re-submitting the same campaign does
/// not enqueue it twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Creates a job id from an explicit string.
    pub fn new(s: impl Into<String>) -> Self {
        JobId(s.into())
    }

    /// Derives a job id from campaign content.
    ///
    /// The id is the hex SHA-256 of subject, body and the scheduled instant,
    /// separated by NUL bytes so field boundaries cannot collide.
    pub fn derived(
        subject: &str,
        html_body: &str,
        scheduled_at: &chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(subject.as_bytes());
        hasher.update([0u8]);
        hasher.update(html_body.as_bytes());
        hasher.update([0u8]);
        hasher.update(scheduled_at.to_rfc3339().as_bytes());
        JobId(hex::encode(hasher.finalize()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

/// A recipient email address, case-folded at construction.
///
/// All consent, suppression and dedup lookups key on the folded form, so
/// `User@X.com` and `user@x.com` are the same recipient everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Creates an address, trimming whitespace and lowercasing.
    pub fn new(s: impl AsRef<str>) -> Self {
        EmailAddress(s.as_ref().trim().to_lowercase())
    }

    /// Returns the folded address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex SHA-256 of the folded address, used in dedup reservation keys so
    /// raw addresses never appear in composite keys.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque worker identifier stamped on a job while its lease is held.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Generates a fresh opaque worker id.
    pub fn generate() -> Self {
        WorkerId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
