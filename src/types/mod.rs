//! Core domain types for the dispatch engine.

pub mod consent;
pub mod ids;
pub mod job;

pub use consent::{ConsentRecord, SuppressionEntry};
pub use ids::{EmailAddress, JobId, WorkerId};
pub use job::{CampaignJob, JobProgress, JobStatus, SendLogEntry};
