//! Job claiming and lease handling.

pub mod claim;

pub use claim::{claim_due, ClaimedJob};
