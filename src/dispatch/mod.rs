//! Chunked delivery, dedup reservations and retry backoff.

pub mod backoff;
pub mod chunker;
pub mod dedup;

pub use backoff::{decide, RetryDecision};
pub use chunker::{run_pass, DispatchError, PassOutcome};
pub use dedup::{DedupReservation, DedupStore, ReservationKey, ReservationStatus};
