//! Account verification engine
//!
//! - `expiry`: ordered expiry-field extraction and portal date parsing
//! - `backoff`: per-account failure backoff and the freeze schedule
//! - `orchestrator`: concurrent two-tier checks over many accounts

pub mod backoff;
pub mod expiry;
pub mod orchestrator;

pub use backoff::{BackoffPolicy, BackoffState, FreezeSchedule};
pub use orchestrator::{CheckEvent, CheckOrchestrator, CheckSettings};
