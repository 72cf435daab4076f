//! Quantity mismatch escalation and approval.

mod engine;
mod types;

pub use engine::{BypassEngine, Resolution};
pub use types::{
    BypassDecision, BypassFilter, BypassRequest, BypassStatus, Discrepancy, MIN_REASON_LEN,
};
