//! Station pipeline: per-station processing rules and order advancement.

mod processor;
mod types;

pub use processor::StationPipeline;
pub use types::{ProcessingOutcome, ProcessingRequest};
