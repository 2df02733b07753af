//! Roundtable stream core: debounced per-agent aggregation of streamed chat
//! tokens.

pub mod aggregator;
pub mod ingest;
pub mod logging;
pub mod markers;
