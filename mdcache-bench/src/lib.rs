//! # mdcache Bench
//!
//! Synthetic feed generation and ingest measurement for mdcache.

pub mod fixtures;
pub mod throughput;
