//! # SyncML Benchmarks
//!
//! Shared data generators for the criterion benchmarks in `benches/`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
