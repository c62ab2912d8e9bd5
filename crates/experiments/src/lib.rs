//! A/B experimentation across cadence variants: weighted assignment at
//! enrollment time and Wilson-interval significance analysis over stored
//! outcome counters.

pub mod assignment;
pub mod engine;
pub mod stats;

pub use assignment::{assign_variant, pick_variant};
pub use engine::{apply_overrides, ConclusionReport, ExperimentEngine, TestResults};
pub use stats::{
    aggregate_variant, intervals_overlap, pick_winner, wilson_interval, VariantMetrics,
    WilsonInterval,
};
