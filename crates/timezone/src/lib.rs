//! Timezone detection and conversion for send scheduling.
//!
//! Detection is heuristic: an explicit field on the lead wins, then the
//! longest matching phone prefix, then a country/state table, then the
//! organization default, then the engine-wide fallback. Conversion uses
//! the IANA database via `chrono-tz`.

pub mod detect;
pub mod windows;

pub use detect::{
    convert_to_timezone, local_to_utc, Confidence, DetectionSource, TimezoneDetection,
    TimezoneResolver,
};
pub use windows::{business_hours, optimal_send_window, region_of};
