//! Variant metrics aggregation and Wilson-interval significance math.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cadence_core::types::{
    Enrollment, ExperimentVariant, PrimaryMetric, TestSettings, VariantKind,
};

/// Statistically adjusted bounds on a true conversion rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WilsonInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Wilson score interval for observed rate `p` over `n` trials at the
/// given z critical value. Returns the degenerate [0, 1] interval for
/// `n == 0`.
pub fn wilson_interval(p: f64, n: u64, z: f64) -> WilsonInterval {
    if n == 0 {
        return WilsonInterval {
            lower: 0.0,
            upper: 1.0,
        };
    }
    let p = p.clamp(0.0, 1.0);
    let n = n as f64;
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let margin = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denom;

    WilsonInterval {
        lower: (center - margin).max(0.0),
        upper: (center + margin).min(1.0),
    }
}

/// Two intervals overlap unless one lies strictly above the other.
pub fn intervals_overlap(a: WilsonInterval, b: WilsonInterval) -> bool {
    !(a.upper < b.lower || b.upper < a.lower)
}

/// Aggregated outcome rates for one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub variant_id: Uuid,
    pub kind: VariantKind,
    pub is_control: bool,
    pub enrollments: u64,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub replied: u64,
    pub booked: u64,
    pub unsubscribed: u64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub reply_rate: f64,
    pub booking_rate: f64,
    pub unsubscribe_rate: f64,
    /// Rate selected by the test's primary metric.
    pub conversion_rate: f64,
    /// Trials behind `conversion_rate` (sends or enrollments, by metric).
    pub sample_size: u64,
    pub interval: WilsonInterval,
}

fn rate(num: u64, denom: u64) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Sum a variant's enrollment counters and derive its rates and interval.
/// Only enrollments assigned to this variant contribute.
pub fn aggregate_variant(
    variant: &ExperimentVariant,
    settings: &TestSettings,
    enrollments: &[Enrollment],
) -> VariantMetrics {
    let mut n_enrollments = 0u64;
    let mut sent = 0u64;
    let mut opened = 0u64;
    let mut clicked = 0u64;
    let mut replied = 0u64;
    let mut booked = 0u64;
    let mut unsubscribed = 0u64;

    for enrollment in enrollments {
        if enrollment.variant_id != Some(variant.id) {
            continue;
        }
        n_enrollments += 1;
        sent += enrollment.counters.sent;
        opened += enrollment.counters.opened;
        clicked += enrollment.counters.clicked;
        replied += enrollment.counters.replied;
        booked += enrollment.counters.booked;
        unsubscribed += enrollment.counters.unsubscribed;
    }

    let open_rate = rate(opened, sent);
    let click_rate = rate(clicked, sent);
    let reply_rate = rate(replied, sent);
    let booking_rate = rate(booked, n_enrollments);
    let unsubscribe_rate = rate(unsubscribed, n_enrollments);

    let (conversion_rate, sample_size) = match settings.primary_metric {
        PrimaryMetric::OpenRate => (open_rate, sent),
        PrimaryMetric::ClickRate => (click_rate, sent),
        PrimaryMetric::ReplyRate => (reply_rate, sent),
        PrimaryMetric::BookingRate => (booking_rate, n_enrollments),
    };

    let interval = wilson_interval(
        conversion_rate,
        sample_size,
        settings.confidence_level.z_score(),
    );

    VariantMetrics {
        variant_id: variant.id,
        kind: variant.kind,
        is_control: variant.is_control,
        enrollments: n_enrollments,
        sent,
        opened,
        clicked,
        replied,
        booked,
        unsubscribed,
        open_rate,
        click_rate,
        reply_rate,
        booking_rate,
        unsubscribe_rate,
        conversion_rate,
        sample_size,
        interval,
    }
}

/// A variant beats control iff its rate is higher AND the confidence
/// intervals do not overlap. Among qualifying variants, the one with the
/// largest relative improvement over control wins.
pub fn pick_winner<'a>(
    control: &VariantMetrics,
    challengers: impl IntoIterator<Item = &'a VariantMetrics>,
) -> Option<(Uuid, f64)> {
    let mut best: Option<(Uuid, f64)> = None;

    for metrics in challengers {
        if metrics.is_control {
            continue;
        }
        if metrics.conversion_rate <= control.conversion_rate {
            continue;
        }
        if intervals_overlap(metrics.interval, control.interval) {
            continue;
        }
        let improvement = if control.conversion_rate > 0.0 {
            (metrics.conversion_rate - control.conversion_rate) / control.conversion_rate
        } else {
            f64::INFINITY
        };
        match best {
            Some((_, current)) if improvement <= current => {}
            _ => best = Some((metrics.variant_id, improvement)),
        }
    }

    best
}
