//! Step scheduling — computes the next UTC instant at which a step should
//! fire, as a pure function of the clock, the step, the template settings,
//! and the lead's timezone.

use chrono::{
    DateTime, Datelike, Days, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;

use cadence_core::types::{SendWindow, SequenceStep, TemplateSettings};
use cadence_timezone::detect::local_to_utc;
use cadence_timezone::windows::{business_hours, optimal_send_window, region_of};

const MAX_PLACEMENT_DAYS: u32 = 14;

/// Next UTC instant at which `step` should fire. Never earlier than `now`.
pub fn next_execution_time(
    now: DateTime<Utc>,
    step: &SequenceStep,
    settings: &TemplateSettings,
    tz: Tz,
) -> DateTime<Utc> {
    let candidate = now
        + Duration::days(i64::from(step.wait_days))
        + Duration::hours(i64::from(step.wait_hours));

    let scheduled = if settings.timezone_aware {
        let local = candidate.with_timezone(&tz).naive_local();
        let placed = place_local(local, step.send_window, settings, tz);
        local_to_utc(placed, tz)
    } else {
        let placed = place_utc(candidate.naive_utc(), step.send_window, settings);
        Utc.from_utc_datetime(&placed)
    };

    scheduled.max(now)
}

/// Place a local wall-clock candidate into an acceptable window.
///
/// The window is the step's explicit one, or the weekday-specific optimal
/// window (weekends defer). Before the window start advances to the start;
/// after the end advances to the next day. Weekends jump to the following
/// Monday when weekend skipping is on.
fn place_local(
    candidate: NaiveDateTime,
    explicit: Option<SendWindow>,
    settings: &TemplateSettings,
    tz: Tz,
) -> NaiveDateTime {
    let mut local = candidate;

    for _ in 0..MAX_PLACEMENT_DAYS {
        let weekday = local.weekday();

        if is_weekend(weekday) && settings.skip_weekends {
            local = monday_after(local);
            continue;
        }

        let window = match explicit {
            Some(w) => Some(w),
            None => optimal_send_window(tz, weekday),
        };

        let Some(window) = window else {
            // Weekend with no explicit window: the optimal table is empty,
            // so defer to the next day.
            local = next_day_start(local);
            continue;
        };

        let t = local.time();
        if t < window.start {
            return local.date().and_time(window.start);
        }
        if window.contains(t) {
            return local;
        }
        // Past the window end; re-enter at the next day's window start.
        local = next_day_start(local);
    }

    // Pathological settings; fall back to business hours on whatever day
    // the loop stopped at.
    let fallback = business_hours(region_of(tz));
    local.date().and_time(fallback.start)
}

/// Same advancement logic applied directly in UTC, explicit window only.
fn place_utc(
    candidate: NaiveDateTime,
    explicit: Option<SendWindow>,
    settings: &TemplateSettings,
) -> NaiveDateTime {
    let mut dt = candidate;

    if let Some(window) = explicit {
        for _ in 0..MAX_PLACEMENT_DAYS {
            let t = dt.time();
            if t < window.start {
                dt = dt.date().and_time(window.start);
                break;
            }
            if window.contains(t) {
                break;
            }
            dt = next_day_start(dt);
        }
    }

    if settings.skip_weekends && is_weekend(dt.weekday()) {
        dt = monday_after(dt);
    }
    dt
}

fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// Following Monday, preserving the time of day.
fn monday_after(dt: NaiveDateTime) -> NaiveDateTime {
    let days = match dt.weekday() {
        Weekday::Sat => 2,
        Weekday::Sun => 1,
        _ => 0,
    };
    dt.checked_add_days(Days::new(days)).unwrap_or(dt)
}

fn next_day_start(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date()
        .checked_add_days(Days::new(1))
        .map(|d| d.and_time(NaiveTime::MIN))
        .unwrap_or(dt)
}
