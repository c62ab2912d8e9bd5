//! End-to-end scheduling: timezone detection feeding the step scheduler.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use cadence_core::types::{Lead, SendWindow, SequenceStep, StepKind, TemplateSettings};
use cadence_enrollment::next_execution_time;
use cadence_timezone::detect::{Confidence, DetectionSource};
use cadence_timezone::TimezoneResolver;

fn one_step_template_settings() -> TemplateSettings {
    TemplateSettings {
        pause_on_reply: true,
        skip_weekends: true,
        timezone_aware: true,
        daily_send_limit: None,
        default_timezone: None,
    }
}

fn step_with_window() -> SequenceStep {
    SequenceStep {
        id: Uuid::new_v4(),
        template_id: Uuid::new_v4(),
        step_number: 1,
        kind: StepKind::Message {
            subject: "Quick question about your stack".into(),
            body: "Hi Jane,".into(),
        },
        wait_days: 0,
        wait_hours: 0,
        send_window: Some(SendWindow::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )),
    }
}

#[test]
fn jane_is_scheduled_for_nine_am_next_weekday_in_la() {
    let org = Uuid::new_v4();
    let mut jane = Lead::new(org, "jane@techstartup.io");
    jane.phone = Some("+14155550123".into());

    let resolver = TimezoneResolver::new(Tz::America__New_York);
    let detection = resolver.detect_timezone(&jane);
    assert_eq!(detection.timezone, Tz::America__Los_Angeles);
    assert_eq!(detection.source, DetectionSource::PhonePrefix);
    assert_eq!(detection.confidence, Confidence::Medium);

    // Wednesday 2025-03-12 20:00 in Los Angeles (PDT) = 03:00 UTC Thursday.
    let now = Utc.from_utc_datetime(
        &NaiveDate::from_ymd_opt(2025, 3, 13)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap(),
    );

    let when = next_execution_time(
        now,
        &step_with_window(),
        &one_step_template_settings(),
        detection.timezone,
    );

    // 09:00 local the next weekday (Thursday), converted to UTC.
    let local = when.with_timezone(&Tz::America__Los_Angeles);
    assert_eq!(
        local.format("%Y-%m-%d %H:%M").to_string(),
        "2025-03-13 09:00"
    );
    assert_eq!(when.format("%Y-%m-%d %H:%M").to_string(), "2025-03-13 16:00");
    assert!(when >= now);
}

#[test]
fn friday_evening_rolls_to_monday_morning() {
    let org = Uuid::new_v4();
    let mut jane = Lead::new(org, "jane@techstartup.io");
    jane.phone = Some("+14155550123".into());

    let resolver = TimezoneResolver::new(Tz::America__New_York);
    let tz = resolver.detect_timezone(&jane).timezone;

    // Friday 2025-03-14 20:00 PDT = Saturday 03:00 UTC.
    let now = Utc.from_utc_datetime(
        &NaiveDate::from_ymd_opt(2025, 3, 15)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap(),
    );

    let when = next_execution_time(now, &step_with_window(), &one_step_template_settings(), tz);
    let local = when.with_timezone(&Tz::America__Los_Angeles);
    assert_eq!(
        local.format("%Y-%m-%d %H:%M").to_string(),
        "2025-03-17 09:00"
    );
}
