//! Optimal send windows — the local time-of-day ranges in which outbound
//! touches perform best, by weekday and region.

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;

use cadence_core::types::SendWindow;

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default()
}

/// Broad region key derived from the IANA zone name ("America/Denver" ->
/// "America").
pub fn region_of(tz: Tz) -> &'static str {
    let name = tz.name();
    match name.split('/').next() {
        Some("America") => "America",
        Some("Europe") => "Europe",
        Some("Asia") => "Asia",
        Some("Australia") | Some("Pacific") => "Oceania",
        _ => "Other",
    }
}

/// Region-keyed default business-hours window, used when the weekday table
/// has nothing better to offer.
pub fn business_hours(region: &str) -> SendWindow {
    match region {
        "Europe" => SendWindow::new(t(8, 30), t(16, 30)),
        "Asia" => SendWindow::new(t(9, 0), t(18, 0)),
        "Oceania" => SendWindow::new(t(8, 30), t(17, 0)),
        _ => SendWindow::new(t(9, 0), t(17, 0)),
    }
}

/// Weekday-specific window bounded by the two preferred touch times for
/// that day. Saturday and Sunday return `None`, meaning "defer". Regions
/// without tuned numbers fall back to their business-hours window.
pub fn optimal_send_window(tz: Tz, weekday: Weekday) -> Option<SendWindow> {
    if matches!(weekday, Weekday::Sat | Weekday::Sun) {
        return None;
    }

    let region = region_of(tz);
    let tuned = match region {
        // Early-week mornings outperform; Friday narrows before lunch.
        "America" | "Europe" => Some(match weekday {
            Weekday::Mon => (t(9, 30), t(15, 30)),
            Weekday::Tue | Weekday::Wed => (t(9, 0), t(16, 0)),
            Weekday::Thu => (t(9, 30), t(15, 30)),
            _ => (t(9, 0), t(13, 0)),
        }),
        _ => None,
    };

    Some(match tuned {
        Some((start, end)) => SendWindow::new(start, end),
        None => business_hours(region),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekday_windows() {
        let w = optimal_send_window(Tz::America__Los_Angeles, Weekday::Tue).unwrap();
        assert_eq!(w.start, t(9, 0));
        assert_eq!(w.end, t(16, 0));

        assert!(optimal_send_window(Tz::America__Los_Angeles, Weekday::Sat).is_none());
        assert!(optimal_send_window(Tz::Europe__Berlin, Weekday::Sun).is_none());
    }

    #[test]
    fn test_untuned_region_falls_back_to_business_hours() {
        let w = optimal_send_window(Tz::Asia__Tokyo, Weekday::Mon).unwrap();
        assert_eq!(w, business_hours("Asia"));
    }

    #[test]
    fn test_business_hours_by_region() {
        assert_eq!(region_of(Tz::Europe__Paris), "Europe");
        assert_eq!(region_of(Tz::America__Denver), "America");
        assert_eq!(region_of(Tz::Australia__Sydney), "Oceania");

        let eu = business_hours("Europe");
        assert_eq!(eu.start, t(8, 30));
        let us = business_hours("America");
        assert_eq!(us.end, t(17, 0));
    }

    #[test]
    fn test_window_contains() {
        let w = SendWindow::new(t(9, 0), t(17, 0));
        assert!(w.contains(t(9, 0)));
        assert!(w.contains(t(12, 30)));
        assert!(!w.contains(t(17, 0)));
        assert!(!w.contains(t(20, 0)));
    }
}
