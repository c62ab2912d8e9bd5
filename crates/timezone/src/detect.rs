//! Heuristic timezone detection for leads.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use cadence_core::types::Lead;

/// How much trust to place in a detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Which heuristic produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    ExplicitField,
    PhonePrefix,
    Location,
    OrganizationDefault,
    Fallback,
}

/// Outcome of timezone detection for one lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezoneDetection {
    pub timezone: Tz,
    pub confidence: Confidence,
    pub source: DetectionSource,
}

/// Phone country/area prefix table. Longest numeric prefix wins, checked
/// from 4 digits down to 1.
const PHONE_PREFIXES: &[(&str, Tz)] = &[
    // North American area codes (country code 1 + area code)
    ("1212", Tz::America__New_York),
    ("1646", Tz::America__New_York),
    ("1617", Tz::America__New_York),
    ("1305", Tz::America__New_York),
    ("1404", Tz::America__New_York),
    ("1312", Tz::America__Chicago),
    ("1512", Tz::America__Chicago),
    ("1214", Tz::America__Chicago),
    ("1713", Tz::America__Chicago),
    ("1303", Tz::America__Denver),
    ("1602", Tz::America__Phoenix),
    ("1415", Tz::America__Los_Angeles),
    ("1408", Tz::America__Los_Angeles),
    ("1650", Tz::America__Los_Angeles),
    ("1206", Tz::America__Los_Angeles),
    ("1310", Tz::America__Los_Angeles),
    // Country codes
    ("44", Tz::Europe__London),
    ("353", Tz::Europe__Dublin),
    ("33", Tz::Europe__Paris),
    ("49", Tz::Europe__Berlin),
    ("31", Tz::Europe__Amsterdam),
    ("34", Tz::Europe__Madrid),
    ("39", Tz::Europe__Rome),
    ("46", Tz::Europe__Stockholm),
    ("81", Tz::Asia__Tokyo),
    ("82", Tz::Asia__Seoul),
    ("86", Tz::Asia__Shanghai),
    ("91", Tz::Asia__Kolkata),
    ("65", Tz::Asia__Singapore),
    ("61", Tz::Australia__Sydney),
    ("64", Tz::Pacific__Auckland),
    ("55", Tz::America__Sao_Paulo),
    ("52", Tz::America__Mexico_City),
    // Bare NANP fallback
    ("1", Tz::America__New_York),
];

/// Country (and optional state) to timezone. US entries are keyed by state.
const LOCATIONS: &[(&str, Option<&str>, Tz)] = &[
    ("US", Some("CA"), Tz::America__Los_Angeles),
    ("US", Some("WA"), Tz::America__Los_Angeles),
    ("US", Some("OR"), Tz::America__Los_Angeles),
    ("US", Some("NV"), Tz::America__Los_Angeles),
    ("US", Some("AZ"), Tz::America__Phoenix),
    ("US", Some("CO"), Tz::America__Denver),
    ("US", Some("UT"), Tz::America__Denver),
    ("US", Some("TX"), Tz::America__Chicago),
    ("US", Some("IL"), Tz::America__Chicago),
    ("US", Some("MN"), Tz::America__Chicago),
    ("US", Some("MO"), Tz::America__Chicago),
    ("US", Some("NY"), Tz::America__New_York),
    ("US", Some("MA"), Tz::America__New_York),
    ("US", Some("FL"), Tz::America__New_York),
    ("US", Some("GA"), Tz::America__New_York),
    ("US", Some("PA"), Tz::America__New_York),
    ("US", None, Tz::America__New_York),
    ("CA", None, Tz::America__Toronto),
    ("GB", None, Tz::Europe__London),
    ("UK", None, Tz::Europe__London),
    ("IE", None, Tz::Europe__Dublin),
    ("FR", None, Tz::Europe__Paris),
    ("DE", None, Tz::Europe__Berlin),
    ("NL", None, Tz::Europe__Amsterdam),
    ("ES", None, Tz::Europe__Madrid),
    ("IT", None, Tz::Europe__Rome),
    ("SE", None, Tz::Europe__Stockholm),
    ("JP", None, Tz::Asia__Tokyo),
    ("KR", None, Tz::Asia__Seoul),
    ("CN", None, Tz::Asia__Shanghai),
    ("IN", None, Tz::Asia__Kolkata),
    ("SG", None, Tz::Asia__Singapore),
    ("AU", None, Tz::Australia__Sydney),
    ("NZ", None, Tz::Pacific__Auckland),
    ("BR", None, Tz::America__Sao_Paulo),
    ("MX", None, Tz::America__Mexico_City),
];

/// Resolves lead timezones and converts instants between UTC and local
/// time.
pub struct TimezoneResolver {
    org_defaults: DashMap<Uuid, Tz>,
    fallback: Tz,
}

impl TimezoneResolver {
    pub fn new(fallback: Tz) -> Self {
        Self {
            org_defaults: DashMap::new(),
            fallback,
        }
    }

    /// Parse the engine-wide fallback from an IANA name, defaulting to
    /// `America/New_York` if the name does not parse.
    pub fn from_config(fallback_timezone: &str) -> Self {
        let fallback = fallback_timezone
            .parse::<Tz>()
            .unwrap_or(Tz::America__New_York);
        Self::new(fallback)
    }

    pub fn set_organization_default(&self, organization_id: Uuid, tz: Tz) {
        self.org_defaults.insert(organization_id, tz);
    }

    /// Detection precedence: explicit field, phone prefix, location table,
    /// organization default, engine fallback.
    pub fn detect_timezone(&self, lead: &Lead) -> TimezoneDetection {
        if let Some(tz) = lead.timezone.as_deref().and_then(|s| s.parse::<Tz>().ok()) {
            return TimezoneDetection {
                timezone: tz,
                confidence: Confidence::High,
                source: DetectionSource::ExplicitField,
            };
        }

        if let Some(tz) = lead.phone.as_deref().and_then(match_phone_prefix) {
            debug!(lead_id = %lead.id, tz = %tz, "timezone matched by phone prefix");
            return TimezoneDetection {
                timezone: tz,
                confidence: Confidence::Medium,
                source: DetectionSource::PhonePrefix,
            };
        }

        if let Some(tz) = match_location(lead.country.as_deref(), lead.state.as_deref()) {
            return TimezoneDetection {
                timezone: tz,
                confidence: Confidence::Medium,
                source: DetectionSource::Location,
            };
        }

        if let Some(tz) = self.org_defaults.get(&lead.organization_id) {
            return TimezoneDetection {
                timezone: *tz,
                confidence: Confidence::Low,
                source: DetectionSource::OrganizationDefault,
            };
        }

        TimezoneDetection {
            timezone: self.fallback,
            confidence: Confidence::Low,
            source: DetectionSource::Fallback,
        }
    }

    /// Detect timezones for a batch of leads, preserving input order.
    pub fn bulk_detect(&self, leads: &[Lead]) -> Vec<TimezoneDetection> {
        leads.iter().map(|l| self.detect_timezone(l)).collect()
    }

    pub fn fallback(&self) -> Tz {
        self.fallback
    }
}

/// Convert a UTC instant into the given zone.
pub fn convert_to_timezone(instant: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    instant.with_timezone(&tz)
}

/// Convert a local wall-clock datetime back to UTC. Ambiguous or skipped
/// local times (DST transitions) resolve to the earliest valid instant.
pub fn local_to_utc(local: chrono::NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => {
            // Skipped by a forward DST jump; push one hour later.
            let shifted = local + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&local))
        }
    }
}

fn clean_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    // International dialing prefix 00 -> drop.
    digits.strip_prefix("00").unwrap_or(&digits).to_string()
}

/// Longest numeric prefix match, from 4 digits down to 1.
fn match_phone_prefix(phone: &str) -> Option<Tz> {
    let cleaned = clean_phone(phone);
    if cleaned.is_empty() {
        return None;
    }
    for len in (1..=4usize).rev() {
        if cleaned.len() < len {
            continue;
        }
        let prefix = &cleaned[..len];
        if let Some((_, tz)) = PHONE_PREFIXES.iter().find(|(p, _)| *p == prefix) {
            return Some(*tz);
        }
    }
    None
}

fn match_location(country: Option<&str>, state: Option<&str>) -> Option<Tz> {
    let country = country?.to_uppercase();
    let state = state.map(|s| s.to_uppercase());

    if let Some(state) = state.as_deref() {
        if let Some((_, _, tz)) = LOCATIONS
            .iter()
            .find(|(c, s, _)| *c == country && *s == Some(state))
        {
            return Some(*tz);
        }
    }
    LOCATIONS
        .iter()
        .find(|(c, s, _)| *c == country && s.is_none())
        .map(|(_, _, tz)| *tz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn lead() -> Lead {
        Lead::new(Uuid::new_v4(), "prospect@example.com")
    }

    #[test]
    fn test_explicit_field_wins() {
        let mut l = lead();
        l.timezone = Some("Europe/Berlin".to_string());
        l.phone = Some("+1 415 555 0100".to_string());

        let resolver = TimezoneResolver::new(Tz::America__New_York);
        let det = resolver.detect_timezone(&l);
        assert_eq!(det.timezone, Tz::Europe__Berlin);
        assert_eq!(det.confidence, Confidence::High);
        assert_eq!(det.source, DetectionSource::ExplicitField);
    }

    #[test]
    fn test_phone_prefix_longest_match() {
        let mut l = lead();
        l.phone = Some("+14155550100".to_string());

        let resolver = TimezoneResolver::new(Tz::America__New_York);
        let det = resolver.detect_timezone(&l);
        // 1415 must beat the bare "1" NANP fallback.
        assert_eq!(det.timezone, Tz::America__Los_Angeles);
        assert_eq!(det.source, DetectionSource::PhonePrefix);
        assert_eq!(det.confidence, Confidence::Medium);
    }

    #[test]
    fn test_phone_country_code() {
        let mut l = lead();
        l.phone = Some("+49 30 1234567".to_string());

        let resolver = TimezoneResolver::new(Tz::America__New_York);
        assert_eq!(resolver.detect_timezone(&l).timezone, Tz::Europe__Berlin);
    }

    #[test]
    fn test_location_state_beats_country_row() {
        let mut l = lead();
        l.country = Some("US".to_string());
        l.state = Some("ca".to_string());

        let resolver = TimezoneResolver::new(Tz::America__New_York);
        let det = resolver.detect_timezone(&l);
        assert_eq!(det.timezone, Tz::America__Los_Angeles);
        assert_eq!(det.source, DetectionSource::Location);
    }

    #[test]
    fn test_country_only_location() {
        let mut l = lead();
        l.country = Some("JP".to_string());

        let resolver = TimezoneResolver::new(Tz::America__New_York);
        assert_eq!(resolver.detect_timezone(&l).timezone, Tz::Asia__Tokyo);
    }

    #[test]
    fn test_org_default_then_fallback() {
        let l = lead();
        let resolver = TimezoneResolver::new(Tz::America__Chicago);

        let det = resolver.detect_timezone(&l);
        assert_eq!(det.timezone, Tz::America__Chicago);
        assert_eq!(det.source, DetectionSource::Fallback);
        assert_eq!(det.confidence, Confidence::Low);

        resolver.set_organization_default(l.organization_id, Tz::Europe__London);
        let det = resolver.detect_timezone(&l);
        assert_eq!(det.timezone, Tz::Europe__London);
        assert_eq!(det.source, DetectionSource::OrganizationDefault);
    }

    #[test]
    fn test_local_to_utc_roundtrip() {
        let local = NaiveDate::from_ymd_opt(2025, 7, 14)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let utc = local_to_utc(local, Tz::America__Los_Angeles);
        // PDT is UTC-7 in July.
        assert_eq!(utc.format("%H:%M").to_string(), "16:00");

        let back = convert_to_timezone(utc, Tz::America__Los_Angeles);
        assert_eq!(back.format("%H:%M").to_string(), "09:00");
    }
}
