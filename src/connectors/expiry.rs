//! Shared expiry and timestamp helpers for credential brokers.
//!
//! Every broker funnels expiry decisions through these helpers so that the
//! margin test and the persisted expiry use the same UTC-normalized clock.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;

/// Normalize a stored timestamp to UTC. Idempotent: normalizing an already
/// UTC value changes nothing.
pub fn normalize_utc(dt: DateTimeWithTimeZone) -> DateTime<Utc> {
    dt.with_timezone(&Utc)
}

/// Interpret a timezone-less timestamp as UTC.
pub fn naive_as_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    naive.and_utc()
}

/// Compute an expiry instant from a provider's `expires_in`, falling back to
/// `default_lifetime` for providers that omit it.
pub fn expiry_from_expires_in(
    now: DateTime<Utc>,
    expires_in: Option<u64>,
    default_lifetime: Duration,
) -> DateTime<Utc> {
    match expires_in {
        Some(seconds) => now + Duration::seconds(seconds as i64),
        None => now + default_lifetime,
    }
}

/// The refresh gate predicate: true when the credential is inside the safety
/// margin (or already expired) and a refresh attempt is due.
pub fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>, margin: Duration) -> bool {
    expires_at - now <= margin
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Timelike};

    #[test]
    fn normalize_utc_is_idempotent() {
        let offset = FixedOffset::east_opt(5 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        let once = normalize_utc(local);
        let twice = normalize_utc(once.into());

        assert_eq!(once, twice);
        assert_eq!(once.hour(), 7);
    }

    #[test]
    fn naive_timestamps_become_aware() {
        let naive = NaiveDateTime::parse_from_str("2025-06-01 12:00:00", "%Y-%m-%d %H:%M:%S")
            .expect("parses");

        let aware = naive_as_utc(naive);
        assert_eq!(aware.timezone(), Utc);
        assert_eq!(normalize_utc(aware.into()), aware);
    }

    #[test]
    fn expiry_uses_provider_value_when_present() {
        let now = Utc::now();
        let expiry = expiry_from_expires_in(now, Some(120), Duration::seconds(3600));
        assert_eq!(expiry, now + Duration::seconds(120));
    }

    #[test]
    fn expiry_falls_back_to_default_lifetime() {
        let now = Utc::now();
        let expiry = expiry_from_expires_in(now, None, Duration::seconds(3600));
        assert_eq!(expiry, now + Duration::seconds(3600));
    }

    #[test]
    fn refresh_gate_honors_margin() {
        let now = Utc::now();
        let margin = Duration::seconds(300);

        // Comfortably fresh: no refresh
        assert!(!needs_refresh(now + Duration::seconds(301), now, margin));
        // Inside the margin: refresh
        assert!(needs_refresh(now + Duration::seconds(299), now, margin));
        // Already expired: refresh
        assert!(needs_refresh(now - Duration::seconds(1), now, margin));
    }
}
