//! Reminder tier classification.
//!
//! Pure functions: given an expiry instant and "now", decide which reminder
//! applies. `Expired` is a one-sided threshold (once past it, it always
//! matches); the other tiers are symmetric windows of +/- [`TOLERANCE_HOURS`] around
//! `now + offset`, absorbing drift between hourly and daily scans. Where two
//! windows share a boundary the more urgent tier wins.

use chrono::{DateTime, Duration, Utc};

use crate::model::ReminderTier;

/// Half-width of each reminder window, in hours.
pub const TOLERANCE_HOURS: i64 = 24;

const MS_PER_DAY: i64 = 86_400_000;

/// Windowed tiers in evaluation order, with their day offset from now.
const WINDOWS: [(ReminderTier, i64); 3] = [
    (ReminderTier::OneDay, 1),
    (ReminderTier::ThreeDay, 3),
    (ReminderTier::SevenDay, 7),
];

/// Classify a subscription expiring at `expiry` as seen at `now`.
pub fn classify(expiry: DateTime<Utc>, now: DateTime<Utc>) -> ReminderTier {
    if expiry <= now - Duration::days(1) {
        return ReminderTier::Expired;
    }

    let tolerance = Duration::hours(TOLERANCE_HOURS);
    for (tier, offset) in WINDOWS {
        let target = now + Duration::days(offset);
        if expiry >= target - tolerance && expiry <= target + tolerance {
            return tier;
        }
    }

    ReminderTier::None
}

/// Whole days until expiry, rounded up. Negative once expired.
pub fn remaining_days(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (expiry - now).num_milliseconds();
    let days = ms / MS_PER_DAY;
    if ms % MS_PER_DAY > 0 {
        days + 1
    } else {
        days
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn seven_days_out_is_seven_day_tier() {
        assert_eq!(classify(now() + Duration::days(7), now()), ReminderTier::SevenDay);
        assert_eq!(
            classify(now() + Duration::days(6) + Duration::hours(1), now()),
            ReminderTier::SevenDay
        );
        assert_eq!(classify(now() + Duration::days(8), now()), ReminderTier::SevenDay);
    }

    #[test]
    fn three_and_one_day_windows() {
        assert_eq!(classify(now() + Duration::days(3), now()), ReminderTier::ThreeDay);
        assert_eq!(
            classify(now() + Duration::hours(90), now()),
            ReminderTier::ThreeDay
        );
        assert_eq!(classify(now() + Duration::days(1), now()), ReminderTier::OneDay);
        assert_eq!(classify(now(), now()), ReminderTier::OneDay);
    }

    #[test]
    fn shared_boundary_prefers_more_urgent_tier() {
        // now + 2d closes the one-day window and opens the three-day window.
        assert_eq!(classify(now() + Duration::days(2), now()), ReminderTier::OneDay);
        assert_eq!(
            classify(now() + Duration::days(2) + Duration::seconds(1), now()),
            ReminderTier::ThreeDay
        );
    }

    #[test]
    fn gaps_between_windows_are_none() {
        assert_eq!(classify(now() + Duration::days(5), now()), ReminderTier::None);
        assert_eq!(classify(now() + Duration::days(9), now()), ReminderTier::None);
        assert_eq!(classify(now() + Duration::days(30), now()), ReminderTier::None);
        // Lapsed less than a day ago: not yet past the expired threshold.
        assert_eq!(classify(now() - Duration::hours(12), now()), ReminderTier::None);
    }

    #[test]
    fn anything_a_day_or_more_past_is_expired() {
        assert_eq!(classify(now() - Duration::days(1), now()), ReminderTier::Expired);
        assert_eq!(classify(now() - Duration::days(400), now()), ReminderTier::Expired);
    }

    #[test]
    fn classification_is_deterministic() {
        for hours in (-200..250).step_by(7) {
            let expiry = now() + Duration::hours(hours);
            assert_eq!(classify(expiry, now()), classify(expiry, now()));
        }
    }

    #[test]
    fn at_most_one_window_matches() {
        for minutes in (0..(10 * 24 * 60)).step_by(17) {
            let expiry = now() + Duration::minutes(minutes);
            let matching = WINDOWS
                .iter()
                .filter(|(_, offset)| {
                    let target = now() + Duration::days(*offset);
                    let tolerance = Duration::hours(TOLERANCE_HOURS);
                    expiry > target - tolerance && expiry < target + tolerance
                })
                .count();
            assert!(matching <= 1, "expiry {expiry} in {matching} open windows");
        }
    }

    #[test]
    fn remaining_days_rounds_up() {
        assert_eq!(remaining_days(now() + Duration::days(7), now()), 7);
        assert_eq!(remaining_days(now() + Duration::hours(145), now()), 7);
        assert_eq!(remaining_days(now() + Duration::minutes(1), now()), 1);
        assert_eq!(remaining_days(now(), now()), 0);
        assert_eq!(remaining_days(now() - Duration::hours(36), now()), -1);
        assert_eq!(remaining_days(now() - Duration::days(1), now()), -1);
    }
}
