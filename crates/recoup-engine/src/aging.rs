//! Aging classification: `(due date, today) -> bucket`.
//!
//! Pure functions; the assignment engine and the draft generator both use
//! them so the two stages never disagree about an invoice's bucket.

use chrono::NaiveDate;
use recoup_store::AgingBucket;

/// Whole days between `due_date` and `today`. Negative before the due date.
pub fn days_past_due(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (today - due_date).num_days()
}

/// Bucket for a days-past-due count. Upper bounds are inclusive.
pub fn bucket_for_days(days: i64) -> AgingBucket {
    match days {
        d if d < 0 => AgingBucket::Current,
        0..=30 => AgingBucket::Dpd1To30,
        31..=60 => AgingBucket::Dpd31To60,
        61..=90 => AgingBucket::Dpd61To90,
        91..=120 => AgingBucket::Dpd91To120,
        121..=150 => AgingBucket::Dpd121To150,
        _ => AgingBucket::Dpd150Plus,
    }
}

/// Classify an invoice due on `due_date` as of `today`.
pub fn classify(due_date: NaiveDate, today: NaiveDate) -> AgingBucket {
    bucket_for_days(days_past_due(due_date, today))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 30).unwrap()
    }

    fn due_days_ago(days: i64) -> NaiveDate {
        if days >= 0 {
            today() - Days::new(days as u64)
        } else {
            today() + Days::new(days.unsigned_abs())
        }
    }

    #[test]
    fn boundaries() {
        let cases = [
            (-1, AgingBucket::Current),
            (0, AgingBucket::Dpd1To30),
            (30, AgingBucket::Dpd1To30),
            (31, AgingBucket::Dpd31To60),
            (60, AgingBucket::Dpd31To60),
            (61, AgingBucket::Dpd61To90),
            (90, AgingBucket::Dpd61To90),
            (91, AgingBucket::Dpd91To120),
            (120, AgingBucket::Dpd91To120),
            (121, AgingBucket::Dpd121To150),
            (150, AgingBucket::Dpd121To150),
            (151, AgingBucket::Dpd150Plus),
        ];
        for (days, expected) in cases {
            assert_eq!(
                classify(due_days_ago(days), today()),
                expected,
                "{days} days past due"
            );
        }
    }

    #[test]
    fn far_future_and_far_past() {
        assert_eq!(bucket_for_days(-10_000), AgingBucket::Current);
        assert_eq!(bucket_for_days(10_000), AgingBucket::Dpd150Plus);
    }

    #[test]
    fn days_past_due_crosses_month_and_leap_day() {
        let due = NaiveDate::from_ymd_opt(2028, 2, 28).unwrap();
        let today = NaiveDate::from_ymd_opt(2028, 3, 1).unwrap();
        assert_eq!(days_past_due(due, today), 2);
        assert_eq!(days_past_due(today, due), -2);
    }

    #[test]
    fn classification_is_monotonic_in_days() {
        let mut previous = bucket_for_days(-5);
        for days in -4..400 {
            let bucket = bucket_for_days(days);
            assert!(bucket >= previous, "bucket went backwards at day {days}");
            previous = bucket;
        }
    }
}
