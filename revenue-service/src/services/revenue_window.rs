//! All-time and month-to-date revenue buckets.

use crate::models::{Money, PaymentEvent};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};

/// 00:00:00 UTC on the first day of `now`'s UTC calendar month.
pub fn month_start_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    Utc.from_utc_datetime(&first)
}

/// First instant of the month after the one containing `instant`.
pub fn next_month_start(instant: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = match instant.month() {
        12 => (instant.year() + 1, 1),
        m => (instant.year(), m + 1),
    };
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    Utc.from_utc_datetime(&first)
}

/// Start of the window holding the last `months` calendar months up to and
/// including `now`'s month. Zero is treated as one.
pub fn trailing_months_start(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let current = month_start_utc(now);
    current
        .checked_sub_months(Months::new(months.saturating_sub(1)))
        .unwrap_or(current)
}

/// Calendar-month query ranges covering `from` through `now`, oldest first.
///
/// Each range runs from a month's first instant to one second before the next
/// month, except the last, which ends at `now`. A `from` later than `now`
/// yields just the current month.
pub fn month_ranges(from: DateTime<Utc>, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let current = month_start_utc(now);
    let mut start = month_start_utc(from).min(current);
    let mut ranges = Vec::new();

    while start <= current {
        let next = next_month_start(start);
        ranges.push((start, (next - Duration::seconds(1)).min(now)));
        start = next;
    }
    ranges
}

#[derive(Debug, Clone)]
pub struct RevenueWindowAggregator {
    month_start: DateTime<Utc>,
    all_time: Money,
    month_to_date: Money,
}

impl RevenueWindowAggregator {
    pub fn new(month_start: DateTime<Utc>) -> Self {
        Self {
            month_start,
            all_time: Money::ZERO,
            month_to_date: Money::ZERO,
        }
    }

    /// Count a succeeded, positive event. Returns whether it was admitted.
    pub fn admit(&mut self, event: &PaymentEvent) -> bool {
        if !event.succeeded || event.amount.is_zero() {
            return false;
        }

        self.all_time += event.amount;
        if event.occurred_at >= self.month_start {
            self.month_to_date += event.amount;
        }
        true
    }

    pub fn all_time(&self) -> Money {
        self.all_time
    }

    pub fn month_to_date(&self) -> Money {
        self.month_to_date
    }
}
