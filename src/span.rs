use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// A span of whole days where both ends are inclusive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateSpan { start, end }
    }

    /// The `days`-long span finishing on `end`, so `trailing(d, 30)` is `[d - 29, d]`.
    ///
    /// `days` of 0 is treated as 1. A window reaching past the earliest representable date
    /// starts there.
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        let back = i64::from(days.max(1)) - 1;
        DateSpan {
            start: end
                .checked_sub_signed(Duration::days(back))
                .unwrap_or(NaiveDate::MIN),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Standard interval overlap test. Touching at a single day counts.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Iterate over every day in the span, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}
