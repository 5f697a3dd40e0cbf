// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Temporal types based on the [`chrono`] crate.

use duplicate::duplicate_item;

pub type Tz = chrono_tz::Tz;
pub type FixedOffset = chrono::FixedOffset;

pub type LocalTime = chrono::NaiveTime;

/// A time of day with a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    pub time: chrono::NaiveTime,
    pub offset: FixedOffset,
}

pub type Date = chrono::NaiveDate;
pub type LocalDateTime = chrono::NaiveDateTime;
pub type DateTime = chrono::DateTime<Tz>;
pub type DateTimeFixed = chrono::DateTime<FixedOffset>;

const SECONDS_PER_MONTH_ESTIMATE: i64 = 2_629_746;
const SECONDS_PER_DAY: i64 = 86_400;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A duration as understood by the database: months, days, seconds, and
/// nanoseconds are carried separately because their conversion factors depend
/// on the point in time they are applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Duration {
    pub(crate) months: i64,
    pub(crate) days: i64,
    pub(crate) seconds: i64,
    pub(crate) nanoseconds: i32,
}

impl Duration {
    /// Returns [`None`] if the duration would overflow the wire format
    /// (total seconds, estimating months and days, outside `i64`).
    pub fn new(months: i64, days: i64, seconds: i64, nanoseconds: i32) -> Option<Self> {
        let carry = i64::from(nanoseconds) / NANOS_PER_SECOND;
        let nanoseconds = nanoseconds % NANOS_PER_SECOND as i32;
        let seconds = seconds.checked_add(carry)?;
        // the estimated total length must stay within i64 seconds
        months
            .checked_mul(SECONDS_PER_MONTH_ESTIMATE)?
            .checked_add(days.checked_mul(SECONDS_PER_DAY)?)?
            .checked_add(seconds)?;
        Some(Self {
            months,
            days,
            seconds,
            nanoseconds,
        })
    }

    #[duplicate_item(
        name            type_;
        [ months ]      [ i64 ];
        [ days ]        [ i64 ];
        [ seconds ]     [ i64 ];
        [ nanoseconds ] [ i32 ];
    )]
    pub fn name(&self) -> type_ {
        self.name
    }
}

pub(crate) fn local_date_time_from_timestamp(seconds: i64, nanos: u32) -> Option<LocalDateTime> {
    Some(chrono::DateTime::from_timestamp(seconds, nanos)?.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_normalizes_nanoseconds() {
        let duration = Duration::new(0, 0, 1, 1_500_000_000).unwrap();
        assert_eq!(duration.seconds(), 2);
        assert_eq!(duration.nanoseconds(), 500_000_000);
    }

    #[test]
    fn duration_rejects_overflow() {
        assert!(Duration::new(i64::MAX, 0, 0, 0).is_none());
        assert!(Duration::new(0, 0, i64::MAX, 1_000_000_000).is_none());
    }
}
