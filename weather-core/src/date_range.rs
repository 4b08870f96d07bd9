//! Named report windows resolved against a reference instant.
//!
//! Day and week boundaries are computed in the timezone carried by the
//! reference instant, so "today" starts at local midnight rather than UTC
//! midnight.

use std::{fmt, str::FromStr};

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, TimeZone,
    Timelike, Utc,
};

use crate::{error::WeatherError, model::DateRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DateFilter {
    SelectedHour,
    Today,
    Yesterday,
    CurrentWeek,
    #[default]
    LastSevenDays,
}

impl DateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateFilter::SelectedHour => "selected_hour",
            DateFilter::Today => "today",
            DateFilter::Yesterday => "yesterday",
            DateFilter::CurrentWeek => "current_week",
            DateFilter::LastSevenDays => "last_seven_days",
        }
    }

    pub const fn all() -> &'static [DateFilter] {
        &[
            DateFilter::SelectedHour,
            DateFilter::Today,
            DateFilter::Yesterday,
            DateFilter::CurrentWeek,
            DateFilter::LastSevenDays,
        ]
    }
}

impl fmt::Display for DateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateFilter {
    type Err = WeatherError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DateFilter::all()
            .iter()
            .copied()
            .find(|filter| filter.as_str() == value)
            .ok_or_else(|| WeatherError::InvalidFilter(value.to_string()))
    }
}

/// Resolve a filter by name; unknown names fail with [`WeatherError::InvalidFilter`].
pub fn resolve_named<Tz: TimeZone>(
    name: &str,
    reference: &DateTime<Tz>,
) -> Result<DateRange, WeatherError> {
    resolve(name.parse()?, reference)
}

pub fn resolve<Tz: TimeZone>(
    filter: DateFilter,
    reference: &DateTime<Tz>,
) -> Result<DateRange, WeatherError> {
    let tz = reference.timezone();
    let local = reference.naive_local();
    let today = local.date();

    let (start, end) = match filter {
        DateFilter::SelectedHour => {
            let hour_start = today.and_time(NaiveTime::MIN) + Duration::hours(local.hour().into());
            let start = local_instant(&tz, hour_start);
            (start, start + Duration::hours(1))
        }
        DateFilter::Today => (local_midnight(&tz, today), through(reference)),
        DateFilter::Yesterday => {
            let yesterday = today - Duration::days(1);
            (local_midnight(&tz, yesterday), local_midnight(&tz, today))
        }
        DateFilter::CurrentWeek => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday().into());
            (local_midnight(&tz, monday), through(reference))
        }
        DateFilter::LastSevenDays => {
            let reference = reference.with_timezone(&Utc);
            (reference - Duration::days(7), through(&reference))
        }
    };

    let range = DateRange::new(start, end)?;
    tracing::debug!(filter = %filter, range = %range, "resolved date filter");
    Ok(range)
}

/// Exclusive end that still covers the reference second itself.
fn through<Tz: TimeZone>(reference: &DateTime<Tz>) -> DateTime<Utc> {
    reference.with_timezone(&Utc).trunc_subsecs(0) + Duration::seconds(1)
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    local_instant(tz, date.and_time(NaiveTime::MIN))
}

/// Map a wall-clock time to UTC. Ambiguous times take the earlier instant; a time
/// skipped by a DST jump moves forward to the first valid instant after the gap.
fn local_instant<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    if let Some(instant) = tz.from_local_datetime(&naive).earliest() {
        return instant.with_timezone(&Utc);
    }

    (1..=4)
        .map(|hours| naive + Duration::minutes(30 * hours))
        .find_map(|shifted| tz.from_local_datetime(&shifted).earliest())
        .map(|instant| instant.with_timezone(&Utc))
        .unwrap_or_else(|| tz.from_utc_datetime(&naive).with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Weekday};

    fn paris_summer() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn at(tz: &FixedOffset, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        tz.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn every_filter_yields_a_non_empty_range() {
        let tz = paris_summer();
        let references = [
            at(&tz, 2024, 6, 12, 12, 30),
            at(&tz, 2024, 6, 10, 0, 0),
            at(&tz, 2024, 6, 16, 23, 59),
            at(&tz, 2024, 1, 1, 0, 0),
        ];

        for reference in &references {
            for filter in DateFilter::all() {
                let range = resolve(*filter, reference).expect("filter resolves");
                assert!(range.start() < range.end(), "{filter} at {reference}");
            }
        }
    }

    #[test]
    fn unknown_filter_name_is_rejected() {
        let reference = at(&paris_summer(), 2024, 6, 12, 12, 0);
        let err = resolve_named("last_month", &reference).unwrap_err();
        assert!(matches!(err, WeatherError::InvalidFilter(ref name) if name == "last_month"));
    }

    #[test]
    fn filter_names_roundtrip() {
        for filter in DateFilter::all() {
            assert_eq!(filter.as_str().parse::<DateFilter>().unwrap(), *filter);
        }
        assert_eq!(DateFilter::default(), DateFilter::LastSevenDays);
    }

    #[test]
    fn yesterday_ends_where_today_starts() {
        let reference = at(&paris_summer(), 2024, 6, 12, 9, 15);
        let today = resolve(DateFilter::Today, &reference).unwrap();
        let yesterday = resolve(DateFilter::Yesterday, &reference).unwrap();

        assert_eq!(yesterday.end(), today.start());
        assert_eq!(today.start() - yesterday.start(), Duration::hours(24));
    }

    #[test]
    fn day_boundaries_follow_the_reporting_offset() {
        // 00:30 local on the 12th is still the 11th in UTC.
        let reference = at(&paris_summer(), 2024, 6, 12, 0, 30);
        let today = resolve(DateFilter::Today, &reference).unwrap();

        assert_eq!(today.start(), Utc.with_ymd_and_hms(2024, 6, 11, 22, 0, 0).unwrap());
        assert!(today.contains(reference.with_timezone(&Utc)));
    }

    #[test]
    fn today_covers_the_reference_instant_at_midnight() {
        let reference = at(&paris_summer(), 2024, 6, 12, 0, 0);
        let today = resolve(DateFilter::Today, &reference).unwrap();

        assert_eq!(today.start(), reference.with_timezone(&Utc));
        assert_eq!(today.end() - today.start(), Duration::seconds(1));
    }

    #[test]
    fn current_week_starts_on_local_monday_midnight() {
        let tz = paris_summer();
        // Wednesday, Monday itself, and Sunday night.
        for reference in [
            at(&tz, 2024, 6, 12, 15, 0),
            at(&tz, 2024, 6, 10, 0, 0),
            at(&tz, 2024, 6, 16, 23, 59),
        ] {
            let week = resolve(DateFilter::CurrentWeek, &reference).unwrap();
            let start = week.start().with_timezone(&tz);

            assert_eq!(start.weekday(), Weekday::Mon);
            assert_eq!((start.hour(), start.minute(), start.second()), (0, 0, 0));
            assert_eq!(start.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        }
    }

    #[test]
    fn selected_hour_truncates_to_the_hour() {
        let tz = paris_summer();
        let reference = at(&tz, 2024, 6, 12, 14, 42);
        let hour = resolve(DateFilter::SelectedHour, &reference).unwrap();

        assert_eq!(hour.start(), at(&tz, 2024, 6, 12, 14, 0).with_timezone(&Utc));
        assert_eq!(hour.end() - hour.start(), Duration::hours(1));
    }

    #[test]
    fn last_seven_days_spans_a_week_back() {
        let reference = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();
        let range = resolve(DateFilter::LastSevenDays, &reference).unwrap();

        assert_eq!(range.start(), reference - Duration::days(7));
        assert!(range.contains(reference));
    }
}
