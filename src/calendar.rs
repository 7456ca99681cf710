use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, Duration, NaiveDate, Offset, TimeZone, Weekday};
use chrono_tz::Tz;

/// Number of days covered by a compiled timetable, one bit per day.
pub const MAX_DAYS: u32 = 32;

/// The days (offsets from the timetable start date) on which a trip runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ValidityPattern(u32);

impl ValidityPattern {
    pub const fn empty() -> Self {
        ValidityPattern(0)
    }

    pub fn from_days(days: impl IntoIterator<Item = u32>) -> Self {
        let mut pattern = Self::empty();
        for day in days {
            pattern.insert(day);
        }
        pattern
    }

    /// Returns false when the day lies outside the analysis window.
    pub fn insert(&mut self, day: u32) -> bool {
        if day >= MAX_DAYS {
            return false;
        }
        self.0 |= 1 << day;
        true
    }

    pub fn contains(&self, day: u32) -> bool {
        day < MAX_DAYS && self.0 & (1 << day) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn union(self, other: ValidityPattern) -> ValidityPattern {
        ValidityPattern(self.0 | other.0)
    }

    pub fn days(&self) -> impl Iterator<Item = u32> + '_ {
        (0..MAX_DAYS).filter(move |day| self.contains(*day))
    }
}

/// UTC offset in seconds of `timezone` on `date`.
///
/// The offset is sampled at local noon, so a service day that starts in one
/// daylight saving regime and switches during the night is attributed to the
/// regime in force for the bulk of that day.
pub fn utc_offset_on(date: NaiveDate, timezone: Tz) -> i32 {
    let noon = date
        .and_hms_opt(12, 0, 0)
        .expect("noon exists on every date");
    let offset = match timezone.offset_from_local_datetime(&noon).earliest() {
        Some(offset) => offset,
        None => timezone.offset_from_utc_datetime(&noon),
    };
    offset.fix().local_minus_utc()
}

/// One UTC-consistent slice of a local-time validity pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcSlice {
    pub utc_offset: i32,
    pub validity: ValidityPattern,
}

/// Partitions `validity` by the UTC offset in force on each day, ordered by
/// ascending offset. The slices never overlap and together cover every day.
pub fn split_by_utc_offset(
    start_date: NaiveDate,
    timezone: Tz,
    validity: ValidityPattern,
) -> Vec<UtcSlice> {
    let mut by_offset: BTreeMap<i32, ValidityPattern> = BTreeMap::new();
    for day in validity.days() {
        let date = start_date + Duration::days(day as i64);
        by_offset
            .entry(utc_offset_on(date, timezone))
            .or_default()
            .insert(day);
    }
    by_offset
        .into_iter()
        .map(|(utc_offset, validity)| UtcSlice {
            utc_offset,
            validity,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct WeeklyService {
    pub service_id: String,
    /// Monday first.
    pub days: [bool; 7],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl WeeklyService {
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        if date < self.start_date || date > self.end_date {
            return false;
        }
        let day_index = match date.weekday() {
            Weekday::Mon => 0,
            Weekday::Tue => 1,
            Weekday::Wed => 2,
            Weekday::Thu => 3,
            Weekday::Fri => 4,
            Weekday::Sat => 5,
            Weekday::Sun => 6,
        };
        self.days[day_index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    Added,
    Removed,
}

impl ExceptionType {
    /// GTFS encoding: 1 adds the service on a date, 2 removes it.
    pub fn from_gtfs(value: i64) -> Option<ExceptionType> {
        match value {
            1 => Some(ExceptionType::Added),
            2 => Some(ExceptionType::Removed),
            _ => None,
        }
    }
}

/// Weekly service rules plus per-date exceptions.
#[derive(Debug, Default)]
pub struct ServiceCalendar {
    weekly: Vec<WeeklyService>,
    exceptions: HashMap<NaiveDate, Vec<(String, ExceptionType)>>,
}

impl ServiceCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_weekly(&mut self, service: WeeklyService) {
        self.weekly.push(service);
    }

    pub fn add_exception(&mut self, service_id: &str, date: NaiveDate, kind: ExceptionType) {
        self.exceptions
            .entry(date)
            .or_default()
            .push((service_id.to_string(), kind));
    }

    /// Service ids running on `date`: the weekly rules valid that day, then
    /// the date's exceptions applied in order.
    pub fn active_services(&self, date: NaiveDate) -> BTreeSet<String> {
        let mut services: BTreeSet<String> = self
            .weekly
            .iter()
            .filter(|service| service.runs_on(date))
            .map(|service| service.service_id.clone())
            .collect();
        if let Some(exceptions) = self.exceptions.get(&date) {
            for (service_id, kind) in exceptions {
                match kind {
                    ExceptionType::Added => {
                        services.insert(service_id.clone());
                    }
                    ExceptionType::Removed => {
                        services.remove(service_id);
                    }
                }
            }
        }
        services
    }

    /// First and last date on which any service may run.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let added_dates = self.exceptions.iter().filter_map(|(date, exceptions)| {
            exceptions
                .iter()
                .any(|(_, kind)| *kind == ExceptionType::Added)
                .then_some(*date)
        });
        let starts = self.weekly.iter().map(|s| s.start_date).chain(added_dates.clone());
        let ends = self.weekly.iter().map(|s| s.end_date).chain(added_dates);
        Some((starts.min()?, ends.max()?))
    }

    /// Validity pattern of every service id over the window starting at
    /// `start_date`. Services that never run in the window are absent.
    pub fn validity_patterns(&self, start_date: NaiveDate) -> HashMap<String, ValidityPattern> {
        let mut patterns: HashMap<String, ValidityPattern> = HashMap::new();
        for day in 0..MAX_DAYS {
            let date = start_date + Duration::days(day as i64);
            for service_id in self.active_services(date) {
                patterns.entry(service_id).or_default().insert(day);
            }
        }
        patterns
    }

    /// Number of active services per day over the full date range.
    pub fn daily_service_counts(&self) -> Vec<(NaiveDate, usize)> {
        let Some((first, last)) = self.date_range() else {
            return vec![];
        };
        first
            .iter_days()
            .take_while(|date| *date <= last)
            .map(|date| (date, self.active_services(date).len()))
            .collect()
    }

    /// Start of the `MAX_DAYS` window with the most active services.
    pub fn find_max_service(&self) -> Option<NaiveDate> {
        max_service_window_start(&self.daily_service_counts(), MAX_DAYS as usize)
    }
}

/// Picks the start of the `window`-day span with the highest total of
/// active services. Ties resolve to the earliest start; days past the end
/// of `daily_counts` count as zero.
pub fn max_service_window_start(
    daily_counts: &[(NaiveDate, usize)],
    window: usize,
) -> Option<NaiveDate> {
    let mut best: Option<(usize, NaiveDate)> = None;
    let mut total: usize = daily_counts.iter().take(window).map(|(_, n)| n).sum();
    for (i, (date, _)) in daily_counts.iter().enumerate() {
        if i > 0 {
            total -= daily_counts[i - 1].1;
            if let Some((_, n)) = daily_counts.get(i + window - 1) {
                total += n;
            }
        }
        if best.map_or(true, |(best_total, _)| total > best_total) {
            best = Some((total, *date));
        }
    }
    best.map(|(_, date)| date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Amsterdam;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn every_day(service_id: &str, start: NaiveDate, end: NaiveDate) -> WeeklyService {
        WeeklyService {
            service_id: service_id.to_string(),
            days: [true; 7],
            start_date: start,
            end_date: end,
        }
    }

    #[test]
    fn validity_pattern_ignores_days_outside_the_window() {
        let mut pattern = ValidityPattern::empty();
        assert!(pattern.insert(0));
        assert!(pattern.insert(31));
        assert!(!pattern.insert(32));
        assert_eq!(pattern.days().collect::<Vec<_>>(), vec![0, 31]);
        assert_eq!(pattern.bits(), 0x8000_0001);
    }

    #[test]
    fn weekly_rules_respect_weekday_and_range() {
        let service = WeeklyService {
            service_id: "weekdays".into(),
            days: [true, true, true, true, true, false, false],
            start_date: date(2014, 1, 1),
            end_date: date(2014, 1, 31),
        };
        // 2014-01-04 is a Saturday.
        assert!(service.runs_on(date(2014, 1, 3)));
        assert!(!service.runs_on(date(2014, 1, 4)));
        assert!(!service.runs_on(date(2014, 2, 3)));
    }

    #[test]
    fn exceptions_add_and_remove_services() {
        let mut calendar = ServiceCalendar::new();
        calendar.add_weekly(every_day("daily", date(2014, 1, 1), date(2014, 1, 31)));
        calendar.add_exception("daily", date(2014, 1, 2), ExceptionType::Removed);
        calendar.add_exception("extra", date(2014, 1, 2), ExceptionType::Added);
        // Removing a service that is not running is a no-op.
        calendar.add_exception("ghost", date(2014, 1, 3), ExceptionType::Removed);

        let on_second: Vec<_> = calendar.active_services(date(2014, 1, 2)).into_iter().collect();
        assert_eq!(on_second, vec!["extra".to_string()]);
        let on_third: Vec<_> = calendar.active_services(date(2014, 1, 3)).into_iter().collect();
        assert_eq!(on_third, vec!["daily".to_string()]);
    }

    #[test]
    fn date_range_includes_added_exceptions() {
        let mut calendar = ServiceCalendar::new();
        calendar.add_weekly(every_day("daily", date(2014, 1, 10), date(2014, 1, 20)));
        calendar.add_exception("extra", date(2014, 1, 5), ExceptionType::Added);
        calendar.add_exception("daily", date(2014, 1, 25), ExceptionType::Removed);
        assert_eq!(
            calendar.date_range(),
            Some((date(2014, 1, 5), date(2014, 1, 20)))
        );
    }

    #[test]
    fn validity_patterns_cover_the_window() {
        let mut calendar = ServiceCalendar::new();
        calendar.add_weekly(every_day("daily", date(2014, 1, 2), date(2014, 1, 3)));
        let patterns = calendar.validity_patterns(date(2014, 1, 1));
        assert_eq!(patterns["daily"], ValidityPattern::from_days([1, 2]));
    }

    #[test]
    fn utc_offset_follows_dst() {
        assert_eq!(utc_offset_on(date(2015, 3, 28), Amsterdam), 3600);
        assert_eq!(utc_offset_on(date(2015, 3, 29), Amsterdam), 7200);
        assert_eq!(utc_offset_on(date(2015, 10, 24), Amsterdam), 7200);
        assert_eq!(utc_offset_on(date(2015, 10, 25), Amsterdam), 3600);
    }

    #[test]
    fn split_across_spring_forward_gives_two_disjoint_slices() {
        let validity = ValidityPattern::from_days([0, 1]);
        let slices = split_by_utc_offset(date(2015, 3, 28), Amsterdam, validity);
        assert_eq!(
            slices,
            vec![
                UtcSlice {
                    utc_offset: 3600,
                    validity: ValidityPattern::from_days([0]),
                },
                UtcSlice {
                    utc_offset: 7200,
                    validity: ValidityPattern::from_days([1]),
                },
            ]
        );
    }

    #[test]
    fn split_across_fall_back_partitions_the_days() {
        let validity = ValidityPattern::from_days(0..4);
        let slices = split_by_utc_offset(date(2015, 10, 23), Amsterdam, validity);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].utc_offset, 3600);
        assert_eq!(slices[0].validity, ValidityPattern::from_days([2, 3]));
        assert_eq!(slices[1].utc_offset, 7200);
        assert_eq!(slices[1].validity, ValidityPattern::from_days([0, 1]));
        assert_eq!(slices[0].validity.bits() & slices[1].validity.bits(), 0);
        assert_eq!(slices[0].validity.union(slices[1].validity), validity);
    }

    #[test]
    fn split_within_one_regime_gives_one_slice() {
        let validity = ValidityPattern::from_days(0..7);
        let slices = split_by_utc_offset(date(2014, 1, 1), Amsterdam, validity);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].utc_offset, 3600);
        assert_eq!(slices[0].validity, validity);
    }

    #[test]
    fn max_service_window_finds_the_peak() {
        let mut calendar = ServiceCalendar::new();
        calendar.add_weekly(every_day("base", date(2014, 1, 1), date(2014, 6, 30)));
        calendar.add_weekly(every_day("peak-a", date(2014, 3, 1), date(2014, 4, 1)));
        calendar.add_weekly(every_day("peak-b", date(2014, 3, 1), date(2014, 4, 1)));
        assert_eq!(calendar.find_max_service(), Some(date(2014, 3, 1)));
    }

    #[test]
    fn max_service_window_prefers_the_earliest_tie() {
        let counts: Vec<_> = (1..=5).map(|d| (date(2014, 1, d), 1)).collect();
        assert_eq!(max_service_window_start(&counts, 2), Some(date(2014, 1, 1)));
        assert_eq!(max_service_window_start(&[], 2), None);
    }
}
