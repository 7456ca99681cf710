use chrono::NaiveDate;
use ustr::{ustr, Ustr};

use crate::calendar::{split_by_utc_offset, ValidityPattern};
use crate::error::{EntityKind, Result, TimetableError};
use crate::transit_model::{
    CommercialModeIdx, JourneyPatternIdx, PatternSignature, RouteIdx, StopPointIdx,
    TimeDemandGroupIdx, Timetable, VehicleJourneyIdx,
};

/// One stop visit within a journey pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JourneyPatternPoint {
    pub stop_point: StopPointIdx,
    pub for_boarding: bool,
    pub for_alighting: bool,
    pub timing_point: bool,
    pub headsign: Option<Ustr>,
}

/// Seconds since the first departure of the trip: arrival at the stop and
/// departure from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeDemandGroupPoint {
    pub drive_time: i32,
    pub total_drive_time: i32,
}

#[derive(Debug, Clone)]
pub enum JourneyState {
    Assembly {
        points: Vec<JourneyPatternPoint>,
        timings: Vec<TimeDemandGroupPoint>,
    },
    Finished {
        journey_pattern: JourneyPatternIdx,
        time_demand_group: TimeDemandGroupIdx,
    },
}

#[derive(Debug, Clone)]
pub struct VehicleJourney {
    pub uri: Ustr,
    pub route: RouteIdx,
    pub commercial_mode: CommercialModeIdx,
    pub headsign: Option<Ustr>,
    pub validity: ValidityPattern,
    /// Local departure from the first stop, in seconds after midnight.
    pub departure_time: i32,
    pub state: JourneyState,
}

impl VehicleJourney {
    pub fn is_finished(&self) -> bool {
        matches!(self.state, JourneyState::Finished { .. })
    }

    pub fn journey_pattern(&self) -> Option<JourneyPatternIdx> {
        match self.state {
            JourneyState::Finished {
                journey_pattern, ..
            } => Some(journey_pattern),
            JourneyState::Assembly { .. } => None,
        }
    }

    pub fn time_demand_group(&self) -> Option<TimeDemandGroupIdx> {
        match self.state {
            JourneyState::Finished {
                time_demand_group,
                ..
            } => Some(time_demand_group),
            JourneyState::Assembly { .. } => None,
        }
    }
}

/// A vehicle journey restricted to the days sharing one UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleJourneyUtc {
    pub vehicle_journey: VehicleJourneyIdx,
    pub utc_offset: i32,
    /// Departure from the first stop in seconds after UTC midnight of the
    /// service day; negative when the local departure is before the offset.
    pub departure_time: i32,
    pub validity: ValidityPattern,
}

/// A stop visit as handed to [`Timetable::add_stop`].
#[derive(Debug, Clone)]
pub struct StopTime<'a> {
    pub stop_point_uri: &'a str,
    pub arrival_time: i32,
    pub departure_time: i32,
    pub for_boarding: bool,
    pub for_alighting: bool,
    pub timing_point: bool,
    pub headsign: Option<&'a str>,
}

impl<'a> StopTime<'a> {
    pub fn new(stop_point_uri: &'a str, arrival_time: i32, departure_time: i32) -> Self {
        StopTime {
            stop_point_uri,
            arrival_time,
            departure_time,
            for_boarding: true,
            for_alighting: true,
            timing_point: false,
            headsign: None,
        }
    }
}

impl Timetable {
    /// Marks `vehicle_journey` as running on `date`. Dates outside the
    /// analysis window are ignored and reported as `false`.
    pub fn set_is_valid_on(
        &mut self,
        vehicle_journey: VehicleJourneyIdx,
        date: NaiveDate,
    ) -> Result<bool> {
        let start_date = self.start_date();
        let vj = self.vehicle_journey_mut(vehicle_journey);
        if vj.is_finished() {
            return Err(TimetableError::AlreadyFinished(vj.uri.to_string()));
        }
        if date < start_date {
            return Ok(false);
        }
        let day = (date - start_date).num_days();
        Ok(u32::try_from(day).is_ok_and(|day| vj.validity.insert(day)))
    }

    pub fn add_stop(&mut self, vehicle_journey: VehicleJourneyIdx, stop: StopTime) -> Result<()> {
        let stop_point = self.stop_points().lookup(stop.stop_point_uri);
        let vj = self.vehicle_journey_mut(vehicle_journey);
        let uri = vj.uri;
        let headsign = stop.headsign.filter(|h| !h.is_empty()).map(ustr).or(vj.headsign);
        let error_context = || (uri.to_string(), stop.stop_point_uri.to_string());

        let JourneyState::Assembly { points, timings } = &mut vj.state else {
            return Err(TimetableError::AlreadyFinished(uri.to_string()));
        };
        let Some(stop_point) = stop_point else {
            return Err(TimetableError::DanglingReference {
                kind: EntityKind::VehicleJourney,
                target: EntityKind::StopPoint,
                key: stop.stop_point_uri.to_string(),
            });
        };
        if stop.arrival_time < 0 || stop.departure_time < 0 {
            let (vehicle_journey, stop_point) = error_context();
            return Err(TimetableError::NegativeTime {
                vehicle_journey,
                stop_point,
            });
        }
        if stop.arrival_time > stop.departure_time {
            let (vehicle_journey, stop_point) = error_context();
            return Err(TimetableError::NegativeDwellTime {
                vehicle_journey,
                stop_point,
            });
        }

        let mut for_alighting = stop.for_alighting;
        match timings.last().copied() {
            None => {
                vj.departure_time = stop.departure_time;
                timings.push(TimeDemandGroupPoint {
                    drive_time: 0,
                    total_drive_time: 0,
                });
                for_alighting = false;
            }
            Some(previous) => {
                let drive_time = stop.arrival_time - vj.departure_time;
                let total_drive_time = stop.departure_time - vj.departure_time;
                if drive_time < previous.total_drive_time {
                    let (vehicle_journey, stop_point) = error_context();
                    return Err(TimetableError::TimeTravel {
                        vehicle_journey,
                        stop_point,
                    });
                }
                timings.push(TimeDemandGroupPoint {
                    drive_time,
                    total_drive_time,
                });
            }
        }
        points.push(JourneyPatternPoint {
            stop_point,
            for_boarding: stop.for_boarding,
            for_alighting,
            timing_point: stop.timing_point,
            headsign,
        });
        Ok(())
    }

    /// Freezes the vehicle journey: resolves its journey pattern and time
    /// demand group and splits it into UTC variants.
    pub fn finish(&mut self, vehicle_journey: VehicleJourneyIdx) -> Result<()> {
        let start_date = self.start_date();
        let timezone = self.timezone();
        let vj = self.vehicle_journey_mut(vehicle_journey);
        let uri = vj.uri.to_string();
        let (mut points, timings) = match &mut vj.state {
            JourneyState::Finished { .. } => return Err(TimetableError::AlreadyFinished(uri)),
            JourneyState::Assembly { points, timings } => {
                if points.len() != timings.len() {
                    return Err(TimetableError::PatternLengthMismatch {
                        vehicle_journey: uri,
                        points: points.len(),
                        timings: timings.len(),
                    });
                }
                if points.len() < 2 {
                    return Err(TimetableError::TripTooShort {
                        vehicle_journey: uri,
                        stops: points.len(),
                    });
                }
                (std::mem::take(points), std::mem::take(timings))
            }
        };
        if let Some(last) = points.last_mut() {
            last.for_boarding = false;
        }

        let route = vj.route;
        let commercial_mode = vj.commercial_mode;
        let headsign = vj.headsign;
        let departure_time = vj.departure_time;
        let validity = vj.validity;

        let signature = PatternSignature {
            route,
            commercial_mode,
            headsign: headsign.unwrap_or_else(|| ustr("")),
            points,
        };
        let journey_pattern = self.intern_journey_pattern(signature, headsign);
        if journey_pattern.is_new() {
            log::debug!(
                "New journey pattern {} from vehicle journey {}",
                journey_pattern.idx().0,
                uri
            );
        }
        let time_demand_group = self.intern_time_demand_group(timings);

        for slice in split_by_utc_offset(start_date, timezone, validity) {
            self.vehicle_journeys_utc.push(VehicleJourneyUtc {
                vehicle_journey,
                utc_offset: slice.utc_offset,
                departure_time: departure_time - slice.utc_offset,
                validity: slice.validity,
            });
        }

        self.vehicle_journey_mut(vehicle_journey).state = JourneyState::Finished {
            journey_pattern: journey_pattern.idx(),
            time_demand_group: time_demand_group.idx(),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transit_model::{
        LineAttributes, OperatorAttributes, RouteAttributes, StopAreaAttributes,
        StopPointAttributes,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn timetable_starting(start: NaiveDate) -> Timetable {
        let mut tt = Timetable::new(start, "Europe/Amsterdam").unwrap();
        tt.add_operator("OP", "Europe/Amsterdam", OperatorAttributes::default())
            .unwrap();
        tt.add_physical_mode("3", Some("Bus")).unwrap();
        tt.add_commercial_mode("3", Some("Bus")).unwrap();
        tt.add_line("L1", "OP", "3", LineAttributes::default())
            .unwrap();
        tt.add_route(
            "R1",
            "L1",
            RouteAttributes {
                route_type: 3,
                direction: Some(0),
            },
        )
        .unwrap();
        for name in ["A", "B", "C"] {
            let area = format!("SA{}", name);
            tt.add_stop_area(&area, "Europe/Amsterdam", StopAreaAttributes::default())
                .unwrap();
            tt.add_stop_point(name, &area, StopPointAttributes::default())
                .unwrap();
        }
        tt
    }

    fn timetable() -> Timetable {
        timetable_starting(date(2014, 1, 1))
    }

    fn trip(tt: &mut Timetable, uri: &str, dwell_at_b: i32) -> VehicleJourneyIdx {
        let vj = tt.add_vehicle_journey(uri, "R1", "3", None).unwrap();
        tt.set_is_valid_on(vj, tt.start_date()).unwrap();
        tt.add_stop(vj, StopTime::new("A", 3600, 3600)).unwrap();
        tt.add_stop(vj, StopTime::new("B", 3900, 3900 + dwell_at_b))
            .unwrap();
        tt.add_stop(vj, StopTime::new("C", 4500, 4500)).unwrap();
        tt.finish(vj).unwrap();
        vj
    }

    #[test]
    fn identical_trips_share_pattern_and_timing() {
        let mut tt = timetable();
        let first = trip(&mut tt, "VJ1", 60);
        let second = trip(&mut tt, "VJ2", 60);
        let vjs = tt.vehicle_journeys();
        assert_eq!(vjs[first].journey_pattern(), vjs[second].journey_pattern());
        assert_eq!(vjs[first].time_demand_group(), vjs[second].time_demand_group());
        assert_eq!(tt.journey_patterns().len(), 1);
        assert_eq!(tt.time_demand_groups().len(), 1);
    }

    #[test]
    fn different_dwell_shares_pattern_but_not_timing() {
        let mut tt = timetable();
        let first = trip(&mut tt, "VJ1", 60);
        let second = trip(&mut tt, "VJ2", 120);
        let vjs = tt.vehicle_journeys();
        assert_eq!(vjs[first].journey_pattern(), vjs[second].journey_pattern());
        assert_ne!(vjs[first].time_demand_group(), vjs[second].time_demand_group());
        assert_eq!(tt.journey_patterns().len(), 1);
        assert_eq!(tt.time_demand_groups().len(), 2);
        assert_eq!(tt.time_demand_groups()[1].uri.as_str(), "1");
    }

    #[test]
    fn headsign_separates_patterns() {
        let mut tt = timetable();
        trip(&mut tt, "VJ1", 60);
        let vj = tt
            .add_vehicle_journey("VJ2", "R1", "3", Some("Centraal"))
            .unwrap();
        tt.add_stop(vj, StopTime::new("A", 0, 0)).unwrap();
        tt.add_stop(vj, StopTime::new("B", 300, 360)).unwrap();
        tt.add_stop(vj, StopTime::new("C", 900, 900)).unwrap();
        tt.finish(vj).unwrap();
        assert_eq!(tt.journey_patterns().len(), 2);
        let pattern = tt.journey_pattern(tt.vehicle_journeys()[vj].journey_pattern().unwrap());
        assert_eq!(pattern.uri.as_str(), "1");
        assert_eq!(pattern.headsign, Some(ustr("Centraal")));
        assert!(pattern
            .points
            .iter()
            .all(|point| point.headsign == Some(ustr("Centraal"))));
    }

    #[test]
    fn terminal_flags_are_forced() {
        let mut tt = timetable();
        let vj = tt.add_vehicle_journey("VJ1", "R1", "3", None).unwrap();
        for (stop, time) in [("A", 0), ("B", 300), ("C", 600)] {
            tt.add_stop(vj, StopTime::new(stop, time, time)).unwrap();
        }
        tt.finish(vj).unwrap();
        let pattern = tt.journey_pattern(tt.vehicle_journeys()[vj].journey_pattern().unwrap());
        assert!(!pattern.points[0].for_alighting);
        assert!(pattern.points[0].for_boarding);
        assert!(pattern.points[1].for_boarding && pattern.points[1].for_alighting);
        assert!(!pattern.points[2].for_boarding);
        assert!(pattern.points[2].for_alighting);
    }

    #[test]
    fn timings_are_relative_to_first_departure() {
        let mut tt = timetable();
        let vj = trip(&mut tt, "VJ1", 60);
        let group = tt.time_demand_group(tt.vehicle_journeys()[vj].time_demand_group().unwrap());
        let pairs: Vec<_> = group
            .points
            .iter()
            .map(|p| (p.drive_time, p.total_drive_time))
            .collect();
        assert_eq!(pairs, vec![(0, 0), (300, 360), (900, 900)]);
        assert_eq!(tt.vehicle_journeys()[vj].departure_time, 3600);
    }

    #[test]
    fn rejects_malformed_stop_times() {
        let mut tt = timetable();
        let vj = tt.add_vehicle_journey("VJ1", "R1", "3", None).unwrap();
        assert!(matches!(
            tt.add_stop(vj, StopTime::new("A", -1, 0)),
            Err(TimetableError::NegativeTime { .. })
        ));
        assert!(matches!(
            tt.add_stop(vj, StopTime::new("A", 100, 50)),
            Err(TimetableError::NegativeDwellTime { .. })
        ));
        tt.add_stop(vj, StopTime::new("A", 100, 200)).unwrap();
        tt.add_stop(vj, StopTime::new("B", 300, 400)).unwrap();
        assert!(matches!(
            tt.add_stop(vj, StopTime::new("C", 350, 450)),
            Err(TimetableError::TimeTravel { .. })
        ));
        assert!(matches!(
            tt.add_stop(vj, StopTime::new("Z", 500, 500)),
            Err(TimetableError::DanglingReference {
                target: EntityKind::StopPoint,
                ..
            })
        ));
    }

    #[test]
    fn finish_needs_two_stops_and_freezes() {
        let mut tt = timetable();
        let vj = tt.add_vehicle_journey("VJ1", "R1", "3", None).unwrap();
        tt.add_stop(vj, StopTime::new("A", 0, 0)).unwrap();
        assert!(matches!(
            tt.finish(vj),
            Err(TimetableError::TripTooShort { stops: 1, .. })
        ));
        tt.add_stop(vj, StopTime::new("B", 60, 60)).unwrap();
        tt.finish(vj).unwrap();
        assert!(matches!(
            tt.add_stop(vj, StopTime::new("C", 120, 120)),
            Err(TimetableError::AlreadyFinished(_))
        ));
        assert!(matches!(tt.finish(vj), Err(TimetableError::AlreadyFinished(_))));
        assert!(matches!(
            tt.set_is_valid_on(vj, tt.start_date()),
            Err(TimetableError::AlreadyFinished(_))
        ));
    }

    #[test]
    fn validity_outside_the_window_is_ignored() {
        let mut tt = timetable();
        let vj = tt.add_vehicle_journey("VJ1", "R1", "3", None).unwrap();
        assert!(!tt.set_is_valid_on(vj, date(2013, 12, 31)).unwrap());
        assert!(tt.set_is_valid_on(vj, date(2014, 1, 1)).unwrap());
        assert!(tt.set_is_valid_on(vj, date(2014, 2, 1)).unwrap());
        assert!(!tt.set_is_valid_on(vj, date(2014, 2, 2)).unwrap());
        assert_eq!(
            tt.vehicle_journeys()[vj].validity,
            ValidityPattern::from_days([0, 31])
        );
    }

    #[test]
    fn finish_splits_across_spring_forward() {
        let mut tt = timetable_starting(date(2015, 3, 28));
        let vj = tt.add_vehicle_journey("VJ1", "R1", "3", None).unwrap();
        tt.set_is_valid_on(vj, date(2015, 3, 28)).unwrap();
        tt.set_is_valid_on(vj, date(2015, 3, 29)).unwrap();
        tt.add_stop(vj, StopTime::new("A", 900, 900)).unwrap();
        tt.add_stop(vj, StopTime::new("B", 1200, 1200)).unwrap();
        tt.finish(vj).unwrap();

        let variants = tt.vehicle_journeys_utc();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].utc_offset, 3600);
        assert_eq!(variants[0].departure_time, 900 - 3600);
        assert_eq!(variants[0].validity, ValidityPattern::from_days([0]));
        assert_eq!(variants[1].utc_offset, 7200);
        assert_eq!(variants[1].departure_time, 900 - 7200);
        assert_eq!(variants[1].validity, ValidityPattern::from_days([1]));
        assert_eq!(tt.global_utc_offset(), Some(7200));
    }

    #[test]
    fn finish_keeps_one_variant_inside_one_regime() {
        let mut tt = timetable();
        let vj = tt.add_vehicle_journey("VJ1", "R1", "3", None).unwrap();
        for day in 1..=5 {
            tt.set_is_valid_on(vj, date(2014, 1, day)).unwrap();
        }
        tt.add_stop(vj, StopTime::new("A", 900, 900)).unwrap();
        tt.add_stop(vj, StopTime::new("B", 1200, 1200)).unwrap();
        tt.finish(vj).unwrap();
        assert_eq!(tt.vehicle_journeys_utc().len(), 1);
        assert_eq!(tt.vehicle_journeys_utc()[0].validity.len(), 5);
    }
}
