use std::collections::HashMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use ustr::{ustr, Ustr};

use crate::calendar::ValidityPattern;
use crate::error::{EntityKind, Result, TimetableError};
use crate::vehicle_journey::{
    JourneyPatternPoint, JourneyState, TimeDemandGroupPoint, VehicleJourney, VehicleJourneyUtc,
};

/// Typed position of an entity inside one of the [`Timetable`] arenas.
pub trait ArenaIdx: Copy {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! arena_idx {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(pub u32);

            impl ArenaIdx for $name {
                fn from_index(index: usize) -> Self {
                    $name(index as u32)
                }

                fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

arena_idx!(
    StopAreaIdx,
    StopPointIdx,
    OperatorIdx,
    PhysicalModeIdx,
    CommercialModeIdx,
    LineIdx,
    RouteIdx,
    JourneyPatternIdx,
    TimeDemandGroupIdx,
    VehicleJourneyIdx,
);

/// Entities in insertion order, resolvable by their uri.
#[derive(Debug)]
pub struct UriTable<I, T> {
    kind: EntityKind,
    entries: Vec<T>,
    by_uri: HashMap<Ustr, I>,
}

impl<I: ArenaIdx, T> UriTable<I, T> {
    fn new(kind: EntityKind) -> Self {
        UriTable {
            kind,
            entries: vec![],
            by_uri: HashMap::new(),
        }
    }

    fn ensure_vacant(&self, uri: &str) -> Result<Ustr> {
        let uri = ustr(uri);
        if self.by_uri.contains_key(&uri) {
            return Err(TimetableError::DuplicateKey {
                kind: self.kind,
                key: uri.to_string(),
            });
        }
        Ok(uri)
    }

    fn push(&mut self, uri: Ustr, value: T) -> I {
        let idx = I::from_index(self.entries.len());
        self.entries.push(value);
        self.by_uri.insert(uri, idx);
        idx
    }

    /// Resolves `uri` or reports it as a dangling reference from `referrer`.
    fn resolve(&self, referrer: EntityKind, uri: &str) -> Result<I> {
        self.lookup(uri).ok_or_else(|| TimetableError::DanglingReference {
            kind: referrer,
            target: self.kind,
            key: uri.to_string(),
        })
    }

    pub fn lookup(&self, uri: &str) -> Option<I> {
        Ustr::from_existing(uri).and_then(|uri| self.by_uri.get(&uri).copied())
    }

    pub fn get(&self, idx: I) -> &T {
        &self.entries[idx.index()]
    }

    fn get_mut(&mut self, idx: I) -> &mut T {
        &mut self.entries[idx.index()]
    }

    pub fn by_uri(&self, uri: &str) -> Option<&T> {
        self.lookup(uri).map(|idx| self.get(idx))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, value)| (I::from_index(i), value))
    }
}

impl<I: ArenaIdx, T> std::ops::Index<I> for UriTable<I, T> {
    type Output = T;

    fn index(&self, idx: I) -> &T {
        self.get(idx)
    }
}

fn parse_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| TimetableError::InvalidTimezone(timezone.to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct StopAreaAttributes {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StopArea {
    pub uri: Ustr,
    pub timezone: Tz,
    pub attributes: StopAreaAttributes,
}

/// Accessibility flags; `None` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopPointProperties {
    pub wheelchair_boarding: Option<bool>,
}

impl StopPointProperties {
    pub const WHEELCHAIR_BOARDING: u8 = 1;

    pub fn bits(&self) -> u8 {
        if self.wheelchair_boarding == Some(true) {
            Self::WHEELCHAIR_BOARDING
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopPointAttributes {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub platform_code: Option<String>,
    pub properties: StopPointProperties,
}

#[derive(Debug, Clone)]
pub struct StopPoint {
    pub uri: Ustr,
    pub stop_area: StopAreaIdx,
    pub attributes: StopPointAttributes,
}

#[derive(Debug, Clone, Default)]
pub struct OperatorAttributes {
    pub name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Operator {
    pub uri: Ustr,
    pub timezone: Tz,
    pub attributes: OperatorAttributes,
}

#[derive(Debug, Clone)]
pub struct PhysicalMode {
    pub uri: Ustr,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommercialMode {
    pub uri: Ustr,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LineAttributes {
    pub name: Option<String>,
    pub code: Option<String>,
    pub color: Option<String>,
    pub text_color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Line {
    pub uri: Ustr,
    pub operator: OperatorIdx,
    pub physical_mode: PhysicalModeIdx,
    pub attributes: LineAttributes,
}

#[derive(Debug, Clone, Default)]
pub struct RouteAttributes {
    pub route_type: u16,
    pub direction: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub uri: Ustr,
    pub line: LineIdx,
    pub attributes: RouteAttributes,
}

impl Route {
    /// One bit per GTFS base route type; extended types have no bit.
    pub fn route_type_bits(&self) -> u16 {
        1u16.checked_shl(self.attributes.route_type as u32)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Listed in the feed's transfers.
    Transfer,
    /// Between two stop points of the same stop area.
    SameStopArea,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub from: StopPointIdx,
    pub to: StopPointIdx,
    pub min_transfer_time: u32,
    pub kind: ConnectionKind,
}

#[derive(Debug, Clone)]
pub struct JourneyPattern {
    pub uri: Ustr,
    pub route: RouteIdx,
    pub commercial_mode: CommercialModeIdx,
    pub headsign: Option<Ustr>,
    pub points: Vec<JourneyPatternPoint>,
}

#[derive(Debug, Clone)]
pub struct TimeDemandGroup {
    pub uri: Ustr,
    pub points: Vec<TimeDemandGroupPoint>,
}

/// Everything that makes two journey patterns the same pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternSignature {
    pub route: RouteIdx,
    pub commercial_mode: CommercialModeIdx,
    pub headsign: Ustr,
    pub points: Vec<JourneyPatternPoint>,
}

/// Outcome of a lookup-or-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interned<I> {
    Existing(I),
    New(I),
}

impl<I: Copy> Interned<I> {
    pub fn idx(&self) -> I {
        match self {
            Interned::Existing(idx) | Interned::New(idx) => *idx,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Interned::New(_))
    }
}

/// The whole transit graph of one compilation run.
///
/// Entities are inserted once, in dependency order, and reference each
/// other through arena indices. Journey patterns and time demand groups
/// are never inserted directly; they are interned when a vehicle journey
/// is finished.
#[derive(Debug)]
pub struct Timetable {
    start_date: NaiveDate,
    timezone: Tz,
    stop_areas: UriTable<StopAreaIdx, StopArea>,
    stop_points: UriTable<StopPointIdx, StopPoint>,
    operators: UriTable<OperatorIdx, Operator>,
    physical_modes: UriTable<PhysicalModeIdx, PhysicalMode>,
    commercial_modes: UriTable<CommercialModeIdx, CommercialMode>,
    lines: UriTable<LineIdx, Line>,
    routes: UriTable<RouteIdx, Route>,
    connections: Vec<Connection>,
    connection_by_pair: HashMap<(StopPointIdx, StopPointIdx), usize>,
    journey_patterns: Vec<JourneyPattern>,
    journey_pattern_by_signature: HashMap<PatternSignature, JourneyPatternIdx>,
    time_demand_groups: Vec<TimeDemandGroup>,
    time_demand_group_by_signature: HashMap<Vec<TimeDemandGroupPoint>, TimeDemandGroupIdx>,
    pub(crate) vehicle_journeys: UriTable<VehicleJourneyIdx, VehicleJourney>,
    pub(crate) vehicle_journeys_utc: Vec<VehicleJourneyUtc>,
}

impl Timetable {
    pub fn new(start_date: NaiveDate, timezone: &str) -> Result<Timetable> {
        Ok(Timetable {
            start_date,
            timezone: parse_timezone(timezone)?,
            stop_areas: UriTable::new(EntityKind::StopArea),
            stop_points: UriTable::new(EntityKind::StopPoint),
            operators: UriTable::new(EntityKind::Operator),
            physical_modes: UriTable::new(EntityKind::PhysicalMode),
            commercial_modes: UriTable::new(EntityKind::CommercialMode),
            lines: UriTable::new(EntityKind::Line),
            routes: UriTable::new(EntityKind::Route),
            connections: vec![],
            connection_by_pair: HashMap::new(),
            journey_patterns: vec![],
            journey_pattern_by_signature: HashMap::new(),
            time_demand_groups: vec![],
            time_demand_group_by_signature: HashMap::new(),
            vehicle_journeys: UriTable::new(EntityKind::VehicleJourney),
            vehicle_journeys_utc: vec![],
        })
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn add_stop_area(
        &mut self,
        uri: &str,
        timezone: &str,
        attributes: StopAreaAttributes,
    ) -> Result<StopAreaIdx> {
        let uri = self.stop_areas.ensure_vacant(uri)?;
        let timezone = parse_timezone(timezone)?;
        Ok(self.stop_areas.push(
            uri,
            StopArea {
                uri,
                timezone,
                attributes,
            },
        ))
    }

    pub fn add_stop_point(
        &mut self,
        uri: &str,
        stop_area_uri: &str,
        attributes: StopPointAttributes,
    ) -> Result<StopPointIdx> {
        let stop_area = self
            .stop_areas
            .resolve(EntityKind::StopPoint, stop_area_uri)?;
        let uri = self.stop_points.ensure_vacant(uri)?;
        Ok(self.stop_points.push(
            uri,
            StopPoint {
                uri,
                stop_area,
                attributes,
            },
        ))
    }

    pub fn add_operator(
        &mut self,
        uri: &str,
        timezone: &str,
        attributes: OperatorAttributes,
    ) -> Result<OperatorIdx> {
        let uri = self.operators.ensure_vacant(uri)?;
        let timezone = parse_timezone(timezone)?;
        Ok(self.operators.push(
            uri,
            Operator {
                uri,
                timezone,
                attributes,
            },
        ))
    }

    pub fn add_physical_mode(&mut self, uri: &str, name: Option<&str>) -> Result<PhysicalModeIdx> {
        let uri = self.physical_modes.ensure_vacant(uri)?;
        Ok(self.physical_modes.push(
            uri,
            PhysicalMode {
                uri,
                name: name.map(str::to_string),
            },
        ))
    }

    pub fn add_commercial_mode(
        &mut self,
        uri: &str,
        name: Option<&str>,
    ) -> Result<CommercialModeIdx> {
        let uri = self.commercial_modes.ensure_vacant(uri)?;
        Ok(self.commercial_modes.push(
            uri,
            CommercialMode {
                uri,
                name: name.map(str::to_string),
            },
        ))
    }

    pub fn add_line(
        &mut self,
        uri: &str,
        operator_uri: &str,
        physical_mode_uri: &str,
        attributes: LineAttributes,
    ) -> Result<LineIdx> {
        let operator = self.operators.resolve(EntityKind::Line, operator_uri)?;
        let physical_mode = self
            .physical_modes
            .resolve(EntityKind::Line, physical_mode_uri)?;
        let uri = self.lines.ensure_vacant(uri)?;
        Ok(self.lines.push(
            uri,
            Line {
                uri,
                operator,
                physical_mode,
                attributes,
            },
        ))
    }

    pub fn add_route(
        &mut self,
        uri: &str,
        line_uri: &str,
        attributes: RouteAttributes,
    ) -> Result<RouteIdx> {
        let line = self.lines.resolve(EntityKind::Route, line_uri)?;
        let uri = self.routes.ensure_vacant(uri)?;
        Ok(self.routes.push(
            uri,
            Route {
                uri,
                line,
                attributes,
            },
        ))
    }

    pub fn add_connection(
        &mut self,
        from_stop_point_uri: &str,
        to_stop_point_uri: &str,
        min_transfer_time: u32,
        kind: ConnectionKind,
    ) -> Result<()> {
        let from = self
            .stop_points
            .resolve(EntityKind::Connection, from_stop_point_uri)?;
        let to = self
            .stop_points
            .resolve(EntityKind::Connection, to_stop_point_uri)?;
        if self.connection_by_pair.contains_key(&(from, to)) {
            return Err(TimetableError::DuplicateKey {
                kind: EntityKind::Connection,
                key: format!("{} -> {}", from_stop_point_uri, to_stop_point_uri),
            });
        }
        self.connection_by_pair
            .insert((from, to), self.connections.len());
        self.connections.push(Connection {
            from,
            to,
            min_transfer_time,
            kind,
        });
        Ok(())
    }

    pub fn has_connection(&self, from: StopPointIdx, to: StopPointIdx) -> bool {
        self.connection_by_pair.contains_key(&(from, to))
    }

    pub fn add_vehicle_journey(
        &mut self,
        uri: &str,
        route_uri: &str,
        commercial_mode_uri: &str,
        headsign: Option<&str>,
    ) -> Result<VehicleJourneyIdx> {
        let uri = self.vehicle_journeys.ensure_vacant(uri)?;
        let route = self
            .routes
            .resolve(EntityKind::VehicleJourney, route_uri)?;
        let commercial_mode = self
            .commercial_modes
            .resolve(EntityKind::VehicleJourney, commercial_mode_uri)?;
        Ok(self.vehicle_journeys.push(
            uri,
            VehicleJourney {
                uri,
                route,
                commercial_mode,
                headsign: headsign.filter(|h| !h.is_empty()).map(ustr),
                validity: ValidityPattern::empty(),
                departure_time: 0,
                state: JourneyState::Assembly {
                    points: vec![],
                    timings: vec![],
                },
            },
        ))
    }

    pub(crate) fn vehicle_journey_mut(&mut self, idx: VehicleJourneyIdx) -> &mut VehicleJourney {
        self.vehicle_journeys.get_mut(idx)
    }

    /// Returns the pattern for `signature`, creating it on first sight.
    pub fn intern_journey_pattern(
        &mut self,
        signature: PatternSignature,
        headsign: Option<Ustr>,
    ) -> Interned<JourneyPatternIdx> {
        if let Some(idx) = self.journey_pattern_by_signature.get(&signature) {
            return Interned::Existing(*idx);
        }
        let idx = JourneyPatternIdx::from_index(self.journey_patterns.len());
        self.journey_patterns.push(JourneyPattern {
            uri: ustr(&idx.0.to_string()),
            route: signature.route,
            commercial_mode: signature.commercial_mode,
            headsign,
            points: signature.points.clone(),
        });
        self.journey_pattern_by_signature.insert(signature, idx);
        Interned::New(idx)
    }

    /// Returns the time demand group with exactly these points, creating it
    /// on first sight.
    pub fn intern_time_demand_group(
        &mut self,
        points: Vec<TimeDemandGroupPoint>,
    ) -> Interned<TimeDemandGroupIdx> {
        if let Some(idx) = self.time_demand_group_by_signature.get(&points) {
            return Interned::Existing(*idx);
        }
        let idx = TimeDemandGroupIdx::from_index(self.time_demand_groups.len());
        self.time_demand_groups.push(TimeDemandGroup {
            uri: ustr(&idx.0.to_string()),
            points: points.clone(),
        });
        self.time_demand_group_by_signature.insert(points, idx);
        Interned::New(idx)
    }

    pub fn stop_areas(&self) -> &UriTable<StopAreaIdx, StopArea> {
        &self.stop_areas
    }

    pub fn stop_points(&self) -> &UriTable<StopPointIdx, StopPoint> {
        &self.stop_points
    }

    pub fn operators(&self) -> &UriTable<OperatorIdx, Operator> {
        &self.operators
    }

    pub fn physical_modes(&self) -> &UriTable<PhysicalModeIdx, PhysicalMode> {
        &self.physical_modes
    }

    pub fn commercial_modes(&self) -> &UriTable<CommercialModeIdx, CommercialMode> {
        &self.commercial_modes
    }

    pub fn lines(&self) -> &UriTable<LineIdx, Line> {
        &self.lines
    }

    pub fn routes(&self) -> &UriTable<RouteIdx, Route> {
        &self.routes
    }

    pub fn vehicle_journeys(&self) -> &UriTable<VehicleJourneyIdx, VehicleJourney> {
        &self.vehicle_journeys
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn journey_patterns(&self) -> &[JourneyPattern] {
        &self.journey_patterns
    }

    pub fn journey_pattern(&self, idx: JourneyPatternIdx) -> &JourneyPattern {
        &self.journey_patterns[idx.index()]
    }

    pub fn time_demand_groups(&self) -> &[TimeDemandGroup] {
        &self.time_demand_groups
    }

    pub fn time_demand_group(&self, idx: TimeDemandGroupIdx) -> &TimeDemandGroup {
        &self.time_demand_groups[idx.index()]
    }

    pub fn vehicle_journeys_utc(&self) -> &[VehicleJourneyUtc] {
        &self.vehicle_journeys_utc
    }

    /// Largest UTC offset over all finished vehicle journeys, the zero point
    /// of every exported time.
    pub fn global_utc_offset(&self) -> Option<i32> {
        self.vehicle_journeys_utc
            .iter()
            .map(|vj| vj.utc_offset)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timetable() -> Timetable {
        Timetable::new(
            NaiveDate::from_ymd_opt(2014, 1, 1).unwrap(),
            "Europe/Amsterdam",
        )
        .unwrap()
    }

    fn named_area(name: &str) -> StopAreaAttributes {
        StopAreaAttributes {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn timetable_rejects_unknown_timezone() {
        let result = Timetable::new(NaiveDate::from_ymd_opt(2014, 1, 1).unwrap(), "Mars/Olympus");
        assert!(matches!(result, Err(TimetableError::InvalidTimezone(tz)) if tz == "Mars/Olympus"));
    }

    #[test]
    fn duplicate_stop_area_keeps_the_first() {
        let mut tt = timetable();
        tt.add_stop_area("SA1", "Europe/Amsterdam", named_area("first"))
            .unwrap();
        let err = tt
            .add_stop_area("SA1", "Europe/Amsterdam", named_area("second"))
            .unwrap_err();
        assert!(matches!(
            err,
            TimetableError::DuplicateKey {
                kind: EntityKind::StopArea,
                ..
            }
        ));
        let area = tt.stop_areas().by_uri("SA1").unwrap();
        assert_eq!(area.attributes.name.as_deref(), Some("first"));
        assert_eq!(tt.stop_areas().len(), 1);
    }

    #[test]
    fn stop_area_rejects_unknown_timezone() {
        let mut tt = timetable();
        let err = tt
            .add_stop_area("SA1", "Nowhere/Atlantis", StopAreaAttributes::default())
            .unwrap_err();
        assert!(matches!(err, TimetableError::InvalidTimezone(_)));
        assert!(tt.stop_areas().lookup("SA1").is_none());
    }

    #[test]
    fn stop_point_needs_its_stop_area() {
        let mut tt = timetable();
        let err = tt
            .add_stop_point("SP1", "SA1", StopPointAttributes::default())
            .unwrap_err();
        assert!(matches!(
            err,
            TimetableError::DanglingReference {
                kind: EntityKind::StopPoint,
                target: EntityKind::StopArea,
                ..
            }
        ));

        let area = tt
            .add_stop_area("SA1", "Europe/Amsterdam", StopAreaAttributes::default())
            .unwrap();
        let point = tt
            .add_stop_point("SP1", "SA1", StopPointAttributes::default())
            .unwrap();
        assert_eq!(tt.stop_points()[point].stop_area, area);
    }

    #[test]
    fn every_uri_kind_rejects_duplicates() {
        let mut tt = timetable();
        tt.add_operator("OP", "Europe/Amsterdam", OperatorAttributes::default())
            .unwrap();
        assert!(tt
            .add_operator("OP", "Europe/Amsterdam", OperatorAttributes::default())
            .is_err());
        tt.add_physical_mode("3", Some("Bus")).unwrap();
        assert!(tt.add_physical_mode("3", None).is_err());
        tt.add_commercial_mode("3", Some("Bus")).unwrap();
        assert!(tt.add_commercial_mode("3", None).is_err());
        tt.add_line("L1", "OP", "3", LineAttributes::default())
            .unwrap();
        assert!(tt
            .add_line("L1", "OP", "3", LineAttributes::default())
            .is_err());
        tt.add_route("R1", "L1", RouteAttributes::default()).unwrap();
        assert!(tt.add_route("R1", "L1", RouteAttributes::default()).is_err());
        tt.add_vehicle_journey("VJ1", "R1", "3", None).unwrap();
        assert!(matches!(
            tt.add_vehicle_journey("VJ1", "R1", "3", None),
            Err(TimetableError::DuplicateKey {
                kind: EntityKind::VehicleJourney,
                ..
            })
        ));
    }

    #[test]
    fn line_and_route_need_their_references() {
        let mut tt = timetable();
        assert!(matches!(
            tt.add_line("L1", "OP", "3", LineAttributes::default()),
            Err(TimetableError::DanglingReference {
                target: EntityKind::Operator,
                ..
            })
        ));
        tt.add_operator("OP", "Europe/Amsterdam", OperatorAttributes::default())
            .unwrap();
        assert!(matches!(
            tt.add_line("L1", "OP", "3", LineAttributes::default()),
            Err(TimetableError::DanglingReference {
                target: EntityKind::PhysicalMode,
                ..
            })
        ));
        assert!(matches!(
            tt.add_route("R1", "L1", RouteAttributes::default()),
            Err(TimetableError::DanglingReference {
                target: EntityKind::Line,
                ..
            })
        ));
    }

    #[test]
    fn connections_are_unique_per_direction() {
        let mut tt = timetable();
        tt.add_stop_area("SA", "Europe/Amsterdam", StopAreaAttributes::default())
            .unwrap();
        let a = tt
            .add_stop_point("A", "SA", StopPointAttributes::default())
            .unwrap();
        let b = tt
            .add_stop_point("B", "SA", StopPointAttributes::default())
            .unwrap();
        tt.add_connection("A", "B", 120, ConnectionKind::SameStopArea)
            .unwrap();
        tt.add_connection("B", "A", 120, ConnectionKind::SameStopArea)
            .unwrap();
        assert!(matches!(
            tt.add_connection("A", "B", 60, ConnectionKind::Transfer),
            Err(TimetableError::DuplicateKey {
                kind: EntityKind::Connection,
                ..
            })
        ));
        assert!(matches!(
            tt.add_connection("A", "C", 60, ConnectionKind::Transfer),
            Err(TimetableError::DanglingReference { .. })
        ));
        assert!(tt.has_connection(a, b));
        assert_eq!(tt.connections().len(), 2);
        assert_eq!(tt.connections()[0].min_transfer_time, 120);
    }

    #[test]
    fn only_known_wheelchair_access_sets_a_bit() {
        let bits = |wheelchair_boarding| StopPointProperties { wheelchair_boarding }.bits();
        assert_eq!(bits(Some(true)), StopPointProperties::WHEELCHAIR_BOARDING);
        assert_eq!(bits(Some(false)), 0);
        assert_eq!(bits(None), 0);
    }

    #[test]
    fn route_type_bits() {
        let route = Route {
            uri: ustr("R"),
            line: LineIdx(0),
            attributes: RouteAttributes {
                route_type: 3,
                direction: None,
            },
        };
        assert_eq!(route.route_type_bits(), 8);
        let extended = Route {
            attributes: RouteAttributes {
                route_type: 700,
                direction: None,
            },
            ..route
        };
        assert_eq!(extended.route_type_bits(), 0);
    }

    #[test]
    fn interning_reuses_identical_time_demand_groups() {
        let mut tt = timetable();
        let points = vec![
            TimeDemandGroupPoint {
                drive_time: 0,
                total_drive_time: 0,
            },
            TimeDemandGroupPoint {
                drive_time: 300,
                total_drive_time: 300,
            },
        ];
        let first = tt.intern_time_demand_group(points.clone());
        let second = tt.intern_time_demand_group(points);
        assert!(first.is_new());
        assert_eq!(second, Interned::Existing(first.idx()));
        assert_eq!(tt.time_demand_group(first.idx()).uri.as_str(), "0");
    }
}
