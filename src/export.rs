use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::hash::Hash;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::TimeZone;

use crate::calendar::{ValidityPattern, MAX_DAYS};
use crate::error::{Result, TimetableError};
use crate::string_pool::{write_string_table, StringPool};
use crate::transit_model::{
    CommercialModeIdx, Connection, JourneyPatternIdx, LineIdx, OperatorIdx, PhysicalModeIdx,
    RouteIdx, StopAreaIdx, StopPointIdx, TimeDemandGroupIdx, Timetable,
};
use crate::vehicle_journey::VehicleJourneyUtc;

pub const FORMAT_TAG: &[u8; 8] = b"TTABLEV4";

/// Times are stored in units of `1 << TIME_SHIFT` seconds.
pub const TIME_SHIFT: u32 = 2;
pub const UNREACHABLE_TIME: u16 = u16::MAX;
/// Step of the per-trip deviation from the global UTC offset, in seconds.
pub const UTC_DEVIATION_QUANTUM: i32 = 900;

pub const JOURNEY_PATTERN_RECORD_SIZE: usize = 20;
pub const VEHICLE_JOURNEY_RECORD_SIZE: usize = 8;

pub const JOURNEY_PATTERN_POINT_TIMING: u8 = 1;
pub const JOURNEY_PATTERN_POINT_BOARDING: u8 = 2;
pub const JOURNEY_PATTERN_POINT_ALIGHTING: u8 = 4;

/// Sections of a compiled timetable, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    StopPointCoords,
    StopAreaCoords,
    StopAreaForStopPoint,
    StopPointAttributes,
    JourneyPatternPointOffsets,
    JourneyPatternPoints,
    JourneyPatternPointAttributes,
    JourneyPatternPointHeadsigns,
    JourneyPatterns,
    JourneyPatternActive,
    VehicleJourneyOffsets,
    VehicleJourneys,
    VehicleJourneyActive,
    VehicleJourneyTimeOffsets,
    TimeDemandGroupOffsets,
    TimeDemandGroupPoints,
    JourneyPatternsAtStopOffsets,
    JourneyPatternsAtStop,
    TransferOffsets,
    TransferTargetStops,
    TransferDurations,
    LineForRoute,
    OperatorForLine,
    PhysicalModeForLine,
    StopPointIds,
    StopAreaIds,
    OperatorIds,
    LineIds,
    RouteIds,
    VehicleJourneyIds,
    CommercialModeIds,
    PhysicalModeIds,
    PlatformCodes,
    StopAreaTimezones,
    StopPointNames,
    StopAreaNames,
    OperatorNames,
    OperatorUrls,
    LineCodes,
    LineNames,
    LineColors,
    LineColorsText,
    CommercialModeNames,
    PhysicalModeNames,
    StringPool,
}

impl Section {
    pub const COUNT: usize = 45;

    pub const ALL: [Section; Section::COUNT] = [
        Section::StopPointCoords,
        Section::StopAreaCoords,
        Section::StopAreaForStopPoint,
        Section::StopPointAttributes,
        Section::JourneyPatternPointOffsets,
        Section::JourneyPatternPoints,
        Section::JourneyPatternPointAttributes,
        Section::JourneyPatternPointHeadsigns,
        Section::JourneyPatterns,
        Section::JourneyPatternActive,
        Section::VehicleJourneyOffsets,
        Section::VehicleJourneys,
        Section::VehicleJourneyActive,
        Section::VehicleJourneyTimeOffsets,
        Section::TimeDemandGroupOffsets,
        Section::TimeDemandGroupPoints,
        Section::JourneyPatternsAtStopOffsets,
        Section::JourneyPatternsAtStop,
        Section::TransferOffsets,
        Section::TransferTargetStops,
        Section::TransferDurations,
        Section::LineForRoute,
        Section::OperatorForLine,
        Section::PhysicalModeForLine,
        Section::StopPointIds,
        Section::StopAreaIds,
        Section::OperatorIds,
        Section::LineIds,
        Section::RouteIds,
        Section::VehicleJourneyIds,
        Section::CommercialModeIds,
        Section::PhysicalModeIds,
        Section::PlatformCodes,
        Section::StopAreaTimezones,
        Section::StopPointNames,
        Section::StopAreaNames,
        Section::OperatorNames,
        Section::OperatorUrls,
        Section::LineCodes,
        Section::LineNames,
        Section::LineColors,
        Section::LineColorsText,
        Section::CommercialModeNames,
        Section::PhysicalModeNames,
        Section::StringPool,
    ];

    pub fn position(self) -> usize {
        self as usize
    }

    /// Size in bytes of one element, `None` for fixed-width string tables
    /// whose slot width is stored in the section itself.
    pub fn element_size(self) -> Option<usize> {
        match self {
            Section::StopPointCoords | Section::StopAreaCoords => Some(8),
            Section::StopPointAttributes
            | Section::JourneyPatternPointAttributes
            | Section::VehicleJourneyTimeOffsets
            | Section::StringPool => Some(1),
            Section::TransferDurations => Some(2),
            Section::TimeDemandGroupPoints => Some(4),
            Section::JourneyPatterns => Some(JOURNEY_PATTERN_RECORD_SIZE),
            Section::VehicleJourneys => Some(VEHICLE_JOURNEY_RECORD_SIZE),
            Section::StopPointIds
            | Section::StopAreaIds
            | Section::OperatorIds
            | Section::LineIds
            | Section::RouteIds
            | Section::VehicleJourneyIds
            | Section::CommercialModeIds
            | Section::PhysicalModeIds
            | Section::PlatformCodes
            | Section::StopAreaTimezones => None,
            _ => Some(4),
        }
    }
}

/// Fixed-size record at the start of every compiled timetable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Unix time of local midnight of the first day.
    pub calendar_epoch: u64,
    pub utc_offset: i32,
    pub n_days: u32,
    pub counts: [u32; Section::COUNT],
    pub locations: [u32; Section::COUNT],
}

impl Header {
    pub const SIZE: usize = 8 + 8 + 4 + 4 + 8 * Section::COUNT;

    fn new(calendar_epoch: u64, utc_offset: i32) -> Header {
        Header {
            calendar_epoch,
            utc_offset,
            n_days: MAX_DAYS,
            counts: [0; Section::COUNT],
            locations: [0; Section::COUNT],
        }
    }

    pub fn count(&self, section: Section) -> u32 {
        self.counts[section.position()]
    }

    pub fn location(&self, section: Section) -> u32 {
        self.locations[section.position()]
    }

    fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(FORMAT_TAG)?;
        out.write_u64::<LittleEndian>(self.calendar_epoch)?;
        out.write_i32::<LittleEndian>(self.utc_offset)?;
        out.write_u32::<LittleEndian>(self.n_days)?;
        for count in self.counts {
            out.write_u32::<LittleEndian>(count)?;
        }
        for location in self.locations {
            out.write_u32::<LittleEndian>(location)?;
        }
        Ok(())
    }

    pub fn read(data: &[u8]) -> Result<Header> {
        use byteorder::ReadBytesExt;

        if data.len() < Header::SIZE {
            return Err(TimetableError::MalformedFile(format!(
                "{} bytes is too short for a header",
                data.len()
            )));
        }
        if &data[..8] != FORMAT_TAG {
            return Err(TimetableError::MalformedFile(format!(
                "unknown format tag {:?}",
                String::from_utf8_lossy(&data[..8])
            )));
        }
        let mut cursor = &data[8..Header::SIZE];
        let mut header = Header::new(
            cursor.read_u64::<LittleEndian>()?,
            cursor.read_i32::<LittleEndian>()?,
        );
        header.n_days = cursor.read_u32::<LittleEndian>()?;
        for count in header.counts.iter_mut() {
            *count = cursor.read_u32::<LittleEndian>()?;
        }
        for location in header.locations.iter_mut() {
            *location = cursor.read_u32::<LittleEndian>()?;
        }
        Ok(header)
    }
}

/// Converts seconds to the stored resolution, clamping out-of-range values
/// to [`UNREACHABLE_TIME`].
pub fn rtime(seconds: i64) -> u16 {
    let units = seconds.max(0) >> TIME_SHIFT;
    if units >= UNREACHABLE_TIME as i64 {
        UNREACHABLE_TIME
    } else {
        units as u16
    }
}

pub fn utc_deviation(utc_offset: i32, global_utc_offset: i32) -> i8 {
    ((utc_offset - global_utc_offset) / UTC_DEVIATION_QUANTUM) as i8
}

/// Dense indices in order of first encounter.
#[derive(Debug)]
struct Indexer<I> {
    order: Vec<I>,
    index_of: HashMap<I, u32>,
}

impl<I: Copy + Eq + Hash> Indexer<I> {
    fn new() -> Self {
        Indexer {
            order: vec![],
            index_of: HashMap::new(),
        }
    }

    /// Returns the dense index and whether it was just assigned.
    fn put(&mut self, item: I) -> (u32, bool) {
        if let Some(i) = self.index_of.get(&item) {
            return (*i, false);
        }
        let i = self.order.len() as u32;
        self.order.push(item);
        self.index_of.insert(item, i);
        (i, true)
    }

    fn get(&self, item: I) -> Option<u32> {
        self.index_of.get(&item).copied()
    }

    fn index(&self, item: I) -> u32 {
        match self.get(item) {
            Some(i) => i,
            None => panic!("exported entity was never indexed"),
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn iter(&self) -> impl Iterator<Item = I> + '_ {
        self.order.iter().copied()
    }
}

/// Result of the first pass: everything that will be written, with the
/// dense indices it will be written under.
struct ExportIndex<'a> {
    timetable: &'a Timetable,
    stop_points: Indexer<StopPointIdx>,
    stop_areas: Indexer<StopAreaIdx>,
    operators: Indexer<OperatorIdx>,
    lines: Indexer<LineIdx>,
    routes: Indexer<RouteIdx>,
    journey_patterns: Indexer<JourneyPatternIdx>,
    time_demand_groups: Indexer<TimeDemandGroupIdx>,
    commercial_modes: Indexer<CommercialModeIdx>,
    physical_modes: Indexer<PhysicalModeIdx>,
    trips_in_pattern: Vec<Vec<&'a VehicleJourneyUtc>>,
    pattern_validity: Vec<ValidityPattern>,
    patterns_at_stop: Vec<BTreeSet<u32>>,
    transfers_from_stop: Vec<Vec<&'a Connection>>,
}

fn sort_key<'a>(
    timetable: &'a Timetable,
    variant: &VehicleJourneyUtc,
) -> (&'a str, &'a str, &'a str, i32, &'a str, i32) {
    let vj = &timetable.vehicle_journeys()[variant.vehicle_journey];
    let route = &timetable.routes()[vj.route];
    let line = &timetable.lines()[route.line];
    let operator = &timetable.operators()[line.operator];
    (
        operator.uri.as_str(),
        line.uri.as_str(),
        route.uri.as_str(),
        variant.departure_time,
        vj.uri.as_str(),
        variant.utc_offset,
    )
}

impl<'a> ExportIndex<'a> {
    fn build(timetable: &'a Timetable) -> Result<ExportIndex<'a>> {
        let mut index = ExportIndex {
            timetable,
            stop_points: Indexer::new(),
            stop_areas: Indexer::new(),
            operators: Indexer::new(),
            lines: Indexer::new(),
            routes: Indexer::new(),
            journey_patterns: Indexer::new(),
            time_demand_groups: Indexer::new(),
            commercial_modes: Indexer::new(),
            physical_modes: Indexer::new(),
            trips_in_pattern: vec![],
            pattern_validity: vec![],
            patterns_at_stop: vec![],
            transfers_from_stop: vec![],
        };

        if let Some((_, vj)) = timetable
            .vehicle_journeys()
            .iter()
            .find(|(_, vj)| !vj.is_finished())
        {
            return Err(TimetableError::NotFinished(vj.uri.to_string()));
        }

        let mut variants: Vec<&VehicleJourneyUtc> = timetable
            .vehicle_journeys_utc()
            .iter()
            .filter(|variant| !variant.validity.is_empty())
            .collect();
        variants.sort_by(|a, b| sort_key(timetable, a).cmp(&sort_key(timetable, b)));

        for variant in variants {
            let vj = &timetable.vehicle_journeys()[variant.vehicle_journey];
            let (Some(jp_idx), Some(tdg_idx)) = (vj.journey_pattern(), vj.time_demand_group())
            else {
                panic!("vehicle journey {} has utc variants but is not finished", vj.uri);
            };
            let jp = timetable.journey_pattern(jp_idx);
            let route = &timetable.routes()[jp.route];
            let line = &timetable.lines()[route.line];

            index.operators.put(line.operator);
            index.lines.put(route.line);
            index.physical_modes.put(line.physical_mode);
            index.routes.put(jp.route);
            index.commercial_modes.put(jp.commercial_mode);
            index.time_demand_groups.put(tdg_idx);

            let (jp_i, new_pattern) = index.journey_patterns.put(jp_idx);
            if new_pattern {
                index.trips_in_pattern.push(vec![]);
                index.pattern_validity.push(ValidityPattern::empty());
            }
            let jp_i = jp_i as usize;
            index.trips_in_pattern[jp_i].push(variant);
            index.pattern_validity[jp_i] = index.pattern_validity[jp_i].union(variant.validity);

            for point in &jp.points {
                let (sp_i, new_stop) = index.stop_points.put(point.stop_point);
                if new_stop {
                    index.patterns_at_stop.push(BTreeSet::new());
                }
                index.patterns_at_stop[sp_i as usize].insert(jp_i as u32);
                index
                    .stop_areas
                    .put(timetable.stop_points()[point.stop_point].stop_area);
            }
        }

        if index.journey_patterns.len() == 0 {
            return Err(TimetableError::EmptyResult);
        }

        index.transfers_from_stop = vec![vec![]; index.stop_points.len()];
        for connection in timetable.connections() {
            if let (Some(from), Some(_)) = (
                index.stop_points.get(connection.from),
                index.stop_points.get(connection.to),
            ) {
                index.transfers_from_stop[from as usize].push(connection);
            }
        }
        Ok(index)
    }

    fn trips(&self) -> impl Iterator<Item = &'a VehicleJourneyUtc> + '_ {
        self.trips_in_pattern.iter().flatten().copied()
    }

    fn n_trips(&self) -> usize {
        self.trips_in_pattern.iter().map(Vec::len).sum()
    }
}

/// Writes offsets of `len` consecutive slices, followed by the total as
/// sentinel.
fn write_offsets<W: Write>(out: &mut W, lengths: impl Iterator<Item = usize>) -> Result<()> {
    let mut offset = 0u32;
    for len in lengths {
        out.write_u32::<LittleEndian>(offset)?;
        offset += len as u32;
    }
    out.write_u32::<LittleEndian>(offset)?;
    Ok(())
}

struct Emitter<'a, 'w, W> {
    index: ExportIndex<'a>,
    out: &'w mut W,
    start: u64,
    header: Header,
    pool: StringPool,
    global_utc_offset: i32,
}

impl<'a, 'w, W: Write + Seek> Emitter<'a, 'w, W> {
    /// Pads to a 4-byte boundary and records where `section` starts.
    fn begin(&mut self, section: Section, count: usize) -> Result<()> {
        let position = self.out.stream_position()? - self.start;
        let padding = (4 - position % 4) % 4;
        self.out.write_all(&[0u8; 4][..padding as usize])?;
        let location = position + padding;
        log::debug!("{:?}: {} elements at byte {}", section, count, location);
        self.header.locations[section.position()] = location as u32;
        self.header.counts[section.position()] = count as u32;
        Ok(())
    }

    fn stored_time(&self, utc_seconds: i32) -> i64 {
        utc_seconds as i64 + self.global_utc_offset as i64
    }

    fn write_u32_section(&mut self, section: Section, values: Vec<u32>) -> Result<()> {
        self.begin(section, values.len())?;
        for value in values {
            self.out.write_u32::<LittleEndian>(value)?;
        }
        Ok(())
    }

    fn write_pooled_section(&mut self, section: Section, strings: Vec<&str>) -> Result<()> {
        let offsets = strings.iter().map(|s| self.pool.put(s)).collect();
        self.write_u32_section(section, offsets)
    }

    fn write_string_table_section<S: AsRef<str>>(
        &mut self,
        section: Section,
        strings: &[S],
    ) -> Result<()> {
        self.begin(section, strings.len())?;
        write_string_table(&mut *self.out, strings)?;
        Ok(())
    }

    fn write_stops(&mut self) -> Result<()> {
        let tt = self.index.timetable;
        let stop_points: Vec<_> = self
            .index
            .stop_points
            .iter()
            .map(|sp| &tt.stop_points()[sp])
            .collect();
        let stop_areas: Vec<_> = self
            .index
            .stop_areas
            .iter()
            .map(|sa| &tt.stop_areas()[sa])
            .collect();

        self.begin(Section::StopPointCoords, stop_points.len())?;
        for sp in &stop_points {
            self.out
                .write_f32::<LittleEndian>(sp.attributes.latitude.unwrap_or(0.0) as f32)?;
            self.out
                .write_f32::<LittleEndian>(sp.attributes.longitude.unwrap_or(0.0) as f32)?;
        }
        self.begin(Section::StopAreaCoords, stop_areas.len())?;
        for sa in &stop_areas {
            self.out
                .write_f32::<LittleEndian>(sa.attributes.latitude.unwrap_or(0.0) as f32)?;
            self.out
                .write_f32::<LittleEndian>(sa.attributes.longitude.unwrap_or(0.0) as f32)?;
        }
        let areas = stop_points
            .iter()
            .map(|sp| self.index.stop_areas.index(sp.stop_area))
            .collect();
        self.write_u32_section(Section::StopAreaForStopPoint, areas)?;
        self.begin(Section::StopPointAttributes, stop_points.len())?;
        for sp in &stop_points {
            self.out.write_u8(sp.attributes.properties.bits())?;
        }
        Ok(())
    }

    fn write_journey_patterns(&mut self) -> Result<()> {
        let tt = self.index.timetable;
        let patterns: Vec<_> = self
            .index
            .journey_patterns
            .iter()
            .map(|jp| tt.journey_pattern(jp))
            .collect();
        let n_points: usize = patterns.iter().map(|jp| jp.points.len()).sum();

        self.begin(Section::JourneyPatternPointOffsets, patterns.len() + 1)?;
        write_offsets(&mut *self.out, patterns.iter().map(|jp| jp.points.len()))?;

        let stops = patterns
            .iter()
            .flat_map(|jp| &jp.points)
            .map(|point| self.index.stop_points.index(point.stop_point))
            .collect();
        self.write_u32_section(Section::JourneyPatternPoints, stops)?;

        self.begin(Section::JourneyPatternPointAttributes, n_points)?;
        for point in patterns.iter().flat_map(|jp| &jp.points) {
            let mut attributes = 0;
            if point.timing_point {
                attributes |= JOURNEY_PATTERN_POINT_TIMING;
            }
            if point.for_boarding {
                attributes |= JOURNEY_PATTERN_POINT_BOARDING;
            }
            if point.for_alighting {
                attributes |= JOURNEY_PATTERN_POINT_ALIGHTING;
            }
            self.out.write_u8(attributes)?;
        }

        let headsigns = patterns
            .iter()
            .flat_map(|jp| {
                jp.points
                    .iter()
                    .map(move |point| {
                        point
                            .headsign
                            .as_ref()
                            .or(jp.headsign.as_ref())
                            .map_or("", |h| h.as_str())
                    })
            })
            .collect();
        self.write_pooled_section(Section::JourneyPatternPointHeadsigns, headsigns)?;

        self.begin(Section::JourneyPatterns, patterns.len())?;
        for (jp_i, jp) in patterns.iter().enumerate() {
            let trips = &self.index.trips_in_pattern[jp_i];
            let min_time = trips
                .iter()
                .map(|trip| self.stored_time(trip.departure_time))
                .min()
                .unwrap_or(0);
            let max_time = trips
                .iter()
                .map(|trip| {
                    let vj = &tt.vehicle_journeys()[trip.vehicle_journey];
                    let duration = vj
                        .time_demand_group()
                        .and_then(|tdg| tt.time_demand_group(tdg).points.last())
                        .map_or(0, |point| point.total_drive_time);
                    self.stored_time(trip.departure_time) + duration as i64
                })
                .max()
                .unwrap_or(0);
            let headsign = self
                .pool
                .put(jp.headsign.as_ref().map_or("", |h| h.as_str()));
            let route = &tt.routes()[jp.route];
            self.out
                .write_u32::<LittleEndian>(self.index.routes.index(jp.route))?;
            self.out
                .write_u32::<LittleEndian>(self.index.commercial_modes.index(jp.commercial_mode))?;
            self.out.write_u32::<LittleEndian>(headsign)?;
            self.out.write_u16::<LittleEndian>(route.route_type_bits())?;
            self.out.write_u16::<LittleEndian>(rtime(min_time))?;
            self.out.write_u16::<LittleEndian>(rtime(max_time))?;
            self.out.write_u16::<LittleEndian>(0)?;
        }

        let active = self.index.pattern_validity.iter().map(|v| v.bits()).collect();
        self.write_u32_section(Section::JourneyPatternActive, active)
    }

    fn write_vehicle_journeys(&mut self) -> Result<()> {
        let tt = self.index.timetable;
        let n_trips = self.index.n_trips();

        self.begin(Section::VehicleJourneyOffsets, self.index.trips_in_pattern.len() + 1)?;
        write_offsets(&mut *self.out, self.index.trips_in_pattern.iter().map(Vec::len))?;

        self.begin(Section::VehicleJourneys, n_trips)?;
        let trips: Vec<_> = self.index.trips().collect();
        for trip in &trips {
            let vj = &tt.vehicle_journeys()[trip.vehicle_journey];
            let tdg = vj
                .time_demand_group()
                .map(|tdg| self.index.time_demand_groups.index(tdg))
                .unwrap_or_default();
            self.out.write_u32::<LittleEndian>(tdg)?;
            self.out
                .write_u16::<LittleEndian>(rtime(self.stored_time(trip.departure_time)))?;
            self.out.write_u16::<LittleEndian>(0)?;
        }

        let active = trips.iter().map(|trip| trip.validity.bits()).collect();
        self.write_u32_section(Section::VehicleJourneyActive, active)?;

        self.begin(Section::VehicleJourneyTimeOffsets, n_trips)?;
        for trip in &trips {
            self.out
                .write_i8(utc_deviation(trip.utc_offset, self.global_utc_offset))?;
        }
        Ok(())
    }

    fn write_time_demand_groups(&mut self) -> Result<()> {
        let tt = self.index.timetable;
        let groups: Vec<_> = self
            .index
            .time_demand_groups
            .iter()
            .map(|tdg| tt.time_demand_group(tdg))
            .collect();
        let n_points = groups.iter().map(|g| g.points.len()).sum();

        self.begin(Section::TimeDemandGroupOffsets, groups.len() + 1)?;
        write_offsets(&mut *self.out, groups.iter().map(|g| g.points.len()))?;

        self.begin(Section::TimeDemandGroupPoints, n_points)?;
        for point in groups.iter().flat_map(|g| &g.points) {
            self.out
                .write_u16::<LittleEndian>(rtime(point.drive_time as i64))?;
            self.out
                .write_u16::<LittleEndian>(rtime(point.total_drive_time as i64))?;
        }
        Ok(())
    }

    fn write_stop_lookups(&mut self) -> Result<()> {
        let patterns_at_stop = std::mem::take(&mut self.index.patterns_at_stop);
        self.begin(Section::JourneyPatternsAtStopOffsets, patterns_at_stop.len() + 1)?;
        write_offsets(&mut *self.out, patterns_at_stop.iter().map(BTreeSet::len))?;
        let flat = patterns_at_stop.into_iter().flatten().collect();
        self.write_u32_section(Section::JourneyPatternsAtStop, flat)?;

        let transfers = std::mem::take(&mut self.index.transfers_from_stop);
        self.begin(Section::TransferOffsets, transfers.len() + 1)?;
        write_offsets(&mut *self.out, transfers.iter().map(Vec::len))?;
        let targets = transfers
            .iter()
            .flatten()
            .map(|conn| self.index.stop_points.index(conn.to))
            .collect();
        self.write_u32_section(Section::TransferTargetStops, targets)?;
        let n_transfers = transfers.iter().map(Vec::len).sum();
        self.begin(Section::TransferDurations, n_transfers)?;
        for conn in transfers.iter().flatten() {
            self.out
                .write_u16::<LittleEndian>(rtime(conn.min_transfer_time as i64))?;
        }
        Ok(())
    }

    fn write_relations(&mut self) -> Result<()> {
        let tt = self.index.timetable;
        let line_for_route = self
            .index
            .routes
            .iter()
            .map(|route| self.index.lines.index(tt.routes()[route].line))
            .collect();
        self.write_u32_section(Section::LineForRoute, line_for_route)?;
        let operator_for_line = self
            .index
            .lines
            .iter()
            .map(|line| self.index.operators.index(tt.lines()[line].operator))
            .collect();
        self.write_u32_section(Section::OperatorForLine, operator_for_line)?;
        let mode_for_line = self
            .index
            .lines
            .iter()
            .map(|line| self.index.physical_modes.index(tt.lines()[line].physical_mode))
            .collect();
        self.write_u32_section(Section::PhysicalModeForLine, mode_for_line)
    }

    fn write_ids(&mut self) -> Result<()> {
        let tt = self.index.timetable;
        let ids: Vec<_> = self
            .index
            .stop_points
            .iter()
            .map(|i| tt.stop_points()[i].uri.as_str())
            .collect();
        self.write_string_table_section(Section::StopPointIds, &ids)?;
        let ids: Vec<_> = self
            .index
            .stop_areas
            .iter()
            .map(|i| tt.stop_areas()[i].uri.as_str())
            .collect();
        self.write_string_table_section(Section::StopAreaIds, &ids)?;
        let ids: Vec<_> = self
            .index
            .operators
            .iter()
            .map(|i| tt.operators()[i].uri.as_str())
            .collect();
        self.write_string_table_section(Section::OperatorIds, &ids)?;
        let ids: Vec<_> = self
            .index
            .lines
            .iter()
            .map(|i| tt.lines()[i].uri.as_str())
            .collect();
        self.write_string_table_section(Section::LineIds, &ids)?;
        let ids: Vec<_> = self
            .index
            .routes
            .iter()
            .map(|i| tt.routes()[i].uri.as_str())
            .collect();
        self.write_string_table_section(Section::RouteIds, &ids)?;
        let ids: Vec<_> = self
            .index
            .trips()
            .map(|trip| tt.vehicle_journeys()[trip.vehicle_journey].uri.as_str())
            .collect();
        self.write_string_table_section(Section::VehicleJourneyIds, &ids)?;
        let ids: Vec<_> = self
            .index
            .commercial_modes
            .iter()
            .map(|i| tt.commercial_modes()[i].uri.as_str())
            .collect();
        self.write_string_table_section(Section::CommercialModeIds, &ids)?;
        let ids: Vec<_> = self
            .index
            .physical_modes
            .iter()
            .map(|i| tt.physical_modes()[i].uri.as_str())
            .collect();
        self.write_string_table_section(Section::PhysicalModeIds, &ids)?;

        let platforms: Vec<_> = self
            .index
            .stop_points
            .iter()
            .map(|i| tt.stop_points()[i].attributes.platform_code.as_deref().unwrap_or(""))
            .collect();
        self.write_string_table_section(Section::PlatformCodes, &platforms)?;
        let timezones: Vec<_> = self
            .index
            .stop_areas
            .iter()
            .map(|i| tt.stop_areas()[i].timezone.name())
            .collect();
        self.write_string_table_section(Section::StopAreaTimezones, &timezones)
    }

    fn write_names(&mut self) -> Result<()> {
        let tt = self.index.timetable;
        let text = |value: &'a Option<String>| value.as_deref().unwrap_or("");

        let names = self
            .index
            .stop_points
            .iter()
            .map(|i| text(&tt.stop_points()[i].attributes.name))
            .collect();
        self.write_pooled_section(Section::StopPointNames, names)?;
        let names = self
            .index
            .stop_areas
            .iter()
            .map(|i| text(&tt.stop_areas()[i].attributes.name))
            .collect();
        self.write_pooled_section(Section::StopAreaNames, names)?;
        let names = self
            .index
            .operators
            .iter()
            .map(|i| text(&tt.operators()[i].attributes.name))
            .collect();
        self.write_pooled_section(Section::OperatorNames, names)?;
        let urls = self
            .index
            .operators
            .iter()
            .map(|i| text(&tt.operators()[i].attributes.url))
            .collect();
        self.write_pooled_section(Section::OperatorUrls, urls)?;

        let lines: Vec<_> = self.index.lines.iter().map(|i| &tt.lines()[i].attributes).collect();
        let codes = lines.iter().copied().map(|line| text(&line.code)).collect();
        self.write_pooled_section(Section::LineCodes, codes)?;
        let names = lines.iter().copied().map(|line| text(&line.name)).collect();
        self.write_pooled_section(Section::LineNames, names)?;
        let colors = lines.iter().copied().map(|line| text(&line.color)).collect();
        self.write_pooled_section(Section::LineColors, colors)?;
        let colors = lines.iter().copied().map(|line| text(&line.text_color)).collect();
        self.write_pooled_section(Section::LineColorsText, colors)?;

        let names = self
            .index
            .commercial_modes
            .iter()
            .map(|i| text(&tt.commercial_modes()[i].name))
            .collect();
        self.write_pooled_section(Section::CommercialModeNames, names)?;
        let names = self
            .index
            .physical_modes
            .iter()
            .map(|i| text(&tt.physical_modes()[i].name))
            .collect();
        self.write_pooled_section(Section::PhysicalModeNames, names)
    }

    fn write_string_pool(&mut self) -> Result<()> {
        let pool = std::mem::take(&mut self.pool);
        self.begin(Section::StringPool, pool.len())?;
        self.out.write_all(pool.as_bytes())?;
        Ok(())
    }
}

fn calendar_epoch(timetable: &Timetable) -> u64 {
    let Some(midnight) = timetable.start_date().and_hms_opt(0, 0, 0) else {
        return 0;
    };
    let epoch = match timetable.timezone().from_local_datetime(&midnight).earliest() {
        Some(local) => local.timestamp(),
        None => midnight.and_utc().timestamp(),
    };
    epoch.max(0) as u64
}

/// Writes `timetable` to `out` as a compiled timetable and returns the
/// header that was written.
///
/// The header is reserved first and backpatched once every section has been
/// written, so `out` must be seekable.
pub fn export<W: Write + Seek>(timetable: &Timetable, out: &mut W) -> Result<Header> {
    let index = ExportIndex::build(timetable)?;
    let global_utc_offset = timetable.global_utc_offset().unwrap_or(0);
    log::info!(
        "Exporting {} journey patterns, {} vehicle journeys, {} stop points",
        index.journey_patterns.len(),
        index.n_trips(),
        index.stop_points.len()
    );

    let start = out.stream_position()?;
    out.write_all(&[0u8; Header::SIZE])?;
    let mut emitter = Emitter {
        index,
        out: &mut *out,
        start,
        header: Header::new(calendar_epoch(timetable), global_utc_offset),
        pool: StringPool::new(),
        global_utc_offset,
    };
    emitter.write_stops()?;
    emitter.write_journey_patterns()?;
    emitter.write_vehicle_journeys()?;
    emitter.write_time_demand_groups()?;
    emitter.write_stop_lookups()?;
    emitter.write_relations()?;
    emitter.write_ids()?;
    emitter.write_names()?;
    emitter.write_string_pool()?;
    let header = emitter.header;

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(start))?;
    header.write(out)?;
    out.seek(SeekFrom::Start(end))?;
    out.flush()?;
    Ok(header)
}

/// Exports to `path` through a temporary file that only replaces `path`
/// once the header has been written. Nothing is left behind on failure.
pub fn export_to_path(timetable: &Timetable, path: &Path) -> Result<Header> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let result = (|| -> Result<Header> {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        let header = export(timetable, &mut writer)?;
        writer.into_inner().map_err(|err| err.into_error())?.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(header)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}
