use std::collections::{BTreeSet, HashMap};

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate};
use futures::TryStreamExt;

use crate::calendar::ValidityPattern;
use crate::gtfs_db::{FrequencyRow, GtfsDatabase, StopTimeRow};
use crate::transit_model::{
    ConnectionKind, LineAttributes, OperatorAttributes, RouteAttributes, StopAreaAttributes,
    StopPointAttributes, StopPointProperties, Timetable,
};
use crate::vehicle_journey::StopTime;

/// Minimum transfer time between stop points sharing a stop area.
pub const SAME_STOP_AREA_TRANSFER_TIME: u32 = 120;

const SYNTHETIC_STOP_AREA_PREFIX: &str = "StopArea:ZZ:";

fn route_type_name(route_type: i64) -> Option<&'static str> {
    Some(match route_type {
        0 => "Tram",
        1 => "Subway",
        2 => "Rail",
        3 => "Bus",
        4 => "Ferry",
        5 => "Cable tram",
        6 => "Aerial lift",
        7 => "Funicular",
        11 => "Trolleybus",
        12 => "Monorail",
        _ => return None,
    })
}

/// Builds the timetable graph for the window starting at `start_date`, or
/// at the busiest window of the feed if no date is given.
pub async fn convert(db: &GtfsDatabase, start_date: Option<NaiveDate>) -> Result<Timetable> {
    let calendar = db.service_calendar().await?;
    let start_date = match start_date {
        Some(date) => date,
        None => calendar
            .find_max_service()
            .ok_or_else(|| anyhow!("GTFS feed has no service dates"))?,
    };
    log::info!("Timetable valid from {}", start_date);

    let agencies = db.agencies().await?;
    let feed_timezone = agencies
        .first()
        .map(|agency| agency.agency_timezone.clone())
        .ok_or_else(|| anyhow!("GTFS feed has no agency"))?;
    let mut timetable = Timetable::new(start_date, &feed_timezone)?;

    log::info!("Converting stops.");
    for row in db.stop_areas().await? {
        let timezone = row.stop_timezone.as_deref().unwrap_or(&feed_timezone);
        timetable
            .add_stop_area(
                &row.stop_id,
                timezone,
                StopAreaAttributes {
                    name: row.stop_name.clone(),
                    latitude: row.stop_lat,
                    longitude: row.stop_lon,
                },
            )
            .with_context(|| format!("Stop area {}", row.stop_id))?;
    }

    for row in db.stop_points().await? {
        let parent = row
            .parent_station
            .as_deref()
            .filter(|parent| timetable.stop_areas().lookup(parent).is_some());
        let stop_area_uri = match parent {
            Some(parent) => parent.to_string(),
            None => {
                let uri = format!("{}{}", SYNTHETIC_STOP_AREA_PREFIX, row.stop_id);
                if timetable.stop_areas().lookup(&uri).is_none() {
                    let timezone = row.stop_timezone.as_deref().unwrap_or(&feed_timezone);
                    timetable.add_stop_area(
                        &uri,
                        timezone,
                        StopAreaAttributes {
                            name: row.stop_name.clone(),
                            latitude: row.stop_lat,
                            longitude: row.stop_lon,
                        },
                    )?;
                }
                uri
            }
        };
        let wheelchair_boarding = match row.wheelchair_boarding {
            1 => Some(true),
            2 => Some(false),
            _ => None,
        };
        timetable
            .add_stop_point(
                &row.stop_id,
                &stop_area_uri,
                StopPointAttributes {
                    name: row.stop_name,
                    latitude: row.stop_lat,
                    longitude: row.stop_lon,
                    platform_code: row.platform_code,
                    properties: StopPointProperties { wheelchair_boarding },
                },
            )
            .with_context(|| format!("Stop point {}", row.stop_id))?;
    }

    log::info!("Converting transfers.");
    for row in db.transfers().await? {
        if row.from_stop_id == row.to_stop_id {
            continue;
        }
        let min_transfer_time = row
            .min_transfer_time
            .map_or(0, |seconds| seconds.clamp(0, u32::MAX as i64) as u32);
        add_connection_pair(
            &mut timetable,
            &row.from_stop_id,
            &row.to_stop_id,
            min_transfer_time,
            ConnectionKind::Transfer,
        )?;
    }
    for row in db.transfers_within_stop_area().await? {
        add_connection_pair(
            &mut timetable,
            &row.from_stop_id,
            &row.to_stop_id,
            SAME_STOP_AREA_TRANSFER_TIME,
            ConnectionKind::SameStopArea,
        )?;
    }

    log::info!("Converting agencies, lines and routes.");
    for row in agencies {
        timetable
            .add_operator(
                &row.agency_id,
                &row.agency_timezone,
                OperatorAttributes {
                    name: Some(row.agency_name),
                    url: row.agency_url,
                },
            )
            .with_context(|| format!("Agency {}", row.agency_id))?;
    }

    let lines = db.lines().await?;
    let route_types: BTreeSet<i64> = lines.iter().map(|line| line.route_type).collect();
    for route_type in route_types {
        let uri = route_type.to_string();
        timetable.add_physical_mode(&uri, route_type_name(route_type))?;
        timetable.add_commercial_mode(&uri, route_type_name(route_type))?;
    }

    let single_operator = match timetable.operators().len() {
        1 => timetable.operators().iter().next().map(|(_, op)| op.uri.to_string()),
        _ => None,
    };
    for row in lines {
        let operator_uri = row
            .agency_id
            .clone()
            .or_else(|| single_operator.clone())
            .ok_or_else(|| anyhow!("Route {} has no agency and the feed has several", row.line_id))?;
        timetable
            .add_line(
                &row.line_id,
                &operator_uri,
                &row.route_type.to_string(),
                LineAttributes {
                    name: row.line_name,
                    code: row.line_code,
                    color: row.route_color,
                    text_color: row.route_text_color,
                },
            )
            .with_context(|| format!("Line {}", row.line_id))?;
    }

    for row in db.routes().await? {
        timetable
            .add_route(
                &row.route_id,
                &row.line_id,
                RouteAttributes {
                    route_type: u16::try_from(row.route_type).unwrap_or(u16::MAX),
                    direction: u8::try_from(row.direction_id).ok(),
                },
            )
            .with_context(|| format!("Route {}", row.route_id))?;
    }

    let validity = calendar.validity_patterns(start_date);
    let mut frequencies: HashMap<String, Vec<FrequencyRow>> = HashMap::new();
    for row in db.frequencies().await? {
        frequencies.entry(row.trip_id.clone()).or_default().push(row);
    }

    let style = indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
    )?;
    let progress = indicatif::ProgressBar::new(db.trip_count().await?)
        .with_style(style)
        .with_message("Converting trips.")
        .with_finish(indicatif::ProgressFinish::AndLeave);

    let mut trip_rows: Vec<StopTimeRow> = vec![];
    let mut stop_times = db.stop_times();
    while let Some(row) = stop_times.try_next().await? {
        if trip_rows.first().is_some_and(|first| first.trip_id != row.trip_id) {
            add_trip(&mut timetable, &validity, &frequencies, &trip_rows)?;
            trip_rows.clear();
            progress.inc(1);
        }
        trip_rows.push(row);
    }
    if !trip_rows.is_empty() {
        add_trip(&mut timetable, &validity, &frequencies, &trip_rows)?;
        progress.inc(1);
    }
    progress.finish_using_style();

    log::info!(
        "Converted {} vehicle journeys into {} journey patterns and {} time demand groups",
        timetable.vehicle_journeys().len(),
        timetable.journey_patterns().len(),
        timetable.time_demand_groups().len()
    );
    Ok(timetable)
}

/// Adds the connection in both directions. Pairs that already exist and
/// pairs with unknown stops are skipped.
fn add_connection_pair(
    timetable: &mut Timetable,
    a: &str,
    b: &str,
    min_transfer_time: u32,
    kind: ConnectionKind,
) -> Result<()> {
    let (Some(a_idx), Some(b_idx)) = (
        timetable.stop_points().lookup(a),
        timetable.stop_points().lookup(b),
    ) else {
        log::warn!("Skipping transfer {} -> {} between unknown stops", a, b);
        return Ok(());
    };
    for (from, to, from_idx, to_idx) in [(a, b, a_idx, b_idx), (b, a, b_idx, a_idx)] {
        if !timetable.has_connection(from_idx, to_idx) {
            timetable.add_connection(from, to, min_transfer_time, kind)?;
        }
    }
    Ok(())
}

/// Converts the stop visits of one GTFS trip, expanding it per frequency
/// period. Returns the number of vehicle journeys created.
fn add_trip(
    timetable: &mut Timetable,
    validity: &HashMap<String, ValidityPattern>,
    frequencies: &HashMap<String, Vec<FrequencyRow>>,
    rows: &[StopTimeRow],
) -> Result<usize> {
    let Some(first) = rows.first() else {
        return Ok(0);
    };
    let Some(pattern) = validity.get(&first.service_id) else {
        log::debug!("Trip {} does not run in the window", first.trip_id);
        return Ok(0);
    };

    let mut times = Vec::with_capacity(rows.len());
    for row in rows {
        let (arrival, departure) = match (row.arrival_time, row.departure_time) {
            (Some(arrival), Some(departure)) => (arrival, departure),
            (Some(time), None) | (None, Some(time)) => (time, time),
            (None, None) => {
                log::warn!(
                    "Skipping trip {} without times at stop {}",
                    row.trip_id,
                    row.stop_id
                );
                return Ok(0);
            }
        };
        times.push((
            i32::try_from(arrival).context("Arrival time out of range")?,
            i32::try_from(departure).context("Departure time out of range")?,
        ));
    }

    let instances: Vec<(String, i32)> = match frequencies.get(&first.trip_id) {
        None => vec![(first.trip_id.clone(), 0)],
        Some(periods) => {
            let first_departure = times[0].1;
            let mut instances = vec![];
            for period in periods {
                if period.headway_secs <= 0 {
                    log::warn!("Ignoring frequency of {} without headway", first.trip_id);
                    continue;
                }
                let repeat = (period.end_time - period.start_time) / period.headway_secs;
                for r in 0..repeat.max(0) {
                    let offset = period.start_time + r * period.headway_secs;
                    let shift = i32::try_from(offset).context("Frequency offset out of range")?
                        - first_departure;
                    instances.push((format!("{}:{}", first.trip_id, offset), shift));
                }
            }
            instances
        }
    };

    let start_date = timetable.start_date();
    let commercial_mode = first.route_type.to_string();
    for (uri, shift) in &instances {
        let vj = timetable
            .add_vehicle_journey(
                uri,
                &first.route_id,
                &commercial_mode,
                first.trip_headsign.as_deref(),
            )
            .with_context(|| format!("Trip {}", uri))?;
        for day in pattern.days() {
            timetable.set_is_valid_on(vj, start_date + Duration::days(day as i64))?;
        }
        for (row, (arrival, departure)) in rows.iter().zip(&times) {
            timetable
                .add_stop(
                    vj,
                    StopTime {
                        stop_point_uri: &row.stop_id,
                        arrival_time: arrival + shift,
                        departure_time: departure + shift,
                        for_boarding: row.pickup_type != 1,
                        for_alighting: row.drop_off_type != 1,
                        timing_point: row.timepoint == 1,
                        headsign: row.stop_headsign.as_deref(),
                    },
                )
                .with_context(|| format!("Trip {}", uri))?;
        }
        timetable
            .finish(vj)
            .with_context(|| format!("Trip {}", uri))?;
    }
    Ok(instances.len())
}
