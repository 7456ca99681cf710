use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::BoxStream;
use indicatif::ProgressIterator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::calendar::{ExceptionType, ServiceCalendar, WeeklyService};

const DATABASE_EXTENSION: &str = "gtfsdb";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stops (
    stop_id TEXT PRIMARY KEY,
    stop_name TEXT,
    stop_lat REAL,
    stop_lon REAL,
    location_type INTEGER,
    parent_station TEXT,
    stop_timezone TEXT,
    platform_code TEXT,
    wheelchair_boarding INTEGER
);
CREATE TABLE IF NOT EXISTS agency (
    agency_id TEXT,
    agency_name TEXT NOT NULL,
    agency_url TEXT,
    agency_timezone TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS routes (
    route_id TEXT PRIMARY KEY,
    agency_id TEXT,
    route_short_name TEXT,
    route_long_name TEXT,
    route_type INTEGER NOT NULL,
    route_color TEXT,
    route_text_color TEXT
);
CREATE TABLE IF NOT EXISTS trips (
    trip_id TEXT PRIMARY KEY,
    route_id TEXT NOT NULL,
    service_id TEXT NOT NULL,
    trip_headsign TEXT,
    direction_id INTEGER
);
CREATE TABLE IF NOT EXISTS stop_times (
    trip_id TEXT NOT NULL,
    stop_sequence INTEGER NOT NULL,
    stop_id TEXT NOT NULL,
    arrival_time INTEGER,
    departure_time INTEGER,
    stop_headsign TEXT,
    pickup_type INTEGER NOT NULL DEFAULT 0,
    drop_off_type INTEGER NOT NULL DEFAULT 0,
    timepoint INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS calendar (
    service_id TEXT NOT NULL,
    monday INTEGER NOT NULL,
    tuesday INTEGER NOT NULL,
    wednesday INTEGER NOT NULL,
    thursday INTEGER NOT NULL,
    friday INTEGER NOT NULL,
    saturday INTEGER NOT NULL,
    sunday INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS calendar_dates (
    service_id TEXT NOT NULL,
    date TEXT NOT NULL,
    exception_type INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS frequencies (
    trip_id TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    headway_secs INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS transfers (
    from_stop_id TEXT NOT NULL,
    to_stop_id TEXT NOT NULL,
    min_transfer_time INTEGER
);
CREATE INDEX IF NOT EXISTS stop_times_trip_id ON stop_times (trip_id);
CREATE INDEX IF NOT EXISTS stop_times_stop_id ON stop_times (stop_id);
CREATE INDEX IF NOT EXISTS trips_route_id ON trips (route_id);
CREATE INDEX IF NOT EXISTS stops_parent_station ON stops (parent_station);
CREATE INDEX IF NOT EXISTS frequencies_trip_id ON frequencies (trip_id);
CREATE INDEX IF NOT EXISTS transfers_from_stop_id ON transfers (from_stop_id);
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StopAreaRow {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub stop_timezone: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StopPointRow {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub stop_timezone: Option<String>,
    pub parent_station: Option<String>,
    pub platform_code: Option<String>,
    /// 0 unknown, 1 accessible, 2 not accessible.
    pub wheelchair_boarding: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransferRow {
    pub from_stop_id: String,
    pub to_stop_id: String,
    pub min_transfer_time: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StopPairRow {
    pub from_stop_id: String,
    pub to_stop_id: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AgencyRow {
    pub agency_id: String,
    pub agency_name: String,
    pub agency_url: Option<String>,
    pub agency_timezone: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LineRow {
    pub line_id: String,
    pub line_name: Option<String>,
    pub line_code: Option<String>,
    pub agency_id: Option<String>,
    pub route_type: i64,
    pub route_color: Option<String>,
    pub route_text_color: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RouteRow {
    pub route_id: String,
    pub line_id: String,
    pub route_type: i64,
    pub direction_id: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FrequencyRow {
    pub trip_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub headway_secs: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StopTimeRow {
    pub trip_id: String,
    pub service_id: String,
    /// `<route_id>:<direction_id>`, matching [`RouteRow::route_id`].
    pub route_id: String,
    pub route_type: i64,
    pub trip_headsign: Option<String>,
    pub stop_sequence: i64,
    pub stop_id: String,
    pub arrival_time: Option<i64>,
    pub departure_time: Option<i64>,
    pub pickup_type: i64,
    pub drop_off_type: i64,
    pub timepoint: i64,
    pub stop_headsign: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct CalendarRow {
    service_id: String,
    monday: bool,
    tuesday: bool,
    wednesday: bool,
    thursday: bool,
    friday: bool,
    saturday: bool,
    sunday: bool,
    start_date: String,
    end_date: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CalendarDateRow {
    service_id: String,
    date: String,
    exception_type: i64,
}

/// A GTFS feed loaded into SQLite, queried in the shapes the converter
/// consumes.
pub struct GtfsDatabase {
    pool: SqlitePool,
}

pub fn default_database_path(gtfs_path: &Path) -> PathBuf {
    let mut name = gtfs_path.as_os_str().to_owned();
    name.push(".");
    name.push(DATABASE_EXTENSION);
    PathBuf::from(name)
}

/// Opens the database at `database_path`, loading `gtfs_path` into it first
/// if it does not exist yet.
pub async fn ensure_gtfs_database(gtfs_path: &Path, database_path: &Path) -> Result<GtfsDatabase> {
    if database_path.exists() {
        log::info!("Reusing GTFS database {:?}", database_path);
        return GtfsDatabase::open(database_path).await;
    }
    let db = GtfsDatabase::create(database_path).await?;
    if let Err(err) = db.load_gtfs(gtfs_path).await {
        db.pool.close().await;
        let _ = std::fs::remove_file(database_path);
        return Err(err);
    }
    Ok(db)
}

/// `RRGGBB`, the form GTFS uses for route colours.
fn hex_color(color: rgb::RGB8) -> String {
    format!("{:02X}{:02X}{:02X}", color.r, color.g, color.b)
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date {:?} in GTFS database", value))
}

impl GtfsDatabase {
    pub async fn open(path: &Path) -> Result<GtfsDatabase> {
        let options = SqliteConnectOptions::new().filename(path);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open GTFS database {:?}", path))?;
        Ok(GtfsDatabase { pool })
    }

    /// Creates an empty database, replacing any file at `path`.
    pub async fn create(path: &Path) -> Result<GtfsDatabase> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove old database {:?}", path))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to create GTFS database {:?}", path))?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(GtfsDatabase { pool })
    }

    /// In-memory database for tests and one-shot conversions.
    pub async fn in_memory() -> Result<GtfsDatabase> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(GtfsDatabase { pool })
    }

    pub async fn load_gtfs(&self, gtfs_path: &Path) -> Result<()> {
        log::info!("Loading original GTFS data from {:?}", gtfs_path);
        let gtfs = gtfs_structures::RawGtfs::from_path(gtfs_path)
            .with_context(|| format!("Failed to read GTFS feed {:?}", gtfs_path))?;
        let style = indicatif::ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
        )?;

        let mut tx = self.pool.begin().await?;

        log::info!("Loading stops.");
        for stop in gtfs.stops? {
            let location_type: i64 = match stop.location_type {
                gtfs_structures::LocationType::StopPoint => 0,
                gtfs_structures::LocationType::StopArea => 1,
                _ => 2,
            };
            let wheelchair_boarding: i64 = match stop.wheelchair_boarding {
                gtfs_structures::Availability::Available => 1,
                gtfs_structures::Availability::NotAvailable => 2,
                _ => 0,
            };
            sqlx::query(
                "INSERT INTO stops (stop_id, stop_name, stop_lat, stop_lon, location_type,
                                    parent_station, stop_timezone, platform_code, wheelchair_boarding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&stop.id)
            .bind(&stop.name)
            .bind(stop.latitude)
            .bind(stop.longitude)
            .bind(location_type)
            .bind(&stop.parent_station)
            .bind(&stop.timezone)
            .bind(&stop.platform_code)
            .bind(wheelchair_boarding)
            .execute(&mut *tx)
            .await?;
        }

        log::info!("Loading agencies.");
        for agency in gtfs.agencies? {
            sqlx::query(
                "INSERT INTO agency (agency_id, agency_name, agency_url, agency_timezone)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&agency.id)
            .bind(&agency.name)
            .bind(&agency.url)
            .bind(&agency.timezone)
            .execute(&mut *tx)
            .await?;
        }

        log::info!("Loading routes.");
        for route in gtfs.routes? {
            let route_type: i64 = match route.route_type {
                gtfs_structures::RouteType::Tramway => 0,
                gtfs_structures::RouteType::Subway => 1,
                gtfs_structures::RouteType::Rail => 2,
                gtfs_structures::RouteType::Bus => 3,
                gtfs_structures::RouteType::Ferry => 4,
                gtfs_structures::RouteType::CableCar => 5,
                gtfs_structures::RouteType::Gondola => 6,
                gtfs_structures::RouteType::Funicular => 7,
                gtfs_structures::RouteType::Coach => 200,
                gtfs_structures::RouteType::Air => 1100,
                gtfs_structures::RouteType::Taxi => 1500,
                gtfs_structures::RouteType::Other(other) => other as i64,
            };
            sqlx::query(
                "INSERT INTO routes (route_id, agency_id, route_short_name, route_long_name, route_type,
                                     route_color, route_text_color)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&route.id)
            .bind(&route.agency_id)
            .bind(&route.short_name)
            .bind(&route.long_name)
            .bind(route_type)
            .bind(hex_color(route.color))
            .bind(hex_color(route.text_color))
            .execute(&mut *tx)
            .await?;
        }

        log::info!("Loading trips.");
        for trip in gtfs.trips? {
            let direction_id: Option<i64> = trip.direction_id.map(|direction| match direction {
                gtfs_structures::DirectionType::Outbound => 0,
                gtfs_structures::DirectionType::Inbound => 1,
            });
            sqlx::query(
                "INSERT INTO trips (trip_id, route_id, service_id, trip_headsign, direction_id)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&trip.id)
            .bind(&trip.route_id)
            .bind(&trip.service_id)
            .bind(&trip.trip_headsign)
            .bind(direction_id)
            .execute(&mut *tx)
            .await?;
        }

        let stop_times = gtfs.stop_times?;
        for stop_time in stop_times
            .iter()
            .progress_with_style(style.clone())
            .with_message("Loading stop times.")
            .with_finish(indicatif::ProgressFinish::AndLeave)
        {
            let pickup_type: i64 = matches!(
                stop_time.pickup_type,
                gtfs_structures::PickupDropOffType::NotAvailable
            )
            .into();
            let drop_off_type: i64 = matches!(
                stop_time.drop_off_type,
                gtfs_structures::PickupDropOffType::NotAvailable
            )
            .into();
            let timepoint: i64 =
                matches!(stop_time.timepoint, gtfs_structures::TimepointType::Exact).into();
            sqlx::query(
                "INSERT INTO stop_times (trip_id, stop_sequence, stop_id, arrival_time, departure_time,
                                         stop_headsign, pickup_type, drop_off_type, timepoint)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&stop_time.trip_id)
            .bind(i64::from(stop_time.stop_sequence))
            .bind(&stop_time.stop_id)
            .bind(stop_time.arrival_time.map(i64::from))
            .bind(stop_time.departure_time.map(i64::from))
            .bind(&stop_time.stop_headsign)
            .bind(pickup_type)
            .bind(drop_off_type)
            .bind(timepoint)
            .execute(&mut *tx)
            .await?;
        }

        log::info!("Loading calendars.");
        if let Some(calendars) = gtfs.calendar {
            for calendar in calendars? {
                sqlx::query(
                    "INSERT INTO calendar (service_id, monday, tuesday, wednesday, thursday,
                                           friday, saturday, sunday, start_date, end_date)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&calendar.id)
                .bind(calendar.monday)
                .bind(calendar.tuesday)
                .bind(calendar.wednesday)
                .bind(calendar.thursday)
                .bind(calendar.friday)
                .bind(calendar.saturday)
                .bind(calendar.sunday)
                .bind(calendar.start_date.to_string())
                .bind(calendar.end_date.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        if let Some(calendar_dates) = gtfs.calendar_dates {
            for calendar_date in calendar_dates? {
                let exception_type: i64 = match calendar_date.exception_type {
                    gtfs_structures::Exception::Added => 1,
                    gtfs_structures::Exception::Deleted => 2,
                };
                sqlx::query(
                    "INSERT INTO calendar_dates (service_id, date, exception_type) VALUES (?, ?, ?)",
                )
                .bind(&calendar_date.service_id)
                .bind(calendar_date.date.to_string())
                .bind(exception_type)
                .execute(&mut *tx)
                .await?;
            }
        }

        if let Some(frequencies) = gtfs.frequencies {
            log::info!("Loading frequencies.");
            for frequency in frequencies? {
                sqlx::query(
                    "INSERT INTO frequencies (trip_id, start_time, end_time, headway_secs)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&frequency.trip_id)
                .bind(i64::from(frequency.start_time))
                .bind(i64::from(frequency.end_time))
                .bind(i64::from(frequency.headway_secs))
                .execute(&mut *tx)
                .await?;
            }
        }

        if let Some(transfers) = gtfs.transfers {
            log::info!("Loading transfers.");
            for transfer in transfers? {
                sqlx::query(
                    "INSERT INTO transfers (from_stop_id, to_stop_id, min_transfer_time)
                     VALUES (?, ?, ?)",
                )
                .bind(&transfer.from_stop_id)
                .bind(&transfer.to_stop_id)
                .bind(transfer.min_transfer_time.map(i64::from))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Runs `statements` against the database. Used to seed fixtures.
    pub async fn execute_script(&self, statements: &str) -> Result<()> {
        sqlx::raw_sql(statements).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn trip_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM trips")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn stop_areas(&self) -> Result<Vec<StopAreaRow>> {
        Ok(sqlx::query_as(
            "SELECT stop_id, stop_name, stop_lat, stop_lon, stop_timezone
             FROM stops WHERE location_type = 1 ORDER BY stop_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn stop_points(&self) -> Result<Vec<StopPointRow>> {
        Ok(sqlx::query_as(
            "SELECT stop_id, stop_name, stop_lat, stop_lon, stop_timezone, parent_station,
                    platform_code, coalesce(wheelchair_boarding, 0) AS wheelchair_boarding
             FROM stops WHERE coalesce(location_type, 0) = 0 ORDER BY stop_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn transfers(&self) -> Result<Vec<TransferRow>> {
        Ok(sqlx::query_as(
            "SELECT from_stop_id, to_stop_id, min_transfer_time FROM transfers
             ORDER BY from_stop_id, to_stop_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Ordered pairs of distinct stop points sharing a parent station.
    pub async fn transfers_within_stop_area(&self) -> Result<Vec<StopPairRow>> {
        Ok(sqlx::query_as(
            "SELECT s1.stop_id AS from_stop_id, s2.stop_id AS to_stop_id
             FROM stops s1 JOIN stops s2 USING (parent_station)
             WHERE s1.parent_station IS NOT NULL AND s1.stop_id != s2.stop_id
               AND coalesce(s1.location_type, 0) = 0 AND coalesce(s2.location_type, 0) = 0
             ORDER BY s1.stop_id, s2.stop_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn agencies(&self) -> Result<Vec<AgencyRow>> {
        Ok(sqlx::query_as(
            "SELECT coalesce(agency_id, agency_name) AS agency_id, agency_name, agency_url,
                    agency_timezone
             FROM agency ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn lines(&self) -> Result<Vec<LineRow>> {
        Ok(sqlx::query_as(
            "SELECT route_id AS line_id, route_long_name AS line_name,
                    coalesce(route_short_name, route_long_name) AS line_code, agency_id, route_type,
                    route_color, route_text_color
             FROM routes ORDER BY route_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// One route per (GTFS route, direction) that has trips.
    pub async fn routes(&self) -> Result<Vec<RouteRow>> {
        Ok(sqlx::query_as(
            "SELECT DISTINCT route_id || ':' || coalesce(direction_id, 0) AS route_id,
                    route_id AS line_id, route_type, coalesce(direction_id, 0) AS direction_id
             FROM trips JOIN routes USING (route_id)
             ORDER BY 1",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn frequencies(&self) -> Result<Vec<FrequencyRow>> {
        Ok(sqlx::query_as(
            "SELECT trip_id, start_time, end_time, headway_secs FROM frequencies
             ORDER BY trip_id, start_time",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Stop visits of every trip, grouped by trip and in stop sequence order.
    pub fn stop_times(&self) -> BoxStream<'_, Result<StopTimeRow, sqlx::Error>> {
        sqlx::query_as::<_, StopTimeRow>(
            "SELECT trip_id, service_id, route_id || ':' || coalesce(direction_id, 0) AS route_id,
                    route_type, trip_headsign, stop_sequence, stop_id, arrival_time,
                    departure_time, pickup_type, drop_off_type, timepoint, stop_headsign
             FROM trips JOIN stop_times USING (trip_id) JOIN routes USING (route_id)
             ORDER BY trip_id, stop_sequence",
        )
        .fetch(&self.pool)
    }

    pub async fn service_calendar(&self) -> Result<ServiceCalendar> {
        let mut calendar = ServiceCalendar::new();

        let rows: Vec<CalendarRow> = sqlx::query_as(
            "SELECT service_id, monday, tuesday, wednesday, thursday, friday, saturday, sunday,
                    start_date, end_date
             FROM calendar ORDER BY service_id",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            calendar.add_weekly(WeeklyService {
                days: [
                    row.monday,
                    row.tuesday,
                    row.wednesday,
                    row.thursday,
                    row.friday,
                    row.saturday,
                    row.sunday,
                ],
                start_date: parse_date(&row.start_date)?,
                end_date: parse_date(&row.end_date)?,
                service_id: row.service_id,
            });
        }

        let rows: Vec<CalendarDateRow> = sqlx::query_as(
            "SELECT service_id, date, exception_type FROM calendar_dates ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            match ExceptionType::from_gtfs(row.exception_type) {
                Some(kind) => calendar.add_exception(&row.service_id, parse_date(&row.date)?, kind),
                None => log::warn!(
                    "Ignoring calendar date of {} with exception type {}",
                    row.service_id,
                    row.exception_type
                ),
            }
        }
        Ok(calendar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
INSERT INTO stops VALUES ('Central', 'Central', 52.37, 4.89, 1, NULL, NULL, NULL, NULL);
INSERT INTO stops VALUES ('Central-1', 'Central 1', 52.37, 4.89, 0, 'Central', NULL, '1', 1);
INSERT INTO stops VALUES ('Central-2', 'Central 2', 52.37, 4.89, NULL, 'Central', NULL, '2', NULL);
INSERT INTO stops VALUES ('Harbour', 'Harbour', 52.38, 4.90, 0, NULL, NULL, NULL, NULL);
INSERT INTO routes VALUES ('R1', NULL, '1', 'Harbour line', 3, '1E90FF', NULL);
INSERT INTO trips VALUES ('T1', 'R1', 'WEEK', NULL, NULL);
INSERT INTO trips VALUES ('T2', 'R1', 'WEEK', 'Central', 1);
INSERT INTO calendar VALUES ('WEEK', 1, 1, 1, 1, 1, 0, 0, '2014-01-06', '2014-01-31');
INSERT INTO calendar_dates VALUES ('WEEK', '2014-02-03', 1);
INSERT INTO calendar_dates VALUES ('WEEK', '2014-01-07', 2);
"#;

    async fn fixture() -> GtfsDatabase {
        let db = GtfsDatabase::in_memory().await.unwrap();
        db.execute_script(FIXTURE).await.unwrap();
        db
    }

    #[test]
    fn database_path_appends_extension() {
        assert_eq!(
            default_database_path(Path::new("/data/feed.zip")),
            PathBuf::from("/data/feed.zip.gtfsdb")
        );
    }

    #[tokio::test]
    async fn stops_split_by_location_type() {
        let db = fixture().await;
        let areas = db.stop_areas().await.unwrap();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].stop_id, "Central");

        let points = db.stop_points().await.unwrap();
        let ids: Vec<_> = points.iter().map(|p| p.stop_id.as_str()).collect();
        assert_eq!(ids, ["Central-1", "Central-2", "Harbour"]);
        assert_eq!(points[0].wheelchair_boarding, 1);
        assert_eq!(points[1].wheelchair_boarding, 0);
    }

    #[tokio::test]
    async fn siblings_are_paired_both_ways() {
        let db = fixture().await;
        let pairs: Vec<_> = db
            .transfers_within_stop_area()
            .await
            .unwrap()
            .into_iter()
            .map(|p| (p.from_stop_id, p.to_stop_id))
            .collect();
        assert_eq!(
            pairs,
            [
                ("Central-1".to_string(), "Central-2".to_string()),
                ("Central-2".to_string(), "Central-1".to_string()),
            ]
        );
    }

    #[test]
    fn colors_are_upper_case_hex() {
        assert_eq!(hex_color(rgb::RGB8::new(0, 166, 81)), "00A651");
    }

    #[tokio::test]
    async fn lines_carry_route_colors() {
        let db = fixture().await;
        let lines = db.lines().await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].route_color.as_deref(), Some("1E90FF"));
        assert_eq!(lines[0].route_text_color, None);
    }

    #[tokio::test]
    async fn routes_are_split_by_direction() {
        let db = fixture().await;
        let routes: Vec<_> = db
            .routes()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.route_id)
            .collect();
        assert_eq!(routes, ["R1:0", "R1:1"]);
    }

    #[tokio::test]
    async fn calendar_applies_exceptions() {
        let db = fixture().await;
        let calendar = db.service_calendar().await.unwrap();
        let date = |d| NaiveDate::from_ymd_opt(2014, 1, d).unwrap();
        assert!(calendar.active_services(date(6)).contains("WEEK"));
        assert!(calendar.active_services(date(7)).is_empty());
        assert!(calendar.active_services(date(11)).is_empty());
        assert_eq!(
            calendar.date_range(),
            Some((date(6), NaiveDate::from_ymd_opt(2014, 2, 3).unwrap()))
        );
    }
}
