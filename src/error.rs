use std::fmt;

use thiserror::Error;

/// The kinds of entity a [`crate::transit_model::Timetable`] owns, used to
/// name the offending table in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    StopArea,
    StopPoint,
    Operator,
    PhysicalMode,
    CommercialMode,
    Line,
    Route,
    Connection,
    VehicleJourney,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::StopArea => "StopArea",
            EntityKind::StopPoint => "StopPoint",
            EntityKind::Operator => "Operator",
            EntityKind::PhysicalMode => "PhysicalMode",
            EntityKind::CommercialMode => "CommercialMode",
            EntityKind::Line => "Line",
            EntityKind::Route => "Route",
            EntityKind::Connection => "Connection",
            EntityKind::VehicleJourney => "VehicleJourney",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TimetableError {
    #[error("Violation of unique {kind} key: {key}")]
    DuplicateKey { kind: EntityKind, key: String },
    #[error("Violation of foreign key, {target} {key} not found (while creating {kind})")]
    DanglingReference {
        kind: EntityKind,
        target: EntityKind,
        key: String,
    },
    #[error("Invalid timezone: {0:?}")]
    InvalidTimezone(String),
    #[error("Negative times at stop {stop_point} of vehicle journey {vehicle_journey}")]
    NegativeTime {
        vehicle_journey: String,
        stop_point: String,
    },
    #[error("Negative dwell time at stop {stop_point} of vehicle journey {vehicle_journey}")]
    NegativeDwellTime {
        vehicle_journey: String,
        stop_point: String,
    },
    #[error("Time travel from latest stop to {stop_point} in vehicle journey {vehicle_journey}")]
    TimeTravel {
        vehicle_journey: String,
        stop_point: String,
    },
    #[error("Vehicle journey {vehicle_journey} has {stops} stops, at least 2 are required")]
    TripTooShort {
        vehicle_journey: String,
        stops: usize,
    },
    #[error("Vehicle journey {vehicle_journey} has {points} pattern points but {timings} timings")]
    PatternLengthMismatch {
        vehicle_journey: String,
        points: usize,
        timings: usize,
    },
    #[error("Vehicle journey {0} was previously completed")]
    AlreadyFinished(String),
    #[error("Vehicle journey {0} is still being assembled")]
    NotFinished(String),
    #[error("No valid journey patterns or vehicle journeys to export")]
    EmptyResult,
    #[error("Malformed timetable file: {0}")]
    MalformedFile(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = TimetableError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_names_the_table_and_key() {
        let err = TimetableError::DuplicateKey {
            kind: EntityKind::StopArea,
            key: "SA1".into(),
        };
        assert_eq!(err.to_string(), "Violation of unique StopArea key: SA1");
    }

    #[test]
    fn dangling_reference_names_the_missing_entity() {
        let err = TimetableError::DanglingReference {
            kind: EntityKind::StopPoint,
            target: EntityKind::StopArea,
            key: "SA2".into(),
        };
        assert_eq!(
            err.to_string(),
            "Violation of foreign key, StopArea SA2 not found (while creating StopPoint)"
        );
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TimetableError = io_err.into();
        assert!(err.to_string().contains("file not found"));
        assert!(matches!(err, TimetableError::Io(_)));
    }
}
