pub mod calendar;
pub mod error;
pub mod export;
pub mod gtfs_convert;
pub mod gtfs_db;
pub mod memory_mapped_timetable;
pub mod service_summary;
pub mod string_pool;
pub mod transit_model;
pub mod vehicle_journey;
