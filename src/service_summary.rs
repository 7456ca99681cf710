use std::{io::Write, path::Path};

use anyhow::Result;

use crate::calendar::ServiceCalendar;
use crate::gtfs_db::GtfsDatabase;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceSummary {
    pub days: Vec<DayInfo>,
    /// Start of the busiest window, used when no start date is given.
    pub max_service_start: Option<chrono::NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DayInfo {
    pub date: chrono::NaiveDate,
    pub services: usize,
}

pub fn summarize_service(calendar: &ServiceCalendar) -> ServiceSummary {
    let counts = calendar.daily_service_counts();
    ServiceSummary {
        max_service_start: calendar.find_max_service(),
        days: counts
            .into_iter()
            .map(|(date, services)| DayInfo { date, services })
            .collect(),
    }
}

pub async fn export_service_summary(db: &GtfsDatabase, output_path: &Path) -> Result<()> {
    let summary = summarize_service(&db.service_calendar().await?);
    log::info!(
        "Writing {} days of service to {:?}",
        summary.days.len(),
        output_path
    );
    let mut file = std::fs::File::create(output_path)?;
    file.write_all(serde_json::to_string_pretty(&summary)?.as_bytes())?;
    Ok(())
}
