use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;

use trip_atlas_timetable::{
    export::{self, Section},
    gtfs_convert, gtfs_db,
    memory_mapped_timetable::load_memory_mapped_timetable,
    service_summary,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log every new journey pattern and section offset
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Load a GTFS feed into a SQLite database
    Load {
        gtfs: PathBuf,
        /// Defaults to <GTFS>.gtfsdb
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// Compile a GTFS feed into a timetable file
    Compile {
        gtfs: PathBuf,
        #[arg(long)]
        database: Option<PathBuf>,
        /// First day of the timetable (YYYY-MM-DD). Defaults to the start of
        /// the busiest 32 day window.
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(short, long, default_value = "timetable4.dat")]
        output: PathBuf,
    },
    /// Print the header of a compiled timetable
    Inspect { file: PathBuf },
    /// Write the number of active services per day as JSON
    ServiceSummary {
        gtfs: PathBuf,
        #[arg(long)]
        database: Option<PathBuf>,
        #[arg(short, long, default_value = "service_summary.json")]
        output: PathBuf,
    },
}

fn database_path(gtfs: &Path, database: Option<PathBuf>) -> PathBuf {
    database.unwrap_or_else(|| gtfs_db::default_database_path(gtfs))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .with_module_level("sqlx", log::LevelFilter::Warn)
        .init()?;

    match args.cmd {
        Command::Load { gtfs, database } => {
            let database = database_path(&gtfs, database);
            let db = gtfs_db::GtfsDatabase::create(&database).await?;
            db.load_gtfs(&gtfs).await?;
            log::info!("Wrote {:?}", database);
        }
        Command::Compile {
            gtfs,
            database,
            start_date,
            output,
        } => {
            let database = database_path(&gtfs, database);
            let db = gtfs_db::ensure_gtfs_database(&gtfs, &database).await?;
            let timetable = gtfs_convert::convert(&db, start_date).await?;
            log::info!("Writing timetable to {:?}", output);
            let header = export::export_to_path(&timetable, &output)
                .with_context(|| format!("Failed to export timetable to {:?}", output))?;
            log::info!(
                "Exported {} journey patterns and {} vehicle journeys",
                header.count(Section::JourneyPatterns),
                header.count(Section::VehicleJourneys)
            );
        }
        Command::Inspect { file } => {
            // Safety: the file is not modified while it is inspected.
            let timetable = unsafe { load_memory_mapped_timetable(&file)? };
            let header = timetable.header();
            println!("calendar epoch: {}", header.calendar_epoch);
            println!("utc offset:     {}", header.utc_offset);
            println!("days:           {}", header.n_days);
            for section in Section::ALL {
                println!(
                    "{:<32} {:>10} @ {}",
                    format!("{:?}", section),
                    header.count(section),
                    header.location(section)
                );
            }
        }
        Command::ServiceSummary {
            gtfs,
            database,
            output,
        } => {
            let database = database_path(&gtfs, database);
            let db = gtfs_db::ensure_gtfs_database(&gtfs, &database).await?;
            service_summary::export_service_summary(&db, &output).await?;
        }
    }
    Ok(())
}
