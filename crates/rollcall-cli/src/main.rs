use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use rollcall_store::{AttendanceLedger, StudentDatabase};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod admin;
mod announcer;
mod config;
mod engine;
mod manual;
mod prompt;
mod registration;
mod speaker;

use config::Config;

/// Frames read before live registration gives up.
const LIVE_REGISTRATION_MAX_FRAMES: usize = 3000;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face-recognition classroom attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll students
    Register {
        #[command(subcommand)]
        mode: RegisterMode,
    },
    /// Mark attendance
    Attend {
        #[command(subcommand)]
        mode: AttendMode,
    },
    /// Show database and today's attendance statistics
    Stats,
    /// Show one week's attendance (default: this week)
    Report {
        #[arg(long)]
        week: Option<u32>,
        #[arg(long)]
        year: Option<i32>,
    },
    /// List enrolled students
    List {
        /// Only names containing this text
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Remove an enrolled student
    Remove {
        /// Student ID to remove
        id: String,
        #[arg(short, long)]
        yes: bool,
    },
    /// Export students to CSV
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Import students from a CSV with "Student ID" and "Name" columns
    Import { path: PathBuf },
    /// Delete today's rows from this week's attendance file
    ClearToday {
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete this week's attendance file
    ResetWeek {
        #[arg(short, long)]
        yes: bool,
    },
    /// Remove students not recognized for a number of days
    Cleanup {
        #[arg(long, default_value_t = 365)]
        days: i64,
    },
    /// Copy the student database
    Backup {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Run system health checks
    Doctor,
}

#[derive(Subcommand)]
enum RegisterMode {
    /// Register from registration_images/<STUDENT_ID>/ folders
    Batch {
        /// Only this student's folder
        #[arg(long)]
        id: Option<String>,
    },
    /// Register from the camera with guided poses
    Live {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AttendMode {
    /// Live camera recognition (Ctrl+C to stop)
    Camera {
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
    },
    /// Type student IDs one at a time
    Manual,
    /// Mark a comma-separated list of IDs
    Batch { ids: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

    let now = || Local::now().naive_local();
    let open_db = || StudentDatabase::open(&config.db_path, now());
    let ledger = AttendanceLedger::new(&config.attendance_dir);

    match cli.command {
        Commands::Register { mode } => match mode {
            RegisterMode::Batch { id } => {
                let config = config.clone();
                tokio::task::spawn_blocking(move || registration::run_batch_registration(&config, id.as_deref()))
                    .await??;
            }
            RegisterMode::Live { id, name, yes } => {
                let config = config.clone();
                tokio::task::spawn_blocking(move || {
                    registration::run_live_registration(&config, &id, &name, yes, LIVE_REGISTRATION_MAX_FRAMES)
                })
                .await??;
            }
        },
        Commands::Attend { mode } => match mode {
            AttendMode::Camera { max_frames } => {
                let stop = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&stop);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupt received; stopping camera session");
                        flag.store(true, Ordering::SeqCst);
                    }
                });
                let config = config.clone();
                tokio::task::spawn_blocking(move || engine::run_camera_attendance(&config, stop, max_frames))
                    .await??;
            }
            AttendMode::Manual => {
                let db = open_db()?;
                let speaker = speaker::speaker_from_config(&config);
                manual::run_manual_loop(&db, &ledger, speaker.as_ref(), now)?;
            }
            AttendMode::Batch { ids } => {
                let db = open_db()?;
                let speaker = speaker::speaker_from_config(&config);
                manual::mark_batch(&db, &ledger, speaker.as_ref(), &ids, now)?;
            }
        },
        Commands::Stats => admin::stats(&open_db()?, &ledger, now().date())?,
        Commands::Report { week, year } => admin::week_report(&ledger, week, year, now().date())?,
        Commands::List { search } => admin::list(&open_db()?, search.as_deref())?,
        Commands::Remove { id, yes } => {
            admin::remove(&open_db()?, &id, yes, now())?;
        }
        Commands::Export { out } => {
            admin::export(&open_db()?, out)?;
        }
        Commands::Import { path } => {
            admin::import(&open_db()?, &path, now())?;
        }
        Commands::ClearToday { yes } => admin::clear_today(&ledger, now().date(), yes)?,
        Commands::ResetWeek { yes } => admin::reset_week(&ledger, now().date(), yes)?,
        Commands::Cleanup { days } => {
            admin::cleanup(&open_db()?, days, now())?;
        }
        Commands::Backup { out } => {
            admin::backup(&open_db()?, out.as_deref(), now())?;
        }
        Commands::Doctor => admin::doctor(&config, now()),
    }

    Ok(())
}
