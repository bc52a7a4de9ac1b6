use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

mod archive;
mod config;
mod dataset;
mod db;
mod export;
mod ingest;
mod model;
mod plot;
mod report;
mod util;

use model::{Measure, UsageField};
use util::Period;

#[derive(Debug, Parser)]
#[command(version, about = "Track HPC allocation usage from scheduler accounting dumps")]
struct Cli {
    /// Config file (default ./hpcacct.toml, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log debug detail
    #[arg(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load accounting dumps into the databases
    #[clap(subcommand)]
    Ingest(IngestCommand),
    /// Print summaries of what is stored
    #[clap(subcommand)]
    Report(ReportCommand),
    /// Write per-user tables as CSV on stdout
    #[clap(subcommand)]
    Export(ExportCommand),
    /// Draw time-series figures
    #[clap(subcommand)]
    Plot(PlotCommand),
}

#[derive(Debug, Subcommand)]
enum IngestCommand {
    /// Quarterly account usage dumps
    Account {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Store everything in this database instead of one per project year
        #[arg(long)]
        database: Option<PathBuf>,
        /// Leave the dumps in place after ingesting
        #[arg(long)]
        no_archive: bool,
    },
    /// Filesystem scan dumps, one storage point per file
    Storage {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        database: Option<PathBuf>,
        #[arg(long)]
        no_archive: bool,
    },
    /// qstat dumps of the batch queues, in JSON
    Jobs {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    /// Grant and per-queue usage for a quarter
    Usage {
        #[arg(short = 'P', long)]
        project: Option<String>,
        #[arg(short, long)]
        period: Option<Period>,
    },
    /// Heaviest users of a storage point at the latest scan
    Top {
        #[arg(short = 'P', long)]
        project: Option<String>,
        #[arg(short, long)]
        period: Option<Period>,
        /// Storage point, e.g. short or gdata1a
        #[arg(long)]
        point: String,
        #[arg(long, value_enum, default_value = "size")]
        measure: Measure,
        /// How many users to list
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        /// Column separator
        #[arg(long, default_value = "\t")]
        separator: String,
    },
    /// Quota against use on every storage point
    Storage {
        #[arg(short = 'P', long)]
        project: Option<String>,
        #[arg(short, long)]
        period: Option<Period>,
    },
    /// Per-queue job statistics for a year
    Jobs {
        #[arg(short, long)]
        year: i32,
        #[arg(short = 'P', long)]
        project: Option<String>,
        #[arg(short, long)]
        user: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ExportCommand {
    /// Per-user compute usage
    Usage {
        #[arg(short = 'P', long)]
        project: Option<String>,
        #[arg(short, long)]
        period: Option<Period>,
        /// Which figure to export
        #[arg(long, value_enum, default_value = "su")]
        field: UsageField,
    },
    /// Per-user storage figures
    Storage {
        #[arg(short = 'P', long)]
        project: Option<String>,
        #[arg(short, long)]
        period: Option<Period>,
        #[arg(long)]
        point: String,
        #[arg(long, value_enum, default_value = "size")]
        measure: Measure,
    },
}

#[derive(Debug, Subcommand)]
enum PlotCommand {
    /// Cumulative compute usage over a quarter
    Usage {
        #[arg(short = 'P', long)]
        project: Option<String>,
        #[arg(short, long)]
        period: Option<Period>,
        /// One line per user instead of the project total
        #[arg(long)]
        by_user: bool,
        /// Only plot these users
        #[arg(short, long, value_delimiter = ',')]
        users: Vec<String>,
        /// Ceiling for the quota line in KSU, replacing the recorded grant
        #[arg(long)]
        max_usage: Option<f64>,
        /// Output file; the extension picks the format (.png or .svg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Per-user storage on one point, stacked areas or deltas
    Storage {
        #[arg(short = 'P', long)]
        project: Option<String>,
        #[arg(short, long)]
        period: Option<Period>,
        #[arg(long)]
        point: String,
        #[arg(long, value_enum, default_value = "size")]
        measure: Measure,
        #[arg(short, long, value_delimiter = ',')]
        users: Vec<String>,
        /// Fold users whose peak stays under this many TiB or inodes
        #[arg(short, long, default_value_t = 0.0)]
        cutoff: f64,
        /// Plot change since the first scan instead of totals
        #[arg(short, long)]
        delta: bool,
        /// Draw the storage quota as a line
        #[arg(long, conflicts_with = "delta")]
        show_total: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::builder()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    let config = config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Ingest(command) => match command {
            IngestCommand::Account {
                files,
                database,
                no_archive,
            } => ingest::account::run(&config, &files, database, no_archive),
            IngestCommand::Storage {
                files,
                database,
                no_archive,
            } => ingest::storage::run(&config, &files, database, no_archive),
            IngestCommand::Jobs { files, database } => ingest::jobs::run(&config, &files, database),
        },

        Command::Report(command) => match command {
            ReportCommand::Usage { project, period } => {
                report::usage(&config, &project_or_env(project)?, period_or_now(period))
            }
            ReportCommand::Top {
                project,
                period,
                point,
                measure,
                count,
                separator,
            } => report::top(
                &config,
                &project_or_env(project)?,
                period_or_now(period),
                &point,
                measure,
                count,
                &separator,
            ),
            ReportCommand::Storage { project, period } => {
                report::storage(&config, &project_or_env(project)?, period_or_now(period))
            }
            ReportCommand::Jobs {
                year,
                project,
                user,
            } => report::jobs(&config, year, project.as_deref(), user.as_deref()),
        },

        Command::Export(command) => match command {
            ExportCommand::Usage {
                project,
                period,
                field,
            } => export::usage(&config, &project_or_env(project)?, period_or_now(period), field),
            ExportCommand::Storage {
                project,
                period,
                point,
                measure,
            } => export::storage(
                &config,
                &project_or_env(project)?,
                period_or_now(period),
                &point,
                measure,
            ),
        },

        Command::Plot(command) => match command {
            PlotCommand::Usage {
                project,
                period,
                by_user,
                users,
                max_usage,
                output,
            } => plot::usage(
                &config,
                &project_or_env(project)?,
                period_or_now(period),
                by_user,
                &users,
                max_usage,
                output,
            ),
            PlotCommand::Storage {
                project,
                period,
                point,
                measure,
                users,
                cutoff,
                delta,
                show_total,
                output,
            } => plot::storage(
                &config,
                &project_or_env(project)?,
                period_or_now(period),
                &point,
                measure,
                &users,
                cutoff,
                delta,
                show_total,
                output,
            ),
        },
    }
}

/// Fall back to the PROJECT environment variable, the convention on the
/// clusters these dumps come from.
fn project_or_env(project: Option<String>) -> Result<String> {
    match project {
        Some(project) => Ok(project),
        None => std::env::var("PROJECT")
            .context("no --project given and PROJECT is not set in the environment"),
    }
}

fn period_or_now(period: Option<Period>) -> Period {
    period.unwrap_or_else(Period::current)
}
