//! Opens the SQLite databases under the data directory.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use crate::config::Config;
use crate::dataset::{JobsDb, UsageDb};

/// Open (or create) the usage database of one project year.
pub fn usage(config: &Config, project: &str, year: i32) -> Result<UsageDb> {
    usage_at(&config.usage_db_path(project, year))
}

pub fn usage_at(path: &Path) -> Result<UsageDb> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(UsageDb::new(conn)?)
}

/// Open the usage database of one project year for reporting. Unlike
/// ingest this refuses to create an empty database.
pub fn existing_usage(config: &Config, project: &str, year: i32) -> Result<UsageDb> {
    let path = config.usage_db_path(project, year);
    if !path.exists() {
        bail!(
            "no usage database for project {project} in {year}: {} does not exist",
            path.display()
        );
    }
    usage_at(&path)
}

/// Open (or create) the jobs database.
pub fn jobs(config: &Config) -> Result<JobsDb> {
    jobs_at(&config.jobs_db_path())
}

pub fn jobs_at(path: &Path) -> Result<JobsDb> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(JobsDb::new(conn)?)
}

pub fn existing_jobs(config: &Config) -> Result<JobsDb> {
    let path = config.jobs_db_path();
    if !path.exists() {
        bail!("jobs database {} does not exist", path.display());
    }
    jobs_at(&path)
}
