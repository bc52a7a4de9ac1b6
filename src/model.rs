//! Record types shared between the dump parsers and the datasets.

use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;

/// One row of the `System Queue` table of an accounting dump. The figures
/// are cumulative over the quarter so far.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueUsage {
    pub system: String,
    pub queue: String,
    pub charge_weight: f64,
    pub cpu_hours: f64,
    pub walltime_hours: f64,
    pub su: f64,
}

/// One row of the `Batch Queue Usage per User` table of an accounting dump.
#[derive(Debug, Clone, PartialEq)]
pub struct UserUsage {
    pub username: String,
    pub cpu_hours: f64,
    pub walltime_hours: f64,
    pub su: f64,
    pub efficiency: Option<f64>,
}

/// A compute grant awarded to the project by a funding scheme, in SU.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemeGrant {
    pub system: String,
    pub scheme: String,
    pub su: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Capacity,
    Inodes,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Capacity => "capacity",
            StorageKind::Inodes => "inodes",
        }
    }
}

/// A storage grant awarded by a funding scheme for one storage point,
/// in bytes or inodes depending on `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageGrant {
    pub system: String,
    pub point: String,
    pub scheme: String,
    pub kind: StorageKind,
    pub amount: f64,
}

/// The total quota of the project on one storage point.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageQuota {
    pub system: String,
    pub point: String,
    pub size_grant: f64,
    pub inode_grant: f64,
}

/// Space one user occupies under one project folder on a storage point,
/// as measured by a filesystem scan.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageUse {
    pub folder: String,
    pub username: String,
    pub size_bytes: f64,
    pub inodes: f64,
    pub scan_date: NaiveDate,
}

/// A single batch job from a PBS `qstat` dump.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub year: i32,
    pub jobid: String,
    pub project: String,
    pub username: String,
    pub queue: String,
    pub state: String,
    pub jobname: String,
    pub priority: Option<i64>,
    pub executable: Option<String>,
    pub arguments: Option<String>,
    pub ctime: NaiveDateTime,
    pub mtime: Option<NaiveDateTime>,
    pub qtime: NaiveDateTime,
    pub stime: Option<NaiveDateTime>,
    pub max_walltime_secs: Option<i64>,
    pub max_mem_bytes: Option<f64>,
    pub ncpus: Option<i64>,
    pub mem_bytes: Option<f64>,
    pub walltime_secs: Option<i64>,
    pub cputime_secs: Option<i64>,
}

/// What a storage query measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Measure {
    Size,
    Inodes,
}

/// Which per-user compute figure a usage query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UsageField {
    Su,
    Cpu,
    Walltime,
}
