//! Plain-text reports over the accounting databases.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::config::Config;
use crate::dataset::JobRow;
use crate::db;
use crate::model::Measure;
use crate::util::{format_hms, Period};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Quarter summary: grant, per-queue totals and the share of the grant used.
pub fn usage(config: &Config, project: &str, period: Period) -> Result<()> {
    let db = db::existing_usage(config, project, period.year)?;
    let (start, end) = db.quarter_range(period)?;
    let grant = db.grant(period)?;
    let totals = db.queue_totals(period)?;

    println!("Usage for {project} in {period} ({start} to {end})");
    match grant {
        Some(su) => println!("Grant: {:.2} KSU", su / 1000.0),
        None => println!("Grant: not recorded"),
    }
    if totals.is_empty() {
        println!("No queue usage recorded.");
        return Ok(());
    }
    println!();
    for t in &totals {
        let queue = format!("{}/{}", t.system, t.queue);
        println!("  {queue:<20} {:>14.2} SU", t.su);
    }
    let total: f64 = totals.iter().map(|t| t.su).sum();
    match grant {
        Some(su) => println!("  {:<20} {total:>14.2} SU ({} of grant)", "total", percent(total, su)),
        None => println!("  {:<20} {total:>14.2} SU", "total"),
    }
    Ok(())
}

/// The heaviest users of a storage point at the latest scan, one row per
/// user: measure, username, full name.
pub fn top(
    config: &Config,
    project: &str,
    period: Period,
    point: &str,
    measure: Measure,
    count: usize,
    separator: &str,
) -> Result<()> {
    let db = db::existing_usage(config, project, period.year)?;
    let point = config.resolve_point(point);
    for user in db.top_usage(period, &point, measure, count)? {
        match measure {
            Measure::Size => println!(
                "{:7} GiB{separator}{}{separator}{}",
                (user.total / GIB) as i64,
                user.username,
                user.fullname
            ),
            Measure::Inodes => println!(
                "{:.2e}{separator}{}{separator}{}",
                user.total, user.username, user.fullname
            ),
        }
    }
    Ok(())
}

/// Quota against use on every storage point with a quota this quarter.
pub fn storage(config: &Config, project: &str, period: Period) -> Result<()> {
    let db = db::existing_usage(config, project, period.year)?;
    let quotas = db.storage_quotas(period)?;

    println!("Project: {project}");
    if quotas.is_empty() {
        println!("No storage quotas recorded for {period}.");
        return Ok(());
    }
    for q in quotas {
        match db.point_usage(&q.point, period)? {
            Some((scanned, bytes, inodes)) => println!(
                "{}/{}: {:7.0} GiB/{:7.0} GiB, {}; {:.2e}/{:.2e} inodes, {} (scanned {scanned})",
                q.system,
                q.point,
                bytes / GIB,
                q.size_grant / GIB,
                percent(bytes, q.size_grant),
                inodes,
                q.inode_grant,
                percent(inodes, q.inode_grant),
            ),
            None => println!(
                "{}/{}: no scans recorded, grant {:.0} GiB and {:.2e} inodes",
                q.system,
                q.point,
                q.size_grant / GIB,
                q.inode_grant
            ),
        }
    }
    Ok(())
}

/// Per-queue summary of the jobs queued in one year.
pub fn jobs(config: &Config, year: i32, project: Option<&str>, user: Option<&str>) -> Result<()> {
    let db = db::existing_jobs(config)?;
    let mut rows = db.jobs(year)?;
    if let Some(project) = project {
        rows.retain(|r| r.project == project);
    }
    if let Some(user) = user {
        rows.retain(|r| r.username == user);
    }
    if rows.is_empty() {
        println!("No jobs recorded for {year}.");
        return Ok(());
    }

    println!(
        "{:<12} {:>6} {:>11} {:>11} {:>11}",
        "queue", "jobs", "cpu hours", "mean wait", "mean cores"
    );
    for s in summarise(&rows) {
        let wait = s.mean_wait_secs.map_or("-".to_string(), format_hms);
        let cores = s.mean_cores.map_or("-".to_string(), |c| format!("{c:.1}"));
        println!(
            "{:<12} {:>6} {:>11.1} {:>11} {:>11}",
            s.queue, s.jobs, s.cpu_hours, wait, cores
        );
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct QueueSummary {
    queue: String,
    jobs: usize,
    cpu_hours: f64,
    mean_wait_secs: Option<i64>,
    mean_cores: Option<f64>,
}

/// Aggregate jobs per queue: count, CPU hours burned, mean wait between
/// queueing and start (over jobs that started) and mean requested cores.
fn summarise(rows: &[JobRow]) -> Vec<QueueSummary> {
    let mut grouped: BTreeMap<&str, Vec<&JobRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(&row.queue).or_default().push(row);
    }
    grouped
        .into_iter()
        .map(|(queue, rows)| {
            let cpu_secs: i64 = rows.iter().filter_map(|r| r.cputime_secs).sum();
            let waits: Vec<i64> = rows
                .iter()
                .filter_map(|r| r.stime.map(|s| (s - r.qtime).num_seconds()))
                .collect();
            let cores: Vec<i64> = rows.iter().filter_map(|r| r.ncpus).collect();
            QueueSummary {
                queue: queue.to_string(),
                jobs: rows.len(),
                cpu_hours: cpu_secs as f64 / 3600.0,
                mean_wait_secs: (!waits.is_empty())
                    .then(|| waits.iter().sum::<i64>() / waits.len() as i64),
                mean_cores: (!cores.is_empty())
                    .then(|| cores.iter().sum::<i64>() as f64 / cores.len() as f64),
            }
        })
        .collect()
}

fn percent(used: f64, grant: f64) -> String {
    if grant > 0.0 {
        format!("{}%", (used / grant * 100.0).round())
    } else {
        "-".to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;

    fn row(queue: &str, cputime: Option<i64>, wait: Option<i64>, ncpus: Option<i64>) -> JobRow {
        let qtime = NaiveDate::from_ymd_opt(2019, 3, 14)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        JobRow {
            jobid: "3141592".to_string(),
            project: "w35".to_string(),
            username: "aaa777".to_string(),
            queue: queue.to_string(),
            state: "R".to_string(),
            jobname: "run.sh".to_string(),
            ncpus,
            qtime,
            stime: wait.map(|w| qtime + Duration::seconds(w)),
            walltime_secs: None,
            cputime_secs: cputime,
            mem_bytes: None,
        }
    }

    #[test]
    fn queue_summaries() {
        let rows = vec![
            row("normal", Some(7200), Some(600), Some(16)),
            row("normal", None, None, Some(48)),
            row("express", Some(3600), Some(0), None),
        ];
        assert_eq!(
            summarise(&rows),
            vec![
                QueueSummary {
                    queue: "express".to_string(),
                    jobs: 1,
                    cpu_hours: 1.0,
                    mean_wait_secs: Some(0),
                    mean_cores: None,
                },
                QueueSummary {
                    queue: "normal".to_string(),
                    jobs: 2,
                    cpu_hours: 2.0,
                    mean_wait_secs: Some(600),
                    mean_cores: Some(32.0),
                },
            ]
        );
        assert!(summarise(&[]).is_empty());
    }

    #[test]
    fn percentages_guard_zero_grants() {
        assert_eq!(percent(300.0, 1200.0), "25%");
        assert_eq!(percent(0.0, 1200.0), "0%");
        assert_eq!(percent(1.0, 0.0), "-");
    }
}
