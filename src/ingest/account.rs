//! Parser for `nci_account` compute accounting dumps.
//!
//! A dump is a stack of loosely formatted report tables. The parser walks
//! it line by line: headers switch the state, rows are matched against the
//! open section, and the first line that fits neither closes the section
//! and is re-examined as a header.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, error, info};

use super::DbCache;
use crate::archive;
use crate::config::Config;
use crate::model::{QueueUsage, SchemeGrant, StorageGrant, StorageKind, StorageQuota, UserUsage};
use crate::util::{parse_inodes, parse_report_timestamp, parse_size, parse_su, Period};

/// Everything read out of one accounting dump file.
#[derive(Debug, Default)]
pub struct AccountDump {
    /// Timestamp of the banner at the top of the dump.
    pub date: Option<NaiveDateTime>,
    pub reports: Vec<ProjectReport>,
}

/// The tables belonging to one `Usage Report:` block.
#[derive(Debug)]
pub struct ProjectReport {
    pub project: String,
    pub period: Period,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub grant_su: Option<f64>,
    pub queue_usage: Vec<QueueUsage>,
    pub user_usage: Vec<UserUsage>,
    pub scheme_grants: Vec<SchemeGrant>,
    pub storage_grants: Vec<StorageGrant>,
    pub storage_quotas: Vec<StorageQuota>,
}

enum Section {
    None,
    Queues,
    Users,
    SchemeGrants {
        system: String,
    },
    /// `Storage resource:` sections hold several `Resource=` blocks with
    /// separators and totals between them, so stray lines do not close
    /// the section; only another header does.
    StorageGrants {
        system: String,
        block: Option<ResourceBlock>,
    },
    Quotas,
}

/// The `Resource=<point>-<kind>,` block currently open inside a
/// `Storage resource:` section.
struct ResourceBlock {
    point: String,
    kind: StorageKind,
    units: String,
}

/// Ingest `nci_account` dump files. Each report lands in the database of
/// its project and year unless `database` pins a single file. Ingested
/// files are compressed into an `archive/` directory unless `no_archive`.
pub fn run(
    config: &Config,
    inputs: &[PathBuf],
    database: Option<PathBuf>,
    no_archive: bool,
) -> Result<()> {
    let mut cache = DbCache::new(config, database);
    for path in inputs {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let dump = parse(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        store(&mut cache, &dump, path)?;
        if !no_archive {
            match archive::archive_file(path) {
                Ok(target) => debug!("archived {}", target.display()),
                Err(e) => error!("could not archive {}: {e:#}", path.display()),
            }
        }
    }
    Ok(())
}

pub fn parse(text: &str) -> Result<AccountDump> {
    let mut dump = AccountDump::default();
    let mut section = Section::None;
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let mut matched = false;
        section = match section {
            Section::None => Section::None,
            Section::Queues => match queue_row(line) {
                Some(row) => {
                    report_mut(&mut dump)?.queue_usage.push(row);
                    matched = true;
                    Section::Queues
                }
                None => Section::None,
            },
            Section::Users => match user_row(line) {
                Some(row) => {
                    report_mut(&mut dump)?.user_usage.push(row);
                    matched = true;
                    Section::Users
                }
                None => Section::None,
            },
            Section::SchemeGrants { system } => {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let scheme = (fields.len() == 8)
                    .then(|| fields[0].rsplit_once('-'))
                    .flatten();
                match scheme {
                    Some((scheme, granttype)) => {
                        // bonus allocations are not tracked
                        if granttype == "grant" {
                            let ksu: f64 = fields[1].parse().with_context(|| {
                                format!("bad figure in scheme grant row {line:?}")
                            })?;
                            report_mut(&mut dump)?.scheme_grants.push(SchemeGrant {
                                system: system.clone(),
                                scheme: scheme.to_string(),
                                su: ksu * 1000.0,
                            });
                        }
                        matched = true;
                        Section::SchemeGrants { system }
                    }
                    None => Section::None,
                }
            }
            Section::StorageGrants { system, block } => {
                if let Some(rest) = line.trim_start().strip_prefix("Resource=") {
                    let context = || format!("malformed storage resource line {line:?}");
                    let token = rest.split_whitespace().next().with_context(context)?;
                    let (point, kind) = token.rsplit_once('-').with_context(context)?;
                    let kind = match kind.trim_end_matches(',') {
                        "capacity" => StorageKind::Capacity,
                        "inodes" => StorageKind::Inodes,
                        other => bail!("unknown storage resource kind {other:?} in {line:?}"),
                    };
                    // two header lines, then a units line like `(TB) (TB) ...`
                    let context = || format!("truncated storage resource block {token:?}");
                    lines.next().with_context(context)?;
                    lines.next().with_context(context)?;
                    let units = lines
                        .next()
                        .with_context(context)?
                        .split_whitespace()
                        .nth(1)
                        .with_context(context)?
                        .trim_matches(|c| c == '(' || c == ')')
                        .to_string();
                    matched = true;
                    Section::StorageGrants {
                        system,
                        block: Some(ResourceBlock {
                            point: point.to_string(),
                            kind,
                            units,
                        }),
                    }
                } else if let (Some(b), Some((scheme, figure))) =
                    (&block, storage_grant_row(line))
                {
                    let quantity = format!("{figure}{}", b.units);
                    let amount = match b.kind {
                        StorageKind::Capacity => parse_size(&quantity)
                            .with_context(|| format!("bad storage grant row {line:?}"))?
                            .round(),
                        StorageKind::Inodes => parse_inodes(&quantity)
                            .with_context(|| format!("bad storage grant row {line:?}"))?,
                    };
                    let grant = StorageGrant {
                        system: system.clone(),
                        point: b.point.clone(),
                        scheme: scheme.to_string(),
                        kind: b.kind,
                        amount,
                    };
                    report_mut(&mut dump)?.storage_grants.push(grant);
                    matched = true;
                    Section::StorageGrants { system, block }
                } else if is_section_header(line) {
                    Section::None
                } else {
                    matched = true;
                    Section::StorageGrants { system, block }
                }
            }
            Section::Quotas => match quota_row(line)? {
                Some(quota) => {
                    report_mut(&mut dump)?.storage_quotas.push(quota);
                    matched = true;
                    Section::Quotas
                }
                None => Section::None,
            },
        };
        if matched {
            continue;
        }

        if line.starts_with("%%%%%%%%%%%%%%%%%") {
            let stamp = lines
                .next()
                .context("dump ends right after its banner line")?;
            dump.date = Some(parse_report_timestamp(stamp)?);
        } else if line.starts_with("Usage Report:") && line.contains("Compute") {
            dump.reports.push(report_header(line)?);
        } else if let Some(total) = line.strip_prefix("Total Grant:") {
            let su = parse_su(total).with_context(|| format!("bad total grant line {line:?}"))?;
            report_mut(&mut dump)?.grant_su = Some(su);
        } else {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let pair = (tokens.first().copied(), tokens.get(1).copied());
            if pair == (Some("System"), Some("Queue")) {
                lines.next();
                section = Section::Queues;
            } else if line.starts_with("Batch Queue Usage per User") {
                for _ in 0..3 {
                    lines.next();
                }
                section = Section::Users;
            } else if line.starts_with("CPU resource:") {
                let system = resource_system(line)?;
                for _ in 0..4 {
                    lines.next();
                }
                section = Section::SchemeGrants { system };
            } else if line.starts_with("Storage resource:") {
                section = Section::StorageGrants {
                    system: resource_system(line)?,
                    block: None,
                };
            } else if pair == (Some("System"), Some("StoragePt")) {
                lines.next();
                section = Section::Quotas;
            }
        }
    }
    Ok(dump)
}

/// Load one parsed dump into the databases.
fn store(cache: &mut DbCache, dump: &AccountDump, path: &Path) -> Result<()> {
    let date = dump.date.map(|d| d.date());
    for report in &dump.reports {
        let db = cache.get(&report.project, report.period.year)?;
        db.add_quarter(report.period, report.start, report.end)?;
        if let Some(su) = report.grant_su {
            db.add_grant(report.period, su)?;
        }

        let dated = || {
            date.with_context(|| {
                format!("{} has usage tables but no timestamp banner", path.display())
            })
        };
        for row in &report.queue_usage {
            db.add_system_queue(&row.system, &row.queue, row.charge_weight)?;
            db.add_project_usage(
                dated()?,
                &row.system,
                &row.queue,
                row.cpu_hours,
                row.walltime_hours,
                row.su,
            )?;
        }
        for row in &report.user_usage {
            db.add_user(&row.username, None)?;
            db.add_user_usage(
                dated()?,
                &row.username,
                row.cpu_hours,
                row.walltime_hours,
                row.su,
                row.efficiency,
            )?;
        }
        for grant in &report.scheme_grants {
            db.add_usage_grant(&grant.system, &grant.scheme, report.period, dated()?, grant.su)?;
        }
        for grant in &report.storage_grants {
            db.add_storage_grant(
                &grant.system,
                &grant.point,
                &grant.scheme,
                report.period,
                grant.kind,
                grant.amount,
                dated()?,
            )?;
        }
        for quota in &report.storage_quotas {
            db.add_system_storage(
                &quota.system,
                &quota.point,
                report.period,
                quota.size_grant,
                quota.inode_grant,
            )?;
        }
        info!(
            "{} {}: {} queue rows, {} user rows, {} grants, {} quotas",
            report.project,
            report.period,
            report.queue_usage.len(),
            report.user_usage.len(),
            report.scheme_grants.len() + report.storage_grants.len(),
            report.storage_quotas.len(),
        );
    }
    Ok(())
}

fn report_mut(dump: &mut AccountDump) -> Result<&mut ProjectReport> {
    dump.reports
        .last_mut()
        .context("usage tables before any usage report header")
}

/// `Usage Report: Project=<id> Compute Period=<YYYY.qN> (<start-end>)`
fn report_header(line: &str) -> Result<ProjectReport> {
    let context = || format!("malformed usage report header {line:?}");
    let words: Vec<&str> = line.split_whitespace().collect();
    let project = words
        .get(2)
        .and_then(|w| w.split_once('='))
        .with_context(context)?
        .1;
    let period: Period = words
        .get(4)
        .and_then(|w| w.split_once('='))
        .with_context(context)?
        .1
        .parse()?;
    let (start, end) = words
        .get(5)
        .with_context(context)?
        .trim_matches(|c| c == '(' || c == ')')
        .split_once('-')
        .with_context(context)?;
    let start = NaiveDate::parse_from_str(start, "%d/%m/%Y").with_context(context)?;
    let end = NaiveDate::parse_from_str(end, "%d/%m/%Y").with_context(context)?;
    Ok(ProjectReport {
        project: project.to_string(),
        period,
        start,
        end,
        grant_su: None,
        queue_usage: Vec::new(),
        user_usage: Vec::new(),
        scheme_grants: Vec::new(),
        storage_grants: Vec::new(),
        storage_quotas: Vec::new(),
    })
}

fn resource_system(line: &str) -> Result<String> {
    let (_, system) = line
        .split_once('=')
        .with_context(|| format!("missing system name in {line:?}"))?;
    Ok(system.trim().to_string())
}

fn queue_row(line: &str) -> Option<QueueUsage> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 9 {
        return None;
    }
    Some(QueueUsage {
        system: fields[0].to_string(),
        queue: fields[1].to_string(),
        charge_weight: fields[2].parse().ok()?,
        cpu_hours: fields[3].parse().ok()?,
        walltime_hours: fields[4].parse().ok()?,
        su: fields[5].parse().ok()?,
    })
}

fn user_row(line: &str) -> Option<UserUsage> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    Some(UserUsage {
        username: fields[0].to_string(),
        cpu_hours: fields[1].parse().ok()?,
        walltime_hours: fields[2].parse().ok()?,
        su: fields[3].parse().ok()?,
        efficiency: fields[4].trim_end_matches('%').parse().ok(),
    })
}

/// Shape-match one stakeholder row: 10 fields with a `-<granttype>` tail
/// on the first. Returns the scheme and the raw grant figure.
fn storage_grant_row(line: &str) -> Option<(&str, &str)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 10 {
        return None;
    }
    let (scheme, _granttype) = fields[0].rsplit_once('-')?;
    Some((scheme, fields[1]))
}

fn quota_row(line: &str) -> Result<Option<StorageQuota>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 8 {
        return Ok(None);
    }
    let context = || format!("bad storage quota row {line:?}");
    Ok(Some(StorageQuota {
        system: fields[0].to_string(),
        point: fields[1].to_string(),
        size_grant: parse_size(fields[2]).with_context(context)?,
        inode_grant: parse_inodes(fields[5]).with_context(context)?,
    }))
}

/// Lines that open a new part of the dump. Inside a storage section these
/// close it; anything else between resource blocks is skipped.
fn is_section_header(line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let pair = (tokens.first().copied(), tokens.get(1).copied());
    line.starts_with("%%%%%%%%%%%%%%%%%")
        || (line.starts_with("Usage Report:") && line.contains("Compute"))
        || line.starts_with("Total Grant:")
        || line.starts_with("Batch Queue Usage per User")
        || line.starts_with("CPU resource:")
        || line.starts_with("Storage resource:")
        || pair == (Some("System"), Some("Queue"))
        || pair == (Some("System"), Some("StoragePt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const DUMP: &str = r"%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%
Tue Mar 12 09:45:37 AEDT 2019

Usage Report: Project=w35 Compute Period=2019.q1 (01/01/2019-31/03/2019)

Total Grant:   1604.00 KSU

System       Queue         Weight    Usage      Usage     Usage    Avail     Grant    Border
--------------------------------------------------------------------------------------------
raijin       normal         1.00  272624.44   17694.25   370.24  1233.76   1604.00      0.00
raijin       express        3.00    1244.01     700.33    12.33  1233.76   1604.00      0.00

Batch Queue Usage per User
User          Usage        Usage      Usage   Efficiency
             (CPUhrs)   (Walltime)     (KSU)
--------------------------------------------------------
aaa777      219496.92     12374.75     219.50      92.3%
bzz123       53127.52      5319.50     150.74      87.1%

CPU resource: System=raijin
--------------------------------------------------------------------------------------------
Stakeholder    Grant           Used      Available       Price         CPU         CPU         CPU
               (KSU)          (KSU)          (KSU)  (per SU) $    Credit $      Used $   Balance $
--------------------------------------------------------------------------------------------
MAS-FlagshipCLEX-grant         160.00          28.68         131.32       0.040           -     1147.08           -
ClimateLIEF-bonus               40.00           0.00          40.00       0.000           -           -           -

Storage resource: System=dmf
     Resource=massdata-capacity, Current Usage formula=P1(MAS-FlagshipC-grant:62+ClimateLIEF-grant:938)
     -----------------------------------------------------------------------------------------------
     Stakeholder                  Grant        Used   Available    Max Used    Average Used          Price
                                   (TB)        (TB)        (TB)        (TB)            (TB)   (GB/month) $
     ClimateLIEF-grant            60.00       26.50       33.50       26.50           28.85          0.019           -       18.11              -
     MAS-FlagshipC-grant           3.95        1.75        2.20        1.75            1.91          0.019           -        1.20              -
     -----------------------------------------------------------------------------------------------
     Total                        63.95       28.26       35.70       28.26           30.76                          -       19.30              -

     Resource=massdata-inodes, Current Usage formula=P1(MAS-FlagshipC-grant:68+ClimateLIEF-grant:932)
     -----------------------------------------------------------------------------------------------
     Stakeholder                  Grant        Used   Available    Max Used    Average Used          Price
                                    (K)         (K)         (K)         (K)             (K)  (per month) $
     ClimateLIEF-grant          4406.00        7.34     4398.66        7.34            7.99          0.000           -        0.00              -

System    StoragePt     Grant      Used     Avail    iGrant     iUsed    iAvail
--------------------------------------------------------------------------------
raijin    short        72.0GB    36.71GB   35.29GB     1.86M    41.69K     1.82M
dmf       massdata    63.95TB    28.26TB   35.69TB     4.73M     7.88K     4.72M
";

    #[test]
    fn parses_a_full_dump() {
        let dump = parse(DUMP).unwrap();
        assert_eq!(dump.date.unwrap().date(), date(2019, 3, 12));
        assert_eq!(dump.reports.len(), 1);

        let r = &dump.reports[0];
        assert_eq!(r.project, "w35");
        assert_eq!(r.period, Period { year: 2019, quarter: 1 });
        assert_eq!(r.start, date(2019, 1, 1));
        assert_eq!(r.end, date(2019, 3, 31));
        assert_eq!(r.grant_su, Some(1_604_000.0));

        assert_eq!(r.queue_usage.len(), 2);
        assert_eq!(
            r.queue_usage[0],
            QueueUsage {
                system: "raijin".to_string(),
                queue: "normal".to_string(),
                charge_weight: 1.0,
                cpu_hours: 272624.44,
                walltime_hours: 17694.25,
                su: 370.24,
            }
        );

        assert_eq!(r.user_usage.len(), 2);
        assert_eq!(r.user_usage[0].username, "aaa777");
        assert_eq!(r.user_usage[1].su, 150.74);
        assert_eq!(r.user_usage[1].efficiency, Some(87.1));

        // the bonus allocation is not a grant
        assert_eq!(r.scheme_grants.len(), 1);
        assert_eq!(
            r.scheme_grants[0],
            SchemeGrant {
                system: "raijin".to_string(),
                scheme: "MAS-FlagshipCLEX".to_string(),
                su: 160_000.0,
            }
        );

        let grants = &r.storage_grants;
        assert_eq!(grants.len(), 3);
        assert_eq!(grants[0].system, "dmf");
        assert_eq!(grants[0].point, "massdata");
        assert_eq!(grants[0].scheme, "ClimateLIEF");
        assert_eq!(grants[0].kind, StorageKind::Capacity);
        assert_eq!(grants[0].amount, (60.0 * 1024f64.powi(4)).round());
        assert_eq!(grants[1].scheme, "MAS-FlagshipC");
        assert_eq!(grants[2].kind, StorageKind::Inodes);
        assert_eq!(grants[2].amount, 4_406_000.0);

        let quotas = &r.storage_quotas;
        assert_eq!(quotas.len(), 2);
        assert_eq!(quotas[0].system, "raijin");
        assert_eq!(quotas[0].point, "short");
        assert_eq!(quotas[0].size_grant, 72.0 * 1024f64.powi(3));
        assert_eq!(quotas[0].inode_grant, 1.86 * 1_000_000.0);
        assert_eq!(quotas[1].point, "massdata");
    }

    #[test]
    fn header_ends_a_table() {
        // no blank line between the queue rows and the next header
        let text = r"%%%%%%%%%%%%%%%%%
Tue Mar 12 09:45:37 AEDT 2019
Usage Report: Project=w35 Compute Period=2019.q1 (01/01/2019-31/03/2019)
System       Queue    Weight  Usage  Usage  Usage  Avail  Grant  Border
-----------------------------------------------------------------------
raijin       normal   1.00    10.0   5.0    2.0    1.0    1.0    0.00
Batch Queue Usage per User
User         Usage     Usage    Usage  Efficiency
            (CPUhrs) (Walltime)  (KSU)
-------------------------------------------------
aaa777  10.0  5.0  2.0  50.0%
";
        let dump = parse(text).unwrap();
        let r = &dump.reports[0];
        assert_eq!(r.queue_usage.len(), 1);
        assert_eq!(r.user_usage.len(), 1);
        assert_eq!(r.user_usage[0].efficiency, Some(50.0));
    }

    #[test]
    fn rejects_malformed_dumps() {
        // tables before any report header
        let text = r"System       Queue    Weight
-----------------------------
raijin normal 1.0 1.0 1.0 1.0 1.0 1.0 0.0
";
        let err = parse(text).unwrap_err();
        assert!(err.to_string().contains("usage report"));

        // banner with no timestamp line after it
        assert!(parse("%%%%%%%%%%%%%%%%%").is_err());

        // a storage resource of unknown kind
        let text = r"Usage Report: Project=w35 Compute Period=2019.q1 (01/01/2019-31/03/2019)
Storage resource: System=dmf
     Resource=massdata-snapshots, Current Usage formula=P1
";
        assert!(parse(text).is_err());
    }
}
