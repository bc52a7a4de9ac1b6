//! Parser for the per-storage-point filesystem scan dumps.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use log::{debug, error, info};

use super::DbCache;
use crate::archive;
use crate::config::Config;
use crate::model::StorageUse;
use crate::util::{parse_report_timestamp, parse_size};

/// Everything read out of one storage scan dump.
#[derive(Debug, Default)]
pub struct StorageDump {
    /// Timestamp of the banner at the top of the dump. Its year picks the
    /// database; the scan date of each row is carried by the row itself.
    pub date: Option<NaiveDateTime>,
    pub sections: Vec<ProjectSection>,
}

/// The rows of one `Usage details for project <id>:` section.
#[derive(Debug)]
pub struct ProjectSection {
    pub project: String,
    pub rows: Vec<StorageUse>,
}

/// Ingest storage scan dumps. The scanned storage point is named by the
/// file, and one file may carry sections for several projects.
pub fn run(
    config: &Config,
    inputs: &[PathBuf],
    database: Option<PathBuf>,
    no_archive: bool,
) -> Result<()> {
    let mut cache = DbCache::new(config, database);
    for path in inputs {
        let point = storage_point(config, path)?;
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let dump = parse(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        store(&mut cache, &dump, &point, path)?;
        if !no_archive {
            match archive::archive_file(path) {
                Ok(target) => debug!("archived {}", target.display()),
                Err(e) => error!("could not archive {}: {e:#}", path.display()),
            }
        }
    }
    Ok(())
}

/// The storage point is the third dot-separated part of the file name,
/// e.g. `usage.w35.gdata1.dump` is a scan of gdata1. Site aliases apply.
fn storage_point(config: &Config, path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?;
    let point = name
        .split('.')
        .nth(2)
        .with_context(|| format!("no storage point in file name {name:?}"))?;
    Ok(config.resolve_point(point))
}

pub fn parse(text: &str) -> Result<StorageDump> {
    let mut dump = StorageDump::default();
    let mut in_section = false;
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if in_section {
            if let Some(row) = usage_row(line)? {
                if let Some(section) = dump.sections.last_mut() {
                    section.rows.push(row);
                }
                continue;
            }
            // not a row: close the section and re-examine as a header
            in_section = false;
        }
        if line.starts_with("%%%%%%%%%%%%%%%%%") {
            let stamp = lines
                .next()
                .context("dump ends right after its banner line")?;
            dump.date = Some(parse_report_timestamp(stamp)?);
        } else if line.starts_with("Usage details for project") {
            let project = line
                .split_whitespace()
                .nth(4)
                .with_context(|| format!("malformed project header {line:?}"))?
                .trim_end_matches(':');
            // three header lines under the banner
            for _ in 0..3 {
                lines.next();
            }
            dump.sections.push(ProjectSection {
                project: project.to_string(),
                rows: Vec::new(),
            });
            in_section = true;
        }
    }
    Ok(dump)
}

fn usage_row(line: &str) -> Result<Option<StorageUse>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return Ok(None);
    }
    let context = || format!("bad storage usage row {line:?}");
    Ok(Some(StorageUse {
        folder: fields[0].to_string(),
        username: fields[1].to_string(),
        size_bytes: parse_size(fields[2]).with_context(context)?,
        inodes: fields[3].parse().with_context(context)?,
        scan_date: NaiveDate::parse_from_str(fields[4], "%Y-%m-%d").with_context(context)?,
    }))
}

/// Load one parsed dump into the databases.
fn store(cache: &mut DbCache, dump: &StorageDump, point: &str, path: &Path) -> Result<()> {
    if dump.sections.is_empty() {
        return Ok(());
    }
    let year = dump
        .date
        .with_context(|| format!("{} has no timestamp banner", path.display()))?
        .year();
    for section in &dump.sections {
        let db = cache.get(&section.project, year)?;
        for row in &section.rows {
            db.add_user(&row.username, None)?;
            db.add_storage_use(point, row)?;
        }
        info!(
            "{} on {}: {} storage rows",
            section.project,
            point,
            section.rows.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r"%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%
Thu Feb 14 04:01:38 AEDT 2019

Usage details for project w35:
---------------------------------------------------------------------------
Folder                          User          Size     Inodes    Scan Date
---------------------------------------------------------------------------
w35                             aaa777      372.5GB    251092    2019-02-14
w35                             bzz123       16.4TB     11239    2019-02-14
Usage details for project v45:
---------------------------------------------------------------------------
Folder                          User          Size     Inodes    Scan Date
---------------------------------------------------------------------------
v45                             ccc999        1.2GB       501    2019-02-14
";

    #[test]
    fn parses_scan_sections() {
        let dump = parse(DUMP).unwrap();
        assert_eq!(
            dump.date.unwrap().date(),
            NaiveDate::from_ymd_opt(2019, 2, 14).unwrap()
        );

        // the second header follows the last row with no gap
        assert_eq!(dump.sections.len(), 2);
        let w35 = &dump.sections[0];
        assert_eq!(w35.project, "w35");
        assert_eq!(w35.rows.len(), 2);
        assert_eq!(
            w35.rows[0],
            StorageUse {
                folder: "w35".to_string(),
                username: "aaa777".to_string(),
                size_bytes: 372.5 * 1024f64.powi(3),
                inodes: 251092.0,
                scan_date: NaiveDate::from_ymd_opt(2019, 2, 14).unwrap(),
            }
        );
        assert_eq!(dump.sections[1].project, "v45");
        assert_eq!(dump.sections[1].rows.len(), 1);
    }

    #[test]
    fn storage_point_comes_from_the_file_name() {
        let config = Config::default();
        let point = storage_point(&config, Path::new("/in/usage.w35.short.dump")).unwrap();
        assert_eq!(point, "short");

        // the site alias applies
        let point = storage_point(&config, Path::new("usage.w35.gdata1.dump")).unwrap();
        assert_eq!(point, "gdata1a");

        assert!(storage_point(&config, Path::new("usage.dump")).is_err());
    }

    #[test]
    fn bad_rows_are_fatal() {
        let text = r"Usage details for project w35:
---
Folder User Size Inodes Scan
---
w35  aaa777  372.5XX  251092  2019-02-14
";
        assert!(parse(text).is_err());
    }
}
