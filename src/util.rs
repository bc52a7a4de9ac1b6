//! Parsing helpers shared by the dump ingesters.

use std::{fmt, str::FromStr, sync::OnceLock};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use regex::Regex;

const PREFIXES: [&str; 9] = ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];

fn quantity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+\.\d+|\d+)\s?(\D*)$").unwrap())
}

/// Parse a human readable quantity like `16.4TB`, `4406.00K` or `1604.00 KSU`
/// into its base unit. The unit must be a single metric prefix followed by
/// `suffix`, or exactly `suffix` on its own.
pub fn parse_quantity(s: &str, base: f64, suffix: &str) -> Result<f64> {
    let upper = s.to_uppercase();
    let caps = quantity_re()
        .captures(&upper)
        .with_context(|| format!("unrecognised quantity: {s:?}"))?;
    let num: f64 = caps[1]
        .parse()
        .with_context(|| format!("unrecognised quantity: {s:?}"))?;
    let unit = caps.get(2).map_or("", |m| m.as_str());
    let exponent = unit
        .strip_suffix(suffix)
        .and_then(|prefix| PREFIXES.iter().position(|p| *p == prefix))
        .with_context(|| format!("unrecognised unit {unit:?} in quantity {s:?}"))?;
    Ok(num * base.powi(exponent as i32))
}

/// Parse a file size like `372.5GB` into bytes. Powers of 1024, so `1KB`
/// is 1024 bytes, matching the convention of the accounting dumps.
pub fn parse_size(s: &str) -> Result<f64> {
    parse_quantity(s, 1024.0, "B")
}

/// Parse an inode count like `4406.00K`. Bare numbers are accepted.
pub fn parse_inodes(s: &str) -> Result<f64> {
    parse_quantity(s, 1000.0, "")
}

/// Parse a service unit figure like `1604.00 KSU` into plain SU.
pub fn parse_su(s: &str) -> Result<f64> {
    parse_quantity(s, 1000.0, "SU")
}

/// Parse the timestamp banner of an accounting dump, e.g.
/// `Tue Mar 12 09:45:37 AEDT 2019`. chrono cannot parse timezone
/// abbreviations so the zone token is dropped; the dumps are generated
/// in local time and only the date matters downstream.
pub fn parse_report_timestamp(s: &str) -> Result<NaiveDateTime> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    if tokens.len() != 6 {
        bail!("unrecognised report timestamp: {s:?}");
    }
    let trimmed = format!(
        "{} {} {} {} {}",
        tokens[0], tokens[1], tokens[2], tokens[3], tokens[5]
    );
    NaiveDateTime::parse_from_str(&trimmed, "%a %b %d %H:%M:%S %Y")
        .with_context(|| format!("unrecognised report timestamp: {s:?}"))
}

/// Parse a PBS timestamp like `Thu Mar 14 09:17:48 2019`.
pub fn parse_pbs_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%a %b %d %H:%M:%S %Y")
        .with_context(|| format!("unrecognised timestamp: {s:?}"))
}

/// Parse a PBS duration like `48:13:09` into seconds. The hour field is
/// not bounded, walltimes routinely exceed a day.
pub fn walltime_to_seconds(s: &str) -> Result<i64> {
    let parts: Vec<&str> = s.split(':').collect();
    let [h, m, sec] = parts[..] else {
        bail!("unrecognised walltime: {s:?}");
    };
    let context = || format!("unrecognised walltime: {s:?}");
    let h: i64 = h.parse().with_context(context)?;
    let m: i64 = m.parse().with_context(context)?;
    let sec: i64 = sec.parse().with_context(context)?;
    Ok(h * 3600 + m * 60 + sec)
}

/// Format seconds as `H:MM:SS`.
pub fn format_hms(secs: i64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

/// Remove `<...>` markup that PBS leaves in executable and argument lists.
pub fn strip_tags(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"<[^<]+?>").unwrap());
    re.replace_all(s, "").into_owned()
}

/// A year and quarter like `2019.q3`. Every accounting table is keyed by
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period {
    pub year: i32,
    pub quarter: u8,
}

impl Period {
    pub fn containing(date: NaiveDate) -> Self {
        Period {
            year: date.year(),
            quarter: (date.month0() / 3 + 1) as u8,
        }
    }

    pub fn current() -> Self {
        Self::containing(Local::now().date_naive())
    }

    /// The quarter as it is stored in the database, e.g. `q3`.
    pub fn quarter_label(&self) -> String {
        format!("q{}", self.quarter)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.q{}", self.year, self.quarter)
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let context = || format!("periods look like 2019.q3, not {s:?}");
        let (year, quarter) = s.split_once('.').with_context(context)?;
        let year: i32 = year.parse().with_context(context)?;
        let quarter: u8 = quarter
            .strip_prefix('q')
            .with_context(context)?
            .parse()
            .with_context(context)?;
        if !(1..=4).contains(&quarter) {
            bail!("quarter out of range in period {s:?}");
        }
        Ok(Period { year, quarter })
    }
}
