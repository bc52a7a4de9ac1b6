//! Access layer over the per-project SQLite databases.

mod jobs;
mod usage;

pub use jobs::{JobRow, JobsDb};
pub use usage::{QueueTotal, StorageGrantRow, TopUser, UsageDb};

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use thiserror::Error;

use crate::util::Period;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("no entries in database for {0}")]
    NotInDatabase(Period),
    #[error("user {0:?} does not exist in this database")]
    UnknownUser(String),
    #[error("queue {system}/{queue} does not exist in this database")]
    UnknownQueue { system: String, queue: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DatasetError>;

/// A date by user table of values, densely filled with zeroes. Every
/// time-series report and plot consumes one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<String>,
    /// One row per date, one value per column.
    pub values: Vec<Vec<f64>>,
}

impl Matrix {
    /// Build a matrix from `(column, date, value)` rows. Missing cells
    /// become zero, columns are ordered alphabetically.
    pub fn from_rows(rows: &[(String, NaiveDate, f64)]) -> Matrix {
        let dates: Vec<NaiveDate> = rows
            .iter()
            .map(|r| r.1)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let columns: Vec<String> = rows
            .iter()
            .map(|r| r.0.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut values = vec![vec![0.0; columns.len()]; dates.len()];
        for (name, date, value) in rows {
            // both lookups succeed, the axes were built from the same rows
            let i = dates.binary_search(date).unwrap();
            let j = columns.binary_search(name).unwrap();
            values[i][j] = *value;
        }

        Matrix {
            dates,
            columns,
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.columns.is_empty()
    }

    fn take_columns(&self, keep: &[usize]) -> Matrix {
        Matrix {
            dates: self.dates.clone(),
            columns: keep.iter().map(|&j| self.columns[j].clone()).collect(),
            values: self
                .values
                .iter()
                .map(|row| keep.iter().map(|&j| row[j]).collect())
                .collect(),
        }
    }

    fn column_max(&self, j: usize, absolute: bool) -> f64 {
        self.values
            .iter()
            .map(|row| if absolute { row[j].abs() } else { row[j] })
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Keep only columns whose label contains one of the patterns. Labels
    /// are `Full Name (username)`, so a bare username matches.
    pub fn select_columns(&self, patterns: &[String]) -> Matrix {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&j| patterns.iter().any(|p| self.columns[j].contains(p.as_str())))
            .collect();
        self.take_columns(&keep)
    }

    /// Order columns by their value on the most recent date, largest first.
    pub fn sort_by_last_row(&self) -> Matrix {
        let mut order: Vec<usize> = (0..self.columns.len()).collect();
        if let Some(last) = self.values.last() {
            order.sort_by(|&a, &b| last[b].total_cmp(&last[a]));
        }
        self.take_columns(&order)
    }

    /// Fold every column whose peak value never exceeds the cutoff into a
    /// single trailing `Remainder` column.
    pub fn fold_below(&self, cutoff: f64) -> Matrix {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&j| self.column_max(j, false) > cutoff)
            .collect();
        if keep.len() == self.columns.len() {
            return self.clone();
        }

        let fold: Vec<usize> = (0..self.columns.len())
            .filter(|j| !keep.contains(j))
            .collect();
        let mut folded = self.take_columns(&keep);
        folded.columns.push("Remainder".to_string());
        for (i, row) in self.values.iter().enumerate() {
            folded.values[i].push(fold.iter().map(|&j| row[j]).sum());
        }
        folded
    }

    /// Drop columns whose magnitude never exceeds the cutoff.
    pub fn retain_abs_above(&self, cutoff: f64) -> Matrix {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&j| self.column_max(j, true) > cutoff)
            .collect();
        self.take_columns(&keep)
    }

    /// Subtract the first row from every row, leaving the change since the
    /// first date.
    pub fn delta(&self) -> Matrix {
        let Some(first) = self.values.first().cloned() else {
            return self.clone();
        };
        Matrix {
            dates: self.dates.clone(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|row| row.iter().zip(&first).map(|(v, f)| v - f).collect())
                .collect(),
        }
    }

    /// Divide every value by a constant.
    pub fn scaled(&self, divisor: f64) -> Matrix {
        Matrix {
            dates: self.dates.clone(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|row| row.iter().map(|v| v / divisor).collect())
                .collect(),
        }
    }

    /// Row-wise totals across all columns.
    pub fn totals(&self) -> Vec<(NaiveDate, f64)> {
        self.dates
            .iter()
            .zip(&self.values)
            .map(|(&d, row)| (d, row.iter().sum()))
            .collect()
    }

    /// One column as a series of points.
    pub fn column_points(&self, j: usize) -> Vec<(NaiveDate, f64)> {
        self.dates
            .iter()
            .zip(&self.values)
            .map(|(&d, row)| (d, row[j]))
            .collect()
    }

    /// Reindex to daily rows running from `start` to the last recorded
    /// date. Missing days take the next recorded row, so sparse scans in
    /// the middle of a quarter still produce a dense series.
    pub fn backfill_from(&self, start: NaiveDate) -> Matrix {
        let Some(&last) = self.dates.last() else {
            return self.clone();
        };
        let mut dates = Vec::new();
        let mut values = Vec::new();
        let mut date = start;
        while date <= last {
            let i = self.dates.partition_point(|&x| x < date);
            dates.push(date);
            values.push(self.values[i].clone());
            date = date + Days::new(1);
        }
        Matrix {
            dates,
            columns: self.columns.clone(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 2, d).unwrap()
    }

    fn sample() -> Matrix {
        Matrix::from_rows(&[
            ("Alice (aaa777)".to_string(), day(4), 10.0),
            ("Alice (aaa777)".to_string(), day(8), 30.0),
            ("Bob (bzz123)".to_string(), day(4), 5.0),
        ])
    }

    #[test]
    fn dense_fill() {
        let m = sample();
        assert_eq!(m.dates, vec![day(4), day(8)]);
        assert_eq!(m.columns, vec!["Alice (aaa777)", "Bob (bzz123)"]);
        // bob has no entry on the 8th
        assert_eq!(m.values, vec![vec![10.0, 5.0], vec![30.0, 0.0]]);
        assert!(!m.is_empty());
        assert!(Matrix::from_rows(&[]).is_empty());
    }

    #[test]
    fn select_and_sort() {
        let m = sample();
        let alice = m.select_columns(&["aaa777".to_string()]);
        assert_eq!(alice.columns, vec!["Alice (aaa777)"]);
        assert_eq!(alice.values, vec![vec![10.0], vec![30.0]]);
        assert!(m.select_columns(&["nobody".to_string()]).is_empty());

        // alice ends higher than bob, so she sorts first either way
        let sorted = m.sort_by_last_row();
        assert_eq!(sorted.columns, vec!["Alice (aaa777)", "Bob (bzz123)"]);
        assert_eq!(sorted.values[1], vec![30.0, 0.0]);
    }

    #[test]
    fn fold_and_retain() {
        let m = sample();
        let folded = m.fold_below(6.0);
        assert_eq!(folded.columns, vec!["Alice (aaa777)", "Remainder"]);
        assert_eq!(folded.values, vec![vec![10.0, 5.0], vec![30.0, 0.0]]);

        // cutoff below every peak leaves the matrix alone
        assert_eq!(m.fold_below(1.0), m);

        let d = m.delta();
        assert_eq!(d.values, vec![vec![0.0, 0.0], vec![20.0, -5.0]]);
        let kept = d.retain_abs_above(6.0);
        assert_eq!(kept.columns, vec!["Alice (aaa777)"]);
    }

    #[test]
    fn totals_and_scale() {
        let m = sample();
        assert_eq!(m.totals(), vec![(day(4), 15.0), (day(8), 30.0)]);
        assert_eq!(m.scaled(5.0).values[0], vec![2.0, 1.0]);
        assert_eq!(m.column_points(1), vec![(day(4), 5.0), (day(8), 0.0)]);
    }

    #[test]
    fn backfill() {
        let m = sample();
        let filled = m.backfill_from(day(1));
        assert_eq!(filled.dates.len(), 8);
        // days before the first scan copy it
        assert_eq!(filled.values[0], vec![10.0, 5.0]);
        // days between scans copy the next scan
        assert_eq!(filled.values[4], vec![30.0, 0.0]);
        assert_eq!(filled.values[7], vec![30.0, 0.0]);
        // a start date after the first scan drops the earlier rows
        let filled = m.backfill_from(day(6));
        assert_eq!(filled.dates, vec![day(6), day(7), day(8)]);
    }
}
