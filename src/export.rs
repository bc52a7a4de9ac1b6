//! CSV export of the per-user matrices, for spreadsheets and notebooks.

use std::io::{self, Write};

use anyhow::Result;

use crate::config::Config;
use crate::dataset::Matrix;
use crate::db;
use crate::model::{Measure, UsageField};
use crate::util::Period;

/// Write the per-user compute usage of a quarter to stdout.
pub fn usage(config: &Config, project: &str, period: Period, field: UsageField) -> Result<()> {
    let db = db::existing_usage(config, project, period.year)?;
    write_matrix(&db.usage_matrix(period, field)?, io::stdout().lock())
}

/// Write the per-user storage figures of a quarter to stdout.
pub fn storage(
    config: &Config,
    project: &str,
    period: Period,
    point: &str,
    measure: Measure,
) -> Result<()> {
    let db = db::existing_usage(config, project, period.year)?;
    let point = config.resolve_point(point);
    write_matrix(&db.storage_matrix(period, &point, measure)?, io::stdout().lock())
}

/// One record per cell in long form, so the output needs no pivoting to
/// load into anything downstream.
fn write_matrix<W: Write>(matrix: &Matrix, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["date", "user", "value"])?;
    for (date, row) in matrix.dates.iter().zip(&matrix.values) {
        for (user, value) in matrix.columns.iter().zip(row) {
            writer.write_record([date.to_string(), user.clone(), value.to_string()])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn long_form_records() {
        let matrix = Matrix::from_rows(&[
            ("Alice (aaa777)".to_string(), NaiveDate::from_ymd_opt(2019, 2, 4).unwrap(), 10.5),
            ("Bob (bzz123)".to_string(), NaiveDate::from_ymd_opt(2019, 2, 5).unwrap(), 3.0),
        ]);

        let mut buffer = Vec::new();
        write_matrix(&matrix, &mut buffer).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text,
            "date,user,value\n\
             2019-02-04,Alice (aaa777),10.5\n\
             2019-02-04,Bob (bzz123),0\n\
             2019-02-05,Alice (aaa777),0\n\
             2019-02-05,Bob (bzz123),3\n"
        );
    }
}
