//! The usage database of one project year.

use chrono::NaiveDate;
use log::debug;
use rusqlite::{Connection, OptionalExtension};

use super::{DatasetError, Matrix, Result};
use crate::model::{Measure, StorageKind, StorageQuota, StorageUse, UsageField};
use crate::util::Period;

const SCHEMA: &str = include_str!("../../db-usage.sql");

pub struct UsageDb {
    conn: Connection,
}

/// Cumulative figures for one queue, taken from the most recent dump.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueTotal {
    pub system: String,
    pub queue: String,
    pub cpu_hours: f64,
    pub walltime_hours: f64,
    pub su: f64,
}

/// One entry of a top-usage ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct TopUser {
    pub username: String,
    pub fullname: String,
    pub total: f64,
}

/// A funding-scheme storage grant as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageGrantRow {
    pub system: String,
    pub point: String,
    pub scheme: String,
    pub kind: String,
    pub amount: f64,
}

impl UsageDb {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(UsageDb { conn })
    }

    /// Register a user. The full name is only written the first time a
    /// username is seen, most dumps carry the bare username.
    pub fn add_user(&self, username: &str, fullname: Option<&str>) -> Result<()> {
        self.conn.execute(
            "insert or ignore into user (username, fullname) values (?1, ?2)",
            (username, fullname.unwrap_or(username)),
        )?;
        Ok(())
    }

    fn user_id(&self, username: &str) -> Result<i64> {
        self.conn
            .query_row(
                "select id from user where username = ?1",
                (username,),
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DatasetError::UnknownUser(username.to_string()))
    }

    pub fn add_quarter(&self, period: Period, start: NaiveDate, end: NaiveDate) -> Result<()> {
        debug!("quarter {period} runs {start} to {end}");
        self.conn.execute(
            "insert into quarter (year, quarter, start_date, end_date) values (?1, ?2, ?3, ?4)
             on conflict (year, quarter) do update
             set start_date = excluded.start_date, end_date = excluded.end_date",
            (period.year, period.quarter_label(), start, end),
        )?;
        Ok(())
    }

    /// The calendar range of a quarter, as reported by the accounting dumps.
    pub fn quarter_range(&self, period: Period) -> Result<(NaiveDate, NaiveDate)> {
        self.conn
            .query_row(
                "select start_date, end_date from quarter where year = ?1 and quarter = ?2",
                (period.year, period.quarter_label()),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(DatasetError::NotInDatabase(period))
    }

    pub fn add_grant(&self, period: Period, total_su: f64) -> Result<()> {
        self.conn.execute(
            "insert into su_grant (year, quarter, total_su) values (?1, ?2, ?3)
             on conflict (year, quarter) do update set total_su = excluded.total_su",
            (period.year, period.quarter_label(), total_su),
        )?;
        Ok(())
    }

    /// The total compute grant for a quarter in SU, if one was recorded.
    pub fn grant(&self, period: Period) -> Result<Option<f64>> {
        Ok(self
            .conn
            .query_row(
                "select total_su from su_grant where year = ?1 and quarter = ?2",
                (period.year, period.quarter_label()),
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn add_system_queue(&self, system: &str, queue: &str, charge_weight: f64) -> Result<()> {
        self.conn.execute(
            "insert into system_queue (system, queue, charge_weight) values (?1, ?2, ?3)
             on conflict (system, queue) do update set charge_weight = excluded.charge_weight",
            (system, queue, charge_weight),
        )?;
        Ok(())
    }

    fn system_queue_id(&self, system: &str, queue: &str) -> Result<i64> {
        self.conn
            .query_row(
                "select id from system_queue where system = ?1 and queue = ?2",
                (system, queue),
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DatasetError::UnknownQueue {
                system: system.to_string(),
                queue: queue.to_string(),
            })
    }

    /// Record the cumulative project usage on one queue as of `date`.
    /// Re-ingesting a dump for the same day overwrites.
    pub fn add_project_usage(
        &self,
        date: NaiveDate,
        system: &str,
        queue: &str,
        cpu_hours: f64,
        walltime_hours: f64,
        su: f64,
    ) -> Result<()> {
        let queue_id = self.system_queue_id(system, queue)?;
        self.conn.execute(
            "insert into project_usage (date, system_queue_id, cpu_hours, walltime_hours, su)
             values (?1, ?2, ?3, ?4, ?5)
             on conflict (date, system_queue_id) do update
             set cpu_hours = excluded.cpu_hours,
                 walltime_hours = excluded.walltime_hours,
                 su = excluded.su",
            (date, queue_id, cpu_hours, walltime_hours, su),
        )?;
        Ok(())
    }

    /// Project SU summed over all queues, one point per dump date.
    pub fn project_su_by_date(&self, period: Period) -> Result<Vec<(NaiveDate, f64)>> {
        let (start, end) = self.quarter_range(period)?;
        let mut stmt = self.conn.prepare(
            "select date, sum(su) from project_usage
             where date between ?1 and ?2 group by date order by date",
        )?;
        let rows = stmt.query_map((start, end), |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// The latest cumulative figures for every queue used this quarter.
    pub fn queue_totals(&self, period: Period) -> Result<Vec<QueueTotal>> {
        let (start, end) = self.quarter_range(period)?;
        let mut stmt = self.conn.prepare(
            "select sq.system, sq.queue, p.cpu_hours, p.walltime_hours, p.su
             from project_usage p join system_queue sq on p.system_queue_id = sq.id
             where p.date between ?1 and ?2
               and p.date = (select max(p2.date) from project_usage p2
                             where p2.system_queue_id = p.system_queue_id
                               and p2.date between ?1 and ?2)
             order by sq.system, sq.queue",
        )?;
        let rows = stmt.query_map((start, end), |row| {
            Ok(QueueTotal {
                system: row.get(0)?,
                queue: row.get(1)?,
                cpu_hours: row.get(2)?,
                walltime_hours: row.get(3)?,
                su: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Record the cumulative usage of one user as of `date`.
    pub fn add_user_usage(
        &self,
        date: NaiveDate,
        username: &str,
        cpu_hours: f64,
        walltime_hours: f64,
        su: f64,
        efficiency: Option<f64>,
    ) -> Result<()> {
        let user_id = self.user_id(username)?;
        self.conn.execute(
            "insert into user_usage (date, user_id, cpu_hours, walltime_hours, su, efficiency)
             values (?1, ?2, ?3, ?4, ?5, ?6)
             on conflict (date, user_id) do update
             set cpu_hours = excluded.cpu_hours,
                 walltime_hours = excluded.walltime_hours,
                 su = excluded.su,
                 efficiency = excluded.efficiency",
            (date, user_id, cpu_hours, walltime_hours, su, efficiency),
        )?;
        Ok(())
    }

    /// Per-user usage pivoted into a date by user matrix.
    pub fn usage_matrix(&self, period: Period, field: UsageField) -> Result<Matrix> {
        let (start, end) = self.quarter_range(period)?;
        let sql = match field {
            UsageField::Su => {
                "select printf('%s (%s)', u.fullname, u.username), uu.date, sum(uu.su)
                 from user_usage uu join user u on uu.user_id = u.id
                 where uu.date between ?1 and ?2 group by u.id, uu.date order by uu.date"
            }
            UsageField::Cpu => {
                "select printf('%s (%s)', u.fullname, u.username), uu.date, sum(uu.cpu_hours)
                 from user_usage uu join user u on uu.user_id = u.id
                 where uu.date between ?1 and ?2 group by u.id, uu.date order by uu.date"
            }
            UsageField::Walltime => {
                "select printf('%s (%s)', u.fullname, u.username), uu.date, sum(uu.walltime_hours)
                 from user_usage uu join user u on uu.user_id = u.id
                 where uu.date between ?1 and ?2 group by u.id, uu.date order by uu.date"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map((start, end), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        let rows: Vec<(String, NaiveDate, f64)> =
            rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Matrix::from_rows(&rows))
    }

    fn scheme_id(&self, name: &str) -> Result<i64> {
        self.conn
            .execute("insert or ignore into scheme (name) values (?1)", (name,))?;
        Ok(self.conn.query_row(
            "select id from scheme where name = ?1",
            (name,),
            |row| row.get(0),
        )?)
    }

    /// Record a funding-scheme compute grant, in SU.
    pub fn add_usage_grant(
        &self,
        system: &str,
        scheme: &str,
        period: Period,
        date: NaiveDate,
        su: f64,
    ) -> Result<()> {
        let scheme_id = self.scheme_id(scheme)?;
        self.conn.execute(
            "insert into usage_grant (system, scheme_id, year, quarter, date, su)
             values (?1, ?2, ?3, ?4, ?5, ?6)
             on conflict (system, scheme_id, year, quarter) do update
             set date = excluded.date, su = excluded.su",
            (system, scheme_id, period.year, period.quarter_label(), date, su),
        )?;
        Ok(())
    }

    /// Compute grants by funding scheme: `(system, scheme, su)`.
    pub fn usage_grants(&self, period: Period) -> Result<Vec<(String, String, f64)>> {
        let mut stmt = self.conn.prepare(
            "select g.system, s.name, g.su from usage_grant g
             join scheme s on g.scheme_id = s.id
             where g.year = ?1 and g.quarter = ?2 order by g.system, s.name",
        )?;
        let rows = stmt.query_map((period.year, period.quarter_label()), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Record a funding-scheme storage grant in bytes or inodes.
    pub fn add_storage_grant(
        &self,
        system: &str,
        point: &str,
        scheme: &str,
        period: Period,
        kind: StorageKind,
        amount: f64,
        date: NaiveDate,
    ) -> Result<()> {
        let scheme_id = self.scheme_id(scheme)?;
        self.conn.execute(
            "insert into storage_grant (system, storage_point, scheme_id, year, quarter, kind, amount, date)
             values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             on conflict (system, storage_point, scheme_id, year, quarter, kind) do update
             set amount = excluded.amount, date = excluded.date",
            (
                system,
                point,
                scheme_id,
                period.year,
                period.quarter_label(),
                kind.as_str(),
                amount,
                date,
            ),
        )?;
        Ok(())
    }

    pub fn storage_grants(&self, period: Period) -> Result<Vec<StorageGrantRow>> {
        let mut stmt = self.conn.prepare(
            "select g.system, g.storage_point, s.name, g.kind, g.amount from storage_grant g
             join scheme s on g.scheme_id = s.id
             where g.year = ?1 and g.quarter = ?2
             order by g.system, g.storage_point, s.name, g.kind",
        )?;
        let rows = stmt.query_map((period.year, period.quarter_label()), |row| {
            Ok(StorageGrantRow {
                system: row.get(0)?,
                point: row.get(1)?,
                scheme: row.get(2)?,
                kind: row.get(3)?,
                amount: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Record the total quota of the project on one storage point.
    pub fn add_system_storage(
        &self,
        system: &str,
        point: &str,
        period: Period,
        size_grant: f64,
        inode_grant: f64,
    ) -> Result<()> {
        self.conn.execute(
            "insert into system_storage (system, storage_point, year, quarter, size_grant, inode_grant)
             values (?1, ?2, ?3, ?4, ?5, ?6)
             on conflict (system, storage_point, year, quarter) do update
             set size_grant = excluded.size_grant, inode_grant = excluded.inode_grant",
            (
                system,
                point,
                period.year,
                period.quarter_label(),
                size_grant,
                inode_grant,
            ),
        )?;
        Ok(())
    }

    /// Every storage quota recorded for the quarter.
    pub fn storage_quotas(&self, period: Period) -> Result<Vec<StorageQuota>> {
        let mut stmt = self.conn.prepare(
            "select system, storage_point, size_grant, inode_grant from system_storage
             where year = ?1 and quarter = ?2 order by system, storage_point",
        )?;
        let rows = stmt.query_map((period.year, period.quarter_label()), |row| {
            Ok(StorageQuota {
                system: row.get(0)?,
                point: row.get(1)?,
                size_grant: row.get(2)?,
                inode_grant: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// The quota of one storage point, if recorded for the quarter.
    pub fn point_quota(
        &self,
        system: &str,
        point: &str,
        period: Period,
    ) -> Result<Option<StorageQuota>> {
        Ok(self
            .conn
            .query_row(
                "select system, storage_point, size_grant, inode_grant from system_storage
                 where system = ?1 and storage_point = ?2 and year = ?3 and quarter = ?4",
                (system, point, period.year, period.quarter_label()),
                |row| {
                    Ok(StorageQuota {
                        system: row.get(0)?,
                        point: row.get(1)?,
                        size_grant: row.get(2)?,
                        inode_grant: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    /// Record what one user holds under one folder, as of a scan date.
    pub fn add_storage_use(&self, point: &str, usage: &StorageUse) -> Result<()> {
        let user_id = self.user_id(&usage.username)?;
        self.conn.execute(
            "insert into storage_usage (scan_date, storage_point, folder, user_id, size_bytes, inodes)
             values (?1, ?2, ?3, ?4, ?5, ?6)
             on conflict (scan_date, storage_point, folder, user_id) do update
             set size_bytes = excluded.size_bytes, inodes = excluded.inodes",
            (
                usage.scan_date,
                point,
                &usage.folder,
                user_id,
                usage.size_bytes,
                usage.inodes,
            ),
        )?;
        Ok(())
    }

    /// Per-user storage pivoted into a date by user matrix, reindexed to
    /// daily rows from the start of the quarter.
    pub fn storage_matrix(&self, period: Period, point: &str, measure: Measure) -> Result<Matrix> {
        let (start, end) = self.quarter_range(period)?;
        let sql = match measure {
            Measure::Size => {
                "select printf('%s (%s)', u.fullname, u.username), s.scan_date, sum(s.size_bytes)
                 from storage_usage s join user u on s.user_id = u.id
                 where s.scan_date between ?1 and ?2 and s.storage_point = ?3
                 group by u.id, s.scan_date order by s.scan_date"
            }
            Measure::Inodes => {
                "select printf('%s (%s)', u.fullname, u.username), s.scan_date, sum(s.inodes)
                 from storage_usage s join user u on s.user_id = u.id
                 where s.scan_date between ?1 and ?2 and s.storage_point = ?3
                 group by u.id, s.scan_date order by s.scan_date"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map((start, end, point), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        let rows: Vec<(String, NaiveDate, f64)> =
            rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Matrix::from_rows(&rows).backfill_from(start))
    }

    /// Project-wide totals on one storage point at the most recent scan:
    /// `(scan date, bytes, inodes)`.
    pub fn point_usage(
        &self,
        point: &str,
        period: Period,
    ) -> Result<Option<(NaiveDate, f64, f64)>> {
        let (start, end) = self.quarter_range(period)?;
        Ok(self
            .conn
            .query_row(
                "select scan_date, sum(size_bytes), sum(inodes) from storage_usage
                 where storage_point = ?1
                   and scan_date = (select max(scan_date) from storage_usage
                                    where storage_point = ?1 and scan_date between ?2 and ?3)
                 group by scan_date",
                (point, start, end),
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?)
    }

    /// The heaviest users of a storage point at the most recent scan.
    pub fn top_usage(
        &self,
        period: Period,
        point: &str,
        measure: Measure,
        count: usize,
    ) -> Result<Vec<TopUser>> {
        let (start, end) = self.quarter_range(period)?;
        let sql = match measure {
            Measure::Size => {
                "select u.username, u.fullname, sum(s.size_bytes) as total
                 from storage_usage s join user u on s.user_id = u.id
                 where s.storage_point = ?1
                   and s.scan_date = (select max(scan_date) from storage_usage
                                      where storage_point = ?1 and scan_date between ?2 and ?3)
                 group by u.id order by total desc limit ?4"
            }
            Measure::Inodes => {
                "select u.username, u.fullname, sum(s.inodes) as total
                 from storage_usage s join user u on s.user_id = u.id
                 where s.storage_point = ?1
                   and s.scan_date = (select max(scan_date) from storage_usage
                                      where storage_point = ?1 and scan_date between ?2 and ?3)
                 group by u.id order by total desc limit ?4"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map((point, start, end, count as i64), |row| {
            Ok(TopUser {
                username: row.get(0)?,
                fullname: row.get(1)?,
                total: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> UsageDb {
        UsageDb::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const Q1: Period = Period { year: 2019, quarter: 1 };

    fn add_q1(db: &UsageDb) {
        db.add_quarter(Q1, date(2019, 1, 1), date(2019, 3, 31))
            .unwrap();
    }

    #[test]
    fn users_keep_first_fullname() {
        let db = db();
        db.add_user("aaa777", Some("Alice A")).unwrap();
        db.add_user("aaa777", Some("Someone Else")).unwrap();
        db.add_user("bzz123", None).unwrap();

        add_q1(&db);
        db.add_user_usage(date(2019, 2, 4), "aaa777", 1.0, 2.0, 3.0, None)
            .unwrap();
        db.add_user_usage(date(2019, 2, 4), "bzz123", 1.0, 2.0, 4.0, Some(81.0))
            .unwrap();

        let m = db.usage_matrix(Q1, UsageField::Su).unwrap();
        assert_eq!(m.columns, vec!["Alice A (aaa777)", "bzz123 (bzz123)"]);

        let err = db
            .add_user_usage(date(2019, 2, 4), "ghost", 0.0, 0.0, 0.0, None)
            .unwrap_err();
        assert!(matches!(err, DatasetError::UnknownUser(u) if u == "ghost"));
    }

    #[test]
    fn quarters_and_grants() {
        let db = db();
        assert!(matches!(
            db.quarter_range(Q1),
            Err(DatasetError::NotInDatabase(_))
        ));

        add_q1(&db);
        assert_eq!(
            db.quarter_range(Q1).unwrap(),
            (date(2019, 1, 1), date(2019, 3, 31))
        );

        assert_eq!(db.grant(Q1).unwrap(), None);
        db.add_grant(Q1, 1_604_000.0).unwrap();
        db.add_grant(Q1, 1_700_000.0).unwrap();
        assert_eq!(db.grant(Q1).unwrap(), Some(1_700_000.0));
    }

    #[test]
    fn project_usage_upserts() {
        let db = db();
        add_q1(&db);
        db.add_system_queue("raijin", "normal", 1.0).unwrap();
        db.add_system_queue("raijin", "express", 3.0).unwrap();

        let d1 = date(2019, 2, 4);
        let d2 = date(2019, 2, 5);
        db.add_project_usage(d1, "raijin", "normal", 100.0, 50.0, 200.0)
            .unwrap();
        db.add_project_usage(d1, "raijin", "express", 10.0, 5.0, 60.0)
            .unwrap();
        // same day, same queue: replaced, not duplicated
        db.add_project_usage(d1, "raijin", "normal", 110.0, 55.0, 220.0)
            .unwrap();
        db.add_project_usage(d2, "raijin", "normal", 150.0, 70.0, 300.0)
            .unwrap();

        assert_eq!(
            db.project_su_by_date(Q1).unwrap(),
            vec![(d1, 280.0), (d2, 300.0)]
        );

        // totals take each queue at its own latest date
        let totals = db.queue_totals(Q1).unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].queue, "express");
        assert_eq!(totals[0].su, 60.0);
        assert_eq!(totals[1].queue, "normal");
        assert_eq!(totals[1].su, 300.0);

        let err = db
            .add_project_usage(d1, "raijin", "copyq", 0.0, 0.0, 0.0)
            .unwrap_err();
        assert!(matches!(err, DatasetError::UnknownQueue { .. }));
    }

    #[test]
    fn grants_by_scheme() {
        let db = db();
        let d = date(2019, 3, 12);
        db.add_usage_grant("raijin", "MAS-FlagshipCLEX", Q1, d, 160_000.0)
            .unwrap();
        db.add_usage_grant("raijin", "MAS-FlagshipCLEX", Q1, d, 170_000.0)
            .unwrap();
        db.add_usage_grant("raijin", "ClimateLIEF", Q1, d, 40_000.0)
            .unwrap();

        assert_eq!(
            db.usage_grants(Q1).unwrap(),
            vec![
                ("raijin".to_string(), "ClimateLIEF".to_string(), 40_000.0),
                ("raijin".to_string(), "MAS-FlagshipCLEX".to_string(), 170_000.0),
            ]
        );

        db.add_storage_grant("dmf", "massdata", "ClimateLIEF", Q1, StorageKind::Capacity, 60.0, d)
            .unwrap();
        db.add_storage_grant("dmf", "massdata", "ClimateLIEF", Q1, StorageKind::Inodes, 4_406_000.0, d)
            .unwrap();
        let grants = db.storage_grants(Q1).unwrap();
        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].kind, "capacity");
        assert_eq!(grants[1].kind, "inodes");
    }

    #[test]
    fn storage_quotas_by_point() {
        let db = db();
        db.add_system_storage("raijin", "short", Q1, 7.0, 1_860_000.0)
            .unwrap();
        db.add_system_storage("global", "gdata1a", Q1, 60.0, 4_406_000.0)
            .unwrap();
        db.add_system_storage("global", "gdata1a", Q1, 70.0, 4_406_000.0)
            .unwrap();

        let quotas = db.storage_quotas(Q1).unwrap();
        assert_eq!(quotas.len(), 2);
        assert_eq!(quotas[0].system, "global");
        assert_eq!(quotas[0].size_grant, 70.0);

        let q = db.point_quota("raijin", "short", Q1).unwrap().unwrap();
        assert_eq!(q.inode_grant, 1_860_000.0);
        // wrong system or unknown point finds nothing
        assert!(db.point_quota("global", "short", Q1).unwrap().is_none());
        assert!(db.point_quota("global", "gdata2", Q1).unwrap().is_none());
    }

    #[test]
    fn storage_usage_and_ranking() {
        let db = db();
        add_q1(&db);
        db.add_user("aaa777", Some("Alice A")).unwrap();
        db.add_user("bzz123", Some("Bob B")).unwrap();

        let scan1 = date(2019, 2, 4);
        let scan2 = date(2019, 2, 6);
        let gib = 1024f64.powi(3);
        for (user, size) in [("aaa777", 10.0 * gib), ("bzz123", 2.0 * gib)] {
            db.add_storage_use(
                "short",
                &StorageUse {
                    folder: "w35".to_string(),
                    username: user.to_string(),
                    size_bytes: size,
                    inodes: 1000.0,
                    scan_date: scan1,
                },
            )
            .unwrap();
        }
        // second scan, alice shrinks
        db.add_storage_use(
            "short",
            &StorageUse {
                folder: "w35".to_string(),
                username: "aaa777".to_string(),
                size_bytes: 4.0 * gib,
                inodes: 500.0,
                scan_date: scan2,
            },
        )
        .unwrap();

        let m = db.storage_matrix(Q1, "short", Measure::Size).unwrap();
        // backfilled daily from the start of the quarter
        assert_eq!(m.dates.first(), Some(&date(2019, 1, 1)));
        assert_eq!(m.dates.last(), Some(&scan2));
        assert_eq!(m.values[0], vec![10.0 * gib, 2.0 * gib]);

        // bob has no row at the second scan so the ranking only sees alice
        let top = db.top_usage(Q1, "short", Measure::Size, 10).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].username, "aaa777");
        assert_eq!(top[0].total, 4.0 * gib);

        let top = db.top_usage(Q1, "gdata1a", Measure::Size, 10).unwrap();
        assert!(top.is_empty());

        assert_eq!(
            db.point_usage("short", Q1).unwrap(),
            Some((scan2, 4.0 * gib, 500.0))
        );
        assert_eq!(db.point_usage("gdata1a", Q1).unwrap(), None);
    }
}
