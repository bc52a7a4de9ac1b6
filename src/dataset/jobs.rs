//! The jobs database, shared across projects.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use super::Result;
use crate::model::Job;

const SCHEMA: &str = include_str!("../../db-jobs.sql");

pub struct JobsDb {
    conn: Connection,
}

/// A job joined back out of the lookup tables.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub jobid: String,
    pub project: String,
    pub username: String,
    pub queue: String,
    pub state: String,
    pub jobname: String,
    pub ncpus: Option<i64>,
    pub qtime: NaiveDateTime,
    pub stime: Option<NaiveDateTime>,
    pub walltime_secs: Option<i64>,
    pub cputime_secs: Option<i64>,
    pub mem_bytes: Option<f64>,
}

impl JobsDb {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(JobsDb { conn })
    }

    fn user_id(&self, username: &str) -> Result<i64> {
        self.conn.execute(
            "insert or ignore into user (username, fullname) values (?1, ?1)",
            (username,),
        )?;
        Ok(self.conn.query_row(
            "select id from user where username = ?1",
            (username,),
            |row| row.get(0),
        )?)
    }

    fn project_id(&self, name: &str) -> Result<i64> {
        self.conn
            .execute("insert or ignore into project (name) values (?1)", (name,))?;
        Ok(self.conn.query_row(
            "select id from project where name = ?1",
            (name,),
            |row| row.get(0),
        )?)
    }

    fn queue_id(&self, name: &str) -> Result<i64> {
        self.conn
            .execute("insert or ignore into queue (name) values (?1)", (name,))?;
        Ok(self.conn.query_row(
            "select id from queue where name = ?1",
            (name,),
            |row| row.get(0),
        )?)
    }

    fn state_id(&self, status: &str) -> Result<i64> {
        self.conn.execute(
            "insert or ignore into job_state (status) values (?1)",
            (status,),
        )?;
        Ok(self.conn.query_row(
            "select id from job_state where status = ?1",
            (status,),
            |row| row.get(0),
        )?)
    }

    fn executable_id(&self, path: &str) -> Result<i64> {
        self.conn.execute(
            "insert or ignore into executable (path) values (?1)",
            (path,),
        )?;
        Ok(self.conn.query_row(
            "select id from executable where path = ?1",
            (path,),
            |row| row.get(0),
        )?)
    }

    /// Record one job, keyed by `(year, jobid)`. Later dumps of the same
    /// job replace the earlier state.
    pub fn add_job(&self, job: &Job) -> Result<()> {
        let project_id = self.project_id(&job.project)?;
        let user_id = self.user_id(&job.username)?;
        let queue_id = self.queue_id(&job.queue)?;
        let state_id = self.state_id(&job.state)?;
        let executable_id = match &job.executable {
            Some(path) => Some(self.executable_id(path)?),
            None => None,
        };

        self.conn.execute(
            "insert into job (year, jobid, project_id, user_id, queue_id, state_id,
                              jobname, priority, executable_id, arguments,
                              ctime, mtime, qtime, stime,
                              max_walltime_secs, max_mem_bytes, ncpus,
                              mem_bytes, walltime_secs, cputime_secs)
             values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
             on conflict (year, jobid) do update
             set project_id = excluded.project_id,
                 user_id = excluded.user_id,
                 queue_id = excluded.queue_id,
                 state_id = excluded.state_id,
                 jobname = excluded.jobname,
                 priority = excluded.priority,
                 executable_id = excluded.executable_id,
                 arguments = excluded.arguments,
                 ctime = excluded.ctime,
                 mtime = excluded.mtime,
                 qtime = excluded.qtime,
                 stime = excluded.stime,
                 max_walltime_secs = excluded.max_walltime_secs,
                 max_mem_bytes = excluded.max_mem_bytes,
                 ncpus = excluded.ncpus,
                 mem_bytes = excluded.mem_bytes,
                 walltime_secs = excluded.walltime_secs,
                 cputime_secs = excluded.cputime_secs",
            params![
                job.year,
                job.jobid,
                project_id,
                user_id,
                queue_id,
                state_id,
                job.jobname,
                job.priority,
                executable_id,
                job.arguments,
                job.ctime,
                job.mtime,
                job.qtime,
                job.stime,
                job.max_walltime_secs,
                job.max_mem_bytes,
                job.ncpus,
                job.mem_bytes,
                job.walltime_secs,
                job.cputime_secs,
            ],
        )?;
        Ok(())
    }

    /// Every job queued in one calendar year, oldest first.
    pub fn jobs(&self, year: i32) -> Result<Vec<JobRow>> {
        let mut stmt = self.conn.prepare(
            "select j.jobid, p.name, u.username, q.name, s.status, j.jobname,
                    j.ncpus, j.qtime, j.stime, j.walltime_secs, j.cputime_secs, j.mem_bytes
             from job j
             join project p on j.project_id = p.id
             join user u on j.user_id = u.id
             join queue q on j.queue_id = q.id
             join job_state s on j.state_id = s.id
             where j.year = ?1
             order by j.qtime",
        )?;
        let rows = stmt.query_map((year,), |row| {
            Ok(JobRow {
                jobid: row.get(0)?,
                project: row.get(1)?,
                username: row.get(2)?,
                queue: row.get(3)?,
                state: row.get(4)?,
                jobname: row.get(5)?,
                ncpus: row.get(6)?,
                qtime: row.get(7)?,
                stime: row.get(8)?,
                walltime_secs: row.get(9)?,
                cputime_secs: row.get(10)?,
                mem_bytes: row.get(11)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn time(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 3, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn job(jobid: &str, state: &str) -> Job {
        Job {
            year: 2019,
            jobid: jobid.to_string(),
            project: "w35".to_string(),
            username: "aaa777".to_string(),
            queue: "normal".to_string(),
            state: state.to_string(),
            jobname: "run.sh".to_string(),
            priority: Some(0),
            executable: Some("/bin/bash".to_string()),
            arguments: None,
            ctime: time(14, 9),
            mtime: None,
            qtime: time(14, 9),
            stime: None,
            max_walltime_secs: Some(3600),
            max_mem_bytes: Some(4.0 * 1024f64.powi(3)),
            ncpus: Some(16),
            mem_bytes: None,
            walltime_secs: None,
            cputime_secs: None,
        }
    }

    #[test]
    fn jobs_upsert_by_year_and_id() {
        let db = JobsDb::new(Connection::open_in_memory().unwrap()).unwrap();

        db.add_job(&job("3141592", "Q")).unwrap();

        // the same job later, now running with usage recorded
        let mut running = job("3141592", "R");
        running.stime = Some(time(14, 10));
        running.walltime_secs = Some(600);
        running.cputime_secs = Some(9000);
        running.mem_bytes = Some(1e9);
        db.add_job(&running).unwrap();

        let mut other = job("3141593", "Q");
        other.qtime = time(14, 8);
        other.executable = None;
        db.add_job(&other).unwrap();

        let rows = db.jobs(2019).unwrap();
        assert_eq!(rows.len(), 2);
        // ordered by queue time
        assert_eq!(rows[0].jobid, "3141593");
        assert_eq!(rows[1].jobid, "3141592");
        assert_eq!(rows[1].state, "R");
        assert_eq!(rows[1].walltime_secs, Some(600));
        assert_eq!(rows[1].stime, Some(time(14, 10)));

        assert!(db.jobs(2018).unwrap().is_empty());
    }
}
