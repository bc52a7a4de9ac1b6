//! Parser for PBS `qstat -f -F json` dumps.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Datelike;
use log::info;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::db;
use crate::model::Job;
use crate::util::{parse_pbs_timestamp, parse_size, strip_tags, walltime_to_seconds};

/// One job as it appears in the dump, before normalisation.
#[derive(Debug, Deserialize)]
struct JobInfo {
    #[serde(rename = "Job_Name")]
    job_name: String,
    #[serde(rename = "Job_Owner")]
    job_owner: String,
    job_state: String,
    queue: String,
    project: String,
    ctime: String,
    qtime: String,
    mtime: Option<String>,
    stime: Option<String>,
    #[serde(rename = "Resource_List")]
    resource_list: Resources,
    resources_used: Option<ResourcesUsed>,
    executable: Option<String>,
    argument_list: Option<String>,
    #[serde(rename = "Submit_arguments")]
    submit_arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resources {
    walltime: String,
    jobprio: Option<i64>,
    ncpus: Option<i64>,
    mem: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourcesUsed {
    walltime: Option<String>,
    cput: Option<String>,
    mem: Option<String>,
}

/// Ingest qstat dumps into the jobs database. Job dumps are taken from a
/// rolling queue snapshot, so they are not archived.
pub fn run(config: &Config, inputs: &[PathBuf], database: Option<PathBuf>) -> Result<()> {
    let db = match database {
        Some(path) => db::jobs_at(&path)?,
        None => db::jobs(config)?,
    };
    for input in inputs {
        let text = fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?;
        let jobs = parse(&text).with_context(|| format!("Failed to parse {}", input.display()))?;
        for job in &jobs {
            db.add_job(job)?;
        }
        info!("{}: {} jobs", input.display(), jobs.len());
    }
    Ok(())
}

pub fn parse(text: &str) -> Result<Vec<Job>> {
    let mut value: Value = serde_json::from_str(text).context("not valid JSON")?;
    // qstat wraps the jobs in a `Jobs` key; test dumps may carry the bare map
    let jobs = match value.get_mut("Jobs") {
        Some(jobs) => jobs.take(),
        None => value,
    };
    let jobs: BTreeMap<String, JobInfo> =
        serde_json::from_value(jobs).context("not a qstat job dump")?;
    jobs.iter().map(|(id, info)| convert(id, info)).collect()
}

fn convert(jobid: &str, info: &JobInfo) -> Result<Job> {
    // strip the server suffix from ids like 1234567.r-man2
    let jobid = jobid.split_once('.').map_or(jobid, |(id, _)| id);

    let qtime = parse_pbs_timestamp(&info.qtime)
        .with_context(|| format!("job {jobid}: bad qtime"))?;
    let ctime = parse_pbs_timestamp(&info.ctime)
        .with_context(|| format!("job {jobid}: bad ctime"))?;
    let stime = info.stime.as_deref().map(parse_pbs_timestamp).transpose()?;
    let mtime = info.mtime.as_deref().map(parse_pbs_timestamp).transpose()?;

    let username = match info.job_owner.split_once('@') {
        Some((user, _)) => user,
        None => info.job_owner.as_str(),
    };

    let resources = &info.resource_list;
    let max_walltime_secs = walltime_to_seconds(&resources.walltime)
        .with_context(|| format!("job {jobid}: bad walltime request"))?;
    let max_mem_bytes = resources.mem.as_deref().map(parse_size).transpose()?;

    let (walltime_secs, cputime_secs, mem_bytes) = match &info.resources_used {
        Some(used) => (
            used.walltime
                .as_deref()
                .map(walltime_to_seconds)
                .transpose()?,
            used.cput.as_deref().map(walltime_to_seconds).transpose()?,
            used.mem.as_deref().map(parse_size).transpose()?,
        ),
        None => (None, None, None),
    };

    let executable = info
        .executable
        .as_deref()
        .map(strip_tags)
        .filter(|exe| !exe.is_empty());
    let mut arguments = info
        .argument_list
        .as_deref()
        .map(strip_tags)
        .unwrap_or_default();
    if let Some(submitted) = &info.submit_arguments {
        arguments.push_str(submitted);
    }

    Ok(Job {
        year: qtime.year(),
        jobid: jobid.to_string(),
        project: info.project.clone(),
        username: username.to_string(),
        queue: info.queue.clone(),
        state: info.job_state.clone(),
        jobname: info.job_name.clone(),
        priority: resources.jobprio,
        executable,
        arguments: (!arguments.is_empty()).then_some(arguments),
        ctime,
        mtime,
        qtime,
        stime,
        max_walltime_secs: Some(max_walltime_secs),
        max_mem_bytes,
        ncpus: resources.ncpus,
        mem_bytes,
        walltime_secs,
        cputime_secs,
    })
}
