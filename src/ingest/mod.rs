//! Parsers for the three kinds of accounting dump, and the ingest runs
//! that load them into the databases.

pub mod account;
pub mod jobs;
pub mod storage;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

use crate::config::Config;
use crate::dataset::UsageDb;
use crate::db;

/// Usage databases opened during one ingest run, keyed by project year.
/// A single dump file can carry several projects. With an explicit
/// database path every project lands in the same file.
pub struct DbCache<'a> {
    config: &'a Config,
    override_path: Option<PathBuf>,
    open: BTreeMap<(String, i32), UsageDb>,
}

impl<'a> DbCache<'a> {
    pub fn new(config: &'a Config, override_path: Option<PathBuf>) -> Self {
        DbCache {
            config,
            override_path,
            open: BTreeMap::new(),
        }
    }

    pub fn get(&mut self, project: &str, year: i32) -> Result<&UsageDb> {
        let key = match self.override_path {
            Some(_) => (String::new(), 0),
            None => (project.to_string(), year),
        };
        if !self.open.contains_key(&key) {
            let db = match &self.override_path {
                Some(path) => db::usage_at(path)?,
                None => db::usage(self.config, project, year)?,
            };
            self.open.insert(key.clone(), db);
        }
        Ok(&self.open[&key])
    }
}
