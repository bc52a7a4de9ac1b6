use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Directory holding the per-project databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Path of the jobs database. Defaults to `jobs.db` under `data_dir`.
    pub jobs_db: Option<PathBuf>,

    /// System name assumed for compute-attached storage points.
    #[serde(default = "default_compute_system")]
    pub compute_system: String,

    /// System name assumed for globally mounted storage points.
    #[serde(default = "default_global_system")]
    pub global_system: String,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Storage points renamed by the site. Scan dumps still carry the
    /// old gdata1 name while the mount point is gdata1a.
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            aliases: default_aliases(),
        }
    }
}

fn default_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([("gdata1".to_string(), "gdata1a".to_string())])
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            jobs_db: None,
            compute_system: default_compute_system(),
            global_system: default_global_system(),
            storage: StorageConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    match dotenvy::var("HPCACCT_DATA_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from("."),
    }
}

fn default_compute_system() -> String {
    "raijin".to_string()
}

fn default_global_system() -> String {
    "global".to_string()
}

impl Config {
    /// Path of the usage database for one project year.
    pub fn usage_db_path(&self, project: &str, year: i32) -> PathBuf {
        self.data_dir.join(format!("usage_{project}_{year}.db"))
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        match &self.jobs_db {
            Some(path) => path.clone(),
            None => self.data_dir.join("jobs.db"),
        }
    }

    /// Apply any site alias to a storage point name.
    pub fn resolve_point(&self, point: &str) -> String {
        match self.storage.aliases.get(point) {
            Some(renamed) => renamed.clone(),
            None => point.to_string(),
        }
    }

    /// Which system a storage point belongs to. Globally mounted points
    /// are named `gdata*`, everything else hangs off the compute system.
    pub fn system_for_point(&self, point: &str) -> &str {
        if point.starts_with("gdata") {
            &self.global_system
        } else {
            &self.compute_system
        }
    }
}

pub fn load(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).context("Failed to read config")?;
    let config = toml::from_str(&data).context("Failed to parse config")?;
    Ok(config)
}

/// Load the config named on the command line, or `hpcacct.toml` if present,
/// or fall back to the built-in defaults.
pub fn load_or_default(cli_path: Option<&Path>) -> Result<Config> {
    match cli_path {
        Some(path) => load(path),
        None => {
            let path = Path::new("hpcacct.toml");
            if path.exists() {
                load(path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.compute_system, "raijin");
        assert_eq!(config.global_system, "global");
        assert_eq!(config.jobs_db_path(), config.data_dir.join("jobs.db"));
        assert_eq!(
            config.usage_db_path("w35", 2019),
            config.data_dir.join("usage_w35_2019.db")
        );
        // the renamed gdata1 mount is known out of the box
        assert_eq!(config.resolve_point("gdata1"), "gdata1a");
    }

    #[test]
    fn aliases() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/hpcacct"
            compute_system = "gadi"

            [storage.aliases]
            gdata1 = "gdata1a"
            "#,
        )
        .unwrap();

        assert_eq!(config.resolve_point("gdata1"), "gdata1a");
        assert_eq!(config.resolve_point("short"), "short");
        assert_eq!(config.system_for_point("gdata1a"), "global");
        assert_eq!(config.system_for_point("short"), "gadi");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/hpcacct"));
    }
}
