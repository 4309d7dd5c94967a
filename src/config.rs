//! Agent configuration and project file layout.

use crate::error::Result;
use crate::llm::Llm;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_VIZ_LIBRARY: &str = "charts";
pub const CHART_FILE_NAME: &str = "temp_chart.png";

/// Recognized agent options. `llm` is resolved at agent construction:
/// either injected here or built from the environment. `save_logs`
/// appends one line per turn to `FileManager::log_path`; `verbose` raises
/// the rendered prompt to info-level tracing.
#[derive(Clone)]
pub struct Config {
    pub save_logs: bool,
    pub verbose: bool,
    pub enable_cache: bool,
    pub max_retries: usize,
    pub direct_sql: bool,
    pub data_viz_library: String,
    pub llm: Option<Arc<dyn Llm>>,
    pub file_manager: FileManager,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_logs: true,
            verbose: false,
            enable_cache: true,
            max_retries: DEFAULT_MAX_RETRIES,
            direct_sql: false,
            data_viz_library: DEFAULT_VIZ_LIBRARY.to_string(),
            llm: None,
            file_manager: FileManager::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("save_logs", &self.save_logs)
            .field("verbose", &self.verbose)
            .field("enable_cache", &self.enable_cache)
            .field("max_retries", &self.max_retries)
            .field("direct_sql", &self.direct_sql)
            .field("data_viz_library", &self.data_viz_library)
            .field("llm", &self.llm.as_ref().map(|l| l.type_name().to_string()))
            .field("file_manager", &self.file_manager)
            .finish()
    }
}

lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Config> = RwLock::new(Config::default());
}

/// Process-wide config singleton. Intended to be configured before any
/// agent is constructed; later changes only affect newly created agents.
pub struct ConfigManager;

impl ConfigManager {
    pub fn get() -> Config {
        GLOBAL_CONFIG.read().expect("config lock poisoned").clone()
    }

    pub fn set(config: Config) {
        *GLOBAL_CONFIG.write().expect("config lock poisoned") = config;
    }

    pub fn update<F: FnOnce(&mut Config)>(f: F) {
        let mut guard = GLOBAL_CONFIG.write().expect("config lock poisoned");
        f(&mut guard);
    }
}

/// Resolves the on-disk layout of a project:
/// `<root>/cache/cache_db`, `<root>/cache/<column-hash>.parquet`,
/// `<root>/exports/charts/temp_chart.png`, `<root>/logs/tabletalk.log`.
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl Default for FileManager {
    fn default() -> Self {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { root }
    }
}

impl FileManager {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_dir().join("cache_db")
    }

    pub fn head_cache_path(&self, column_hash: &str) -> PathBuf {
        self.cache_dir().join(format!("{}.parquet", column_hash))
    }

    pub fn charts_dir(&self) -> PathBuf {
        self.root.join("exports").join("charts")
    }

    pub fn chart_path(&self) -> PathBuf {
        self.charts_dir().join(CHART_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join("tabletalk.log")
    }

    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(self.cache_dir())?;
        std::fs::create_dir_all(self.charts_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!(config.save_logs);
        assert!(!config.verbose);
        assert!(config.enable_cache);
        assert_eq!(config.max_retries, 3);
        assert!(!config.direct_sql);
        assert_eq!(config.data_viz_library, "charts");
    }

    #[test]
    fn file_manager_layout() {
        let fm = FileManager::new("/tmp/project");
        assert_eq!(fm.cache_db_path(), PathBuf::from("/tmp/project/cache/cache_db"));
        assert_eq!(
            fm.chart_path(),
            PathBuf::from("/tmp/project/exports/charts/temp_chart.png")
        );
        assert!(fm
            .head_cache_path("abc123")
            .ends_with("cache/abc123.parquet"));
        assert_eq!(fm.log_path(), PathBuf::from("/tmp/project/logs/tabletalk.log"));
    }
}
