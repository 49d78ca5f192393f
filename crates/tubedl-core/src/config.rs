use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::MediaSettings;

/// Default number of downloads allowed to run at once.
pub const DEFAULT_CAPACITY: usize = 4;

/// Global configuration loaded from `~/.config/tubedl/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TubedlConfig {
    /// Directory new jobs are saved to. `None` means `~/Desktop` (or the current directory).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Maximum number of downloads running at the same time.
    pub max_concurrent_downloads: usize,
    /// Path or name of the yt-dlp executable.
    pub yt_dlp_path: PathBuf,
    /// Minimum interval between two progress events of the same job and phase.
    pub progress_interval_ms: u64,
    /// Optional wall-clock limit per job (None = no limit).
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    /// Container and codec choices passed to the fetcher.
    #[serde(default)]
    pub media: MediaSettings,
}

impl Default for TubedlConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            max_concurrent_downloads: DEFAULT_CAPACITY,
            yt_dlp_path: PathBuf::from("yt-dlp"),
            progress_interval_ms: 100,
            job_timeout_secs: None,
            media: MediaSettings::default(),
        }
    }
}

impl TubedlConfig {
    /// Download directory with the default applied.
    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(default_download_dir)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

/// `~/Desktop` when it exists, otherwise the current working directory.
pub fn default_download_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        let desktop = Path::new(&home).join("Desktop");
        if desktop.is_dir() {
            return desktop;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("tubedl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<TubedlConfig> {
    load_or_init_at(&config_path()?)
}

/// Same as [`load_or_init`] with an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<TubedlConfig> {
    if !path.exists() {
        let default_cfg = TubedlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TubedlConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
