//! `tubedl config` – show where the config lives and what is in effect.

use anyhow::Result;
use tubedl_core::config::{self, TubedlConfig};
use tubedl_core::logging;

pub fn run_config(cfg: &TubedlConfig) -> Result<()> {
    println!("config file:  {}", config::config_path()?.display());
    match logging::log_file_path() {
        Ok(path) => println!("log file:     {}", path.display()),
        Err(_) => println!("log file:     (stderr)"),
    }
    println!("download dir: {}", cfg.resolved_download_dir().display());
    println!("{}", serde_json::to_string_pretty(cfg)?);
    Ok(())
}
