//! CLI for the tubedl media downloader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tubedl_core::config;

use commands::{run_config, run_get, run_info, GetArgs};

/// Top-level CLI for tubedl.
#[derive(Debug, Parser)]
#[command(name = "tubedl")]
#[command(about = "tubedl: download videos and audio with bounded concurrency", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs as a single batch.
    Get {
        /// Media page URLs.
        urls: Vec<String>,

        /// Save the audio track only (transcoded per the [media] config).
        #[arg(long)]
        audio: bool,

        /// Read additional URLs from a file, one per line ("-" for stdin).
        #[arg(long, short = 'i', value_name = "FILE")]
        input: Option<PathBuf>,

        /// Save into this directory instead of the configured one.
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Run up to N downloads at once (default from config).
        #[arg(long, short = 'j', value_name = "N")]
        jobs: Option<usize>,

        /// Print scheduler events as JSON lines instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show title and available streams of a URL without downloading.
    Info {
        /// Media page URL.
        url: String,
    },

    /// Show the configuration file location and effective settings.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get {
                urls,
                audio,
                input,
                dir,
                jobs,
                json,
            } => {
                let args = GetArgs {
                    urls,
                    audio,
                    input,
                    dir,
                    jobs,
                    json,
                };
                run_get(&cfg, args).await?;
            }
            CliCommand::Info { url } => run_info(&cfg, &url).await?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
