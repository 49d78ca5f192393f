//! `tubedl info <url>` – resolve metadata and list the offered streams.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tubedl_core::config::TubedlConfig;
use tubedl_core::fetch::{MediaFetchClient, StreamInfo, StreamKind, YtDlpClient};
use tubedl_core::sanitize;

pub async fn run_info(cfg: &TubedlConfig, url: &str) -> Result<()> {
    let client = YtDlpClient::new(cfg.yt_dlp_path.clone());
    let meta = client
        .resolve_metadata(url, &CancellationToken::new())
        .await
        .with_context(|| format!("resolve {}", url))?;

    println!("title:     {}", meta.title);
    if let Some(id) = &meta.id {
        println!("id:        {}", id);
    }
    println!(
        "file name: {}",
        sanitize::file_stem(&meta.title, meta.id.as_deref())
    );
    if meta.streams.is_empty() {
        println!("No streams listed.");
        return Ok(());
    }
    println!("{:<12} {:<6} {:<8} {}", "FORMAT", "EXT", "KIND", "QUALITY");
    for s in &meta.streams {
        println!(
            "{:<12} {:<6} {:<8} {}",
            s.format_id,
            s.ext,
            kind_label(s.kind),
            quality_label(s)
        );
    }
    Ok(())
}

fn kind_label(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Combined => "av",
        StreamKind::VideoOnly => "video",
        StreamKind::AudioOnly => "audio",
    }
}

fn quality_label(s: &StreamInfo) -> String {
    match (s.height, s.abr) {
        (Some(h), Some(abr)) => format!("{}p {:.0}k", h, abr),
        (Some(h), None) => format!("{}p", h),
        (None, Some(abr)) => format!("{:.0}k", abr),
        (None, None) => "-".to_string(),
    }
}
