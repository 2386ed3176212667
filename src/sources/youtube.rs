use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{is_youtube_url, SourceResolver};
use crate::audio::song::{ResolvedTrack, TrackInfo};

/// Resolves queries and downloads audio through the `yt-dlp` binary
pub struct YtDlpResolver {
    audio_format: String,
    audio_quality: String,
}

/// Subset of the `--dump-json` document we care about
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    duration: Option<f64>,
    view_count: Option<u64>,
    like_count: Option<u64>,
    uploader: Option<String>,
    upload_date: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
}

impl YtDlpInfo {
    fn into_track_info(self) -> TrackInfo {
        TrackInfo {
            title: self.title,
            duration: self.duration.map(|d| d.round() as u64).unwrap_or(0),
            view_count: self.view_count.unwrap_or(0),
            like_count: self.like_count.unwrap_or(0),
            uploader: self.uploader,
            upload_date: self
                .upload_date
                .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y%m%d").ok()),
            thumbnail: self.thumbnail,
            original_url: self.original_url.or(self.webpage_url).unwrap_or_default(),
        }
    }
}

impl YtDlpResolver {
    pub fn new(audio_format: impl Into<String>, audio_quality: impl Into<String>) -> Self {
        Self {
            audio_format: audio_format.into(),
            audio_quality: audio_quality.into(),
        }
    }

    /// Free text becomes a single-result search, URLs pass through
    fn target(query: &str) -> String {
        if is_youtube_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }

    fn parse_first(stdout: &[u8]) -> Result<TrackInfo> {
        let stdout = String::from_utf8_lossy(stdout);
        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("yt-dlp returned no results"))?;

        let info: YtDlpInfo =
            serde_json::from_str(line).context("Error parsing yt-dlp response")?;
        Ok(info.into_track_info())
    }

    /// Updates yt-dlp (run periodically from maintenance)
    pub async fn update_ytdlp() -> Result<()> {
        info!("🔄 Updating yt-dlp...");

        let output = Command::new("yt-dlp").arg("-U").output().await?;

        if output.status.success() {
            info!("✅ yt-dlp updated");
        } else {
            warn!(
                "⚠️ Could not update yt-dlp: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(())
    }
}

#[async_trait]
impl SourceResolver for YtDlpResolver {
    async fn probe(&self, query: &str) -> Result<TrackInfo> {
        let target = Self::target(query);
        debug!("📊 Probing: {}", target);

        let output = Command::new("yt-dlp")
            .args([
                "--no-playlist",
                "--dump-json",
                "--skip-download",
                "--no-warnings",
                target.as_str(),
            ])
            .output()
            .await
            .context("Error running yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error);
        }

        Self::parse_first(&output.stdout)
    }

    async fn download(&self, query: &str, dir: &Path, stem: &str) -> Result<ResolvedTrack> {
        let target = Self::target(query);
        let template = dir.join(format!("{}.%(ext)s", stem));
        let path: PathBuf = dir.join(format!("{}.{}", stem, self.audio_format));

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Error creating {}", dir.display()))?;

        info!("⬇️ Downloading: {}", target);

        let output = Command::new("yt-dlp")
            .args([
                "--no-playlist",
                "--no-warnings",
                "-f",
                "bestaudio/best",
                "-x",
                "--audio-format",
                self.audio_format.as_str(),
                "--audio-quality",
                self.audio_quality.as_str(),
                "--dump-json",
                "--no-simulate",
                "-o",
            ])
            .arg(&template)
            .arg(&target)
            .output()
            .await
            .context("Error running yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error);
        }

        let info = Self::parse_first(&output.stdout)?;

        tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Downloaded file missing: {}", path.display()))?;

        info!("✅ Downloaded {} -> {}", info.title, path.display());
        Ok(ResolvedTrack { path, info })
    }
}
