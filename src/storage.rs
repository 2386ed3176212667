use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{collections::HashMap, path::PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::audio::song::TrackInfo;

/// Fire-and-forget play statistics
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn record(&self, info: &TrackInfo, requester: UserId) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayCount {
    pub url: String,
    pub title: String,
    pub plays: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestCount {
    pub user_id: UserId,
    pub requests: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatisticsFile {
    /// Keyed by source URL
    songs: HashMap<String, PlayCount>,
    /// Keyed by user id
    requests: HashMap<u64, u64>,
}

/// Statistics stored as a single JSON document under the data directory
pub struct JsonStatistics {
    path: PathBuf,
    data: Mutex<StatisticsFile>,
}

impl JsonStatistics {
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;
        let path = data_dir.join("statistics.json");

        let data = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Corrupt statistics file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatisticsFile::default(),
            Err(e) => return Err(e.into()),
        };

        info!("📁 Statistics loaded from {}", path.display());
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Top `limit` songs by play count, ties broken by title
    pub async fn most_played(&self, limit: usize) -> Vec<PlayCount> {
        let data = self.data.lock().await;
        let mut songs: Vec<PlayCount> = data.songs.values().cloned().collect();
        songs.sort_by(|a, b| b.plays.cmp(&a.plays).then_with(|| a.title.cmp(&b.title)));
        songs.truncate(limit);
        songs
    }

    /// Top `limit` requesters, ties broken by user id
    pub async fn most_requested(&self, limit: usize) -> Vec<RequestCount> {
        let data = self.data.lock().await;
        let mut users: Vec<RequestCount> = data
            .requests
            .iter()
            .map(|(id, requests)| RequestCount {
                user_id: UserId::new(*id),
                requests: *requests,
            })
            .collect();
        users.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.user_id.cmp(&b.user_id)));
        users.truncate(limit);
        users
    }

    /// Writes to a sibling temp file first so a crash never leaves half a document
    async fn save(&self, data: &StatisticsFile) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("💾 Statistics saved");
        Ok(())
    }
}

#[async_trait]
impl StatisticsSink for JsonStatistics {
    async fn record(&self, info: &TrackInfo, requester: UserId) -> Result<()> {
        if info.original_url.is_empty() {
            warn!("⚠️ Not recording {} without a source URL", info.title);
            return Ok(());
        }

        let mut data = self.data.lock().await;
        data.songs
            .entry(info.original_url.clone())
            .and_modify(|entry| {
                entry.plays += 1;
                entry.title = info.title.clone();
            })
            .or_insert_with(|| PlayCount {
                url: info.original_url.clone(),
                title: info.title.clone(),
                plays: 1,
            });
        *data.requests.entry(requester.get()).or_insert(0) += 1;

        self.save(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn info(title: &str, url: &str) -> TrackInfo {
        TrackInfo {
            title: title.to_string(),
            original_url: url.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn plays_and_requests_are_ranked() {
        let dir = tempdir().unwrap();
        let stats = JsonStatistics::open(dir.path().to_path_buf()).await.unwrap();

        let a = info("Around the World", "https://youtu.be/a");
        let b = info("Harder Better", "https://youtu.be/b");
        stats.record(&a, UserId::new(1)).await.unwrap();
        stats.record(&a, UserId::new(2)).await.unwrap();
        stats.record(&b, UserId::new(2)).await.unwrap();

        let played = stats.most_played(5).await;
        assert_eq!(
            played.iter().map(|p| (p.title.as_str(), p.plays)).collect::<Vec<_>>(),
            vec![("Around the World", 2), ("Harder Better", 1)]
        );

        assert_eq!(
            stats.most_requested(1).await,
            vec![RequestCount {
                user_id: UserId::new(2),
                requests: 2
            }]
        );
    }

    #[tokio::test]
    async fn statistics_survive_reopening() {
        let dir = tempdir().unwrap();
        {
            let stats = JsonStatistics::open(dir.path().to_path_buf()).await.unwrap();
            stats
                .record(&info("One More Time", "https://youtu.be/omt"), UserId::new(9))
                .await
                .unwrap();
        }

        let reopened = JsonStatistics::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reopened.most_played(5).await[0].plays, 1);
        assert_eq!(reopened.most_requested(5).await[0].user_id, UserId::new(9));
    }

    #[tokio::test]
    async fn songs_without_url_are_skipped() {
        let dir = tempdir().unwrap();
        let stats = JsonStatistics::open(dir.path().to_path_buf()).await.unwrap();
        stats.record(&info("Live", ""), UserId::new(1)).await.unwrap();
        assert!(stats.most_played(5).await.is_empty());
        assert!(stats.most_requested(5).await.is_empty());
    }
}
