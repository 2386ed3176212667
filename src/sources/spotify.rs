use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use super::{CatalogExpander, CatalogTrack};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";
/// Upper bound on tracks pulled from one playlist/album
const MAX_TRACKS: usize = 100;

/// Spotify metadata client (client-credentials flow, no audio)
pub struct SpotifyCatalog {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogKind {
    Track,
    Playlist,
    Album,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Track {
    name: String,
    artists: Vec<Artist>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<Track>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

impl Track {
    fn into_catalog_track(self) -> Option<CatalogTrack> {
        let artist = self.artists.into_iter().next()?.name;
        Some(CatalogTrack::new(artist, self.name))
    }
}

impl SpotifyCatalog {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    /// `https://open.spotify.com/playlist/<id>?si=...` -> (Playlist, id)
    fn parse_url(raw: &str) -> Result<(CatalogKind, String)> {
        let url = Url::parse(raw).with_context(|| format!("Malformed Spotify URL: {}", raw))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        // Localised links carry a leading "intl-xx" segment
        let segments: Vec<&str> = segments
            .into_iter()
            .skip_while(|seg| seg.starts_with("intl-"))
            .collect();

        match segments.as_slice() {
            ["track", id, ..] => Ok((CatalogKind::Track, id.to_string())),
            ["playlist", id, ..] => Ok((CatalogKind::Playlist, id.to_string())),
            ["album", id, ..] => Ok((CatalogKind::Album, id.to_string())),
            _ => anyhow::bail!("Unsupported Spotify URL: {}", raw),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("🔑 Requesting Spotify access token");
        let credentials = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response: TokenResponse = self
            .client
            .post(TOKEN_URL)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", credentials))
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body("grant_type=client_credentials")
            .send()
            .await
            .context("Error requesting Spotify token")?
            .error_for_status()?
            .json()
            .await
            .context("Error parsing Spotify token")?;

        // Refresh a minute early
        let lifetime = Duration::from_secs(response.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(response.access_token)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.access_token().await?;
        self.client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Error requesting {}", url))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Error parsing {}", url))
    }

    /// Walks `next` links until the page chain ends or the cap is hit
    async fn collect_pages<T, F>(&self, first: String, mut map: F) -> Result<Vec<CatalogTrack>>
    where
        T: serde::de::DeserializeOwned,
        F: FnMut(T) -> Option<CatalogTrack>,
    {
        let mut tracks = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let page: Page<T> = self.get(&url).await?;
            tracks.extend(page.items.into_iter().filter_map(&mut map));
            if tracks.len() >= MAX_TRACKS {
                tracks.truncate(MAX_TRACKS);
                break;
            }
            next = page.next;
        }

        Ok(tracks)
    }
}

#[async_trait]
impl CatalogExpander for SpotifyCatalog {
    fn handles(&self, url: &str) -> bool {
        url.contains("open.spotify.com")
    }

    async fn expand(&self, url: &str) -> Result<Vec<CatalogTrack>> {
        let (kind, id) = Self::parse_url(url)?;
        info!("📋 Expanding Spotify {:?}: {}", kind, id);

        let tracks = match kind {
            CatalogKind::Track => {
                let track: Track = self.get(&format!("{}/tracks/{}", API_URL, id)).await?;
                track.into_catalog_track().into_iter().collect()
            }
            CatalogKind::Playlist => {
                self.collect_pages(
                    format!("{}/playlists/{}/tracks?limit=100", API_URL, id),
                    |item: PlaylistItem| item.track.and_then(Track::into_catalog_track),
                )
                .await?
            }
            CatalogKind::Album => {
                self.collect_pages(
                    format!("{}/albums/{}/tracks?limit=50", API_URL, id),
                    Track::into_catalog_track,
                )
                .await?
            }
        };

        info!("✅ {} tracks found", tracks.len());
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn urls_are_split_into_kind_and_id() {
        assert_eq!(
            SpotifyCatalog::parse_url("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc")
                .unwrap(),
            (CatalogKind::Track, "4uLU6hMCjMI75M1A2tKUQC".to_string())
        );
        assert_eq!(
            SpotifyCatalog::parse_url("https://open.spotify.com/intl-es/album/1ATL5GLyefJaxhQzSPVrLX")
                .unwrap(),
            (CatalogKind::Album, "1ATL5GLyefJaxhQzSPVrLX".to_string())
        );
        assert!(SpotifyCatalog::parse_url("https://open.spotify.com/artist/xyz").is_err());
        assert!(SpotifyCatalog::parse_url("not a url").is_err());
    }

    #[test]
    fn playlist_items_without_tracks_are_skipped() {
        let page: Page<PlaylistItem> = serde_json::from_str(
            r#"{"items":[
                {"track":{"name":"Around the World","artists":[{"name":"Daft Punk"}]}},
                {"track":null},
                {"track":{"name":"Nameless","artists":[]}}
            ],"next":null}"#,
        )
        .unwrap();

        let tracks: Vec<CatalogTrack> = page
            .items
            .into_iter()
            .filter_map(|item| item.track.and_then(Track::into_catalog_track))
            .collect();
        assert_eq!(tracks, vec![CatalogTrack::new("Daft Punk", "Around the World")]);
    }

    #[test]
    fn only_spotify_links_are_handled() {
        let catalog = SpotifyCatalog::new("id".into(), "secret".into());
        assert!(catalog.handles("https://open.spotify.com/playlist/abc"));
        assert!(!catalog.handles("https://youtu.be/abc"));
    }
}
