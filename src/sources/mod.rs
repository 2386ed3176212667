pub mod genius;
pub mod spotify;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::{path::Path, sync::OnceLock};

use crate::audio::song::{ResolvedTrack, TrackInfo};

pub use genius::GeniusLyrics;
pub use spotify::SpotifyCatalog;
pub use youtube::YtDlpResolver;

/// Turns a free-text query or a direct URL into playable audio
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Metadata only, nothing written to disk. Used to enforce the
    /// duration policy before committing to a download.
    async fn probe(&self, query: &str) -> Result<TrackInfo>;

    /// Downloads the best audio for `query` to `dir/<stem>.<ext>`
    async fn download(&self, query: &str, dir: &Path, stem: &str) -> Result<ResolvedTrack>;
}

/// Expands a streaming-catalog URL into ordered track queries
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogExpander: Send + Sync {
    fn handles(&self, url: &str) -> bool;

    async fn expand(&self, url: &str) -> Result<Vec<CatalogTrack>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LyricsLookup: Send + Sync {
    /// `Ok(None)` when no lyrics exist for the song
    async fn find(&self, title: &str, artist: &str) -> Result<Option<String>>;
}

/// One entry of an expanded catalog playlist/album
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub artist: String,
    pub title: String,
}

impl CatalogTrack {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }

    /// `artist - title`, the shape the resolver searches for
    pub fn query(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Splits an `artist - title` catalog query back into `(title, artist)`
pub fn split_catalog_query(query: &str) -> (&str, &str) {
    match query.split_once(" - ") {
        Some((artist, title)) => (title.trim(), artist.trim()),
        None => (query.trim(), ""),
    }
}

/// How a raw `play` argument should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Spotify (or other catalog) URL, expanded before queueing
    Catalog,
    /// YouTube playlist URL, not supported
    VideoPlaylist,
    /// Direct YouTube video URL
    VideoUrl,
    /// Anything else is searched for
    Search,
}

pub fn classify_query(query: &str) -> QueryKind {
    if query.contains("spotify.com") {
        QueryKind::Catalog
    } else if query.contains("list=") {
        QueryKind::VideoPlaylist
    } else if is_youtube_url(query) {
        QueryKind::VideoUrl
    } else {
        QueryKind::Search
    }
}

pub fn is_youtube_url(url: &str) -> bool {
    static YOUTUBE: OnceLock<Regex> = OnceLock::new();
    YOUTUBE
        .get_or_init(|| {
            Regex::new(
                r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/)",
            )
            .expect("static regex")
        })
        .is_match(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_youtube_url_detection() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://music.youtube.com/watch?v=test"));
        assert!(!is_youtube_url("https://example.com/video"));
        assert!(!is_youtube_url("never gonna give you up"));
    }

    #[test]
    fn queries_are_classified() {
        assert_eq!(
            classify_query("https://open.spotify.com/album/abc?si=1"),
            QueryKind::Catalog
        );
        assert_eq!(
            classify_query("https://www.youtube.com/watch?v=x&list=PL123"),
            QueryKind::VideoPlaylist
        );
        assert_eq!(
            classify_query("https://youtu.be/dQw4w9WgXcQ"),
            QueryKind::VideoUrl
        );
        assert_eq!(classify_query("daft punk one more time"), QueryKind::Search);
    }

    #[test]
    fn catalog_queries_round_trip_artist_and_title() {
        let track = CatalogTrack::new("Daft Punk", "One More Time");
        assert_eq!(track.query(), "Daft Punk - One More Time");
        assert_eq!(
            split_catalog_query(&track.query()),
            ("One More Time", "Daft Punk")
        );
        assert_eq!(split_catalog_query("lonely title"), ("lonely title", ""));
    }
}
