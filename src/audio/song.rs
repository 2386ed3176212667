use chrono::NaiveDate;
use num_format::{Locale, ToFormattedString};
use serenity::model::id::{ChannelId, MessageId, UserId};
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

/// Reference to a chat message owned by the messaging layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl MessageRef {
    pub fn new(channel_id: ChannelId, message_id: MessageId) -> Self {
        Self {
            channel_id,
            message_id,
        }
    }
}

/// Who asked for a song and where the ask came from
#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    pub user_id: UserId,
    /// The command message; acknowledgements and replies attach to it
    pub origin: MessageRef,
    /// Voice channel the requester was in when the command was issued
    pub voice_channel: Option<ChannelId>,
}

/// A pending, unresolved ask sitting in the download queue
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub query: String,
    pub requester: Requester,
    /// Expanded from a catalog playlist/album/track: lyrics are looked up
    /// and the query is biased towards audio-only uploads.
    pub from_catalog: bool,
}

impl PlaybackRequest {
    pub fn new(query: impl Into<String>, requester: Requester) -> Self {
        Self {
            query: query.into(),
            requester,
            from_catalog: false,
        }
    }

    pub fn from_catalog(query: impl Into<String>, requester: Requester) -> Self {
        Self {
            query: query.into(),
            requester,
            from_catalog: true,
        }
    }

    /// Query string actually handed to the resolver
    pub fn search_query(&self) -> String {
        if self.from_catalog {
            format!("{} audio", self.query)
        } else {
            self.query.clone()
        }
    }

    /// Two requests are the same ask when query and origin message match
    pub fn same_ask(&self, other: &PlaybackRequest) -> bool {
        self.query == other.query && self.requester.origin == other.requester.origin
    }
}

/// Metadata reported by the source resolver
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackInfo {
    pub title: String,
    /// Seconds
    pub duration: u64,
    pub view_count: u64,
    pub like_count: u64,
    pub uploader: Option<String>,
    pub upload_date: Option<NaiveDate>,
    pub thumbnail: Option<String>,
    pub original_url: String,
}

/// Output of a successful download: a local file plus its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub path: PathBuf,
    pub info: TrackInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SongId(u64);

impl SongId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SongId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// One resolved, playable track
#[derive(Debug, Clone)]
pub struct Song {
    id: SongId,
    path: PathBuf,
    pub info: TrackInfo,
    pub requester: Requester,
    lyrics: Option<String>,
    current_seconds: u64,
    /// Messages deleted once the song is no longer current
    pub transient: Vec<MessageRef>,
    /// The now-playing message, edited on every tick
    pub now_playing: Option<MessageRef>,
}

impl Song {
    pub fn new(track: ResolvedTrack, requester: Requester, lyrics: Option<String>) -> Self {
        Self {
            id: SongId::next(),
            path: track.path,
            info: track.info,
            requester,
            lyrics,
            current_seconds: 0,
            transient: Vec::new(),
            now_playing: None,
        }
    }

    pub fn id(&self) -> SongId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn duration(&self) -> u64 {
        self.info.duration
    }

    pub fn lyrics(&self) -> Option<&str> {
        self.lyrics.as_deref()
    }

    pub fn current_seconds(&self) -> u64 {
        self.current_seconds
    }

    /// Moves the playback offset forward, never past the duration
    pub fn advance(&mut self, seconds: u64) {
        self.set_progress(self.current_seconds.saturating_add(seconds));
    }

    pub fn set_progress(&mut self, seconds: u64) {
        self.current_seconds = seconds.min(self.info.duration);
    }

    pub fn reset_progress(&mut self) {
        self.current_seconds = 0;
    }

    /// Takes every transient message, leaving the list empty
    pub fn drain_transient(&mut self) -> Vec<MessageRef> {
        self.now_playing = None;
        std::mem::take(&mut self.transient)
    }

    pub fn formatted_views(&self) -> String {
        self.info.view_count.to_formatted_string(&Locale::en)
    }

    pub fn formatted_likes(&self) -> String {
        self.info.like_count.to_formatted_string(&Locale::en)
    }

    /// Human age of the upload relative to `today` ("3 years ago", "today")
    pub fn time_since_upload(&self, today: NaiveDate) -> String {
        let Some(uploaded) = self.info.upload_date else {
            return "N/A".to_string();
        };

        let days = (today - uploaded).num_days();
        let plural = |n: i64| if n > 1 { "s" } else { "" };

        if days >= 365 {
            let years = days / 365;
            format!("{} year{} ago", years, plural(years))
        } else if days >= 30 {
            let months = days / 30;
            format!("{} month{} ago", months, plural(months))
        } else if days > 0 {
            format!("{} day{} ago", days, plural(days))
        } else {
            "today".to_string()
        }
    }

    /// `█████▒▒▒ **1:05/3:20** (32.5%)`
    pub fn progress_bar(&self, bar_length: usize) -> String {
        let duration = self.info.duration;
        let current = self.current_seconds.min(duration);

        let (filled, percentage) = if duration == 0 {
            (0, 0.0)
        } else {
            (
                (bar_length as u64 * current / duration) as usize,
                current as f64 / duration as f64 * 100.0,
            )
        };

        format!(
            "{}{} **{}/{}** ({:.1}%)",
            "█".repeat(filled),
            "▒".repeat(bar_length - filled),
            format_clock(current),
            format_clock(duration),
            percentage
        )
    }
}

/// `m:ss`
pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn requester(user: u64, message: u64) -> Requester {
        Requester {
            user_id: UserId::new(user),
            origin: MessageRef::new(ChannelId::new(10), MessageId::new(message)),
            voice_channel: Some(ChannelId::new(20)),
        }
    }

    pub fn track(title: &str, duration: u64) -> ResolvedTrack {
        ResolvedTrack {
            path: PathBuf::from(format!("{}.mp3", title.replace(' ', "_"))),
            info: TrackInfo {
                title: title.to_string(),
                duration,
                view_count: 1_234_567,
                like_count: 4_321,
                uploader: Some("Uploader".to_string()),
                upload_date: NaiveDate::from_ymd_opt(2020, 1, 1),
                thumbnail: None,
                original_url: format!("https://www.youtube.com/watch?v={}", title.len()),
            },
        }
    }

    pub fn song(title: &str, duration: u64) -> Song {
        Song::new(track(title, duration), requester(1, 100), None)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn progress_is_clamped_to_duration() {
        let mut song = song("Short", 10);
        song.advance(8);
        song.advance(8);
        assert_eq!(song.current_seconds(), 10);

        song.set_progress(500);
        assert_eq!(song.current_seconds(), 10);
    }

    #[test]
    fn progress_bar_renders_fill_and_clock() {
        let mut song = song("Bar", 200);
        song.set_progress(100);
        assert_eq!(
            song.progress_bar(10),
            "█████▒▒▒▒▒ **1:40/3:20** (50.0%)"
        );
    }

    #[test]
    fn progress_bar_handles_zero_duration() {
        let song = song("Live", 0);
        assert_eq!(song.progress_bar(4), "▒▒▒▒ **0:00/0:00** (0.0%)");
    }

    #[test]
    fn catalog_requests_are_biased_to_audio() {
        let plain = PlaybackRequest::new("daft punk", requester(1, 1));
        let catalog = PlaybackRequest::from_catalog("Daft Punk - One More Time", requester(1, 1));
        assert_eq!(plain.search_query(), "daft punk");
        assert_eq!(catalog.search_query(), "Daft Punk - One More Time audio");
    }

    #[test]
    fn upload_age_is_human_readable() {
        let song = song("Old", 100);
        let today = NaiveDate::from_ymd_opt(2023, 3, 1).unwrap();
        assert_eq!(song.time_since_upload(today), "3 years ago");
        let same_day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(song.time_since_upload(same_day), "today");
        let next_week = NaiveDate::from_ymd_opt(2020, 1, 8).unwrap();
        assert_eq!(song.time_since_upload(next_week), "7 days ago");
    }

    #[test]
    fn views_use_thousands_separators() {
        assert_eq!(song("Views", 1).formatted_views(), "1,234,567");
    }

    #[test]
    fn songs_get_distinct_ids() {
        assert_ne!(song("A", 1).id(), song("A", 1).id());
    }
}
