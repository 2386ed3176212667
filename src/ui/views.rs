use chrono::NaiveDate;

use crate::audio::song::Song;

const PROGRESS_BAR_LENGTH: usize = 30;

/// Everything the now-playing message shows
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingView {
    pub title: String,
    pub url: String,
    pub uploader: String,
    pub details: String,
    pub progress: String,
    pub has_lyrics: bool,
    pub thumbnail: Option<String>,
}

impl NowPlayingView {
    pub fn from_song(song: &Song, today: NaiveDate) -> Self {
        Self {
            title: song.title().to_string(),
            url: song.info.original_url.clone(),
            uploader: song
                .info
                .uploader
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            details: format!(
                "{}\n{} views • {} likes\nRequested by <@{}>",
                song.time_since_upload(today),
                song.formatted_views(),
                song.formatted_likes(),
                song.requester.user_id
            ),
            progress: song.progress_bar(PROGRESS_BAR_LENGTH),
            has_lyrics: song.lyrics().is_some(),
            thumbnail: song.info.thumbnail.clone(),
        }
    }

    pub fn footer(&self) -> &'static str {
        if self.has_lyrics {
            "Use the lyrics command to get the lyrics"
        } else {
            "Lyrics are only available for spotify songs"
        }
    }
}

/// Playlist preview: a bounded list of titles plus the download backlog
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistView {
    pub titles: Vec<String>,
    /// Songs beyond the display cap
    pub hidden: usize,
    pub pending_downloads: usize,
    pub loop_enabled: bool,
    pub shuffle: bool,
}

impl PlaylistView {
    pub fn build<'a>(
        songs: impl Iterator<Item = &'a Song>,
        pending_downloads: usize,
        limit: usize,
        loop_enabled: bool,
        shuffle: bool,
    ) -> Self {
        let mut titles = Vec::new();
        let mut hidden = 0;
        for song in songs {
            if titles.len() < limit {
                titles.push(song.title().to_string());
            } else {
                hidden += 1;
            }
        }

        Self {
            titles,
            hidden,
            pending_downloads,
            loop_enabled,
            shuffle,
        }
    }

    pub fn description(&self) -> String {
        if self.titles.is_empty() && self.pending_downloads == 0 {
            return "The playlist is empty.".to_string();
        }

        let mut lines: Vec<String> = self
            .titles
            .iter()
            .enumerate()
            .map(|(i, title)| format!("{}. **{}**", i + 1, title))
            .collect();

        if self.hidden > 0 {
            lines.push(format!("+{} more", self.hidden));
        }
        if self.pending_downloads > 0 {
            lines.push(format!(
                "**{}** more in the download queue.",
                self.pending_downloads
            ));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::song::fixtures::song;
    use pretty_assertions::assert_eq;

    #[test]
    fn preview_is_capped_with_a_tail() {
        let songs: Vec<Song> = (1..=4).map(|i| song(&format!("Song {}", i), 60)).collect();
        let view = PlaylistView::build(songs.iter(), 2, 3, false, false);

        assert_eq!(
            view.description(),
            "1. **Song 1**\n2. **Song 2**\n3. **Song 3**\n+1 more\n**2** more in the download queue."
        );
    }

    #[test]
    fn empty_preview_says_so() {
        let view = PlaylistView::build(std::iter::empty(), 0, 20, false, false);
        assert_eq!(view.description(), "The playlist is empty.");
    }

    #[test]
    fn now_playing_carries_progress_and_attribution() {
        let mut current = song("Da Funk", 200);
        current.set_progress(100);
        let view = NowPlayingView::from_song(&current, NaiveDate::from_ymd_opt(2021, 6, 1).unwrap());

        assert!(view.progress.contains("**1:40/3:20**"));
        assert!(view.details.contains("1,234,567 views • 4,321 likes"));
        assert!(view.details.contains("Requested by <@1>"));
        assert!(view.details.starts_with("1 year ago"));
        assert_eq!(view.footer(), "Lyrics are only available for spotify songs");
    }
}
