use rand::Rng;
use std::{collections::VecDeque, path::Path};
use tracing::{debug, info};

use super::song::{MessageRef, Song};
use crate::error::{EngineError, EngineResult};

/// Resolved songs waiting for the voice output, plus the session's mode flags.
///
/// Capacity is shared with the downloader's pending queue: callers pass the
/// current pending count so `pending + songs <= max_size` is checked here too.
#[derive(Debug)]
pub struct Playlist {
    songs: VecDeque<Song>,
    current: Option<Song>,
    last: Option<Song>,
    loop_enabled: bool,
    shuffle: bool,
    max_size: usize,
}

impl Playlist {
    pub fn new(max_size: usize) -> Self {
        Self {
            songs: VecDeque::new(),
            current: None,
            last: None,
            loop_enabled: false,
            shuffle: false,
            max_size,
        }
    }

    /// Appends a resolved song in insertion order
    pub fn add(&mut self, song: Song, pending: usize) -> EngineResult<()> {
        if pending + self.songs.len() + 1 > self.max_size {
            return Err(EngineError::CapacityExceeded {
                max: self.max_size,
            });
        }

        info!("➕ Added to playlist: {}", song.title());
        self.songs.push_back(song);
        Ok(())
    }

    /// Picks the song that should play next.
    ///
    /// With loop on and a current song, the same song comes back with its
    /// progress reset and nothing is removed. Otherwise one song is removed
    /// (random index under shuffle, head otherwise) and becomes current; the
    /// previous current moves to the last-played slot.
    pub fn get_next(&mut self) -> Option<Song> {
        if self.loop_enabled {
            if let Some(current) = self.current.as_mut() {
                current.reset_progress();
                info!("🔂 Looping: {}", current.title());
                return Some(current.clone());
            }
        }

        if self.songs.is_empty() {
            return None;
        }

        let index = self.next_index();
        let next = self.songs.remove(index)?;

        if self.shuffle {
            info!("🔀 Randomly picked: {}", next.title());
        } else {
            info!("➡️ Next in playlist: {}", next.title());
        }

        if let Some(previous) = self.current.replace(next.clone()) {
            self.last = Some(previous);
        }

        Some(next)
    }

    /// Whether a `get_next` call would yield a song
    pub fn has_next(&self) -> bool {
        !self.songs.is_empty() || (self.loop_enabled && self.current.is_some())
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        info!("🔁 Loop is now {}", on_off(self.loop_enabled));
        self.loop_enabled
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        info!("🔀 Shuffle is now {}", on_off(self.shuffle));
        self.shuffle
    }

    pub fn is_loop(&self) -> bool {
        self.loop_enabled
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    /// Empties the playlist and both song slots, returning every transient
    /// message still owned by them
    pub fn clear(&mut self) -> Vec<MessageRef> {
        info!("🗑️ Clearing the playlist");
        let mut messages = self.take_last_messages();
        if let Some(mut current) = self.current.take() {
            messages.extend(current.drain_transient());
        }
        self.songs.clear();
        messages
    }

    /// Drops the queued songs only; the current one keeps playing
    pub fn clear_queued(&mut self) -> usize {
        let dropped = self.songs.len();
        self.songs.clear();
        dropped
    }

    pub fn current(&self) -> Option<&Song> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut Song> {
        self.current.as_mut()
    }

    /// Drops the current song without promoting anything (failed playback)
    pub fn abandon_current(&mut self) -> Option<Song> {
        let abandoned = self.current.take();
        if let Some(song) = &abandoned {
            debug!("Current song abandoned: {}", song.title());
        }
        abandoned
    }

    /// Transient messages of the song that just finished; the song itself
    /// stays current so loop can replay it
    pub fn finish_current(&mut self) -> Vec<MessageRef> {
        self.current
            .as_mut()
            .map(Song::drain_transient)
            .unwrap_or_default()
    }

    /// Clears the last-played slot, handing back its leftover messages
    pub fn take_last_messages(&mut self) -> Vec<MessageRef> {
        match self.last.take() {
            Some(mut last) => {
                debug!("Last song cleared: {}", last.title());
                last.drain_transient()
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn songs(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter()
    }

    /// True when some queued or current song still refers to `origin`
    pub fn references_origin(&self, origin: &MessageRef) -> bool {
        self.songs.iter().any(|s| s.requester.origin == *origin)
    }

    /// Files that must survive a cleanup pass
    pub fn live_paths(&self) -> Vec<&Path> {
        self.current
            .iter()
            .chain(self.songs.iter())
            .map(Song::path)
            .collect()
    }

    fn next_index(&self) -> usize {
        if self.shuffle {
            rand::thread_rng().gen_range(0..self.songs.len())
        } else {
            0
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}
