//! # Audio Module
//!
//! The playback engine. One [`session::Session`] per guild owns the four
//! cooperating parts:
//!
//! ### [`downloader`] - Download queue
//! - Admits requests against the shared capacity
//! - Resolves them one at a time (duration policy, optional lyrics)
//!
//! ### [`playlist`] - Resolved songs
//! - FIFO or random order, loop of the current song
//! - Current and last-played slots with their transient messages
//!
//! ### [`player`] - Voice output
//! - Joins, streams local files, pauses and leaves
//! - Idle timer behind the auto-disconnect
//!
//! ### [`state_machine`] - Driver
//! - `DISCONNECTED`, `STOPPED`, `PLAYING`, `PAUSED`, `RESUMED`
//! - A periodic tick moves songs from the playlist to the player
//!
//! [`files`] keeps the download directory free of orphaned audio and
//! [`song`] holds the shared data types.

pub mod downloader;
pub mod files;
pub mod player;
pub mod playlist;
pub mod session;
pub mod song;
pub mod state_machine;

pub use session::{Collaborators, Session, SessionRegistry};
pub use state_machine::PlaybackState;
