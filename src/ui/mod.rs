//! # UI Module
//!
//! Everything the engine shows to users goes through the [`Notifier`]
//! trait: reactions on request messages, the now-playing message, the
//! playlist preview and lyrics attachments.
//!
//! - [`views`] renders engine state into plain data
//! - [`embeds`] turns views into serenity embeds
//! - [`discord`] is the serenity-backed [`Notifier`]

use async_trait::async_trait;
use serenity::model::id::ChannelId;

use crate::{audio::song::MessageRef, error::EngineError};

pub mod discord;
pub mod embeds;
pub mod views;

pub use discord::DiscordNotifier;
pub use views::{NowPlayingView, PlaylistView};

/// Outcome signal attached to a request message
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    /// ⌛ resolution started
    Working,
    /// ✅ every item of the message is resolved, or the command succeeded
    Success,
    /// ❌ plus one explanatory reply
    Failed(EngineError),
}

/// Messaging collaborator. Delivery failures are logged by the
/// implementation and never reach the engine.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn acknowledge(&self, origin: MessageRef, ack: Ack);

    /// Plain text reply in the origin's channel
    async fn reply(&self, origin: MessageRef, text: String);

    async fn send_now_playing(&self, channel: ChannelId, view: NowPlayingView) -> Option<MessageRef>;

    async fn update_now_playing(&self, message: MessageRef, view: NowPlayingView);

    async fn send_playlist(&self, channel: ChannelId, view: PlaylistView) -> Option<MessageRef>;

    async fn update_playlist(&self, message: MessageRef, view: PlaylistView);

    /// Posts `lyrics` as a `lyrics.txt` attachment
    async fn send_lyrics(&self, channel: ChannelId, lyrics: String) -> Option<MessageRef>;

    async fn delete(&self, messages: Vec<MessageRef>);
}
