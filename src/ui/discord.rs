use async_trait::async_trait;
use futures::future::join_all;
use serenity::{
    all::{ChannelId, ReactionType},
    builder::{CreateAttachment, CreateMessage, EditMessage},
    http::Http,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use super::{embeds, Ack, Notifier, NowPlayingView, PlaylistView};
use crate::audio::song::MessageRef;

/// Failure replies and their request message disappear after this long
const FAILURE_LOG_TTL: Duration = Duration::from_secs(30);

/// [`Notifier`] that talks to Discord through serenity's HTTP client
#[derive(Clone)]
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn http(&self) -> &Http {
        &self.http
    }

    async fn react(&self, message: MessageRef, emoji: &str) {
        let http = self.http();
        if let Err(e) = message
            .channel_id
            .delete_reactions(http, message.message_id)
            .await
        {
            debug!("Could not clear reactions: {}", e);
        }

        if let Err(e) = message
            .channel_id
            .create_reaction(http, message.message_id, ReactionType::Unicode(emoji.to_string()))
            .await
        {
            warn!("⚠️ Could not react with {}: {}", emoji, e);
        }
    }

    async fn say(&self, channel: ChannelId, text: String) -> Option<MessageRef> {
        match channel.say(self.http(), text).await {
            Ok(message) => Some(MessageRef::new(message.channel_id, message.id)),
            Err(e) => {
                warn!("⚠️ Could not send message: {}", e);
                None
            }
        }
    }

    async fn send(&self, channel: ChannelId, message: CreateMessage) -> Option<MessageRef> {
        match channel.send_message(self.http(), message).await {
            Ok(sent) => Some(MessageRef::new(sent.channel_id, sent.id)),
            Err(e) => {
                warn!("⚠️ Could not send message: {}", e);
                None
            }
        }
    }

    async fn edit(&self, message: MessageRef, edit: EditMessage) {
        if let Err(e) = message
            .channel_id
            .edit_message(self.http(), message.message_id, edit)
            .await
        {
            debug!("Could not edit message {}: {}", message.message_id, e);
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn acknowledge(&self, origin: MessageRef, ack: Ack) {
        match ack {
            Ack::Working => self.react(origin, "⌛").await,
            Ack::Success => self.react(origin, "✅").await,
            Ack::Failed(error) => {
                self.react(origin, "❌").await;
                let reply = self.say(origin.channel_id, error.to_string()).await;

                let notifier = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(FAILURE_LOG_TTL).await;
                    notifier.delete(reply.into_iter().chain([origin]).collect()).await;
                });
            }
        }
    }

    async fn reply(&self, origin: MessageRef, text: String) {
        self.say(origin.channel_id, text).await;
    }

    async fn send_now_playing(&self, channel: ChannelId, view: NowPlayingView) -> Option<MessageRef> {
        self.send(channel, CreateMessage::new().embed(embeds::now_playing_embed(&view)))
            .await
    }

    async fn update_now_playing(&self, message: MessageRef, view: NowPlayingView) {
        self.edit(message, EditMessage::new().embed(embeds::now_playing_embed(&view)))
            .await;
    }

    async fn send_playlist(&self, channel: ChannelId, view: PlaylistView) -> Option<MessageRef> {
        self.send(channel, CreateMessage::new().embed(embeds::playlist_embed(&view)))
            .await
    }

    async fn update_playlist(&self, message: MessageRef, view: PlaylistView) {
        self.edit(message, EditMessage::new().embed(embeds::playlist_embed(&view)))
            .await;
    }

    async fn send_lyrics(&self, channel: ChannelId, lyrics: String) -> Option<MessageRef> {
        let attachment = CreateAttachment::bytes(lyrics.into_bytes(), "lyrics.txt");
        self.send(channel, CreateMessage::new().add_file(attachment)).await
    }

    async fn delete(&self, messages: Vec<MessageRef>) {
        let http = self.http();
        join_all(messages.into_iter().map(|message| async move {
            if let Err(e) = message
                .channel_id
                .delete_message(http, message.message_id)
                .await
            {
                debug!("Could not delete message {}: {}", message.message_id, e);
            }
        }))
        .await;
    }
}
