use anyhow::Result;
use serenity::{
    builder::{CreateEmbed, CreateMessage},
    model::{
        channel::Message,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{debug, info};

use super::{commands::Command, VoiceDjBot};
use crate::{
    audio::{
        session::{Session, SessionRegistry},
        song::{MessageRef, Requester},
    },
    error::EngineResult,
    ui::{embeds, Ack, DiscordNotifier, Notifier},
};

const LEADERBOARD_SIZE: usize = 5;

/// Entry point for every parsed prefix command
pub async fn handle_command(
    ctx: &Context,
    msg: &Message,
    command: Command,
    bot: &VoiceDjBot,
) -> Result<()> {
    let guild_id = msg
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside a server"))?;

    info!(
        "📝 Command {} used by {} in guild {}",
        command.name(),
        msg.author.name,
        guild_id
    );

    match command {
        Command::MostPlayed => {
            let entries = bot.statistics.most_played(LEADERBOARD_SIZE).await;
            send_embed(ctx, msg.channel_id, embeds::most_played_embed(&entries)).await
        }
        Command::MostRequested => {
            let entries = bot.statistics.most_requested(LEADERBOARD_SIZE).await;
            send_embed(ctx, msg.channel_id, embeds::most_requested_embed(&entries)).await
        }
        command => {
            let session = registry(ctx).await?.get_or_create(guild_id);
            let requester = Requester {
                user_id: msg.author.id,
                origin: MessageRef::new(msg.channel_id, msg.id),
                voice_channel: author_voice_channel(ctx, guild_id, msg.author.id),
            };
            let notifier = DiscordNotifier::new(ctx.http.clone());

            handle_session_command(&session, command, requester, &notifier).await;
            Ok(())
        }
    }
}

/// Runs a playback command against the guild's session and reports the
/// outcome on the command message
pub async fn handle_session_command(
    session: &Arc<Session>,
    command: Command,
    requester: Requester,
    notifier: &dyn Notifier,
) {
    let origin = requester.origin;

    let result = match command {
        Command::Play(query) => match session.submit_query(&query, requester).await {
            // Reactions come from the download loop from here on
            Ok(admitted) => {
                debug!("Admitted {} requests from {}", admitted, origin.message_id);
                return;
            }
            Err(e) => Err(e),
        },
        Command::Skip => match session.skip().await {
            Ok(()) => {
                notifier.delete(vec![origin]).await;
                return;
            }
            Err(e) => Err(e),
        },
        Command::Playlist => {
            session.show_playlist(origin).await;
            return;
        }
        Command::Loop => {
            let enabled = session.toggle_loop().await;
            Ok(Some(format!("🔁 Loop is now **{}**", on_off(enabled))))
        }
        Command::Shuffle => {
            let enabled = session.toggle_shuffle().await;
            Ok(Some(format!("🔀 Shuffle is now **{}**", on_off(enabled))))
        }
        Command::Pause => session.pause().await.map(|_| None),
        Command::Resume => session.resume().map(|_| None),
        Command::Lyrics => session.lyrics(origin).await.map(|_| None),
        Command::Stop => session.stop().await.map(|_| None),
        Command::Clear => {
            session.clear().await;
            Ok(None)
        }
        // Leaderboards never reach a session
        Command::MostPlayed | Command::MostRequested => Ok(None),
    };

    respond(notifier, origin, result).await;
}

async fn respond(notifier: &dyn Notifier, origin: MessageRef, result: EngineResult<Option<String>>) {
    match result {
        Ok(Some(text)) => {
            notifier.reply(origin, text).await;
            notifier.acknowledge(origin, Ack::Success).await;
        }
        Ok(None) => notifier.acknowledge(origin, Ack::Success).await,
        Err(e) => {
            debug!("Command refused: {}", e);
            notifier.acknowledge(origin, Ack::Failed(e)).await;
        }
    }
}

/// The registry `main` stored in the client's type map
pub async fn registry(ctx: &Context) -> Result<Arc<SessionRegistry>> {
    let data = ctx.data.read().await;
    data.get::<SessionRegistry>()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Session registry not initialised"))
}

/// Voice channel `user_id` currently sits in, from the gateway cache
fn author_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

async fn send_embed(ctx: &Context, channel: ChannelId, embed: CreateEmbed) -> Result<()> {
    channel
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}
