//! # Bot Module
//!
//! Serenity side of Voice DJ: turns guild messages into [`Command`]s, hands
//! them to the guild's [`Session`](crate::audio::session::Session) and
//! watches voice state so a session is torn down when the bot gets
//! disconnected from outside.
//!
//! Sessions live in a
//! [`SessionRegistry`](crate::audio::session::SessionRegistry) stored in
//! the client's type map by `main`; handlers fetch it from there on every
//! command.

use serenity::{
    all::{Context, EventHandler, Message, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

pub use commands::Command;

use crate::{
    audio::state_machine::PlaybackState,
    config::Config,
    sources::YtDlpResolver,
    storage::JsonStatistics,
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Serenity event handler for Voice DJ
pub struct VoiceDjBot {
    config: Arc<Config>,
    /// Leaderboards are read straight from the store
    pub statistics: Arc<JsonStatistics>,
    maintenance_started: AtomicBool,
}

impl VoiceDjBot {
    pub fn new(config: Arc<Config>, statistics: Arc<JsonStatistics>) -> Self {
        Self {
            config,
            statistics,
            maintenance_started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for VoiceDjBot {
    /// Logs the connection and starts the hourly maintenance task once per
    /// process; `ready` fires again on every reconnect.
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            tokio::spawn(maintenance_tasks());
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || msg.guild_id.is_none() {
            return;
        }

        let Some(command) = Command::parse(&self.config.command_prefix, &msg.content) else {
            return;
        };

        if let Err(e) = handlers::handle_command(&ctx, &msg, command, self).await {
            error!("Error handling command: {:?}", e);
        }
    }

    /// A forced disconnect (kick, channel deleted, moved out) ends the
    /// session exactly like `stop`.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        let registry = match handlers::registry(&ctx).await {
            Ok(registry) => registry,
            Err(e) => {
                warn!("⚠️ {}", e);
                return;
            }
        };

        if let Some(session) = registry.get(guild_id) {
            if session.state() != PlaybackState::Disconnected {
                info!("🔌 Disconnected from voice in guild {}", guild_id);
                session.teardown().await;
            }
        }
    }
}

/// Hourly yt-dlp self-update
async fn maintenance_tasks() {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;

        if let Err(e) = YtDlpResolver::update_ytdlp().await {
            warn!("⚠️ yt-dlp update failed: {:?}", e);
        }

        info!("🧹 Maintenance tasks completed");
    }
}
