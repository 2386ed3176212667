use anyhow::Result;
use async_trait::async_trait;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    tracks::{PlayMode, TrackHandle},
    Call, Songbird,
};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};

/// Opens voice connections
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Box<dyn VoiceLink>>;
}

/// One live voice connection carrying at most one audio stream
#[async_trait]
pub trait VoiceLink: Send + Sync {
    async fn play_file(&mut self, path: &Path) -> Result<()>;

    async fn pause(&mut self) -> Result<()>;

    async fn resume(&mut self) -> Result<()>;

    /// Ends the current stream, if any
    async fn stop_track(&mut self);

    /// A stream exists and is audible
    async fn is_playing(&self) -> bool;

    async fn is_paused(&self) -> bool;

    async fn disconnect(&mut self) -> Result<()>;

    /// Users in the connected channel, the bot included. `None` if unknown.
    fn members_in_channel(&self) -> Option<usize>;
}

/// [`VoiceGateway`] backed by songbird
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    cache: Arc<Cache>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, cache: Arc<Cache>) -> Self {
        Self { manager, cache }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Box<dyn VoiceLink>> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| anyhow::anyhow!("Error joining voice channel: {}", e))?;

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);

        Ok(Box::new(SongbirdLink {
            manager: self.manager.clone(),
            cache: self.cache.clone(),
            guild_id,
            channel_id,
            call,
            track: None,
        }))
    }
}

struct SongbirdLink {
    manager: Arc<Songbird>,
    cache: Arc<Cache>,
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<Mutex<Call>>,
    track: Option<TrackHandle>,
}

impl SongbirdLink {
    async fn play_mode(&self) -> Option<PlayMode> {
        let track = self.track.as_ref()?;
        track.get_info().await.ok().map(|state| state.playing)
    }
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn play_file(&mut self, path: &Path) -> Result<()> {
        let input = songbird::input::File::new(path.to_path_buf());
        let handle = self.call.lock().await.play_input(input.into());
        self.track = Some(handle);
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        if let Some(track) = &self.track {
            track
                .pause()
                .map_err(|e| anyhow::anyhow!("Error pausing track: {}", e))?;
        }
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        if let Some(track) = &self.track {
            track
                .play()
                .map_err(|e| anyhow::anyhow!("Error resuming track: {}", e))?;
        }
        Ok(())
    }

    async fn stop_track(&mut self) {
        if let Some(track) = self.track.take() {
            let _ = track.stop();
        }
    }

    async fn is_playing(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Play))
    }

    async fn is_paused(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Pause))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stop_track().await;
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| anyhow::anyhow!("Error leaving voice channel: {}", e))?;
        info!("👋 Disconnected from voice in guild {}", self.guild_id);
        Ok(())
    }

    fn members_in_channel(&self) -> Option<usize> {
        let guild = self.cache.guild(self.guild_id)?;
        Some(
            guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(self.channel_id))
                .count(),
        )
    }
}

/// The session's single audio output plus its idle timer
pub struct Player {
    guild_id: GuildId,
    gateway: Arc<dyn VoiceGateway>,
    link: Option<Box<dyn VoiceLink>>,
    idle_since: Option<Instant>,
    idle_timeout: Duration,
}

impl Player {
    pub fn new(guild_id: GuildId, gateway: Arc<dyn VoiceGateway>, idle_timeout: Duration) -> Self {
        Self {
            guild_id,
            gateway,
            link: None,
            idle_since: None,
            idle_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Connects to `channel_id`; a no-op when already connected
    pub async fn join(&mut self, channel_id: ChannelId) -> EngineResult<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let link = self
            .gateway
            .connect(self.guild_id, channel_id)
            .await
            .map_err(|e| {
                error!("❌ Could not join voice in guild {}: {:?}", self.guild_id, e);
                EngineError::Playback(format!("could not join the voice channel ({})", e))
            })?;

        self.link = Some(link);
        self.idle_since = None;
        Ok(())
    }

    /// Starts streaming `path`. Rejected while another stream is active.
    pub async fn play(&mut self, path: &Path) -> EngineResult<()> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| EngineError::Playback("not connected to voice".to_string()))?;

        if link.is_playing().await || link.is_paused().await {
            return Err(EngineError::Playback("already playing audio".to_string()));
        }

        link.play_file(path).await.map_err(|e| {
            error!("❌ Error starting stream for {}: {:?}", path.display(), e);
            EngineError::Playback(e.to_string())
        })?;

        self.idle_since = None;
        Ok(())
    }

    pub async fn pause(&mut self) {
        if let Some(link) = self.link.as_mut() {
            if link.is_playing().await {
                match link.pause().await {
                    Ok(()) => info!("⏸️ Playback paused"),
                    Err(e) => warn!("⚠️ {}", e),
                }
            }
        }
    }

    pub async fn resume(&mut self) {
        if let Some(link) = self.link.as_mut() {
            if link.is_paused().await {
                match link.resume().await {
                    Ok(()) => info!("▶️ Playback resumed"),
                    Err(e) => warn!("⚠️ {}", e),
                }
            }
        }
        self.idle_since = None;
    }

    /// Ends the current stream; the next tick notices the idle output
    pub async fn skip(&mut self) {
        if let Some(link) = self.link.as_mut() {
            info!("⏭️ Skipping");
            link.stop_track().await;
        }
    }

    /// Connected but not actively streaming
    pub async fn idle(&self) -> bool {
        match &self.link {
            Some(link) => !link.is_playing().await,
            None => false,
        }
    }

    /// Idle-timer bookkeeping. Returns `true` when the timeout fired and the
    /// player has been stopped.
    pub async fn handle_idle(&mut self) -> bool {
        let now = Instant::now();
        match self.idle_since {
            None => {
                debug!("Idle timer started for guild {}", self.guild_id);
                self.idle_since = Some(now);
                false
            }
            Some(since) if now.duration_since(since) >= self.idle_timeout => {
                self.stop().await;
                true
            }
            Some(_) => false,
        }
    }

    /// Halts any stream, leaves voice and forgets the idle timer
    pub async fn stop(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.disconnect().await {
                warn!("⚠️ {}", e);
            }
            info!("⏹️ Player stopped in guild {}", self.guild_id);
        }
        self.idle_since = None;
    }

    pub fn members_in_channel(&self) -> Option<usize> {
        self.link.as_ref().and_then(|link| link.members_in_channel())
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::path::PathBuf;

    /// Observable voice backend shared by the fake gateway and its links
    #[derive(Debug, Default)]
    pub struct VoiceState {
        pub joins: usize,
        pub disconnects: usize,
        pub connected: bool,
        pub streaming: Option<PathBuf>,
        pub paused: bool,
        pub played: Vec<PathBuf>,
        pub members: Option<usize>,
        pub fail_join: bool,
        pub fail_play: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeVoice(pub Arc<SyncMutex<VoiceState>>);

    impl FakeVoice {
        pub fn state(&self) -> parking_lot::MutexGuard<'_, VoiceState> {
            self.0.lock()
        }

        /// The current stream reaches its natural end
        pub fn finish_track(&self) {
            let mut state = self.0.lock();
            state.streaming = None;
            state.paused = false;
        }
    }

    struct FakeLink(FakeVoice);

    #[async_trait]
    impl VoiceGateway for FakeVoice {
        async fn connect(&self, _guild: GuildId, _channel: ChannelId) -> Result<Box<dyn VoiceLink>> {
            let mut state = self.0.lock();
            if state.fail_join {
                anyhow::bail!("missing permissions");
            }
            state.joins += 1;
            state.connected = true;
            Ok(Box::new(FakeLink(self.clone())))
        }
    }

    #[async_trait]
    impl VoiceLink for FakeLink {
        async fn play_file(&mut self, path: &Path) -> Result<()> {
            let mut state = self.0.state();
            if state.fail_play {
                anyhow::bail!("decoder error");
            }
            state.streaming = Some(path.to_path_buf());
            state.paused = false;
            state.played.push(path.to_path_buf());
            Ok(())
        }

        async fn pause(&mut self) -> Result<()> {
            self.0.state().paused = true;
            Ok(())
        }

        async fn resume(&mut self) -> Result<()> {
            self.0.state().paused = false;
            Ok(())
        }

        async fn stop_track(&mut self) {
            self.0.finish_track();
        }

        async fn is_playing(&self) -> bool {
            let state = self.0.state();
            state.streaming.is_some() && !state.paused
        }

        async fn is_paused(&self) -> bool {
            let state = self.0.state();
            state.streaming.is_some() && state.paused
        }

        async fn disconnect(&mut self) -> Result<()> {
            let mut state = self.0.state();
            state.streaming = None;
            state.connected = false;
            state.disconnects += 1;
            Ok(())
        }

        fn members_in_channel(&self) -> Option<usize> {
            self.0.state().members
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeVoice;
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const TIMEOUT: Duration = Duration::from_secs(150);

    async fn connected_player(voice: &FakeVoice) -> Player {
        let mut player = Player::new(GuildId::new(1), Arc::new(voice.clone()), TIMEOUT);
        player.join(ChannelId::new(2)).await.unwrap();
        player
    }

    #[tokio::test]
    async fn join_is_a_noop_when_connected() {
        let voice = FakeVoice::default();
        let mut player = connected_player(&voice).await;
        player.join(ChannelId::new(3)).await.unwrap();
        assert_eq!(voice.state().joins, 1);
    }

    #[tokio::test]
    async fn failed_join_is_a_playback_error() {
        let voice = FakeVoice::default();
        voice.state().fail_join = true;
        let mut player = Player::new(GuildId::new(1), Arc::new(voice.clone()), TIMEOUT);
        assert!(matches!(
            player.join(ChannelId::new(2)).await,
            Err(EngineError::Playback(_))
        ));
        assert!(!player.is_connected());
    }

    #[tokio::test]
    async fn second_stream_is_rejected() {
        let voice = FakeVoice::default();
        let mut player = connected_player(&voice).await;
        player.play(&PathBuf::from("a.mp3")).await.unwrap();
        assert!(player.play(&PathBuf::from("b.mp3")).await.is_err());
        assert_eq!(voice.state().played, vec![PathBuf::from("a.mp3")]);
    }

    #[tokio::test]
    async fn idle_means_connected_and_silent() {
        let voice = FakeVoice::default();
        let mut disconnected = Player::new(GuildId::new(1), Arc::new(voice.clone()), TIMEOUT);
        assert!(!disconnected.idle().await);
        disconnected.join(ChannelId::new(2)).await.unwrap();
        assert!(disconnected.idle().await);

        disconnected.play(&PathBuf::from("a.mp3")).await.unwrap();
        assert!(!disconnected.idle().await);
        disconnected.skip().await;
        assert!(disconnected.idle().await);
    }

    #[tokio::test]
    async fn pause_and_resume_only_touch_matching_streams() {
        let voice = FakeVoice::default();
        let mut player = connected_player(&voice).await;

        player.resume().await;
        assert!(!voice.state().paused);

        player.play(&PathBuf::from("a.mp3")).await.unwrap();
        player.pause().await;
        assert!(voice.state().paused);
        assert!(player.idle().await);

        player.resume().await;
        assert!(!voice.state().paused);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_stops_the_player() {
        let voice = FakeVoice::default();
        let mut player = connected_player(&voice).await;

        assert!(!player.handle_idle().await);
        tokio::time::advance(TIMEOUT - Duration::from_secs(1)).await;
        assert!(!player.handle_idle().await);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(player.handle_idle().await);

        assert!(!player.is_connected());
        assert_eq!(voice.state().disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_resets_the_idle_timer() {
        let voice = FakeVoice::default();
        let mut player = connected_player(&voice).await;

        player.handle_idle().await;
        tokio::time::advance(TIMEOUT - Duration::from_secs(10)).await;
        player.play(&PathBuf::from("a.mp3")).await.unwrap();
        voice.finish_track();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!player.handle_idle().await);
        assert!(player.is_connected());
    }
}
