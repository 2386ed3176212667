use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::{model::id::GuildId, prelude::TypeMapKey};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    sync::{Mutex as AsyncMutex, Semaphore},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use super::{
    downloader::{Downloader, Resolved},
    files,
    player::{Player, VoiceGateway},
    playlist::Playlist,
    song::{MessageRef, PlaybackRequest, Requester, Song},
    state_machine::{PlaybackState, StateMachine},
};
use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
    sources::{classify_query, CatalogExpander, LyricsLookup, QueryKind, SourceResolver},
    storage::StatisticsSink,
    ui::{Ack, Notifier, NowPlayingView, PlaylistView},
};

/// External services a session talks to. Cheap to clone: every field is
/// shared between all sessions of the process.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn SourceResolver>,
    pub lyrics: Option<Arc<dyn LyricsLookup>>,
    pub catalog: Option<Arc<dyn CatalogExpander>>,
    pub gateway: Arc<dyn VoiceGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub statistics: Arc<dyn StatisticsSink>,
    /// One permit: resolutions run one at a time across all guilds
    pub resolution_workers: Arc<Semaphore>,
}

/// The playlist preview message and the command that asked for it
#[derive(Debug, Clone, Copy)]
struct Preview {
    message: MessageRef,
    request: MessageRef,
}

/// Everything one guild's playback needs.
///
/// Lock order is playlist before the downloader's queue. The player lock is
/// async and never taken while a sync lock is held.
pub struct Session {
    guild_id: GuildId,
    config: EngineConfig,
    playlist: Mutex<Playlist>,
    downloader: Downloader,
    player: AsyncMutex<Player>,
    state_machine: StateMachine,
    notifier: Arc<dyn Notifier>,
    catalog: Option<Arc<dyn CatalogExpander>>,
    statistics: Arc<dyn StatisticsSink>,
    preview: Mutex<Option<Preview>>,
    /// A driver loop is running for this session
    ticking: Mutex<bool>,
}

impl Session {
    pub fn new(guild_id: GuildId, config: EngineConfig, deps: &Collaborators) -> Self {
        let download_dir = config.download_dir.join(guild_id.to_string());

        Self {
            guild_id,
            playlist: Mutex::new(Playlist::new(config.max_playlist_size)),
            downloader: Downloader::new(
                deps.resolver.clone(),
                deps.lyrics.clone(),
                deps.resolution_workers.clone(),
                download_dir,
                config.max_song_duration,
            ),
            player: AsyncMutex::new(Player::new(
                guild_id,
                deps.gateway.clone(),
                config.idle_timeout,
            )),
            state_machine: StateMachine::new(),
            notifier: deps.notifier.clone(),
            catalog: deps.catalog.clone(),
            statistics: deps.statistics.clone(),
            preview: Mutex::new(None),
            ticking: Mutex::new(false),
            config,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> PlaybackState {
        self.state_machine.state()
    }

    pub fn pending_len(&self) -> usize {
        self.downloader.pending_len()
    }

    pub fn playlist_len(&self) -> usize {
        self.playlist.lock().len()
    }

    pub fn current_title(&self) -> Option<String> {
        self.playlist.lock().current().map(|s| s.title().to_string())
    }

    /// Reserves a download slot for one request.
    ///
    /// `Ok(false)` means the same ask is already waiting.
    pub fn enqueue(&self, request: PlaybackRequest) -> EngineResult<bool> {
        let playlist = self.playlist.lock();
        self.downloader
            .enqueue(request, playlist.len(), playlist.max_size())
    }

    /// Validates and classifies a `play` argument, then admits every
    /// resulting request until capacity runs out. Returns how many were
    /// admitted. Does not start the download loop.
    pub async fn queue_query(&self, query: &str, requester: Requester) -> EngineResult<usize> {
        let query = query.trim();
        if requester.voice_channel.is_none() {
            return Err(EngineError::NotInVoice);
        }
        if query.is_empty() {
            return Err(EngineError::MissingQuery);
        }

        let requests = match classify_query(query) {
            QueryKind::VideoPlaylist => return Err(EngineError::UnsupportedPlaylist),
            QueryKind::Catalog => self.expand_catalog(query, &requester).await?,
            QueryKind::VideoUrl | QueryKind::Search => {
                vec![PlaybackRequest::new(query, requester.clone())]
            }
        };

        let mut admitted = 0;
        for request in requests {
            match self.enqueue(request) {
                Ok(true) => admitted += 1,
                Ok(false) => {}
                Err(e) if admitted == 0 => return Err(e),
                Err(e) => {
                    // Part of a catalog expansion made it in; one reply covers the rest
                    info!("📦 Admitted {} items before reaching capacity", admitted);
                    self.notifier.reply(requester.origin, e.to_string()).await;
                    break;
                }
            }
        }

        Ok(admitted)
    }

    /// `play`: [`queue_query`](Self::queue_query) plus starting the
    /// download loop when anything was admitted
    pub async fn submit_query(
        self: &Arc<Self>,
        query: &str,
        requester: Requester,
    ) -> EngineResult<usize> {
        let admitted = self.queue_query(query, requester).await?;
        if admitted > 0 {
            self.ensure_draining();
            self.refresh_preview().await;
        }
        Ok(admitted)
    }

    async fn expand_catalog(
        &self,
        url: &str,
        requester: &Requester,
    ) -> EngineResult<Vec<PlaybackRequest>> {
        let Some(catalog) = self.catalog.as_ref().filter(|c| c.handles(url)) else {
            warn!("⚠️ No catalog configured for {}", url);
            return Err(EngineError::Resolution(url.to_string()));
        };

        let tracks = catalog.expand(url).await.map_err(|e| {
            warn!("⚠️ Catalog expansion failed for {}: {:?}", url, e);
            EngineError::Resolution(url.to_string())
        })?;

        if tracks.is_empty() {
            return Err(EngineError::Resolution(url.to_string()));
        }

        info!("📋 Expanded {} into {} tracks", url, tracks.len());
        Ok(tracks
            .iter()
            .map(|track| PlaybackRequest::from_catalog(track.query(), requester.clone()))
            .collect())
    }

    /// Starts the download loop unless one already owns the queue
    pub fn ensure_draining(self: &Arc<Self>) {
        if self.downloader.claim_drain() {
            let session = Arc::clone(self);
            tokio::spawn(async move { session.run_downloads().await });
        }
    }

    async fn run_downloads(self: Arc<Self>) {
        info!("📥 Download loop started for guild {}", self.guild_id);

        let mut interval = tokio::time::interval(self.config.drain_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !self.drain_once().await {
                break;
            }
            self.ensure_ticking();
        }

        info!("📥 Download loop finished for guild {}", self.guild_id);
    }

    /// Resolves one pending request. Returns `false` once the queue is empty,
    /// which also releases the loop's claim on it.
    pub async fn drain_once(&self) -> bool {
        let shuffle = self.playlist.lock().is_shuffle();
        let Some(request) = self.downloader.pop_next(shuffle) else {
            return false;
        };

        let origin = request.requester.origin;
        self.notifier.acknowledge(origin, Ack::Working).await;

        let outcome = match self.downloader.resolve(request).await {
            Ok(resolved) => self.admit(resolved).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(true) => {
                if !self.downloader.pending_from(&origin) {
                    self.notifier.acknowledge(origin, Ack::Success).await;
                }
            }
            Ok(false) => debug!("Request from {} discarded by clear", origin.message_id),
            Err(e) => {
                if e.is_item_failure() {
                    warn!("⚠️ Request failed in guild {}: {}", self.guild_id, e);
                } else {
                    info!("🚫 Request refused in guild {}: {}", self.guild_id, e);
                }
                self.downloader.finish_in_flight();
                self.notifier.acknowledge(origin, Ack::Failed(e)).await;
            }
        }

        self.refresh_preview().await;
        true
    }

    /// Hands a resolved item to the playlist, joining voice first when the
    /// session is disconnected. `Ok(false)` means the item was discarded
    /// because the queue was cleared while it downloaded.
    pub(crate) async fn admit(&self, resolved: Resolved) -> EngineResult<bool> {
        let path = resolved.track.path.clone();

        if self.downloader.is_cancelled() {
            return self.discard(resolved).await;
        }

        if self.state() == PlaybackState::Disconnected {
            if let Err(e) = self.connect(&resolved.request.requester).await {
                files::remove_quietly(&path).await;
                return Err(e);
            }
        }

        let Resolved {
            request,
            track,
            lyrics,
        } = resolved;
        let song = Song::new(track, request.requester, lyrics);

        // `clear` may have run while voice was being joined
        let added = {
            let mut playlist = self.playlist.lock();
            let added = if self.downloader.is_cancelled() {
                Ok(false)
            } else {
                playlist.add(song, self.downloader.queued()).map(|_| true)
            };
            self.downloader.finish_in_flight();
            added
        };

        match added {
            Ok(true) => Ok(true),
            Ok(false) => {
                info!("🚫 Discarding {}, the queue was cleared", path.display());
                files::remove_quietly(&path).await;
                Ok(false)
            }
            Err(e) => {
                files::remove_quietly(&path).await;
                Err(e)
            }
        }
    }

    async fn discard(&self, resolved: Resolved) -> EngineResult<bool> {
        info!("🚫 Discarding {}, the queue was cleared", resolved.track.info.title);
        files::remove_quietly(&resolved.track.path).await;
        self.downloader.finish_in_flight();
        Ok(false)
    }

    async fn connect(&self, requester: &Requester) -> EngineResult<()> {
        let channel = requester.voice_channel.ok_or(EngineError::NotInVoice)?;
        self.player.lock().await.join(channel).await?;
        info!("🔊 Joined voice channel {} in guild {}", channel, self.guild_id);
        self.state_machine.transition_to(PlaybackState::Stopped)
    }

    /// Starts the state machine loop if the session is live and no loop runs
    pub fn ensure_ticking(self: &Arc<Self>) {
        let mut ticking = self.ticking.lock();
        if *ticking || self.state() == PlaybackState::Disconnected {
            return;
        }
        *ticking = true;

        let session = Arc::clone(self);
        tokio::spawn(async move { session.run_ticks().await });
    }

    async fn run_ticks(self: Arc<Self>) {
        info!("▶️ State machine loop started for guild {}", self.guild_id);

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            {
                let mut ticking = self.ticking.lock();
                if self.state() == PlaybackState::Disconnected {
                    *ticking = false;
                    break;
                }
            }
            self.tick().await;
        }

        info!("⏹️ State machine loop stopped for guild {}", self.guild_id);
    }

    /// One state machine pass
    pub async fn tick(&self) {
        self.state_machine.tick(self).await;
    }

    pub(crate) fn player(&self) -> &AsyncMutex<Player> {
        &self.player
    }

    pub(crate) fn has_next(&self) -> bool {
        self.playlist.lock().has_next()
    }

    pub(crate) async fn is_alone(&self) -> bool {
        self.player.lock().await.members_in_channel() == Some(1)
    }

    /// Advances the current song by one tick and re-renders its message
    pub(crate) async fn refresh_now_playing(&self) {
        let seconds = self.config.tick_interval.as_secs();
        let update = {
            let mut playlist = self.playlist.lock();
            match playlist.current_mut() {
                Some(song) => {
                    song.advance(seconds);
                    song.now_playing
                        .map(|message| (message, NowPlayingView::from_song(song, today())))
                }
                None => None,
            }
        };

        if let Some((message, view)) = update {
            self.notifier.update_now_playing(message, view).await;
        }
    }

    /// The current song ended: its transient messages go away
    pub(crate) async fn finish_current(&self) {
        let messages = self.playlist.lock().finish_current();
        if !messages.is_empty() {
            self.notifier.delete(messages).await;
        }
    }

    /// Promotes the next song and starts streaming it
    pub(crate) async fn play_next(&self) -> bool {
        let (next, stale) = {
            let mut playlist = self.playlist.lock();
            let next = playlist.get_next();
            (next, playlist.take_last_messages())
        };

        if !stale.is_empty() {
            self.notifier.delete(stale).await;
        }

        let Some(song) = next else {
            return false;
        };

        let started = self.player.lock().await.play(song.path()).await;
        match started {
            Ok(()) => {
                info!("🎵 Now playing in guild {}: {}", self.guild_id, song.title());
                true
            }
            Err(e) => {
                error!("❌ Could not play {}: {}", song.title(), e);
                self.playlist.lock().abandon_current();
                files::remove_quietly(song.path()).await;
                self.notifier
                    .acknowledge(song.requester.origin, Ack::Failed(e))
                    .await;
                false
            }
        }
    }

    /// Bookkeeping once a song is actually streaming
    pub(crate) async fn on_song_started(&self) {
        self.refresh_preview().await;

        let Some(song) = self.playlist.lock().current().cloned() else {
            return;
        };

        let mut new_transient = Vec::new();
        if song.transient.is_empty() {
            let view = NowPlayingView::from_song(&song, today());
            if let Some(message) = self
                .notifier
                .send_now_playing(song.requester.origin.channel_id, view)
                .await
            {
                new_transient.push(message);
            }
        }

        let origin = song.requester.origin;
        let origin_done = !self.downloader.references_origin(&origin)
            && !self.playlist.lock().references_origin(&origin);

        let orphaned = {
            let mut playlist = self.playlist.lock();
            match playlist.current_mut().filter(|c| c.id() == song.id()) {
                Some(current) => {
                    if let Some(&now_playing) = new_transient.first() {
                        current.now_playing = Some(now_playing);
                    }
                    current.transient.append(&mut new_transient);
                    if origin_done && !current.transient.contains(&origin) {
                        current.transient.push(origin);
                    }
                    Vec::new()
                }
                None => new_transient,
            }
        };
        if !orphaned.is_empty() {
            self.notifier.delete(orphaned).await;
        }

        if let Err(e) = self
            .statistics
            .record(&song.info, song.requester.user_id)
            .await
        {
            warn!("⚠️ Could not record statistics for {}: {:?}", song.title(), e);
        }

        self.cleanup_files().await;
    }

    /// Removes downloaded files nothing refers to any more
    async fn cleanup_files(&self) {
        let mut keep: Vec<PathBuf> = self
            .playlist
            .lock()
            .live_paths()
            .into_iter()
            .map(Path::to_path_buf)
            .collect();

        let dir = self.downloader.download_dir();
        if let Some(stem) = self.downloader.staged_stem() {
            keep.extend(
                self.config
                    .audio_extensions
                    .iter()
                    .map(|ext| dir.join(format!("{}.{}", stem, ext))),
            );
        }

        let extensions: Vec<&str> = self
            .config
            .audio_extensions
            .iter()
            .map(String::as_str)
            .collect();

        if let Err(e) = files::cleanup_orphans(dir, &keep, &extensions).await {
            warn!("⚠️ Cleanup of {} failed: {}", dir.display(), e);
        }
    }

    /// Clears every queue, leaves voice and walks the state down to
    /// DISCONNECTED
    pub async fn teardown(&self) {
        self.downloader.clear();

        let messages = self.playlist.lock().clear();
        if !messages.is_empty() {
            self.notifier.delete(messages).await;
        }

        self.player.lock().await.stop().await;
        self.state_machine.walk_to_disconnected();
        self.cleanup_files().await;
        self.refresh_preview().await;

        info!("👋 Session closed in guild {}", self.guild_id);
    }

    pub async fn pause(&self) -> EngineResult<()> {
        self.state_machine
            .transition_to(PlaybackState::Paused)
            .map_err(|_| EngineError::NotPlaying)?;
        self.player.lock().await.pause().await;
        Ok(())
    }

    /// Takes effect on the next tick
    pub fn resume(&self) -> EngineResult<()> {
        self.state_machine
            .transition_to(PlaybackState::Resumed)
            .map_err(|_| EngineError::NotPaused)
    }

    pub async fn skip(&self) -> EngineResult<()> {
        if self.playlist.lock().is_loop() {
            return Err(EngineError::LoopActive);
        }
        if self.state() != PlaybackState::Playing {
            return Err(EngineError::NotPlaying);
        }

        self.player.lock().await.skip().await;
        Ok(())
    }

    pub async fn toggle_loop(&self) -> bool {
        let enabled = self.playlist.lock().toggle_loop();
        self.refresh_preview().await;
        enabled
    }

    pub async fn toggle_shuffle(&self) -> bool {
        let enabled = self.playlist.lock().toggle_shuffle();
        self.refresh_preview().await;
        enabled
    }

    /// Empties the download queue and the playlist; the current song keeps
    /// playing
    pub async fn clear(&self) {
        self.downloader.clear();
        let dropped = self.playlist.lock().clear_queued();
        debug!("Dropped {} queued songs in guild {}", dropped, self.guild_id);
        self.refresh_preview().await;
    }

    pub async fn stop(&self) -> EngineResult<()> {
        let connected = self.player.lock().await.is_connected();
        if !connected && self.state() == PlaybackState::Disconnected {
            return Err(EngineError::NotPlaying);
        }
        self.teardown().await;
        Ok(())
    }

    /// Posts the current song's lyrics. The attachment and the command
    /// message are dropped with the song's other transient messages.
    pub async fn lyrics(&self, origin: MessageRef) -> EngineResult<()> {
        let (channel, lyrics) = {
            let playlist = self.playlist.lock();
            let song = playlist.current().ok_or(EngineError::NotPlaying)?;
            let lyrics = song
                .lyrics()
                .ok_or_else(|| EngineError::NoLyrics(song.title().to_string()))?;
            (song.requester.origin.channel_id, lyrics.to_string())
        };

        if let Some(message) = self.notifier.send_lyrics(channel, lyrics).await {
            if let Some(current) = self.playlist.lock().current_mut() {
                current.transient.push(message);
                current.transient.push(origin);
            }
        }
        Ok(())
    }

    /// Posts a fresh playlist preview, replacing the previous one
    pub async fn show_playlist(&self, origin: MessageRef) {
        let view = self.playlist_view();
        let sent = self.notifier.send_playlist(origin.channel_id, view).await;

        let previous = {
            let mut preview = self.preview.lock();
            let previous = preview.take();
            *preview = sent.map(|message| Preview {
                message,
                request: origin,
            });
            previous
        };

        if let Some(previous) = previous {
            self.notifier
                .delete(vec![previous.message, previous.request])
                .await;
        }
    }

    /// Re-renders the preview message, if one is shown
    pub async fn refresh_preview(&self) {
        let Some(preview) = *self.preview.lock() else {
            return;
        };
        let view = self.playlist_view();
        self.notifier.update_playlist(preview.message, view).await;
    }

    fn playlist_view(&self) -> PlaylistView {
        let playlist = self.playlist.lock();
        PlaylistView::build(
            playlist.songs(),
            self.downloader.pending_len(),
            self.config.playlist_preview_limit,
            playlist.is_loop(),
            playlist.is_shuffle(),
        )
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

/// One [`Session`] per guild, created on first use
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<Session>>,
    config: EngineConfig,
    collaborators: Collaborators,
}

impl SessionRegistry {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            collaborators,
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<Session> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("Creating session for guild {}", guild_id);
                Arc::new(Session::new(
                    guild_id,
                    self.config.clone(),
                    &self.collaborators,
                ))
            })
            .value()
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl TypeMapKey for SessionRegistry {
    type Value = Arc<SessionRegistry>;
}
