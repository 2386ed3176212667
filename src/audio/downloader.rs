use parking_lot::Mutex;
use rand::Rng;
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{
    files,
    song::{MessageRef, PlaybackRequest, ResolvedTrack, TrackInfo},
};
use crate::{
    error::{EngineError, EngineResult},
    sources::{split_catalog_query, LyricsLookup, SourceResolver},
};

/// A request that resolved successfully, ready for the playlist
#[derive(Debug)]
pub struct Resolved {
    pub request: PlaybackRequest,
    pub track: ResolvedTrack,
    pub lyrics: Option<String>,
}

#[derive(Debug, Default)]
struct DownloadQueue {
    pending: VecDeque<PlaybackRequest>,
    /// Popped and currently being resolved
    in_flight: Option<PlaybackRequest>,
    /// File stem of the download in progress or not yet handed to the playlist
    staged_stem: Option<String>,
    /// `clear` ran while `in_flight` was being resolved; dies with that item
    cancelled: bool,
    /// A drain loop owns this queue
    draining: bool,
}

impl DownloadQueue {
    fn reserved(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }
}

/// Serializes resolution of pending requests.
///
/// Capacity reserved here (pending plus the one in flight) counts against the
/// playlist's maximum, so a request is only admitted when there is room for
/// it once resolved.
pub struct Downloader {
    queue: Mutex<DownloadQueue>,
    resolver: Arc<dyn SourceResolver>,
    lyrics: Option<Arc<dyn LyricsLookup>>,
    /// Shared across sessions: one resolution at a time process-wide
    workers: Arc<Semaphore>,
    download_dir: PathBuf,
    max_duration: u64,
}

impl Downloader {
    pub fn new(
        resolver: Arc<dyn SourceResolver>,
        lyrics: Option<Arc<dyn LyricsLookup>>,
        workers: Arc<Semaphore>,
        download_dir: PathBuf,
        max_duration: u64,
    ) -> Self {
        Self {
            queue: Mutex::new(DownloadQueue::default()),
            resolver,
            lyrics,
            workers,
            download_dir,
            max_duration,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Reserves a slot for `request`.
    ///
    /// Returns `Ok(false)` when the same ask from the same message is already
    /// pending; it is not queued twice.
    pub fn enqueue(
        &self,
        request: PlaybackRequest,
        playlist_len: usize,
        max_size: usize,
    ) -> EngineResult<bool> {
        let mut queue = self.queue.lock();

        if queue.pending.iter().any(|p| p.same_ask(&request)) {
            debug!("Duplicate request ignored: {}", request.query);
            return Ok(false);
        }

        if queue.reserved() + playlist_len >= max_size {
            return Err(EngineError::CapacityExceeded { max: max_size });
        }

        debug!("📥 Queued for download: {}", request.query);
        queue.pending.push_back(request);
        Ok(true)
    }

    /// Marks the drain loop as running. `true` means the caller must start it.
    pub fn claim_drain(&self) -> bool {
        let mut queue = self.queue.lock();
        if queue.draining {
            false
        } else {
            queue.draining = true;
            true
        }
    }

    /// Pops the next request (random under shuffle, FIFO otherwise). An empty
    /// queue releases the drain claim under the same lock.
    pub fn pop_next(&self, shuffle: bool) -> Option<PlaybackRequest> {
        let mut queue = self.queue.lock();
        if queue.pending.is_empty() {
            queue.draining = false;
            return None;
        }

        let index = if shuffle {
            rand::thread_rng().gen_range(0..queue.pending.len())
        } else {
            0
        };
        let request = queue.pending.remove(index)?;
        queue.in_flight = Some(request.clone());
        Some(request)
    }

    /// Resolves one popped request: duration check, optional lyrics, download.
    pub async fn resolve(&self, request: PlaybackRequest) -> EngineResult<Resolved> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| EngineError::Resolution(request.query.clone()))?;

        let query = request.search_query();
        info!("🔍 Resolving: {}", query);

        let info = self.resolver.probe(&query).await.map_err(|e| {
            warn!("⚠️ Could not resolve {}: {:?}", query, e);
            EngineError::Resolution(request.query.clone())
        })?;
        self.check_duration(&info)?;

        let lyrics = if request.from_catalog {
            self.find_lyrics(&request.query).await
        } else {
            None
        };

        let stem = format!("{:016x}", fastrand::u64(..));
        self.queue.lock().staged_stem = Some(stem.clone());

        let track = self
            .resolver
            .download(&query, &self.download_dir, &stem)
            .await
            .map_err(|e| {
                warn!("⚠️ Download failed for {}: {:?}", query, e);
                EngineError::Resolution(request.query.clone())
            })?;

        if let Err(e) = self.check_duration(&track.info) {
            files::remove_quietly(&track.path).await;
            return Err(e);
        }

        Ok(Resolved {
            request,
            track,
            lyrics,
        })
    }

    /// Whether `clear` ran while the current item was in flight
    pub fn is_cancelled(&self) -> bool {
        self.queue.lock().cancelled
    }

    /// The in-flight item is done, whatever the outcome. Its cancellation
    /// goes with it.
    pub fn finish_in_flight(&self) {
        let mut queue = self.queue.lock();
        queue.in_flight = None;
        queue.staged_stem = None;
        queue.cancelled = false;
    }

    /// Empties the pending queue. A resolution already in flight is
    /// discarded when it completes instead of reaching the playlist.
    pub fn clear(&self) {
        let mut queue = self.queue.lock();
        if queue.in_flight.is_some() {
            queue.cancelled = true;
        }
        if !queue.pending.is_empty() {
            info!("🗑️ Download queue cleared ({} pending)", queue.pending.len());
        }
        queue.pending.clear();
    }

    /// Reserved capacity: pending plus in flight
    pub fn pending_len(&self) -> usize {
        self.queue.lock().reserved()
    }

    /// Requests still waiting, excluding the one in flight
    pub fn queued(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// True if a waiting request came from `origin`
    pub fn references_origin(&self, origin: &MessageRef) -> bool {
        let queue = self.queue.lock();
        queue
            .pending
            .iter()
            .chain(queue.in_flight.iter())
            .any(|r| r.requester.origin == *origin)
    }

    /// Same as [`references_origin`](Self::references_origin) minus the in-flight item
    pub fn pending_from(&self, origin: &MessageRef) -> bool {
        self.queue
            .lock()
            .pending
            .iter()
            .any(|r| r.requester.origin == *origin)
    }

    /// Stem of the file the in-flight item writes; cleanup must spare it
    pub fn staged_stem(&self) -> Option<String> {
        self.queue.lock().staged_stem.clone()
    }

    fn check_duration(&self, info: &TrackInfo) -> EngineResult<()> {
        if info.duration > self.max_duration {
            warn!(
                "⏱️ {} is too long ({}s > {}s)",
                info.title, info.duration, self.max_duration
            );
            return Err(EngineError::DurationExceeded {
                title: info.title.clone(),
                actual: info.duration,
                allowed: self.max_duration,
            });
        }
        Ok(())
    }

    async fn find_lyrics(&self, query: &str) -> Option<String> {
        let lookup = self.lyrics.as_ref()?;
        let (title, artist) = split_catalog_query(query);

        match lookup.find(title, artist).await {
            Ok(lyrics) => lyrics,
            Err(e) => {
                debug!("No lyrics for {}: {:?}", query, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::song::fixtures::{requester, track};
    use crate::sources::{MockLyricsLookup, MockSourceResolver};
    use pretty_assertions::assert_eq;

    fn downloader(resolver: MockSourceResolver, lyrics: Option<MockLyricsLookup>) -> Downloader {
        Downloader::new(
            Arc::new(resolver),
            lyrics.map(|l| Arc::new(l) as Arc<dyn LyricsLookup>),
            Arc::new(Semaphore::new(1)),
            PathBuf::from("downloads"),
            1200,
        )
    }

    fn request(query: &str, message: u64) -> PlaybackRequest {
        PlaybackRequest::new(query, requester(1, message))
    }

    fn resolver_with_duration(duration: u64) -> MockSourceResolver {
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_probe()
            .returning(move |q| Ok(track(q, duration).info));
        resolver
            .expect_download()
            .returning(move |q, _, _| Ok(track(q, duration)));
        resolver
    }

    #[test]
    fn enqueue_stops_at_shared_capacity() {
        let downloader = downloader(MockSourceResolver::new(), None);
        for i in 0..3 {
            assert_eq!(downloader.enqueue(request(&format!("q{}", i), i), 2, 5), Ok(true));
        }
        assert_eq!(
            downloader.enqueue(request("q3", 3), 2, 5),
            Err(EngineError::CapacityExceeded { max: 5 })
        );
        assert_eq!(downloader.pending_len(), 3);
    }

    #[test]
    fn in_flight_item_keeps_its_reservation() {
        let downloader = downloader(MockSourceResolver::new(), None);
        downloader.enqueue(request("a", 1), 0, 2).unwrap();
        downloader.enqueue(request("b", 2), 0, 2).unwrap();
        downloader.pop_next(false);

        assert_eq!(downloader.queued(), 1);
        assert_eq!(downloader.pending_len(), 2);
        assert!(downloader.enqueue(request("c", 3), 0, 2).is_err());
    }

    #[test]
    fn duplicate_asks_from_one_message_are_skipped() {
        let downloader = downloader(MockSourceResolver::new(), None);
        assert_eq!(downloader.enqueue(request("same", 7), 0, 5), Ok(true));
        assert_eq!(downloader.enqueue(request("same", 7), 0, 5), Ok(false));
        assert_eq!(downloader.enqueue(request("same", 8), 0, 5), Ok(true));
        assert_eq!(downloader.queued(), 2);
    }

    #[test]
    fn pop_is_fifo_and_releases_claim_when_empty() {
        let downloader = downloader(MockSourceResolver::new(), None);
        downloader.enqueue(request("first", 1), 0, 5).unwrap();
        downloader.enqueue(request("second", 2), 0, 5).unwrap();

        assert!(downloader.claim_drain());
        assert!(!downloader.claim_drain());

        assert_eq!(downloader.pop_next(false).unwrap().query, "first");
        downloader.finish_in_flight();
        assert_eq!(downloader.pop_next(false).unwrap().query, "second");
        downloader.finish_in_flight();
        assert!(downloader.pop_next(false).is_none());

        assert!(downloader.claim_drain());
    }

    #[tokio::test]
    async fn long_media_is_rejected_before_download() {
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_probe()
            .returning(|q| Ok(track(q, 2000).info));
        resolver.expect_download().never();

        let downloader = downloader(resolver, None);
        let err = downloader.resolve(request("long mix", 1)).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::DurationExceeded {
                title: "long mix".into(),
                actual: 2000,
                allowed: 1200
            }
        );
    }

    #[tokio::test]
    async fn resolver_failure_is_a_resolution_error() {
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_probe()
            .returning(|_| Err(anyhow::anyhow!("not found")));

        let downloader = downloader(resolver, None);
        assert_eq!(
            downloader.resolve(request("nothing", 1)).await.unwrap_err(),
            EngineError::Resolution("nothing".into())
        );
    }

    #[tokio::test]
    async fn catalog_requests_fetch_lyrics_and_search_for_audio() {
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_probe()
            .withf(|q| q == "Daft Punk - Veridis Quo audio")
            .returning(|q| Ok(track(q, 300).info));
        resolver
            .expect_download()
            .withf(|q, _, stem| q == "Daft Punk - Veridis Quo audio" && stem.len() == 16)
            .returning(|q, _, _| Ok(track(q, 300)));

        let mut lyrics = MockLyricsLookup::new();
        lyrics
            .expect_find()
            .withf(|title, artist| title == "Veridis Quo" && artist == "Daft Punk")
            .returning(|_, _| Ok(Some("instrumental".into())));

        let downloader = downloader(resolver, Some(lyrics));
        let resolved = downloader
            .resolve(PlaybackRequest::from_catalog(
                "Daft Punk - Veridis Quo",
                requester(1, 1),
            ))
            .await
            .unwrap();

        assert_eq!(resolved.lyrics.as_deref(), Some("instrumental"));
        assert!(downloader.staged_stem().is_some());
        downloader.finish_in_flight();
        assert_eq!(downloader.staged_stem(), None);
    }

    #[tokio::test]
    async fn lyrics_failure_is_not_an_error() {
        let mut lyrics = MockLyricsLookup::new();
        lyrics
            .expect_find()
            .returning(|_, _| Err(anyhow::anyhow!("genius down")));

        let downloader = downloader(resolver_with_duration(100), Some(lyrics));
        let resolved = downloader
            .resolve(PlaybackRequest::from_catalog("A - B", requester(1, 1)))
            .await
            .unwrap();
        assert_eq!(resolved.lyrics, None);
    }

    #[tokio::test]
    async fn plain_requests_skip_lyrics() {
        let mut lyrics = MockLyricsLookup::new();
        lyrics.expect_find().never();

        let downloader = downloader(resolver_with_duration(100), Some(lyrics));
        assert!(downloader.resolve(request("song", 1)).await.is_ok());
    }

    #[test]
    fn clear_flags_only_in_flight_work() {
        let downloader = downloader(MockSourceResolver::new(), None);
        downloader.enqueue(request("a", 1), 0, 5).unwrap();
        downloader.clear();
        assert!(!downloader.is_cancelled());

        downloader.enqueue(request("b", 2), 0, 5).unwrap();
        downloader.enqueue(request("c", 3), 0, 5).unwrap();
        downloader.pop_next(false);
        downloader.clear();

        assert_eq!(downloader.queued(), 0);
        assert!(downloader.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_ends_with_a_failed_in_flight_item() {
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_probe()
            .returning(|_| Err(anyhow::anyhow!("not found")));

        let downloader = downloader(resolver, None);
        downloader.enqueue(request("bad", 1), 0, 5).unwrap();
        let popped = downloader.pop_next(false).unwrap();
        downloader.clear();

        assert!(downloader.resolve(popped).await.is_err());
        downloader.finish_in_flight();
        assert!(!downloader.is_cancelled());

        downloader.enqueue(request("good", 2), 0, 5).unwrap();
        downloader.pop_next(false);
        assert!(!downloader.is_cancelled());
    }

    #[test]
    fn origins_are_tracked_across_pending_and_in_flight() {
        let downloader = downloader(MockSourceResolver::new(), None);
        let origin = requester(1, 42).origin;
        downloader.enqueue(request("a", 42), 0, 5).unwrap();
        downloader.pop_next(false);

        assert!(downloader.references_origin(&origin));
        assert!(!downloader.pending_from(&origin));

        downloader.finish_in_flight();
        assert!(!downloader.references_origin(&origin));
    }
}
