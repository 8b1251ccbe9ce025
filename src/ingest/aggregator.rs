//! Album aggregation
//!
//! Telegram delivers an album as independent messages sharing a media group id.
//! The aggregator collects them per `(chat, album)` key and hands one [`Batch`]
//! to its [`BatchSink`] once no new item arrived for the quiescence window.
//!
//! Per key: `Open` -> `Finalizing` -> closed (removed from the live table and
//! remembered for a retention window). Every new arrival on an `Open` key pushes
//! its deadline forward; the single timer task of that key simply sleeps again
//! until the current deadline, so no cancellation signal is needed. Items that
//! arrive for a finalizing or closed key become orphans and are saved on their own.
//!
//! Timer and dispatch tasks are tracked; [`AlbumAggregator::shutdown`] finalizes
//! every open album at once and waits for all in-flight batches.

use super::notification::{AlbumKey, Batch, BatchOrigin, MediaNotification};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Upper bound on remembered closed albums
const CLOSED_ALBUM_CAPACITY: u64 = 10_000;

/// Consumer of finalized batches
#[async_trait]
pub trait BatchSink: Send + Sync + 'static {
    /// Process one finalized batch
    async fn finalize(&self, batch: Batch);
}

/// What happened to an ingested notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No album id: dispatched immediately as its own batch
    Standalone,
    /// First item of a new album; quiescence timer armed
    Opened,
    /// Added to an open album; deadline extended
    Appended,
    /// Album already finalized: dispatched immediately as its own batch
    Orphan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlbumState {
    Open,
    Finalizing,
}

#[derive(Debug)]
struct AlbumGroup {
    items: Vec<MediaNotification>,
    created_at: Instant,
    last_update: Instant,
    state: AlbumState,
}

impl AlbumGroup {
    fn open(first: MediaNotification, now: Instant) -> Self {
        Self {
            items: vec![first],
            created_at: now,
            last_update: now,
            state: AlbumState::Open,
        }
    }

    fn is_open(&self) -> bool {
        self.state == AlbumState::Open
    }

    fn push(&mut self, item: MediaNotification, now: Instant) {
        self.items.push(item);
        self.last_update = now;
    }
}

/// Groups album notifications and emits one batch per album or standalone item
pub struct AlbumAggregator<S: BatchSink> {
    groups: DashMap<AlbumKey, AlbumGroup>,
    closed: Cache<AlbumKey, ()>,
    quiescence: Duration,
    sink: Arc<S>,
    tasks: TaskTracker,
    flush: CancellationToken,
}

impl<S: BatchSink> AlbumAggregator<S> {
    /// Create an aggregator feeding `sink`.
    ///
    /// `quiescence` is the quiet period that completes an album; `closed_retention`
    /// is how long finalized album ids are remembered to classify late arrivals.
    #[must_use]
    pub fn new(sink: Arc<S>, quiescence: Duration, closed_retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            groups: DashMap::new(),
            closed: Cache::builder()
                .max_capacity(CLOSED_ALBUM_CAPACITY)
                .time_to_live(closed_retention)
                .build(),
            quiescence,
            sink,
            tasks: TaskTracker::new(),
            flush: CancellationToken::new(),
        })
    }

    /// Finalize every open album now and wait until all batches are processed.
    ///
    /// Items ingested afterwards are still finalized and awaited if they arrive
    /// before the wait completes; albums opened later close without waiting.
    pub async fn shutdown(&self) {
        info!(
            open_albums = self.open_albums(),
            in_flight = self.tasks.len(),
            "Flushing albums before shutdown"
        );
        self.flush.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("All batches processed");
    }

    /// Number of albums still collecting items
    #[must_use]
    pub fn open_albums(&self) -> usize {
        self.groups.iter().filter(|g| g.is_open()).count()
    }

    /// Route one notification. Never blocks on downloads or timers.
    pub fn ingest(self: &Arc<Self>, notification: MediaNotification) -> IngestOutcome {
        let Some(key) = notification.album_key() else {
            self.dispatch(Batch::single(notification, BatchOrigin::Standalone));
            return IngestOutcome::Standalone;
        };

        let now = Instant::now();
        // Shard guard is released at the end of this statement
        let placed = match self.groups.entry(key.clone()) {
            Entry::Occupied(mut entry) if entry.get().is_open() => {
                entry.get_mut().push(notification, now);
                Ok(IngestOutcome::Appended)
            }
            Entry::Occupied(_) => Err(notification),
            Entry::Vacant(_) if self.closed.contains_key(&key) => Err(notification),
            Entry::Vacant(entry) => {
                entry.insert(AlbumGroup::open(notification, now));
                Ok(IngestOutcome::Opened)
            }
        };

        match placed {
            Ok(IngestOutcome::Opened) => {
                debug!(album = %key, "Album opened");
                self.arm_timer(key);
                IngestOutcome::Opened
            }
            Ok(outcome) => {
                debug!(album = %key, "Album item appended");
                outcome
            }
            Err(orphan) => {
                warn!(
                    album = %key,
                    message_id = orphan.message_id,
                    "Item arrived after its album was finalized; saving it separately"
                );
                self.dispatch(Batch::single(orphan, BatchOrigin::Orphan));
                IngestOutcome::Orphan
            }
        }
    }

    fn dispatch(&self, batch: Batch) {
        let sink = Arc::clone(&self.sink);
        self.tasks.spawn(async move {
            sink.finalize(batch).await;
        });
    }

    fn arm_timer(self: &Arc<Self>, key: AlbumKey) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            this.run_timer(key).await;
        });
    }

    /// Single timer task of one album key
    async fn run_timer(&self, key: AlbumKey) {
        loop {
            let deadline = match self.groups.get(&key) {
                Some(group) => group.last_update + self.quiescence,
                None => return,
            };
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {}
                () = self.flush.cancelled() => {}
            }
            let flushing = self.flush.is_cancelled();

            let ready = match self.groups.get_mut(&key) {
                Some(group) if !group.is_open() => return,
                Some(mut group)
                    if flushing || group.last_update + self.quiescence <= Instant::now() =>
                {
                    group.state = AlbumState::Finalizing;
                    Some((std::mem::take(&mut group.items), group.created_at))
                }
                // Deadline moved by a new arrival
                Some(_) => None,
                None => return,
            };

            if let Some((items, created_at)) = ready {
                info!(
                    album = %key,
                    items = items.len(),
                    flushing,
                    collected_ms = created_at.elapsed().as_millis(),
                    "Album complete"
                );
                let batch = Batch {
                    chat_id: key.chat_id,
                    album_id: Some(key.album_id.clone()),
                    items,
                    origin: BatchOrigin::Album,
                };
                self.sink.finalize(batch).await;

                // Mark closed before leaving the live table so late items stay orphans
                self.closed.insert(key.clone(), ()).await;
                self.groups.remove(&key);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::notification::sample;
    use tokio::sync::{mpsc, Notify};

    const WINDOW: Duration = Duration::from_secs(2);
    const RETENTION: Duration = Duration::from_secs(60);

    struct RecordingSink {
        tx: mpsc::UnboundedSender<Batch>,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn finalize(&self, batch: Batch) {
            let _ = self.tx.send(batch);
        }
    }

    fn aggregator() -> (
        Arc<AlbumAggregator<RecordingSink>>,
        mpsc::UnboundedReceiver<Batch>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let agg = AlbumAggregator::new(Arc::new(RecordingSink { tx }), WINDOW, RETENTION);
        (agg, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Batch>) -> Batch {
        rx.recv().await.expect("sink channel open")
    }

    #[tokio::test(start_paused = true)]
    async fn test_album_within_window_is_one_batch() {
        let (agg, mut rx) = aggregator();

        assert_eq!(agg.ingest(sample(1, 10, Some("g"))), IngestOutcome::Opened);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(agg.ingest(sample(1, 11, Some("g"))), IngestOutcome::Appended);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(agg.ingest(sample(1, 12, Some("g"))), IngestOutcome::Appended);

        let batch = next(&mut rx).await;
        assert_eq!(batch.origin, BatchOrigin::Album);
        assert_eq!(batch.album_id.as_deref(), Some("g"));
        let ids: Vec<i32> = batch.items.iter().map(|n| n.message_id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert_eq!(batch.reply_anchor(), Some(12));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(agg.open_albums(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_is_not_delayed() {
        let (agg, mut rx) = aggregator();
        let start = Instant::now();

        assert_eq!(agg.ingest(sample(5, 1, None)), IngestOutcome::Standalone);
        let batch = next(&mut rx).await;

        assert!(start.elapsed() < WINDOW);
        assert_eq!(batch.origin, BatchOrigin::Standalone);
        assert_eq!(batch.items.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_arrival_extends_the_window() {
        let (agg, mut rx) = aggregator();
        let start = Instant::now();

        agg.ingest(sample(1, 1, Some("g")));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        agg.ingest(sample(1, 2, Some("g")));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(agg.open_albums(), 1);
        agg.ingest(sample(1, 3, Some("g")));

        let batch = next(&mut rx).await;
        assert_eq!(batch.items.len(), 3);
        assert!(start.elapsed() >= Duration::from_millis(3000) + WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_longer_than_window_splits_batches() {
        let (agg, mut rx) = aggregator();

        agg.ingest(sample(1, 1, Some("g")));
        let first = next(&mut rx).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = agg.ingest(sample(1, 2, Some("g")));
        assert_eq!(outcome, IngestOutcome::Orphan);
        let second = next(&mut rx).await;

        assert_eq!(first.items.len(), 1);
        assert_eq!(first.items[0].message_id, 1);
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].message_id, 2);
        assert_eq!(second.origin, BatchOrigin::Orphan);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_album_id_in_different_chats_is_independent() {
        let (agg, mut rx) = aggregator();

        agg.ingest(sample(1, 1, Some("g")));
        assert_eq!(agg.ingest(sample(2, 1, Some("g"))), IngestOutcome::Opened);
        agg.ingest(sample(1, 2, Some("g")));

        let mut sizes = vec![];
        for _ in 0..2 {
            let b = next(&mut rx).await;
            sizes.push((b.chat_id, b.items.len()));
        }
        sizes.sort_unstable();
        assert_eq!(sizes, vec![(1, 2), (2, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_open_albums_immediately() {
        let (agg, mut rx) = aggregator();
        let start = Instant::now();

        for id in 1..=3 {
            agg.ingest(sample(1, id, Some("g")));
        }
        agg.ingest(sample(2, 1, Some("other")));
        assert_eq!(agg.open_albums(), 2);

        agg.shutdown().await;

        assert!(start.elapsed() < WINDOW);
        assert_eq!(agg.open_albums(), 0);
        let mut sizes = vec![];
        while let Ok(batch) = rx.try_recv() {
            assert_eq!(batch.origin, BatchOrigin::Album);
            sizes.push((batch.chat_id, batch.items.len()));
        }
        sizes.sort_unstable();
        assert_eq!(sizes, vec![(1, 3), (2, 1)]);
    }

    struct SlowSink {
        done: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl BatchSink for SlowSink {
        async fn finalize(&self, _batch: Batch) {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_batches() {
        let sink = Arc::new(SlowSink {
            done: std::sync::atomic::AtomicUsize::new(0),
        });
        let agg = AlbumAggregator::new(Arc::clone(&sink), WINDOW, RETENTION);

        agg.ingest(sample(1, 1, None));
        agg.ingest(sample(1, 2, Some("g")));
        agg.shutdown().await;

        assert_eq!(sink.done.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    struct GatedSink {
        tx: mpsc::UnboundedSender<Batch>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl BatchSink for GatedSink {
        async fn finalize(&self, batch: Batch) {
            if batch.origin == BatchOrigin::Album {
                self.entered.notify_one();
                self.release.notified().await;
            }
            let _ = self.tx.send(batch);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_while_finalizing_is_orphan() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = Arc::new(GatedSink {
            tx,
            entered: Notify::new(),
            release: Notify::new(),
        });
        let agg = AlbumAggregator::new(Arc::clone(&sink), WINDOW, RETENTION);

        agg.ingest(sample(1, 1, Some("g")));
        agg.ingest(sample(1, 2, Some("g")));
        sink.entered.notified().await;

        assert_eq!(agg.ingest(sample(1, 3, Some("g"))), IngestOutcome::Orphan);
        let orphan = next(&mut rx).await;
        assert_eq!(orphan.items[0].message_id, 3);

        sink.release.notify_one();
        let album = next(&mut rx).await;
        assert_eq!(album.items.len(), 2);
        assert!(album.items.iter().all(|n| n.message_id != 3));
    }
}
