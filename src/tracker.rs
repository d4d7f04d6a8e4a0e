//! Tracker: the scan/dedup/dispatch loop.
//!
//! Every input to the tracker is a [`TrackerEvent`] read from one channel
//! by one loop. Scans run in the background and feed discoveries back into
//! the channel; the worker reports finished conversions the same way. The
//! [`ProcessingRecord`] is only ever touched from that loop.

use crate::config::TrackerConfig;
use crate::converter::{Converter, LocalOutput};
use crate::error::{ConversionError, ScanError};
use crate::library::Library;
use crate::queue::WorkQueue;
use crate::scanner::{Source, scan_library};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything the tracker reacts to.
#[derive(Debug)]
pub enum TrackerEvent {
    /// Time to scan the library.
    Tick,
    /// A chapter with metadata was found.
    Discovered(Source),
    /// A background scan ended.
    ScanFinished(Result<usize, ScanError>),
    /// A chapter or directory could not be read during a scan.
    ScanFailed(ScanError),
    /// A conversion finished and was published.
    Completed { source: Source, output: LocalOutput },
    /// A conversion failed; nothing was published.
    Failed {
        source: Source,
        error: ConversionError,
    },
}

/// Processing state of a source path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    InFlight,
    Completed,
}

/// Which sources are being processed or are done in this run.
///
/// Not persisted: on restart, completion is re-derived from the
/// `completed` markers on disk.
#[derive(Debug, Default)]
pub struct ProcessingRecord {
    entries: HashMap<PathBuf, ProcessingStatus>,
}

impl ProcessingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, path: &Path) -> Option<ProcessingStatus> {
        self.entries.get(path).copied()
    }

    /// Marks `path` in flight. Returns false if it is already tracked.
    pub fn mark_in_flight(&mut self, path: &Path) -> bool {
        if self.entries.contains_key(path) {
            return false;
        }
        self.entries
            .insert(path.to_path_buf(), ProcessingStatus::InFlight);
        true
    }

    pub fn mark_completed(&mut self, path: &Path) {
        self.entries
            .insert(path.to_path_buf(), ProcessingStatus::Completed);
    }

    /// Drops an in-flight mark so a later scan may retry the source.
    pub fn release(&mut self, path: &Path) {
        if self.status(path) == Some(ProcessingStatus::InFlight) {
            self.entries.remove(path);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|status| **status == ProcessingStatus::InFlight)
            .count()
    }
}

/// Outcome of offering a discovered source to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Submitted to the work queue.
    Queued,
    /// Missing the auto-translate category.
    NotTagged,
    /// Already queued or being translated.
    InFlight,
    /// Already translated, in this run or a previous one.
    Completed,
    /// The worker is gone.
    Closed,
}

/// Counters for one tracker lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub discovered: usize,
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    Scanning,
}

/// Owns the event loop, the processing record and the work queue.
pub struct Tracker {
    auto_translate_tag: String,
    scan_interval: Duration,
    library: Library,
    record: ProcessingRecord,
    queue: WorkQueue,
    scan_state: ScanState,
    stats: TrackerStats,
    events_tx: UnboundedSender<TrackerEvent>,
    events_rx: UnboundedReceiver<TrackerEvent>,
    cancel: CancellationToken,
}

impl Tracker {
    /// Creates a tracker and starts its worker.
    pub fn new(config: &TrackerConfig, converter: Converter, cancel: CancellationToken) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let library = converter.library().clone();
        let converter = Arc::new(converter);

        let worker_tx = events_tx.clone();
        let worker_cancel = cancel.clone();
        let queue = WorkQueue::spawn(cancel.clone(), move |source: Source| {
            let converter = converter.clone();
            let events = worker_tx.clone();
            let cancel = worker_cancel.clone();
            async move {
                let event = match converter.convert(&source, &cancel).await {
                    Ok(output) => TrackerEvent::Completed { source, output },
                    Err(error) => TrackerEvent::Failed { source, error },
                };
                let _ = events.send(event);
            }
        });

        Self {
            auto_translate_tag: config.auto_translate_tag.clone(),
            scan_interval: config.scan_interval(),
            library,
            record: ProcessingRecord::new(),
            queue,
            scan_state: ScanState::Idle,
            stats: TrackerStats::default(),
            events_tx,
            events_rx,
            cancel,
        }
    }

    /// Sender for injecting events into the loop.
    pub fn sender(&self) -> UnboundedSender<TrackerEvent> {
        self.events_tx.clone()
    }

    pub fn record(&self) -> &ProcessingRecord {
        &self.record
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// Runs until the cancellation token fires, scanning on every interval.
    pub async fn run(mut self) {
        let ticker = {
            let events = self.events_tx.clone();
            let cancel = self.cancel.clone();
            let period = self.scan_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            if events.send(TrackerEvent::Tick).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        info!(
            interval_secs = self.scan_interval.as_secs(),
            lookup = %self.library.lookup_dir().display(),
            "tracker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }

        let _ = ticker.await;
        info!(pending = self.queue.len(), "tracker stopping");
        self.shutdown().await;
    }

    /// Scans once and waits until every queued conversion has finished.
    pub async fn run_once(&mut self) -> Result<TrackerStats, ScanError> {
        scan_library(self.library.lookup_dir(), &self.events_tx).await?;
        self.settle().await;
        Ok(self.stats)
    }

    /// Handles events until nothing is in flight and the channel is empty.
    pub async fn settle(&mut self) {
        loop {
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle(event).await;
            }
            if self.record.in_flight() == 0 {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
    }

    /// Stops the worker. Queued jobs are dropped if cancellation fired.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }

    /// Applies one event to the tracker state.
    pub async fn handle(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::Tick => self.start_scan(),
            TrackerEvent::ScanFinished(result) => {
                self.scan_state = ScanState::Idle;
                match result {
                    Ok(found) => debug!(found, "scan finished"),
                    Err(e) => error!(error = %e, "scan failed"),
                }
            }
            TrackerEvent::ScanFailed(e) => {
                warn!(error = %e, "skipping unreadable entry");
            }
            TrackerEvent::Discovered(source) => {
                let path = source.path.clone();
                let outcome = self.dispatch(source).await;
                debug!(path = %path.display(), ?outcome, "discovered");
            }
            TrackerEvent::Completed { source, output } => {
                self.record.mark_completed(&source.path);
                self.stats.completed += 1;
                info!(
                    output = %output.output.display(),
                    pages = output.pages,
                    "Translated manga: {}",
                    source.comic_info.label()
                );
            }
            TrackerEvent::Failed { source, error } => {
                self.record.release(&source.path);
                self.stats.failed += 1;
                let manga = source.comic_info.label();
                match error {
                    ConversionError::Cancelled => info!(%manga, "translation cancelled"),
                    ConversionError::NoPages(path) => {
                        warn!(%manga, path = %path.display(), "no images yet, will retry");
                    }
                    error => error!(%manga, error = %error, "translation failed"),
                }
            }
        }
    }

    /// Filters a discovered source and queues it if eligible.
    pub async fn dispatch(&mut self, source: Source) -> Dispatch {
        self.stats.discovered += 1;

        if !source.comic_info.has_category(&self.auto_translate_tag) {
            return Dispatch::NotTagged;
        }

        match self.record.status(&source.path) {
            Some(ProcessingStatus::InFlight) => return Dispatch::InFlight,
            Some(ProcessingStatus::Completed) => return Dispatch::Completed,
            None => {}
        }
        if self.queue.contains(&source.path) {
            return Dispatch::InFlight;
        }

        if self.library.is_completed(&source.comic_info).await {
            self.record.mark_completed(&source.path);
            return Dispatch::Completed;
        }

        self.record.mark_in_flight(&source.path);
        let path = source.path.clone();
        let manga = source.comic_info.label();
        match self.queue.submit(source) {
            Ok(()) => {
                self.stats.queued += 1;
                info!(%manga, queued = self.queue.len(), "queued for translation");
                Dispatch::Queued
            }
            Err(e) => {
                self.record.release(&path);
                warn!(%manga, error = %e, "could not queue");
                Dispatch::Closed
            }
        }
    }

    fn start_scan(&mut self) {
        if self.scan_state == ScanState::Scanning {
            debug!("scan still running, skipping tick");
            return;
        }
        self.scan_state = ScanState::Scanning;

        let lookup = self.library.lookup_dir().to_path_buf();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = scan_library(&lookup, &events).await;
            let _ = events.send(TrackerEvent::ScanFinished(result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comic_info::parse_comic_info;
    use crate::converter::tests::{FakeTranslator, write_chapter};
    use crate::library::COMPLETED_MARKER;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        translator: Arc<FakeTranslator>,
    }

    impl Fixture {
        fn new(translator: FakeTranslator) -> Self {
            Self {
                root: TempDir::new().unwrap(),
                translator: Arc::new(translator),
            }
        }

        fn library(&self) -> Library {
            Library::new(
                self.root.path().join("lookup"),
                self.root.path().join("local"),
                self.root.path().join("temp"),
            )
        }

        fn tracker(&self) -> Tracker {
            let converter = Converter::new(self.translator.clone(), self.library());
            Tracker::new(
                &TrackerConfig::default(),
                converter,
                CancellationToken::new(),
            )
        }

        fn chapter(&self, rel: &str, series: &str, title: &str, pages: &[&str]) -> Source {
            write_chapter(&self.root.path().join("lookup").join(rel), series, title, pages)
        }
    }

    fn with_categories(mut source: Source, categories: &[&str]) -> Source {
        source.comic_info.category = categories.iter().map(|c| c.to_string()).collect();
        source
    }

    #[test]
    fn test_record_transitions() {
        let mut record = ProcessingRecord::new();
        let path = Path::new("/lookup/ext/S/ch1");

        assert!(record.mark_in_flight(path));
        assert!(!record.mark_in_flight(path));
        assert_eq!(record.in_flight(), 1);

        record.release(path);
        assert_eq!(record.status(path), None);

        assert!(record.mark_in_flight(path));
        record.mark_completed(path);
        record.release(path);
        assert_eq!(record.status(path), Some(ProcessingStatus::Completed));
        assert_eq!(record.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_tag_filtering() {
        let fixture = Fixture::new(FakeTranslator::default());
        let mut tracker = fixture.tracker();

        let ongoing = with_categories(
            fixture.chapter("ext/S/ch1", "S", "1", &["1.png"]),
            &["Ongoing"],
        );
        assert_eq!(tracker.dispatch(ongoing).await, Dispatch::NotTagged);

        let tagged = with_categories(
            fixture.chapter("ext/S/ch2", "S", "2", &["1.png"]),
            &["Auto Translate", "Ongoing"],
        );
        assert_eq!(tracker.dispatch(tagged).await, Dispatch::Queued);

        tracker.settle().await;
        assert_eq!(fixture.translator.call_count(), 1);
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_discovery_runs_once() {
        let fixture = Fixture::new(FakeTranslator::default());
        let mut tracker = fixture.tracker();
        let source = fixture.chapter("ext/S/ch1", "S", "1", &["1.png", "2.png"]);

        assert_eq!(tracker.dispatch(source.clone()).await, Dispatch::Queued);
        assert_eq!(tracker.dispatch(source.clone()).await, Dispatch::InFlight);
        tracker.settle().await;
        assert_eq!(tracker.dispatch(source).await, Dispatch::Completed);

        assert_eq!(fixture.translator.call_count(), 2);
        assert_eq!(tracker.stats().completed, 1);
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let fixture = Fixture::new(FakeTranslator::default());
        fixture.chapter("ext/S/ch1", "S", "Chapter 1", &["1.png"]);
        fixture.chapter("ext/S/ch2", "S", "Chapter 2", &["1.png", "2.png"]);

        let done = fixture.root.path().join("local/S/Chapter 1");
        std::fs::create_dir_all(&done).unwrap();
        std::fs::write(done.join(COMPLETED_MARKER), b"").unwrap();

        let mut tracker = fixture.tracker();
        let stats = tracker.run_once().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(fixture.translator.call_count(), 2);

        tracker.run_once().await.unwrap();
        assert_eq!(fixture.translator.call_count(), 2);
        tracker.shutdown().await;

        let mut restarted = fixture.tracker();
        let stats = restarted.run_once().await.unwrap();
        assert_eq!(stats.queued, 0);
        assert_eq!(fixture.translator.call_count(), 2);
        restarted.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_is_retried_on_next_scan() {
        let fixture = Fixture::new(FakeTranslator::failing_on(2));
        fixture.chapter("ext/S/ch1", "S", "Chapter 1", &["1.png", "2.png", "3.png"]);
        let marker = fixture.root.path().join("local/S/Chapter 1").join(COMPLETED_MARKER);

        let mut tracker = fixture.tracker();
        let stats = tracker.run_once().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert!(!marker.exists());
        assert_eq!(tracker.record().in_flight(), 0);

        let stats = tracker.run_once().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert!(marker.exists());
        assert_eq!(fixture.translator.call_count(), 2 + 3);
        tracker.shutdown().await;
    }

    /// Handles events until a scan reports back, returning how many
    /// discoveries it produced.
    async fn handle_until_scan_finished(tracker: &mut Tracker) -> usize {
        let mut discovered = 0;
        loop {
            let event = tracker.events_rx.recv().await.unwrap();
            let finished = matches!(event, TrackerEvent::ScanFinished(_));
            if matches!(event, TrackerEvent::Discovered(_)) {
                discovered += 1;
            }
            tracker.handle(event).await;
            if finished {
                return discovered;
            }
        }
    }

    #[tokio::test]
    async fn test_tick_while_scanning_is_skipped() {
        let fixture = Fixture::new(FakeTranslator::default());
        fixture.chapter("ext/S/ch1", "S", "Chapter 1", &["1.png"]);
        let mut tracker = fixture.tracker();
        let events = tracker.sender();

        events.send(TrackerEvent::Tick).unwrap();
        events.send(TrackerEvent::Tick).unwrap();
        assert_eq!(handle_until_scan_finished(&mut tracker).await, 1);
        assert_eq!(tracker.scan_state, ScanState::Idle);
        tracker.settle().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = tracker.events_rx.try_recv() {
            assert!(
                !matches!(event, TrackerEvent::ScanFinished(_)),
                "second scan started while the first was running"
            );
            tracker.handle(event).await;
        }
        assert_eq!(tracker.stats().discovered, 1);
        assert_eq!(fixture.translator.call_count(), 1);

        let added = fixture.chapter("ext/S/ch2", "S", "Chapter 2", &["1.png"]);
        events.send(TrackerEvent::Tick).unwrap();
        assert_eq!(handle_until_scan_finished(&mut tracker).await, 2);
        tracker.settle().await;

        assert_eq!(tracker.stats().queued, 2);
        assert_eq!(
            tracker.record().status(&added.path),
            Some(ProcessingStatus::Completed)
        );
        assert_eq!(fixture.translator.call_count(), 2);
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_chapter_is_picked_up_once_pages_arrive() {
        let fixture = Fixture::new(FakeTranslator::default());
        let source = fixture.chapter("ext/S/ch1", "S", "Chapter 1", &[]);
        let mut tracker = fixture.tracker();

        let stats = tracker.run_once().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(tracker.record().status(&source.path), None);

        std::fs::write(source.path.join("1.png"), b"1.png").unwrap();
        let stats = tracker.run_once().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(fixture.translator.call_count(), 1);
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_sources_run_in_queue_order() {
        let fixture = Fixture::new(FakeTranslator::default());
        let mut tracker = fixture.tracker();
        let first = fixture.chapter("ext/A/ch1", "A", "1", &["a.png"]);
        let second = fixture.chapter("ext/B/ch1", "B", "1", &["b.png"]);

        tracker.dispatch(first).await;
        tracker.dispatch(second).await;
        tracker.settle().await;

        let calls = fixture.translator.calls.lock().clone();
        assert_eq!(calls, vec![b"a.png".to_vec(), b"b.png".to_vec()]);
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let fixture = Fixture::new(FakeTranslator::default());
        fixture.chapter("ext/S/ch1", "S", "Chapter 1", &["1.png"]);
        let cancel = CancellationToken::new();
        let converter = Converter::new(fixture.translator.clone(), fixture.library());
        let config = TrackerConfig {
            scan_interval_secs: 3600,
            ..TrackerConfig::default()
        };
        let tracker = Tracker::new(&config, converter, cancel.clone());

        let handle = tokio::spawn(tracker.run());
        let marker = fixture.root.path().join("local/S/Chapter 1").join(COMPLETED_MARKER);
        for _ in 0..200 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(marker.exists());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(fixture.translator.call_count(), 1);
    }

    #[test]
    fn test_untagged_metadata_has_no_categories() {
        let info = parse_comic_info("<ComicInfo><Series>S</Series></ComicInfo>").unwrap();
        assert!(!info.has_category(&TrackerConfig::default().auto_translate_tag));
    }
}
