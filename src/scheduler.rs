// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch scheduler: single-flight, serial or bounded-parallel, cooperatively cancellable

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::warn;
use uuid::Uuid;

use crate::activity::ActivityLog;
use crate::config::AnalysisConfig;
use crate::db::{ResultSink, VideoAnalysis};
use crate::engine::AnalysisEngine;
use crate::media::WorkItem;
use crate::{ReelscopeError, Result};

/// Progress report; `completed` only ever grows within a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub current: String,
}

/// Final outcome of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub success: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Default)]
struct Tally {
    success: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, analysis: &VideoAnalysis) {
        if analysis.is_success() {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Clears the single-flight flag when the batch task ends, however it ends
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs batches of work items through the analysis engine.
///
/// Clones share the same single-flight and cancel flags, so a clone can stop a batch
/// started from another.
#[derive(Clone)]
pub struct Scheduler {
    engine: Arc<AnalysisEngine>,
    sink: Arc<dyn ResultSink>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    log: ActivityLog,
}

impl Scheduler {
    pub fn new(engine: Arc<AnalysisEngine>, sink: Arc<dyn ResultSink>) -> Self {
        let log = engine.log().clone();
        Self {
            engine,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            log,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request cancellation; in-flight requests are allowed to finish
    pub fn stop(&self) {
        if self.is_running() {
            self.log.push("[batch] stop requested");
        }
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Start a batch and return immediately.
    ///
    /// Must be called from within a tokio runtime. Fails without side effects when the
    /// input is empty or another batch is still settling.
    pub fn run<P, D>(
        &self,
        items: Vec<WorkItem>,
        config: AnalysisConfig,
        on_progress: P,
        on_done: D,
    ) -> Result<JoinHandle<BatchSummary>>
    where
        P: Fn(Progress) + Send + Sync + 'static,
        D: FnOnce(usize, usize) + Send + 'static,
    {
        if items.is_empty() {
            return Err(ReelscopeError::EmptyBatch);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.log.push("[batch] analysis already running");
            return Err(ReelscopeError::AlreadyRunning);
        }
        let guard = RunningGuard(self.running.clone());
        self.cancel.store(false, Ordering::SeqCst);
        self.log.clear();

        let run_id = Uuid::new_v4();
        let delay = config.effective_delay();
        let sets = items.iter().filter(|i| i.is_image_set()).count();
        let pacing = if config.rpm > 0 {
            format!("{} rpm ({:.1}s)", config.rpm, delay.as_secs_f64())
        } else {
            format!("delay {:.1}s", delay.as_secs_f64())
        };
        self.log.push(format!(
            "[batch {}] starting {} items ({} videos, {} image sets) via {}, concurrency {}, {}",
            run_id,
            items.len(),
            items.len() - sets,
            sets,
            config.provider.display_name(),
            config.concurrency.max(1),
            pacing
        ));

        let batch = Batch {
            engine: self.engine.clone(),
            sink: self.sink.clone(),
            cancel: self.cancel.clone(),
            log: self.log.clone(),
            config: Arc::new(config),
            delay,
            on_progress: Arc::new(on_progress),
        };

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let tally = if batch.config.concurrency <= 1 {
                batch.run_serial(items).await
            } else {
                batch.run_parallel(items).await
            };

            let cancelled = batch.cancelled();
            batch.log.push(format!(
                "[batch {}] finished: {} succeeded, {} failed{}",
                run_id,
                tally.success,
                tally.failed,
                if cancelled { " (cancelled)" } else { "" }
            ));
            on_done(tally.success, tally.failed);

            BatchSummary {
                run_id,
                success: tally.success,
                failed: tally.failed,
                cancelled,
            }
        }))
    }
}

/// State moved into the batch task
struct Batch {
    engine: Arc<AnalysisEngine>,
    sink: Arc<dyn ResultSink>,
    cancel: Arc<AtomicBool>,
    log: ActivityLog,
    config: Arc<AnalysisConfig>,
    delay: Duration,
    on_progress: Arc<dyn Fn(Progress) + Send + Sync>,
}

impl Batch {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn report(&self, completed: usize, total: usize, current: String) {
        (self.on_progress)(Progress { completed, total, current });
    }

    fn persist(&self, analysis: &VideoAnalysis) {
        if let Err(e) = self.sink.upsert(analysis) {
            warn!("Failed to save {}: {}", analysis.aweme_id, e);
            self.log.push(format!("[error] failed to save {}: {}", analysis.aweme_id, e));
        }
    }

    async fn run_serial(&self, items: Vec<WorkItem>) -> Tally {
        let total = items.len();
        let mut tally = Tally::default();

        for (index, item) in items.iter().enumerate() {
            if self.cancelled() {
                self.log.push("[batch] cancelled");
                break;
            }

            let name = item.display_name();
            self.report(index, total, name.clone());
            self.log.push(format!("[{}/{}] {}", index + 1, total, name));

            let analysis = self.engine.analyze_item(item, &self.config).await;
            self.persist(&analysis);
            tally.record(&analysis);
            self.report(index + 1, total, name);

            if index + 1 < total && !self.cancelled() && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        tally
    }

    async fn run_parallel(&self, items: Vec<WorkItem>) -> Tally {
        let total = items.len();
        let mut tally = Tally::default();
        let mut completed = 0;
        let mut queue = items.into_iter();
        let mut in_flight = JoinSet::new();

        // initial fill goes out without pacing
        for item in queue.by_ref().take(self.config.concurrency) {
            self.dispatch(&mut in_flight, item, Duration::ZERO);
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(Some((name, analysis))) => {
                    self.persist(&analysis);
                    tally.record(&analysis);
                    completed += 1;
                    self.log.push(format!("[{}/{}] {}", completed, total, name));
                    self.report(completed, total, name);
                }
                // cancelled while waiting out its delay; never reached the backend
                Ok(None) => {}
                Err(e) => {
                    warn!("Analysis task failed: {}", e);
                    self.log.push(format!("[error] analysis task failed: {}", e));
                    tally.failed += 1;
                    completed += 1;
                    self.report(completed, total, "failed task".to_string());
                }
            }

            if self.cancelled() {
                continue;
            }
            if let Some(item) = queue.next() {
                self.dispatch(&mut in_flight, item, self.delay);
            }
        }

        if self.cancelled() {
            self.log.push("[batch] cancelled");
        }
        tally
    }

    fn dispatch(
        &self,
        in_flight: &mut JoinSet<Option<(String, VideoAnalysis)>>,
        item: WorkItem,
        delay: Duration,
    ) {
        let engine = self.engine.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        in_flight.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }
            }
            let analysis = engine.analyze_item(&item, &config).await;
            Some((item.display_name(), analysis))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::db::Database;
    use crate::engine::tests::FakeFrames;
    use crate::media::{FrameExtractor, ImageBlob};
    use crate::vision::VisionBackend;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    const REPLY: &str = r#"{"tags":["a"],"category":"dance","sexy_level":3}"#;

    /// Backend that sleeps and tracks peak concurrency
    struct SlowVision {
        pause: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        starts: Mutex<Vec<Instant>>,
        finishes: Mutex<Vec<Instant>>,
    }

    impl SlowVision {
        fn new(pause: Duration) -> Arc<Self> {
            Arc::new(Self {
                pause,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                starts: Mutex::new(Vec::new()),
                finishes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VisionBackend for SlowVision {
        async fn describe(&self, _config: &AnalysisConfig, images: &[ImageBlob]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.starts.lock().unwrap().push(Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.pause).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finishes.lock().unwrap().push(Instant::now());

            // a frame whose first byte is 0xFF marks a poisoned item
            if images.iter().any(|i| i.data.first() == Some(&0xFF)) {
                return Err(ReelscopeError::Api { code: 500, body: "boom".into() });
            }
            Ok(REPLY.to_string())
        }
    }

    /// Backend whose every call panics
    struct PanickingVision;

    #[async_trait]
    impl VisionBackend for PanickingVision {
        async fn describe(&self, _config: &AnalysisConfig, _images: &[ImageBlob]) -> Result<String> {
            panic!("backend blew up");
        }
    }

    /// Frame source recording the order it was asked for paths
    #[derive(Default)]
    struct RecordingFrames {
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl FrameExtractor for RecordingFrames {
        async fn extract_frames(&self, path: &Path, _count: u32) -> Result<Vec<ImageBlob>> {
            self.seen.lock().unwrap().push(path.to_path_buf());
            let marker = if path.to_string_lossy().contains("bad") { 0xFF } else { 0 };
            Ok(vec![ImageBlob::jpeg(vec![marker])])
        }
    }

    fn videos(names: &[&str]) -> Vec<WorkItem> {
        names
            .iter()
            .map(|n| WorkItem::Video { path: PathBuf::from(format!("/media/{}.mp4", n)) })
            .collect()
    }

    fn config(concurrency: usize, delay: f64) -> AnalysisConfig {
        let mut config = AnalysisConfig::new(Provider::Gemini, "key");
        config.concurrency = concurrency;
        config.request_delay_secs = delay;
        config
    }

    fn scheduler(
        frames: Arc<dyn FrameExtractor>,
        vision: Arc<dyn VisionBackend>,
    ) -> (Scheduler, Arc<Database>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let engine = Arc::new(AnalysisEngine::new(frames, vision, ActivityLog::new()));
        (Scheduler::new(engine, db.clone()), db)
    }

    #[tokio::test]
    async fn parallel_batch_respects_concurrency_bound() {
        let vision = SlowVision::new(Duration::from_millis(30));
        let (scheduler, db) = scheduler(Arc::new(FakeFrames { count: 1 }), vision.clone());
        let names: Vec<String> = (0..10).map(|i| format!("v{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let done = Arc::new(Mutex::new(None));
        let done_slot = done.clone();

        let handle = scheduler
            .run(
                videos(&refs),
                config(3, 0.0),
                move |p| seen.lock().unwrap().push(p.completed),
                move |s, f| *done_slot.lock().unwrap() = Some((s, f)),
            )
            .unwrap();
        let summary = handle.await.unwrap();

        assert_eq!(summary.success + summary.failed, 10);
        assert_eq!(summary.success, 10);
        assert!(!summary.cancelled);
        assert_eq!(vision.peak.load(Ordering::SeqCst), 3);
        assert_eq!(*done.lock().unwrap(), Some((10, 0)));
        assert_eq!(*progress.lock().unwrap(), (1..=10).collect::<Vec<_>>());
        assert_eq!(db.get_analyzed_ids().unwrap().len(), 10);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn serial_batch_keeps_input_order_and_reports_around_each_item() {
        let frames = Arc::new(RecordingFrames::default());
        let (scheduler, db) = scheduler(frames.clone(), SlowVision::new(Duration::ZERO));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let summary = scheduler
            .run(
                videos(&["c", "a", "bad"]),
                config(1, 0.0),
                move |p| sink.lock().unwrap().push((p.completed, p.current)),
                |_, _| {},
            )
            .unwrap()
            .await
            .unwrap();

        assert_eq!(summary.success, 2);
        assert_eq!(summary.failed, 1);
        let seen: Vec<String> = frames
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(seen, vec!["c", "a", "bad"]);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                (0, "c.mp4".to_string()),
                (1, "c.mp4".to_string()),
                (1, "a.mp4".to_string()),
                (2, "a.mp4".to_string()),
                (2, "bad.mp4".to_string()),
                (3, "bad.mp4".to_string()),
            ]
        );

        let failed = db.get_analysis("bad").unwrap().unwrap();
        assert!(failed.error.as_deref().unwrap().contains("boom"));
        assert!(!db.get_analyzed_ids().unwrap().contains("bad"));
    }

    #[tokio::test]
    async fn serial_batch_waits_between_items() {
        let (scheduler, _db) = scheduler(Arc::new(FakeFrames { count: 1 }), SlowVision::new(Duration::ZERO));

        let started = Instant::now();
        let summary = scheduler
            .run(videos(&["a", "b", "c"]), config(1, 0.05), |_| {}, |_, _| {})
            .unwrap()
            .await
            .unwrap();

        assert_eq!(summary.success, 3);
        // two gaps, none after the last item
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn stop_during_serial_batch_halts_dispatch() {
        let frames = Arc::new(RecordingFrames::default());
        let (scheduler, _db) = scheduler(frames.clone(), SlowVision::new(Duration::from_millis(5)));
        let stopper = scheduler.clone();

        let summary = scheduler
            .run(
                videos(&["a", "b", "c", "d", "e"]),
                config(1, 0.0),
                move |p| {
                    if p.completed == 2 {
                        stopper.stop();
                    }
                },
                |_, _| {},
            )
            .unwrap()
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.success + summary.failed, 2);
        assert_eq!(frames.seen.lock().unwrap().len(), 2);
        assert!(scheduler.engine.log().contains("[batch] cancelled"));
    }

    #[tokio::test]
    async fn stop_during_parallel_batch_drains_in_flight_work() {
        let vision = SlowVision::new(Duration::from_millis(20));
        let frames = Arc::new(RecordingFrames::default());
        let (scheduler, db) = scheduler(frames.clone(), vision.clone());
        let stopper = scheduler.clone();

        let summary = scheduler
            .run(
                videos(&["a", "b", "c", "d", "e", "f"]),
                config(2, 0.0),
                move |p| {
                    if p.completed == 1 {
                        stopper.stop();
                    }
                },
                |_, _| {},
            )
            .unwrap()
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.success, 2);
        assert_eq!(vision.calls.load(Ordering::SeqCst), 2);
        assert_eq!(db.get_analyzed_ids().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_busy() {
        let (scheduler, _db) = scheduler(Arc::new(FakeFrames { count: 1 }), SlowVision::new(Duration::from_millis(50)));

        let first = scheduler
            .run(videos(&["a"]), config(1, 0.0), |_| {}, |_, _| {})
            .unwrap();
        assert!(scheduler.is_running());

        let second = scheduler.run(videos(&["b"]), config(1, 0.0), |_| {}, |_, _| {});
        assert!(matches!(second, Err(ReelscopeError::AlreadyRunning)));
        assert!(scheduler.engine.log().contains("already running"));

        first.await.unwrap();
        assert!(!scheduler.is_running());

        let third = scheduler.run(videos(&["b"]), config(1, 0.0), |_| {}, |_, _| {});
        assert_eq!(third.unwrap().await.unwrap().success, 1);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let (scheduler, _db) = scheduler(Arc::new(FakeFrames { count: 1 }), SlowVision::new(Duration::ZERO));
        let result = scheduler.run(Vec::new(), config(1, 0.0), |_| {}, |_, _| {});
        assert!(matches!(result, Err(ReelscopeError::EmptyBatch)));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn rerun_replaces_records_instead_of_duplicating() {
        let (scheduler, db) = scheduler(Arc::new(FakeFrames { count: 1 }), SlowVision::new(Duration::ZERO));
        for _ in 0..2 {
            scheduler
                .run(videos(&["same"]), config(1, 0.0), |_| {}, |_, _| {})
                .unwrap()
                .await
                .unwrap();
        }
        assert_eq!(db.get_stats().unwrap().total, 1);
    }

    #[tokio::test]
    async fn parallel_delay_applies_to_dispatch_after_initial_fill() {
        let delay = Duration::from_millis(50);
        let pause = Duration::from_millis(20);
        let vision = SlowVision::new(pause);
        let (scheduler, _db) = scheduler(Arc::new(FakeFrames { count: 1 }), vision.clone());

        let summary = scheduler
            .run(videos(&["a", "b", "c", "d"]), config(2, 0.05), |_| {}, |_, _| {})
            .unwrap()
            .await
            .unwrap();
        assert_eq!(summary.success, 4);

        let mut starts = vision.starts.lock().unwrap().clone();
        starts.sort();
        let mut finishes = vision.finishes.lock().unwrap().clone();
        finishes.sort();
        assert_eq!(starts.len(), 4);

        // the initial fill goes out together, unpaced
        assert!(starts[1] - starts[0] < delay);
        // every later request waits out the delay after the completion that freed its slot
        assert!(starts[2] >= finishes[0] + delay);
        assert!(starts[3] >= finishes[1] + delay);
    }

    #[tokio::test]
    async fn panicked_task_is_counted_and_reported() {
        let (scheduler, _db) = scheduler(Arc::new(FakeFrames { count: 1 }), Arc::new(PanickingVision));

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let summary = scheduler
            .run(
                videos(&["a", "b", "c"]),
                config(2, 0.0),
                move |p| seen.lock().unwrap().push(p.completed),
                |_, _| {},
            )
            .unwrap()
            .await
            .unwrap();

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.success, 0);
        assert_eq!(*progress.lock().unwrap(), vec![1, 2, 3]);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn new_batch_starts_with_a_fresh_log() {
        let (scheduler, _db) = scheduler(Arc::new(FakeFrames { count: 1 }), SlowVision::new(Duration::ZERO));
        scheduler.engine.log().push("left over from last time");

        scheduler
            .run(videos(&["a"]), config(1, 0.0), |_| {}, |_, _| {})
            .unwrap()
            .await
            .unwrap();

        let log = scheduler.engine.log();
        assert!(!log.contains("left over from last time"));
        assert!(log.snapshot()[0].contains("starting 1 items"));
    }
}
