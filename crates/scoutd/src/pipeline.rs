//! The recognition loop: frame source → detection → embedding → matching,
//! run on a dedicated OS thread.

use scout_core::{
    recognize_faces, EmbedderError, FaceEmbedder, Frame, LatestFrame, Matcher, RecognitionResult,
    SharedGallery,
};
use scout_hw::source::sleep_unless_cancelled;
use scout_hw::{FrameSource, RetryPolicy, SourceError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

/// Reports buffered per subscriber before a slow one starts missing frames.
pub const REPORT_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame source exhausted: {0}")]
    SourceExhausted(#[source] SourceError),
    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("pipeline thread panicked")]
    Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Stopped,
}

/// Everything one processed frame produced.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub sequence: u64,
    /// The frame with recognition boxes drawn on it.
    pub frame: Arc<Frame>,
    pub results: Vec<RecognitionResult>,
    /// At least one result carries a known label.
    pub known_present: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Linear downscale applied before detection; 1 detects at full size.
    pub downscale: u32,
    pub cycle_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            downscale: 4,
            cycle_delay: Duration::from_millis(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-frame recognition plus the state it shares with the rest of the daemon.
pub struct RecognitionPipeline<E, M> {
    embedder: Arc<Mutex<E>>,
    matcher: M,
    gallery: SharedGallery,
    latest: LatestFrame,
    settings: PipelineSettings,
}

impl<E, M> RecognitionPipeline<E, M>
where
    E: FaceEmbedder + Send + 'static,
    M: Matcher + Send + 'static,
{
    pub fn new(
        embedder: Arc<Mutex<E>>,
        matcher: M,
        gallery: SharedGallery,
        latest: LatestFrame,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            matcher,
            gallery,
            latest,
            settings,
        }
    }

    /// Detect every face in `frame` and match each against the gallery.
    ///
    /// Detection runs on a copy downscaled by `settings.downscale`. The
    /// gallery read lock is held for one comparison at a time.
    pub fn recognize(&self, frame: &Frame) -> Result<Vec<RecognitionResult>, EmbedderError> {
        let mut embedder = self.embedder.lock().unwrap_or_else(PoisonError::into_inner);
        recognize_faces(&mut *embedder, frame, self.settings.downscale, |embedding| {
            let gallery = self.gallery.read().unwrap_or_else(PoisonError::into_inner);
            self.matcher.compare(embedding, &gallery)
        })
    }

    /// Start the loop on its own thread. The source is owned by that thread
    /// and dropped when the loop exits, whatever the reason.
    pub fn spawn(self, source: Box<dyn FrameSource>) -> Result<PipelineHandle, PipelineError> {
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(PipelineState::Running);
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            pipeline: self,
            reports: reports.clone(),
            shutdown: shutdown.clone(),
            known_present: false,
        };

        let thread = std::thread::Builder::new()
            .name("scout-pipeline".into())
            .spawn(move || {
                tracing::info!(source = %source.describe(), "pipeline started");
                let result = worker.run(source);
                match &result {
                    Ok(()) => tracing::info!("pipeline stopped"),
                    Err(e) => tracing::error!(error = %e, "pipeline stopped"),
                }
                state_tx.send_replace(PipelineState::Stopped);
                result
            })?;

        Ok(PipelineHandle {
            shutdown,
            state: state_rx,
            reports,
            thread: Some(thread),
        })
    }
}

struct Worker<E, M> {
    pipeline: RecognitionPipeline<E, M>,
    reports: broadcast::Sender<FrameReport>,
    shutdown: Arc<AtomicBool>,
    known_present: bool,
}

impl<E, M> Worker<E, M>
where
    E: FaceEmbedder + Send + 'static,
    M: Matcher + Send + 'static,
{
    fn run(mut self, mut source: Box<dyn FrameSource>) -> Result<(), PipelineError> {
        let settings = self.pipeline.settings;

        while !self.shutdown.load(Ordering::Acquire) {
            match source.next_frame() {
                Ok(Some(frame)) => self.cycle(frame),
                Ok(None) => tracing::debug!("empty cycle"),
                Err(SourceError::Cancelled) => break,
                Err(e) => {
                    tracing::warn!(source = %source.describe(), error = %e, "frame source failed; reconnecting");
                    match settings.retry.retry(&self.shutdown, |_| source.reconnect()) {
                        Ok(()) => {
                            tracing::info!(source = %source.describe(), "frame source reconnected");
                            continue;
                        }
                        Err(SourceError::Cancelled) => break,
                        Err(e) => {
                            tracing::error!(
                                source = %source.describe(),
                                attempts = settings.retry.max_attempts,
                                error = %e,
                                "frame source unavailable; giving up"
                            );
                            return Err(PipelineError::SourceExhausted(e));
                        }
                    }
                }
            }

            if !sleep_unless_cancelled(settings.cycle_delay, &self.shutdown) {
                break;
            }
        }
        Ok(())
    }

    fn cycle(&mut self, frame: Frame) {
        let frame = Arc::new(frame);
        self.pipeline.latest.publish(frame.clone());

        let results = match self.pipeline.recognize(&frame) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "recognition failed; skipping frame");
                return;
            }
        };

        for result in &results {
            tracing::debug!(
                sequence = frame.sequence,
                label = %result.label,
                distance = result.distance,
                "face"
            );
        }

        let known_present = results.iter().any(|r| r.label.is_known());
        if known_present != self.known_present {
            let labels: Vec<&str> = results.iter().filter_map(|r| r.label.as_known()).collect();
            tracing::info!(known_present, ?labels, "known face presence changed");
            self.known_present = known_present;
        }

        let annotated = if results.is_empty() {
            frame.clone()
        } else {
            Arc::new(frame.annotate(&results))
        };

        // no subscribers is fine
        let _ = self.reports.send(FrameReport {
            sequence: frame.sequence,
            frame: annotated,
            results,
            known_present,
        });
    }
}

/// Control handle for a running pipeline. Dropping it requests shutdown
/// without waiting.
pub struct PipelineHandle {
    shutdown: Arc<AtomicBool>,
    state: watch::Receiver<PipelineState>,
    reports: broadcast::Sender<FrameReport>,
    thread: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl PipelineHandle {
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameReport> {
        self.reports.subscribe()
    }

    /// Resolves once the loop has left `Running`.
    pub async fn stopped(&mut self) {
        // Err means the sender is gone, which only happens after Stopped is sent
        let _ = self
            .state
            .wait_for(|state| *state == PipelineState::Stopped)
            .await;
    }

    /// Signal the loop, wait for it to exit and return its exit reason.
    ///
    /// The source has been dropped by the time this returns. Blocks for at
    /// most about one cycle.
    pub fn shutdown(mut self) -> Result<(), PipelineError> {
        self.shutdown.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| PipelineError::Panicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::testing::{scene, BlobEmbedder};
    use scout_core::{EuclideanMatcher, FaceRegion, Gallery, Label};
    use std::collections::VecDeque;
    use std::time::Instant;

    const ALICE_RED: [u8; 3] = [230, 20, 20];
    const STRANGER_BLUE: [u8; 3] = [20, 20, 230];

    fn alice_region() -> FaceRegion {
        FaceRegion::new(16, 48, 48, 16)
    }

    fn stranger_region() -> FaceRegion {
        FaceRegion::new(8, 120, 40, 88)
    }

    fn two_faces() -> Frame {
        scene(
            128,
            64,
            &[(alice_region(), ALICE_RED), (stranger_region(), STRANGER_BLUE)],
        )
    }

    fn alice_gallery() -> SharedGallery {
        let mut embedder = BlobEmbedder::new();
        let alice = scene(64, 64, &[(alice_region(), ALICE_RED)]);
        let embedding = embedder.embed(&alice, None).unwrap().unwrap();
        let mut gallery = Gallery::new();
        gallery.push("alice", embedding);
        gallery.into_shared()
    }

    fn pipeline(
        embedder: BlobEmbedder,
        downscale: u32,
    ) -> RecognitionPipeline<BlobEmbedder, EuclideanMatcher> {
        RecognitionPipeline::new(
            Arc::new(Mutex::new(embedder)),
            EuclideanMatcher::new(0.6),
            alice_gallery(),
            LatestFrame::new(),
            PipelineSettings {
                downscale,
                cycle_delay: Duration::from_millis(1),
                retry: RetryPolicy {
                    max_attempts: 2,
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(2),
                },
            },
        )
    }

    /// Scripted source; `held` is true while the source is alive.
    struct ScriptedSource {
        script: VecDeque<Result<Option<Frame>, SourceError>>,
        repeat: Option<Frame>,
        reconnects: Arc<Mutex<u32>>,
        reconnect_ok: bool,
        sequence: u64,
        held: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Option<Frame>, SourceError>>, held: Arc<AtomicBool>) -> Self {
            held.store(true, Ordering::SeqCst);
            Self {
                script: script.into(),
                repeat: None,
                reconnects: Arc::new(Mutex::new(0)),
                reconnect_ok: true,
                sequence: 0,
                held,
            }
        }

        fn repeating(frame: Frame, held: Arc<AtomicBool>) -> Self {
            let mut source = Self::new(Vec::new(), held);
            source.repeat = Some(frame);
            source
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            self.sequence += 1;
            let next = match self.script.pop_front() {
                Some(step) => step,
                None => match &self.repeat {
                    Some(frame) => Ok(Some(frame.clone())),
                    None => Err(SourceError::EndOfStream),
                },
            };
            let sequence = self.sequence;
            next.map(|f| f.map(|f| f.with_sequence(sequence)))
        }

        fn reconnect(&mut self) -> Result<(), SourceError> {
            *self.reconnects.lock().unwrap() += 1;
            if self.reconnect_ok {
                Ok(())
            } else {
                Err(SourceError::Unavailable("camera unplugged".into()))
            }
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.held.store(false, Ordering::SeqCst);
        }
    }

    fn next_report(rx: &mut broadcast::Receiver<FrameReport>) -> FrameReport {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match rx.try_recv() {
                Ok(report) => return report,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(2)),
                Err(e) => panic!("no report: {e:?}"),
            }
        }
    }

    #[test]
    fn test_recognize_known_and_unknown() {
        let p = pipeline(BlobEmbedder::new(), 1);
        let results = p.recognize(&two_faces()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].label, Label::Known("alice".into()));
        assert!(results[0].distance < 1e-6);
        assert_eq!(results[0].region, alice_region());
        assert_eq!(results[1].label, Label::Unknown);
        assert!(results[1].distance > 0.6);
    }

    #[test]
    fn test_downscaled_detection_rescales_to_full_frame() {
        let full = pipeline(BlobEmbedder::new(), 1).recognize(&two_faces()).unwrap();
        let quarter = pipeline(BlobEmbedder::new(), 4).recognize(&two_faces()).unwrap();
        let regions = |rs: &[RecognitionResult]| rs.iter().map(|r| r.region.clone()).collect::<Vec<_>>();
        assert_eq!(regions(&quarter), regions(&full));
        assert_eq!(quarter[0].label, full[0].label);
    }

    #[test]
    fn test_empty_gallery_reports_unknown() {
        let p = RecognitionPipeline::new(
            Arc::new(Mutex::new(BlobEmbedder::new())),
            EuclideanMatcher::default(),
            Gallery::new().into_shared(),
            LatestFrame::new(),
            PipelineSettings::default(),
        );
        let results = p.recognize(&two_faces()).unwrap();
        assert!(results.iter().all(|r| r.label == Label::Unknown));
        assert!(results.iter().all(|r| r.distance.is_infinite()));
    }

    #[test]
    fn test_loop_reports_and_publishes_latest() {
        let held = Arc::new(AtomicBool::new(false));
        let p = pipeline(BlobEmbedder::new(), 4);
        let latest = p.latest.clone();
        let handle = p
            .spawn(Box::new(ScriptedSource::repeating(two_faces(), held)))
            .unwrap();
        let mut rx = handle.subscribe();

        let report = next_report(&mut rx);
        assert!(report.known_present);
        assert_eq!(report.results.len(), 2);
        // top-left corner of alice's box is drawn green
        assert_eq!(report.frame.pixel(16, 16), [0, 255, 0]);
        assert!(latest.snapshot().is_some());

        handle.shutdown().unwrap();
    }

    #[test]
    fn test_failed_cycles_do_not_stop_the_loop() {
        let held = Arc::new(AtomicBool::new(false));
        let script = vec![Ok(None), Ok(None)];
        let mut source = ScriptedSource::new(script, held);
        source.repeat = Some(two_faces());

        // every second frame fails detection
        let handle = pipeline(BlobEmbedder::failing_every(2), 1)
            .spawn(Box::new(source))
            .unwrap();
        let mut rx = handle.subscribe();

        let a = next_report(&mut rx);
        let b = next_report(&mut rx);
        assert_eq!(a.sequence % 2, 1);
        assert_eq!(b.sequence % 2, 1);
        assert!(b.sequence > a.sequence);
        assert_eq!(handle.state(), PipelineState::Running);
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_releases_source() {
        let held = Arc::new(AtomicBool::new(false));
        let handle = pipeline(BlobEmbedder::new(), 4)
            .spawn(Box::new(ScriptedSource::repeating(two_faces(), held.clone())))
            .unwrap();
        let mut rx = handle.subscribe();
        next_report(&mut rx);
        assert!(held.load(Ordering::SeqCst));

        let started = Instant::now();
        handle.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!held.load(Ordering::SeqCst));

        // the same source can be acquired again straight away
        let again = ScriptedSource::repeating(two_faces(), held.clone());
        assert!(held.load(Ordering::SeqCst));
        drop(again);
    }

    #[test]
    fn test_source_exhaustion_stops_pipeline() {
        let held = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource::new(vec![Ok(Some(two_faces()))], held.clone());
        source.reconnect_ok = false;
        let reconnects = source.reconnects.clone();

        let mut handle = pipeline(BlobEmbedder::new(), 1)
            .spawn(Box::new(source))
            .unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), handle.stopped())
                .await
                .unwrap();
        });

        assert_eq!(handle.state(), PipelineState::Stopped);
        assert_eq!(*reconnects.lock().unwrap(), 2);
        assert!(!held.load(Ordering::SeqCst));
        assert!(matches!(
            handle.shutdown(),
            Err(PipelineError::SourceExhausted(SourceError::Unavailable(_)))
        ));
    }
}
