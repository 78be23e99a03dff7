//! Detection loop lifecycle and dispatch tests.
//!
//! Uses synthetic frames and a stub engine so every pass produces the same
//! detections: "dog" twice and "cat" once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use object_watch::{
    DetectError, DetectionLoop, Detector, Frame, FrameSource, LabelMap, ListenerRegistry,
    LoopEvent, LoopSettings, LoopState, RawDetections, SourceStats, StubEngine, SyntheticSource,
};

const SIZE: u32 = 320;

fn raw_output() -> RawDetections {
    RawDetections {
        boxes: vec![
            [0.1, 0.1, 0.5, 0.5],
            [0.2, 0.2, 0.6, 0.6],
            [0.0, 0.0, 0.3, 0.3],
            [0.5, 0.5, 0.9, 0.9],
        ],
        // labels: 0 person, 1 cat, 2 dog
        classes: vec![2.0, 2.0, 1.0, 0.0],
        scores: vec![0.9, 0.8, 0.7, 0.1],
        count: 4,
    }
}

fn detector() -> Detector {
    Detector::new(
        Arc::new(StubEngine::with_output(SIZE, SIZE, raw_output())),
        Arc::new(LabelMap::from_labels(["person", "cat", "dog"])),
    )
}

fn build_loop(source: Box<dyn FrameSource>) -> DetectionLoop {
    DetectionLoop::new(
        detector(),
        source,
        ListenerRegistry::new(),
        LoopSettings::default(),
    )
}

fn synthetic_loop() -> DetectionLoop {
    build_loop(Box::new(SyntheticSource::new("stub://test", SIZE, SIZE)))
}

fn counter(watch: &DetectionLoop, label: &str) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_cb = hits.clone();
    watch.add_listener(label, move || {
        hits_cb.fetch_add(1, Ordering::SeqCst);
    });
    hits
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Source that fails according to a pattern and tracks acquire/release.
struct ScriptedSource {
    inner: SyntheticSource,
    captures: u64,
    fail_every: Option<u64>,
    fatal: bool,
    opens: Arc<AtomicU64>,
    closes: Arc<AtomicU64>,
}

impl ScriptedSource {
    fn new(fail_every: Option<u64>, fatal: bool) -> Self {
        Self {
            inner: SyntheticSource::new("stub://scripted", SIZE, SIZE),
            captures: 0,
            fail_every,
            fatal,
            opens: Arc::new(AtomicU64::new(0)),
            closes: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self) -> Result<(), DetectError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open()
    }

    fn read_frame(&mut self) -> Result<Frame, DetectError> {
        self.captures += 1;
        if let Some(every) = self.fail_every {
            if self.captures % every == 0 {
                return Err(if self.fatal {
                    DetectError::capture_fatal("camera unplugged")
                } else {
                    DetectError::capture("dequeue timeout")
                });
            }
        }
        self.inner.read_frame()
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close();
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

#[test]
fn detect_once_scales_and_labels() {
    let watch = synthetic_loop();
    let set = watch.detect_once(0.2).expect("detect");
    assert_eq!(set.labels(), vec!["dog", "dog", "cat"]);
    let first = set.boxes()[0];
    for (got, want) in first.iter().zip([32.0, 32.0, 160.0, 160.0]) {
        assert!((got - want).abs() < 1e-3);
    }
    assert_eq!(set.scores()[0], 0.9);
    assert!(set.scores().iter().all(|s| *s > 0.2));
}

#[test]
fn repeated_label_invokes_listener_once_per_pass() {
    let watch = Arc::new(synthetic_loop());
    let hits = Arc::new(AtomicUsize::new(0));
    let weak: Weak<DetectionLoop> = Arc::downgrade(&watch);
    let hits_cb = hits.clone();
    watch.add_listener("dog", move || {
        hits_cb.fetch_add(1, Ordering::SeqCst);
        if let Some(watch) = weak.upgrade() {
            // Stopping from inside a listener ends the run after this pass.
            let _ = watch.stop();
        }
    });

    watch.start().expect("start");
    watch.wait();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(watch.state(), LoopState::Stopped);
    assert_eq!(watch.stats().iterations, 1);
}

#[test]
fn start_while_running_fails_without_second_worker() {
    let watch = synthetic_loop();
    assert_eq!(watch.stop(), Err(DetectError::NotRunning));

    watch.start().expect("start");
    assert_eq!(watch.start(), Err(DetectError::AlreadyRunning));
    assert!(watch.is_running());

    watch.stop().expect("stop");
    assert_eq!(watch.stop(), Err(DetectError::NotRunning));
    watch.wait();
    assert_eq!(watch.state(), LoopState::Stopped);
}

#[test]
fn no_dispatch_between_stop_and_start() {
    let watch = synthetic_loop();
    let dogs = counter(&watch, "dog");

    watch.start().expect("start");
    wait_until("first dog", || dogs.load(Ordering::SeqCst) > 0);
    watch.stop().expect("stop");
    let after_stop = dogs.load(Ordering::SeqCst);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(dogs.load(Ordering::SeqCst), after_stop);

    watch.start().expect("restart");
    wait_until("dog after restart", || dogs.load(Ordering::SeqCst) > after_stop);
    watch.stop().expect("stop");
    watch.wait();
}

#[test]
fn cleared_registry_invokes_nothing() {
    let watch = synthetic_loop();
    let dogs = counter(&watch, "dog");
    let cats = counter(&watch, "cat");
    watch.remove_all_listeners();

    watch.start().expect("start");
    wait_until("three passes", || watch.stats().iterations >= 3);
    watch.stop().expect("stop");
    watch.wait();

    assert_eq!(dogs.load(Ordering::SeqCst), 0);
    assert_eq!(cats.load(Ordering::SeqCst), 0);
    assert_eq!(watch.stats().notifications, 0);
}

#[test]
fn removing_unknown_listener_keeps_others() {
    let watch = synthetic_loop();
    let cats = counter(&watch, "cat");
    assert_eq!(
        watch.remove_listener("giraffe"),
        Err(DetectError::NotFound("giraffe".to_string()))
    );

    watch.start().expect("start");
    wait_until("cat", || cats.load(Ordering::SeqCst) > 0);
    watch.stop().expect("stop");
    watch.wait();
}

#[test]
fn transient_capture_failures_are_reported_and_skipped() {
    let source = ScriptedSource::new(Some(2), false);
    let (opens, closes) = (source.opens.clone(), source.closes.clone());
    let watch = build_loop(Box::new(source));
    let events = watch.subscribe();
    let dogs = counter(&watch, "dog");

    watch.start().expect("start");
    wait_until("six passes", || watch.stats().iterations >= 6);
    assert!(watch.is_running());
    watch.stop().expect("stop");
    watch.wait();

    let stats = watch.stats();
    assert!(stats.failures > 0);
    assert!(dogs.load(Ordering::SeqCst) > 0);
    assert_eq!(opens.load(Ordering::SeqCst), closes.load(Ordering::SeqCst));

    let received: Vec<LoopEvent> = events.try_iter().collect();
    assert!(received
        .iter()
        .any(|e| matches!(e, LoopEvent::IterationFailed(DetectError::Capture { fatal: false, .. }))));
    assert_eq!(received.last(), Some(&LoopEvent::Stopped { fatal: None }));
}

#[test]
fn fatal_capture_failure_stops_the_loop() {
    let source = ScriptedSource::new(Some(1), true);
    let closes = source.closes.clone();
    let watch = build_loop(Box::new(source));
    let events = watch.subscribe();

    watch.start().expect("start");
    let event = events
        .recv_timeout(Duration::from_secs(10))
        .expect("stopped event");
    let expected = DetectError::capture_fatal("camera unplugged");
    assert_eq!(
        event,
        LoopEvent::Stopped {
            fatal: Some(expected.clone())
        }
    );
    assert_eq!(watch.state(), LoopState::Stopped);
    assert_eq!(watch.last_fatal(), Some(expected));
    assert_eq!(watch.stop(), Err(DetectError::NotRunning));
    watch.wait();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn inference_failure_does_not_stop_the_loop() {
    // Frames are 300x300 but the model expects 320x320.
    let watch = build_loop(Box::new(SyntheticSource::new("stub://small", 300, 300)));
    let events = watch.subscribe();

    watch.start().expect("start");
    let event = events
        .recv_timeout(Duration::from_secs(10))
        .expect("failure event");
    assert!(matches!(
        event,
        LoopEvent::IterationFailed(DetectError::Inference(_))
    ));
    wait_until("more passes", || watch.stats().iterations >= 3);
    assert!(watch.is_running());
    watch.stop().expect("stop");
    watch.wait();
}

#[test]
fn concurrent_registry_mutation_during_loop() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let watch = Arc::new(synthetic_loop());
    let dogs = counter(&watch, "dog");
    watch.start().expect("start");

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = watch.registry().clone();
            std::thread::spawn(move || {
                for round in 0..ROUNDS {
                    let label = format!("t{}-{}", t, round);
                    registry.add_listener(label.clone(), || {});
                    // Keep every third label, drop the rest.
                    if round % 3 != 0 {
                        registry.remove_listener(&label).expect("own label present");
                    }
                }
                registry.add_listener(format!("cat-{}", t), || {});
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("mutator thread");
    }

    wait_until("dog", || dogs.load(Ordering::SeqCst) > 0);
    watch.stop().expect("stop");
    watch.wait();

    let mut expected: Vec<String> = (0..THREADS)
        .flat_map(|t| {
            (0..ROUNDS)
                .filter(|round| round % 3 == 0)
                .map(move |round| format!("t{}-{}", t, round))
                .chain(std::iter::once(format!("cat-{}", t)))
        })
        .collect();
    expected.push("dog".to_string());
    expected.sort();
    assert_eq!(watch.registry().labels(), expected);
}

#[test]
fn poll_interval_is_interrupted_by_stop() {
    let watch = DetectionLoop::new(
        detector(),
        Box::new(SyntheticSource::new("stub://slow", SIZE, SIZE)),
        ListenerRegistry::new(),
        LoopSettings {
            min_score: 0.2,
            poll_interval: Duration::from_secs(60),
        },
    );
    watch.start().expect("start");
    wait_until("first pass", || watch.stats().iterations >= 1);

    let started = Instant::now();
    watch.stop().expect("stop");
    watch.wait();
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn persistent_failure_backs_off_instead_of_spinning() {
    // 8x8 frames never match the 320x320 model, so every pass fails.
    let watch = build_loop(Box::new(SyntheticSource::new("stub://tiny", 8, 8)));
    let events = watch.subscribe();

    watch.start().expect("start");
    std::thread::sleep(Duration::from_millis(200));
    watch.stop().expect("stop");
    watch.wait();

    let stats = watch.stats();
    assert!(stats.iterations >= 1);
    assert!(stats.iterations <= 5, "ran {} passes", stats.iterations);
    assert_eq!(stats.failures, stats.iterations);
    assert!(events.try_iter().count() <= 6);
}
