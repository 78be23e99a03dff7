//! Continuous detection.
//!
//! `DetectionLoop` owns one background worker that repeatedly captures a
//! frame, runs the detector, and notifies the listeners whose labels were
//! detected. The controller starts and stops it and edits listeners while it
//! runs.
//!
//! States are `Stopped` (initial) and `Running`:
//! - `start()` from `Stopped` spawns a worker and returns at once. From
//!   `Running` it fails with `AlreadyRunning` and spawns nothing.
//! - `stop()` from `Running` cancels the run and returns at once. The worker
//!   finishes its in-flight capture/inference and exits, but no listener is
//!   invoked after `stop()` returns. From `Stopped` it fails with `NotRunning`.
//! - A fatal error inside the loop (model or label table unusable, camera
//!   gone) moves the loop to `Stopped` by itself; `last_fatal()` and a
//!   `LoopEvent::Stopped` carry the cause.
//!
//! Per-pass capture or inference failures are counted and published as
//! `LoopEvent::IterationFailed`; the loop retries after a backoff that grows
//! from 100 ms to 5 s while the failures persist. Only a change in the error
//! is logged at warn level.

mod cancel;
mod events;

pub use cancel::CancelToken;
pub use events::LoopEvent;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use crate::detect::{DetectionSet, Detector, DEFAULT_MIN_SCORE};
use crate::error::{DetectError, Result};
use crate::ingest::FrameSource;
use crate::listeners::ListenerRegistry;
use events::EventHub;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Detections must score strictly above this to reach listeners.
    pub min_score: f32,
    /// Pause between passes. Zero polls back to back.
    pub poll_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            poll_interval: Duration::ZERO,
        }
    }
}

/// Counters across all runs of one loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Passes attempted, successful or not.
    pub iterations: u64,
    pub failures: u64,
    /// Listener invocations.
    pub notifications: u64,
}

struct Shared {
    detector: Detector,
    registry: ListenerRegistry,
    source: Mutex<Box<dyn FrameSource>>,
    settings: LoopSettings,
    /// Held while listeners run; `stop()` cancels under it.
    dispatch_gate: Mutex<()>,
    events: EventHub,
    last_fatal: Mutex<Option<DetectError>>,
    iterations: AtomicU64,
    failures: AtomicU64,
    notifications: AtomicU64,
}

struct Run {
    token: CancelToken,
    worker_id: ThreadId,
    worker: Option<JoinHandle<()>>,
}

pub struct DetectionLoop {
    shared: Arc<Shared>,
    current: Mutex<Option<Run>>,
    /// Workers of earlier runs that may still be finishing a pass.
    retired: Mutex<Vec<JoinHandle<()>>>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DetectionLoop {
    pub fn new(
        detector: Detector,
        source: Box<dyn FrameSource>,
        registry: ListenerRegistry,
        settings: LoopSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                detector,
                registry,
                source: Mutex::new(source),
                settings,
                dispatch_gate: Mutex::new(()),
                events: EventHub::default(),
                last_fatal: Mutex::new(None),
                iterations: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                notifications: AtomicU64::new(0),
            }),
            current: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.shared.registry
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.shared.settings
    }

    pub fn add_listener<F>(&self, label: impl Into<String>, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.registry.add_listener(label, callback);
    }

    pub fn remove_listener(&self, label: &str) -> Result<()> {
        self.shared.registry.remove_listener(label)
    }

    pub fn remove_all_listeners(&self) {
        self.shared.registry.remove_all_listeners();
    }

    pub fn state(&self) -> LoopState {
        match relock(&self.current).as_ref() {
            Some(run) if !run.token.is_cancelled() => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// Start polling in a background thread.
    pub fn start(&self) -> Result<()> {
        let mut current = relock(&self.current);
        if let Some(run) = current.as_ref() {
            if !run.token.is_cancelled() {
                return Err(DetectError::AlreadyRunning);
            }
        }

        if let Some(worker) = current.take().and_then(|mut run| run.worker.take()) {
            let mut retired = relock(&self.retired);
            retired.retain(|handle| !handle.is_finished());
            retired.push(worker);
        }
        *relock(&self.shared.last_fatal) = None;

        let token = CancelToken::new();
        let shared = self.shared.clone();
        let worker_token = token.clone();
        let worker = std::thread::Builder::new()
            .name("detection-loop".to_string())
            .spawn(move || run_loop(shared, worker_token))
            .map_err(|e| DetectError::resource(format!("failed to spawn detection loop: {}", e)))?;

        *current = Some(Run {
            token,
            worker_id: worker.thread().id(),
            worker: Some(worker),
        });
        log::info!(
            "DetectionLoop: started (min_score={:.2}, interval={:?})",
            self.shared.settings.min_score,
            self.shared.settings.poll_interval
        );
        Ok(())
    }

    /// Signal the worker to stop. Does not wait for it to exit.
    pub fn stop(&self) -> Result<()> {
        let (token, worker_id) = {
            let current = relock(&self.current);
            match current.as_ref() {
                Some(run) if !run.token.is_cancelled() => (run.token.clone(), run.worker_id),
                _ => return Err(DetectError::NotRunning),
            }
        };

        if std::thread::current().id() == worker_id {
            // Called from a listener: the gate is already held by this thread.
            token.cancel();
        } else {
            let _gate = relock(&self.shared.dispatch_gate);
            token.cancel();
        }
        log::info!("DetectionLoop: stop requested");
        Ok(())
    }

    /// Block until every worker started so far has exited.
    ///
    /// Returns immediately when nothing is running; otherwise only returns once
    /// the loop has been stopped or has stopped itself.
    pub fn wait(&self) {
        let mut handles: Vec<JoinHandle<()>> = relock(&self.retired).drain(..).collect();
        if let Some(worker) = relock(&self.current)
            .as_mut()
            .and_then(|run| run.worker.take())
        {
            handles.push(worker);
        }
        for handle in handles {
            if handle.join().is_err() {
                log::error!("DetectionLoop: worker thread panicked");
            }
        }
    }

    /// Receive `LoopEvent`s from now on.
    pub fn subscribe(&self) -> Receiver<LoopEvent> {
        self.shared.events.subscribe()
    }

    /// Cause of the last self-inflicted stop, if any.
    pub fn last_fatal(&self) -> Option<DetectError> {
        relock(&self.shared.last_fatal).clone()
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            iterations: self.shared.iterations.load(Ordering::SeqCst),
            failures: self.shared.failures.load(Ordering::SeqCst),
            notifications: self.shared.notifications.load(Ordering::SeqCst),
        }
    }

    /// Capture one frame and detect without notifying listeners.
    pub fn detect_once(&self, min_score: f32) -> Result<DetectionSet> {
        self.shared.detect_pass(min_score)
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        if let Some(run) = relock(&self.current).as_ref() {
            run.token.cancel();
        }
    }
}

impl Shared {
    fn detect_pass(&self, min_score: f32) -> Result<DetectionSet> {
        let frame = relock(&self.source).capture()?;
        self.detector.detect(&frame, min_score)
    }

    fn run_pass(&self, token: &CancelToken) -> Result<usize> {
        let detections = self.detect_pass(self.settings.min_score)?;
        let _gate = relock(&self.dispatch_gate);
        if token.is_cancelled() {
            return Ok(0);
        }
        Ok(self.registry.dispatch(&detections))
    }
}

/// Delay after a failed pass. Doubles per consecutive failure up to
/// `MAX_FAILURE_BACKOFF` and resets on the next successful pass.
const INITIAL_FAILURE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct FailureBackoff {
    next: Duration,
    streak: u64,
    last_message: Option<String>,
}

impl FailureBackoff {
    fn new() -> Self {
        Self {
            next: INITIAL_FAILURE_BACKOFF,
            streak: 0,
            last_message: None,
        }
    }

    /// Record a failure. Returns the delay before the next pass and whether
    /// the failure differs from the previous one (and so deserves a warning).
    fn failed(&mut self, err: &DetectError) -> (Duration, bool) {
        let message = err.to_string();
        let is_new = self.last_message.as_deref() != Some(message.as_str());
        self.last_message = Some(message);
        self.streak += 1;
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_FAILURE_BACKOFF);
        (delay, is_new)
    }

    /// Record a success. Returns the length of the failure streak it ended.
    fn succeeded(&mut self) -> u64 {
        let streak = self.streak;
        *self = Self::new();
        streak
    }
}

fn run_loop(shared: Arc<Shared>, token: CancelToken) {
    let mut fatal = None;
    let mut backoff = FailureBackoff::new();
    while !token.is_cancelled() {
        shared.iterations.fetch_add(1, Ordering::SeqCst);
        let mut delay = shared.settings.poll_interval;
        match shared.run_pass(&token) {
            Ok(notified) => {
                shared
                    .notifications
                    .fetch_add(notified as u64, Ordering::SeqCst);
                let streak = backoff.succeeded();
                if streak > 0 {
                    log::info!("DetectionLoop: recovered after {} failed passes", streak);
                }
            }
            Err(err) if err.is_fatal() => {
                log::error!("DetectionLoop: fatal error, stopping: {}", err);
                *relock(&shared.last_fatal) = Some(err.clone());
                fatal = Some(err);
                token.cancel();
                break;
            }
            Err(err) => {
                shared.failures.fetch_add(1, Ordering::SeqCst);
                let (retry_in, is_new) = backoff.failed(&err);
                if is_new {
                    log::warn!(
                        "DetectionLoop: pass failed, retrying in {:?}: {}",
                        retry_in,
                        err
                    );
                } else {
                    log::debug!(
                        "DetectionLoop: pass failed again, retrying in {:?}: {}",
                        retry_in,
                        err
                    );
                }
                shared.events.publish(LoopEvent::IterationFailed(err));
                delay = delay.max(retry_in);
            }
        }
        if !delay.is_zero() {
            token.wait_timeout(delay);
        }
    }
    log::info!("DetectionLoop: stopped");
    shared.events.publish(LoopEvent::Stopped { fatal });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_backoff_doubles_caps_and_resets() {
        let mut backoff = FailureBackoff::new();
        let err = DetectError::capture("dequeue timeout");
        let delays: Vec<Duration> = (0..8).map(|_| backoff.failed(&err).0).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(*delays.last().unwrap(), MAX_FAILURE_BACKOFF);

        assert_eq!(backoff.succeeded(), 8);
        assert_eq!(backoff.failed(&err).0, INITIAL_FAILURE_BACKOFF);
    }

    #[test]
    fn repeated_failure_is_only_new_once() {
        let mut backoff = FailureBackoff::new();
        let timeout = DetectError::capture("dequeue timeout");
        assert!(backoff.failed(&timeout).1);
        assert!(!backoff.failed(&timeout).1);
        assert!(backoff.failed(&DetectError::inference("bad shape")).1);
        backoff.succeeded();
        assert!(backoff.failed(&timeout).1);
    }
}
