//! Recurring detection task: capture → detect → map → match → gate.
//!
//! The loop runs as a single tokio task driven by an interval. Tick work is
//! awaited inline, so at most one detection+match cycle is ever in flight;
//! interval ticks that fire while a slow cycle is running are skipped.

use kiosk_core::{
    resize_to_display, BackendError, BoundingBox, CameraError, DisplaySize, FaceBackend,
    LiveDetection, MatchResult, Matcher, VideoSource, UNKNOWN_LABEL,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Distance below which a known label fires a recognition.
///
/// Stricter than the matcher's own threshold so borderline matches are shown
/// as overlays but never greeted.
pub const DEFAULT_STRICT_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub tick_interval: Duration,
    pub strict_threshold: f32,
    pub display: DisplaySize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            strict_threshold: DEFAULT_STRICT_THRESHOLD,
            display: DisplaySize::default(),
        }
    }
}

/// One face drawn by the presentation layer for the latest tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub display_box: BoundingBox,
    /// Matched label, or `"unknown"`.
    pub label: String,
    pub distance: f32,
}

#[derive(Error, Debug)]
enum TickError {
    #[error("capture: {0}")]
    Capture(#[from] CameraError),
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
}

/// Label to greet for this result, if it passes the confidence gate.
///
/// The reserved unknown label never passes, whatever the matcher reports.
pub fn confident_label(result: &MatchResult, strict_threshold: f32) -> Option<&str> {
    result
        .known_label()
        .filter(|label| *label != UNKNOWN_LABEL && result.distance < strict_threshold)
}

struct Shared {
    paused: AtomicBool,
}

/// Everything one detection loop needs; consumed by [`start`](Self::start).
pub struct DetectionLoop {
    pub source: Arc<dyn VideoSource>,
    pub backend: Arc<dyn FaceBackend>,
    pub matcher: Arc<dyn Matcher>,
    pub settings: LoopSettings,
    pub overlays: Arc<watch::Sender<Vec<Overlay>>>,
}

impl DetectionLoop {
    /// Spawn the loop. `on_recognized` runs on the loop task, after the loop
    /// has paused itself.
    pub fn start<F>(self, on_recognized: F) -> DetectionHandle
    where
        F: Fn(String) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            paused: AtomicBool::new(false),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(Arc::clone(&shared), shutdown_rx, on_recognized));
        DetectionHandle {
            shared,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    async fn run<F>(self, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>, on_recognized: F)
    where
        F: Fn(String) + Send + 'static,
    {
        let period = self.settings.tick_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_ms = period.as_millis() as u64,
            strict_threshold = self.settings.strict_threshold,
            "detection loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            // Paused ticks keep the cadence but do no work.
            if shared.paused.load(Ordering::Acquire) {
                tracing::trace!("tick skipped while paused");
                continue;
            }

            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.tick() => outcome,
            };

            match outcome {
                Ok(Some(first)) => match confident_label(&first, self.settings.strict_threshold) {
                    Some(label) => {
                        shared.paused.store(true, Ordering::Release);
                        tracing::info!(label, distance = first.distance, "face recognized");
                        on_recognized(label.to_string());
                    }
                    None => tracing::debug!(
                        label = %first.label,
                        distance = first.distance,
                        "best match below confidence gate"
                    ),
                },
                Ok(None) => tracing::trace!("no face in frame"),
                Err(e) => tracing::warn!(error = %e, "detection tick failed; skipping"),
            }
        }

        tracing::info!("detection loop stopped");
    }

    /// One unit of work. Overlays are published before any recognition fires.
    async fn tick(&self) -> Result<Option<MatchResult>, TickError> {
        let frame = self.source.capture().await?;
        let faces = self.backend.detect_all(&frame).await?;

        let detections: Vec<LiveDetection> = faces
            .into_iter()
            .map(|face| LiveDetection {
                display_box: resize_to_display(
                    &face.bbox,
                    frame.width,
                    frame.height,
                    self.settings.display,
                ),
                descriptor: face.descriptor,
            })
            .collect();

        let results: Vec<MatchResult> = detections
            .iter()
            .map(|d| self.matcher.best_match(&d.descriptor))
            .collect();

        let overlays = detections
            .iter()
            .zip(&results)
            .map(|(d, r)| Overlay {
                display_box: d.display_box.clone(),
                label: r.label.to_string(),
                distance: r.distance,
            })
            .collect();
        self.overlays.send_replace(overlays);

        tracing::debug!(seq = frame.sequence, faces = results.len(), "tick complete");
        Ok(results.into_iter().next())
    }
}

/// Control handle for a running [`DetectionLoop`].
///
/// Dropping the handle without calling [`stop`](Self::stop) aborts the task.
pub struct DetectionHandle {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl DetectionHandle {
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::AcqRel) {
            tracing::debug!("detection paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::AcqRel) {
            tracing::debug!("detection resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Cancel the loop and wait for its task to exit. No callback fires
    /// after this returns.
    pub async fn stop(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "detection loop panicked");
                }
            }
        }
    }
}

impl Drop for DetectionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
