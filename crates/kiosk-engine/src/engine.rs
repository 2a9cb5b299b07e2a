use crate::detection_loop::{DetectionHandle, DetectionLoop, LoopSettings, Overlay};
use crate::state::{Phase, RecognitionState, RecognitionStateMachine};
use kiosk_core::{
    CameraConstraints, CameraError, CameraSession, EuclideanMatcher, FaceBackend, GalleryError,
    Matcher, MatcherError, ReferenceGallery, ReferenceSet, ReferenceStore, VideoSource,
    DEFAULT_MATCH_THRESHOLD,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("reference gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("matcher error: {0}")]
    Matcher(#[from] MatcherError),
    #[error("strict threshold {strict} must be in (0, {match_threshold}]")]
    InvalidStrictThreshold { strict: f32, match_threshold: f32 },
    #[error("camera already active")]
    CameraActive,
    #[error("kiosk task exited")]
    ChannelClosed,
}

/// External collaborators the kiosk drives.
pub struct KioskServices {
    pub camera: Arc<dyn CameraSession>,
    pub backend: Arc<dyn FaceBackend>,
    pub store: Arc<dyn ReferenceStore>,
}

#[derive(Debug, Clone)]
pub struct KioskSettings {
    /// Enrolled labels, in gallery order.
    pub labels: Vec<String>,
    pub match_threshold: f32,
    /// How long the greeting stays up before scanning resumes.
    pub cooldown: Duration,
    pub constraints: CameraConstraints,
    pub detection: LoopSettings,
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            cooldown: Duration::from_millis(3000),
            constraints: CameraConstraints::default(),
            detection: LoopSettings::default(),
        }
    }
}

/// Messages sent from handles to the kiosk task.
enum KioskCommand {
    StartCamera {
        reply: oneshot::Sender<Result<(), KioskError>>,
    },
    StopCamera {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Completions reported back to the kiosk task by its own spawned work.
///
/// `epoch` identifies the camera session that produced the event; events
/// from an earlier session are stale.
enum KioskEvent {
    ReferencesLoaded {
        epoch: u64,
        result: Result<ReferenceSet, GalleryError>,
    },
    Recognized { epoch: u64, label: String },
    CooldownElapsed { epoch: u64 },
}

/// Clone-safe handle to the kiosk task.
#[derive(Clone)]
pub struct KioskHandle {
    tx: mpsc::Sender<KioskCommand>,
    state: watch::Receiver<RecognitionState>,
    transitions: broadcast::Sender<RecognitionState>,
    overlays: watch::Receiver<Vec<Overlay>>,
}

impl KioskHandle {
    /// Acquire the camera and begin loading references.
    ///
    /// Returns once the camera is ready; the move to `Scanning` follows
    /// asynchronously and is visible through [`subscribe`](Self::subscribe).
    pub async fn start_camera(&self) -> Result<(), KioskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(KioskCommand::StartCamera { reply: reply_tx })
            .await
            .map_err(|_| KioskError::ChannelClosed)?;
        reply_rx.await.map_err(|_| KioskError::ChannelClosed)?
    }

    /// Stop detection, release the camera and return to `AwaitingCamera`.
    pub async fn stop_camera(&self) -> Result<(), KioskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(KioskCommand::StopCamera { reply: reply_tx })
            .await
            .map_err(|_| KioskError::ChannelClosed)?;
        reply_rx.await.map_err(|_| KioskError::ChannelClosed)
    }

    /// Stop the camera and end the kiosk task.
    pub async fn shutdown(&self) -> Result<(), KioskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(KioskCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| KioskError::ChannelClosed)?;
        reply_rx.await.map_err(|_| KioskError::ChannelClosed)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> RecognitionState {
        self.state.borrow().clone()
    }

    /// Latest-value subscription to the recognition state.
    pub fn subscribe(&self) -> watch::Receiver<RecognitionState> {
        self.state.clone()
    }

    /// Every state entered, in order, including the momentary `Recognized`.
    pub fn transitions(&self) -> broadcast::Receiver<RecognitionState> {
        self.transitions.subscribe()
    }

    /// Detection overlays from the most recent tick.
    pub fn overlays(&self) -> watch::Receiver<Vec<Overlay>> {
        self.overlays.clone()
    }
}

/// Spawn the kiosk task on the current tokio runtime.
///
/// Validates the thresholds up front so that a reference load can never
/// succeed and then fail to build its matcher.
pub fn spawn_kiosk(
    services: KioskServices,
    settings: KioskSettings,
) -> Result<KioskHandle, KioskError> {
    let match_threshold = settings.match_threshold;
    if !(match_threshold > 0.0 && match_threshold < 1.0) {
        return Err(MatcherError::InvalidThreshold(match_threshold).into());
    }
    let strict = settings.detection.strict_threshold;
    if !(strict > 0.0 && strict <= match_threshold) {
        return Err(KioskError::InvalidStrictThreshold {
            strict,
            match_threshold,
        });
    }

    let (tx, rx) = mpsc::channel::<KioskCommand>(8);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(RecognitionState::default());
    let (transitions, _) = broadcast::channel(32);
    let (overlay_tx, overlay_rx) = watch::channel(Vec::new());

    let gallery = ReferenceGallery::new(
        Arc::clone(&services.store),
        Arc::clone(&services.backend),
    );

    let kiosk = Kiosk {
        services,
        settings,
        gallery: Arc::new(gallery),
        machine: RecognitionStateMachine::new(),
        state_tx,
        transitions: transitions.clone(),
        overlays: Arc::new(overlay_tx),
        events: events_tx,
        epoch: 0,
        source: None,
        matcher: None,
        loading: false,
        detection: None,
        cooldown: None,
    };
    tokio::spawn(kiosk.run(rx, events_rx));

    Ok(KioskHandle {
        tx,
        state: state_rx,
        transitions,
        overlays: overlay_rx,
    })
}

/// Task-owned kiosk state. Every mutation of the recognition state happens
/// here, one command or event at a time.
struct Kiosk {
    services: KioskServices,
    settings: KioskSettings,
    gallery: Arc<ReferenceGallery>,
    machine: RecognitionStateMachine,
    state_tx: watch::Sender<RecognitionState>,
    transitions: broadcast::Sender<RecognitionState>,
    overlays: Arc<watch::Sender<Vec<Overlay>>>,
    events: mpsc::UnboundedSender<KioskEvent>,
    epoch: u64,
    source: Option<Arc<dyn VideoSource>>,
    /// Built from the first successful load and kept across camera sessions.
    matcher: Option<Arc<dyn Matcher>>,
    loading: bool,
    detection: Option<DetectionHandle>,
    cooldown: Option<JoinHandle<()>>,
}

impl Kiosk {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<KioskCommand>,
        mut events: mpsc::UnboundedReceiver<KioskEvent>,
    ) {
        tracing::info!(labels = self.settings.labels.len(), "kiosk started");
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(KioskCommand::StartCamera { reply }) => {
                        let result = self.start_camera().await;
                        let _ = reply.send(result);
                    }
                    Some(KioskCommand::StopCamera { reply }) => {
                        self.stop_camera().await;
                        let _ = reply.send(());
                    }
                    Some(KioskCommand::Shutdown { reply }) => {
                        self.stop_camera().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.stop_camera().await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }
        tracing::info!("kiosk exiting");
    }

    fn publish(&self, states: Vec<RecognitionState>) {
        for state in states {
            tracing::info!(
                phase = ?state.phase,
                label = state.active_label.as_deref().unwrap_or(""),
                status = %state.status_text(),
                "phase changed"
            );
            // No subscribers is fine.
            let _ = self.transitions.send(state.clone());
            self.state_tx.send_replace(state);
        }
    }

    async fn start_camera(&mut self) -> Result<(), KioskError> {
        if self.source.is_some() {
            return Err(KioskError::CameraActive);
        }

        let source = match self.services.camera.acquire(&self.settings.constraints).await {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(error = %e, "camera acquisition failed");
                let states = self.machine.camera_failed(e.to_string());
                self.publish(states);
                return Err(e.into());
            }
        };

        self.epoch += 1;
        self.source = Some(source);
        tracing::info!(epoch = self.epoch, "camera ready");
        let states = self.machine.camera_ready();
        self.publish(states);
        self.begin_loading();
        Ok(())
    }

    fn begin_loading(&mut self) {
        if self.matcher.is_some() {
            tracing::debug!("reusing loaded references");
            self.enter_scanning();
            return;
        }
        if self.loading {
            tracing::debug!("reference load already in flight");
            return;
        }

        self.loading = true;
        let gallery = Arc::clone(&self.gallery);
        let labels = self.settings.labels.clone();
        let events = self.events.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = gallery.load(&labels).await;
            let _ = events.send(KioskEvent::ReferencesLoaded { epoch, result });
        });
    }

    fn enter_scanning(&mut self) {
        let (Some(source), Some(matcher)) = (self.source.clone(), self.matcher.clone()) else {
            return;
        };
        let states = self.machine.references_loaded();
        if states.is_empty() {
            return;
        }
        self.publish(states);

        let events = self.events.clone();
        let epoch = self.epoch;
        let handle = DetectionLoop {
            source,
            backend: Arc::clone(&self.services.backend),
            matcher,
            settings: self.settings.detection,
            overlays: Arc::clone(&self.overlays),
        }
        .start(move |label| {
            let _ = events.send(KioskEvent::Recognized { epoch, label });
        });
        self.detection = Some(handle);
    }

    async fn handle_event(&mut self, event: KioskEvent) {
        match event {
            KioskEvent::ReferencesLoaded { epoch, result } => {
                self.on_references_loaded(epoch, result).await
            }
            KioskEvent::Recognized { epoch, label } => self.on_recognized(epoch, label),
            KioskEvent::CooldownElapsed { epoch } => self.on_cooldown_elapsed(epoch),
        }
    }

    /// References are shared by every camera session, so a load started by an
    /// earlier session still serves the current one on success. Its failure
    /// never tears down the current session.
    async fn on_references_loaded(
        &mut self,
        epoch: u64,
        result: Result<ReferenceSet, GalleryError>,
    ) {
        self.loading = false;
        let matcher = result.map_err(KioskError::from).and_then(|set| {
            let matcher = EuclideanMatcher::new(set, self.settings.match_threshold)?;
            Ok(Arc::new(matcher) as Arc<dyn Matcher>)
        });

        match matcher {
            Ok(matcher) => {
                self.matcher = Some(matcher);
                if self.machine.phase() == Phase::LoadingReferences {
                    self.enter_scanning();
                } else {
                    tracing::debug!("references loaded after camera stopped; kept for next start");
                }
            }
            Err(e) if epoch != self.epoch => {
                tracing::warn!(
                    error = %e,
                    epoch,
                    "reference load from previous camera session failed"
                );
                if self.machine.phase() == Phase::LoadingReferences {
                    self.begin_loading();
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "reference load failed");
                let states = self.machine.references_failed(e.to_string());
                if !states.is_empty() {
                    self.teardown().await;
                    self.publish(states);
                }
            }
        }
    }

    fn on_recognized(&mut self, epoch: u64, label: String) {
        if epoch != self.epoch {
            tracing::debug!(label = %label, "recognition from previous camera session discarded");
            return;
        }
        let states = self.machine.recognized(label);
        if states.is_empty() {
            tracing::debug!(phase = ?self.machine.phase(), "recognition outside scanning discarded");
            return;
        }
        if let Some(detection) = &self.detection {
            detection.pause();
        }
        self.publish(states);

        let events = self.events.clone();
        let delay = self.settings.cooldown;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(KioskEvent::CooldownElapsed { epoch });
        });
        if let Some(previous) = self.cooldown.replace(timer) {
            previous.abort();
        }
    }

    fn on_cooldown_elapsed(&mut self, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        self.cooldown = None;
        let states = self.machine.cooldown_elapsed();
        if states.is_empty() {
            return;
        }
        self.publish(states);
        if let Some(detection) = &self.detection {
            detection.resume();
        }
    }

    /// Stop detection, cancel the cooldown timer and release the camera.
    async fn teardown(&mut self) {
        if let Some(timer) = self.cooldown.take() {
            timer.abort();
        }
        if let Some(detection) = self.detection.take() {
            detection.stop().await;
        }
        if self.source.take().is_some() {
            self.services.camera.release().await;
        }
        self.epoch += 1;
        self.overlays.send_replace(Vec::new());
    }

    async fn stop_camera(&mut self) {
        if self.source.is_none() && self.machine.phase() == Phase::AwaitingCamera {
            return;
        }
        self.teardown().await;
        let states = self.machine.camera_stopped();
        self.publish(states);
        tracing::info!("camera stopped");
    }
}
