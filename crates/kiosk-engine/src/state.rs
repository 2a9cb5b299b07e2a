//! Recognition lifecycle: phases, the published state value, and the pure
//! transition functions that are the only way to change it.

use serde::Serialize;

/// Lifecycle phase of the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AwaitingCamera,
    LoadingReferences,
    Scanning,
    Recognized,
    Cooldown,
}

impl Phase {
    /// Headline shown to the person in front of the kiosk.
    pub fn headline(self) -> &'static str {
        match self {
            Phase::AwaitingCamera => "Please open the camera",
            Phase::LoadingReferences => "Loading faces",
            Phase::Scanning => "Ready to scan",
            Phase::Recognized | Phase::Cooldown => "Hello",
        }
    }
}

/// The single process-wide recognition state read by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionState {
    pub phase: Phase,
    /// Label being greeted; set only in `Recognized` and `Cooldown`.
    pub active_label: Option<String>,
    /// Last camera or reference-load failure, cleared on the next camera start.
    pub last_error: Option<String>,
}

impl Default for RecognitionState {
    fn default() -> Self {
        Self {
            phase: Phase::AwaitingCamera,
            active_label: None,
            last_error: None,
        }
    }
}

impl RecognitionState {
    /// Status line derived from phase and label, e.g. `"Hello alice"`.
    pub fn status_text(&self) -> String {
        status_text(self.phase, self.active_label.as_deref())
    }
}

pub fn status_text(phase: Phase, label: Option<&str>) -> String {
    match (phase, label) {
        (Phase::Recognized | Phase::Cooldown, Some(label)) => {
            format!("{} {label}", phase.headline())
        }
        _ => phase.headline().to_string(),
    }
}

/// Transition table over [`RecognitionState`].
///
/// Every method returns the states entered, in order. An empty vector means
/// the event was stale for the current phase and was ignored.
#[derive(Debug, Default)]
pub struct RecognitionStateMachine {
    state: RecognitionState,
}

impl RecognitionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RecognitionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    fn enter(&mut self, phase: Phase, label: Option<String>) -> RecognitionState {
        self.state.phase = phase;
        self.state.active_label = label;
        self.state.clone()
    }

    /// `AwaitingCamera → LoadingReferences`.
    pub fn camera_ready(&mut self) -> Vec<RecognitionState> {
        if self.state.phase != Phase::AwaitingCamera {
            return Vec::new();
        }
        self.state.last_error = None;
        vec![self.enter(Phase::LoadingReferences, None)]
    }

    /// Camera acquisition failed; stay in (or return to) `AwaitingCamera`.
    pub fn camera_failed(&mut self, error: String) -> Vec<RecognitionState> {
        self.state.last_error = Some(error);
        vec![self.enter(Phase::AwaitingCamera, None)]
    }

    /// `LoadingReferences → Scanning`.
    pub fn references_loaded(&mut self) -> Vec<RecognitionState> {
        if self.state.phase != Phase::LoadingReferences {
            return Vec::new();
        }
        vec![self.enter(Phase::Scanning, None)]
    }

    /// Reference load failed: back to `AwaitingCamera` with the error recorded.
    pub fn references_failed(&mut self, error: String) -> Vec<RecognitionState> {
        if self.state.phase != Phase::LoadingReferences {
            return Vec::new();
        }
        self.state.last_error = Some(error);
        vec![self.enter(Phase::AwaitingCamera, None)]
    }

    /// `Scanning → Recognized(label) → Cooldown`.
    pub fn recognized(&mut self, label: String) -> Vec<RecognitionState> {
        if self.state.phase != Phase::Scanning {
            return Vec::new();
        }
        let recognized = self.enter(Phase::Recognized, Some(label.clone()));
        let cooldown = self.enter(Phase::Cooldown, Some(label));
        vec![recognized, cooldown]
    }

    /// `Cooldown → Scanning`, clearing the active label.
    pub fn cooldown_elapsed(&mut self) -> Vec<RecognitionState> {
        if self.state.phase != Phase::Cooldown {
            return Vec::new();
        }
        vec![self.enter(Phase::Scanning, None)]
    }

    /// Camera stopped from any phase: re-arm `AwaitingCamera`.
    pub fn camera_stopped(&mut self) -> Vec<RecognitionState> {
        if self.state.phase == Phase::AwaitingCamera {
            return Vec::new();
        }
        vec![self.enter(Phase::AwaitingCamera, None)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phases(states: &[RecognitionState]) -> Vec<Phase> {
        states.iter().map(|s| s.phase).collect()
    }

    fn scanning() -> RecognitionStateMachine {
        let mut m = RecognitionStateMachine::new();
        m.camera_ready();
        m.references_loaded();
        assert_eq!(m.phase(), Phase::Scanning);
        m
    }

    #[test]
    fn test_initial_state() {
        let m = RecognitionStateMachine::new();
        assert_eq!(m.phase(), Phase::AwaitingCamera);
        assert_eq!(m.state().status_text(), "Please open the camera");
    }

    #[test]
    fn test_status_text_per_phase() {
        assert_eq!(status_text(Phase::AwaitingCamera, None), "Please open the camera");
        assert_eq!(status_text(Phase::LoadingReferences, None), "Loading faces");
        assert_eq!(status_text(Phase::Scanning, None), "Ready to scan");
        assert_eq!(status_text(Phase::Recognized, Some("alice")), "Hello alice");
        assert_eq!(status_text(Phase::Cooldown, Some("bob")), "Hello bob");
        assert_eq!(status_text(Phase::Cooldown, None), "Hello");
    }

    #[test]
    fn test_recognized_enters_cooldown_with_label() {
        let mut m = scanning();
        let entered = m.recognized("alice".into());
        assert_eq!(phases(&entered), vec![Phase::Recognized, Phase::Cooldown]);
        assert_eq!(entered[0].active_label.as_deref(), Some("alice"));
        assert_eq!(m.state().active_label.as_deref(), Some("alice"));
        assert_eq!(m.state().status_text(), "Hello alice");
    }

    #[test]
    fn test_recognized_ignored_outside_scanning() {
        let mut m = scanning();
        m.recognized("alice".into());
        // A second recognition during cooldown is stale.
        assert!(m.recognized("bob".into()).is_empty());
        assert_eq!(m.state().active_label.as_deref(), Some("alice"));

        let mut fresh = RecognitionStateMachine::new();
        assert!(fresh.recognized("alice".into()).is_empty());
        assert_eq!(fresh.phase(), Phase::AwaitingCamera);
    }

    #[test]
    fn test_cooldown_elapsed_clears_label() {
        let mut m = scanning();
        m.recognized("bob".into());
        let entered = m.cooldown_elapsed();
        assert_eq!(phases(&entered), vec![Phase::Scanning]);
        assert_eq!(m.state().active_label, None);
        // Only one expiry is honoured.
        assert!(m.cooldown_elapsed().is_empty());
    }

    #[test]
    fn test_references_loaded_only_from_loading() {
        let mut m = RecognitionStateMachine::new();
        assert!(m.references_loaded().is_empty());
        assert_eq!(m.phase(), Phase::AwaitingCamera);
    }

    #[test]
    fn test_references_failed_returns_to_awaiting_camera() {
        let mut m = RecognitionStateMachine::new();
        m.camera_ready();
        let entered = m.references_failed("no face in bob.png".into());
        assert_eq!(phases(&entered), vec![Phase::AwaitingCamera]);
        assert_eq!(m.state().last_error.as_deref(), Some("no face in bob.png"));
        // The error is cleared by the next successful start.
        m.camera_ready();
        assert_eq!(m.state().last_error, None);
    }

    #[test]
    fn test_camera_failed_keeps_awaiting_camera() {
        let mut m = RecognitionStateMachine::new();
        let entered = m.camera_failed("permission denied".into());
        assert_eq!(phases(&entered), vec![Phase::AwaitingCamera]);
        assert_eq!(m.state().last_error.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_camera_stopped_from_cooldown() {
        let mut m = scanning();
        m.recognized("alice".into());
        let entered = m.camera_stopped();
        assert_eq!(phases(&entered), vec![Phase::AwaitingCamera]);
        assert_eq!(m.state().active_label, None);
        // A late cooldown expiry cannot resurrect scanning.
        assert!(m.cooldown_elapsed().is_empty());
        assert!(m.camera_stopped().is_empty());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let mut m = scanning();
        m.recognized("alice".into());
        let json = serde_json::to_value(m.state()).unwrap();
        assert_eq!(json["phase"], "cooldown");
        assert_eq!(json["active_label"], "alice");
    }
}
