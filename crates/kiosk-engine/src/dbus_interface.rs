use crate::engine::KioskHandle;
use crate::state::RecognitionState;
use tokio::sync::broadcast::error::RecvError;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.freedesktop.FaceKiosk1";
pub const OBJECT_PATH: &str = "/org/freedesktop/FaceKiosk1";

/// D-Bus interface through which an out-of-process presentation layer
/// drives the kiosk and follows its state.
///
/// Bus name: org.freedesktop.FaceKiosk1
/// Object path: /org/freedesktop/FaceKiosk1
pub struct KioskService {
    handle: KioskHandle,
}

impl KioskService {
    pub fn new(handle: KioskHandle) -> Self {
        Self { handle }
    }
}

#[interface(name = "org.freedesktop.FaceKiosk1")]
impl KioskService {
    /// Open the camera and start scanning once references are loaded.
    async fn start_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start_camera requested");
        self.handle
            .start_camera()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Stop scanning and release the camera.
    async fn stop_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_camera requested");
        self.handle
            .stop_camera()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Current state as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(status_json(&self.handle.state()).to_string())
    }

    /// Emitted on every state entered.
    #[zbus(signal)]
    async fn state_changed(
        emitter: &SignalEmitter<'_>,
        phase: &str,
        status: &str,
        label: &str,
    ) -> zbus::Result<()>;
}

pub fn status_json(state: &RecognitionState) -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "phase": state.phase,
        "status": state.status_text(),
        "label": state.active_label,
        "last_error": state.last_error,
    })
}

fn phase_name(state: &RecognitionState) -> String {
    serde_json::to_value(state.phase)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Claim the bus name on the session bus, export [`KioskService`] and forward
/// state transitions as `StateChanged` signals.
pub async fn serve(handle: KioskHandle) -> zbus::Result<zbus::Connection> {
    let mut transitions = handle.transitions();
    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, KioskService::new(handle))?
        .build()
        .await?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    let iface = connection
        .object_server()
        .interface::<_, KioskService>(OBJECT_PATH)
        .await?;

    tokio::spawn(async move {
        loop {
            match transitions.recv().await {
                Ok(state) => {
                    let label = state.active_label.clone().unwrap_or_default();
                    if let Err(e) = KioskService::state_changed(
                        iface.signal_emitter(),
                        &phase_name(&state),
                        &state.status_text(),
                        &label,
                    )
                    .await
                    {
                        tracing::warn!(error = %e, "failed to emit StateChanged");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "state signal forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    Ok(connection)
}
