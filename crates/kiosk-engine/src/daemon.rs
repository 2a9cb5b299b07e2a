//! Host wiring: configuration, V4L2 camera, kiosk task and D-Bus interface.

use crate::config::{ConfigError, KioskConfig};
use crate::dbus_interface;
use crate::engine::{spawn_kiosk, KioskError, KioskHandle};
use kiosk_core::FaceBackend;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("kiosk error: {0}")]
    Kiosk(#[from] KioskError),
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),
}

/// A running kiosk exported on the session bus.
pub struct KioskDaemon {
    pub handle: KioskHandle,
    /// Keeps the bus name and object registered while held.
    pub connection: zbus::Connection,
}

impl KioskDaemon {
    /// Validate `config`, spawn the kiosk over the configured camera and
    /// reference directory, and export it on the session bus.
    ///
    /// The camera stays closed until a client calls `StartCamera`.
    pub async fn start(
        config: &KioskConfig,
        backend: Arc<dyn FaceBackend>,
    ) -> Result<Self, DaemonError> {
        let (settings, services) = config.services(backend)?;
        tracing::info!(
            device = %config.camera_device,
            faces_dir = %config.faces_dir.display(),
            labels = settings.labels.len(),
            "face kiosk starting"
        );

        let handle = spawn_kiosk(services, settings)?;
        let connection = dbus_interface::serve(handle.clone()).await?;
        tracing::info!("face kiosk ready");
        Ok(Self { handle, connection })
    }

    /// Release the camera and end the kiosk task, then drop the bus connection.
    pub async fn shutdown(self) -> Result<(), KioskError> {
        tracing::info!("face kiosk shutting down");
        self.handle.shutdown().await
    }
}
