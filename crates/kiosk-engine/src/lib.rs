//! kiosk-engine: Detection orchestration and recognition state machine.
//!
//! [`spawn_kiosk`] starts a task that owns the [`RecognitionState`]. Commands
//! arrive through a [`KioskHandle`]; the state and detection overlays are
//! published over `tokio::sync::watch` for the presentation layer.
//! [`KioskDaemon`] wires configuration, the V4L2 camera and the D-Bus
//! interface around it for a host process.

pub mod config;
pub mod daemon;
pub mod dbus_interface;
pub mod detection_loop;
pub mod engine;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, KioskConfig};
pub use daemon::{DaemonError, KioskDaemon};
pub use detection_loop::{DetectionHandle, DetectionLoop, LoopSettings, Overlay};
pub use engine::{spawn_kiosk, KioskError, KioskHandle, KioskServices, KioskSettings};
pub use state::{Phase, RecognitionState, RecognitionStateMachine};
