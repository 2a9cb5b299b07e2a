//! Camera session contract.
//!
//! A [`CameraSession`] owns the device. Consumers get a shared, read-only
//! [`VideoSource`] and never open or close the device themselves.

use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera session is not active")]
    NotActive,
}

/// Requested capture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    /// Preferred frame width in pixels; height follows the device's aspect ratio.
    pub width: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self { width: 300 }
    }
}

/// Read-only access to the live video stream.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Grab the current frame.
    async fn capture(&self) -> Result<Frame, CameraError>;
}

#[async_trait]
pub trait CameraSession: Send + Sync {
    /// Acquire the camera and start streaming.
    async fn acquire(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Arc<dyn VideoSource>, CameraError>;

    /// Stop streaming and release the device. A no-op when nothing is held.
    async fn release(&self);
}
