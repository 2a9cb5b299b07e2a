//! Contract of the face detection/recognition backend.
//!
//! The backend runs the actual models (detector, landmarks, descriptor
//! network). The kiosk only consumes its output.

use crate::frame::Frame;
use crate::types::{BoundingBox, Descriptor};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend not ready: {0}")]
    NotReady(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// A face located by the backend, with its descriptor.
#[derive(Debug, Clone)]
pub struct Face {
    /// Box and landmarks in frame pixel coordinates.
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}

#[async_trait]
pub trait FaceBackend: Send + Sync {
    /// Detect the single most prominent face in a still image.
    async fn detect_single(&self, image: &Frame) -> Result<Option<Face>, BackendError>;

    /// Detect every face in a video frame, in the backend's detection order.
    async fn detect_all(&self, frame: &Frame) -> Result<Vec<Face>, BackendError>;
}
