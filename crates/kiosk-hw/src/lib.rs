//! kiosk-hw: V4L2 camera session for the face kiosk.
//!
//! Implements the `CameraSession`/`VideoSource` contracts from `kiosk-core`
//! on top of the `v4l` crate.

pub mod camera;
pub mod convert;

pub use camera::{Camera, PixelFormat, V4lCameraSession};
pub use kiosk_core::CameraError;
