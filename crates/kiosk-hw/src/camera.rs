//! V4L2 camera capture via the `v4l` crate.

use crate::convert;
use async_trait::async_trait;
use kiosk_core::{CameraConstraints, CameraError, CameraSession, Frame, VideoSource};
use std::path::Path;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(PixelFormat::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(PixelFormat::Y16)
        } else {
            None
        }
    }
}

/// Buffers in the capture ring. Frames queued while nobody captures go stale,
/// so each capture skips this many before keeping one.
const STREAM_BUFFERS: u32 = 2;

/// Capture stream shared by the capture path and `release`.
///
/// Closing takes the same lock a capture holds, so it waits for an in-flight
/// dequeue and every later capture sees [`CameraError::NotActive`].
struct StreamSlot<S> {
    inner: std::sync::Mutex<Option<S>>,
}

impl<S> StreamSlot<S> {
    fn new(stream: S) -> Self {
        Self {
            inner: std::sync::Mutex::new(Some(stream)),
        }
    }

    fn with<T>(
        &self,
        f: impl FnOnce(&mut S) -> Result<T, CameraError>,
    ) -> Result<T, CameraError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let stream = guard.as_mut().ok_or(CameraError::NotActive)?;
        f(stream)
    }

    /// Drop the stream. Returns whether it was still open.
    fn close(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}

/// An open V4L2 device with a running capture stream.
///
/// The device file stays open until [`close`](Self::close) or drop.
pub struct Camera {
    stream: StreamSlot<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 device and negotiate a capture format near the requested width.
    pub fn open(device_path: &str, constraints: &CameraConstraints) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                CameraError::PermissionDenied(device_path.to_string())
            } else if e.to_string().contains("busy") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("capability query: {e}")))?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut requested = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("read format: {e}")))?;
        requested.fourcc = FourCC::new(b"YUYV");
        requested.width = constraints.width;
        // 4:3 request; the driver snaps to its nearest supported mode.
        requested.height = constraints.width * 3 / 4;
        let negotiated = device
            .set_format(&requested)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "driver chose {fourcc:?}; YUYV, GREY or Y16 required"
            ))
        })?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("mmap stream: {e}")))?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "camera opened"
        );

        Ok(Self {
            stream: StreamSlot::new(stream),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Dequeue the newest frame from the running stream as grayscale.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let dequeue = |e: std::io::Error| CameraError::CaptureFailed(format!("dequeue: {e}"));
        self.stream.with(|stream| {
            for _ in 0..STREAM_BUFFERS {
                stream.next().map_err(dequeue)?;
            }
            let (buf, meta) = stream.next().map_err(dequeue)?;

            let data = match self.pixel_format {
                PixelFormat::Yuyv => convert::yuyv_to_grayscale(buf, self.width, self.height),
                PixelFormat::Grey => convert::grey_to_grayscale(buf, self.width, self.height),
                PixelFormat::Y16 => convert::y16_to_grayscale(buf, self.width, self.height),
            }
            .map_err(|e| CameraError::CaptureFailed(format!("{:?}: {e}", self.pixel_format)))?;

            Ok(Frame {
                data,
                width: self.width,
                height: self.height,
                timestamp: std::time::Instant::now(),
                sequence: meta.sequence,
            })
        })
    }

    /// Stop streaming and close the device, after any capture in progress.
    pub fn close(&self) {
        if self.stream.close() {
            tracing::debug!(device = %self.device_path, "capture stream closed");
        }
    }
}

/// Shared read-only view of an open camera.
struct V4lSource {
    camera: Arc<Camera>,
}

#[async_trait]
impl VideoSource for V4lSource {
    async fn capture(&self) -> Result<Frame, CameraError> {
        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || camera.capture_frame())
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("capture task failed: {e}")))?
    }
}

/// Camera session owning one V4L2 device at a time.
pub struct V4lCameraSession {
    device_path: String,
    active: Mutex<Option<Arc<Camera>>>,
}

impl V4lCameraSession {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            active: Mutex::new(None),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl CameraSession for V4lCameraSession {
    async fn acquire(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Arc<dyn VideoSource>, CameraError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(CameraError::DeviceBusy);
        }

        let path = self.device_path.clone();
        let constraints = *constraints;
        let camera = tokio::task::spawn_blocking(move || Camera::open(&path, &constraints))
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("open task failed: {e}")))??;

        let camera = Arc::new(camera);
        *active = Some(Arc::clone(&camera));
        Ok(Arc::new(V4lSource { camera }))
    }

    /// Closes the device even while a detached capture still holds a source.
    async fn release(&self) {
        let Some(camera) = self.active.lock().await.take() else {
            return;
        };
        let device = camera.device_path.clone();
        match tokio::task::spawn_blocking(move || camera.close()).await {
            Ok(()) => tracing::info!(device = %device, "camera released"),
            Err(e) => tracing::warn!(device = %device, error = %e, "camera close task failed"),
        }
    }
}
