//! Scripted collaborators for engine tests.

use async_trait::async_trait;
use kiosk_core::{
    BackendError, BoundingBox, CameraConstraints, CameraError, CameraSession, Descriptor, Face,
    FaceBackend, Frame, ReferenceStore, StoreError, VideoSource,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FakeCamera {
    pub fail: AtomicBool,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

struct StillSource;

#[async_trait]
impl VideoSource for StillSource {
    async fn capture(&self) -> Result<Frame, CameraError> {
        Ok(Frame::new(vec![128; 320 * 240], 320, 240).expect("valid frame"))
    }
}

#[async_trait]
impl CameraSession for FakeCamera {
    async fn acquire(
        &self,
        _constraints: &CameraConstraints,
    ) -> Result<Arc<dyn VideoSource>, CameraError> {
        if self.fail.load(Ordering::Acquire) {
            return Err(CameraError::PermissionDenied("/dev/video0".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StillSource))
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn face(values: Vec<f32>) -> Face {
    Face {
        bbox: BoundingBox {
            x: 40.0,
            y: 30.0,
            width: 120.0,
            height: 150.0,
            confidence: 0.95,
            landmarks: None,
        },
        descriptor: Descriptor::new(values),
    }
}

/// Reference images encode their identity in the fill byte: `n` maps to the
/// descriptor `[(n - 1) * 10, 0]`, and 0 means no face. Live frames return
/// the scripted descriptor.
pub(crate) struct FakeBackend {
    live: Mutex<Option<Vec<f32>>>,
    pub detect_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(live: Option<Vec<f32>>) -> Self {
        Self {
            live: Mutex::new(live),
            detect_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_live(&self, live: Option<Vec<f32>>) {
        *self.live.lock().expect("live lock") = live;
    }
}

#[async_trait]
impl FaceBackend for FakeBackend {
    async fn detect_single(&self, image: &Frame) -> Result<Option<Face>, BackendError> {
        let fill = image.data[0];
        if fill == 0 {
            return Ok(None);
        }
        Ok(Some(face(vec![(fill - 1) as f32 * 10.0, 0.0])))
    }

    async fn detect_all(&self, _frame: &Frame) -> Result<Vec<Face>, BackendError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        let live = self.live.lock().expect("live lock").clone();
        Ok(live.map(face).into_iter().collect())
    }
}

/// In-memory reference images. Each fetch reads its fill byte up front and
/// then waits out the scripted delay.
pub(crate) struct FakeStore {
    fills: Mutex<HashMap<String, u8>>,
    delay: Mutex<Duration>,
    pub fetches: AtomicUsize,
}

impl FakeStore {
    pub fn new(entries: &[(&str, u8)]) -> Self {
        Self {
            fills: Mutex::new(entries.iter().map(|(l, f)| (l.to_string(), *f)).collect()),
            delay: Mutex::new(Duration::ZERO),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_fill(&self, label: &str, fill: u8) {
        self.fills
            .lock()
            .expect("fills lock")
            .insert(label.to_string(), fill);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = delay;
    }
}

#[async_trait]
impl ReferenceStore for FakeStore {
    async fn fetch(&self, label: &str) -> Result<Frame, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let fill = self.fills.lock().expect("fills lock").get(label).copied();
        let delay = *self.delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let fill = fill.ok_or_else(|| StoreError::Io {
            path: PathBuf::from(format!("{label}.png")),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        Ok(Frame::new(vec![fill; 16], 4, 4)?)
    }
}
