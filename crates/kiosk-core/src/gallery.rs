//! Reference gallery: one descriptor per enrolled label, loaded once.
//!
//! Reference images are fetched concurrently from a [`ReferenceStore`] and
//! run through the backend's single-face detection. Any failure aborts the
//! whole load; a partial gallery is never returned.

use crate::backend::{BackendError, FaceBackend};
use crate::frame::{Frame, FrameError};
use crate::types::{Identity, ReferenceSet, ReferenceSetError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid reference label {0:?}")]
    InvalidLabel(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("decoded image is unusable: {0}")]
    Frame(#[from] FrameError),
    #[error("decode task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("no reference labels configured")]
    NoLabels,
    #[error("reference gallery already loaded or loading")]
    AlreadyLoaded,
    #[error("reference image for {label:?} unavailable: {source}")]
    Fetch {
        label: String,
        #[source]
        source: StoreError,
    },
    #[error("backend failed on reference image for {label:?}: {source}")]
    Backend {
        label: String,
        #[source]
        source: BackendError,
    },
    #[error("no face found in reference image for {label:?}")]
    NoFace { label: String },
    #[error("invalid reference set: {0}")]
    InvalidSet(#[from] ReferenceSetError),
    #[error("reference task failed: {0}")]
    Task(String),
}

/// Read-only source of reference images, one per label.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn fetch(&self, label: &str) -> Result<Frame, StoreError>;
}

/// Reference images stored as `{dir}/{label}.{format}` on disk.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
    format: String,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            format: format.into(),
        }
    }

    /// Path of the reference image for `label`.
    pub fn path_for(&self, label: &str) -> Result<PathBuf, StoreError> {
        let usable = !label.is_empty()
            && !label.starts_with('.')
            && !label.contains(['/', '\\'])
            && Path::new(label).file_name().is_some();
        if !usable {
            return Err(StoreError::InvalidLabel(label.to_string()));
        }
        Ok(self.dir.join(format!("{label}.{}", self.format)))
    }
}

#[async_trait]
impl ReferenceStore for DirectoryStore {
    async fn fetch(&self, label: &str) -> Result<Frame, StoreError> {
        let path = self.path_for(label)?;
        let bytes = tokio::fs::read(&path).await.map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        // Decoding is CPU-bound; keep it off the async workers.
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(|source| StoreError::Decode {
                path: path.clone(),
                source,
            })?;

        let gray = decoded.to_luma8();
        let (width, height) = gray.dimensions();
        tracing::debug!(path = %path.display(), width, height, "reference image decoded");
        Ok(Frame::new(gray.into_raw(), width, height)?)
    }
}

const LATCH_IDLE: u8 = 0;
const LATCH_LOADING: u8 = 1;
const LATCH_LOADED: u8 = 2;

/// Resets the latch to idle unless the load committed, so an aborted or
/// failed load can be retried by the caller.
struct LoadGuard<'a> {
    latch: &'a AtomicU8,
    committed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.latch.store(LATCH_IDLE, Ordering::Release);
        }
    }
}

/// Loads the reference set exactly once per gallery.
pub struct ReferenceGallery {
    store: Arc<dyn ReferenceStore>,
    backend: Arc<dyn FaceBackend>,
    latch: AtomicU8,
}

impl ReferenceGallery {
    pub fn new(store: Arc<dyn ReferenceStore>, backend: Arc<dyn FaceBackend>) -> Self {
        Self {
            store,
            backend,
            latch: AtomicU8::new(LATCH_IDLE),
        }
    }

    /// Whether a previous [`load`](Self::load) completed successfully.
    pub fn is_loaded(&self) -> bool {
        self.latch.load(Ordering::Acquire) == LATCH_LOADED
    }

    /// Fetch every label's reference image and extract its descriptor.
    ///
    /// Fails with [`GalleryError::AlreadyLoaded`] if a load is in flight or
    /// has already succeeded. The result preserves the order of `labels`.
    pub async fn load(&self, labels: &[String]) -> Result<ReferenceSet, GalleryError> {
        if labels.is_empty() {
            return Err(GalleryError::NoLabels);
        }
        self.latch
            .compare_exchange(
                LATCH_IDLE,
                LATCH_LOADING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| GalleryError::AlreadyLoaded)?;
        let mut guard = LoadGuard {
            latch: &self.latch,
            committed: false,
        };

        tracing::info!(count = labels.len(), "loading reference gallery");
        let set = self.load_all(labels).await?;

        self.latch.store(LATCH_LOADED, Ordering::Release);
        guard.committed = true;
        tracing::info!(
            identities = set.len(),
            dims = set.descriptor_len(),
            "reference gallery loaded"
        );
        Ok(set)
    }

    async fn load_all(&self, labels: &[String]) -> Result<ReferenceSet, GalleryError> {
        let mut tasks = JoinSet::new();
        for (idx, label) in labels.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let backend = Arc::clone(&self.backend);
            let label = label.clone();
            tasks.spawn(async move { (idx, load_identity(store, backend, label).await) });
        }

        let mut slots: Vec<Option<Result<Identity, GalleryError>>> =
            labels.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (idx, result) = joined.map_err(|e| GalleryError::Task(e.to_string()))?;
            slots[idx] = Some(result);
        }

        // Report the first failure in label order, not completion order.
        let mut identities = Vec::with_capacity(labels.len());
        for slot in slots {
            match slot {
                Some(Ok(identity)) => identities.push(identity),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "reference gallery load aborted");
                    return Err(e);
                }
                None => return Err(GalleryError::Task("reference task produced no result".into())),
            }
        }

        Ok(ReferenceSet::new(identities)?)
    }
}

async fn load_identity(
    store: Arc<dyn ReferenceStore>,
    backend: Arc<dyn FaceBackend>,
    label: String,
) -> Result<Identity, GalleryError> {
    let image = store
        .fetch(&label)
        .await
        .map_err(|source| GalleryError::Fetch {
            label: label.clone(),
            source,
        })?;

    let face = backend
        .detect_single(&image)
        .await
        .map_err(|source| GalleryError::Backend {
            label: label.clone(),
            source,
        })?
        .ok_or_else(|| GalleryError::NoFace {
            label: label.clone(),
        })?;

    tracing::debug!(
        label = %label,
        confidence = face.bbox.confidence,
        dims = face.descriptor.len(),
        "reference descriptor extracted"
    );

    Ok(Identity {
        label,
        descriptor: face.descriptor,
    })
}
