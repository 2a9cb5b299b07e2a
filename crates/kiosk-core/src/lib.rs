//! kiosk-core: Reference gallery and descriptor matching for the face kiosk.
//!
//! Face detection and descriptor extraction are delegated to a [`FaceBackend`];
//! camera capture to a [`CameraSession`]. This crate owns the data model and
//! the matching policy built on top of those collaborators.

pub mod backend;
pub mod camera;
pub mod display;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod types;

pub use backend::{BackendError, Face, FaceBackend};
pub use camera::{CameraConstraints, CameraError, CameraSession, VideoSource};
pub use display::{resize_to_display, DisplaySize};
pub use frame::Frame;
pub use gallery::{DirectoryStore, GalleryError, ReferenceGallery, ReferenceStore, StoreError};
pub use matcher::{EuclideanMatcher, Matcher, MatcherError, DEFAULT_MATCH_THRESHOLD};
pub use types::{
    BoundingBox, Descriptor, Identity, LiveDetection, MatchLabel, MatchResult, ReferenceSet,
    ReferenceSetError, UNKNOWN_LABEL,
};
