use crate::detection_loop::{LoopSettings, DEFAULT_STRICT_THRESHOLD};
use crate::engine::{KioskServices, KioskSettings};
use kiosk_core::{
    CameraConstraints, DirectoryStore, DisplaySize, FaceBackend, DEFAULT_MATCH_THRESHOLD,
};
use kiosk_hw::V4lCameraSession;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_IMAGE_FORMAT: &str = "png";
const MANIFEST_FILE: &str = "labels.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read label manifest {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid label manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no labels configured (set KIOSK_LABELS or list them in {0})")]
    NoLabels(PathBuf),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Label manifest stored next to the reference images.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelManifest {
    pub labels: Vec<String>,
    /// Extension of the reference images, e.g. `"jpg"`.
    pub image_format: Option<String>,
}

/// Labels and image format after merging environment and manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGallery {
    pub labels: Vec<String>,
    pub image_format: String,
}

/// Kiosk configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct KioskConfig {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture width in pixels.
    pub camera_width: u32,
    /// Directory holding `{label}.{format}` reference images.
    pub faces_dir: PathBuf,
    /// Reference image extension; falls back to the manifest, then `png`.
    pub image_format: Option<String>,
    /// Labels from the environment. Empty means "read the manifest".
    pub labels: Vec<String>,
    pub manifest_path: PathBuf,
    /// Euclidean distance above which a face is unknown.
    pub match_threshold: f32,
    /// Distance below which a known face is greeted.
    pub strict_threshold: f32,
    pub tick_interval_ms: u64,
    pub cooldown_ms: u64,
    pub display_width: u32,
    pub display_height: u32,
}

impl KioskConfig {
    /// Load configuration from `KIOSK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let faces_dir = lookup("KIOSK_FACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                lookup("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| {
                        let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("face-kiosk/faces")
            });

        let manifest_path = lookup("KIOSK_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|| faces_dir.join(MANIFEST_FILE));

        let labels = lookup("KIOSK_LABELS")
            .map(|v| parse_labels(&v))
            .unwrap_or_default();

        Self {
            camera_device: lookup("KIOSK_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            camera_width: parse_or(&lookup, "KIOSK_CAMERA_WIDTH", 300),
            faces_dir,
            image_format: lookup("KIOSK_IMAGE_FORMAT").filter(|f| !f.is_empty()),
            labels,
            manifest_path,
            match_threshold: parse_or(&lookup, "KIOSK_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            strict_threshold: parse_or(&lookup, "KIOSK_STRICT_THRESHOLD", DEFAULT_STRICT_THRESHOLD),
            tick_interval_ms: parse_or(&lookup, "KIOSK_TICK_INTERVAL_MS", 1000),
            cooldown_ms: parse_or(&lookup, "KIOSK_COOLDOWN_MS", 3000),
            display_width: parse_or(&lookup, "KIOSK_DISPLAY_WIDTH", 640),
            display_height: parse_or(&lookup, "KIOSK_DISPLAY_HEIGHT", 480),
        }
    }

    /// Reject values the kiosk cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_unit = |v: f32| v > 0.0 && v < 1.0;
        if !in_unit(self.match_threshold) {
            return Err(ConfigError::Invalid(format!(
                "match threshold must be in (0, 1), got {}",
                self.match_threshold
            )));
        }
        if !in_unit(self.strict_threshold) || self.strict_threshold > self.match_threshold {
            return Err(ConfigError::Invalid(format!(
                "strict threshold must be in (0, {}], got {}",
                self.match_threshold, self.strict_threshold
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick interval must be non-zero".into()));
        }
        if self.camera_width == 0 || self.display_width == 0 || self.display_height == 0 {
            return Err(ConfigError::Invalid(
                "camera and display sizes must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Labels and image format: environment first, then the manifest.
    pub fn resolve_gallery(&self) -> Result<ResolvedGallery, ConfigError> {
        let manifest = if self.labels.is_empty() || self.image_format.is_none() {
            read_manifest(&self.manifest_path, self.labels.is_empty())?
        } else {
            None
        };

        let labels = if self.labels.is_empty() {
            manifest
                .as_ref()
                .map(|m| m.labels.clone())
                .unwrap_or_default()
        } else {
            self.labels.clone()
        };
        if labels.is_empty() {
            return Err(ConfigError::NoLabels(self.manifest_path.clone()));
        }

        let image_format = self
            .image_format
            .clone()
            .or_else(|| manifest.and_then(|m| m.image_format))
            .unwrap_or_else(|| DEFAULT_IMAGE_FORMAT.to_string());

        Ok(ResolvedGallery {
            labels,
            image_format,
        })
    }

    /// Validate and produce engine settings plus the reference image store.
    pub fn build(&self) -> Result<(KioskSettings, DirectoryStore), ConfigError> {
        self.validate()?;
        let gallery = self.resolve_gallery()?;
        let store = DirectoryStore::new(&self.faces_dir, gallery.image_format);
        let settings = KioskSettings {
            labels: gallery.labels,
            match_threshold: self.match_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
            constraints: CameraConstraints {
                width: self.camera_width,
            },
            detection: LoopSettings {
                tick_interval: Duration::from_millis(self.tick_interval_ms),
                strict_threshold: self.strict_threshold,
                display: DisplaySize {
                    width: self.display_width,
                    height: self.display_height,
                },
            },
        };
        Ok((settings, store))
    }

    /// Camera session for the configured V4L2 device. The device is opened on
    /// the first `start_camera`, not here.
    pub fn camera_session(&self) -> V4lCameraSession {
        V4lCameraSession::new(self.camera_device.clone())
    }

    /// Settings plus the collaborators the kiosk drives. The face backend is
    /// supplied by the host.
    pub fn services(
        &self,
        backend: Arc<dyn FaceBackend>,
    ) -> Result<(KioskSettings, KioskServices), ConfigError> {
        let (settings, store) = self.build()?;
        let services = KioskServices {
            camera: Arc::new(self.camera_session()),
            backend,
            store: Arc::new(store),
        };
        Ok((settings, services))
    }
}

/// Read the manifest. A missing file is only an error when it must supply labels.
fn read_manifest(path: &Path, required: bool) -> Result<Option<LabelManifest>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => return Ok(None),
        Err(source) => {
            return Err(ConfigError::ManifestIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let manifest = toml::from_str::<LabelManifest>(&text).map_err(|source| {
        ConfigError::ManifestParse {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(Some(manifest))
}

fn parse_labels(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> KioskConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        KioskConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/kiosk")]);
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.camera_width, 300);
        assert_eq!(c.faces_dir, PathBuf::from("/home/kiosk/.local/share/face-kiosk/faces"));
        assert_eq!(
            c.manifest_path,
            PathBuf::from("/home/kiosk/.local/share/face-kiosk/faces/labels.toml")
        );
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!(c.strict_threshold, 0.4);
        assert_eq!(c.tick_interval_ms, 1000);
        assert_eq!(c.cooldown_ms, 3000);
        assert_eq!((c.display_width, c.display_height), (640, 480));
        assert!(c.labels.is_empty());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let c = config(&[
            ("KIOSK_LABELS", " alice, bob ,,carol "),
            ("KIOSK_MATCH_THRESHOLD", "0.55"),
            ("KIOSK_COOLDOWN_MS", "not-a-number"),
            ("KIOSK_FACES_DIR", "/srv/faces"),
        ]);
        assert_eq!(c.labels, vec!["alice", "bob", "carol"]);
        assert_eq!(c.match_threshold, 0.55);
        assert_eq!(c.cooldown_ms, 3000);
        assert_eq!(c.manifest_path, PathBuf::from("/srv/faces/labels.toml"));
    }

    #[test]
    fn test_validate_rejects_strict_above_match() {
        let c = config(&[
            ("KIOSK_MATCH_THRESHOLD", "0.5"),
            ("KIOSK_STRICT_THRESHOLD", "0.6"),
        ]);
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let c = config(&[("KIOSK_TICK_INTERVAL_MS", "0")]);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_manifest_supplies_labels_and_format() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("labels.toml"),
            "labels = [\"alice\", \"bob\"]\nimage_format = \"jpg\"\n",
        )
        .unwrap();
        let c = config(&[("KIOSK_FACES_DIR", dir.path().to_str().unwrap())]);

        let gallery = c.resolve_gallery().unwrap();
        assert_eq!(gallery.labels, vec!["alice", "bob"]);
        assert_eq!(gallery.image_format, "jpg");

        let (settings, store) = c.build().unwrap();
        assert_eq!(settings.labels, vec!["alice", "bob"]);
        assert_eq!(settings.cooldown, Duration::from_millis(3000));
        assert_eq!(store.path_for("bob").unwrap(), dir.path().join("bob.jpg"));
    }

    struct NoFaces;

    #[async_trait::async_trait]
    impl FaceBackend for NoFaces {
        async fn detect_single(
            &self,
            _image: &kiosk_core::Frame,
        ) -> Result<Option<kiosk_core::Face>, kiosk_core::BackendError> {
            Ok(None)
        }

        async fn detect_all(
            &self,
            _frame: &kiosk_core::Frame,
        ) -> Result<Vec<kiosk_core::Face>, kiosk_core::BackendError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_services_open_configured_camera_device() {
        let c = config(&[
            ("KIOSK_CAMERA_DEVICE", "/dev/does-not-exist-video42"),
            ("KIOSK_CAMERA_WIDTH", "640"),
            ("KIOSK_LABELS", "alice"),
            ("KIOSK_FACES_DIR", "/srv/faces"),
        ]);
        assert_eq!(c.camera_session().device_path(), "/dev/does-not-exist-video42");

        let (settings, services) = c.services(Arc::new(NoFaces)).unwrap();
        assert_eq!(settings.labels, vec!["alice"]);
        assert_eq!(settings.constraints.width, 640);
        match services.camera.acquire(&settings.constraints).await {
            Err(kiosk_core::CameraError::DeviceNotFound(path)) => {
                assert_eq!(path, "/dev/does-not-exist-video42")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("missing device opened"),
        }
    }

    #[test]
    fn test_env_labels_win_over_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("labels.toml"), "labels = [\"alice\"]\n").unwrap();
        let c = config(&[
            ("KIOSK_FACES_DIR", dir.path().to_str().unwrap()),
            ("KIOSK_LABELS", "dave"),
        ]);
        let gallery = c.resolve_gallery().unwrap();
        assert_eq!(gallery.labels, vec!["dave"]);
        assert_eq!(gallery.image_format, "png");
    }

    #[test]
    fn test_env_labels_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(&[
            ("KIOSK_FACES_DIR", dir.path().to_str().unwrap()),
            ("KIOSK_LABELS", "alice"),
        ]);
        assert_eq!(c.resolve_gallery().unwrap().labels, vec!["alice"]);
    }

    #[test]
    fn test_missing_manifest_without_labels_fails() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(&[("KIOSK_FACES_DIR", dir.path().to_str().unwrap())]);
        assert!(matches!(
            c.resolve_gallery(),
            Err(ConfigError::ManifestIo { .. })
        ));
    }

    #[test]
    fn test_malformed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("labels.toml"), "labels = alice").unwrap();
        let c = config(&[("KIOSK_FACES_DIR", dir.path().to_str().unwrap())]);
        assert!(matches!(
            c.resolve_gallery(),
            Err(ConfigError::ManifestParse { .. })
        ));
    }

    #[test]
    fn test_empty_manifest_labels() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("labels.toml"), "labels = []").unwrap();
        let c = config(&[("KIOSK_FACES_DIR", dir.path().to_str().unwrap())]);
        assert!(matches!(c.resolve_gallery(), Err(ConfigError::NoLabels(_))));
    }
}
