use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label shown for faces that match no identity. Reserved: never enrolled.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Landmark points in the same coordinate space as the box. The point
    /// count depends on the backend.
    pub landmarks: Option<Vec<(f32, f32)>>,
}

impl BoundingBox {
    /// Scale the box and its landmarks independently along each axis.
    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .as_ref()
                .map(|pts| pts.iter().map(|&(x, y)| (x * sx, y * sy)).collect()),
        }
    }
}

/// Face descriptor: a fixed-length embedding produced by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Returns `f32::INFINITY` when the lengths differ, so a malformed probe
    /// can never win a nearest-neighbour search.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person: label plus reference descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub label: String,
    pub descriptor: Descriptor,
}

#[derive(Error, Debug, PartialEq)]
pub enum ReferenceSetError {
    #[error("reference set is empty")]
    Empty,
    #[error("label {0:?} is reserved for unmatched faces")]
    ReservedLabel(String),
    #[error("descriptor for {label:?} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
}

/// Ordered, non-empty collection of identities sharing one descriptor length.
///
/// Duplicate labels are allowed; they only make matching less decisive.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    identities: Vec<Identity>,
}

impl ReferenceSet {
    pub fn new(identities: Vec<Identity>) -> Result<Self, ReferenceSetError> {
        let first = identities.first().ok_or(ReferenceSetError::Empty)?;
        if let Some(reserved) = identities.iter().find(|i| i.label == UNKNOWN_LABEL) {
            return Err(ReferenceSetError::ReservedLabel(reserved.label.clone()));
        }
        let expected = first.descriptor.len();
        if let Some(bad) = identities.iter().find(|i| i.descriptor.len() != expected) {
            return Err(ReferenceSetError::DimensionMismatch {
                label: bad.label.clone(),
                expected,
                actual: bad.descriptor.len(),
            });
        }
        Ok(Self { identities })
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Descriptor length shared by every identity.
    pub fn descriptor_len(&self) -> usize {
        self.identities[0].descriptor.len()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.label.as_str())
    }
}

/// One face found in the current frame, already mapped to display coordinates.
#[derive(Debug, Clone)]
pub struct LiveDetection {
    pub descriptor: Descriptor,
    pub display_box: BoundingBox,
}

/// Outcome label of a match: an enrolled label, or the rejection signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLabel {
    Known(String),
    Unknown,
}

impl std::fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchLabel::Known(label) => f.write_str(label),
            MatchLabel::Unknown => f.write_str(UNKNOWN_LABEL),
        }
    }
}

/// Result of matching a live descriptor against the reference set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub label: MatchLabel,
    /// Euclidean distance to the nearest identity, even when rejected.
    pub distance: f32,
}

impl MatchResult {
    /// The matched label, or `None` for an unknown face.
    pub fn known_label(&self) -> Option<&str> {
        match &self.label {
            MatchLabel::Known(label) => Some(label),
            MatchLabel::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(label: &str, values: Vec<f32>) -> Identity {
        Identity {
            label: label.into(),
            descriptor: Descriptor::new(values),
        }
    }

    #[test]
    fn test_distance_identical() {
        let a = Descriptor::new(vec![0.1, 0.2, 0.3]);
        assert!(a.distance(&a.clone()).abs() < 1e-6);
    }

    #[test]
    fn test_distance_pythagorean() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.3, 0.4]);
        assert!((a.distance(&b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_distance_length_mismatch_is_infinite() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(a.distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_reference_set_rejects_empty() {
        assert_eq!(ReferenceSet::new(vec![]).unwrap_err(), ReferenceSetError::Empty);
    }

    #[test]
    fn test_reference_set_rejects_dimension_mismatch() {
        let err = ReferenceSet::new(vec![
            identity("alice", vec![0.0, 1.0]),
            identity("bob", vec![0.0, 1.0, 2.0]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ReferenceSetError::DimensionMismatch {
                label: "bob".into(),
                expected: 2,
                actual: 3,
            }
        );
    }

    #[test]
    fn test_reference_set_rejects_reserved_label() {
        let err = ReferenceSet::new(vec![
            identity("alice", vec![0.0, 1.0]),
            identity("unknown", vec![1.0, 0.0]),
        ])
        .unwrap_err();
        assert_eq!(err, ReferenceSetError::ReservedLabel("unknown".into()));
    }

    #[test]
    fn test_reference_set_keeps_order_and_duplicates() {
        let set = ReferenceSet::new(vec![
            identity("bob", vec![1.0]),
            identity("alice", vec![2.0]),
            identity("bob", vec![3.0]),
        ])
        .unwrap();
        assert_eq!(set.labels().collect::<Vec<_>>(), vec!["bob", "alice", "bob"]);
        assert_eq!(set.descriptor_len(), 1);
    }

    #[test]
    fn test_bounding_box_scaled() {
        let bbox = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
            confidence: 0.9,
            landmarks: Some(vec![(10.0, 20.0)]),
        };
        let scaled = bbox.scaled(2.0, 0.5);
        assert_eq!(scaled.x, 20.0);
        assert_eq!(scaled.y, 10.0);
        assert_eq!(scaled.width, 60.0);
        assert_eq!(scaled.height, 20.0);
        assert_eq!(scaled.confidence, 0.9);
        assert_eq!(scaled.landmarks, Some(vec![(20.0, 10.0)]));
    }

    #[test]
    fn test_match_label_display() {
        assert_eq!(MatchLabel::Known("alice".into()).to_string(), "alice");
        assert_eq!(MatchLabel::Unknown.to_string(), "unknown");
    }
}
