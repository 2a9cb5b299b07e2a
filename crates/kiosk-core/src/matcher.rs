//! Nearest-identity matching with an "unknown" rejection threshold.

use crate::types::{Descriptor, MatchLabel, MatchResult, ReferenceSet};
use thiserror::Error;

/// Distance above which the nearest identity is reported as unknown.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, PartialEq)]
pub enum MatcherError {
    #[error("match threshold must be in (0, 1), got {0}")]
    InvalidThreshold(f32),
}

/// Strategy for matching a live descriptor against the enrolled identities.
pub trait Matcher: Send + Sync {
    fn best_match(&self, probe: &Descriptor) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher over a fixed reference set.
#[derive(Debug, Clone)]
pub struct EuclideanMatcher {
    references: ReferenceSet,
    threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(references: ReferenceSet, threshold: f32) -> Result<Self, MatcherError> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(MatcherError::InvalidThreshold(threshold));
        }
        Ok(Self {
            references,
            threshold,
        })
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Descriptor) -> MatchResult {
        if probe.len() != self.references.descriptor_len() {
            tracing::debug!(
                probe = probe.len(),
                expected = self.references.descriptor_len(),
                "descriptor length mismatch; reporting unknown"
            );
            return MatchResult {
                label: MatchLabel::Unknown,
                distance: f32::INFINITY,
            };
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        // Strict `<` keeps the earliest identity on ties.
        for (i, identity) in self.references.identities().iter().enumerate() {
            let dist = probe.distance(&identity.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= self.threshold => MatchResult {
                label: MatchLabel::Known(self.references.identities()[idx].label.clone()),
                distance: best_dist,
            },
            _ => MatchResult {
                label: MatchLabel::Unknown,
                distance: best_dist,
            },
        }
    }
}
