use crate::gallery::Gallery;
use crate::types::{Embedding, Label};

/// Default acceptance threshold, in Euclidean embedding units.
///
/// The recognizer emits unit-norm vectors, so `d² = 2 - 2·cos`. This is the
/// distance equivalent of a cosine similarity of 0.40, `√1.2 ≈ 1.095`.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.10;

/// Result of matching one embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub label: Label,
    /// Global minimum distance; `+inf` for an empty gallery.
    pub distance: f32,
}

impl MatchOutcome {
    pub fn unknown() -> Self {
        Self {
            label: Label::Unknown,
            distance: f32::INFINITY,
        }
    }
}

/// Strategy for deciding who an embedding belongs to.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery) -> MatchOutcome;
}

/// Nearest-neighbour matcher over every embedding of every identity.
///
/// Identities are scored by their closest embedding, never an average. The
/// nearest embedding wins only if it is within `threshold`; otherwise the
/// query is `Unknown` and still reports that nearest distance. Among exact
/// ties the first identity in gallery order is reported.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn accepts(&self, distance: f32) -> bool {
        distance <= self.threshold
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery) -> MatchOutcome {
        let mut best: Option<(&str, f32)> = None;

        for (identity, reference) in gallery.embeddings() {
            let d = query.distance(reference);
            if best.map_or(!d.is_nan(), |(_, best_d)| d < best_d) {
                best = Some((&identity.label, d));
            }
        }

        match best {
            None => MatchOutcome::unknown(),
            Some((label, d)) if self.accepts(d) => MatchOutcome {
                label: Label::Known(label.to_string()),
                distance: d,
            },
            Some((_, d)) => MatchOutcome {
                label: Label::Unknown,
                distance: d,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_empty_gallery_is_unknown_at_infinity() {
        let outcome = EuclideanMatcher::default().compare(&e(&[1.0, 0.0]), &Gallery::new());
        assert_eq!(outcome.label, Label::Unknown);
        assert!(outcome.distance.is_infinite() && outcome.distance > 0.0);
    }

    #[test]
    fn test_within_threshold_reports_label() {
        let mut gallery = Gallery::new();
        gallery.push("alice", e(&[0.0, 0.0]));
        let outcome = EuclideanMatcher::new(0.6).compare(&e(&[0.3, 0.0]), &gallery);
        assert_eq!(outcome.label, Label::Known("alice".into()));
        assert!((outcome.distance - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_beyond_threshold_is_unknown_with_distance() {
        let mut gallery = Gallery::new();
        gallery.push("alice", e(&[0.0, 0.0]));
        let outcome = EuclideanMatcher::new(0.6).compare(&e(&[0.0, 0.9]), &gallery);
        assert_eq!(outcome.label, Label::Unknown);
        assert!((outcome.distance - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut gallery = Gallery::new();
        gallery.push("alice", e(&[0.0]));
        let outcome = EuclideanMatcher::new(0.5).compare(&e(&[0.5]), &gallery);
        assert!(outcome.label.is_known());
    }

    #[test]
    fn test_identity_scored_by_closest_embedding() {
        // bob's average is further than alice's, but one of bob's samples is nearest
        let mut gallery = Gallery::new();
        gallery.push("alice", e(&[0.2, 0.0]));
        gallery.push("bob", e(&[5.0, 5.0]));
        gallery.add_sample(1, e(&[0.05, 0.0]));

        let outcome = EuclideanMatcher::default().compare(&e(&[0.0, 0.0]), &gallery);
        assert_eq!(outcome.label, Label::Known("bob".into()));
        assert!((outcome.distance - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_full_traversal_finds_last_entry() {
        let mut gallery = Gallery::new();
        gallery.push("decoy1", e(&[0.0, 1.0, 0.0]));
        gallery.push("decoy2", e(&[0.0, 0.0, 1.0]));
        gallery.push("match", e(&[1.0, 0.0, 0.0]));
        let outcome = EuclideanMatcher::default().compare(&e(&[1.0, 0.0, 0.0]), &gallery);
        assert_eq!(outcome.label.as_known(), Some("match"));
        assert_eq!(outcome.distance, 0.0);
    }

    #[test]
    fn test_shared_label_resolves_to_owner_of_minimum() {
        let mut gallery = Gallery::new();
        gallery.push("carol", e(&[3.0]));
        gallery.push("carol", e(&[0.1]));
        let outcome = EuclideanMatcher::default().compare(&e(&[0.0]), &gallery);
        assert_eq!(outcome.label.as_known(), Some("carol"));
        assert!((outcome.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_default_threshold_matches_cosine_calibration() {
        let cosine = 0.40f32;
        let equivalent = (2.0 - 2.0 * cosine).sqrt();
        assert!((DEFAULT_MATCH_THRESHOLD - equivalent).abs() < 0.01);

        // two unit vectors 60 degrees apart (cos 0.5) are the same person
        let mut gallery = Gallery::new();
        gallery.push("alice", e(&[1.0, 0.0]));
        let outcome = EuclideanMatcher::default().compare(&e(&[0.5, 0.75f32.sqrt()]), &gallery);
        assert_eq!(outcome.label.as_known(), Some("alice"));

        // orthogonal unit vectors (cos 0) are not
        let outcome = EuclideanMatcher::default().compare(&e(&[0.0, 1.0]), &gallery);
        assert_eq!(outcome.label, Label::Unknown);
    }

    #[test]
    fn test_nan_query_never_matches() {
        let mut gallery = Gallery::new();
        gallery.push("alice", e(&[0.0]));
        let outcome = EuclideanMatcher::default().compare(&e(&[f32::NAN]), &gallery);
        assert_eq!(outcome, MatchOutcome::unknown());
    }
}
