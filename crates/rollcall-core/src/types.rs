use serde::{Deserialize, Serialize};

/// Distance below which two face embeddings are treated as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Face embedding vector, as produced by the external extractor.
///
/// The length is whatever the extractor emits (128 for the browser model
/// used by the portal). Two embeddings are only comparable when they come
/// from the same extractor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Dimensions are zipped: a length mismatch silently compares only the
    /// shared prefix. Callers own the dimensionality contract.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| {
                let d = a - b;
                d * d
            })
            .sum::<f32>()
            .sqrt()
    }
}

/// The identity fields a lookup or match is allowed to reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub roll_no: String,
}

/// A registered person, as persisted by the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    #[serde(flatten)]
    pub identity: Identity,
    pub embedding: Embedding,
    /// Plaintext lookup token; only its encoded form leaves the service.
    #[serde(skip_serializing)]
    pub lookup_token: String,
    pub created_at: String,
}

/// Read-only gallery entry used for face matching.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub id: String,
    pub identity: Identity,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Smallest distance seen; `None` when no candidate was compared.
    pub distance: Option<f32>,
    /// Gallery index of the accepted candidate (only set when matched).
    pub index: Option<usize>,
}

impl MatchResult {
    pub fn no_match(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            index: None,
        }
    }

    /// Resolve the accepted candidate in the gallery that produced this result.
    pub fn candidate<'a>(&self, gallery: &'a [FaceCandidate]) -> Option<&'a FaceCandidate> {
        self.index.and_then(|i| gallery.get(i))
    }
}

/// Strategy for comparing a probe embedding against a gallery of registered faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[FaceCandidate], threshold: f32) -> MatchResult;
}

/// Brute-force nearest neighbour by Euclidean distance.
///
/// Visits every gallery entry. The best candidate is replaced only on a
/// strictly smaller distance, so ties go to the earliest entry. A match
/// requires `distance < threshold`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[FaceCandidate], threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, candidate) in gallery.iter().enumerate() {
            // Registrations without a captured face are never candidates.
            if candidate.embedding.is_empty() {
                continue;
            }
            let dist = probe.euclidean_distance(&candidate.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => MatchResult {
                matched: true,
                distance: Some(best_dist),
                index: Some(idx),
            },
            Some(_) => MatchResult::no_match(Some(best_dist)),
            None => MatchResult::no_match(None),
        }
    }
}
