use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid threshold {0}: must be a non-negative number")]
    InvalidThreshold(f32),
    /// Raised per candidate. The matcher skips the candidate and keeps scanning.
    #[error("dimension mismatch: query has {expected} values, candidate has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Face embedding vector (128-dimensional for the browser face-api model).
///
/// Serializes as a bare JSON array of numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Check the query contract: non-empty and finite.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.is_empty() {
            return Err(MatchError::InvalidInput("query embedding is empty"));
        }
        if !self.is_finite() {
            return Err(MatchError::InvalidInput("query embedding contains non-finite values"));
        }
        Ok(())
    }

    /// Compute the Euclidean (L2) distance between two embeddings.
    ///
    /// No normalization or weighting is applied. Fails if the two vectors
    /// have different lengths.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, MatchError> {
        if self.values.len() != other.values.len() {
            return Err(MatchError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// An enrolled identity and its reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub identity: String,
    pub embedding: Embedding,
}

impl EnrollmentRecord {
    pub fn new(identity: impl Into<String>, embedding: impl Into<Embedding>) -> Self {
        Self {
            identity: identity.into(),
            embedding: embedding.into(),
        }
    }
}

/// Decision reached for a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched {
        identity: String,
        distance: f32,
    },
    NoMatch {
        /// Distance to the nearest evaluated candidate, absent when none was evaluated.
        closest_distance: Option<f32>,
    },
}

/// Result of matching a query embedding against the enrolled set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub outcome: MatchOutcome,
    /// Candidates excluded from the scan (dimension mismatch or NaN distance).
    pub skipped: usize,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self.outcome, MatchOutcome::Matched { .. })
    }

    /// Identity of the matched record, if any.
    pub fn identity(&self) -> Option<&str> {
        match &self.outcome {
            MatchOutcome::Matched { identity, .. } => Some(identity),
            MatchOutcome::NoMatch { .. } => None,
        }
    }

    /// Distance to the nearest evaluated candidate, matched or not.
    pub fn distance(&self) -> Option<f32> {
        match self.outcome {
            MatchOutcome::Matched { distance, .. } => Some(distance),
            MatchOutcome::NoMatch { closest_distance } => closest_distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.25, -1.0, 3.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), Ok(0.0));
    }

    #[test]
    fn test_euclidean_distance_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert_eq!(a.euclidean_distance(&b), Ok(5.0));
        assert_eq!(b.euclidean_distance(&a), Ok(5.0));
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(
            a.euclidean_distance(&b),
            Err(MatchError::DimensionMismatch { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn test_is_finite() {
        assert!(Embedding::new(vec![1.0, -2.0]).is_finite());
        assert!(!Embedding::new(vec![1.0, f32::NAN]).is_finite());
        assert!(!Embedding::new(vec![f32::INFINITY]).is_finite());
    }

    #[test]
    fn test_embedding_serializes_as_array() {
        let e = Embedding::new(vec![0.5, 1.0]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,1.0]");
        let back: Embedding = serde_json::from_str("[0.5, 1]").unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_match_result_accessors() {
        let hit = MatchResult {
            outcome: MatchOutcome::Matched { identity: "a".into(), distance: 0.2 },
            skipped: 0,
        };
        assert!(hit.is_match());
        assert_eq!(hit.identity(), Some("a"));
        assert_eq!(hit.distance(), Some(0.2));

        let miss = MatchResult {
            outcome: MatchOutcome::NoMatch { closest_distance: None },
            skipped: 2,
        };
        assert!(!miss.is_match());
        assert_eq!(miss.identity(), None);
        assert_eq!(miss.distance(), None);
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let outcome = MatchOutcome::NoMatch {
            closest_distance: Some(1.0),
        };
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["status"], "no_match");
        assert_eq!(json["closest_distance"], 1.0);
    }
}
