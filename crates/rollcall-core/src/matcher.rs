//! Nearest-neighbor matching of a query embedding against enrolled records.

use crate::types::{Embedding, EnrollmentRecord, MatchError, MatchOutcome, MatchResult};

/// Distance cutoff used by the browser face-api descriptors (128-d).
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a query embedding against enrolled records.
pub trait Matcher {
    fn compare(
        &self,
        query: &Embedding,
        candidates: &[EnrollmentRecord],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean nearest-neighbor matcher.
///
/// Scans every candidate, keeps the closest one (first seen wins on equal
/// distance) and accepts it only if its distance is strictly below the
/// threshold. Candidates whose dimensionality differs from the query are
/// skipped and counted in [`MatchResult::skipped`].
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Embedding,
        candidates: &[EnrollmentRecord],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        query.validate()?;
        if threshold.is_nan() || threshold < 0.0 {
            return Err(MatchError::InvalidThreshold(threshold));
        }

        let mut best: Option<(usize, f32)> = None;
        let mut skipped = 0usize;

        for (i, candidate) in candidates.iter().enumerate() {
            let dist = match query.euclidean_distance(&candidate.embedding) {
                Ok(d) if !d.is_nan() => d,
                Ok(_) => {
                    skipped += 1;
                    tracing::debug!(
                        identity = %candidate.identity,
                        "skipping candidate with NaN distance"
                    );
                    continue;
                }
                Err(err) => {
                    skipped += 1;
                    tracing::debug!(
                        identity = %candidate.identity,
                        error = %err,
                        "skipping candidate"
                    );
                    continue;
                }
            };
            tracing::trace!(identity = %candidate.identity, distance = dist, "candidate distance");

            // Strict comparison keeps the earlier candidate on a tie.
            if best.map_or(true, |(_, best_dist)| dist < best_dist) {
                best = Some((i, dist));
            }
        }

        let outcome = match best {
            Some((idx, distance)) if distance < threshold => MatchOutcome::Matched {
                identity: candidates[idx].identity.clone(),
                distance,
            },
            Some((_, distance)) => MatchOutcome::NoMatch {
                closest_distance: Some(distance),
            },
            None => MatchOutcome::NoMatch {
                closest_distance: None,
            },
        };

        Ok(MatchResult { outcome, skipped })
    }
}

/// Match `query` against `candidates` with the [`EuclideanMatcher`].
pub fn nearest_match(
    query: &Embedding,
    candidates: &[EnrollmentRecord],
    threshold: f32,
) -> Result<MatchResult, MatchError> {
    EuclideanMatcher.compare(query, candidates, threshold)
}
