//! rollcall-core: face matching for attendance check-in.
//!
//! Embeddings are produced elsewhere (by whatever face model the capture
//! client runs); this crate only decides which enrolled identity, if any,
//! a query embedding belongs to.

pub mod matcher;
pub mod types;

pub use matcher::{nearest_match, EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use types::{Embedding, EnrollmentRecord, MatchError, MatchOutcome, MatchResult};
