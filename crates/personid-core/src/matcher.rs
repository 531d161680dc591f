//! Comparing a probe embedding against the ordered reference encodings.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default cosine similarity a probe must reach to count as the same person.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;

/// Compare a probe against every reference, one verdict per reference.
///
/// A reference matches when its cosine similarity to the probe is at least
/// `threshold`.
pub fn compare_faces(references: &[Embedding], probe: &Embedding, threshold: f32) -> Vec<bool> {
    references
        .iter()
        .map(|reference| reference.similarity(probe) >= threshold)
        .collect()
}

/// Which reference wins when a probe is within tolerance of several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Lowest roster index among the matches, even if a later reference is closer.
    #[default]
    First,
    /// Highest similarity among the matches; ties go to the lower index.
    Best,
}

impl MatchPolicy {
    /// Index of the selected reference, or `None` when nothing is within tolerance.
    pub fn select(self, references: &[Embedding], probe: &Embedding, threshold: f32) -> Option<usize> {
        match self {
            MatchPolicy::First => compare_faces(references, probe, threshold)
                .iter()
                .position(|&matched| matched),
            MatchPolicy::Best => {
                let mut best: Option<(usize, f32)> = None;
                for (idx, reference) in references.iter().enumerate() {
                    let sim = reference.similarity(probe);
                    if sim < threshold {
                        continue;
                    }
                    if best.map_or(true, |(_, best_sim)| sim > best_sim) {
                        best = Some((idx, sim));
                    }
                }
                best.map(|(idx, _)| idx)
            }
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::First => f.write_str("first"),
            MatchPolicy::Best => f.write_str("best"),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "best" => Ok(MatchPolicy::Best),
            other => Err(format!("unknown match policy {other:?} (expected \"first\" or \"best\")")),
        }
    }
}
