use std::collections::HashMap;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use vpr_core::{Keypoint, WordId};

/// Query keypoints that quantized to a visual word.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct QueryWords {
    matches: Vec<(WordId, Keypoint)>,
}

impl QueryWords {
    /// Wrap `(word, keypoint)` pairs in extraction order.
    pub fn new(matches: Vec<(WordId, Keypoint)>) -> Self {
        Self { matches }
    }

    /// Pair keypoints with optional word ids, dropping the unmatched ones.
    pub fn from_quantized(
        keypoints: &[Keypoint],
        words: impl IntoIterator<Item = Option<WordId>>,
    ) -> Self {
        let matches = keypoints
            .iter()
            .zip(words)
            .filter_map(|(kp, w)| w.map(|w| (w, *kp)))
            .collect();
        Self { matches }
    }

    /// Matched pairs.
    pub fn matches(&self) -> &[(WordId, Keypoint)] {
        &self.matches
    }

    /// Word ids in extraction order, repeats included.
    pub fn word_ids(&self) -> Vec<WordId> {
        self.matches.iter().map(|(w, _)| *w).collect()
    }

    /// Keypoints of words that occur exactly once in the query.
    pub fn unique(&self) -> HashMap<WordId, Keypoint> {
        let mut counts: HashMap<WordId, (usize, Keypoint)> = HashMap::new();
        for (w, kp) in &self.matches {
            counts.entry(*w).or_insert((0, *kp)).0 += 1;
        }
        counts
            .into_iter()
            .filter_map(|(w, (n, kp))| (n == 1).then_some((w, kp)))
            .collect()
    }

    /// Number of matched keypoints.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether no keypoint matched a word.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}
