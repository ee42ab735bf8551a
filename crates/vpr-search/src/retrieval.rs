use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use vpr_core::{SignatureId, WordId};
use vpr_db::SignatureStore;

/// Ranking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalParams {
    /// Maximum number of candidates returned.
    pub top_k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

/// A ranked signature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Signature id, always present in the store that produced the ranking.
    pub id: SignatureId,
    /// Accumulated weighted votes.
    pub score: f64,
    /// Raw number of votes.
    pub votes: usize,
}

/// Inverse-frequency weighted voting over the signature store.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    params: RetrievalParams,
}

impl Retrieval {
    /// Create a ranker.
    pub fn new(params: RetrievalParams) -> Self {
        Self { params }
    }

    /// Rank signatures for a sequence of query word ids, best first.
    ///
    /// Every `(query word, occurrence)` pair casts one vote for the
    /// occurrence's signature, weighted by `1 / n` where `n` is the number of
    /// distinct signatures that observed the word. Ties on score go to the
    /// smaller id. An empty result means no query word was ever observed.
    pub fn rank(&self, store: &SignatureStore, words: &[WordId]) -> Vec<Candidate> {
        let mut tally: HashMap<SignatureId, (f64, usize)> = HashMap::new();
        for &word in words {
            let occurrences = store.occurrences(word);
            if occurrences.is_empty() {
                continue;
            }
            let weight = 1.0 / store.signature_frequency(word) as f64;
            for occ in occurrences {
                let entry = tally.entry(occ.signature).or_insert((0.0, 0));
                entry.0 += weight;
                entry.1 += 1;
            }
        }

        let mut ranked: Vec<Candidate> = tally
            .into_iter()
            .map(|(id, (score, votes))| Candidate { id, score, votes })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        ranked.truncate(self.params.top_k);

        log::debug!(
            "ranked {} candidates from {} query words",
            ranked.len(),
            words.len()
        );
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use vpr_core::{Keypoint, Pose};
    use vpr_db::Signature;

    fn sig(id: SignatureId, words: &[WordId]) -> Signature {
        Signature::new(
            id,
            0,
            0,
            Pose::identity(),
            words.iter().map(|&w| (w, Keypoint::at(0.0, 0.0))).collect(),
            words.iter().map(|&w| (w, [0.0, 0.0, 1.0])).collect(),
        )
        .expect("valid signature")
    }

    fn store() -> SignatureStore {
        SignatureStore::new(vec![
            sig(1, &[1, 2, 3]),
            sig(2, &[3, 4]),
            sig(3, &[3, 4, 5]),
            sig(4, &[9]),
        ])
        .expect("unique ids")
    }

    #[test]
    fn test_rare_words_weigh_more() {
        let ranked = Retrieval::default().rank(&store(), &[1, 3]);
        // word 1 only in sig 1 (weight 1), word 3 in three signatures (1/3 each)
        assert_eq!(ranked[0].id, 1);
        assert_relative_eq!(ranked[0].score, 1.0 + 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(ranked[0].votes, 2);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let ranked = Retrieval::default().rank(&store(), &[4]);
        let ids: Vec<SignatureId> = ranked.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(ranked[0].score, ranked[1].score);
    }

    #[test]
    fn test_scores_non_increasing_and_ids_stored() {
        let s = store();
        let ranked = Retrieval::default().rank(&s, &[1, 2, 3, 4, 5, 9, 9, 42]);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(ranked.iter().all(|c| s.contains(c.id)));
    }

    #[test]
    fn test_top_k_truncates() {
        let ranked = Retrieval::new(RetrievalParams { top_k: 2 }).rank(&store(), &[3, 9]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, 4);
    }

    #[test]
    fn test_unknown_words_give_empty_ranking() {
        assert!(Retrieval::default().rank(&store(), &[100, 200]).is_empty());
        assert!(Retrieval::default().rank(&store(), &[]).is_empty());
    }
}
