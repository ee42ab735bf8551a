#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # vpr-index
//!
//! A [`WordIndex`] maps a local image descriptor to the id of the nearest
//! visual word of a fixed vocabulary, or to nothing when the match is too far
//! away or too ambiguous.
//!
//! ```rust
//! use vpr_index::{Word, WordIndex, WordIndexParams};
//!
//! let words = vec![
//!     Word::new(4, vec![0.0, 0.0]),
//!     Word::new(9, vec![10.0, 0.0]),
//! ];
//! let index = WordIndex::build(words, WordIndexParams::default())?;
//! let hit = index.quantize(&[0.5, 0.0])?;
//! assert_eq!(hit.map(|m| m.word), Some(4));
//! # Ok::<(), vpr_index::IndexError>(())
//! ```

mod kd_tree;

use std::collections::HashSet;

use bincode::{Decode, Encode};
use kd_tree::KdTree;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vpr_core::{Descriptor, WordId};

/// Errors raised while building or querying a [`WordIndex`].
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// The vocabulary holds no words.
    #[error("Vocabulary is empty")]
    EmptyVocabulary,

    /// Vocabulary descriptors have zero length.
    #[error("Vocabulary descriptors are empty")]
    EmptyDescriptor,

    /// A descriptor length differs from the vocabulary dimension.
    #[error("Descriptor has {actual} dimensions, vocabulary has {expected}")]
    DimensionMismatch {
        /// Vocabulary dimension.
        expected: usize,
        /// Offending descriptor length.
        actual: usize,
    },

    /// Two words share an id.
    #[error("Duplicate word id {0}")]
    DuplicateWord(WordId),

    /// A descriptor contains NaN or infinity.
    #[error("Descriptor contains non-finite values")]
    NonFiniteDescriptor,
}

/// A vocabulary entry: an id and its centroid descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Word {
    /// Word id.
    pub id: WordId,
    /// Centroid descriptor.
    pub descriptor: Descriptor,
}

impl Word {
    /// Create a word.
    pub fn new(id: WordId, descriptor: Descriptor) -> Self {
        Self { id, descriptor }
    }
}

/// Quantizer thresholds and tree shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordIndexParams {
    /// Reject the match when the nearest word is farther than this (Euclidean).
    pub max_distance: Option<f32>,
    /// Nearest-neighbour distance ratio: reject when `d1 > ratio * d2`.
    pub nndr_ratio: Option<f32>,
    /// Bound on compared words per query; `None` searches exactly.
    pub max_checks: Option<usize>,
    /// Maximum words per leaf.
    pub leaf_size: usize,
}

impl Default for WordIndexParams {
    fn default() -> Self {
        Self {
            max_distance: None,
            nndr_ratio: Some(0.8),
            max_checks: None,
            leaf_size: 8,
        }
    }
}

/// Outcome of a successful quantization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WordMatch {
    /// Nearest word.
    pub word: WordId,
    /// Euclidean distance to it.
    pub distance: f32,
}

/// Nearest-neighbour index over the vocabulary. Immutable once built and safe
/// to share between threads.
#[derive(Debug, Clone)]
pub struct WordIndex {
    params: WordIndexParams,
    dim: usize,
    ids: Vec<WordId>,
    data: Vec<f32>,
    tree: KdTree,
}

impl WordIndex {
    /// Build the index from a vocabulary.
    pub fn build(words: Vec<Word>, params: WordIndexParams) -> Result<Self, IndexError> {
        let first = words.first().ok_or(IndexError::EmptyVocabulary)?;
        let dim = first.descriptor.len();
        if dim == 0 {
            return Err(IndexError::EmptyDescriptor);
        }

        let mut seen = HashSet::with_capacity(words.len());
        let mut ids = Vec::with_capacity(words.len());
        let mut data = Vec::with_capacity(words.len() * dim);
        for word in words {
            if word.descriptor.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: word.descriptor.len(),
                });
            }
            if !word.descriptor.iter().all(|v| v.is_finite()) {
                return Err(IndexError::NonFiniteDescriptor);
            }
            if !seen.insert(word.id) {
                return Err(IndexError::DuplicateWord(word.id));
            }
            ids.push(word.id);
            data.extend_from_slice(&word.descriptor);
        }

        let tree = KdTree::build(&data, dim, params.leaf_size);
        log::debug!("built word index: {} words, {} dimensions", ids.len(), dim);

        Ok(Self {
            params,
            dim,
            ids,
            data,
            tree,
        })
    }

    /// Quantize one descriptor.
    ///
    /// Returns `Ok(None)` when the nearest word fails the distance threshold or
    /// the ratio test. Equidistant words resolve to the smallest id.
    pub fn quantize(&self, descriptor: &[f32]) -> Result<Option<WordMatch>, IndexError> {
        self.check(descriptor)?;
        let (first, second) =
            self.tree
                .nearest_two(&self.data, self.dim, &self.ids, descriptor, self.params.max_checks);
        let Some(first) = first else {
            return Ok(None);
        };

        let d1 = first.dist_sq.sqrt();
        if let Some(max) = self.params.max_distance {
            if d1 > max {
                return Ok(None);
            }
        }
        if let (Some(ratio), Some(second)) = (self.params.nndr_ratio, second) {
            if d1 > ratio * second.dist_sq.sqrt() {
                return Ok(None);
            }
        }

        Ok(Some(WordMatch {
            word: self.ids[first.index],
            distance: d1,
        }))
    }

    /// Quantize a batch of descriptors in parallel, keeping input order.
    pub fn quantize_batch(
        &self,
        descriptors: &[Descriptor],
    ) -> Result<Vec<Option<WordMatch>>, IndexError> {
        descriptors
            .par_iter()
            .map(|d| self.quantize(d))
            .collect()
    }

    fn check(&self, descriptor: &[f32]) -> Result<(), IndexError> {
        if descriptor.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: descriptor.len(),
            });
        }
        if !descriptor.iter().all(|v| v.is_finite()) {
            return Err(IndexError::NonFiniteDescriptor);
        }
        Ok(())
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false: an index cannot be built from an empty vocabulary.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Descriptor dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Quantizer parameters.
    pub fn params(&self) -> &WordIndexParams {
        &self.params
    }

    /// Word ids in build order.
    pub fn word_ids(&self) -> &[WordId] {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vocabulary(n: usize, dim: usize, seed: u64) -> Vec<Word> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let descriptor = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
                Word::new(1000 + i as WordId, descriptor)
            })
            .collect()
    }

    fn brute_force(words: &[Word], query: &[f32]) -> (WordId, f32) {
        words
            .iter()
            .map(|w| (w.id, kd_tree::squared_distance(&w.descriptor, query).sqrt()))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .unwrap()
    }

    #[test]
    fn test_quantize_matches_brute_force() -> Result<(), IndexError> {
        let words = random_vocabulary(500, 16, 3);
        let params = WordIndexParams {
            nndr_ratio: None,
            ..Default::default()
        };
        let index = WordIndex::build(words.clone(), params)?;

        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..200 {
            let query: Vec<f32> = (0..16).map(|_| rng.random_range(-1.0..1.0)).collect();
            let hit = index.quantize(&query)?.expect("no thresholds configured");
            let (id, dist) = brute_force(&words, &query);
            assert_eq!(hit.word, id);
            assert_relative_eq!(hit.distance, dist, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_exact_descriptor_maps_to_its_word() -> Result<(), IndexError> {
        let words = random_vocabulary(100, 8, 11);
        let index = WordIndex::build(words.clone(), WordIndexParams::default())?;
        for w in &words {
            let hit = index.quantize(&w.descriptor)?;
            assert_eq!(hit.map(|m| m.word), Some(w.id));
        }
        Ok(())
    }

    #[test]
    fn test_ratio_test_rejects_ambiguous() -> Result<(), IndexError> {
        let words = vec![Word::new(1, vec![0.0, 0.0]), Word::new(2, vec![2.0, 0.0])];
        let index = WordIndex::build(words, WordIndexParams::default())?;
        // midway: d1 == d2
        assert_eq!(index.quantize(&[1.0, 0.0])?, None);
        // d1 = 0.5, d2 = 1.5
        assert_eq!(index.quantize(&[0.5, 0.0])?.map(|m| m.word), Some(1));
        Ok(())
    }

    #[test]
    fn test_max_distance() -> Result<(), IndexError> {
        let words = vec![Word::new(1, vec![0.0, 0.0]), Word::new(2, vec![10.0, 0.0])];
        let params = WordIndexParams {
            max_distance: Some(1.0),
            ..Default::default()
        };
        let index = WordIndex::build(words, params)?;
        assert_eq!(index.quantize(&[0.0, 2.0])?, None);
        assert!(index.quantize(&[0.0, 0.5])?.is_some());
        Ok(())
    }

    #[test]
    fn test_equidistant_words_resolve_to_smallest_id() -> Result<(), IndexError> {
        let words = vec![
            Word::new(9, vec![1.0, 0.0]),
            Word::new(4, vec![-1.0, 0.0]),
            Word::new(6, vec![0.0, 5.0]),
        ];
        let params = WordIndexParams {
            nndr_ratio: None,
            leaf_size: 1,
            ..Default::default()
        };
        let index = WordIndex::build(words, params)?;
        for _ in 0..10 {
            assert_eq!(index.quantize(&[0.0, 0.0])?.map(|m| m.word), Some(4));
        }
        Ok(())
    }

    #[test]
    fn test_build_errors() {
        assert_eq!(
            WordIndex::build(vec![], WordIndexParams::default()).err(),
            Some(IndexError::EmptyVocabulary)
        );
        let dup = vec![Word::new(1, vec![0.0]), Word::new(1, vec![1.0])];
        assert_eq!(
            WordIndex::build(dup, WordIndexParams::default()).err(),
            Some(IndexError::DuplicateWord(1))
        );
        let ragged = vec![Word::new(1, vec![0.0]), Word::new(2, vec![1.0, 2.0])];
        assert!(matches!(
            WordIndex::build(ragged, WordIndexParams::default()),
            Err(IndexError::DimensionMismatch { .. })
        ));
        let nan = vec![Word::new(1, vec![f32::NAN])];
        assert_eq!(
            WordIndex::build(nan, WordIndexParams::default()).err(),
            Some(IndexError::NonFiniteDescriptor)
        );
    }

    #[test]
    fn test_query_errors() -> Result<(), IndexError> {
        let index = WordIndex::build(random_vocabulary(4, 3, 1), WordIndexParams::default())?;
        assert!(matches!(
            index.quantize(&[0.0, 0.0]),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert_eq!(
            index.quantize(&[0.0, f32::INFINITY, 0.0]),
            Err(IndexError::NonFiniteDescriptor)
        );
        Ok(())
    }

    #[test]
    fn test_batch_preserves_order() -> Result<(), IndexError> {
        let words = random_vocabulary(50, 4, 8);
        let index = WordIndex::build(words.clone(), WordIndexParams::default())?;
        let queries: Vec<Descriptor> = words.iter().rev().map(|w| w.descriptor.clone()).collect();
        let hits = index.quantize_batch(&queries)?;
        let got: Vec<Option<WordId>> = hits.iter().map(|h| h.map(|m| m.word)).collect();
        let expected: Vec<Option<WordId>> = words.iter().rev().map(|w| Some(w.id)).collect();
        assert_eq!(got, expected);
        Ok(())
    }

    #[test]
    fn test_bounded_checks_still_answers() -> Result<(), IndexError> {
        let words = random_vocabulary(300, 8, 21);
        let params = WordIndexParams {
            nndr_ratio: None,
            max_checks: Some(16),
            ..Default::default()
        };
        let index = WordIndex::build(words.clone(), params)?;
        // an exact vocabulary entry is found in the first leaf visited
        let hit = index.quantize(&words[17].descriptor)?;
        assert_eq!(hit.map(|m| m.word), Some(words[17].id));
        Ok(())
    }
}
