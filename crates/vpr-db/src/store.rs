use std::collections::HashMap;

use vpr_core::{Keypoint, SignatureId, WordId};

use crate::{DbError, Signature};

/// One recorded observation of a word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Occurrence {
    /// Signature that observed the word.
    pub signature: SignatureId,
    /// 2D keypoint in the signature's image.
    pub keypoint: Keypoint,
    /// 3D point in the signature's camera frame.
    pub point: [f32; 3],
}

/// Read-only retrieval structure over all loaded signatures.
///
/// Built once; shared between sessions behind an `Arc` with no locking.
#[derive(Debug, Default)]
pub struct SignatureStore {
    signatures: Vec<Signature>,
    by_id: HashMap<SignatureId, usize>,
    inverted: HashMap<WordId, Vec<Occurrence>>,
    frequency: HashMap<WordId, usize>,
}

impl SignatureStore {
    /// Index a set of signatures. Signature ids must be unique.
    pub fn new(signatures: Vec<Signature>) -> Result<Self, DbError> {
        let mut by_id = HashMap::with_capacity(signatures.len());
        let mut inverted: HashMap<WordId, Vec<Occurrence>> = HashMap::new();
        let mut frequency: HashMap<WordId, usize> = HashMap::new();

        for (idx, sig) in signatures.iter().enumerate() {
            if by_id.insert(sig.id(), idx).is_some() {
                return Err(DbError::DuplicateSignature(sig.id()));
            }
            let mut last_word = None;
            for (word, keypoint, point) in sig.correspondences() {
                inverted.entry(word).or_default().push(Occurrence {
                    signature: sig.id(),
                    keypoint: *keypoint,
                    point: *point,
                });
                // words are sorted within a signature
                if last_word != Some(word) {
                    *frequency.entry(word).or_default() += 1;
                    last_word = Some(word);
                }
            }
        }

        log::debug!(
            "indexed {} signatures over {} distinct words",
            signatures.len(),
            inverted.len()
        );

        Ok(Self {
            signatures,
            by_id,
            inverted,
            frequency,
        })
    }

    /// Every occurrence of `word` across all signatures.
    pub fn occurrences(&self, word: WordId) -> &[Occurrence] {
        self.inverted.get(&word).map_or(&[], Vec::as_slice)
    }

    /// Number of distinct signatures that observed `word`.
    pub fn signature_frequency(&self, word: WordId) -> usize {
        self.frequency.get(&word).copied().unwrap_or(0)
    }

    /// Look up a signature.
    pub fn get(&self, id: SignatureId) -> Option<&Signature> {
        self.by_id.get(&id).map(|&idx| &self.signatures[idx])
    }

    /// Whether a signature id is stored.
    pub fn contains(&self, id: SignatureId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Number of signatures.
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Iterate over signatures in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.iter()
    }

    /// Number of distinct words observed by any signature.
    pub fn word_count(&self) -> usize {
        self.inverted.len()
    }
}
