use vpr_core::{DbId, Keypoint, Pose, SignatureId, WordId};

use crate::DbError;

/// One previously recorded viewpoint.
///
/// Holds two multimaps keyed by word id: the 2D keypoint observed for each
/// word occurrence and its 3D point, expressed in the signature's own camera
/// frame. Both maps are kept sorted by word id with insertion order preserved
/// among equal ids, so the i-th entry of one pairs with the i-th entry of the
/// other.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    id: SignatureId,
    map_id: u32,
    db_id: DbId,
    pose: Pose,
    words: Vec<(WordId, Keypoint)>,
    words3: Vec<(WordId, [f32; 3])>,
}

impl Signature {
    /// Create a signature, validating its invariants.
    ///
    /// Fails when the pose is null, when the two maps differ in size, or when
    /// a word occurs a different number of times in each map.
    pub fn new(
        id: SignatureId,
        map_id: u32,
        db_id: DbId,
        pose: Pose,
        mut words: Vec<(WordId, Keypoint)>,
        mut words3: Vec<(WordId, [f32; 3])>,
    ) -> Result<Self, DbError> {
        if pose.is_null() {
            return Err(DbError::NullPose(id));
        }
        if words.len() != words3.len() {
            return Err(DbError::UnpairedWords {
                signature: id,
                keypoints: words.len(),
                points: words3.len(),
            });
        }

        words.sort_by_key(|(w, _)| *w);
        words3.sort_by_key(|(w, _)| *w);
        if let Some(((word, _), _)) = words
            .iter()
            .zip(words3.iter())
            .find(|((a, _), (b, _))| a != b)
        {
            return Err(DbError::WordMultiplicity {
                signature: id,
                word: *word,
            });
        }

        Ok(Self {
            id,
            map_id,
            db_id,
            pose,
            words,
            words3,
        })
    }

    /// Signature id.
    pub fn id(&self) -> SignatureId {
        self.id
    }

    /// Map (session) the signature was recorded in.
    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    /// Database file the signature was loaded from.
    pub fn db_id(&self) -> DbId {
        self.db_id
    }

    /// Camera-to-world pose of the recorded viewpoint.
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Word to keypoint multimap, sorted by word id.
    pub fn words(&self) -> &[(WordId, Keypoint)] {
        &self.words
    }

    /// Word to 3D point multimap, sorted by word id.
    pub fn words3(&self) -> &[(WordId, [f32; 3])] {
        &self.words3
    }

    /// Number of word occurrences.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the signature has no word occurrences.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// All occurrences as `(word, keypoint, point)` triples.
    pub fn correspondences(&self) -> impl Iterator<Item = (WordId, &Keypoint, &[f32; 3])> + '_ {
        self.words
            .iter()
            .zip(self.words3.iter())
            .map(|((w, kp), (_, p))| (*w, kp, p))
    }

    /// Occurrences of words that appear exactly once in this signature.
    pub fn unique_correspondences(
        &self,
    ) -> impl Iterator<Item = (WordId, &Keypoint, &[f32; 3])> + '_ {
        let n = self.words.len();
        self.correspondences().enumerate().filter_map(move |(i, c)| {
            let dup_prev = i > 0 && self.words[i - 1].0 == c.0;
            let dup_next = i + 1 < n && self.words[i + 1].0 == c.0;
            (!dup_prev && !dup_next).then_some(c)
        })
    }

    /// Number of times `word` occurs.
    pub fn multiplicity(&self, word: WordId) -> usize {
        let lo = self.words.partition_point(|(w, _)| *w < word);
        let hi = self.words.partition_point(|(w, _)| *w <= word);
        hi - lo
    }
}
