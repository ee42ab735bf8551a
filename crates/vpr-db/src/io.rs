use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode::{Decode, Encode};
use vpr_core::{DbId, Keypoint, Pose, SignatureId, WordId};
use vpr_index::Word;

use crate::{DbError, Label, LabelStore, Signature, SignatureStore};

const MAGIC: [u8; 4] = *b"VPRD";
const VERSION: u32 = 1;

/// A signature as stored on disk, with ids local to its file.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SignatureRecord {
    /// File-local signature id.
    pub id: SignatureId,
    /// Map the viewpoint was recorded in.
    pub map_id: u32,
    /// Camera-to-world pose.
    pub pose: Pose,
    /// Word to keypoint multimap.
    pub words: Vec<(WordId, Keypoint)>,
    /// Word to 3D point multimap, points in the signature's camera frame.
    pub words3: Vec<(WordId, [f32; 3])>,
}

/// A label as stored on disk.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct LabelRecord {
    /// Display name.
    pub name: String,
    /// World position.
    pub position: [f64; 3],
}

/// Contents of one database file.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct Database {
    /// Vocabulary.
    pub words: Vec<Word>,
    /// Recorded viewpoints.
    pub signatures: Vec<SignatureRecord>,
    /// Semantic labels.
    pub labels: Vec<LabelRecord>,
}

impl Database {
    /// Persists the database to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DbError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let config = bincode::config::standard();

        bincode::encode_into_std_write(MAGIC, &mut writer, config)
            .map_err(|e| DbError::Bincode(e.to_string()))?;
        bincode::encode_into_std_write(VERSION, &mut writer, config)
            .map_err(|e| DbError::Bincode(e.to_string()))?;
        bincode::encode_into_std_write(self, &mut writer, config)
            .map_err(|e| DbError::Bincode(e.to_string()))?;

        Ok(())
    }

    /// Loads a database from a file and verifies its header.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let config = bincode::config::standard();

        let magic: [u8; 4] = bincode::decode_from_std_read(&mut reader, config)
            .map_err(|e| DbError::Bincode(e.to_string()))?;
        if magic != MAGIC {
            return Err(DbError::BadMagic);
        }
        let version: u32 = bincode::decode_from_std_read(&mut reader, config)
            .map_err(|e| DbError::Bincode(e.to_string()))?;
        if version != VERSION {
            return Err(DbError::UnsupportedVersion {
                expected: VERSION,
                found: version,
            });
        }

        bincode::decode_from_std_read(&mut reader, config)
            .map_err(|e| DbError::Bincode(e.to_string()))
    }
}

/// Everything a query needs, merged from one or more database files.
///
/// Word and signature ids are renumbered into one global space in file order;
/// every signature and label keeps the index of its file as `db_id`.
#[derive(Debug, Default)]
pub struct Catalog {
    /// Merged vocabulary.
    pub words: Vec<Word>,
    /// Merged signatures.
    pub signatures: SignatureStore,
    /// Merged labels.
    pub labels: LabelStore,
}

impl Catalog {
    /// Merge loaded databases, validating every signature.
    pub fn merge(databases: Vec<Database>) -> Result<Self, DbError> {
        let mut words = Vec::new();
        let mut signatures = Vec::new();
        let mut labels = Vec::new();
        let mut next_word: WordId = 0;
        let mut next_signature: SignatureId = 0;

        for (index, db) in databases.into_iter().enumerate() {
            let db_id = index as DbId;

            let mut word_map: HashMap<WordId, WordId> = HashMap::with_capacity(db.words.len());
            for word in db.words {
                if word_map.insert(word.id, next_word).is_some() {
                    return Err(DbError::DuplicateWord { db_id, word: word.id });
                }
                words.push(Word::new(next_word, word.descriptor));
                next_word += 1;
            }

            for record in db.signatures {
                let remap = |w: WordId| {
                    word_map.get(&w).copied().ok_or(DbError::UnknownWord {
                        db_id,
                        signature: record.id,
                        word: w,
                    })
                };
                let sig_words = record
                    .words
                    .iter()
                    .map(|(w, kp)| Ok((remap(*w)?, *kp)))
                    .collect::<Result<Vec<_>, DbError>>()?;
                let sig_words3 = record
                    .words3
                    .iter()
                    .map(|(w, p)| Ok((remap(*w)?, *p)))
                    .collect::<Result<Vec<_>, DbError>>()?;

                signatures.push(Signature::new(
                    next_signature,
                    record.map_id,
                    db_id,
                    record.pose,
                    sig_words,
                    sig_words3,
                )?);
                log::trace!("db {db_id}: signature {} -> {}", record.id, next_signature);
                next_signature += 1;
            }

            labels.extend(
                db.labels
                    .into_iter()
                    .map(|l| Label::new(l.name, l.position, db_id)),
            );
        }

        Ok(Self {
            words,
            signatures: SignatureStore::new(signatures)?,
            labels: LabelStore::new(labels),
        })
    }

    /// Load and merge database files. Any failure is fatal.
    pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Self, DbError> {
        let databases = paths
            .iter()
            .map(Database::load)
            .collect::<Result<Vec<_>, _>>()?;
        Self::merge(databases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(prefix: &str) -> Database {
        Database {
            words: vec![
                Word::new(100, vec![0.0, 1.0]),
                Word::new(200, vec![1.0, 0.0]),
            ],
            signatures: vec![SignatureRecord {
                id: 42,
                map_id: 1,
                pose: Pose::identity(),
                words: vec![(100, Keypoint::at(1.0, 2.0)), (200, Keypoint::at(3.0, 4.0))],
                words3: vec![(100, [0.0, 0.0, 2.0]), (200, [1.0, 0.0, 2.0])],
            }],
            labels: vec![LabelRecord {
                name: format!("{prefix}-door"),
                position: [0.0, 0.0, 3.0],
            }],
        }
    }

    #[test]
    fn test_save_and_load() -> Result<(), DbError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a.vprdb");
        let db = sample("a");
        db.save(&path)?;
        assert_eq!(Database::load(&path)?, db);
        Ok(())
    }

    #[test]
    fn test_load_rejects_foreign_file() -> Result<(), DbError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("junk.vprdb");
        std::fs::write(&path, b"not a database at all")?;
        assert!(matches!(Database::load(&path), Err(DbError::BadMagic)));
        Ok(())
    }

    #[test]
    fn test_load_non_existent_file() {
        let result = Database::load("non_existent_file.vprdb");
        assert!(matches!(result, Err(DbError::Io(_))));
    }

    #[test]
    fn test_merge_renumbers_ids() -> Result<(), DbError> {
        let catalog = Catalog::merge(vec![sample("a"), sample("b")])?;
        let ids: Vec<WordId> = catalog.words.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(catalog.signatures.len(), 2);

        let second = catalog.signatures.get(1).expect("second signature");
        assert_eq!(second.db_id(), 1);
        let words: Vec<WordId> = second.words().iter().map(|(w, _)| *w).collect();
        assert_eq!(words, vec![2, 3]);
        assert_eq!(catalog.signatures.signature_frequency(0), 1);

        let names: Vec<&str> = catalog.labels.for_db(1).map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["b-door"]);
        Ok(())
    }

    #[test]
    fn test_merge_rejects_unknown_word() {
        let mut db = sample("a");
        db.signatures[0].words[0].0 = 999;
        db.signatures[0].words3[0].0 = 999;
        assert!(matches!(
            Catalog::merge(vec![db]),
            Err(DbError::UnknownWord { word: 999, .. })
        ));
    }

    #[test]
    fn test_merge_rejects_null_pose() {
        let mut db = sample("a");
        db.signatures[0].pose = Pose::new([[0.0; 3]; 3], [0.0; 3]);
        assert!(matches!(
            Catalog::merge(vec![db]),
            Err(DbError::NullPose(_))
        ));
    }

    #[test]
    fn test_load_all() -> Result<(), DbError> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.vprdb");
        let b = dir.path().join("b.vprdb");
        sample("a").save(&a)?;
        sample("b").save(&b)?;
        let catalog = Catalog::load_all(&[a, b])?;
        assert_eq!(catalog.words.len(), 4);
        assert_eq!(catalog.labels.len(), 2);
        Ok(())
    }
}
