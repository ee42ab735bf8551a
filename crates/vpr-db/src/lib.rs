#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # vpr-db
//!
//! Recorded viewpoints ([`Signature`]), the inverted word index over them
//! ([`SignatureStore`]), semantic [`Label`]s and the on-disk database format.
//! Everything here is built once at startup and never mutated by queries.

mod io;
mod label;
mod signature;
mod store;

pub use io::{Catalog, Database, LabelRecord, SignatureRecord};
pub use label::{Label, LabelStore};
pub use signature::Signature;
pub use store::{Occurrence, SignatureStore};

use thiserror::Error;
use vpr_core::{DbId, SignatureId, WordId};

/// Errors raised while building or loading the database.
#[derive(Debug, Error)]
pub enum DbError {
    /// A signature has an undefined pose.
    #[error("Signature {0} has a null pose")]
    NullPose(SignatureId),

    /// A signature's keypoint and point maps differ in size.
    #[error("Signature {signature} has {keypoints} keypoints but {points} points")]
    UnpairedWords {
        /// Offending signature.
        signature: SignatureId,
        /// Size of the keypoint map.
        keypoints: usize,
        /// Size of the point map.
        points: usize,
    },

    /// A word occurs a different number of times in the two maps.
    #[error("Signature {signature} pairs word {word} inconsistently")]
    WordMultiplicity {
        /// Offending signature.
        signature: SignatureId,
        /// First mismatched word.
        word: WordId,
    },

    /// Two signatures share an id.
    #[error("Duplicate signature id {0}")]
    DuplicateSignature(SignatureId),

    /// Two words in one file share an id.
    #[error("Database {db_id} repeats word id {word}")]
    DuplicateWord {
        /// File index.
        db_id: DbId,
        /// Repeated id.
        word: WordId,
    },

    /// A signature references a word missing from its file's vocabulary.
    #[error("Database {db_id}: signature {signature} references unknown word {word}")]
    UnknownWord {
        /// File index.
        db_id: DbId,
        /// File-local signature id.
        signature: SignatureId,
        /// Missing word id.
        word: WordId,
    },

    /// The file does not start with the database header.
    #[error("Not a database file")]
    BadMagic,

    /// The file was written by an incompatible version.
    #[error("Unsupported database version: expected {expected}, found {found}")]
    UnsupportedVersion {
        /// Supported version.
        expected: u32,
        /// Version in the file.
        found: u32,
    },

    /// Io error
    #[error("Io error")]
    Io(#[from] std::io::Error),

    /// Bincode error
    #[error("Bincode error: {0}")]
    Bincode(String),
}
