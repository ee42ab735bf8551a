use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use vpr_core::DbId;

/// A semantic name bound to a world position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Label {
    /// Display name.
    pub name: String,
    /// Position in the world frame of its database.
    pub position: [f64; 3],
    /// Database the label belongs to.
    pub db_id: DbId,
}

impl Label {
    /// Create a label.
    pub fn new(name: impl Into<String>, position: [f64; 3], db_id: DbId) -> Self {
        Self {
            name: name.into(),
            position,
            db_id,
        }
    }
}

/// All loaded labels, read-only after load.
#[derive(Debug, Clone, Default)]
pub struct LabelStore {
    labels: Vec<Label>,
}

impl LabelStore {
    /// Wrap a set of labels.
    pub fn new(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    /// Labels recorded in one database.
    pub fn for_db(&self, db_id: DbId) -> impl Iterator<Item = &Label> {
        self.labels.iter().filter(move |l| l.db_id == db_id)
    }

    /// All labels.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_db_filters() {
        let store = LabelStore::new(vec![
            Label::new("door", [0.0, 0.0, 1.0], 0),
            Label::new("desk", [1.0, 0.0, 1.0], 1),
            Label::new("lamp", [2.0, 0.0, 1.0], 0),
        ]);
        let names: Vec<&str> = store.for_db(0).map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["door", "lamp"]);
        assert_eq!(store.for_db(2).count(), 0);
        assert_eq!(store.len(), 3);
    }
}
