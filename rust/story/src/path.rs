//! Structural path table: container/knot/stitch addresses to offsets.

use serde::{Deserialize, Serialize};

use crate::instr::{PathId, PC};

/// One named address in the compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    /// Dotted path name, e.g. `castle.gate`.
    pub name: String,
    /// Instruction offset the path resolves to.
    pub offset: PC,
}

/// Ordered table mapping structural paths to instruction offsets.
///
/// `PathId` is the entry's index; ids are stable for the story's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathTable {
    entries: Vec<PathEntry>,
}

impl PathTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its id.
    ///
    /// # Panics
    ///
    /// Panics if the table exceeds `u32::MAX` entries.
    pub fn push(&mut self, name: impl Into<String>, offset: PC) -> PathId {
        let id = u32::try_from(self.entries.len()).expect("path table overflow");
        self.entries.push(PathEntry {
            name: name.into(),
            offset,
        });
        id
    }

    /// Resolve an id to its entry.
    #[must_use]
    pub fn get(&self, id: PathId) -> Option<&PathEntry> {
        self.entries.get(id as usize)
    }

    /// Instruction offset for an id.
    #[must_use]
    pub fn offset(&self, id: PathId) -> Option<PC> {
        self.get(id).map(|e| e.offset)
    }

    /// Find an entry by exact name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PathId> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| i as PathId)
    }

    /// All entries in id order.
    #[must_use]
    pub fn entries(&self) -> &[PathEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
