//! The immutable compiled program: instructions, paths, list definitions,
//! initial globals, and a content fingerprint.

use serde::{Deserialize, Serialize};
use sha2::Digest;
use thiserror::Error;
use tracing::debug;

use crate::instr::{Instr, Literal, PathId, PC};
use crate::lists::ListDefs;
use crate::path::PathTable;

/// Story format version accepted by this runtime.
pub const FORMAT_VERSION: u32 = 1;

/// Errors raised while loading a compiled story.
#[derive(Debug, Error)]
pub enum StoryError {
    /// The document is not valid story JSON.
    #[error("malformed story document: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The document's format version is not supported.
    #[error("unsupported story format version {found} (expected {FORMAT_VERSION})")]
    UnsupportedVersion {
        /// Version found in the document.
        found: u32,
    },
    /// A path entry points outside the instruction sequence.
    #[error("path `{name}` resolves past the end of the program ({offset} >= {len})")]
    DanglingPath {
        /// Offending path name.
        name: String,
        /// Its claimed offset.
        offset: PC,
        /// Program length.
        len: usize,
    },
}

/// Serialized story document, the external compiler's output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoryDoc {
    version: u32,
    ops: Vec<Instr>,
    paths: PathTable,
    lists: ListDefs,
    globals: Vec<(String, Literal)>,
}

/// An immutable compiled narrative program.
///
/// Loaded once and shared read-only (`Arc<Story>`) by every runner and
/// globals store derived from it. Never mutated after load.
#[derive(Debug)]
pub struct Story {
    ops: Vec<Instr>,
    paths: PathTable,
    lists: ListDefs,
    globals: Vec<(String, Literal)>,
    fingerprint: [u8; 32],
}

impl Story {
    /// Build a story in memory (test and tooling entry point).
    ///
    /// # Errors
    ///
    /// Returns `StoryError::DanglingPath` if a path offset is out of range.
    pub fn new(
        ops: Vec<Instr>,
        paths: PathTable,
        lists: ListDefs,
        globals: Vec<(String, Literal)>,
    ) -> Result<Self, StoryError> {
        let doc = StoryDoc {
            version: FORMAT_VERSION,
            ops,
            paths,
            lists,
            globals,
        };
        Self::from_doc(doc)
    }

    /// Load a story from the compiler's JSON output.
    ///
    /// # Errors
    ///
    /// Returns a `StoryError` for malformed JSON, an unsupported version, or
    /// a dangling path entry.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, StoryError> {
        let doc: StoryDoc = serde_json::from_slice(bytes)?;
        Self::from_doc(doc)
    }

    fn from_doc(doc: StoryDoc) -> Result<Self, StoryError> {
        if doc.version != FORMAT_VERSION {
            return Err(StoryError::UnsupportedVersion { found: doc.version });
        }
        for entry in doc.paths.entries() {
            if entry.offset >= doc.ops.len() {
                return Err(StoryError::DanglingPath {
                    name: entry.name.clone(),
                    offset: entry.offset,
                    len: doc.ops.len(),
                });
            }
        }
        let fingerprint = fingerprint_of(&doc);
        debug!(
            ops = doc.ops.len(),
            paths = doc.paths.len(),
            "story loaded"
        );
        Ok(Self {
            ops: doc.ops,
            paths: doc.paths,
            lists: doc.lists,
            globals: doc.globals,
            fingerprint,
        })
    }

    /// The instruction sequence.
    #[must_use]
    pub fn ops(&self) -> &[Instr] {
        &self.ops
    }

    /// Instruction at `pc`, if in range.
    #[must_use]
    pub fn op(&self, pc: PC) -> Option<&Instr> {
        self.ops.get(pc)
    }

    /// The structural path table.
    #[must_use]
    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    /// Instruction offset of a path id.
    #[must_use]
    pub fn path_offset(&self, id: PathId) -> Option<PC> {
        self.paths.offset(id)
    }

    /// Path id for an exact name, used for external-function fallbacks.
    #[must_use]
    pub fn path_named(&self, name: &str) -> Option<PathId> {
        self.paths.find(name)
    }

    /// The list-type definitions.
    #[must_use]
    pub fn lists(&self) -> &ListDefs {
        &self.lists
    }

    /// Declared global variables with their initial values.
    #[must_use]
    pub fn globals(&self) -> &[(String, Literal)] {
        &self.globals
    }

    /// Content fingerprint: SHA-256 over the canonical document form.
    ///
    /// Snapshot restore verifies this before reconstructing any state.
    #[must_use]
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }
}

fn fingerprint_of(doc: &StoryDoc) -> [u8; 32] {
    let canonical = serde_json::to_vec(doc).expect("story document serializes");
    let digest = sha2::Sha256::digest(&canonical);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}
