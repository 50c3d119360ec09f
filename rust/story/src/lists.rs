//! List-type definitions: origin name to ordered, ranked flag names.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One resolved (origin, flag, rank) triple.
///
/// Ordering is (origin, rank, name): stable across runs and suitable for
/// the runtime list value's set semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListFlag {
    /// Origin list name.
    pub origin: String,
    /// Flag name within the origin.
    pub name: String,
    /// Numeric rank used for min/max and ordering comparisons.
    pub rank: i32,
}

impl PartialOrd for ListFlag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ListFlag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.origin, self.rank, &self.name).cmp(&(&other.origin, other.rank, &other.name))
    }
}

impl std::fmt::Display for ListFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.origin, self.name)
    }
}

/// One origin: an ordered set of flag names with explicit ranks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDef {
    /// Origin list name.
    pub origin: String,
    /// Flags in declaration order, each with its numeric rank.
    pub flags: Vec<(String, i32)>,
}

/// Failure to resolve a flag specifier against the definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagLookupError {
    /// No definition matched the specifier.
    #[error("unknown list flag `{0}`")]
    Unknown(String),
    /// A bare flag name matched more than one origin.
    #[error("ambiguous list flag `{0}`: qualify as `origin.{0}`")]
    Ambiguous(String),
}

/// All list-type definitions carried by a story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDefs {
    defs: Vec<ListDef>,
}

impl ListDefs {
    /// Create an empty definition table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an origin with its flags in declaration order.
    pub fn push(&mut self, origin: impl Into<String>, flags: Vec<(String, i32)>) {
        self.defs.push(ListDef {
            origin: origin.into(),
            flags,
        });
    }

    /// All definitions in declaration order.
    #[must_use]
    pub fn defs(&self) -> &[ListDef] {
        &self.defs
    }

    /// Look up an origin by name.
    #[must_use]
    pub fn origin(&self, name: &str) -> Option<&ListDef> {
        self.defs.iter().find(|d| d.origin == name)
    }

    /// Resolve a flag specifier: `origin.flag`, or a bare flag name when it
    /// is unambiguous across all origins.
    ///
    /// # Errors
    ///
    /// `FlagLookupError::Unknown` when nothing matches,
    /// `FlagLookupError::Ambiguous` when a bare name matches several origins.
    pub fn resolve(&self, spec: &str) -> Result<ListFlag, FlagLookupError> {
        if let Some((origin, flag)) = spec.split_once('.') {
            let def = self
                .origin(origin)
                .ok_or_else(|| FlagLookupError::Unknown(spec.to_string()))?;
            return def
                .flags
                .iter()
                .find(|(name, _)| name == flag)
                .map(|(name, rank)| ListFlag {
                    origin: def.origin.clone(),
                    name: name.clone(),
                    rank: *rank,
                })
                .ok_or_else(|| FlagLookupError::Unknown(spec.to_string()));
        }

        let mut found: Option<ListFlag> = None;
        for def in &self.defs {
            if let Some((name, rank)) = def.flags.iter().find(|(name, _)| name == spec) {
                if found.is_some() {
                    return Err(FlagLookupError::Ambiguous(spec.to_string()));
                }
                found = Some(ListFlag {
                    origin: def.origin.clone(),
                    name: name.clone(),
                    rank: *rank,
                });
            }
        }
        found.ok_or_else(|| FlagLookupError::Unknown(spec.to_string()))
    }
}
