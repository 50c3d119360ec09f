//! Reference-counted list values: named-flag sets with rank algebra.
//!
//! A list value is a set of (origin, flag, rank) triples drawn from the
//! story's list definitions. Values alias a table slot by handle; mutation
//! goes through copy-on-write so a stored copy never changes behind a
//! separately held value.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use fable_story::{BinaryOp, ListDefs, ListFlag};

use crate::error::RuntimeError;

/// Generation-checked handle into a [`ListTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListId {
    index: u32,
    generation: u32,
}

/// One list value: a set of flags with set algebra and rank ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListValue {
    flags: BTreeSet<ListFlag>,
}

impl ListValue {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from resolved flags.
    #[must_use]
    pub fn from_flags(flags: impl IntoIterator<Item = ListFlag>) -> Self {
        Self {
            flags: flags.into_iter().collect(),
        }
    }

    /// Resolve `spec` against the definitions and test membership.
    ///
    /// # Errors
    ///
    /// Propagates the lookup failure for unknown or ambiguous specifiers.
    pub fn contains(&self, defs: &ListDefs, spec: &str) -> Result<bool, RuntimeError> {
        let flag = defs
            .resolve(spec)
            .map_err(|e| RuntimeError::type_mismatch(e, "list", "flag"))?;
        Ok(self.flags.contains(&flag))
    }

    /// Add a flag. Idempotent.
    pub fn add(&mut self, flag: ListFlag) {
        self.flags.insert(flag);
    }

    /// Remove a flag. Idempotent.
    pub fn remove(&mut self, flag: &ListFlag) {
        self.flags.remove(flag);
    }

    /// All flags in stable (origin, rank, name) order.
    pub fn flags(&self) -> impl Iterator<Item = &ListFlag> {
        self.flags.iter()
    }

    /// Flags belonging to one origin, in rank order.
    pub fn flags_from<'a>(&'a self, origin: &'a str) -> impl Iterator<Item = &'a ListFlag> {
        self.flags.iter().filter(move |f| f.origin == origin)
    }

    /// Lowest-ranked flag, if any.
    #[must_use]
    pub fn min_flag(&self) -> Option<&ListFlag> {
        self.flags.iter().min_by_key(|f| f.rank)
    }

    /// Highest-ranked flag, if any.
    #[must_use]
    pub fn max_flag(&self) -> Option<&ListFlag> {
        self.flags.iter().max_by_key(|f| f.rank)
    }

    /// Number of flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Set union.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            flags: self.flags.union(&other.flags).cloned().collect(),
        }
    }

    /// Set difference.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self {
            flags: self.flags.difference(&other.flags).cloned().collect(),
        }
    }

    /// Line-text rendering: flag names joined by `, ` in stable order.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.flags
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Apply a binary operator to two list values.
///
/// Add/Sub are union/difference; comparisons and Min/Max act on numeric
/// rank and require both operands non-empty.
///
/// # Errors
///
/// `TypeMismatch` for rank operations on empty operands or operators with
/// no list meaning.
pub fn list_binop(op: BinaryOp, lhs: &ListValue, rhs: &ListValue) -> Result<ListResult, RuntimeError> {
    use BinaryOp::{Add, Eq, Ge, Gt, Le, Lt, Max, Min, Ne, Sub};
    match op {
        Add => Ok(ListResult::List(lhs.union(rhs))),
        Sub => Ok(ListResult::List(lhs.difference(rhs))),
        Eq => Ok(ListResult::Bool(lhs == rhs)),
        Ne => Ok(ListResult::Bool(lhs != rhs)),
        Lt | Gt | Le | Ge => {
            let (a, b) = rank_pair(op, lhs, rhs)?;
            Ok(ListResult::Bool(match op {
                Lt => a < b,
                Gt => a > b,
                Le => a <= b,
                _ => a >= b,
            }))
        }
        Min | Max => {
            let (a, b) = rank_pair(op, lhs, rhs)?;
            let keep_lhs = if op == Min { a <= b } else { a >= b };
            let flag = if keep_lhs {
                extremum(lhs, op)
            } else {
                extremum(rhs, op)
            };
            Ok(ListResult::List(ListValue::from_flags([flag])))
        }
        _ => Err(RuntimeError::type_mismatch(op, "list", "list")),
    }
}

/// Outcome of a list operator: either a new list or a boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListResult {
    /// A list-valued result.
    List(ListValue),
    /// A boolean result (comparisons).
    Bool(bool),
}

fn rank_pair(
    op: BinaryOp,
    lhs: &ListValue,
    rhs: &ListValue,
) -> Result<(i32, i32), RuntimeError> {
    match (lhs.max_flag(), rhs.max_flag()) {
        (Some(a), Some(b)) => Ok((a.rank, b.rank)),
        _ => Err(RuntimeError::type_mismatch(op, "list", "empty list")),
    }
}

fn extremum(list: &ListValue, op: BinaryOp) -> ListFlag {
    let flag = if op == BinaryOp::Min {
        list.min_flag()
    } else {
        list.max_flag()
    };
    flag.cloned().expect("rank_pair checked non-empty")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: ListValue,
    refs: u32,
}

/// Reference-counted storage for list values.
///
/// Multiple stack slots and globals may alias one handle after assignment;
/// `make_unique` implements copy-on-write before mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ListTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a list value, returning a handle with reference count 1.
    pub fn alloc(&mut self, value: ListValue) -> ListId {
        let entry = Entry { value, refs: 1 };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            ListId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            ListId {
                index,
                generation: 0,
            }
        }
    }

    /// Resolve a handle. Stale handles yield `None`.
    #[must_use]
    pub fn get(&self, id: ListId) -> Option<&ListValue> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref().map(|e| &e.value)
    }

    /// Increment a handle's reference count. Stale handles are ignored.
    pub fn retain(&mut self, id: ListId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.refs += 1;
        }
    }

    /// Decrement a handle's reference count, reclaiming the slot at zero.
    pub fn release(&mut self, id: ListId) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            let slot = &mut self.slots[id.index as usize];
            slot.entry = None;
            slot.generation += 1;
            self.free.push(id.index);
        }
    }

    /// Copy-on-write: return a handle that is safe to mutate.
    ///
    /// A uniquely referenced handle is returned as-is; a shared one is
    /// cloned into a fresh slot (the original keeps its other references).
    #[must_use]
    pub fn make_unique(&mut self, id: ListId) -> ListId {
        let Some(entry) = self.entry_mut(id) else {
            return id;
        };
        if entry.refs <= 1 {
            return id;
        }
        entry.refs -= 1;
        let cloned = entry.value.clone();
        self.alloc(cloned)
    }

    /// Mutable access to a handle's value. Callers go through
    /// `make_unique` first to preserve copy-on-write semantics.
    pub fn get_mut(&mut self, id: ListId) -> Option<&mut ListValue> {
        self.entry_mut(id).map(|e| &mut e.value)
    }

    /// Number of live entries.
    #[must_use]
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    fn entry_mut(&mut self, id: ListId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }
}
