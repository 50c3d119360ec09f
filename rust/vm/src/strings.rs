//! Reference-counted interned string table.
//!
//! All runtime-visible text lives here. Handles are generation-checked
//! indices: a handle whose slot has been reclaimed resolves to `None`
//! instead of recycled content. Interning the same text twice may return
//! distinct handles; content equality is the external contract.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RuntimeError;

/// Default slot capacity for a globals store's string table.
pub const DEFAULT_STRING_CAPACITY: usize = 512;

/// Generation-checked handle into a [`StringTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    generation: u32,
    /// `None` while on the free list.
    entry: Option<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    text: String,
    refs: u32,
}

/// Fixed-capacity, reference-counted string storage.
///
/// When the table is saturated, a compaction pass reclaims every
/// zero-reference slot before an allocation is allowed to fail, so a
/// long-running story producing transient unique strings stays bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STRING_CAPACITY)
    }
}

impl StringTable {
    /// Create a table with the given slot capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
        }
    }

    /// Intern text, returning a fresh handle with reference count 1.
    ///
    /// # Errors
    ///
    /// `StoryCorruption` when the table is saturated and compaction frees
    /// nothing.
    pub fn intern(&mut self, text: &str) -> Result<StrId, RuntimeError> {
        let entry = Entry {
            text: text.to_string(),
            refs: 1,
        };

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return Ok(StrId {
                index,
                generation: slot.generation,
            });
        }

        if self.slots.len() < self.capacity {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            return Ok(StrId {
                index,
                generation: 0,
            });
        }

        let reclaimed = self.compact();
        debug!(reclaimed, "string table compaction");
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return Ok(StrId {
                index,
                generation: slot.generation,
            });
        }
        Err(RuntimeError::StoryCorruption(format!(
            "string table exhausted ({} live entries)",
            self.capacity
        )))
    }

    /// Resolve a handle to its text. Stale handles yield `None`.
    #[must_use]
    pub fn resolve(&self, id: StrId) -> Option<&str> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref().map(|e| e.text.as_str())
    }

    /// Increment a handle's reference count. Stale handles are ignored.
    pub fn retain(&mut self, id: StrId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.refs += 1;
        }
    }

    /// Decrement a handle's reference count. Zero-reference entries keep
    /// their content until compaction reclaims the slot. Stale handles are
    /// ignored.
    pub fn release(&mut self, id: StrId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    /// Reclaim all zero-reference slots, returning how many were freed.
    pub fn compact(&mut self) -> usize {
        let mut reclaimed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let dead = slot.entry.as_ref().is_some_and(|e| e.refs == 0);
            if dead {
                slot.entry = None;
                slot.generation += 1;
                self.free.push(index as u32);
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Number of live (referenced or not-yet-reclaimed) entries.
    #[must_use]
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    fn entry_mut(&mut self, id: StrId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }
}
