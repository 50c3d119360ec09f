//! Shared story state: typed variables, visit/turn counts, observers, and
//! the string/list tables every value handle points into.
//!
//! One globals store serves one story lineage. Runners share it through
//! `Rc<RefCell<Globals>>`; the single-writer-at-a-time discipline is the
//! caller's responsibility (see the crate docs).

use std::collections::BTreeMap;
use std::mem::discriminant;

use serde::{Deserialize, Serialize};
use tracing::trace;

use fable_story::{Literal, PathId, Story};

use crate::error::RuntimeError;
use crate::lists::{ListTable, ListValue};
use crate::strings::StringTable;
use crate::value::Value;

/// Observer callback invoked with (new, old) on every committed write.
///
/// Callbacks run synchronously while the store is borrowed; they must not
/// call back into the store or its runners.
pub type ObserverFn = Box<dyn FnMut(&Value, &Value)>;

/// The shared mutable story-state store.
#[derive(Serialize, Deserialize)]
pub struct Globals {
    vars: BTreeMap<String, Value>,
    visits: BTreeMap<PathId, u32>,
    turn_visited: BTreeMap<PathId, u64>,
    turns: u64,
    strings: StringTable,
    lists: ListTable,
    #[serde(skip)]
    observers: BTreeMap<String, Vec<ObserverFn>>,
}

impl std::fmt::Debug for Globals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Globals")
            .field("vars", &self.vars)
            .field("visits", &self.visits)
            .field("turns", &self.turns)
            .field("observed", &self.observers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Globals {
    /// Create a store initialized from the story's declared globals.
    ///
    /// # Errors
    ///
    /// Propagates string-table or list-definition failures while building
    /// initial values.
    pub fn new(story: &Story) -> Result<Self, RuntimeError> {
        let mut this = Self {
            vars: BTreeMap::new(),
            visits: BTreeMap::new(),
            turn_visited: BTreeMap::new(),
            turns: 0,
            strings: StringTable::default(),
            lists: ListTable::new(),
            observers: BTreeMap::new(),
        };
        for (name, literal) in story.globals() {
            let value = this.value_from_literal(story, literal)?;
            this.vars.insert(name.clone(), value);
        }
        Ok(this)
    }

    /// Materialize a story literal into a runtime value, interning strings
    /// and resolving list flags as needed.
    ///
    /// # Errors
    ///
    /// String-table saturation or an unresolvable list flag.
    pub fn value_from_literal(
        &mut self,
        story: &Story,
        literal: &Literal,
    ) -> Result<Value, RuntimeError> {
        Ok(match literal {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Uint(u) => Value::Uint(*u),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::Str(self.strings.intern(s)?),
            Literal::Divert(p) => Value::Divert(*p),
            Literal::List(specs) => {
                let mut value = ListValue::new();
                for spec in specs {
                    let flag = story
                        .lists()
                        .resolve(spec)
                        .map_err(|e| RuntimeError::StoryCorruption(e.to_string()))?;
                    value.add(flag);
                }
                Value::List(self.lists.alloc(value))
            }
        })
    }

    /// Read a variable. Absent names yield `Value::None`, not an error.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.vars.get(name).copied().unwrap_or(Value::None)
    }

    /// Externally set a variable: the name must already exist and the tag
    /// must match the current value's tag. Returns false (and mutates
    /// nothing) otherwise. Successful sets are committed writes: observers
    /// fire immediately.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        let Some(existing) = self.vars.get(name) else {
            return false;
        };
        if discriminant(existing) != discriminant(&value) {
            return false;
        }
        let old = *existing;
        self.vars.insert(name.to_string(), value);
        trace!(name, "globals set");
        self.notify(name, &value, &old);
        true
    }

    /// Register an observer. Multiple observers per name fire in
    /// registration order.
    pub fn observe(&mut self, name: impl Into<String>, callback: ObserverFn) {
        self.observers.entry(name.into()).or_default().push(callback);
    }

    /// Trusted write from bytecode: inserts or overwrites without a tag
    /// check. Returns the previous value. The runner decides whether the
    /// write is committed (notify) or speculative (log for later).
    /// Returns the previous value, `None` when the name was unset.
    pub(crate) fn write(&mut self, name: &str, value: Value) -> Option<Value> {
        self.vars.insert(name.to_string(), value)
    }

    /// Drop a variable entirely (lookahead revert of a fresh write).
    pub(crate) fn remove_var(&mut self, name: &str) {
        self.vars.remove(name);
    }

    /// Fire observers registered for `name`, in registration order.
    pub(crate) fn notify(&mut self, name: &str, new: &Value, old: &Value) {
        if let Some(list) = self.observers.get_mut(name) {
            for cb in list.iter_mut() {
                cb(new, old);
            }
        }
    }

    /// Increment a container's visit count, recording the current turn.
    pub(crate) fn visit(&mut self, path: PathId) {
        *self.visits.entry(path).or_insert(0) += 1;
        self.turn_visited.insert(path, self.turns);
    }

    /// Undo one visit increment (lookahead revert).
    pub(crate) fn unvisit(&mut self, path: PathId) {
        if let Some(count) = self.visits.get_mut(&path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.visits.remove(&path);
                self.turn_visited.remove(&path);
            }
        }
    }

    /// Visit count for a container path.
    #[must_use]
    pub fn visit_count(&self, path: PathId) -> u32 {
        self.visits.get(&path).copied().unwrap_or(0)
    }

    /// Turns elapsed since a container was last visited, or `None` if it has
    /// never been visited.
    #[must_use]
    pub fn turns_since(&self, path: PathId) -> Option<u64> {
        self.turn_visited.get(&path).map(|t| self.turns - t)
    }

    /// Turn counter: one tick per top-level advance cycle.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub(crate) fn next_turn(&mut self) {
        self.turns += 1;
    }

    /// The string table owned by this store.
    #[must_use]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Mutable string table access.
    pub fn strings_mut(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    /// The list table owned by this store.
    #[must_use]
    pub fn lists(&self) -> &ListTable {
        &self.lists
    }

    /// Mutable list table access.
    pub fn lists_mut(&mut self) -> &mut ListTable {
        &mut self.lists
    }
}
