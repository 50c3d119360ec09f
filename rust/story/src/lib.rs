//! Compiled narrative program data model.
//!
//! A story is an immutable instruction sequence plus structural path table,
//! list-type definitions, declared globals, and a content fingerprint. The
//! external compiler emits this as JSON; the runtime (`fable-vm`) loads it
//! once and shares it read-only across runners.

pub mod instr;
pub mod lists;
pub mod path;
pub mod story;

pub use instr::{BinaryOp, Instr, Literal, PathId, UnaryOp, PC};
pub use lists::{FlagLookupError, ListDef, ListDefs, ListFlag};
pub use path::{PathEntry, PathTable};
pub use story::{Story, StoryError, FORMAT_VERSION};
