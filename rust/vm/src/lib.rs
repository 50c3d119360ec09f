//! Runtime for precompiled interactive-narrative programs.
//!
//! This crate executes the bytecode format defined by `fable-story`. A
//! [`runner::Runner`] owns one flow of execution over an immutable,
//! shareable [`fable_story::Story`]; its [`globals::Globals`] store holds
//! variables, visit counts, the interned string table, and list storage,
//! and can be shared between runners of the same story.
//!
//! # Architecture
//!
//! - **Values** ([`value::Value`]): tagged scalars plus generation-checked
//!   handles into the string and list tables
//! - **Strings** ([`strings::StringTable`]): refcounted interned text with
//!   compaction under pressure
//! - **Lists** ([`lists::ListTable`]): refcounted flag-set values with
//!   copy-on-write mutation
//! - **Globals** ([`globals::Globals`]): variables with change observers,
//!   visit and turn tracking
//! - **Externals** ([`external::ExternalRegistry`]): host-bound functions
//!   called from story code
//! - **Runner** ([`runner::Runner`]): the stack machine, line assembly via
//!   speculative lookahead, choices
//! - **Snapshots** ([`snapshot`]): binary save/restore gated on the story
//!   fingerprint
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use fable_story::Story;
//! use fable_vm::Runner;
//!
//! let story = Arc::new(Story::from_json_bytes(&bytes)?);
//! let mut runner = Runner::new(Arc::clone(&story), None)?;
//! while runner.can_continue() {
//!     print!("{}", runner.advance()?);
//! }
//! ```

pub mod error;
pub mod external;
pub mod globals;
pub mod lists;
pub mod output;
pub mod prng;
pub mod runner;
pub mod snapshot;
pub mod strings;
pub mod value;

pub use error::RuntimeError;
pub use external::{ExternalCallable, ExternalRegistry, HostValue};
pub use globals::{Globals, ObserverFn};
pub use lists::{ListId, ListTable, ListValue};
pub use output::{Line, OutputStream};
pub use prng::Prng;
pub use runner::{Choice, Runner};
pub use strings::{StrId, StringTable, DEFAULT_STRING_CAPACITY};
pub use value::Value;
