//! External function bindings: host callables invokable from bytecode.
//!
//! Hosts exchange plain [`HostValue`]s with the runtime; the runner converts
//! to and from table-backed [`Value`]s at the call boundary, so callables
//! never touch the string/list tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RuntimeError;

/// Plain value crossing the host boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostValue {
    /// Absent value.
    None,
    /// Boolean.
    Bool(bool),
    /// Signed 32-bit integer.
    Int(i32),
    /// Unsigned 32-bit integer.
    Uint(u32),
    /// 32-bit float.
    Float(f32),
    /// Owned string text.
    Str(String),
}

/// A host callable: fixed-arity argument list in, one value out.
pub type ExternalCallable = Box<dyn FnMut(&[HostValue]) -> HostValue>;

/// One bound function with its declared arity and lookahead-safety flag.
pub struct Binding {
    arity: u8,
    lookahead_safe: bool,
    callable: ExternalCallable,
}

/// Registry of external bindings for one runner.
///
/// Bindings are per-runner and are not captured by snapshots; a restored
/// runner starts unbound and the caller rebinds.
#[derive(Default)]
pub struct ExternalRegistry {
    bindings: BTreeMap<String, Binding>,
}

impl std::fmt::Debug for ExternalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalRegistry")
            .field("bound", &self.bindings.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExternalRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a function. Rebinding a name replaces the previous binding.
    ///
    /// A function bound with `lookahead_safe: false` (the default choice)
    /// stops speculative scanning past its call site; one bound safe is
    /// assumed side-effect-free enough that a lookahead invocation counts
    /// as the real one.
    pub fn bind(
        &mut self,
        name: impl Into<String>,
        arity: u8,
        lookahead_safe: bool,
        callable: ExternalCallable,
    ) {
        let name = name.into();
        debug!(name, arity, lookahead_safe, "external bound");
        self.bindings.insert(
            name,
            Binding {
                arity,
                lookahead_safe,
                callable,
            },
        );
    }

    /// Whether a binding exists.
    #[must_use]
    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Lookahead-safety flag of a binding (false when unbound).
    #[must_use]
    pub fn is_lookahead_safe(&self, name: &str) -> bool {
        self.bindings.get(name).is_some_and(|b| b.lookahead_safe)
    }

    /// Invoke a binding after checking arity.
    ///
    /// # Errors
    ///
    /// `UnboundExternalFunction` when no binding exists,
    /// `ArgumentCountMismatch` when the call-site arity disagrees with the
    /// declared arity.
    pub fn call(&mut self, name: &str, args: &[HostValue]) -> Result<HostValue, RuntimeError> {
        let binding = self
            .bindings
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnboundExternalFunction(name.to_string()))?;
        let got = args.len() as u8;
        if got != binding.arity {
            return Err(RuntimeError::ArgumentCountMismatch {
                name: name.to_string(),
                expected: binding.arity,
                got,
            });
        }
        Ok((binding.callable)(args))
    }
}
