//! Bytecode instruction set for compiled narrative programs.
//!
//! The runner is a classic expression-stack machine: `BeginEval`/`EndEval`
//! delimit an expression region, operators pop operands and push results,
//! `Output` moves a finished value onto the output stream.

use serde::{Deserialize, Serialize};

/// Index into a story's path table.
pub type PathId = u32;

/// Program counter.
pub type PC = usize;

/// Literal operand payload carried by `PushLiteral`.
///
/// Literals are the compile-time shape of runtime values: strings are owned
/// text here and become interned handles when pushed, list literals name
/// their flags and are resolved against the story's list definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
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
    /// String text, interned at push time.
    Str(String),
    /// Divert target path.
    Divert(PathId),
    /// List literal: `origin.flag` names resolved against the list defs.
    List(Vec<String>),
}

impl Eq for Literal {}

/// Binary operator applied inside an expression region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Addition / string concat / list flag add.
    Add,
    /// Subtraction / list flag remove.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less-than.
    Lt,
    /// Greater-than.
    Gt,
    /// Less-or-equal.
    Le,
    /// Greater-or-equal.
    Ge,
    /// Boolean and.
    And,
    /// Boolean or.
    Or,
    /// Minimum (numeric or list rank).
    Min,
    /// Maximum (numeric or list rank).
    Max,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Min => "min",
            Self::Max => "max",
        };
        f.write_str(s)
    }
}

/// Unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Boolean not.
    Not,
    /// Numeric negation.
    Negate,
}

/// Bytecode instruction.
///
/// Covers literals, expression-region markers, output, stack manipulation,
/// visit counting, sequence selectors, string-stream capture, diverts and
/// calls, external function invocation, choice accumulation, variable
/// access, operators, and terminators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instr {
    /// Push a literal value onto the evaluation stack.
    PushLiteral {
        /// The literal to push.
        val: Literal,
    },
    /// Enter expression-evaluation mode.
    BeginEval,
    /// Leave expression-evaluation mode.
    EndEval,
    /// Pop the top value and append its text form to the output stream.
    Output,
    /// Discard the top value.
    Pop,
    /// Duplicate the top value.
    Dup,
    /// Container entry marker: increment the visit count for `path`.
    Visit {
        /// The container being entered.
        path: PathId,
    },
    /// Push the visit count of `path` as an `Int`.
    ReadCount {
        /// The container queried.
        path: PathId,
    },
    /// Sequence selector: pop element count then a cycle counter, push
    /// `min(counter, count - 1)`.
    Sequence,
    /// Shuffle selector: pop element count then a cycle counter, push a
    /// deterministic pseudo-random index below the count.
    Shuffle,
    /// Glue marker: merge output across the preceding line break.
    Glue,
    /// Line break marker.
    NewLine,
    /// Attach a tag at the current output position.
    Tag {
        /// Tag text.
        text: String,
    },
    /// Enter string-stream mode: capture output into a string value.
    BeginStr,
    /// Leave string-stream mode and push the captured text.
    EndStr,
    /// Unconditional jump.
    Divert {
        /// Target path.
        target: PathId,
    },
    /// Conditional jump: pop a `Bool` guard, jump when true.
    DivertIf {
        /// Target path.
        target: PathId,
    },
    /// Tunnel call: push a tunnel frame and jump.
    TunnelCall {
        /// Target path.
        target: PathId,
    },
    /// Tunnel return: pop a tunnel frame. A function frame here is fatal.
    TunnelReturn,
    /// Function call: push a function frame with isolated temporaries.
    FunctionCall {
        /// Target path.
        target: PathId,
    },
    /// Function return: pop a function frame. A tunnel frame here is fatal.
    FunctionReturn,
    /// Invoke an externally bound function, or the in-story fallback path
    /// with the same name when no binding exists.
    CallExternal {
        /// Function name.
        name: String,
        /// Number of arguments popped from the stack.
        args: u8,
    },
    /// Append a pending choice. The choice text is popped from the stack.
    Choice {
        /// Divert target committed by `choose`.
        target: PathId,
        /// Suppress this choice once its target has been visited.
        once: bool,
    },
    /// Push the value of a global variable.
    ReadVar {
        /// Variable name.
        name: String,
    },
    /// Pop a value into a global variable (committed or logged under
    /// lookahead).
    StoreVar {
        /// Variable name.
        name: String,
    },
    /// Push the value of a frame-local temporary.
    ReadTemp {
        /// Temporary name.
        name: String,
    },
    /// Pop a value into a frame-local temporary.
    StoreTemp {
        /// Temporary name.
        name: String,
    },
    /// Apply a binary operator to the top two stack values.
    BinOp {
        /// The operator.
        op: BinaryOp,
    },
    /// Apply a unary operator to the top stack value.
    UnOp {
        /// The operator.
        op: UnaryOp,
    },
    /// End of the current flow: suspend cleanly (present choices if any).
    Done,
    /// Hard story end.
    End,
}
