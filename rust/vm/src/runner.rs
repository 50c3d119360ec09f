//! The execution engine: a stack machine over one story's bytecode.
//!
//! `advance` runs instructions until a line of output is complete, a choice
//! point is reached, or the story ends. Line completion is decided by
//! speculative lookahead: after a line break the runner keeps executing on a
//! shadow thread with all side effects buffered, and either commits them
//! (glue was found, the line continues) or reverts them (fresh content
//! started, the line is final). Reverted effects are never observable.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::mem;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use fable_story::{BinaryOp, Instr, Literal, PathId, Story, PC};

use crate::error::RuntimeError;
use crate::external::{ExternalCallable, ExternalRegistry, HostValue};
use crate::globals::Globals;
use crate::lists::{list_binop, ListResult, ListValue};
use crate::output::OutputStream;
use crate::prng::Prng;
use crate::strings::StrId;
use crate::value::{number_to_text, numeric_binop, numeric_unop, Value};

/// Kind of call-stack frame. Returns must pop a frame of the matching
/// kind; a mismatch is story corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Function call: isolated temporaries, returns a value on the stack.
    Function,
    /// Tunnel call: narrative sub-path that returns control to its caller.
    Tunnel,
}

/// One call-stack frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Where execution resumes after the matching return.
    pub return_pc: PC,
    /// Frame kind checked at return.
    pub kind: FrameKind,
    /// Locally scoped temporaries.
    pub temps: BTreeMap<String, Value>,
}

/// A pending choice presented to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Choice text.
    pub text: String,
    /// Tags recorded against the choice. Not emitted to the main stream
    /// unless the choice's target is actually taken.
    pub tags: Vec<String>,
    pub(crate) target: PathId,
    pub(crate) once: bool,
}

/// Where the flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FlowState {
    /// Instructions keep executing.
    Running,
    /// Suspended at a choice point; `choose` resumes.
    AwaitingChoice,
    /// The story has ended.
    Ended,
}

/// Buffered side effects of one speculative pass.
///
/// Everything the pass touched is either restorable (cloned state, logged
/// writes) or deferrable (releases), so a revert leaves no trace and a
/// commit applies observer notifications in write order.
struct Speculation {
    pc: PC,
    state: FlowState,
    thread: u32,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    root_temps: BTreeMap<String, Value>,
    choices: Vec<Choice>,
    str_capture: Option<String>,
    pending_choice_tags: Vec<String>,
    prng: Prng,
    out_pos: usize,
    /// (name, previous value, written value) per globals write.
    write_log: Vec<(String, Option<Value>, Value)>,
    /// Visit increments to undo on revert.
    visit_log: Vec<PathId>,
    /// Strings interned by the pass; released on revert.
    interned: Vec<StrId>,
    /// List slots allocated by the pass; released on revert.
    allocated_lists: Vec<crate::lists::ListId>,
    /// Extra references taken by the pass; released on revert.
    retained: Vec<Value>,
    /// Handle releases deferred until commit.
    releases: Vec<Value>,
    /// External call sites cached by the pass; cleared on commit.
    cached_sites: Vec<PC>,
    /// Cached results consumed by the pass; cleared on commit, so a later
    /// occurrence of the same call site re-invokes instead of reusing a
    /// result that has already been spent.
    consumed_sites: Vec<PC>,
}

/// Serializable runner state, the snapshot codec's view of a runner.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RunnerState {
    pc: PC,
    state: FlowState,
    thread: u32,
    next_thread: u32,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    root_temps: BTreeMap<String, Value>,
    output: OutputStream,
    choices: Vec<Choice>,
    str_capture: Option<String>,
    pending_choice_tags: Vec<String>,
    last_line_tags: Vec<String>,
    prng: Prng,
    call_cache: BTreeMap<PC, HostValue>,
}

/// One execution thread over a story.
pub struct Runner {
    story: Arc<Story>,
    globals: Rc<RefCell<Globals>>,
    pc: PC,
    state: FlowState,
    thread: u32,
    next_thread: u32,
    eval_depth: u32,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    root_temps: BTreeMap<String, Value>,
    output: OutputStream,
    choices: Vec<Choice>,
    str_capture: Option<String>,
    pending_choice_tags: Vec<String>,
    last_line_tags: Vec<String>,
    prng: Prng,
    externals: ExternalRegistry,
    /// Per-call-site results of external invocations made under lookahead,
    /// consumed without re-invocation when the committed pass arrives.
    call_cache: BTreeMap<PC, HostValue>,
    spec: Option<Speculation>,
    glue_seen: bool,
    spec_stop: bool,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("pc", &self.pc)
            .field("state", &self.state)
            .field("thread", &self.thread)
            .field("stack", &self.stack)
            .field("frames", &self.frames.len())
            .field("choices", &self.choices.len())
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a runner over `story`, sharing `globals` when given or
    /// creating a fresh store otherwise.
    ///
    /// Execution starts at the `main` path when the story defines one,
    /// else at instruction 0.
    ///
    /// # Errors
    ///
    /// Propagates globals initialization failures.
    pub fn new(
        story: Arc<Story>,
        globals: Option<Rc<RefCell<Globals>>>,
    ) -> Result<Self, RuntimeError> {
        let globals = match globals {
            Some(g) => g,
            None => Rc::new(RefCell::new(Globals::new(&story)?)),
        };
        let pc = story
            .path_named("main")
            .and_then(|id| story.path_offset(id))
            .unwrap_or(0);
        Ok(Self {
            story,
            globals,
            pc,
            state: FlowState::Running,
            thread: 0,
            next_thread: 0,
            eval_depth: 0,
            stack: Vec::new(),
            frames: Vec::new(),
            root_temps: BTreeMap::new(),
            output: OutputStream::new(),
            choices: Vec::new(),
            str_capture: None,
            pending_choice_tags: Vec::new(),
            last_line_tags: Vec::new(),
            prng: Prng::default(),
            externals: ExternalRegistry::new(),
            call_cache: BTreeMap::new(),
            spec: None,
            glue_seen: false,
            spec_stop: false,
        })
    }

    /// The story this runner executes.
    #[must_use]
    pub fn story(&self) -> &Arc<Story> {
        &self.story
    }

    /// The shared globals store.
    #[must_use]
    pub fn globals(&self) -> Rc<RefCell<Globals>> {
        Rc::clone(&self.globals)
    }

    /// Reseed the shuffle generator.
    pub fn set_seed(&mut self, seed: u32) {
        self.prng = Prng::with_seed(seed);
    }

    /// Bind an external function. See [`ExternalRegistry::bind`].
    pub fn bind(
        &mut self,
        name: impl Into<String>,
        arity: u8,
        lookahead_safe: bool,
        callable: ExternalCallable,
    ) {
        self.externals.bind(name, arity, lookahead_safe, callable);
    }

    /// Whether `advance` can produce further output without a choice.
    #[must_use]
    pub fn can_continue(&self) -> bool {
        self.state == FlowState::Running
    }

    /// Pending choices in presentation order.
    #[must_use]
    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    /// Number of pending choices.
    #[must_use]
    pub fn num_choices(&self) -> usize {
        self.choices.len()
    }

    /// One pending choice.
    #[must_use]
    pub fn choice(&self, index: usize) -> Option<&Choice> {
        self.choices.get(index)
    }

    /// Tags of the most recently returned line.
    #[must_use]
    pub fn line_tags(&self) -> &[String] {
        &self.last_line_tags
    }

    /// Commit to a pending choice: divert to its target and clear the
    /// choice list. The index is 0-based in presentation order.
    ///
    /// # Errors
    ///
    /// `InvalidChoice` when out of range or no choices are pending; no
    /// state is mutated on failure.
    pub fn choose(&mut self, index: usize) -> Result<(), RuntimeError> {
        let Some(choice) = self.choices.get(index) else {
            return Err(RuntimeError::InvalidChoice {
                index,
                available: self.choices.len(),
            });
        };
        let target = choice.target;
        let offset = self
            .story
            .path_offset(target)
            .ok_or_else(|| RuntimeError::StoryCorruption(format!("choice target {target} unresolved")))?;
        debug!(index, target, "choice committed");
        self.choices.clear();
        // Committed flow diverges from anything lookahead scanned before
        // the choice; stale cached call results must not be consumed.
        self.call_cache.clear();
        self.pc = offset;
        self.state = FlowState::Running;
        Ok(())
    }

    /// Execute until a line of output is complete, a choice point is
    /// reached, or the story ends. Returns the line text (with trailing
    /// newline), or a possibly empty fragment when suspending.
    ///
    /// # Errors
    ///
    /// `StoryCorruption` is fatal; recoverable errors halt execution at the
    /// offending instruction and leave prior output consumed.
    pub fn advance(&mut self) -> Result<String, RuntimeError> {
        if !self.can_continue() {
            return Ok(String::new());
        }
        self.globals.borrow_mut().next_turn();
        self.last_line_tags.clear();

        loop {
            if self.state != FlowState::Running {
                // Flow ended while scanning ahead: nothing follows, so the
                // buffered effects are exactly what a committed pass would
                // produce. Keep them and end here.
                if self.spec.is_some() {
                    self.commit_speculation();
                }
                break;
            }

            if self.spec.is_none() && self.output.has_line() {
                self.begin_speculation();
            }

            self.step()?;

            let decision = self.spec.as_ref().map(|spec| {
                (
                    self.output.new_text_since(spec.out_pos),
                    self.choices.len() > spec.choices.len(),
                )
            });
            match decision {
                Some((new_text, new_choice)) => {
                    if self.glue_seen {
                        self.glue_seen = false;
                        self.commit_speculation();
                    } else if new_text || new_choice || self.spec_stop {
                        self.spec_stop = false;
                        self.revert_speculation();
                        break;
                    }
                }
                None => {
                    self.glue_seen = false;
                    self.spec_stop = false;
                }
            }
        }

        let line = match self.output.take_line() {
            Some(line) => line,
            None => self.output.take_partial(),
        };
        self.last_line_tags = line.tags;
        Ok(line.text)
    }

    /// Convenience: advance until no further output is possible,
    /// concatenating every line.
    ///
    /// # Errors
    ///
    /// Propagates the first `advance` failure.
    pub fn get_all(&mut self) -> Result<String, RuntimeError> {
        let mut all = String::new();
        while self.can_continue() {
            all.push_str(&self.advance()?);
        }
        Ok(all)
    }

    // ---- instruction dispatch ----

    fn step(&mut self) -> Result<(), RuntimeError> {
        let story = Arc::clone(&self.story);
        let pc = self.pc;
        let instr = story
            .op(pc)
            .ok_or_else(|| RuntimeError::StoryCorruption(format!("pc {pc} out of range")))?;
        self.pc += 1;

        match instr {
            Instr::PushLiteral { val } => {
                let v = self.materialize(val)?;
                self.stack.push(v);
            }
            Instr::BeginEval => self.eval_depth += 1,
            Instr::EndEval => {
                self.eval_depth = self.eval_depth.checked_sub(1).ok_or_else(|| {
                    RuntimeError::StoryCorruption("end-eval without begin-eval".into())
                })?;
            }
            Instr::Output => {
                let v = self.pop()?;
                let text = self.value_to_text(&v)?;
                match self.str_capture.as_mut() {
                    Some(capture) => capture.push_str(&text),
                    None => self.output.push_text(text),
                }
                self.discard(v);
            }
            Instr::Pop => {
                let v = self.pop()?;
                self.discard(v);
            }
            Instr::Dup => {
                let v = *self.stack.last().ok_or_else(stack_underflow)?;
                self.retain_value(v);
                self.stack.push(v);
            }
            Instr::Visit { path } => self.do_visit(*path),
            Instr::ReadCount { path } => {
                let count = self.globals.borrow().visit_count(*path);
                self.stack.push(Value::Int(count as i32));
            }
            Instr::Sequence | Instr::Shuffle => {
                let count = self.pop_int("sequence element count")?;
                let counter = self.pop_int("sequence counter")?;
                let count = count.max(1);
                let index = if matches!(instr, &Instr::Sequence) {
                    counter.min(count - 1)
                } else {
                    self.prng.below(count as u32) as i32
                };
                self.stack.push(Value::Int(index));
            }
            Instr::Glue => {
                if self.str_capture.is_none() {
                    self.output.push_glue();
                    self.glue_seen = true;
                }
            }
            Instr::NewLine => {
                if self.str_capture.is_none() {
                    self.output.push_newline();
                }
            }
            Instr::Tag { text } => match self.str_capture.as_ref() {
                Some(_) => self.pending_choice_tags.push(text.clone()),
                None => self.output.push_tag(text.clone()),
            },
            Instr::BeginStr => {
                if self.str_capture.is_some() {
                    return Err(RuntimeError::StoryCorruption(
                        "nested string-stream begin".into(),
                    ));
                }
                self.str_capture = Some(String::new());
            }
            Instr::EndStr => {
                let captured = self.str_capture.take().ok_or_else(|| {
                    RuntimeError::StoryCorruption("string-stream end without begin".into())
                })?;
                let v = self.intern_value(&captured)?;
                self.stack.push(v);
            }
            Instr::Divert { target } => self.jump(*target)?,
            Instr::DivertIf { target } => {
                let guard = self.pop()?;
                let take = guard.truthy()?;
                self.discard(guard);
                if take {
                    self.jump(*target)?;
                }
            }
            Instr::TunnelCall { target } => {
                self.frames.push(Frame {
                    return_pc: self.pc,
                    kind: FrameKind::Tunnel,
                    temps: BTreeMap::new(),
                });
                self.jump(*target)?;
            }
            Instr::FunctionCall { target } => {
                self.frames.push(Frame {
                    return_pc: self.pc,
                    kind: FrameKind::Function,
                    temps: BTreeMap::new(),
                });
                self.jump(*target)?;
            }
            Instr::TunnelReturn => self.pop_frame(FrameKind::Tunnel)?,
            Instr::FunctionReturn => self.pop_frame(FrameKind::Function)?,
            Instr::CallExternal { name, args } => self.call_external(pc, name, *args)?,
            Instr::Choice { target, once } => {
                let v = self.pop()?;
                let text = self.value_to_text(&v)?;
                self.discard(v);
                let tags = mem::take(&mut self.pending_choice_tags);
                let suppressed = *once && self.globals.borrow().visit_count(*target) > 0;
                if !suppressed {
                    self.choices.push(Choice {
                        text,
                        tags,
                        target: *target,
                        once: *once,
                    });
                }
            }
            Instr::ReadVar { name } => {
                let v = self.globals.borrow().get(name);
                self.retain_value(v);
                self.stack.push(v);
            }
            Instr::StoreVar { name } => {
                let v = self.pop()?;
                self.store_var(name, v);
            }
            Instr::ReadTemp { name } => {
                let v = self.read_temp(name);
                self.retain_value(v);
                self.stack.push(v);
            }
            Instr::StoreTemp { name } => {
                let v = self.pop()?;
                let old = self.temps_mut().insert(name.clone(), v);
                if let Some(old) = old {
                    self.discard(old);
                }
            }
            Instr::BinOp { op } => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.apply_binop(*op, &lhs, &rhs)?;
                self.discard(lhs);
                self.discard(rhs);
                self.stack.push(result);
            }
            Instr::UnOp { op } => {
                let v = self.pop()?;
                let result = numeric_unop(*op, &v)?;
                self.discard(v);
                self.stack.push(result);
            }
            Instr::Done => {
                self.state = if self.choices.is_empty() {
                    FlowState::Ended
                } else {
                    FlowState::AwaitingChoice
                };
                trace!(state = ?self.state, "flow done");
            }
            Instr::End => {
                self.choices.clear();
                self.state = FlowState::Ended;
            }
        }
        Ok(())
    }

    fn jump(&mut self, target: PathId) -> Result<(), RuntimeError> {
        self.pc = self
            .story
            .path_offset(target)
            .ok_or_else(|| RuntimeError::StoryCorruption(format!("divert target {target} unresolved")))?;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    fn pop_int(&mut self, what: &str) -> Result<i32, RuntimeError> {
        match self.pop()? {
            Value::Int(i) => Ok(i),
            other => Err(RuntimeError::type_mismatch(what, other.kind(), "int")),
        }
    }

    fn pop_frame(&mut self, expected: FrameKind) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().ok_or_else(|| {
            RuntimeError::StoryCorruption(format!("{expected:?} return with empty call stack"))
        })?;
        if frame.kind != expected {
            return Err(RuntimeError::StoryCorruption(format!(
                "{expected:?} return popped a {:?} frame",
                frame.kind
            )));
        }
        for (_, v) in frame.temps {
            self.discard(v);
        }
        self.pc = frame.return_pc;
        Ok(())
    }

    fn temps_mut(&mut self) -> &mut BTreeMap<String, Value> {
        match self.frames.last_mut() {
            Some(frame) => &mut frame.temps,
            None => &mut self.root_temps,
        }
    }

    /// Resolve a temporary: innermost frames outward, stopping at the first
    /// function frame (functions isolate their locals), else the root scope.
    fn read_temp(&self, name: &str) -> Value {
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.temps.get(name) {
                return *v;
            }
            if frame.kind == FrameKind::Function {
                return Value::None;
            }
        }
        self.root_temps.get(name).copied().unwrap_or(Value::None)
    }

    fn call_external(&mut self, call_pc: PC, name: &str, argc: u8) -> Result<(), RuntimeError> {
        let mut args = Vec::with_capacity(usize::from(argc));
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();

        if let Some(cached) = self.call_cache.get(&call_pc).cloned() {
            // A lookahead pass already performed this call; reuse the result
            // as the authoritative invocation instead of re-invoking. Under
            // speculation the entry is kept until the pass commits, since a
            // revert re-runs this site and must find the result again.
            match self.spec.as_mut() {
                Some(spec) => spec.consumed_sites.push(call_pc),
                None => {
                    self.call_cache.remove(&call_pc);
                }
            }
            for a in args {
                self.discard(a);
            }
            let v = self.host_to_value(&cached)?;
            self.stack.push(v);
            return Ok(());
        }

        if self.externals.is_bound(name) {
            // Release the popped arguments even when the call fails, or their
            // handle references would leak with the error.
            let outcome = match args
                .iter()
                .map(|a| self.value_to_host(a))
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(host_args) => self.externals.call(name, &host_args),
                Err(e) => Err(e),
            };
            for a in args {
                self.discard(a);
            }
            let result = outcome?;
            if let Some(spec) = self.spec.as_mut() {
                self.call_cache.insert(call_pc, result.clone());
                spec.cached_sites.push(call_pc);
                if !self.externals.is_lookahead_safe(name) {
                    // Unsafe effects cannot be buffered further; end the
                    // speculative pass at this call.
                    self.spec_stop = true;
                }
            }
            let v = self.host_to_value(&result)?;
            self.stack.push(v);
            return Ok(());
        }

        if let Some(fallback) = self.story.path_named(name) {
            debug!(name, "external unbound, using in-story fallback");
            for a in args {
                self.stack.push(a);
            }
            self.frames.push(Frame {
                return_pc: self.pc,
                kind: FrameKind::Function,
                temps: BTreeMap::new(),
            });
            return self.jump(fallback);
        }

        Err(RuntimeError::UnboundExternalFunction(name.to_string()))
    }

    // ---- operators ----

    fn apply_binop(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
        match (lhs, rhs) {
            (Value::List(a), Value::List(b)) => {
                let (la, lb) = {
                    let g = self.globals.borrow();
                    let la = g
                        .lists()
                        .get(*a)
                        .cloned()
                        .ok_or_else(|| stale_handle("list"))?;
                    let lb = g
                        .lists()
                        .get(*b)
                        .cloned()
                        .ok_or_else(|| stale_handle("list"))?;
                    (la, lb)
                };
                match list_binop(op, &la, &lb)? {
                    ListResult::List(lv) => self.alloc_list_value(lv),
                    ListResult::Bool(b) => Ok(Value::Bool(b)),
                }
            }
            (Value::Str(_), _) | (_, Value::Str(_)) => match op {
                BinaryOp::Add => {
                    let text = format!(
                        "{}{}",
                        self.value_to_text(lhs)?,
                        self.value_to_text(rhs)?
                    );
                    self.intern_value(&text)
                }
                BinaryOp::Eq | BinaryOp::Ne => {
                    let (Value::Str(a), Value::Str(b)) = (lhs, rhs) else {
                        return Err(RuntimeError::type_mismatch(op, lhs.kind(), rhs.kind()));
                    };
                    let g = self.globals.borrow();
                    let sa = g.strings().resolve(*a).ok_or_else(|| stale_handle("string"))?;
                    let sb = g.strings().resolve(*b).ok_or_else(|| stale_handle("string"))?;
                    let eq = sa == sb;
                    Ok(Value::Bool(if op == BinaryOp::Eq { eq } else { !eq }))
                }
                _ => Err(RuntimeError::type_mismatch(op, lhs.kind(), rhs.kind())),
            },
            (Value::Divert(a), Value::Divert(b)) => match op {
                BinaryOp::Eq => Ok(Value::Bool(a == b)),
                BinaryOp::Ne => Ok(Value::Bool(a != b)),
                _ => Err(RuntimeError::type_mismatch(op, "divert", "divert")),
            },
            _ => numeric_binop(op, lhs, rhs),
        }
    }

    // ---- value lifecycle (speculation-aware) ----

    fn materialize(&mut self, literal: &Literal) -> Result<Value, RuntimeError> {
        match literal {
            Literal::None => Ok(Value::None),
            Literal::Bool(b) => Ok(Value::Bool(*b)),
            Literal::Int(i) => Ok(Value::Int(*i)),
            Literal::Uint(u) => Ok(Value::Uint(*u)),
            Literal::Float(f) => Ok(Value::Float(*f)),
            Literal::Divert(p) => Ok(Value::Divert(*p)),
            Literal::Str(s) => self.intern_value(s),
            Literal::List(specs) => {
                let mut lv = ListValue::new();
                for spec in specs {
                    let flag = self
                        .story
                        .lists()
                        .resolve(spec)
                        .map_err(|e| RuntimeError::StoryCorruption(e.to_string()))?;
                    lv.add(flag);
                }
                self.alloc_list_value(lv)
            }
        }
    }

    fn intern_value(&mut self, text: &str) -> Result<Value, RuntimeError> {
        let id = self.globals.borrow_mut().strings_mut().intern(text)?;
        if let Some(spec) = self.spec.as_mut() {
            spec.interned.push(id);
        }
        Ok(Value::Str(id))
    }

    fn alloc_list_value(&mut self, lv: ListValue) -> Result<Value, RuntimeError> {
        let id = self.globals.borrow_mut().lists_mut().alloc(lv);
        if let Some(spec) = self.spec.as_mut() {
            spec.allocated_lists.push(id);
        }
        Ok(Value::List(id))
    }

    /// Give up one reference to a value. Under speculation the release is
    /// deferred to commit so a revert can reinstate the value untouched.
    fn discard(&mut self, v: Value) {
        if !matches!(v, Value::Str(_) | Value::List(_)) {
            return;
        }
        match self.spec.as_mut() {
            Some(spec) => spec.releases.push(v),
            None => release_value(&mut self.globals.borrow_mut(), &v),
        }
    }

    /// Take an extra reference to a value (aliasing it onto the stack).
    fn retain_value(&mut self, v: Value) {
        match v {
            Value::Str(id) => self.globals.borrow_mut().strings_mut().retain(id),
            Value::List(id) => self.globals.borrow_mut().lists_mut().retain(id),
            _ => return,
        }
        if let Some(spec) = self.spec.as_mut() {
            spec.retained.push(v);
        }
    }

    fn do_visit(&mut self, path: PathId) {
        self.globals.borrow_mut().visit(path);
        if let Some(spec) = self.spec.as_mut() {
            spec.visit_log.push(path);
        }
    }

    fn store_var(&mut self, name: &str, v: Value) {
        let old = self.globals.borrow_mut().write(name, v);
        match self.spec.as_mut() {
            Some(spec) => spec.write_log.push((name.to_string(), old, v)),
            None => {
                let old_v = old.unwrap_or(Value::None);
                self.globals.borrow_mut().notify(name, &v, &old_v);
                if let Some(old) = old {
                    self.discard(old);
                }
            }
        }
    }

    // ---- text and host conversions ----

    fn value_to_text(&self, v: &Value) -> Result<String, RuntimeError> {
        if let Some(text) = number_to_text(v) {
            return Ok(text);
        }
        let g = self.globals.borrow();
        match v {
            Value::Str(id) => g
                .strings()
                .resolve(*id)
                .map(str::to_string)
                .ok_or_else(|| stale_handle("string")),
            Value::List(id) => g
                .lists()
                .get(*id)
                .map(ListValue::to_text)
                .ok_or_else(|| stale_handle("list")),
            Value::Divert(p) => Ok(self
                .story
                .paths()
                .get(*p)
                .map(|e| e.name.clone())
                .unwrap_or_default()),
            _ => unreachable!("number_to_text covers scalar kinds"),
        }
    }

    fn value_to_host(&self, v: &Value) -> Result<HostValue, RuntimeError> {
        Ok(match v {
            Value::None => HostValue::None,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Int(i) => HostValue::Int(*i),
            Value::Uint(u) => HostValue::Uint(*u),
            Value::Float(f) => HostValue::Float(*f),
            Value::Str(_) | Value::List(_) | Value::Divert(_) => {
                HostValue::Str(self.value_to_text(v)?)
            }
        })
    }

    fn host_to_value(&mut self, v: &HostValue) -> Result<Value, RuntimeError> {
        Ok(match v {
            HostValue::None => Value::None,
            HostValue::Bool(b) => Value::Bool(*b),
            HostValue::Int(i) => Value::Int(*i),
            HostValue::Uint(u) => Value::Uint(*u),
            HostValue::Float(f) => Value::Float(*f),
            HostValue::Str(s) => self.intern_value(s)?,
        })
    }

    // ---- speculation control ----

    fn begin_speculation(&mut self) {
        self.next_thread += 1;
        let spec = Speculation {
            pc: self.pc,
            state: self.state,
            thread: self.thread,
            stack: self.stack.clone(),
            frames: self.frames.clone(),
            root_temps: self.root_temps.clone(),
            choices: self.choices.clone(),
            str_capture: self.str_capture.clone(),
            pending_choice_tags: self.pending_choice_tags.clone(),
            prng: self.prng,
            out_pos: self.output.position(),
            write_log: Vec::new(),
            visit_log: Vec::new(),
            interned: Vec::new(),
            allocated_lists: Vec::new(),
            retained: Vec::new(),
            releases: Vec::new(),
            cached_sites: Vec::new(),
            consumed_sites: Vec::new(),
        };
        self.output.save();
        self.thread = self.next_thread;
        self.spec = Some(spec);
        trace!(thread = self.thread, "lookahead begin");
    }

    fn revert_speculation(&mut self) {
        let spec = self.spec.take().expect("revert without active speculation");
        {
            let mut g = self.globals.borrow_mut();
            for (name, old, _) in spec.write_log.iter().rev() {
                match old {
                    Some(v) => {
                        g.write(name, *v);
                    }
                    None => g.remove_var(name),
                }
            }
            for path in spec.visit_log.iter().rev() {
                g.unvisit(*path);
            }
            for id in &spec.interned {
                g.strings_mut().release(*id);
            }
            for id in &spec.allocated_lists {
                g.lists_mut().release(*id);
            }
            for v in &spec.retained {
                release_value(&mut g, v);
            }
        }
        self.pc = spec.pc;
        self.state = spec.state;
        self.thread = spec.thread;
        self.stack = spec.stack;
        self.frames = spec.frames;
        self.root_temps = spec.root_temps;
        self.choices = spec.choices;
        self.str_capture = spec.str_capture;
        self.pending_choice_tags = spec.pending_choice_tags;
        self.prng = spec.prng;
        self.output.restore();
        self.glue_seen = false;
        trace!(thread = self.thread, "lookahead reverted");
        // Deferred releases are dropped: those values are live again in the
        // restored stack/frames. Cached call results stay for the committed
        // pass to consume.
    }

    fn commit_speculation(&mut self) {
        let spec = self.spec.take().expect("commit without active speculation");
        self.output.forget();
        self.thread = spec.thread;
        for pc in spec.cached_sites.iter().chain(&spec.consumed_sites) {
            self.call_cache.remove(pc);
        }
        {
            let mut g = self.globals.borrow_mut();
            for v in &spec.releases {
                release_value(&mut g, v);
            }
        }
        for (name, old, new) in spec.write_log {
            let old_v = old.unwrap_or(Value::None);
            self.globals.borrow_mut().notify(&name, &new, &old_v);
            if let Some(old) = old {
                release_value(&mut self.globals.borrow_mut(), &old);
            }
        }
        trace!(thread = self.thread, "lookahead committed");
    }

    // ---- snapshot support ----

    pub(crate) fn to_state(&self) -> RunnerState {
        RunnerState {
            pc: self.pc,
            state: self.state,
            thread: self.thread,
            next_thread: self.next_thread,
            stack: self.stack.clone(),
            frames: self.frames.clone(),
            root_temps: self.root_temps.clone(),
            output: self.output.clone(),
            choices: self.choices.clone(),
            str_capture: self.str_capture.clone(),
            pending_choice_tags: self.pending_choice_tags.clone(),
            last_line_tags: self.last_line_tags.clone(),
            prng: self.prng,
            call_cache: self.call_cache.clone(),
        }
    }

    pub(crate) fn from_state(
        story: Arc<Story>,
        globals: Rc<RefCell<Globals>>,
        state: RunnerState,
    ) -> Self {
        Self {
            story,
            globals,
            pc: state.pc,
            state: state.state,
            thread: state.thread,
            next_thread: state.next_thread,
            eval_depth: 0,
            stack: state.stack,
            frames: state.frames,
            root_temps: state.root_temps,
            output: state.output,
            choices: state.choices,
            str_capture: state.str_capture,
            pending_choice_tags: state.pending_choice_tags,
            last_line_tags: state.last_line_tags,
            prng: state.prng,
            externals: ExternalRegistry::new(),
            call_cache: state.call_cache,
            spec: None,
            glue_seen: false,
            spec_stop: false,
        }
    }
}

fn stack_underflow() -> RuntimeError {
    RuntimeError::StoryCorruption("evaluation stack underflow".into())
}

fn stale_handle(kind: &str) -> RuntimeError {
    RuntimeError::StoryCorruption(format!("stale {kind} handle"))
}

fn release_value(globals: &mut Globals, v: &Value) {
    match v {
        Value::Str(id) => globals.strings_mut().release(*id),
        Value::List(id) => globals.lists_mut().release(*id),
        _ => {}
    }
}
