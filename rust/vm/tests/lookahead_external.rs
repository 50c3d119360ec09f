//! External-function semantics under speculative line assembly: each call
//! site invokes its binding exactly once, whatever passes cross it.

use std::cell::RefCell;
use std::rc::Rc;

use assert_matches::assert_matches;
use fable_story::Instr;
use fable_vm::{HostValue, RuntimeError};

#[allow(dead_code, unreachable_pub)]
mod helpers;

use helpers::{bind_greeting, bind_sqrt, external_demo, lit_str, oracle_story, runner, story};

#[test]
fn demo_transcript_with_bindings() {
    let s = external_demo(false);
    let mut r = runner(&s);
    let greeting_calls = Rc::new(RefCell::new(0u32));
    let sqrt_calls = Rc::new(RefCell::new(0u32));
    bind_greeting(&mut r, &greeting_calls);
    bind_sqrt(&mut r, &sqrt_calls);

    assert_eq!(
        r.advance().unwrap(),
        "Hohooh ! A small demonstration of my power:\n"
    );
    assert_eq!(
        r.advance().unwrap(),
        "Math 4 * 4 = 16, stunning i would say\n"
    );
    assert!(!r.can_continue());
    assert_eq!(*greeting_calls.borrow(), 1);
    assert_eq!(*sqrt_calls.borrow(), 2);
}

#[test]
fn fallback_body_runs_when_unbound() {
    let s = external_demo(true);
    let mut r = runner(&s);
    let sqrt_calls = Rc::new(RefCell::new(0u32));
    bind_sqrt(&mut r, &sqrt_calls);

    assert_eq!(
        r.advance().unwrap(),
        "Hello ! A small demonstration of my power:\n"
    );
    assert_eq!(
        r.advance().unwrap(),
        "Math 4 * 4 = 16, stunning i would say\n"
    );
}

#[test]
fn unbound_without_fallback_is_an_error() {
    let s = external_demo(false);
    let mut r = runner(&s);
    assert_matches!(
        r.advance(),
        Err(RuntimeError::UnboundExternalFunction(name)) if name == "greeting"
    );
}

#[test]
fn arity_mismatch_is_reported() {
    let s = external_demo(false);
    let mut r = runner(&s);
    let greeting_calls = Rc::new(RefCell::new(0u32));
    bind_greeting(&mut r, &greeting_calls);
    // sqrt bound with the wrong arity
    r.bind("sqrt", 2, true, Box::new(|_: &[HostValue]| HostValue::None));
    assert_matches!(
        r.get_all(),
        Err(RuntimeError::ArgumentCountMismatch {
            expected: 2,
            got: 1,
            ..
        })
    );
}

#[test]
fn lookahead_result_is_reused_not_reinvoked() {
    let s = oracle_story();
    let mut r = runner(&s);
    let calls = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&calls);
    r.bind(
        "oracle",
        0,
        true,
        Box::new(move |_: &[HostValue]| {
            *counter.borrow_mut() += 1;
            HostValue::Str("consulted".to_string())
        }),
    );

    assert_eq!(r.advance().unwrap(), "A\n");
    // the lookahead pass already crossed the call site
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(r.advance().unwrap(), "consulted\n");
    // the committed pass consumed the cached result
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn unsafe_binding_halts_speculation_and_still_invokes_once() {
    let s = oracle_story();
    let mut r = runner(&s);
    let calls = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&calls);
    r.bind(
        "oracle",
        0,
        false,
        Box::new(move |_: &[HostValue]| {
            *counter.borrow_mut() += 1;
            HostValue::Int(42)
        }),
    );

    assert_eq!(r.advance().unwrap(), "A\n");
    assert_eq!(r.advance().unwrap(), "42\n");
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn spent_cache_entry_is_not_reused_for_a_later_occurrence() {
    // Two textual calls to the same function body, so both occurrences share
    // one call site. The first occurrence's cached result is consumed during
    // a pass that glues and commits; the second occurrence must then invoke
    // the binding again instead of finding the spent entry.
    let s = story(
        vec![
            lit_str("A"),
            Instr::Output,
            Instr::NewLine,
            Instr::NewLine, // blank line, removed by the glue below
            Instr::BeginEval,
            Instr::FunctionCall { target: 1 },
            Instr::EndEval,
            Instr::Pop,
            Instr::Glue,
            lit_str("B"),
            Instr::Output,
            Instr::NewLine,
            Instr::BeginEval,
            Instr::FunctionCall { target: 1 },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
            // tally:
            Instr::CallExternal {
                name: "tally".to_string(),
                args: 0,
            },
            Instr::FunctionReturn,
        ],
        &[("main", 0), ("tally", 18)],
    );
    let mut r = runner(&s);
    let calls = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&calls);
    r.bind(
        "tally",
        0,
        false,
        Box::new(move |_: &[HostValue]| {
            *counter.borrow_mut() += 1;
            HostValue::Int(7)
        }),
    );

    assert_eq!(r.advance().unwrap(), "A\n");
    assert_eq!(r.advance().unwrap(), "B\n");
    assert_eq!(r.advance().unwrap(), "7\n");
    assert!(!r.can_continue());
    // one invocation per textual occurrence
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn failed_call_releases_its_arguments() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_str("payload"),
            Instr::CallExternal {
                name: "gauge".to_string(),
                args: 1,
            },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    let mut r = runner(&s);
    // wrong arity, so the call itself fails after the argument was popped
    r.bind("gauge", 2, true, Box::new(|_: &[HostValue]| HostValue::None));

    assert_matches!(r.advance(), Err(RuntimeError::ArgumentCountMismatch { .. }));

    let globals = r.globals();
    let mut g = globals.borrow_mut();
    g.strings_mut().compact();
    assert_eq!(g.strings().live(), 0);
}

#[test]
fn host_floats_render_like_story_floats() {
    let s = oracle_story();
    let mut r = runner(&s);
    r.bind(
        "oracle",
        0,
        true,
        Box::new(|_: &[HostValue]| HostValue::Float(4.0)),
    );
    assert_eq!(r.advance().unwrap(), "A\n");
    assert_eq!(r.advance().unwrap(), "4\n");
}
