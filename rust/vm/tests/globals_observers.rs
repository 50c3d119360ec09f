//! Variable writes, observers, and their interaction with lookahead:
//! reverted passes must leave no observable trace.

use std::cell::RefCell;
use std::rc::Rc;

use fable_story::{Instr, Literal};
use fable_vm::Value;

#[allow(dead_code, unreachable_pub)]
mod helpers;

use helpers::{lit_int, lit_str, runner, story, story_with_lists};

fn counter_story() -> std::sync::Arc<fable_story::Story> {
    story_with_lists(
        vec![
            lit_str("A"),
            Instr::Output,
            Instr::NewLine,
            lit_int(5),
            Instr::StoreVar {
                name: "x".to_string(),
            },
            lit_str("B"),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
        fable_story::ListDefs::default(),
        vec![("x".to_string(), Literal::Int(0))],
    )
}

#[test]
fn reverted_write_is_invisible() {
    let s = counter_story();
    let mut r = runner(&s);
    let seen: Rc<RefCell<Vec<(Value, Value)>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    r.globals().borrow_mut().observe(
        "x",
        Box::new(move |new, old| log.borrow_mut().push((*new, *old))),
    );

    // Line A: lookahead crosses the write to x, then reverts on B's text.
    assert_eq!(r.advance().unwrap(), "A\n");
    assert!(seen.borrow().is_empty());
    assert_eq!(r.globals().borrow().get("x"), Value::Int(0));

    // Line B: the same write happens for real.
    assert_eq!(r.advance().unwrap(), "B\n");
    assert_eq!(seen.borrow().as_slice(), [(Value::Int(5), Value::Int(0))]);
    assert_eq!(r.globals().borrow().get("x"), Value::Int(5));
}

#[test]
fn committed_lookahead_fires_deferred_notifications() {
    // Same write, but glue commits the speculative pass instead.
    let s = story_with_lists(
        vec![
            lit_str("A"),
            Instr::Output,
            Instr::NewLine,
            lit_int(5),
            Instr::StoreVar {
                name: "x".to_string(),
            },
            Instr::Glue,
            lit_str("B"),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
        fable_story::ListDefs::default(),
        vec![("x".to_string(), Literal::Int(0))],
    );
    let mut r = runner(&s);
    let seen: Rc<RefCell<Vec<(Value, Value)>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    r.globals().borrow_mut().observe(
        "x",
        Box::new(move |new, old| log.borrow_mut().push((*new, *old))),
    );

    assert_eq!(r.advance().unwrap(), "AB\n");
    assert_eq!(seen.borrow().as_slice(), [(Value::Int(5), Value::Int(0))]);
    assert_eq!(r.globals().borrow().get("x"), Value::Int(5));
}

#[test]
fn external_set_rejects_unknown_and_retyped_names() {
    let s = counter_story();
    let r = runner(&s);
    let globals = r.globals();
    let mut g = globals.borrow_mut();
    assert!(!g.set("nope", Value::Int(1)));
    assert!(!g.set("x", Value::Bool(true)));
    assert!(g.set("x", Value::Int(9)));
    assert_eq!(g.get("x"), Value::Int(9));
}

#[test]
fn story_writes_read_back_through_the_shared_store() {
    let s = counter_story();
    let mut r = runner(&s);
    let globals = r.globals();
    r.get_all().unwrap();
    assert_eq!(globals.borrow().get("x"), Value::Int(5));
}

#[test]
fn reverted_visits_do_not_count() {
    // The lookahead pass visits the `next` path before reverting on its
    // text; the count must reflect only committed flow.
    let s = story(
        vec![
            lit_str("A"),
            Instr::Output,
            Instr::NewLine,
            Instr::Visit { path: 1 },
            lit_str("B"),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0), ("next", 3)],
    );
    let mut r = runner(&s);
    assert_eq!(r.advance().unwrap(), "A\n");
    assert_eq!(r.globals().borrow().visit_count(1), 0);
    assert_eq!(r.advance().unwrap(), "B\n");
    assert_eq!(r.globals().borrow().visit_count(1), 1);
}
