//! Shared story builders for runtime integration tests.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use fable_story::{Instr, ListDefs, Literal, PathTable, Story, PC};
use fable_vm::{HostValue, Runner};

/// Build a story from raw instructions and named path offsets. Path ids
/// are assigned in declaration order, so instructions can reference them
/// by position.
pub fn story(ops: Vec<Instr>, paths: &[(&str, PC)]) -> Arc<Story> {
    story_with_lists(ops, paths, ListDefs::default(), Vec::new())
}

pub fn story_with_lists(
    ops: Vec<Instr>,
    paths: &[(&str, PC)],
    lists: ListDefs,
    globals: Vec<(String, Literal)>,
) -> Arc<Story> {
    let mut table = PathTable::default();
    for (name, offset) in paths {
        table.push(*name, *offset);
    }
    Arc::new(Story::new(ops, table, lists, globals).expect("valid test story"))
}

pub fn runner(story: &Arc<Story>) -> Runner {
    Runner::new(Arc::clone(story), None).expect("runner construction")
}

pub fn lit_str(s: &str) -> Instr {
    Instr::PushLiteral {
        val: Literal::Str(s.to_string()),
    }
}

pub fn lit_int(i: i32) -> Instr {
    Instr::PushLiteral {
        val: Literal::Int(i),
    }
}

/// The external-function demo: one greeting call and two square roots,
/// rendered over two lines. Path 0 is `main`; when `with_fallback` is set
/// path 1 is an in-story `greeting` function returning "Hello".
pub fn external_demo(with_fallback: bool) -> Arc<Story> {
    let mut ops = vec![
        // line 1: {greeting()} ! A small demonstration of my power:
        Instr::BeginEval,
        Instr::CallExternal {
            name: "greeting".to_string(),
            args: 0,
        },
        Instr::EndEval,
        Instr::Output,
        lit_str(" ! A small demonstration of my power:"),
        Instr::Output,
        Instr::NewLine,
        // line 2: Math {sqrt(16)} * {sqrt(16)} = 16, stunning i would say
        lit_str("Math "),
        Instr::Output,
        Instr::BeginEval,
        lit_int(16),
        Instr::CallExternal {
            name: "sqrt".to_string(),
            args: 1,
        },
        Instr::EndEval,
        Instr::Output,
        lit_str(" * "),
        Instr::Output,
        Instr::BeginEval,
        lit_int(16),
        Instr::CallExternal {
            name: "sqrt".to_string(),
            args: 1,
        },
        Instr::EndEval,
        Instr::Output,
        lit_str(" = 16, stunning i would say"),
        Instr::Output,
        Instr::NewLine,
        Instr::End,
    ];
    let mut paths: Vec<(&str, PC)> = vec![("main", 0)];
    if with_fallback {
        let fallback = ops.len();
        ops.push(lit_str("Hello"));
        ops.push(Instr::FunctionReturn);
        paths.push(("greeting", fallback));
    }
    story(ops, &paths)
}

/// Bind `sqrt` on a runner, counting invocations through the shared cell.
pub fn bind_sqrt(runner: &mut Runner, calls: &Rc<RefCell<u32>>) {
    let calls = Rc::clone(calls);
    runner.bind(
        "sqrt",
        1,
        true,
        Box::new(move |args: &[HostValue]| {
            *calls.borrow_mut() += 1;
            match &args[0] {
                HostValue::Int(i) => HostValue::Float((*i as f32).sqrt()),
                _ => HostValue::None,
            }
        }),
    );
}

/// Bind `greeting` on a runner, counting invocations.
pub fn bind_greeting(runner: &mut Runner, calls: &Rc<RefCell<u32>>) {
    let calls = Rc::clone(calls);
    runner.bind(
        "greeting",
        0,
        true,
        Box::new(move |_: &[HostValue]| {
            *calls.borrow_mut() += 1;
            HostValue::Str("Hohooh".to_string())
        }),
    );
}

/// A two-line story whose second line opens with an external call, so the
/// call executes first under lookahead and again on the committed pass.
pub fn oracle_story() -> Arc<Story> {
    story(
        vec![
            lit_str("A"),
            Instr::Output,
            Instr::NewLine,
            Instr::BeginEval,
            Instr::CallExternal {
                name: "oracle".to_string(),
                args: 0,
            },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    )
}
