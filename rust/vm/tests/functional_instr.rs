//! Per-instruction behavior through whole-story execution.

use assert_matches::assert_matches;
use fable_story::{BinaryOp, Instr, ListDefs, Literal, UnaryOp};
use fable_vm::RuntimeError;

#[allow(dead_code, unreachable_pub)]
mod helpers;

use helpers::{lit_int, lit_str, runner, story, story_with_lists};

fn push(val: Literal) -> Instr {
    Instr::PushLiteral { val }
}

#[test]
fn evaluated_arithmetic_is_emitted_as_text() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_int(2),
            lit_int(3),
            Instr::BinOp { op: BinaryOp::Add },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    let mut r = runner(&s);
    assert_eq!(r.advance().unwrap(), "5\n");
    assert!(!r.can_continue());
}

#[test]
fn numeric_promotion_reaches_float() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_int(2),
            push(Literal::Float(0.5)),
            Instr::BinOp { op: BinaryOp::Add },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "2.5\n");
}

#[test]
fn whole_floats_print_without_fraction() {
    let s = story(
        vec![
            push(Literal::Float(16.0)),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "16\n");
}

#[test]
fn string_concat_coerces_numbers() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_str("foo"),
            lit_int(3),
            Instr::BinOp { op: BinaryOp::Add },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "foo3\n");
}

#[test]
fn string_equality_compares_content() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_str("abc"),
            lit_str("abc"),
            Instr::BinOp { op: BinaryOp::Eq },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "true\n");
}

#[test]
fn divert_if_takes_branch_on_truth() {
    let s = story(
        vec![
            push(Literal::Bool(true)),
            Instr::DivertIf { target: 1 },
            lit_str("bad"),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
            // skip:
            lit_str("good"),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0), ("skip", 6)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "good\n");
}

#[test]
fn tunnel_call_returns_to_caller() {
    let s = story(
        vec![
            lit_str("a"),
            Instr::Output,
            Instr::TunnelCall { target: 1 },
            lit_str("c"),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
            // tun:
            lit_str("b"),
            Instr::Output,
            Instr::TunnelReturn,
        ],
        &[("main", 0), ("tun", 7)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "abc\n");
}

#[test]
fn function_temps_do_not_leak_across_frames() {
    let s = story(
        vec![
            lit_int(1),
            Instr::StoreTemp {
                name: "t".to_string(),
            },
            Instr::BeginEval,
            Instr::FunctionCall { target: 1 },
            Instr::EndEval,
            Instr::Output,
            Instr::BeginEval,
            Instr::ReadTemp {
                name: "t".to_string(),
            },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
            // f: shadows t locally, returns it
            lit_int(2),
            Instr::StoreTemp {
                name: "t".to_string(),
            },
            Instr::ReadTemp {
                name: "t".to_string(),
            },
            Instr::FunctionReturn,
        ],
        &[("main", 0), ("f", 12)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "21\n");
}

#[test]
fn visit_counts_are_readable() {
    let s = story(
        vec![
            Instr::Visit { path: 0 },
            Instr::BeginEval,
            Instr::ReadCount { path: 0 },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "1\n");
}

#[test]
fn sequence_clamps_to_last_element() {
    // counter 5 against 3 elements selects index 2
    let s = story(
        vec![
            Instr::BeginEval,
            lit_int(5),
            lit_int(3),
            Instr::Sequence,
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "2\n");
}

#[test]
fn shuffle_is_deterministic_per_seed() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_int(0),
            lit_int(4),
            Instr::Shuffle,
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    let mut a = runner(&s);
    a.set_seed(7);
    let mut b = runner(&s);
    b.set_seed(7);
    let line = a.advance().unwrap();
    assert_eq!(line, b.advance().unwrap());
    let index: i32 = line.trim().parse().unwrap();
    assert!((0..4).contains(&index));
}

#[test]
fn negate_and_not() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_int(5),
            Instr::UnOp {
                op: UnaryOp::Negate,
            },
            Instr::EndEval,
            Instr::Output,
            Instr::BeginEval,
            push(Literal::Bool(false)),
            Instr::UnOp { op: UnaryOp::Not },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_eq!(runner(&s).advance().unwrap(), "-5true\n");
}

#[test]
fn list_union_renders_in_rank_order() {
    let mut defs = ListDefs::default();
    defs.push(
        "colors",
        vec![
            ("red".to_string(), 1),
            ("green".to_string(), 2),
            ("blue".to_string(), 3),
        ],
    );
    let s = story_with_lists(
        vec![
            Instr::BeginEval,
            push(Literal::List(vec!["colors.blue".to_string()])),
            push(Literal::List(vec!["red".to_string()])),
            Instr::BinOp { op: BinaryOp::Add },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
        defs,
        Vec::new(),
    );
    assert_eq!(runner(&s).advance().unwrap(), "red, blue\n");
}

#[test]
fn stack_underflow_is_story_corruption() {
    let s = story(vec![Instr::Output, Instr::End], &[("main", 0)]);
    assert_matches!(
        runner(&s).advance(),
        Err(RuntimeError::StoryCorruption(_))
    );
}

#[test]
fn incompatible_operands_are_a_type_mismatch() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_str("a"),
            lit_int(1),
            Instr::BinOp { op: BinaryOp::Sub },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_matches!(
        runner(&s).advance(),
        Err(RuntimeError::TypeMismatch { .. })
    );
}

#[test]
fn division_by_zero_is_story_corruption() {
    let s = story(
        vec![
            Instr::BeginEval,
            lit_int(1),
            lit_int(0),
            Instr::BinOp { op: BinaryOp::Div },
            Instr::EndEval,
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_matches!(
        runner(&s).advance(),
        Err(RuntimeError::StoryCorruption(_))
    );
}

#[test]
fn glue_joins_adjacent_lines() {
    let s = story(
        vec![
            lit_str("A"),
            Instr::Output,
            Instr::NewLine,
            Instr::Glue,
            lit_str("B"),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    let mut r = runner(&s);
    assert_eq!(r.advance().unwrap(), "AB\n");
    assert!(!r.can_continue());
}

#[test]
fn tags_attach_to_their_line() {
    let s = story(
        vec![
            Instr::Tag {
                text: "mood:dark".to_string(),
            },
            lit_str("A grim day."),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    let mut r = runner(&s);
    assert_eq!(r.advance().unwrap(), "A grim day.\n");
    assert_eq!(r.line_tags(), ["mood:dark".to_string()]);
}

#[test]
fn get_all_concatenates_the_transcript() {
    let s = story(
        vec![
            lit_str("one"),
            Instr::Output,
            Instr::NewLine,
            lit_str("two"),
            Instr::Output,
            Instr::NewLine,
            Instr::End,
        ],
        &[("main", 0)],
    );
    assert_eq!(runner(&s).get_all().unwrap(), "one\ntwo\n");
}
