#![allow(clippy::unwrap_used, clippy::panic)]

use anyhow::{Context as _, Result};
use strata_bytecode::{Literal, Op, Opcode, SourceMap};
use strata_compiler::{
    Annotation, CompileErrorType, Compiler, Config, LoweringError, OptimizeOptions,
};
use strata_dsl::{ExprId, Program, Tracker};
use test_log::test;

fn enabled() -> Tracker {
    Config::from_json(r#"{"provenance": {"enabled": true}}"#)
        .unwrap()
        .tracker()
}

fn three_fives(tracker: Tracker) -> (Program, ExprId) {
    let mut p = Program::new(tracker);
    let a = p.int(5);
    let b = p.int(5);
    let c = p.int(5);
    let ab = p.op(Opcode::Add, [a, b]);
    let root = p.op(Opcode::Add, [ab, c]);
    (p, root)
}

#[test]
fn test_repeated_literal_is_pooled_once() -> Result<()> {
    let (p, root) = three_fives(Tracker::disabled());
    let prog = Compiler::new(&p, root).compile()?;
    assert_eq!(prog.pool, vec![Literal::Int(5)]);
    let refs = prog
        .instructions
        .iter()
        .filter(|i| i.op == Op::Const(0))
        .count();
    assert_eq!(refs, 3);
    assert!(!prog.instructions.iter().any(|i| matches!(i.op, Op::Push(_))));
    Ok(())
}

#[test]
fn test_subroutine_emitted_once() -> Result<()> {
    let mut p = Program::new(Tracker::disabled());
    let double = p.declare_subroutine("double", 1, true);
    let x = p.params(double)[0];
    let a = p.load(x);
    let b = p.load(x);
    let body = p.op(Opcode::Add, [a, b]);
    p.define_subroutine(double, body)?;
    let one = p.int(1);
    let first = p.call(double, [one]);
    let two = p.int(2);
    let second = p.call(double, [two]);
    let root = p.op(Opcode::Add, [first, second]);

    let (graph, _) = Compiler::new(&p, root).compile_to_graph()?;
    assert_eq!(graph.subroutines.len(), 1);

    let prog = Compiler::new(&p, root).compile()?;
    let calls: Vec<_> = prog
        .instructions
        .iter()
        .filter_map(|i| match i.op {
            Op::Call(target) => Some(target),
            _ => None,
        })
        .collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
    let retsubs = prog
        .instructions
        .iter()
        .filter(|i| i.op == Op::Retsub)
        .count();
    assert_eq!(retsubs, 1);
    let adds = prog
        .instructions
        .iter()
        .filter(|i| i.op == Op::Basic(Opcode::Add))
        .count();
    // One in the body, one joining the two calls.
    assert_eq!(adds, 2);
    Ok(())
}

#[test]
fn test_source_map_needs_provenance() -> Result<()> {
    let (p, root) = three_fives(Tracker::disabled());
    let err = Compiler::new(&p, root)
        .compile_with_source_map()
        .unwrap_err();
    match err.err_type() {
        CompileErrorType::SourceMapUnavailable { hint } => {
            assert!(hint.contains("provenance.enabled"));
            assert!(hint.contains("STRATA_PROVENANCE"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let (p, root) = three_fives(enabled());
    let out = Compiler::new(&p, root).compile_with_source_map()?;
    let map = out.source_map.source_map();
    assert!(!map.sources.is_empty());
    assert!(map.sources.iter().any(|s| s.ends_with("scenarios.rs")));
    assert_eq!(map.lines().len(), out.program.len());
    assert_eq!(out.source_map.len(), out.program.len());
    Ok(())
}

#[test]
fn test_source_map_json_round_trip() -> Result<()> {
    let (p, root) = three_fives(enabled());
    let out = Compiler::new(&p, root).compile_with_source_map()?;
    let json = out.source_map.to_json();
    assert!(json.starts_with(r#"{"version":3,"sources":["#));
    assert!(json.contains(r#""names":[]"#));
    let decoded = SourceMap::from_json(&json)?;
    assert_eq!(&decoded, out.source_map.source_map());
    assert_eq!(decoded.to_json(), json);
    Ok(())
}

#[test]
fn test_every_line_attributed_to_this_file() -> Result<()> {
    let (p, root) = three_fives(enabled());
    let out = Compiler::new(&p, root).compile_with_source_map()?;
    for line in 0..out.program.len() {
        let frame = out
            .source_map
            .attribution(line)
            .with_context(|| format!("line {line} has no attribution"))?;
        assert!(!frame.is_internal());
        let file = frame.file().context("frame has a file")?;
        assert!(file.ends_with("tests/scenarios.rs"), "{}", file.display());
    }
    let text = out.source_map.render(Annotation::Source);
    assert_eq!(text.lines().count(), out.program.len());
    assert!(text.lines().all(|l| l.contains("scenarios.rs")));
    Ok(())
}

#[test]
fn test_provenance_does_not_change_output() -> Result<()> {
    for constant_pooling in [false, true] {
        for scratch_slots in [false, true] {
            let options = OptimizeOptions {
                constant_pooling,
                scratch_slots,
            };
            let (off, off_root) = three_fives(Tracker::disabled());
            let (on, on_root) = three_fives(enabled());
            let without = Compiler::new(&off, off_root).optimize(options).compile()?;
            let with = Compiler::new(&on, on_root)
                .optimize(options)
                .compile_with_source_map()?;
            assert_eq!(without.text(), with.program.text(), "{options:?}");
        }
    }
    Ok(())
}

#[test]
fn test_lowering_error_points_at_construction() -> Result<()> {
    let mut p = Program::new(enabled());
    let c = p.int(1);
    let t = p.int(2);
    let (root, line) = (p.if_then(c, t), line!());
    let err = Compiler::new(&p, root).compile().unwrap_err();
    assert!(matches!(
        err.err_type(),
        CompileErrorType::Lowering(LoweringError::MissingElseValue)
    ));
    let source = err.source_location().context("error has a location")?;
    assert!(source.file.ends_with("scenarios.rs"));
    assert_eq!(source.line, line);
    assert!(source.excerpt.contains("p.if_then(c, t)"));
    assert!(err.to_string().contains(&format!("scenarios.rs:{line}:")));
    Ok(())
}

#[test]
fn test_lowering_error_without_provenance_has_no_location() {
    let mut p = Program::new(Tracker::disabled());
    let c = p.int(1);
    let t = p.int(2);
    let root = p.if_then(c, t);
    let err = Compiler::new(&p, root).compile().unwrap_err();
    assert!(err.source_location().is_none());
    assert_eq!(err.to_string(), "`if` without `else` cannot yield a value");
}
