//! Behavioural properties of the dispatcher
//!
//! Each test drives a whole interpreter through `Interpreter` and compares
//! operand stacks, so the properties hold independently of how the loop
//! is arranged internally.

use psi_core::{ErrorCode, SpecialOp, Value};
use psi_runtime::operators::OP_ESTACK_UNDERFLOW;
use psi_runtime::{InterpConfig, Interpreter};

fn run(config: InterpConfig, src: &str) -> Interpreter {
    let mut interp = Interpreter::new(config);
    if let Err(e) = interp.run_string(src) {
        panic!("{} failed: {}", src, e);
    }
    interp
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&i| Value::integer(i)).collect()
}

// =============================================================================
// Literals
// =============================================================================

#[test]
fn test_literal_in_procedure_is_pushed_unchanged() {
    let mut interp = Interpreter::new(InterpConfig::default());
    let ctx = interp.context_mut();
    let name = Value::name(ctx.names.intern(b"lit"));
    let string = ctx.alloc_string(b"text".to_vec());
    let array = ctx.alloc_array(ints(&[1, 2])).unwrap();
    let dict = ctx.alloc_dict(4);
    let literals = [
        Value::integer(-17),
        Value::real(2.5),
        Value::boolean(true),
        Value::NULL,
        Value::mark(),
        name,
        string,
        array,
        dict,
    ];

    for v in literals {
        let proc = interp.context_mut().alloc_proc(vec![v]).unwrap();
        interp.run(proc).unwrap();
        assert_eq!(interp.ostack_values(), vec![v], "executing [{:?}]", v);
        interp.context_mut().ostack.clear();
    }
}

#[test]
fn test_nesting_depth_is_bounded_by_stacks_only() {
    let depth = 3000;
    let config = InterpConfig {
        max_ostack: 4000,
        ..Default::default()
    };
    let mut interp = Interpreter::new(config);
    let ctx = interp.context_mut();
    let exec = Value::exec_name(ctx.names.intern(b"exec"));

    // P0 = { 0 }, Pk = { Pk-1 exec k }: every level keeps a continuation.
    let mut proc = ctx.alloc_proc(ints(&[0])).unwrap();
    for k in 1..=depth {
        proc = ctx.alloc_proc(vec![proc, exec, Value::integer(k)]).unwrap();
    }
    interp.run(proc).unwrap();

    let expected: Vec<i64> = (0..=depth).collect();
    assert_eq!(interp.ostack_values(), ints(&expected));
    assert!(interp.stats().estack_growths > 0);
    assert!(interp.stats().ostack_growths > 0);
}

// =============================================================================
// Fast path
// =============================================================================

/// Run `op` on the operands `setup` leaves, inline or as a plain operator.
fn run_operator(op: SpecialOp, setup: &str, inline: bool) -> Vec<Value> {
    let mut interp = run(InterpConfig::default(), setup);
    let special = if inline { Some(op) } else { None };
    interp.run(Value::operator(op.index(), special)).unwrap();
    interp.ostack_values()
}

#[test]
fn test_fast_path_matches_external_call() {
    let cases: Vec<(SpecialOp, &str, Vec<Value>)> = vec![
        (SpecialOp::Add, "2 3", ints(&[5])),
        (SpecialOp::Add, "1 0.5", vec![Value::real(1.5)]),
        (SpecialOp::Def, "/k 7", vec![]),
        (SpecialOp::Dup, "5", ints(&[5, 5])),
        (SpecialOp::Exch, "1 2", ints(&[2, 1])),
        (SpecialOp::If, "false { 1 }", vec![]),
        (SpecialOp::If, "true { 1 }", ints(&[1])),
        (SpecialOp::IfElse, "false { 1 } { 2 }", ints(&[2])),
        (SpecialOp::Index, "10 20 30 1", ints(&[10, 20, 30, 20])),
        (SpecialOp::Pop, "1 2", ints(&[1])),
        (SpecialOp::Roll, "1 2 3 3 1", ints(&[3, 1, 2])),
        (SpecialOp::Sub, "2 5", ints(&[-3])),
    ];

    for (op, setup, expected) in cases {
        let inline = run_operator(op, setup, true);
        let external = run_operator(op, setup, false);
        assert_eq!(inline, external, "{:?} on {}", op, setup);
        assert_eq!(inline, expected, "{:?} on {}", op, setup);
    }
}

#[test]
fn test_renamed_operator_keeps_fast_path() {
    let interp = run(
        InterpConfig::default(),
        "/mydup /dup load def /myadd /add load def 5 mydup 4 myadd",
    );
    assert_eq!(interp.ostack_values(), ints(&[5, 9]));
    assert_eq!(interp.stats().fast_ops, 2);
}

// =============================================================================
// Stack growth
// =============================================================================

#[test]
fn test_operand_stack_grows_past_one_block() {
    let block = 50;
    let config = InterpConfig {
        ostack_block: block,
        ..Default::default()
    };
    let src: Vec<String> = (1..=block as i64 + 1).map(|i| i.to_string()).collect();
    let interp = run(config, &src.join(" "));

    let expected: Vec<i64> = (1..=block as i64 + 1).collect();
    assert_eq!(interp.ostack_values(), ints(&expected));
    assert_eq!(interp.stats().ostack_growths, 1);
}

#[test]
fn test_procedure_push_survives_growth() {
    let config = InterpConfig {
        ostack_block: 3,
        ..Default::default()
    };
    let interp = run(config, "1 2 3 { 4 } exec");
    assert_eq!(interp.ostack_values(), ints(&[1, 2, 3, 4]));
}

#[test]
fn test_estack_underflow_absorbed_by_lower_block() {
    let config = InterpConfig {
        estack_block: 8,
        ..Default::default()
    };
    let interp = run(
        config,
        "/sum { dup 0 eq { } { dup 1 sub sum add } ifelse } def 200 sum",
    );
    assert_eq!(interp.ostack_values(), ints(&[20100]));
    assert!(interp.stats().estack_growths > 0);
    assert!(interp.stats().block_pops > 0);
}

#[test]
fn test_estack_underflow_without_lower_block_is_genuine() {
    let mut interp = Interpreter::new(InterpConfig::default());
    let err = interp
        .run(Value::operator(OP_ESTACK_UNDERFLOW, None))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ExecStackUnderflow);
    assert_eq!(interp.stats().errors_handled, 0);
}

// =============================================================================
// Protected calls
// =============================================================================

const OPARRAY_SETUP: &str = "/myop /myop { 1 2 3 5 dict begin nosuch } .makeoperator def ";

#[test]
fn test_oparray_restores_stacks_on_unhandled_error() {
    let mut interp = Interpreter::new(InterpConfig::default());
    interp.run_string(OPARRAY_SETUP).unwrap();
    let err = interp.run_string("10 myop").unwrap_err();
    assert_eq!(err.code, ErrorCode::Undefined);
    assert_eq!(interp.ostack_values(), ints(&[10]));
    assert_eq!(interp.context().dstack.count(), 2);
}

#[test]
fn test_oparray_restores_stacks_under_stopped() {
    let src = format!("{}10 {{ myop }} stopped countdictstack", OPARRAY_SETUP);
    let interp = run(InterpConfig::default(), &src);
    assert_eq!(
        interp.ostack_values(),
        vec![Value::integer(10), Value::boolean(true), Value::integer(2)]
    );
}

#[test]
fn test_unprotected_oparray_keeps_its_pushes() {
    let src = "/myop /myop { false .setstackprotect 1 2 nosuch } .makeoperator def \
               10 { myop } stopped";
    let interp = run(InterpConfig::default(), src);
    assert_eq!(
        interp.ostack_values(),
        vec![
            Value::integer(10),
            Value::integer(1),
            Value::integer(2),
            Value::boolean(true)
        ]
    );
}

#[test]
fn test_errorexec_restores_stacks_and_names_object() {
    let mut interp = run(
        InterpConfig::default(),
        "10 { { 1 2 3 5 dict begin nosuch } /myobj .errorexec } stopped countdictstack \
         $error /command get",
    );
    let myobj = Value::name(interp.context_mut().names.intern(b"myobj"));
    assert_eq!(
        interp.ostack_values(),
        vec![
            Value::integer(10),
            Value::boolean(true),
            Value::integer(2),
            myobj
        ]
    );
}

#[test]
fn test_errorexec_unhandled_reports_chosen_object() {
    let mut interp = Interpreter::new(InterpConfig::default());
    let err = interp
        .run_string("10 { 1 2 nosuch } /myobj .errorexec")
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Undefined);
    assert_eq!(err.object, "myobj");
    assert_eq!(interp.ostack_values(), ints(&[10]));
}

// =============================================================================
// Collection and packing
// =============================================================================

const GC_PROGRAM: &str = "/acc 0 def \
    1 1 200 { /acc exch acc add def (garbage) pop 5 array pop } for \
    acc [ 1 2 3 ] length (hello) length 10 array length";

#[test]
fn test_collection_every_checkpoint_changes_nothing() {
    let quiet = run(InterpConfig::default(), GC_PROGRAM);
    let busy = run(
        InterpConfig {
            gc_every_slice: true,
            time_slice: 3,
            ..Default::default()
        },
        GC_PROGRAM,
    );

    assert_eq!(quiet.ostack_values(), ints(&[20100, 3, 5, 10]));
    assert_eq!(busy.ostack_values(), quiet.ostack_values());
    assert_eq!(quiet.stats().collections, 0);
    assert!(busy.stats().collections > 10);
}

#[test]
fn test_packed_and_expanded_bodies_agree() {
    let mut packed = Interpreter::new(InterpConfig::default());
    let mut expanded = Interpreter::new(InterpConfig::default());

    let mut results = Vec::new();
    for (interp, pack) in [(&mut packed, true), (&mut expanded, false)] {
        let ctx = interp.context_mut();
        let mul = ctx.ops.find("mul").unwrap();
        let body = vec![
            Value::integer(3),
            Value::name(ctx.names.intern(b"x")),
            Value::exec_name(ctx.names.intern(b"pop")),
            Value::integer(4),
            Value::operator(SpecialOp::Add.index(), Some(SpecialOp::Add)),
            Value::exec_name(ctx.names.intern(b"dup")),
            ctx.ops.operator_value(mul),
        ];
        let proc = if pack {
            ctx.alloc_packed(body).unwrap().cvx()
        } else {
            ctx.alloc_array(body).unwrap().cvx()
        };
        interp.run(proc).unwrap();
        results.push(interp.ostack_values());
    }
    assert_eq!(results[0], ints(&[49]));
    assert_eq!(results[0], results[1]);
}

#[test]
fn test_setpacking_scans_equivalent_procedures() {
    let src = "{ 1 /a exch def a a add 3 { 2 mul } repeat } exec";
    let plain = run(InterpConfig::default(), src);
    let packed = run(
        InterpConfig::default(),
        &format!("true setpacking {}", src),
    );
    assert_eq!(plain.ostack_values(), ints(&[16]));
    assert_eq!(packed.ostack_values(), plain.ostack_values());
}
