mod common;

use std::ops::{BitAnd, BitOr, BitXor};

use common::{Asm, ints, run_both};
use luaot::{
    Value,
    bytecode::{Constant, Instruction, Prototype, asm},
    exec::Tm,
};
use proptest::prelude::*;

/// `local a, b = ...; return a <op> b`
fn binary(lhs: Constant, rhs: Constant, op: fn(u8, u8, u8) -> Instruction, event: Tm) -> Prototype {
    let mut m = Asm::main().stack(3);
    let (lhs, rhs) = (m.k(lhs), m.k(rhs));
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::loadk(0, lhs))
        .op(asm::loadk(1, rhs));
    m.at(2)
        .op(op(2, 0, 1))
        .op(asm::mmbin(0, 1, event as u8))
        .op(asm::return_(2, 2, 1, false));
    m.finish()
}

fn int_binary(a: i64, b: i64, op: fn(u8, u8, u8) -> Instruction, event: Tm) -> Prototype {
    binary(Constant::Int(a), Constant::Int(b), op, event)
}

const WRAPPING: [(fn(u8, u8, u8) -> Instruction, Tm, fn(i64, i64) -> i64); 6] = [
    (asm::add, Tm::Add, i64::wrapping_add),
    (asm::sub, Tm::Sub, i64::wrapping_sub),
    (asm::mul, Tm::Mul, i64::wrapping_mul),
    (asm::band, Tm::BAnd, BitAnd::bitand),
    (asm::bor, Tm::BOr, BitOr::bitor),
    (asm::bxor, Tm::BXor, BitXor::bitxor),
];

#[test]
fn integer_overflow_wraps() {
    for (op, event, reference) in WRAPPING {
        for (a, b) in [(i64::MAX, 1), (i64::MIN, -1), (i64::MIN, i64::MAX), (-1, -1)] {
            let run = run_both(&int_binary(a, b, op, event));
            assert_eq!(run.values(), &ints(&[reference(a, b)])[..], "{event:?} {a} {b}");
            assert_eq!(run.stats.fallbacks, 0);
        }
    }
}

#[test]
fn floor_division_and_modulo() {
    let cases = [(7, 2, 3, 1), (-7, 2, -4, 1), (7, -2, -4, -1), (i64::MIN, -1, i64::MIN, 0)];
    for (a, b, q, r) in cases {
        let run = run_both(&int_binary(a, b, asm::idiv, Tm::IDiv));
        assert_eq!(run.values(), &ints(&[q])[..], "{a} // {b}");
        let run = run_both(&int_binary(a, b, asm::mod_, Tm::Mod));
        assert_eq!(run.values(), &ints(&[r])[..], "{a} % {b}");
    }
}

#[test]
fn integer_division_by_zero() {
    let run = run_both(&int_binary(1, 0, asm::idiv, Tm::IDiv));
    assert_eq!(run.error(), "test.lua:2: attempt to perform 'n//0'");
    let run = run_both(&int_binary(1, 0, asm::mod_, Tm::Mod));
    assert_eq!(run.error(), "test.lua:2: attempt to perform 'n%0'");
}

#[test]
fn mixed_operands_promote_to_float() {
    let run = run_both(&binary(Constant::Int(1), Constant::Float(0.5), asm::add, Tm::Add));
    assert_eq!(run.values(), [Value::Float(1.5)]);
    let run = run_both(&int_binary(1, 2, asm::div, Tm::Div));
    assert_eq!(run.values(), [Value::Float(0.5)]);
    let run = run_both(&int_binary(2, 3, asm::pow, Tm::Pow));
    assert!(matches!(run.values(), [Value::Float(f)] if *f == 8.0));
    assert_eq!(run.stats.fallbacks, 0);
}

#[test]
fn numeric_strings_go_through_the_fallback_once() {
    let main = binary(Constant::Str("10".into()), Constant::Int(1), asm::add, Tm::Add);
    let run = run_both(&main);
    assert_eq!(run.values(), &ints(&[11])[..]);
    assert_eq!(run.stats.fallbacks, 1);

    let main = binary(Constant::Str("ten".into()), Constant::Int(1), asm::sub, Tm::Sub);
    let run = run_both(&main);
    assert_eq!(run.error(), "test.lua:2: attempt to perform arithmetic on a string value");
    assert_eq!(run.stats.fallbacks, 1);
}

#[test]
fn bitwise_on_fractional_floats() {
    let main = binary(Constant::Float(1.5), Constant::Int(1), asm::band, Tm::BAnd);
    let run = run_both(&main);
    assert_eq!(run.error(), "test.lua:2: number has no integer representation");
    assert_eq!(run.stats.fallbacks, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn integer_arithmetic_matches_the_host(a in any::<i64>(), b in any::<i64>(), which in 0usize..6) {
        let (op, event, reference) = WRAPPING[which];
        let run = run_both(&int_binary(a, b, op, event));
        prop_assert_eq!(run.values(), &ints(&[reference(a, b)])[..]);
        prop_assert_eq!(run.stats.fallbacks, 0);
    }
}
