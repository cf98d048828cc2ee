//! Small fixed cases for each field family.

mod common;

use common::{from_limbs, to_limbs};
use fieldgen::generate::CheckPolicy;
use fieldgen::interp::{Arg, Machine};
use fieldgen::ir::ElemKind;
use fieldgen::model::{
    EncodingSpec, FieldDescriptor, GeneratorInput, LimbLayout, MultiplicationSpec, Polynomial,
};
use fieldgen_contracts::abi;
use num::BigUint;

fn prime_laws(input: &GeneratorInput) {
    let program = common::program(input, CheckPolicy::Always);
    let mut m = Machine::new(&program);
    let widths = &input.limbs.widths;
    let p = input.field.modulus().expect("prime field");
    let elem = |m: &mut Machine, x: &BigUint| {
        let obj = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.write_limbs(obj, ElemKind::Single, &to_limbs(x, widths))
            .expect("write");
        obj
    };
    let zero = elem(&mut m, &BigUint::from(0u8));
    let one = elem(&mut m, &BigUint::from(1u8));
    let p_minus_one = elem(&mut m, &(&p - 1u32));

    for (a, b, want) in [(zero, zero, 0u8), (one, one, 1)] {
        let res = m.alloc_elem(ElemKind::Single).expect("alloc");
        let status = m
            .call(abi::FIELD_MUL_REDUCE, &[Arg::Ptr(res), Arg::Ptr(a), Arg::Ptr(b)])
            .expect("mul");
        assert_eq!(status, 0);
        let limbs = m.read_limbs(res, ElemKind::Single).expect("read");
        assert_eq!(from_limbs(&limbs, widths), BigUint::from(want));
    }

    let res = m.alloc_elem(ElemKind::Single).expect("alloc");
    m.call(
        abi::FIELD_ADD_REDUCE,
        &[Arg::Ptr(res), Arg::Ptr(p_minus_one), Arg::Ptr(one)],
    )
    .expect("add");
    let limbs = m.read_limbs(res, ElemKind::Single).expect("read");
    assert_eq!(limbs, vec![0; widths.len()]);
    assert_eq!(m.checks_failed(), 0);
}

#[test]
fn crandall_130_5() {
    prime_laws(&common::poly1305());
}

#[test]
fn mersenne_127() {
    prime_laws(&common::mersenne127());
}

#[test]
fn gf2_128_folds_past_the_degree() {
    let input = GeneratorInput {
        field: FieldDescriptor::Binary {
            n: 128,
            polynomial: Polynomial::Flat(vec![128, 7, 2, 1, 0]),
        },
        limbs: LimbLayout {
            widths: Vec::new(),
            wordsize: 64,
        },
        encoding: EncodingSpec::default(),
        multiplication: MultiplicationSpec::default(),
    };
    let program = common::program(&input, CheckPolicy::Auto);
    let mut m = Machine::new(&program);
    let cases = [(1u128, 1u128, 1u128), (2, 2, 4), (1 << 64, 1 << 64, 0x87)];
    for (a, b, want) in cases {
        let ea = m.alloc_elem(ElemKind::Single).expect("alloc");
        let eb = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.write_limbs(ea, ElemKind::Single, &[a]).expect("write");
        m.write_limbs(eb, ElemKind::Single, &[b]).expect("write");
        let res = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.call(abi::FIELD_MUL, &[Arg::Ptr(res), Arg::Ptr(ea), Arg::Ptr(eb)])
            .expect("mul");
        assert_eq!(
            m.read_limbs(res, ElemKind::Single).expect("read"),
            vec![want],
            "{a:#x} * {b:#x}"
        );
    }
}

#[test]
fn precomputed_factor_times_one() {
    let mut input = common::poly1305();
    input.multiplication.precompute = true;
    let program = common::program(&input, CheckPolicy::Always);
    let mut m = Machine::new(&program);
    let widths = &input.limbs.widths;
    let ones: Vec<u128> = widths.iter().map(|w| (1u128 << w) - 1).collect();
    let p = input.field.modulus().expect("prime field");

    let factor = m.alloc_elem(ElemKind::Single).expect("alloc");
    m.write_limbs(factor, ElemKind::Single, &ones).expect("write");
    let table = m.alloc_elem(ElemKind::Precomputed).expect("alloc");
    m.call(abi::PRECOMPUTE_FACTOR, &[Arg::Ptr(table), Arg::Ptr(factor)])
        .expect("precompute");

    let one = m.alloc_elem(ElemKind::Single).expect("alloc");
    m.write_limbs(one, ElemKind::Single, &to_limbs(&BigUint::from(1u8), widths))
        .expect("write");
    let res = m.alloc_elem(ElemKind::Single).expect("alloc");
    m.call(
        abi::FIELD_MUL_PRECOMPUTED_REDUCE,
        &[Arg::Ptr(res), Arg::Ptr(one), Arg::Ptr(table)],
    )
    .expect("mul");
    let got = from_limbs(&m.read_limbs(res, ElemKind::Single).expect("read"), widths);
    assert_eq!(got, from_limbs(&ones, widths) % p);
    assert_eq!(m.checks_failed(), 0);
}
