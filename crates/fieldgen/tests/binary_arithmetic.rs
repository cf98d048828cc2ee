mod common;

use common::{to_limbs, to_u128, Sampler};
use fieldgen::generate::{build_program, CheckPolicy, GenErrorKind};
use fieldgen::interp::{Arg, Machine};
use fieldgen::ir::ElemKind;
use fieldgen::model::{
    EncodingSpec, FieldDescriptor, GeneratorInput, LimbLayout, MultiplicationSpec, Polynomial,
};
use fieldgen_contracts::abi;
use num::{BigUint, One, Zero};

fn binary_field(n: u32, polynomial: &[u32]) -> GeneratorInput {
    GeneratorInput {
        field: FieldDescriptor::Binary {
            n,
            polynomial: Polynomial::Flat(polynomial.to_vec()),
        },
        limbs: LimbLayout {
            widths: Vec::new(),
            wordsize: 64,
        },
        encoding: EncodingSpec::default(),
        multiplication: MultiplicationSpec::default(),
    }
}

fn gf128() -> GeneratorInput {
    binary_field(128, &[128, 7, 2, 1, 0])
}

/// Schoolbook carry-less product reduced bit by bit modulo x^128 + x^7 + x^2 + x + 1.
fn gf128_mul(a: u128, b: u128) -> u128 {
    let (mut lo, mut hi) = (0u128, 0u128);
    for i in 0..128 {
        if (b >> i) & 1 == 1 {
            lo ^= a << i;
            if i > 0 {
                hi ^= a >> (128 - i);
            }
        }
    }
    for bit in (0..128).rev() {
        if (hi >> bit) & 1 == 1 {
            hi ^= 1 << bit;
            // x^(128+bit) = x^bit · (x^7 + x^2 + x + 1)
            for e in [7u32, 2, 1, 0] {
                let pos = bit + e;
                if pos >= 128 {
                    hi ^= 1 << (pos - 128);
                } else {
                    lo ^= 1 << pos;
                }
            }
        }
    }
    lo
}

/// Carry-less product of `a` and `b` reduced modulo the polynomial with the given
/// exponents (highest first).
fn clmul_mod(a: &BigUint, b: &BigUint, polynomial: &[u32]) -> BigUint {
    let n = u64::from(polynomial[0]);
    let modulus = polynomial
        .iter()
        .fold(BigUint::zero(), |acc, e| acc | (BigUint::one() << *e));
    let mut prod = BigUint::zero();
    for i in 0..b.bits() {
        if b.bit(i) {
            prod ^= a << i;
        }
    }
    for bit in (n..prod.bits()).rev() {
        if prod.bit(bit) {
            prod ^= &modulus << (bit - n);
        }
    }
    prod
}

fn sample(rng: &mut Sampler) -> u128 {
    (rng.next_u64() as u128) | ((rng.next_u64() as u128) << 64)
}

#[test]
fn reference_multiply_has_identity() {
    assert_eq!(gf128_mul(0xdead_beef, 1), 0xdead_beef);
    assert_eq!(gf128_mul(1 << 127, 2), 0x87);

    let mut rng = Sampler::new(3);
    for _ in 0..4 {
        let (a, b) = (sample(&mut rng), sample(&mut rng));
        let wide = clmul_mod(&BigUint::from(a), &BigUint::from(b), &[128, 7, 2, 1, 0]);
        assert_eq!(to_u128(&wide), gf128_mul(a, b));
    }
}

fn multiplies_like_the_reference(n: u32, polynomial: &[u32], seed: u64) {
    let input = binary_field(n, polynomial);
    let program = common::program(&input, CheckPolicy::Auto);
    let mut m = Machine::new(&program);
    // Two 64-bit lanes per 128-bit cell; an odd lane count leaves the last cell half used.
    let cells = vec![128u32; (n as usize).div_ceil(128)];
    let bound = BigUint::one() << n;
    let top = &bound - 1u32;
    let mut rng = Sampler::new(seed);
    let mut cases = vec![(top.clone(), top.clone()), (top.clone(), BigUint::one())];
    cases.extend((0..6).map(|_| (rng.below(&bound), rng.below(&bound))));
    for (a, b) in cases {
        let ea = m.alloc_elem(ElemKind::Single).expect("alloc");
        let eb = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.write_limbs(ea, ElemKind::Single, &to_limbs(&a, &cells))
            .expect("write");
        m.write_limbs(eb, ElemKind::Single, &to_limbs(&b, &cells))
            .expect("write");
        let want = to_limbs(&clmul_mod(&a, &b, polynomial), &cells);

        let res = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.call(abi::FIELD_MUL, &[Arg::Ptr(res), Arg::Ptr(ea), Arg::Ptr(eb)])
            .expect("mul");
        assert_eq!(m.read_limbs(res, ElemKind::Single).expect("read"), want, "{a:#x} * {b:#x}");

        let wide = m.alloc_elem(ElemKind::Double).expect("alloc");
        m.call(
            abi::FIELD_MUL_NO_CARRY,
            &[Arg::Ptr(wide), Arg::Ptr(ea), Arg::Ptr(eb)],
        )
        .expect("mul no carry");
        let folded = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.call(abi::CARRY_ROUND, &[Arg::Ptr(folded), Arg::Ptr(wide)])
            .expect("carry round");
        assert_eq!(m.read_limbs(folded, ElemKind::Single).expect("read"), want);

        let sq = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.call(abi::FIELD_SQR, &[Arg::Ptr(sq), Arg::Ptr(ea)])
            .expect("sqr");
        assert_eq!(
            m.read_limbs(sq, ElemKind::Single).expect("read"),
            to_limbs(&clmul_mod(&a, &a, polynomial), &cells)
        );
    }
}

#[test]
fn gf192_spans_an_odd_lane_count() {
    multiplies_like_the_reference(192, &[192, 7, 2, 1, 0], 192);
}

#[test]
fn gf256_spans_two_vectors() {
    multiplies_like_the_reference(256, &[256, 10, 5, 2, 0], 256);
}

#[test]
fn multiplication_matches_the_reference() {
    let input = gf128();
    let program = common::program(&input, CheckPolicy::Auto);
    let mut m = Machine::new(&program);
    let mut rng = Sampler::new(0x128);
    let mut cases = vec![(1u128 << 127, 1u128 << 127), (u128::MAX, u128::MAX)];
    cases.extend((0..16).map(|_| (sample(&mut rng), sample(&mut rng))));
    for (a, b) in cases {
        let ea = m.alloc_elem(ElemKind::Single).expect("alloc");
        let eb = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.write_limbs(ea, ElemKind::Single, &[a]).expect("write");
        m.write_limbs(eb, ElemKind::Single, &[b]).expect("write");

        let res = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.call(abi::FIELD_MUL, &[Arg::Ptr(res), Arg::Ptr(ea), Arg::Ptr(eb)])
            .expect("mul");
        assert_eq!(
            m.read_limbs(res, ElemKind::Single).expect("read"),
            vec![gf128_mul(a, b)],
            "{a:#x} * {b:#x}"
        );

        let sq = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.call(abi::FIELD_SQR, &[Arg::Ptr(sq), Arg::Ptr(ea)])
            .expect("sqr");
        assert_eq!(
            m.read_limbs(sq, ElemKind::Single).expect("read"),
            vec![gf128_mul(a, a)]
        );

        // Unreduced products accumulate by xor before a single fold.
        let wide = m.alloc_elem(ElemKind::Double).expect("alloc");
        m.call(
            abi::FIELD_MUL_NO_CARRY,
            &[Arg::Ptr(wide), Arg::Ptr(ea), Arg::Ptr(eb)],
        )
        .expect("mul no carry");
        let folded = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.call(abi::CARRY_ROUND, &[Arg::Ptr(folded), Arg::Ptr(wide)])
            .expect("carry round");
        assert_eq!(
            m.read_limbs(folded, ElemKind::Single).expect("read"),
            vec![gf128_mul(a, b)]
        );
    }
}

#[test]
fn addition_is_xor() {
    let input = gf128();
    let program = common::program(&input, CheckPolicy::Auto);
    let mut m = Machine::new(&program);
    let (a, b) = (0x0123_4567_89ab_cdefu128 << 40, 0xffff_0000_ffffu128);
    let ea = m.alloc_elem(ElemKind::Single).expect("alloc");
    let eb = m.alloc_elem(ElemKind::Single).expect("alloc");
    m.write_limbs(ea, ElemKind::Single, &[a]).expect("write");
    m.write_limbs(eb, ElemKind::Single, &[b]).expect("write");
    let res = m.alloc_elem(ElemKind::Single).expect("alloc");
    m.call(abi::FIELD_ADD, &[Arg::Ptr(res), Arg::Ptr(ea), Arg::Ptr(eb)])
        .expect("add");
    assert_eq!(m.read_limbs(res, ElemKind::Single).expect("read"), vec![a ^ b]);
}

#[test]
fn pack_round_trips_through_bytes() {
    let input = gf128();
    let program = common::program(&input, CheckPolicy::Auto);
    let mut m = Machine::new(&program);
    let x = 0x0f0e_0d0c_0b0a_0908_0706_0504_0302_0100u128;
    let e = m.alloc_elem(ElemKind::Single).expect("alloc");
    m.write_limbs(e, ElemKind::Single, &[x]).expect("write");
    let buf = m.alloc_bytes(16);
    m.call(abi::PACK_FIELD_ELEM, &[Arg::Ptr(buf), Arg::Ptr(e)])
        .expect("pack");
    assert_eq!(m.read_bytes(buf).expect("bytes"), x.to_le_bytes().to_vec());

    let back = m.alloc_elem(ElemKind::Single).expect("alloc");
    m.call(abi::UNPACK_FIELD_ELEM, &[Arg::Ptr(back), Arg::Ptr(buf)])
        .expect("unpack");
    assert_eq!(m.read_limbs(back, ElemKind::Single).expect("read"), vec![x]);
}

#[test]
fn oversized_encoding_is_rejected() {
    let mut input = gf128();
    input.encoding.blocksize = 16;
    input.encoding.byte = 1;
    let err = build_program(&input, &common::options(CheckPolicy::Auto)).expect_err("129 bits");
    assert_eq!(err.kind, GenErrorKind::EncodingIncompatibility);
}

#[test]
fn tower_polynomials_are_unsupported() {
    let mut input = gf128();
    input.field = FieldDescriptor::Binary {
        n: 128,
        polynomial: Polynomial::Nested(vec![vec![2, 1, 0], vec![64, 4, 3, 1, 0]]),
    };
    let err = build_program(&input, &common::options(CheckPolicy::Auto)).expect_err("tower");
    assert_eq!(err.kind, GenErrorKind::UnsupportedConfiguration);
}
