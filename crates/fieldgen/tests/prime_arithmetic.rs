mod common;

use common::{from_limbs, le_bytes, to_limbs, Sampler};
use fieldgen::generate::{build_program, CheckPolicy};
use fieldgen::interp::{Arg, Machine, ObjRef};
use fieldgen::ir::{ElemKind, Program};
use fieldgen::model::{EncodingMode, GeneratorInput, Placement};
use fieldgen_contracts::abi;
use num::{BigUint, One};

struct Field<'p> {
    m: Machine<'p>,
    widths: Vec<u32>,
    p: BigUint,
}

impl<'p> Field<'p> {
    fn new(program: &'p Program, input: &GeneratorInput) -> Self {
        Self {
            m: Machine::new(program),
            widths: input.limbs.widths.clone(),
            p: input.field.modulus().expect("prime field"),
        }
    }

    fn elem(&mut self, x: &BigUint) -> ObjRef {
        let obj = self.m.alloc_elem(ElemKind::Single).expect("alloc");
        let limbs = to_limbs(x, &self.widths);
        self.m
            .write_limbs(obj, ElemKind::Single, &limbs)
            .expect("write limbs");
        obj
    }

    fn raw(&mut self, limbs: &[u128]) -> ObjRef {
        let obj = self.m.alloc_elem(ElemKind::Single).expect("alloc");
        self.m
            .write_limbs(obj, ElemKind::Single, limbs)
            .expect("write limbs");
        obj
    }

    fn blank(&mut self, kind: ElemKind) -> ObjRef {
        self.m.alloc_elem(kind).expect("alloc")
    }

    fn limbs(&self, obj: ObjRef, kind: ElemKind) -> Vec<u128> {
        self.m.read_limbs(obj, kind).expect("read limbs")
    }

    fn value(&self, obj: ObjRef) -> BigUint {
        from_limbs(&self.limbs(obj, ElemKind::Single), &self.widths)
    }

    fn call(&mut self, name: &str, args: &[ObjRef]) -> u128 {
        let args: Vec<Arg> = args.iter().map(|o| Arg::Ptr(*o)).collect();
        self.m.call(name, &args).expect(name)
    }

    fn reduced(&mut self, obj: ObjRef) -> BigUint {
        let out = self.blank(ElemKind::Single);
        assert_eq!(self.call(abi::REDUCE, &[out, obj]), 0);
        self.value(out)
    }

    fn assert_canonical(&self, obj: ObjRef) {
        let limbs = self.limbs(obj, ElemKind::Single);
        for (limb, w) in limbs.iter().zip(&self.widths) {
            assert!(*limb < 1u128 << w, "limb {limb:#x} exceeds {w} bits");
        }
        assert!(self.value(obj) < self.p);
    }
}

fn multiplies_modulo_p(input: &GeneratorInput, check: CheckPolicy, seed: u64) {
    let program = common::program(input, check);
    let mut f = Field::new(&program, input);
    let mut rng = Sampler::new(seed);
    for _ in 0..24 {
        let a = rng.below(&f.p);
        let b = rng.below(&f.p);
        let (ea, eb) = (f.elem(&a), f.elem(&b));

        let prod = f.blank(ElemKind::Single);
        assert_eq!(f.call(abi::FIELD_MUL, &[prod, ea, eb]), 0);
        assert_eq!(&f.value(prod) % &f.p, (&a * &b) % &f.p);

        let canon = f.blank(ElemKind::Single);
        assert_eq!(f.call(abi::FIELD_MUL_REDUCE, &[canon, ea, eb]), 0);
        f.assert_canonical(canon);
        assert_eq!(f.value(canon), (&a * &b) % &f.p);

        let sq = f.blank(ElemKind::Single);
        assert_eq!(f.call(abi::FIELD_SQR_REDUCE, &[sq, ea]), 0);
        assert_eq!(f.value(sq), (&a * &a) % &f.p);

        let sum = f.blank(ElemKind::Single);
        assert_eq!(f.call(abi::FIELD_ADD_REDUCE, &[sum, ea, eb]), 0);
        assert_eq!(f.value(sum), (&a + &b) % &f.p);
    }
    assert_eq!(f.m.checks_failed(), 0);
}

#[test]
fn poly1305_multiplication_checked() {
    multiplies_modulo_p(&common::poly1305(), CheckPolicy::Always, 0x1305);
}

#[test]
fn poly1305_multiplication_unchecked() {
    multiplies_modulo_p(&common::poly1305(), CheckPolicy::Never, 0x5031);
}

#[test]
fn mersenne127_multiplication() {
    multiplies_modulo_p(&common::mersenne127(), CheckPolicy::Always, 127);
}

#[test]
fn wide_limbs_take_double_width_carries() {
    let input = common::crandall(124, 5, &[62, 62], 64);
    let out = build_program(&input, &common::options(CheckPolicy::Never)).expect("build");
    let carry = out.report.carry.expect("carry flags");
    assert!(carry.doublecarry && carry.doublecarry_temp && carry.doublecarryover);
    multiplies_modulo_p(&input, CheckPolicy::Never, 62);
    multiplies_modulo_p(&input, CheckPolicy::Always, 0x6262);
}

#[test]
fn thirty_two_bit_words() {
    let input = common::crandall(130, 5, &[26, 26, 26, 26, 26], 32);
    multiplies_modulo_p(&input, CheckPolicy::Always, 26);
    multiplies_modulo_p(&input, CheckPolicy::Never, 32);
}

#[test]
fn curve25519_radix_51() {
    let input = common::crandall(255, 19, &[51, 51, 51, 51, 51], 64);
    multiplies_modulo_p(&input, CheckPolicy::Never, 25519);
    multiplies_modulo_p(&input, CheckPolicy::Always, 19);
}

#[test]
fn limbs_wider_than_the_field() {
    // 132 limb bits over π = 130: products past π fold back as 20 = δ·2^2.
    let input = common::crandall(130, 5, &[44, 44, 44], 64);
    multiplies_modulo_p(&input, CheckPolicy::Always, 132);
    multiplies_modulo_p(&input, CheckPolicy::Never, 44);

    let program = common::program(&input, CheckPolicy::Always);
    let mut f = Field::new(&program, &input);
    let full: Vec<u128> = input.limbs.widths.iter().map(|w| (1u128 << w) - 1).collect();
    let x = from_limbs(&full, &input.limbs.widths);
    let e = f.raw(&full);
    let out = f.reduced(e);
    assert_eq!(out, &x % &f.p);
    assert_eq!(f.m.checks_failed(), 0);
}

#[test]
fn maximal_limbs_never_trip_a_check() {
    for input in [common::poly1305(), common::mersenne127()] {
        let program = common::program(&input, CheckPolicy::Always);
        let mut f = Field::new(&program, &input);
        let full: Vec<u128> = input.limbs.widths.iter().map(|w| (1u128 << w) - 1).collect();
        let x = from_limbs(&full, &input.limbs.widths);
        let (a, b) = (f.raw(&full), f.raw(&full));

        let prod = f.blank(ElemKind::Single);
        assert_eq!(f.call(abi::FIELD_MUL, &[prod, a, b]), 0);
        assert_eq!(&f.value(prod) % &f.p, (&x * &x) % &f.p);

        let wide = f.blank(ElemKind::Double);
        assert_eq!(f.call(abi::FIELD_MUL_NO_CARRY, &[wide, a, b]), 0);
        let carried = f.blank(ElemKind::Single);
        assert_eq!(f.call(abi::CARRY_ROUND, &[carried, wide]), 0);
        assert_eq!(&f.value(carried) % &f.p, (&x * &x) % &f.p);

        // The product of two carried elements is still in range.
        let again = f.blank(ElemKind::Single);
        assert_eq!(f.call(abi::FIELD_MUL, &[again, prod, carried]), 0);
        assert_eq!(f.m.checks_failed(), 0, "{}", input.field.describe());
    }
}

#[test]
fn reduce_is_canonical_and_idempotent() {
    let input = common::poly1305();
    let program = common::program(&input, CheckPolicy::Always);
    let mut f = Field::new(&program, &input);
    let p = f.p.clone();
    let two_130 = BigUint::one() << 130u32;
    let cases = [
        (BigUint::from(0u8), BigUint::from(0u8)),
        (&p - 1u32, &p - 1u32),
        (p.clone(), BigUint::from(0u8)),
        (&p + 1u32, BigUint::one()),
        (&two_130 - 1u32, BigUint::from(4u8)),
    ];
    for (x, want) in cases {
        let e = f.elem(&x);
        let once = f.blank(ElemKind::Single);
        assert_eq!(f.call(abi::REDUCE, &[once, e]), 0);
        f.assert_canonical(once);
        assert_eq!(f.value(once), want, "reduce({x})");
        assert_eq!(f.reduced(once), want, "reduce twice ({x})");
    }
}

#[test]
fn pack_and_unpack_agree_with_little_endian_bytes() {
    let input = common::poly1305();
    let program = common::program(&input, CheckPolicy::Never);
    let mut f = Field::new(&program, &input);
    let mut rng = Sampler::new(7);
    let words = 3usize;
    for _ in 0..8 {
        let x = rng.below(&f.p);
        let e = f.elem(&x);
        let buf = f.m.alloc_bytes(words * 8);
        f.m.call(abi::PACK_FIELD_ELEM, &[Arg::Ptr(buf), Arg::Ptr(e)])
            .expect("pack");
        assert_eq!(f.m.read_bytes(buf).expect("bytes"), le_bytes(&x, words * 8));

        let back = f.blank(ElemKind::Single);
        f.m.call(abi::UNPACK_FIELD_ELEM, &[Arg::Ptr(back), Arg::Ptr(buf)])
            .expect("unpack");
        assert_eq!(f.limbs(back, ElemKind::Single), to_limbs(&x, &f.widths));
    }
}

#[test]
fn explicit_encoding_passes_through_the_transform() {
    let input = common::poly1305();
    assert_eq!(input.encoding.mode, EncodingMode::Explicit);
    let program = common::program(&input, CheckPolicy::Never);
    let mut f = Field::new(&program, &input);
    let msg: Vec<u8> = (1..=16).collect();
    let a = f.m.alloc_bytes(16);
    f.m.write_bytes(a, &msg).expect("write");
    let res = f.blank(ElemKind::Single);
    f.m.call(abi::UNPACK_AND_ENCODE_FIELD_ELEM, &[Arg::Ptr(res), Arg::Ptr(a)])
        .expect("encode");
    assert_eq!(f.value(res), BigUint::from_bytes_le(&msg));
}

fn poly1305_implicit() -> GeneratorInput {
    let mut input = common::poly1305();
    input.encoding.mode = EncodingMode::Implicit;
    input.encoding.byte = 1;
    input.encoding.key_clamp = Some("0ffffffc0ffffffc0ffffffc0fffffff".to_string());
    input
}

fn encodes_high(input: &GeneratorInput) {
    let program = common::program(input, CheckPolicy::Always);
    let mut f = Field::new(&program, input);
    let msg: Vec<u8> = (0..16).map(|i| 0xf0 ^ i).collect();
    let a = f.m.alloc_bytes(16);
    f.m.write_bytes(a, &msg).expect("write");

    let full = f.blank(ElemKind::Single);
    f.m.call(abi::UNPACK_AND_ENCODE_FIELD_ELEM, &[Arg::Ptr(full), Arg::Ptr(a)])
        .expect("encode");
    let want = BigUint::from_bytes_le(&msg) + (BigUint::one() << 128u32);
    assert_eq!(f.value(full), want);

    let last = f.blank(ElemKind::Single);
    f.m.call(
        abi::UNPACK_AND_ENCODE_LAST_FIELD_ELEM,
        &[Arg::Ptr(last), Arg::Ptr(a), Arg::Int(16)],
    )
    .expect("encode last");
    assert_eq!(f.value(last), want);

    let short = f.blank(ElemKind::Single);
    f.m.call(
        abi::UNPACK_AND_ENCODE_LAST_FIELD_ELEM,
        &[Arg::Ptr(short), Arg::Ptr(a), Arg::Int(5)],
    )
    .expect("encode short");
    let want = BigUint::from_bytes_le(&msg[..5]) + (BigUint::one() << 40u32);
    assert_eq!(f.value(short), want);
    assert_eq!(f.m.checks_failed(), 0);
}

#[test]
fn implicit_encoding_appends_the_byte_above_the_message() {
    encodes_high(&poly1305_implicit());
}

#[test]
fn implicit_encoding_on_thirty_two_bit_limbs() {
    // 2^128 lands in bit 24 of the fifth 26-bit limb.
    let mut input = common::crandall(130, 5, &[26, 26, 26, 26, 26], 32);
    input.encoding = poly1305_implicit().encoding;
    encodes_high(&input);
}

#[test]
fn low_placement_shifts_the_message_above_the_byte() {
    let mut input = poly1305_implicit();
    input.encoding.placement = Placement::Low;
    let program = common::program(&input, CheckPolicy::Always);
    let mut f = Field::new(&program, &input);
    let msg: Vec<u8> = (0..16).map(|i| 0x8f ^ (i * 7)).collect();
    let a = f.m.alloc_bytes(16);
    f.m.write_bytes(a, &msg).expect("write");

    let full = f.blank(ElemKind::Single);
    f.m.call(abi::UNPACK_AND_ENCODE_FIELD_ELEM, &[Arg::Ptr(full), Arg::Ptr(a)])
        .expect("encode");
    let want = (BigUint::from_bytes_le(&msg) << 1u32) + 1u32;
    assert_eq!(f.value(full), want);

    let short = f.blank(ElemKind::Single);
    f.m.call(
        abi::UNPACK_AND_ENCODE_LAST_FIELD_ELEM,
        &[Arg::Ptr(short), Arg::Ptr(a), Arg::Int(5)],
    )
    .expect("encode short");
    let want = (BigUint::from_bytes_le(&msg[..5]) << 1u32) + 1u32;
    assert_eq!(f.value(short), want);
    assert_eq!(f.m.checks_failed(), 0);
}

#[test]
fn unpack_key_applies_the_clamp() {
    let input = poly1305_implicit();
    let program = common::program(&input, CheckPolicy::Never);
    let mut f = Field::new(&program, &input);
    let key = [0xffu8; 16];
    let a = f.m.alloc_bytes(24);
    f.m.write_bytes(a, &key).expect("write");
    let res = f.blank(ElemKind::Single);
    f.m.call(abi::UNPACK_KEY, &[Arg::Ptr(res), Arg::Ptr(a)])
        .expect("unpack key");
    let clamp = BigUint::parse_bytes(b"0ffffffc0ffffffc0ffffffc0fffffff", 16).expect("hex");
    assert_eq!(f.value(res), clamp);
}

#[test]
fn precomputed_tables_match_plain_multiplication() {
    let mut input = common::poly1305();
    input.multiplication.precompute = true;
    let program = common::program(&input, CheckPolicy::Always);
    let mut f = Field::new(&program, &input);
    let mut rng = Sampler::new(99);
    for _ in 0..8 {
        let a = rng.below(&f.p);
        let b = rng.below(&f.p);
        let (ea, eb) = (f.elem(&a), f.elem(&b));
        let table = f.blank(ElemKind::Precomputed);
        assert_eq!(f.call(abi::PRECOMPUTE_FACTOR, &[table, eb]), 0);

        let plain = f.blank(ElemKind::Single);
        let pre = f.blank(ElemKind::Single);
        f.call(abi::FIELD_MUL, &[plain, ea, eb]);
        f.call(abi::FIELD_MUL_PRECOMPUTED, &[pre, ea, table]);
        assert_eq!(
            f.limbs(pre, ElemKind::Single),
            f.limbs(plain, ElemKind::Single)
        );

        let canon = f.blank(ElemKind::Single);
        f.call(abi::FIELD_MUL_PRECOMPUTED_REDUCE, &[canon, ea, table]);
        assert_eq!(f.value(canon), (&a * &b) % &f.p);

        let sq = f.blank(ElemKind::Single);
        f.call(abi::FIELD_SQR_PRECOMPUTED_REDUCE, &[sq, table]);
        assert_eq!(f.value(sq), (&b * &b) % &f.p);
    }
    assert_eq!(f.m.checks_failed(), 0);
}
