#![allow(dead_code)]

use fieldgen::generate::{build_program, CheckPolicy, GenerateOptions, TargetCaps};
use fieldgen::ir::Program;
use fieldgen::model::{
    EncodingSpec, FieldDescriptor, GeneratorInput, LimbLayout, MultiplicationSpec,
};
use num::{BigUint, One, Zero};

pub fn poly1305() -> GeneratorInput {
    crandall(130, 5, &[44, 44, 42], 64)
}

pub fn crandall(pi: u32, delta: u64, widths: &[u32], wordsize: u32) -> GeneratorInput {
    GeneratorInput {
        field: FieldDescriptor::CrandallPrime { pi, delta },
        limbs: LimbLayout {
            widths: widths.to_vec(),
            wordsize,
        },
        encoding: EncodingSpec::default(),
        multiplication: MultiplicationSpec::default(),
    }
}

pub fn mersenne127() -> GeneratorInput {
    GeneratorInput {
        field: FieldDescriptor::MersennePrime { pi: 127 },
        limbs: LimbLayout {
            widths: vec![44, 44, 39],
            wordsize: 64,
        },
        encoding: EncodingSpec {
            blocksize: 15,
            ..EncodingSpec::default()
        },
        multiplication: MultiplicationSpec::default(),
    }
}

pub fn options(check: CheckPolicy) -> GenerateOptions {
    GenerateOptions {
        check,
        max_fixpoint_iterations: None,
        caps: TargetCaps { clmul: true },
    }
}

pub fn program(input: &GeneratorInput, check: CheckPolicy) -> Program {
    build_program(input, &options(check))
        .expect("build program")
        .program
}

/// Splits `x` into limbs at the layout's bit offsets; the top limb keeps every
/// remaining bit.
pub fn to_limbs(x: &BigUint, widths: &[u32]) -> Vec<u128> {
    let mut rest = x.clone();
    let mut out = Vec::with_capacity(widths.len());
    for (i, w) in widths.iter().enumerate() {
        let part = if i + 1 == widths.len() {
            rest.clone()
        } else {
            &rest & ((BigUint::one() << *w) - 1u32)
        };
        out.push(to_u128(&part));
        rest >>= *w;
    }
    out
}

pub fn from_limbs(limbs: &[u128], widths: &[u32]) -> BigUint {
    let mut acc = BigUint::zero();
    let mut offset = 0u32;
    for (limb, w) in limbs.iter().zip(widths) {
        acc += BigUint::from(*limb) << offset;
        offset += w;
    }
    acc
}

pub fn to_u128(x: &BigUint) -> u128 {
    x.iter_u64_digits()
        .take(2)
        .enumerate()
        .fold(0u128, |acc, (i, d)| acc | ((d as u128) << (64 * i)))
}

pub fn le_bytes(x: &BigUint, len: usize) -> Vec<u8> {
    let mut bytes = x.to_bytes_le();
    bytes.resize(len, 0);
    bytes
}

/// xorshift64*, so every run samples the same operands.
pub struct Sampler(u64);

impl Sampler {
    pub fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    pub fn below(&mut self, bound: &BigUint) -> BigUint {
        let words = (bound.bits() as usize).div_ceil(64) + 1;
        let digits: Vec<u32> = (0..2 * words)
            .map(|_| self.next_u64() as u32)
            .collect();
        BigUint::new(digits) % bound
    }
}
