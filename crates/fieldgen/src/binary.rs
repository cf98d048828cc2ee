//! Binary fields GF(2^n) on 128-bit carry-less multiply.
//!
//! An element of n = 64·L bits is L little-endian 64-bit lanes packed two per
//! `__m128i`. A double-width element holds the 2n-bit product: the low half in vectors
//! `0..V`, the high half in `V..2V`. Reduction folds the high half through the trinomial
//! or pentanomial x^n + Σ x^e + 1; every middle exponent must be at most 32 so the
//! second fold stays inside lane 0.

use fieldgen_contracts::abi;

use crate::generate::{GenError, GenErrorKind};
use crate::ir::{CType, ElemKind, Expr, FunctionDef, Item, Program, TypeDecl};
use crate::language;
use crate::model::{EncodingMode, EncodingSpec, Placement, Polynomial};
use crate::protocol::{self, FnBuilder, Operation};

const MAX_MIDDLE_EXPONENT: u32 = 32;

#[derive(Debug, Clone)]
pub struct BinaryGen {
    n: u32,
    /// Exponents strictly between n and 0, highest first.
    middle: Vec<u32>,
    encoding: EncodingSpec,
}

impl BinaryGen {
    pub fn new(n: u32, polynomial: &Polynomial, encoding: EncodingSpec) -> Result<Self, GenError> {
        let unsupported = |message: String| GenError::new(GenErrorKind::UnsupportedConfiguration, message);
        if n == 0 || n % 64 != 0 {
            return Err(unsupported(format!(
                "binary field degree must be a positive multiple of 64, got {n}"
            )));
        }
        let Some(exps) = polynomial.single_level() else {
            return Err(unsupported(format!(
                "tower fields with {} polynomial levels are not supported",
                polynomial.levels()
            )));
        };
        let well_formed = exps.len() >= 3
            && exps.first() == Some(&n)
            && exps.last() == Some(&0)
            && exps.windows(2).all(|w| w[0] > w[1]);
        if !well_formed {
            return Err(unsupported(format!(
                "polynomial {exps:?} must list decreasing exponents from {n} down to 0"
            )));
        }
        let middle = exps[1..exps.len() - 1].to_vec();
        if let Some(e) = middle.iter().find(|e| **e > MAX_MIDDLE_EXPONENT) {
            return Err(unsupported(format!(
                "polynomial exponent {e} exceeds {MAX_MIDDLE_EXPONENT}; the reduction needs a second fold"
            )));
        }
        if encoding.mode == EncodingMode::Implicit && encoding.placement == Placement::Low {
            return Err(unsupported(
                "binary fields only place the encoding byte above the message".to_string(),
            ));
        }
        Ok(Self {
            n,
            middle,
            encoding,
        })
    }

    pub fn middle_exponents(&self) -> &[u32] {
        &self.middle
    }

    fn lanes(&self) -> usize {
        (self.n / 64) as usize
    }

    fn vecs(&self) -> usize {
        self.lanes().div_ceil(2)
    }

    fn bytes(&self) -> usize {
        (self.n / 8) as usize
    }

    pub fn emit_prologue(&self, program: &mut Program) -> Result<(), GenError> {
        let header = format!(
            "Arithmetic in GF(2^{}) modulo x^{}{} + 1 over {} 64-bit lanes.\nGenerated by {}; do not edit.",
            self.n,
            self.n,
            self.middle
                .iter()
                .map(|e| format!(" + x^{e}"))
                .collect::<String>(),
            self.lanes(),
            language::GENERATOR_ID
        );
        protocol::emit_common_prologue(
            program,
            &header,
            &["inttypes.h", "stddef.h", "string.h", "emmintrin.h", "wmmintrin.h"],
            &self.encoding,
        );
        protocol::define(program, "BUFFWORDS", self.lanes() as u128, false);
        protocol::define(program, "BUFFSIZE", self.bytes() as u128, true);
        protocol::define(program, "DEGREE", self.n as u128, false);
        protocol::define(program, "WORDSIZE", 64, false);
        program.push(Item::Blank);
        for (kind, dims) in [(ElemKind::Single, self.vecs()), (ElemKind::Double, 2 * self.vecs())] {
            let suffix = if kind == ElemKind::Single { "single" } else { "double" };
            program.push(Item::Type(TypeDecl::Elem {
                tag: format!("gf2_{}_{suffix}", self.n),
                kind,
                cell: CType::Vec128,
                dims: vec![dims],
            }));
        }
        program.push(Item::Blank);
        Ok(())
    }

    pub fn emit(&self, op: Operation) -> Result<Option<Vec<FunctionDef>>, GenError> {
        let fns = match op {
            Operation::Carry => vec![self.carry_round()?, self.copy(abi::CARRY_ROUND_SINGLE)?],
            Operation::Reduce => vec![self.copy(abi::REDUCE)?],
            Operation::Mul => vec![self.field_mul(abi::FIELD_MUL, false)?],
            Operation::MulNoCarry => vec![self.mul_no_carry(abi::FIELD_MUL_NO_CARRY, false)?],
            Operation::MulReduce => vec![self.forward(abi::FIELD_MUL_REDUCE, abi::FIELD_MUL, false)?],
            Operation::Sqr => vec![self.field_mul(abi::FIELD_SQR, true)?],
            Operation::SqrNoCarry => vec![self.mul_no_carry(abi::FIELD_SQR_NO_CARRY, true)?],
            Operation::SqrReduce => vec![self.forward(abi::FIELD_SQR_REDUCE, abi::FIELD_SQR, true)?],
            Operation::Add | Operation::AddReduce => {
                let name = if op == Operation::Add {
                    abi::FIELD_ADD
                } else {
                    abi::FIELD_ADD_REDUCE
                };
                vec![self.xor(name, [ElemKind::Single; 3])?]
            }
            Operation::AddMix => vec![self.xor(
                abi::FIELD_ADD_MIX,
                [ElemKind::Double, ElemKind::Double, ElemKind::Single],
            )?],
            Operation::AddDbl => vec![self.xor(abi::FIELD_ADD_DBL, [ElemKind::Double; 3])?],
            Operation::Pack => vec![self.pack()?],
            Operation::Unpack => vec![self.unpack(abi::UNPACK_FIELD_ELEM, self.bytes())?],
            Operation::UnpackKey => vec![self.unpack(
                abi::UNPACK_KEY,
                self.encoding.keysize.min(self.bytes()),
            )?],
            Operation::UnpackAndEncode => vec![self.unpack_and_encode(false)?],
            Operation::UnpackAndEncodeLast => vec![self.unpack_and_encode(true)?],
        };
        Ok(Some(fns))
    }

    fn binary_fn(&self, name: &str, kinds: &[ElemKind]) -> FnBuilder {
        let mut b = FnBuilder::new(name, false).param(CType::elem_ptr(kinds[0]), "res");
        for (kind, pname) in kinds[1..].iter().zip(["a", "b"]) {
            b = b.param(CType::elem_ptr(*kind), pname);
        }
        b
    }

    /// Carry-less product of `a` and `b` (or the square of `a`), written as 2V vectors
    /// through `dst`.
    fn emit_product(&self, b: &mut FnBuilder, square: bool, dst: &dyn Fn(usize) -> Expr) {
        let lanes = self.lanes();
        let v = self.vecs();
        let acc = 2 * lanes - 1;
        b.decl_array(CType::Vec128, "d", acc, false);
        for q in 0..acc {
            b.set(Expr::at("d", q), Expr::call("_mm_setzero_si128", vec![]));
        }
        let rhs = if square { "a" } else { "b" };
        for i in 0..lanes {
            for j in 0..lanes {
                if square && i != j {
                    continue;
                }
                let imm = (i % 2) | ((j % 2) << 4);
                b.xor_assign(
                    Expr::at("d", i + j),
                    Expr::call(
                        "_mm_clmulepi64_si128",
                        vec![
                            Expr::limb("a", i / 2),
                            Expr::limb(rhs, j / 2),
                            Expr::lit(imm as u128),
                        ],
                    ),
                );
            }
        }
        let lane = |q: usize| -> Expr {
            let low = (q < acc).then(|| Expr::call("_mm_move_epi64", vec![Expr::at("d", q)]));
            let high = (q > 0).then(|| {
                Expr::call("_mm_bsrli_si128", vec![Expr::at("d", q - 1), Expr::lit(8)])
            });
            match (low, high) {
                (Some(l), Some(h)) => l.xor(h),
                (Some(l), None) => l,
                (None, Some(h)) => h,
                (None, None) => Expr::call("_mm_setzero_si128", vec![]),
            }
        };
        for half in 0..2 {
            for k in 0..v {
                let first = half * lanes + 2 * k;
                let second = if 2 * k + 1 < lanes {
                    lane(first + 1)
                } else {
                    Expr::call("_mm_setzero_si128", vec![])
                };
                b.set(
                    dst(half * v + k),
                    Expr::call("_mm_unpacklo_epi64", vec![lane(first), second]),
                );
            }
        }
    }

    /// Folds the high half `hi(k)` into the low half `lo(k)`, writing `res`.
    fn emit_fold(
        &self,
        b: &mut FnBuilder,
        lo: &dyn Fn(usize) -> Expr,
        hi: &dyn Fn(usize) -> Expr,
        res: &str,
    ) {
        let lanes = self.lanes();
        let v = self.vecs();
        let hi_lane = |m: usize| -> Expr {
            if m % 2 == 0 {
                hi(m / 2)
            } else {
                Expr::call("_mm_bsrli_si128", vec![hi(m / 2), Expr::lit(8)])
            }
        };
        b.decl_array(CType::Vec128, "r", v, false);
        b.decl_array(CType::Vec128, "t", v, false);
        b.decl_array(CType::Vec128, "h", v, false);
        for k in 0..v {
            let rot = |q: usize| hi_lane((q + lanes - 1) % lanes);
            let second = if 2 * k + 1 < lanes {
                rot(2 * k + 1)
            } else {
                Expr::call("_mm_setzero_si128", vec![])
            };
            b.set(
                Expr::at("r", k),
                Expr::call("_mm_unpacklo_epi64", vec![rot(2 * k), second]),
            );
        }
        for k in 0..v {
            let spill = self
                .middle
                .iter()
                .map(|e| {
                    Expr::call(
                        "_mm_srli_epi64",
                        vec![Expr::at("r", k), Expr::lit((64 - e) as u128)],
                    )
                })
                .reduce(Expr::xor)
                .unwrap_or_else(|| Expr::call("_mm_setzero_si128", vec![]));
            b.set(Expr::at("t", k), spill);
            b.set(Expr::at("h", k), hi(k));
        }
        b.xor_assign(
            Expr::at("h", 0),
            Expr::call("_mm_move_epi64", vec![Expr::at("t", 0)]),
        );
        for k in 0..v {
            b.set(
                Expr::limb(res, k),
                lo(k).xor(hi(k)).xor(Expr::at("t", k)),
            );
        }
        for k in 0..v {
            for e in &self.middle {
                b.xor_assign(
                    Expr::limb(res, k),
                    Expr::call("_mm_slli_epi64", vec![Expr::at("h", k), Expr::lit(*e as u128)]),
                );
            }
        }
    }

    fn carry_round(&self) -> Result<FunctionDef, GenError> {
        let v = self.vecs();
        let mut b = self.binary_fn(abi::CARRY_ROUND, &[ElemKind::Single, ElemKind::Double]);
        self.emit_fold(&mut b, &|k| Expr::limb("a", k), &|k| Expr::limb("a", v + k), "res");
        b.finish()
    }

    /// Elements are always fully reduced, so these routines only copy.
    fn copy(&self, name: &str) -> Result<FunctionDef, GenError> {
        let mut b = self.binary_fn(name, &[ElemKind::Single, ElemKind::Single]);
        for k in 0..self.vecs() {
            b.set(Expr::limb("res", k), Expr::limb("a", k));
        }
        b.finish()
    }

    fn field_mul(&self, name: &str, square: bool) -> Result<FunctionDef, GenError> {
        let v = self.vecs();
        let kinds: &[ElemKind] = if square {
            &[ElemKind::Single, ElemKind::Single]
        } else {
            &[ElemKind::Single; 3]
        };
        let mut b = self.binary_fn(name, kinds);
        b.decl_array(CType::Vec128, "p", 2 * v, false);
        self.emit_product(&mut b, square, &|k| Expr::at("p", k));
        self.emit_fold(&mut b, &|k| Expr::at("p", k), &|k| Expr::at("p", v + k), "res");
        b.finish()
    }

    fn mul_no_carry(&self, name: &str, square: bool) -> Result<FunctionDef, GenError> {
        let kinds: &[ElemKind] = if square {
            &[ElemKind::Double, ElemKind::Single]
        } else {
            &[ElemKind::Double, ElemKind::Single, ElemKind::Single]
        };
        let mut b = self.binary_fn(name, kinds);
        self.emit_product(&mut b, square, &|k| Expr::limb("res", k));
        b.finish()
    }

    fn forward(&self, name: &str, target: &str, square: bool) -> Result<FunctionDef, GenError> {
        let mut args = vec![Expr::var("res"), Expr::var("a")];
        let kinds: &[ElemKind] = if square {
            &[ElemKind::Single, ElemKind::Single]
        } else {
            args.push(Expr::var("b"));
            &[ElemKind::Single; 3]
        };
        let mut b = self.binary_fn(name, kinds);
        b.call(target, args);
        b.finish()
    }

    fn xor(&self, name: &str, kinds: [ElemKind; 3]) -> Result<FunctionDef, GenError> {
        let v = self.vecs();
        let width = |kind: ElemKind| if kind == ElemKind::Double { 2 * v } else { v };
        let mut b = self.binary_fn(name, &kinds);
        for k in 0..width(kinds[0]) {
            let value = if k < width(kinds[2]) {
                Expr::limb("a", k).xor(Expr::limb("b", k))
            } else {
                Expr::limb("a", k)
            };
            b.set(Expr::limb("res", k), value);
        }
        b.finish()
    }

    fn pack(&self) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(abi::PACK_FIELD_ELEM, false)
            .param(CType::ptr(CType::Uint(64)), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a");
        b.call_void(
            "memcpy",
            vec![Expr::var("res"), Expr::var("a"), Expr::lit(self.bytes() as u128)],
        );
        b.finish()
    }

    fn unpack(&self, name: &str, bytes: usize) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(name, false)
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::ptr(CType::Uint(64)), "a");
        b.call_void(
            "memset",
            vec![
                Expr::var("res"),
                Expr::lit(0),
                Expr::SizeOf(CType::Elem(ElemKind::Single)),
            ],
        );
        b.call_void(
            "memcpy",
            vec![Expr::var("res"), Expr::var("a"), Expr::lit(bytes as u128)],
        );
        b.finish()
    }

    fn unpack_and_encode(&self, last: bool) -> Result<FunctionDef, GenError> {
        let enc = &self.encoding;
        if enc.mode == EncodingMode::Explicit {
            return protocol::explicit_unpack_and_encode(false, 64, self.lanes(), last);
        }
        let name = if last {
            abi::UNPACK_AND_ENCODE_LAST_FIELD_ELEM
        } else {
            abi::UNPACK_AND_ENCODE_FIELD_ELEM
        };
        let v = self.vecs();
        let mut b = FnBuilder::new(name, false)
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::ptr(CType::Uint(8)), "a");
        if last {
            b = b.param(CType::Size, "size");
        }
        let len = if last {
            Expr::var("size")
        } else {
            Expr::konst("BLOCKSIZE")
        };
        b.decl_array(CType::Uint(64), "m", 2 * v, true);
        b.call_void("memcpy", vec![Expr::var("m"), Expr::var("a"), len]);

        let has_byte = enc.byte != 0;
        if last && has_byte {
            b.open_if(Expr::var("size").less_than(Expr::konst("BLOCKSIZE")));
            b.set(
                Expr::index(
                    Expr::var("m").cast(CType::ptr(CType::Uint(8))),
                    Expr::var("size"),
                ),
                Expr::lit(enc.byte as u128),
            );
            b.close()?;
        }
        if has_byte && (last || !enc.encode_last_only) {
            let pos = enc.blocksize * 8;
            if last {
                b.open_if(Expr::var("size").equals(Expr::konst("BLOCKSIZE")));
            }
            b.or_assign(
                Expr::at("m", pos / 64),
                Expr::lit((enc.byte as u128) << (pos % 64)),
            );
            if last {
                b.close()?;
            }
        }

        for k in 0..v {
            let words = Expr::call(
                "_mm_set_epi64x",
                vec![Expr::at("m", 2 * k + 1), Expr::at("m", 2 * k)],
            );
            let (lo_mask, hi_mask) = (enc.limb_mask(2 * k), enc.limb_mask(2 * k + 1));
            let value = if lo_mask == u64::MAX && hi_mask == u64::MAX {
                words
            } else {
                Expr::call(
                    "_mm_and_si128",
                    vec![
                        Expr::call(
                            "_mm_set_epi64x",
                            vec![Expr::lit(hi_mask as u128), Expr::lit(lo_mask as u128)],
                        ),
                        words,
                    ],
                )
            };
            b.set(Expr::limb("res", k), value);
        }
        b.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gf128() -> BinaryGen {
        BinaryGen::new(
            128,
            &Polynomial::Flat(vec![128, 7, 2, 1, 0]),
            EncodingSpec::default(),
        )
        .expect("generator")
    }

    #[test]
    fn pentanomial_keeps_middle_exponents() {
        let g = gf128();
        assert_eq!(g.middle_exponents(), &[7, 2, 1]);
        assert_eq!(g.vecs(), 1);
    }

    #[test]
    fn malformed_polynomials_are_rejected() {
        for poly in [vec![128, 7, 2, 1], vec![127, 1, 0], vec![128, 1, 2, 0], vec![128, 40, 0]] {
            let err = BinaryGen::new(128, &Polynomial::Flat(poly.clone()), EncodingSpec::default())
                .expect_err("bad polynomial");
            assert_eq!(err.kind, GenErrorKind::UnsupportedConfiguration, "{poly:?}");
        }
        let tower = Polynomial::Nested(vec![vec![2, 1, 0], vec![64, 4, 3, 1, 0]]);
        assert!(BinaryGen::new(128, &tower, EncodingSpec::default()).is_err());
    }

    #[test]
    fn squaring_skips_cross_products() {
        let g = gf128();
        let f = g.field_mul(abi::FIELD_SQR, true).expect("sqr");
        let clmuls = format!("{:?}", f.body).matches("_mm_clmulepi64_si128").count();
        assert_eq!(clmuls, 2);
        let f = g.field_mul(abi::FIELD_MUL, false).expect("mul");
        let clmuls = format!("{:?}", f.body).matches("_mm_clmulepi64_si128").count();
        assert_eq!(clmuls, 4);
    }
}
