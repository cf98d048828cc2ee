//! Arithmetic modulo Crandall primes p = 2^π − δ.
//!
//! Elements are arrays of limbs whose widths sum to at least π. Multiplication folds
//! every product past bit π back down as δ·2^shift, so reduction mod p happens inside
//! the multiply; `carry_round` then feeds the top carry back into limb 0 the same way.

use fieldgen_contracts::abi;

use crate::bounds::ProductMap;
use crate::generate::{GenError, GenErrorKind};
use crate::ir::{CType, ElemKind, Expr, FunctionDef, Item, Program, TypeDecl};
use crate::language;
use crate::mersenne;
use crate::model::{low_mask, CarryWidth, EncodingMode, EncodingSpec, LimbLayout, Placement};
use crate::protocol::{self, FnBuilder, Operation};

/// How folded terms and the top carry are scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Folding {
    /// Multiply by δ·2^shift.
    Scaled,
    /// δ = 1: shift only.
    Shifted,
}

#[derive(Debug, Clone)]
pub struct PrimeParams {
    pub pi: u32,
    pub delta: u64,
    pub layout: LimbLayout,
    pub encoding: EncodingSpec,
    pub carry: CarryWidth,
    pub checked: bool,
    pub map: ProductMap,
}

/// Where a multiplication reads its second operand from.
#[derive(Clone, Copy)]
pub(crate) enum Operands<'a> {
    Plain { a: &'a str, b: &'a str },
    Table { a: &'a str, table: &'a str },
}

#[derive(Debug, Clone)]
pub struct CrandallGen {
    pub(crate) p: PrimeParams,
    pub(crate) folding: Folding,
}

impl CrandallGen {
    pub fn new(p: PrimeParams) -> Result<Self, GenError> {
        Self::with_folding(p, Folding::Scaled)
    }

    pub(crate) fn with_folding(p: PrimeParams, folding: Folding) -> Result<Self, GenError> {
        let offsets = p.layout.offsets();
        let top_bits = p.pi - offsets[p.layout.numlimbs() - 1];
        if top_bits + 2 > p.layout.wordsize {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                format!(
                    "top limb holds {top_bits} field bits, leaving no sign bit in a {}-bit word",
                    p.layout.wordsize
                ),
            ));
        }
        Ok(Self { p, folding })
    }

    pub fn params(&self) -> &PrimeParams {
        &self.p
    }

    pub(crate) fn n(&self) -> usize {
        self.p.layout.numlimbs()
    }

    pub(crate) fn wordsize(&self) -> u32 {
        self.p.layout.wordsize
    }

    pub(crate) fn int_t(&self) -> CType {
        CType::Uint(self.wordsize())
    }

    pub(crate) fn long_t(&self) -> CType {
        CType::Uint(2 * self.wordsize())
    }

    fn width(&self, i: usize) -> u32 {
        self.p.layout.widths[i]
    }

    fn mask(&self, i: usize) -> Expr {
        Expr::lit(self.p.layout.mask(i) as u128)
    }

    /// Field bits held by the top limb: π − offset_top.
    fn top_bits(&self) -> u32 {
        self.p.pi - self.p.layout.offsets()[self.n() - 1]
    }

    pub(crate) fn buff_words(&self) -> usize {
        self.p.pi.div_ceil(self.wordsize()) as usize
    }

    fn message_words(&self) -> usize {
        ((self.p.encoding.blocksize as u32) * 8 + 8).div_ceil(self.wordsize()) as usize
    }

    fn carry_t(&self) -> CType {
        if self.p.carry.doublecarry {
            self.long_t()
        } else {
            self.int_t()
        }
    }

    /// The feedback path runs in double width if either the carry or its scaled value
    /// can leave the word.
    fn feedback_is_long(&self) -> bool {
        self.p.carry.doublecarryover || self.p.carry.doublecarry
    }

    fn temp_t(&self) -> CType {
        if self.p.carry.doublecarry_temp {
            self.long_t()
        } else {
            self.int_t()
        }
    }

    pub(crate) fn header(&self, field: &str) -> String {
        format!(
            "Arithmetic modulo {field} over {} limbs {:?} of {}-bit words.\nGenerated by {}; do not edit.",
            self.n(),
            self.p.layout.widths,
            self.wordsize(),
            language::GENERATOR_ID
        )
    }

    pub fn emit_prologue(&self, program: &mut Program) -> Result<(), GenError> {
        let field = format!("2^{}-{}", self.p.pi, self.p.delta);
        self.emit_constants(program, &self.header(&field), true);
        self.emit_types(program, &format!("int{}{}", self.p.pi, self.p.delta));
        Ok(())
    }

    pub(crate) fn emit_constants(&self, program: &mut Program, header: &str, with_delta: bool) {
        protocol::emit_common_prologue(
            program,
            header,
            &["inttypes.h", "stddef.h", "stdio.h", "string.h"],
            &self.p.encoding,
        );
        let words = self.buff_words();
        protocol::define(program, "BUFFWORDS", words as u128, false);
        protocol::define(
            program,
            "BUFFSIZE",
            (words as u128) * (self.wordsize() as u128 / 8),
            true,
        );
        protocol::define(program, "PI", self.p.pi as u128, false);
        if with_delta {
            protocol::define(program, "DELTA", self.p.delta as u128, false);
        }
        protocol::define(program, "WORDSIZE", self.wordsize() as u128, false);
        protocol::define(program, "NUMLIMBS", self.n() as u128, false);
        program.push(Item::Blank);
    }

    pub(crate) fn emit_types(&self, program: &mut Program, tag: &str) {
        program.push(Item::Type(TypeDecl::Elem {
            tag: format!("{tag}_single"),
            kind: ElemKind::Single,
            cell: self.int_t(),
            dims: vec![self.n()],
        }));
        program.push(Item::Type(TypeDecl::Elem {
            tag: format!("{tag}_double"),
            kind: ElemKind::Double,
            cell: self.long_t(),
            dims: vec![self.n()],
        }));
        program.push(Item::Blank);
    }

    pub fn emit(&self, op: Operation) -> Result<Option<Vec<FunctionDef>>, GenError> {
        let fns = match op {
            Operation::Carry => vec![self.carry_round()?, self.carry_round_single()?],
            Operation::Reduce => vec![self.reduce()?],
            Operation::Mul => vec![self.field_mul()?],
            Operation::MulNoCarry => vec![self.field_mul_no_carry()?],
            Operation::MulReduce => vec![self.composite(
                abi::FIELD_MUL_REDUCE,
                3,
                ElemKind::Single,
                &[(abi::FIELD_MUL, &["&tmp", "a", "b"]), (abi::REDUCE, &["res", "&tmp"])],
            )?],
            Operation::Sqr => vec![self.composite(
                abi::FIELD_SQR,
                2,
                ElemKind::Single,
                &[(abi::FIELD_MUL, &["res", "a", "a"])],
            )?],
            Operation::SqrNoCarry => vec![self.composite(
                abi::FIELD_SQR_NO_CARRY,
                2,
                ElemKind::Double,
                &[(abi::FIELD_MUL_NO_CARRY, &["res", "a", "a"])],
            )?],
            Operation::SqrReduce => vec![self.composite(
                abi::FIELD_SQR_REDUCE,
                2,
                ElemKind::Single,
                &[(abi::FIELD_MUL_REDUCE, &["res", "a", "a"])],
            )?],
            Operation::Add => vec![self.field_add(abi::FIELD_ADD, [ElemKind::Single; 3])?],
            Operation::AddReduce => vec![self.composite(
                abi::FIELD_ADD_REDUCE,
                3,
                ElemKind::Single,
                &[
                    (abi::FIELD_ADD, &["&tmp", "a", "b"]),
                    (abi::CARRY_ROUND_SINGLE, &["&tmp", "&tmp"]),
                    (abi::REDUCE, &["res", "&tmp"]),
                ],
            )?],
            Operation::AddMix => vec![self.field_add(
                abi::FIELD_ADD_MIX,
                [ElemKind::Double, ElemKind::Double, ElemKind::Single],
            )?],
            Operation::AddDbl => vec![self.field_add(abi::FIELD_ADD_DBL, [ElemKind::Double; 3])?],
            Operation::Pack => vec![self.pack()?],
            Operation::Unpack => vec![self.unpack()?],
            Operation::UnpackKey => vec![self.unpack_key()?],
            Operation::UnpackAndEncode => vec![self.unpack_and_encode(false)?],
            Operation::UnpackAndEncodeLast => vec![self.unpack_and_encode(true)?],
        };
        Ok(Some(fns))
    }

    /// Accumulates the schoolbook product of limb `k` into `acc(k)` for every k.
    pub(crate) fn emit_products(
        &self,
        b: &mut FnBuilder,
        ops: Operands<'_>,
        acc: &dyn Fn(usize) -> Expr,
    ) -> Result<(), GenError> {
        let long = self.long_t();
        let needs_temp = matches!(ops, Operands::Plain { .. })
            && self.p.map.folded_terms().any(|(_, t)| !self.is_unit_fold(t.shift));
        b.decl(long.clone(), "acc");
        if needs_temp {
            b.decl(self.temp_t(), "t");
        }
        for (k, terms) in self.p.map.terms.iter().enumerate() {
            for (n, term) in terms.iter().enumerate() {
                let x = match ops {
                    Operands::Plain { a, .. } | Operands::Table { a, .. } => Expr::limb(a, term.i),
                };
                let y = match (ops, term.shift) {
                    (Operands::Plain { b: rhs, .. }, None) => Expr::limb(rhs, term.j),
                    (Operands::Plain { b: rhs, .. }, Some(s)) => {
                        self.fold_operand(b, Expr::limb(rhs, term.j), s)
                    }
                    (Operands::Table { table, .. }, _) => Expr::table(table, term.i, term.j, k),
                };
                if n == 0 {
                    b.product_into(long.clone(), acc(k), x, y);
                } else {
                    b.product_into(long.clone(), Expr::var("acc"), x, y);
                    b.add_assign(long.clone(), acc(k), Expr::var("acc"));
                }
            }
        }
        Ok(())
    }

    fn is_unit_fold(&self, shift: Option<u32>) -> bool {
        match shift {
            None => true,
            Some(s) => s == 0 && self.p.delta == 1,
        }
    }

    /// Stages `limb · δ·2^shift` in `t` and returns the expression to multiply by.
    fn fold_operand(&self, b: &mut FnBuilder, limb: Expr, shift: u32) -> Expr {
        if self.is_unit_fold(Some(shift)) {
            return limb;
        }
        match self.folding {
            Folding::Scaled => {
                let factor = (self.p.delta as u128) << shift;
                b.product_into(self.temp_t(), Expr::var("t"), limb, Expr::lit(factor));
            }
            Folding::Shifted => {
                mersenne::emit_shifted_operand(
                    b,
                    self.wordsize(),
                    self.p.carry.doublecarry_temp,
                    limb,
                    shift,
                );
            }
        }
        Expr::var("t")
    }

    /// Carries `src(k)` limb by limb into `res`, folding the top carry into limb 0.
    pub(crate) fn emit_carry(
        &self,
        b: &mut FnBuilder,
        src: &dyn Fn(usize) -> Expr,
        res: &str,
    ) -> Result<(), GenError> {
        let n = self.n();
        let w = self.wordsize();
        let long = self.long_t();
        let int = self.int_t();
        let carry = self.carry_t();
        let feedback_t = if self.feedback_is_long() {
            long.clone()
        } else {
            int.clone()
        };
        b.decl(long.clone(), "x");
        b.decl(carry.clone(), "c");
        b.decl(feedback_t.clone(), "cc");

        b.set(Expr::var("x"), src(0).cast(long.clone()));
        for k in 0..n {
            let hi = Expr::var("x").shr(self.width(k));
            if carry == long {
                b.set(Expr::var("c"), hi);
            } else {
                b.narrow_into(w, Expr::var("c"), hi);
            }
            b.set(
                Expr::limb(res, k),
                Expr::var("x").cast(int.clone()).and(self.mask(k)),
            );
            if k + 1 < n {
                b.sum_into(long.clone(), Expr::var("x"), src(k + 1), Expr::var("c"));
            }
        }

        match self.folding {
            Folding::Scaled => {
                let factor = (self.p.delta as u128) << self.p.map.carry_shift;
                b.product_into(
                    feedback_t.clone(),
                    Expr::var("cc"),
                    Expr::var("c"),
                    Expr::lit(factor),
                );
            }
            Folding::Shifted => mersenne::emit_carry_feedback(
                b,
                w,
                self.feedback_is_long(),
                Expr::var("c"),
                self.p.map.carry_shift,
            ),
        }

        if self.feedback_is_long() {
            b.sum_into(
                long.clone(),
                Expr::var("x"),
                Expr::limb(res, 0),
                Expr::var("cc"),
            );
            let hi = Expr::var("x").shr(self.width(0));
            if carry == long {
                b.set(Expr::var("c"), hi);
            } else {
                b.narrow_into(w, Expr::var("c"), hi);
            }
            b.set(
                Expr::limb(res, 0),
                Expr::var("x").cast(int.clone()).and(self.mask(0)),
            );
        } else {
            b.add_assign(int.clone(), Expr::limb(res, 0), Expr::var("cc"));
            b.set(Expr::var("c"), Expr::limb(res, 0).shr(self.width(0)));
            b.and_assign(Expr::limb(res, 0), self.mask(0));
        }
        b.add_assign(int.clone(), Expr::limb(res, 1), Expr::var("c").cast(int));
        Ok(())
    }

    fn carry_round(&self) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(abi::CARRY_ROUND, self.p.checked)
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::elem_ptr(ElemKind::Double), "a");
        self.emit_carry(&mut b, &|k| Expr::limb("a", k), "res")?;
        b.finish()
    }

    /// Single-width carry used after additions; `res` may alias `a`.
    fn carry_round_single(&self) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(abi::CARRY_ROUND_SINGLE, self.p.checked)
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a");
        self.emit_carry(&mut b, &|k| Expr::limb("a", k), "res")?;
        b.finish()
    }

    /// Constant-time conditional subtraction of p.
    ///
    /// Limbs are normalized into `u` and everything at or above bit π is folded back
    /// as δ times the excess, leaving u < 2p. Then `t = u + δ` is carried and 2^π
    /// removed from its top limb; the sign of that limb picks `u` or `t` through a mask.
    fn reduce(&self) -> Result<FunctionDef, GenError> {
        let n = self.n();
        let w = self.wordsize();
        let int = self.int_t();
        let top = n - 1;
        let top_bits = self.top_bits();
        let mut b = FnBuilder::new(abi::REDUCE, self.p.checked)
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a");
        b.decl_array(int.clone(), "u", n, false);
        b.decl_array(int.clone(), "t", n, false);
        b.decl(int.clone(), "c");
        b.decl(int.clone(), "mask");

        b.set(Expr::at("u", 0), Expr::limb("a", 0).and(self.mask(0)));
        b.set(Expr::var("c"), Expr::limb("a", 0).shr(self.width(0)));
        for i in 1..n {
            b.sum_into(int.clone(), Expr::at("u", i), Expr::limb("a", i), Expr::var("c"));
            if i < top {
                b.set(Expr::var("c"), Expr::at("u", i).shr(self.width(i)));
                b.and_assign(Expr::at("u", i), self.mask(i));
            }
        }

        b.comment("fold bits at or above 2^PI");
        b.set(Expr::var("c"), Expr::at("u", top).shr(top_bits));
        b.and_assign(Expr::at("u", top), Expr::lit(low_mask(top_bits) as u128));
        if self.p.delta != 1 {
            b.product_into(
                int.clone(),
                Expr::var("c"),
                Expr::var("c"),
                Expr::lit(self.p.delta as u128),
            );
        }
        for i in 0..n {
            b.add_assign(int.clone(), Expr::at("u", i), Expr::var("c"));
            if i < top {
                b.set(Expr::var("c"), Expr::at("u", i).shr(self.width(i)));
                b.and_assign(Expr::at("u", i), self.mask(i));
            }
        }

        b.comment("t = u - p, kept unless negative");
        b.sum_into(
            int.clone(),
            Expr::at("t", 0),
            Expr::at("u", 0),
            Expr::lit(self.p.delta as u128),
        );
        b.set(Expr::var("c"), Expr::at("t", 0).shr(self.width(0)));
        b.and_assign(Expr::at("t", 0), self.mask(0));
        for i in 1..n {
            b.sum_into(int.clone(), Expr::at("t", i), Expr::at("u", i), Expr::var("c"));
            if i < top {
                b.set(Expr::var("c"), Expr::at("t", i).shr(self.width(i)));
                b.and_assign(Expr::at("t", i), self.mask(i));
            }
        }

        b.set(
            Expr::at("t", top),
            Expr::at("t", top).sub(Expr::ulit(w, 1).shl(top_bits)),
        );
        b.set(
            Expr::var("mask"),
            Expr::at("t", top).shr(w - 1).sub(Expr::lit(1)),
        );
        for i in 0..n {
            b.and_assign(Expr::at("t", i), Expr::var("mask"));
        }
        b.set(Expr::var("mask"), Expr::var("mask").not());
        for i in 0..n {
            b.set(
                Expr::limb("res", i),
                Expr::at("u", i).and(Expr::var("mask")).or(Expr::at("t", i)),
            );
        }
        b.finish()
    }

    fn field_mul(&self) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(abi::FIELD_MUL, self.p.checked)
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a")
            .param(CType::elem_ptr(ElemKind::Single), "b");
        b.decl_array(self.long_t(), "d", self.n(), false);
        self.emit_products(&mut b, Operands::Plain { a: "a", b: "b" }, &|k| {
            Expr::at("d", k)
        })?;
        self.emit_carry(&mut b, &|k| Expr::at("d", k), "res")?;
        b.finish()
    }

    fn field_mul_no_carry(&self) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(abi::FIELD_MUL_NO_CARRY, self.p.checked)
            .param(CType::elem_ptr(ElemKind::Double), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a")
            .param(CType::elem_ptr(ElemKind::Single), "b");
        self.emit_products(&mut b, Operands::Plain { a: "a", b: "b" }, &|k| {
            Expr::limb("res", k)
        })?;
        b.finish()
    }

    /// A routine made of calls to routines emitted earlier. `&tmp` names a local
    /// single-width scratch element.
    pub(crate) fn composite(
        &self,
        name: &str,
        arity: usize,
        res_kind: ElemKind,
        calls: &[(&str, &[&str])],
    ) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(name, self.p.checked).param(CType::elem_ptr(res_kind), "res");
        b = b.param(CType::elem_ptr(ElemKind::Single), "a");
        if arity == 3 {
            b = b.param(CType::elem_ptr(ElemKind::Single), "b");
        }
        if calls.iter().any(|(_, args)| args.contains(&"&tmp")) {
            b.decl(CType::Elem(ElemKind::Single), "tmp");
        }
        for (func, args) in calls {
            let args = args
                .iter()
                .map(|a| match a.strip_prefix('&') {
                    Some(local) => Expr::var(local).addr(),
                    None => Expr::var(a),
                })
                .collect();
            b.call(func, args);
        }
        b.finish()
    }

    fn field_add(&self, name: &str, kinds: [ElemKind; 3]) -> Result<FunctionDef, GenError> {
        let ty = if kinds[0] == ElemKind::Double {
            self.long_t()
        } else {
            self.int_t()
        };
        let mut b = FnBuilder::new(name, self.p.checked)
            .param(CType::elem_ptr(kinds[0]), "res")
            .param(CType::elem_ptr(kinds[1]), "a")
            .param(CType::elem_ptr(kinds[2]), "b");
        for i in 0..self.n() {
            b.sum_into(ty.clone(), Expr::limb("res", i), Expr::limb("a", i), Expr::limb("b", i));
        }
        b.finish()
    }

    fn pack(&self) -> Result<FunctionDef, GenError> {
        let w = self.wordsize();
        let offsets = self.p.layout.offsets();
        let mut b = FnBuilder::new(abi::PACK_FIELD_ELEM, self.p.checked)
            .param(CType::ptr(self.int_t()), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a");
        for j in 0..self.buff_words() {
            let lo = j as u32 * w;
            let pieces = (0..self.n())
                .filter(|i| offsets[*i] < lo + w && offsets[*i + 1] > lo)
                .map(|i| {
                    if offsets[i] >= lo {
                        Expr::limb("a", i).shl(offsets[i] - lo)
                    } else {
                        Expr::limb("a", i).shr(lo - offsets[i])
                    }
                })
                .collect();
            b.set(Expr::at("res", j), Expr::or_all(pieces));
        }
        b.finish()
    }

    fn unpack(&self) -> Result<FunctionDef, GenError> {
        let offsets = self.p.layout.offsets();
        let mut b = FnBuilder::new(abi::UNPACK_FIELD_ELEM, self.p.checked)
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::ptr(self.int_t()), "a");
        for i in 0..self.n() {
            let pieces = slice_pieces(
                "a",
                self.buff_words(),
                self.wordsize(),
                offsets[i] as i64,
                self.width(i),
            );
            b.set(Expr::limb("res", i), Expr::or_all(pieces).and(self.mask(i)));
        }
        b.finish()
    }

    /// Reads the first min(8·keysize, Σw) key bits, then applies the clamp.
    fn unpack_key(&self) -> Result<FunctionDef, GenError> {
        let w = self.wordsize();
        let offsets = self.p.layout.offsets();
        let key_bits = (self.p.encoding.keysize as u32 * 8).min(self.p.layout.total_bits());
        let key_words = key_bits.div_ceil(w) as usize;
        let clamp = self.p.encoding.key_clamp_value()?;
        let mut b = FnBuilder::new(abi::UNPACK_KEY, self.p.checked)
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::ptr(self.int_t()), "a");
        for i in 0..self.n() {
            if offsets[i] >= key_bits {
                b.set(Expr::limb("res", i), Expr::lit(0));
                continue;
            }
            let width = self.width(i).min(key_bits - offsets[i]);
            let mut mask = low_mask(width);
            if let Some(clamp) = &clamp {
                let limb_clamp = (clamp >> offsets[i]) & num::BigUint::from(low_mask(width));
                mask &= limb_clamp.iter_u64_digits().next().unwrap_or(0);
            }
            let pieces = slice_pieces("a", key_words, w, offsets[i] as i64, width);
            b.set(
                Expr::limb("res", i),
                Expr::or_all(pieces).and(Expr::lit(mask as u128)),
            );
        }
        b.finish()
    }

    fn unpack_and_encode(&self, last: bool) -> Result<FunctionDef, GenError> {
        let enc = &self.p.encoding;
        if enc.mode == EncodingMode::Explicit {
            return protocol::explicit_unpack_and_encode(
                self.p.checked,
                self.wordsize(),
                self.buff_words(),
                last,
            );
        }
        let name = if last {
            abi::UNPACK_AND_ENCODE_LAST_FIELD_ELEM
        } else {
            abi::UNPACK_AND_ENCODE_FIELD_ELEM
        };
        let w = self.wordsize();
        let offsets = self.p.layout.offsets();
        let words = self.message_words();
        let mut b = FnBuilder::new(name, self.p.checked)
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
        b.decl_array(self.int_t(), "m", words, true);
        b.call_void("memcpy", vec![Expr::var("m"), Expr::var("a"), len]);

        let has_byte = enc.byte != 0;
        let inject = has_byte && (last || !enc.encode_last_only);
        let shift = match enc.placement {
            Placement::High => 0,
            Placement::Low => enc.byte_bits() as i64,
        };

        if last && has_byte && enc.placement == Placement::High {
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

        for i in 0..self.n() {
            let pieces = slice_pieces("m", words, w, offsets[i] as i64 - shift, self.width(i));
            b.set(Expr::limb("res", i), Expr::or_all(pieces).and(self.mask(i)));
        }

        if inject {
            match enc.placement {
                Placement::Low => {
                    b.or_assign(Expr::limb("res", 0), Expr::lit(enc.byte as u128));
                }
                Placement::High => {
                    if last {
                        b.open_if(Expr::var("size").equals(Expr::konst("BLOCKSIZE")));
                    }
                    let pos = enc.blocksize as u32 * 8;
                    for i in 0..self.n() {
                        let piece = placed_byte(enc.byte, pos, offsets[i], self.width(i));
                        if piece != 0 {
                            b.or_assign(Expr::limb("res", i), Expr::lit(piece));
                        }
                    }
                    if last {
                        b.close()?;
                    }
                }
            }
        }

        for i in 0..self.n() {
            let m = enc.limb_mask(i) & self.p.layout.mask(i);
            if m != self.p.layout.mask(i) {
                b.and_assign(Expr::limb("res", i), Expr::lit(m as u128));
            }
        }
        b.finish()
    }
}

/// Bits of `byte << pos` that fall in the limb starting at `offset`.
fn placed_byte(byte: u8, pos: u32, offset: u32, width: u32) -> u128 {
    let piece = if pos >= offset {
        let rel = pos - offset;
        if rel >= width {
            return 0;
        }
        (byte as u128) << rel
    } else {
        let rel = offset - pos;
        if rel >= 8 {
            return 0;
        }
        (byte as u128) >> rel
    };
    piece & low_mask(width) as u128
}

/// Pieces of bits [start, start+width) of a little-endian word array.
///
/// `start` may be negative, in which case the low bits are zero.
pub(crate) fn slice_pieces(src: &str, words: usize, w: u32, start: i64, width: u32) -> Vec<Expr> {
    let end = start + width as i64;
    (0..words)
        .filter_map(|j| {
            let lo = j as i64 * w as i64;
            if lo >= end || lo + w as i64 <= start {
                return None;
            }
            let rel = lo - start;
            Some(if rel >= 0 {
                Expr::at(src, j).shl(rel as u32)
            } else {
                Expr::at(src, j).shr((-rel) as u32)
            })
        })
        .collect()
}
