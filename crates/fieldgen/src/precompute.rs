//! Crandall arithmetic with a precomputed multiplier table.
//!
//! `precompute_factor` stores, for every schoolbook term (i, j) landing in limb k, the
//! already-folded operand `b_j · δ·2^shift` at `val[i][j][k]`, so repeated
//! multiplications by the same factor (a MAC key) skip the folding multiplies.

use fieldgen_contracts::abi;

use crate::crandall::{CrandallGen, Operands, PrimeParams};
use crate::generate::{GenError, GenErrorKind};
use crate::ir::{CType, ElemKind, Expr, FunctionDef, Item, Program, TypeDecl};
use crate::protocol::{FnBuilder, Operation};

#[derive(Debug, Clone)]
pub struct PrecomputingGen {
    inner: CrandallGen,
}

impl PrecomputingGen {
    pub fn new(p: PrimeParams) -> Result<Self, GenError> {
        if p.carry.doublecarry_temp {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                "precomputed tables hold single-width entries, but folded operands need double width"
                    .to_string(),
            ));
        }
        Ok(Self {
            inner: CrandallGen::new(p)?,
        })
    }

    pub fn params(&self) -> &PrimeParams {
        self.inner.params()
    }

    pub fn emit_prologue(&self, program: &mut Program) -> Result<(), GenError> {
        self.inner.emit_prologue(program)?;
        let p = self.inner.params();
        let n = self.inner.n();
        program.push(Item::Type(TypeDecl::Elem {
            tag: format!("int{}{}_single_p", p.pi, p.delta),
            kind: ElemKind::Precomputed,
            cell: self.inner.int_t(),
            dims: vec![n, n, n],
        }));
        program.push(Item::Blank);
        Ok(())
    }

    pub fn emit(&self, op: Operation) -> Result<Option<Vec<FunctionDef>>, GenError> {
        self.inner.emit(op)
    }

    /// The table-driven routines, emitted after the base operation set.
    pub fn emit_precomputed(&self) -> Result<Vec<FunctionDef>, GenError> {
        Ok(vec![
            self.precompute_factor()?,
            self.mul_precomputed()?,
            self.mul_precomputed_no_carry()?,
            self.mul_precomputed_reduce()?,
            self.sqr_precomputed(abi::FIELD_SQR_PRECOMPUTED, abi::FIELD_MUL_PRECOMPUTED, ElemKind::Single)?,
            self.sqr_precomputed(
                abi::FIELD_SQR_PRECOMPUTED_NO_CARRY,
                abi::FIELD_MUL_PRECOMPUTED_NO_CARRY,
                ElemKind::Double,
            )?,
            self.sqr_precomputed(
                abi::FIELD_SQR_PRECOMPUTED_REDUCE,
                abi::FIELD_MUL_PRECOMPUTED_REDUCE,
                ElemKind::Single,
            )?,
        ])
    }

    fn checked(&self) -> bool {
        self.inner.params().checked
    }

    fn precompute_factor(&self) -> Result<FunctionDef, GenError> {
        let p = self.inner.params();
        let mut b = FnBuilder::new(abi::PRECOMPUTE_FACTOR, self.checked())
            .param(CType::elem_ptr(ElemKind::Precomputed), "res")
            .param(CType::elem_ptr(ElemKind::Single), "b");
        // val[0][0] doubles as the plain element for squaring.
        b.call_void(
            "memcpy",
            vec![
                Expr::table("res", 0, 0, 0).addr(),
                Expr::var("b"),
                Expr::SizeOf(CType::Elem(ElemKind::Single)),
            ],
        );
        for (k, terms) in p.map.terms.iter().enumerate() {
            for t in terms {
                let dst = Expr::table("res", t.i, t.j, k);
                match t.shift {
                    Some(s) if !(s == 0 && p.delta == 1) => {
                        let factor = (p.delta as u128) << s;
                        b.product_into(self.inner.int_t(), dst, Expr::limb("b", t.j), Expr::lit(factor));
                    }
                    _ => b.set(dst, Expr::limb("b", t.j)),
                }
            }
        }
        b.finish()
    }

    fn mul_precomputed(&self) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(abi::FIELD_MUL_PRECOMPUTED, self.checked())
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a")
            .param(CType::elem_ptr(ElemKind::Precomputed), "b");
        b.decl_array(self.inner.long_t(), "d", self.inner.n(), false);
        self.inner.emit_products(&mut b, Operands::Table { a: "a", table: "b" }, &|k| {
            Expr::at("d", k)
        })?;
        self.inner.emit_carry(&mut b, &|k| Expr::at("d", k), "res")?;
        b.finish()
    }

    fn mul_precomputed_no_carry(&self) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(abi::FIELD_MUL_PRECOMPUTED_NO_CARRY, self.checked())
            .param(CType::elem_ptr(ElemKind::Double), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a")
            .param(CType::elem_ptr(ElemKind::Precomputed), "b");
        self.inner.emit_products(&mut b, Operands::Table { a: "a", table: "b" }, &|k| {
            Expr::limb("res", k)
        })?;
        b.finish()
    }

    fn mul_precomputed_reduce(&self) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(abi::FIELD_MUL_PRECOMPUTED_REDUCE, self.checked())
            .param(CType::elem_ptr(ElemKind::Single), "res")
            .param(CType::elem_ptr(ElemKind::Single), "a")
            .param(CType::elem_ptr(ElemKind::Precomputed), "b");
        b.decl(CType::Elem(ElemKind::Single), "tmp");
        b.call(
            abi::FIELD_MUL_PRECOMPUTED,
            vec![Expr::var("tmp").addr(), Expr::var("a"), Expr::var("b")],
        );
        b.call(abi::REDUCE, vec![Expr::var("res"), Expr::var("tmp").addr()]);
        b.finish()
    }

    fn sqr_precomputed(&self, name: &str, mul: &str, res_kind: ElemKind) -> Result<FunctionDef, GenError> {
        let mut b = FnBuilder::new(name, self.checked())
            .param(CType::elem_ptr(res_kind), "res")
            .param(CType::elem_ptr(ElemKind::Precomputed), "a");
        let plain = Expr::table("a", 0, 0, 0)
            .addr()
            .cast(CType::elem_ptr(ElemKind::Single));
        b.call(mul, vec![Expr::var("res"), plain, Expr::var("a")]);
        b.finish()
    }
}
