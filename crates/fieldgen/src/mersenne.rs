//! Mersenne primes p = 2^π − 1.
//!
//! Same limb arithmetic as the Crandall family with δ = 1, so every fold is a plain
//! shift and no constant multiplications are emitted.

use crate::crandall::{CrandallGen, Folding, PrimeParams};
use crate::generate::{GenError, GenErrorKind};
use crate::ir::{CType, Expr, FunctionDef, Program};
use crate::protocol::{FnBuilder, Operation};

#[derive(Debug, Clone)]
pub struct MersenneGen {
    inner: CrandallGen,
}

impl MersenneGen {
    pub fn new(p: PrimeParams) -> Result<Self, GenError> {
        if p.delta != 1 {
            return Err(GenError::new(
                GenErrorKind::Internal,
                format!("mersenne generator built with delta={}", p.delta),
            ));
        }
        Ok(Self {
            inner: CrandallGen::with_folding(p, Folding::Shifted)?,
        })
    }

    pub fn params(&self) -> &PrimeParams {
        self.inner.params()
    }

    pub fn emit_prologue(&self, program: &mut Program) -> Result<(), GenError> {
        let pi = self.inner.params().pi;
        let header = self.inner.header(&format!("2^{pi}-1"));
        self.inner.emit_constants(program, &header, false);
        self.inner.emit_types(program, &format!("int{pi}1"));
        Ok(())
    }

    pub fn emit(&self, op: Operation) -> Result<Option<Vec<FunctionDef>>, GenError> {
        self.inner.emit(op)
    }
}

/// `t = limb << shift`, narrowed to the word unless the operand is double width.
pub(crate) fn emit_shifted_operand(
    b: &mut FnBuilder,
    wordsize: u32,
    long_temp: bool,
    limb: Expr,
    shift: u32,
) {
    let shifted = limb.cast(CType::Uint(2 * wordsize)).shl(shift);
    if long_temp {
        b.set(Expr::var("t"), shifted);
    } else {
        b.narrow_into(wordsize, Expr::var("t"), shifted);
    }
}

/// `cc = c << shift` for the top carry.
pub(crate) fn emit_carry_feedback(
    b: &mut FnBuilder,
    wordsize: u32,
    long: bool,
    carry: Expr,
    shift: u32,
) {
    if long {
        b.set(
            Expr::var("cc"),
            carry.cast(CType::Uint(2 * wordsize)).shl(shift),
        );
    } else if shift == 0 {
        b.set(Expr::var("cc"), carry.cast(CType::Uint(wordsize)));
    } else {
        b.narrow_into(
            wordsize,
            Expr::var("cc"),
            carry.cast(CType::Uint(2 * wordsize)).shl(shift),
        );
    }
}
