//! The operation set every field family emits, and the emission context used to
//! build function bodies.

use fieldgen_contracts::abi;

use crate::binary::BinaryGen;
use crate::crandall::CrandallGen;
use crate::generate::{GenError, GenErrorKind};
use crate::ir::{
    AssignOp, CType, Check, ElemKind, Expr, FunctionDef, Init, Item, Param, Program,
    Stmt, TypeDecl,
};
use crate::mersenne::MersenneGen;
use crate::model::EncodingSpec;
use crate::precompute::PrecomputingGen;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    Carry,
    Reduce,
    Mul,
    MulNoCarry,
    MulReduce,
    Sqr,
    SqrNoCarry,
    SqrReduce,
    Add,
    AddReduce,
    AddMix,
    AddDbl,
    Pack,
    Unpack,
    UnpackKey,
    UnpackAndEncode,
    UnpackAndEncodeLast,
}

pub const EMISSION_ORDER: [Operation; 17] = [
    Operation::Carry,
    Operation::Reduce,
    Operation::Mul,
    Operation::MulNoCarry,
    Operation::MulReduce,
    Operation::Sqr,
    Operation::SqrNoCarry,
    Operation::SqrReduce,
    Operation::Add,
    Operation::AddReduce,
    Operation::AddMix,
    Operation::AddDbl,
    Operation::Pack,
    Operation::Unpack,
    Operation::UnpackKey,
    Operation::UnpackAndEncode,
    Operation::UnpackAndEncodeLast,
];

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Carry => "carry",
            Operation::Reduce => "reduce",
            Operation::Mul => "mul",
            Operation::MulNoCarry => "mul_no_carry",
            Operation::MulReduce => "mul_reduce",
            Operation::Sqr => "sqr",
            Operation::SqrNoCarry => "sqr_no_carry",
            Operation::SqrReduce => "sqr_reduce",
            Operation::Add => "add",
            Operation::AddReduce => "add_reduce",
            Operation::AddMix => "add_mix",
            Operation::AddDbl => "add_dbl",
            Operation::Pack => "pack",
            Operation::Unpack => "unpack",
            Operation::UnpackKey => "unpack_key",
            Operation::UnpackAndEncode => "unpack_and_encode",
            Operation::UnpackAndEncodeLast => "unpack_and_encode_last",
        }
    }
}

/// One generator per field family.
#[derive(Debug, Clone)]
pub enum FieldGenerator {
    Crandall(CrandallGen),
    Mersenne(MersenneGen),
    Precomputing(PrecomputingGen),
    Binary(BinaryGen),
}

impl FieldGenerator {
    pub fn name(&self) -> &'static str {
        match self {
            FieldGenerator::Crandall(_) => "crandall",
            FieldGenerator::Mersenne(_) => "mersenne",
            FieldGenerator::Precomputing(_) => "crandall_precomputed",
            FieldGenerator::Binary(_) => "binary",
        }
    }

    fn prologue(&self, program: &mut Program) -> Result<(), GenError> {
        match self {
            FieldGenerator::Crandall(g) => g.emit_prologue(program),
            FieldGenerator::Mersenne(g) => g.emit_prologue(program),
            FieldGenerator::Precomputing(g) => g.emit_prologue(program),
            FieldGenerator::Binary(g) => g.emit_prologue(program),
        }
    }

    fn emit(&self, op: Operation) -> Result<Option<Vec<FunctionDef>>, GenError> {
        match self {
            FieldGenerator::Crandall(g) => g.emit(op),
            FieldGenerator::Mersenne(g) => g.emit(op),
            FieldGenerator::Precomputing(g) => g.emit(op),
            FieldGenerator::Binary(g) => g.emit(op),
        }
    }

    fn epilogue(&self, program: &mut Program) -> Result<(), GenError> {
        match self {
            FieldGenerator::Crandall(_) | FieldGenerator::Mersenne(_) => {
                emit_naming_macros(program, false);
                Ok(())
            }
            FieldGenerator::Precomputing(g) => {
                for f in g.emit_precomputed()? {
                    program.push(Item::Function(f));
                }
                emit_naming_macros(program, true);
                Ok(())
            }
            FieldGenerator::Binary(_) => Ok(()),
        }
    }

    /// Emits the full operation set in the fixed order.
    pub fn emit_program(&self) -> Result<Program, GenError> {
        let _span = tracing::debug_span!("emit_program", generator = self.name()).entered();
        let mut program = Program::new("field_arithmetic_H_");
        self.prologue(&mut program)?;
        for op in EMISSION_ORDER {
            let Some(functions) = self.emit(op)? else {
                return Err(GenError::new(
                    GenErrorKind::Internal,
                    format!(
                        "generator {} does not implement required operation {}",
                        self.name(),
                        op.name()
                    ),
                ));
            };
            for f in functions {
                program.push(Item::Function(f));
            }
        }
        self.epilogue(&mut program)?;
        Ok(program)
    }
}

/// Includes, the `uint128_t` alias and the block/key size defaults.
pub fn emit_common_prologue(
    program: &mut Program,
    header: &str,
    system_includes: &[&str],
    encoding: &EncodingSpec,
) {
    program.push(Item::Comment(header.to_string()));
    program.push(Item::Blank);
    for inc in system_includes {
        program.push(Item::Include {
            path: inc.to_string(),
            system: true,
        });
    }
    program.push(Item::Include {
        path: "../transform/transform.h".to_string(),
        system: false,
    });
    program.push(Item::Blank);
    program.push(Item::Type(TypeDecl::Alias {
        name: "uint128_t".to_string(),
        target: "unsigned __int128".to_string(),
    }));
    program.push(Item::Blank);
    define(program, "BLOCKSIZE", encoding.blocksize as u128, true);
    define(program, "KEYSIZE", encoding.keysize as u128, true);
}

pub fn define(program: &mut Program, name: &str, value: u128, overridable: bool) {
    program.push(Item::Define {
        name: name.to_string(),
        value,
        overridable,
    });
}

fn naming_macro(program: &mut Program, name: &str, params: &[&str], body: &str) {
    program.push(Item::Macro {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        body: body.to_string(),
    });
}

/// Macros that let callers use one spelling for both multiplication variants.
fn emit_naming_macros(program: &mut Program, precomputed: bool) {
    program.push(Item::Comment(
        "Unified call names for precomputed and plain multiplication.".to_string(),
    ));
    let elem = abi::FIELD_ELEM_T;
    let pc = abi::FIELD_ELEM_PRECOMPUTED_T;
    if precomputed {
        naming_macro(program, "NOT_PRECOMPUTED", &["name"], "name##_not_precomputed");
        naming_macro(program, "PRECOMPUTED", &["name"], "name");
        naming_macro(
            program,
            "DECLARE_PC_ELEM",
            &["name"],
            &format!("{elem} NOT_PRECOMPUTED(name); {pc} name"),
        );
        naming_macro(
            program,
            "DECLARE_PC_ELEM_ARRAY",
            &["name", "len"],
            &format!("{elem} NOT_PRECOMPUTED(name)[len]; {pc} name[len]"),
        );
        naming_macro(
            program,
            "UNPACK_PC_FIELD_ELEM",
            &["dst", "src"],
            &format!("{}(&NOT_PRECOMPUTED(dst), src)", abi::UNPACK_FIELD_ELEM),
        );
        naming_macro(
            program,
            "INIT_PC_KEY",
            &["dst", "src"],
            &format!("{}(dst, src)", abi::PRECOMPUTE_FACTOR),
        );
        let routes = [
            ("FIELD_MUL_PC", abi::FIELD_MUL_PRECOMPUTED, 3),
            ("FIELD_MUL_PC_NO_CARRY", abi::FIELD_MUL_PRECOMPUTED_NO_CARRY, 3),
            ("FIELD_MUL_PC_REDUCE", abi::FIELD_MUL_PRECOMPUTED_REDUCE, 3),
            ("FIELD_SQR_PC", abi::FIELD_SQR_PRECOMPUTED, 2),
            ("FIELD_SQR_PC_NO_CARRY", abi::FIELD_SQR_PRECOMPUTED_NO_CARRY, 2),
            ("FIELD_SQR_PC_REDUCE", abi::FIELD_SQR_PRECOMPUTED_REDUCE, 2),
        ];
        emit_routes(program, &routes);
    } else {
        naming_macro(program, "NOT_PRECOMPUTED", &["name"], "name");
        naming_macro(program, "PRECOMPUTED", &["name"], "name");
        naming_macro(program, "DECLARE_PC_ELEM", &["name"], &format!("{elem} name"));
        naming_macro(
            program,
            "DECLARE_PC_ELEM_ARRAY",
            &["name", "len"],
            &format!("{elem} name[len]"),
        );
        naming_macro(
            program,
            "UNPACK_PC_FIELD_ELEM",
            &["dst", "src"],
            &format!("{}(&dst, src)", abi::UNPACK_FIELD_ELEM),
        );
        naming_macro(program, "INIT_PC_KEY", &["dst", "src"], "");
        let routes = [
            ("FIELD_MUL_PC", abi::FIELD_MUL, 3),
            ("FIELD_MUL_PC_NO_CARRY", abi::FIELD_MUL_NO_CARRY, 3),
            ("FIELD_MUL_PC_REDUCE", abi::FIELD_MUL_REDUCE, 3),
            ("FIELD_SQR_PC", abi::FIELD_SQR, 2),
            ("FIELD_SQR_PC_NO_CARRY", abi::FIELD_SQR_NO_CARRY, 2),
            ("FIELD_SQR_PC_REDUCE", abi::FIELD_SQR_REDUCE, 2),
        ];
        emit_routes(program, &routes);
    }
}

fn emit_routes(program: &mut Program, routes: &[(&str, &str, usize)]) {
    for (name, target, arity) in routes {
        let params: &[&str] = if *arity == 3 {
            &["dst", "a", "b"]
        } else {
            &["dst", "a"]
        };
        naming_macro(
            program,
            name,
            params,
            &format!("{target}({})", params.join(", ")),
        );
    }
}

enum BlockKind {
    Body,
    Then(Expr),
    Else(Expr, Vec<Stmt>),
}

struct OpenBlock {
    kind: BlockKind,
    stmts: Vec<Stmt>,
}

/// Emission context for one routine.
///
/// Nested blocks are pushed and popped in LIFO order; every arithmetic helper decides
/// at build time whether to precede the operation with an overflow check.
pub struct FnBuilder {
    name: String,
    params: Vec<Param>,
    checked: bool,
    blocks: Vec<OpenBlock>,
}

impl FnBuilder {
    pub fn new(name: &str, checked: bool) -> Self {
        let mut b = Self {
            name: name.to_string(),
            params: Vec::new(),
            checked,
            blocks: vec![OpenBlock {
                kind: BlockKind::Body,
                stmts: Vec::new(),
            }],
        };
        if checked {
            b.push(Stmt::Decl {
                ty: CType::Int,
                name: abi::STATUS_FLAG.to_string(),
                len: None,
                init: Some(Init::Expr(Expr::lit(0))),
            });
        }
        b
    }

    pub fn param(mut self, ty: CType, name: &str) -> Self {
        self.params.push(Param {
            ty,
            name: name.to_string(),
        });
        self
    }

    pub fn err(&self, kind: GenErrorKind, message: String) -> GenError {
        GenError::new(kind, format!("{message} (fn={})", self.name))
    }

    pub fn push(&mut self, stmt: Stmt) {
        if let Some(block) = self.blocks.last_mut() {
            block.stmts.push(stmt);
        }
    }

    pub fn comment(&mut self, text: &str) {
        self.push(Stmt::Comment(text.to_string()));
    }

    pub fn decl(&mut self, ty: CType, name: &str) {
        self.push(Stmt::Decl {
            ty,
            name: name.to_string(),
            len: None,
            init: None,
        });
    }

    pub fn decl_array(&mut self, ty: CType, name: &str, len: usize, zero: bool) {
        self.push(Stmt::Decl {
            ty,
            name: name.to_string(),
            len: Some(len),
            init: zero.then_some(Init::Zero),
        });
    }

    fn assign_op(&mut self, dst: Expr, op: AssignOp, src: Expr) {
        self.push(Stmt::Assign { dst, op, src });
    }

    pub fn set(&mut self, dst: Expr, src: Expr) {
        self.assign_op(dst, AssignOp::Set, src);
    }

    pub fn or_assign(&mut self, dst: Expr, src: Expr) {
        self.assign_op(dst, AssignOp::Or, src);
    }

    pub fn and_assign(&mut self, dst: Expr, src: Expr) {
        self.assign_op(dst, AssignOp::And, src);
    }

    pub fn xor_assign(&mut self, dst: Expr, src: Expr) {
        self.assign_op(dst, AssignOp::Xor, src);
    }

    /// `dst += src` in `ty`, probed for overflow when checked.
    pub fn add_assign(&mut self, ty: CType, dst: Expr, src: Expr) {
        if self.checked {
            self.push(Stmt::Check(Check::Add {
                ty,
                lhs: dst.clone(),
                rhs: src.clone(),
            }));
        }
        self.assign_op(dst, AssignOp::Add, src);
    }

    /// `dst = x + y` evaluated in `ty`.
    pub fn sum_into(&mut self, ty: CType, dst: Expr, x: Expr, y: Expr) {
        if self.checked {
            self.push(Stmt::Check(Check::Add {
                ty: ty.clone(),
                lhs: x.clone(),
                rhs: y.clone(),
            }));
        }
        self.set(dst, x.cast(ty).add(y));
    }

    /// `dst = x * y` evaluated in `ty`.
    pub fn product_into(&mut self, ty: CType, dst: Expr, x: Expr, y: Expr) {
        if self.checked {
            self.push(Stmt::Check(Check::Mul {
                ty: ty.clone(),
                lhs: x.clone(),
                rhs: y.clone(),
            }));
        }
        self.set(dst, x.cast(ty).mul(y));
    }

    /// `dst = (ty) value` where `value` is wider than `ty`.
    pub fn narrow_into(&mut self, bits: u32, dst: Expr, value: Expr) {
        if self.checked {
            self.push(Stmt::Check(Check::Fits {
                bits,
                value: value.clone(),
            }));
        }
        self.set(dst, value.cast(CType::Uint(bits)));
    }

    /// Calls another emitted routine, folding its status into ours when checked.
    pub fn call(&mut self, func: &str, args: Vec<Expr>) {
        self.push(Stmt::Call {
            func: func.to_string(),
            args,
            status: self.checked,
        });
    }

    /// Calls an external or library routine whose result is not a status.
    pub fn call_void(&mut self, func: &str, args: Vec<Expr>) {
        self.push(Stmt::Call {
            func: func.to_string(),
            args,
            status: false,
        });
    }

    pub fn open_if(&mut self, cond: Expr) {
        self.blocks.push(OpenBlock {
            kind: BlockKind::Then(cond),
            stmts: Vec::new(),
        });
    }

    pub fn open_else(&mut self) -> Result<(), GenError> {
        match self.blocks.pop() {
            Some(OpenBlock {
                kind: BlockKind::Then(cond),
                stmts,
            }) => {
                self.blocks.push(OpenBlock {
                    kind: BlockKind::Else(cond, stmts),
                    stmts: Vec::new(),
                });
                Ok(())
            }
            Some(other) => {
                self.blocks.push(other);
                Err(self.err(
                    GenErrorKind::Internal,
                    "else without an open if".to_string(),
                ))
            }
            None => Err(self.err(GenErrorKind::Internal, "no open block".to_string())),
        }
    }

    pub fn close(&mut self) -> Result<(), GenError> {
        let stmt = match self.blocks.pop() {
            Some(OpenBlock {
                kind: BlockKind::Then(cond),
                stmts,
            }) => Stmt::If {
                cond,
                then: stmts,
                els: Vec::new(),
            },
            Some(OpenBlock {
                kind: BlockKind::Else(cond, then),
                stmts,
            }) => Stmt::If {
                cond,
                then,
                els: stmts,
            },
            Some(body @ OpenBlock {
                kind: BlockKind::Body,
                ..
            }) => {
                self.blocks.push(body);
                return Err(self.err(
                    GenErrorKind::Internal,
                    "close without an open block".to_string(),
                ));
            }
            None => return Err(self.err(GenErrorKind::Internal, "no open block".to_string())),
        };
        self.push(stmt);
        Ok(())
    }

    pub fn finish(mut self) -> Result<FunctionDef, GenError> {
        if self.blocks.len() != 1 {
            return Err(self.err(
                GenErrorKind::Internal,
                format!("{} block(s) left open", self.blocks.len() - 1),
            ));
        }
        let ret = if self.checked {
            Expr::var(abi::STATUS_FLAG)
        } else {
            Expr::lit(0)
        };
        self.push(Stmt::Return(ret));
        let body = self.blocks.pop().map(|b| b.stmts).unwrap_or_default();
        Ok(FunctionDef {
            name: self.name,
            params: self.params,
            body,
        })
    }
}

/// `unpack_and_encode_field_elem` through the external message transform.
pub fn explicit_unpack_and_encode(
    checked: bool,
    word_bits: u32,
    buff_words: usize,
    last: bool,
) -> Result<FunctionDef, GenError> {
    let name = if last {
        abi::UNPACK_AND_ENCODE_LAST_FIELD_ELEM
    } else {
        abi::UNPACK_AND_ENCODE_FIELD_ELEM
    };
    let mut b = FnBuilder::new(name, checked)
        .param(CType::elem_ptr(ElemKind::Single), "res")
        .param(CType::ptr(CType::Uint(8)), "a");
    if last {
        b = b.param(CType::Size, "size");
    }
    b.decl_array(CType::Uint(word_bits), "buff", buff_words, true);
    let len = if last {
        Expr::var("size")
    } else {
        Expr::konst("BLOCKSIZE")
    };
    b.call_void(
        abi::TRANSFORM_MSG,
        vec![
            Expr::var("buff").cast(CType::ptr(CType::Uint(8))),
            Expr::konst("BUFFSIZE"),
            Expr::var("a"),
            len,
        ],
    );
    b.call(
        abi::UNPACK_FIELD_ELEM,
        vec![Expr::var("res"), Expr::var("buff")],
    );
    b.finish()
}
