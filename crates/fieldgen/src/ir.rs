//! Typed operation tree for emitted field arithmetic.
//!
//! Generators build [`Program`] values out of limb-indexed expressions and statements;
//! `c_emit` pretty-prints them and `interp` executes them. Nothing in this module knows
//! about C syntax beyond the names of types and intrinsics.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ElemKind {
    Single,
    Double,
    Precomputed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CType {
    /// `int`, used for status values.
    Int,
    Size,
    /// `uintN_t` with N in {8, 32, 64, 128}.
    Uint(u32),
    /// `__m128i`.
    Vec128,
    Elem(ElemKind),
    Ptr(Box<CType>),
}

impl CType {
    pub fn ptr(inner: CType) -> CType {
        CType::Ptr(Box::new(inner))
    }

    pub fn elem_ptr(kind: ElemKind) -> CType {
        CType::ptr(CType::Elem(kind))
    }

    /// Bit width of a scalar value of this type, `None` for aggregates and pointers.
    pub fn scalar_bits(&self) -> Option<u32> {
        match self {
            CType::Int => Some(32),
            CType::Size => Some(64),
            CType::Uint(bits) => Some(*bits),
            CType::Vec128 => Some(128),
            CType::Elem(_) | CType::Ptr(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Eq,
    Lt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Lit(u128),
    /// A preprocessor constant such as `BLOCKSIZE`.
    Const(String),
    Var(String),
    /// `base->val[i]..` when `via_ptr`, else `base.val[i]..`.
    Limb {
        base: String,
        via_ptr: bool,
        idx: Vec<usize>,
    },
    Index {
        base: Box<Expr>,
        idx: Box<Expr>,
    },
    Cast(CType, Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Call(String, Vec<Expr>),
    AddrOf(Box<Expr>),
    SizeOf(CType),
}

impl Expr {
    pub fn lit(v: u128) -> Expr {
        Expr::Lit(v)
    }

    /// A literal of an explicit unsigned width, printed as a cast.
    pub fn ulit(bits: u32, v: u128) -> Expr {
        Expr::Cast(CType::Uint(bits), Box::new(Expr::Lit(v)))
    }

    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    pub fn konst(name: &str) -> Expr {
        Expr::Const(name.to_string())
    }

    /// `base->val[i]` for a pointer parameter.
    pub fn limb(base: &str, i: usize) -> Expr {
        Expr::Limb {
            base: base.to_string(),
            via_ptr: true,
            idx: vec![i],
        }
    }

    pub fn table(base: &str, i: usize, j: usize, k: usize) -> Expr {
        Expr::Limb {
            base: base.to_string(),
            via_ptr: true,
            idx: vec![i, j, k],
        }
    }

    /// `base[i]` over a local array or word pointer.
    pub fn at(base: &str, i: usize) -> Expr {
        Expr::Index {
            base: Box::new(Expr::var(base)),
            idx: Box::new(Expr::Lit(i as u128)),
        }
    }

    pub fn index(base: Expr, idx: Expr) -> Expr {
        Expr::Index {
            base: Box::new(base),
            idx: Box::new(idx),
        }
    }

    pub fn cast(self, ty: CType) -> Expr {
        Expr::Cast(ty, Box::new(self))
    }

    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Bin(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn add(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Add, self, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Sub, self, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Mul, self, rhs)
    }

    /// Shift left; a zero shift returns the operand unchanged.
    pub fn shl(self, n: u32) -> Expr {
        if n == 0 {
            self
        } else {
            Expr::bin(BinOp::Shl, self, Expr::Lit(n as u128))
        }
    }

    /// Shift right; a zero shift returns the operand unchanged.
    pub fn shr(self, n: u32) -> Expr {
        if n == 0 {
            self
        } else {
            Expr::bin(BinOp::Shr, self, Expr::Lit(n as u128))
        }
    }

    pub fn and(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::And, self, rhs)
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Or, self, rhs)
    }

    pub fn xor(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Xor, self, rhs)
    }

    pub fn equals(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Eq, self, rhs)
    }

    pub fn less_than(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Lt, self, rhs)
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn addr(self) -> Expr {
        Expr::AddrOf(Box::new(self))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(name.to_string(), args)
    }

    /// OR-folds a list of pieces; an empty list yields a zero literal.
    pub fn or_all(pieces: Vec<Expr>) -> Expr {
        let mut it = pieces.into_iter();
        match it.next() {
            Some(first) => it.fold(first, Expr::or),
            None => Expr::Lit(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    And,
    Or,
    Xor,
}

/// Runtime overflow probe. Each failing probe ORs 1 into the status flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Add { ty: CType, lhs: Expr, rhs: Expr },
    Mul { ty: CType, lhs: Expr, rhs: Expr },
    /// `value` must fit in `bits` bits.
    Fits { bits: u32, value: Expr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Init {
    Zero,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Decl {
        ty: CType,
        name: String,
        len: Option<usize>,
        init: Option<Init>,
    },
    Assign {
        dst: Expr,
        op: AssignOp,
        src: Expr,
    },
    Check(Check),
    /// A call whose result is discarded, or OR-ed into the status flag when `status`.
    Call {
        func: String,
        args: Vec<Expr>,
        status: bool,
    },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        els: Vec<Stmt>,
    },
    Comment(String),
    Return(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub ty: CType,
    pub name: String,
}

/// A `static inline` routine returning an `int` status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDecl {
    Alias {
        name: String,
        target: String,
    },
    /// `typedef struct tag { cell val[d0][d1].. ; } name;`
    Elem {
        tag: String,
        kind: ElemKind,
        cell: CType,
        dims: Vec<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Comment(String),
    Include {
        path: String,
        system: bool,
    },
    Define {
        name: String,
        value: u128,
        overridable: bool,
    },
    Type(TypeDecl),
    Function(FunctionDef),
    Macro {
        name: String,
        params: Vec<String>,
        body: String,
    },
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    pub guard: String,
    pub items: Vec<Item>,
}

impl Program {
    pub fn new(guard: &str) -> Self {
        Self {
            guard: guard.to_string(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.items.iter().filter_map(|it| match it {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions().find(|f| f.name == name)
    }

    pub fn elem_decl(&self, kind: ElemKind) -> Option<(&CType, &[usize])> {
        self.items.iter().find_map(|it| match it {
            Item::Type(TypeDecl::Elem {
                kind: k,
                cell,
                dims,
                ..
            }) if *k == kind => Some((cell, dims.as_slice())),
            _ => None,
        })
    }

    pub fn define(&self, name: &str) -> Option<u128> {
        self.items.iter().find_map(|it| match it {
            Item::Define { name: n, value, .. } if n == name => Some(*value),
            _ => None,
        })
    }
}
