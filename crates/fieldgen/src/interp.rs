//! Reference interpreter for emitted programs.
//!
//! Executes a [`Program`] with the semantics of the printed C: unsigned wrap-around at
//! the promoted width (at least 32 bits), byte-addressed little-endian objects, the
//! `memcpy`/`memset` builtins, the SSE2/PCLMUL intrinsics the binary generator uses and
//! an identity `transform_msg`. Shifts by the full operand width or more are errors
//! rather than undefined behavior. Uninitialized locals read as 0xAA bytes.

use std::collections::BTreeMap;
use std::fmt;

use fieldgen_contracts::abi;

use crate::ir::{AssignOp, BinOp, CType, Check, ElemKind, Expr, Init, Program, Stmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpError {
    pub message: String,
}

impl InterpError {
    fn new(message: String) -> Self {
        Self { message }
    }
}

impl fmt::Display for InterpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for InterpError {}

/// Handle to an object allocated in a [`Machine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef(usize);

/// Argument to a routine called from outside the program.
#[derive(Debug, Clone, Copy)]
pub enum Arg {
    /// Pointer to the start of an object; the pointee type is the parameter's.
    Ptr(ObjRef),
    Int(u128),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Val {
    /// `bits == 0` marks an untyped literal.
    Int { v: u128, bits: u32 },
    Ptr { obj: usize, off: usize, pointee: CType },
}

#[derive(Debug, Clone)]
enum Binding {
    Val(Val),
    Obj {
        obj: usize,
        ty: CType,
        array: bool,
    },
}

struct Place {
    obj: usize,
    off: usize,
    ty: CType,
}

fn width_mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

fn literal_bits(v: u128) -> u32 {
    if v <= u32::MAX as u128 {
        32
    } else if v <= u64::MAX as u128 {
        64
    } else {
        128
    }
}

/// Width an integer operand has after the usual promotions.
fn promoted(v: u128, bits: u32) -> u32 {
    if bits == 0 {
        literal_bits(v)
    } else {
        bits.max(32)
    }
}

fn clmul64(a: u64, b: u64) -> u128 {
    let mut out = 0u128;
    for i in 0..64 {
        if (b >> i) & 1 == 1 {
            out ^= (a as u128) << i;
        }
    }
    out
}

fn lanes_shift(v: u128, n: u128, left: bool) -> u128 {
    if n > 63 {
        return 0;
    }
    let lo = v as u64;
    let hi = (v >> 64) as u64;
    let (lo, hi) = if left {
        (lo << n, hi << n)
    } else {
        (lo >> n, hi >> n)
    };
    (lo as u128) | ((hi as u128) << 64)
}

pub struct Machine<'p> {
    program: &'p Program,
    objects: Vec<Vec<u8>>,
    frames: Vec<(String, BTreeMap<String, Binding>)>,
    checks_failed: usize,
}

impl<'p> Machine<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            objects: Vec::new(),
            frames: Vec::new(),
            checks_failed: 0,
        }
    }

    /// Overflow checks that fired since the machine was created.
    pub fn checks_failed(&self) -> usize {
        self.checks_failed
    }

    fn err(&self, message: String) -> InterpError {
        match self.frames.last() {
            Some((name, _)) => InterpError::new(format!("{message} (fn={name})")),
            None => InterpError::new(message),
        }
    }

    pub fn sizeof(&self, ty: &CType) -> Result<usize, InterpError> {
        Ok(match ty {
            CType::Int => 4,
            CType::Size | CType::Ptr(_) => 8,
            CType::Uint(bits) => (*bits / 8) as usize,
            CType::Vec128 => 16,
            CType::Elem(kind) => {
                let (cell, dims) = self.elem_layout(*kind)?;
                self.sizeof(&cell)? * dims.iter().product::<usize>()
            }
        })
    }

    fn elem_layout(&self, kind: ElemKind) -> Result<(CType, Vec<usize>), InterpError> {
        self.program
            .elem_decl(kind)
            .map(|(cell, dims)| (cell.clone(), dims.to_vec()))
            .ok_or_else(|| self.err(format!("program declares no {kind:?} element type")))
    }

    fn alloc(&mut self, len: usize, fill: u8) -> usize {
        self.objects.push(vec![fill; len]);
        self.objects.len() - 1
    }

    pub fn alloc_elem(&mut self, kind: ElemKind) -> Result<ObjRef, InterpError> {
        let len = self.sizeof(&CType::Elem(kind))?;
        Ok(ObjRef(self.alloc(len, 0)))
    }

    pub fn alloc_bytes(&mut self, len: usize) -> ObjRef {
        ObjRef(self.alloc(len, 0))
    }

    pub fn write_bytes(&mut self, obj: ObjRef, bytes: &[u8]) -> Result<(), InterpError> {
        let target = self
            .objects
            .get_mut(obj.0)
            .ok_or_else(|| InterpError::new(format!("no object {}", obj.0)))?;
        if bytes.len() > target.len() {
            return Err(InterpError::new(format!(
                "{} bytes do not fit object of {} bytes",
                bytes.len(),
                target.len()
            )));
        }
        target[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_bytes(&self, obj: ObjRef) -> Result<Vec<u8>, InterpError> {
        self.objects
            .get(obj.0)
            .cloned()
            .ok_or_else(|| InterpError::new(format!("no object {}", obj.0)))
    }

    /// Writes the cells of an element in declaration order.
    pub fn write_limbs(&mut self, obj: ObjRef, kind: ElemKind, limbs: &[u128]) -> Result<(), InterpError> {
        let (cell, _) = self.elem_layout(kind)?;
        let size = self.sizeof(&cell)?;
        let mut bytes = Vec::with_capacity(limbs.len() * size);
        for limb in limbs {
            bytes.extend_from_slice(&limb.to_le_bytes()[..size]);
        }
        self.write_bytes(obj, &bytes)
    }

    pub fn read_limbs(&self, obj: ObjRef, kind: ElemKind) -> Result<Vec<u128>, InterpError> {
        let (cell, _) = self.elem_layout(kind)?;
        let size = self.sizeof(&cell)?;
        let bytes = self.read_bytes(obj)?;
        Ok(bytes
            .chunks(size)
            .map(|chunk| {
                let mut buf = [0u8; 16];
                buf[..chunk.len()].copy_from_slice(chunk);
                u128::from_le_bytes(buf)
            })
            .collect())
    }

    /// Calls `name` and returns its status.
    pub fn call(&mut self, name: &str, args: &[Arg]) -> Result<u128, InterpError> {
        let program = self.program;
        let f = program
            .function(name)
            .ok_or_else(|| InterpError::new(format!("unknown function {name}")))?;
        if f.params.len() != args.len() {
            return Err(InterpError::new(format!(
                "{name} takes {} arguments, got {}",
                f.params.len(),
                args.len()
            )));
        }
        let vals = f
            .params
            .iter()
            .zip(args)
            .map(|(param, arg)| match (arg, &param.ty) {
                (Arg::Ptr(obj), CType::Ptr(inner)) => Ok(Val::Ptr {
                    obj: obj.0,
                    off: 0,
                    pointee: (**inner).clone(),
                }),
                (Arg::Int(v), ty) => {
                    let bits = ty.scalar_bits().unwrap_or(64);
                    Ok(Val::Int {
                        v: v & width_mask(bits),
                        bits,
                    })
                }
                (Arg::Ptr(_), ty) => Err(InterpError::new(format!(
                    "{name}: parameter {} of type {ty:?} is not a pointer",
                    param.name
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.invoke(name, vals)
    }

    fn invoke(&mut self, name: &str, args: Vec<Val>) -> Result<u128, InterpError> {
        let program = self.program;
        let f = program
            .function(name)
            .ok_or_else(|| self.err(format!("call to unknown function {name}")))?;
        let mut scope = BTreeMap::new();
        for (param, val) in f.params.iter().zip(args) {
            scope.insert(param.name.clone(), Binding::Val(val));
        }
        self.frames.push((name.to_string(), scope));
        let result = self.run_block(&f.body);
        self.frames.pop();
        Ok(result?.unwrap_or(0))
    }

    fn run_block(&mut self, stmts: &[Stmt]) -> Result<Option<u128>, InterpError> {
        for stmt in stmts {
            if let Some(ret) = self.run_stmt(stmt)? {
                return Ok(Some(ret));
            }
        }
        Ok(None)
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some((_, scope)) = self.frames.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    fn lookup(&self, name: &str) -> Result<Binding, InterpError> {
        self.frames
            .last()
            .and_then(|(_, scope)| scope.get(name).cloned())
            .ok_or_else(|| self.err(format!("unbound name {name}")))
    }

    fn run_stmt(&mut self, stmt: &Stmt) -> Result<Option<u128>, InterpError> {
        match stmt {
            Stmt::Decl { ty, name, len, init } => {
                let size = self.sizeof(ty)? * len.unwrap_or(1);
                let fill = if init.is_some() { 0 } else { 0xAA };
                let obj = self.alloc(size, fill);
                self.bind(
                    name,
                    Binding::Obj {
                        obj,
                        ty: ty.clone(),
                        array: len.is_some(),
                    },
                );
                if let Some(Init::Expr(e)) = init {
                    let v = self.eval(e)?;
                    self.store(
                        &Place {
                            obj,
                            off: 0,
                            ty: ty.clone(),
                        },
                        v,
                    )?;
                }
            }
            Stmt::Assign { dst, op, src } => {
                let place = self.place(dst)?;
                let rhs = self.eval(src)?;
                let value = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => self.binary(BinOp::Add, self.load(&place)?, rhs)?,
                    AssignOp::And => self.binary(BinOp::And, self.load(&place)?, rhs)?,
                    AssignOp::Or => self.binary(BinOp::Or, self.load(&place)?, rhs)?,
                    AssignOp::Xor => self.binary(BinOp::Xor, self.load(&place)?, rhs)?,
                };
                self.store(&place, value)?;
            }
            Stmt::Check(check) => {
                if self.check_fails(check)? {
                    self.checks_failed += 1;
                    self.raise_status(1)?;
                }
            }
            Stmt::Call { func, args, status } => {
                let vals = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let ret = self.call_named(func, vals)?;
                if *status && ret != 0 {
                    self.raise_status(ret)?;
                }
            }
            Stmt::If { cond, then, els } => {
                let cond = self.eval(cond)?;
                let taken = self.int(&cond)? != 0;
                let ret = if taken {
                    self.run_block(then)?
                } else {
                    self.run_block(els)?
                };
                if ret.is_some() {
                    return Ok(ret);
                }
            }
            Stmt::Comment(_) => {}
            Stmt::Return(e) => {
                let v = self.eval(e)?;
                return Ok(Some(self.int(&v)?));
            }
        }
        Ok(None)
    }

    fn raise_status(&mut self, value: u128) -> Result<(), InterpError> {
        let place = self.place(&Expr::var(abi::STATUS_FLAG))?;
        let cur = self.load(&place)?;
        let next = self.binary(BinOp::Or, cur, Val::Int { v: value, bits: 32 })?;
        self.store(&place, next)
    }

    fn check_fails(&mut self, check: &Check) -> Result<bool, InterpError> {
        match check {
            Check::Add { ty, lhs, rhs } | Check::Mul { ty, lhs, rhs } => {
                let bits = ty
                    .scalar_bits()
                    .ok_or_else(|| self.err(format!("overflow check on non-scalar {ty:?}")))?;
                let x = self.eval(lhs)?;
                let y = self.eval(rhs)?;
                let x = self.int(&x)? & width_mask(bits);
                let y = self.int(&y)? & width_mask(bits);
                let exact = if matches!(check, Check::Add { .. }) {
                    x.checked_add(y)
                } else {
                    x.checked_mul(y)
                };
                Ok(match exact {
                    Some(v) => v > width_mask(bits),
                    None => true,
                })
            }
            Check::Fits { bits, value } => {
                let v = self.eval(value)?;
                let v = self.int(&v)?;
                Ok(*bits < 128 && (v >> bits) != 0)
            }
        }
    }

    fn call_named(&mut self, func: &str, args: Vec<Val>) -> Result<u128, InterpError> {
        match func {
            "memcpy" => {
                let (dst, src, n) = self.three(func, &args)?;
                let n = self.int(&n)? as usize;
                let bytes = self.read_raw(&src, n)?;
                self.write_raw(&dst, &bytes)?;
                Ok(0)
            }
            "memset" => {
                let (dst, v, n) = self.three(func, &args)?;
                let byte = self.int(&v)? as u8;
                let n = self.int(&n)? as usize;
                self.write_raw(&dst, &vec![byte; n])?;
                Ok(0)
            }
            abi::TRANSFORM_MSG => {
                if args.len() != 4 {
                    return Err(self.err(format!("{func} takes 4 arguments")));
                }
                let out_len = self.int(&args[1])? as usize;
                let in_len = self.int(&args[3])? as usize;
                let n = out_len.min(in_len);
                let bytes = self.read_raw(&args[2], n)?;
                self.write_raw(&args[0], &bytes)?;
                Ok(0)
            }
            _ => self.invoke(func, args),
        }
    }

    fn three(&self, func: &str, args: &[Val]) -> Result<(Val, Val, Val), InterpError> {
        match args {
            [a, b, c] => Ok((a.clone(), b.clone(), c.clone())),
            _ => Err(self.err(format!("{func} takes 3 arguments, got {}", args.len()))),
        }
    }

    fn ptr_range(&self, ptr: &Val, n: usize) -> Result<(usize, usize), InterpError> {
        let Val::Ptr { obj, off, .. } = ptr else {
            return Err(self.err(format!("expected a pointer, got {ptr:?}")));
        };
        let len = self.objects.get(*obj).map(|o| o.len()).unwrap_or(0);
        if off + n > len {
            return Err(self.err(format!(
                "access of {n} bytes at offset {off} overruns object of {len} bytes"
            )));
        }
        Ok((*obj, *off))
    }

    fn read_raw(&self, ptr: &Val, n: usize) -> Result<Vec<u8>, InterpError> {
        let (obj, off) = self.ptr_range(ptr, n)?;
        Ok(self.objects[obj][off..off + n].to_vec())
    }

    fn write_raw(&mut self, ptr: &Val, bytes: &[u8]) -> Result<(), InterpError> {
        let (obj, off) = self.ptr_range(ptr, bytes.len())?;
        self.objects[obj][off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn load(&self, place: &Place) -> Result<Val, InterpError> {
        let bits = place
            .ty
            .scalar_bits()
            .ok_or_else(|| self.err(format!("load of non-scalar {:?}", place.ty)))?;
        let size = self.sizeof(&place.ty)?;
        let bytes = self.read_raw(
            &Val::Ptr {
                obj: place.obj,
                off: place.off,
                pointee: place.ty.clone(),
            },
            size,
        )?;
        let mut buf = [0u8; 16];
        buf[..size].copy_from_slice(&bytes);
        Ok(Val::Int {
            v: u128::from_le_bytes(buf),
            bits,
        })
    }

    fn store(&mut self, place: &Place, value: Val) -> Result<(), InterpError> {
        let size = self.sizeof(&place.ty)?;
        if place.ty.scalar_bits().is_none() {
            return Err(self.err(format!("store to non-scalar {:?}", place.ty)));
        }
        let v = self.int(&value)?;
        let bytes = v.to_le_bytes();
        self.write_raw(
            &Val::Ptr {
                obj: place.obj,
                off: place.off,
                pointee: place.ty.clone(),
            },
            &bytes[..size],
        )
    }

    fn int(&self, v: &Val) -> Result<u128, InterpError> {
        match v {
            Val::Int { v, .. } => Ok(*v),
            Val::Ptr { .. } => Err(self.err("pointer used as an integer".to_string())),
        }
    }

    fn place(&mut self, e: &Expr) -> Result<Place, InterpError> {
        match e {
            Expr::Var(name) => match self.lookup(name)? {
                Binding::Obj {
                    obj,
                    ty,
                    array: false,
                } => Ok(Place { obj, off: 0, ty }),
                other => Err(self.err(format!("{name} is not assignable: {other:?}"))),
            },
            Expr::Limb { base, via_ptr, idx } => {
                let (obj, off, kind) = match (self.lookup(base)?, via_ptr) {
                    (
                        Binding::Val(Val::Ptr {
                            obj,
                            off,
                            pointee: CType::Elem(kind),
                        }),
                        true,
                    ) => (obj, off, kind),
                    (
                        Binding::Obj {
                            obj,
                            ty: CType::Elem(kind),
                            array: false,
                        },
                        false,
                    ) => (obj, 0, kind),
                    (other, _) => {
                        return Err(self.err(format!("{base} is not an element: {other:?}")))
                    }
                };
                let (cell, dims) = self.elem_layout(kind)?;
                if idx.len() != dims.len() || idx.iter().zip(&dims).any(|(i, d)| i >= d) {
                    return Err(self.err(format!("index {idx:?} out of bounds for {dims:?}")));
                }
                let linear = idx.iter().zip(&dims).fold(0, |acc, (i, d)| acc * d + i);
                Ok(Place {
                    obj,
                    off: off + linear * self.sizeof(&cell)?,
                    ty: cell,
                })
            }
            Expr::Index { base, idx } => {
                let ptr = self.eval(base)?;
                let i = self.eval(idx)?;
                let i = self.int(&i)? as usize;
                match ptr {
                    Val::Ptr { obj, off, pointee } => Ok(Place {
                        obj,
                        off: off + i * self.sizeof(&pointee)?,
                        ty: pointee,
                    }),
                    other => Err(self.err(format!("indexing a non-pointer {other:?}"))),
                }
            }
            other => Err(self.err(format!("not an lvalue: {other:?}"))),
        }
    }

    fn eval(&mut self, e: &Expr) -> Result<Val, InterpError> {
        match e {
            Expr::Lit(v) => Ok(Val::Int { v: *v, bits: 0 }),
            Expr::Const(name) => match self.program.define(name) {
                Some(v) => Ok(Val::Int { v, bits: 0 }),
                None => Err(self.err(format!("no define {name}"))),
            },
            Expr::Var(name) => match self.lookup(name)? {
                Binding::Val(v) => Ok(v),
                Binding::Obj {
                    obj,
                    ty,
                    array: true,
                } => Ok(Val::Ptr {
                    obj,
                    off: 0,
                    pointee: ty,
                }),
                Binding::Obj { obj, ty, .. } => self.load(&Place { obj, off: 0, ty }),
            },
            Expr::Limb { .. } | Expr::Index { .. } => {
                let place = self.place(e)?;
                self.load(&place)
            }
            Expr::Cast(ty, inner) => {
                let v = self.eval(inner)?;
                match (ty, v) {
                    (CType::Ptr(to), Val::Ptr { obj, off, .. }) => Ok(Val::Ptr {
                        obj,
                        off,
                        pointee: (**to).clone(),
                    }),
                    (ty, Val::Int { v, .. }) => {
                        let bits = ty
                            .scalar_bits()
                            .ok_or_else(|| self.err(format!("integer cast to {ty:?}")))?;
                        Ok(Val::Int {
                            v: v & width_mask(bits),
                            bits,
                        })
                    }
                    (ty, v) => Err(self.err(format!("cannot cast {v:?} to {ty:?}"))),
                }
            }
            Expr::Bin(op, l, r) => {
                let l = self.eval(l)?;
                let r = self.eval(r)?;
                self.binary(*op, l, r)
            }
            Expr::Not(inner) => match self.eval(inner)? {
                Val::Int { v, bits } => {
                    let w = promoted(v, bits);
                    Ok(Val::Int {
                        v: !v & width_mask(w),
                        bits: w,
                    })
                }
                other => Err(self.err(format!("complement of {other:?}"))),
            },
            Expr::Call(name, args) => {
                let vals = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.intrinsic(name, vals)
            }
            Expr::AddrOf(inner) => match &**inner {
                Expr::Var(name) => match self.lookup(name)? {
                    Binding::Obj { obj, ty, .. } => Ok(Val::Ptr {
                        obj,
                        off: 0,
                        pointee: ty,
                    }),
                    other => Err(self.err(format!("address of {other:?}"))),
                },
                other => {
                    let place = self.place(other)?;
                    Ok(Val::Ptr {
                        obj: place.obj,
                        off: place.off,
                        pointee: place.ty,
                    })
                }
            },
            Expr::SizeOf(ty) => Ok(Val::Int {
                v: self.sizeof(ty)? as u128,
                bits: 64,
            }),
        }
    }

    fn binary(&self, op: BinOp, l: Val, r: Val) -> Result<Val, InterpError> {
        let (Val::Int { v: a, bits: la }, Val::Int { v: b, bits: lb }) = (&l, &r) else {
            return Err(self.err(format!("{op:?} on pointers")));
        };
        let (a, b) = (*a, *b);
        let lw = promoted(a, *la);
        let w = lw.max(promoted(b, *lb));
        let m = width_mask(w);
        let v = match op {
            BinOp::Add => a.wrapping_add(b) & m,
            BinOp::Sub => a.wrapping_sub(b) & m,
            BinOp::Mul => a.wrapping_mul(b) & m,
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
            BinOp::Shl | BinOp::Shr => {
                if b >= lw as u128 {
                    return Err(self.err(format!("shift by {b} of a {lw}-bit value")));
                }
                let v = if op == BinOp::Shl { a << b } else { a >> b };
                return Ok(Val::Int {
                    v: v & width_mask(lw),
                    bits: lw,
                });
            }
            BinOp::Eq => {
                return Ok(Val::Int {
                    v: (a == b) as u128,
                    bits: 32,
                })
            }
            BinOp::Lt => {
                return Ok(Val::Int {
                    v: (a < b) as u128,
                    bits: 32,
                })
            }
        };
        Ok(Val::Int { v, bits: w })
    }

    fn intrinsic(&mut self, name: &str, args: Vec<Val>) -> Result<Val, InterpError> {
        let ints = args
            .iter()
            .map(|a| self.int(a))
            .collect::<Result<Vec<_>, _>>();
        let vec = |v: u128| -> Result<Val, InterpError> { Ok(Val::Int { v, bits: 128 }) };
        let lo = |v: u128| v & u64::MAX as u128;
        match (name, ints.as_deref()) {
            ("_mm_setzero_si128", Ok([])) => vec(0),
            ("_mm_clmulepi64_si128", Ok([a, b, imm])) => {
                let x = if imm & 0x01 != 0 { a >> 64 } else { lo(*a) };
                let y = if imm & 0x10 != 0 { b >> 64 } else { lo(*b) };
                vec(clmul64(x as u64, y as u64))
            }
            ("_mm_move_epi64", Ok([a])) => vec(lo(*a)),
            ("_mm_bsrli_si128", Ok([a, n])) => vec(if *n >= 16 { 0 } else { a >> (8 * n) }),
            ("_mm_unpacklo_epi64", Ok([a, b])) => vec(lo(*a) | (lo(*b) << 64)),
            ("_mm_slli_epi64", Ok([a, n])) => vec(lanes_shift(*a, *n, true)),
            ("_mm_srli_epi64", Ok([a, n])) => vec(lanes_shift(*a, *n, false)),
            ("_mm_set_epi64x", Ok([hi, low])) => vec((lo(*hi) << 64) | lo(*low)),
            ("_mm_and_si128", Ok([a, b])) => vec(a & b),
            ("_mm_xor_si128", Ok([a, b])) => vec(a ^ b),
            (name, _) if name.starts_with("_mm_") => {
                Err(self.err(format!("unsupported intrinsic {name}/{}", args.len())))
            }
            (name, _) => {
                let status = self.call_named(name, args)?;
                Ok(Val::Int {
                    v: status,
                    bits: 32,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionDef, Item, Param, TypeDecl};
    use crate::protocol::FnBuilder;

    fn program_with(body: FunctionDef) -> Program {
        let mut program = Program::new("t");
        program.push(Item::Type(TypeDecl::Elem {
            tag: "t_single".to_string(),
            kind: ElemKind::Single,
            cell: CType::Uint(64),
            dims: vec![2],
        }));
        program.push(Item::Function(body));
        program
    }

    #[test]
    fn arithmetic_wraps_at_operand_width() {
        let mut b = FnBuilder::new("f", false).param(CType::elem_ptr(ElemKind::Single), "res");
        b.set(Expr::limb("res", 0), Expr::limb("res", 0).add(Expr::lit(1)));
        b.set(
            Expr::limb("res", 1),
            Expr::limb("res", 1).cast(CType::Uint(128)).mul(Expr::lit(4)).shr(64),
        );
        let program = program_with(b.finish().expect("finish"));
        let mut m = Machine::new(&program);
        let res = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.write_limbs(res, ElemKind::Single, &[u64::MAX as u128, u64::MAX as u128])
            .expect("write");
        m.call("f", &[Arg::Ptr(res)]).expect("call");
        assert_eq!(m.read_limbs(res, ElemKind::Single).expect("read"), vec![0, 3]);
    }

    #[test]
    fn failing_checks_set_the_status() {
        let mut b = FnBuilder::new("f", true).param(CType::elem_ptr(ElemKind::Single), "res");
        b.add_assign(CType::Uint(64), Expr::limb("res", 0), Expr::limb("res", 1));
        let program = program_with(b.finish().expect("finish"));
        let mut m = Machine::new(&program);
        let res = m.alloc_elem(ElemKind::Single).expect("alloc");
        m.write_limbs(res, ElemKind::Single, &[u64::MAX as u128, 1]).expect("write");
        assert_eq!(m.call("f", &[Arg::Ptr(res)]).expect("call"), 1);
        assert_eq!(m.checks_failed(), 1);
    }

    #[test]
    fn oversized_shifts_are_errors() {
        let f = FunctionDef {
            name: "f".to_string(),
            params: vec![Param {
                ty: CType::elem_ptr(ElemKind::Single),
                name: "res".to_string(),
            }],
            body: vec![Stmt::Assign {
                dst: Expr::limb("res", 0),
                op: AssignOp::Set,
                src: Expr::limb("res", 0).shl(64),
            }],
        };
        let program = program_with(f);
        let mut m = Machine::new(&program);
        let res = m.alloc_elem(ElemKind::Single).expect("alloc");
        let err = m.call("f", &[Arg::Ptr(res)]).expect_err("shift");
        assert!(err.message.contains("(fn=f)"), "{err}");
    }

    #[test]
    fn carryless_multiply_selects_lanes() {
        let program = Program::new("t");
        let mut m = Machine::new(&program);
        let a = (3u128 << 64) | 1;
        let b = 2u128;
        let hi = m
            .intrinsic(
                "_mm_clmulepi64_si128",
                vec![
                    Val::Int { v: a, bits: 128 },
                    Val::Int { v: b, bits: 128 },
                    Val::Int { v: 0x01, bits: 0 },
                ],
            )
            .expect("clmul");
        assert_eq!(hi, Val::Int { v: 6, bits: 128 });
    }
}
