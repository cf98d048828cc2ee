use fieldgen_contracts::abi;

use crate::generate::{GenError, GenErrorKind};
use crate::ir::{
    AssignOp, BinOp, CType, Check, ElemKind, Expr, FunctionDef, Init, Item, Program,
    Stmt, TypeDecl,
};

pub fn emit_c_program(program: &Program) -> Result<String, GenError> {
    let mut emitter = Emitter::new();
    emitter.emit_program(program)?;
    Ok(emitter.out)
}

pub fn type_name(ty: &CType) -> String {
    match ty {
        CType::Int => "int".to_string(),
        CType::Size => "size_t".to_string(),
        CType::Uint(bits) => format!("uint{bits}_t"),
        CType::Vec128 => "__m128i".to_string(),
        CType::Elem(ElemKind::Single) => abi::FIELD_ELEM_T.to_string(),
        CType::Elem(ElemKind::Double) => abi::DFIELD_ELEM_T.to_string(),
        CType::Elem(ElemKind::Precomputed) => abi::FIELD_ELEM_PRECOMPUTED_T.to_string(),
        CType::Ptr(inner) => format!("{}*", type_name(inner)),
    }
}

struct Emitter {
    out: String,
    indent: usize,
    current_fn_name: Option<String>,
}

impl Emitter {
    fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
            current_fn_name: None,
        }
    }

    fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn open_block(&mut self) {
        self.line("{");
        self.indent += 1;
    }

    fn close_block(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("}");
    }

    fn err(&self, kind: GenErrorKind, message: String) -> GenError {
        match &self.current_fn_name {
            Some(name) => GenError::new(kind, format!("{message} (fn={name})")),
            None => GenError::new(kind, message),
        }
    }

    fn emit_program(&mut self, program: &Program) -> Result<(), GenError> {
        self.line(&format!("#ifndef {}", program.guard));
        self.line(&format!("#define {}", program.guard));
        self.line("");
        for item in &program.items {
            self.emit_item(item)?;
        }
        self.line("");
        self.line(&format!("#endif /* {} */", program.guard));
        if self.indent != 0 {
            return Err(self.err(
                GenErrorKind::Internal,
                format!("unbalanced blocks at end of program: depth={}", self.indent),
            ));
        }
        Ok(())
    }

    fn emit_item(&mut self, item: &Item) -> Result<(), GenError> {
        match item {
            Item::Comment(text) => {
                for l in text.lines() {
                    self.line(&format!("/* {l} */"));
                }
            }
            Item::Include { path, system } => {
                if *system {
                    self.line(&format!("#include <{path}>"));
                } else {
                    self.line(&format!("#include \"{path}\""));
                }
            }
            Item::Define {
                name,
                value,
                overridable,
            } => {
                let v = value.to_string();
                if *overridable {
                    self.line(&format!("#ifndef {name}"));
                    self.line(&format!("#define {name} {v}"));
                    self.line("#endif");
                } else {
                    self.line(&format!("#define {name} {v}"));
                }
            }
            Item::Type(TypeDecl::Alias { name, target }) => {
                self.line(&format!("typedef {target} {name};"));
            }
            Item::Type(TypeDecl::Elem {
                tag,
                kind,
                cell,
                dims,
            }) => {
                let dims: String = dims.iter().map(|d| format!("[{d}]")).collect();
                self.line(&format!("typedef struct {tag} {{"));
                self.indent += 1;
                self.line(&format!("{} val{dims};", type_name(cell)));
                self.indent -= 1;
                self.line(&format!("}} {};", type_name(&CType::Elem(*kind))));
            }
            Item::Function(f) => self.emit_function(f)?,
            Item::Macro { name, params, body } => {
                if params.is_empty() {
                    self.line(&format!("#define {name} {body}").trim_end().to_string());
                } else {
                    let line = format!("#define {name}({}) {body}", params.join(", "));
                    self.line(line.trim_end());
                }
            }
            Item::Blank => self.line(""),
        }
        Ok(())
    }

    fn emit_function(&mut self, f: &FunctionDef) -> Result<(), GenError> {
        self.current_fn_name = Some(f.name.clone());
        let params: Vec<String> = f
            .params
            .iter()
            .map(|p| format!("{} {}", type_name(&p.ty), p.name))
            .collect();
        self.line(&format!(
            "static inline __attribute__((always_inline)) int {}({})",
            f.name,
            params.join(", ")
        ));
        self.open_block();
        for stmt in &f.body {
            self.emit_stmt(stmt)?;
        }
        self.close_block();
        self.line("");
        self.current_fn_name = None;
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), GenError> {
        match stmt {
            Stmt::Decl {
                ty,
                name,
                len,
                init,
            } => {
                let arr = len.map(|n| format!("[{n}]")).unwrap_or_default();
                let init = match init {
                    None => String::new(),
                    Some(Init::Zero) => " = {0}".to_string(),
                    Some(Init::Expr(e)) => format!(" = {}", self.expr(e)?),
                };
                self.line(&format!("{} {name}{arr}{init};", type_name(ty)));
            }
            Stmt::Assign { dst, op, src } => {
                let op = match op {
                    AssignOp::Set => "=",
                    AssignOp::Add => "+=",
                    AssignOp::And => "&=",
                    AssignOp::Or => "|=",
                    AssignOp::Xor => "^=",
                };
                let line = format!("{} {op} {};", self.expr(dst)?, self.expr(src)?);
                self.line(&line);
            }
            Stmt::Check(check) => self.emit_check(check)?,
            Stmt::Call { func, args, status } => {
                let call = self.call(func, args)?;
                if *status {
                    self.line(&format!("{} |= {call};", abi::STATUS_FLAG));
                } else {
                    self.line(&format!("{call};"));
                }
            }
            Stmt::If { cond, then, els } => {
                let cond = self.expr(cond)?;
                self.line(&format!("if ({cond})"));
                self.open_block();
                for s in then {
                    self.emit_stmt(s)?;
                }
                self.close_block();
                if !els.is_empty() {
                    self.line("else");
                    self.open_block();
                    for s in els {
                        self.emit_stmt(s)?;
                    }
                    self.close_block();
                }
            }
            Stmt::Comment(text) => self.line(&format!("/* {text} */")),
            Stmt::Return(e) => {
                let line = format!("return {};", self.expr(e)?);
                self.line(&line);
            }
        }
        Ok(())
    }

    fn emit_check(&mut self, check: &Check) -> Result<(), GenError> {
        match check {
            Check::Add { ty, lhs, rhs } | Check::Mul { ty, lhs, rhs } => {
                let builtin = match check {
                    Check::Add { .. } => "__builtin_add_overflow",
                    _ => "__builtin_mul_overflow",
                };
                let t = type_name(ty);
                let lhs = self.operand(lhs)?;
                let rhs = self.operand(rhs)?;
                self.open_block();
                self.line(&format!("{t} overflow_check_result;"));
                self.line(&format!(
                    "if ({builtin}(({t}) {lhs}, ({t}) {rhs}, &overflow_check_result))"
                ));
                self.open_block();
                self.line(&format!("{} |= 1;", abi::STATUS_FLAG));
                self.close_block();
                self.close_block();
            }
            Check::Fits { bits, value } => {
                let v = self.operand(value)?;
                self.line(&format!("if ({v} >> {bits})"));
                self.open_block();
                self.line(&format!("{} |= 1;", abi::STATUS_FLAG));
                self.close_block();
            }
        }
        Ok(())
    }

    fn call(&self, func: &str, args: &[Expr]) -> Result<String, GenError> {
        let mut parts = Vec::with_capacity(args.len());
        for a in args {
            parts.push(self.expr(a)?);
        }
        Ok(format!("{func}({})", parts.join(", ")))
    }

    fn lit(&self, v: u128) -> Result<String, GenError> {
        if v > u64::MAX as u128 {
            return Err(self.err(
                GenErrorKind::Internal,
                format!("literal does not fit a 64-bit constant: {v:#x}"),
            ));
        }
        Ok(if v <= 0xffff {
            v.to_string()
        } else if v <= u32::MAX as u128 {
            format!("{v:#x}")
        } else {
            format!("{v:#x}ULL")
        })
    }

    fn is_atomic(e: &Expr) -> bool {
        matches!(
            e,
            Expr::Lit(_)
                | Expr::Const(_)
                | Expr::Var(_)
                | Expr::Limb { .. }
                | Expr::Index { .. }
                | Expr::Call(..)
                | Expr::SizeOf(_)
        )
    }

    fn operand(&self, e: &Expr) -> Result<String, GenError> {
        let s = self.expr(e)?;
        if Self::is_atomic(e) {
            Ok(s)
        } else {
            Ok(format!("({s})"))
        }
    }

    fn expr(&self, e: &Expr) -> Result<String, GenError> {
        Ok(match e {
            Expr::Lit(v) => self.lit(*v)?,
            Expr::Const(name) | Expr::Var(name) => name.clone(),
            Expr::Limb { base, via_ptr, idx } => {
                let idx: String = idx.iter().map(|i| format!("[{i}]")).collect();
                if *via_ptr {
                    format!("{base}->val{idx}")
                } else {
                    format!("{base}.val{idx}")
                }
            }
            Expr::Index { base, idx } => {
                format!("{}[{}]", self.operand(base)?, self.expr(idx)?)
            }
            Expr::Cast(ty, inner) => format!("({}) {}", type_name(ty), self.operand(inner)?),
            Expr::Bin(op, lhs, rhs) => {
                let op = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Shl => "<<",
                    BinOp::Shr => ">>",
                    BinOp::And => "&",
                    BinOp::Or => "|",
                    BinOp::Xor => "^",
                    BinOp::Eq => "==",
                    BinOp::Lt => "<",
                };
                format!("{} {op} {}", self.operand(lhs)?, self.operand(rhs)?)
            }
            Expr::Not(inner) => format!("~{}", self.operand(inner)?),
            Expr::Call(func, args) => self.call(func, args)?,
            Expr::AddrOf(inner) => format!("&{}", self.operand(inner)?),
            Expr::SizeOf(ty) => format!("sizeof({})", type_name(ty)),
        })
    }
}
