use std::fmt;

use fieldgen_contracts::{FIELDGEN_BOUNDS_SCHEMA_VERSION, FIELDGEN_REPORT_SCHEMA_VERSION};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::binary::BinaryGen;
use crate::bounds::{self, BoundParams, ClosedFormBounds, FixpointReport, ProductMap};
use crate::c_emit;
use crate::crandall::{CrandallGen, PrimeParams};
use crate::diagnostics::{Diagnostic, Stage};
use crate::ir::Program;
use crate::language;
use crate::mersenne::MersenneGen;
use crate::model::{CarryWidth, FieldDescriptor, GeneratorInput, MulMethod};
use crate::precompute::PrecomputingGen;
use crate::protocol::FieldGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenErrorKind {
    UnsupportedConfiguration,
    BoundAnalysisNonconvergence,
    EncodingIncompatibility,
    Internal,
}

impl GenErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GenErrorKind::UnsupportedConfiguration => "unsupported configuration",
            GenErrorKind::BoundAnalysisNonconvergence => "bound analysis did not converge",
            GenErrorKind::EncodingIncompatibility => "encoding incompatibility",
            GenErrorKind::Internal => "internal error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenError {
    pub kind: GenErrorKind,
    pub message: String,
}

impl GenError {
    pub fn new(kind: GenErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for GenError {}

/// Whether emitted routines carry runtime overflow checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPolicy {
    /// Unchecked only when the fixpoint proves every step safe.
    #[default]
    Auto,
    Always,
    Never,
}

/// Instruction-set capabilities of the target the header is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetCaps {
    pub clmul: bool,
}

impl TargetCaps {
    pub fn detect() -> Self {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            Self {
                clmul: std::arch::is_x86_feature_detected!("pclmulqdq"),
            }
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            Self { clmul: false }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub check: CheckPolicy,
    /// Fixpoint budget; `None` uses `limits::max_fixpoint_iterations()`.
    pub max_fixpoint_iterations: Option<usize>,
    pub caps: TargetCaps,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            check: CheckPolicy::Auto,
            max_fixpoint_iterations: None,
            caps: TargetCaps::detect(),
        }
    }
}

impl GenerateOptions {
    fn fixpoint_budget(&self) -> usize {
        self.max_fixpoint_iterations
            .unwrap_or_else(language::limits::max_fixpoint_iterations)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub schema_version: String,
    pub field: String,
    pub generator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carry: Option<CarryWidth>,
    pub checked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_form: Option<ClosedFormBounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixpoint: Option<FixpointReport>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_bytes: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub program: Program,
    pub report: GenerationReport,
}

#[derive(Debug, Clone)]
pub struct GenerateOutput {
    pub c_src: String,
    pub report: GenerationReport,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Emits the full routine set for `input` as C source.
pub fn generate_field_arithmetic(
    input: &GeneratorInput,
    options: &GenerateOptions,
) -> Result<GenerateOutput, GenError> {
    let BuildOutput {
        program,
        mut report,
    } = build_program(input, options)?;
    let c_src = c_emit::emit_c_program(&program)?;
    let max_bytes = language::limits::max_c_bytes();
    if c_src.len() > max_bytes {
        return Err(GenError::new(
            GenErrorKind::Internal,
            format!(
                "emitted source too large: max_c_bytes={max_bytes} got {}",
                c_src.len()
            ),
        ));
    }
    report.c_sha256 = Some(sha256_hex(c_src.as_bytes()));
    report.c_bytes = Some(c_src.len());
    Ok(GenerateOutput { c_src, report })
}

/// Selects a generator, runs the bound analysis and returns the typed program.
pub fn build_program(
    input: &GeneratorInput,
    options: &GenerateOptions,
) -> Result<BuildOutput, GenError> {
    if input.multiplication.method == MulMethod::Karatsuba {
        return Err(GenError::new(
            GenErrorKind::UnsupportedConfiguration,
            "karatsuba multiplication has no generator".to_string(),
        ));
    }
    let mut report = GenerationReport {
        schema_version: FIELDGEN_REPORT_SCHEMA_VERSION.to_string(),
        field: input.field.describe(),
        generator: String::new(),
        carry: None,
        checked: false,
        closed_form: None,
        fixpoint: None,
        diagnostics: Vec::new(),
        c_sha256: None,
        c_bytes: None,
    };

    let generator = match &input.field {
        FieldDescriptor::Binary { n, polynomial } => {
            binary_generator(input, *n, polynomial, options)?
        }
        FieldDescriptor::CrandallPrime { .. } | FieldDescriptor::MersennePrime { .. } => {
            prime_generator(input, options, &mut report)?
        }
    };
    report.generator = generator.name().to_string();
    tracing::info!(
        generator = generator.name(),
        field = %report.field,
        checked = report.checked,
        "selected generator"
    );

    let program = generator.emit_program()?;
    Ok(BuildOutput { program, report })
}

fn binary_generator(
    input: &GeneratorInput,
    n: u32,
    polynomial: &crate::model::Polynomial,
    options: &GenerateOptions,
) -> Result<FieldGenerator, GenError> {
    if !options.caps.clmul {
        return Err(GenError::new(
            GenErrorKind::UnsupportedConfiguration,
            "binary fields need a carry-less multiply instruction (pclmulqdq)".to_string(),
        ));
    }
    if input.multiplication.precompute {
        return Err(GenError::new(
            GenErrorKind::UnsupportedConfiguration,
            "precomputed multiplication is only available for prime fields".to_string(),
        ));
    }
    input.encoding.validate((n / 64) as usize)?;
    let encoded = input.encoding.encoded_bits();
    if encoded > n {
        return Err(GenError::new(
            GenErrorKind::EncodingIncompatibility,
            format!("an encoded block needs {encoded} bits but GF(2^{n}) holds {n}"),
        ));
    }
    Ok(FieldGenerator::Binary(BinaryGen::new(
        n,
        polynomial,
        input.encoding.clone(),
    )?))
}

fn prime_generator(
    input: &GeneratorInput,
    options: &GenerateOptions,
    report: &mut GenerationReport,
) -> Result<FieldGenerator, GenError> {
    let pi = input.field.bits();
    let delta = input.field.delta().unwrap_or(1);
    input.limbs.validate(pi)?;
    input.encoding.validate(input.limbs.numlimbs())?;

    let encoded = input.encoding.encoded_bits();
    if encoded > pi {
        let kept = input.limbs.total_bits();
        let message = if encoded > kept {
            format!(
                "an encoded block needs {encoded} bits but the limbs hold {kept}; bits at or above 2^{kept} are dropped"
            )
        } else {
            format!(
                "an encoded block needs {encoded} bits but the field holds {pi}; the top bits fold back as a multiple of p"
            )
        };
        tracing::warn!(encoded_bits = encoded, pi, "encoding exceeds field size");
        report.diagnostics.push(
            Diagnostic::warning("FG-ENCODING-INCOMPATIBLE-0001", Stage::Encoding, message)
                .with_data("encoded_bits", serde_json::json!(encoded)),
        );
    }

    let map = bounds::product_map(pi, &input.limbs.widths)?;
    let params = BoundParams::new(pi, delta, &input.limbs);
    let closed = bounds::closed_form(&params, &map)?;
    let carry = closed.flags.union(input.multiplication.force);

    let checked = match options.check {
        CheckPolicy::Always => true,
        CheckPolicy::Never => false,
        CheckPolicy::Auto => {
            let fix = bounds::fixpoint(&params, &map, options.fixpoint_budget())?;
            let safe = fix.proves_safe(carry);
            if !safe {
                tracing::warn!(
                    violations = fix.violations.len(),
                    "bound analysis could not prove safety; emitting overflow checks"
                );
                let mut diag = Diagnostic::warning(
                    "FG-BOUNDS-UNPROVEN-0001",
                    Stage::Bounds,
                    format!(
                        "fixpoint found {} bound violation(s); routines are emitted with overflow checks",
                        fix.violations.len()
                    ),
                );
                diag.notes = fix
                    .violations
                    .iter()
                    .map(|v| {
                        format!(
                            "{} limb {}: {} bits exceeds {}",
                            v.stage, v.limb, v.bits, v.limit_bits
                        )
                    })
                    .collect();
                report.diagnostics.push(diag);
            }
            report.fixpoint = Some(fix);
            !safe
        }
    };
    report.carry = Some(carry);
    report.checked = checked;
    report.closed_form = Some(closed);

    let p = PrimeParams {
        pi,
        delta,
        layout: input.limbs.clone(),
        encoding: input.encoding.clone(),
        carry,
        checked,
        map,
    };
    let generator = if input.multiplication.precompute {
        FieldGenerator::Precomputing(PrecomputingGen::new(p)?)
    } else if matches!(input.field, FieldDescriptor::MersennePrime { .. }) {
        FieldGenerator::Mersenne(MersenneGen::new(p)?)
    } else {
        FieldGenerator::Crandall(CrandallGen::new(p)?)
    };
    Ok(generator)
}

#[derive(Debug, Clone, Serialize)]
pub struct BoundsSummary {
    pub schema_version: String,
    pub field: String,
    pub widths: Vec<u32>,
    pub wordsize: u32,
    pub closed_form: ClosedFormBounds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixpoint: Option<FixpointReport>,
    pub converged: bool,
    pub proves_safe: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Both bound formulations for a prime-field input, without emitting code.
///
/// Non-convergence is reported in the summary rather than returned as an error.
pub fn analyze_bounds(
    input: &GeneratorInput,
    max_fixpoint_iterations: Option<usize>,
) -> Result<BoundsSummary, GenError> {
    let Some(delta) = input.field.delta() else {
        return Err(GenError::new(
            GenErrorKind::UnsupportedConfiguration,
            "bound analysis applies to prime fields only".to_string(),
        ));
    };
    let pi = input.field.bits();
    input.limbs.validate(pi)?;
    let map: ProductMap = bounds::product_map(pi, &input.limbs.widths)?;
    let params = BoundParams::new(pi, delta, &input.limbs);
    let closed = bounds::closed_form(&params, &map)?;
    let carry = closed.flags.union(input.multiplication.force);
    let budget =
        max_fixpoint_iterations.unwrap_or_else(language::limits::max_fixpoint_iterations);

    let mut diagnostics = Vec::new();
    let (fixpoint, converged) = match bounds::fixpoint(&params, &map, budget) {
        Ok(fix) => (Some(fix), true),
        Err(err) if err.kind == GenErrorKind::BoundAnalysisNonconvergence => {
            diagnostics.push(Diagnostic::from_gen_error(&err));
            (None, false)
        }
        Err(err) => return Err(err),
    };
    let proves_safe = fixpoint
        .as_ref()
        .map(|f| f.proves_safe(carry))
        .unwrap_or(false);
    Ok(BoundsSummary {
        schema_version: FIELDGEN_BOUNDS_SCHEMA_VERSION.to_string(),
        field: input.field.describe(),
        widths: input.limbs.widths.clone(),
        wordsize: input.limbs.wordsize,
        closed_form: closed,
        fixpoint,
        converged,
        proves_safe,
        diagnostics,
    })
}
