//! Overflow-bound analysis for the Crandall family.
//!
//! Both formulations walk the same schoolbook product map the generators emit, so a
//! flag computed here describes exactly the operations that end up in the C text.

use num::{BigUint, One, Zero};
use serde::Serialize;

use crate::generate::{GenError, GenErrorKind};
use crate::model::{CarryWidth, LimbLayout};

/// One `a[i] * b[j]` term accumulated into a result limb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProductTerm {
    pub i: usize,
    pub j: usize,
    /// `Some(s)` when the term sits past bit π and is folded back as δ·2^s.
    pub shift: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductMap {
    /// Terms per result limb, in emission order.
    pub terms: Vec<Vec<ProductTerm>>,
    /// Σw − π; the top carry folds back into limb 0 as δ·2^carry_shift.
    pub carry_shift: u32,
}

impl ProductMap {
    pub fn folded_terms(&self) -> impl Iterator<Item = (usize, &ProductTerm)> {
        self.terms
            .iter()
            .enumerate()
            .flat_map(|(k, ts)| ts.iter().map(move |t| (k, t)))
            .filter(|(_, t)| t.shift.is_some())
    }
}

/// Places every limb pair of a schoolbook product into a result limb.
pub fn product_map(pi: u32, widths: &[u32]) -> Result<ProductMap, GenError> {
    let n = widths.len();
    let mut offsets = Vec::with_capacity(n + 1);
    let mut acc = 0u32;
    offsets.push(0);
    for w in widths {
        acc += w;
        offsets.push(acc);
    }
    let total = acc;
    if total < pi {
        return Err(GenError::new(
            GenErrorKind::UnsupportedConfiguration,
            format!("limb widths sum to {total} bits, below pi={pi}"),
        ));
    }

    let mut terms = vec![Vec::new(); n];
    for i in 0..n {
        for j in 0..n {
            let pos = offsets[i] + offsets[j];
            if let Some(k) = offsets[..n].iter().position(|o| *o == pos) {
                terms[k].push(ProductTerm { i, j, shift: None });
                continue;
            }
            if pos < pi {
                return Err(GenError::new(
                    GenErrorKind::UnsupportedConfiguration,
                    format!(
                        "limbs {i} and {j} multiply to bit {pos}, which is not a limb boundary"
                    ),
                ));
            }
            let folded = pos - pi;
            let Some(k) = (0..n).find(|k| offsets[*k] <= folded && folded < offsets[*k + 1])
            else {
                return Err(GenError::new(
                    GenErrorKind::UnsupportedConfiguration,
                    format!("limbs {i} and {j} fold to bit {folded}, past the top limb"),
                ));
            };
            terms[k].push(ProductTerm {
                i,
                j,
                shift: Some(folded - offsets[k]),
            });
        }
    }
    for (k, ts) in terms.iter_mut().enumerate() {
        ts.sort_by_key(|t| (t.i, t.j));
        if ts.is_empty() {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                format!("no product term lands in limb {k}"),
            ));
        }
    }
    Ok(ProductMap {
        terms,
        carry_shift: total - pi,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParams {
    pub pi: u32,
    pub delta: u64,
    pub widths: Vec<u32>,
    pub wordsize: u32,
}

impl BoundParams {
    pub fn new(pi: u32, delta: u64, layout: &LimbLayout) -> Self {
        Self {
            pi,
            delta,
            widths: layout.widths.clone(),
            wordsize: layout.wordsize,
        }
    }

    fn pow2(bits: u32) -> BigUint {
        BigUint::one() << bits
    }

    fn word_limit(&self) -> BigUint {
        Self::pow2(self.wordsize)
    }

    fn double_limit(&self) -> BigUint {
        Self::pow2(2 * self.wordsize)
    }

    fn limb_max(&self) -> Vec<BigUint> {
        self.widths
            .iter()
            .map(|w| Self::pow2(*w) - BigUint::one())
            .collect()
    }

    pub fn term_scale(&self, term: &ProductTerm) -> BigUint {
        match term.shift {
            None => BigUint::one(),
            Some(s) => BigUint::from(self.delta) << s,
        }
    }

    pub fn fold_factor(&self, map: &ProductMap) -> BigUint {
        BigUint::from(self.delta) << map.carry_shift
    }
}

fn bits(v: &BigUint) -> u64 {
    v.bits()
}

fn mul_bounds(p: &BoundParams, map: &ProductMap, input: &[BigUint]) -> Vec<BigUint> {
    map.terms
        .iter()
        .map(|ts| {
            ts.iter().fold(BigUint::zero(), |acc, t| {
                acc + &input[t.i] * &input[t.j] * p.term_scale(t)
            })
        })
        .collect()
}

fn temp_bound(p: &BoundParams, map: &ProductMap, input: &[BigUint]) -> BigUint {
    map.folded_terms()
        .map(|(_, t)| &input[t.j] * p.term_scale(t))
        .max()
        .unwrap_or_else(BigUint::zero)
}

fn join(a: &[BigUint], b: &[BigUint]) -> Vec<BigUint> {
    a.iter()
        .zip(b)
        .map(|(x, y)| if x >= y { x.clone() } else { y.clone() })
        .collect()
}

struct CarryPass {
    out: Vec<BigUint>,
    /// Largest intra-limb carry.
    carry: BigUint,
    /// Top carry times the fold factor.
    feedback: BigUint,
    /// Largest running accumulator value.
    peak: BigUint,
}

/// Bounds after one `carry_round` over inputs bounded by `input`.
fn carry_pass(p: &BoundParams, map: &ProductMap, input: &[BigUint]) -> CarryPass {
    let n = p.widths.len();
    let masks = p.limb_max();
    let mut out = Vec::with_capacity(n);
    let mut c = BigUint::zero();
    let mut carry = BigUint::zero();
    let mut peak = BigUint::zero();
    for k in 0..n {
        let x = &input[k] + &c;
        c = &x >> p.widths[k];
        if c > carry {
            carry = c.clone();
        }
        out.push(if x > masks[k] { masks[k].clone() } else { x.clone() });
        if x > peak {
            peak = x;
        }
    }
    let feedback = &c * p.fold_factor(map);
    let r0 = &out[0] + &feedback;
    let c0 = &r0 >> p.widths[0];
    out[0] = if r0 > masks[0] { masks[0].clone() } else { r0 };
    out[1] += c0;
    CarryPass {
        out,
        carry,
        feedback,
        peak,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedFormBounds {
    pub accumulator_bits: Vec<u64>,
    pub carry_bits: u64,
    pub feedback_bits: u64,
    pub flags: CarryWidth,
}

/// Worst-case bounds of one multiply-then-carry cycle at maximal limb values.
pub fn closed_form(p: &BoundParams, map: &ProductMap) -> Result<ClosedFormBounds, GenError> {
    let maxes = p.limb_max();
    let acc = mul_bounds(p, map, &maxes);
    let pass = carry_pass(p, map, &acc);
    if pass.peak >= p.double_limit() {
        return Err(GenError::new(
            GenErrorKind::UnsupportedConfiguration,
            format!(
                "limb layout {:?} overflows a {}-bit accumulator ({} bits needed)",
                p.widths,
                2 * p.wordsize,
                bits(&pass.peak)
            ),
        ));
    }
    let word = p.word_limit();
    let flags = CarryWidth {
        doublecarry: pass.carry >= word,
        doublecarryover: &pass.feedback + BoundParams::pow2(p.widths[0]) >= word,
        doublecarry_temp: temp_bound(p, map, &maxes) >= word,
    };
    Ok(ClosedFormBounds {
        accumulator_bits: acc.iter().map(bits).collect(),
        carry_bits: bits(&pass.carry),
        feedback_bits: bits(&pass.feedback),
        flags,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundViolation {
    pub stage: String,
    pub limb: usize,
    pub bits: u64,
    pub limit_bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixpointReport {
    pub iterations: usize,
    pub double_bound_bits: Vec<u64>,
    pub limb_bound_bits: Vec<u64>,
    pub add_bound_bits: Vec<u64>,
    pub carry_bound_bits: u64,
    pub feedback_bound_bits: u64,
    pub flags: CarryWidth,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<BoundViolation>,
}

impl FixpointReport {
    /// True when no bound was violated and `used` allocates every width found necessary.
    pub fn proves_safe(&self, used: CarryWidth) -> bool {
        self.violations.is_empty() && used.covers(self.flags)
    }
}

fn check_all(
    violations: &mut Vec<BoundViolation>,
    stage: &str,
    values: &[BigUint],
    limit_bits: u32,
) {
    let limit = BoundParams::pow2(limit_bits);
    for (limb, v) in values.iter().enumerate() {
        if *v >= limit {
            violations.push(BoundViolation {
                stage: stage.to_string(),
                limb,
                bits: bits(v),
                limit_bits,
            });
        }
    }
}

struct FixState {
    dbounds: Vec<BigUint>,
    bounds: Vec<BigUint>,
    add: Vec<BigUint>,
    carry: BigUint,
    feedback: BigUint,
}

impl FixState {
    fn report(&self, p: &BoundParams, map: &ProductMap, iterations: usize) -> FixpointReport {
        let word = p.word_limit();
        let operands = join(&self.bounds, &p.limb_max());
        FixpointReport {
            iterations,
            double_bound_bits: self.dbounds.iter().map(bits).collect(),
            limb_bound_bits: self.bounds.iter().map(bits).collect(),
            add_bound_bits: self.add.iter().map(bits).collect(),
            carry_bound_bits: bits(&self.carry),
            feedback_bound_bits: bits(&self.feedback),
            flags: CarryWidth {
                doublecarry: self.carry >= word,
                doublecarryover: &self.feedback + BoundParams::pow2(p.widths[0]) >= word,
                doublecarry_temp: temp_bound(p, map, &operands) >= word,
            },
            violations: Vec::new(),
        }
    }
}

/// Iterates add, multiply and carry bounds until they stop growing.
///
/// Exhausting `max_iterations` is `BoundAnalysisNonconvergence`; violated width limits
/// end the iteration early and are listed in the report.
pub fn fixpoint(
    p: &BoundParams,
    map: &ProductMap,
    max_iterations: usize,
) -> Result<FixpointReport, GenError> {
    let _span = tracing::debug_span!("bounds_fixpoint", widths = ?p.widths).entered();
    let w = p.wordsize;
    let maxes = p.limb_max();
    let dbounds = mul_bounds(p, map, &maxes);
    let first = carry_pass(p, map, &dbounds);
    let mut state = FixState {
        dbounds,
        bounds: first.out,
        add: vec![BigUint::zero(); p.widths.len()],
        carry: first.carry,
        feedback: first.feedback,
    };

    let mut violations = Vec::new();
    check_all(&mut violations, "mul", &state.dbounds, 2 * w);
    check_all(&mut violations, "carry", &state.bounds, w);
    if !violations.is_empty() {
        let mut report = state.report(p, map, 0);
        report.violations = violations;
        return Ok(report);
    }

    for it in 1..=max_iterations {
        let add: Vec<BigUint> = state.bounds.iter().map(|b| b + b).collect();
        check_all(&mut violations, "add", &add, w);
        let mix: Vec<BigUint> = state
            .dbounds
            .iter()
            .zip(&state.bounds)
            .map(|(d, b)| d + b)
            .collect();
        check_all(&mut violations, "add_mix", &mix, 2 * w);
        let dbl: Vec<BigUint> = state.dbounds.iter().map(|d| d + d).collect();
        check_all(&mut violations, "add_dbl", &dbl, 2 * w);

        let add_carried = carry_pass(p, map, &add);
        let operands = join(&add_carried.out, &state.bounds);
        let dbounds = join(&mul_bounds(p, map, &operands), &state.dbounds);
        check_all(&mut violations, "mul", &dbounds, 2 * w);

        let pass = carry_pass(p, map, &dbounds);
        let bounds = join(&join(&pass.out, &add_carried.out), &state.bounds);
        check_all(&mut violations, "carry", &bounds, w);
        check_all(
            &mut violations,
            "carry",
            &[pass.peak.clone(), add_carried.peak.clone()],
            2 * w,
        );

        let carry = [&state.carry, &pass.carry, &add_carried.carry]
            .into_iter()
            .max()
            .cloned()
            .unwrap_or_else(BigUint::zero);
        let feedback = [&state.feedback, &pass.feedback, &add_carried.feedback]
            .into_iter()
            .max()
            .cloned()
            .unwrap_or_else(BigUint::zero);

        let stable = bounds == state.bounds
            && dbounds == state.dbounds
            && add == state.add
            && carry == state.carry
            && feedback == state.feedback;
        state = FixState {
            dbounds,
            bounds,
            add,
            carry,
            feedback,
        };

        if !violations.is_empty() {
            let mut report = state.report(p, map, it);
            report.violations = violations;
            tracing::debug!(iterations = it, "bound violation during fixpoint");
            return Ok(report);
        }
        if stable {
            tracing::debug!(iterations = it, "bounds converged");
            return Ok(state.report(p, map, it));
        }
    }

    Err(GenError::new(
        GenErrorKind::BoundAnalysisNonconvergence,
        format!("bound propagation did not converge within {max_iterations} iterations"),
    ))
}
