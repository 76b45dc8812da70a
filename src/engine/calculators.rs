//! Core calculation functions.
//!
//! Pure functions over immutable snapshots - no shared state is read or
//! written while a calculation runs. Forward evaluation works in `f64` so
//! that identical inputs always produce bit-identical outputs; money
//! rounding happens only when results are presented.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::{EngineError, EngineResult};
use super::models::Model;

/// Input values keyed by variable name
pub type InputValues = BTreeMap<String, f64>;

/// Round to specified decimal places using banker's rounding (ROUND_HALF_EVEN).
///
/// # Examples
/// ```
/// use rust_decimal_macros::dec;
/// use budget_engine::engine::round_money;
///
/// assert_eq!(round_money(dec!(2.5), 0), dec!(2));   // rounds to even
/// assert_eq!(round_money(dec!(1.234), 2), dec!(1.23));
/// ```
pub fn round_money(amount: Decimal, places: u32) -> Decimal {
    amount.round_dp_with_strategy(places, RoundingStrategy::MidpointNearestEven)
}

/// Convert an engine value to a 2dp money amount, if it is representable.
///
/// The result always carries two decimal places, so `600.0` renders as `600.00`.
pub fn money_from_f64(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| {
        let mut amount = round_money(d, 2);
        amount.rescale(2);
        amount
    })
}

/// Root-finding limits for reverse calculation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    /// Accepted residual, relative to max(1, |target|)
    pub tolerance: f64,
    /// Bisection steps allowed once a root is bracketed
    pub max_iterations: usize,
    /// Segments the valid range is split into when searching for a bracket
    pub scan_segments: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 100,
            scan_segments: 64,
        }
    }
}

/// Value of one term
#[derive(Debug, Clone, PartialEq)]
pub struct TermValue {
    pub name: String,
    pub value: f64,
    pub unit: Option<String>,
}

/// Result of a forward calculation
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardResult {
    pub model_id: String,
    /// Primary output term name
    pub output: String,
    /// Primary output value
    pub value: f64,
    /// Every term in evaluation order
    pub breakdown: Vec<TermValue>,
}

impl ForwardResult {
    pub fn term(&self, name: &str) -> Option<f64> {
        self.breakdown.iter().find(|t| t.name == name).map(|t| t.value)
    }
}

/// Target of a reverse calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseTarget {
    /// Term to match; the model's primary output when omitted
    #[serde(default)]
    pub output: Option<String>,
    pub value: f64,
}

impl ReverseTarget {
    pub fn primary(value: f64) -> Self {
        Self {
            output: None,
            value,
        }
    }
}

/// Result of a reverse calculation
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseResult {
    pub model_id: String,
    /// Input that was solved for
    pub variable: String,
    pub value: f64,
    pub output: String,
    pub target: f64,
    pub iterations: usize,
    pub residual: f64,
    /// Forward evaluation at the solved value
    pub forward: ForwardResult,
}

/// One model's outcome in comparison mode
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonEntry {
    pub model_id: String,
    pub model_name: String,
    pub result: EngineResult<ForwardResult>,
}

/// Evaluate every term without validating inputs.
///
/// `inputs` must contain every model input.
fn evaluate(model: &Model, inputs: &InputValues) -> EngineResult<ForwardResult> {
    let mut scope: HashMap<&str, f64> = HashMap::with_capacity(
        model.inputs().len() + model.coefficients().len() + model.terms().len(),
    );
    for spec in model.inputs() {
        if let Some(value) = inputs.get(&spec.name) {
            scope.insert(spec.name.as_str(), *value);
        }
    }
    for (name, value) in model.coefficients() {
        scope.insert(name.as_str(), *value);
    }

    let mut breakdown = Vec::with_capacity(model.terms().len());
    for term in model.terms() {
        let value = term.expr.eval(&|name: &str| scope.get(name).copied());
        if !value.is_finite() {
            return Err(EngineError::NonFinite {
                term: term.name.clone(),
            });
        }
        scope.insert(term.name.as_str(), value);
        breakdown.push(TermValue {
            name: term.name.clone(),
            value,
            unit: term.unit.clone(),
        });
    }

    let value = scope.get(model.output()).copied().unwrap_or(f64::NAN);
    Ok(ForwardResult {
        model_id: model.id().to_string(),
        output: model.output().to_string(),
        value,
        breakdown,
    })
}

fn check_range(model: &Model, inputs: &InputValues) -> EngineResult<()> {
    for spec in model.inputs() {
        if let Some(&value) = inputs.get(&spec.name) {
            if !spec.valid_range.contains(value) {
                return Err(EngineError::OutOfRange {
                    variable: spec.name.clone(),
                    value,
                    min: spec.valid_range.min,
                    max: spec.valid_range.max,
                });
            }
        }
    }
    Ok(())
}

/// Evaluate `model` from a complete set of inputs.
///
/// Inputs the model does not declare are ignored, so one input set can be
/// shared across models in comparison mode.
pub fn calculate_forward(model: &Model, inputs: &InputValues) -> EngineResult<ForwardResult> {
    let missing: Vec<String> = model
        .inputs()
        .iter()
        .filter(|spec| !inputs.contains_key(&spec.name))
        .map(|spec| spec.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::MissingInput { missing });
    }
    check_range(model, inputs)?;
    evaluate(model, inputs)
}

/// Solve for the single input absent from `known` so that the target term
/// equals `target.value`.
///
/// The free variable's valid range is scanned in `scan_segments` steps for a
/// sign change of `f(x) - target`; the first bracket found is refined by
/// bisection. A sample that already meets the tolerance is returned as is.
pub fn calculate_reverse(
    model: &Model,
    target: &ReverseTarget,
    known: &InputValues,
    config: &SolverConfig,
) -> EngineResult<ReverseResult> {
    let output = match &target.output {
        Some(name) if model.has_term(name) => name.clone(),
        Some(name) => {
            return Err(EngineError::NotFound {
                kind: "Output",
                id: name.clone(),
            })
        }
        None => model.output().to_string(),
    };

    let free: Vec<&str> = model
        .inputs()
        .iter()
        .filter(|spec| !known.contains_key(&spec.name))
        .map(|spec| spec.name.as_str())
        .collect();
    let variable = match free.as_slice() {
        [] => return Err(EngineError::Overdetermined),
        [single] => *single,
        _ => {
            return Err(EngineError::Underdetermined {
                free: free.iter().map(|s| s.to_string()).collect(),
            })
        }
    };
    check_range(model, known)?;

    let spec = model
        .input(variable)
        .ok_or_else(|| EngineError::NotFound {
            kind: "Input",
            id: variable.to_string(),
        })?;
    let range = spec.valid_range;
    let no_solution = || EngineError::NoSolution {
        variable: variable.to_string(),
        output: output.clone(),
        target: target.value,
        min: range.min,
        max: range.max,
    };
    if !target.value.is_finite() {
        return Err(no_solution());
    }

    let scale = target.value.abs().max(1.0);
    let threshold = config.tolerance * scale;
    let collapse_threshold = threshold.max(f64::EPSILON.sqrt() * scale);
    let mut trial = known.clone();
    let mut residual_at = |x: f64| -> f64 {
        trial.insert(variable.to_string(), x);
        match evaluate(model, &trial) {
            Ok(result) => result.term(&output).unwrap_or(f64::NAN) - target.value,
            Err(_) => f64::NAN,
        }
    };

    let segments = config.scan_segments.max(1);
    // Interpolated without `max - min`, which overflows for very wide ranges.
    let sample = |i: usize| -> f64 {
        if i == segments {
            range.max
        } else {
            let t = i as f64 / segments as f64;
            range.min * (1.0 - t) + range.max * t
        }
    };

    let mut solved: Option<(f64, f64, usize)> = None;
    let mut prev: Option<(f64, f64)> = None;
    for i in 0..=segments {
        let x = sample(i);
        let g = residual_at(x);
        if g.abs() <= threshold {
            solved = Some((x, g, 0));
            break;
        }
        if let Some((x_prev, g_prev)) = prev {
            if g.is_finite() && g_prev.is_finite() && g.signum() != g_prev.signum() {
                solved = bisect(
                    &mut residual_at,
                    (x_prev, g_prev),
                    (x, g),
                    threshold,
                    collapse_threshold,
                    config.max_iterations,
                );
                break;
            }
        }
        prev = if g.is_finite() { Some((x, g)) } else { None };
        if range.min == range.max {
            break;
        }
    }

    let Some((value, residual, iterations)) = solved else {
        warn!(
            model = model.id(),
            variable,
            target_value = target.value,
            "Reverse calculation found no solution"
        );
        return Err(no_solution());
    };

    let mut full = known.clone();
    full.insert(variable.to_string(), value);
    let forward = evaluate(model, &full)?;

    debug!(
        model = model.id(),
        variable,
        value,
        iterations,
        "Reverse calculation converged"
    );

    Ok(ReverseResult {
        model_id: model.id().to_string(),
        variable: variable.to_string(),
        value,
        output,
        target: target.value,
        iterations,
        residual,
        forward,
    })
}

/// Map a float onto `u64` so that integer order matches numeric order.
fn ordered_bits(x: f64) -> u64 {
    let bits = x.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn from_ordered_bits(key: u64) -> f64 {
    if key >> 63 == 1 {
        f64::from_bits(key & !(1 << 63))
    } else {
        f64::from_bits(!key)
    }
}

/// Midpoint of the floats between `lo` and `hi`, counted by representation.
///
/// Halving the number of representable values rather than the numeric width
/// collapses any finite bracket within 64 steps, however wide it is. `None`
/// once no float lies strictly between the two.
fn float_midpoint(lo: f64, hi: f64) -> Option<f64> {
    let (a, b) = (ordered_bits(lo), ordered_bits(hi));
    let gap = b.checked_sub(a)?;
    (gap > 1).then(|| from_ordered_bits(a + gap / 2))
}

/// Bisection on a bracket whose endpoints have opposite residual signs.
///
/// Returns `(x, residual, iterations)` once the residual is within
/// `threshold`. If the bracket shrinks to adjacent floats first, the best
/// endpoint is accepted against `collapse_threshold`; anything larger is a
/// jump in the function rather than a root.
fn bisect<F>(
    residual_at: &mut F,
    (mut lo, mut g_lo): (f64, f64),
    (mut hi, mut g_hi): (f64, f64),
    threshold: f64,
    collapse_threshold: f64,
    max_iterations: usize,
) -> Option<(f64, f64, usize)>
where
    F: FnMut(f64) -> f64,
{
    let mut iterations = 0;
    while iterations < max_iterations {
        let Some(mid) = float_midpoint(lo, hi) else {
            let (x, g) = if g_lo.abs() <= g_hi.abs() { (lo, g_lo) } else { (hi, g_hi) };
            return (g.abs() <= collapse_threshold).then_some((x, g, iterations));
        };
        iterations += 1;
        let g_mid = residual_at(mid);
        if !g_mid.is_finite() {
            return None;
        }
        if g_mid.abs() <= threshold {
            return Some((mid, g_mid, iterations));
        }
        if g_mid.signum() == g_lo.signum() {
            lo = mid;
            g_lo = g_mid;
        } else {
            hi = mid;
            g_hi = g_mid;
        }
    }
    None
}

/// Evaluate each model independently against the same inputs.
///
/// Entries come back in the order the models were given; no entry depends on
/// another.
pub fn calculate_comparison(models: &[Arc<Model>], inputs: &InputValues) -> Vec<ComparisonEntry> {
    models
        .iter()
        .map(|model| ComparisonEntry {
            model_id: model.id().to_string(),
            model_name: model.name().to_string(),
            result: calculate_forward(model, inputs),
        })
        .collect()
}

/// Calculation engine bound to a solver configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct Engine {
    solver: SolverConfig,
}

impl Engine {
    pub fn new(solver: SolverConfig) -> Self {
        Self { solver }
    }

    pub fn forward(&self, model: &Model, inputs: &InputValues) -> EngineResult<ForwardResult> {
        calculate_forward(model, inputs)
    }

    pub fn reverse(
        &self,
        model: &Model,
        target: &ReverseTarget,
        known: &InputValues,
    ) -> EngineResult<ReverseResult> {
        calculate_reverse(model, target, known, &self.solver)
    }

    pub fn compare(&self, models: &[Arc<Model>], inputs: &InputValues) -> Vec<ComparisonEntry> {
        calculate_comparison(models, inputs)
    }
}
