//! Response DTOs for calculation API endpoints.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use super::calculators::{money_from_f64, ComparisonEntry, ForwardResult, ReverseResult, TermValue};
use super::framework::FrameworkSelection;
use super::metrics::UniversalMetrics;
use super::models::{Model, TermDefinition, VariableSpec};

/// Generic engine error response
#[derive(Debug, Clone, Serialize)]
pub struct EngineErrorResponse {
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// One term of a breakdown
#[derive(Debug, Clone, Serialize)]
pub struct TermValueResponse {
    pub name: String,
    pub value: f64,
    /// Value rounded to 2dp with banker's rounding
    #[serde(with = "rust_decimal::serde::str_option")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl From<&TermValue> for TermValueResponse {
    fn from(term: &TermValue) -> Self {
        Self {
            name: term.name.clone(),
            value: term.value,
            amount: money_from_f64(term.value),
            unit: term.unit.clone(),
        }
    }
}

/// Response for forward calculation
#[derive(Debug, Clone, Serialize)]
pub struct ForwardResponse {
    pub model_id: String,
    pub output: String,
    pub value: f64,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub amount: Option<Decimal>,
    pub breakdown: Vec<TermValueResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<FrameworkSelection>,
}

impl ForwardResponse {
    pub fn new(result: &ForwardResult, selection: Option<&FrameworkSelection>) -> Self {
        Self {
            model_id: result.model_id.clone(),
            output: result.output.clone(),
            value: result.value,
            amount: money_from_f64(result.value),
            breakdown: result.breakdown.iter().map(TermValueResponse::from).collect(),
            selection: selection.cloned(),
        }
    }
}

/// Response for reverse calculation
#[derive(Debug, Clone, Serialize)]
pub struct ReverseResponse {
    pub model_id: String,
    pub variable: String,
    pub value: f64,
    pub output: String,
    pub target: f64,
    pub iterations: usize,
    pub residual: f64,
    pub forward: ForwardResponse,
}

impl ReverseResponse {
    pub fn new(result: &ReverseResult, selection: Option<&FrameworkSelection>) -> Self {
        Self {
            model_id: result.model_id.clone(),
            variable: result.variable.clone(),
            value: result.value,
            output: result.output.clone(),
            target: result.target,
            iterations: result.iterations,
            residual: result.residual,
            forward: ForwardResponse::new(&result.forward, selection),
        }
    }
}

/// One model's outcome in a comparison
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonEntryResponse {
    pub model_id: String,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ForwardResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineErrorResponse>,
}

impl ComparisonEntryResponse {
    pub fn new(entry: &ComparisonEntry, selection: Option<&FrameworkSelection>) -> Self {
        let (result, error) = match &entry.result {
            Ok(r) => (Some(ForwardResponse::new(r, selection)), None),
            Err(e) => (None, Some(e.to_response())),
        };
        Self {
            model_id: entry.model_id.clone(),
            model_name: entry.model_name.clone(),
            result,
            error,
        }
    }
}

/// Response for comparison mode
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResponse {
    pub entries: Vec<ComparisonEntryResponse>,
    pub metrics: UniversalMetrics,
}

/// Result of running a session in its current mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunResponse {
    Forward(ForwardResponse),
    Reverse(ReverseResponse),
    Comparison(ComparisonResponse),
}

/// Model description for clients
#[derive(Debug, Clone, Serialize)]
pub struct ModelResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub inputs: Vec<VariableSpec>,
    pub coefficients: BTreeMap<String, f64>,
    pub terms: Vec<TermDefinition>,
    pub output: String,
}

impl From<&Model> for ModelResponse {
    fn from(model: &Model) -> Self {
        let def = model.definition();
        Self {
            id: def.id,
            name: def.name,
            description: def.description,
            inputs: def.inputs,
            coefficients: def.coefficients,
            terms: def.terms,
            output: model.output().to_string(),
        }
    }
}
