//! Request DTOs for calculation API endpoints.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::calculators::{InputValues, ReverseTarget};
use super::framework::FrameworkSelection;
use super::state::CalculationMode;

/// Request to calculate a model forward
#[derive(Debug, Deserialize)]
pub struct ForwardRequest {
    pub model_id: String,
    pub inputs: InputValues,
    #[serde(default)]
    pub selection: Option<FrameworkSelection>,
}

/// Request to solve for one unknown input
#[derive(Debug, Deserialize)]
pub struct ReverseRequest {
    pub model_id: String,
    pub target: ReverseTarget,
    #[serde(default)]
    pub known: InputValues,
    #[serde(default)]
    pub selection: Option<FrameworkSelection>,
}

/// Request to compare several models on one input set
#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub model_ids: Vec<String>,
    pub inputs: InputValues,
    #[serde(default)]
    pub selection: Option<FrameworkSelection>,
}

/// Merge inputs into a session; `null` removes a value
#[derive(Debug, Deserialize)]
pub struct UpdateInputsRequest {
    #[serde(default)]
    pub inputs: BTreeMap<String, Option<f64>>,
    /// Fill remaining inputs from this model's defaults
    #[serde(default)]
    pub seed_defaults_from: Option<String>,
    #[serde(default)]
    pub clear: bool,
}

/// Replace a session's selected models
#[derive(Debug, Deserialize)]
pub struct SelectModelsRequest {
    pub model_ids: Vec<String>,
}

/// Set or clear a session's framework selection
#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    #[serde(default)]
    pub selection: Option<FrameworkSelection>,
}

/// Switch a session's mode; `idle` finishes the current mode
#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: CalculationMode,
    /// Reverse target, stored when entering reverse mode
    #[serde(default)]
    pub target: Option<ReverseTarget>,
}
