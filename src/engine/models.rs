//! Cost model definitions.
//!
//! A `ModelDefinition` is the serde shape loaded from JSON. `Model` is the
//! validated, compiled form: formulas parsed, names resolved, ranges checked.
//! Models are immutable once built; framework modifiers produce new values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::errors::{EngineError, EngineResult};
use super::formula::{self, Expr};
use super::framework::FrameworkSelection;

/// Inclusive range of acceptable values for an input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

impl ValidRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Input variable specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(rename = "default")]
    pub default_value: f64,
    #[serde(rename = "range")]
    pub valid_range: ValidRange,
}

/// A named formula inside a model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermDefinition {
    pub name: String,
    pub formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Model as written in a definitions file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub inputs: Vec<VariableSpec>,
    #[serde(default)]
    pub coefficients: BTreeMap<String, f64>,
    pub terms: Vec<TermDefinition>,
    /// Primary output term; defaults to the last term
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Compiled term
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub name: String,
    pub formula: String,
    pub unit: Option<String>,
    pub expr: Expr,
}

/// Validated cost model
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    id: String,
    name: String,
    description: Option<String>,
    inputs: Vec<VariableSpec>,
    base_coefficients: BTreeMap<String, f64>,
    coefficients: BTreeMap<String, f64>,
    terms: Vec<Term>,
    output: String,
    selection: Option<FrameworkSelection>,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Model {
    /// Validate and compile a definition.
    pub fn from_definition(def: ModelDefinition) -> EngineResult<Self> {
        let id = def.id.trim().to_string();
        let invalid = |message: String| EngineError::InvalidModel {
            id: def.id.clone(),
            message,
        };

        if id.is_empty() {
            return Err(invalid("model id must not be empty".to_string()));
        }
        if def.terms.is_empty() {
            return Err(invalid("model must define at least one term".to_string()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let declared = def
            .inputs
            .iter()
            .map(|v| v.name.as_str())
            .chain(def.coefficients.keys().map(String::as_str))
            .chain(def.terms.iter().map(|t| t.name.as_str()));
        for name in declared {
            if !is_identifier(name) {
                return Err(invalid(format!("'{name}' is not a valid identifier")));
            }
            if !seen.insert(name) {
                return Err(invalid(format!("name '{name}' is declared more than once")));
            }
        }

        for spec in &def.inputs {
            let range = spec.valid_range;
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(invalid(format!(
                    "input '{}' has an invalid range [{}, {}]",
                    spec.name, range.min, range.max
                )));
            }
            if !range.contains(spec.default_value) {
                return Err(invalid(format!(
                    "default {} for input '{}' lies outside [{}, {}]",
                    spec.default_value, spec.name, range.min, range.max
                )));
            }
        }

        for (name, value) in &def.coefficients {
            if !value.is_finite() {
                return Err(invalid(format!("coefficient '{name}' must be finite")));
            }
        }

        // Terms may only see inputs, coefficients and the terms before them.
        let mut visible: HashSet<&str> = def
            .inputs
            .iter()
            .map(|v| v.name.as_str())
            .chain(def.coefficients.keys().map(String::as_str))
            .collect();
        let mut terms = Vec::with_capacity(def.terms.len());
        for term in &def.terms {
            let expr = formula::parse(&term.formula).map_err(|e| match e {
                EngineError::Formula { message, offset } => EngineError::Formula {
                    message: format!("term '{}': {message}", term.name),
                    offset,
                },
                other => other,
            })?;
            if let Some(unknown) = expr.identifiers().into_iter().find(|n| !visible.contains(n)) {
                return Err(invalid(format!(
                    "term '{}' references unknown name '{unknown}'",
                    term.name
                )));
            }
            visible.insert(term.name.as_str());
            terms.push(Term {
                name: term.name.clone(),
                formula: term.formula.clone(),
                unit: term.unit.clone(),
                expr,
            });
        }

        let output = match &def.output {
            Some(name) if def.terms.iter().any(|t| &t.name == name) => name.clone(),
            Some(name) => return Err(invalid(format!("output '{name}' is not a term"))),
            None => terms.last().map(|t| t.name.clone()).unwrap_or_default(),
        };

        Ok(Self {
            id,
            name: def.name,
            description: def.description,
            inputs: def.inputs,
            base_coefficients: def.coefficients.clone(),
            coefficients: def.coefficients,
            terms,
            output,
            selection: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[VariableSpec] {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&VariableSpec> {
        self.inputs.iter().find(|v| v.name == name)
    }

    /// Coefficients currently in effect (after any modifiers)
    pub fn coefficients(&self) -> &BTreeMap<String, f64> {
        &self.coefficients
    }

    /// Coefficients as registered, before any modifiers
    pub fn base_coefficients(&self) -> &BTreeMap<String, f64> {
        &self.base_coefficients
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn has_term(&self, name: &str) -> bool {
        self.terms.iter().any(|t| t.name == name)
    }

    /// Name of the primary output term
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Framework selection the coefficients were scaled for, if any
    pub fn selection(&self) -> Option<&FrameworkSelection> {
        self.selection.as_ref()
    }

    /// Copy of this model with new effective coefficients.
    pub(crate) fn with_coefficients(
        &self,
        coefficients: BTreeMap<String, f64>,
        selection: FrameworkSelection,
    ) -> Self {
        Self {
            coefficients,
            selection: Some(selection),
            ..self.clone()
        }
    }

    /// Definition that rebuilds this model's base form
    pub fn definition(&self) -> ModelDefinition {
        ModelDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            inputs: self.inputs.clone(),
            coefficients: self.base_coefficients.clone(),
            terms: self
                .terms
                .iter()
                .map(|t| TermDefinition {
                    name: t.name.clone(),
                    formula: t.formula.clone(),
                    unit: t.unit.clone(),
                })
                .collect(),
            output: Some(self.output.clone()),
        }
    }
}
