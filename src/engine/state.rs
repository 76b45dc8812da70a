//! Calculation state context.
//!
//! One `CalculationState` per client. The state is passed explicitly to the
//! session service; the engine only ever sees snapshots of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::calculators::{InputValues, ReverseTarget};
use super::errors::{EngineError, EngineResult};
use super::framework::FrameworkSelection;
use super::models::Model;

/// Calculation mode: `Idle → Forward | Reverse | Comparison → Idle`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    #[default]
    Idle,
    Forward,
    Reverse,
    Comparison,
}

impl CalculationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationMode::Idle => "idle",
            CalculationMode::Forward => "forward",
            CalculationMode::Reverse => "reverse",
            CalculationMode::Comparison => "comparison",
        }
    }
}

impl fmt::Display for CalculationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationState {
    id: Uuid,
    mode: CalculationMode,
    selected_models: Vec<String>,
    inputs: InputValues,
    selection: Option<FrameworkSelection>,
    target: Option<ReverseTarget>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CalculationState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            mode: CalculationMode::Idle,
            selected_models: Vec::new(),
            inputs: InputValues::new(),
            selection: None,
            target: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> CalculationMode {
        self.mode
    }

    pub fn selected_models(&self) -> &[String] {
        &self.selected_models
    }

    pub fn inputs(&self) -> &InputValues {
        &self.inputs
    }

    pub fn selection(&self) -> Option<&FrameworkSelection> {
        self.selection.as_ref()
    }

    pub fn target(&self) -> Option<&ReverseTarget> {
        self.target.as_ref()
    }

    /// Enter an active mode. Only allowed from `Idle`.
    pub fn begin(&mut self, mode: CalculationMode) -> EngineResult<()> {
        if self.mode != CalculationMode::Idle || mode == CalculationMode::Idle {
            return Err(EngineError::InvalidTransition {
                from: self.mode.to_string(),
                to: mode.to_string(),
            });
        }
        self.mode = mode;
        self.touch();
        Ok(())
    }

    /// Return to `Idle` from an active mode.
    pub fn finish(&mut self) -> EngineResult<()> {
        if self.mode == CalculationMode::Idle {
            return Err(EngineError::InvalidTransition {
                from: self.mode.to_string(),
                to: CalculationMode::Idle.to_string(),
            });
        }
        self.mode = CalculationMode::Idle;
        self.touch();
        Ok(())
    }

    /// Merge values into the stored inputs; a `None` value removes the input.
    pub fn set_inputs<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (String, Option<f64>)>,
    {
        for (name, value) in values {
            match value {
                Some(v) => {
                    self.inputs.insert(name, v);
                }
                None => {
                    self.inputs.remove(&name);
                }
            }
        }
        self.touch();
    }

    pub fn clear_inputs(&mut self) {
        self.inputs.clear();
        self.touch();
    }

    /// Fill absent inputs with the model's defaults. Stored values win.
    pub fn seed_defaults(&mut self, model: &Model) {
        for spec in model.inputs() {
            self.inputs
                .entry(spec.name.clone())
                .or_insert(spec.default_value);
        }
        self.touch();
    }

    /// Replace the selected models, dropping repeated ids.
    pub fn select_models<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.selected_models.clear();
        for id in ids {
            if !self.selected_models.contains(&id) {
                self.selected_models.push(id);
            }
        }
        self.touch();
    }

    pub fn set_selection(&mut self, selection: Option<FrameworkSelection>) {
        self.selection = selection;
        self.touch();
    }

    pub fn set_target(&mut self, target: Option<ReverseTarget>) {
        self.target = target;
        self.touch();
    }
}

impl Default for CalculationState {
    fn default() -> Self {
        Self::new()
    }
}
