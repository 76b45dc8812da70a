//! Engine error taxonomy.
//!
//! Every failure here is a local validation failure. None of them is fatal
//! to the host; callers surface them to the UI layer as structured data.

use serde_json::json;

use super::responses::EngineErrorResponse;

/// Calculation engine error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Model '{id}' is already registered")]
    DuplicateModel { id: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid framework selection {category}/{delivery}/{service}: {reason}")]
    InvalidSelection {
        category: String,
        delivery: String,
        service: String,
        reason: String,
    },

    #[error("Missing input values: {}", .missing.join(", "))]
    MissingInput { missing: Vec<String> },

    #[error("Cannot solve for more than one unknown: {}", .free.join(", "))]
    Underdetermined { free: Vec<String> },

    #[error("Every input is already known; nothing to solve for")]
    Overdetermined,

    #[error("No value of '{variable}' in [{min}, {max}] yields {output} = {target}")]
    NoSolution {
        variable: String,
        output: String,
        target: f64,
        min: f64,
        max: f64,
    },

    #[error("Value {value} for '{variable}' is outside [{min}, {max}]")]
    OutOfRange {
        variable: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Formula error at offset {offset}: {message}")]
    Formula { message: String, offset: usize },

    #[error("Invalid model '{id}': {message}")]
    InvalidModel { id: String, message: String },

    #[error("Term '{term}' evaluated to a non-finite value")]
    NonFinite { term: String },

    #[error("Cannot switch calculation mode from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid framework catalog: {message}")]
    InvalidCatalog { message: String },
}

impl EngineError {
    /// Stable identifier used by clients to branch on the failure kind
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::DuplicateModel { .. } => "duplicate_model",
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidSelection { .. } => "invalid_selection",
            EngineError::MissingInput { .. } => "missing_input",
            EngineError::Underdetermined { .. } => "underdetermined",
            EngineError::Overdetermined => "overdetermined",
            EngineError::NoSolution { .. } => "no_solution",
            EngineError::OutOfRange { .. } => "out_of_range",
            EngineError::Formula { .. } => "formula_error",
            EngineError::InvalidModel { .. } => "invalid_model",
            EngineError::NonFinite { .. } => "non_finite",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::InvalidCatalog { .. } => "invalid_catalog",
        }
    }

    /// Structured details for display next to the message
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::DuplicateModel { id } => Some(json!({ "id": id })),
            EngineError::NotFound { kind, id } => Some(json!({ "kind": kind, "id": id })),
            EngineError::InvalidSelection {
                category,
                delivery,
                service,
                reason,
            } => Some(json!({
                "category": category,
                "delivery": delivery,
                "service": service,
                "reason": reason,
            })),
            EngineError::MissingInput { missing } => Some(json!({ "missing": missing })),
            EngineError::Underdetermined { free } => Some(json!({ "free": free })),
            EngineError::NoSolution {
                variable,
                output,
                target,
                min,
                max,
            } => Some(json!({
                "variable": variable,
                "output": output,
                "target": target,
                "min": min,
                "max": max,
            })),
            EngineError::OutOfRange {
                variable,
                value,
                min,
                max,
            } => Some(json!({
                "variable": variable,
                "value": value,
                "min": min,
                "max": max,
            })),
            EngineError::Formula { offset, .. } => Some(json!({ "offset": offset })),
            EngineError::InvalidModel { id, .. } => Some(json!({ "id": id })),
            EngineError::NonFinite { term } => Some(json!({ "term": term })),
            EngineError::InvalidTransition { from, to } => {
                Some(json!({ "from": from, "to": to }))
            }
            EngineError::Overdetermined | EngineError::InvalidCatalog { .. } => None,
        }
    }

    pub fn to_response(&self) -> EngineErrorResponse {
        EngineErrorResponse {
            error_type: self.error_type().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::MissingInput {
            missing: vec!["hours".to_string(), "rate".to_string()],
        };
        assert!(err.to_string().contains("hours, rate"));

        let err = EngineError::NotFound {
            kind: "Model",
            id: "hourly".to_string(),
        };
        assert_eq!(err.to_string(), "Model 'hourly' not found");

        let err = EngineError::Overdetermined;
        assert!(err.to_string().contains("nothing to solve"));
    }

    #[test]
    fn test_engine_error_response_shape() {
        let err = EngineError::OutOfRange {
            variable: "hours".to_string(),
            value: -1.0,
            min: 0.0,
            max: 100.0,
        };
        let response = err.to_response();
        assert_eq!(response.error_type, "out_of_range");
        let details = response.details.unwrap();
        assert_eq!(details["variable"], "hours");
        assert_eq!(details["max"], 100.0);
    }

    #[test]
    fn test_overdetermined_has_no_details() {
        assert!(EngineError::Overdetermined.details().is_none());
        assert_eq!(EngineError::Overdetermined.error_type(), "overdetermined");
    }
}
