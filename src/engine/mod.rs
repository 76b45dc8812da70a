//! Cost/budget calculation engine.
//!
//! Models are registered once, optionally scaled by a framework selection,
//! and evaluated forward (inputs → outputs), in reverse (solve for one
//! missing input), or side by side in comparison mode.

pub mod calculators;
pub mod errors;
pub mod formula;
pub mod framework;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod requests;
pub mod responses;
pub mod routes;
pub mod services;
pub mod state;

// Re-export commonly used items
pub use calculators::{
    calculate_comparison, calculate_forward, calculate_reverse, round_money, ComparisonEntry,
    Engine, ForwardResult, InputValues, ReverseResult, ReverseTarget, SolverConfig,
};
pub use errors::{EngineError, EngineResult};
pub use framework::{FrameworkCatalog, FrameworkSelection};
pub use metrics::{calculate_universal_metrics, UniversalMetrics};
pub use models::{Model, ModelDefinition, ValidRange, VariableSpec};
pub use registry::ModelRegistry;
pub use responses::EngineErrorResponse;
pub use routes::router;
pub use services::EngineContext;
pub use state::{CalculationMode, CalculationState};
