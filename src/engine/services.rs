//! Calculation services.
//!
//! These functions resolve models from the registry, apply framework
//! modifiers, and run the engine. Session-level services take a snapshot of
//! a `CalculationState` and never write to it while calculating.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::SessionCache;
use crate::error::AppError;

use super::calculators::{ComparisonEntry, Engine, InputValues, ReverseTarget};
use super::errors::EngineResult;
use super::framework::{FrameworkCatalog, FrameworkSelection};
use super::metrics::calculate_universal_metrics;
use super::models::Model;
use super::registry::ModelRegistry;
use super::requests::{CompareRequest, ForwardRequest, ModeRequest, ReverseRequest, UpdateInputsRequest};
use super::responses::{ComparisonEntryResponse, ComparisonResponse, ForwardResponse, ReverseResponse, RunResponse};
use super::state::{CalculationMode, CalculationState};

/// Everything a calculation needs, wired once at startup
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub registry: Arc<ModelRegistry>,
    pub catalog: Arc<FrameworkCatalog>,
    pub engine: Engine,
}

impl EngineContext {
    pub fn new(registry: ModelRegistry, catalog: FrameworkCatalog, engine: Engine) -> Self {
        Self {
            registry: Arc::new(registry),
            catalog: Arc::new(catalog),
            engine,
        }
    }

    /// Look up a model and, when a selection is given, scale it for that selection.
    pub fn resolve_model(
        &self,
        id: &str,
        selection: Option<&FrameworkSelection>,
    ) -> EngineResult<Arc<Model>> {
        let model = self.registry.get(id)?;
        match selection {
            Some(selection) => Ok(Arc::new(self.catalog.apply_modifiers(&model, selection)?)),
            None => Ok(model),
        }
    }
}

pub fn calculate_forward(ctx: &EngineContext, req: &ForwardRequest) -> EngineResult<ForwardResponse> {
    forward(ctx, &req.model_id, &req.inputs, req.selection.as_ref())
}

pub fn calculate_reverse(ctx: &EngineContext, req: &ReverseRequest) -> EngineResult<ReverseResponse> {
    reverse(ctx, &req.model_id, &req.target, &req.known, req.selection.as_ref())
}

pub fn calculate_comparison(
    ctx: &EngineContext,
    req: &CompareRequest,
) -> EngineResult<ComparisonResponse> {
    compare(ctx, &req.model_ids, &req.inputs, req.selection.as_ref())
}

fn forward(
    ctx: &EngineContext,
    model_id: &str,
    inputs: &InputValues,
    selection: Option<&FrameworkSelection>,
) -> EngineResult<ForwardResponse> {
    let model = ctx.resolve_model(model_id, selection)?;
    let result = ctx.engine.forward(&model, inputs)?;
    Ok(ForwardResponse::new(&result, selection))
}

fn reverse(
    ctx: &EngineContext,
    model_id: &str,
    target: &ReverseTarget,
    known: &InputValues,
    selection: Option<&FrameworkSelection>,
) -> EngineResult<ReverseResponse> {
    let model = ctx.resolve_model(model_id, selection)?;
    let result = ctx.engine.reverse(&model, target, known)?;
    Ok(ReverseResponse::new(&result, selection))
}

/// Unknown model ids become failed entries; an invalid selection fails the
/// whole comparison since it would fail every model alike.
fn compare(
    ctx: &EngineContext,
    model_ids: &[String],
    inputs: &InputValues,
    selection: Option<&FrameworkSelection>,
) -> EngineResult<ComparisonResponse> {
    if let Some(selection) = selection {
        ctx.catalog.validate(selection)?;
    }
    let resolved: Vec<(&String, EngineResult<Arc<Model>>)> = model_ids
        .iter()
        .map(|id| (id, ctx.resolve_model(id, selection)))
        .collect();
    let models: Vec<Arc<Model>> = resolved
        .iter()
        .filter_map(|(_, model)| model.as_ref().ok().cloned())
        .collect();

    let mut computed = ctx.engine.compare(&models, inputs).into_iter();
    let entries: Vec<ComparisonEntry> = resolved
        .into_iter()
        .filter_map(|(id, model)| match model {
            Ok(_) => computed.next(),
            Err(err) => Some(ComparisonEntry {
                model_id: id.clone(),
                model_name: id.clone(),
                result: Err(err),
            }),
        })
        .collect();

    let metrics = calculate_universal_metrics(&entries);
    Ok(ComparisonResponse {
        entries: entries
            .iter()
            .map(|e| ComparisonEntryResponse::new(e, selection))
            .collect(),
        metrics,
    })
}

/// Run the session's current mode against a snapshot of its state.
pub fn run_session(ctx: &EngineContext, state: &CalculationState) -> Result<RunResponse, AppError> {
    let selection = state.selection();
    let first_model = || {
        state
            .selected_models()
            .first()
            .ok_or_else(|| AppError::BadRequest("no model selected".to_string()))
    };

    debug!(session = %state.id(), mode = %state.mode(), "Running session");

    match state.mode() {
        CalculationMode::Idle => Err(AppError::BadRequest(
            "session is idle; begin a calculation mode first".to_string(),
        )),
        CalculationMode::Forward => {
            let response = forward(ctx, first_model()?, state.inputs(), selection)?;
            Ok(RunResponse::Forward(response))
        }
        CalculationMode::Reverse => {
            let target = state
                .target()
                .ok_or_else(|| AppError::BadRequest("reverse mode needs a target".to_string()))?;
            let response = reverse(ctx, first_model()?, target, state.inputs(), selection)?;
            Ok(RunResponse::Reverse(response))
        }
        CalculationMode::Comparison => {
            if state.selected_models().is_empty() {
                return Err(AppError::BadRequest("no model selected".to_string()));
            }
            let response = compare(ctx, state.selected_models(), state.inputs(), selection)?;
            Ok(RunResponse::Comparison(response))
        }
    }
}

/// Apply `update` to a stored session and save the result.
///
/// Updates to one session are serialized; the update works on a copy and
/// nothing is saved when it fails.
pub async fn update_session<F>(
    sessions: &SessionCache,
    id: Uuid,
    update: F,
) -> Result<CalculationState, AppError>
where
    F: FnOnce(&mut CalculationState) -> Result<(), AppError>,
{
    sessions
        .update(id, update)
        .await
        .ok_or(AppError::SessionNotFound(id))?
}

pub fn apply_inputs(
    ctx: &EngineContext,
    state: &mut CalculationState,
    req: UpdateInputsRequest,
) -> Result<(), AppError> {
    if req.clear {
        state.clear_inputs();
    }
    state.set_inputs(req.inputs);
    if let Some(model_id) = &req.seed_defaults_from {
        let model = ctx.registry.get(model_id)?;
        state.seed_defaults(&model);
    }
    Ok(())
}

pub fn apply_model_selection(
    ctx: &EngineContext,
    state: &mut CalculationState,
    model_ids: Vec<String>,
) -> Result<(), AppError> {
    for id in &model_ids {
        ctx.registry.get(id)?;
    }
    state.select_models(model_ids);
    Ok(())
}

pub fn apply_framework_selection(
    ctx: &EngineContext,
    state: &mut CalculationState,
    selection: Option<FrameworkSelection>,
) -> Result<(), AppError> {
    if let Some(selection) = &selection {
        ctx.catalog.validate(selection)?;
    }
    state.set_selection(selection);
    Ok(())
}

pub fn apply_mode(state: &mut CalculationState, req: ModeRequest) -> Result<(), AppError> {
    match req.mode {
        CalculationMode::Idle => state.finish()?,
        mode => {
            if mode == CalculationMode::Reverse && req.target.is_none() && state.target().is_none() {
                return Err(AppError::BadRequest("reverse mode needs a target".to_string()));
            }
            state.begin(mode)?;
            if req.target.is_some() {
                state.set_target(req.target);
            }
        }
    }
    info!(session = %state.id(), mode = %state.mode(), "Calculation mode changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::errors::EngineError;
    use crate::engine::framework::fixtures::catalog;
    use crate::engine::models::fixtures::{hourly, project};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn context() -> EngineContext {
        let mut registry = ModelRegistry::new();
        registry.register(hourly()).unwrap();
        registry.register(project()).unwrap();
        EngineContext::new(registry, catalog(), Engine::default())
    }

    fn inputs(values: &[(&str, f64)]) -> InputValues {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_forward_with_selection_uses_scaled_coefficients() {
        let ctx = context();
        let req = ForwardRequest {
            model_id: "project".to_string(),
            inputs: inputs(&[("rate", 100.0), ("hours", 10.0), ("materials", 0.0)]),
            selection: Some(FrameworkSelection::new("A", "X", "Y")),
        };
        let response = calculate_forward(&ctx, &req).unwrap();
        // labour = 100 * 10 * 3.6; tax = 5%
        assert!((response.value - 3780.0).abs() < 1e-6);
        assert_eq!(response.selection, req.selection);
    }

    #[test]
    fn test_forward_invalid_selection() {
        let ctx = context();
        let req = ForwardRequest {
            model_id: "hourly".to_string(),
            inputs: inputs(&[("rate", 50.0), ("hours", 10.0), ("fixedFee", 100.0)]),
            selection: Some(FrameworkSelection::new("A", "X", "Z")),
        };
        assert!(matches!(
            calculate_forward(&ctx, &req),
            Err(EngineError::InvalidSelection { .. })
        ));
    }

    #[test]
    fn test_comparison_reports_unknown_model_as_entry() {
        let ctx = context();
        let req = CompareRequest {
            model_ids: vec!["ghost".to_string(), "hourly".to_string()],
            inputs: inputs(&[("rate", 50.0), ("hours", 10.0), ("fixedFee", 100.0)]),
            selection: None,
        };
        let response = calculate_comparison(&ctx, &req).unwrap();
        assert_eq!(response.entries.len(), 2);

        let ghost = &response.entries[0];
        assert_eq!(ghost.model_id, "ghost");
        assert_eq!(ghost.error.as_ref().unwrap().error_type, "not_found");
        assert!(ghost.result.is_none());

        let hourly = &response.entries[1];
        assert_eq!(hourly.result.as_ref().unwrap().value, 600.0);
        assert_eq!(response.metrics.successes, 1);
        assert_eq!(response.metrics.failures, 1);
    }

    #[test]
    fn test_comparison_invalid_selection_fails_whole_request() {
        let ctx = context();
        let req = CompareRequest {
            model_ids: vec!["hourly".to_string(), "ghost".to_string()],
            inputs: InputValues::new(),
            selection: Some(FrameworkSelection::new("A", "X", "Z")),
        };
        assert!(matches!(
            calculate_comparison(&ctx, &req),
            Err(EngineError::InvalidSelection { .. })
        ));
    }

    #[test]
    fn test_run_session_forward_and_comparison() {
        let ctx = context();
        let mut state = CalculationState::new();
        apply_model_selection(&ctx, &mut state, vec!["hourly".to_string(), "project".to_string()]).unwrap();
        state.set_inputs([
            ("rate".to_string(), Some(50.0)),
            ("hours".to_string(), Some(10.0)),
            ("fixedFee".to_string(), Some(100.0)),
            ("materials".to_string(), Some(0.0)),
        ]);

        assert!(matches!(run_session(&ctx, &state), Err(AppError::BadRequest(_))));

        state.begin(CalculationMode::Forward).unwrap();
        match run_session(&ctx, &state).unwrap() {
            RunResponse::Forward(r) => assert_eq!(r.value, 600.0),
            other => panic!("expected forward, got {other:?}"),
        }
        state.finish().unwrap();

        state.begin(CalculationMode::Comparison).unwrap();
        match run_session(&ctx, &state).unwrap() {
            RunResponse::Comparison(r) => {
                assert_eq!(r.entries.len(), 2);
                assert_eq!(r.metrics.successes, 2);
                assert_eq!(r.metrics.lowest.unwrap().model_id, "hourly");
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_run_session_reverse() {
        let ctx = context();
        let mut state = CalculationState::new();
        apply_model_selection(&ctx, &mut state, vec!["hourly".to_string()]).unwrap();
        state.set_inputs([("rate".to_string(), Some(50.0)), ("fixedFee".to_string(), Some(100.0))]);

        let missing_target = ModeRequest {
            mode: CalculationMode::Reverse,
            target: None,
        };
        assert!(apply_mode(&mut state, missing_target).is_err());
        assert_eq!(state.mode(), CalculationMode::Idle);

        let req = ModeRequest {
            mode: CalculationMode::Reverse,
            target: Some(ReverseTarget::primary(600.0)),
        };
        apply_mode(&mut state, req).unwrap();
        match run_session(&ctx, &state).unwrap() {
            RunResponse::Reverse(r) => {
                assert_eq!(r.variable, "hours");
                assert!((r.value - 10.0).abs() < 1e-6);
            }
            other => panic!("expected reverse, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_inputs_seeds_defaults() {
        let ctx = context();
        let mut state = CalculationState::new();
        let req = UpdateInputsRequest {
            inputs: BTreeMap::from([("rate".to_string(), Some(70.0))]),
            seed_defaults_from: Some("hourly".to_string()),
            clear: false,
        };
        apply_inputs(&ctx, &mut state, req).unwrap();
        assert_eq!(state.inputs()["rate"], 70.0);
        assert_eq!(state.inputs()["hours"], 10.0);
    }

    #[test]
    fn test_apply_selection_validates() {
        let ctx = context();
        let mut state = CalculationState::new();
        let err = apply_framework_selection(&ctx, &mut state, Some(FrameworkSelection::new("A", "X", "Z")))
            .unwrap_err();
        assert!(matches!(err, AppError::Engine(EngineError::InvalidSelection { .. })));
        assert!(state.selection().is_none());

        apply_model_selection(&ctx, &mut state, vec!["ghost".to_string()]).unwrap_err();
        assert!(state.selected_models().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_input_merges_all_land() {
        let ctx = context();
        let sessions = SessionCache::new(10, Duration::from_secs(60));
        let id = sessions.create().await.id();

        let handles: Vec<_> = (0..200)
            .map(|i| {
                let ctx = ctx.clone();
                let sessions = sessions.clone();
                tokio::spawn(async move {
                    let req = UpdateInputsRequest {
                        inputs: BTreeMap::from([(format!("v{i}"), Some(i as f64))]),
                        seed_defaults_from: None,
                        clear: false,
                    };
                    update_session(&sessions, id, |state| apply_inputs(&ctx, state, req)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = sessions.get(id).await.unwrap();
        assert_eq!(state.inputs().len(), 200);
        assert_eq!(state.inputs()["v199"], 199.0);
    }

    #[tokio::test]
    async fn test_update_unknown_session() {
        let sessions = SessionCache::new(10, Duration::from_secs(60));
        let missing = Uuid::new_v4();
        let err = update_session(&sessions, missing, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(id) if id == missing));
    }
}
