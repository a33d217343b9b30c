//! Algorithms API
//!
//! CRUD for trading algorithms and their rules:
//! - GET    /api/algorithms
//! - POST   /api/algorithms
//! - GET    /api/algorithms/:id            (algorithm + rules)
//! - PUT    /api/algorithms/:id
//! - DELETE /api/algorithms/:id            (rules cascade)
//! - PATCH  /api/algorithms/:id/toggle
//! - POST   /api/algorithms/:id/rules
//! - PUT    /api/algorithms/:aid/rules/:rid
//! - DELETE /api/algorithms/:aid/rules/:rid

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, put},
    Json, Router,
};
use serde_json::{json, Value};

use crate::api::auth::Authenticated;
use crate::error::AppError;
use crate::types::{
    Algorithm, AlgorithmWithRules, CreateAlgorithmRequest, CreateRuleRequest, Rule,
    UpdateAlgorithmRequest, UpdateRuleRequest,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_algorithms).post(create_algorithm))
        .route(
            "/:id",
            get(get_algorithm)
                .put(update_algorithm)
                .delete(delete_algorithm),
        )
        .route("/:id/toggle", patch(toggle_algorithm))
        .route("/:id/rules", axum::routing::post(create_rule))
        .route("/:id/rules/:rule_id", put(update_rule).delete(delete_rule))
}

/// Reject actions the executor would silently drop.
fn validate_action(action: &str) -> Result<(), AppError> {
    let invalid = || AppError::BadRequest(format!("Unrecognized action: {action}"));
    let (verb, qualifier) = action.split_once(':').ok_or_else(invalid)?;
    let numeric = |q: &str| {
        q.trim_end_matches('%')
            .parse::<f64>()
            .map(|v| v.is_finite() && v >= 0.0)
            .unwrap_or(false)
    };
    match (verb, qualifier) {
        ("buy", "max") | ("sell", "all") => Ok(()),
        ("buy", q) | ("sell", q) if numeric(q) => Ok(()),
        _ => Err(invalid()),
    }
}

fn owned_algorithm(
    state: &AppState,
    id: &str,
    user_id: &str,
) -> Result<Algorithm, AppError> {
    state
        .store
        .get_algorithm_for_user(id, user_id)
        .ok_or_else(|| AppError::NotFound(format!("Algorithm not found: {id}")))
}

async fn list_algorithms(
    auth: Authenticated,
    State(state): State<AppState>,
) -> Json<Vec<Algorithm>> {
    Json(state.store.list_algorithms(&auth.user.user_id))
}

async fn create_algorithm(
    auth: Authenticated,
    State(state): State<AppState>,
    Json(request): Json<CreateAlgorithmRequest>,
) -> Result<(StatusCode, Json<Algorithm>), AppError> {
    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }

    let algorithm = Algorithm::new(auth.user.user_id, request.name, request.description);
    state
        .store
        .create_algorithm(&algorithm)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(algorithm)))
}

async fn get_algorithm(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlgorithmWithRules>, AppError> {
    let algorithm = owned_algorithm(&state, &id, &auth.user.user_id)?;
    let rules = state.store.list_rules(&algorithm.id);
    Ok(Json(AlgorithmWithRules { algorithm, rules }))
}

async fn update_algorithm(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateAlgorithmRequest>,
) -> Result<Json<Algorithm>, AppError> {
    let mut algorithm = owned_algorithm(&state, &id, &auth.user.user_id)?;

    if let Some(name) = request.name {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("name must not be empty".to_string()));
        }
        algorithm.name = name;
    }
    if let Some(description) = request.description {
        algorithm.description = description;
    }
    if let Some(is_active) = request.is_active {
        algorithm.is_active = is_active;
    }
    algorithm.updated_at = chrono::Utc::now().timestamp_millis();

    state
        .store
        .update_algorithm(&algorithm)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(algorithm))
}

async fn delete_algorithm(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    owned_algorithm(&state, &id, &auth.user.user_id)?;

    // A running task for a deleted algorithm would tick uselessly.
    state.engine.stop(&id).await;

    state
        .store
        .delete_algorithm(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "deleted": true, "id": id })))
}

async fn toggle_algorithm(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Algorithm>, AppError> {
    let mut algorithm = owned_algorithm(&state, &id, &auth.user.user_id)?;
    algorithm.is_active = !algorithm.is_active;
    algorithm.updated_at = chrono::Utc::now().timestamp_millis();

    state
        .store
        .update_algorithm(&algorithm)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(algorithm))
}

async fn create_rule(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<Rule>), AppError> {
    let algorithm = owned_algorithm(&state, &id, &auth.user.user_id)?;
    validate_action(&request.action)?;
    if request.condition_field.trim().is_empty() {
        return Err(AppError::BadRequest(
            "condition_field must not be empty".to_string(),
        ));
    }

    let rule = Rule {
        id: uuid::Uuid::new_v4().to_string(),
        algorithm_id: algorithm.id.clone(),
        rule_type: request.rule_type,
        condition_field: request.condition_field,
        condition_operator: request.condition_operator,
        condition_value: request.condition_value,
        action: request.action,
        order_index: request
            .order_index
            .unwrap_or_else(|| state.store.next_rule_order_index(&algorithm.id)),
        created_at: chrono::Utc::now().timestamp_millis(),
    };
    state
        .store
        .create_rule(&rule)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    auth: Authenticated,
    State(state): State<AppState>,
    Path((algorithm_id, rule_id)): Path<(String, String)>,
    Json(request): Json<UpdateRuleRequest>,
) -> Result<Json<Rule>, AppError> {
    owned_algorithm(&state, &algorithm_id, &auth.user.user_id)?;
    let mut rule = state
        .store
        .get_rule(&algorithm_id, &rule_id)
        .ok_or_else(|| AppError::NotFound(format!("Rule not found: {rule_id}")))?;

    if let Some(rule_type) = request.rule_type {
        rule.rule_type = rule_type;
    }
    if let Some(field) = request.condition_field {
        rule.condition_field = field;
    }
    if let Some(operator) = request.condition_operator {
        rule.condition_operator = operator;
    }
    if let Some(value) = request.condition_value {
        rule.condition_value = value;
    }
    if let Some(action) = request.action {
        validate_action(&action)?;
        rule.action = action;
    }
    if let Some(order_index) = request.order_index {
        rule.order_index = order_index;
    }

    state
        .store
        .update_rule(&rule)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(rule))
}

async fn delete_rule(
    auth: Authenticated,
    State(state): State<AppState>,
    Path((algorithm_id, rule_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    owned_algorithm(&state, &algorithm_id, &auth.user.user_id)?;
    let deleted = state
        .store
        .delete_rule(&algorithm_id, &rule_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("Rule not found: {rule_id}")));
    }
    Ok(Json(json!({ "deleted": true, "id": rule_id })))
}
