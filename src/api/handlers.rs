use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::hypervisor::service::VmError;
use crate::models::token::{LoginForm, TokenResponse};
use crate::models::vm::{ActionResponse, DetailedVmStatus, PowerAction, VmStatus};
use crate::AppState;

const NOT_AUTHORIZED_FOR_VM: &str = "Not authorized to access this VM";

// ── Public ───────────────────────────────────────────────────

/// GET /test: liveness probe
pub async fn liveness() -> Json<Value> {
    Json(json!({ "message": "API is working" }))
}

/// POST /token: exchange hypervisor credentials for a bearer token
pub async fn login(
    State(state): State<Arc<AppState>>,
    form: LoginForm,
) -> Result<Json<TokenResponse>, AppError> {
    tracing::info!(username = %form.username, "login attempt");

    if !state.verifier.verify(&form.username, &form.password).await {
        tracing::info!(username = %form.username, "login rejected");
        return Err(AppError::InvalidCredentials);
    }

    let token = state
        .tokens
        .issue(&form.username, Some(state.config.token_ttl))
        .map_err(|e| {
            tracing::error!(username = %form.username, error = %e, "token signing failed");
            AppError::Unexpected(e.to_string())
        })?;

    tracing::info!(username = %form.username, "login successful");
    Ok(Json(TokenResponse::bearer(token)))
}

// ── Authenticated ────────────────────────────────────────────

/// GET /vms: the caller's allow-listed VM ids
pub async fn list_vms(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(username)): Extension<CurrentUser>,
) -> Result<Json<Vec<String>>, AppError> {
    if !state.policy.contains_user(&username) {
        tracing::warn!(username = %username, "user has no allow-list entry");
        return Err(AppError::Forbidden("User not allowed"));
    }
    let vms = state.policy.list_vms(&username).to_vec();
    tracing::debug!(username = %username, ?vms, "allowed VMs");
    Ok(Json(vms))
}

/// GET /vms/:vmid/status
pub async fn vm_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(vmid): Path<String>,
) -> Result<Json<VmStatus>, AppError> {
    authorize(&state, &user, &vmid)?;

    match state.vms.get_status(&vmid).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => Err(status_error(&vmid, e)),
    }
}

/// GET /vms/:vmid/details: status plus disk size and recent metrics
pub async fn vm_details(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(vmid): Path<String>,
) -> Result<Json<DetailedVmStatus>, AppError> {
    authorize(&state, &user, &vmid)?;

    match state.vms.get_detailed_status(&vmid).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => Err(status_error(&vmid, e)),
    }
}

/// POST /vms/:vmid/start
pub async fn start_vm(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(vmid): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    power_action(&state, &user, &vmid, PowerAction::Start).await
}

/// POST /vms/:vmid/stop
pub async fn stop_vm(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(vmid): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    power_action(&state, &user, &vmid, PowerAction::Stop).await
}

/// POST /vms/:vmid/shutdown
pub async fn shutdown_vm(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(vmid): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    power_action(&state, &user, &vmid, PowerAction::Shutdown).await
}

/// POST /vms/:vmid/reset
pub async fn reset_vm(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(vmid): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    power_action(&state, &user, &vmid, PowerAction::Reset).await
}

// ── Helpers ──────────────────────────────────────────────────

fn authorize(state: &AppState, user: &CurrentUser, vmid: &str) -> Result<(), AppError> {
    if state.policy.authorize(&user.0, vmid) {
        return Ok(());
    }
    tracing::warn!(username = %user.0, vmid, "VM access denied");
    Err(AppError::Forbidden(NOT_AUTHORIZED_FOR_VM))
}

fn status_error(vmid: &str, e: VmError) -> AppError {
    match e {
        VmError::NotFound(_) => AppError::VmNotFound(vmid.to_string()),
        other => {
            tracing::error!(vmid, error = %other, "error getting VM status");
            AppError::Unexpected(format!("Error getting VM status: {}", other))
        }
    }
}

async fn power_action(
    state: &AppState,
    user: &CurrentUser,
    vmid: &str,
    action: PowerAction,
) -> Result<Json<ActionResponse>, AppError> {
    authorize(state, user, vmid)?;

    match state.vms.power(vmid, action).await {
        Ok(_) => {
            tracing::info!(username = %user.0, vmid, %action, "power action accepted");
            Ok(Json(ActionResponse {
                message: action.success_message().to_string(),
            }))
        }
        Err(VmError::NotFound(_)) => Err(AppError::VmNotFound(vmid.to_string())),
        Err(e) => {
            tracing::error!(username = %user.0, vmid, %action, error = %e, "power action failed");
            if state.config.expose_action_errors {
                Err(AppError::Unexpected(e.to_string()))
            } else {
                Err(AppError::ActionFailed { action })
            }
        }
    }
}
