//! Role and permission routes

use crate::services::permissions;
use crate::state::AppState;
use crate::web::routes::vm::resolve;
use crate::web::types::{DatacenterQuery, Role, RolePayload, StatusResponse, VmPermission};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use vmctl_common::prelude::Result;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/permissions/roles", get(list_roles))
        .route("/vm/{vm}/roles", get(list_vm_roles).patch(add_vm_role))
}

/// Lists every role defined in vCenter.
///
#[utoipa::path(
    get,
    path = "/permissions/roles",
    tags = ["Permissions"],
    responses(
        (status = 200, body = Vec<Role>, description = "Roles found"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn list_roles(State(app_state): State<AppState>) -> Result<Json<Vec<Role>>> {
    let roles = permissions::roles(&app_state.vsphere).await?;
    tracing::info!(target: "handler", count = roles.len(), "Found roles");

    Ok(Json(roles))
}

/// Lists the permissions effective on a VM, inherited ones included.
///
#[utoipa::path(
    get,
    path = "/vm/{vm}/roles",
    tags = ["Permissions"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    responses(
        (status = 200, body = Vec<VmPermission>, description = "Permissions found"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn list_vm_roles(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
) -> Result<Json<Vec<VmPermission>>> {
    let vm = resolve(&app_state, &uuid, &query).await?;

    Ok(Json(permissions::vm_permissions(&app_state.vsphere, &vm).await?))
}

/// Grants a role to a user or group on a VM.
///
#[utoipa::path(
    patch,
    path = "/vm/{vm}/roles",
    tags = ["Permissions"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    request_body = RolePayload,
    responses(
        (status = 200, body = StatusResponse, description = "Role granted"),
        (status = 400, body = String, description = "Empty principal"),
        (status = 500, body = String, description = "Role or VM not found")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn add_vm_role(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
    Json(payload): Json<RolePayload>,
) -> Result<Json<StatusResponse>> {
    let vm = resolve(&app_state, &uuid, &query).await?;
    permissions::add_role(&app_state.vsphere, &vm, &payload).await?;

    Ok(Json(StatusResponse::ok()))
}
