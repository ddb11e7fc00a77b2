//! VM routes

use crate::services::{deploy, vm};
use crate::state::AppState;
use crate::vsphere::types::MoRef;
use crate::web::types::*;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use vmctl_common::prelude::Result;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/vm", get(list_vms).post(deploy_vm))
        .route("/vm/{vm}", get(get_vm).delete(delete_vm).patch(rename_vm))
        .route("/vm/{vm}/screenshot", get(get_screenshot))
        .route(
            "/vm/{vm}/snapshots",
            get(list_snapshots)
                .post(create_snapshot)
                .delete(delete_snapshot),
        )
        .route("/vm/{vm}/revert/{snapshot}", post(revert_snapshot))
        .route("/vm/{vm}/power", patch(change_power))
        .route("/find/vm", get(find_vm))
}

/// Resolves the `{vm}` path segment, a BIOS UUID, into a VM reference.
///
pub(crate) async fn resolve(app_state: &AppState, uuid: &str, query: &DatacenterQuery) -> Result<MoRef> {
    vm::find_by_uuid(
        &app_state.vsphere,
        &app_state.defaults,
        uuid,
        query.datacenter.as_deref(),
    )
    .await
}

/// Lists the VMs of a datacenter, folder or resource pool.
///
/// # Arguments
///
/// * `State(app_state)`: Shared application state.
/// * `Query(query)`: Optional datacenter, folder and resource pool.
///
/// # Returns
///
/// On success, returns a Json list of [`VmInfo`].
///
#[utoipa::path(
    get,
    path = "/vm",
    tags = ["VM"],
    params(VmListQuery),
    responses(
        (status = 200, body = Vec<VmInfo>, description = "VMs found"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn list_vms(
    State(app_state): State<AppState>,
    Query(query): Query<VmListQuery>,
) -> Result<Json<Vec<VmInfo>>> {
    let vms = vm::list(&app_state.vsphere, &app_state.defaults, &query).await?;
    tracing::info!(target: "handler", count = vms.len(), "Found VMs");

    Ok(Json(vms))
}

/// Accepts a deployment from an OVA and starts it in the background.
///
/// The name must be free in the datacenter, everything else is checked by the
/// background task, whose progress is read from `/tasks/{id}`.
///
/// # Arguments
///
/// * `State(app_state)`: Shared application state.
/// * `Json(request)`: Deploy request, empty selectors take the defaults.
///
/// # Returns
///
/// `HTTP 200 OK` with the ID of the task.
///
#[utoipa::path(
    post,
    path = "/vm",
    tags = ["VM"],
    request_body = DeployRequest,
    responses(
        (status = 200, body = TaskIdResponse, description = "Deployment accepted"),
        (status = 400, body = String, description = "Missing name or OVA URL"),
        (status = 500, body = String, description = "Name taken or datacenter not found")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip_all, fields(vm = request.name))]
async fn deploy_vm(
    State(app_state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<TaskIdResponse>> {
    let task_id = deploy::submit(&app_state, request).await?;

    Ok(Json(TaskIdResponse { task_id }))
}

/// Returns the summary of a VM.
///
#[utoipa::path(
    get,
    path = "/vm/{vm}",
    tags = ["VM"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    responses(
        (status = 200, body = VmInfo, description = "VM found"),
        (status = 500, body = String, description = "VM not found")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn get_vm(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
) -> Result<Json<VmInfo>> {
    let vm = resolve(&app_state, &uuid, &query).await?;

    Ok(Json(vm::info(&app_state.vsphere, &vm).await?))
}

/// Destroys a VM, powering it off first when it runs.
///
#[utoipa::path(
    delete,
    path = "/vm/{vm}",
    tags = ["VM"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    responses(
        (status = 200, body = StatusResponse, description = "VM destroyed"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn delete_vm(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
) -> Result<Json<StatusResponse>> {
    let vm = resolve(&app_state, &uuid, &query).await?;
    vm::destroy(&app_state.vsphere, &vm).await?;

    Ok(Json(StatusResponse::ok()))
}

#[utoipa::path(
    patch,
    path = "/vm/{vm}",
    tags = ["VM"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    request_body = RenamePayload,
    responses(
        (status = 200, body = StatusResponse, description = "VM renamed"),
        (status = 400, body = String, description = "Empty name"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn rename_vm(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
    Json(payload): Json<RenamePayload>,
) -> Result<Json<StatusResponse>> {
    let vm = resolve(&app_state, &uuid, &query).await?;
    vm::rename(&app_state.vsphere, &vm, &payload.name).await?;

    Ok(Json(StatusResponse::ok()))
}

/// Returns a PNG screenshot of the VM console.
///
#[utoipa::path(
    get,
    path = "/vm/{vm}/screenshot",
    tags = ["VM"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    responses(
        (status = 200, description = "PNG screenshot of the console"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
async fn get_screenshot(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
) -> Result<impl IntoResponse> {
    let vm = resolve(&app_state, &uuid, &query).await?;
    let png = vm::screenshot(&app_state.vsphere, &vm).await?;

    Ok(([(CONTENT_TYPE, "image/png")], png))
}

/// Lists the snapshots of a VM, parents before their children.
///
#[utoipa::path(
    get,
    path = "/vm/{vm}/snapshots",
    tags = ["Snapshot"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    responses(
        (status = 200, body = Vec<Snapshot>, description = "Snapshots found"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn list_snapshots(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
) -> Result<Json<Vec<Snapshot>>> {
    let vm = resolve(&app_state, &uuid, &query).await?;

    Ok(Json(vm::snapshots(&app_state.vsphere, &vm).await?))
}

#[utoipa::path(
    post,
    path = "/vm/{vm}/snapshots",
    tags = ["Snapshot"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    request_body = SnapshotCreatePayload,
    responses(
        (status = 200, body = Snapshot, description = "Snapshot created"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn create_snapshot(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
    Json(payload): Json<SnapshotCreatePayload>,
) -> Result<Json<Snapshot>> {
    let vm = resolve(&app_state, &uuid, &query).await?;
    let snapshot = vm::create_snapshot(&app_state.vsphere, &vm, payload).await?;
    tracing::info!(target: "handler", id = snapshot.id, "Snapshot created");

    Ok(Json(snapshot))
}

#[utoipa::path(
    delete,
    path = "/vm/{vm}/snapshots",
    tags = ["Snapshot"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    request_body = SnapshotDeletePayload,
    responses(
        (status = 200, body = StatusResponse, description = "Snapshot removed"),
        (status = 500, body = String, description = "Snapshot not found")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn delete_snapshot(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
    Json(payload): Json<SnapshotDeletePayload>,
) -> Result<Json<StatusResponse>> {
    let vm = resolve(&app_state, &uuid, &query).await?;
    vm::delete_snapshot(&app_state.vsphere, &vm, &payload).await?;

    Ok(Json(StatusResponse::ok()))
}

#[utoipa::path(
    post,
    path = "/vm/{vm}/revert/{snapshot}",
    tags = ["Snapshot"],
    params(
        ("vm", Path, description = "BIOS UUID of the VM"),
        ("snapshot", Path, description = "Integer ID of the snapshot"),
        DatacenterQuery
    ),
    responses(
        (status = 200, body = StatusResponse, description = "VM reverted"),
        (status = 500, body = String, description = "Snapshot not found")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn revert_snapshot(
    State(app_state): State<AppState>,
    Path((uuid, snapshot)): Path<(String, i32)>,
    Query(query): Query<DatacenterQuery>,
) -> Result<Json<StatusResponse>> {
    let vm = resolve(&app_state, &uuid, &query).await?;
    vm::revert_snapshot(&app_state.vsphere, &vm, snapshot).await?;

    Ok(Json(StatusResponse::ok()))
}

/// Changes the power state of a VM.
///
/// `reboot` and `shutdown` need VMware Tools in the guest. With `force` set
/// they fall back to a hard reset or power-off when the tools are missing.
///
#[utoipa::path(
    patch,
    path = "/vm/{vm}/power",
    tags = ["VM"],
    params(("vm", Path, description = "BIOS UUID of the VM"), DatacenterQuery),
    request_body = PowerPayload,
    responses(
        (status = 200, body = StatusResponse, description = "Power state changed"),
        (status = 500, body = String, description = "Internal server error")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn change_power(
    State(app_state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<DatacenterQuery>,
    Json(payload): Json<PowerPayload>,
) -> Result<Json<StatusResponse>> {
    let vm = resolve(&app_state, &uuid, &query).await?;
    vm::power(&app_state.vsphere, &vm, &payload).await?;
    tracing::info!(target: "handler", state = ?payload.state, "Power state changed");

    Ok(Json(StatusResponse::ok()))
}

/// Finds a VM by inventory path.
///
#[utoipa::path(
    get,
    path = "/find/vm",
    tags = ["VM"],
    params(FindQuery),
    responses(
        (status = 200, body = VmInfo, description = "VM found"),
        (status = 500, body = String, description = "VM not found")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn find_vm(
    State(app_state): State<AppState>,
    Query(query): Query<FindQuery>,
) -> Result<Json<VmInfo>> {
    Ok(Json(
        vm::find(&app_state.vsphere, &app_state.defaults, &query).await?,
    ))
}
