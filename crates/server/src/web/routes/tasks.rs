//! Task routes

use crate::state::AppState;
use crate::web::types::TaskStatusResponse;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;
use vmctl_common::prelude::{Error, Result};

pub fn routes() -> Router<AppState> {
    Router::new().route("/tasks/{id}", get(get_task))
}

/// Returns the status map of a background task.
///
/// # Arguments
///
/// * `State(app_state)`: Shared application state.
/// * `Path(id)`: ID returned when the task was accepted.
///
/// # Returns
///
/// The status map, e.g. `{"stage": "import", "message": "uploading disks"}`.
/// Unknown and expired tasks are both reported as not found.
///
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tags = ["Task"],
    params(("id", Path, description = "Task ID")),
    responses(
        (status = 200, body = TaskStatusResponse, description = "Task found"),
        (status = 500, body = String, description = "Task not found")
    )
)]
#[tracing::instrument(level = "trace", target = "handler", skip(app_state))]
async fn get_task(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskStatusResponse>> {
    let task = app_state
        .tasks
        .find_by_id(&id)
        .ok_or(Error::NotFound("task".to_owned()))?;

    Ok(Json(TaskStatusResponse(task.status())))
}
