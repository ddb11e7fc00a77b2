//! JSON-RPC 2.0 over HTTP, `POST /` on its own port.
//!
//! Every reply is `HTTP 200`, failures travel in the `error` member.

use crate::services::{deploy, vm};
use crate::state::AppState;
use crate::web::types::{DeployRequest, PowerPayload, TaskIdResponse, VmListQuery};
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use vmctl_common::prelude::Error;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const SERVER_ERROR: i32 = -32000;

const VERSION: &str = "2.0";

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(handle))
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<Error> for RpcError {
    fn from(error: Error) -> Self {
        Self::new(SERVER_ERROR, error.to_string())
    }
}

impl RpcResponse {
    fn reply(id: Value, outcome: Result<Value, RpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: VERSION.to_owned(),
            result,
            error,
            id,
        }
    }
}

// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VmParams {
    uuid: String,
    datacenter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PowerParams {
    uuid: String,
    datacenter: Option<String>,
    #[serde(flatten)]
    payload: PowerPayload,
}

#[derive(Debug, Deserialize)]
struct TaskParams {
    task_id: Uuid,
}

/// Decodes the raw body and dispatches one call.
///
#[tracing::instrument(level = "trace", target = "handler", skip_all)]
async fn handle(State(app_state): State<AppState>, body: Bytes) -> Json<RpcResponse> {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(error) => {
            let error = RpcError::new(PARSE_ERROR, error.to_string());
            return Json(RpcResponse::reply(Value::Null, Err(error)));
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);

    let request = match serde_json::from_value::<RpcRequest>(value) {
        Ok(request) if request.jsonrpc == VERSION => request,
        Ok(_) => {
            let error = RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\"");
            return Json(RpcResponse::reply(id, Err(error)));
        }
        Err(error) => {
            let error = RpcError::new(INVALID_REQUEST, error.to_string());
            return Json(RpcResponse::reply(id, Err(error)));
        }
    };

    tracing::info!(target: "handler", method = request.method, "JSON-RPC call");
    let outcome = dispatch(&app_state, &request.method, request.params).await;
    if let Err(error) = &outcome {
        tracing::warn!(target: "handler", method = request.method, code = error.code, message = error.message, "JSON-RPC call failed");
    }

    Json(RpcResponse::reply(id, outcome))
}

async fn dispatch(app_state: &AppState, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "vm_info" => {
            let params: VmParams = decode(params)?;
            let vm = find(app_state, &params.uuid, params.datacenter.as_deref()).await?;
            encode(vm::info(&app_state.vsphere, &vm).await?)
        }
        "vm_deploy" => {
            let request: DeployRequest = decode(params)?;
            let task_id = deploy::submit(app_state, request).await?;
            encode(TaskIdResponse { task_id })
        }
        "vm_list" => {
            let query: VmListQuery = decode(params)?;
            encode(vm::list(&app_state.vsphere, &app_state.defaults, &query).await?)
        }
        "vm_power" => {
            let params: PowerParams = decode(params)?;
            let vm = find(app_state, &params.uuid, params.datacenter.as_deref()).await?;
            vm::power(&app_state.vsphere, &vm, &params.payload).await?;
            Ok(serde_json::json!({ "status": "ok" }))
        }
        "task_status" => {
            let params: TaskParams = decode(params)?;
            let task = app_state
                .tasks
                .find_by_id(&params.task_id)
                .ok_or(Error::NotFound("task".to_owned()))?;
            Ok(Value::Object(task.status()))
        }
        _ => Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("method '{}' not found", method),
        )),
    }
}

async fn find(
    app_state: &AppState,
    uuid: &str,
    datacenter: Option<&str>,
) -> Result<crate::vsphere::types::MoRef, RpcError> {
    Ok(vm::find_by_uuid(&app_state.vsphere, &app_state.defaults, uuid, datacenter).await?)
}

/// Missing params count as an empty object.
///
fn decode<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = match params {
        Value::Null => Value::Object(Default::default()),
        params => params,
    };
    serde_json::from_value(params).map_err(|error| RpcError::new(INVALID_PARAMS, error.to_string()))
}

fn encode<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|error| RpcError::from(Error::from(error)))
}
