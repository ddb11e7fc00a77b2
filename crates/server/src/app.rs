use crate::state::AppState;
use crate::web::middleware as mw;
use crate::web::{self, jsonrpc, routes_permissions, routes_system, routes_tasks, routes_vm};
use axum::serve::Serve;
use axum::{Json, Router, middleware, routing::get};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use vmctl_common::error::Result;

/// Represents one listening server of the application, the REST API or the
/// JSON-RPC endpoint.
///
pub struct App {
    server: Serve<TcpListener, Router, Router>,
}

impl App {
    /// Builds the REST API, but does not run it.
    ///
    /// This configures the entire Axum router, including routes, state, and
    /// middleware. Binds a `TcpListener` to the provided address and
    /// determines the final URL of the application.
    ///
    /// # Arguments
    ///
    /// * `app_state` - Shared state for the application.
    /// * `address` - Socket address to bind to. If the port is 0, a random
    ///   available port will be used.
    ///
    pub async fn build(app_state: AppState, address: SocketAddr) -> Result<Self> {
        let router = Router::new()
            .merge(routes_system::routes())
            .merge(routes_vm::routes())
            .merge(routes_permissions::routes())
            .merge(routes_tasks::routes())
            .route("/openapi", get(|| async { Json(ApiDoc::openapi()) }))
            .merge(SwaggerUi::new("/swagger-ui").url("/swagger-ui/openapi.json", ApiDoc::openapi()))
            .layer(middleware::from_fn_with_state(app_state.clone(), mw::track))
            .layer(mw::allow_cors())
            .with_state(app_state);

        Self::bind(router, address).await
    }

    /// Builds the JSON-RPC endpoint, `POST /` on its own address.
    ///
    pub async fn build_jsonrpc(app_state: AppState, address: SocketAddr) -> Result<Self> {
        let router = Router::new()
            .merge(jsonrpc::routes())
            .layer(middleware::from_fn_with_state(app_state.clone(), mw::track))
            .with_state(app_state);

        Self::bind(router, address).await
    }

    async fn bind(router: Router, address: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(&address).await?;

        Ok(Self {
            server: axum::serve(listener, router),
        })
    }

    /// Runs the server until `shutdown` resolves, then lets in-flight
    /// requests finish.
    ///
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.server
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(Into::into)
    }

    /// Returns the public URL of the server.
    ///
    pub fn get_url(&self) -> Result<String> {
        Ok(format!("http://{}", self.server.local_addr()?))
    }
}

/// API documentation for the application.
///
/// This struct defines the OpenAPI specification of the REST API, including
/// all paths and components (schemas). It is used by `utoipa` to generate the
/// OpenAPI JSON and Swagger UI.
///
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        routes_system::info,
        routes_system::healthz,
        routes_system::readyz,
        routes_system::metrics,
        routes_vm::list_vms,
        routes_vm::deploy_vm,
        routes_vm::get_vm,
        routes_vm::delete_vm,
        routes_vm::rename_vm,
        routes_vm::get_screenshot,
        routes_vm::list_snapshots,
        routes_vm::create_snapshot,
        routes_vm::delete_snapshot,
        routes_vm::revert_snapshot,
        routes_vm::change_power,
        routes_vm::find_vm,
        routes_permissions::list_roles,
        routes_permissions::list_vm_roles,
        routes_permissions::add_vm_role,
        routes_tasks::get_task,
    ),
    components(schemas(
        web::types::DeployRequest,
        web::types::DatastoreSelector,
        web::types::ComputerResourceSelector,
        web::types::TaskIdResponse,
        web::types::TaskStatusResponse,
        web::types::StatusResponse,
        web::types::BuildInfo,
        web::types::VmInfo,
        web::types::RenamePayload,
        web::types::Snapshot,
        web::types::SnapshotCreatePayload,
        web::types::SnapshotDeletePayload,
        web::types::PowerPayload,
        web::types::PowerAction,
        web::types::Role,
        web::types::VmPermission,
        web::types::RolePayload,
    )),
    tags(
        (name = "VM", description = "Inventory, deployment and power"),
        (name = "Snapshot", description = "VM snapshots"),
        (name = "Permissions", description = "Roles and VM permissions"),
        (name = "Task", description = "Background task status"),
        (name = "System", description = "Build info, health checks and metrics"),
    )
)]
pub struct ApiDoc;
