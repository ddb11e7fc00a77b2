use axum::Json;
use axum::response::{IntoResponse, Response};
use derive_more::Display;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Defines the application's custom error types.
///
#[derive(Debug, Error)]
pub enum Error {
    #[error("Error: {0}")]
    Any(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("could not recognize {0} type '{1}'")]
    BadSelector(SelectorKind, String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Virtual Machine '{0}' already exist")]
    Conflict(String),
    #[error("Not ready: {0}")]
    NotReady(String),
    #[error("Timeout after: {0} seconds")]
    Timeout(f32),
    #[error("task deadline exceeded")]
    Deadline,
    #[error("task canceled")]
    Canceled,
    #[error("Authentication error: {0}")]
    RemoteAuth(String),
    #[error("vSphere API error: {0} failed: status {1}, {2}")]
    Vsphere(VsphereError, reqwest::StatusCode, Fault),

    #[error("OVA source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("malformed OVA archive: {0}")]
    ArchiveMalformed(String),
    #[error("malformed OVF descriptor: {0}")]
    OvfMalformed(String),
    #[error("storage DRS is not enabled on datastore cluster '{0}'")]
    DrsDisabled(String),
    #[error("storage DRS returned no recommendation for datastore cluster '{0}'")]
    NoDrsRecommendation(String),
    #[error("could not recognize storage DRS recommendation: {0}")]
    DrsRecommendationUnrecognized(String),
    #[error("import lease failed: {0}")]
    LeaseFailed(String),
    #[error("upload of '{0}' failed: {1}")]
    UploadFailed(String, String),
    #[error("Virtual Machine '{0}' did not report an IP address")]
    GuestNotReady(String),

    #[error("Header convert error: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to set logger: {0}")]
    Logger(#[from] tracing::log::SetLoggerError),
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tracing::dispatcher::SetGlobalDefaultError),
    #[error("IO error: {0}")]
    InputOutput(#[from] std::io::Error),
    #[error("Background job error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("URL parse error: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// Returns `true` if the error is a vSphere fault of the given type, e.g.
    /// `ToolsUnavailable`.
    ///
    pub fn is_fault(&self, kind: &str) -> bool {
        matches!(self, Error::Vsphere(_, _, fault) if fault.kind == kind)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        use axum::http::StatusCode;

        let status = match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });

        (status, Json(body)).into_response()
    }
}

/// Which kind of request selector could not be recognized.
///
#[derive(Debug, Display)]
pub enum SelectorKind {
    #[display("computer resource")]
    ComputerResource,
    #[display("datastore")]
    Datastore,
}

/// Represents vSphere API operations that can fail.
///
#[derive(Debug, Display)]
pub enum VsphereError {
    Login,
    Logout,
    Session,
    Property,
    Search,
    View,
    Task,
    PowerOn,
    PowerOff,
    Reset,
    Suspend,
    Shutdown,
    Reboot,
    Destroy,
    Rename,
    Snapshot,
    Screenshot,
    Placement,
    Import,
    Lease,
    Upload,
    Permissions,
}

/// Fault reported by the vSphere API in an error response body.
///
#[derive(Debug, Clone, Default, Display)]
#[display("{kind}: {message}")]
pub struct Fault {
    pub kind: String,
    pub message: String,
}

impl Fault {
    /// Builds a fault out of a raw vim25 JSON error body. Bodies that are not
    /// JSON faults are kept verbatim as the message.
    ///
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => Self {
                kind: value["_typeName"].as_str().unwrap_or("Unknown").to_owned(),
                message: value["faultMessage"]
                    .as_array()
                    .and_then(|messages| messages.first())
                    .and_then(|message| message["message"].as_str())
                    .or_else(|| value["message"].as_str())
                    .unwrap_or(body)
                    .to_owned(),
            },
            Err(_) => Self {
                kind: "Unknown".to_owned(),
                message: body.to_owned(),
            },
        }
    }
}
