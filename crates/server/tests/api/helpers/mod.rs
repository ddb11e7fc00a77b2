pub mod payload;
pub mod requests;

// -------------------------------------------------------------------------

use mock::MockVsphere;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vmctl_server::app::App;
use vmctl_server::config::VmwareDefaults;
use vmctl_server::prelude::AppState;
use vmctl_server::tasks::TaskRegistry;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test helper that runs both servers of the application in the background and
/// provides a `reqwest::Client` for making API calls.
///
pub struct TestApp {
    pub url: String,
    pub jsonrpc_url: String,
    pub client: Client,
    pub vsphere: Arc<MockVsphere>,
    pub state: AppState,
    /// Serves the appliance at `/appliance.ova`.
    pub ova_server: MockServer,
    pub staging: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_ttl(Duration::from_secs(60)).await
    }

    /// Creates a new `TestApp` whose tasks expire after `ttl`.
    ///
    pub async fn with_ttl(ttl: Duration) -> Self {
        // Create testable application instance.
        let vsphere = Arc::new(MockVsphere::default());
        let defaults = VmwareDefaults {
            datacenter: "DC".to_owned(),
            datastores: vec!["ds-a".to_owned()],
            host: Some("C1/esx-01".to_owned()),
            ..Default::default()
        };
        let staging = tempfile::tempdir().unwrap();
        let mut state = AppState::new(vsphere.clone(), defaults, TaskRegistry::new(ttl)).unwrap();
        state.staging_root = staging.path().to_path_buf();

        let application = App::build(state.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let url = application.get_url().unwrap();
        let jsonrpc = App::build_jsonrpc(state.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let jsonrpc_url = jsonrpc.get_url().unwrap();

        // Spawn applications without blocking the execution.
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            application
                .run(async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            jsonrpc
                .run(async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });

        let ova_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/appliance.ova"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload::ova()))
            .mount(&ova_server)
            .await;

        TestApp {
            url,
            jsonrpc_url,
            client: Client::new(),
            vsphere,
            state,
            ova_server,
            staging,
        }
    }

    pub fn ova_url(&self) -> String {
        format!("{}/appliance.ova", self.ova_server.uri())
    }

    /// Polls `/tasks/{id}` until the task reaches `complete` or `error`.
    ///
    pub async fn wait_for_task(&self, task_id: &str) -> Value {
        let endpoint = format!("{}/tasks/{}", &self.url, task_id);
        for _ in 0..100 {
            let status = requests::get_json(self, &endpoint).await;
            if status["stage"] == "complete" || status["stage"] == "error" {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("task {} did not finish", task_id);
    }

    /// Returns `true` once no staging directory is left behind.
    ///
    pub fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(self.staging.path()).unwrap().next().is_none()
    }
}
