use crate::helpers::{TestApp, payload, requests};
use axum::http::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;

async fn submit(app: &TestApp, payload: &Value) -> String {
    let endpoint = format!("{}/vm", &app.url);
    let response = requests::post_response(app, &endpoint, payload).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.json::<Value>().await.unwrap();
    body["task_id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn deploy_should_reach_complete() {
    // Arrange
    let app = TestApp::new().await;
    let payload = payload::deploy("svc-01", &app.ova_url());

    // Act
    let task_id = submit(&app, &payload).await;
    let status = app.wait_for_task(&task_id).await;

    // Assert
    assert_eq!(status["stage"], "complete");
    assert_eq!(status["message"], "ok");
    assert!(status.get("error").is_none());
    assert_eq!(status["vm"], "vm-100");
    assert_eq!(status["ip"], json!(["10.0.0.7", "fe80::1"]));
    assert!(app.staging_is_empty());

    let calls = app.vsphere.calls();
    assert!(calls.contains(&"ImportVApp resgroup-8".to_owned()));
    assert!(calls.contains(&"HttpNfcLeaseComplete".to_owned()));
    assert!(calls.contains(&"PowerOnVM_Task vm-100".to_owned()));
}

#[tokio::test]
async fn deploy_of_existing_name_should_conflict() {
    // Arrange
    let app = TestApp::new().await;
    let payload = payload::deploy("web-01", &app.ova_url());

    // Act
    let endpoint = format!("{}/vm", &app.url);
    let response = requests::post_response(&app, &endpoint, &payload).await;

    // Assert
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json::<Value>().await.unwrap();
    assert_eq!(body["error"], "Virtual Machine 'web-01' already exist");
    assert!(app.vsphere.calls().is_empty());
}

#[tokio::test]
async fn deploy_without_name_should_be_rejected() {
    let app = TestApp::new().await;
    let payload = json!({"ova_url": app.ova_url()});

    let response = requests::post_response(&app, &format!("{}/vm", &app.url), &payload).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_selector_should_fail_the_task() {
    // Arrange
    let app = TestApp::new().await;
    let mut payload = payload::deploy("svc-02", &app.ova_url());
    payload["computer_resources"] = json!({"type": "vapp", "path": "C1"});

    // Act
    let task_id = submit(&app, &payload).await;
    let status = app.wait_for_task(&task_id).await;

    // Assert
    assert_eq!(status["stage"], "error");
    assert_eq!(
        status["error"],
        "could not recognize computer resource type 'vapp'"
    );
}

#[tokio::test]
async fn datastore_cluster_without_drs_should_fail_the_task() {
    // Arrange
    let app = TestApp::new().await;
    app.vsphere.state().drs_enabled = false;
    let mut payload = payload::deploy("svc-03", &app.ova_url());
    payload["datastores"] = json!({"type": "cluster", "names": ["pod-1"]});

    // Act
    let task_id = submit(&app, &payload).await;
    let status = app.wait_for_task(&task_id).await;

    // Assert
    assert_eq!(status["stage"], "error");
    assert_eq!(
        status["error"],
        "storage DRS is not enabled on datastore cluster 'pod-1'"
    );
    assert_eq!(status["message"], status["error"]);
    assert!(app.staging_is_empty());
}

#[tokio::test]
async fn failed_upload_should_abort_the_lease() {
    // Arrange
    let app = TestApp::new().await;
    app.vsphere.state().fail_upload = true;
    let payload = payload::deploy("svc-04", &app.ova_url());

    // Act
    let task_id = submit(&app, &payload).await;
    let status = app.wait_for_task(&task_id).await;

    // Assert
    assert_eq!(status["stage"], "error");
    assert_eq!(
        status["error"],
        "upload of 'disk-0.vmdk' failed: status 500"
    );
    let calls = app.vsphere.calls();
    assert!(calls.contains(
        &"HttpNfcLeaseAbort upload of 'disk-0.vmdk' failed: status 500".to_owned()
    ));
    assert!(!calls.contains(&"HttpNfcLeaseComplete".to_owned()));
}

#[tokio::test]
async fn unreachable_ova_should_fail_the_task() {
    // Arrange
    let app = TestApp::new().await;
    let url = format!("{}/missing.ova", app.ova_server.uri());
    let payload = payload::deploy("svc-05", &url);

    // Act
    let task_id = submit(&app, &payload).await;
    let status = app.wait_for_task(&task_id).await;

    // Assert
    assert_eq!(status["stage"], "error");
    assert!(
        status["error"]
            .as_str()
            .unwrap()
            .starts_with("OVA source unavailable")
    );
    assert!(app.vsphere.calls().is_empty());
}

#[tokio::test]
async fn finished_task_should_expire() {
    // Arrange
    let app = TestApp::with_ttl(Duration::from_secs(2)).await;
    let payload = payload::deploy("svc-06", &app.ova_url());
    let task_id = submit(&app, &payload).await;
    app.wait_for_task(&task_id).await;

    // Act
    tokio::time::sleep(Duration::from_secs(3)).await;
    let endpoint = format!("{}/tasks/{}", &app.url, task_id);
    let response = requests::get_response(&app, &endpoint).await;

    // Assert
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json::<Value>().await.unwrap();
    assert_eq!(body["error"], "task not found");
}
