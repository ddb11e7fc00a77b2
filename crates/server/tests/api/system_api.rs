use crate::helpers::{TestApp, requests};
use axum::http::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn healthz_and_info_should_answer() {
    // Arrange
    let app = TestApp::new().await;

    // Act
    let health = requests::get_json(&app, &format!("{}/healthz", &app.url)).await;
    let info = requests::get_json(&app, &format!("{}/info", &app.url)).await;

    // Assert
    assert_eq!(health["status"], "ok");
    assert_eq!(info["name"], "vmctl_server");
    assert!(!info["version"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn readyz_follows_the_session() {
    // Arrange
    let app = TestApp::new().await;
    let endpoint = format!("{}/readyz", &app.url);
    let ready = requests::get_response(&app, &endpoint).await;

    // Act
    app.vsphere.state().session_alive = false;
    let lost = requests::get_response(&app, &endpoint).await;

    // Assert
    assert_eq!(ready.status(), StatusCode::OK);
    assert_eq!(lost.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = lost.json::<Value>().await.unwrap();
    assert_eq!(body["error"], "Not ready: vCenter session lost");
}

#[tokio::test]
async fn metrics_should_count_served_requests() {
    // Arrange
    let app = TestApp::new().await;
    requests::get_response(&app, &format!("{}/healthz", &app.url)).await;

    // Act
    let response = requests::get_response(&app, &format!("{}/metrics", &app.url)).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let body = response.text().await.unwrap();
    assert!(body.contains("vmctl_request_duration_seconds"));
    assert!(body.contains("path=\"/healthz\""));
}

#[tokio::test]
async fn openapi_document_lists_the_routes() {
    let app = TestApp::new().await;

    let document = requests::get_json(&app, &format!("{}/openapi", &app.url)).await;

    let paths = document["paths"].as_object().unwrap();
    assert!(paths.contains_key("/vm"));
    assert!(paths.contains_key("/tasks/{id}"));
    assert!(paths.contains_key("/vm/{vm}/power"));
}

#[tokio::test]
async fn unknown_task_should_not_be_found() {
    // Arrange
    let app = TestApp::new().await;
    let endpoint = format!("{}/tasks/{}", &app.url, uuid::Uuid::new_v4());

    // Act
    let response = requests::get_response(&app, &endpoint).await;

    // Assert
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json::<Value>().await.unwrap();
    assert_eq!(body["error"], "task not found");
}

#[tokio::test]
async fn malformed_task_id_should_be_rejected() {
    let app = TestApp::new().await;

    let response = requests::get_response(&app, &format!("{}/tasks/not-a-uuid", &app.url)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
