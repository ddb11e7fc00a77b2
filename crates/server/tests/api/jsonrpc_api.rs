use crate::helpers::mock::VM_UUID;
use crate::helpers::{TestApp, payload, requests};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn vm_info_should_return_the_vm() {
    // Arrange
    let app = TestApp::new().await;

    // Act
    let reply = requests::rpc(&app, "vm_info", json!({"uuid": VM_UUID})).await;

    // Assert
    assert_eq!(reply["jsonrpc"], "2.0");
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["name"], "web-01");
    assert!(reply.get("error").is_none());
}

#[tokio::test]
async fn unknown_method_should_be_reported() {
    let app = TestApp::new().await;

    let reply = requests::rpc(&app, "vm_clone", json!({})).await;

    assert_eq!(reply["error"]["code"], -32601);
}

#[tokio::test]
async fn deploy_and_status_should_work_over_rpc() {
    // Arrange
    let app = TestApp::new().await;
    let params = payload::deploy("svc-rpc", &app.ova_url());

    // Act
    let reply = requests::rpc(&app, "vm_deploy", params).await;
    let task_id = reply["result"]["task_id"].as_str().unwrap().to_owned();
    let mut status = json!(null);
    for _ in 0..100 {
        let reply = requests::rpc(&app, "task_status", json!({"task_id": task_id})).await;
        status = reply["result"].clone();
        if status["stage"] == "complete" || status["stage"] == "error" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Assert
    assert_eq!(status["stage"], "complete");
}

#[tokio::test]
async fn rpc_failure_should_carry_the_message() {
    let app = TestApp::new().await;

    let reply = requests::rpc(&app, "vm_power", json!({"uuid": "missing", "state": "on"})).await;

    assert_eq!(reply["error"]["code"], -32000);
    assert_eq!(reply["error"]["message"], "Virtual Machine 'missing' not found");
}
