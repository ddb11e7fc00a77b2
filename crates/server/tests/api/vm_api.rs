use crate::helpers::mock::VM_UUID;
use crate::helpers::{TestApp, requests};
use axum::http::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn list_vms_should_return_the_inventory() {
    // Arrange
    let app = TestApp::new().await;

    // Act
    let response = requests::get_response(&app, &format!("{}/vm", &app.url)).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let vms = response.json::<Vec<Value>>().await.unwrap();
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0]["name"], "web-01");
    assert_eq!(vms[0]["uuid"], VM_UUID);
}

#[tokio::test]
async fn get_vm_should_resolve_by_uuid() {
    // Arrange
    let app = TestApp::new().await;
    let endpoint = format!("{}/vm/{}", &app.url, VM_UUID);

    // Act
    let vm = requests::get_json(&app, &endpoint).await;

    // Assert
    assert_eq!(vm["name"], "web-01");
    assert_eq!(vm["power_state"], "poweredOn");
    assert_eq!(vm["ip_address"], "10.0.0.5");
}

#[tokio::test]
async fn unknown_vm_should_not_be_found() {
    let app = TestApp::new().await;

    let response = requests::get_response(&app, &format!("{}/vm/missing", &app.url)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json::<Value>().await.unwrap();
    assert_eq!(body["error"], "Virtual Machine 'missing' not found");
}

#[tokio::test]
async fn find_vm_should_resolve_by_path() {
    let app = TestApp::new().await;

    let vm = requests::get_json(&app, &format!("{}/find/vm?path=web-01", &app.url)).await;

    assert_eq!(vm["uuid"], VM_UUID);
}

#[tokio::test]
async fn shutdown_without_tools_should_force_power_off() {
    // Arrange
    let app = TestApp::new().await;
    app.vsphere.state().tools_running = false;
    let endpoint = format!("{}/vm/{}/power", &app.url, VM_UUID);

    // Act
    let payload = json!({"state": "shutdown", "force": true});
    let response = requests::patch_response(&app, &endpoint, &payload).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.vsphere.calls(),
        vec!["ShutdownGuest vm-1".to_owned(), "PowerOffVM_Task vm-1".to_owned()]
    );
}

#[tokio::test]
async fn shutdown_without_tools_should_fail_unforced() {
    // Arrange
    let app = TestApp::new().await;
    app.vsphere.state().tools_running = false;
    let endpoint = format!("{}/vm/{}/power", &app.url, VM_UUID);

    // Act
    let payload = json!({"state": "reboot"});
    let response = requests::patch_response(&app, &endpoint, &payload).await;

    // Assert
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.vsphere.calls(), vec!["RebootGuest vm-1".to_owned()]);
}

#[tokio::test]
async fn delete_vm_should_power_off_first() {
    let app = TestApp::new().await;

    let response =
        requests::delete_response(&app, &format!("{}/vm/{}", &app.url, VM_UUID)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.vsphere.calls(),
        vec!["PowerOffVM_Task vm-1".to_owned(), "Destroy_Task vm-1".to_owned()]
    );
}

#[tokio::test]
async fn screenshot_should_be_png() {
    let app = TestApp::new().await;

    let endpoint = format!("{}/vm/{}/screenshot", &app.url, VM_UUID);
    let response = requests::get_response(&app, &endpoint).await;

    assert_eq!(response.headers()["content-type"], "image/png");
    assert!(response.bytes().await.unwrap().starts_with(b"\x89PNG"));
}

#[tokio::test]
async fn vm_roles_should_mark_inherited_permissions() {
    // Arrange
    let app = TestApp::new().await;
    let endpoint = format!("{}/vm/{}/roles", &app.url, VM_UUID);

    // Act
    let roles = requests::get_json(&app, &endpoint).await;

    // Assert
    assert_eq!(roles[0]["principal"], "VSPHERE.LOCAL\\devops");
    assert_eq!(roles[0]["role"], "Operator");
    assert_eq!(roles[0]["inherited"], true);
}

#[tokio::test]
async fn add_vm_role_should_set_the_permission() {
    // Arrange
    let app = TestApp::new().await;
    let endpoint = format!("{}/vm/{}/roles", &app.url, VM_UUID);

    // Act
    let payload = json!({"principal": "VSPHERE.LOCAL\\alice", "role": "Operator"});
    let response = requests::patch_response(&app, &endpoint, &payload).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.vsphere.calls(),
        vec!["SetEntityPermissions vm-1 VSPHERE.LOCAL\\alice 1001".to_owned()]
    );
}
