use crate::helpers::TestApp;
use serde_json::Value;

pub async fn get_response(app: &TestApp, endpoint: &str) -> reqwest::Response {
    app.client.get(endpoint).send().await.unwrap()
}

pub async fn get_json(app: &TestApp, endpoint: &str) -> Value {
    get_response(app, endpoint).await.json().await.unwrap()
}

pub async fn post_response(app: &TestApp, endpoint: &str, payload: &Value) -> reqwest::Response {
    app.client
        .post(endpoint)
        .json(&payload)
        .send()
        .await
        .unwrap()
}

pub async fn patch_response(app: &TestApp, endpoint: &str, payload: &Value) -> reqwest::Response {
    app.client
        .patch(endpoint)
        .json(&payload)
        .send()
        .await
        .unwrap()
}

pub async fn delete_response(app: &TestApp, endpoint: &str) -> reqwest::Response {
    app.client.delete(endpoint).send().await.unwrap()
}

/// Sends one JSON-RPC call and returns the decoded reply.
///
pub async fn rpc(app: &TestApp, method: &str, params: Value) -> Value {
    let payload = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    });
    let response = post_response(app, &app.jsonrpc_url, &payload).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response.json().await.unwrap()
}
