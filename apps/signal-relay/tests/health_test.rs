mod common;

use common::{join, start_relay};

#[tokio::test]
async fn health_reports_local_load() {
    let relay = start_relay().await;
    let url = format!("http://{}/health", relay.addr);

    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "status": "ok", "rooms": 0, "connections": 0 }));

    let (_a, _) = join(relay.addr, 5, 1).await;
    let (_b, _) = join(relay.addr, 6, 2).await;

    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["rooms"], 2);
    assert_eq!(body["connections"], 2);
}
