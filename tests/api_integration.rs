// ABOUTME: Integration tests for the relay HTTP client against a mock server
// ABOUTME: Covers tree fetch, document CRUD calls and status-to-error mapping

use orgfoundry::api::{ApiClient, RemoteStore};
use orgfoundry::{Error, RemoteId};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(uri: String, timeout: Duration) -> ApiClient {
    ApiClient::new("test_token".into(), uri, timeout)
        .unwrap()
        .disable_throttle()
}

#[tokio::test]
async fn test_fetch_tree_success() {
    let mock_server = MockServer::start().await;

    let response = serde_json::json!({
        "folders": [
            {"_id": "f1", "name": "Bestiary", "folder": null, "sort": 0}
        ],
        "documents": [
            {"_id": "42", "name": "Goblin", "folder": "f1", "sort": 0, "content": "<p>Small</p>"}
        ]
    });

    Mock::given(method("GET"))
        .and(path("/api/journal/tree"))
        .and(header("Authorization", "Bearer test_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(response))
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();

    // Run blocking client in a blocking context
    let result = tokio::task::spawn_blocking(move || {
        client(uri, Duration::from_secs(5)).fetch_tree()
    })
    .await
    .unwrap();

    let tree = result.unwrap();
    assert_eq!(tree.len(), 2);
    let goblin = tree.get(&RemoteId::new("42")).unwrap();
    assert_eq!(goblin.parent, Some(RemoteId::new("f1")));
    assert_eq!(goblin.body(), Some("<p>Small</p>"));
}

#[tokio::test]
async fn test_fetch_document_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/journal/documents/42"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"_id": "42", "content": "<p>Hi</p>"})),
        )
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let result = tokio::task::spawn_blocking(move || {
        client(uri, Duration::from_secs(5)).fetch_document_body(&RemoteId::new("42"))
    })
    .await
    .unwrap();

    assert_eq!(result.unwrap(), "<p>Hi</p>");
}

#[tokio::test]
async fn test_create_and_update_document() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/journal/documents"))
        .and(body_json(serde_json::json!({
            "name": "Orc",
            "folder": "f1",
            "content": "<p>Big</p>"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"_id": "77"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/journal/documents/77"))
        .and(body_json(serde_json::json!({"content": "<p>Bigger</p>"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let result = tokio::task::spawn_blocking(move || {
        let client = client(uri, Duration::from_secs(5));
        let id = client.create_document(Some(&RemoteId::new("f1")), "Orc", "<p>Big</p>")?;
        client.update_document(&id, "<p>Bigger</p>")?;
        Ok::<_, Error>(id)
    })
    .await
    .unwrap();

    assert_eq!(result.unwrap(), RemoteId::new("77"));
}

#[tokio::test]
async fn test_auth_error_handling() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/journal/tree"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let result = tokio::task::spawn_blocking(move || {
        client(uri, Duration::from_secs(5)).fetch_tree()
    })
    .await
    .unwrap();

    match result {
        Err(e @ Error::RemoteAuth(_)) => assert_eq!(e.exit_code(), 2),
        other => panic!("Expected auth error, got {:?}", other.map(|t| t.len())),
    }
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/journal/documents/42"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let result = tokio::task::spawn_blocking(move || {
        client(uri, Duration::from_secs(5)).update_document(&RemoteId::new("42"), "<p>x</p>")
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(Error::RemoteUnavailable(_))));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/journal/tree"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"folders": [], "documents": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let result = tokio::task::spawn_blocking(move || {
        client(uri, Duration::from_millis(300)).fetch_tree()
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(Error::RemoteTimeout(_))));
}

#[tokio::test]
async fn test_malformed_tree_is_parse_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/journal/tree"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let result = tokio::task::spawn_blocking(move || {
        client(uri, Duration::from_secs(5)).fetch_tree()
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(Error::Parse(_))));
}
