use ingest_load::{DataServiceClient, LoadError};
use serde_json::{Map, Value, json};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("test bodies are objects"),
    }
}

fn created(id: &str) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({ "results": { "kf_id": id }, "_status": { "code": 201 } }))
}

fn client() -> DataServiceClient {
    DataServiceClient::new().unwrap()
}

// ── Submit ───────────────────────────────────────────────────────

#[tokio::test]
async fn post_without_id_creates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/participants"))
        .and(body_json(json!({ "external_id": "P1" })))
        .respond_with(created("PT_00000001"))
        .expect(1)
        .mount(&server)
        .await;

    let id = client()
        .submit(
            &server.uri(),
            "participants",
            "kf_id",
            &body(json!({ "external_id": "P1", "ethnicity": null })),
        )
        .await
        .unwrap();
    assert_eq!(id, "PT_00000001");
}

#[tokio::test]
async fn body_with_id_is_patched() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/participants/PT_00000001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": { "kf_id": "PT_00000001" } })))
        .expect(1)
        .mount(&server)
        .await;

    let id = client()
        .submit(
            &server.uri(),
            "participants",
            "kf_id",
            &body(json!({ "kf_id": "PT_00000001", "external_id": "P1" })),
        )
        .await
        .unwrap();
    assert_eq!(id, "PT_00000001");
}

#[tokio::test]
async fn patch_not_found_falls_back_to_post() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/participants/PT_GONE"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/participants"))
        .respond_with(created("PT_GONE"))
        .expect(1)
        .mount(&server)
        .await;

    let id = client()
        .submit(&server.uri(), "participants", "kf_id", &body(json!({ "kf_id": "PT_GONE" })))
        .await
        .unwrap();
    assert_eq!(id, "PT_GONE");
}

#[tokio::test]
async fn already_exists_is_reconciled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/participants"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "_status": { "code": 400, "message": "participant already exists" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/participants"))
        .and(query_param("gender", "Female"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "kf_id": "PT_EXISTING", "external_id": "OLD" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/participants/PT_EXISTING"))
        .and(body_json(json!({ "external_id": "P1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": { "kf_id": "PT_EXISTING" } })))
        .expect(1)
        .mount(&server)
        .await;

    let id = client()
        .submit(
            &server.uri(),
            "participants",
            "kf_id",
            &body(json!({ "external_id": "P1", "gender": "Female" })),
        )
        .await
        .unwrap();
    assert_eq!(id, "PT_EXISTING");
}

#[tokio::test]
async fn matching_external_id_is_not_patched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/studies"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "_status": { "message": "study already exists" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/studies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "kf_id": "SD_1", "external_id": "phs001" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let id = client()
        .submit(&server.uri(), "studies", "kf_id", &body(json!({ "external_id": "phs001" })))
        .await
        .unwrap();
    assert_eq!(id, "SD_1");
}

#[tokio::test]
async fn server_error_is_a_submission_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/participants"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client()
        .submit(&server.uri(), "participants", "kf_id", &body(json!({ "external_id": "P1" })))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Submission(ref msg) if msg.contains("boom")));
}

#[tokio::test]
async fn response_without_id_is_a_submission_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "results": {} })))
        .mount(&server)
        .await;

    let err = client()
        .submit(&server.uri(), "participants", "kf_id", &body(json!({ "external_id": "P1" })))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Submission(_)));
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
    let err = client()
        .submit("http://127.0.0.1:1", "participants", "kf_id", &body(json!({ "external_id": "P1" })))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Network(_)));
}

// ── Query ────────────────────────────────────────────────────────

#[tokio::test]
async fn query_follows_next_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/participants"))
        .and(query_param("external_id", "P1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "kf_id": "PT_1" }],
            "_links": { "next": "/participants?external_id=P1&after=1" }
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/participants"))
        .and(query_param("after", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "kf_id": "PT_2" }, { "kf_id": "Not Reported" }],
            "_links": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ids = client()
        .query_ids(
            &server.uri(),
            "participants",
            "kf_id",
            &[("external_id".to_string(), "P1".to_string())],
        )
        .await
        .unwrap();
    assert_eq!(ids, vec!["PT_1", "PT_2"]);
}

#[tokio::test]
async fn empty_query_returns_no_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/participants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&server)
        .await;

    let ids = client()
        .query_ids(&server.uri(), "participants", "kf_id", &[])
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn failed_query_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = client().query_ids(&server.uri(), "participants", "kf_id", &[]).await;
    assert!(matches!(result, Err(LoadError::Submission(_))));
}
