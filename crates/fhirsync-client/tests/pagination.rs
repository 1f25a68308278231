//! Query aggregation against a mock target service.

use fhirsync_auth::HostConfig;
use fhirsync_client::{ClientError, FhirClient, GetOptions};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn patient_page(ids: &[&str], next: Option<String>) -> Value {
    let mut body = json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "entry": ids
            .iter()
            .map(|id| json!({"resource": {"resourceType": "Patient", "id": id}, "search": {"mode": "match"}}))
            .collect::<Vec<_>>(),
    });
    if let Some(next) = next {
        body["link"] = json!([{"relation": "next", "url": next}]);
    }
    body
}

async fn client_for(server: &MockServer) -> FhirClient {
    let base = format!("{}/fhir", server.uri());
    FhirClient::builder(HostConfig::new(base, "none"))
        .build()
        .await
        .unwrap()
}

async fn mount_three_pages(server: &MockServer) {
    let base = format!("{}/fhir", server.uri());

    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param_is_missing("page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(patient_page(&["a", "b"], Some(format!("{base}/Patient?page=2")))),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(patient_page(&["c", "d"], Some(format!("{base}/Patient?page=3")))),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(patient_page(&["e"], None)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn follows_next_links_in_order() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    let client = client_for(&server).await;

    let result = client.get("Patient", &GetOptions::default()).await.unwrap();

    assert!(result.success());
    assert_eq!(result.entry_count(), 5);
    assert!(result.next.is_none());
    let ids: Vec<&str> = result
        .resources()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn single_page_stops_after_first() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;
    let client = client_for(&server).await;

    let result = client
        .get("Patient", &GetOptions::default().single_page())
        .await
        .unwrap();

    assert_eq!(result.entry_count(), 2);
    assert!(result.next.as_deref().unwrap().ends_with("page=2"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn page_without_entries_is_malformed() {
    let server = MockServer::start().await;
    let base = format!("{}/fhir", server.uri());

    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param_is_missing("page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(patient_page(&["a"], Some(format!("{base}/Patient?page=2")))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resourceType": "Bundle"})))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.get("Patient", &GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::MalformedPagination { ref url } if url.ends_with("page=2")));
}

#[tokio::test]
async fn failed_read_raises_unless_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Unknown"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": "not-found", "diagnostics": "Unknown type"}]
        })))
        .mount(&server)
        .await;
    let client = client_for(&server).await;

    let err = client.get("Unknown", &GetOptions::default()).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, ClientError::InvalidCall { .. }));

    let result = client
        .get("Unknown", &GetOptions::default().allow_failure())
        .await
        .unwrap();
    assert!(!result.success());
    assert_eq!(result.status, 404);
}

#[tokio::test]
async fn requests_carry_fhir_headers_and_projection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Observation"))
        .and(query_param("_tag", "study-1"))
        .and(query_param("_count", "50"))
        .and(query_param("_elements", "identifier,id"))
        .and(header("accept", "application/fhir+json"))
        .and(header("content-type", "application/fhir+json; fhirVersion=4.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 0
        })))
        .expect(1)
        .mount(&server)
        .await;
    let client = client_for(&server).await;

    let result = client
        .get(
            "Observation?_tag=study-1",
            &GetOptions::default().with_page_size(50).with_elements("identifier,id"),
        )
        .await
        .unwrap();
    assert_eq!(result.entry_count(), 0);
    assert_eq!(result.total(), Some(0));
}

#[tokio::test]
async fn basic_credentials_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/metadata"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "CapabilityStatement",
            "rest": [{"resource": [{"type": "Patient"}]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let host = HostConfig::new(format!("{}/fhir", server.uri()), "basic")
        .with_setting("username", "user")
        .with_setting("password", "pass");
    let client = FhirClient::builder(host).build().await.unwrap();

    let capability = client.metadata().await.unwrap();
    assert_eq!(capability["resourceType"], "CapabilityStatement");
}

#[tokio::test]
async fn gateway_errors_are_retried_by_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient/p1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient/p1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"resourceType": "Patient", "id": "p1"})),
        )
        .mount(&server)
        .await;

    let client = FhirClient::builder(HostConfig::new(format!("{}/fhir", server.uri()), "none"))
        .transport_policy(
            fhirsync_client::RetryPolicy::server_errors()
                .with_delay(std::time::Duration::from_millis(10)),
        )
        .build()
        .await
        .unwrap();

    let response = client.get_raw("Patient/p1", &GetOptions::default()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.resource_id(), Some("p1"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
