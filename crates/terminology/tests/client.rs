use serde_json::json;
use std::time::Duration;
use terminology::{
    ConceptQuery, LookupOptions, TerminologyClient, TerminologyConfig, TerminologyError,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> TerminologyClient {
    TerminologyClient::new(TerminologyConfig::new(server.uri(), "ocl-token")).unwrap()
}

#[tokio::test]
async fn get_concept_returns_display_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/CIEL/sources/CIEL/concepts/106/"))
        .and(header("authorization", "Token ocl-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "106",
            "display_name": "Acute Coryza",
            "concept_class": "Diagnosis",
            "datatype": "N/A",
            "source": "CIEL",
            "owner": "CIEL",
            "retired": false,
            "url": "/orgs/CIEL/sources/CIEL/concepts/106/"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let concept = client(&server)
        .get_concept("CIEL", "CIEL", "106", &LookupOptions::default())
        .await
        .unwrap();

    assert_eq!(concept.display_name, "Acute Coryza");
    assert_eq!(concept.concept_class.as_deref(), Some("Diagnosis"));
}

#[tokio::test]
async fn list_concepts_filters_and_reads_pagination_headers() {
    let server = MockServer::start().await;
    let next = format!("{}/orgs/CIEL/sources/CIEL/concepts/?q=cold&page=2", server.uri());
    Mock::given(method("GET"))
        .and(path("/orgs/CIEL/sources/CIEL/concepts/"))
        .and(query_param("q", "cold"))
        .and(query_param("conceptClass", "Diagnosis"))
        .and(query_param("includeRetired", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("num_found", "2")
                .insert_header("next", next.as_str())
                .set_body_json(json!([
                    {"id": "106", "display_name": "Acute Coryza", "concept_class": "Diagnosis", "source": "CIEL"},
                    {"id": "140238", "display_name": "Common cold", "concept_class": "Diagnosis", "source": "CIEL"}
                ])),
        )
        .mount(&server)
        .await;

    let page = client(&server)
        .list_concepts(
            "CIEL",
            "CIEL",
            &ConceptQuery::search("cold").with_concept_class("Diagnosis"),
        )
        .await
        .unwrap();

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, Some(2));
    assert!(page.has_more);
    for concept in &page.items {
        assert_eq!(concept.concept_class.as_deref(), Some("Diagnosis"));
        assert_eq!(concept.source.as_deref(), Some("CIEL"));
        assert!(!concept.display_name.is_empty());
    }
}

#[tokio::test]
async fn next_concepts_follows_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/CIEL/sources/CIEL/concepts/"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "5", "display_name": "Fever", "concept_class": "Symptom", "source": "CIEL"}
        ])))
        .mount(&server)
        .await;

    let cursor = format!("{}/orgs/CIEL/sources/CIEL/concepts/?page=2", server.uri());
    let page = client(&server).next_concepts(&cursor).await.unwrap();
    assert_eq!(page.items[0].display_name, "Fever");
    assert!(!page.has_more);

    let err = client(&server)
        .next_concepts("https://elsewhere.example/orgs/CIEL")
        .await
        .unwrap_err();
    assert!(matches!(err, TerminologyError::InvalidInput(_)));
}

#[tokio::test]
async fn userinfo_cursor_never_reaches_another_host() {
    let catalog = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&elsewhere)
        .await;

    let host = elsewhere.uri().trim_start_matches("http://").to_owned();
    let cursor = format!("{}@{host}/steal", catalog.uri());
    let err = client(&catalog).next_concepts(&cursor).await.unwrap_err();
    assert!(matches!(err, TerminologyError::InvalidInput(_)));
}

#[tokio::test]
async fn unknown_concept_is_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/CIEL/sources/CIEL/concepts/999999999/"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"detail":"Not found."}"#))
        .mount(&server)
        .await;

    match client(&server)
        .get_concept("CIEL", "CIEL", "999999999", &LookupOptions::default())
        .await
        .unwrap_err()
    {
        TerminologyError::Remote { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("Not found"));
        }
        other => panic!("expected Remote, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_catalog_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = TerminologyConfig::new(server.uri(), "t").with_timeout(Duration::from_millis(200));
    let err = TerminologyClient::new(config)
        .unwrap()
        .list_concepts("CIEL", "CIEL", &ConceptQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TerminologyError::Timeout(_)), "{err:?}");
}
