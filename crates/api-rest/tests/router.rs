use api_rest::{router, AppState, API_KEY_HEADER};
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use care_core::testing::{InjectedFailure, MemoryAuditSink, MemoryStore, StaticOtp};
use care_core::{CareServices, Collaborators, NoopPublisher, PartialFailurePolicy};
use fhir::Resource;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use terminology::{TerminologyClient, TerminologyConfig};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CODE: &str = "123456";
const PATIENT_PHONE: &str = "+8801711000000";
const KEY: &str = "local-dev-key";

// Nothing listens here; only terminology routes would try to connect.
const NO_CATALOG: &str = "http://127.0.0.1:9";

struct App {
    store: Arc<MemoryStore>,
    router: Router,
}

fn app_with(catalog: &str, request_timeout: Duration, api_key: Option<&str>) -> App {
    let store = Arc::new(MemoryStore::new());
    let terminology =
        TerminologyClient::new(TerminologyConfig::new(catalog, "catalog-token")).unwrap();
    let services = CareServices::assemble(
        Collaborators {
            store: store.clone(),
            terminology: Arc::new(terminology),
            otp: Arc::new(StaticOtp::accepting(CODE)),
            audit: Arc::new(MemoryAuditSink::new()),
            events: Arc::new(NoopPublisher),
        },
        PartialFailurePolicy::FailFast,
        100,
    );
    App {
        store,
        router: router(AppState::with_limits(services, request_timeout, api_key)),
    }
}

fn app() -> App {
    app_with(NO_CATALOG, Duration::from_secs(5), None)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn start_body(otp: &str) -> Value {
    json!({
        "patient_id": "p1",
        "provider_code": "HOSP01",
        "msisdn": PATIENT_PHONE,
        "otp": otp,
    })
}

async fn started_episode(app: &App) -> String {
    let (status, body) = send(&app.router, post("/episodes/otp", start_body(CODE))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["episode"]["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn health_is_open_even_with_api_key() {
    let app = app_with(NO_CATALOG, Duration::from_secs(5), Some(KEY));
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn api_key_guards_everything_else() {
    let app = app_with(NO_CATALOG, Duration::from_secs(5), Some(KEY));

    let (status, body) = send(&app.router, get("/patients/p1/episodes")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "auth");

    let wrong = Request::get("/patients/p1/episodes")
        .header(API_KEY_HEADER, "guess")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = Request::get("/patients/p1/episodes")
        .header(API_KEY_HEADER, KEY)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, right).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["episodes"], json!([]));
}

#[tokio::test]
async fn passcode_start_and_read_back() {
    let app = app();
    let id = started_episode(&app).await;

    let (status, body) = send(&app.router, get(&format!("/episodes/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active_limited");
    assert_eq!(body["episode"]["patient"], "Patient/p1");
    assert_eq!(body["episode"]["organization"], "Organization/HOSP01");

    let (status, body) = send(&app.router, get("/patients/p1/episodes")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["episodes"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app.router, get("/organizations/HOSP01/episodes")).await;
    assert_eq!(body["episodes"][0]["episode"]["id"], id.as_str());
}

#[tokio::test]
async fn rejected_passcode_is_unauthorized_and_writes_nothing() {
    let app = app();
    let (status, body) = send(&app.router, post("/episodes/otp", start_body("000000"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "auth");
    assert!(app.store.all("EpisodeOfCare").is_empty());
}

#[tokio::test]
async fn malformed_phone_is_bad_request() {
    let app = app();
    let mut body = start_body(CODE);
    body["msisdn"] = json!("call me");
    let (status, body) = send(&app.router, post("/episodes/otp", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn break_glass_opens_emergency_episode() {
    let app = app();
    let request = json!({
        "practitioner_uid": "DR-0042",
        "patient_id": "p1",
        "provider_code": "HOSP01",
        "otp": CODE,
        "provider_phone": "+8801811000000",
        "patient_phone": PATIENT_PHONE,
        "reason": "unconscious on arrival",
    });
    let (status, body) = send(&app.router, post("/episodes/break-glass", request)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["state"], "active_emergency");
    assert_eq!(body["episode"]["emergency"]["practitioner_uid"], "DR-0042");
}

#[tokio::test]
async fn upgrade_then_lifecycle_through_encounters() {
    let app = app();
    let id = started_episode(&app).await;

    let (status, body) = send(
        &app.router,
        post(&format!("/episodes/{id}/encounters"), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let encounter_id = body["encounter"]["id"].as_str().unwrap().to_owned();
    assert_eq!(body["encounter"]["status"], "in-progress");

    let (status, body) = send(
        &app.router,
        post(
            &format!("/episodes/{id}/upgrade"),
            json!({"otp": CODE, "msisdn": PATIENT_PHONE}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "active_full");
    assert_eq!(body["encounter_count"], 1);

    let (status, body) = send(&app.router, post(&format!("/episodes/{id}/end"), Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ended"], true);

    let (status, body) = send(
        &app.router,
        post(&format!("/encounters/{encounter_id}/end"), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["encounter"]["status"], "finished");

    let (status, body) = send(
        &app.router,
        post(&format!("/episodes/{id}/encounters"), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "state");
}

#[tokio::test]
async fn upgrade_with_another_phone_is_unauthorized() {
    let app = app();
    let id = started_episode(&app).await;
    let (status, _) = send(
        &app.router,
        post(
            &format!("/episodes/{id}/upgrade"),
            json!({"otp": CODE, "msisdn": "+8801999999999"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_episode_is_not_found_and_outage_is_bad_gateway() {
    let app = app();
    let (status, body) = send(&app.router, get("/episodes/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "remote");

    app.store
        .fail("EpisodeOfCare", InjectedFailure::Remote(503));
    let (status, _) = send(&app.router, get("/episodes/nope")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    app.store.fail("Encounter", InjectedFailure::Timeout);
    let (status, _) = send(&app.router, get("/episodes/ep1/timeline")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn visit_summary_and_page_size_validation() {
    let app = app();
    app.store.seed(
        Resource::new("Condition")
            .with_field("encounter", json!({"reference": "Encounter/e1"}))
            .with_field("subject", json!({"reference": "Patient/p1"}))
            .with_field("code", json!({"text": "Pulmonary Tuberculosis"})),
    );

    let (status, body) = send(&app.router, get("/encounters/e1/summary")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["complete"], true);
    assert_eq!(body["view"]["resources"].as_object().unwrap().len(), 6);
    assert_eq!(body["view"]["resources"]["Condition"][0]["code"]["text"], "Pulmonary Tuberculosis");

    let (status, body) = send(&app.router, get("/encounters/e1/summary?max_page_size=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, body) = send(&app.router, get("/patients/p1/problems")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], json!(["Pulmonary Tuberculosis"]));

    let (_, body) = send(&app.router, get("/patients/p1/allergies")).await;
    assert_eq!(body["items"], json!([]));
}

#[tokio::test]
async fn search_passes_string_filters_and_rejects_others() {
    let app = app();
    app.store.seed(
        Resource::new("Observation")
            .with_field("status", "final")
            .with_field("subject", json!({"reference": "Patient/p1"})),
    );
    app.store.seed(
        Resource::new("Observation")
            .with_field("status", "preliminary")
            .with_field("subject", json!({"reference": "Patient/p1"})),
    );

    let (status, body) = send(
        &app.router,
        post("/fhir/Observation/_search", json!({"subject": "Patient/p1", "status": "final"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app.router,
        post("/fhir/Observation/_search", json!({"_count": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn everything_returns_store_bundle_unmodified() {
    let app = app();
    app.store.seed(Resource::new("Patient").with_id("p1"));

    let response = app
        .router
        .clone()
        .oneshot(get("/patients/p1/everything"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("application/fhir+json"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let bundle: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["total"], 1);
}

#[tokio::test]
async fn concept_lookup_goes_to_catalog() {
    let catalog = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/CIEL/sources/CIEL/concepts/106/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "106",
            "display_name": "Acute Coryza",
            "concept_class": "Diagnosis",
            "datatype": "N/A",
        })))
        .mount(&catalog)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/CIEL/sources/CIEL/concepts/999999/"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&catalog)
        .await;

    let app = app_with(&catalog.uri(), Duration::from_secs(5), None);

    let (status, body) = send(&app.router, get("/concepts/CIEL/CIEL/106")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["concept"]["display_name"], "Acute Coryza");

    let (status, body) = send(&app.router, get("/concepts/CIEL/CIEL/999999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "terminology");
}

#[tokio::test]
async fn concept_listing_reports_pagination() {
    let catalog = MockServer::start().await;
    let next = format!("{}/orgs/CIEL/sources/CIEL/concepts/?q=cold&page=2", catalog.uri());
    Mock::given(method("GET"))
        .and(path("/orgs/CIEL/sources/CIEL/concepts/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("next", next.as_str())
                .insert_header("num_found", "3")
                .set_body_json(json!([
                    {"id": "106", "display_name": "Acute Coryza"},
                    {"id": "140238", "display_name": "Common Cold"},
                ])),
        )
        .mount(&catalog)
        .await;

    let app = app_with(&catalog.uri(), Duration::from_secs(5), None);
    let (status, body) = send(
        &app.router,
        get("/concepts/CIEL/CIEL?q=cold&concept_class=Diagnosis&limit=2"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["concepts"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], true);
    assert_eq!(body["total"], 3);
    assert_eq!(body["next_cursor"], next.as_str());
}

#[tokio::test]
async fn request_deadline_is_gateway_timeout() {
    let catalog = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "106", "display_name": "Acute Coryza"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&catalog)
        .await;

    let app = app_with(&catalog.uri(), Duration::from_millis(100), None);
    let (status, body) = send(&app.router, get("/concepts/CIEL/CIEL/106")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "timeout");
}
