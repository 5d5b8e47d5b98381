/// HTTP API tests
///
/// Drives the full router against the in-memory repository:
/// - Lookup by ISIN / NSE symbol / BSE code, with 204 for unknown keys
/// - Company, industry and free-text search envelopes
/// - Paginated listing
/// - Single and bulk upsert, including merge and validation errors
/// - Health report
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use security_master::app::create_app;
use security_master::config::ServerConfig;
use security_master::db::{InMemorySecurityRepository, SecurityRepository};
use security_master::external::{InMemoryObjectStore, ObjectStore};
use security_master::models::SecurityInput;
use security_master::state::AppState;

fn server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        version: "test".to_string(),
        default_page_size: 100,
        max_page_size: 1000,
    }
}

async fn seeded_repo() -> Arc<InMemorySecurityRepository> {
    let repo = Arc::new(InMemorySecurityRepository::new());
    for (isin, name, nse, bse, industry) in [
        ("INE009A01021", "Infosys Ltd.", "INFY", "500209", "IT Services"),
        ("INE467B01029", "Tata Consultancy Services Ltd.", "TCS", "532540", "IT Services"),
        ("INE002A01018", "Reliance Industries Ltd.", "RELIANCE", "500325", "Refineries"),
    ] {
        repo.upsert(SecurityInput {
            isin_code: Some(isin.into()),
            company_name: Some(name.into()),
            nse_symbol: Some(nse.into()),
            bse_scrip_code: Some(bse.into()),
            industry_group: Some(industry.into()),
            ..Default::default()
        })
        .await
        .unwrap();
    }
    repo
}

fn app_with(repo: Arc<InMemorySecurityRepository>, store: Option<Arc<dyn ObjectStore>>) -> Router {
    create_app(AppState {
        repository: repo,
        object_store: store,
        server: Arc::new(server_config()),
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post(app: Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    send(app, request).await
}

#[tokio::test]
async fn test_lookup_by_each_identifier_kind() {
    let app = app_with(seeded_repo().await, None);

    let mut ids = Vec::new();
    for key in ["INE467B01029", "tcs", "532540"] {
        let (status, body) = get(app.clone(), &format!("/security/get/{}", key)).await;
        assert_eq!(status, StatusCode::OK, "{}", key);
        assert_eq!(body["success"], json!(true));
        ids.push(body["data"]["id"].clone());
    }
    assert_eq!(ids[0], ids[1]);
    assert_eq!(ids[1], ids[2]);
}

#[tokio::test]
async fn test_unknown_identifier_is_no_content() {
    let app = app_with(seeded_repo().await, None);
    let (status, body) = get(app, "/security/get/INE000X00000").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_invalid_identifier_is_bad_request() {
    let app = app_with(seeded_repo().await, None);
    let (status, body) = get(app, "/security/get/%20--%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("invalid_input"));
}

#[tokio::test]
async fn test_company_and_industry_search() {
    let repo = seeded_repo().await;

    let (status, body) = get(app_with(repo.clone(), None), "/security/get/company/infosys").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["data"][0]["nse_symbol"], json!("INFY"));

    let (status, body) = get(app_with(repo.clone(), None), "/security/get/industry/it%20services?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = get(app_with(repo, None), "/security/get/company/nothing-like-this").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_free_text_search() {
    let app = app_with(seeded_repo().await, None);
    let (status, body) = get(app.clone(), "/security/search?q=500&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(2));

    let (status, _) = get(app.clone(), "/security/search?q=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app, "/security/search?q=ltd&limit=5000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_pagination() {
    let app = app_with(seeded_repo().await, None);
    let (status, first) = get(app.clone(), "/security/list?limit=2&offset=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["total_count"], json!(3));
    assert_eq!(first["has_more"], json!(true));

    let (_, second) = get(app.clone(), "/security/list?limit=2&offset=2").await;
    assert_eq!(second["has_more"], json!(false));
    assert_eq!(second["data"].as_array().unwrap().len(), 1);
    assert_ne!(first["data"][1]["id"], second["data"][0]["id"]);

    let (status, _) = get(app, "/security/list?offset=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_with_largest_offset_is_empty_page() {
    let app = app_with(seeded_repo().await, None);
    let (status, body) = get(app, "/security/list?limit=10&offset=9223372036854775807").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["total_count"], json!(3));
    assert_eq!(body["has_more"], json!(false));
}

#[tokio::test]
async fn test_upsert_merges_fields() {
    let repo = seeded_repo().await;
    let (status, body) = post(
        app_with(repo.clone(), None),
        "/security/upsert",
        json!({ "isin_code": "INE009A01021", "company_name": null, "beta": "0.91" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["company_name"], json!("Infosys Ltd."));
    assert_eq!(body["data"]["nse_symbol"], json!("INFY"));
    assert!(body["data"]["beta"].as_str().unwrap().starts_with("0.91"));
    assert_eq!(repo.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_upsert_rejects_missing_isin_and_conflicts() {
    let repo = seeded_repo().await;
    let (status, body) = post(app_with(repo.clone(), None), "/security/upsert", json!({ "company_name": "Nameless" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("invalid_input"));

    repo.reject_isin("INE002A01018");
    let (status, body) = post(app_with(repo, None), "/security/upsert", json!({ "isin_code": "INE002A01018" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], json!("upsert_conflict"));
}

#[tokio::test]
async fn test_bulk_upsert_envelope() {
    let repo = seeded_repo().await;
    let (status, body) = post(
        app_with(repo.clone(), None),
        "/security/bulk-upsert",
        json!({ "securities": [
            { "isin_code": "INE040A01034", "company_name": "HDFC Bank Ltd.", "nse_symbol": "HDFCBANK" },
            { "isin_code": "bogus" }
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["upserted_count"], json!(1));
    assert_eq!(body["failed_count"], json!(1));
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(repo.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_health_reports_components() {
    let store = Arc::new(InMemoryObjectStore::new());
    let app = app_with(seeded_repo().await, Some(store.clone()));
    let (status, body) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["database_status"], json!("healthy"));
    assert_eq!(body["object_store_status"], json!("healthy"));
    assert_eq!(body["version"], json!("test"));

    store.set_failing(true);
    let (_, body) = get(app, "/health").await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["object_store_status"], json!("unhealthy"));

    let (_, body) = get(app_with(seeded_repo().await, None), "/health").await;
    assert_eq!(body["object_store_status"], json!("disabled"));
}
