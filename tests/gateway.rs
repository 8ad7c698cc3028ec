#![cfg(feature = "server")]

use actix_web::http::header::{self, ContentType};
use actix_web::{App, test, web};
use querygate::backend::mock::{LeaseEvent, LeaseLog, Script, ScriptedPool};
use querygate::backend::{BackendFailure, RawColumn, RawResultSet};
use querygate::config::ServerConfig;
use querygate::executor::Executor;
use querygate::server::{AppState, configure_routes, cors, json_config};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn column(name: &str, oid: u32, type_name: &str) -> RawColumn {
    RawColumn {
        name: name.to_string(),
        type_oid: oid,
        type_name: type_name.to_string(),
    }
}

fn engineering() -> RawResultSet {
    RawResultSet {
        columns: vec![
            column("id", 23, "INT4"),
            column("name", 1043, "VARCHAR"),
            column("department", 1043, "VARCHAR"),
        ],
        rows: vec![
            vec![json!(1), json!("John Doe"), json!("Engineering")],
            vec![json!(3), json!("Bob Johnson"), json!("Engineering")],
            vec![json!(5), json!("Charlie Brown"), json!("Engineering")],
        ],
    }
}

async fn setup_test_app(
    script: Script,
    deadline: Duration,
) -> (
    impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse<actix_web::body::EitherBody<actix_web::body::BoxBody>>,
        Error = actix_web::Error,
    >,
    Arc<LeaseLog>,
) {
    let pool = Arc::new(ScriptedPool::new(script));
    let log = pool.log();

    let executor = Executor::new(pool, deadline);
    let state = web::Data::new(AppState::new(executor));

    let app = test::init_service(
        App::new()
            .wrap(cors(&ServerConfig::default()))
            .app_data(state)
            .app_data(json_config(ServerConfig::default().max_body_bytes()))
            .configure(configure_routes),
    )
    .await;

    (app, log)
}

async fn default_app() -> (
    impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse<actix_web::body::EitherBody<actix_web::body::BoxBody>>,
        Error = actix_web::Error,
    >,
    Arc<LeaseLog>,
) {
    setup_test_app(Script::Rows(engineering()), Duration::from_secs(5)).await
}

fn execute(body: serde_json::Value) -> actix_http::Request {
    test::TestRequest::post()
        .uri("/api/query/execute")
        .set_json(body)
        .to_request()
}

#[actix_web::test]
async fn test_health_endpoint() {
    let (app, _log) = default_app().await;

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn test_select_success_shape() {
    let (app, log) = default_app().await;

    let resp = test::call_service(
        &app,
        execute(json!({
            "query": "SELECT * FROM employees WHERE department = 'Engineering'",
            "assignmentId": "assignment-1"
        })),
    )
    .await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["rowCount"], 3);
    assert_eq!(body["data"]["columns"][0], json!({"name": "id", "dataType": 23, "typeName": "INT4"}));
    assert_eq!(body["data"]["rows"][1]["name"], "Bob Johnson");
    assert_eq!(body["data"]["rows"][2]["id"], 5);

    assert_eq!(log.count(LeaseEvent::Acquired), 1);
    assert_eq!(log.count(LeaseEvent::Released), 1);
}

#[actix_web::test]
async fn test_missing_query_field() {
    let (app, log) = default_app().await;

    let resp = test::call_service(&app, execute(json!({"assignmentId": "a"}))).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(body["errors"][0]["field"], "query");
    assert_eq!(body["errors"][0]["message"], "Query is required");
    assert_eq!(log.count(LeaseEvent::Acquired), 0);
}

#[actix_web::test]
async fn test_non_string_query_rejected_before_acquire() {
    let (app, log) = default_app().await;

    let resp = test::call_service(&app, execute(json!({"query": 42}))).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(body["error"], "Invalid query");
    assert_eq!(log.count(LeaseEvent::Acquired), 0);
}

#[actix_web::test]
async fn test_whitespace_query_rejected_before_acquire() {
    let (app, log) = default_app().await;

    let resp = test::call_service(&app, execute(json!({"query": "   \n\t"}))).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(log.count(LeaseEvent::Acquired), 0);
}

#[actix_web::test]
async fn test_smuggled_drop_never_executes() {
    let (app, log) = default_app().await;

    let resp = test::call_service(
        &app,
        execute(json!({"query": "SELECT 1; DROP TABLE employees"})),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "PROHIBITED_OPERATION");
    assert_eq!(body["error"], "Query contains prohibited operations");
    assert_eq!(log.count(LeaseEvent::Acquired), 0);
}

#[actix_web::test]
async fn test_update_is_prohibited_not_not_select() {
    let (app, _log) = default_app().await;

    let resp = test::call_service(
        &app,
        execute(json!({"query": "UPDATE employees SET salary = 0"})),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "PROHIBITED_OPERATION");
}

#[actix_web::test]
async fn test_not_select() {
    let (app, log) = default_app().await;

    let resp = test::call_service(&app, execute(json!({"query": "SHOW server_version"}))).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "NOT_SELECT");
    assert_eq!(body["error"], "Only SELECT queries are allowed");
    assert_eq!(log.count(LeaseEvent::Acquired), 0);
}

#[actix_web::test]
async fn test_backend_error_message_passed_through() {
    let (app, log) = setup_test_app(
        Script::Fail(BackendFailure::Statement {
            message: "relation \"employes\" does not exist".to_string(),
            sqlstate: Some("42P01".to_string()),
        }),
        Duration::from_secs(5),
    )
    .await;

    let resp = test::call_service(&app, execute(json!({"query": "SELECT * FROM employes"}))).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "BACKEND_ERROR");
    assert_eq!(body["error"], "relation \"employes\" does not exist");
    assert_eq!(log.count(LeaseEvent::Released), 1);
}

#[actix_web::test]
async fn test_timeout() {
    let (app, log) = setup_test_app(
        Script::Delayed(Duration::from_millis(300), Box::new(Script::Rows(engineering()))),
        Duration::from_millis(30),
    )
    .await;

    let resp = test::call_service(&app, execute(json!({"query": "SELECT pg_sleep(60)"}))).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "TIMEOUT");
    assert_eq!(body["error"], "Query timeout");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(log.count(LeaseEvent::Released), 1);
}

#[actix_web::test]
async fn test_internal_fault_hides_detail() {
    let (app, _log) = setup_test_app(
        Script::Fail(BackendFailure::Connection(
            "connection to 10.0.0.5:5432 refused".to_string(),
        )),
        Duration::from_secs(5),
    )
    .await;

    let resp = test::call_service(&app, execute(json!({"query": "SELECT 1"}))).await;
    assert_eq!(resp.status(), 500);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "INTERNAL_ERROR");
    assert_eq!(body["error"], "Failed to execute query");
    assert!(!body.to_string().contains("10.0.0.5"));
}

#[actix_web::test]
async fn test_malformed_json_body() {
    let (app, log) = default_app().await;

    let req = test::TestRequest::post()
        .uri("/api/query/execute")
        .insert_header(ContentType::json())
        .set_payload("{\"query\": ")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(log.count(LeaseEvent::Acquired), 0);
}

#[actix_web::test]
async fn test_cors_preflight() {
    let (app, log) = default_app().await;

    let req = test::TestRequest::default()
        .method(actix_web::http::Method::OPTIONS)
        .uri("/api/query/execute")
        .insert_header((header::ORIGIN, "http://localhost:3000"))
        .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "POST"))
        .insert_header((header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    assert_eq!(log.count(LeaseEvent::Acquired), 0);
}

#[actix_web::test]
async fn test_cross_origin_post_carries_allow_origin() {
    let (app, _log) = default_app().await;

    let req = test::TestRequest::post()
        .uri("/api/query/execute")
        .insert_header((header::ORIGIN, "http://localhost:3000"))
        .set_json(json!({"query": "SELECT 1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
