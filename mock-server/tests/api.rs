use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, ApiClient, Sandbox};
use serde_json::Value;
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn signed(method: &str, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Ops-Userid", "admin")
        .header("X-Ops-Sign", "version=1.0")
}

fn signed_json(method: &str, uri: &str, body: &str) -> Request<String> {
    signed(method, uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

fn signed_empty(method: &str, uri: &str) -> Request<String> {
    signed(method, uri).body(String::new()).unwrap()
}

// --- signature gate ---

#[tokio::test]
async fn unsigned_request_is_rejected() {
    let resp = app()
        .oneshot(Request::builder().uri("/cookbooks").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"][0], "missing request signature");
}

// --- sandboxes ---

#[tokio::test]
async fn sandbox_create_then_commit() {
    let app = app();
    let resp = app.clone().oneshot(signed_empty("POST", "/sandboxes")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = body_json(resp).await;
    let id = created["sandbox_id"].as_str().unwrap().to_string();

    let resp = app
        .oneshot(signed_json("PUT", &format!("/sandboxes/{id}"), r#"{"is_completed":"true"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let sandbox: Sandbox = body_json(resp).await;
    assert_eq!(sandbox, Sandbox { guid: id, is_completed: true });
}

#[tokio::test]
async fn commit_unknown_sandbox_returns_404() {
    let resp = app()
        .oneshot(signed_json("PUT", "/sandboxes/nope", r#"{"is_completed":"true"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- cookbooks ---

#[tokio::test]
async fn list_cookbooks_maps_names_to_urls() {
    let resp = app()
        .oneshot(signed("GET", "/cookbooks").header("host", "chef:4000").body(String::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert_eq!(body["apache2"], "http://chef:4000/cookbooks/apache2");
}

#[tokio::test]
async fn cookbook_put_get_delete() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(signed_json("PUT", "/cookbooks/mysql/1.0.0", r#"{"cookbook_name":"mysql"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.clone().oneshot(signed_empty("GET", "/cookbooks/mysql/1.0.0")).await.unwrap();
    let body: Value = body_json(resp).await;
    assert_eq!(body["cookbook_name"], "mysql");

    let resp = app.clone().oneshot(signed_empty("DELETE", "/cookbooks/mysql/1.0.0")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(signed_empty("GET", "/cookbooks/mysql/1.0.0")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- clients ---

#[tokio::test]
async fn head_client_has_status_but_no_body() {
    let app = app();
    let resp = app.clone().oneshot(signed_empty("HEAD", "/clients/admin")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_bytes(resp).await.is_empty());

    let resp = app.oneshot(signed_empty("HEAD", "/clients/ghost")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_client_conflicts() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(signed_json("POST", "/clients", r#"{"name":"web"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let client: ApiClient = body_json(resp).await;
    assert_eq!(client.name, "web");

    let resp = app.oneshot(signed_json("POST", "/clients", r#"{"name":"admin"}"#)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn delete_client_twice() {
    let app = app();
    let resp = app.clone().oneshot(signed_empty("DELETE", "/clients/admin")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = app.oneshot(signed_empty("DELETE", "/clients/admin")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- misc ---

#[tokio::test]
async fn search_echoes_raw_query() {
    let resp = app()
        .oneshot(signed_empty("GET", "/search/node?q=name%3Aweb&rows"))
        .await
        .unwrap();
    let body: Value = body_json(resp).await;
    assert_eq!(body["index"], "node");
    assert_eq!(body["query"], "q=name%3Aweb&rows");
}

#[tokio::test]
async fn metric_is_xml() {
    let resp = app().oneshot(signed_empty("GET", "/metrics/CPUUtilization")).await.unwrap();
    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "application/xml");
    let body = body_bytes(resp).await;
    assert!(std::str::from_utf8(&body).unwrap().contains("<MetricName>CPUUtilization</MetricName>"));
}

#[tokio::test]
async fn echo_reports_content_type_and_body() {
    let req = signed("POST", "/echo")
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body("a=1&b=2".to_string())
        .unwrap();
    let body: Value = body_json(app().oneshot(req).await.unwrap()).await;
    assert_eq!(body["content_type"], "application/x-www-form-urlencoded");
    assert_eq!(body["body"], "a=1&b=2");
}
