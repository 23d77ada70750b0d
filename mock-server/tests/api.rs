use axum::http::{self, Request, StatusCode};
use axum::Router;
use base64::Engine;
use http_body_util::BodyExt;
use mock_server::{app, app_with_login, Login};
use serde_json::Value;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn form_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            http::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .body(body.to_string())
        .unwrap()
}

fn get_request(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

/// Creates a record and returns its `(id, version)`.
async fn create(app: &Router, collection: &str, body: &str) -> (String, String) {
    let resp = app
        .clone()
        .oneshot(form_request("POST", &format!("/rest/{collection}"), body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    let record = &json[format!("ns1.{}", collection.trim_end_matches('s'))][0];
    let identity = &record["ns1.resourceIdentity"];
    (
        identity["ns1.id"].as_str().unwrap().to_string(),
        identity["ns1.version"].as_str().unwrap().to_string(),
    )
}

// --- list ---

#[tokio::test]
async fn list_empty_collection() {
    let resp = app()
        .oneshot(get_request("/rest/testcases?_type=json"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let result = &json["ns1.searchResult"][0];
    assert_eq!(result["ns1.totalResults"], 0);
    assert_eq!(result["ns1.testcases"][0]["ns1.testcase"], Value::Array(vec![]));
}

#[tokio::test]
async fn list_filters_sorts_and_pages() {
    let app = app();
    for name in ["Cherry", "Apple", "Banana", "Apple"] {
        create(&app, "products", &format!("name={name}")).await;
    }

    let resp = app
        .clone()
        .oneshot(get_request("/rest/products?filter-name=Apple"))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["ns1.searchResult"][0]["ns1.totalResults"], 2);

    let resp = app
        .clone()
        .oneshot(get_request(
            "/rest/products?sortfield=name&sortdirection=desc&pagenumber=1&pagesize=2",
        ))
        .await
        .unwrap();
    let json = body_json(resp).await;
    let result = &json["ns1.searchResult"][0];
    assert_eq!(result["ns1.totalResults"], 4);
    let names: Vec<&str> = result["ns1.products"][0]["ns1.product"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["ns1.name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Cherry", "Banana"]);
}

#[tokio::test]
async fn page_far_past_the_end_is_empty() {
    let app = app();
    for name in ["Apple", "Banana"] {
        create(&app, "products", &format!("name={name}")).await;
    }

    let resp = app
        .oneshot(get_request(&format!(
            "/rest/products?pagenumber={}&pagesize=1000",
            usize::MAX
        )))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let result = &json["ns1.searchResult"][0];
    assert_eq!(result["ns1.totalResults"], 2);
    assert_eq!(result["ns1.products"][0]["ns1.product"], Value::Array(vec![]));
}

// --- create ---

#[tokio::test]
async fn create_returns_201_with_location() {
    let resp = app()
        .oneshot(form_request("POST", "/rest/users", "email=a%40b.c&firstName=Ann"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let location = resp.headers()[http::header::LOCATION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(location.starts_with("/rest/users/"));

    let json = body_json(resp).await;
    let user = &json["ns1.user"][0];
    assert_eq!(user["@xsi.type"], "ns1:user");
    assert_eq!(user["ns1.email"], "a@b.c");
    assert_eq!(user["ns1.resourceIdentity"]["ns1.version"], "0");
    assert_eq!(
        format!("/rest/{}", user["ns1.resourceIdentity"]["ns1.url"].as_str().unwrap()),
        location
    );
}

#[tokio::test]
async fn create_duplicate_email_is_conflict() {
    let app = app();
    create(&app, "users", "email=a%40b.c").await;

    let resp = app
        .oneshot(form_request("POST", "/rest/users", "email=a%40b.c"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let json = body_json(resp).await;
    assert_eq!(json["errors"][0]["error"], "email.in.use");
}

// --- get ---

#[tokio::test]
async fn get_not_found_is_plain_text() {
    let resp = app()
        .oneshot(get_request(
            "/rest/testcases/00000000-0000-0000-0000-000000000000",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "text/plain");
}

#[tokio::test]
async fn get_bad_id_is_not_found() {
    let resp = app()
        .oneshot(get_request("/rest/testcases/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- update ---

#[tokio::test]
async fn update_bumps_version() {
    let app = app();
    let (id, version) = create(&app, "testcases", "name=Old").await;

    let resp = app
        .clone()
        .oneshot(form_request(
            "PUT",
            &format!("/rest/testcases/{id}"),
            &format!("name=New&originalVersionId={version}"),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let case = &json["ns1.testcase"][0];
    assert_eq!(case["ns1.name"], "New");
    assert_eq!(case["ns1.resourceIdentity"]["ns1.version"], "1");
}

#[tokio::test]
async fn update_with_stale_version_is_conflict() {
    let app = app();
    let (id, _) = create(&app, "testcases", "name=Old").await;

    let resp = app
        .oneshot(form_request(
            "PUT",
            &format!("/rest/testcases/{id}"),
            "name=New&originalVersionId=7",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let json = body_json(resp).await;
    assert_eq!(json["errors"][0]["error"], "changed.by.another.user");
}

#[tokio::test]
async fn update_without_version_is_rejected() {
    let app = app();
    let (id, _) = create(&app, "testcases", "name=Old").await;

    let resp = app
        .oneshot(form_request("PUT", &format!("/rest/testcases/{id}"), "name=New"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- delete ---

#[tokio::test]
async fn delete_returns_204_then_404() {
    let app = app();
    let (id, version) = create(&app, "testcases", "name=Doomed").await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/rest/testcases/{id}?originalVersionId={version}&_type=json"))
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(resp).await.is_empty());

    let resp = app
        .oneshot(get_request(&format!("/rest/testcases/{id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- login ---

fn login() -> Login {
    Login {
        email: "admin@example.com".to_string(),
        password: "secret".to_string(),
        token: "abc123".to_string(),
    }
}

#[tokio::test]
async fn login_required_returns_401() {
    let resp = app_with_login(login())
        .oneshot(get_request("/rest/testcases"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(&body_bytes(resp).await[..], b"login required");
}

#[tokio::test]
async fn basic_auth_and_cookie_are_accepted() {
    let app = app_with_login(login());
    let basic = base64::engine::general_purpose::STANDARD.encode("admin@example.com:secret");

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/rest/testcases")
                .header(http::header::AUTHORIZATION, format!("Basic {basic}"))
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/rest/testcases")
                .header(http::header::COOKIE, "USERTOKEN: abc123")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
