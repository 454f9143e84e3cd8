//! Fetch interception and generation control through the full router.

#![allow(clippy::unwrap_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use site_shell::routes::proxy::CACHE_STATUS_HEADER;
use site_shell_integration_tests::{TestContext, body_text, eventually};

#[tokio::test]
async fn test_not_ready_until_installed() {
    let ctx = TestContext::new();
    assert_eq!(ctx.get("/health").await.status(), StatusCode::OK);
    assert_eq!(
        ctx.get("/health/ready").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    let response = ctx.get("/css/app.css").await;
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "bypass");

    ctx.register().await;
    assert_eq!(ctx.get("/health/ready").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_precached_asset_served_offline() {
    let ctx = TestContext::new();
    ctx.register().await;
    ctx.network.set_offline(true);

    let response = ctx.get("/css/app.css").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "hit");
    assert_eq!(response.headers()["content-type"], "text/css");
    assert_eq!(body_text(response).await, "body{}");
}

#[tokio::test]
async fn test_offline_navigation_gets_fallback_page() {
    let ctx = TestContext::new();
    ctx.register().await;
    ctx.network.set_offline(true);

    let response = ctx.navigate("/blog/never-seen").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "offline");
    assert_eq!(body_text(response).await, "<h1>offline</h1>");
}

#[tokio::test]
async fn test_offline_asset_is_gateway_timeout() {
    let ctx = TestContext::new();
    ctx.register().await;
    ctx.network.set_offline(true);

    let response = ctx.get("/img/never-seen.png").await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn test_stale_hit_refreshed_for_next_request() {
    let ctx = TestContext::new();
    ctx.register().await;
    ctx.network.serve("/js/app.js", "text/javascript", "init(2)");

    let stale = ctx.get("/js/app.js").await;
    assert_eq!(body_text(stale).await, "init()");

    let ctx = &ctx;
    eventually(move || async move {
        let response = ctx.get("/js/app.js").await;
        body_text(response).await == "init(2)"
    })
    .await;
}

#[tokio::test]
async fn test_visited_page_available_offline() {
    let ctx = TestContext::new();
    ctx.network.serve("/about.html", "text/html", "<h1>about</h1>");
    ctx.register().await;

    let first = ctx.navigate("/about.html").await;
    assert_eq!(first.headers()[CACHE_STATUS_HEADER], "miss");

    ctx.network.set_offline(true);
    let again = ctx.navigate("/about.html").await;
    assert_eq!(again.headers()[CACHE_STATUS_HEADER], "hit");
    assert_eq!(body_text(again).await, "<h1>about</h1>");
}

#[tokio::test]
async fn test_post_and_admin_paths_bypass_cache() {
    let ctx = TestContext::new();
    ctx.network.serve("/admin/", "text/html", "admin");
    ctx.register().await;

    let response = ctx
        .send(Request::post("/contact").body(Body::from("hi")).unwrap())
        .await;
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "bypass");

    let response = ctx.get("/admin/").await;
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "bypass");

    ctx.network.set_offline(true);
    let response = ctx.navigate("/admin/").await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_new_version_replaces_old_store() {
    let ctx = TestContext::new();
    ctx.register().await;
    ctx.write_manifest("v2", &["/", "/css/app.css"]);

    let response = ctx.post_control("/_shell/install").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();

    assert_eq!(body["outcome"], "activated");
    assert_eq!(body["status"]["active"]["version"], "v2");
    assert_eq!(body["status"]["stores"], serde_json::json!(["site-cache-v2"]));
}

#[tokio::test]
async fn test_failed_install_keeps_serving_previous_version() {
    let ctx = TestContext::new();
    ctx.register().await;
    ctx.write_manifest("v2", &["/", "/removed.css"]);

    let response = ctx.post_control("/_shell/install").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let status: serde_json::Value =
        serde_json::from_str(&body_text(ctx.get("/_shell/status").await).await).unwrap();
    assert_eq!(status["active"]["version"], "v1");
    assert_eq!(status["stores"], serde_json::json!(["site-cache-v1"]));
}

#[tokio::test]
async fn test_deferred_takeover_waits_for_activate() {
    let ctx = TestContext::with_takeover(false);
    ctx.register().await;
    ctx.write_manifest("v2", &["/"]);

    let response = ctx.post_control("/_shell/install").await;
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["outcome"], "waiting");
    assert_eq!(body["status"]["active"]["version"], "v1");
    assert_eq!(body["status"]["waiting"]["state"], "installed");

    let response = ctx.post_control("/_shell/activate").await;
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["outcome"], "activated");
    assert_eq!(body["status"]["active"]["version"], "v2");
    assert!(body["status"]["waiting"].is_null());
}

#[tokio::test]
async fn test_request_id_echoed() {
    let ctx = TestContext::new();
    let response = ctx
        .send(
            Request::get("/health")
                .header("x-request-id", "trace-me")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn test_absolute_uri_for_other_host_not_fetched() {
    let ctx = TestContext::new();
    ctx.network
        .serve_url("http://169.254.169.254/latest/meta-data", "text/plain", "credentials");
    let before = ctx.network.calls();

    let response = ctx
        .send(
            Request::get("http://169.254.169.254/latest/meta-data")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!body_text(response).await.contains("credentials"));
    assert_eq!(ctx.network.calls(), before);
}

#[tokio::test]
async fn test_absolute_uri_for_public_origin_served() {
    let ctx = TestContext::new();
    ctx.register().await;

    let response = ctx
        .send(Request::get("https://site.test/css/app.css").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "hit");
    assert_eq!(body_text(response).await, "body{}");
}

#[tokio::test]
async fn test_control_endpoints_require_token() {
    let ctx = TestContext::new();
    ctx.register().await;
    ctx.write_manifest("v2", &["/"]);
    let before = ctx.network.calls();

    let response = ctx.send(Request::post("/_shell/install").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = ctx
        .send(
            Request::post("/_shell/activate")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(ctx.network.calls(), before);
    let status: serde_json::Value =
        serde_json::from_str(&body_text(ctx.get("/_shell/status").await).await).unwrap();
    assert_eq!(status["active"]["version"], "v1");
}

#[tokio::test]
async fn test_control_endpoints_disabled_without_token() {
    let ctx = TestContext::configured(|config| config.control_token = None);

    let response = ctx.post_control("/_shell/install").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
