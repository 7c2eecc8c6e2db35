#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use folio::auth::{create_jwt, Role};
use folio::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use folio::repo::inmem::InMemRepo;
use folio::routes::{self, config, AppState};
use folio::security::SecurityHeaders;
use folio::storage::FsImageStore;
use serial_test::serial;
use std::sync::Arc;

// Helper to ensure JWT secret present & unique temp dirs per test
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("FOLIO_DATA_DIR", tmp.path().to_str().unwrap());
    std::env::set_var("MEDIA_ROOT", tmp.path().join("media").to_str().unwrap());
}

fn state() -> AppState {
    AppState {
        repo: Arc::new(InMemRepo::new()),
        images: Arc::new(FsImageStore::new().unwrap()),
        // limits off so flows can hammer the API freely
        limits: RateLimiterFacade::new(InMemoryRateLimiter::new(false), RateLimitConfig::from_env()),
    }
}

fn token(username: &str) -> String {
    create_jwt(username, username, vec![Role::User]).unwrap()
}

fn admin_token() -> String {
    create_jwt("1", "admin", vec![Role::Admin]).unwrap()
}

macro_rules! build_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::from_env())
                .app_data(web::Data::new($state))
                .configure(config)
                .default_service(web::route().to(routes::not_found)),
        )
        .await
    };
}

macro_rules! create_post_as {
    ($app:expr, $username:expr, $body:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/v1/posts/new")
            .insert_header(("Authorization", format!("Bearer {}", token($username))))
            .set_json(&$body)
            .to_request();
        test::call_service($app, req).await
    }};
}

macro_rules! feed_page {
    ($app:expr, $uri:expr) => {{
        let req = test::TestRequest::get().uri($uri).to_request();
        let resp = test::call_service($app, req).await;
        assert!(resp.status().is_success(), "GET {} failed: {}", $uri, resp.status());
        let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
        v
    }};
}

#[actix_web::test]
#[serial]
async fn test_feed_pagination_clamps_and_slices() {
    setup_env();
    let app = build_app!(state());

    for i in 0..14 {
        let resp = create_post_as!(&app, "alice", serde_json::json!({"text": format!("post {i}")}));
        assert_eq!(resp.status(), 302);
        assert_eq!(resp.headers().get("location").unwrap(), "/api/v1/posts");
    }

    let first = feed_page!(&app, "/api/v1/posts");
    assert_eq!(first["items"].as_array().unwrap().len(), 10);
    assert_eq!(first["page"], 1);
    assert_eq!(first["total_pages"], 2);
    assert_eq!(first["total_items"], 14);
    assert_eq!(first["has_next"], true);
    assert_eq!(first["has_previous"], false);
    // newest first
    assert_eq!(first["items"][0]["text"], "post 13");

    let second = feed_page!(&app, "/api/v1/posts?page=2");
    assert_eq!(second["items"].as_array().unwrap().len(), 4);
    assert_eq!(second["has_next"], false);

    // out-of-range and junk page numbers degrade gracefully
    let clamped = feed_page!(&app, "/api/v1/posts?page=99");
    assert_eq!(clamped["page"], 2);
    let junk = feed_page!(&app, "/api/v1/posts?page=abc");
    assert_eq!(junk["page"], 1);
}

#[actix_web::test]
#[serial]
async fn test_group_feed_scoping_and_unknown_slug() {
    setup_env();
    let app = build_app!(state());

    for (slug, title) in [("rust", "Rust"), ("cooking", "Cooking")] {
        let req = test::TestRequest::post()
            .uri("/api/v1/groups")
            .insert_header(("Authorization", format!("Bearer {}", admin_token())))
            .set_json(&serde_json::json!({"title": title, "slug": slug, "description": "a group"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
    }

    let groups = feed_page!(&app, "/api/v1/groups");
    let rust_id = groups[0]["id"].as_i64().unwrap();

    let resp = create_post_as!(&app, "alice", serde_json::json!({"text": "in rust", "group": rust_id}));
    assert_eq!(resp.status(), 302);
    let resp = create_post_as!(&app, "alice", serde_json::json!({"text": "ungrouped"}));
    assert_eq!(resp.status(), 302);

    let rust_feed = feed_page!(&app, "/api/v1/groups/rust");
    assert_eq!(rust_feed["group"]["slug"], "rust");
    assert_eq!(rust_feed["page"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(rust_feed["page"]["items"][0]["text"], "in rust");

    // the post does not leak into the other group
    let cooking_feed = feed_page!(&app, "/api/v1/groups/cooking");
    assert_eq!(cooking_feed["page"]["items"].as_array().unwrap().len(), 0);

    let req = test::TestRequest::get().uri("/api/v1/groups/no-such-group").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn test_new_post_forces_session_author_and_gates_guests() {
    setup_env();
    let app = build_app!(state());

    // guests get bounced to login, and nothing is persisted
    let req = test::TestRequest::post()
        .uri("/api/v1/posts/new")
        .set_json(&serde_json::json!({"text": "drive-by"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.starts_with("/auth/login?next="), "unexpected location {location}");

    let feed = feed_page!(&app, "/api/v1/posts");
    assert_eq!(feed["total_items"], 0);

    // an authenticated submission lands with the session author
    let resp = create_post_as!(&app, "bob", serde_json::json!({"text": "hello"}));
    assert_eq!(resp.status(), 302);

    let feed = feed_page!(&app, "/api/v1/posts");
    assert_eq!(feed["total_items"], 1);
    assert_eq!(feed["items"][0]["author"], "bob");
}

#[actix_web::test]
#[serial]
async fn test_invalid_post_form_returns_field_errors() {
    setup_env();
    let app = build_app!(state());

    let resp = create_post_as!(&app, "bob", serde_json::json!({"text": ""}));
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(body["fields"]["text"].is_array());
    // the submitted values come back for re-rendering
    assert_eq!(body["form"]["text"], "");

    let feed = feed_page!(&app, "/api/v1/posts");
    assert_eq!(feed["total_items"], 0);
}

#[actix_web::test]
#[serial]
async fn test_new_post_form_lists_groups() {
    setup_env();
    let app = build_app!(state());

    let req = test::TestRequest::get()
        .uri("/api/v1/posts/new")
        .insert_header(("Authorization", format!("Bearer {}", token("bob"))))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["form"]["text"], "");
    assert!(body["groups"].is_array());
}

#[actix_web::test]
#[serial]
async fn test_post_detail_is_scoped_to_author() {
    setup_env();
    let app = build_app!(state());

    let resp = create_post_as!(&app, "alice", serde_json::json!({"text": "mine"}));
    assert_eq!(resp.status(), 302);
    let resp = create_post_as!(&app, "bob", serde_json::json!({"text": "his"}));
    assert_eq!(resp.status(), 302);

    let feed = feed_page!(&app, "/api/v1/posts");
    let bobs_id = feed["items"][0]["id"].as_i64().unwrap();
    assert_eq!(feed["items"][0]["author"], "bob");

    let detail = feed_page!(&app, &format!("/api/v1/users/bob/posts/{bobs_id}"));
    assert_eq!(detail["post"]["text"], "his");
    assert_eq!(detail["post_count"], 1);
    assert_eq!(detail["comments"].as_array().unwrap().len(), 0);
    assert_eq!(detail["form"]["text"], "");

    // bob's post id under alice's name is not found
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/alice/posts/{bobs_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // unknown user and unknown id are not found
    let req = test::TestRequest::get().uri("/api/v1/users/ghost/posts/1").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::get().uri("/api/v1/users/bob/posts/9999").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn test_comment_flow_redirects_and_persists() {
    setup_env();
    let app = build_app!(state());

    let resp = create_post_as!(&app, "bob", serde_json::json!({"text": "hello"}));
    assert_eq!(resp.status(), 302);
    let feed = feed_page!(&app, "/api/v1/posts");
    let post_id = feed["items"][0]["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/users/bob/posts/{post_id}/comment"))
        .insert_header(("Authorization", format!("Bearer {}", token("alice"))))
        .set_json(&serde_json::json!({"text": "nice one"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(
        resp.headers().get("location").unwrap().to_str().unwrap(),
        format!("/api/v1/users/bob/posts/{post_id}")
    );

    let detail = feed_page!(&app, &format!("/api/v1/users/bob/posts/{post_id}"));
    let comments = detail["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["author"], "alice");

    // a blank comment is rejected and not persisted
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/users/bob/posts/{post_id}/comment"))
        .insert_header(("Authorization", format!("Bearer {}", token("alice"))))
        .set_json(&serde_json::json!({"text": ""}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let detail = feed_page!(&app, &format!("/api/v1/users/bob/posts/{post_id}"));
    assert_eq!(detail["comments"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
#[serial]
async fn test_group_creation_is_admin_only() {
    setup_env();
    let app = build_app!(state());

    let body = serde_json::json!({"title": "T", "slug": "t", "description": "d"});

    let req = test::TestRequest::post()
        .uri("/api/v1/groups")
        .insert_header(("Authorization", format!("Bearer {}", token("bob"))))
        .set_json(&body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri("/api/v1/groups")
        .insert_header(("Authorization", format!("Bearer {}", admin_token())))
        .set_json(&body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    // duplicate slug conflicts
    let req = test::TestRequest::post()
        .uri("/api/v1/groups")
        .insert_header(("Authorization", format!("Bearer {}", admin_token())))
        .set_json(&body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
}

#[actix_web::test]
#[serial]
async fn test_unmatched_routes_hit_the_json_404_responder() {
    setup_env();
    let app = build_app!(state());

    let req = test::TestRequest::get().uri("/definitely/not/a/route").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["error"], "not found");
}
