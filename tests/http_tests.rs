mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use helpers::setup_manager;

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

/// S1 end to end over the real HTTP router: push, pop (reading the
/// `X-Pluq-Message-Id` header back), ack, then empty.
#[tokio::test]
async fn push_pop_ack_over_http() {
    let (manager, _clock, _events) = setup_manager();
    let router = pluq::http::router(manager);

    let push = router
        .clone()
        .oneshot(Request::post("/v1/queues/a").body(Body::from("hi")).unwrap())
        .await
        .unwrap();
    assert_eq!(push.status(), StatusCode::OK);

    let pop = router
        .clone()
        .oneshot(Request::get("/v1/queues/a").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(pop.status(), StatusCode::OK);
    let message_id = pop.headers().get("x-pluq-message-id").unwrap().to_str().unwrap().to_string();
    assert_eq!(body_bytes(pop).await, b"hi".to_vec());

    let ack = router
        .clone()
        .oneshot(Request::delete(format!("/v1/messages/{message_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ack.status(), StatusCode::OK);

    let empty = router
        .clone()
        .oneshot(Request::get("/v1/queues/a").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::NO_CONTENT);
}

/// S3 over HTTP: PUT properties on an ancestor and a descendant, read the
/// merged view back with `inherit=1`.
#[tokio::test]
async fn property_inheritance_over_http() {
    let (manager, _clock, _events) = setup_manager();
    let router = pluq::http::router(manager);

    router
        .clone()
        .oneshot(
            Request::put("/v1/properties/a")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"timeout":"1s"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    router
        .clone()
        .oneshot(
            Request::put("/v1/properties/a/b")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"retry":3}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(Request::get("/v1/properties/a/b?inherit=1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["timeout"].as_str().unwrap(), "1s");
    assert_eq!(json["retry"].as_i64().unwrap(), 3);
}

/// An empty-queue dequeue with no wait reports 204 immediately.
#[tokio::test]
async fn dequeue_on_empty_queue_is_204() {
    let (manager, _clock, _events) = setup_manager();
    let router = pluq::http::router(manager);

    let response = router.oneshot(Request::get("/v1/queues/nothing-here").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
