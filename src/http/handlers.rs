//! v1 route handlers (spec §6). Route shapes grounded on the original
//! `server/server.go` (enqueue/dequeue/ack) plus the properties routes the
//! distillation added; axum `State`/`Path`/`Query`/`IntoResponse` idioms
//! grounded on the teacher's `server/dashboard_api.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::PluqError;
use crate::id::{decode_id, encode_id};
use crate::message::Message;
use crate::property_tree::Properties;
use crate::queue_manager::QueueManager;
use crate::storage::Delivery;

use super::multipart;

type AppState = State<Arc<QueueManager>>;

impl IntoResponse for PluqError {
    /// Spec §7 propagation policy: `Empty` (and long-poll cancellation,
    /// which the manager already folds into `Empty`) maps to 204 with no
    /// body; every other kind maps to 500 with the error's message.
    fn into_response(self) -> Response {
        match self {
            PluqError::Empty | PluqError::Canceled => StatusCode::NO_CONTENT.into_response(),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

fn parse_properties_query(params: &HashMap<String, String>) -> Result<Properties, Response> {
    let mut props = Properties::default();

    if let Some(v) = params.get("retry") {
        props.retry = Some(if v == "nolimit" {
            crate::retry::Retry::NoLimit
        } else {
            match v.parse() {
                Ok(n) => crate::retry::Retry::Limited(n),
                Err(_) => return Err(bad_request(format!("invalid retry: {v}"))),
            }
        });
    }
    if let Some(v) = params.get("timeout") {
        props.timeout = Some(humantime::parse_duration(v).map_err(|_| bad_request(format!("invalid timeout: {v}")))?);
    }
    if let Some(v) = params.get("accum_time") {
        props.accum_time =
            Some(humantime::parse_duration(v).map_err(|_| bad_request(format!("invalid accum_time: {v}")))?);
    }
    if let Some(v) = params.get("recurse") {
        props.recurse = Some(matches!(v.as_str(), "yes" | "1" | "true"));
    }

    Ok(props)
}

pub async fn enqueue_root(state: AppState, query: Query<HashMap<String, String>>, headers: HeaderMap, body: Bytes) -> Response {
    enqueue_at(state, String::new(), query, headers, body).await
}

pub async fn enqueue(
    state: AppState,
    Path(queue): Path<String>,
    query: Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    enqueue_at(state, queue, query, headers, body).await
}

async fn enqueue_at(
    State(manager): AppState,
    queue: String,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let properties = match parse_properties_query(&params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let message = Message {
        body,
        content_type,
        metadata: None,
    };

    match manager.enqueue(&queue, message, properties).await {
        Ok(metas) => Json(metas).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn dequeue_root(state: AppState, query: Query<HashMap<String, String>>) -> Response {
    dequeue_at(state, String::new(), query).await
}

pub async fn dequeue(state: AppState, Path(queue): Path<String>, query: Query<HashMap<String, String>>) -> Response {
    dequeue_at(state, queue, query).await
}

async fn dequeue_at(State(manager): AppState, queue: String, Query(params): Query<HashMap<String, String>>) -> Response {
    let wait = match params.get("wait") {
        Some(v) => match humantime::parse_duration(v) {
            Ok(d) => d,
            Err(_) => return bad_request(format!("invalid wait: {v}")),
        },
        None => Duration::ZERO,
    };

    match manager.dequeue(&queue, wait).await {
        Ok(delivery) => delivery_response(delivery),
        Err(e) => e.into_response(),
    }
}

/// Build the delivery response: a single-part body for a plain envelope, a
/// hand-rolled multipart/mixed body for a composite (accumulated) one,
/// decorated with the `X-Pluq-*` metadata headers in both cases.
fn delivery_response(delivery: Delivery) -> Response {
    let Delivery { ephemeral_id, envelope } = delivery;

    let mut headers = HeaderMap::new();
    headers.insert("x-pluq-message-id", HeaderValue::from_str(&encode_id(ephemeral_id)).unwrap());
    headers.insert("x-pluq-retry-remaining", HeaderValue::from_str(&envelope.retry.to_string()).unwrap());
    if let Ok(v) = HeaderValue::from_str(&humantime::format_duration(envelope.timeout).to_string()) {
        headers.insert("x-pluq-timeout", v);
    }

    if envelope.is_composite() {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(&multipart::content_type()).unwrap());
        (StatusCode::OK, headers, multipart::encode(&envelope.messages)).into_response()
    } else {
        let message = envelope.messages.into_iter().next().expect("non-composite envelope carries exactly one message");
        if let Ok(v) = HeaderValue::from_str(&message.content_type) {
            headers.insert(header::CONTENT_TYPE, v);
        }
        (StatusCode::OK, headers, message.body).into_response()
    }
}

pub async fn ack(State(manager): AppState, Path(id): Path<String>) -> Response {
    let ephemeral_id = match decode_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match manager.ack(ephemeral_id).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_properties_root(state: AppState, query: Query<HashMap<String, String>>) -> Response {
    get_properties_at(state, String::new(), query).await
}

pub async fn get_properties(state: AppState, Path(queue): Path<String>, query: Query<HashMap<String, String>>) -> Response {
    get_properties_at(state, queue, query).await
}

async fn get_properties_at(State(manager): AppState, queue: String, Query(params): Query<HashMap<String, String>>) -> Response {
    let inherit = params.get("inherit").map(|v| matches!(v.as_str(), "yes" | "1" | "true")).unwrap_or(false);
    match manager.get_properties(&queue, inherit) {
        Some(props) => Json(props).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn set_properties_root(state: AppState, body: Json<Properties>) -> Response {
    set_properties_at(state, String::new(), body).await
}

pub async fn set_properties(state: AppState, Path(queue): Path<String>, body: Json<Properties>) -> Response {
    set_properties_at(state, queue, body).await
}

async fn set_properties_at(State(manager): AppState, queue: String, Json(properties): Json<Properties>) -> Response {
    manager.set_properties(&queue, properties);
    StatusCode::OK.into_response()
}
