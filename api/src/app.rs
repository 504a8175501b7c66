use axum::{
    body::{to_bytes, Body},
    error_handling::HandleErrorLayer,
    extract::Request,
    http::{
        header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    BoxError, Router,
};
use domain::ErrorKind;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{info_span, Level};

use crate::{
    auth_middleware::{GATEWAY_TOKEN_HEADER, TENANT_ID_HEADER, USER_ID_HEADER, USER_ROLE_HEADER},
    error::ApiError,
    routes::{admin, auth as auth_routes, dashboard, finance, health, inventory, sales},
    state::AppState,
};

/// Error bodies are small; anything larger is passed through untouched.
const ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Stamps the propagated request id into our error envelopes so every error
/// a client sees can be correlated with the logs.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let response = next.run(req).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, ERROR_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let rewritten = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|mut value| {
            let obj = value.as_object_mut()?;
            // Only our envelopes carry a machine code; anything else (e.g.
            // axum's own rejections) passes through untouched.
            if !obj.contains_key("code") {
                return None;
            }
            obj.insert("request_id".to_string(), serde_json::json!(request_id));
            serde_json::to_vec(&value).ok()
        });

    match rewritten {
        Some(new_bytes) => {
            parts.headers.remove(CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(new_bytes))
        }
        None => Response::from_parts(parts, Body::from(bytes)),
    }
}

async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::new(ErrorKind::Timeout, "request deadline exceeded").into_response()
    } else {
        tracing::error!(error = %err, "middleware failure");
        ApiError::internal().into_response()
    }
}

pub fn build_router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    let request_timeout = state.config.request_timeout;

    let cors = CorsLayer::new()
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list(vec![
            AUTHORIZATION,
            CONTENT_TYPE,
            axum::http::HeaderName::from_static(USER_ID_HEADER),
            axum::http::HeaderName::from_static(TENANT_ID_HEADER),
            axum::http::HeaderName::from_static(USER_ROLE_HEADER),
            axum::http::HeaderName::from_static(GATEWAY_TOKEN_HEADER),
        ]))
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_credentials(true);

    let request_id_header = axum::http::header::HeaderName::from_static("x-request-id");
    let request_id_for_span = request_id_header.clone();
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(move |request: &Request<_>| {
            let request_id = request
                .headers()
                .get(&request_id_for_span)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("unknown");
            info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    Router::<AppState>::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(auth_routes::router())
                .merge(admin::router())
                .merge(sales::router())
                .merge(inventory::router())
                .merge(finance::router())
                .merge(dashboard::router()),
        )
        .with_state(state)
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(trace_layer)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(tower::timeout::TimeoutLayer::new(request_timeout)),
        )
        .layer(middleware::from_fn(inject_request_id))
        .layer(SetRequestIdLayer::new(
            request_id_header,
            MakeRequestUuid::default(),
        ))
}
