//! Proxy and merge handlers
//!
//! Both routers use a fallback handler so every method and path flows
//! through the same decision or merge path, exactly as the upstream
//! registry protocol expects.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, REFERER};
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::debug;

use gatekeeper_core::{ProxyEvent, Resolution};

use crate::error::ApiError;
use crate::forward::ForwardRequest;
use crate::state::AppState;

/// Clients sometimes supply a forwarded-host header of their own; passing
/// it through confuses virtual-host routing on the registry side and
/// produces spurious 404s.
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Router for routing-decision mode: every request is resolved to one
/// upstream and forwarded.
pub fn create_router(state: AppState) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

/// Router for merge mode: every request fans out to both registries.
pub fn create_merge_router(state: AppState) -> Router {
    Router::new().fallback(merge_handler).with_state(state)
}

async fn proxy_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    state.events.emit(ProxyEvent::Start {
        method: parts.method.to_string(),
        path: path.clone(),
    });

    let result = route_and_forward(&state, parts, body).await;

    // The end event fires for failed requests too, carrying the error's
    // status, so start/end pairs always balance.
    let status = match &result {
        Ok(response) => response.status(),
        Err(error) => error.status(),
    };
    state.events.emit(ProxyEvent::End {
        path,
        status: status.as_u16(),
    });

    result
}

async fn route_and_forward(
    state: &AppState,
    parts: Parts,
    body: Body,
) -> Result<Response, ApiError> {
    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let referer = parts
        .headers
        .get(REFERER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let resolution = state
        .engine
        .resolve(&parts.method, &path, referer.as_deref())
        .await?;

    let mut headers = parts.headers;
    headers.remove(X_FORWARDED_HOST);

    let forward_request = ForwardRequest {
        method: parts.method,
        path_and_query,
        headers,
        body,
    };

    match resolution {
        Resolution::Login { username } => {
            debug!("Diverting {} to the credential service", path);
            state
                .credentials
                .handle_login(&username, forward_request, &state.private_target)
                .await
                .map_err(ApiError::Forward)
        }
        Resolution::Forward(target) => {
            state.events.emit(ProxyEvent::Headers {
                path: path.clone(),
                target: target.href.clone(),
            });

            state
                .forwarder
                .forward(forward_request, &target)
                .await
                .map_err(ApiError::Forward)
        }
    }
}

async fn merge_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let (parts, _body) = request.into_parts();
    let path = parts.uri.path().to_string();

    state.events.emit(ProxyEvent::Start {
        method: parts.method.to_string(),
        path: path.clone(),
    });

    let result = merge_both(&state, parts).await;

    let status = match &result {
        Ok(response) => response.status(),
        Err(error) => error.status(),
    };
    state.events.emit(ProxyEvent::End {
        path,
        status: status.as_u16(),
    });

    result
}

async fn merge_both(state: &AppState, parts: Parts) -> Result<Response, ApiError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let public = state.engine.public_read_target();

    let mut headers = parts.headers;
    headers.remove(X_FORWARDED_HOST);

    let merged = state
        .merger
        .merge(
            &state.private_target,
            &public,
            parts.method,
            &path_and_query,
            &headers,
        )
        .await
        .map_err(ApiError::Merge)?;

    let content_type = HeaderValue::from_str(&merged.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = (merged.status, merged.body).into_response();
    response.headers_mut().insert(CONTENT_TYPE, content_type);

    Ok(response)
}
