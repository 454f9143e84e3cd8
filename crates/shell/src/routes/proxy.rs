//! Fetch interception for everything that is not a shell route.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};
use url::Url;

use crate::cache::{CacheRequest, CachedResponse, FetchOutcome, same_origin};
use crate::error::AppError;
use crate::state::AppState;

/// Response header naming how a request was answered.
pub const CACHE_STATUS_HEADER: &str = "x-shell-cache";

/// Largest request body forwarded upstream.
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Route the request through the active cache generation.
#[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
pub async fn intercept(State(state): State<AppState>, request: Request) -> Response {
    let cache_request = match to_cache_request(state.config().base_url.clone(), request).await {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let outcome = state.cache().handle(cache_request).await;
    let source = outcome.source();
    debug!(source, "Request handled");

    let mut response = match outcome {
        FetchOutcome::Hit(r)
        | FetchOutcome::Network(r)
        | FetchOutcome::Offline(r)
        | FetchOutcome::Bypass(r) => into_response(r),
        FetchOutcome::Failed(_) => StatusCode::GATEWAY_TIMEOUT.into_response(),
    };
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(source));
    response
}

async fn to_cache_request(base_url: Url, request: Request) -> Result<CacheRequest, AppError> {
    let (parts, body) = request.into_parts();
    let url = request_url(&base_url, &parts.uri)?;
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {e}")))?;

    Ok(CacheRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
    })
}

/// The request's path and query on the public origin.
///
/// The authority of an absolute-form URI is client-controlled, so it is only
/// accepted when it names the public origin.
fn request_url(base_url: &Url, uri: &Uri) -> Result<Url, AppError> {
    if uri.authority().is_some() {
        let absolute = Url::parse(&uri.to_string())
            .map_err(|e| AppError::BadRequest(format!("Invalid request URI {uri}: {e}")))?;
        if !same_origin(&absolute, base_url) {
            return Err(AppError::BadRequest(format!(
                "Request for {} is not on this site",
                absolute.origin().ascii_serialization()
            )));
        }
    }
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    base_url
        .join(path)
        .map_err(|e| AppError::BadRequest(format!("Invalid request URI {uri}: {e}")))
}

fn into_response(cached: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers;
    response
}
