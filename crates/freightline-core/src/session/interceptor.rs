//! Pre-request and post-response hooks of the session manager.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use tracing::warn;

use crate::api::{ApiRequest, ApiResponse};

use super::AuthEndpoints;

/// What to do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Hand the response to the caller unchanged.
    Pass,
    /// 401 on a request that may be recovered by refreshing the session.
    Refresh,
}

/// Attach the access token unless the request targets an auth endpoint.
/// Without a token the request goes out unmodified.
pub(crate) fn attach_credential(
    request: ApiRequest,
    endpoints: &AuthEndpoints,
    access_token: Option<&str>,
) -> ApiRequest {
    if endpoints.is_auth_route(&request.url) {
        return request;
    }
    match access_token {
        Some(token) => with_bearer(request, token),
        None => request,
    }
}

pub(crate) fn with_bearer(mut request: ApiRequest, token: &str) -> ApiRequest {
    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        Err(_) => warn!(url = %request.url, "Access token is not a valid header value, sending without it"),
    }
    request
}

pub(crate) fn classify(
    request: &ApiRequest,
    response: &ApiResponse,
    endpoints: &AuthEndpoints,
) -> Outcome {
    if response.is_unauthorized()
        && request.refresh_on_unauthorized()
        && !endpoints.is_auth_route(&request.url)
    {
        Outcome::Refresh
    } else {
        Outcome::Pass
    }
}
