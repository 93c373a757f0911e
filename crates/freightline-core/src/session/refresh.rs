//! Exchange a refresh token for a new access token.
//!
//! Tries each configured refresh path in order, moving to the next spelling
//! only when the current one answers 404. A 2xx answer without an access
//! token is retried once on the same path with the camelCase body key that
//! older backends expect. Everything else is a hard failure: retries are the
//! coordinator's business, not this adapter's.

use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::debug;

use crate::api::{ApiRequest, ApiResponse};
use crate::models::TokenResponse;
use crate::transport::Transport;

use super::AuthEndpoints;

/// Why the session could not be renewed. Cloned to every waiting request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh token rejected with status {status}")]
    Rejected { status: u16 },

    #[error("no refresh endpoint found (tried {tried})")]
    EndpointNotFound { tried: String },

    #[error("refresh response did not include an access token")]
    MissingAccessToken,

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("refresh did not complete: {0}")]
    Interrupted(String),
}

impl From<JoinError> for RefreshError {
    fn from(e: JoinError) -> Self {
        RefreshError::Interrupted(e.to_string())
    }
}

pub(crate) async fn request_new_tokens(
    transport: &dyn Transport,
    endpoints: &AuthEndpoints,
    refresh_token: &str,
) -> Result<TokenResponse, RefreshError> {
    for path in &endpoints.refresh {
        let response = post(transport, path, json!({ "refresh_token": refresh_token })).await?;
        if response.status == StatusCode::NOT_FOUND {
            debug!(path = %path, "Refresh path not found, trying next spelling");
            continue;
        }

        let tokens = parse(response)?;
        if tokens.access_token().is_some() {
            return Ok(tokens);
        }

        debug!(path = %path, "No access token in refresh response, retrying with legacy body");
        let response = post(transport, path, json!({ "refreshToken": refresh_token })).await?;
        let tokens = parse(response)?;
        return if tokens.access_token().is_some() {
            Ok(tokens)
        } else {
            Err(RefreshError::MissingAccessToken)
        };
    }

    Err(RefreshError::EndpointNotFound {
        tried: endpoints.refresh.join(", "),
    })
}

async fn post(
    transport: &dyn Transport,
    path: &str,
    body: serde_json::Value,
) -> Result<ApiResponse, RefreshError> {
    let request = ApiRequest::post(path)
        .json(&body)
        .map_err(|e| RefreshError::Transport(e.to_string()))?
        .without_refresh();
    transport
        .send(request)
        .await
        .map_err(|e| RefreshError::Transport(e.to_string()))
}

fn parse(response: ApiResponse) -> Result<TokenResponse, RefreshError> {
    if !response.is_success() {
        return Err(RefreshError::Rejected {
            status: response.status.as_u16(),
        });
    }
    // An unparseable body is handled like one without a token
    Ok(response.json().unwrap_or_default())
}
