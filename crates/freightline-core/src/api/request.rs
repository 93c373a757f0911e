//! Request and response descriptors passed through the session layer.
//!
//! Bodies are buffered as [`Bytes`] so a request can be replayed after a
//! token refresh without re-serializing it.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use super::ApiError;

/// An outgoing API call.
///
/// `url` is either a path relative to the transport's base URL or an
/// absolute URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    refresh_on_unauthorized: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            refresh_on_unauthorized: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize body: {}", e)))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Send this request once: a 401 response is returned to the caller
    /// instead of starting a token refresh.
    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }

    pub fn refresh_on_unauthorized(&self) -> bool {
        self.refresh_on_unauthorized
    }

    /// The bearer token currently attached to this request, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON: {}", e)))
    }

    /// Convert a non-success response into the matching [`ApiError`].
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.text()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_json_body_sets_content_type() {
        let request = ApiRequest::post("/companies")
            .json(&serde_json::json!({ "name": "Baltic Haulage" }))
            .unwrap();

        assert_eq!(request.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(
            request.body.as_deref(),
            Some(br#"{"name":"Baltic Haulage"}"#.as_slice())
        );
    }

    #[test]
    fn test_bearer_token_extraction() {
        let request = ApiRequest::get("/trips");
        assert_eq!(request.bearer_token(), None);

        let request = request.header(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(request.bearer_token(), Some("abc"));

        let request = ApiRequest::get("/trips")
            .header(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(request.bearer_token(), None);
    }

    #[test]
    fn test_without_refresh() {
        assert!(ApiRequest::get("/auth/me").refresh_on_unauthorized());
        assert!(!ApiRequest::get("/auth/me").without_refresh().refresh_on_unauthorized());
    }

    #[test]
    fn test_response_json_and_errors() {
        #[derive(Deserialize)]
        struct Invoice {
            number: String,
        }

        let ok = ApiResponse::new(StatusCode::OK, r#"{"number":"INV-7"}"#);
        let invoice: Invoice = ok.json().unwrap();
        assert_eq!(invoice.number, "INV-7");

        let not_found = ApiResponse::new(StatusCode::NOT_FOUND, "no such invoice");
        assert!(matches!(
            not_found.error_for_status(),
            Err(ApiError::NotFound(ref body)) if body == "no such invoice"
        ));

        let garbage = ApiResponse::new(StatusCode::OK, "<html>");
        assert!(matches!(
            garbage.json::<Invoice>(),
            Err(ApiError::InvalidResponse(_))
        ));
    }
}
