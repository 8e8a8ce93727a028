//! Authenticated transport
//!
//! The session is established outside this crate (an institutional login done by
//! hand). What arrives here is the result of that login: cookies and headers to
//! attach to every request. [`Transport`] is the seam the fetch pool depends on, so
//! tests and embedders can substitute their own request-issuing capability.

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, FetchError, Result};

/// A request-issuing capability shared read-only by every worker
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the response body
    ///
    /// Failures must be classified: [`FetchError::Transient`] for faults worth
    /// retrying, [`FetchError::Permanent`] otherwise.
    async fn get(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;
}

/// Cookies and headers captured from an authenticated browser session
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionCredentials {
    /// Cookies as name/value pairs, sent in a single `Cookie` header
    #[serde(default)]
    pub cookies: Vec<(String, String)>,

    /// User agent of the browser that holds the session
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl SessionCredentials {
    /// Value of the `Cookie` header, None when there are no cookies
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config("headers", format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config("headers", format!("invalid value for '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        if let Some(agent) = &self.user_agent {
            let value = HeaderValue::from_str(agent)
                .map_err(|e| Error::config("user_agent", e.to_string()))?;
            headers.insert(USER_AGENT, value);
        }

        if let Some(cookie) = self.cookie_header() {
            let mut value = HeaderValue::from_str(&cookie)
                .map_err(|e| Error::config("cookies", e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        Ok(headers)
    }
}

/// reqwest-backed transport carrying the session credentials on every request
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport for the given session
    ///
    /// `timeout` bounds each request end to end.
    pub fn new(credentials: &SessionCredentials, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(credentials.header_map()?)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, status = status.as_u16(), "non-success response");
            return Err(FetchError::from_status(url, status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;
        Ok(body.to_vec())
    }
}
