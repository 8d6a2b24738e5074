// Thin JSON-over-HTTPS client shared by the provider adapters.
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::errors::{CustodyError, CustodyResult};
use crate::security::redaction::redact_body;

pub struct ProviderClient {
    base_url: String,
    http: Client,
}

impl ProviderClient {
    pub fn new(base_url: &str, timeout_seconds: u64) -> CustodyResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| CustodyError::ConfigError(format!("http client: {}", e)))?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&SecretString>,
    ) -> CustodyResult<T> {
        let req = with_bearer(self.http.get(self.url(path)), token);
        self.send(path, req).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&SecretString>,
        body: &B,
    ) -> CustodyResult<T> {
        let req = with_bearer(self.http.post(self.url(path)), token).json(body);
        self.send(path, req).await
    }

    /// POST pre-serialized octets with caller-supplied headers (signed requests
    /// must be replayed byte for byte).
    pub async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&SecretString>,
        headers: &BTreeMap<String, String>,
        octets: &str,
    ) -> CustodyResult<T> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CustodyError::ValidationError(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CustodyError::ValidationError(format!("header value: {}", e)))?;
            map.insert(name, value);
        }
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let req = with_bearer(self.http.post(self.url(path)), token)
            .headers(map)
            .body(octets.to_string());
        self.send(path, req).await
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, req: RequestBuilder) -> CustodyResult<T> {
        debug!(path, "provider request");
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.map_err(|e| {
                CustodyError::ProviderError(format!("unexpected response from {}: {}", path, e))
            });
        }

        let body = resp.text().await.unwrap_or_default();
        warn!(path, status = status.as_u16(), "provider request failed");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(CustodyError::AuthFailed(redact_body(&body)))
            }
            _ => Err(CustodyError::ProviderError(format!(
                "{} {}: {}",
                status.as_u16(),
                path,
                redact_body(&body)
            ))),
        }
    }
}

fn with_bearer(req: RequestBuilder, token: Option<&SecretString>) -> RequestBuilder {
    match token {
        Some(token) => req.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret())),
        None => req,
    }
}
