//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

use crate::errors::StackError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// How the API key is attached to requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,

    /// Key sent verbatim in a named header
    Header(&'static str),
}

/// HTTP client for provider APIs
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    auth: AuthScheme,
    retry: CooldownOptions,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, StackError> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            auth: AuthScheme::Bearer,
            retry: CooldownOptions::default(),
        })
    }

    /// Attach an API key to every request
    pub fn with_api_key(mut self, api_key: Option<SecretString>, auth: AuthScheme) -> Self {
        self.api_key = api_key;
        self.auth = auth;
        self
    }

    /// Override the retry schedule for transient failures
    pub fn with_retry(mut self, retry: CooldownOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StackError> {
        let response = self.send(Method::GET, path, None::<&()>).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StackError> {
        let response = self.send(Method::POST, path, Some(body)).await?;
        Ok(response.json().await?)
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StackError> {
        let response = self.send(Method::PATCH, path, Some(body)).await?;
        Ok(response.json().await?)
    }

    /// Make a DELETE request, the response body is ignored
    pub async fn delete(&self, path: &str) -> Result<(), StackError> {
        self.send(Method::DELETE, path, None::<&()>).await?;
        Ok(())
    }

    /// Send a request, retrying transport errors and 502/503/504 answers.
    ///
    /// Non-success statuses map to `NotFound` (404), `Conflict` (409) or
    /// `ProvisioningError` (anything else).
    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, StackError> {
        let url = format!("{}{}", self.base_url, path);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            debug!("{} {}", method, url);
            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }
            request = self.authorize(request);

            let retryable = match request.send().await {
                Ok(response) if is_retryable(response.status()) => {
                    StackError::ProvisioningError(format!(
                        "{} {}: {}",
                        method,
                        url,
                        response.status()
                    ))
                }
                Ok(response) => return check_status(&method, &url, response).await,
                Err(e) if e.is_connect() || e.is_timeout() => StackError::HttpError(e),
                Err(e) => return Err(e.into()),
            };

            attempt += 1;
            if attempt >= max_attempts {
                return Err(retryable);
            }
            let delay = calc_exp_backoff(&self.retry, attempt - 1);
            warn!(
                "{} {} failed (attempt {}/{}), retrying in {:?}: {}",
                method, url, attempt, max_attempts, delay, retryable
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.api_key, self.auth) {
            (Some(key), AuthScheme::Bearer) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", key.expose_secret()),
            ),
            (Some(key), AuthScheme::Header(name)) => request.header(name, key.expose_secret()),
            (None, _) => request,
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

async fn check_status(method: &Method, url: &str, response: Response) -> Result<Response, StackError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(StackError::NotFound(format!("{} {}", method, url))),
        StatusCode::CONFLICT => Err(StackError::Conflict(body)),
        _ => {
            error!("HTTP {} {} failed: {} - {}", method, url, status, body);
            Err(StackError::ProvisioningError(format!("{}: {}", status, body)))
        }
    }
}
