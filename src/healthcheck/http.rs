use super::HealthChecker;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::sync::OnceLock;
use std::time::Duration;

/// Global shared HTTP client for health checks.
///
/// Individual requests apply their own timeout; the client-level timeout is
/// only a fallback.
static SHARED_HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_shared_client() -> &'static Client {
    SHARED_HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_default()
    })
}

/// HTTP GET health checker; any 2xx response passes.
pub struct HttpChecker {
    url: Url,
    client: Client,
    timeout: Duration,
}

impl HttpChecker {
    /// Checker for `http://127.0.0.1:<port><path>`.
    pub fn local(port: u16, path: &str, timeout: Duration) -> Result<Self> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self::new(&format!("http://127.0.0.1:{}{}", port, path), timeout)
    }

    /// # Errors
    ///
    /// Returns error if URL is malformed or uses unsupported scheme.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Self::validate_url(url)?;
        Ok(Self {
            url,
            client: get_shared_client().clone(),
            timeout,
        })
    }

    /// Validate that a URL is well-formed and uses HTTP/HTTPS scheme.
    fn validate_url(url: &str) -> Result<Url> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::Manifest(format!("Invalid health check URL '{}': {}", url, e)))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            scheme => Err(Error::Manifest(format!(
                "Invalid health check URL '{}': scheme must be http or https, got '{}'",
                url, scheme
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    fn name(&self) -> &'static str {
        "http"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
