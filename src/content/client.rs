use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use url::Url;

/// Failure of a single content request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  #[error("request timed out")]
  Timeout,
  #[error("content API responded with status {0}")]
  Status(u16),
  #[error("network error: {0}")]
  Network(String),
  #[error("invalid response body: {0}")]
  Decode(String),
}

impl FetchError {
  /// Whether the failure looks like a slow or cold backend.
  pub fn is_timeout(&self) -> bool {
    matches!(self, Self::Timeout | Self::Status(408 | 504))
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout
    } else if let Some(status) = e.status() {
      Self::Status(status.as_u16())
    } else if e.is_decode() {
      Self::Decode(e.to_string())
    } else {
      Self::Network(e.to_string())
    }
  }
}

/// Anything that can serve content payloads by endpoint name.
pub trait ContentSource: Send + Sync {
  /// GET the named endpoint and return its JSON body.
  fn fetch(&self, endpoint: &str) -> BoxFuture<'static, Result<Value, FetchError>>;
}

/// HTTP client for the content API
#[derive(Clone)]
pub struct ContentClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl ContentClient {
  pub fn new(config: &Config) -> Result<Self> {
    let mut base = Url::parse(&config.content.url)
      .map_err(|e| eyre!("Invalid content URL {}: {}", config.content.url, e))?;

    // Url::join replaces the last path segment unless the base ends with '/'
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(config.content.timeout())
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      token: Config::get_api_token(),
    })
  }

  /// Resolve an endpoint such as `home?populate=*` against `{base}/api/`.
  pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, FetchError> {
    self
      .base
      .join(&format!("api/{}", endpoint.trim_start_matches('/')))
      .map_err(|e| FetchError::Network(format!("invalid endpoint {}: {}", endpoint, e)))
  }
}

impl ContentSource for ContentClient {
  fn fetch(&self, endpoint: &str) -> BoxFuture<'static, Result<Value, FetchError>> {
    let http = self.http.clone();
    let token = self.token.clone();
    let url = self.endpoint_url(endpoint);

    async move {
      let url = url?;
      tracing::debug!(url = %url, "GET");

      let mut request = http.get(url);
      if let Some(token) = token {
        request = request.bearer_auth(token);
      }

      let response = request.send().await?;
      let status = response.status();
      if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
      }

      let body = response.bytes().await?;
      serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{CacheConfig, ContentConfig, PrefetchConfig};

  fn client_for(url: &str) -> ContentClient {
    let config = Config {
      content: ContentConfig {
        url: url.to_string(),
        timeout_secs: 5,
      },
      default_page: None,
      cache: CacheConfig::default(),
      prefetch: PrefetchConfig::default(),
    };
    ContentClient::new(&config).unwrap()
  }

  #[test]
  fn test_endpoint_url_at_root() {
    let client = client_for("https://cms.studio.example");
    assert_eq!(
      client.endpoint_url("home?populate=*").unwrap().as_str(),
      "https://cms.studio.example/api/home?populate=*"
    );
  }

  #[test]
  fn test_endpoint_url_keeps_base_path() {
    let client = client_for("https://studio.example/cms");
    assert_eq!(
      client.endpoint_url("/press-articles").unwrap().as_str(),
      "https://studio.example/cms/api/press-articles"
    );
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    let config = Config {
      content: ContentConfig {
        url: "not a url".to_string(),
        timeout_secs: 5,
      },
      default_page: None,
      cache: CacheConfig::default(),
      prefetch: PrefetchConfig::default(),
    };
    assert!(ContentClient::new(&config).is_err());
  }

  #[test]
  fn test_timeout_classification() {
    assert!(FetchError::Timeout.is_timeout());
    assert!(FetchError::Status(504).is_timeout());
    assert!(FetchError::Status(408).is_timeout());
    assert!(!FetchError::Status(500).is_timeout());
    assert!(!FetchError::Network("connection refused".into()).is_timeout());
  }
}
