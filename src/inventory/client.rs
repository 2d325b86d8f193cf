use color_eyre::{eyre::eyre, Result};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::{CacheKey, FetchResult, Method, MutationRequest, Transport};
use crate::config::ServerConfig;
use crate::error::QueryError;

/// HTTP binding of the inventory service API
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
}

impl HttpTransport {
  pub fn new(server: &ServerConfig) -> Result<Self> {
    // join() drops the last segment unless the base ends in '/'
    let base = format!("{}/", server.url.trim_end_matches('/'));
    let base = Url::parse(&base).map_err(|e| eyre!("Invalid server URL {}: {}", server.url, e))?;

    let client = reqwest::Client::builder()
      .user_agent(concat!("craftq/", env!("CARGO_PKG_VERSION")))
      .timeout(server.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn endpoint(&self, path: &str) -> Result<Url, QueryError> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| QueryError::invalid_params(path, format!("cannot build request URL: {}", e)))
  }
}

impl Transport for HttpTransport {
  fn query(&self, key: &CacheKey, credential: Option<&str>) -> BoxFuture<'static, FetchResult> {
    let mut url = match self.endpoint(key.name()) {
      Ok(url) => url,
      Err(e) => return future::ready(Err(e)).boxed(),
    };
    let pairs = query_pairs(key.params());
    if !pairs.is_empty() {
      url.query_pairs_mut().extend_pairs(pairs);
    }

    debug!(%url, "GET");
    send(with_credential(self.client.get(url), credential)).boxed()
  }

  fn mutate(
    &self,
    request: &MutationRequest,
    credential: Option<&str>,
  ) -> BoxFuture<'static, FetchResult> {
    let url = match self.endpoint(&request.path) {
      Ok(url) => url,
      Err(e) => return future::ready(Err(e)).boxed(),
    };

    debug!(method = %request.method, %url, "mutation request");
    let mut builder = self.client.request(http_method(request.method), url);
    if request.method != Method::Delete {
      builder = builder.json(&request.body);
    }
    send(with_credential(builder, credential)).boxed()
  }
}

fn http_method(method: Method) -> reqwest::Method {
  match method {
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

fn with_credential(builder: RequestBuilder, credential: Option<&str>) -> RequestBuilder {
  match credential {
    Some(token) => builder.bearer_auth(token),
    None => builder,
  }
}

async fn send(builder: RequestBuilder) -> FetchResult {
  let response = builder.send().await.map_err(network_failure)?;
  let status = response.status();
  let body = response.bytes().await.map_err(network_failure)?;
  decode(status, &body)
}

fn network_failure(error: reqwest::Error) -> QueryError {
  if error.is_timeout() {
    QueryError::NetworkFailure(format!("request timed out: {}", error))
  } else {
    QueryError::NetworkFailure(error.to_string())
  }
}

/// Map a response onto the error taxonomy.
fn decode(status: StatusCode, body: &[u8]) -> FetchResult {
  if status == StatusCode::UNAUTHORIZED {
    return Err(QueryError::Unauthorized(
      error_message(body).unwrap_or_else(|| "credential rejected".to_string()),
    ));
  }

  if !status.is_success() {
    let message = error_message(body)
      .or_else(|| status.canonical_reason().map(String::from))
      .unwrap_or_else(|| "request failed".to_string());
    return Err(QueryError::RemoteError {
      status: status.as_u16(),
      message,
    });
  }

  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }
  serde_json::from_slice(body)
    .map_err(|e| QueryError::NetworkFailure(format!("invalid response body: {}", e)))
}

/// `detail` or `message` from a JSON error body, else the body text.
fn error_message(body: &[u8]) -> Option<String> {
  if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
    for field in ["detail", "message"] {
      match map.get(field) {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(Value::Null) | None => {}
        Some(other) => return Some(other.to_string()),
      }
    }
  }

  let text = String::from_utf8_lossy(body).trim().to_string();
  if text.is_empty() {
    None
  } else {
    Some(text.chars().take(200).collect())
  }
}

/// Query string for a key's params: scalars as text, arrays as repeated
/// pairs, nested objects as compact JSON.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
  let Value::Object(map) = params else {
    return Vec::new();
  };

  let mut pairs = Vec::new();
  for (name, value) in map {
    match value {
      Value::Null => {}
      Value::Array(values) => {
        for v in values {
          if let Some(text) = scalar_text(v) {
            pairs.push((name.clone(), text));
          }
        }
      }
      other => {
        if let Some(text) = scalar_text(other) {
          pairs.push((name.clone(), text));
        }
      }
    }
  }
  pairs
}

fn scalar_text(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    Value::Bool(b) => Some(b.to_string()),
    Value::Number(n) => Some(n.to_string()),
    other => Some(other.to_string()),
  }
}
