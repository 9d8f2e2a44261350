use super::{run_chain, ChainError, ChainSuccess, EndpointError};
use crate::config::ApiConfig;
use crate::types::CandidateEndpoint;
use anyhow::Context;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use std::io::Read;
use std::time::Duration;

const MAX_RELEASES_JSON_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
  pub url: String,
  pub accept: String,
  pub user_agent: String,
  pub timeout: Duration,
}

impl ApiRequest {
  pub fn new(url: &str, api: &ApiConfig) -> Self {
    Self {
      url: url.to_string(),
      accept: api.accept.clone(),
      user_agent: api.user_agent.clone(),
      timeout: Duration::from_secs(api.timeout_seconds),
    }
  }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

pub trait HttpClient {
  fn get(&self, request: &ApiRequest) -> Result<HttpResponse, EndpointError>;
}

pub struct ReqwestClient {
  client: Client,
}

impl ReqwestClient {
  pub fn new(api: &ApiConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(api.timeout_seconds))
      .build()
      .context("build HTTP client")?;
    Ok(Self { client })
  }
}

impl HttpClient for ReqwestClient {
  fn get(&self, request: &ApiRequest) -> Result<HttpResponse, EndpointError> {
    let response = self
      .client
      .get(&request.url)
      .header(ACCEPT, &request.accept)
      .header(USER_AGENT, &request.user_agent)
      .timeout(request.timeout)
      .send()
      .map_err(classify_reqwest_error)?;

    let status = response.status().as_u16();
    let body = read_response_with_limit(response, MAX_RELEASES_JSON_BYTES)?;
    Ok(HttpResponse { status, body })
  }
}

fn classify_reqwest_error(e: reqwest::Error) -> EndpointError {
  if e.is_timeout() {
    EndpointError::Timeout
  } else {
    EndpointError::Network(e.to_string())
  }
}

fn read_response_with_limit(response: Response, max_bytes: usize) -> Result<Vec<u8>, EndpointError> {
  let mut out = Vec::new();
  let mut limited = response.take((max_bytes.saturating_add(1)) as u64);
  limited
    .read_to_end(&mut out)
    .map_err(|e| EndpointError::Network(format!("read response body: {e}")))?;

  if out.len() > max_bytes {
    return Err(EndpointError::UnexpectedPayload(format!(
      "response exceeds max size {max_bytes} bytes"
    )));
  }
  Ok(out)
}

/// 2xx with a JSON array body, or the reason it is not.
pub fn attempt_api(
  client: &dyn HttpClient,
  candidate: &CandidateEndpoint,
  api: &ApiConfig,
) -> Result<Vec<serde_json::Value>, EndpointError> {
  let response = client.get(&ApiRequest::new(&candidate.url, api))?;
  if !(200..300).contains(&response.status) {
    return Err(EndpointError::Status(response.status));
  }

  let payload: serde_json::Value =
    serde_json::from_slice(&response.body).map_err(|e| EndpointError::Parse(e.to_string()))?;
  match payload {
    serde_json::Value::Array(items) => Ok(items),
    other => Err(EndpointError::UnexpectedPayload(format!(
      "expected a release array, got {}",
      json_kind(&other)
    ))),
  }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
  match v {
    serde_json::Value::Null => "null",
    serde_json::Value::Bool(_) => "boolean",
    serde_json::Value::Number(_) => "number",
    serde_json::Value::String(_) => "string",
    serde_json::Value::Array(_) => "array",
    serde_json::Value::Object(_) => "object",
  }
}

pub fn run_api_chain(
  client: &dyn HttpClient,
  candidates: &[CandidateEndpoint],
  api: &ApiConfig,
  execution_id: &str,
) -> Result<ChainSuccess<Vec<serde_json::Value>>, ChainError> {
  run_chain(execution_id, candidates, |candidate| attempt_api(client, candidate, api))
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::cell::RefCell;
  use std::collections::HashMap;

  /// Answers by URL; unknown URLs fail with a network error.
  #[derive(Default)]
  pub struct ScriptedClient {
    pub responses: HashMap<String, Result<HttpResponse, EndpointError>>,
    pub requests: RefCell<Vec<ApiRequest>>,
  }

  impl ScriptedClient {
    pub fn ok(mut self, url: &str, status: u16, body: &str) -> Self {
      self.responses.insert(
        url.to_string(),
        Ok(HttpResponse {
          status,
          body: body.as_bytes().to_vec(),
        }),
      );
      self
    }

    pub fn fail(mut self, url: &str, err: EndpointError) -> Self {
      self.responses.insert(url.to_string(), Err(err));
      self
    }

    pub fn requested_urls(&self) -> Vec<String> {
      self.requests.borrow().iter().map(|r| r.url.clone()).collect()
    }
  }

  impl HttpClient for ScriptedClient {
    fn get(&self, request: &ApiRequest) -> Result<HttpResponse, EndpointError> {
      self.requests.borrow_mut().push(request.clone());
      self
        .responses
        .get(&request.url)
        .cloned()
        .unwrap_or_else(|| Err(EndpointError::Network("connection refused".to_string())))
    }
  }
}
