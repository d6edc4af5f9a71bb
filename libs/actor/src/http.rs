use eventrigger_k8s_util::error::{Error, Result};
use eventrigger_operator::driver::Actor;
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Actor posting the event to a configured endpoint. Non-2xx responses are
/// errors; the next event retries.
pub struct HttpActor {
    url: String,
    method: Method,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl HttpActor {
    pub fn new(
        url: &str,
        method: Option<&str>,
        timeout_secs: Option<u64>,
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<Self> {
        if url.is_empty() {
            return Err(Error::MissingData("http actor url is empty".to_string()));
        }
        let method = match method {
            Some(m) => Method::from_bytes(m.to_uppercase().as_bytes())
                .map_err(|_| Error::ParseError(format!("invalid http method {m}")))?,
            None => Method::POST,
        };
        let mut header_map = HeaderMap::new();
        for (k, v) in headers.into_iter().flatten() {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|_| Error::ParseError(format!("invalid header name {k}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|_| Error::ParseError(format!("invalid header value for {k}")))?;
            header_map.insert(name, value);
        }
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::HttpError("failed to build http client".to_string(), e))?;
        Ok(HttpActor {
            url: url.to_string(),
            method,
            headers: header_map,
            client,
        })
    }
}

#[async_trait]
impl Actor for HttpActor {
    async fn exec(&self, event: &Event) -> Result<()> {
        debug!(msg = "executing http actor", url = %self.url, method = %self.method);
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .json(event)
            .send()
            .await
            .map_err(|e| Error::HttpError(format!("request to {} failed", self.url), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(self.url.clone(), status.as_u16()));
        }
        Ok(())
    }

    async fn check(&self, _idle: Duration, _last_event_at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}
