use eventrigger_k8s_util::error::{Error, Result};
use eventrigger_operator::driver::Target;
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Target posting the event to an external endpoint, best-effort.
pub struct HttpTarget {
    url: String,
    method: Method,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl HttpTarget {
    pub fn new(meta: &BTreeMap<String, String>) -> Result<Self> {
        let url = meta
            .get("url")
            .cloned()
            .ok_or_else(|| Error::MissingData("http target requires url".to_string()))?;
        let method = match meta.get("method") {
            Some(m) => Method::from_bytes(m.to_uppercase().as_bytes())
                .map_err(|_| Error::ParseError(format!("invalid http method {m}")))?,
            None => Method::POST,
        };
        let mut headers = HeaderMap::new();
        for (k, v) in meta.iter().filter_map(|(k, v)| {
            k.strip_prefix("header.").map(|name| (name, v))
        }) {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|_| Error::ParseError(format!("invalid header name {k}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|_| Error::ParseError(format!("invalid header value for {k}")))?;
            headers.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::HttpError("failed to build http client".to_string(), e))?;
        Ok(HttpTarget {
            url,
            method,
            headers,
            client,
        })
    }
}

#[async_trait]
impl Target for HttpTarget {
    async fn exec(&self, event: &Event) -> Result<()> {
        debug!(msg = "executing http target", url = %self.url);
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
}
