use crate::{
    api::{self, RawSpan},
    error::{Error, Result},
    logging::{self, LoggingConfig},
    normalize::normalize_trace_id,
};
use attohttpc::RequestBuilder;
use log::{error, trace, warn};
use std::time::Duration;

/// Configuration settings for the client.
#[derive(Clone, Debug)]
pub struct Config {
    /// Zipkin query host/ip, defaults to `localhost`.
    pub host: String,
    /// Zipkin query port, defaults to `9411`.
    pub port: String,
    /// Per-request timeout, defaults to 10 seconds.
    pub timeout: Duration,
    /// Optional Logging Config to also install a process logger
    pub logging_config: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: "9411".to_string(),
            timeout: Duration::from_secs(10),
            logging_config: None,
        }
    }
}

/// Search parameters for `GET /api/v2/traces`. Unset fields are left to the
/// server's defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceQuery {
    pub service_name: Option<String>,
    pub remote_service_name: Option<String>,
    pub span_name: Option<String>,
    pub annotation_query: Option<String>,
    pub min_duration: Option<i64>,
    pub max_duration: Option<i64>,
    /// Epoch milliseconds.
    pub end_ts: Option<i64>,
    /// Milliseconds.
    pub lookback: Option<i64>,
    pub limit: Option<usize>,
}

impl TraceQuery {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        let mut push = |key: &'static str, value: Option<String>| {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                params.push((key, v));
            }
        };
        push("serviceName", self.service_name.clone());
        push("remoteServiceName", self.remote_service_name.clone());
        push("spanName", self.span_name.clone());
        push("annotationQuery", self.annotation_query.clone());
        push("minDuration", self.min_duration.map(|d| d.to_string()));
        push("maxDuration", self.max_duration.map(|d| d.to_string()));
        push("endTs", self.end_ts.map(|t| t.to_string()));
        push("lookback", self.lookback.map(|l| l.to_string()));
        push("limit", self.limit.map(|l| l.to_string()));
        params
    }
}

/// Blocking client for the Zipkin query API. Fetches raw spans only; every
/// failure is returned whole, never as partial input.
#[derive(Clone, Debug)]
pub struct ZipkinClient {
    base_url: String,
    timeout: Duration,
}

impl ZipkinClient {
    pub fn new(config: Config) -> ZipkinClient {
        if let Some(lc) = config.logging_config {
            if let Err(e) = logging::init(lc) {
                warn!("Couldn't install logger, one is already set: {}", e);
            }
        }
        ZipkinClient {
            base_url: format!("http://{}:{}", config.host, config.port),
            timeout: config.timeout,
        }
    }

    pub fn trace_url(&self, trace_id: &str) -> String {
        format!("{}/api/v2/trace/{}", self.base_url, normalize_trace_id(trace_id))
    }

    pub fn traces_url(&self) -> String {
        format!("{}/api/v2/traces", self.base_url)
    }

    /// Spans of one trace.
    pub fn trace(&self, trace_id: &str) -> Result<Vec<RawSpan>> {
        let body = self.fetch(attohttpc::get(self.trace_url(trace_id)))?;
        api::decode_spans(&body)
    }

    /// Traces matching `query`, one span list per trace.
    pub fn traces(&self, query: &TraceQuery) -> Result<Vec<Vec<RawSpan>>> {
        let req = query
            .params()
            .into_iter()
            .fold(attohttpc::get(self.traces_url()), |req, (k, v)| req.param(k, v));
        let body = self.fetch(req)?;
        api::decode_traces(&body)
    }

    fn fetch(&self, req: RequestBuilder) -> Result<Vec<u8>> {
        let resp = req
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()?;
        if !resp.is_success() {
            let status = resp.status().as_u16();
            error!("error from zipkin query api: {}", status);
            return Err(Error::Status(status));
        }
        let body = resp.bytes()?;
        trace!("Received {} bytes from zipkin", body.len());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_zipkin() {
        let client = ZipkinClient::new(Config::default());
        assert_eq!(client.trace_url("ABC"), "http://localhost:9411/api/v2/trace/0000000000000abc");
        assert_eq!(client.traces_url(), "http://localhost:9411/api/v2/traces");
        assert_eq!(client.timeout, Duration::from_secs(10));
    }

    #[test]
    fn query_params_skip_unset_fields() {
        let query = TraceQuery {
            service_name: Some("frontend".into()),
            span_name: Some(String::new()),
            min_duration: Some(1_000),
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(
            query.params(),
            vec![
                ("serviceName", "frontend".to_string()),
                ("minDuration", "1000".to_string()),
                ("limit", "10".to_string()),
            ]
        );
    }

    #[test]
    fn unreachable_server_is_a_fetch_error() {
        let client = ZipkinClient::new(Config {
            host: "127.0.0.1".into(),
            port: "1".into(),
            timeout: Duration::from_millis(200),
            ..Default::default()
        });
        match client.trace("1") {
            Err(Error::Fetch(_)) => {}
            other => panic!("expected fetch error, got {:?}", other.map(|s| s.len())),
        }
    }
}
