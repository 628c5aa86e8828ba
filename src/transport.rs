use std::time::Duration;

use crate::wire::ApiVersion;

/// Header telling the agent how many traces the payload contains.
pub(crate) const TRACE_COUNT_HEADER: &str = "X-Trace-Count";

/// Failure to deliver an encoded batch to the collector agent.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The configured agent endpoint is not a valid URL.
    #[error("invalid agent endpoint: {0}")]
    InvalidEndpoint(String),
    /// The HTTP request failed (connection, timeout, protocol).
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The agent answered with a non-success status.
    #[error("agent responded with status {0}")]
    UnexpectedStatus(u16),
}

/// Delivers encoded trace payloads to the collector.
///
/// The default implementation is [`HttpTransport`]; tests substitute
/// recording or failing transports through
/// [`TracerBuilder::with_transport`](crate::TracerBuilder::with_transport).
/// Implementations block the calling (writer) thread and must bound that
/// blocking with their own timeout.
pub trait Transport: Send + std::fmt::Debug {
    /// Sends one encoded batch containing `trace_count` traces.
    fn send(&self, payload: &[u8], trace_count: usize) -> Result<(), TransportError>;
}

/// Blocking HTTP transport posting msgpack payloads to the local agent.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: reqwest::Url,
    content_type: &'static str,
}

impl HttpTransport {
    /// Builds a transport for `endpoint` (e.g. `http://127.0.0.1:8126`),
    /// appending the ingestion path of `version`. Requests time out after
    /// `timeout`.
    pub fn new(
        endpoint: &str,
        version: ApiVersion,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), version.path())
            .parse::<reqwest::Url>()
            .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))?;
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(HttpTransport {
            client,
            url,
            content_type: version.content_type(),
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, payload: &[u8], trace_count: usize) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("content-type", self.content_type)
            .header(TRACE_COUNT_HEADER, trace_count.to_string())
            .body(payload.to_vec())
            .send()?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::UnexpectedStatus(response.status().as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gains_version_path() {
        let transport =
            HttpTransport::new("http://127.0.0.1:8126", ApiVersion::V05, Duration::from_secs(1))
                .unwrap();
        assert_eq!(transport.url.as_str(), "http://127.0.0.1:8126/v0.5/traces");

        let trailing =
            HttpTransport::new("http://127.0.0.1:8126/", ApiVersion::V03, Duration::from_secs(1))
                .unwrap();
        assert_eq!(trailing.url.as_str(), "http://127.0.0.1:8126/v0.3/traces");
    }

    #[test]
    fn bad_endpoint_is_rejected() {
        let err = HttpTransport::new("not a url", ApiVersion::V05, Duration::from_secs(1));
        assert!(matches!(err, Err(TransportError::InvalidEndpoint(_))));
    }
}
