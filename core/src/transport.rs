//! Default transport on top of `ureq`.

use std::time::Duration;

use http::header::CONTENT_LENGTH;
use http::{HeaderValue, Uri};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ureq::{Agent, SendBody};

use crate::error::{Error, Result};
use crate::http::{Transport, TransportRequest, TransportResponse};

/// Connection and timeout parameters passed through to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound for one attempt, from connect to end of body.
    #[serde(with = "opt_secs")]
    pub timeout: Option<Duration>,
    #[serde(with = "opt_secs")]
    pub connect_timeout: Option<Duration>,
    pub max_idle_connections: usize,
    pub max_idle_connections_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            connect_timeout: None,
            max_idle_connections: 10,
            max_idle_connections_per_host: 3,
        }
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        Ok(secs.filter(|s| *s > 0.0).map(Duration::from_secs_f64))
    }
}

/// [`Transport`] backed by a pooled `ureq` agent.
///
/// Status codes are returned as data, redirects are handed back to the
/// caller, and bodies are passed through without decoding.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .timeout_global(config.timeout)
            .timeout_connect(config.connect_timeout)
            .max_idle_connections(config.max_idle_connections)
            .max_idle_connections_per_host(config.max_idle_connections_per_host)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: TransportRequest<'_>) -> Result<TransportResponse> {
        let TransportRequest {
            method,
            url,
            headers,
            body,
        } = request;
        let uri: Uri = url.as_str().parse().map_err(Error::transport)?;

        let mut builder = http::Request::builder().method(method.clone()).uri(uri);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }

        let result = match body {
            Some(mut body) => {
                if let (Some(length), Some(map)) = (body.length, builder.headers_mut()) {
                    map.insert(CONTENT_LENGTH, HeaderValue::from(length));
                }
                let request = builder
                    .body(SendBody::from_reader(&mut body.reader))
                    .map_err(Error::transport)?;
                debug!(%method, %url, length = ?body.length, "dispatching request with body");
                self.agent.run(request)
            }
            None => {
                let request = builder.body(()).map_err(Error::transport)?;
                debug!(%method, %url, "dispatching request");
                self.agent.run(request)
            }
        };

        let response = result.map_err(map_ureq_error)?;
        let (parts, body) = response.into_parts();
        Ok(TransportResponse {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body: Box::new(body.into_reader()),
            decompressed: false,
        })
    }
}

/// Connection, TLS and timeout failures all surface as transport errors.
fn map_ureq_error(err: ureq::Error) -> Error {
    match err {
        ureq::Error::Io(err) => Error::transport(err),
        other => Error::transport(other),
    }
}
