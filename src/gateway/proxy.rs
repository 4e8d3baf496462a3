//! Upstream forwarding for the host server.
//!
//! Requests that reach the bottom of the fault stack are replayed against a
//! configured upstream base URL with `reqwest`, and the upstream response is
//! relayed back unchanged apart from hop-by-hop headers.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, header};
use reqwest::Client;
use tracing::debug;

use crate::{Error, Result};

/// Headers that describe a single connection and must not be relayed
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "host",
];

/// Reverse-proxy target
#[derive(Debug, Clone)]
pub struct Upstream {
    client: Client,
    base_url: String,
    max_body_size: usize,
}

impl Upstream {
    /// Create an upstream for `base_url` with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration, max_body_size: usize) -> Result<Self> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Upstream must be an http(s) URL: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_body_size,
        })
    }

    /// Base URL requests are forwarded to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replay `request` against the upstream and relay its response
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|e| Error::Upstream(format!("Failed to read request body: {e}")))?;

        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = format!("{}{}", self.base_url, path_and_query);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        debug!(method = %parts.method, url = %url, "Forwarding to upstream");
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
