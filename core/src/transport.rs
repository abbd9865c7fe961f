//! The seam between the engine and the wire.
//!
//! # Design
//! The dispatcher only needs something that turns an [`HttpRequest`] into an
//! [`HttpResponse`]. [`UreqTransport`] is the default; tests substitute a
//! scripted transport. Non-2xx statuses are data, not transport errors:
//! interpretation belongs to the response pipeline.
//!
//! Every exchange is handed the time its invocation has left. Transports
//! that cannot be interrupted by dropping their future must enforce that
//! limit themselves and report [`interruptible`](Transport::interruptible)
//! as `false`; the dispatcher then keeps the exchange's concurrency permit
//! until it actually ends.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one exchange. `timeout` is the time left before the
    /// invocation expires, if it has a deadline.
    async fn execute(&self, request: HttpRequest, timeout: Option<Duration>) -> Result<HttpResponse, TransportError>;

    /// Whether dropping an in-flight [`execute`](Self::execute) future
    /// stops the exchange.
    fn interruptible(&self) -> bool {
        true
    }
}

/// Blocking ureq agent driven from tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// `timeout` bounds exchanges at the socket level when the invocation
    /// carries no deadline of its own.
    pub fn new(timeout: Option<Duration>) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .new_agent();
        Self { agent }
    }

    fn execute_blocking(
        agent: &ureq::Agent,
        request: HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        let url = request.endpoint.as_str();
        let headers = request.headers.as_slice();
        let payload = request.payload.as_ref();
        let result = match request.method {
            HttpMethod::Get => prepare(agent.get(url), headers, timeout).call(),
            HttpMethod::Head => prepare(agent.head(url), headers, timeout).call(),
            HttpMethod::Options => prepare(agent.options(url), headers, timeout).call(),
            HttpMethod::Delete => prepare(agent.delete(url), headers, timeout).call(),
            HttpMethod::Post => send(prepare(agent.post(url), headers, timeout), payload),
            HttpMethod::Put => send(prepare(agent.put(url), headers, timeout), payload),
            HttpMethod::Patch => send(prepare(agent.patch(url), headers, timeout), payload),
        };
        let mut response = result.map_err(|e| match e {
            ureq::Error::Timeout(_) => TransportError::Timeout,
            other => TransportError::Connection(other.to_string()),
        })?;

        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();
        let body = if request.method == HttpMethod::Head {
            Vec::new()
        } else {
            response
                .body_mut()
                .read_to_vec()
                .map_err(|e| TransportError::Body(e.to_string()))?
        };
        Ok(HttpResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Adds headers and, when the invocation has a deadline, a per-request
/// socket timeout that closes the connection once it passes.
fn prepare<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
    timeout: Option<Duration>,
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match timeout {
        Some(limit) => builder.config().timeout_global(Some(limit)).build(),
        None => builder,
    }
}

fn send(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    payload: Option<&crate::http::Payload>,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match payload {
        Some(payload) => match &payload.content_type {
            Some(content_type) => builder.content_type(content_type.as_str()).send(payload.data.as_slice()),
            None => builder.send(payload.data.as_slice()),
        },
        None => builder.send_empty(),
    }
}

#[async_trait]
impl Transport for UreqTransport {
    async fn execute(&self, request: HttpRequest, timeout: Option<Duration>) -> Result<HttpResponse, TransportError> {
        trace!(line = %request.request_line(), ?timeout, "sending request");
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || Self::execute_blocking(&agent, request, timeout))
            .await
            .map_err(|e| TransportError::Connection(format!("transport task failed: {e}")))?
    }

    /// The exchange runs on a blocking thread; only its socket timeout
    /// ends it early.
    fn interruptible(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::Instant;

    /// Accepts one connection, reads until the client hangs up, never answers.
    fn silent_server() -> (String, mpsc::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
            let _ = closed_tx.send(());
        });
        (format!("http://{addr}/silent"), closed_rx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deadline_closes_a_silent_connection() {
        let (url, closed) = silent_server();
        let transport = UreqTransport::default();
        assert!(!transport.interruptible());

        let started = Instant::now();
        let result = transport
            .execute(HttpRequest::new(HttpMethod::Get, url), Some(Duration::from_millis(150)))
            .await;
        assert_eq!(result, Err(TransportError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
        closed.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
