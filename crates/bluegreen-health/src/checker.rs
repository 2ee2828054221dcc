//! HTTP probe logic.
//!
//! A probe is one GET against an environment's service address. It never
//! retries.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use serde::Serialize;
use tracing::debug;

/// Result of a single HTTP probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy { status: u16 },
    /// The endpoint answered with a non-2xx status.
    Unhealthy { status: u16 },
    /// The endpoint answered 2xx but identified itself as another
    /// environment.
    Misrouted { status: u16 },
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_healthy(self) -> bool {
        matches!(self, ProbeResult::Healthy { .. })
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Healthy { status } => write!(f, "HTTP {status}"),
            ProbeResult::Unhealthy { status } => write!(f, "HTTP {status}"),
            ProbeResult::Misrouted { status } => {
                write!(f, "HTTP {status} from the wrong environment")
            }
            ProbeResult::Failed => f.write_str("unreachable"),
        }
    }
}

/// Perform an HTTP GET probe against `address` (`host:port`).
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for any other
/// status, or `Failed` if the connection fails or the timeout elapses.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    http_get(address, path, timeout).await.0
}

/// Like [`http_probe`], but also returns the body of a 2xx response.
///
/// The timeout covers reading the body. A body that cannot be read turns
/// the probe into `Failed`.
pub async fn http_get(address: &str, path: &str, timeout: Duration) -> (ProbeResult, Option<Bytes>) {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return (ProbeResult::Failed, None);
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return (ProbeResult::Failed, None);
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", address)
            .header("user-agent", concat!("bluegreen-health/", env!("CARGO_PKG_VERSION")))
            .body(http_body_util::Empty::<Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "invalid probe request");
                return (ProbeResult::Failed, None);
            }
        };

        let resp = match sender.send_request(req).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                return (ProbeResult::Failed, None);
            }
        };

        let status = resp.status();
        if !status.is_success() {
            debug!(%status, %uri, "probe non-2xx");
            return (
                ProbeResult::Unhealthy {
                    status: status.as_u16(),
                },
                None,
            );
        }

        match resp.into_body().collect().await {
            Ok(body) => (
                ProbeResult::Healthy {
                    status: status.as_u16(),
                },
                Some(body.to_bytes()),
            ),
            Err(e) => {
                debug!(error = %e, %uri, "probe body unreadable");
                (ProbeResult::Failed, None)
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(%uri, ?timeout, "probe timed out");
            (ProbeResult::Failed, None)
        }
    }
}
