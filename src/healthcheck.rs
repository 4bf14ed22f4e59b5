//! Single-shot HTTP health probes
//!
//! A probe distinguishes three outcomes: the peer actively refused the
//! connection, the peer answered with some status, or the attempt failed in
//! any other way (timeout, reset, DNS, protocol error).

use crate::config::PollConfig;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Outcome of one health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Nothing is listening on the port
    Refused,
    /// The endpoint answered with this status
    Responded(StatusCode),
    /// Any other failure
    Failed(String),
}

impl ProbeOutcome {
    /// A literal 200, nothing else
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Responded(StatusCode::OK))
    }

    pub fn is_refused(&self) -> bool {
        matches!(self, ProbeOutcome::Refused)
    }
}

/// Issues `GET <path>` against `<host>:<port>`
#[derive(Debug, Clone)]
pub struct HealthProbe {
    host: String,
    path: String,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(host: impl Into<String>, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PollConfig) -> Self {
        Self::new(
            config.health_host.clone(),
            config.health_path.clone(),
            config.request_timeout(),
        )
    }

    pub fn url(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.host, port, self.path)
    }

    /// Probe the health endpoint on `port`; connect and request share one timeout
    pub async fn check(&self, port: u16) -> ProbeOutcome {
        let authority = format!("{}:{}", self.host, port);

        let attempt = async {
            let stream = match TcpStream::connect(&authority).await {
                Ok(stream) => stream,
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!(port, "Health check refused");
                    return ProbeOutcome::Refused;
                }
                Err(e) => {
                    debug!(port, error = %e, "Health check failed (connection error)");
                    return ProbeOutcome::Failed(e.to_string());
                }
            };

            match self.request(stream, &authority).await {
                Ok(status) => {
                    debug!(port, status = status.as_u16(), "Health check responded");
                    ProbeOutcome::Responded(status)
                }
                Err(e) => {
                    debug!(port, error = %e, "Health check failed (request error)");
                    ProbeOutcome::Failed(e.to_string())
                }
            }
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(port, timeout_ms = self.timeout.as_millis() as u64, "Health check timed out");
                ProbeOutcome::Failed("health check timed out".to_string())
            }
        }
    }

    async fn request(&self, stream: TcpStream, authority: &str) -> anyhow::Result<StatusCode> {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Health check connection closed with error");
            }
        });

        let req = Request::get(self.path.as_str())
            .header(HOST, authority)
            .body(Empty::<Bytes>::new())?;

        let response = sender.send_request(req).await?;
        Ok(response.status())
    }
}
