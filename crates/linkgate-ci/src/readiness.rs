//! Readiness probe for the launched server.
//!
//! Polls `GET http://<addr><path>` with exponential backoff until the server
//! answers with a non-5xx status or the timeout passes. A bare TCP accept is
//! not enough: the runtime's port proxy accepts before the server is up. An
//! optional settle delay runs first.

use linkgate_core::ReadinessConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{CiError, Result};

/// Upper bound for a single request.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    config: ReadinessConfig,
}

impl ReadinessProbe {
    pub fn new(config: ReadinessConfig) -> Self {
        Self { config }
    }

    /// Wait until the server at `addr` answers HTTP. Returns the time spent waiting.
    pub async fn wait_ready(&self, addr: SocketAddr, cancel: &CancelToken) -> Result<Duration> {
        let start = Instant::now();
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .map_err(|e| CiError::ReadinessClient(e.to_string()))?;
        let url = format!("http://{addr}{}", self.config.path);

        if self.config.settle_delay_secs > 0 {
            debug!(secs = self.config.settle_delay_secs, "settle delay");
            sleep_or_cancel(Duration::from_secs(self.config.settle_delay_secs), cancel).await?;
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_secs);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let ready = tokio::select! {
                _ = cancel.cancelled() => return Err(CiError::Cancelled),
                result = client.get(&url).send() => match result {
                    Ok(response) if !response.status().is_server_error() => true,
                    Ok(response) => {
                        debug!(%url, attempt, status = %response.status(), "server not serving yet");
                        false
                    }
                    Err(e) => {
                        debug!(%url, attempt, error = %e, "server not answering yet");
                        false
                    }
                },
            };

            if ready {
                let waited = start.elapsed();
                info!(%url, attempt, waited_ms = waited.as_millis() as u64, "server ready");
                return Ok(waited);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CiError::NotReady {
                    addr: addr.to_string(),
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }

            sleep_or_cancel(backoff.min(deadline - now), cancel).await?;
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancelToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CiError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn fast_config(timeout_secs: u64) -> ReadinessConfig {
        ReadinessConfig {
            settle_delay_secs: 0,
            initial_backoff_ms: 20,
            max_backoff_ms: 100,
            timeout_secs,
            ..ReadinessConfig::default()
        }
    }

    /// A local port with nothing listening on it.
    async fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    /// Answer every connection with `status_line` and an empty body.
    fn serve(listener: TcpListener, status_line: &'static str) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        })
    }

    #[tokio::test]
    async fn test_ready_when_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve(listener, "200 OK");

        let probe = ReadinessProbe::new(fast_config(5));
        probe
            .wait_ready(addr, &CancelToken::never())
            .await
            .expect("should be ready");
        server.abort();
    }

    #[tokio::test]
    async fn test_client_error_status_counts_as_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve(listener, "404 Not Found");

        let probe = ReadinessProbe::new(fast_config(5));
        probe
            .wait_ready(addr, &CancelToken::never())
            .await
            .expect("a 404 still means the server is up");
        server.abort();
    }

    #[tokio::test]
    async fn test_server_error_status_is_not_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve(listener, "502 Bad Gateway");

        let probe = ReadinessProbe::new(fast_config(1));
        let err = probe
            .wait_ready(addr, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, CiError::NotReady { .. }));
        server.abort();
    }

    #[tokio::test]
    async fn test_accept_then_close_is_not_ready() {
        // What a port proxy does while the container is still starting.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let probe = ReadinessProbe::new(fast_config(1));
        let err = probe
            .wait_ready(addr, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, CiError::NotReady { .. }));
        server.abort();
    }

    #[tokio::test]
    async fn test_ready_after_late_bind() {
        let addr = free_addr().await;
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            serve(listener, "200 OK").await.ok();
        });

        let probe = ReadinessProbe::new(fast_config(5));
        let waited = probe
            .wait_ready(addr, &CancelToken::never())
            .await
            .expect("should become ready");
        assert!(waited >= Duration::from_millis(150));
        server.abort();
    }

    #[tokio::test]
    async fn test_requests_configured_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        });

        let probe = ReadinessProbe::new(ReadinessConfig {
            path: "/index.html".to_string(),
            ..fast_config(5)
        });
        probe
            .wait_ready(addr, &CancelToken::never())
            .await
            .expect("should be ready");
        let request = rx.await.unwrap();
        assert!(request.starts_with("GET /index.html HTTP/1.1"), "{request}");
        server.abort();
    }

    #[tokio::test]
    async fn test_not_ready_times_out() {
        let addr = free_addr().await;
        let probe = ReadinessProbe::new(fast_config(1));
        let err = probe
            .wait_ready(addr, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, CiError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let addr = free_addr().await;
        let source = CancelSource::new();
        let token = source.token();
        let probe = ReadinessProbe::new(fast_config(30));

        let wait = tokio::spawn(async move { probe.wait_ready(addr, &token).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .expect("cancel should end the wait promptly")
            .expect("join");
        assert!(matches!(result, Err(CiError::Cancelled)));
    }
}
