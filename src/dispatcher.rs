use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use isahc::{
    AsyncBody,
    AsyncReadResponseExt,
    HttpClient,
    HttpClientBuilder,
    Request,
    config::{ Configurable, SslOption },
    error::ErrorKind,
};
use tokio::time::{ Instant, timeout };
use tracing::{ debug, trace };

use crate::config::TestConfig;
use crate::error::Result;
use crate::outcome::{ DispatchError, Outcome, epoch_seconds };

pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;

/// Performs exactly one request attempt. Never fails: every error becomes an `Outcome`.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, request_id: usize) -> DispatchFuture<'_>;
}

/// Opens a fresh session, once per batch, so idle connections
/// are not held open across a cooldown.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Dispatcher>>;
}

/// Builds isahc clients for the configured target.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    config: Arc<TestConfig>,
}

impl HttpConnector {
    pub fn new(config: Arc<TestConfig>) -> Self {
        Self { config }
    }
}

impl Connector for HttpConnector {
    fn connect(&self) -> Result<Arc<dyn Dispatcher>> {
        let config = &self.config;
        let mut builder = HttpClientBuilder::new()
            .timeout(config.timeout)
            .max_connections(config.max_connections())
            .max_connections_per_host(config.max_connections());

        for (name, value) in &config.headers {
            builder = builder.default_header(name.as_str(), value.as_str());
        }

        if !config.keep_alive {
            // no reuse: nothing cached and the server is told to close
            builder = builder.connection_cache_size(0).default_header("connection", "close");
        }

        if !config.verify_ssl {
            builder = builder.ssl_options(
                SslOption::DANGER_ACCEPT_INVALID_CERTS | SslOption::DANGER_ACCEPT_INVALID_HOSTS
            );
        }

        let client = builder.build()?;
        debug!(
            max_connections = config.max_connections(),
            keep_alive = config.keep_alive,
            "opened HTTP session"
        );

        Ok(Arc::new(HttpDispatcher { client, config: Arc::clone(config) }))
    }
}

/// One batch's HTTP session, shared by every worker of the batch.
pub struct HttpDispatcher {
    client: HttpClient,
    config: Arc<TestConfig>,
}

impl Dispatcher for HttpDispatcher {
    fn dispatch(&self, request_id: usize) -> DispatchFuture<'_> {
        Box::pin(async move {
            let started_at = epoch_seconds(SystemTime::now());
            let start = Instant::now();

            // bound the whole cycle, body read included
            let result = timeout(self.config.timeout, self.attempt()).await;
            let elapsed = start.elapsed();

            match result {
                Ok(Ok((status, size))) => {
                    trace!(request_id, status, size, "request completed");
                    Outcome::received(status, elapsed, started_at, size)
                }
                Ok(Err(err)) => {
                    debug!(request_id, error = %err, "request failed");
                    Outcome::failed(err, elapsed, started_at)
                }
                Err(_) => {
                    debug!(request_id, "request timed out");
                    Outcome::failed(DispatchError::Timeout, elapsed, started_at)
                }
            }
        })
    }
}

impl HttpDispatcher {
    /// Send the request and drain the body, returns status and body size
    async fn attempt(&self) -> std::result::Result<(u16, u64), DispatchError> {
        let builder = Request::builder()
            .method(self.config.method.clone())
            .uri(self.config.url.as_str());
        let body = match self.config.request_body() {
            Some(body) => AsyncBody::from(body.as_bytes().to_vec()),
            None => AsyncBody::empty(),
        };
        let request = builder
            .body(body)
            .map_err(|e| DispatchError::Unclassified(e.to_string()))?;

        let mut response = self.client.send_async(request).await.map_err(classify)?;
        let content = response.bytes().await.map_err(classify_io)?;

        Ok((response.status().as_u16(), content.len() as u64))
    }
}

fn classify(err: isahc::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Timeout
    } else if
        err.is_network() ||
        err.is_tls() ||
        matches!(err.kind(), ErrorKind::ProtocolViolation | ErrorKind::InvalidContentEncoding)
    {
        DispatchError::Transport(err.to_string())
    } else {
        DispatchError::Unclassified(err.to_string())
    }
}

// errors while reading the body
fn classify_io(err: std::io::Error) -> DispatchError {
    match err.kind() {
        std::io::ErrorKind::TimedOut => DispatchError::Timeout,
        _ => DispatchError::Transport(err.to_string()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use std::time::Duration;
    use tokio::io::{ AsyncReadExt, AsyncWriteExt };
    use tokio::net::TcpListener;

    /// Serve `response` to every connection, returns the URL
    async fn serve(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}/", addr)
    }

    fn session(args: &[&str]) -> Arc<dyn Dispatcher> {
        let config = Arc::new(test_config(args));
        HttpConnector::new(config).connect().unwrap()
    }

    #[tokio::test]
    async fn test_ok_response_reads_full_body() {
        let url = serve(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world"
        ).await;
        let outcome = session(&[&url]).dispatch(0).await;

        assert!(outcome.success, "{:?}", outcome);
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.response_size_bytes, 11);
        assert!(outcome.error_message.is_empty());
        assert!(outcome.start_timestamp > 0.0);
    }

    /// Answer one connection with 200 and hand back the raw request it carried
    async fn capture() -> (String, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // headers plus the 7-byte body
            while !String::from_utf8_lossy(&request).ends_with("\r\n\r\nPAYLOAD") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let _ = socket.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
            ).await;
            let _ = socket.shutdown().await;
            let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
        });
        (format!("http://{}/submit", addr), rx)
    }

    #[tokio::test]
    async fn test_headers_body_and_connection_close_reach_server() {
        let (url, request) = capture().await;
        let outcome = session(
            &[&url, "-X", "POST", "-H", "X-Run-Tag: nightly", "--body", "PAYLOAD", "--no-keep-alive"]
        ).dispatch(0).await;
        assert!(outcome.success, "{:?}", outcome);

        let request = request.await.unwrap();
        let lowered = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /submit HTTP/1.1\r\n"), "{}", request);
        assert!(lowered.contains("\r\nx-run-tag: nightly\r\n"), "{}", request);
        assert!(lowered.contains("\r\ncontent-length: 7\r\n"), "{}", request);
        assert!(lowered.contains("\r\nconnection: close\r\n"), "{}", request);
        assert!(request.ends_with("\r\n\r\nPAYLOAD"), "{}", request);
    }

    #[tokio::test]
    async fn test_rate_limited_response_keeps_status() {
        let url = serve(
            "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 4\r\nConnection: close\r\n\r\nslow"
        ).await;
        let outcome = session(&[&url, "--no-keep-alive"]).dispatch(0).await;

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, 429);
        assert_eq!(outcome.error_message, "HTTP 429");
        assert_eq!(outcome.response_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = session(&[&format!("http://{}/", addr)]).dispatch(0).await;

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, 0);
        assert!(
            outcome.error_message.starts_with("TransportError"),
            "unexpected error: {}",
            outcome.error_message
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket); // accept and never answer
            }
        });

        let url = format!("http://{}/", addr);
        let start = Instant::now();
        let outcome = session(&[&url, "-t", "0.2"]).dispatch(0).await;

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, 0);
        assert_eq!(outcome.error_message, "Timeout");
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
