/// Loopback listener that captures the OAuth redirect
use crate::error::TransportError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::debug;

// Browsers open speculative connections that never send a request.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_REQUEST_HEAD_BYTES: u64 = 8 * 1024;

const SUCCESS_PAGE: &str = "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>Signed in</title></head>
<body style=\"font-family: sans-serif; text-align: center; margin-top: 4rem\">
<h1>Authorization received</h1>
<p>You can close this window and return to the terminal.</p>
</body>
</html>";

/// Local HTTP listener for the provider redirect
///
/// Register [`RedirectListener::redirect_uri`] with the provider, then await
/// [`RedirectListener::wait_for_redirect`]. The listener does not interpret
/// the query; it hands back the whole redirect URL so the flow client can
/// verify code and state.
pub struct RedirectListener {
    listener: TcpListener,
    addr: SocketAddr,
    path: String,
}

impl RedirectListener {
    /// Bind to `addr` (use port 0 for any free port) and accept redirects on `path`
    pub async fn bind(addr: SocketAddr, path: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Connect(format!("failed to bind {}: {}", addr, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Ok(Self {
            listener,
            addr,
            path,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The redirect URI to configure on the provider
    pub fn redirect_uri(&self) -> String {
        format!("http://{}{}", self.addr, self.path)
    }

    /// Wait until a request hits the callback path and return its absolute URL
    ///
    /// Requests to other paths are answered with 404 and ignored.
    pub async fn wait_for_redirect(&self, timeout: Duration) -> Result<String, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            let (stream, peer) = tokio::time::timeout_at(deadline, self.listener.accept())
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            debug!(peer = %peer, "redirect listener accepted connection");

            let read_deadline = deadline.min(Instant::now() + REQUEST_READ_TIMEOUT);
            match tokio::time::timeout_at(read_deadline, self.handle(stream)).await {
                Ok(Ok(Some(target))) => return Ok(format!("http://{}{}", self.addr, target)),
                Ok(Ok(None)) => continue,
                // A broken connection is not the provider's redirect; keep waiting.
                Ok(Err(e)) => {
                    debug!(error = %e, "ignoring malformed callback request");
                    continue;
                }
                Err(_) if Instant::now() >= deadline => return Err(TransportError::Timeout),
                Err(_) => {
                    debug!(peer = %peer, "dropping idle connection");
                    continue;
                }
            }
        }
    }

    async fn handle(&self, stream: TcpStream) -> std::io::Result<Option<String>> {
        let mut reader = BufReader::new(stream.take(MAX_REQUEST_HEAD_BYTES));
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        if !request_line.ends_with('\n') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request line missing or too long",
            ));
        }

        // GET /callback?code=...&state=... HTTP/1.1
        let target = request_line.split_whitespace().nth(1).unwrap_or("");
        let path = target.split('?').next().unwrap_or("");

        // Drain headers so closing the socket does not reset the connection.
        let mut header = String::new();
        loop {
            header.clear();
            if reader.read_line(&mut header).await? == 0 || header.trim().is_empty() {
                break;
            }
        }

        let mut stream = reader.into_inner().into_inner();
        if path != self.path {
            write_response(&mut stream, "404 Not Found", "Not found").await?;
            return Ok(None);
        }

        write_response(&mut stream, "200 OK", SUCCESS_PAGE).await?;
        Ok(Some(target.to_string()))
    }
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}
