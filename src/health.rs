// ABOUTME: HTTP health polling for freshly started apps.
// ABOUTME: Sweeps a path cascade until a 2xx/3xx lands or the deadline passes.

use crate::error::{Error, Result};
use std::time::Duration;

pub const DEFAULT_PATHS: [&str; 4] = ["/up", "/health", "/healthz", "/"];

/// Poll `http://localhost:{port}` until some path answers with 2xx/3xx.
///
/// A custom path (from the manifest) is tried before the default cascade.
/// `host`, when non-empty, is sent as the Host header so name-based vhosts
/// route correctly; dev mode passes an empty host.
pub async fn check(
    port: u16,
    host: &str,
    timeout: Duration,
    interval: Duration,
    custom_path: Option<&str>,
) -> Result<()> {
    let mut paths: Vec<&str> = Vec::with_capacity(DEFAULT_PATHS.len() + 1);
    if let Some(path) = custom_path {
        paths.push(path);
    }
    paths.extend(DEFAULT_PATHS);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        for path in &paths {
            let url = format!("http://localhost:{port}{path}");
            let mut request = client.get(&url);
            if !host.is_empty() {
                request = request.header(reqwest::header::HOST, host);
            }

            let Ok(resp) = request.send().await else {
                continue;
            };

            let status = resp.status().as_u16();
            if (200..400).contains(&status) {
                return Ok(());
            }
        }
        tokio::time::sleep(interval).await;
    }

    Err(Error::HealthCheckTimeout(timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Minimal HTTP fixture that answers each path with a fixed status.
    fn serve(responses: Vec<(&'static str, u16)>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                let status = responses
                    .iter()
                    .find(|(p, _)| *p == path)
                    .map(|(_, s)| *s)
                    .unwrap_or(404);
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
            }
        });
        port
    }

    #[tokio::test]
    async fn succeeds_on_first_healthy_path() {
        let port = serve(vec![("/up", 200)]);
        check(port, "", Duration::from_secs(5), Duration::from_millis(50), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn falls_through_cascade_when_up_is_500() {
        // /up errors but /health is fine; must succeed within the sweep.
        let port = serve(vec![("/up", 500), ("/health", 200)]);
        check(port, "", Duration::from_secs(5), Duration::from_millis(50), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn custom_path_tried_first() {
        let port = serve(vec![("/custom", 204)]);
        check(
            port,
            "",
            Duration::from_secs(5),
            Duration::from_millis(50),
            Some("/custom"),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn redirects_count_as_healthy() {
        let port = serve(vec![("/up", 302)]);
        check(port, "", Duration::from_secs(5), Duration::from_millis(50), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn times_out_against_dead_port() {
        // Nothing listens here; expect a timeout error.
        let err = check(
            1,
            "",
            Duration::from_millis(300),
            Duration::from_millis(50),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::HealthCheckTimeout(_)));
    }
}
