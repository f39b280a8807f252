use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};

pub const RELAY_PREFIX: &str = "/api/yahoo-geocoding";
pub const UPSTREAM_PATH: &str = "/geocode/V1/geoCoder";

const MAX_HEAD_BYTES: usize = 16 * 1024;
const UPSTREAM_TIMEOUT_SECS: u64 = 15;

/// Maps a relay request target onto the upstream path, keeping any suffix
/// and the query string. `None` for paths outside the relay prefix.
pub fn rewrite_target(request_target: &str) -> Option<String> {
    let (path, query) = match request_target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (request_target, None),
    };
    let rest = path.strip_prefix(RELAY_PREFIX)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let mut target = format!("{UPSTREAM_PATH}{rest}");
    if let Some(query) = query {
        target.push('?');
        target.push_str(query);
    }
    Some(target)
}

/// Running relay. Dropping the handle stops the accept loop.
pub struct RelayHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Geocoder endpoint that routes through this relay.
    pub fn endpoint(&self) -> String {
        format!("http://{}{}", self.local_addr, RELAY_PREFIX)
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Binds `listen_addr` and forwards geocoder requests to `upstream_origin`.
pub async fn start(listen_addr: &str, upstream_origin: &str) -> AppResult<RelayHandle> {
    let upstream = Url::parse(upstream_origin)
        .map_err(|err| AppError::Config(format!("invalid relay upstream origin: {err}")))?;
    let http = Client::builder()
        .user_agent(concat!("address-mapper-relay/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
        .build()?;
    let listener = TcpListener::bind(listen_addr).await?;
    let local_addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(target: "relay", ?err, "accept failed");
                    continue;
                }
            };
            let http = http.clone();
            let upstream = upstream.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_connection(socket, &http, &upstream).await {
                    debug!(target: "relay", %peer, ?err, "relay connection failed");
                }
            });
        }
    });

    info!(
        target: "relay",
        addr = %local_addr,
        upstream = %upstream_origin,
        "development relay listening"
    );
    Ok(RelayHandle { local_addr, task })
}

async fn serve_connection(mut socket: TcpStream, http: &Client, upstream: &Url) -> AppResult<()> {
    let head = read_head(&mut socket).await?;
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        debug!(target: "relay", "malformed request line");
        return write_simple(&mut socket, "400 Bad Request", "bad request").await;
    };

    if method != "GET" {
        return write_simple(&mut socket, "405 Method Not Allowed", "method not allowed").await;
    }
    let Some(rewritten) = rewrite_target(target) else {
        debug!(target: "relay", %target, "path outside relay prefix");
        return write_simple(&mut socket, "404 Not Found", "not found").await;
    };
    let url = upstream
        .join(&rewritten)
        .map_err(|err| AppError::Config(format!("invalid relay target: {err}")))?;

    let response = match http.get(url).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(target: "relay", error = %err.without_url(), "upstream request failed");
            return write_simple(&mut socket, "502 Bad Gateway", "upstream unavailable").await;
        }
    };

    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let mut head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nConnection: close\r\n"
    );
    if let Some(length) = response.content_length() {
        head.push_str(&format!("Content-Length: {length}\r\n"));
    }
    head.push_str("\r\n");
    socket.write_all(head.as_bytes()).await?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        socket.write_all(&chunk?).await?;
    }
    socket.shutdown().await?;
    debug!(target: "relay", status = status.as_u16(), "relayed geocoder response");
    Ok(())
}

async fn read_head(socket: &mut TcpStream) -> AppResult<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let read = socket.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_HEAD_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn write_simple(socket: &mut TcpStream, status: &str, body: &str) -> AppResult<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::status_code;
    use httptest::{Expectation, Server};

    use super::*;

    #[test]
    fn rewrites_prefix_and_keeps_query() {
        assert_eq!(
            rewrite_target("/api/yahoo-geocoding?query=%E6%B8%8B%E8%B0%B7&output=json").as_deref(),
            Some("/geocode/V1/geoCoder?query=%E6%B8%8B%E8%B0%B7&output=json")
        );
        assert_eq!(
            rewrite_target("/api/yahoo-geocoding/extra").as_deref(),
            Some("/geocode/V1/geoCoder/extra")
        );
        assert_eq!(
            rewrite_target("/api/yahoo-geocoding").as_deref(),
            Some("/geocode/V1/geoCoder")
        );
        assert_eq!(rewrite_target("/api/yahoo-geocodingX"), None);
        assert_eq!(rewrite_target("/other?query=x"), None);
    }

    #[tokio::test]
    async fn relays_status_content_type_and_body() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/geocode/V1/geoCoder"),
                request::query(url_decoded(contains(("query", "渋谷")))),
            ])
            .respond_with(
                status_code(200)
                    .insert_header("Content-Type", "application/json; charset=utf-8")
                    .body(r#"{"Feature":[]}"#),
            ),
        );
        let relay = start("127.0.0.1:0", &server.url("/").to_string())
            .await
            .unwrap();

        let response = reqwest::Client::new()
            .get(relay.endpoint())
            .query(&[("query", "渋谷"), ("output", "json")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/json; charset=utf-8"
        );
        assert_eq!(response.text().await.unwrap(), r#"{"Feature":[]}"#);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let server = Server::run();
        let relay = start("127.0.0.1:0", &server.url("/").to_string())
            .await
            .unwrap();

        let response = reqwest::get(format!("http://{}/elsewhere", relay.local_addr()))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(request).await.unwrap();
        let mut response = String::new();
        socket.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn request_line_without_target_is_bad_request() {
        let server = Server::run();
        let relay = start("127.0.0.1:0", &server.url("/").to_string())
            .await
            .unwrap();

        let missing_target = send_raw(relay.local_addr(), b"GET\r\n\r\n").await;
        assert!(missing_target.starts_with("HTTP/1.1 400"), "{missing_target}");
        let empty_line = send_raw(relay.local_addr(), b"\r\n\r\n").await;
        assert!(empty_line.starts_with("HTTP/1.1 400"), "{empty_line}");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", closed.local_addr().unwrap());
        drop(closed);
        let relay = start("127.0.0.1:0", &origin).await.unwrap();

        let response = reqwest::get(relay.endpoint()).await.unwrap();
        assert_eq!(response.status(), 502);
    }
}
