//! HTTP `CONNECT` tunnelling for the upstream dial.
//!
//! The proxy comes from `feed.proxy` when set, otherwise from the usual
//! environment variables: `HTTPS_PROXY` for `wss://` endpoints, `HTTP_PROXY`
//! for `ws://`, with `NO_PROXY` exclusions. Loopback endpoints never go
//! through an environment proxy.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::{Host, Url};

use crate::error::FeedError;

/// Upper bound on the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Pick the proxy for `endpoint`: `explicit` if set, else whatever `env`
/// (normally `std::env::var`) names.
pub fn resolve<F>(endpoint: &Url, explicit: Option<&str>, env: F) -> Result<Option<Url>, FeedError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match explicit {
        Some(raw) => raw.to_string(),
        None => {
            if is_loopback(endpoint) || excluded(endpoint, &env) {
                return Ok(None);
            }
            let keys = if endpoint.scheme() == "wss" {
                ["HTTPS_PROXY", "https_proxy"]
            } else {
                ["HTTP_PROXY", "http_proxy"]
            };
            match keys.into_iter().filter_map(&env).find(|v| !v.trim().is_empty()) {
                Some(raw) => raw,
                None => return Ok(None),
            }
        }
    };
    parse(raw.trim()).map(Some).map_err(FeedError::Dial)
}

/// Parse a proxy address; a bare `host:port` is taken as `http://host:port`.
pub fn parse(raw: &str) -> Result<Url, String> {
    let full = if raw.contains("://") { raw.to_string() } else { format!("http://{raw}") };
    let url = Url::parse(&full).map_err(|e| format!("proxy {raw:?}: {e}"))?;
    if url.scheme() != "http" {
        return Err(format!("proxy {raw:?}: only http:// proxies are supported"));
    }
    if url.host_str().is_none() {
        return Err(format!("proxy {raw:?}: missing host"));
    }
    Ok(url)
}

fn is_loopback(endpoint: &Url) -> bool {
    match endpoint.host() {
        Some(Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// `NO_PROXY`: comma-separated hosts or domain suffixes, or `*` for all.
fn excluded<F>(endpoint: &Url, env: &F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    let Some(list) = env("NO_PROXY").or_else(|| env("no_proxy")) else {
        return false;
    };
    let host = endpoint.host_str().unwrap_or_default().to_ascii_lowercase();
    list.split(',').map(str::trim).filter(|e| !e.is_empty()).any(|entry| {
        if entry == "*" {
            return true;
        }
        let entry = entry.trim_start_matches("*.").trim_start_matches('.').to_ascii_lowercase();
        host == entry || host.ends_with(&format!(".{entry}"))
    })
}

/// Open a TCP connection to `proxy` and ask it to tunnel to `host:port`.
///
/// Returns the raw stream once the proxy answers 200; the WebSocket (and TLS)
/// handshake then runs over it unchanged.
pub async fn tunnel(proxy: &Url, host: &str, port: u16) -> Result<TcpStream, FeedError> {
    let proxy_host = proxy.host_str().ok_or_else(|| FeedError::Dial("proxy has no host".into()))?;
    let proxy_addr = format!("{proxy_host}:{}", proxy.port_or_known_default().unwrap_or(80));
    let mut stream = TcpStream::connect(&proxy_addr)
        .await
        .map_err(|e| FeedError::Dial(format!("proxy {proxy_addr}: {e}")))?;

    let target = format!("{host}:{port}");
    let mut head = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if !proxy.username().is_empty() {
        let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or_default());
        head.push_str(&format!("Proxy-Authorization: Basic {}\r\n", STANDARD.encode(credentials)));
    }
    head.push_str("\r\n");
    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|e| FeedError::Dial(format!("proxy {proxy_addr}: {e}")))?;

    let response = read_head(&mut stream).await?;
    let status_line = response.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some("200")) if version.starts_with("HTTP/1.") => Ok(stream),
        _ => Err(FeedError::Dial(format!("proxy {proxy_addr} refused CONNECT {target}: {status_line}"))),
    }
}

/// Read up to and including the blank line that ends an HTTP head.
///
/// Byte at a time: nothing past the head may be consumed, the tunnel payload
/// starts right after it.
async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String, FeedError> {
    let mut buf = Vec::with_capacity(128);
    while !buf.ends_with(b"\r\n\r\n") {
        if buf.len() >= MAX_RESPONSE_HEAD {
            return Err(FeedError::Dial("proxy response head too large".into()));
        }
        let byte = stream
            .read_u8()
            .await
            .map_err(|e| FeedError::Dial(format!("proxy closed during CONNECT: {e}")))?;
        buf.push(byte);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
