//! Client for the proxy core's local control API.
//!
//! Only plain `http://` endpoints are supported; the API listens on
//! loopback. Each request opens its own connection and is bounded by the
//! client timeout.

use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ControlApiError {
    #[error("invalid control API url: {0}")]
    InvalidUrl(String),

    #[error("control API unreachable: {0}")]
    Unreachable(String),

    #[error("control API request timed out")]
    Timeout,

    #[error("control API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed control API response: {0}")]
    Malformed(String),
}

impl ControlApiError {
    /// Whether the API itself is down, as opposed to answering badly.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ControlApiError::Unreachable(_) | ControlApiError::Timeout)
    }
}

/// Outcome of an on-demand latency test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayTest {
    Delay(u64),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct ProxyStatus {
    #[serde(default)]
    history: Vec<DelaySample>,
    #[serde(default)]
    now: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DelaySample {
    #[serde(default)]
    delay: u64,
}

#[derive(Debug, Deserialize)]
struct DelayResponse {
    #[serde(default)]
    delay: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ControlApi {
    base: Url,
    secret: Option<String>,
    timeout: Duration,
    delay_method: Method,
}

impl ControlApi {
    /// `secret` may be empty, in which case no Authorization header is sent.
    pub fn new(base: &str, secret: &str, timeout: Duration) -> Result<Self, ControlApiError> {
        let base = Url::parse(base).map_err(|e| ControlApiError::InvalidUrl(format!("{base}: {e}")))?;
        if base.scheme() != "http" || base.host_str().is_none() {
            return Err(ControlApiError::InvalidUrl(format!(
                "{base}: expected http://host:port"
            )));
        }
        Ok(Self {
            base,
            secret: (!secret.is_empty()).then(|| secret.to_string()),
            timeout,
            delay_method: Method::PUT,
        })
    }

    /// Method used for delay-test triggers (PUT unless overridden).
    pub fn with_delay_method(mut self, method: Method) -> Self {
        self.delay_method = method;
        self
    }

    /// Most recent recorded delay at the resource named by `segments`
    /// (e.g. `["proxies", "wg-jp"]`). Each segment is percent-encoded.
    ///
    /// A missing proxy, an empty history, or a zero delay all mean the
    /// tunnel has no live sample and yield `None`.
    pub async fn proxy_delay<S: AsRef<str>>(&self, segments: &[S]) -> Result<Option<u64>, ControlApiError> {
        let url = self.url_for(segments)?;
        let (status, body) = self.send(Method::GET, url).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let proxy: ProxyStatus = decode(status, &body)?;
        Ok(proxy.history.last().map(|s| s.delay).filter(|d| *d > 0))
    }

    /// Ask the proxy core to measure a tunnel's latency now.
    pub async fn delay_test(
        &self,
        tag: &str,
        test_url: &str,
        timeout_ms: u64,
    ) -> Result<DelayTest, ControlApiError> {
        let mut url = self.url_for(&["proxies", tag, "delay"])?;
        url.query_pairs_mut()
            .append_pair("url", test_url)
            .append_pair("timeout", &timeout_ms.to_string());

        let (status, body) = self.send(self.delay_method.clone(), url).await?;
        let parsed: Option<DelayResponse> = serde_json::from_slice(&body).ok();
        if !status.is_success() {
            let message = parsed
                .and_then(|r| r.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Ok(DelayTest::Failed(message));
        }
        match parsed {
            Some(DelayResponse { delay: Some(d), .. }) if d > 0 => Ok(DelayTest::Delay(d)),
            Some(DelayResponse { message: Some(m), .. }) => Ok(DelayTest::Failed(m)),
            Some(_) => Ok(DelayTest::Failed("no delay reported".to_string())),
            None => Err(ControlApiError::Malformed(String::from_utf8_lossy(&body).into_owned())),
        }
    }

    /// Member currently selected by an aggregation group.
    pub async fn group_now(&self, group: &str) -> Result<String, ControlApiError> {
        let url = self.url_for(&["proxies", group])?;
        let (status, body) = self.send(Method::GET, url).await?;
        let proxy: ProxyStatus = decode(status, &body)?;
        proxy
            .now
            .ok_or_else(|| ControlApiError::Malformed(format!("{group} has no `now` field")))
    }

    fn url_for<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url, ControlApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ControlApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url) -> Result<(StatusCode, Bytes), ControlApiError> {
        let host = url
            .host_str()
            .ok_or_else(|| ControlApiError::InvalidUrl(url.to_string()))?;
        let authority = format!("{host}:{}", url.port_or_known_default().unwrap_or(80));
        let target = url[url::Position::BeforePath..].to_string();

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&authority)
                .await
                .map_err(|e| ControlApiError::Unreachable(format!("{authority}: {e}")))?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ControlApiError::Unreachable(e.to_string()))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = Request::builder()
                .method(method.clone())
                .uri(target.as_str())
                .header(HOST, authority.as_str())
                .header(USER_AGENT, "warden/0.1");
            if let Some(secret) = &self.secret {
                builder = builder.header(AUTHORIZATION, format!("Bearer {secret}"));
            }
            let req = builder
                .body(Empty::<Bytes>::new())
                .map_err(|e| ControlApiError::InvalidUrl(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ControlApiError::Unreachable(e.to_string()))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ControlApiError::Unreachable(e.to_string()))?
                .to_bytes();
            Ok((status, body))
        };

        let result = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ControlApiError::Timeout)?;
        if let Ok((status, _)) = &result {
            debug!(%method, %target, status = status.as_u16(), "control API call");
        }
        result
    }
}

fn decode<T: serde::de::DeserializeOwned>(status: StatusCode, body: &Bytes) -> Result<T, ControlApiError> {
    if !status.is_success() {
        return Err(ControlApiError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        });
    }
    serde_json::from_slice(body).map_err(|e| ControlApiError::Malformed(e.to_string()))
}

/// Canned-response HTTP server for probe tests.
#[cfg(test)]
pub(crate) mod testing {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned `(status, body)` per connection, in order.
    ///
    /// The handle yields the request head of every connection served.
    pub async fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                seen.push(String::from_utf8_lossy(&buf).into_owned());
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            seen
        });
        (base, handle)
    }
}
