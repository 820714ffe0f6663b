//! Webhook delivery.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use warden_core::config::AlertConfig;
use warden_core::{BoxFuture, Severity};

use crate::event::{AlertEvent, Transport};

/// Upper bound on a single delivery attempt.
pub const MAX_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Log-only transport; nothing left the host.
    Logged,
    Failed(String),
}

/// Anything that can receive alerts.
pub trait AlertSink: Send + Sync {
    fn notify<'a>(&'a self, message: &'a str, severity: Severity) -> BoxFuture<'a, Delivery>;
}

/// Sends alerts to the configured webhook.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    client: Client,
    transport: Transport,
    host: String,
}

impl AlertDispatcher {
    pub fn new(transport: Transport, host: &str, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(timeout.min(MAX_DELIVERY_TIMEOUT))
            .user_agent("warden/0.1")
            .build()?;
        Ok(Self {
            client,
            transport,
            host: host.to_string(),
        })
    }

    pub fn from_config(config: &AlertConfig, host: &str, timeout: Duration) -> Result<Self, AlertError> {
        Self::new(Transport::from_config(config), host, timeout)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Deliver `event`. Errors are logged and folded into the result.
    pub async fn send(&self, event: &AlertEvent) -> Delivery {
        let (Some(url), Some(body)) = (self.transport.url(), self.transport.payload(event)) else {
            info!(severity = %event.severity, host = %event.host, message = %event.message, "alert");
            return Delivery::Logged;
        };

        match self.client.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(severity = %event.severity, "alert delivered");
                Delivery::Sent
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(%status, body = %body, message = %event.message, "alert webhook rejected event");
                Delivery::Failed(format!("HTTP {status}"))
            }
            Err(e) => {
                warn!(error = %e, message = %event.message, "alert delivery failed");
                Delivery::Failed(e.to_string())
            }
        }
    }
}

impl AlertSink for AlertDispatcher {
    fn notify<'a>(&'a self, message: &'a str, severity: Severity) -> BoxFuture<'a, Delivery> {
        Box::pin(async move {
            let event = AlertEvent::new(&self.host, message, severity);
            self.send(&event).await
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Accept one connection, answer with `status`, return the request body.
    async fn one_shot(status: u16) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let len = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= split + 4 + len {
                        break;
                    }
                }
            }
            let reply = format!("HTTP/1.1 {status} X\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok");
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            let text = String::from_utf8_lossy(&buf).to_string();
            text.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn json_transport_posts_event() {
        let (url, server) = one_shot(200).await;
        let dispatcher =
            AlertDispatcher::new(Transport::Json { url }, "hk-a", Duration::from_secs(2)).unwrap();

        let delivery = dispatcher.notify("sing-box restarted", Severity::Info).await;
        assert_eq!(delivery, Delivery::Sent);

        let body: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(body["host"], "hk-a");
        assert_eq!(body["message"], "sing-box restarted");
        assert_eq!(body["severity"], "info");
    }

    #[tokio::test]
    async fn rejected_delivery_is_reported_not_raised() {
        let (url, _server) = one_shot(500).await;
        let dispatcher =
            AlertDispatcher::new(Transport::ChatBot { url }, "hk-a", Duration::from_secs(2)).unwrap();

        let delivery = dispatcher.notify("x", Severity::Critical).await;
        assert_eq!(delivery, Delivery::Failed("HTTP 500 Internal Server Error".to_string()));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_reported_not_raised() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let dispatcher = AlertDispatcher::new(
            Transport::Json {
                url: format!("http://{addr}/hook"),
            },
            "hk-a",
            Duration::from_secs(1),
        )
        .unwrap();

        assert!(matches!(
            dispatcher.notify("x", Severity::Warning).await,
            Delivery::Failed(_)
        ));
    }

    #[tokio::test]
    async fn none_transport_only_logs() {
        let dispatcher = AlertDispatcher::new(Transport::None, "hk-a", Duration::from_secs(1)).unwrap();
        assert_eq!(dispatcher.notify("x", Severity::Info).await, Delivery::Logged);
    }
}
