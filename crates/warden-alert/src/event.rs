//! Alert events and the payload shape of each transport.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use warden_core::Severity;
use warden_core::config::{AlertConfig, TransportKind};

/// One alert, built per dispatch and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub host: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(host: &str, message: &str, severity: Severity) -> Self {
        Self {
            host: host.to_string(),
            message: message.to_string(),
            severity,
            timestamp: Utc::now(),
        }
    }

    /// `[CRITICAL] host: message`
    pub fn text(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.severity.label().to_uppercase(),
            self.host,
            self.message
        )
    }
}

/// The closed set of webhook shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Log only.
    None,
    ChatBot { url: String },
    Json { url: String },
    ChatId { url: String, chat_id: String },
}

impl Transport {
    /// Build the transport from validated configuration. A missing
    /// endpoint degrades to `None` rather than failing.
    pub fn from_config(config: &AlertConfig) -> Self {
        let url = config.endpoint.clone().unwrap_or_default();
        if url.is_empty() {
            return Transport::None;
        }
        match config.transport {
            TransportKind::None => Transport::None,
            TransportKind::ChatBot => Transport::ChatBot { url },
            TransportKind::Json => Transport::Json { url },
            TransportKind::ChatId => match &config.chat_id {
                Some(chat_id) if !chat_id.is_empty() => Transport::ChatId {
                    url,
                    chat_id: chat_id.clone(),
                },
                _ => Transport::None,
            },
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Transport::None => None,
            Transport::ChatBot { url } | Transport::Json { url } | Transport::ChatId { url, .. } => {
                Some(url)
            }
        }
    }

    /// Request body for `event`, or `None` for the log-only transport.
    ///
    /// Bodies are assembled as JSON values, so message text is always a
    /// string leaf and can never add or replace keys.
    pub fn payload(&self, event: &AlertEvent) -> Option<Value> {
        match self {
            Transport::None => None,
            Transport::ChatBot { .. } => Some(json!({
                "msgtype": "text",
                "text": { "content": event.text() },
            })),
            Transport::Json { .. } => Some(json!({
                "host": event.host,
                "message": event.message,
                "severity": event.severity.label(),
                "timestamp": event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            })),
            Transport::ChatId { chat_id, .. } => Some(json!({
                "chat_id": chat_id,
                "text": event.text(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOSTILE: &str = "disk \"full\", \"severity\":\"info\"}\n{\\ <b>&amp;";

    fn event() -> AlertEvent {
        AlertEvent::new("hk-a\"}", HOSTILE, Severity::Critical)
    }

    fn keys(value: &Value) -> Vec<&str> {
        value.as_object().unwrap().keys().map(String::as_str).collect()
    }

    #[test]
    fn chat_bot_payload_keeps_text_in_one_leaf() {
        let t = Transport::ChatBot {
            url: "http://hook".to_string(),
        };
        let body = t.payload(&event()).unwrap();
        let reparsed: Value = serde_json::from_str(&body.to_string()).unwrap();

        assert_eq!(keys(&reparsed), vec!["msgtype", "text"]);
        assert_eq!(reparsed["msgtype"], "text");
        assert_eq!(
            reparsed["text"]["content"].as_str().unwrap(),
            format!("[CRITICAL] hk-a\"}}: {HOSTILE}")
        );
    }

    #[test]
    fn json_payload_cannot_be_given_extra_fields() {
        let t = Transport::Json {
            url: "http://hook".to_string(),
        };
        let body = t.payload(&event()).unwrap();
        let reparsed: Value = serde_json::from_str(&body.to_string()).unwrap();

        let mut k = keys(&reparsed);
        k.sort();
        assert_eq!(k, vec!["host", "message", "severity", "timestamp"]);
        assert_eq!(reparsed["severity"], "critical");
        assert_eq!(reparsed["message"].as_str().unwrap(), HOSTILE);
        assert_eq!(reparsed["host"].as_str().unwrap(), "hk-a\"}");
    }

    #[test]
    fn chat_id_payload_addresses_chat() {
        let t = Transport::ChatId {
            url: "http://hook".to_string(),
            chat_id: "-100123".to_string(),
        };
        let body = t.payload(&AlertEvent::new("hk-a", "tunnel down", Severity::Warning)).unwrap();
        assert_eq!(body["chat_id"], "-100123");
        assert_eq!(body["text"], "[WARNING] hk-a: tunnel down");
    }

    #[test]
    fn none_transport_has_no_payload() {
        assert!(Transport::None.payload(&event()).is_none());
        assert!(Transport::None.url().is_none());
    }

    #[test]
    fn from_config_requires_endpoint_and_chat_id() {
        let mut config = AlertConfig {
            transport: TransportKind::ChatId,
            endpoint: Some("http://hook".to_string()),
            ..AlertConfig::default()
        };
        assert_eq!(Transport::from_config(&config), Transport::None);

        config.chat_id = Some("42".to_string());
        assert_eq!(
            Transport::from_config(&config),
            Transport::ChatId {
                url: "http://hook".to_string(),
                chat_id: "42".to_string()
            }
        );

        config.transport = TransportKind::Json;
        config.endpoint = None;
        assert_eq!(Transport::from_config(&config), Transport::None);
    }
}
