//! Setup events published to subscribers.
//!
//! Wire shape:
//!
//! ```json
//! {"type":"mcp-setup","payload":{"serverId":"srv-1","provider":"whatsapp","status":"pending","content":"█▀▀█"}}
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Connector whose setup is being monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Whatsapp,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Whatsapp => "whatsapp",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `pending` carries a QR code to scan; `success` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub server_id: String,
    pub provider: Provider,
    pub status: SetupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SetupMessage {
    #[serde(rename = "mcp-setup")]
    McpSetup(SetupPayload),
}

impl SetupMessage {
    pub fn pending(server_id: &str, provider: Provider, qr_code: impl Into<String>) -> Self {
        Self::new(server_id, provider, SetupStatus::Pending, Some(qr_code.into()))
    }

    pub fn success(server_id: &str, provider: Provider) -> Self {
        Self::new(server_id, provider, SetupStatus::Success, None)
    }

    pub fn error(server_id: &str, provider: Provider) -> Self {
        Self::new(server_id, provider, SetupStatus::Error, None)
    }

    fn new(
        server_id: &str,
        provider: Provider,
        status: SetupStatus,
        content: Option<String>,
    ) -> Self {
        SetupMessage::McpSetup(SetupPayload {
            server_id: server_id.to_string(),
            provider,
            status,
            content,
        })
    }

    pub fn payload(&self) -> &SetupPayload {
        match self {
            SetupMessage::McpSetup(payload) => payload,
        }
    }
}

/// Serialize and broadcast a SetupMessage to all subscribers.
/// Returns silently even if nobody is subscribed.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &SetupMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json); // Ignore error if no receivers
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize SetupMessage");
        }
    }
}
