//! Wire types shared with the transport and rendering collaborators.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Agent bucket used when an inbound event carries no `agent_type`.
pub const UNKNOWN_AGENT: &str = "UNKNOWN";

/// One token fragment as delivered by the transport.
///
/// Every field is optional on the wire: absent `agent_type` falls into the
/// [`UNKNOWN_AGENT`] bucket, an absent `token` is an empty append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct TokenFragment {
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl TokenFragment {
    pub fn new(agent_type: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            token: token.into(),
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Convert a raw transport payload, degrading malformed input to the
    /// defaults rather than failing.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

impl Default for TokenFragment {
    fn default() -> Self {
        Self {
            agent_type: default_agent_type(),
            token: String::new(),
            message_id: None,
        }
    }
}

fn default_agent_type() -> String {
    UNKNOWN_AGENT.to_string()
}

/// Published view of one agent's in-flight or just-finalized message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    /// Accumulated display text for the agent's current message.
    pub tokens: String,
    /// True while fragments still arrive and no end condition has fired.
    pub active: bool,
    /// Epoch-ms timestamp of the last state-affecting event, monotonically
    /// non-decreasing per agent.
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// The full published mapping: agent identifier to its stream entry.
pub type AgentStreams = HashMap<String, StreamEntry>;
