use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Transport,
    Closed,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::Transport => "urn:roundtable:error:transport",
            Self::Closed => "urn:roundtable:error:closed",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Transport => "Transport Failure",
            Self::Closed => "Aggregator Closed",
        }
    }
}

#[derive(Debug, Error)]
pub enum RoundtableError {
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        details: Option<Value>,
    },
    #[error("aggregator closed")]
    Closed,
}

impl RoundtableError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            details: None,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Transport { .. } => ErrorType::Transport,
            Self::Closed => ErrorType::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urns_follow_error_type() {
        let err = RoundtableError::transport("connection reset");
        assert_eq!(err.error_type(), ErrorType::Transport);
        assert_eq!(err.error_type().as_urn(), "urn:roundtable:error:transport");
        assert_eq!(
            RoundtableError::Closed.error_type().as_urn(),
            "urn:roundtable:error:closed"
        );
    }

    #[test]
    fn display_includes_transport_message() {
        let err = RoundtableError::transport("connection reset");
        assert_eq!(err.to_string(), "transport failure: connection reset");
    }
}
