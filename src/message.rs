//! Canonical message parts shared by every provider adapter.
//!
//! On the wire each part is one JSON object discriminated by a lowercase,
//! hyphenated `type` tag, e.g. `{"type":"text-delta","id":"txt_1","delta":"Hello"}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;
use crate::stream::finish::FinishReason;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MessagePart {
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    Citation {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Finish {
        reason: FinishReason,
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra: Option<Map<String, Value>>,
    },
    Error {
        message: String,
    },
}

impl MessagePart {
    /// Every discriminator the decoder accepts. Anything else is rejected
    /// with [`GatewayError::UnknownVariant`].
    pub const TAGS: [&'static str; 9] = [
        "text-start",
        "text-delta",
        "text-end",
        "reasoning-start",
        "reasoning-delta",
        "reasoning-end",
        "citation",
        "finish",
        "error",
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ReasoningStart { .. } => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::Citation { .. } => "citation",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, GatewayError> {
        serde_json::to_string(self).map_err(GatewayError::from)
    }

    pub fn decode(input: &str) -> Result<Self, GatewayError> {
        let value = serde_json::from_str::<Value>(input)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, GatewayError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Decode("missing `type` discriminator".to_string()))?;

        if !Self::TAGS.contains(&tag) {
            return Err(GatewayError::UnknownVariant(tag.to_string()));
        }

        serde_json::from_value(value).map_err(GatewayError::from)
    }
}
