use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    Error,
}

impl FinishReason {
    /// Maps a provider's raw finish vocabulary onto the canonical set.
    /// Unknown and missing values resolve to `Stop`.
    pub fn from_provider(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Stop;
        };

        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" | "eos" | "complete" | "completed"
            | "finish" | "pause_turn" => Self::Stop,
            "length" | "max_tokens" | "max_output_tokens" | "model_length"
            | "max_tokens_reached" => Self::Length,
            "tool_calls" | "tool-calls" | "tool_use" | "function_call" | "tool_call" => {
                Self::ToolCalls
            }
            "error" | "content_filter" | "safety" | "recitation" | "refusal" | "blocklist"
            | "prohibited_content" | "malformed_function_call" => Self::Error,
            _ => Self::Stop,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool-calls",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts as reported by one upstream payload. `None` means the payload
/// did not carry that counter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            ..Self::default()
        }
    }

    pub fn with_total(mut self, total_tokens: u64) -> Self {
        self.total_tokens = Some(total_tokens);
        self
    }

    pub fn with_reasoning(mut self, reasoning_tokens: u64) -> Self {
        self.reasoning_tokens = Some(reasoning_tokens);
        self
    }
}

/// Running usage for one normalization run. Providers report counters
/// cumulatively, so a later value replaces an earlier one.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UsageAccumulator {
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: Option<u64>,
    reasoning_tokens: Option<u64>,
}

impl UsageAccumulator {
    pub fn merge(&mut self, usage: Usage) {
        if let Some(value) = usage.input_tokens {
            self.input_tokens = value;
        }
        if let Some(value) = usage.output_tokens {
            self.output_tokens = value;
        }
        if let Some(value) = usage.total_tokens {
            self.total_tokens = Some(value);
        }
        if let Some(value) = usage.reasoning_tokens {
            self.reasoning_tokens = Some(value);
        }
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
            .unwrap_or_else(|| self.input_tokens.saturating_add(self.output_tokens))
    }

    pub fn reasoning_tokens(&self) -> Option<u64> {
        self.reasoning_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_vendor_vocabularies() {
        assert_eq!(FinishReason::from_provider(Some("end_turn")), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider(Some("STOP")), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider(Some("max_tokens")), FinishReason::Length);
        assert_eq!(FinishReason::from_provider(Some("MAX_TOKENS")), FinishReason::Length);
        assert_eq!(FinishReason::from_provider(Some("tool_use")), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_provider(Some("tool_calls")), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_provider(Some("content_filter")), FinishReason::Error);
    }

    #[test]
    fn unknown_or_missing_reason_defaults_to_stop() {
        assert_eq!(FinishReason::from_provider(None), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider(Some("")), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider(Some("weird")), FinishReason::Stop);
    }

    #[test]
    fn total_prefers_explicit_value() {
        let mut usage = UsageAccumulator::default();
        usage.merge(Usage::new(3, 2));
        assert_eq!(usage.total_tokens(), 5);

        usage.merge(Usage::default().with_total(9));
        assert_eq!(usage.total_tokens(), 9);
    }

    #[test]
    fn later_counters_replace_earlier_ones() {
        let mut usage = UsageAccumulator::default();
        usage.merge(Usage {
            input_tokens: Some(10),
            output_tokens: Some(1),
            ..Usage::default()
        });
        usage.merge(Usage {
            output_tokens: Some(42),
            reasoning_tokens: Some(7),
            ..Usage::default()
        });

        assert_eq!(usage.input_tokens(), 10);
        assert_eq!(usage.output_tokens(), 42);
        assert_eq!(usage.reasoning_tokens(), Some(7));
        assert_eq!(usage.total_tokens(), 52);
    }
}
