//! Streaming core for an AI provider gateway: byte-level SSE framing, a
//! provider-agnostic normalizer producing canonical [`message::MessagePart`]s,
//! and a create-then-poll executor for job-based generation APIs.

pub mod config;
pub mod error;
pub mod http;
pub mod job;
pub mod message;
pub mod providers;
pub mod sdk;
pub mod stream;
pub mod telemetry;

pub use config::Config;
pub use error::GatewayError;
pub use message::MessagePart;
