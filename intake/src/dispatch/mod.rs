//! Grading dispatch: the wire message, the queue seam and language routing.
//!
//! Queues are at-least-once. A message can be published more than once for
//! the same handin (relay retries, crash between publish and mark), and the
//! correlator is what makes that safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub mod channel;
pub mod http;
pub mod outbox;

pub use channel::ChannelQueue;
pub use http::HttpQueue;
pub use outbox::{OutboxRelay, RelayConfig, RelayReport};

use crate::artifacts::ArtifactRef;
use crate::catalog::Assignment;
use crate::deadline::DeadlineTier;
use crate::ids::HandinId;

/// Everything a worker needs to grade without calling back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentContext {
    pub uuid: String,
    pub slug: String,
    pub name: String,
    /// Tier the handin was accepted under.
    pub tier: DeadlineTier,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl AssignmentContext {
    pub fn new(assignment: &Assignment, tier: DeadlineTier) -> Self {
        Self {
            uuid: assignment.uuid.clone(),
            slug: assignment.slug.clone(),
            name: assignment.name.clone(),
            tier,
            context: assignment.context.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub handin_id: HandinId,
    pub owner_id: i64,
    pub language: String,
    pub artifact_ref: ArtifactRef,
    pub assignment: AssignmentContext,
    pub submitted_at: DateTime<Utc>,
}

impl DispatchMessage {
    pub fn to_json(&self) -> Result<serde_json::Value, QueueError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, QueueError> {
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("channel {0} has no consumer")]
    Closed(String),

    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// A durable, at-least-once channel to the grading workers.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn publish(&self, channel: &str, message: &DispatchMessage) -> Result<(), QueueError>;
}

/// Picks the queue channel for a language.
#[derive(Debug, Clone)]
pub struct Routing {
    default: String,
    routes: HashMap<String, String>,
}

impl Routing {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            routes: HashMap::new(),
        }
    }

    pub fn with_route(mut self, language: &str, channel: impl Into<String>) -> Self {
        self.routes.insert(language.to_lowercase(), channel.into());
        self
    }

    pub fn from_config(cfg: &common::AppConfig) -> Self {
        cfg.dispatch_routes
            .iter()
            .fold(Self::new(&cfg.dispatch_default_queue), |r, (lang, ch)| {
                r.with_route(lang, ch)
            })
    }

    pub fn channel_for(&self, language: &str) -> &str {
        self.routes
            .get(language)
            .map(String::as_str)
            .unwrap_or(self.default.as_str())
    }

    pub fn default_channel(&self) -> &str {
        &self.default
    }
}

impl Default for Routing {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_routing_falls_back_to_default() {
        let routing = Routing::new("default")
            .with_route("Java", "jvm")
            .with_route("cpp", "native");
        assert_eq!(routing.channel_for("java"), "jvm");
        assert_eq!(routing.channel_for("cpp"), "native");
        assert_eq!(routing.channel_for("python"), "default");
    }

    #[test]
    fn test_message_wire_shape() {
        let due = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap();
        let hw = Assignment::new("u-1", "hello", "Hello", vec![], vec!["python".into()])
            .unwrap()
            .with_context(serde_json::json!({ "tests": 3 }));
        let msg = DispatchMessage {
            handin_id: HandinId::new("h-1"),
            owner_id: 42,
            language: "python".into(),
            artifact_ref: ArtifactRef::from_digest(&"a".repeat(64)),
            assignment: AssignmentContext::new(&hw, DeadlineTier::new(due, 0.8)),
            submitted_at: due,
        };

        let wire = msg.to_json().unwrap();
        assert_eq!(wire["handin_id"], "h-1");
        assert_eq!(wire["artifact_ref"], format!("sha256:{}", "a".repeat(64)));
        assert_eq!(wire["assignment"]["tier"]["scale"], 0.8);
        assert_eq!(wire["assignment"]["context"]["tests"], 3);
        assert_eq!(DispatchMessage::from_json(wire).unwrap(), msg);
    }
}
