//! Inbound messages (server → client) and the payloads they carry.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actions::Actions;
use crate::error::ProtocolError;

/// Remote client configuration pushed by the server. Opaque to this crate.
pub type RemoteConfig = Value;

// ─────────────────────────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────────────────────────

/// An application record carried inside an update.
///
/// Only `id` is interpreted; every other field is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Notification category an update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Block,
    Category,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 2] = [ChangeKind::Block, ChangeKind::Category];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Category => "category",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound frame
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded server frame: `{action?, block?, category?, error?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InboundMessage {
    pub fn update_block(block: Entity) -> Self {
        Self {
            action: Some(Actions::UPDATE_BLOCK.into()),
            block: Some(block),
            ..Self::default()
        }
    }

    pub fn update_category(category: Entity) -> Self {
        Self {
            action: Some(Actions::UPDATE_CATEGORY.into()),
            category: Some(category),
            ..Self::default()
        }
    }

    /// Decode a text frame. A frame carrying an `error` field is rejected.
    pub fn from_frame(text: &str) -> Result<Self, ProtocolError> {
        let message: InboundMessage = serde_json::from_str(text)?;
        if let Some(error) = &message.error {
            return Err(ProtocolError::Remote(error.clone()));
        }
        Ok(message)
    }

    /// Extract the mutation this message carries.
    ///
    /// Returns `Ok(None)` for any action that is not a block or category
    /// update; the caller decides how to report that.
    pub fn into_change(self) -> Result<Option<(ChangeKind, Entity)>, ProtocolError> {
        match self.action.as_deref() {
            Some(Actions::UPDATE_BLOCK) => self
                .block
                .map(|b| Some((ChangeKind::Block, b)))
                .ok_or(ProtocolError::MissingPayload(Actions::UPDATE_BLOCK)),
            Some(Actions::UPDATE_CATEGORY) => self
                .category
                .map(|c| Some((ChangeKind::Category, c)))
                .ok_or(ProtocolError::MissingPayload(Actions::UPDATE_CATEGORY)),
            _ => Ok(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin status broadcast (host relay only)
// ─────────────────────────────────────────────────────────────────────────────

/// Status of one plugin as broadcast by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub plugin_id: String,
    pub version: String,
}

/// Payload of the `plugin_statuses_changed` broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatuses {
    #[serde(default)]
    pub plugin_statuses: Vec<PluginStatus>,
}

impl PluginStatuses {
    pub fn find(&self, plugin_id: &str) -> Option<&PluginStatus> {
        self.plugin_statuses.iter().find(|s| s.plugin_id == plugin_id)
    }
}
