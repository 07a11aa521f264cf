//! Outbound commands (client → server).
//!
//! On a raw socket a command goes out as one JSON object with the action tag
//! inline: `{"action":"SUBSCRIBE_BLOCKS","blockIds":[...],...}`. Through a
//! host relay the tag and the payload travel separately, see
//! [`Command::action`] and [`Command::payload`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::Actions;

/// A fire-and-forget command. No response is expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Command {
    #[serde(rename = "AUTH")]
    Authenticate {
        token: String,
        #[serde(rename = "workspaceId")]
        workspace_id: String,
    },

    #[serde(rename = "SUBSCRIBE_BLOCKS")]
    SubscribeBlocks {
        #[serde(rename = "blockIds")]
        block_ids: Vec<String>,
        #[serde(rename = "workspaceId")]
        workspace_id: String,
        #[serde(rename = "readToken")]
        read_token: String,
    },

    #[serde(rename = "UNSUBSCRIBE_BLOCKS")]
    UnsubscribeBlocks {
        #[serde(rename = "blockIds")]
        block_ids: Vec<String>,
        #[serde(rename = "workspaceId")]
        workspace_id: String,
        #[serde(rename = "readToken")]
        read_token: String,
    },

    #[serde(rename = "SUBSCRIBE_WORKSPACE")]
    SubscribeWorkspace {
        #[serde(rename = "workspaceId")]
        workspace_id: String,
    },

    #[serde(rename = "UNSUBSCRIBE_WORKSPACE")]
    UnsubscribeWorkspace {
        #[serde(rename = "workspaceId")]
        workspace_id: String,
    },
}

impl Command {
    /// The wire action tag for this command.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => Actions::AUTH,
            Self::SubscribeBlocks { .. } => Actions::SUBSCRIBE_BLOCKS,
            Self::UnsubscribeBlocks { .. } => Actions::UNSUBSCRIBE_BLOCKS,
            Self::SubscribeWorkspace { .. } => Actions::SUBSCRIBE_WORKSPACE,
            Self::UnsubscribeWorkspace { .. } => Actions::UNSUBSCRIBE_WORKSPACE,
        }
    }

    /// The command's fields without the action tag.
    pub fn payload(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = value {
            map.remove("action");
        }
        value
    }

    /// Serialize to the raw-socket text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
