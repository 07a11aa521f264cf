//! Boardsync Protocol - Wire Types
//!
//! JSON text-frame types for the boardsync live update channel.
//! This crate is the single source of truth for action names, outbound
//! commands, inbound messages, and plugin-status payloads.

pub mod actions;
pub mod command;
pub mod error;
pub mod message;

pub use actions::{Actions, is_known_action};
pub use command::Command;
pub use error::ProtocolError;
pub use message::{
    ChangeKind, Entity, InboundMessage, PluginStatus, PluginStatuses, RemoteConfig,
};
