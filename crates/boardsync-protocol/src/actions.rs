//! Boardsync action name constants.
//!
//! Every frame carries an `action` tag. Outbound commands are sent by the
//! client; inbound actions are pushed by the server (or forwarded by a host
//! relay when running embedded).

/// All boardsync action names, grouped by direction.
pub struct Actions;

impl Actions {
    // ── Client → Server ─────────────────────────────────────────────────
    pub const AUTH: &str = "AUTH";
    pub const SUBSCRIBE_BLOCKS: &str = "SUBSCRIBE_BLOCKS";
    pub const UNSUBSCRIBE_BLOCKS: &str = "UNSUBSCRIBE_BLOCKS";
    pub const SUBSCRIBE_WORKSPACE: &str = "SUBSCRIBE_WORKSPACE";
    pub const UNSUBSCRIBE_WORKSPACE: &str = "UNSUBSCRIBE_WORKSPACE";

    // ── Server → Client ─────────────────────────────────────────────────
    pub const UPDATE_BLOCK: &str = "UPDATE_BLOCK";
    pub const UPDATE_CATEGORY: &str = "UPDATE_CATEGORY";
    pub const UPDATE_CLIENT_CONFIG: &str = "UPDATE_CLIENT_CONFIG";

    // ── Host relay broadcasts ───────────────────────────────────────────
    pub const PLUGIN_STATUSES_CHANGED: &str = "plugin_statuses_changed";
}

/// Returns true if the given string is an action this protocol defines.
pub fn is_known_action(action: &str) -> bool {
    matches!(
        action,
        Actions::AUTH
            | Actions::SUBSCRIBE_BLOCKS
            | Actions::UNSUBSCRIBE_BLOCKS
            | Actions::SUBSCRIBE_WORKSPACE
            | Actions::UNSUBSCRIBE_WORKSPACE
            | Actions::UPDATE_BLOCK
            | Actions::UPDATE_CATEGORY
            | Actions::UPDATE_CLIENT_CONFIG
            | Actions::PLUGIN_STATUSES_CHANGED
    )
}
