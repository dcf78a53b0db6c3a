//! Protocol operation identifiers.
//!
//! Every header names the backend operation it targets (or the event kind
//! it carries) through one of these ids. The frame layer stamps its own
//! fixed ids on the outer frame; routing of inbound traffic always goes by
//! the id inside the decoded header.

/// Service id stamped on every frame exchanged with the worker.
pub const SERVICE_ID: u16 = 2380;

/// Frame-level operation id for outbound request frames.
pub const COMMON_REQUEST: u16 = 0xFFE;

/// Frame-level operation id the worker stamps on response frames.
pub const COMMON_RESPONSE: u16 = 0xFFF;

// Messaging.
pub const MESSAGE_SUBSCRIBE: u16 = 0;
pub const MESSAGE_UNSUBSCRIBE: u16 = 1;
pub const MESSAGE_PUBLISH: u16 = 2;
pub const MESSAGE_EVENT: u16 = 3;

// Stream channels and topics.
pub const STREAM_JOIN: u16 = 4;
pub const STREAM_LEAVE: u16 = 5;
pub const STREAM_JOIN_TOPIC: u16 = 6;
pub const STREAM_LEAVE_TOPIC: u16 = 7;
pub const STREAM_PUBLISH_TOPIC: u16 = 8;
pub const STREAM_EVENT: u16 = 9;
pub const STREAM_TOPIC_EVENT: u16 = 10;
pub const STREAM_SUBSCRIBE_TOPIC: u16 = 11;
pub const STREAM_UNSUBSCRIBE_TOPIC: u16 = 12;

// Channel and user metadata storage.
pub const STORAGE_SET_CHANNEL_METADATA: u16 = 24;
pub const STORAGE_GET_CHANNEL_METADATA: u16 = 25;
pub const STORAGE_SET_USER_METADATA: u16 = 26;
pub const STORAGE_GET_USER_METADATA: u16 = 27;
pub const STORAGE_SUBSCRIBE_USER_METADATA: u16 = 28;
pub const STORAGE_UNSUBSCRIBE_USER_METADATA: u16 = 29;
pub const STORAGE_CHANNEL_EVENT: u16 = 30;
pub const STORAGE_USER_EVENT: u16 = 31;

// Presence.
pub const PRESENCE_WHERE_NOW: u16 = 36;
pub const PRESENCE_WHO_NOW: u16 = 37;
pub const PRESENCE_SET_STATE: u16 = 38;
pub const PRESENCE_GET_STATE: u16 = 39;
pub const PRESENCE_REMOVE_STATE: u16 = 40;
pub const PRESENCE_EVENT: u16 = 41;

// Session control.
pub const LOGIN: u16 = 100;
pub const LOGOUT: u16 = 101;
pub const CONNECTION_STATE_CHANGE: u16 = 102;
pub const SET_PARAMETERS: u16 = 103;
pub const RENEW_TOKEN: u16 = 104;

// Distributed locks.
pub const LOCK_ACQUIRE: u16 = 105;
pub const LOCK_GET: u16 = 106;
pub const LOCK_RELEASE: u16 = 107;
pub const LOCK_REMOVE: u16 = 108;
pub const LOCK_REVOKE: u16 = 109;
pub const LOCK_SET: u16 = 110;
pub const LOCK_EVENT: u16 = 111;

// Token lifecycle.
pub const TOKEN_PRIVILEGE_EXPIRE: u16 = 112;

/// Whether `operation` identifies a worker-initiated event rather than the
/// response to a call.
pub fn is_event(operation: u16) -> bool {
    matches!(
        operation,
        MESSAGE_EVENT
            | STREAM_EVENT
            | STREAM_TOPIC_EVENT
            | STORAGE_CHANNEL_EVENT
            | STORAGE_USER_EVENT
            | PRESENCE_EVENT
            | CONNECTION_STATE_CHANGE
            | LOCK_EVENT
            | TOKEN_PRIVILEGE_EXPIRE
    )
}
