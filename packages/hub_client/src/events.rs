//! Typed events raised by the hub client.

use serde::{Deserialize, Serialize};

/// A user connected to or disconnected from the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStateChange {
    pub connection_id: String,
    pub user_name: String,
}

/// A chat message, broadcast or private. The recipient of a private message
/// is not carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceived {
    pub from: String,
    pub message: String,
}

/// Every event kind, for consumers of [`HubClient::subscribe`](crate::HubClient::subscribe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    Login(UserStateChange),
    Logout(UserStateChange),
    MessageReceived(MessageReceived),
    NotificationReceived { message: String },
    JobStarted { message: String },
    JobCompleted { message: String },
}

impl std::fmt::Display for HubEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubEvent::Login(e) => write!(f, "login {} ({})", e.user_name, e.connection_id),
            HubEvent::Logout(e) => write!(f, "logout {} ({})", e.user_name, e.connection_id),
            HubEvent::MessageReceived(e) => write!(f, "{}: {}", e.from, e.message),
            HubEvent::NotificationReceived { message } => write!(f, "notification: {}", message),
            HubEvent::JobStarted { message } => write!(f, "job started: {}", message),
            HubEvent::JobCompleted { message } => write!(f, "job completed: {}", message),
        }
    }
}
