//! Hub channel names and endpoint constants shared with the server.
//!
//! These are wire constants: the server invokes clients on these targets and
//! accepts invocations on them, so they must match byte for byte.

use std::time::Duration;

/// Default hub path appended to the base URI.
pub const DEFAULT_HUB_PATH: &str = "/signalRHub";

/// A user connected (`connectionId`, `userName`).
pub const CONNECT: &str = "connect";
/// A user disconnected (`connectionId`, `userName`).
pub const DISCONNECT: &str = "disconnect";
/// Broadcast chat message (`from`, `message`). Also the outbound `send` target.
pub const SEND_MESSAGE: &str = "sendMessage";
/// Direct chat message (`from`, `to`, `message`).
pub const SEND_PRIVATE_MESSAGE: &str = "sendPrivateMessage";
/// Notification (`message`). Also the outbound `notify` target.
pub const NOTIFY: &str = "notify";
/// Background job started (`message`).
pub const JOB_START: &str = "jobStart";
/// Background job finished (`message`).
pub const JOB_COMPLETED: &str = "jobCompleted";

/// Every inbound channel the client registers a handler for.
pub const INBOUND: [&str; 7] = [
    CONNECT,
    DISCONNECT,
    SEND_MESSAGE,
    SEND_PRIVATE_MESSAGE,
    NOTIFY,
    JOB_START,
    JOB_COMPLETED,
];

/// Silence from the server longer than this drops the connection.
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the client pings the server while connected.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Join a base URI and hub path, dropping trailing slashes from the base.
pub fn hub_url(base_url: &str, hub_path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), hub_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_url_trims_trailing_slashes() {
        assert_eq!(hub_url("https://host/", "/hub"), "https://host/hub");
        assert_eq!(hub_url("https://host//", "/hub"), "https://host/hub");
        assert_eq!(hub_url("https://host", "/hub"), "https://host/hub");
    }

    #[test]
    fn inbound_channels_are_distinct() {
        let mut names = INBOUND.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), INBOUND.len());
    }
}
