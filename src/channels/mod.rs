//! Slack I/O: Web API client, Socket Mode event stream, startup checks.

pub mod slack;
pub mod socket_mode;
pub mod verify;

pub use slack::SlackClient;
pub use socket_mode::{SocketEvent, SocketModeAdapter};
pub use verify::{SetupReport, verify_setup};
