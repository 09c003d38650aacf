pub mod backend;
pub mod catalog;
pub mod core;
pub mod error;
pub mod mpv;
pub mod poller;
pub mod session;
pub mod socket;

#[cfg(test)]
mod testing;

use tune_proto::protocol::TransportStatus;

/// Fan-out notifications from the session loop to every connected client.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    StateUpdated,
    /// Latest transport snapshot; `None` when nothing is bound.
    Status(Option<TransportStatus>),
    Error(String),
    Log(String),
}
