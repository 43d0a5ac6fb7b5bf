//! Process session management: spawn, stream, track, and terminate shell commands.

pub mod manager;
pub mod policy;
pub mod registry;
pub mod streamer;
pub mod tree_killer;

pub use manager::{ProcessSnapshot, SessionManager, SessionStatus};
